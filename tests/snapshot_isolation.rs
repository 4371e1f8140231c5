use talus::{Config, ReadOptions};
use test_log::test;

#[test]
fn snapshot_pins_value() -> talus::Result<()> {
    let folder = tempfile::tempdir()?;
    let db = Config::new(&folder).open()?;

    db.insert("foo", "v1", &Default::default())?;
    let s1 = db.snapshot();

    db.insert("foo", "v2", &Default::default())?;
    let s2 = db.snapshot();

    db.insert("foo", "v3", &Default::default())?;
    let s3 = db.snapshot();

    db.insert("foo", "v4", &Default::default())?;

    assert_eq!(
        Some("v1".as_bytes().into()),
        db.get("foo", &ReadOptions::default().snapshot(&s1))?
    );
    assert_eq!(
        Some("v2".as_bytes().into()),
        db.get("foo", &ReadOptions::default().snapshot(&s2))?
    );
    assert_eq!(
        Some("v3".as_bytes().into()),
        db.get("foo", &ReadOptions::default().snapshot(&s3))?
    );
    assert_eq!(
        Some("v4".as_bytes().into()),
        db.get("foo", &Default::default())?
    );

    // Releasing out of order leaves the survivors intact
    db.release_snapshot(s3);
    db.release_snapshot(s1);

    assert_eq!(
        Some("v2".as_bytes().into()),
        db.get("foo", &ReadOptions::default().snapshot(&s2))?
    );
    assert_eq!(
        Some("v4".as_bytes().into()),
        db.get("foo", &Default::default())?
    );

    Ok(())
}

#[test]
fn snapshot_survives_flush_and_compaction() -> talus::Result<()> {
    let folder = tempfile::tempdir()?;
    let db = Config::new(&folder).open()?;

    db.insert("foo", "v1", &Default::default())?;
    let snapshot = db.snapshot();

    db.insert("foo", "v2", &Default::default())?;
    db.flush_memtable()?;

    db.remove("foo", &Default::default())?;
    db.flush_memtable()?;

    db.compact_range(0, None, None)?;

    assert_eq!(
        Some("v1".as_bytes().into()),
        db.get("foo", &ReadOptions::default().snapshot(&snapshot))?
    );
    assert_eq!(None, db.get("foo", &Default::default())?);

    Ok(())
}

#[test]
fn snapshot_sees_deletes_consistently() -> talus::Result<()> {
    let folder = tempfile::tempdir()?;
    let db = Config::new(&folder).open()?;

    db.insert("foo", "v1", &Default::default())?;
    db.remove("foo", &Default::default())?;
    let after_delete = db.snapshot();

    db.insert("foo", "v2", &Default::default())?;

    assert_eq!(
        None,
        db.get("foo", &ReadOptions::default().snapshot(&after_delete))?
    );
    assert_eq!(
        Some("v2".as_bytes().into()),
        db.get("foo", &Default::default())?
    );

    Ok(())
}

#[test]
fn snapshot_iterator_matches_point_reads() -> talus::Result<()> {
    let folder = tempfile::tempdir()?;
    let db = Config::new(&folder).open()?;

    for idx in 0..50_u32 {
        db.insert(format!("key{idx:0>2}"), "old", &Default::default())?;
    }

    let snapshot = db.snapshot();

    for idx in 0..50_u32 {
        db.insert(format!("key{idx:0>2}"), "new", &Default::default())?;
    }
    db.remove("key00", &Default::default())?;

    let opts = ReadOptions::default().snapshot(&snapshot);
    let items = db.iter(&opts)?.collect::<talus::Result<Vec<_>>>()?;

    assert_eq!(50, items.len());
    assert!(items.iter().all(|(_, value)| &**value == b"old"));

    Ok(())
}
