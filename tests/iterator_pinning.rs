use talus::Config;
use test_log::test;

#[test]
fn iterator_ignores_later_writes() -> talus::Result<()> {
    let folder = tempfile::tempdir()?;
    let db = Config::new(&folder).open()?;

    db.insert("foo", "hello", &Default::default())?;

    let iter = db.iter(&Default::default())?;

    for idx in 0..100_u32 {
        db.insert(format!("key{idx:0>3}"), "x", &Default::default())?;
    }

    let items = iter.collect::<talus::Result<Vec<_>>>()?;

    assert_eq!(1, items.len());

    let (key, value) = items.first().expect("should exist");
    assert_eq!("foo".as_bytes(), &**key);
    assert_eq!("hello".as_bytes(), &**value);

    Ok(())
}

#[test]
fn iterator_survives_flush_and_compaction() -> talus::Result<()> {
    let folder = tempfile::tempdir()?;
    let db = Config::new(&folder).open()?;

    for idx in 0..100_u32 {
        db.insert(format!("key{idx:0>3}"), "before", &Default::default())?;
    }

    let iter = db.iter(&Default::default())?;

    for idx in 0..100_u32 {
        db.insert(format!("key{idx:0>3}"), "after", &Default::default())?;
    }
    db.flush_memtable()?;
    db.compact_range(0, None, None)?;

    let items = iter.collect::<talus::Result<Vec<_>>>()?;

    assert_eq!(100, items.len());
    assert!(items.iter().all(|(_, value)| &**value == b"before"));

    Ok(())
}

#[test]
fn iterator_over_flushed_data_is_stable() -> talus::Result<()> {
    let folder = tempfile::tempdir()?;
    let db = Config::new(&folder).open()?;

    for idx in 0..50_u32 {
        db.insert(format!("key{idx:0>3}"), "v", &Default::default())?;
    }
    db.flush_memtable()?;

    let iter = db.iter(&Default::default())?;

    // Rewrites and deletes after iterator creation; the compactions
    // drop the table file the iterator still pins
    for idx in 0..50_u32 {
        db.remove(format!("key{idx:0>3}"), &Default::default())?;
    }
    db.flush_memtable()?;
    db.compact_range(0, None, None)?;
    db.compact_range(1, None, None)?;
    db.compact_range(2, None, None)?;

    assert_eq!(50, iter.count());
    assert_eq!(0, db.iter(&Default::default())?.count());

    Ok(())
}
