use talus::Config;
use test_log::test;

#[test]
fn newer_table_shadows_older() -> talus::Result<()> {
    let folder = tempfile::tempdir()?;
    let db = Config::new(&folder).open()?;

    db.insert("bar", "b", &Default::default())?;
    db.insert("foo", "v1", &Default::default())?;
    db.flush_memtable()?;

    db.insert("foo", "v2", &Default::default())?;
    db.flush_memtable()?;

    // Both tables contain "foo"; the newer one must win
    assert_eq!(
        Some("v2".as_bytes().into()),
        db.get("foo", &Default::default())?
    );
    assert_eq!(
        Some("b".as_bytes().into()),
        db.get("bar", &Default::default())?
    );

    Ok(())
}

#[test]
fn overlapping_flushes_stack_in_level0() -> talus::Result<()> {
    let folder = tempfile::tempdir()?;
    let db = Config::new(&folder).open()?;

    // Identical key ranges keep every flush in level 0
    for round in 0..3_u32 {
        db.insert("a", format!("a{round}"), &Default::default())?;
        db.insert("z", format!("z{round}"), &Default::default())?;
        db.flush_memtable()?;
    }

    assert!(db.number_of_files_in_level(0) >= 1);

    assert_eq!(
        Some("a2".as_bytes().into()),
        db.get("a", &Default::default())?
    );
    assert_eq!(
        Some("z2".as_bytes().into()),
        db.get("z", &Default::default())?
    );

    Ok(())
}

#[test]
fn tables_across_levels_resolve_newest() -> talus::Result<()> {
    let folder = tempfile::tempdir()?;
    let db = Config::new(&folder).open()?;

    db.insert("foo", "v1", &Default::default())?;
    db.flush_memtable()?;
    db.compact_range(0, None, None)?;
    db.compact_range(1, None, None)?;

    db.insert("foo", "v2", &Default::default())?;
    db.flush_memtable()?;

    db.insert("foo", "v3", &Default::default())?;

    assert_eq!(
        Some("v3".as_bytes().into()),
        db.get("foo", &Default::default())?
    );

    Ok(())
}
