use talus::Config;
use test_log::test;

fn populated_db(folder: &std::path::Path) -> talus::Result<talus::Db> {
    let db = Config::new(folder).open()?;

    db.insert("a", "va", &Default::default())?;
    db.insert("b", "vb", &Default::default())?;
    db.flush_memtable()?;

    db.insert("c", "vc", &Default::default())?;
    db.insert("e", "ve", &Default::default())?;
    db.flush_memtable()?;

    db.insert("d", "vd", &Default::default())?;

    Ok(db)
}

#[test]
fn iterate_in_key_order_without_duplicates() -> talus::Result<()> {
    let folder = tempfile::tempdir()?;
    let db = populated_db(folder.path())?;

    // Overwrite some keys so multiple versions exist
    db.insert("a", "va2", &Default::default())?;
    db.insert("d", "vd2", &Default::default())?;

    let items = db.iter(&Default::default())?.collect::<talus::Result<Vec<_>>>()?;

    let keys = items
        .iter()
        .map(|(key, _)| key.to_vec())
        .collect::<Vec<_>>();

    assert_eq!(
        vec![
            b"a".to_vec(),
            b"b".to_vec(),
            b"c".to_vec(),
            b"d".to_vec(),
            b"e".to_vec(),
        ],
        keys
    );

    assert_eq!(
        "va2".as_bytes(),
        &**items.first().map(|(_, value)| value).expect("should exist")
    );

    Ok(())
}

#[test]
fn seek_positions_at_first_key_geq() -> talus::Result<()> {
    let folder = tempfile::tempdir()?;
    let db = populated_db(folder.path())?;

    let mut iter = db.iter(&Default::default())?;

    iter.seek("c")?;
    assert_eq!(
        "c".as_bytes(),
        &**iter.peek().map(|(key, _)| key).expect("should exist")
    );

    // "cc" does not exist; lands on "d"
    iter.seek("cc")?;
    assert_eq!(
        "d".as_bytes(),
        &**iter.peek().map(|(key, _)| key).expect("should exist")
    );

    let remaining = iter.collect::<talus::Result<Vec<_>>>()?;
    assert_eq!(2, remaining.len());

    Ok(())
}

#[test]
fn seek_past_end_exhausts() -> talus::Result<()> {
    let folder = tempfile::tempdir()?;
    let db = populated_db(folder.path())?;

    let mut iter = db.iter(&Default::default())?;

    iter.seek("x")?;
    assert!(!iter.has_next());
    assert!(iter.peek().is_none());
    assert!(iter.next().is_none());

    // Can be re-positioned afterwards
    iter.seek_to_first()?;
    assert!(iter.has_next());
    assert_eq!(
        "a".as_bytes(),
        &**iter.peek().map(|(key, _)| key).expect("should exist")
    );

    Ok(())
}

#[test]
fn deleted_keys_are_skipped() -> talus::Result<()> {
    let folder = tempfile::tempdir()?;
    let db = populated_db(folder.path())?;

    db.remove("c", &Default::default())?;

    let keys = db
        .iter(&Default::default())?
        .map(|item| Ok(item?.0.to_vec()))
        .collect::<talus::Result<Vec<_>>>()?;

    assert_eq!(
        vec![b"a".to_vec(), b"b".to_vec(), b"d".to_vec(), b"e".to_vec()],
        keys
    );

    let mut iter = db.iter(&Default::default())?;
    iter.seek("c")?;
    assert_eq!(
        "d".as_bytes(),
        &**iter.peek().map(|(key, _)| key).expect("should exist")
    );

    Ok(())
}

#[test]
fn iteration_is_lexicographic_on_bytes() -> talus::Result<()> {
    let folder = tempfile::tempdir()?;
    let db = Config::new(&folder).open()?;

    // Unsigned byte order: 0xFF sorts after ASCII
    db.insert(vec![0xFF_u8], "high", &Default::default())?;
    db.insert(vec![0x00_u8], "low", &Default::default())?;
    db.insert("m", "mid", &Default::default())?;

    let keys = db
        .iter(&Default::default())?
        .map(|item| Ok(item?.0.to_vec()))
        .collect::<talus::Result<Vec<_>>>()?;

    assert_eq!(vec![vec![0x00], b"m".to_vec(), vec![0xFF]], keys);

    Ok(())
}
