use talus::Config;
use test_log::test;

#[test]
fn recover_empty() -> talus::Result<()> {
    let folder = tempfile::tempdir()?;

    {
        let db = Config::new(&folder).open()?;
        assert_eq!(0, db.iter(&Default::default())?.count());
    }

    {
        let db = Config::new(&folder).open()?;
        assert_eq!(0, db.iter(&Default::default())?.count());
    }

    Ok(())
}

#[test]
fn recover_from_log() -> talus::Result<()> {
    let folder = tempfile::tempdir()?;

    {
        let db = Config::new(&folder).open()?;
        db.insert("foo", "v1", &Default::default())?;
        db.insert("baz", "v5", &Default::default())?;
    }

    {
        let db = Config::new(&folder).open()?;
        assert_eq!(
            Some("v1".as_bytes().into()),
            db.get("foo", &Default::default())?
        );
        assert_eq!(
            Some("v5".as_bytes().into()),
            db.get("baz", &Default::default())?
        );

        db.insert("foo", "v2", &Default::default())?;
    }

    {
        let db = Config::new(&folder).open()?;
        assert_eq!(
            Some("v2".as_bytes().into()),
            db.get("foo", &Default::default())?
        );
        assert_eq!(
            Some("v5".as_bytes().into()),
            db.get("baz", &Default::default())?
        );
    }

    Ok(())
}

#[test]
fn recover_across_flush_of_large_values() -> talus::Result<()> {
    let folder = tempfile::tempdir()?;

    let big1 = vec![b'x'; 10_000_000];
    let big2 = vec![b'y'; 1_000];

    {
        let db = Config::new(&folder)
            .write_buffer_size(1_000_000)
            .open()?;

        db.insert("foo", "v1", &Default::default())?;
        db.insert("big1", big1.clone(), &Default::default())?;
        db.insert("big2", big2.clone(), &Default::default())?;
        db.insert("bar", "v2", &Default::default())?;
    }

    {
        let db = Config::new(&folder)
            .write_buffer_size(1_000_000)
            .open()?;

        assert_eq!(
            Some("v1".as_bytes().into()),
            db.get("foo", &Default::default())?
        );
        assert_eq!(Some(big1.into()), db.get("big1", &Default::default())?);
        assert_eq!(Some(big2.into()), db.get("big2", &Default::default())?);
        assert_eq!(
            Some("v2".as_bytes().into()),
            db.get("bar", &Default::default())?
        );
    }

    Ok(())
}

#[test]
fn recover_preserves_deletes() -> talus::Result<()> {
    let folder = tempfile::tempdir()?;

    {
        let db = Config::new(&folder).open()?;
        db.insert("foo", "v1", &Default::default())?;
        db.flush_memtable()?;
        db.remove("foo", &Default::default())?;
    }

    {
        let db = Config::new(&folder).open()?;
        assert_eq!(None, db.get("foo", &Default::default())?);
    }

    Ok(())
}

#[test]
fn recover_keeps_sequence_monotone() -> talus::Result<()> {
    let folder = tempfile::tempdir()?;

    {
        let db = Config::new(&folder).open()?;
        db.insert("a", "1", &Default::default())?;
        db.insert("b", "2", &Default::default())?;
    }

    {
        let db = Config::new(&folder).open()?;

        // A write after reopen must shadow recovered state
        db.insert("a", "3", &Default::default())?;
        assert_eq!(
            Some("3".as_bytes().into()),
            db.get("a", &Default::default())?
        );
        assert_eq!(
            Some("2".as_bytes().into()),
            db.get("b", &Default::default())?
        );
    }

    Ok(())
}

#[test]
fn recover_many_random_values() -> talus::Result<()> {
    const ITEM_COUNT: u64 = 10_000;

    let folder = tempfile::tempdir()?;

    let mut expected = std::collections::BTreeMap::new();

    {
        let db = Config::new(&folder)
            .write_buffer_size(512 * 1_024)
            .open()?;

        for x in 0..ITEM_COUNT {
            let key = x.to_be_bytes();
            let value = nanoid::nanoid!();

            db.insert(key, value.as_bytes(), &Default::default())?;
            expected.insert(key.to_vec(), value.into_bytes());
        }
    }

    {
        let db = Config::new(&folder)
            .write_buffer_size(512 * 1_024)
            .open()?;

        for (key, value) in &expected {
            assert_eq!(
                Some(value.clone().into()),
                db.get(key, &Default::default())?
            );
        }

        let scanned = db
            .iter(&Default::default())?
            .collect::<talus::Result<Vec<_>>>()?;
        assert_eq!(ITEM_COUNT as usize, scanned.len());

        for ((key, value), (expected_key, expected_value)) in
            scanned.iter().zip(expected.iter())
        {
            assert_eq!(&**key, &expected_key[..]);
            assert_eq!(&**value, &expected_value[..]);
        }
    }

    Ok(())
}

#[test]
fn open_missing_without_create_fails() {
    let folder = tempfile::tempdir().expect("should create tempdir");

    let result = Config::new(folder.path().join("sub"))
        .create_if_missing(false)
        .open();

    assert!(matches!(result, Err(talus::Error::InvalidArgument(_))));
}

#[test]
fn open_existing_with_error_if_exists_fails() -> talus::Result<()> {
    let folder = tempfile::tempdir()?;

    {
        let _db = Config::new(&folder).open()?;
    }

    let result = Config::new(&folder).error_if_exists(true).open();
    assert!(matches!(result, Err(talus::Error::InvalidArgument(_))));

    Ok(())
}

#[test]
fn open_locked_folder_fails() -> talus::Result<()> {
    let folder = tempfile::tempdir()?;

    let _db = Config::new(&folder).open()?;

    assert!(matches!(
        Config::new(&folder).open(),
        Err(talus::Error::Busy)
    ));

    Ok(())
}

#[test]
fn approximate_sizes_grow_with_data() -> talus::Result<()> {
    let folder = tempfile::tempdir()?;

    // No compression, so sizes roughly match the raw data
    let db = Config::new(&folder)
        .compression(talus::CompressionType::None)
        .open()?;

    let sizes = db.approximate_sizes(&[("a", "z")])?;
    assert_eq!(vec![0], sizes);

    for idx in 0..1_000_u32 {
        db.insert(
            format!("key{idx:0>4}"),
            vec![idx as u8; 1_000],
            &Default::default(),
        )?;
    }
    db.flush_memtable()?;

    let sizes = db.approximate_sizes(&[("key0000", "key9999"), ("x", "z")])?;

    assert!(sizes.first().copied().unwrap_or_default() > 100_000);
    assert_eq!(Some(0), sizes.get(1).copied());

    Ok(())
}
