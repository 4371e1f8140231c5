use talus::Config;
use test_log::test;

const MAX_OVERLAP: u64 = 20 * 1_024 * 1_024;

fn pseudo_random_value(seed: u32, len: usize) -> Vec<u8> {
    // Cheap incompressible filler
    (0..len)
        .map(|idx| {
            let x = seed
                .wrapping_mul(31)
                .wrapping_add(idx as u32)
                .wrapping_mul(2_654_435_761);
            (x >> 24) as u8
        })
        .collect()
}

#[test]
fn sparse_merge_bounds_next_level_overlap() -> talus::Result<()> {
    let folder = tempfile::tempdir()?;
    let db = Config::new(&folder).open()?;

    // Two small keys framing a wide span of bulk data
    db.insert("A", "va", &Default::default())?;

    for idx in 0..100_000_u32 {
        db.insert(
            format!("B{idx:0>6}"),
            pseudo_random_value(idx, 1_000),
            &Default::default(),
        )?;
    }

    db.insert("C", "vc", &Default::default())?;

    db.flush_memtable()?;
    db.compact_range(0, None, None)?;
    db.compact_range(1, None, None)?;

    assert!(db.max_next_level_overlapping_bytes() <= MAX_OVERLAP);

    // A tiny flush now spans the entire bulk range; compacting it must
    // not create files with outsized next-level overlap
    db.insert("A", "va2", &Default::default())?;
    db.insert("B100", "bvalue2", &Default::default())?;
    db.insert("C", "vc2", &Default::default())?;
    db.flush_memtable()?;

    assert!(db.max_next_level_overlapping_bytes() <= MAX_OVERLAP);

    db.compact_range(0, None, None)?;

    assert!(db.max_next_level_overlapping_bytes() <= MAX_OVERLAP);

    assert_eq!(
        Some("va2".as_bytes().into()),
        db.get("A", &Default::default())?
    );
    assert_eq!(
        Some("vc2".as_bytes().into()),
        db.get("C", &Default::default())?
    );

    Ok(())
}
