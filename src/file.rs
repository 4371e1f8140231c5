// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use std::io::Write;
use std::path::{Path, PathBuf};

/// Pointer file naming the live manifest
pub const CURRENT_FILE: &str = "CURRENT";

/// Exclusive lock file
pub const LOCK_FILE: &str = "LOCK";

/// Informational log file name (kept for compatibility, not written)
pub const INFO_LOG_FILE: &str = "LOG";

/// The type of a file inside the database folder
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum FileType {
    Current,
    Lock,
    InfoLog,
    Manifest(u64),
    Log(u64),
    Table(u64),
}

#[must_use]
pub fn manifest_file_path(folder: &Path, number: u64) -> PathBuf {
    folder.join(format!("MANIFEST-{number:0>6}"))
}

#[must_use]
pub fn log_file_path(folder: &Path, number: u64) -> PathBuf {
    folder.join(format!("{number:0>6}.log"))
}

#[must_use]
pub fn table_file_path(folder: &Path, number: u64) -> PathBuf {
    folder.join(format!("{number:0>6}.sst"))
}

/// Classifies a file name inside the database folder.
#[must_use]
pub fn parse_file_name(name: &str) -> Option<FileType> {
    match name {
        CURRENT_FILE => Some(FileType::Current),
        LOCK_FILE => Some(FileType::Lock),
        INFO_LOG_FILE | "LOG.old" => Some(FileType::InfoLog),
        _ => {
            if let Some(number) = name.strip_prefix("MANIFEST-") {
                return number.parse().ok().map(FileType::Manifest);
            }
            if let Some(number) = name.strip_suffix(".log") {
                return number.parse().ok().map(FileType::Log);
            }
            if let Some(number) = name.strip_suffix(".sst") {
                return number.parse().ok().map(FileType::Table);
            }
            None
        }
    }
}

/// Atomically rewrites a file
pub fn rewrite_atomic(path: &Path, content: &[u8]) -> std::io::Result<()> {
    // NOTE: Nothing we can do
    #[allow(clippy::expect_used)]
    let folder = path.parent().expect("should have a parent");

    let mut temp_file = tempfile::NamedTempFile::new_in(folder)?;
    temp_file.write_all(content)?;
    temp_file.as_file().sync_all()?;
    temp_file.persist(path)?;

    #[cfg(not(target_os = "windows"))]
    {
        let file = std::fs::File::open(path)?;
        file.sync_all()?;
    }

    Ok(())
}

/// Points `CURRENT` at the given manifest.
pub fn set_current_file(folder: &Path, manifest_number: u64) -> std::io::Result<()> {
    let content = format!("MANIFEST-{manifest_number:0>6}\n");
    rewrite_atomic(&folder.join(CURRENT_FILE), content.as_bytes())?;
    fsync_directory(folder)
}

/// Reads `CURRENT`, returning the manifest file name it points at.
pub fn read_current_file(folder: &Path) -> std::io::Result<Option<String>> {
    let path = folder.join(CURRENT_FILE);

    if !path.try_exists()? {
        return Ok(None);
    }

    let content = std::fs::read_to_string(path)?;
    Ok(Some(content.trim_end().to_owned()))
}

#[cfg(not(target_os = "windows"))]
pub fn fsync_directory(path: &Path) -> std::io::Result<()> {
    let file = std::fs::File::open(path)?;
    debug_assert!(file.metadata()?.is_dir());
    file.sync_all()
}

#[cfg(target_os = "windows")]
pub fn fsync_directory(path: &Path) -> std::io::Result<()> {
    // Cannot fsync directory on Windows
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    #[test]
    fn file_name_formatting() {
        let folder = Path::new("/db");
        assert!(manifest_file_path(folder, 7).ends_with("MANIFEST-000007"));
        assert!(log_file_path(folder, 12).ends_with("000012.log"));
        assert!(table_file_path(folder, 123_456_789).ends_with("123456789.sst"));
    }

    #[test]
    fn file_name_parsing() {
        assert_eq!(Some(FileType::Current), parse_file_name("CURRENT"));
        assert_eq!(Some(FileType::Lock), parse_file_name("LOCK"));
        assert_eq!(Some(FileType::Manifest(3)), parse_file_name("MANIFEST-000003"));
        assert_eq!(Some(FileType::Log(42)), parse_file_name("000042.log"));
        assert_eq!(Some(FileType::Table(9)), parse_file_name("000009.sst"));
        assert_eq!(None, parse_file_name("whatever.txt"));
        assert_eq!(None, parse_file_name("MANIFEST-abc"));
    }

    #[test]
    fn current_file_roundtrip() -> std::io::Result<()> {
        let dir = tempfile::tempdir()?;

        assert_eq!(None, read_current_file(dir.path())?);

        set_current_file(dir.path(), 5)?;
        assert_eq!(
            Some("MANIFEST-000005".to_owned()),
            read_current_file(dir.path())?
        );

        set_current_file(dir.path(), 6)?;
        assert_eq!(
            Some("MANIFEST-000006".to_owned()),
            read_current_file(dir.path())?
        );

        Ok(())
    }
}
