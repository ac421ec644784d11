//! Level persistence.
//!
//! The server only relies on the [`LevelStorage`] contract. The file backend
//! writes one gzip-compressed bincode document per level, named after the
//! level, and replaces files atomically through a temporary sibling.

use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, ErrorKind, Read, Write};
use std::path::{Path, PathBuf};

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use log::debug;
use parking_lot::Mutex;

use crate::error::StorageError;
use crate::level::LevelData;

/// Leading byte of every level file.
pub const FORMAT_VERSION: u8 = 1;

pub const LEVEL_EXTENSION: &str = "lvl";

pub trait LevelStorage: Send + Sync {
    fn load(&self, name: &str) -> Result<LevelData, StorageError>;
    fn save(&self, level: &LevelData) -> Result<(), StorageError>;
}

fn check_name(name: &str) -> Result<(), StorageError> {
    let valid = !name.is_empty()
        && name
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-');
    if valid {
        Ok(())
    } else {
        Err(StorageError::InvalidName(name.to_string()))
    }
}

/// Stores each level as `<dir>/<name>.lvl`.
pub struct FileLevelStorage {
    dir: PathBuf,
}

impl FileLevelStorage {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{}.{}", name, LEVEL_EXTENSION))
    }
}

impl LevelStorage for FileLevelStorage {
    fn load(&self, name: &str) -> Result<LevelData, StorageError> {
        check_name(name)?;
        let path = self.path_for(name);
        let file = match File::open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(StorageError::NotFound(name.to_string()))
            }
            Err(e) => return Err(e.into()),
        };

        let mut reader = GzDecoder::new(BufReader::new(file));
        let mut version = [0u8; 1];
        reader.read_exact(&mut version)?;
        if version[0] != FORMAT_VERSION {
            return Err(StorageError::Corrupt(format!(
                "{} has format version {}, expected {}",
                path.display(),
                version[0],
                FORMAT_VERSION
            )));
        }

        let data: LevelData = bincode::deserialize_from(reader)?;
        if data.name != name {
            return Err(StorageError::Corrupt(format!(
                "{} holds level '{}'",
                path.display(),
                data.name
            )));
        }
        debug!("Loaded level '{}' from {}", name, path.display());
        Ok(data)
    }

    fn save(&self, level: &LevelData) -> Result<(), StorageError> {
        check_name(&level.name)?;
        fs::create_dir_all(&self.dir)?;

        let path = self.path_for(&level.name);
        let tmp = path.with_extension(format!("{}.tmp", LEVEL_EXTENSION));
        {
            let file = BufWriter::new(File::create(&tmp)?);
            let mut writer = GzEncoder::new(file, Compression::default());
            writer.write_all(&[FORMAT_VERSION])?;
            bincode::serialize_into(&mut writer, level)?;
            writer.finish()?.flush()?;
        }
        fs::rename(&tmp, &path)?;
        debug!("Saved level '{}' to {}", level.name, path.display());
        Ok(())
    }
}

/// Keeps saved levels in memory. Useful for tests and throwaway servers.
#[derive(Default)]
pub struct MemoryLevelStorage {
    levels: Mutex<HashMap<String, LevelData>>,
}

impl MemoryLevelStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.levels.lock().contains_key(name)
    }
}

impl LevelStorage for MemoryLevelStorage {
    fn load(&self, name: &str) -> Result<LevelData, StorageError> {
        self.levels
            .lock()
            .get(name)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(name.to_string()))
    }

    fn save(&self, level: &LevelData) -> Result<(), StorageError> {
        check_name(&level.name)?;
        self.levels.lock().insert(level.name.clone(), level.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::level::Level;
    use protocol::block;

    fn temp_dir(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "voxel-storage-{}-{}",
            tag,
            std::process::id()
        ));
        let _ = fs::remove_dir_all(&dir);
        dir
    }

    #[test]
    fn test_file_save_load_roundtrip() {
        let dir = temp_dir("roundtrip");
        let storage = FileLevelStorage::new(&dir);

        let level = Level::generate_flat("main", 16, 8, 16);
        level.set_block(3, 6, 3, block::SPONGE, false);
        storage.save(&level.to_data()).unwrap();

        assert!(storage.path_for("main").exists());
        assert!(!storage.path_for("main").with_extension("lvl.tmp").exists());

        let loaded = storage.load("main").unwrap();
        assert_eq!(loaded, level.to_data());

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_missing_level_is_not_found() {
        let storage = FileLevelStorage::new(temp_dir("missing"));
        assert!(matches!(storage.load("nowhere"), Err(StorageError::NotFound(_))));
    }

    #[test]
    fn test_path_traversal_rejected() {
        let storage = FileLevelStorage::new(temp_dir("names"));
        assert!(matches!(storage.load("../etc"), Err(StorageError::InvalidName(_))));
        assert!(matches!(storage.load(""), Err(StorageError::InvalidName(_))));
    }

    #[test]
    fn test_garbage_file_is_error() {
        let dir = temp_dir("garbage");
        fs::create_dir_all(&dir).unwrap();
        let storage = FileLevelStorage::new(&dir);
        fs::write(storage.path_for("junk"), b"definitely not gzip").unwrap();

        assert!(storage.load("junk").is_err());
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_memory_storage() {
        let storage = MemoryLevelStorage::new();
        assert!(matches!(storage.load("main"), Err(StorageError::NotFound(_))));

        let data = Level::new("main", 2, 2, 2).to_data();
        storage.save(&data).unwrap();
        assert!(storage.contains("main"));
        assert_eq!(storage.load("main").unwrap(), data);
    }
}
