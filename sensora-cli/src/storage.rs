//! Config records as files, one `<key>.bin` per record

use sensora_mcu::Storage;
use std::io;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct FileStorage {
    dir: PathBuf,
}

impl FileStorage {
    pub fn open(dir: impl Into<PathBuf>) -> io::Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    fn path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.bin"))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn erase(&mut self) -> io::Result<()> {
        self.reset_config()
    }
}

impl Storage for FileStorage {
    type Error = io::Error;

    fn read_config(&self, key: &str, out: &mut [u8]) -> Result<bool, Self::Error> {
        let data = match std::fs::read(self.path(key)) {
            Ok(data) => data,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(e),
        };
        if data.len() != out.len() {
            tracing::warn!("ignoring '{key}' record of {} bytes, expected {}", data.len(), out.len());
            return Ok(false);
        }
        out.copy_from_slice(&data);
        Ok(true)
    }

    fn write_config(&mut self, key: &str, value: &[u8]) -> Result<(), Self::Error> {
        std::fs::write(self.path(key), value)
    }

    fn reset_config(&mut self) -> Result<(), Self::Error> {
        for entry in std::fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().is_some_and(|ext| ext == "bin") {
                std::fs::remove_file(path)?;
            }
        }
        Ok(())
    }
}
