//! Utility functions shared across the sweep engine

use crate::error::Result;
use std::fs;
use std::path::Path;

/// File I/O utilities
pub mod io {
    use super::*;

    /// Ensure directory exists
    pub fn ensure_dir_exists<P: AsRef<Path>>(path: P) -> Result<()> {
        let path = path.as_ref();
        if !path.exists() {
            fs::create_dir_all(path)?;
        }
        Ok(())
    }

    /// Safe file write with atomic rename
    ///
    /// A half-written checkpoint or manifest must never be observable under
    /// its final name.
    pub fn write_file_atomic<P: AsRef<Path>>(path: P, content: &[u8]) -> Result<()> {
        let path = path.as_ref();
        let temp_path = path.with_extension("tmp");

        fs::write(&temp_path, content)?;
        fs::rename(temp_path, path)?;

        Ok(())
    }

    /// Serialize a value to pretty JSON and write it atomically
    pub fn write_json_atomic<P: AsRef<Path>, T: serde::Serialize>(path: P, value: &T) -> Result<()> {
        let content = serde_json::to_vec_pretty(value)?;
        write_file_atomic(path, &content)
    }

    /// Get file size in bytes
    pub fn file_size<P: AsRef<Path>>(path: P) -> Result<u64> {
        let metadata = fs::metadata(path)?;
        Ok(metadata.len())
    }
}

/// Formatting helpers
pub mod fmt {
    /// Convert a byte count to gigabytes
    pub fn bytes_to_gb(bytes: u64) -> f64 {
        bytes as f64 / (1024.0 * 1024.0 * 1024.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_atomic_write_leaves_no_temp_file() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("record.json");

        io::write_file_atomic(&target, b"{\"epoch\": 3}").unwrap();

        assert!(target.exists());
        assert!(!target.with_extension("tmp").exists());
        assert_eq!(fs::read(&target).unwrap(), b"{\"epoch\": 3}");
    }

    #[test]
    fn test_atomic_write_replaces_existing_content() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("record.json");

        io::write_file_atomic(&target, b"old").unwrap();
        io::write_file_atomic(&target, b"new").unwrap();

        assert_eq!(fs::read(&target).unwrap(), b"new");
    }

    #[test]
    fn test_bytes_to_gb() {
        assert!((fmt::bytes_to_gb(5 * 1024 * 1024 * 1024) - 5.0).abs() < 1e-9);
    }
}
