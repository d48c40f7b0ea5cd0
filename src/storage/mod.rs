//! Local persistence: CSV cycle export, device config record, process lock.
//!
//! - `export`: append-only CSV of accepted cycles plus the table reader used
//!   by the dashboard
//! - `device_config`: JSON record of the resolved ids
//! - `lockfile`: one synchronizer per data directory

pub mod device_config;
pub mod export;
pub mod lockfile;

pub use device_config::{ConfigStore, JsonConfigStore};
pub use export::{read_table, CsvExporter, CsvTable, ExportRow, ExportSink};
pub use lockfile::ProcessLock;

use std::path::{Path, PathBuf};

/// Storage errors
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed JSON in {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("another owencloud-sync instance is running (PID: {pid}); remove {path} if it is stale")]
    Locked { pid: u32, path: PathBuf },
}

impl StoreError {
    pub(crate) fn io(path: &Path, source: std::io::Error) -> Self {
        StoreError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Create the parent directory of `path` if it has one.
pub(crate) fn ensure_parent(path: &Path) -> Result<(), StoreError> {
    match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => {
            std::fs::create_dir_all(dir).map_err(|e| StoreError::io(dir, e))
        }
        _ => Ok(()),
    }
}
