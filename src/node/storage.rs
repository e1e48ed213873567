use crate::app::AppSnapshot;
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, ErrorKind, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

pub const SNAPSHOT_FILE: &str = "ledger_snapshot.json";
const STAGING_FILE: &str = "ledger_snapshot.json.partial";

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("snapshot io: {0}")]
    Io(#[from] io::Error),
    #[error("snapshot encoding: {0}")]
    Json(#[from] serde_json::Error),
}

/// Latest committed snapshot. Each save is written to a staging file, synced,
/// then renamed over the previous one.
pub struct SnapshotStore {
    path: PathBuf,
    staging: PathBuf,
}

impl SnapshotStore {
    pub fn new<P: AsRef<Path>>(data_dir: P) -> Result<Self, StorageError> {
        let dir = data_dir.as_ref();
        fs::create_dir_all(dir)?;
        Ok(Self {
            path: dir.join(SNAPSHOT_FILE),
            staging: dir.join(STAGING_FILE),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the last saved snapshot. A staging file left by an interrupted
    /// save is discarded.
    pub fn load(&self) -> Result<Option<AppSnapshot>, StorageError> {
        match fs::remove_file(&self.staging) {
            Ok(()) => debug!(path = %self.staging.display(), "discarded partial snapshot"),
            Err(err) if err.kind() == ErrorKind::NotFound => {}
            Err(err) => return Err(err.into()),
        }
        let file = match File::open(&self.path) {
            Ok(file) => file,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        Ok(Some(serde_json::from_reader(BufReader::new(file))?))
    }

    pub fn save(&self, snapshot: &AppSnapshot) -> Result<(), StorageError> {
        let mut out = BufWriter::new(File::create(&self.staging)?);
        serde_json::to_writer_pretty(&mut out, snapshot)?;
        out.flush()?;
        out.get_ref().sync_all()?;
        drop(out);
        fs::rename(&self.staging, &self.path)?;
        debug!(height = snapshot.height, "snapshot saved");
        Ok(())
    }
}
