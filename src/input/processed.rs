//! Database of captures already processed by earlier runs.
//!
//! Stored as a JSON object mapping filename to the unix time it was processed. The database is
//! written back when it is dropped, so an aborted run still remembers what it finished.
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};

use chrono::Utc;

use crate::error::Result;

pub struct ProcessedFiles {
    path: PathBuf,
    entries: BTreeMap<String, f64>,
}

impl ProcessedFiles {
    /// Loads the database; a missing or unreadable file starts an empty one.
    pub fn load<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref().to_path_buf();
        let entries = match File::open(&path) {
            Ok(file) => serde_json::from_reader(BufReader::new(file)).unwrap_or_else(|err| {
                log::warn!("Ignoring unreadable processed-files database {}: {err}", path.display());
                BTreeMap::new()
            }),
            Err(_) => BTreeMap::new(),
        };

        log::debug!("{} files already processed according to {}", entries.len(), path.display());
        Self { path, entries }
    }

    pub fn contains(&self, filename: &str) -> bool {
        self.entries.contains_key(filename)
    }

    pub fn mark(&mut self, filename: &str) {
        let now = Utc::now().timestamp_millis() as f64 / 1000.0;
        self.entries.insert(filename.to_string(), now);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn save(&self) -> Result<()> {
        let writer = BufWriter::new(File::create(&self.path)?);
        serde_json::to_writer_pretty(writer, &self.entries)?;
        Ok(())
    }
}

impl Drop for ProcessedFiles {
    fn drop(&mut self) {
        if let Err(err) = self.save() {
            log::error!("Could not save processed-files database {}: {err}", self.path.display());
        }
    }
}
