//! Persisted version record.

use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::update::source::Manifest;

/// Local `{"version": n}` file describing the installed unit.
#[derive(Debug, Clone)]
pub struct VersionStore {
    path: PathBuf,
}

impl VersionStore {
    /// Creates a store at `path`. Nothing is touched until [`Self::load`].
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Path of the record.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads the installed version, creating the record with version 0 if it
    /// does not exist yet.
    ///
    /// # Errors
    ///
    /// Returns an error if the record cannot be read, parsed or created.
    pub fn load(&self) -> Result<u64> {
        if !self.path.exists() {
            self.save(0)?;
            return Ok(0);
        }

        let content = std::fs::read_to_string(&self.path)?;
        let manifest: Manifest = serde_json::from_str(&content).map_err(|e| Error::Config {
            message: format!("invalid version record {}: {e}", self.path.display()),
        })?;
        Ok(manifest.version)
    }

    /// Writes `version` through a temp file and rename.
    ///
    /// # Errors
    ///
    /// Returns an error if the record cannot be written.
    pub fn save(&self, version: u64) -> Result<()> {
        let temp_path = self.path.with_extension("tmp");
        let content = serde_json::to_string(&Manifest { version })?;

        std::fs::write(&temp_path, content)?;
        std::fs::rename(&temp_path, &self.path)?;

        Ok(())
    }
}
