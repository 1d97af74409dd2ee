//! Durable set of owned stars.
//!
//! The stars the local user has authored and claimed survive restarts so
//! `claim_star` can be re-issued after every reconnect. The set is a JSON
//! array of star IDs in claim order, rewritten atomically on each change.

// ============================================================================
// Imports
// ============================================================================

use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::identifiers::StarId;

// ============================================================================
// OwnedStars
// ============================================================================

/// Ordered, de-duplicated list of owned stars.
#[derive(Debug, Clone, Default)]
pub struct OwnedStars {
    stars: Vec<StarId>,
    path: Option<PathBuf>,
}

impl OwnedStars {
    /// Creates a set that is never written to disk.
    #[must_use]
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Loads the set from `path`.
    ///
    /// A missing file yields an empty set that will be created on the
    /// first insert.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Storage`] if the file exists but cannot be read or
    /// does not hold a JSON array of strings.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();

        let stars = match fs::read_to_string(&path) {
            Ok(text) => {
                let raw: Vec<StarId> = serde_json::from_str(&text)
                    .map_err(|e| Error::storage(&path, format!("invalid contents: {e}")))?;
                let mut stars: Vec<StarId> = Vec::with_capacity(raw.len());
                for star in raw {
                    if !star.is_empty() && !stars.contains(&star) {
                        stars.push(star);
                    }
                }
                stars
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!(path = %path.display(), "No owned-star store yet");
                Vec::new()
            }
            Err(e) => return Err(Error::storage(&path, e.to_string())),
        };

        debug!(path = %path.display(), count = stars.len(), "Owned stars loaded");
        Ok(Self {
            stars,
            path: Some(path),
        })
    }

    /// Adds a star and persists the set.
    ///
    /// Returns `false` if the star was already owned; nothing is written
    /// in that case.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Storage`] if the write fails. The star is not
    /// added then.
    pub fn insert(&mut self, star: StarId) -> Result<bool> {
        if self.contains(&star) {
            return Ok(false);
        }

        self.stars.push(star);
        if let Err(e) = self.persist() {
            self.stars.pop();
            return Err(e);
        }
        Ok(true)
    }

    /// Removes a star and persists the set.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Storage`] if the write fails. The star stays
    /// owned then.
    pub fn remove(&mut self, star: &StarId) -> Result<bool> {
        let Some(index) = self.stars.iter().position(|s| s == star) else {
            return Ok(false);
        };

        let removed = self.stars.remove(index);
        if let Err(e) = self.persist() {
            self.stars.insert(index, removed);
            return Err(e);
        }
        Ok(true)
    }

    /// Returns `true` if the star is owned.
    #[inline]
    #[must_use]
    pub fn contains(&self, star: &StarId) -> bool {
        self.stars.contains(star)
    }

    /// Iterates owned stars in claim order.
    pub fn iter(&self) -> impl Iterator<Item = &StarId> {
        self.stars.iter()
    }

    /// Number of owned stars.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.stars.len()
    }

    /// Returns `true` if no star is owned.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.stars.is_empty()
    }

    /// Backing file, if any.
    #[inline]
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Writes the set through a temp file in the same directory.
    fn persist(&self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        let dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };

        let write = || -> std::io::Result<()> {
            fs::create_dir_all(dir)?;
            let mut file = NamedTempFile::new_in(dir)?;
            serde_json::to_writer_pretty(&mut file, &self.stars)?;
            file.write_all(b"\n")?;
            file.as_file().sync_all()?;
            file.persist(path).map_err(|e| e.error)?;
            Ok(())
        };

        write().map_err(|e| {
            warn!(path = %path.display(), error = %e, "Failed to persist owned stars");
            Error::storage(path, e.to_string())
        })
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use tempfile::tempdir;

    #[test]
    fn test_missing_file_is_empty() {
        let dir = tempdir().expect("tempdir");
        let stars = OwnedStars::load(dir.path().join("owned.json")).expect("load");
        assert!(stars.is_empty());
    }

    #[test]
    fn test_insert_persists_in_order() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("nested").join("owned.json");

        let mut stars = OwnedStars::load(&path).expect("load");
        assert!(stars.insert(StarId::from("b")).expect("insert"));
        assert!(stars.insert(StarId::from("a")).expect("insert"));
        assert!(!stars.insert(StarId::from("b")).expect("insert"));

        let reloaded = OwnedStars::load(&path).expect("reload");
        let ids: Vec<&str> = reloaded.iter().map(StarId::as_str).collect();
        assert_eq!(ids, vec!["b", "a"]);
    }

    #[test]
    fn test_load_dedups_entries() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("owned.json");
        fs::write(&path, r#"["s1", "s2", "s1", ""]"#).expect("write");

        let stars = OwnedStars::load(&path).expect("load");
        assert_eq!(stars.len(), 2);
        assert!(stars.contains(&StarId::from("s2")));
    }

    #[test]
    fn test_corrupt_file_is_storage_error() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("owned.json");
        fs::write(&path, "{ not an array").expect("write");

        let err = OwnedStars::load(&path).expect_err("corrupt");
        assert!(matches!(err, Error::Storage { .. }));
    }

    #[test]
    fn test_remove() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("owned.json");

        let mut stars = OwnedStars::load(&path).expect("load");
        stars.insert(StarId::from("s1")).expect("insert");
        assert!(stars.remove(&StarId::from("s1")).expect("remove"));
        assert!(!stars.remove(&StarId::from("s1")).expect("remove"));

        assert!(OwnedStars::load(&path).expect("reload").is_empty());
    }

    #[test]
    fn test_in_memory_never_writes() {
        let mut stars = OwnedStars::in_memory();
        assert!(stars.insert(StarId::from("s1")).expect("insert"));
        assert_eq!(stars.path(), None);
    }
}
