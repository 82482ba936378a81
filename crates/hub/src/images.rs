//! Filesystem store for report image assets.
//!
//! Assets live flat in one directory and are named by receipt time plus
//! the original file's extension. The report row is the sole owner of an
//! asset; removal is best-effort and never blocks the relational outcome,
//! so an orphaned file is an accepted risk rather than a bug.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::Utc;
use tracing::{debug, warn};

use crate::error::Result;

pub struct ImageStore {
    dir: PathBuf,
}

impl ImageStore {
    /// Open the store rooted at `dir`, creating the directory if needed.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    /// Stage an uploaded file under a generated unique name derived from
    /// the receipt time and the upload's original extension. Returns the
    /// generated filename, which is what report rows reference.
    pub fn stage(&self, original_name: &str, bytes: &[u8]) -> Result<String> {
        let millis = Utc::now().timestamp_millis();
        let name = match Path::new(original_name)
            .extension()
            .and_then(|e| e.to_str())
        {
            Some(ext) => format!("{millis}.{ext}"),
            None => millis.to_string(),
        };

        fs::write(self.dir.join(&name), bytes)?;
        debug!(image = %name, "staged image asset");
        Ok(name)
    }

    /// Absolute path of a stored asset. The referenced file is not
    /// re-validated to exist.
    pub fn path(&self, name: &str) -> PathBuf {
        self.dir.join(name)
    }

    /// Best-effort removal. Failure is logged and swallowed; the caller's
    /// relational outcome is authoritative over filesystem state.
    pub fn remove(&self, name: &str) {
        if let Err(e) = fs::remove_file(self.dir.join(name)) {
            warn!(image = %name, error = %e, "failed to remove image asset");
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};

    static DIR_SEQ: AtomicU64 = AtomicU64::new(0);

    fn test_store() -> ImageStore {
        let dir = std::env::temp_dir().join(format!(
            "moisture-hub-images-{}-{}",
            std::process::id(),
            DIR_SEQ.fetch_add(1, Ordering::Relaxed)
        ));
        ImageStore::open(dir).unwrap()
    }

    #[test]
    fn stage_writes_file_and_keeps_extension() {
        let store = test_store();
        let name = store.stage("photo.png", b"bytes").unwrap();

        assert!(name.ends_with(".png"));
        assert!(store.path(&name).is_file());
        assert_eq!(fs::read(store.path(&name)).unwrap(), b"bytes");
    }

    #[test]
    fn stage_without_extension_still_stages() {
        let store = test_store();
        let name = store.stage("photo", b"bytes").unwrap();

        assert!(!name.contains('.'));
        assert!(store.path(&name).is_file());
    }

    #[test]
    fn remove_deletes_the_asset() {
        let store = test_store();
        let name = store.stage("a.jpg", b"x").unwrap();

        store.remove(&name);
        assert!(!store.path(&name).exists());
    }

    #[test]
    fn remove_of_missing_asset_does_not_panic() {
        let store = test_store();
        store.remove("never-staged.png");
    }
}
