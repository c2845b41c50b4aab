// =============================================================================
// File-Claim Registry — exclusive WAL-file ownership for multi-worker replay
// =============================================================================
//
// A worker claims `<file>` by atomically creating `claims/<file>.claim`
// (create-new semantics: creation fails if the file exists). The registry
// also tracks its own held claims, so a claim file present on disk but not
// held by any live worker is stale — typically a crash leftover — and
// `recover_stale_claims` reaps it.
// =============================================================================

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use tracing::{info, warn};

pub struct FileClaimRegistry {
    claim_dir: PathBuf,
    enabled: bool,
    held: Mutex<HashSet<String>>,
}

impl FileClaimRegistry {
    pub fn new(claim_dir: impl AsRef<Path>, enabled: bool) -> Self {
        let claim_dir = claim_dir.as_ref().to_path_buf();
        if enabled {
            if let Err(e) = std::fs::create_dir_all(&claim_dir) {
                warn!(dir = %claim_dir.display(), error = %e, "failed to create claim directory");
            }
        }
        Self {
            claim_dir,
            enabled,
            held: Mutex::new(HashSet::new()),
        }
    }

    fn claim_path(&self, name: &str) -> PathBuf {
        self.claim_dir.join(format!("{name}.claim"))
    }

    // -------------------------------------------------------------------------
    // Claims
    // -------------------------------------------------------------------------

    /// Try to take exclusive ownership of `name`. Returns false when another
    /// worker (or this one) already holds it.
    pub fn try_claim(&self, name: &str) -> bool {
        if !self.enabled {
            return true;
        }

        let mut held = self.held.lock();
        if held.contains(name) {
            return false;
        }

        match std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(self.claim_path(name))
        {
            Ok(_) => {
                held.insert(name.to_string());
                true
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => false,
            Err(e) => {
                warn!(name, error = %e, "claim create failed");
                false
            }
        }
    }

    /// Release a claim. Releasing a name never claimed is a no-op.
    pub fn release_claim(&self, name: &str) {
        if !self.enabled {
            return;
        }
        let removed = self.held.lock().remove(name);
        if removed {
            if let Err(e) = std::fs::remove_file(self.claim_path(name)) {
                warn!(name, error = %e, "failed to remove claim file");
            }
        }
    }

    /// Delete claim files on disk that no live worker holds.
    pub fn recover_stale_claims(&self) {
        if !self.enabled {
            return;
        }
        let held = self.held.lock();
        let Ok(rd) = std::fs::read_dir(&self.claim_dir) else {
            return;
        };
        for entry in rd.filter_map(|e| e.ok()) {
            let path = entry.path();
            let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            let Some(name) = file_name.strip_suffix(".claim") else {
                continue;
            };
            if !held.contains(name) {
                match std::fs::remove_file(&path) {
                    Ok(()) => info!(name, "stale claim reaped"),
                    Err(e) => warn!(name, error = %e, "failed to reap stale claim"),
                }
            }
        }
    }

    pub fn held_count(&self) -> usize {
        self.held.lock().len()
    }
}

impl std::fmt::Debug for FileClaimRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileClaimRegistry")
            .field("enabled", &self.enabled)
            .field("held", &self.held_count())
            .finish()
    }
}
