// =============================================================================
// Replay Contract — precondition validation for a WAL replay session
// =============================================================================
//
// Violations come back as strings, not errors: the caller decides whether a
// misconfigured loader warns or aborts.
// =============================================================================

use std::path::PathBuf;

/// File processing order a loader promises.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FileOrdering {
    /// Strict by encoded nanosecond timestamp; requires a manifest so files
    /// are never reprocessed.
    StrictNs,
    #[default]
    BestEffort,
}

/// Configuration contract for one replay session.
#[derive(Debug, Clone, Default)]
pub struct ReplayContract {
    pub file_ordering: FileOrdering,
    pub dedup_enabled: bool,
    pub manifest_enabled: bool,
    pub archive_dir: Option<PathBuf>,
    /// Whether a sink client is wired (dedup needs one to track seen rows).
    pub has_sink_client: bool,
}

impl ReplayContract {
    /// Every violated precondition, human-readable. Empty means go.
    pub fn violations(&self) -> Vec<String> {
        let mut violations = Vec::new();

        if self.file_ordering == FileOrdering::StrictNs && !self.manifest_enabled {
            violations.push(
                "strict_ns file ordering requires a manifest (TEMPEST_WAL_USE_MANIFEST=1)"
                    .to_string(),
            );
        }

        if self.dedup_enabled && !self.has_sink_client {
            violations
                .push("dedup_enabled requires an active sink client".to_string());
        }

        if self.archive_dir.is_none() {
            violations.push("archive_dir must be set to archive files on success".to_string());
        }

        violations
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    fn valid() -> ReplayContract {
        ReplayContract {
            file_ordering: FileOrdering::BestEffort,
            dedup_enabled: false,
            manifest_enabled: true,
            archive_dir: Some(PathBuf::from("/wal/archive")),
            has_sink_client: true,
        }
    }

    #[test]
    fn valid_contract_has_no_violations() {
        assert!(valid().violations().is_empty());
    }

    #[test]
    fn strict_ordering_without_manifest_is_flagged() {
        let contract = ReplayContract {
            file_ordering: FileOrdering::StrictNs,
            manifest_enabled: false,
            ..valid()
        };
        let violations = contract.violations();
        assert_eq!(violations.len(), 1);
        assert!(violations[0].contains("strict_ns"));
    }

    #[test]
    fn dedup_without_sink_is_flagged() {
        let contract = ReplayContract {
            dedup_enabled: true,
            has_sink_client: false,
            ..valid()
        };
        assert!(contract
            .violations()
            .iter()
            .any(|v| v.contains("dedup_enabled")));
    }

    #[test]
    fn missing_archive_dir_is_flagged() {
        let contract = ReplayContract {
            archive_dir: None,
            ..valid()
        };
        assert!(contract
            .violations()
            .iter()
            .any(|v| v.contains("archive_dir")));
    }

    #[test]
    fn violations_accumulate() {
        let contract = ReplayContract {
            file_ordering: FileOrdering::StrictNs,
            manifest_enabled: false,
            dedup_enabled: true,
            has_sink_client: false,
            archive_dir: None,
        };
        assert_eq!(contract.violations().len(), 3);
    }
}
