// =============================================================================
// Approval gate — externally produced human-approval document
// =============================================================================
//
// Any process may drop `approval.json` next to the engine:
//
//   { "date": "YYYY-MM-DD", "approved": true, "notes": "..." }
//
// Missing, unparseable, dateless, stale (date != today), or unapproved
// documents deny the whole plan batch. Stale and dateless documents are
// deleted as a side effect so a non-conforming file can never leak an
// approval into today.
// =============================================================================

use std::path::Path;

use serde::Deserialize;
use tracing::{info, warn};

use crate::config::ApprovalConfig;

#[derive(Debug, Deserialize)]
struct ApprovalDoc {
    #[serde(default)]
    date: Option<String>,
    #[serde(default)]
    approved: bool,
    #[serde(default)]
    notes: Option<String>,
    /// Legacy field name accepted alongside `notes`.
    #[serde(default)]
    note: Option<String>,
}

/// Check the approval document. `today` is the current date in the market
/// timezone, formatted "YYYY-MM-DD". Returns `(approved, note)`.
pub fn check(cfg: &ApprovalConfig, today: &str) -> (bool, String) {
    if !cfg.required {
        return (true, "approval not required".to_string());
    }

    let path = Path::new(&cfg.file);
    if !path.exists() {
        return (false, format!("approval file missing: {}", path.display()));
    }

    let content = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) => {
            warn!(error = %e, "approval file unreadable");
            return (false, "approval file unreadable".to_string());
        }
    };

    let doc: ApprovalDoc = match serde_json::from_str(&content) {
        Ok(d) => d,
        Err(e) => {
            warn!(error = %e, "approval file unparseable");
            return (false, "approval file unreadable".to_string());
        }
    };

    // A document without a date cannot be proven current — deny and clean it
    // up just like a stale one.
    let Some(date) = &doc.date else {
        if let Err(e) = std::fs::remove_file(path) {
            warn!(error = %e, "failed to remove dateless approval file");
        }
        info!(today, "dateless approval file removed");
        return (false, "approval missing date (file removed)".to_string());
    };

    if date != today {
        // Clean up the stale document.
        if let Err(e) = std::fs::remove_file(path) {
            warn!(error = %e, "failed to remove stale approval file");
        }
        info!(stale_date = %date, today, "stale approval file removed");
        return (false, "approval expired (stale file removed)".to_string());
    }

    let note = doc.notes.or(doc.note).unwrap_or_default();
    (doc.approved, note)
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    fn cfg_at(dir: &tempfile::TempDir) -> ApprovalConfig {
        ApprovalConfig {
            required: true,
            file: dir
                .path()
                .join("approval.json")
                .to_string_lossy()
                .into_owned(),
        }
    }

    #[test]
    fn not_required_short_circuits() {
        let cfg = ApprovalConfig {
            required: false,
            file: "/nonexistent/approval.json".to_string(),
        };
        let (ok, note) = check(&cfg, "2026-03-02");
        assert!(ok);
        assert_eq!(note, "approval not required");
    }

    #[test]
    fn missing_file_denies() {
        let dir = tempfile::tempdir().unwrap();
        let (ok, note) = check(&cfg_at(&dir), "2026-03-02");
        assert!(!ok);
        assert!(note.contains("missing"));
    }

    #[test]
    fn unparseable_file_denies() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = cfg_at(&dir);
        std::fs::write(&cfg.file, "{ nope").unwrap();
        let (ok, note) = check(&cfg, "2026-03-02");
        assert!(!ok);
        assert!(note.contains("unreadable"));
    }

    #[test]
    fn stale_file_denies_and_is_deleted() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = cfg_at(&dir);
        std::fs::write(
            &cfg.file,
            r#"{ "date": "2026-03-01", "approved": true, "notes": "yesterday" }"#,
        )
        .unwrap();

        let (ok, note) = check(&cfg, "2026-03-02");
        assert!(!ok);
        assert_eq!(note, "approval expired (stale file removed)");
        assert!(!Path::new(&cfg.file).exists(), "stale file must be deleted");
    }

    #[test]
    fn fresh_approved_file_passes_with_note() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = cfg_at(&dir);
        std::fs::write(
            &cfg.file,
            r#"{ "date": "2026-03-02", "approved": true, "notes": "go" }"#,
        )
        .unwrap();

        let (ok, note) = check(&cfg, "2026-03-02");
        assert!(ok);
        assert_eq!(note, "go");
        assert!(Path::new(&cfg.file).exists(), "fresh file must survive");
    }

    #[test]
    fn fresh_unapproved_file_denies() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = cfg_at(&dir);
        std::fs::write(
            &cfg.file,
            r#"{ "date": "2026-03-02", "approved": false, "note": "hold off" }"#,
        )
        .unwrap();

        let (ok, note) = check(&cfg, "2026-03-02");
        assert!(!ok);
        assert_eq!(note, "hold off");
    }

    #[test]
    fn dateless_document_denies_and_is_deleted() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = cfg_at(&dir);
        std::fs::write(&cfg.file, r#"{ "approved": true }"#).unwrap();

        let (ok, note) = check(&cfg, "2026-03-02");
        assert!(!ok, "an undated approval must never clear the batch");
        assert!(note.contains("missing date"));
        assert!(!Path::new(&cfg.file).exists(), "malformed file must be deleted");
    }
}
