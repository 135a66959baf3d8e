//! Session file persistence
//!
//! One `session.json` per session directory. Reads return None when no
//! session exists yet; writes create the directory. Single-writer,
//! last-writer-wins; the orchestrator re-reads before every step.

use std::path::{Path, PathBuf};

use eyre::{Context, Result};
use tracing::debug;

use crate::SESSION_FILE;
use crate::session::Session;

/// Path of the session record inside a session directory
pub fn session_file(dir: &Path) -> PathBuf {
    dir.join(SESSION_FILE)
}

/// Load the session from a session directory, None when absent
pub fn load_session(dir: &Path) -> Result<Option<Session>> {
    let path = session_file(dir);
    debug!("load_session: called with path={}", path.display());
    if !path.exists() {
        return Ok(None);
    }
    let content = std::fs::read_to_string(&path)
        .wrap_err_with(|| format!("Failed to read session file: {}", path.display()))?;
    let session: Session = serde_json::from_str(&content)
        .wrap_err_with(|| format!("Failed to parse session file: {}", path.display()))?;
    Ok(Some(session))
}

/// Save the session into a session directory, creating it if needed
pub fn save_session(session: &Session, dir: &Path) -> Result<()> {
    debug!(
        "save_session: called with session_id={}, status={}",
        session.id, session.status
    );
    std::fs::create_dir_all(dir)
        .wrap_err_with(|| format!("Failed to create session directory: {}", dir.display()))?;
    let path = session_file(dir);
    let content = serde_json::to_string_pretty(session)?;
    std::fs::write(&path, content)
        .wrap_err_with(|| format!("Failed to write session file: {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_load_missing_session_is_none() {
        let dir = tempdir().unwrap();
        assert!(load_session(dir.path()).unwrap().is_none());
    }

    #[test]
    fn test_save_creates_directory_and_roundtrips() {
        let dir = tempdir().unwrap();
        let session_dir = dir.path().join(".shipwright");

        let session = Session::new("acme/api", "main");
        save_session(&session, &session_dir).unwrap();
        assert!(session_file(&session_dir).exists());

        let back = load_session(&session_dir).unwrap().unwrap();
        assert_eq!(back.id, session.id);
        assert_eq!(back.repo, "acme/api");
        assert_eq!(back.branch, "main");
    }

    #[test]
    fn test_save_overwrites_previous() {
        let dir = tempdir().unwrap();
        let mut session = Session::new("acme/api", "main");
        save_session(&session, dir.path()).unwrap();

        session.begin_planning().unwrap();
        save_session(&session, dir.path()).unwrap();

        let back = load_session(dir.path()).unwrap().unwrap();
        assert_eq!(back.status, session.status);
    }

    #[test]
    fn test_corrupt_session_file_is_an_error() {
        let dir = tempdir().unwrap();
        std::fs::write(session_file(dir.path()), "not json").unwrap();
        assert!(load_session(dir.path()).is_err());
    }
}
