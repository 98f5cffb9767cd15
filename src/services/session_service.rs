//! Apply/undo sessions
//!
//! Every file write made on behalf of a plan belongs to an apply attempt.
//! Before the first write to a path the attempt records whether the file
//! existed and, if so, copies its bytes to
//! `<sessions_dir>/<attempt_id>/<seq>.bak`. Undo replays the records
//! newest first.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use rand::Rng;

use crate::error::{EngineError, Result};
use crate::models::attempt::{ApplyAttempt, AttemptFile, AttemptStatus, UndoOutcome};
use crate::services::sandbox;
use crate::services::store::Store;

/// `<unix-millis-hex>-<8 random hex>`
pub fn new_attempt_id() -> String {
    let millis = Utc::now().timestamp_millis().max(0);
    let suffix: u32 = rand::thread_rng().gen();
    format!("{:x}-{:08x}", millis, suffix)
}

pub fn root_key(root: &Path) -> String {
    root.to_string_lossy().to_string()
}

/// What a snapshot call recorded
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Snapshot {
    pub existed_before: bool,
    /// The path was already recorded by an earlier write in this attempt
    pub already_recorded: bool,
}

#[derive(Clone)]
pub struct SessionService {
    store: Arc<Store>,
    sessions_dir: PathBuf,
}

impl SessionService {
    pub fn new(store: Arc<Store>, sessions_dir: PathBuf) -> Self {
        Self {
            store,
            sessions_dir,
        }
    }

    fn backup_path(&self, attempt_id: &str, backup_ref: &str) -> PathBuf {
        self.sessions_dir.join(attempt_id).join(backup_ref)
    }

    /// Open a new, empty attempt for `root`.
    pub fn start(&self, root: &Path) -> Result<ApplyAttempt> {
        let attempt = ApplyAttempt {
            id: new_attempt_id(),
            status: AttemptStatus::Active,
            created_at: Utc::now(),
            completed_at: None,
            project_root: root_key(root),
            files: Vec::new(),
        };
        self.store.insert_attempt(&attempt)?;
        tracing::debug!("Started apply attempt {} for {}", attempt.id, attempt.project_root);
        Ok(attempt)
    }

    pub fn get(&self, attempt_id: &str) -> Result<ApplyAttempt> {
        self.store
            .get_attempt(attempt_id)?
            .ok_or_else(|| EngineError::AttemptNotFound(attempt_id.to_string()))
    }

    pub fn find_latest_active(&self, root: &Path) -> Result<Option<ApplyAttempt>> {
        self.store.latest_active_attempt(&root_key(root))
    }

    /// Record the pre-write state of `relative_path` once per attempt.
    ///
    /// Later calls for the same path are no-ops, so the recorded state is
    /// always the one before the attempt first touched the file.
    pub fn snapshot(&self, attempt_id: &str, root: &Path, relative_path: &str) -> Result<Snapshot> {
        let key = sandbox::relative_key(root, relative_path)?;
        let target = sandbox::resolve_file(root, relative_path)?;
        if target.is_dir() || sandbox::is_symlink(&target) {
            return Err(EngineError::PathViolation(relative_path.to_string()));
        }

        self.store.update_attempt(attempt_id, |attempt| {
            if !attempt.is_active() {
                return Err(EngineError::AttemptNotActive(attempt.id.clone()));
            }
            if attempt.project_root != root_key(root) {
                return Err(EngineError::AttemptWrongProject {
                    attempt_id: attempt.id.clone(),
                    attempt_root: attempt.project_root.clone(),
                });
            }
            sandbox::ensure_real_parent(root, &target, relative_path)?;

            if let Some(existing) = attempt.files.iter().find(|f| f.relative_path == key) {
                return Ok(Snapshot {
                    existed_before: existing.existed_before,
                    already_recorded: true,
                });
            }

            let existed_before = target.is_file();
            let created_dirs = if existed_before {
                Vec::new()
            } else {
                sandbox::missing_parents(root, &target)
            };
            let backup_ref = if existed_before {
                let backup_ref = format!("{}.bak", attempt.files.len());
                let backup = self.backup_path(&attempt.id, &backup_ref);
                if let Some(parent) = backup.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                std::fs::copy(&target, &backup)?;
                Some(backup_ref)
            } else {
                None
            };

            attempt.files.push(AttemptFile {
                relative_path: key.clone(),
                existed_before,
                backup_ref,
                created_dirs,
            });

            Ok(Snapshot {
                existed_before,
                already_recorded: false,
            })
        })
    }

    /// Undo every write of an attempt, newest first.
    ///
    /// Undoing an attempt that is already undone is a no-op.
    pub fn undo(&self, attempt_id: &str) -> Result<UndoOutcome> {
        let outcome = self.store.update_attempt(attempt_id, |attempt| {
            if attempt.status == AttemptStatus::Undone {
                return Ok(UndoOutcome {
                    attempt_id: attempt.id.clone(),
                    restored_count: 0,
                    already_closed: true,
                });
            }

            let root = PathBuf::from(&attempt.project_root);
            let mut restored_count = 0;

            for file in attempt.files.iter().rev() {
                let target = sandbox::resolve_file(&root, &file.relative_path)?;
                sandbox::ensure_real_parent(&root, &target, &file.relative_path)?;
                // A link that replaced the file is removed, never followed
                if sandbox::is_symlink(&target) {
                    std::fs::remove_file(&target)?;
                }
                match (&file.backup_ref, file.existed_before) {
                    (Some(backup_ref), true) => {
                        if let Some(parent) = target.parent() {
                            std::fs::create_dir_all(parent)?;
                        }
                        std::fs::copy(self.backup_path(&attempt.id, backup_ref), &target)?;
                    }
                    _ => {
                        match std::fs::remove_file(&target) {
                            Ok(()) => {}
                            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                            Err(e) => return Err(e.into()),
                        }
                        remove_empty_dirs(&root, &file.created_dirs);
                    }
                }
                restored_count += 1;
            }

            attempt.status = AttemptStatus::Undone;
            attempt.completed_at = Some(Utc::now());

            Ok(UndoOutcome {
                attempt_id: attempt.id.clone(),
                restored_count,
                already_closed: false,
            })
        })?;

        if !outcome.already_closed {
            tracing::info!(
                "Undid apply attempt {} ({} files)",
                outcome.attempt_id,
                outcome.restored_count
            );
            let backups = self.sessions_dir.join(&outcome.attempt_id);
            if let Err(e) = std::fs::remove_dir_all(&backups) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    tracing::warn!("Failed to remove backups for {}: {}", outcome.attempt_id, e);
                }
            }
        }

        Ok(outcome)
    }
}

/// Remove directories an attempt created, deepest first, stopping at the
/// first one that still holds something.
fn remove_empty_dirs(root: &Path, dirs: &[String]) {
    for dir in dirs {
        let Ok(path) = sandbox::resolve_file(root, dir) else {
            return;
        };
        if sandbox::is_symlink(&path) {
            return;
        }
        let empty = std::fs::read_dir(&path)
            .map(|mut entries| entries.next().is_none())
            .unwrap_or(false);
        if !empty {
            return;
        }
        if let Err(e) = std::fs::remove_dir(&path) {
            tracing::debug!("Could not remove created directory {}: {}", path.display(), e);
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use tempfile::TempDir;

    struct Fixture {
        _dir: TempDir,
        root: PathBuf,
        sessions: SessionService,
    }

    fn fixture() -> Fixture {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("project");
        std::fs::create_dir_all(&root).unwrap();
        let store = Arc::new(Store::open_in_memory().unwrap());
        let sessions = SessionService::new(store, dir.path().join("sessions"));
        Fixture {
            _dir: dir,
            root,
            sessions,
        }
    }

    fn write(root: &Path, rel: &str, content: &str) {
        let path = root.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, content).unwrap();
    }

    fn read(root: &Path, rel: &str) -> Option<String> {
        std::fs::read_to_string(root.join(rel)).ok()
    }

    #[test]
    fn test_attempt_id_shape() {
        let id = new_attempt_id();
        let (millis, suffix) = id.split_once('-').unwrap();
        assert!(u64::from_str_radix(millis, 16).is_ok());
        assert_eq!(suffix.len(), 8);
        assert_ne!(new_attempt_id(), new_attempt_id());
    }

    #[test]
    fn test_snapshot_records_once() {
        let f = fixture();
        write(&f.root, "src/lib.rs", "v0");
        let attempt = f.sessions.start(&f.root).unwrap();

        let first = f.sessions.snapshot(&attempt.id, &f.root, "src/lib.rs").unwrap();
        assert!(first.existed_before);
        assert!(!first.already_recorded);

        write(&f.root, "src/lib.rs", "v1");
        let second = f.sessions.snapshot(&attempt.id, &f.root, "/src/./lib.rs").unwrap();
        assert!(second.already_recorded);

        let stored = f.sessions.get(&attempt.id).unwrap();
        assert_eq!(stored.files.len(), 1);
        assert_eq!(stored.files[0].backup_ref.as_deref(), Some("0.bak"));
    }

    #[test]
    fn test_snapshot_of_new_file_has_no_backup() {
        let f = fixture();
        let attempt = f.sessions.start(&f.root).unwrap();
        let snap = f.sessions.snapshot(&attempt.id, &f.root, "new/file.txt").unwrap();
        assert!(!snap.existed_before);

        let stored = f.sessions.get(&attempt.id).unwrap();
        assert_eq!(stored.files[0].backup_ref, None);
    }

    #[test]
    fn test_snapshot_rejects_wrong_project_and_closed_attempt() {
        let f = fixture();
        let attempt = f.sessions.start(&f.root).unwrap();
        let other = f.root.parent().unwrap().join("other");

        let err = f.sessions.snapshot(&attempt.id, &other, "a.txt").unwrap_err();
        assert_eq!(err.code(), "attempt_wrong_project");

        f.sessions.undo(&attempt.id).unwrap();
        let err = f.sessions.snapshot(&attempt.id, &f.root, "a.txt").unwrap_err();
        assert_eq!(err.code(), "attempt_not_active");

        let err = f.sessions.snapshot("missing", &f.root, "a.txt").unwrap_err();
        assert_eq!(err.code(), "attempt_not_found");
    }

    #[test]
    fn test_snapshot_rejects_escape() {
        let f = fixture();
        let attempt = f.sessions.start(&f.root).unwrap();
        let err = f.sessions.snapshot(&attempt.id, &f.root, "../x").unwrap_err();
        assert_eq!(err.code(), "path_violation");
        assert!(f.sessions.get(&attempt.id).unwrap().files.is_empty());
    }

    #[test]
    fn test_undo_restores_in_reverse_and_closes() {
        let f = fixture();
        write(&f.root, "a.txt", "a0");
        write(&f.root, "c.txt", "c0");
        let attempt = f.sessions.start(&f.root).unwrap();

        f.sessions.snapshot(&attempt.id, &f.root, "a.txt").unwrap();
        write(&f.root, "a.txt", "a1");
        f.sessions.snapshot(&attempt.id, &f.root, "nested/b.txt").unwrap();
        write(&f.root, "nested/b.txt", format!("b1 after {}", read(&f.root, "a.txt").unwrap()).as_str());
        f.sessions.snapshot(&attempt.id, &f.root, "c.txt").unwrap();
        write(&f.root, "c.txt", &read(&f.root, "nested/b.txt").unwrap());

        let outcome = f.sessions.undo(&attempt.id).unwrap();
        assert_eq!(outcome.restored_count, 3);
        assert!(!outcome.already_closed);

        assert_eq!(read(&f.root, "a.txt").as_deref(), Some("a0"));
        assert_eq!(read(&f.root, "nested/b.txt"), None);
        assert!(!f.root.join("nested").exists());
        assert_eq!(read(&f.root, "c.txt").as_deref(), Some("c0"));

        let stored = f.sessions.get(&attempt.id).unwrap();
        assert_eq!(stored.status, AttemptStatus::Undone);
        assert!(stored.completed_at.is_some());

        let again = f.sessions.undo(&attempt.id).unwrap();
        assert!(again.already_closed);
        assert_eq!(again.restored_count, 0);
    }

    #[test]
    fn test_undo_removes_only_directories_it_created() {
        let f = fixture();
        write(&f.root, "src/keep.rs", "keep");
        let attempt = f.sessions.start(&f.root).unwrap();

        f.sessions.snapshot(&attempt.id, &f.root, "src/gen/deep/a.rs").unwrap();
        write(&f.root, "src/gen/deep/a.rs", "a");
        f.sessions.snapshot(&attempt.id, &f.root, "src/gen/deep/b.rs").unwrap();
        write(&f.root, "src/gen/deep/b.rs", "b");
        f.sessions.snapshot(&attempt.id, &f.root, "docs/new/guide.md").unwrap();
        write(&f.root, "docs/new/guide.md", "guide");
        // Someone else drops a file into a directory the attempt created
        write(&f.root, "docs/new/notes.md", "mine");

        let stored = f.sessions.get(&attempt.id).unwrap();
        assert_eq!(stored.files[0].created_dirs, vec!["src/gen/deep", "src/gen"]);
        assert!(stored.files[1].created_dirs.is_empty());

        f.sessions.undo(&attempt.id).unwrap();
        assert!(!f.root.join("src/gen").exists());
        assert_eq!(read(&f.root, "src/keep.rs").as_deref(), Some("keep"));
        assert_eq!(read(&f.root, "docs/new/guide.md"), None);
        assert_eq!(read(&f.root, "docs/new/notes.md").as_deref(), Some("mine"));
    }

    #[cfg(unix)]
    #[test]
    fn test_undo_replaces_link_without_following_it() {
        let f = fixture();
        let outside = TempDir::new().unwrap();
        let victim = outside.path().join("victim.txt");
        std::fs::write(&victim, "precious").unwrap();
        write(&f.root, "a.txt", "a0");

        let attempt = f.sessions.start(&f.root).unwrap();
        f.sessions.snapshot(&attempt.id, &f.root, "a.txt").unwrap();
        std::fs::remove_file(f.root.join("a.txt")).unwrap();
        std::os::unix::fs::symlink(&victim, f.root.join("a.txt")).unwrap();

        f.sessions.undo(&attempt.id).unwrap();
        assert!(!sandbox::is_symlink(&f.root.join("a.txt")));
        assert_eq!(read(&f.root, "a.txt").as_deref(), Some("a0"));
        assert_eq!(std::fs::read_to_string(&victim).unwrap(), "precious");
    }

    #[cfg(unix)]
    #[test]
    fn test_snapshot_refuses_links() {
        let f = fixture();
        let outside = TempDir::new().unwrap();
        std::fs::write(outside.path().join("victim.txt"), "precious").unwrap();
        std::os::unix::fs::symlink(outside.path().join("victim.txt"), f.root.join("link.txt"))
            .unwrap();
        std::os::unix::fs::symlink(outside.path(), f.root.join("dir")).unwrap();

        let attempt = f.sessions.start(&f.root).unwrap();
        for path in ["link.txt", "dir/x.txt"] {
            let err = f.sessions.snapshot(&attempt.id, &f.root, path).unwrap_err();
            assert_eq!(err.code(), "path_violation", "path {:?}", path);
        }
        assert!(f.sessions.get(&attempt.id).unwrap().files.is_empty());
    }

    #[test]
    fn test_latest_active_follows_creation_order() {
        let f = fixture();
        let first = f.sessions.start(&f.root).unwrap();
        let second = f.sessions.start(&f.root).unwrap();
        assert_eq!(
            f.sessions.find_latest_active(&f.root).unwrap().unwrap().id,
            second.id
        );

        f.sessions.undo(&second.id).unwrap();
        assert_eq!(
            f.sessions.find_latest_active(&f.root).unwrap().unwrap().id,
            first.id
        );
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn prop_repeated_writes_undo_to_first_state(
            initial in proptest::option::of("[a-z ]{0,16}"),
            writes in prop::collection::vec("[A-Z0-9]{1,16}", 2..6),
        ) {
            let f = fixture();
            if let Some(initial) = &initial {
                write(&f.root, "dir/target.txt", initial);
            }

            let attempt = f.sessions.start(&f.root).unwrap();
            for content in &writes {
                f.sessions.snapshot(&attempt.id, &f.root, "dir/target.txt").unwrap();
                write(&f.root, "dir/target.txt", content);
            }

            let stored = f.sessions.get(&attempt.id).unwrap();
            prop_assert_eq!(stored.files.len(), 1);

            f.sessions.undo(&attempt.id).unwrap();
            prop_assert_eq!(read(&f.root, "dir/target.txt"), initial);
        }
    }
}
