//! Recursive file-system watcher.
//!
//! Wraps a `notify` watcher and turns raw OS events into [`FileChange`]s on a
//! bounded Tokio channel. No debouncing happens here; see
//! [`ChangeRelay`](crate::relay::ChangeRelay).

use std::path::{Path, PathBuf};

use hotreload_core::protocol::ChangeType;
use notify::event::ModifyKind;
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, info, warn};

/// Watcher setup failure.
#[derive(Debug, Error)]
pub enum WatchError {
    /// No paths were given.
    #[error("no paths to watch")]
    NoPaths,
    /// The backend could not be created or could not watch a path.
    #[error("failed to watch {path}: {source}")]
    Notify {
        /// Path being registered (empty for backend creation).
        path: String,
        /// Backend error.
        #[source]
        source: notify::Error,
    },
}

/// One observed change.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FileChange {
    /// Affected file.
    pub path: PathBuf,
    /// What happened.
    pub change_type: ChangeType,
}

/// Map a notify event kind to a change type. `None` for access, metadata and
/// unclassified events.
pub fn classify(kind: &EventKind) -> Option<ChangeType> {
    match kind {
        EventKind::Create(_) => Some(ChangeType::Created),
        EventKind::Remove(_) => Some(ChangeType::Deleted),
        EventKind::Modify(ModifyKind::Name(_)) => Some(ChangeType::Renamed),
        EventKind::Modify(ModifyKind::Metadata(_)) => None,
        EventKind::Modify(_) => Some(ChangeType::Modified),
        EventKind::Access(_) | EventKind::Any | EventKind::Other => None,
    }
}

/// Whether `path` has one of `extensions` (case-insensitive, no leading dot).
/// An empty list accepts every path.
pub fn has_watched_extension(path: &Path, extensions: &[String]) -> bool {
    if extensions.is_empty() {
        return true;
    }
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|ext| {
            extensions
                .iter()
                .any(|want| want.trim_start_matches('.').eq_ignore_ascii_case(ext))
        })
}

/// Live watcher. Dropping it stops the OS watch and closes the channel.
pub struct FileWatcher {
    _watcher: RecommendedWatcher,
    paths: Vec<PathBuf>,
}

impl std::fmt::Debug for FileWatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileWatcher")
            .field("paths", &self.paths)
            .finish_non_exhaustive()
    }
}

impl FileWatcher {
    /// Watch `paths` recursively, reporting changes to files with one of
    /// `extensions` on a channel of `capacity`.
    pub fn start(
        paths: &[PathBuf],
        extensions: Vec<String>,
        capacity: usize,
    ) -> Result<(Self, mpsc::Receiver<FileChange>), WatchError> {
        if paths.is_empty() {
            return Err(WatchError::NoPaths);
        }
        let (tx, rx) = mpsc::channel(capacity.max(1));

        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
            match res {
                Ok(event) => forward(&event, &extensions, &tx),
                Err(e) => warn!(error = %e, "file watcher error"),
            }
        })
        .map_err(|source| WatchError::Notify {
            path: String::new(),
            source,
        })?;

        for path in paths {
            watcher
                .watch(path, RecursiveMode::Recursive)
                .map_err(|source| WatchError::Notify {
                    path: path.display().to_string(),
                    source,
                })?;
            info!(path = %path.display(), "watching");
        }

        Ok((
            Self {
                _watcher: watcher,
                paths: paths.to_vec(),
            },
            rx,
        ))
    }

    /// Watched roots.
    pub fn paths(&self) -> &[PathBuf] {
        &self.paths
    }
}

fn forward(event: &Event, extensions: &[String], tx: &mpsc::Sender<FileChange>) {
    let Some(change_type) = classify(&event.kind) else {
        return;
    };
    for path in &event.paths {
        if !has_watched_extension(path, extensions) {
            continue;
        }
        debug!(path = %path.display(), ?change_type, "file event");
        let change = FileChange {
            path: path.clone(),
            change_type,
        };
        match tx.try_send(change) {
            Ok(()) => {}
            Err(TrySendError::Full(dropped)) => {
                warn!(path = %dropped.path.display(), "change queue full, dropping event");
            }
            Err(TrySendError::Closed(_)) => return,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use notify::event::{AccessKind, CreateKind, DataChange, MetadataKind, RemoveKind, RenameMode};
    use std::time::Duration;

    fn exts() -> Vec<String> {
        vec!["swift".into(), ".KT".into()]
    }

    #[test]
    fn event_kinds_map_to_change_types() {
        assert_eq!(classify(&EventKind::Create(CreateKind::File)), Some(ChangeType::Created));
        assert_eq!(classify(&EventKind::Remove(RemoveKind::File)), Some(ChangeType::Deleted));
        assert_eq!(
            classify(&EventKind::Modify(ModifyKind::Name(RenameMode::Both))),
            Some(ChangeType::Renamed)
        );
        assert_eq!(
            classify(&EventKind::Modify(ModifyKind::Data(DataChange::Content))),
            Some(ChangeType::Modified)
        );
        assert_eq!(classify(&EventKind::Modify(ModifyKind::Metadata(MetadataKind::Any))), None);
        assert_eq!(classify(&EventKind::Access(AccessKind::Any)), None);
        assert_eq!(classify(&EventKind::Other), None);
    }

    #[test]
    fn extension_filter() {
        assert!(has_watched_extension(Path::new("/src/View.swift"), &exts()));
        assert!(has_watched_extension(Path::new("/src/Main.kt"), &exts()));
        assert!(!has_watched_extension(Path::new("/src/notes.md"), &exts()));
        assert!(!has_watched_extension(Path::new("/src/Makefile"), &exts()));
        assert!(has_watched_extension(Path::new("/src/Makefile"), &[]));
    }

    #[test]
    fn forward_filters_and_fans_out_paths() {
        let (tx, mut rx) = mpsc::channel(8);
        let event = Event::new(EventKind::Create(CreateKind::File))
            .add_path("/p/A.swift".into())
            .add_path("/p/readme.txt".into())
            .add_path("/p/B.kt".into());
        forward(&event, &exts(), &tx);

        let a = rx.try_recv().unwrap();
        assert_eq!(a.path, PathBuf::from("/p/A.swift"));
        assert_eq!(a.change_type, ChangeType::Created);
        assert_eq!(rx.try_recv().unwrap().path, PathBuf::from("/p/B.kt"));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn forward_drops_on_full_queue() {
        let (tx, mut rx) = mpsc::channel(1);
        let event = Event::new(EventKind::Modify(ModifyKind::Any))
            .add_path("/p/A.swift".into())
            .add_path("/p/B.swift".into());
        forward(&event, &exts(), &tx);
        assert_eq!(rx.try_recv().unwrap().path, PathBuf::from("/p/A.swift"));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn start_requires_paths() {
        assert_matches!(FileWatcher::start(&[], exts(), 8), Err(WatchError::NoPaths));
    }

    #[tokio::test]
    async fn reports_real_file_writes() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().canonicalize().unwrap();
        let (watcher, mut rx) = FileWatcher::start(&[root.clone()], exts(), 64).unwrap();
        assert_eq!(watcher.paths(), &[root.clone()]);

        let file = root.join("ContentView.swift");
        tokio::fs::write(&file, "struct ContentView {}").await.unwrap();
        tokio::fs::write(root.join("ignored.txt"), "x").await.unwrap();

        let change = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("no event within 5s")
            .expect("channel closed");
        assert!(change.path.ends_with("ContentView.swift"));
        assert!(matches!(
            change.change_type,
            ChangeType::Created | ChangeType::Modified
        ));
    }
}
