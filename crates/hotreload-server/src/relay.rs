//! File change → `fileChanged` broadcast.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use hotreload_core::protocol::{ChangeType, FileChangedPayload};
use metrics::counter;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::coalescer::ChangeCoalescer;
use crate::metrics::FILE_CHANGES_PUBLISHED_TOTAL;
use crate::watcher::FileChange;
use crate::websocket::broadcast::{Broadcaster, Priority};
use crate::websocket::filter::BroadcastFilter;

/// Debounces [`FileChange`]s per path and publishes the settled result to
/// every session.
pub struct ChangeRelay {
    broadcaster: Arc<Broadcaster>,
    coalescer: ChangeCoalescer<PathBuf>,
    max_file_size: usize,
}

impl ChangeRelay {
    /// Relay with a `debounce` window per path. Files larger than
    /// `max_file_size` bytes are not published.
    pub fn new(broadcaster: Arc<Broadcaster>, debounce: Duration, max_file_size: usize) -> Self {
        Self {
            broadcaster,
            coalescer: ChangeCoalescer::new(debounce),
            max_file_size,
        }
    }

    /// Accept one change; the broadcast happens once the path settles.
    pub fn submit(&self, change: FileChange) {
        let broadcaster = Arc::clone(&self.broadcaster);
        let max_file_size = self.max_file_size;
        let key = change.path.clone();
        self.coalescer.debounce(key, move || async move {
            publish(&broadcaster, &change.path, change.change_type, max_file_size).await;
        });
    }

    /// Changes waiting for their window to close.
    pub fn pending(&self) -> usize {
        self.coalescer.pending_count()
    }

    /// Consume `changes` until the channel closes or `cancel` fires, then
    /// drop anything still pending.
    #[instrument(skip_all, name = "change_relay")]
    pub async fn run(self, mut changes: mpsc::Receiver<FileChange>, cancel: CancellationToken) {
        info!(debounce = ?self.coalescer.delay(), "change relay started");
        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                next = changes.recv() => match next {
                    Some(change) => self.submit(change),
                    None => break,
                },
            }
        }
        self.coalescer.cancel_all();
        info!("change relay stopped");
    }
}

/// Read the settled file and broadcast it. A file that no longer exists is
/// published as `deleted` with empty content. Oversized or non-UTF-8 files
/// are skipped.
async fn publish(
    broadcaster: &Broadcaster,
    path: &Path,
    change_type: ChangeType,
    max_file_size: usize,
) {
    let (content, change_type) = match tokio::fs::read(path).await {
        Ok(bytes) if bytes.len() > max_file_size => {
            warn!(
                path = %path.display(),
                size = bytes.len(),
                limit = max_file_size,
                "changed file exceeds message size limit, skipping"
            );
            return;
        }
        Ok(bytes) => match String::from_utf8(bytes) {
            Ok(text) => (text, change_type),
            Err(_) => {
                warn!(path = %path.display(), "changed file is not UTF-8, skipping");
                return;
            }
        },
        Err(e) if e.kind() == ErrorKind::NotFound => (String::new(), ChangeType::Deleted),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "failed to read changed file");
            return;
        }
    };
    let payload = FileChangedPayload::new(path.display().to_string(), content, change_type);
    let report = broadcaster
        .file_changed(payload, &BroadcastFilter::All, Priority::Realtime)
        .await;
    counter!(FILE_CHANGES_PUBLISHED_TOTAL).increment(1);
    debug!(
        path = %path.display(),
        ?change_type,
        delivered = report.delivered,
        failed = report.failed(),
        "file change published"
    );
}
