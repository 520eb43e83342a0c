//! Plugin socket directory watching

use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use smarter_core::{Error, Result};
use std::fmt;
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;
use tracing::{info, trace};

/// Change in the plugin socket directory relevant to the manager
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchEvent {
    /// The kubelet socket was created, so the kubelet (re)started
    KubeletRestarted,
    /// The watch backend reported an error
    Error(String),
}

/// Whether `event` is the creation of the kubelet socket
pub fn is_kubelet_restart(event: &Event, kubelet_socket: &Path) -> bool {
    matches!(event.kind, EventKind::Create(_)) && event.paths.iter().any(|p| p == kubelet_socket)
}

/// Watches the plugin socket directory for kubelet restarts
///
/// Only the directory itself is watched, not its children. Dropping the
/// watcher stops the watch and closes the event channel.
pub struct SocketDirWatcher {
    dir: PathBuf,
    _watcher: RecommendedWatcher,
}

impl fmt::Debug for SocketDirWatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SocketDirWatcher")
            .field("dir", &self.dir)
            .finish_non_exhaustive()
    }
}

impl SocketDirWatcher {
    /// Start watching `dir` and report creations of `kubelet_socket`
    pub fn start(
        dir: impl Into<PathBuf>,
        kubelet_socket: impl Into<PathBuf>,
    ) -> Result<(Self, mpsc::UnboundedReceiver<WatchEvent>)> {
        let dir = dir.into();
        let kubelet_socket = kubelet_socket.into();
        let (tx, rx) = mpsc::unbounded_channel();

        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| {
                let event = match res {
                    Ok(event) if is_kubelet_restart(&event, &kubelet_socket) => {
                        WatchEvent::KubeletRestarted
                    }
                    Ok(event) => {
                        trace!(kind = ?event.kind, paths = ?event.paths, "Ignoring socket directory event");
                        return;
                    }
                    Err(e) => WatchEvent::Error(e.to_string()),
                };
                let _ = tx.send(event);
            },
            Config::default(),
        )
        .map_err(|e| Error::Watch(format!("failed to create watcher: {e}")))?;

        watcher
            .watch(&dir, RecursiveMode::NonRecursive)
            .map_err(|e| Error::Watch(format!("failed to watch {}: {e}", dir.display())))?;

        info!(dir = %dir.display(), "Watching plugin socket directory");

        Ok((
            Self {
                dir,
                _watcher: watcher,
            },
            rx,
        ))
    }

    /// Watched directory
    pub fn dir(&self) -> &Path {
        &self.dir
    }
}
