//! Event sources feeding the orchestrator loop

use crate::signals::{self, ManagerSignal};
use crate::watcher::{SocketDirWatcher, WatchEvent};
use smarter_config::ManagerSettings;
use smarter_core::Result;
use tokio::sync::mpsc;
use tracing::debug;

/// Something the orchestrator has to react to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ManagerEvent {
    /// Socket directory change
    Watch(WatchEvent),
    /// Process signal
    Signal(ManagerSignal),
}

/// The socket directory watch and the signal stream, merged
///
/// Either source may be absent. Once a source closes it is no longer polled;
/// when both are gone [`next`](Self::next) returns `None`.
#[derive(Debug, Default)]
pub struct EventSources {
    watch: Option<mpsc::UnboundedReceiver<WatchEvent>>,
    signals: Option<mpsc::Receiver<ManagerSignal>>,
    watcher: Option<SocketDirWatcher>,
}

impl EventSources {
    /// No sources
    pub fn new() -> Self {
        Self::default()
    }

    /// Watch the plugin directory and listen for process signals
    pub fn install(settings: &ManagerSettings) -> Result<Self> {
        let (watcher, events) =
            SocketDirWatcher::start(&settings.plugin_dir, settings.kubelet_socket())?;
        let signals = signals::listen()?;

        Ok(Self::new()
            .with_watcher(watcher, events)
            .with_signals(signals))
    }

    /// Use a running directory watcher, kept alive as long as the sources
    pub fn with_watcher(
        mut self,
        watcher: SocketDirWatcher,
        events: mpsc::UnboundedReceiver<WatchEvent>,
    ) -> Self {
        self.watcher = Some(watcher);
        self.watch = Some(events);
        self
    }

    /// Use an arbitrary stream of watch events
    pub fn with_watch_events(mut self, events: mpsc::UnboundedReceiver<WatchEvent>) -> Self {
        self.watch = Some(events);
        self
    }

    /// Use a stream of signals
    pub fn with_signals(mut self, signals: mpsc::Receiver<ManagerSignal>) -> Self {
        self.signals = Some(signals);
        self
    }

    /// Whether at least one source is still open
    pub fn is_open(&self) -> bool {
        self.watch.is_some() || self.signals.is_some()
    }

    /// Wait for the next event from any open source
    pub async fn next(&mut self) -> Option<ManagerEvent> {
        loop {
            if !self.is_open() {
                return None;
            }

            tokio::select! {
                event = recv_watch(&mut self.watch), if self.watch.is_some() => match event {
                    Some(event) => return Some(ManagerEvent::Watch(event)),
                    None => {
                        debug!("Socket directory watch closed");
                        self.watch = None;
                        self.watcher = None;
                    }
                },
                signal = recv_signal(&mut self.signals), if self.signals.is_some() => match signal {
                    Some(signal) => return Some(ManagerEvent::Signal(signal)),
                    None => {
                        debug!("Signal stream closed");
                        self.signals = None;
                    }
                },
                else => return None,
            }
        }
    }
}

async fn recv_watch(rx: &mut Option<mpsc::UnboundedReceiver<WatchEvent>>) -> Option<WatchEvent> {
    match rx {
        Some(rx) => rx.recv().await,
        None => None,
    }
}

async fn recv_signal(rx: &mut Option<mpsc::Receiver<ManagerSignal>>) -> Option<ManagerSignal> {
    match rx {
        Some(rx) => rx.recv().await,
        None => None,
    }
}
