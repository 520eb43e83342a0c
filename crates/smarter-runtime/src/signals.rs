//! Process signal handling

use smarter_core::{Error, Result};
use std::fmt;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::mpsc;
use tracing::debug;

/// Signals buffered before the orchestrator picks them up
const SIGNAL_QUEUE_CAPACITY: usize = 8;

/// Signal the manager reacts to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManagerSignal {
    /// `SIGHUP`: restart every plugin
    Hangup,
    /// `SIGINT`
    Interrupt,
    /// `SIGTERM`
    Terminate,
    /// `SIGQUIT`
    Quit,
}

impl ManagerSignal {
    /// Whether the signal asks for a restart rather than a shutdown
    pub fn is_reload(&self) -> bool {
        matches!(self, ManagerSignal::Hangup)
    }
}

impl fmt::Display for ManagerSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ManagerSignal::Hangup => write!(f, "SIGHUP"),
            ManagerSignal::Interrupt => write!(f, "SIGINT"),
            ManagerSignal::Terminate => write!(f, "SIGTERM"),
            ManagerSignal::Quit => write!(f, "SIGQUIT"),
        }
    }
}

/// Install handlers for every [`ManagerSignal`] and forward deliveries
///
/// Must be called inside a tokio runtime. Fails if any handler cannot be
/// installed. Forwarding stops once the receiver is dropped.
pub fn listen() -> Result<mpsc::Receiver<ManagerSignal>> {
    let mut hangup = install(SignalKind::hangup(), ManagerSignal::Hangup)?;
    let mut interrupt = install(SignalKind::interrupt(), ManagerSignal::Interrupt)?;
    let mut terminate = install(SignalKind::terminate(), ManagerSignal::Terminate)?;
    let mut quit = install(SignalKind::quit(), ManagerSignal::Quit)?;

    let (tx, rx) = mpsc::channel(SIGNAL_QUEUE_CAPACITY);

    tokio::spawn(async move {
        loop {
            let received = tokio::select! {
                Some(()) = hangup.recv() => ManagerSignal::Hangup,
                Some(()) = interrupt.recv() => ManagerSignal::Interrupt,
                Some(()) = terminate.recv() => ManagerSignal::Terminate,
                Some(()) = quit.recv() => ManagerSignal::Quit,
                else => break,
            };

            debug!(signal = %received, "Signal received");
            if tx.send(received).await.is_err() {
                break;
            }
        }
    });

    Ok(rx)
}

fn install(kind: SignalKind, which: ManagerSignal) -> Result<tokio::signal::unix::Signal> {
    signal(kind).map_err(|e| Error::Runtime(format!("failed to install {which} handler: {e}")))
}
