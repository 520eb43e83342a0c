//! Replica health tracking

use smarter_config::HealthCheckConfig;
use smarter_core::DeviceSet;
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Capacity of the queue between a [`HealthReporter`] and its plugin
const REPORT_QUEUE_CAPACITY: usize = 32;

/// Handle through which a health source marks replicas unhealthy
///
/// Cloneable and cheap. Reports made after the owning plugin stopped are
/// dropped and `report_unhealthy` returns `false`.
#[derive(Debug, Clone)]
pub struct HealthReporter {
    tx: mpsc::Sender<String>,
}

impl HealthReporter {
    /// Report the replica `id` as unhealthy
    pub async fn report_unhealthy(&self, id: impl Into<String>) -> bool {
        self.tx.send(id.into()).await.is_ok()
    }

    /// Whether the plugin behind this handle has stopped
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Receiving side of a [`HealthReporter`]
pub(crate) type HealthEvents = mpsc::Receiver<String>;

/// Create the reporter/event pair, or nothing when health checks are off
pub(crate) fn health_source(checks: &HealthCheckConfig) -> Option<(HealthReporter, HealthEvents)> {
    if !checks.xids_enabled() {
        info!("Health checks disabled");
        return None;
    }

    let (tx, rx) = mpsc::channel(REPORT_QUEUE_CAPACITY);
    Some((HealthReporter { tx }, rx))
}

/// Apply reported health changes to `devices` until `stop` fires
///
/// Each change that actually flips a replica is published on `updates` so
/// open device streams re-send the list. Reports for unknown or already
/// unhealthy replicas are ignored.
pub(crate) async fn run_health_checks(
    resource: String,
    devices: DeviceSet,
    events: Option<HealthEvents>,
    updates: broadcast::Sender<String>,
    stop: CancellationToken,
) {
    let Some(mut events) = events else {
        stop.cancelled().await;
        return;
    };

    loop {
        tokio::select! {
            biased;

            _ = stop.cancelled() => break,

            event = events.recv() => {
                let Some(id) = event else {
                    debug!(resource = %resource, "Health source closed");
                    stop.cancelled().await;
                    break;
                };

                if !devices.mark_unhealthy(&id) {
                    debug!(resource = %resource, device = %id, "Ignoring health report");
                    continue;
                }

                warn!(resource = %resource, device = %id, "Device marked unhealthy");
                // No receivers just means no stream is open right now
                let _ = updates.send(id);
            }
        }
    }

    debug!(resource = %resource, "Health task stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use smarter_core::DeviceHealth;
    use std::time::Duration;

    #[test]
    fn test_source_absent_when_disabled() {
        assert!(health_source(&HealthCheckConfig::from_value("xids")).is_none());
        assert!(health_source(&HealthCheckConfig::from_value("all")).is_none());
        assert!(health_source(&HealthCheckConfig::from_value("")).is_some());
    }

    #[tokio::test]
    async fn test_report_marks_device_and_publishes() {
        let devices = DeviceSet::synthesize(2);
        let (reporter, events) = health_source(&HealthCheckConfig::default()).unwrap();
        let (updates, mut rx) = broadcast::channel(4);
        let stop = CancellationToken::new();

        let task = tokio::spawn(run_health_checks(
            "smarter-devices/snd".to_string(),
            devices.clone(),
            Some(events),
            updates,
            stop.clone(),
        ));

        assert!(reporter.report_unhealthy("1").await);
        let id = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(id, "1");
        assert_eq!(devices.snapshot()[1].health, DeviceHealth::Unhealthy);

        stop.cancel();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_repeated_and_unknown_reports_are_quiet() {
        let devices = DeviceSet::synthesize(1);
        let (reporter, events) = health_source(&HealthCheckConfig::default()).unwrap();
        let (updates, mut rx) = broadcast::channel(4);
        let stop = CancellationToken::new();

        let task = tokio::spawn(run_health_checks(
            "smarter-devices/snd".to_string(),
            devices,
            Some(events),
            updates,
            stop.clone(),
        ));

        reporter.report_unhealthy("0").await;
        reporter.report_unhealthy("0").await;
        reporter.report_unhealthy("9").await;

        assert_eq!(rx.recv().await.unwrap(), "0");
        let next = tokio::time::timeout(Duration::from_millis(100), rx.recv()).await;
        assert!(next.is_err());

        stop.cancel();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_stop_closes_reporter() {
        let (reporter, events) = health_source(&HealthCheckConfig::default()).unwrap();
        let (updates, _rx) = broadcast::channel(4);
        let stop = CancellationToken::new();

        let task = tokio::spawn(run_health_checks(
            "smarter-devices/snd".to_string(),
            DeviceSet::synthesize(1),
            Some(events),
            updates,
            stop.clone(),
        ));

        stop.cancel();
        task.await.unwrap();

        assert!(reporter.is_closed());
        assert!(!reporter.report_unhealthy("0").await);
    }

    #[tokio::test]
    async fn test_without_source_waits_for_stop() {
        let (updates, _rx) = broadcast::channel(4);
        let stop = CancellationToken::new();

        let task = tokio::spawn(run_health_checks(
            "smarter-devices/snd".to_string(),
            DeviceSet::synthesize(1),
            None,
            updates,
            stop.clone(),
        ));

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!task.is_finished());

        stop.cancel();
        task.await.unwrap();
    }
}
