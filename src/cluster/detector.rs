//! Heartbeat-timeout failure detection
//!
//! A background loop that fails every node whose last heartbeat is older
//! than the timeout, then retries placement of any pod left Pending.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::controller::ClusterController;
use super::rescheduler::RescheduleReport;
use super::state::FailureReport;
use super::{DEFAULT_CHECK_INTERVAL_SECS, DEFAULT_HEARTBEAT_TIMEOUT_SECS};

/// Failure detector timing
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DetectorConfig {
    /// Period between staleness checks
    pub check_interval: Duration,
    /// Heartbeat age after which a node is failed
    pub heartbeat_timeout: Duration,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            check_interval: Duration::from_secs(DEFAULT_CHECK_INTERVAL_SECS),
            heartbeat_timeout: Duration::from_secs(DEFAULT_HEARTBEAT_TIMEOUT_SECS),
        }
    }
}

/// What one detector pass did
#[derive(Debug, Clone, Default)]
pub struct DetectorTick {
    pub failures: Vec<FailureReport>,
    pub retried: RescheduleReport,
}

/// Periodic staleness checker
pub struct FailureDetector {
    controller: Arc<ClusterController>,
    config: DetectorConfig,
}

impl FailureDetector {
    pub fn new(controller: Arc<ClusterController>, config: DetectorConfig) -> Self {
        Self { controller, config }
    }

    /// Run a single detection pass as of `now`
    pub async fn tick(&self, now: DateTime<Utc>) -> DetectorTick {
        let timeout = match chrono::Duration::from_std(self.config.heartbeat_timeout) {
            Ok(timeout) => timeout,
            Err(_) => {
                warn!(
                    "Heartbeat timeout {:?} is out of range, using {}s",
                    self.config.heartbeat_timeout, DEFAULT_HEARTBEAT_TIMEOUT_SECS
                );
                chrono::Duration::seconds(DEFAULT_HEARTBEAT_TIMEOUT_SECS as i64)
            }
        };

        let failures = self.controller.fail_stale_nodes(now, timeout).await;
        for report in &failures {
            warn!(
                "Node {} failed ({}): {} pod(s) rescheduled, {} pending",
                report.node_id,
                report.reason,
                report.outcome.rescheduled.len(),
                report.outcome.pending.len()
            );
        }

        let retried = self.controller.reschedule_pending();
        if !retried.rescheduled.is_empty() {
            info!("Placed {} pending pod(s)", retried.rescheduled.len());
        }

        DetectorTick { failures, retried }
    }

    async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = interval(self.config.check_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            "Failure detector started: checking every {:?}, timeout {:?}",
            self.config.check_interval, self.config.heartbeat_timeout
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let tick = self.tick(Utc::now()).await;
                    debug!(
                        "Detector pass: {} failure(s), {} pending pod(s) left",
                        tick.failures.len(),
                        tick.retried.pending.len()
                    );
                }
                _ = shutdown.changed() => {
                    info!("Failure detector shutting down");
                    break;
                }
            }
        }
    }
}

/// Spawn the failure detector, returning a shutdown sender
pub fn spawn_detector(
    controller: Arc<ClusterController>,
    config: DetectorConfig,
) -> watch::Sender<bool> {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let detector = FailureDetector::new(controller, config);

    tokio::spawn(async move {
        detector.run(shutdown_rx).await;
    });

    shutdown_tx
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::node::{NodeStatus, PodStatus};

    fn detector(controller: &Arc<ClusterController>, timeout_secs: u64) -> FailureDetector {
        FailureDetector::new(
            controller.clone(),
            DetectorConfig {
                check_interval: Duration::from_millis(10),
                heartbeat_timeout: Duration::from_secs(timeout_secs),
            },
        )
    }

    #[test]
    fn test_default_timing() {
        let config = DetectorConfig::default();
        assert_eq!(config.check_interval, Duration::from_secs(5));
        assert_eq!(config.heartbeat_timeout, Duration::from_secs(15));
    }

    #[tokio::test]
    async fn test_tick_fails_only_stale_nodes() {
        let controller = Arc::new(ClusterController::new());
        let stale = controller.add_node(4.0, None).await.unwrap();
        let fresh = controller.add_node(4.0, None).await.unwrap();
        let (pod, placed) = controller.request_pod(3.0).unwrap();
        assert_eq!(placed, stale);

        let now = Utc::now() + chrono::Duration::seconds(20);
        controller.state().record_heartbeat_at(fresh, now).unwrap();

        let tick = detector(&controller, 15).tick(now).await;

        assert_eq!(tick.failures.len(), 1);
        assert_eq!(tick.failures[0].node_id, stale);
        assert_eq!(
            controller.state().get_node(stale).unwrap().status,
            NodeStatus::Failed
        );
        assert_eq!(controller.state().get_pod(pod).unwrap().node_id, Some(fresh));
    }

    #[tokio::test]
    async fn test_tick_places_pending_pods_on_new_capacity() {
        let controller = Arc::new(ClusterController::new());
        let first = controller.add_node(2.0, None).await.unwrap();
        let (pod, _) = controller.request_pod(2.0).unwrap();
        controller.fail_node(first).await.unwrap();
        assert_eq!(
            controller.state().get_pod(pod).unwrap().status,
            PodStatus::Pending
        );

        let second = controller.add_node(2.0, None).await.unwrap();
        let tick = detector(&controller, 15).tick(Utc::now()).await;

        assert!(tick.failures.is_empty());
        assert_eq!(tick.retried.rescheduled.len(), 1);
        assert_eq!(controller.state().get_pod(pod).unwrap().node_id, Some(second));
    }

    #[tokio::test]
    async fn test_spawned_detector_stops_on_shutdown() {
        let controller = Arc::new(ClusterController::new());
        let shutdown = spawn_detector(
            controller.clone(),
            DetectorConfig {
                check_interval: Duration::from_millis(10),
                heartbeat_timeout: Duration::from_secs(60),
            },
        );

        tokio::time::sleep(Duration::from_millis(30)).await;
        shutdown.send(true).unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(shutdown.is_closed());
    }
}
