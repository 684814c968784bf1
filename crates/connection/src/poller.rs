//! Readiness poller: probes a fresh session until the device answers.
//!
//! Authentication succeeding does not mean the device serves requests yet.
//! The poller queries the liveness metric on a fixed cadence and declares
//! the session ready on the first positive metric, or once the attempt
//! ceiling is reached for devices that never report one.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use devlink_protocol::MetricReading;

use crate::config::ReadinessConfig;
use crate::error::ConnectionError;
use crate::manager::ConnectionManager;
use crate::session::ConnectionSession;

/// Returns true once a probe result is good enough to call the session
/// ready.
pub fn is_ready(metric: Option<f64>, attempt: u32, max_attempts: u32) -> bool {
    metric.is_some_and(|m| m > 0.0) || attempt >= max_attempts
}

/// Spawns readiness polling tasks bound to one session.
pub struct ReadinessPoller;

impl ReadinessPoller {
    pub(crate) fn spawn(manager: ConnectionManager, session: Arc<ConnectionSession>) -> PollerHandle {
        let config = manager.config.readiness.clone();
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(poll_loop(manager, session, config, cancel.clone()));
        PollerHandle { cancel, handle }
    }
}

/// Owner side of a running poller. Dropping it cancels the poller.
pub struct PollerHandle {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl PollerHandle {
    /// Stops further probes. Safe to call repeatedly.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

impl Drop for PollerHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn poll_loop(
    manager: ConnectionManager,
    session: Arc<ConnectionSession>,
    config: ReadinessConfig,
    cancel: CancellationToken,
) {
    let mut interval = tokio::time::interval(config.probe_interval);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    interval.tick().await; // Skip immediate first tick.

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = interval.tick() => {}
        }

        if !manager.is_current(session.id()) {
            debug!(session = session.id(), "poller tick for stale session");
            break;
        }

        let attempt = session.record_probe();
        let probe = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            probe = session.device().metric() => probe,
        };

        let metric = match probe {
            Ok(metric) => metric,
            Err(e) => {
                let err = ConnectionError::ProbeFailed(e);
                warn!(session = session.id(), attempt, error = %err, "liveness probe failed");
                None
            }
        };

        // A teardown may have raced the probe.
        if cancel.is_cancelled() || !manager.is_current(session.id()) {
            debug!(session = session.id(), attempt, "dropping probe result for stale session");
            break;
        }

        let reading = MetricReading::from_probe(metric);
        trace!(session = session.id(), attempt, %reading, "probe result");
        manager.publish_metric(reading);

        if !session.is_ready() && is_ready(metric, attempt, config.max_attempts) {
            manager.on_readiness_achieved(&session, reading).await;
        }
    }

    trace!(session = session.id(), "poller stopped");
}
