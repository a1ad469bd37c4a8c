//! Background tasks driven by the coordinator
//!
//! Each task holds a `Weak` reference and exits when the coordinator is
//! dropped or shutdown is signalled.

use super::Coordinator;
use crate::protocol::{unix_millis, ServerMessage, Topic};
use crate::session::SessionId;
use std::future::Future;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info};

pub(super) fn spawn_all(
    coordinator: &Arc<Coordinator>,
    dead_sessions: mpsc::UnboundedReceiver<SessionId>,
) -> Vec<JoinHandle<()>> {
    let broadcast = coordinator.config.broadcast.clone();
    let controller_tick = coordinator.config.controller.tick_interval_ms;
    let sweep = coordinator.config.sync.sweep_interval_ms;
    let idle_timeout = Duration::from_millis(broadcast.idle_timeout_ms);

    vec![
        periodic(coordinator, "performance", broadcast.performance_interval_ms, |c| async move {
            let metrics = c.metrics_snapshot().await;
            c.router
                .publish(Topic::Performance, ServerMessage::PerformanceSnapshot { metrics })
                .await;
        }),
        periodic(coordinator, "parameters", broadcast.parameters_interval_ms, |c| async move {
            let parameters = c.controller.snapshot();
            c.router
                .publish(Topic::Parameters, ServerMessage::Parameters { parameters })
                .await;
        }),
        periodic(coordinator, "compliance", broadcast.compliance_interval_ms, |c| async move {
            let (met, missed, compliance) = c.metrics.compliance();
            let message = ServerMessage::ComplianceMetrics {
                compliance,
                met,
                missed,
                latency_warnings: c.metrics.latency_warnings(),
            };
            c.router.publish(Topic::Compliance, message).await;
        }),
        periodic(coordinator, "heartbeat", broadcast.heartbeat_interval_ms, |c| async move {
            let timestamp_ms = unix_millis();
            c.router
                .broadcast_all(ServerMessage::Heartbeat { timestamp_ms })
                .await;
        }),
        periodic(coordinator, "controller-tick", controller_tick, |c| async move {
            let _ = c.controller.tick().await;
        }),
        periodic(coordinator, "sync-sweep", sweep, |c| async move {
            for (link, evicted) in c.sync.sweep(Instant::now()).await {
                debug!(link_id = %link.id, evicted, "Evicted unmatched results");
                c.metrics.unmatched(evicted);
            }
        }),
        periodic(
            coordinator,
            "idle-reaper",
            (broadcast.idle_timeout_ms / 4).max(100),
            move |c| async move {
                for session_id in c.sessions.idle_sessions(idle_timeout, Instant::now()).await {
                    info!(session_id = %session_id, "Closing idle session");
                    c.disconnect(&session_id, "idle_timeout").await;
                }
            },
        ),
        reap_dead_sessions(coordinator, dead_sessions),
    ]
}

/// Run `task` every `period_ms` until shutdown
fn periodic<F, Fut>(
    coordinator: &Arc<Coordinator>,
    name: &'static str,
    period_ms: u64,
    mut task: F,
) -> JoinHandle<()>
where
    F: FnMut(Arc<Coordinator>) -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send,
{
    let weak: Weak<Coordinator> = Arc::downgrade(coordinator);
    let mut shutdown = coordinator.shutdown_signal();
    let period = Duration::from_millis(period_ms.max(1));

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let Some(coordinator) = weak.upgrade() else { break };
                    task(coordinator).await;
                }
                _ = shutdown.changed() => break,
            }
        }
        debug!(task = name, "Background task stopped");
    })
}

/// Deregister sessions whose transport was found closed by the router
fn reap_dead_sessions(
    coordinator: &Arc<Coordinator>,
    mut dead_sessions: mpsc::UnboundedReceiver<SessionId>,
) -> JoinHandle<()> {
    let weak = Arc::downgrade(coordinator);
    let mut shutdown = coordinator.shutdown_signal();

    tokio::spawn(async move {
        loop {
            tokio::select! {
                session_id = dead_sessions.recv() => {
                    let Some(session_id) = session_id else { break };
                    let Some(coordinator) = weak.upgrade() else { break };
                    coordinator.disconnect(&session_id, "transport_closed").await;
                }
                _ = shutdown.changed() => break,
            }
        }
        debug!(task = "dead-session-reaper", "Background task stopped");
    })
}
