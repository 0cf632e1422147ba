//! Remote-or-local routing for callers that can do the work themselves.
//!
//! Offloading through the channel only pays off when an executor is actually
//! around to pick the task up. Callers probe first: if the channel is
//! unreachable or the executor heartbeat has gone stale, the work runs
//! locally instead of being parked in the namespace indefinitely.

use std::future::Future;

use chrono::{Duration, Utc};

use crate::channel::read_latest_json;
use crate::controller::Controller;
use crate::error::Result;
use crate::task::{ExecutorStatus, STATUS_OBJECT};

/// Heartbeats older than this mean the executor is treated as gone, even
/// though its status object is still sitting in the namespace.
pub const STATUS_STALENESS_MINUTES: i64 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionRoute {
    Remote,
    Local,
}

/// Decides whether work should be offloaded right now.
///
/// Remote requires both a reachable channel and a fresh executor heartbeat.
/// A missing or unreadable status object routes local; the heartbeat is the
/// only evidence an executor exists.
pub async fn choose_route(controller: &Controller) -> ExecutionRoute {
    if !controller.check_connectivity().await {
        tracing::debug!("Channel unreachable, routing local");
        return ExecutionRoute::Local;
    }

    let status =
        read_latest_json::<ExecutorStatus>(controller.channel().as_ref(), STATUS_OBJECT).await;
    match status {
        Ok(Some(status)) => {
            let age = Utc::now() - status.timestamp;
            if age > Duration::minutes(STATUS_STALENESS_MINUTES) {
                tracing::debug!(
                    executor_id = %status.executor_id,
                    age_secs = age.num_seconds(),
                    "Executor heartbeat stale, routing local"
                );
                ExecutionRoute::Local
            } else {
                ExecutionRoute::Remote
            }
        }
        Ok(None) => {
            tracing::debug!("No executor heartbeat found, routing local");
            ExecutionRoute::Local
        }
        Err(e) => {
            tracing::debug!(error = %e, "Heartbeat unreadable, routing local");
            ExecutionRoute::Local
        }
    }
}

/// Runs `remote` when an executor looks alive, `local` otherwise. A remote
/// attempt that dies on channel unavailability also falls back, so a channel
/// outage between the probe and the submission is absorbed too.
pub async fn run_with_fallback<T, RF, R, LF, L>(
    controller: &Controller,
    remote: RF,
    local: LF,
) -> Result<T>
where
    RF: FnOnce() -> R,
    R: Future<Output = Result<T>>,
    LF: FnOnce() -> L,
    L: Future<Output = Result<T>>,
{
    match choose_route(controller).await {
        ExecutionRoute::Local => local().await,
        ExecutionRoute::Remote => match remote().await {
            Err(e) if e.is_channel_unavailable() => {
                tracing::warn!(error = %e, "Remote attempt lost the channel, running locally");
                local().await
            }
            other => other,
        },
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::channel::{write_json, MemoryChannel};
    use crate::config::ControllerConfig;
    use uuid::Uuid;

    fn controller(channel: MemoryChannel) -> Controller {
        Controller::new(
            Arc::new(channel),
            ControllerConfig::default(),
            "test".to_string(),
        )
    }

    fn heartbeat(age_minutes: i64) -> ExecutorStatus {
        ExecutorStatus {
            executor_id: Uuid::new_v4(),
            timestamp: Utc::now() - Duration::minutes(age_minutes),
            state: "watching".to_string(),
            in_flight: 0,
        }
    }

    #[tokio::test]
    async fn no_heartbeat_routes_local() {
        let ctrl = controller(MemoryChannel::new());
        assert_eq!(choose_route(&ctrl).await, ExecutionRoute::Local);
    }

    #[tokio::test]
    async fn fresh_heartbeat_routes_remote() {
        let channel = MemoryChannel::new();
        write_json(&channel, STATUS_OBJECT, &heartbeat(0)).await.unwrap();
        let ctrl = controller(channel);
        assert_eq!(choose_route(&ctrl).await, ExecutionRoute::Remote);
    }

    #[tokio::test]
    async fn stale_heartbeat_routes_local() {
        let channel = MemoryChannel::new();
        write_json(&channel, STATUS_OBJECT, &heartbeat(STATUS_STALENESS_MINUTES + 1))
            .await
            .unwrap();
        let ctrl = controller(channel);
        assert_eq!(choose_route(&ctrl).await, ExecutionRoute::Local);
    }

    #[tokio::test]
    async fn offline_channel_routes_local() {
        let channel = MemoryChannel::new();
        write_json(&channel, STATUS_OBJECT, &heartbeat(0)).await.unwrap();
        channel.set_offline(true);
        let ctrl = controller(channel);
        assert_eq!(choose_route(&ctrl).await, ExecutionRoute::Local);
    }

    #[tokio::test]
    async fn fallback_runs_local_closure_when_no_executor() {
        let ctrl = controller(MemoryChannel::new());
        let out = run_with_fallback(
            &ctrl,
            || async { Ok("remote") },
            || async { Ok("local") },
        )
        .await
        .unwrap();
        assert_eq!(out, "local");
    }

    #[tokio::test]
    async fn fallback_runs_remote_closure_when_executor_alive() {
        let channel = MemoryChannel::new();
        write_json(&channel, STATUS_OBJECT, &heartbeat(1)).await.unwrap();
        let ctrl = controller(channel);
        let out = run_with_fallback(
            &ctrl,
            || async { Ok("remote") },
            || async { Ok("local") },
        )
        .await
        .unwrap();
        assert_eq!(out, "remote");
    }

    #[tokio::test]
    async fn remote_channel_loss_falls_back_to_local() {
        let channel = MemoryChannel::new();
        write_json(&channel, STATUS_OBJECT, &heartbeat(0)).await.unwrap();
        let ctrl = controller(channel);
        let out = run_with_fallback(
            &ctrl,
            || async {
                Err(crate::error::Error::ChannelUnavailable(
                    "mount dropped".to_string(),
                ))
            },
            || async { Ok("local") },
        )
        .await
        .unwrap();
        assert_eq!(out, "local");
    }
}
