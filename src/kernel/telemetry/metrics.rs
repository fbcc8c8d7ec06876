use serde::Serialize;
use std::collections::VecDeque;

use super::event::TelemetryEvent;
use crate::kernel::intent::arbitrator::ResolutionPath;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TelemetrySnapshot {
    pub resolution_stats: ResolutionStats,
    pub failure_stats: FailureStats,
    pub delivery_stats: DeliveryStats,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ResolutionStats {
    pub queries: u64,
    pub triggered: u64,
    pub primary: u64,
    pub fallback: u64,
    pub no_match: u64,
    pub avg_candidates: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FailureStats {
    pub handler_failures: u64,
    pub renderer_failures: u64,
    pub listener_failures: u64,
    pub listener_timeouts: u64,
    pub aborted: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DeliveryStats {
    pub delivered: u64,
    pub total_ms: u64,
    pub avg_ms: f64,
    pub max_ms: u64,
}

pub fn compute_snapshot(events: &VecDeque<TelemetryEvent>) -> TelemetrySnapshot {
    let mut snap = TelemetrySnapshot::default();
    let mut resolved = 0u64;
    let mut total_candidates = 0u64;

    for event in events {
        match event {
            TelemetryEvent::QueryReceived { .. } => snap.resolution_stats.queries += 1,
            TelemetryEvent::PackageTriggered { .. } => snap.resolution_stats.triggered += 1,
            TelemetryEvent::Resolved {
                path,
                candidates,
                handler_failures,
                ..
            } => {
                resolved += 1;
                total_candidates += *candidates as u64;
                snap.failure_stats.handler_failures += *handler_failures as u64;
                match path {
                    ResolutionPath::Primary => snap.resolution_stats.primary += 1,
                    ResolutionPath::Fallback => snap.resolution_stats.fallback += 1,
                    ResolutionPath::NoMatch => snap.resolution_stats.no_match += 1,
                }
            }
            TelemetryEvent::RendererFailed { .. } => snap.failure_stats.renderer_failures += 1,
            TelemetryEvent::ListenerFailed { timed_out, .. } => {
                snap.failure_stats.listener_failures += 1;
                if *timed_out {
                    snap.failure_stats.listener_timeouts += 1;
                }
            }
            TelemetryEvent::Aborted { .. } => snap.failure_stats.aborted += 1,
            TelemetryEvent::Delivered { elapsed_ms, .. } => {
                snap.delivery_stats.delivered += 1;
                snap.delivery_stats.total_ms += elapsed_ms;
                snap.delivery_stats.max_ms = snap.delivery_stats.max_ms.max(*elapsed_ms);
            }
        }
    }

    if resolved > 0 {
        snap.resolution_stats.avg_candidates = total_candidates as f64 / resolved as f64;
    }
    if snap.delivery_stats.delivered > 0 {
        snap.delivery_stats.avg_ms =
            snap.delivery_stats.total_ms as f64 / snap.delivery_stats.delivered as f64;
    }

    snap
}
