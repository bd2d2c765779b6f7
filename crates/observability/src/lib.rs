use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use once_cell::sync::OnceCell;
use serde::Serialize;
use tracing_subscriber::EnvFilter;

static TRACING_INIT: OnceCell<()> = OnceCell::new();

/// Which policy gate produced a decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecisionKind {
    Slots,
    AgentCreate,
    Language,
    Voice,
}

impl DecisionKind {
    pub fn as_label(self) -> &'static str {
        match self {
            Self::Slots => "slots",
            Self::AgentCreate => "agent_create",
            Self::Language => "language",
            Self::Voice => "voice",
        }
    }
}

#[derive(Debug, Default)]
pub struct PolicyMetrics {
    requests_total: AtomicU64,
    slot_boards_total: AtomicU64,
    access_checks_total: AtomicU64,
    denied_total: AtomicU64,
    invalid_argument_total: AtomicU64,
    polls_total: AtomicU64,
}

#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub requests_total: u64,
    pub slot_boards_total: u64,
    pub access_checks_total: u64,
    pub denied_total: u64,
    pub invalid_argument_total: u64,
    pub polls_total: u64,
    pub denial_rate: f64,
}

impl PolicyMetrics {
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn inc_request(&self) {
        self.requests_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_decision(&self, kind: DecisionKind, allowed: bool) {
        match kind {
            DecisionKind::Slots => self.slot_boards_total.fetch_add(1, Ordering::Relaxed),
            _ => self.access_checks_total.fetch_add(1, Ordering::Relaxed),
        };
        if !allowed {
            self.denied_total.fetch_add(1, Ordering::Relaxed);
        }

        metrics::counter!(
            "callgenie_policy_decisions_total",
            "kind" => kind.as_label(),
            "outcome" => if allowed { "allowed" } else { "denied" }
        )
        .increment(1);
    }

    pub fn inc_invalid_argument(&self) {
        self.invalid_argument_total.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("callgenie_invalid_arguments_total").increment(1);
    }

    pub fn inc_poll(&self) {
        self.polls_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let checks = self.access_checks_total.load(Ordering::Relaxed);
        let denied = self.denied_total.load(Ordering::Relaxed);

        MetricsSnapshot {
            requests_total: self.requests_total.load(Ordering::Relaxed),
            slot_boards_total: self.slot_boards_total.load(Ordering::Relaxed),
            access_checks_total: checks,
            denied_total: denied,
            invalid_argument_total: self.invalid_argument_total.load(Ordering::Relaxed),
            polls_total: self.polls_total.load(Ordering::Relaxed),
            denial_rate: if checks == 0 {
                0.0
            } else {
                denied as f64 / checks as f64
            },
        }
    }
}

pub fn init_tracing(service_name: &str) {
    TRACING_INIT.get_or_init(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!(
                "{}=info,callgenie_api=info,callgenie_agents=info",
                service_name
            ))
        });

        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_current_span(true)
            .with_span_list(true)
            .init();
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_tracks_denials_per_access_check() {
        let metrics = PolicyMetrics::default();
        metrics.record_decision(DecisionKind::Slots, true);
        metrics.record_decision(DecisionKind::Language, false);
        metrics.record_decision(DecisionKind::Voice, true);
        metrics.inc_invalid_argument();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.slot_boards_total, 1);
        assert_eq!(snapshot.access_checks_total, 2);
        assert_eq!(snapshot.denied_total, 1);
        assert_eq!(snapshot.invalid_argument_total, 1);
        assert!((snapshot.denial_rate - 0.5).abs() < f64::EPSILON);
    }
}
