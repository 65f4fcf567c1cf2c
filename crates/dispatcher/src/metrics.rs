use metrics::{counter, gauge, histogram, Counter, Gauge, Histogram};
use tracing::debug;

use shiftfill_domain::{Channel, EscalationKind, GapStatus};

/// 补位调度指标
///
/// 未安装 recorder 时所有调用都是空操作。
pub struct DispatchMetrics {
    gaps_opened_total: Counter,
    active_gaps: Gauge,
    time_to_fill: Histogram,
    commit_attempts_total: Counter,
    commit_failures_total: Counter,
    reconciliation_replies_total: Counter,
    reply_stream_reconnects_total: Counter,
}

impl DispatchMetrics {
    pub fn new() -> Self {
        Self {
            gaps_opened_total: counter!("shiftfill_gaps_opened_total"),
            active_gaps: gauge!("shiftfill_active_gaps"),
            time_to_fill: histogram!("shiftfill_time_to_fill_seconds"),
            commit_attempts_total: counter!("shiftfill_commit_attempts_total"),
            commit_failures_total: counter!("shiftfill_commit_failures_total"),
            reconciliation_replies_total: counter!("shiftfill_reconciliation_replies_total"),
            reply_stream_reconnects_total: counter!("shiftfill_reply_stream_reconnects_total"),
        }
    }

    pub fn record_gap_opened(&self) {
        self.gaps_opened_total.increment(1);
    }

    pub fn set_active_gaps(&self, count: usize) {
        self.active_gaps.set(count as f64);
    }

    pub fn record_gap_closed(&self, status: GapStatus) {
        counter!("shiftfill_gaps_closed_total", "status" => status.as_str()).increment(1);
    }

    pub fn record_status_change(&self, to: GapStatus) {
        counter!("shiftfill_gap_transitions_total", "to" => to.as_str()).increment(1);
    }

    pub fn record_time_to_fill(&self, seconds: f64) {
        self.time_to_fill.record(seconds);
        debug!(seconds = seconds, "班次补位耗时已记录");
    }

    pub fn record_outreach(&self, channel: Channel, delivered: bool) {
        let outcome = if delivered { "sent" } else { "unreachable" };
        counter!(
            "shiftfill_outreach_attempts_total",
            "channel" => channel.as_str(),
            "outcome" => outcome
        )
        .increment(1);
    }

    pub fn record_reply_routed(&self, outcome: &'static str) {
        counter!("shiftfill_replies_total", "outcome" => outcome).increment(1);
    }

    pub fn record_escalation(&self, kind: EscalationKind) {
        counter!("shiftfill_escalations_total", "kind" => kind.as_str()).increment(1);
    }

    pub fn record_commit_attempts(&self, attempts: u32, succeeded: bool) {
        self.commit_attempts_total.increment(attempts as u64);
        if !succeeded {
            self.commit_failures_total.increment(1);
        }
    }

    pub fn record_reconciliation(&self, replies: usize) {
        self.reconciliation_replies_total.increment(replies as u64);
    }

    pub fn record_reconnect(&self) {
        self.reply_stream_reconnects_total.increment(1);
    }
}

impl Default for DispatchMetrics {
    fn default() -> Self {
        Self::new()
    }
}
