//! 领域事件
//!
//! 每个班次协调器按顺序记录自己的事件，作为升级通知和审计的完整历史

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::entities::{Channel, EscalationKind, GapStatus, ResponseIntent};
use crate::value_objects::{CaregiverId, GapId};

/// 领域事件基础trait
pub trait DomainEvent: Send + Sync {
    fn event_type(&self) -> &str;
    fn occurred_at(&self) -> DateTime<Utc>;
    fn aggregate_id(&self) -> String;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum GapEvent {
    GapOpened {
        gap_id: GapId,
        ranked_candidates: usize,
        occurred_at: DateTime<Utc>,
    },
    StatusChanged {
        gap_id: GapId,
        from: GapStatus,
        to: GapStatus,
        occurred_at: DateTime<Utc>,
    },
    OutreachSent {
        gap_id: GapId,
        attempt_id: Uuid,
        caregiver_id: CaregiverId,
        channel: Channel,
        wave: u32,
        delivered: bool,
        occurred_at: DateTime<Utc>,
    },
    ResponseReceived {
        gap_id: GapId,
        caregiver_id: CaregiverId,
        reply_id: String,
        channel: Channel,
        intent: ResponseIntent,
        confidence: f64,
        occurred_at: DateTime<Utc>,
    },
    CandidateExcluded {
        gap_id: GapId,
        caregiver_id: CaregiverId,
        reason: String,
        occurred_at: DateTime<Utc>,
    },
    AssignmentAccepted {
        gap_id: GapId,
        caregiver_id: CaregiverId,
        reply_id: String,
        occurred_at: DateTime<Utc>,
    },
    AssignmentCommitted {
        gap_id: GapId,
        caregiver_id: CaregiverId,
        outcome: String,
        occurred_at: DateTime<Utc>,
    },
    LateReplyRejected {
        gap_id: GapId,
        caregiver_id: CaregiverId,
        reply_id: String,
        occurred_at: DateTime<Utc>,
    },
    EscalationRaised {
        gap_id: GapId,
        kind: EscalationKind,
        occurred_at: DateTime<Utc>,
    },
}

impl GapEvent {
    fn gap_id(&self) -> &GapId {
        match self {
            GapEvent::GapOpened { gap_id, .. }
            | GapEvent::StatusChanged { gap_id, .. }
            | GapEvent::OutreachSent { gap_id, .. }
            | GapEvent::ResponseReceived { gap_id, .. }
            | GapEvent::CandidateExcluded { gap_id, .. }
            | GapEvent::AssignmentAccepted { gap_id, .. }
            | GapEvent::AssignmentCommitted { gap_id, .. }
            | GapEvent::LateReplyRejected { gap_id, .. }
            | GapEvent::EscalationRaised { gap_id, .. } => gap_id,
        }
    }
}

impl DomainEvent for GapEvent {
    fn event_type(&self) -> &str {
        match self {
            GapEvent::GapOpened { .. } => "GapOpened",
            GapEvent::StatusChanged { .. } => "StatusChanged",
            GapEvent::OutreachSent { .. } => "OutreachSent",
            GapEvent::ResponseReceived { .. } => "ResponseReceived",
            GapEvent::CandidateExcluded { .. } => "CandidateExcluded",
            GapEvent::AssignmentAccepted { .. } => "AssignmentAccepted",
            GapEvent::AssignmentCommitted { .. } => "AssignmentCommitted",
            GapEvent::LateReplyRejected { .. } => "LateReplyRejected",
            GapEvent::EscalationRaised { .. } => "EscalationRaised",
        }
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            GapEvent::GapOpened { occurred_at, .. }
            | GapEvent::StatusChanged { occurred_at, .. }
            | GapEvent::OutreachSent { occurred_at, .. }
            | GapEvent::ResponseReceived { occurred_at, .. }
            | GapEvent::CandidateExcluded { occurred_at, .. }
            | GapEvent::AssignmentAccepted { occurred_at, .. }
            | GapEvent::AssignmentCommitted { occurred_at, .. }
            | GapEvent::LateReplyRejected { occurred_at, .. }
            | GapEvent::EscalationRaised { occurred_at, .. } => *occurred_at,
        }
    }

    fn aggregate_id(&self) -> String {
        self.gap_id().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_metadata() {
        let now = Utc::now();
        let event = GapEvent::StatusChanged {
            gap_id: GapId::new("gap-7"),
            from: GapStatus::Open,
            to: GapStatus::OutreachSms,
            occurred_at: now,
        };
        assert_eq!(event.event_type(), "StatusChanged");
        assert_eq!(event.aggregate_id(), "gap-7");
        assert_eq!(event.occurred_at(), now);

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "status_changed");
        assert_eq!(json["to"], "OUTREACH_SMS");
    }
}
