use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::events::GapEvent;
use crate::value_objects::{CaregiverId, GapId, GeoPoint, TimeWindow};

/// 班次空缺状态
///
/// `FilledPendingSync` 是 FILLED 的过渡子状态：已确定人选，但排班系统尚未确认写入。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GapStatus {
    Open,
    OutreachSms,
    OutreachVoice,
    Escalated,
    FilledPendingSync,
    Filled,
    Expired,
    Cancelled,
}

impl GapStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            GapStatus::Filled | GapStatus::Expired | GapStatus::Cancelled
        )
    }

    /// 已经确定人选（无论是否已同步）
    pub fn is_filled(&self) -> bool {
        matches!(self, GapStatus::Filled | GapStatus::FilledPendingSync)
    }

    /// 该状态下接受的回复仍可能胜出
    pub fn accepts_replies(&self) -> bool {
        matches!(
            self,
            GapStatus::OutreachSms | GapStatus::OutreachVoice | GapStatus::Escalated
        )
    }

    pub fn can_transition_to(&self, next: GapStatus) -> bool {
        use GapStatus::*;
        match (self, next) {
            (Open, OutreachSms | Escalated | Cancelled | Expired) => true,
            (OutreachSms, OutreachVoice | FilledPendingSync | Escalated | Cancelled | Expired) => {
                true
            }
            (OutreachVoice, FilledPendingSync | Escalated | Cancelled | Expired) => true,
            (Escalated, FilledPendingSync | Cancelled | Expired) => true,
            (FilledPendingSync, Filled) => true,
            _ => false,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            GapStatus::Open => "OPEN",
            GapStatus::OutreachSms => "OUTREACH_SMS",
            GapStatus::OutreachVoice => "OUTREACH_VOICE",
            GapStatus::Escalated => "ESCALATED",
            GapStatus::FilledPendingSync => "FILLED_PENDING_SYNC",
            GapStatus::Filled => "FILLED",
            GapStatus::Expired => "EXPIRED",
            GapStatus::Cancelled => "CANCELLED",
        }
    }
}

impl std::fmt::Display for GapStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 空缺来源
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GapSource {
    /// 排班系统中本来就无人覆盖的班次
    Uncovered,
    /// 原定护理员请假
    CallOut { caregiver_id: CaregiverId },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShiftGap {
    pub id: GapId,
    pub client_id: String,
    pub window: TimeWindow,
    #[serde(default)]
    pub required_skills: Vec<String>,
    #[serde(default)]
    pub required_languages: Vec<String>,
    #[serde(default)]
    pub location: Option<GeoPoint>,
    pub status: GapStatus,
    pub created_at: DateTime<Utc>,
    /// 最晚转人工时间，早于波次计时器时提前升级
    #[serde(default)]
    pub escalation_deadline: Option<DateTime<Utc>>,
    pub source: GapSource,
}

impl ShiftGap {
    pub fn starts_at(&self) -> DateTime<Utc> {
        self.window.start
    }

    pub fn ends_at(&self) -> DateTime<Utc> {
        self.window.end
    }

    /// 超过该时间点班次不可再补位
    pub fn fillable_until(&self, lead: chrono::Duration) -> DateTime<Utc> {
        self.window.start - lead
    }

    pub fn is_expired(&self, now: DateTime<Utc>, lead: chrono::Duration) -> bool {
        now >= self.fillable_until(lead)
    }

    /// 请假的原护理员不能再被联系补同一个班
    pub fn called_out_caregiver(&self) -> Option<&CaregiverId> {
        match &self.source {
            GapSource::CallOut { caregiver_id } => Some(caregiver_id),
            GapSource::Uncovered => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateCaregiver {
    pub id: CaregiverId,
    pub name: String,
    /// 短信和语音共用的联系号码
    pub phone: String,
    pub preferred_language: String,
    #[serde(default)]
    pub languages: Vec<String>,
    #[serde(default)]
    pub skills: Vec<String>,
    #[serde(default)]
    pub availability: Vec<TimeWindow>,
    #[serde(default)]
    pub location: Option<GeoPoint>,
    /// 排班系统记录的历史接受率（0.0-1.0）
    pub acceptance_rate: f64,
}

impl CandidateCaregiver {
    pub fn speaks(&self, language: &str) -> bool {
        self.preferred_language.eq_ignore_ascii_case(language)
            || self.languages.iter().any(|l| l.eq_ignore_ascii_case(language))
    }

    pub fn has_skill(&self, skill: &str) -> bool {
        self.skills.iter().any(|s| s.eq_ignore_ascii_case(skill))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    Sms,
    Voice,
}

impl Channel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Sms => "sms",
            Channel::Voice => "voice",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum DeliveryStatus {
    Sent { provider_id: String },
    /// 重试耗尽或网关永久拒绝，本波次内不再联系
    Unreachable { reason: String, tries: u32 },
}

/// 一次外呼记录，写入后不再修改
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutreachAttempt {
    pub id: Uuid,
    pub gap_id: GapId,
    pub caregiver_id: CaregiverId,
    pub contact: String,
    pub channel: Channel,
    pub wave: u32,
    pub sent_at: DateTime<Utc>,
    pub status: DeliveryStatus,
}

impl OutreachAttempt {
    pub fn is_delivered(&self) -> bool {
        matches!(self.status, DeliveryStatus::Sent { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SyncStatus {
    Pending,
    Synced { at: DateTime<Utc>, attempts: u32 },
    /// 排班系统已显示其他人选，保留远端结果
    Conflict { assigned_to: CaregiverId },
    Failed { reason: String, attempts: u32 },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Assignment {
    pub gap_id: GapId,
    pub caregiver_id: CaregiverId,
    pub channel: Channel,
    pub accepted_at: DateTime<Utc>,
    pub reply_id: String,
    pub sync_status: SyncStatus,
}

impl Assignment {
    pub fn is_synced(&self) -> bool {
        matches!(
            self.sync_status,
            SyncStatus::Synced { .. } | SyncStatus::Conflict { .. }
        )
    }
}

/// 语音外呼的按键结果
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallOutcome {
    Accepted,
    Declined,
    NoAnswer,
    Voicemail,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ReplyBody {
    Text { text: String },
    CallOutcome { outcome: CallOutcome },
}

/// 网关上报的一条原始回复
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplyEvent {
    /// 网关侧消息ID，用于至少一次投递下的去重
    pub id: String,
    pub contact: String,
    pub body: ReplyBody,
    pub received_at: DateTime<Utc>,
}

impl ReplyEvent {
    pub fn channel(&self) -> Channel {
        match self.body {
            ReplyBody::Text { .. } => Channel::Sms,
            ReplyBody::CallOutcome { .. } => Channel::Voice,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    Accept,
    Decline,
    Unrelated,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct IntentClassification {
    pub intent: Intent,
    pub confidence: f64,
}

/// 关联器判定后的回复意图，`Ambiguous` 不会自动接受
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseIntent {
    Accept,
    Decline,
    Unrelated,
    Ambiguous,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EscalationKind {
    NoEligibleCandidates,
    OutreachExhausted,
    AmbiguousReply,
    CandidatePoolUnavailable,
    CommitSyncFailed,
    CommitConflict,
    GapExpired,
    EligibilityCheckFailed,
}

impl EscalationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EscalationKind::NoEligibleCandidates => "no_eligible_candidates",
            EscalationKind::OutreachExhausted => "outreach_exhausted",
            EscalationKind::AmbiguousReply => "ambiguous_reply",
            EscalationKind::CandidatePoolUnavailable => "candidate_pool_unavailable",
            EscalationKind::CommitSyncFailed => "commit_sync_failed",
            EscalationKind::CommitConflict => "commit_conflict",
            EscalationKind::GapExpired => "gap_expired",
            EscalationKind::EligibilityCheckFailed => "eligibility_check_failed",
        }
    }
}

/// 发给人工值班的结构化通知，附带完整的外呼和回复记录
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EscalationNotice {
    pub kind: EscalationKind,
    pub gap: ShiftGap,
    pub status: GapStatus,
    pub attempts: Vec<OutreachAttempt>,
    pub history: Vec<GapEvent>,
    pub assignment: Option<Assignment>,
    pub raised_at: DateTime<Utc>,
    pub message: String,
}

/// 单个班次的监控快照
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GapSnapshot {
    pub gap_id: GapId,
    pub client_id: String,
    pub starts_at: DateTime<Utc>,
    pub status: GapStatus,
    pub wave: u32,
    pub ranked_candidates: Vec<CaregiverId>,
    pub attempts: Vec<OutreachAttempt>,
    pub assignment: Option<Assignment>,
    pub escalations: Vec<EscalationKind>,
    pub updated_at: DateTime<Utc>,
}

impl GapSnapshot {
    pub fn initial(gap: &ShiftGap) -> Self {
        Self {
            gap_id: gap.id.clone(),
            client_id: gap.client_id.clone(),
            starts_at: gap.starts_at(),
            status: gap.status,
            wave: 0,
            ranked_candidates: Vec::new(),
            attempts: Vec::new(),
            assignment: None,
            escalations: Vec::new(),
            updated_at: Utc::now(),
        }
    }
}

/// 排班系统报告班次已由其他途径解决
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExternalResolution {
    pub gap_id: GapId,
    pub reason: String,
    pub resolved_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliveryReceipt {
    pub provider_id: String,
    pub accepted_at: DateTime<Utc>,
}
