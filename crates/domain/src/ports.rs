//! 外部协作系统端口
//!
//! 排班系统、短信/语音网关、意图识别服务和人工升级通道都通过这些trait接入，
//! 调度核心只依赖抽象。

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use shiftfill_core::DispatchResult;

use crate::entities::{
    Assignment, CandidateCaregiver, DeliveryReceipt, EscalationNotice, ExternalResolution,
    IntentClassification, ReplyEvent, ShiftGap,
};
use crate::value_objects::{CaregiverId, GapId};

/// 排班系统（system of record）
#[async_trait]
pub trait SchedulingSystem: Send + Sync {
    async fn list_open_gaps(&self) -> DispatchResult<Vec<ShiftGap>>;

    async fn get_candidate_pool(&self, gap: &ShiftGap) -> DispatchResult<Vec<CandidateCaregiver>>;

    /// 接受前的二次校验：护理员是否已被排到冲突的班次
    async fn is_candidate_still_eligible(
        &self,
        caregiver: &CandidateCaregiver,
        gap: &ShiftGap,
    ) -> DispatchResult<bool>;

    /// 远端当前记录的人选，用于幂等提交
    async fn current_assignment(&self, gap_id: &GapId) -> DispatchResult<Option<CaregiverId>>;

    /// 以班次ID为幂等键写入分配
    async fn commit_assignment(&self, assignment: &Assignment) -> DispatchResult<()>;

    /// 班次被其他途径解决时产出一条记录，流结束表示不再有信号
    fn subscribe_to_external_resolution(
        &self,
        gap_id: &GapId,
    ) -> BoxStream<'static, ExternalResolution>;
}

/// 短信/语音网关
#[async_trait]
pub trait OutreachGateway: Send + Sync {
    async fn send_message(&self, contact: &str, text: &str) -> DispatchResult<DeliveryReceipt>;

    /// 发起外呼，按键结果通过入站回复流异步到达
    async fn place_call(&self, contact: &str, script: &str) -> DispatchResult<DeliveryReceipt>;

    /// 无限入站回复流。断线重连只从“现在”开始，不补发断线期间的回复
    fn inbound_replies(&self) -> BoxStream<'static, ReplyEvent>;

    /// 主动拉取 `since` 之后的回复，用于覆盖断线窗口
    async fn fetch_recent_replies(&self, since: DateTime<Utc>) -> DispatchResult<Vec<ReplyEvent>>;
}

/// 意图识别与翻译服务
#[async_trait]
pub trait IntentClassifier: Send + Sync {
    async fn classify(&self, text: &str) -> DispatchResult<IntentClassification>;

    async fn translate(&self, text: &str, _target_language: &str) -> DispatchResult<String> {
        Ok(text.to_string())
    }
}

/// 人工升级通道
#[async_trait]
pub trait EscalationNotifier: Send + Sync {
    async fn notify(&self, notice: &EscalationNotice) -> DispatchResult<()>;
}
