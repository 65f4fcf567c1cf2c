//! 单个班次的调度状态机
//!
//! 每个空缺班次对应一个独立的 tokio 任务，独占该班次的全部可变状态。
//! 回复经由收件箱串行处理，因此“第一个有效接受者胜出”不需要任何跨班次的锁。
//!
//! 状态流转：`OPEN → OUTREACH_SMS → OUTREACH_VOICE → ESCALATED`，
//! 任一等待状态下都可能进入 `FILLED`（经过 `FILLED_PENDING_SYNC`）、`EXPIRED` 或 `CANCELLED`。

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::StreamExt;
use tokio::sync::{mpsc, watch};
use tokio::task::{JoinError, JoinHandle, JoinSet};
use tokio::time::{sleep_until, Instant};
use tracing::{debug, error, info, warn};

use shiftfill_core::{DispatchError, DispatchResult};
use shiftfill_domain::{
    Assignment, CandidateCaregiver, CaregiverId, Channel, EscalationKind, EscalationNotice,
    ExternalResolution, GapEvent, GapId, GapSnapshot, GapStatus, OutreachAttempt, ReplyBody,
    ReplyEvent, ResponseIntent, ShiftGap, SyncStatus,
};

use crate::committer::CommitOutcome;
use crate::context::DispatchContext;
use crate::correlator::InboundResponse;
use crate::matcher::RankedCandidate;
use crate::messages::MessageKind;

type ResolutionSignal = watch::Sender<Option<ExternalResolution>>;

/// 协调器结束时的结果
#[derive(Debug, Clone)]
pub struct GapOutcome {
    pub gap: ShiftGap,
    pub assignment: Option<Assignment>,
    pub attempts: Vec<OutreachAttempt>,
    pub history: Vec<GapEvent>,
    pub escalations: Vec<EscalationKind>,
    pub snapshot: GapSnapshot,
}

impl GapOutcome {
    pub fn status(&self) -> GapStatus {
        self.gap.status
    }
}

/// 协调器句柄，由调度服务持有
pub struct GapHandle {
    gap_id: GapId,
    resolution: Arc<ResolutionSignal>,
    snapshot: watch::Receiver<GapSnapshot>,
    join: JoinHandle<GapOutcome>,
}

impl GapHandle {
    pub fn gap_id(&self) -> &GapId {
        &self.gap_id
    }

    pub fn snapshot(&self) -> GapSnapshot {
        self.snapshot.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<GapSnapshot> {
        self.snapshot.clone()
    }

    /// 人工或外部解决，协调器在下一个挂起点取消
    pub fn resolve(&self, reason: impl Into<String>) {
        let resolution = ExternalResolution {
            gap_id: self.gap_id.clone(),
            reason: reason.into(),
            resolved_at: Utc::now(),
        };
        signal_resolution(&self.resolution, resolution);
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    pub fn abort(&self) {
        self.join.abort();
    }

    pub async fn wait(self) -> DispatchResult<GapOutcome> {
        self.join
            .await
            .map_err(|e| DispatchError::Internal(format!("班次 {} 协调器异常退出: {e}", self.gap_id)))
    }
}

fn signal_resolution(signal: &ResolutionSignal, resolution: ExternalResolution) {
    signal.send_if_modified(|current| {
        if current.is_none() {
            *current = Some(resolution);
            true
        } else {
            false
        }
    });
}

/// 协调器结束（包括被中止）时一并停止外部解决订阅
struct AbortOnDrop(JoinHandle<()>);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    SmsWait { deadline: Instant },
    VoiceDue { at: Instant },
    VoiceWait { deadline: Instant },
    Escalated,
}

impl Phase {
    fn deadline(&self) -> Option<Instant> {
        match self {
            Phase::SmsWait { deadline } | Phase::VoiceWait { deadline } => Some(*deadline),
            Phase::VoiceDue { at } => Some(*at),
            Phase::Idle | Phase::Escalated => None,
        }
    }
}

enum Flow {
    Continue,
    Accepted,
    Closed,
}

/// 等待外部解决信号；发送端释放后永远挂起
async fn next_resolution(
    rx: &mut watch::Receiver<Option<ExternalResolution>>,
) -> ExternalResolution {
    loop {
        let current = rx.borrow_and_update().clone();
        if let Some(resolution) = current {
            return resolution;
        }
        if rx.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

pub struct GapCoordinator {
    ctx: Arc<DispatchContext>,
    gap: ShiftGap,
    inbox: mpsc::Receiver<InboundResponse>,
    resolution: watch::Receiver<Option<ExternalResolution>>,
    snapshot_tx: watch::Sender<GapSnapshot>,
    _resolution_watcher: AbortOnDrop,
    opened_at: Instant,
    expires_at: Instant,
    escalate_at: Option<Instant>,
    phase: Phase,
    wave: u32,
    ranked: Vec<RankedCandidate>,
    sms_members: Vec<CaregiverId>,
    sms_started: Option<Instant>,
    wave_members: Vec<CaregiverId>,
    contacted: HashSet<CaregiverId>,
    declined: HashSet<CaregiverId>,
    unreachable: HashSet<CaregiverId>,
    excluded: HashSet<CaregiverId>,
    attempts: Vec<OutreachAttempt>,
    history: Vec<GapEvent>,
    escalations: Vec<EscalationKind>,
    assignment: Option<Assignment>,
    sends: JoinSet<OutreachAttempt>,
    notices: JoinSet<()>,
}

impl GapCoordinator {
    /// 注册回复路由、订阅外部解决信号并启动协调器任务
    pub async fn spawn(ctx: Arc<DispatchContext>, mut gap: ShiftGap) -> GapHandle {
        gap.status = GapStatus::Open;

        let (inbox_tx, inbox) = mpsc::channel(ctx.config.dispatch.inbox_capacity.max(1));
        ctx.correlator.register_gap(&gap, inbox_tx).await;

        let (snapshot_tx, snapshot_rx) = watch::channel(GapSnapshot::initial(&gap));
        let (resolution_tx, resolution_rx) = watch::channel(None);
        let resolution_tx = Arc::new(resolution_tx);

        let watcher = {
            let signal = resolution_tx.clone();
            let mut stream = ctx.scheduling.subscribe_to_external_resolution(&gap.id);
            tokio::spawn(async move {
                if let Some(resolution) = stream.next().await {
                    signal_resolution(&signal, resolution);
                }
            })
        };

        let now = Instant::now();
        let lead = chrono::Duration::from_std(ctx.config.dispatch.expiry_lead())
            .unwrap_or_else(|_| chrono::Duration::zero());
        let expires_at = now + until(gap.fillable_until(lead));
        let escalate_at = gap.escalation_deadline.map(|deadline| now + until(deadline));

        let gap_id = gap.id.clone();
        let coordinator = GapCoordinator {
            ctx,
            gap,
            inbox,
            resolution: resolution_rx,
            snapshot_tx,
            _resolution_watcher: AbortOnDrop(watcher),
            opened_at: now,
            expires_at,
            escalate_at,
            phase: Phase::Idle,
            wave: 0,
            ranked: Vec::new(),
            sms_members: Vec::new(),
            sms_started: None,
            wave_members: Vec::new(),
            contacted: HashSet::new(),
            declined: HashSet::new(),
            unreachable: HashSet::new(),
            excluded: HashSet::new(),
            attempts: Vec::new(),
            history: Vec::new(),
            escalations: Vec::new(),
            assignment: None,
            sends: JoinSet::new(),
            notices: JoinSet::new(),
        };

        GapHandle {
            gap_id,
            resolution: resolution_tx,
            snapshot: snapshot_rx,
            join: tokio::spawn(coordinator.run()),
        }
    }

    async fn run(mut self) -> GapOutcome {
        info!(
            gap_id = %self.gap.id,
            client_id = %self.gap.client_id,
            starts_at = %self.gap.starts_at(),
            "开始处理班次空缺"
        );
        self.ctx.metrics.record_gap_opened();

        if self.open().await {
            if let Flow::Accepted = self.wave_loop().await {
                self.commit().await;
            }
        }
        self.finish().await
    }

    /// OPEN：拉取候选池并排序，返回是否进入等待循环
    async fn open(&mut self) -> bool {
        if Instant::now() >= self.expires_at {
            self.expire().await;
            return false;
        }

        let fetch = {
            let scheduling = self.ctx.scheduling.clone();
            let retry = self.ctx.read_retry.clone();
            let gap = self.gap.clone();
            async move {
                retry
                    .execute("获取候选池", |_| scheduling.get_candidate_pool(&gap))
                    .await
            }
        };

        let pool = tokio::select! {
            biased;
            resolution = next_resolution(&mut self.resolution) => {
                self.cancel(resolution);
                return false;
            }
            _ = sleep_until(self.expires_at) => {
                self.expire().await;
                return false;
            }
            result = fetch => result,
        };

        let pool = match pool {
            Ok((pool, _)) => pool,
            Err(failure) => {
                error!(gap_id = %self.gap.id, "候选池获取失败: {}", failure.error);
                self.escalate(
                    EscalationKind::CandidatePoolUnavailable,
                    format!("候选池获取失败（{} 次尝试）: {}", failure.attempts, failure.error),
                )
                .await;
                return true;
            }
        };

        let history = self.ctx.history.snapshot();
        self.ranked = self.ctx.matcher.rank(&self.gap, &pool, &history);
        self.history.push(GapEvent::GapOpened {
            gap_id: self.gap.id.clone(),
            ranked_candidates: self.ranked.len(),
            occurred_at: Utc::now(),
        });

        if self.ranked.is_empty() {
            warn!(gap_id = %self.gap.id, pool = pool.len(), "没有符合条件的候选人，直接转人工");
            self.escalate(
                EscalationKind::NoEligibleCandidates,
                format!("候选池 {} 人中没有符合条件的护理员", pool.len()),
            )
            .await;
            return true;
        }

        self.start_sms_wave().await;
        true
    }

    async fn wave_loop(&mut self) -> Flow {
        loop {
            let timer = self.phase.deadline();
            let escalate_at = self
                .escalate_at
                .filter(|_| self.gap.status != GapStatus::Escalated);
            let fallback = self.expires_at;

            let flow = tokio::select! {
                biased;
                resolution = next_resolution(&mut self.resolution) => {
                    self.cancel(resolution);
                    Flow::Closed
                }
                _ = sleep_until(self.expires_at) => {
                    self.expire().await;
                    Flow::Closed
                }
                Some(response) = self.inbox.recv() => self.handle_response(response).await,
                Some(joined) = self.sends.join_next() => {
                    self.record_send(joined);
                    self.check_settled().await
                }
                _ = sleep_until(timer.unwrap_or(fallback)), if timer.is_some() => self.on_timer().await,
                _ = sleep_until(escalate_at.unwrap_or(fallback)), if escalate_at.is_some() => {
                    self.exhaust("已到达转人工截止时间").await
                }
            };

            match flow {
                Flow::Continue => continue,
                other => return other,
            }
        }
    }

    async fn start_sms_wave(&mut self) {
        let targets: Vec<CandidateCaregiver> = self
            .ranked
            .iter()
            .take(self.ctx.config.dispatch.top_k)
            .map(|r| r.caregiver.clone())
            .collect();
        self.sms_members = targets.iter().map(|c| c.id.clone()).collect();
        self.ctx.history.record_wave(&self.gap.id, &self.sms_members);

        self.transition(GapStatus::OutreachSms);
        let now = Instant::now();
        self.sms_started = Some(now);
        self.phase = Phase::SmsWait {
            deadline: now + self.ctx.config.dispatch.sms_wait(),
        };
        self.launch_wave(1, Channel::Sms, targets).await;
    }

    /// 同时向一批候选人发出外呼。回复路由在调用网关之前登记
    async fn launch_wave(&mut self, wave: u32, channel: Channel, targets: Vec<CandidateCaregiver>) {
        self.wave = wave;
        self.wave_members = targets.iter().map(|c| c.id.clone()).collect();
        self.unreachable.clear();
        self.excluded.clear();

        info!(
            gap_id = %self.gap.id,
            wave = wave,
            channel = channel.as_str(),
            targets = targets.len(),
            "发起外呼波次"
        );

        for caregiver in targets {
            self.ctx
                .correlator
                .expect_reply(
                    &self.gap.id,
                    &caregiver.id,
                    &caregiver.name,
                    &caregiver.preferred_language,
                    &caregiver.phone,
                )
                .await;
            self.contacted.insert(caregiver.id.clone());

            let text = self
                .ctx
                .renderer
                .render(MessageKind::offer_for(channel), &self.gap, &caregiver.name);
            let sender = self.ctx.sender.clone();
            let gap = self.gap.clone();
            self.sends.spawn(async move {
                sender.send(&caregiver, &gap, &text, channel, wave).await
            });
        }
        self.publish();
    }

    async fn on_timer(&mut self) -> Flow {
        match self.phase {
            Phase::SmsWait { .. } => self.end_sms_wave().await,
            Phase::VoiceDue { .. } => self.start_voice_wave().await,
            Phase::VoiceWait { .. } => self.exhaust("短信和语音两轮外呼均无人接受").await,
            Phase::Idle | Phase::Escalated => Flow::Continue,
        }
    }

    /// 短信等待结束（超时或全部拒绝/不可达）
    async fn end_sms_wave(&mut self) -> Flow {
        if self.voice_targets().is_empty() {
            return self.exhaust("短信波次中所有候选人均已拒绝").await;
        }

        self.transition(GapStatus::OutreachVoice);
        let now = Instant::now();
        let due = self
            .sms_started
            .map(|started| started + self.ctx.config.dispatch.voice_delay())
            .unwrap_or(now)
            .max(now);
        debug!(
            gap_id = %self.gap.id,
            delay_secs = (due - now).as_secs(),
            "语音外呼已排期"
        );
        self.phase = Phase::VoiceDue { at: due };
        Flow::Continue
    }

    async fn start_voice_wave(&mut self) -> Flow {
        let targets = self.voice_targets();
        if targets.is_empty() {
            return self.exhaust("短信波次中所有候选人均已拒绝").await;
        }
        self.phase = Phase::VoiceWait {
            deadline: Instant::now() + self.ctx.config.dispatch.voice_wait(),
        };
        self.launch_wave(2, Channel::Voice, targets).await;
        Flow::Continue
    }

    /// 首波中未拒绝的候选人（包括短信不可达的）
    fn voice_targets(&self) -> Vec<CandidateCaregiver> {
        self.sms_members
            .iter()
            .filter(|id| !self.declined.contains(*id))
            .filter_map(|id| self.caregiver(id).cloned())
            .collect()
    }

    async fn exhaust(&mut self, reason: &str) -> Flow {
        self.phase = Phase::Escalated;
        self.escalate(EscalationKind::OutreachExhausted, reason.to_string())
            .await;
        Flow::Continue
    }

    fn wave_settled(&self) -> bool {
        !self.wave_members.is_empty()
            && self.wave_members.iter().all(|id| {
                self.declined.contains(id)
                    || self.unreachable.contains(id)
                    || self.excluded.contains(id)
            })
    }

    async fn check_settled(&mut self) -> Flow {
        if !self.wave_settled() {
            return Flow::Continue;
        }
        match self.phase {
            Phase::SmsWait { .. } => {
                info!(gap_id = %self.gap.id, "短信波次所有候选人均已答复或不可达，提前结束");
                self.end_sms_wave().await
            }
            Phase::VoiceWait { .. } => {
                self.exhaust("语音波次所有候选人均已拒绝或不可达")
                    .await
            }
            _ => Flow::Continue,
        }
    }

    fn record_send(&mut self, joined: Result<OutreachAttempt, JoinError>) {
        match joined {
            Ok(attempt) => {
                self.ctx
                    .metrics
                    .record_outreach(attempt.channel, attempt.is_delivered());
                self.history.push(GapEvent::OutreachSent {
                    gap_id: self.gap.id.clone(),
                    attempt_id: attempt.id,
                    caregiver_id: attempt.caregiver_id.clone(),
                    channel: attempt.channel,
                    wave: attempt.wave,
                    delivered: attempt.is_delivered(),
                    occurred_at: attempt.sent_at,
                });
                if !attempt.is_delivered() && attempt.wave == self.wave {
                    self.unreachable.insert(attempt.caregiver_id.clone());
                }
                self.attempts.push(attempt);
                self.publish();
            }
            Err(e) if e.is_cancelled() => {
                debug!(gap_id = %self.gap.id, "外呼任务已取消");
            }
            Err(e) => {
                error!(gap_id = %self.gap.id, "外呼任务异常: {}", e);
            }
        }
    }

    async fn handle_response(&mut self, response: InboundResponse) -> Flow {
        let InboundResponse {
            reply,
            caregiver_id,
            intent,
            confidence,
        } = response;

        info!(
            gap_id = %self.gap.id,
            caregiver_id = %caregiver_id,
            channel = reply.channel().as_str(),
            intent = ?intent,
            confidence = confidence,
            "收到候选人回复"
        );
        self.history.push(GapEvent::ResponseReceived {
            gap_id: self.gap.id.clone(),
            caregiver_id: caregiver_id.clone(),
            reply_id: reply.id.clone(),
            channel: reply.channel(),
            intent,
            confidence,
            occurred_at: reply.received_at,
        });
        self.ctx.history.record_response(&caregiver_id, intent);

        if !self.contacted.contains(&caregiver_id) {
            warn!(gap_id = %self.gap.id, caregiver_id = %caregiver_id, "未联系过的护理员回复，忽略");
            return Flow::Continue;
        }

        match intent {
            ResponseIntent::Decline => {
                self.declined.insert(caregiver_id);
                self.publish();
                self.check_settled().await
            }
            ResponseIntent::Unrelated => Flow::Continue,
            ResponseIntent::Ambiguous => {
                self.notify_operator(
                    EscalationKind::AmbiguousReply,
                    format!(
                        "护理员 {} 的回复无法自动判定，需要人工确认: {}",
                        caregiver_id,
                        reply_summary(&reply)
                    ),
                )
                .await;
                Flow::Continue
            }
            ResponseIntent::Accept => self.handle_accept(reply, caregiver_id).await,
        }
    }

    /// 接受回复：重新校验资格后确定唯一人选
    async fn handle_accept(&mut self, reply: ReplyEvent, caregiver_id: CaregiverId) -> Flow {
        if self.excluded.contains(&caregiver_id) {
            info!(gap_id = %self.gap.id, caregiver_id = %caregiver_id, "本波次已排除的护理员，忽略接受");
            return Flow::Continue;
        }
        let Some(caregiver) = self.caregiver(&caregiver_id).cloned() else {
            warn!(gap_id = %self.gap.id, caregiver_id = %caregiver_id, "候选名单中找不到该护理员");
            return Flow::Continue;
        };

        let check = {
            let scheduling = self.ctx.scheduling.clone();
            let timeout = self.ctx.config.dispatch.eligibility_check_timeout();
            let gap = self.gap.clone();
            let caregiver = caregiver.clone();
            async move {
                tokio::time::timeout(
                    timeout,
                    scheduling.is_candidate_still_eligible(&caregiver, &gap),
                )
                .await
            }
        };

        let checked = tokio::select! {
            biased;
            resolution = next_resolution(&mut self.resolution) => {
                self.cancel(resolution);
                self.reject_late(&caregiver_id, &reply);
                return Flow::Closed;
            }
            _ = sleep_until(self.expires_at) => {
                self.expire().await;
                self.reject_late(&caregiver_id, &reply);
                return Flow::Closed;
            }
            result = check => result,
        };

        match checked {
            Ok(Ok(true)) => {}
            Ok(Ok(false)) => {
                info!(gap_id = %self.gap.id, caregiver_id = %caregiver_id, "护理员已不符合条件，本波次内排除");
                self.excluded.insert(caregiver_id.clone());
                self.history.push(GapEvent::CandidateExcluded {
                    gap_id: self.gap.id.clone(),
                    caregiver_id,
                    reason: "接受时已不符合条件".to_string(),
                    occurred_at: Utc::now(),
                });
                self.notify_caregiver(&caregiver, MessageKind::Ineligible);
                self.publish();
                return self.check_settled().await;
            }
            Ok(Err(e)) => {
                self.notify_operator(
                    EscalationKind::EligibilityCheckFailed,
                    format!("护理员 {} 接受了班次，但资格校验失败: {}", caregiver.id, e),
                )
                .await;
                return Flow::Continue;
            }
            Err(_) => {
                self.notify_operator(
                    EscalationKind::EligibilityCheckFailed,
                    format!("护理员 {} 接受了班次，但资格校验超时", caregiver.id),
                )
                .await;
                return Flow::Continue;
            }
        }

        self.sends.abort_all();
        self.phase = Phase::Idle;
        let assignment = Assignment {
            gap_id: self.gap.id.clone(),
            caregiver_id: caregiver.id.clone(),
            channel: reply.channel(),
            accepted_at: Utc::now(),
            reply_id: reply.id.clone(),
            sync_status: SyncStatus::Pending,
        };
        self.assignment = Some(assignment);
        self.history.push(GapEvent::AssignmentAccepted {
            gap_id: self.gap.id.clone(),
            caregiver_id: caregiver.id.clone(),
            reply_id: reply.id,
            occurred_at: Utc::now(),
        });
        self.transition(GapStatus::FilledPendingSync);
        self.ctx
            .metrics
            .record_time_to_fill(self.opened_at.elapsed().as_secs_f64());
        info!(gap_id = %self.gap.id, caregiver_id = %caregiver.id, "班次人选已确定");

        self.notify_caregiver(&caregiver, MessageKind::Confirmation);
        Flow::Accepted
    }

    /// FILLED_PENDING_SYNC：写回排班系统，同时答复迟到的接受者
    async fn commit(&mut self) {
        let Some(assignment) = self.assignment.clone() else {
            return;
        };

        let committer = self.ctx.committer.clone();
        let commit = async move { committer.commit_with_retry(&assignment).await };
        tokio::pin!(commit);

        let outcome = loop {
            tokio::select! {
                biased;
                outcome = &mut commit => break outcome,
                Some(response) = self.inbox.recv() => self.answer_late(response),
            }
        };

        self.apply_commit_outcome(outcome).await;
    }

    async fn apply_commit_outcome(&mut self, outcome: CommitOutcome) {
        self.ctx
            .metrics
            .record_commit_attempts(outcome.attempts(), outcome.is_success());

        let Some(assignment) = self.assignment.as_mut() else {
            return;
        };
        let caregiver_id = assignment.caregiver_id.clone();
        let mut operator_notice = None;

        match &outcome {
            CommitOutcome::Committed { attempts } | CommitOutcome::AlreadyCommitted { attempts } => {
                assignment.sync_status = SyncStatus::Synced {
                    at: Utc::now(),
                    attempts: *attempts,
                };
            }
            CommitOutcome::Conflict { assigned_to, .. } => {
                assignment.sync_status = SyncStatus::Conflict {
                    assigned_to: assigned_to.clone(),
                };
                operator_notice = Some((
                    EscalationKind::CommitConflict,
                    format!(
                        "护理员 {} 已确认接班，但排班系统已分配给 {}，需要人工通知护理员",
                        caregiver_id, assigned_to
                    ),
                ));
            }
            CommitOutcome::RetryableFailure { error, attempts }
            | CommitOutcome::PermanentFailure { error, attempts } => {
                assignment.sync_status = SyncStatus::Failed {
                    reason: error.to_string(),
                    attempts: *attempts,
                };
                operator_notice = Some((
                    EscalationKind::CommitSyncFailed,
                    format!(
                        "护理员 {} 已确认接班，写入排班系统失败（{} 次尝试）: {}",
                        caregiver_id, attempts, error
                    ),
                ));
            }
        }

        self.history.push(GapEvent::AssignmentCommitted {
            gap_id: self.gap.id.clone(),
            caregiver_id,
            outcome: outcome.label().to_string(),
            occurred_at: Utc::now(),
        });

        if outcome.is_success() {
            self.transition(GapStatus::Filled);
        } else {
            self.publish();
        }

        if let Some((kind, message)) = operator_notice {
            self.notify_operator(kind, message).await;
        }
    }

    fn cancel(&mut self, resolution: ExternalResolution) {
        info!(
            gap_id = %self.gap.id,
            reason = %resolution.reason,
            "班次已被外部解决，停止所有外呼"
        );
        self.sends.abort_all();
        self.phase = Phase::Idle;
        self.transition(GapStatus::Cancelled);
    }

    async fn expire(&mut self) {
        warn!(gap_id = %self.gap.id, "班次开始前未能补位，已过期");
        self.sends.abort_all();
        self.phase = Phase::Idle;
        self.transition(GapStatus::Expired);
        self.notify_operator(
            EscalationKind::GapExpired,
            format!("班次 {} 开始前未找到接班人", self.gap.id),
        )
        .await;
    }

    async fn escalate(&mut self, kind: EscalationKind, message: String) {
        self.phase = Phase::Escalated;
        self.transition(GapStatus::Escalated);
        self.notify_operator(kind, message).await;
    }

    /// 向人工值班发送带完整历史的通知，不改变状态
    async fn notify_operator(&mut self, kind: EscalationKind, message: String) {
        warn!(gap_id = %self.gap.id, kind = kind.as_str(), "{}", message);
        self.escalations.push(kind);
        self.ctx.metrics.record_escalation(kind);
        self.history.push(GapEvent::EscalationRaised {
            gap_id: self.gap.id.clone(),
            kind,
            occurred_at: Utc::now(),
        });
        self.publish();

        let notice = EscalationNotice {
            kind,
            gap: self.gap.clone(),
            status: self.gap.status,
            attempts: self.attempts.clone(),
            history: self.history.clone(),
            assignment: self.assignment.clone(),
            raised_at: Utc::now(),
            message,
        };
        let timeout = self.ctx.config.integrations.request_timeout();
        match tokio::time::timeout(timeout, self.ctx.notifier.notify(&notice)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!(gap_id = %self.gap.id, "人工升级通知发送失败: {}", e),
            Err(_) => error!(gap_id = %self.gap.id, "人工升级通知发送超时"),
        }
    }

    /// 班次已有人选或已关闭后收到的回复
    fn answer_late(&mut self, response: InboundResponse) {
        let winner = self.assignment.as_ref().map(|a| a.caregiver_id.clone());
        if response.intent != ResponseIntent::Accept || winner.as_ref() == Some(&response.caregiver_id) {
            debug!(
                gap_id = %self.gap.id,
                caregiver_id = %response.caregiver_id,
                intent = ?response.intent,
                "班次已关闭，忽略回复"
            );
            return;
        }
        self.reject_late(&response.caregiver_id, &response.reply);
    }

    fn reject_late(&mut self, caregiver_id: &CaregiverId, reply: &ReplyEvent) {
        info!(gap_id = %self.gap.id, caregiver_id = %caregiver_id, "接受回复来得太晚，回复已补满");
        self.history.push(GapEvent::LateReplyRejected {
            gap_id: self.gap.id.clone(),
            caregiver_id: caregiver_id.clone(),
            reply_id: reply.id.clone(),
            occurred_at: Utc::now(),
        });
        match self.caregiver(caregiver_id).cloned() {
            Some(caregiver) => self.notify_caregiver(&caregiver, MessageKind::AlreadyFilled),
            None => {
                let text = self.ctx.renderer.render(MessageKind::AlreadyFilled, &self.gap, "");
                let sender = self.ctx.sender.clone();
                let contact = reply.contact.clone();
                self.notices.spawn(async move {
                    sender.notify(&contact, &text, None).await;
                });
            }
        }
    }

    fn notify_caregiver(&mut self, caregiver: &CandidateCaregiver, kind: MessageKind) {
        let text = self.ctx.renderer.render(kind, &self.gap, &caregiver.name);
        let sender = self.ctx.sender.clone();
        let phone = caregiver.phone.clone();
        let language = caregiver.preferred_language.clone();
        self.notices.spawn(async move {
            sender.notify(&phone, &text, Some(&language)).await;
        });
    }

    fn caregiver(&self, id: &CaregiverId) -> Option<&CandidateCaregiver> {
        self.ranked
            .iter()
            .map(|r| &r.caregiver)
            .find(|c| &c.id == id)
    }

    fn transition(&mut self, next: GapStatus) -> bool {
        let from = self.gap.status;
        if from == next {
            return true;
        }
        if !from.can_transition_to(next) {
            warn!(gap_id = %self.gap.id, from = %from, to = %next, "忽略无效的状态转换");
            return false;
        }
        self.gap.status = next;
        info!(gap_id = %self.gap.id, from = %from, to = %next, "班次状态变更");
        self.history.push(GapEvent::StatusChanged {
            gap_id: self.gap.id.clone(),
            from,
            to: next,
            occurred_at: Utc::now(),
        });
        self.ctx.metrics.record_status_change(next);
        self.publish();
        true
    }

    fn snapshot(&self) -> GapSnapshot {
        GapSnapshot {
            gap_id: self.gap.id.clone(),
            client_id: self.gap.client_id.clone(),
            starts_at: self.gap.starts_at(),
            status: self.gap.status,
            wave: self.wave,
            ranked_candidates: self.ranked.iter().map(|r| r.caregiver.id.clone()).collect(),
            attempts: self.attempts.clone(),
            assignment: self.assignment.clone(),
            escalations: self.escalations.clone(),
            updated_at: Utc::now(),
        }
    }

    fn publish(&self) {
        self.snapshot_tx.send_replace(self.snapshot());
    }

    /// 关闭回复路由，答复收件箱里剩余的回复，等待通知发送完毕
    async fn finish(mut self) -> GapOutcome {
        self.ctx
            .correlator
            .close_gap(&self.gap.id, self.gap.status)
            .await;
        self.inbox.close();
        while let Ok(response) = self.inbox.try_recv() {
            self.answer_late(response);
        }

        self.sends.shutdown().await;
        while self.notices.join_next().await.is_some() {}

        self.ctx.metrics.record_gap_closed(self.gap.status);
        self.publish();
        info!(gap_id = %self.gap.id, status = %self.gap.status, "班次处理结束");

        GapOutcome {
            snapshot: self.snapshot(),
            gap: self.gap,
            assignment: self.assignment,
            attempts: self.attempts,
            history: self.history,
            escalations: self.escalations,
        }
    }
}

fn until(at: chrono::DateTime<Utc>) -> Duration {
    (at - Utc::now()).to_std().unwrap_or(Duration::ZERO)
}

fn reply_summary(reply: &ReplyEvent) -> String {
    match &reply.body {
        ReplyBody::Text { text } => format!("\"{}\"", text),
        ReplyBody::CallOutcome { outcome } => format!("{:?}", outcome),
    }
}
