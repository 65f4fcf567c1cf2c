use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{broadcast, RwLock};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use shiftfill_core::{DispatchError, DispatchResult};
use shiftfill_domain::{
    EscalationKind, EscalationNotice, GapEvent, GapId, GapSnapshot, GapStatus, ReplyEvent,
    ShiftGap, SyncStatus,
};

use crate::committer::CommitOutcome;
use crate::context::DispatchContext;
use crate::coordinator::{GapCoordinator, GapHandle, GapOutcome};
use crate::correlator::RouteOutcome;
use crate::reply_listener::ReplyListener;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenOutcome {
    Started,
    AlreadyTracked,
    AtCapacity,
}

struct FinishedGap {
    outcome: GapOutcome,
    finished_at: DateTime<Utc>,
}

/// 补位调度服务
///
/// 为每个空缺班次启动一个协调器，周期性扫描排班系统中的新空缺，
/// 回收已结束的协调器，并重试写入失败的分配。
pub struct DispatchService {
    ctx: Arc<DispatchContext>,
    active: RwLock<HashMap<GapId, GapHandle>>,
    finished: RwLock<HashMap<GapId, FinishedGap>>,
    listener: Arc<ReplyListener>,
    running: Arc<RwLock<bool>>,
}

impl DispatchService {
    pub fn new(ctx: Arc<DispatchContext>) -> Self {
        let listener = Arc::new(ReplyListener::new(&ctx));
        Self {
            ctx,
            active: RwLock::new(HashMap::new()),
            finished: RwLock::new(HashMap::new()),
            listener,
            running: Arc::new(RwLock::new(false)),
        }
    }

    pub fn context(&self) -> &Arc<DispatchContext> {
        &self.ctx
    }

    pub fn listener(&self) -> &Arc<ReplyListener> {
        &self.listener
    }

    pub async fn is_running(&self) -> bool {
        *self.running.read().await
    }

    pub async fn active_count(&self) -> usize {
        self.active.read().await.len()
    }

    /// 为一个空缺班次启动协调器，同一班次不会重复启动
    pub async fn open_gap(&self, gap: ShiftGap) -> OpenOutcome {
        let mut active = self.active.write().await;
        if active.contains_key(&gap.id) || self.finished.read().await.contains_key(&gap.id) {
            debug!(gap_id = %gap.id, "班次已在处理中，跳过");
            return OpenOutcome::AlreadyTracked;
        }
        if active.len() >= self.ctx.config.dispatch.max_active_gaps {
            warn!(
                gap_id = %gap.id,
                active = active.len(),
                "并发处理的班次已达上限，暂不启动"
            );
            return OpenOutcome::AtCapacity;
        }

        let gap_id = gap.id.clone();
        let handle = GapCoordinator::spawn(self.ctx.clone(), gap).await;
        active.insert(gap_id, handle);
        self.ctx.metrics.set_active_gaps(active.len());
        OpenOutcome::Started
    }

    /// 拉取排班系统中的空缺班次并为新班次启动协调器
    pub async fn scan_open_gaps(&self) -> DispatchResult<usize> {
        let scheduling = self.ctx.scheduling.clone();
        let (gaps, _) = self
            .ctx
            .read_retry
            .execute("拉取空缺班次", |_| scheduling.list_open_gaps())
            .await
            .map_err(|failure| failure.error)?;

        let lead = chrono::Duration::from_std(self.ctx.config.dispatch.expiry_lead())
            .unwrap_or_else(|_| chrono::Duration::zero());
        let now = Utc::now();
        let mut started = 0;

        for gap in gaps {
            if gap.status.is_terminal() || gap.is_expired(now, lead) {
                debug!(gap_id = %gap.id, "班次已结束或已开始，跳过");
                continue;
            }
            if self.open_gap(gap).await == OpenOutcome::Started {
                started += 1;
            }
        }

        if started > 0 {
            info!("本次扫描启动了 {} 个班次的补位", started);
        }
        Ok(started)
    }

    pub async fn route_reply(&self, reply: ReplyEvent) -> RouteOutcome {
        self.ctx.correlator.route(reply).await
    }

    /// 人工解决班次，协调器停止外呼并进入 CANCELLED
    pub async fn resolve_gap(&self, gap_id: &GapId, reason: &str) -> DispatchResult<()> {
        if let Some(handle) = self.active.read().await.get(gap_id) {
            info!(gap_id = %gap_id, reason = reason, "收到人工解决请求");
            handle.resolve(reason);
            return Ok(());
        }
        if self.finished.read().await.contains_key(gap_id) {
            debug!(gap_id = %gap_id, "班次已结束，忽略解决请求");
            return Ok(());
        }
        Err(DispatchError::GapNotFound {
            id: gap_id.to_string(),
        })
    }

    pub async fn snapshot(&self, gap_id: &GapId) -> Option<GapSnapshot> {
        if let Some(handle) = self.active.read().await.get(gap_id) {
            return Some(handle.snapshot());
        }
        self.finished
            .read()
            .await
            .get(gap_id)
            .map(|f| f.outcome.snapshot.clone())
    }

    /// 所有班次的快照，按开始时间排序
    pub async fn snapshots(&self) -> Vec<GapSnapshot> {
        let mut snapshots: Vec<GapSnapshot> = {
            let active = self.active.read().await;
            active.values().map(|h| h.snapshot()).collect()
        };
        {
            let finished = self.finished.read().await;
            snapshots.extend(finished.values().map(|f| f.outcome.snapshot.clone()));
        }
        snapshots.sort_by(|a, b| {
            a.starts_at
                .cmp(&b.starts_at)
                .then_with(|| a.gap_id.cmp(&b.gap_id))
        });
        snapshots
    }

    /// 回收已结束的协调器，清理超过保留期的记录
    pub async fn reap_finished(&self) -> usize {
        let done: Vec<GapHandle> = {
            let mut active = self.active.write().await;
            let ids: Vec<GapId> = active
                .iter()
                .filter(|(_, handle)| handle.is_finished())
                .map(|(id, _)| id.clone())
                .collect();
            let done = ids.into_iter().filter_map(|id| active.remove(&id)).collect();
            self.ctx.metrics.set_active_gaps(active.len());
            done
        };

        let reaped = done.len();
        for handle in done {
            let gap_id = handle.gap_id().clone();
            match handle.wait().await {
                Ok(outcome) => {
                    debug!(gap_id = %gap_id, status = %outcome.status(), "回收班次协调器");
                    self.finished.write().await.insert(
                        gap_id,
                        FinishedGap {
                            outcome,
                            finished_at: Utc::now(),
                        },
                    );
                }
                Err(e) => error!(gap_id = %gap_id, "{}", e),
            }
        }

        let retention = self.ctx.config.dispatch.closed_gap_retention();
        let horizon = chrono::Duration::from_std(retention)
            .unwrap_or_else(|_| chrono::Duration::days(36_500));
        let now = Utc::now();
        // 待同步的分配保留到写入成功为止
        self.finished.write().await.retain(|_, f| {
            f.outcome.gap.status == GapStatus::FilledPendingSync || now - f.finished_at < horizon
        });
        self.ctx.correlator.prune(retention).await;
        reaped
    }

    /// 重试写入待同步的分配，返回成功同步的数量
    pub async fn sweep_pending_sync(&self) -> usize {
        let pending: Vec<_> = {
            let finished = self.finished.read().await;
            finished
                .values()
                .filter(|f| f.outcome.gap.status == GapStatus::FilledPendingSync)
                .filter_map(|f| f.outcome.assignment.clone())
                .collect()
        };
        if pending.is_empty() {
            return 0;
        }
        debug!("重试 {} 个待同步的分配", pending.len());

        let mut synced = 0;
        for assignment in pending {
            let outcome = self.ctx.committer.commit(&assignment).await;
            self.ctx
                .metrics
                .record_commit_attempts(outcome.attempts(), outcome.is_success());
            if !outcome.is_success() {
                warn!(gap_id = %assignment.gap_id, outcome = outcome.label(), "分配仍未能写入排班系统");
                continue;
            }

            let sync_status = match &outcome {
                CommitOutcome::Conflict { assigned_to, .. } => SyncStatus::Conflict {
                    assigned_to: assigned_to.clone(),
                },
                _ => SyncStatus::Synced {
                    at: Utc::now(),
                    attempts: outcome.attempts(),
                },
            };

            let notice = {
                let mut finished = self.finished.write().await;
                let Some(entry) = finished.get_mut(&assignment.gap_id) else {
                    continue;
                };
                mark_filled(&mut entry.outcome, sync_status, &outcome);
                match &outcome {
                    CommitOutcome::Conflict { assigned_to, .. } => Some(EscalationNotice {
                        kind: EscalationKind::CommitConflict,
                        gap: entry.outcome.gap.clone(),
                        status: entry.outcome.gap.status,
                        attempts: entry.outcome.attempts.clone(),
                        history: entry.outcome.history.clone(),
                        assignment: entry.outcome.assignment.clone(),
                        raised_at: Utc::now(),
                        message: format!(
                            "护理员 {} 已确认接班，但排班系统已分配给 {}，需要人工通知护理员",
                            assignment.caregiver_id, assigned_to
                        ),
                    }),
                    _ => None,
                }
            };

            info!(gap_id = %assignment.gap_id, "待同步的分配已写入排班系统");
            synced += 1;

            if let Some(notice) = notice {
                self.ctx.metrics.record_escalation(notice.kind);
                if let Err(e) = self.ctx.notifier.notify(&notice).await {
                    error!(gap_id = %assignment.gap_id, "人工升级通知发送失败: {}", e);
                }
            }
        }
        synced
    }

    /// 主循环：启动回复监听，定时扫描空缺、回收协调器、重试待同步分配
    pub async fn run(self: Arc<Self>, mut shutdown: broadcast::Receiver<()>) {
        *self.running.write().await = true;
        info!("补位调度服务已启动");

        let listener = {
            let listener = self.listener.clone();
            let shutdown = shutdown.resubscribe();
            tokio::spawn(async move { listener.run(shutdown).await })
        };

        let mut scan = interval(self.ctx.config.dispatch.gap_scan_interval());
        scan.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut sweep = interval(self.ctx.config.dispatch.pending_sync_sweep_interval());
        sweep.set_missed_tick_behavior(MissedTickBehavior::Skip);
        sweep.tick().await;

        loop {
            tokio::select! {
                _ = shutdown.recv() => break,
                _ = scan.tick() => {
                    if let Err(e) = self.scan_open_gaps().await {
                        error!("扫描空缺班次失败: {}", e);
                    }
                    self.reap_finished().await;
                }
                _ = sweep.tick() => {
                    self.sweep_pending_sync().await;
                }
            }
        }

        self.stop().await;
        if let Err(e) = listener.await {
            error!("回复监听任务异常退出: {}", e);
        }
        info!("补位调度服务已停止");
    }

    /// 中止所有进行中的协调器
    pub async fn stop(&self) {
        *self.running.write().await = false;
        let active = self.active.read().await;
        for handle in active.values() {
            handle.abort();
        }
        if !active.is_empty() {
            warn!("停止时仍有 {} 个班次在处理中", active.len());
        }
    }
}

fn mark_filled(outcome: &mut GapOutcome, sync_status: SyncStatus, commit: &CommitOutcome) {
    let now = Utc::now();
    let from = outcome.gap.status;
    outcome.gap.status = GapStatus::Filled;
    if let Some(assignment) = outcome.assignment.as_mut() {
        assignment.sync_status = sync_status;
        outcome.history.push(GapEvent::AssignmentCommitted {
            gap_id: outcome.gap.id.clone(),
            caregiver_id: assignment.caregiver_id.clone(),
            outcome: commit.label().to_string(),
            occurred_at: now,
        });
    }
    outcome.history.push(GapEvent::StatusChanged {
        gap_id: outcome.gap.id.clone(),
        from,
        to: GapStatus::Filled,
        occurred_at: now,
    });
    outcome.snapshot.status = GapStatus::Filled;
    outcome.snapshot.assignment = outcome.assignment.clone();
    outcome.snapshot.updated_at = now;
}
