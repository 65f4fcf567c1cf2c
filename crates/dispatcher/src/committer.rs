use std::sync::Arc;

use tracing::{error, info, warn};

use shiftfill_core::{CommitConfig, DispatchError};
use shiftfill_domain::{Assignment, CaregiverId, SchedulingSystem};

use crate::retry_service::RetryPolicy;

#[derive(Debug, Clone, PartialEq)]
pub enum CommitOutcome {
    Committed { attempts: u32 },
    /// 远端已记录同一人选（例如崩溃重启后的重复提交）
    AlreadyCommitted { attempts: u32 },
    /// 远端已记录其他人选，保留远端结果
    Conflict { assigned_to: CaregiverId, attempts: u32 },
    RetryableFailure { error: DispatchError, attempts: u32 },
    PermanentFailure { error: DispatchError, attempts: u32 },
}

impl CommitOutcome {
    /// 冲突视为成功：不覆盖远端
    pub fn is_success(&self) -> bool {
        matches!(
            self,
            CommitOutcome::Committed { .. }
                | CommitOutcome::AlreadyCommitted { .. }
                | CommitOutcome::Conflict { .. }
        )
    }

    pub fn attempts(&self) -> u32 {
        match self {
            CommitOutcome::Committed { attempts }
            | CommitOutcome::AlreadyCommitted { attempts }
            | CommitOutcome::Conflict { attempts, .. }
            | CommitOutcome::RetryableFailure { attempts, .. }
            | CommitOutcome::PermanentFailure { attempts, .. } => *attempts,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            CommitOutcome::Committed { .. } => "committed",
            CommitOutcome::AlreadyCommitted { .. } => "already_committed",
            CommitOutcome::Conflict { .. } => "conflict",
            CommitOutcome::RetryableFailure { .. } => "retryable_failure",
            CommitOutcome::PermanentFailure { .. } => "permanent_failure",
        }
    }
}

/// 分配回写
///
/// 以班次ID为键，写入前先读远端状态，重复提交不会产生第二条分配。
pub struct AssignmentCommitter {
    scheduling: Arc<dyn SchedulingSystem>,
    retry: RetryPolicy,
}

impl AssignmentCommitter {
    pub fn new(scheduling: Arc<dyn SchedulingSystem>, config: &CommitConfig) -> Self {
        Self {
            scheduling,
            retry: RetryPolicy::new(&config.backoff),
        }
    }

    /// 单次提交
    pub async fn commit(&self, assignment: &Assignment) -> CommitOutcome {
        match self.try_commit(assignment).await {
            Ok(outcome) => outcome,
            Err(error) if error.is_retryable() => CommitOutcome::RetryableFailure { error, attempts: 1 },
            Err(error) => CommitOutcome::PermanentFailure { error, attempts: 1 },
        }
    }

    /// 带退避重试的提交，只重试写入，不会触发新的外呼
    pub async fn commit_with_retry(&self, assignment: &Assignment) -> CommitOutcome {
        let label = format!("提交班次 {} 的分配", assignment.gap_id);
        let outcome = match self
            .retry
            .execute(&label, |_| self.try_commit(assignment))
            .await
        {
            Ok((outcome, attempts)) => match outcome {
                CommitOutcome::Committed { .. } => CommitOutcome::Committed { attempts },
                CommitOutcome::AlreadyCommitted { .. } => {
                    CommitOutcome::AlreadyCommitted { attempts }
                }
                CommitOutcome::Conflict { assigned_to, .. } => CommitOutcome::Conflict {
                    assigned_to,
                    attempts,
                },
                other => other,
            },
            Err(failure) if failure.error.is_retryable() => CommitOutcome::RetryableFailure {
                error: failure.error,
                attempts: failure.attempts,
            },
            Err(failure) => CommitOutcome::PermanentFailure {
                error: failure.error,
                attempts: failure.attempts,
            },
        };

        match &outcome {
            CommitOutcome::Committed { attempts } | CommitOutcome::AlreadyCommitted { attempts } => {
                info!(
                    gap_id = %assignment.gap_id,
                    caregiver_id = %assignment.caregiver_id,
                    attempts = attempts,
                    "分配已写入排班系统"
                );
            }
            CommitOutcome::Conflict { assigned_to, .. } => {
                warn!(
                    gap_id = %assignment.gap_id,
                    caregiver_id = %assignment.caregiver_id,
                    assigned_to = %assigned_to,
                    "排班系统已有其他人选，保留远端分配"
                );
            }
            CommitOutcome::RetryableFailure { error, attempts }
            | CommitOutcome::PermanentFailure { error, attempts } => {
                error!(
                    gap_id = %assignment.gap_id,
                    caregiver_id = %assignment.caregiver_id,
                    attempts = attempts,
                    "分配写入失败，班次保持待同步: {}",
                    error
                );
            }
        }
        outcome
    }

    async fn try_commit(&self, assignment: &Assignment) -> Result<CommitOutcome, DispatchError> {
        match self.scheduling.current_assignment(&assignment.gap_id).await? {
            Some(current) if current == assignment.caregiver_id => {
                return Ok(CommitOutcome::AlreadyCommitted { attempts: 1 });
            }
            Some(current) => {
                return Ok(CommitOutcome::Conflict {
                    assigned_to: current,
                    attempts: 1,
                });
            }
            None => {}
        }

        match self.scheduling.commit_assignment(assignment).await {
            Ok(()) => Ok(CommitOutcome::Committed { attempts: 1 }),
            Err(DispatchError::CommitConflict { assigned_to, .. }) => {
                let assigned_to = CaregiverId::new(assigned_to);
                if assigned_to == assignment.caregiver_id {
                    Ok(CommitOutcome::AlreadyCommitted { attempts: 1 })
                } else {
                    Ok(CommitOutcome::Conflict {
                        assigned_to,
                        attempts: 1,
                    })
                }
            }
            Err(e) => Err(e),
        }
    }
}
