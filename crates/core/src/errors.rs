use thiserror::Error;

/// 补位调度错误类型定义
#[derive(Debug, Error, Clone, PartialEq)]
pub enum DispatchError {
    #[error("外部网关暂时不可用: {0}")]
    TransientGateway(String),

    #[error("外部网关拒绝请求: {0}")]
    PermanentGateway(String),

    #[error("护理员 {caregiver_id} 已不符合班次 {gap_id} 的条件")]
    CandidateIneligible { gap_id: String, caregiver_id: String },

    #[error("班次 {gap_id} 没有符合条件的候选护理员")]
    NoEligibleCandidates { gap_id: String },

    #[error("班次 {gap_id} 在排班系统中已分配给 {assigned_to}")]
    CommitConflict { gap_id: String, assigned_to: String },

    #[error("班次 {gap_id} 已被外部系统解决: {reason}")]
    ExternalCancellation { gap_id: String, reason: String },

    #[error("无法判定回复意图: {0}")]
    AmbiguousReply(String),

    #[error("排班系统错误: {0}")]
    SchedulingSystem(String),

    #[error("排班系统拒绝写入: {0}")]
    CommitRejected(String),

    #[error("班次未找到: {id}")]
    GapNotFound { id: String },

    #[error("操作超时: {0}")]
    Timeout(String),

    #[error("网络错误: {0}")]
    Network(String),

    #[error("配置错误: {0}")]
    Configuration(String),

    #[error("序列化错误: {0}")]
    Serialization(String),

    #[error("内部错误: {0}")]
    Internal(String),
}

impl DispatchError {
    pub fn transient_gateway<S: Into<String>>(msg: S) -> Self {
        Self::TransientGateway(msg.into())
    }
    pub fn permanent_gateway<S: Into<String>>(msg: S) -> Self {
        Self::PermanentGateway(msg.into())
    }
    pub fn scheduling<S: Into<String>>(msg: S) -> Self {
        Self::SchedulingSystem(msg.into())
    }
    pub fn config_error<S: Into<String>>(msg: S) -> Self {
        Self::Configuration(msg.into())
    }

    /// 可以通过退避重试恢复的错误
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            DispatchError::TransientGateway(_)
                | DispatchError::SchedulingSystem(_)
                | DispatchError::Timeout(_)
                | DispatchError::Network(_)
        )
    }

    pub fn is_permanent(&self) -> bool {
        !self.is_retryable()
    }

    /// 错误分类标签，用于日志和指标
    pub fn kind(&self) -> &'static str {
        match self {
            DispatchError::TransientGateway(_) => "transient_gateway",
            DispatchError::PermanentGateway(_) => "permanent_gateway",
            DispatchError::CandidateIneligible { .. } => "candidate_ineligible",
            DispatchError::NoEligibleCandidates { .. } => "no_eligible_candidates",
            DispatchError::CommitConflict { .. } => "commit_conflict",
            DispatchError::ExternalCancellation { .. } => "external_cancellation",
            DispatchError::AmbiguousReply(_) => "ambiguous_reply",
            DispatchError::SchedulingSystem(_) => "scheduling_system",
            DispatchError::CommitRejected(_) => "commit_rejected",
            DispatchError::GapNotFound { .. } => "gap_not_found",
            DispatchError::Timeout(_) => "timeout",
            DispatchError::Network(_) => "network",
            DispatchError::Configuration(_) => "configuration",
            DispatchError::Serialization(_) => "serialization",
            DispatchError::Internal(_) => "internal",
        }
    }
}

impl From<serde_json::Error> for DispatchError {
    fn from(err: serde_json::Error) -> Self {
        DispatchError::Serialization(err.to_string())
    }
}

/// 统一的Result类型
pub type DispatchResult<T> = std::result::Result<T, DispatchError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(DispatchError::transient_gateway("429").is_retryable());
        assert!(DispatchError::scheduling("503").is_retryable());
        assert!(DispatchError::Timeout("commit".into()).is_retryable());
        assert!(DispatchError::permanent_gateway("invalid number").is_permanent());
        assert!(DispatchError::CommitRejected("400".into()).is_permanent());
        assert!(DispatchError::CommitConflict {
            gap_id: "g1".into(),
            assigned_to: "c9".into()
        }
        .is_permanent());
    }

    #[test]
    fn test_error_kind_labels() {
        let err = DispatchError::NoEligibleCandidates {
            gap_id: "g1".into(),
        };
        assert_eq!(err.kind(), "no_eligible_candidates");
        assert!(err.to_string().contains("g1"));
    }
}
