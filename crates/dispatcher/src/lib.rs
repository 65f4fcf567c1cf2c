//! 班次补位调度
//!
//! 候选人排序、分波次外呼、回复关联、分配回写，以及把它们串起来的
//! 单班次协调器和调度服务。

pub mod committer;
pub mod context;
pub mod coordinator;
pub mod correlator;
pub mod history;
pub mod matcher;
pub mod messages;
pub mod metrics;
pub mod outreach;
pub mod reply_listener;
pub mod retry_service;
pub mod supervisor;

pub use committer::{AssignmentCommitter, CommitOutcome};
pub use context::{Collaborators, DispatchContext};
pub use coordinator::{GapCoordinator, GapHandle, GapOutcome};
pub use correlator::{Correlation, InboundResponse, ResponseCorrelator, RouteOutcome};
pub use history::{CaregiverStats, HistorySnapshot, OutreachHistory};
pub use matcher::{CandidateMatcher, RankedCandidate, ScoreBreakdown};
pub use messages::{MessageKind, MessageRenderer};
pub use metrics::DispatchMetrics;
pub use outreach::OutreachSender;
pub use reply_listener::ReplyListener;
pub use retry_service::{RetryFailure, RetryPolicy};
pub use supervisor::{DispatchService, OpenOutcome};
