use std::sync::Arc;

use shiftfill_core::AppConfig;
use shiftfill_domain::{EscalationNotifier, IntentClassifier, OutreachGateway, SchedulingSystem};

use crate::committer::AssignmentCommitter;
use crate::correlator::ResponseCorrelator;
use crate::history::OutreachHistory;
use crate::matcher::CandidateMatcher;
use crate::messages::MessageRenderer;
use crate::metrics::DispatchMetrics;
use crate::outreach::OutreachSender;
use crate::retry_service::RetryPolicy;

/// 外部协作系统
#[derive(Clone)]
pub struct Collaborators {
    pub scheduling: Arc<dyn SchedulingSystem>,
    pub gateway: Arc<dyn OutreachGateway>,
    pub classifier: Arc<dyn IntentClassifier>,
    pub notifier: Arc<dyn EscalationNotifier>,
}

/// 所有班次协调器共享的只读服务
pub struct DispatchContext {
    pub config: AppConfig,
    pub scheduling: Arc<dyn SchedulingSystem>,
    pub gateway: Arc<dyn OutreachGateway>,
    pub notifier: Arc<dyn EscalationNotifier>,
    pub matcher: CandidateMatcher,
    pub history: OutreachHistory,
    pub correlator: Arc<ResponseCorrelator>,
    pub committer: Arc<AssignmentCommitter>,
    pub sender: Arc<OutreachSender>,
    pub renderer: MessageRenderer,
    /// 读取排班系统（候选池、空缺列表）的重试策略
    pub read_retry: RetryPolicy,
    pub metrics: Arc<DispatchMetrics>,
}

impl DispatchContext {
    pub fn new(config: AppConfig, collaborators: Collaborators) -> Arc<Self> {
        let metrics = Arc::new(DispatchMetrics::new());
        let renderer = MessageRenderer::new(config.messages.clone());
        let sender = Arc::new(OutreachSender::new(
            collaborators.gateway.clone(),
            collaborators.classifier.clone(),
            &config.outreach,
        ));
        let correlator = Arc::new(ResponseCorrelator::new(
            collaborators.classifier.clone(),
            sender.clone(),
            renderer.clone(),
            config.outreach.min_intent_confidence,
            config.outreach.reply_dedupe_capacity,
            metrics.clone(),
        ));
        let committer = Arc::new(AssignmentCommitter::new(
            collaborators.scheduling.clone(),
            &config.commit,
        ));

        Arc::new(Self {
            matcher: CandidateMatcher::new(config.matching.clone()),
            history: OutreachHistory::new(),
            read_retry: RetryPolicy::new(&config.outreach.send),
            scheduling: collaborators.scheduling,
            gateway: collaborators.gateway,
            notifier: collaborators.notifier,
            correlator,
            committer,
            sender,
            renderer,
            metrics,
            config,
        })
    }
}
