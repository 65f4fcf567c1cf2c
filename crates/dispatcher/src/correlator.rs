use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info, warn};

use shiftfill_domain::{
    normalize_contact, CallOutcome, CaregiverId, GapId, GapStatus, Intent, IntentClassifier,
    ReplyBody, ReplyEvent, ResponseIntent, ShiftGap,
};

use crate::messages::{MessageKind, MessageRenderer};
use crate::metrics::DispatchMetrics;
use crate::outreach::OutreachSender;

/// 已关联到某个班次并完成意图判定的回复
#[derive(Debug, Clone)]
pub struct InboundResponse {
    pub reply: ReplyEvent,
    pub caregiver_id: CaregiverId,
    pub intent: ResponseIntent,
    pub confidence: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RouteOutcome {
    Forwarded { gap_id: GapId, intent: ResponseIntent },
    Duplicate,
    /// 对应班次已关闭，已回复“已补满”
    AnsweredAlreadyFilled { gap_id: GapId },
    /// 对应班次已关闭，非接受类回复只记录
    LateIgnored { gap_id: GapId },
    Unmatched,
}

impl RouteOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            RouteOutcome::Forwarded { .. } => "forwarded",
            RouteOutcome::Duplicate => "duplicate",
            RouteOutcome::AnsweredAlreadyFilled { .. } => "already_filled",
            RouteOutcome::LateIgnored { .. } => "late",
            RouteOutcome::Unmatched => "unmatched",
        }
    }
}

/// 关联结果：回复应归属的班次
#[derive(Debug, Clone, PartialEq)]
pub struct Correlation {
    pub gap_id: GapId,
    pub caregiver_id: CaregiverId,
    pub open: bool,
}

#[derive(Debug, Clone)]
struct Outstanding {
    gap_id: GapId,
    caregiver_id: CaregiverId,
    caregiver_name: String,
    language: String,
    contacted_at: DateTime<Utc>,
}

enum RouteState {
    Open(mpsc::Sender<InboundResponse>),
    Closed {
        status: GapStatus,
        closed_at: DateTime<Utc>,
    },
}

struct GapRoute {
    gap: ShiftGap,
    state: RouteState,
}

/// 固定容量的回复ID去重窗口
struct Deduper {
    order: VecDeque<String>,
    seen: HashSet<String>,
    capacity: usize,
}

impl Deduper {
    fn new(capacity: usize) -> Self {
        Self {
            order: VecDeque::with_capacity(capacity.min(1024)),
            seen: HashSet::new(),
            capacity: capacity.max(1),
        }
    }

    /// 首次出现返回 true
    fn insert(&mut self, id: &str) -> bool {
        if self.seen.contains(id) {
            return false;
        }
        if self.order.len() >= self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.seen.remove(&oldest);
            }
        }
        self.order.push_back(id.to_string());
        self.seen.insert(id.to_string());
        true
    }
}

#[derive(Default)]
struct Index {
    by_contact: HashMap<String, Vec<Outstanding>>,
    routes: HashMap<GapId, GapRoute>,
}

impl Index {
    fn correlate(&self, contact: &str) -> Option<(Correlation, &Outstanding)> {
        let entries = self.by_contact.get(contact)?;
        let is_open = |o: &Outstanding| {
            matches!(
                self.routes.get(&o.gap_id).map(|r| &r.state),
                Some(RouteState::Open(_))
            )
        };
        // 优先未关闭的班次，其次最近一次外呼
        let best = entries
            .iter()
            .max_by(|a, b| {
                is_open(a)
                    .cmp(&is_open(b))
                    .then(a.contacted_at.cmp(&b.contacted_at))
                    .then(b.gap_id.cmp(&a.gap_id))
            })?;
        Some((
            Correlation {
                gap_id: best.gap_id.clone(),
                caregiver_id: best.caregiver_id.clone(),
                open: is_open(best),
            },
            best,
        ))
    }
}

/// 回复关联器
///
/// 按联系方式和未结外呼把回复路由到对应班次的协调器收件箱。
/// 关闭的班次保留墓碑，迟到的接受回复会收到“已补满”通知。
pub struct ResponseCorrelator {
    index: RwLock<Index>,
    dedupe: tokio::sync::Mutex<Deduper>,
    classifier: Arc<dyn IntentClassifier>,
    sender: Arc<OutreachSender>,
    renderer: MessageRenderer,
    min_confidence: f64,
    metrics: Arc<DispatchMetrics>,
}

impl ResponseCorrelator {
    pub fn new(
        classifier: Arc<dyn IntentClassifier>,
        sender: Arc<OutreachSender>,
        renderer: MessageRenderer,
        min_confidence: f64,
        dedupe_capacity: usize,
        metrics: Arc<DispatchMetrics>,
    ) -> Self {
        Self {
            index: RwLock::new(Index::default()),
            dedupe: tokio::sync::Mutex::new(Deduper::new(dedupe_capacity)),
            classifier,
            sender,
            renderer,
            min_confidence,
            metrics,
        }
    }

    pub async fn register_gap(&self, gap: &ShiftGap, inbox: mpsc::Sender<InboundResponse>) {
        let mut index = self.index.write().await;
        index.routes.insert(
            gap.id.clone(),
            GapRoute {
                gap: gap.clone(),
                state: RouteState::Open(inbox),
            },
        );
    }

    /// 登记一次即将发出的外呼，必须在调用网关之前完成
    pub async fn expect_reply(
        &self,
        gap_id: &GapId,
        caregiver_id: &CaregiverId,
        caregiver_name: &str,
        language: &str,
        contact: &str,
    ) {
        let contact = normalize_contact(contact);
        let mut index = self.index.write().await;
        let entries = index.by_contact.entry(contact).or_default();
        let now = Utc::now();
        match entries
            .iter_mut()
            .find(|o| &o.gap_id == gap_id && &o.caregiver_id == caregiver_id)
        {
            Some(existing) => existing.contacted_at = now,
            None => entries.push(Outstanding {
                gap_id: gap_id.clone(),
                caregiver_id: caregiver_id.clone(),
                caregiver_name: caregiver_name.to_string(),
                language: language.to_string(),
                contacted_at: now,
            }),
        }
    }

    /// 班次关闭：停止转发，保留墓碑
    pub async fn close_gap(&self, gap_id: &GapId, status: GapStatus) {
        let mut index = self.index.write().await;
        if let Some(route) = index.routes.get_mut(gap_id) {
            route.state = RouteState::Closed {
                status,
                closed_at: Utc::now(),
            };
        }
    }

    /// 清理超过保留期的墓碑，返回清理数量
    pub async fn prune(&self, retention: Duration) -> usize {
        let retention = chrono::Duration::from_std(retention)
            .unwrap_or_else(|_| chrono::Duration::days(36_500));
        let now = Utc::now();
        let mut index = self.index.write().await;

        let expired: Vec<GapId> = index
            .routes
            .iter()
            .filter_map(|(id, route)| match route.state {
                RouteState::Closed { closed_at, .. } if now - closed_at >= retention => {
                    Some(id.clone())
                }
                _ => None,
            })
            .collect();

        for id in &expired {
            index.routes.remove(id);
        }
        index.by_contact.retain(|_, entries| {
            entries.retain(|o| !expired.contains(&o.gap_id));
            !entries.is_empty()
        });

        if !expired.is_empty() {
            debug!("清理了 {} 个已关闭班次的回复路由", expired.len());
        }
        expired.len()
    }

    pub async fn correlate(&self, reply: &ReplyEvent) -> Option<Correlation> {
        let contact = normalize_contact(&reply.contact);
        let index = self.index.read().await;
        index.correlate(&contact).map(|(c, _)| c)
    }

    /// 判定回复意图
    pub async fn classify(&self, reply: &ReplyEvent) -> (ResponseIntent, f64) {
        match &reply.body {
            ReplyBody::CallOutcome { outcome } => match outcome {
                CallOutcome::Accepted => (ResponseIntent::Accept, 1.0),
                CallOutcome::Declined => (ResponseIntent::Decline, 1.0),
                CallOutcome::NoAnswer | CallOutcome::Voicemail | CallOutcome::Failed => {
                    (ResponseIntent::Unrelated, 1.0)
                }
            },
            ReplyBody::Text { text } => match self.classifier.classify(text).await {
                Ok(classification) => {
                    let intent = match classification.intent {
                        Intent::Unrelated => ResponseIntent::Unrelated,
                        _ if classification.confidence < self.min_confidence => {
                            ResponseIntent::Ambiguous
                        }
                        Intent::Accept => ResponseIntent::Accept,
                        Intent::Decline => ResponseIntent::Decline,
                    };
                    (intent, classification.confidence)
                }
                Err(e) => {
                    warn!(reply_id = %reply.id, "意图识别失败，按无法判定处理: {}", e);
                    (ResponseIntent::Ambiguous, 0.0)
                }
            },
        }
    }

    /// 路由一条入站回复
    pub async fn route(&self, reply: ReplyEvent) -> RouteOutcome {
        let outcome = self.route_inner(reply).await;
        self.metrics.record_reply_routed(outcome.label());
        outcome
    }

    async fn route_inner(&self, reply: ReplyEvent) -> RouteOutcome {
        if !self.dedupe.lock().await.insert(&reply.id) {
            debug!(reply_id = %reply.id, "重复回复，忽略");
            return RouteOutcome::Duplicate;
        }

        let contact = normalize_contact(&reply.contact);
        let target = {
            let index = self.index.read().await;
            index.correlate(&contact).and_then(|(correlation, outstanding)| {
                let route = index.routes.get(&correlation.gap_id)?;
                let inbox = match &route.state {
                    RouteState::Open(tx) => Some(tx.clone()),
                    RouteState::Closed { .. } => None,
                };
                Some((correlation, outstanding.clone(), route.gap.clone(), inbox))
            })
        };

        let Some((correlation, outstanding, gap, inbox)) = target else {
            warn!(reply_id = %reply.id, contact = %contact, "回复无法关联到任何外呼");
            return RouteOutcome::Unmatched;
        };

        let (intent, confidence) = self.classify(&reply).await;
        let gap_id = correlation.gap_id.clone();

        if let Some(inbox) = inbox {
            let response = InboundResponse {
                reply,
                caregiver_id: correlation.caregiver_id.clone(),
                intent,
                confidence,
            };
            // 收件箱满时不阻塞其他班次的回复
            match inbox.try_send(response) {
                Ok(()) => {
                    debug!(gap_id = %gap_id, intent = ?intent, "回复已转发给班次协调器");
                    return RouteOutcome::Forwarded { gap_id, intent };
                }
                Err(mpsc::error::TrySendError::Full(response)) => {
                    warn!(gap_id = %gap_id, "协调器收件箱已满，异步投递回复");
                    let late = self.late_reply(&gap, &outstanding, &contact);
                    tokio::spawn(async move {
                        // 协调器在投递前结束时按迟到回复处理
                        if let Err(mpsc::error::SendError(response)) = inbox.send(response).await {
                            late.answer(response.intent, None).await;
                        }
                    });
                    return RouteOutcome::Forwarded { gap_id, intent };
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    debug!(gap_id = %gap_id, "协调器收件箱已关闭，按迟到回复处理");
                }
            }
        }

        let status = {
            let index = self.index.read().await;
            match index.routes.get(&gap_id).map(|r| &r.state) {
                Some(RouteState::Closed { status, .. }) => Some(*status),
                _ => None,
            }
        };
        let late = self.late_reply(&gap, &outstanding, &contact);
        if intent == ResponseIntent::Accept {
            // 通知在后台发送，网关重试不拖慢其他班次的回复
            tokio::spawn(async move { late.answer(intent, status).await });
            return RouteOutcome::AnsweredAlreadyFilled { gap_id };
        }
        late.answer(intent, status).await;
        RouteOutcome::LateIgnored { gap_id }
    }

    fn late_reply(&self, gap: &ShiftGap, outstanding: &Outstanding, contact: &str) -> LateReply {
        LateReply {
            sender: self.sender.clone(),
            gap_id: gap.id.clone(),
            caregiver_id: outstanding.caregiver_id.clone(),
            contact: contact.to_string(),
            language: outstanding.language.clone(),
            text: self
                .renderer
                .render(MessageKind::AlreadyFilled, gap, &outstanding.caregiver_name),
        }
    }
}

/// 班次已关闭后到达的回复：接受类回复“已补满”，其余只记录
struct LateReply {
    sender: Arc<OutreachSender>,
    gap_id: GapId,
    caregiver_id: CaregiverId,
    contact: String,
    language: String,
    text: String,
}

impl LateReply {
    async fn answer(self, intent: ResponseIntent, status: Option<GapStatus>) {
        if intent != ResponseIntent::Accept {
            info!(
                gap_id = %self.gap_id,
                caregiver_id = %self.caregiver_id,
                intent = ?intent,
                "班次已关闭，迟到回复不再处理"
            );
            return;
        }
        info!(
            gap_id = %self.gap_id,
            caregiver_id = %self.caregiver_id,
            status = ?status,
            "班次已关闭，回复已补满通知"
        );
        self.sender
            .notify(&self.contact, &self.text, Some(&self.language))
            .await;
    }
}
