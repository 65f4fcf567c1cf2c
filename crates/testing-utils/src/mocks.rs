//! In-memory implementations of the collaborator ports
//!
//! Every mock is cheap to clone and shares its state, so a test can keep
//! one handle for assertions while the dispatcher owns another.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::{self, BoxStream, StreamExt};
use shiftfill_core::{DispatchError, DispatchResult};
use shiftfill_domain::{
    normalize_contact, Assignment, CandidateCaregiver, CaregiverId, Channel, DeliveryReceipt,
    EscalationKind, EscalationNotice, EscalationNotifier, ExternalResolution, GapId, Intent,
    IntentClassification, IntentClassifier, OutreachGateway, ReplyEvent, SchedulingSystem,
    ShiftGap,
};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast;

/// Turn a broadcast receiver into an endless stream that ends when the sender is dropped
fn broadcast_stream<T, F>(rx: broadcast::Receiver<T>, keep: F) -> BoxStream<'static, T>
where
    T: Clone + Send + 'static,
    F: Fn(&T) -> bool + Send + Sync + 'static,
{
    let keep = Arc::new(keep);
    stream::unfold(rx, move |mut rx| {
        let keep = keep.clone();
        async move {
            loop {
                match rx.recv().await {
                    Ok(item) if keep(&item) => return Some((item, rx)),
                    Ok(_) => continue,
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            }
        }
    })
    .boxed()
}

#[derive(Default)]
struct SchedulingState {
    open_gaps: Vec<ShiftGap>,
    pools: HashMap<GapId, Vec<CandidateCaregiver>>,
    default_pool: Vec<CandidateCaregiver>,
    pool_failures: VecDeque<DispatchError>,
    pool_calls: u32,
    ineligible: HashSet<CaregiverId>,
    eligibility_errors: HashSet<CaregiverId>,
    eligibility_delay: Option<Duration>,
    eligibility_checks: Vec<(CaregiverId, GapId)>,
    assignments: HashMap<GapId, CaregiverId>,
    commit_failures: VecDeque<DispatchError>,
    fail_after_write: u32,
    commit_calls: Vec<Assignment>,
    resolved: HashMap<GapId, ExternalResolution>,
}

/// Mock implementation of SchedulingSystem for testing
#[derive(Clone)]
pub struct MockSchedulingSystem {
    state: Arc<Mutex<SchedulingState>>,
    resolutions: broadcast::Sender<ExternalResolution>,
}

impl MockSchedulingSystem {
    pub fn new() -> Self {
        let (resolutions, _) = broadcast::channel(64);
        Self {
            state: Arc::new(Mutex::new(SchedulingState::default())),
            resolutions,
        }
    }

    /// Same candidate pool for every gap
    pub fn with_pool(pool: Vec<CandidateCaregiver>) -> Self {
        let mock = Self::new();
        mock.state.lock().unwrap().default_pool = pool;
        mock
    }

    pub fn set_pool(&self, gap_id: &GapId, pool: Vec<CandidateCaregiver>) {
        self.state.lock().unwrap().pools.insert(gap_id.clone(), pool);
    }

    pub fn add_open_gap(&self, gap: ShiftGap) {
        self.state.lock().unwrap().open_gaps.push(gap);
    }

    /// The next `count` pool reads fail with the given error
    pub fn fail_pool_reads(&self, count: usize, error: DispatchError) {
        let mut state = self.state.lock().unwrap();
        for _ in 0..count {
            state.pool_failures.push_back(error.clone());
        }
    }

    pub fn pool_calls(&self) -> u32 {
        self.state.lock().unwrap().pool_calls
    }

    pub fn mark_ineligible(&self, caregiver_id: &str) {
        self.state
            .lock()
            .unwrap()
            .ineligible
            .insert(CaregiverId::from(caregiver_id));
    }

    pub fn fail_eligibility_for(&self, caregiver_id: &str) {
        self.state
            .lock()
            .unwrap()
            .eligibility_errors
            .insert(CaregiverId::from(caregiver_id));
    }

    pub fn delay_eligibility(&self, delay: Duration) {
        self.state.lock().unwrap().eligibility_delay = Some(delay);
    }

    pub fn eligibility_checks(&self) -> Vec<(CaregiverId, GapId)> {
        self.state.lock().unwrap().eligibility_checks.clone()
    }

    /// The next `count` commits fail before anything is written
    pub fn fail_commits(&self, count: usize, error: DispatchError) {
        let mut state = self.state.lock().unwrap();
        for _ in 0..count {
            state.commit_failures.push_back(error.clone());
        }
    }

    /// The next `count` commits are written but report a transient error
    pub fn fail_after_write(&self, count: u32) {
        self.state.lock().unwrap().fail_after_write = count;
    }

    /// Pretend somebody assigned the gap outside the dispatcher
    pub fn assign_externally(&self, gap_id: &GapId, caregiver_id: &str) {
        self.state
            .lock()
            .unwrap()
            .assignments
            .insert(gap_id.clone(), CaregiverId::from(caregiver_id));
    }

    pub fn assignment_for(&self, gap_id: &GapId) -> Option<CaregiverId> {
        self.state.lock().unwrap().assignments.get(gap_id).cloned()
    }

    pub fn assignment_count(&self) -> usize {
        self.state.lock().unwrap().assignments.len()
    }

    pub fn commit_calls(&self) -> Vec<Assignment> {
        self.state.lock().unwrap().commit_calls.clone()
    }

    /// Publish an external resolution for the gap
    pub fn resolve_externally(&self, gap_id: &GapId, reason: &str) {
        let resolution = ExternalResolution {
            gap_id: gap_id.clone(),
            reason: reason.to_string(),
            resolved_at: Utc::now(),
        };
        self.state
            .lock()
            .unwrap()
            .resolved
            .insert(gap_id.clone(), resolution.clone());
        let _ = self.resolutions.send(resolution);
    }
}

impl Default for MockSchedulingSystem {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SchedulingSystem for MockSchedulingSystem {
    async fn list_open_gaps(&self) -> DispatchResult<Vec<ShiftGap>> {
        Ok(self.state.lock().unwrap().open_gaps.clone())
    }

    async fn get_candidate_pool(&self, gap: &ShiftGap) -> DispatchResult<Vec<CandidateCaregiver>> {
        let mut state = self.state.lock().unwrap();
        state.pool_calls += 1;
        if let Some(error) = state.pool_failures.pop_front() {
            return Err(error);
        }
        Ok(state
            .pools
            .get(&gap.id)
            .cloned()
            .unwrap_or_else(|| state.default_pool.clone()))
    }

    async fn is_candidate_still_eligible(
        &self,
        caregiver: &CandidateCaregiver,
        gap: &ShiftGap,
    ) -> DispatchResult<bool> {
        let delay = {
            let mut state = self.state.lock().unwrap();
            state
                .eligibility_checks
                .push((caregiver.id.clone(), gap.id.clone()));
            state.eligibility_delay
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let state = self.state.lock().unwrap();
        if state.eligibility_errors.contains(&caregiver.id) {
            return Err(DispatchError::scheduling("eligibility service unavailable"));
        }
        Ok(!state.ineligible.contains(&caregiver.id))
    }

    async fn current_assignment(&self, gap_id: &GapId) -> DispatchResult<Option<CaregiverId>> {
        Ok(self.state.lock().unwrap().assignments.get(gap_id).cloned())
    }

    async fn commit_assignment(&self, assignment: &Assignment) -> DispatchResult<()> {
        let mut state = self.state.lock().unwrap();
        state.commit_calls.push(assignment.clone());
        if let Some(error) = state.commit_failures.pop_front() {
            return Err(error);
        }

        if let Some(current) = state.assignments.get(&assignment.gap_id) {
            if current != &assignment.caregiver_id {
                return Err(DispatchError::CommitConflict {
                    gap_id: assignment.gap_id.to_string(),
                    assigned_to: current.to_string(),
                });
            }
        }
        state
            .assignments
            .insert(assignment.gap_id.clone(), assignment.caregiver_id.clone());

        if state.fail_after_write > 0 {
            state.fail_after_write -= 1;
            return Err(DispatchError::scheduling("connection reset after write"));
        }
        Ok(())
    }

    fn subscribe_to_external_resolution(
        &self,
        gap_id: &GapId,
    ) -> BoxStream<'static, ExternalResolution> {
        if let Some(resolution) = self.state.lock().unwrap().resolved.get(gap_id).cloned() {
            return stream::once(async move { resolution }).boxed();
        }
        let gap_id = gap_id.clone();
        broadcast_stream(self.resolutions.subscribe(), move |r: &ExternalResolution| {
            r.gap_id == gap_id
        })
    }
}

/// A message or call the gateway was asked to deliver
#[derive(Debug, Clone, PartialEq)]
pub struct SentMessage {
    pub contact: String,
    pub text: String,
    pub channel: Channel,
    pub sent_at: DateTime<Utc>,
}

#[derive(Default)]
struct GatewayState {
    sent: Vec<SentMessage>,
    failing: HashMap<String, DispatchError>,
    transient_failures: HashMap<String, u32>,
    recent: Vec<ReplyEvent>,
    fetch_calls: Vec<DateTime<Utc>>,
    next_id: u64,
}

/// Mock implementation of OutreachGateway for testing
#[derive(Clone)]
pub struct MockOutreachGateway {
    state: Arc<Mutex<GatewayState>>,
    inbound: Arc<Mutex<broadcast::Sender<ReplyEvent>>>,
}

impl MockOutreachGateway {
    pub fn new() -> Self {
        let (inbound, _) = broadcast::channel(256);
        Self {
            state: Arc::new(Mutex::new(GatewayState::default())),
            inbound: Arc::new(Mutex::new(inbound)),
        }
    }

    /// Every send to this contact fails with the given error
    pub fn fail_contact(&self, contact: &str, error: DispatchError) {
        self.state
            .lock()
            .unwrap()
            .failing
            .insert(normalize_contact(contact), error);
    }

    /// The next `count` sends to this contact fail with a transient error
    pub fn fail_contact_transiently(&self, contact: &str, count: u32) {
        self.state
            .lock()
            .unwrap()
            .transient_failures
            .insert(normalize_contact(contact), count);
    }

    /// Push a reply through the live stream and keep it for reconciliation
    pub fn deliver(&self, reply: ReplyEvent) {
        self.state.lock().unwrap().recent.push(reply.clone());
        let _ = self.inbound.lock().unwrap().send(reply);
    }

    /// Store a reply that only reconciliation will find
    pub fn deliver_while_disconnected(&self, reply: ReplyEvent) {
        self.state.lock().unwrap().recent.push(reply);
    }

    /// End every open inbound stream
    pub fn disconnect(&self) {
        let (fresh, _) = broadcast::channel(256);
        *self.inbound.lock().unwrap() = fresh;
    }

    pub fn subscriber_count(&self) -> usize {
        self.inbound.lock().unwrap().receiver_count()
    }

    pub fn sent(&self) -> Vec<SentMessage> {
        self.state.lock().unwrap().sent.clone()
    }

    pub fn sent_to(&self, contact: &str) -> Vec<SentMessage> {
        let contact = normalize_contact(contact);
        self.sent()
            .into_iter()
            .filter(|m| m.contact == contact)
            .collect()
    }

    pub fn sms_count(&self) -> usize {
        self.sent().iter().filter(|m| m.channel == Channel::Sms).count()
    }

    pub fn call_count(&self) -> usize {
        self.sent()
            .iter()
            .filter(|m| m.channel == Channel::Voice)
            .count()
    }

    pub fn fetch_calls(&self) -> Vec<DateTime<Utc>> {
        self.state.lock().unwrap().fetch_calls.clone()
    }

    fn record(&self, contact: &str, text: &str, channel: Channel) -> DispatchResult<DeliveryReceipt> {
        let contact = normalize_contact(contact);
        let mut state = self.state.lock().unwrap();
        if let Some(error) = state.failing.get(&contact) {
            return Err(error.clone());
        }
        if let Some(remaining) = state.transient_failures.get_mut(&contact) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(DispatchError::transient_gateway("429 too many requests"));
            }
        }

        state.next_id += 1;
        let provider_id = format!("msg-{}", state.next_id);
        state.sent.push(SentMessage {
            contact,
            text: text.to_string(),
            channel,
            sent_at: Utc::now(),
        });
        Ok(DeliveryReceipt {
            provider_id,
            accepted_at: Utc::now(),
        })
    }
}

impl Default for MockOutreachGateway {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl OutreachGateway for MockOutreachGateway {
    async fn send_message(&self, contact: &str, text: &str) -> DispatchResult<DeliveryReceipt> {
        self.record(contact, text, Channel::Sms)
    }

    async fn place_call(&self, contact: &str, script: &str) -> DispatchResult<DeliveryReceipt> {
        self.record(contact, script, Channel::Voice)
    }

    fn inbound_replies(&self) -> BoxStream<'static, ReplyEvent> {
        broadcast_stream(self.inbound.lock().unwrap().subscribe(), |_| true)
    }

    async fn fetch_recent_replies(&self, since: DateTime<Utc>) -> DispatchResult<Vec<ReplyEvent>> {
        let mut state = self.state.lock().unwrap();
        state.fetch_calls.push(since);
        Ok(state
            .recent
            .iter()
            .filter(|r| r.received_at >= since)
            .cloned()
            .collect())
    }
}

#[derive(Default)]
struct ClassifierState {
    overrides: HashMap<String, IntentClassification>,
    failing: bool,
    calls: Vec<String>,
}

/// Keyword based IntentClassifier with per-text overrides
#[derive(Clone, Default)]
pub struct MockIntentClassifier {
    state: Arc<Mutex<ClassifierState>>,
}

impl MockIntentClassifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_classification(&self, text: &str, intent: Intent, confidence: f64) {
        self.state.lock().unwrap().overrides.insert(
            text.trim().to_lowercase(),
            IntentClassification { intent, confidence },
        );
    }

    pub fn set_failing(&self, failing: bool) {
        self.state.lock().unwrap().failing = failing;
    }

    pub fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }
}

#[async_trait]
impl IntentClassifier for MockIntentClassifier {
    async fn classify(&self, text: &str) -> DispatchResult<IntentClassification> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(text.to_string());
        if state.failing {
            return Err(DispatchError::Network("classifier unreachable".to_string()));
        }

        let normalized = text.trim().to_lowercase();
        if let Some(classification) = state.overrides.get(&normalized) {
            return Ok(*classification);
        }

        let classification = match normalized.as_str() {
            "yes" | "y" | "ok" | "accept" | "i'll take it" => IntentClassification {
                intent: Intent::Accept,
                confidence: 0.95,
            },
            "no" | "n" | "decline" | "can't" => IntentClassification {
                intent: Intent::Decline,
                confidence: 0.95,
            },
            "maybe" => IntentClassification {
                intent: Intent::Accept,
                confidence: 0.4,
            },
            _ => IntentClassification {
                intent: Intent::Unrelated,
                confidence: 0.9,
            },
        };
        Ok(classification)
    }

    async fn translate(&self, text: &str, target_language: &str) -> DispatchResult<String> {
        Ok(format!("[{}] {}", target_language, text))
    }
}

#[derive(Default)]
struct NotifierState {
    notices: Vec<EscalationNotice>,
    failing: bool,
}

/// Mock implementation of EscalationNotifier that records every notice
#[derive(Clone, Default)]
pub struct MockEscalationNotifier {
    state: Arc<Mutex<NotifierState>>,
}

impl MockEscalationNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, failing: bool) {
        self.state.lock().unwrap().failing = failing;
    }

    pub fn notices(&self) -> Vec<EscalationNotice> {
        self.state.lock().unwrap().notices.clone()
    }

    pub fn kinds(&self) -> Vec<EscalationKind> {
        self.notices().iter().map(|n| n.kind).collect()
    }

    pub fn count(&self, kind: EscalationKind) -> usize {
        self.notices().iter().filter(|n| n.kind == kind).count()
    }
}

#[async_trait]
impl EscalationNotifier for MockEscalationNotifier {
    async fn notify(&self, notice: &EscalationNotice) -> DispatchResult<()> {
        let mut state = self.state.lock().unwrap();
        if state.failing {
            return Err(DispatchError::Network("pager unreachable".to_string()));
        }
        state.notices.push(notice.clone());
        Ok(())
    }
}
