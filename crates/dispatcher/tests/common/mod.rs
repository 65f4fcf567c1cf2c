#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use shiftfill_core::AppConfig;
use shiftfill_dispatcher::{Collaborators, DispatchContext, RouteOutcome};
use shiftfill_domain::{CallOutcome, CandidateCaregiver, EscalationKind, ShiftGap};
use shiftfill_testing_utils::{
    call_reply, phone_for, test_config, text_reply, CaregiverBuilder, MockEscalationNotifier,
    MockIntentClassifier, MockOutreachGateway, MockSchedulingSystem, TestEnv,
};

pub struct Harness {
    pub scheduling: MockSchedulingSystem,
    pub gateway: MockOutreachGateway,
    pub classifier: MockIntentClassifier,
    pub notifier: MockEscalationNotifier,
    pub ctx: Arc<DispatchContext>,
}

impl Harness {
    pub fn new(pool: Vec<CandidateCaregiver>) -> Self {
        Self::with_config(test_config(), pool)
    }

    pub fn with_config(config: AppConfig, pool: Vec<CandidateCaregiver>) -> Self {
        let scheduling = MockSchedulingSystem::with_pool(pool);
        let gateway = MockOutreachGateway::new();
        let classifier = MockIntentClassifier::new();
        let notifier = MockEscalationNotifier::new();
        let ctx = DispatchContext::new(
            config,
            Collaborators {
                scheduling: Arc::new(scheduling.clone()),
                gateway: Arc::new(gateway.clone()),
                classifier: Arc::new(classifier.clone()),
                notifier: Arc::new(notifier.clone()),
            },
        );
        Self {
            scheduling,
            gateway,
            classifier,
            notifier,
            ctx,
        }
    }

    /// SMS reply from the caregiver's phone
    pub async fn reply(&self, reply_id: &str, caregiver_id: &str, text: &str) -> RouteOutcome {
        self.ctx
            .correlator
            .route(text_reply(reply_id, &phone_for(caregiver_id), text))
            .await
    }

    /// Keypress result of a voice call
    pub async fn press(&self, reply_id: &str, caregiver_id: &str, outcome: CallOutcome) -> RouteOutcome {
        self.ctx
            .correlator
            .route(call_reply(reply_id, &phone_for(caregiver_id), outcome))
            .await
    }

    pub async fn wait_for_sms(&self, count: usize) {
        let gateway = self.gateway.clone();
        let reached = TestEnv::wait_for(
            move || {
                let gateway = gateway.clone();
                async move { gateway.sms_count() >= count }
            },
            Duration::from_secs(5),
        )
        .await;
        assert!(reached, "expected {} sms, got {}", count, self.gateway.sms_count());
    }

    pub async fn wait_for_calls(&self, count: usize) {
        let gateway = self.gateway.clone();
        let reached = TestEnv::wait_for(
            move || {
                let gateway = gateway.clone();
                async move { gateway.call_count() >= count }
            },
            Duration::from_secs(3600),
        )
        .await;
        assert!(reached, "expected {} calls, got {}", count, self.gateway.call_count());
    }

    pub async fn wait_for_notice(&self, kind: EscalationKind) {
        let notifier = self.notifier.clone();
        let reached = TestEnv::wait_for(
            move || {
                let notifier = notifier.clone();
                async move { notifier.count(kind) >= 1 }
            },
            Duration::from_secs(5),
        )
        .await;
        assert!(reached, "expected a {:?} notice, got {:?}", kind, self.notifier.kinds());
    }

    /// Wait until a text containing `needle` reaches the caregiver
    pub async fn wait_for_text(&self, caregiver_id: &str, needle: &str) {
        let gateway = self.gateway.clone();
        let phone = phone_for(caregiver_id);
        let wanted = needle.to_string();
        let reached = TestEnv::wait_for(
            move || {
                let gateway = gateway.clone();
                let phone = phone.clone();
                let wanted = wanted.clone();
                async move { gateway.sent_to(&phone).iter().any(|m| m.text.contains(&wanted)) }
            },
            Duration::from_secs(5),
        )
        .await;
        assert!(reached, "no text containing {:?} reached {}", needle, caregiver_id);
    }

    pub fn texts_to(&self, caregiver_id: &str) -> Vec<String> {
        self.gateway
            .sent_to(&phone_for(caregiver_id))
            .into_iter()
            .map(|m| m.text)
            .collect()
    }
}

/// Caregiver available for the whole gap with the given acceptance rate
pub fn caregiver(id: &str, gap: &ShiftGap, acceptance_rate: f64) -> CandidateCaregiver {
    CaregiverBuilder::new(id)
        .available_for(gap)
        .with_acceptance_rate(acceptance_rate)
        .build()
}
