use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use shiftfill_core::{BackoffConfig, OutreachConfig};
use shiftfill_domain::{
    normalize_contact, CandidateCaregiver, Channel, DeliveryStatus, IntentClassifier,
    OutreachAttempt, OutreachGateway, ShiftGap,
};

use crate::retry_service::RetryPolicy;

/// 外呼发送
///
/// 网关的瞬时错误按退避重试；重试耗尽或永久错误时返回 `Unreachable` 记录，不向上抛错。
pub struct OutreachSender {
    gateway: Arc<dyn OutreachGateway>,
    translator: Arc<dyn IntentClassifier>,
    retry: RetryPolicy,
    translate_messages: bool,
    default_language: String,
}

impl OutreachSender {
    pub fn new(
        gateway: Arc<dyn OutreachGateway>,
        translator: Arc<dyn IntentClassifier>,
        config: &OutreachConfig,
    ) -> Self {
        Self {
            gateway,
            translator,
            retry: RetryPolicy::new(&config.send),
            translate_messages: config.translate_messages,
            default_language: config.default_language.clone(),
        }
    }

    pub fn with_backoff(mut self, backoff: &BackoffConfig) -> Self {
        self.retry = RetryPolicy::new(backoff);
        self
    }

    /// 向候选人发出一次外呼（短信或语音），返回不可变的外呼记录
    pub async fn send(
        &self,
        caregiver: &CandidateCaregiver,
        gap: &ShiftGap,
        message: &str,
        channel: Channel,
        wave: u32,
    ) -> OutreachAttempt {
        let text = self.localize(message, &caregiver.preferred_language).await;
        let label = format!("{} 外呼 {} -> {}", channel.as_str(), gap.id, caregiver.id);

        let result = self
            .retry
            .execute(&label, |_| {
                let text = text.as_str();
                async move {
                    match channel {
                        Channel::Sms => self.gateway.send_message(&caregiver.phone, text).await,
                        Channel::Voice => self.gateway.place_call(&caregiver.phone, text).await,
                    }
                }
            })
            .await;

        let status = match result {
            Ok((receipt, tries)) => {
                info!(
                    gap_id = %gap.id,
                    caregiver_id = %caregiver.id,
                    channel = channel.as_str(),
                    wave = wave,
                    tries = tries,
                    "外呼已发送"
                );
                DeliveryStatus::Sent {
                    provider_id: receipt.provider_id,
                }
            }
            Err(failure) => {
                error!(
                    gap_id = %gap.id,
                    caregiver_id = %caregiver.id,
                    channel = channel.as_str(),
                    wave = wave,
                    tries = failure.attempts,
                    "外呼失败，本波次内标记为不可达: {}",
                    failure.error
                );
                DeliveryStatus::Unreachable {
                    reason: failure.error.to_string(),
                    tries: failure.attempts,
                }
            }
        };

        OutreachAttempt {
            id: Uuid::new_v4(),
            gap_id: gap.id.clone(),
            caregiver_id: caregiver.id.clone(),
            contact: normalize_contact(&caregiver.phone),
            channel,
            wave,
            sent_at: Utc::now(),
            status,
        }
    }

    /// 发送非外呼类通知（确认、已补满、资格不符），失败只记录日志
    pub async fn notify(&self, contact: &str, text: &str, language: Option<&str>) -> bool {
        let text = match language {
            Some(language) => self.localize(text, language).await,
            None => text.to_string(),
        };
        let result = self
            .retry
            .execute("通知短信", |_| {
                let text = text.as_str();
                async move { self.gateway.send_message(contact, text).await }
            })
            .await;

        match result {
            Ok(_) => {
                debug!(contact = contact, "通知已发送");
                true
            }
            Err(failure) => {
                warn!(
                    contact = contact,
                    tries = failure.attempts,
                    "通知发送失败: {}",
                    failure.error
                );
                false
            }
        }
    }

    async fn localize(&self, text: &str, language: &str) -> String {
        if !self.translate_messages || language.eq_ignore_ascii_case(&self.default_language) {
            return text.to_string();
        }
        match self.translator.translate(text, language).await {
            Ok(translated) if !translated.trim().is_empty() => translated,
            Ok(_) => text.to_string(),
            Err(e) => {
                warn!(language = language, "翻译失败，使用原文: {}", e);
                text.to_string()
            }
        }
    }
}
