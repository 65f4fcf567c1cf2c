//! 回复意图识别

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::warn;

use shiftfill_core::{DispatchResult, IntegrationsConfig};
use shiftfill_domain::{Intent, IntentClassification, IntentClassifier};

use crate::http::{HttpClient, Upstream};

const ACCEPT_WORDS: &[&str] = &[
    "yes", "y", "ok", "okay", "sure", "accept", "si", "sí", "oui", "是", "好", "可以",
];
const DECLINE_WORDS: &[&str] = &[
    "no", "n", "nope", "decline", "cant", "can't", "cannot", "busy", "non", "不", "不行",
];

/// 未配置识别服务时使用的关键词识别
///
/// 只看第一个词，命中给高置信度，否则判为无关回复。
#[derive(Debug, Clone, Default)]
pub struct KeywordIntentClassifier;

impl KeywordIntentClassifier {
    pub fn new() -> Self {
        Self
    }

    fn first_word(text: &str) -> String {
        text.trim()
            .split(|c: char| c.is_whitespace() || matches!(c, ',' | '.' | '!' | '?' | '，' | '。'))
            .find(|w| !w.is_empty())
            .unwrap_or_default()
            .to_lowercase()
    }
}

#[async_trait]
impl IntentClassifier for KeywordIntentClassifier {
    async fn classify(&self, text: &str) -> DispatchResult<IntentClassification> {
        let word = Self::first_word(text);
        let classification = if ACCEPT_WORDS.contains(&word.as_str()) {
            IntentClassification {
                intent: Intent::Accept,
                confidence: 0.9,
            }
        } else if DECLINE_WORDS.contains(&word.as_str()) {
            IntentClassification {
                intent: Intent::Decline,
                confidence: 0.9,
            }
        } else {
            IntentClassification {
                intent: Intent::Unrelated,
                confidence: 0.5,
            }
        };
        Ok(classification)
    }
}

#[derive(Debug, Serialize)]
struct ClassifyRequest<'a> {
    text: &'a str,
}

#[derive(Debug, Serialize)]
struct TranslateRequest<'a> {
    text: &'a str,
    target_language: &'a str,
}

#[derive(Debug, Deserialize)]
struct TranslateResponse {
    text: String,
}

/// 外部意图识别与翻译服务
///
/// 识别请求失败时退回关键词识别；翻译失败直接返回错误，由发送方使用原文。
#[derive(Debug, Clone)]
pub struct RestIntentClassifier {
    http: HttpClient,
    fallback: KeywordIntentClassifier,
}

impl RestIntentClassifier {
    pub fn new(base_url: &str, config: &IntegrationsConfig) -> DispatchResult<Self> {
        let http = HttpClient::new(
            base_url,
            config.api_token.clone(),
            config.request_timeout(),
            Upstream::Intent,
        )?;
        Ok(Self {
            http,
            fallback: KeywordIntentClassifier::new(),
        })
    }
}

#[async_trait]
impl IntentClassifier for RestIntentClassifier {
    async fn classify(&self, text: &str) -> DispatchResult<IntentClassification> {
        match self
            .http
            .post_json("classify", &ClassifyRequest { text })
            .await
        {
            Ok(classification) => Ok(classification),
            Err(e) => {
                warn!("意图识别服务不可用，使用关键词识别: {}", e);
                self.fallback.classify(text).await
            }
        }
    }

    async fn translate(&self, text: &str, target_language: &str) -> DispatchResult<String> {
        let response: TranslateResponse = self
            .http
            .post_json(
                "translate",
                &TranslateRequest {
                    text,
                    target_language,
                },
            )
            .await?;
        Ok(response.text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_keyword_classification() {
        let classifier = KeywordIntentClassifier::new();

        let result = classifier.classify("Yes, I can take it").await.unwrap();
        assert_eq!(result.intent, Intent::Accept);

        let result = classifier.classify("  no sorry").await.unwrap();
        assert_eq!(result.intent, Intent::Decline);

        let result = classifier.classify("what time is it?").await.unwrap();
        assert_eq!(result.intent, Intent::Unrelated);

        let result = classifier.classify("").await.unwrap();
        assert_eq!(result.intent, Intent::Unrelated);
    }

    #[tokio::test]
    async fn test_keyword_translate_is_identity() {
        let classifier = KeywordIntentClassifier::new();
        assert_eq!(
            classifier.translate("Shift available", "es").await.unwrap(),
            "Shift available"
        );
    }
}
