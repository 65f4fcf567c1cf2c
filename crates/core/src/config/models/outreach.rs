use std::time::Duration;

use serde::{Deserialize, Serialize};

/// 指数退避参数
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffConfig {
    /// 最大尝试次数（包含第一次）
    pub max_attempts: u32,
    /// 基础退避间隔（毫秒）
    pub base_delay_ms: u64,
    /// 最大退避间隔（毫秒）
    pub max_delay_ms: u64,
    /// 指数退避倍数
    pub multiplier: f64,
    /// 随机抖动范围（0.0-1.0）
    pub jitter_factor: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            base_delay_ms: 500,
            max_delay_ms: 8_000,
            multiplier: 2.0,
            jitter_factor: 0.1,
        }
    }
}

impl BackoffConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.max_attempts == 0 {
            return Err(anyhow::anyhow!("最大尝试次数必须大于0"));
        }
        if self.base_delay_ms == 0 {
            return Err(anyhow::anyhow!("基础退避间隔必须大于0"));
        }
        if self.max_delay_ms < self.base_delay_ms {
            return Err(anyhow::anyhow!(
                "最大退避间隔 {}ms 不能小于基础间隔 {}ms",
                self.max_delay_ms,
                self.base_delay_ms
            ));
        }
        if self.multiplier < 1.0 {
            return Err(anyhow::anyhow!("退避倍数不能小于1.0"));
        }
        if !(0.0..=1.0).contains(&self.jitter_factor) {
            return Err(anyhow::anyhow!("抖动范围必须在0.0-1.0之间"));
        }
        Ok(())
    }

    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }
}

/// 外呼与回复接收参数
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutreachConfig {
    /// 单次发送的重试策略
    pub send: BackoffConfig,
    /// 主动拉取近期回复的对账间隔（秒）
    pub reconciliation_interval_seconds: u64,
    /// 对账窗口向前重叠的秒数，覆盖时钟偏差
    pub reconciliation_overlap_seconds: u64,
    /// 回复流断开后的重连延迟（秒）
    pub reconnect_delay_seconds: u64,
    /// 回复去重窗口大小
    pub reply_dedupe_capacity: usize,
    /// 同时处理中的入站回复上限
    pub max_inflight_replies: usize,
    /// 低于该置信度的意图视为无法判定
    pub min_intent_confidence: f64,
    /// 是否把外呼文案翻译为护理员偏好语言
    pub translate_messages: bool,
    /// 模板使用的默认语言
    pub default_language: String,
}

impl Default for OutreachConfig {
    fn default() -> Self {
        Self {
            send: BackoffConfig::default(),
            reconciliation_interval_seconds: 60,
            reconciliation_overlap_seconds: 30,
            reconnect_delay_seconds: 5,
            reply_dedupe_capacity: 10_000,
            max_inflight_replies: 64,
            min_intent_confidence: 0.75,
            translate_messages: false,
            default_language: "en".to_string(),
        }
    }
}

impl OutreachConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        self.send.validate()?;
        if self.reconciliation_interval_seconds == 0 {
            return Err(anyhow::anyhow!("回复对账间隔必须大于0"));
        }
        if self.reply_dedupe_capacity == 0 {
            return Err(anyhow::anyhow!("回复去重窗口必须大于0"));
        }
        if self.max_inflight_replies == 0 {
            return Err(anyhow::anyhow!("入站回复并发上限必须大于0"));
        }
        if !(0.0..=1.0).contains(&self.min_intent_confidence) {
            return Err(anyhow::anyhow!("意图置信度阈值必须在0.0-1.0之间"));
        }
        if self.default_language.trim().is_empty() {
            return Err(anyhow::anyhow!("默认语言不能为空"));
        }
        Ok(())
    }

    pub fn reconciliation_interval(&self) -> Duration {
        Duration::from_secs(self.reconciliation_interval_seconds)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_secs(self.reconnect_delay_seconds)
    }
}

/// Outbound message templates.
///
/// Placeholders: `{gap_id}`, `{date}`, `{start}`, `{end}`, `{caregiver}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MessageTemplates {
    pub sms_offer: String,
    pub call_script: String,
    pub confirmation: String,
    pub already_filled: String,
    pub ineligible: String,
}

impl Default for MessageTemplates {
    fn default() -> Self {
        Self {
            sms_offer: "Hi {caregiver}, an open shift is available on {date} from {start} to {end}. \
                        Reply YES to accept or NO to decline."
                .to_string(),
            call_script: "Hello {caregiver}. We have an open shift on {date} from {start} to {end}. \
                          Press 1 to accept or 2 to decline."
                .to_string(),
            confirmation: "Thank you {caregiver}! You are confirmed for the shift on {date} from {start} to {end}."
                .to_string(),
            already_filled: "Thank you for responding. The shift on {date} has already been filled, no action is needed."
                .to_string(),
            ineligible: "Thank you {caregiver}. We are unable to assign you the shift on {date}; our office will follow up."
                .to_string(),
        }
    }
}

impl MessageTemplates {
    pub fn validate(&self) -> anyhow::Result<()> {
        for (name, template) in [
            ("sms_offer", &self.sms_offer),
            ("call_script", &self.call_script),
            ("confirmation", &self.confirmation),
            ("already_filled", &self.already_filled),
            ("ineligible", &self.ineligible),
        ] {
            if template.trim().is_empty() {
                return Err(anyhow::anyhow!("消息模板 {} 不能为空", name));
            }
        }
        Ok(())
    }
}
