use std::time::Duration;

use serde::{Deserialize, Serialize};

/// 外部协作系统的连接参数
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IntegrationsConfig {
    /// 排班系统（system of record）REST 地址
    pub scheduling_base_url: String,
    /// 短信/语音网关 REST 地址
    pub gateway_base_url: String,
    /// 意图识别与翻译服务地址，未配置时使用关键词识别
    pub intent_service_url: Option<String>,
    /// 人工升级通知 webhook，未配置时写入日志
    pub escalation_webhook_url: Option<String>,
    /// 调用外部系统使用的 Bearer token
    pub api_token: Option<String>,
    pub request_timeout_seconds: u64,
    /// 轮询排班系统判断班次是否已被外部解决的间隔（秒）
    pub resolution_poll_interval_seconds: u64,
}

impl Default for IntegrationsConfig {
    fn default() -> Self {
        Self {
            scheduling_base_url: "http://localhost:8081/api".to_string(),
            gateway_base_url: "http://localhost:8082/api".to_string(),
            intent_service_url: None,
            escalation_webhook_url: None,
            api_token: None,
            request_timeout_seconds: 15,
            resolution_poll_interval_seconds: 30,
        }
    }
}

impl IntegrationsConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        for (name, url) in [
            ("scheduling_base_url", Some(&self.scheduling_base_url)),
            ("gateway_base_url", Some(&self.gateway_base_url)),
            ("intent_service_url", self.intent_service_url.as_ref()),
            ("escalation_webhook_url", self.escalation_webhook_url.as_ref()),
        ] {
            if let Some(url) = url {
                if !url.starts_with("http://") && !url.starts_with("https://") {
                    return Err(anyhow::anyhow!("{} 必须以http://或https://开头: {}", name, url));
                }
            }
        }
        if self.request_timeout_seconds == 0 {
            return Err(anyhow::anyhow!("请求超时时间必须大于0"));
        }
        if self.resolution_poll_interval_seconds == 0 {
            return Err(anyhow::anyhow!("外部解决轮询间隔必须大于0"));
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }

    pub fn resolution_poll_interval(&self) -> Duration {
        Duration::from_secs(self.resolution_poll_interval_seconds)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub enabled: bool,
    pub bind_address: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bind_address: "0.0.0.0:8080".to_string(),
        }
    }
}

impl ServerConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.bind_address.is_empty() {
            return Err(anyhow::anyhow!("绑定地址不能为空"));
        }
        if !self.bind_address.contains(':') {
            return Err(anyhow::anyhow!("绑定地址格式无效，应为 host:port"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    pub log_level: String,
    pub log_format: String,
    pub metrics_enabled: bool,
    pub metrics_bind_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: "pretty".to_string(),
            metrics_enabled: true,
            metrics_bind_address: "0.0.0.0:9090".to_string(),
        }
    }
}

impl ObservabilityConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.log_level.as_str()) {
            return Err(anyhow::anyhow!(
                "无效的日志级别: {}，有效值: {:?}",
                self.log_level,
                valid_levels
            ));
        }
        let valid_formats = ["json", "pretty"];
        if !valid_formats.contains(&self.log_format.as_str()) {
            return Err(anyhow::anyhow!(
                "无效的日志格式: {}，有效值: {:?}",
                self.log_format,
                valid_formats
            ));
        }
        if self.metrics_enabled && !self.metrics_bind_address.contains(':') {
            return Err(anyhow::anyhow!("指标监听地址格式无效，应为 host:port"));
        }
        Ok(())
    }
}
