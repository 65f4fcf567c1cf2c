use anyhow::{Context, Result};
use config::{Config as ConfigBuilder, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::path::Path;

use super::{
    dispatch::{CommitConfig, DispatchConfig},
    integrations::{IntegrationsConfig, ObservabilityConfig, ServerConfig},
    matching::MatchingConfig,
    outreach::{MessageTemplates, OutreachConfig},
};

/// System configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub dispatch: DispatchConfig,
    pub matching: MatchingConfig,
    pub outreach: OutreachConfig,
    pub commit: CommitConfig,
    pub messages: MessageTemplates,
    pub integrations: IntegrationsConfig,
    pub server: ServerConfig,
    pub observability: ObservabilityConfig,
}

impl AppConfig {
    /// Load configuration from config file and environment variables
    ///
    /// Load order:
    /// 1. Default configuration
    /// 2. Config file (TOML format)
    /// 3. Environment variable overrides (prefix: SHIFTFILL__)
    ///
    /// Nested keys use a double underscore, e.g. `SHIFTFILL__DISPATCH__TOP_K=3`.
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let defaults = ConfigBuilder::try_from(&AppConfig::default()).context("构建默认配置失败")?;
        let mut builder = ConfigBuilder::builder().add_source(defaults);

        if let Some(path) = config_path {
            if Path::new(path).exists() {
                builder = builder.add_source(File::new(path, FileFormat::Toml));
            } else {
                return Err(anyhow::anyhow!("配置文件不存在: {}", path));
            }
        } else {
            let default_paths = [
                "config/shiftfill.toml",
                "shiftfill.toml",
                "/etc/shiftfill/config.toml",
            ];

            if let Some(path) = default_paths.iter().find(|p| Path::new(p).exists()) {
                builder = builder.add_source(File::new(path, FileFormat::Toml));
            }
        }

        builder = builder.add_source(
            Environment::with_prefix("SHIFTFILL")
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        let config: AppConfig = builder
            .build()
            .context("构建配置失败")?
            .try_deserialize()
            .context("反序列化配置失败")?;

        config.validate()?;

        Ok(config)
    }

    /// Load configuration from TOML string
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(toml_str).context("解析TOML配置失败")?;

        config.validate()?;
        Ok(config)
    }

    /// Serialize configuration to TOML string
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("序列化配置为TOML失败")
    }

    pub fn validate(&self) -> Result<()> {
        self.dispatch.validate().context("调度配置验证失败")?;
        self.matching.validate().context("匹配评分配置验证失败")?;
        self.outreach.validate().context("外呼配置验证失败")?;
        self.commit.validate().context("分配提交配置验证失败")?;
        self.messages.validate().context("消息模板配置验证失败")?;
        self.integrations
            .validate()
            .context("外部集成配置验证失败")?;
        self.server.validate().context("HTTP服务配置验证失败")?;
        self.observability
            .validate()
            .context("可观测性配置验证失败")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_config_is_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.dispatch.top_k, 5);
        assert_eq!(config.dispatch.sms_wait_seconds, 600);
        assert_eq!(config.commit.backoff.max_attempts, 6);
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let toml_str = r#"
[dispatch]
top_k = 3
sms_wait_seconds = 120

[integrations]
scheduling_base_url = "https://records.example.com/api"
"#;
        let config = AppConfig::from_toml(toml_str).unwrap();
        assert_eq!(config.dispatch.top_k, 3);
        assert_eq!(config.dispatch.sms_wait_seconds, 120);
        assert_eq!(config.dispatch.voice_wait_seconds, 900);
        assert_eq!(
            config.integrations.scheduling_base_url,
            "https://records.example.com/api"
        );
        assert_eq!(config.matching.skill_weight, 0.30);
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        let err = AppConfig::from_toml("[dispatch]\ntop_k = 0\n").unwrap_err();
        assert!(format!("{err:#}").contains("调度配置验证失败"));

        assert!(AppConfig::from_toml("[observability]\nlog_level = \"loud\"\n").is_err());
        assert!(AppConfig::from_toml(
            "[integrations]\nescalation_webhook_url = \"ftp://ops\"\n"
        )
        .is_err());
        assert!(AppConfig::from_toml("[outreach]\nmin_intent_confidence = 1.5\n").is_err());
    }

    #[test]
    fn test_toml_round_trip() {
        let config = AppConfig::default();
        let toml_str = config.to_toml().unwrap();
        let parsed = AppConfig::from_toml(&toml_str).unwrap();
        assert_eq!(parsed.dispatch.top_k, config.dispatch.top_k);
        assert_eq!(parsed.messages.sms_offer, config.messages.sms_offer);
    }

    #[test]
    fn test_load_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "[dispatch]\nvoice_delay_seconds = 300\n").unwrap();

        let config = AppConfig::load(file.path().to_str()).unwrap();
        assert_eq!(config.dispatch.voice_delay_seconds, 300);
        assert_eq!(config.dispatch.top_k, 5);
    }

    #[test]
    fn test_load_missing_file_fails() {
        assert!(AppConfig::load(Some("/nonexistent/shiftfill.toml")).is_err());
    }
}
