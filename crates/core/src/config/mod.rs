//! 配置管理
//!
//! 补位调度系统的全部运行参数。评分权重、外呼波次时长等都是运营调优值，
//! 统一通过配置文件和环境变量提供，不在代码中写死。
//!
//! 加载顺序：
//! 1. 各配置段的 `Default` 实现
//! 2. TOML 配置文件
//! 3. 环境变量覆盖（前缀 `SHIFTFILL`，层级分隔符 `__`）

pub mod models;

pub use models::{
    AppConfig, BackoffConfig, CommitConfig, DispatchConfig, IntegrationsConfig, MatchingConfig,
    MessageTemplates, ObservabilityConfig, OutreachConfig, ServerConfig,
};
