use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::outreach::BackoffConfig;

/// 单个班次调度状态机的时序参数
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// 第一波短信同时触达的候选人数量
    pub top_k: usize,
    /// 短信波次等待窗口（秒）
    pub sms_wait_seconds: u64,
    /// 从短信波次开始到发起语音外呼的延迟（秒）
    pub voice_delay_seconds: u64,
    /// 语音波次等待窗口（秒）
    pub voice_wait_seconds: u64,
    /// 轮询排班系统空缺班次的间隔（秒）
    pub gap_scan_interval_seconds: u64,
    /// 班次开始前多久视为不可再补位（秒）
    pub expiry_lead_seconds: u64,
    /// 接受前重新校验候选人资格的超时（秒）
    pub eligibility_check_timeout_seconds: u64,
    /// 同时运行的班次协调器上限
    pub max_active_gaps: usize,
    /// 每个协调器收件箱容量
    pub inbox_capacity: usize,
    /// 已关闭班次的回复路由保留时长（秒）
    pub closed_gap_retention_seconds: u64,
    /// 待同步分配的补提交扫描间隔（秒）
    pub pending_sync_sweep_interval_seconds: u64,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            top_k: 5,
            sms_wait_seconds: 600,
            voice_delay_seconds: 600,
            voice_wait_seconds: 900,
            gap_scan_interval_seconds: 60,
            expiry_lead_seconds: 0,
            eligibility_check_timeout_seconds: 10,
            max_active_gaps: 500,
            inbox_capacity: 64,
            closed_gap_retention_seconds: 86_400,
            pending_sync_sweep_interval_seconds: 300,
        }
    }
}

impl DispatchConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.top_k == 0 {
            return Err(anyhow::anyhow!("短信波次候选人数量必须大于0"));
        }
        if self.sms_wait_seconds == 0 {
            return Err(anyhow::anyhow!("短信等待窗口必须大于0"));
        }
        if self.voice_wait_seconds == 0 {
            return Err(anyhow::anyhow!("语音等待窗口必须大于0"));
        }
        if self.gap_scan_interval_seconds == 0 {
            return Err(anyhow::anyhow!("空缺扫描间隔必须大于0"));
        }
        if self.eligibility_check_timeout_seconds == 0 {
            return Err(anyhow::anyhow!("资格校验超时必须大于0"));
        }
        if self.max_active_gaps == 0 {
            return Err(anyhow::anyhow!("最大并发班次数必须大于0"));
        }
        if self.inbox_capacity == 0 {
            return Err(anyhow::anyhow!("协调器收件箱容量必须大于0"));
        }
        if self.pending_sync_sweep_interval_seconds == 0 {
            return Err(anyhow::anyhow!("待同步扫描间隔必须大于0"));
        }
        Ok(())
    }

    pub fn sms_wait(&self) -> Duration {
        Duration::from_secs(self.sms_wait_seconds)
    }

    pub fn voice_delay(&self) -> Duration {
        Duration::from_secs(self.voice_delay_seconds)
    }

    pub fn voice_wait(&self) -> Duration {
        Duration::from_secs(self.voice_wait_seconds)
    }

    pub fn gap_scan_interval(&self) -> Duration {
        Duration::from_secs(self.gap_scan_interval_seconds)
    }

    pub fn expiry_lead(&self) -> Duration {
        Duration::from_secs(self.expiry_lead_seconds)
    }

    pub fn eligibility_check_timeout(&self) -> Duration {
        Duration::from_secs(self.eligibility_check_timeout_seconds)
    }

    pub fn closed_gap_retention(&self) -> Duration {
        Duration::from_secs(self.closed_gap_retention_seconds)
    }

    pub fn pending_sync_sweep_interval(&self) -> Duration {
        Duration::from_secs(self.pending_sync_sweep_interval_seconds)
    }
}

/// 分配回写排班系统的重试参数
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CommitConfig {
    pub backoff: BackoffConfig,
}

impl Default for CommitConfig {
    fn default() -> Self {
        Self {
            backoff: BackoffConfig {
                max_attempts: 6,
                base_delay_ms: 1_000,
                max_delay_ms: 60_000,
                multiplier: 2.0,
                jitter_factor: 0.1,
            },
        }
    }
}

impl CommitConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        self.backoff.validate()
    }
}
