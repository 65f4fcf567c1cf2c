//! 人工升级通道

use async_trait::async_trait;
use serde::Serialize;
use tracing::{info, warn};

use shiftfill_core::{DispatchResult, IntegrationsConfig};
use shiftfill_domain::{EscalationKind, EscalationNotice, EscalationNotifier, GapStatus};

use crate::http::{HttpClient, Upstream};

#[derive(Debug, Serialize)]
struct WebhookPayload<'a> {
    kind: EscalationKind,
    gap_id: &'a str,
    status: GapStatus,
    summary: &'a str,
    notice: &'a EscalationNotice,
}

/// 把升级通知以 JSON 推送到值班 webhook
#[derive(Debug, Clone)]
pub struct WebhookEscalationNotifier {
    http: HttpClient,
}

impl WebhookEscalationNotifier {
    pub fn new(url: &str, config: &IntegrationsConfig) -> DispatchResult<Self> {
        let http = HttpClient::new(
            url,
            config.api_token.clone(),
            config.request_timeout(),
            Upstream::Notifier,
        )?;
        Ok(Self { http })
    }
}

#[async_trait]
impl EscalationNotifier for WebhookEscalationNotifier {
    async fn notify(&self, notice: &EscalationNotice) -> DispatchResult<()> {
        let payload = WebhookPayload {
            kind: notice.kind,
            gap_id: notice.gap.id.as_str(),
            status: notice.status,
            summary: &notice.message,
            notice,
        };
        let response = self.http.send(self.http.post("").json(&payload)).await?;
        self.http.check(response).await?;
        info!(
            "已通知值班人员: 班次 {} {}",
            notice.gap.id,
            notice.kind.as_str()
        );
        Ok(())
    }
}

/// 未配置 webhook 时只写日志
#[derive(Debug, Clone, Default)]
pub struct LogEscalationNotifier;

#[async_trait]
impl EscalationNotifier for LogEscalationNotifier {
    async fn notify(&self, notice: &EscalationNotice) -> DispatchResult<()> {
        warn!(
            escalation = notice.kind.as_str(),
            gap_id = %notice.gap.id,
            status = notice.status.as_str(),
            attempts = notice.attempts.len(),
            "需要人工处理: {}",
            notice.message
        );
        Ok(())
    }
}
