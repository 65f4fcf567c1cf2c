//! 短信/语音网关 REST 适配器

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use tracing::debug;

use shiftfill_core::{DispatchResult, IntegrationsConfig};
use shiftfill_domain::{DeliveryReceipt, OutreachGateway, ReplyEvent};

use crate::http::{HttpClient, Upstream};
use crate::reply_bus::InboundReplyBus;

#[derive(Debug, Serialize)]
struct MessageRequest<'a> {
    to: &'a str,
    body: &'a str,
}

#[derive(Debug, Serialize)]
struct CallRequest<'a> {
    to: &'a str,
    script: &'a str,
}

#[derive(Debug, Deserialize)]
struct SendResponse {
    id: String,
}

/// 出站走网关 REST 接口，入站回复来自 webhook 总线
#[derive(Debug, Clone)]
pub struct RestOutreachGateway {
    http: HttpClient,
    replies: InboundReplyBus,
}

impl RestOutreachGateway {
    pub fn new(config: &IntegrationsConfig, replies: InboundReplyBus) -> DispatchResult<Self> {
        let http = HttpClient::new(
            &config.gateway_base_url,
            config.api_token.clone(),
            config.request_timeout(),
            Upstream::Gateway,
        )?;
        Ok(Self { http, replies })
    }

    fn receipt(response: SendResponse) -> DeliveryReceipt {
        DeliveryReceipt {
            provider_id: response.id,
            accepted_at: Utc::now(),
        }
    }
}

#[async_trait]
impl OutreachGateway for RestOutreachGateway {
    async fn send_message(&self, contact: &str, text: &str) -> DispatchResult<DeliveryReceipt> {
        let response: SendResponse = self
            .http
            .post_json("messages", &MessageRequest { to: contact, body: text })
            .await?;
        debug!("短信已提交网关 {} -> {}", response.id, contact);
        Ok(Self::receipt(response))
    }

    async fn place_call(&self, contact: &str, script: &str) -> DispatchResult<DeliveryReceipt> {
        let response: SendResponse = self
            .http
            .post_json("calls", &CallRequest { to: contact, script })
            .await?;
        debug!("外呼已提交网关 {} -> {}", response.id, contact);
        Ok(Self::receipt(response))
    }

    fn inbound_replies(&self) -> BoxStream<'static, ReplyEvent> {
        self.replies.subscribe()
    }

    async fn fetch_recent_replies(&self, since: DateTime<Utc>) -> DispatchResult<Vec<ReplyEvent>> {
        let since = since.to_rfc3339_opts(SecondsFormat::Millis, true);
        let response = self
            .http
            .send(self.http.get("messages/inbound").query(&[("since", since)]))
            .await?;
        let response = self.http.check(response).await?;
        self.http.json(response).await
    }
}
