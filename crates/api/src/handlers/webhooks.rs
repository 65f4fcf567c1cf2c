//! 网关回调：把短信回复和按键结果发布到入站回复总线

use axum::{extract::State, response::IntoResponse, Json};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use shiftfill_domain::{CallOutcome, ReplyBody, ReplyEvent};

use crate::{
    error::{ApiError, ApiResult},
    response::success,
    routes::AppState,
};

#[derive(Debug, Deserialize)]
pub struct SmsWebhook {
    /// 网关侧消息ID
    pub id: String,
    pub from: String,
    pub text: String,
    pub received_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
pub struct VoiceWebhook {
    pub id: String,
    pub from: String,
    pub outcome: CallOutcome,
    pub received_at: Option<DateTime<Utc>>,
}

fn publish(state: &AppState, reply: ReplyEvent) -> ApiResult<impl IntoResponse> {
    if reply.id.trim().is_empty() || reply.contact.trim().is_empty() {
        return Err(ApiError::BadRequest("回复缺少消息ID或号码".to_string()));
    }
    let reply_id = reply.id.clone();
    let subscribers = state.replies.publish(reply);
    debug!(reply_id = %reply_id, subscribers, "入站回复已发布");
    Ok(success(json!({ "reply_id": reply_id, "subscribers": subscribers })))
}

pub async fn sms_reply(
    State(state): State<AppState>,
    Json(payload): Json<SmsWebhook>,
) -> ApiResult<impl IntoResponse> {
    publish(
        &state,
        ReplyEvent {
            id: payload.id,
            contact: payload.from,
            body: ReplyBody::Text { text: payload.text },
            received_at: payload.received_at.unwrap_or_else(Utc::now),
        },
    )
}

pub async fn voice_result(
    State(state): State<AppState>,
    Json(payload): Json<VoiceWebhook>,
) -> ApiResult<impl IntoResponse> {
    publish(
        &state,
        ReplyEvent {
            id: payload.id,
            contact: payload.from,
            body: ReplyBody::CallOutcome {
                outcome: payload.outcome,
            },
            received_at: payload.received_at.unwrap_or_else(Utc::now),
        },
    )
}
