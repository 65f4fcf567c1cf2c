use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};

use shiftfill_dispatcher::DispatchService;
use shiftfill_infrastructure::InboundReplyBus;

use crate::handlers::{
    gaps::{get_gap, list_gaps, open_gap, resolve_gap},
    health::health_check,
    webhooks::{sms_reply, voice_result},
};

/// API应用状态
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<DispatchService>,
    pub replies: InboundReplyBus,
}

/// 创建API路由
pub fn create_routes(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        // 班次管理
        .route("/api/gaps", get(list_gaps).post(open_gap))
        .route("/api/gaps/{id}", get(get_gap))
        .route("/api/gaps/{id}/resolve", post(resolve_gap))
        // 网关回调
        .route("/webhooks/sms", post(sms_reply))
        .route("/webhooks/voice", post(voice_result))
        .with_state(state)
}
