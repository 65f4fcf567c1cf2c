//! # Shiftfill API
//!
//! 补位调度服务的 HTTP 接口：值班人员查看和处理班次，网关通过 webhook 推送回复。
//!
//! ## API 端点
//!
//! - `GET /health` - 健康检查
//! - `GET /api/gaps` - 所有已跟踪班次的快照
//! - `POST /api/gaps` - 手动提交一个待补位班次
//! - `GET /api/gaps/{id}` - 单个班次的快照
//! - `POST /api/gaps/{id}/resolve` - 标记班次已由人工解决，停止外呼
//! - `POST /webhooks/sms` - 网关推送的短信回复
//! - `POST /webhooks/voice` - 网关推送的外呼按键结果

pub mod error;
pub mod handlers;
pub mod middleware;
pub mod response;
pub mod routes;

use axum::Router;
use tower::ServiceBuilder;

use middleware::{cors_layer, request_logging, trace_layer};
pub use routes::{create_routes, AppState};

/// 创建完整的API应用
pub fn create_app(state: AppState) -> Router {
    create_routes(state).layer(
        ServiceBuilder::new()
            .layer(trace_layer())
            .layer(cors_layer())
            .layer(axum::middleware::from_fn(request_logging)),
    )
}
