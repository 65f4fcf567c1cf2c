use axum::{
    extract::{Path, Query, State},
    response::IntoResponse,
    Json,
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;
use tracing::info;

use shiftfill_dispatcher::OpenOutcome;
use shiftfill_domain::{GapId, ShiftGap};

use crate::{
    error::{ApiError, ApiResult},
    response::{accepted, created, success},
    routes::AppState,
};

/// 班次列表查询参数
#[derive(Debug, Deserialize)]
pub struct GapQueryParams {
    pub status: Option<String>,
}

/// 人工解决请求
#[derive(Debug, Deserialize)]
pub struct ResolveGapRequest {
    pub reason: Option<String>,
}

/// 获取所有已跟踪班次的快照，按开始时间排序
pub async fn list_gaps(
    State(state): State<AppState>,
    Query(params): Query<GapQueryParams>,
) -> ApiResult<impl IntoResponse> {
    let mut snapshots = state.service.snapshots().await;
    if let Some(status) = params.status {
        snapshots.retain(|s| s.status.as_str().eq_ignore_ascii_case(&status));
    }
    Ok(success(snapshots))
}

pub async fn get_gap(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let snapshot = state
        .service
        .snapshot(&GapId::from(id.as_str()))
        .await
        .ok_or(ApiError::NotFound)?;
    Ok(success(snapshot))
}

/// 手动提交空缺班次，与周期扫描走同一入口
pub async fn open_gap(
    State(state): State<AppState>,
    Json(gap): Json<ShiftGap>,
) -> ApiResult<impl IntoResponse> {
    if gap.window.end <= gap.window.start {
        return Err(ApiError::BadRequest("班次结束时间必须晚于开始时间".to_string()));
    }
    if gap.status.is_terminal() {
        return Err(ApiError::BadRequest(format!(
            "班次状态 {} 不能再补位",
            gap.status
        )));
    }
    let lead = chrono::Duration::from_std(state.service.context().config.dispatch.expiry_lead())
        .unwrap_or_else(|_| chrono::Duration::zero());
    if gap.is_expired(Utc::now(), lead) {
        return Err(ApiError::BadRequest("班次已开始或即将开始".to_string()));
    }

    let gap_id = gap.id.clone();
    match state.service.open_gap(gap).await {
        OpenOutcome::Started => {
            info!(gap_id = %gap_id, "通过API提交班次");
            Ok(created(json!({ "gap_id": gap_id })))
        }
        OpenOutcome::AlreadyTracked => Err(ApiError::Conflict(format!("班次 {} 已在处理中", gap_id))),
        OpenOutcome::AtCapacity => Err(ApiError::Unavailable(
            "并发处理的班次已达上限，稍后由周期扫描接手".to_string(),
        )),
    }
}

/// 值班人员已通过其他方式解决班次
pub async fn resolve_gap(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<ResolveGapRequest>,
) -> ApiResult<impl IntoResponse> {
    let gap_id = GapId::from(id.as_str());
    let reason = request
        .reason
        .unwrap_or_else(|| "resolved by operator".to_string());

    state.service.resolve_gap(&gap_id, &reason).await?;
    info!(gap_id = %gap_id, reason = %reason, "值班人员手动解决班次");
    Ok(accepted(json!({ "gap_id": gap_id }), reason))
}
