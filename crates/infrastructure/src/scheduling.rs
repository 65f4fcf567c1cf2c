//! 排班系统 REST 适配器

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use futures::stream::{self, BoxStream, StreamExt};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use shiftfill_core::{DispatchError, DispatchResult, IntegrationsConfig};
use shiftfill_domain::{
    Assignment, CandidateCaregiver, CaregiverId, ExternalResolution, GapId, SchedulingSystem,
    ShiftGap,
};

use crate::http::{HttpClient, Upstream};

#[derive(Debug, Deserialize)]
struct EligibilityResponse {
    eligible: bool,
}

#[derive(Debug, Deserialize)]
struct AssignmentResponse {
    caregiver_id: Option<CaregiverId>,
}

#[derive(Debug, Serialize)]
struct CommitRequest<'a> {
    caregiver_id: &'a CaregiverId,
    channel: &'static str,
    accepted_at: chrono::DateTime<chrono::Utc>,
    /// 幂等键，重复写入同一班次同一人选返回成功
    idempotency_key: &'a str,
}

#[derive(Debug, Deserialize)]
struct ConflictResponse {
    assigned_to: String,
}

/// 通过 REST 接口访问排班系统
///
/// 外部解决信号没有推送接口，按 `resolution_poll_interval` 轮询班次状态。
#[derive(Debug, Clone)]
pub struct RestSchedulingSystem {
    http: HttpClient,
    poll_interval: Duration,
}

impl RestSchedulingSystem {
    pub fn new(config: &IntegrationsConfig) -> DispatchResult<Self> {
        let http = HttpClient::new(
            &config.scheduling_base_url,
            config.api_token.clone(),
            config.request_timeout(),
            Upstream::Scheduling,
        )?;
        Ok(Self {
            http,
            poll_interval: config.resolution_poll_interval(),
        })
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// 排班系统中班次已不再待补位（被分配、取消或删除）时返回解决记录
    async fn fetch_resolution(
        http: &HttpClient,
        gap_id: &GapId,
    ) -> DispatchResult<Option<ExternalResolution>> {
        let response = http.send(http.get(&format!("gaps/{}", gap_id))).await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(Some(ExternalResolution {
                gap_id: gap_id.clone(),
                reason: "班次已从排班系统删除".to_string(),
                resolved_at: Utc::now(),
            }));
        }
        let response = http.check(response).await?;
        let gap: ShiftGap = http.json(response).await?;
        if !gap.status.is_terminal() && !gap.status.is_filled() {
            return Ok(None);
        }
        Ok(Some(ExternalResolution {
            gap_id: gap_id.clone(),
            reason: format!("排班系统状态为 {}", gap.status),
            resolved_at: Utc::now(),
        }))
    }
}

#[async_trait]
impl SchedulingSystem for RestSchedulingSystem {
    async fn list_open_gaps(&self) -> DispatchResult<Vec<ShiftGap>> {
        let gaps: Vec<ShiftGap> = self.http.get_json("gaps?status=open").await?;
        debug!("排班系统返回 {} 个待补位班次", gaps.len());
        Ok(gaps)
    }

    async fn get_candidate_pool(&self, gap: &ShiftGap) -> DispatchResult<Vec<CandidateCaregiver>> {
        self.http
            .get_json(&format!("gaps/{}/candidates", gap.id))
            .await
    }

    async fn is_candidate_still_eligible(
        &self,
        caregiver: &CandidateCaregiver,
        gap: &ShiftGap,
    ) -> DispatchResult<bool> {
        let response: EligibilityResponse = self
            .http
            .get_json(&format!(
                "gaps/{}/candidates/{}/eligibility",
                gap.id, caregiver.id
            ))
            .await?;
        Ok(response.eligible)
    }

    async fn current_assignment(&self, gap_id: &GapId) -> DispatchResult<Option<CaregiverId>> {
        let response = self
            .http
            .send(self.http.get(&format!("gaps/{}/assignment", gap_id)))
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let response = self.http.check(response).await?;
        let body: AssignmentResponse = self.http.json(response).await?;
        Ok(body.caregiver_id)
    }

    async fn commit_assignment(&self, assignment: &Assignment) -> DispatchResult<()> {
        let request = CommitRequest {
            caregiver_id: &assignment.caregiver_id,
            channel: assignment.channel.as_str(),
            accepted_at: assignment.accepted_at,
            idempotency_key: assignment.gap_id.as_str(),
        };
        let response = self
            .http
            .send(
                self.http
                    .put(&format!("gaps/{}/assignment", assignment.gap_id))
                    .json(&request),
            )
            .await?;

        if response.status() == StatusCode::CONFLICT {
            let conflict: ConflictResponse = self.http.json(response).await?;
            return Err(DispatchError::CommitConflict {
                gap_id: assignment.gap_id.to_string(),
                assigned_to: conflict.assigned_to,
            });
        }
        self.http.check(response).await?;
        info!(
            "班次 {} 已写入排班系统，护理员 {}",
            assignment.gap_id, assignment.caregiver_id
        );
        Ok(())
    }

    fn subscribe_to_external_resolution(
        &self,
        gap_id: &GapId,
    ) -> BoxStream<'static, ExternalResolution> {
        let state = (self.http.clone(), gap_id.clone(), self.poll_interval, false);
        stream::unfold(state, |(http, gap_id, interval, done)| async move {
            if done {
                return None;
            }
            loop {
                tokio::time::sleep(interval).await;
                match Self::fetch_resolution(&http, &gap_id).await {
                    Ok(Some(resolution)) => {
                        info!("班次 {} 已被外部解决: {}", gap_id, resolution.reason);
                        return Some((resolution, (http, gap_id, interval, true)));
                    }
                    Ok(None) => {}
                    Err(e) => warn!("查询班次 {} 外部解决状态失败: {}", gap_id, e),
                }
            }
        })
        .boxed()
    }
}
