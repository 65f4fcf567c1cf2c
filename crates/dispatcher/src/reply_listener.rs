use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::{stream, StreamExt};
use tokio::sync::{broadcast, Mutex, RwLock};
use tokio::task::JoinSet;
use tokio::time::{interval, sleep, MissedTickBehavior};
use tracing::{debug, info, warn};

use shiftfill_domain::{OutreachGateway, ReplyEvent};

use crate::context::DispatchContext;
use crate::correlator::{ResponseCorrelator, RouteOutcome};
use crate::metrics::DispatchMetrics;

/// 入站回复监听
///
/// 消费网关的回复流并交给关联器，多条回复并发路由，慢的意图识别不阻塞其他班次。
/// 流断开后按固定间隔重连，重连后和定时对账都会补拉断线期间的回复，
/// 重复的回复由关联器去重。
pub struct ReplyListener {
    gateway: Arc<dyn OutreachGateway>,
    correlator: Arc<ResponseCorrelator>,
    metrics: Arc<DispatchMetrics>,
    reconnect_delay: Duration,
    reconciliation_interval: Duration,
    max_inflight: usize,
    overlap: chrono::Duration,
    watermark: Mutex<DateTime<Utc>>,
    running: Arc<RwLock<bool>>,
}

impl ReplyListener {
    pub fn new(ctx: &DispatchContext) -> Self {
        let outreach = &ctx.config.outreach;
        Self {
            gateway: ctx.gateway.clone(),
            correlator: ctx.correlator.clone(),
            metrics: ctx.metrics.clone(),
            reconnect_delay: outreach.reconnect_delay(),
            reconciliation_interval: outreach.reconciliation_interval(),
            max_inflight: outreach.max_inflight_replies.max(1),
            overlap: chrono::Duration::seconds(outreach.reconciliation_overlap_seconds as i64),
            watermark: Mutex::new(Utc::now()),
            running: Arc::new(RwLock::new(false)),
        }
    }

    pub async fn is_running(&self) -> bool {
        *self.running.read().await
    }

    pub async fn run(&self, mut shutdown: broadcast::Receiver<()>) {
        *self.running.write().await = true;
        info!("入站回复监听已启动");

        let mut stream = self.gateway.inbound_replies();
        let mut ticker = interval(self.reconciliation_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        ticker.tick().await;
        let mut in_flight: JoinSet<RouteOutcome> = JoinSet::new();

        loop {
            tokio::select! {
                _ = shutdown.recv() => break,
                Some(done) = in_flight.join_next(), if !in_flight.is_empty() => {
                    if let Err(e) = done {
                        warn!("回复路由任务异常结束: {}", e);
                    }
                }
                item = stream.next(), if in_flight.len() < self.max_inflight => match item {
                    Some(reply) => {
                        let correlator = self.correlator.clone();
                        in_flight.spawn(async move {
                            let outcome = correlator.route(reply).await;
                            debug!(outcome = outcome.label(), "入站回复已处理");
                            outcome
                        });
                    }
                    None => {
                        warn!(
                            "入站回复流已断开，{} 秒后重连",
                            self.reconnect_delay.as_secs()
                        );
                        self.metrics.record_reconnect();
                        tokio::select! {
                            _ = shutdown.recv() => break,
                            _ = sleep(self.reconnect_delay) => {}
                        }
                        stream = self.gateway.inbound_replies();
                        let recovered = self.reconcile().await;
                        info!("入站回复流已重连，补拉到 {} 条回复", recovered);
                    }
                },
                _ = ticker.tick() => {
                    self.reconcile().await;
                }
            }
        }

        // 已接收的回复处理完再退出
        while let Some(done) = in_flight.join_next().await {
            if let Err(e) = done {
                warn!("回复路由任务异常结束: {}", e);
            }
        }

        *self.running.write().await = false;
        info!("入站回复监听已停止");
    }

    /// 按水位线补拉最近的回复，返回被转发或答复的条数
    pub async fn reconcile(&self) -> usize {
        let started = Utc::now();
        let since = *self.watermark.lock().await - self.overlap;

        let replies = match self.gateway.fetch_recent_replies(since).await {
            Ok(replies) => replies,
            Err(e) => {
                warn!(since = %since, "补拉回复失败，下次对账重试: {}", e);
                return 0;
            }
        };

        let fetched = replies.len();
        let recovered = stream::iter(replies)
            .map(|reply: ReplyEvent| self.correlator.route(reply))
            .buffer_unordered(self.max_inflight)
            .filter(|outcome| {
                futures::future::ready(matches!(
                    outcome,
                    RouteOutcome::Forwarded { .. } | RouteOutcome::AnsweredAlreadyFilled { .. }
                ))
            })
            .count()
            .await;

        *self.watermark.lock().await = started;
        self.metrics.record_reconciliation(recovered);
        if recovered > 0 {
            info!(fetched = fetched, recovered = recovered, "对账补回了遗漏的回复");
        } else {
            debug!(fetched = fetched, "对账完成，没有遗漏的回复");
        }
        recovered
    }
}
