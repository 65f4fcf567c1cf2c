use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::{net::TcpListener, sync::broadcast};
use tracing::{error, info};

use shiftfill_api::{create_app, AppState};
use shiftfill_core::AppConfig;
use shiftfill_dispatcher::{Collaborators, DispatchContext, DispatchService};
use shiftfill_domain::{EscalationNotifier, IntentClassifier};
use shiftfill_infrastructure::{
    init_metrics, InboundReplyBus, KeywordIntentClassifier, LogEscalationNotifier,
    RestIntentClassifier, RestOutreachGateway, RestSchedulingSystem, WebhookEscalationNotifier,
};

/// 应用运行模式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppMode {
    /// 只运行调度循环，回复全部靠补拉
    Dispatcher,
    /// 调度循环加 HTTP 接口（webhook 和运维接口）
    All,
}

/// 主应用程序
pub struct Application {
    config: AppConfig,
    mode: AppMode,
    service: Arc<DispatchService>,
    replies: InboundReplyBus,
}

impl Application {
    /// 按配置装配外部协作系统和调度服务
    pub fn new(config: AppConfig, mode: AppMode) -> Result<Self> {
        info!("初始化应用程序，模式: {:?}", mode);
        let integrations = &config.integrations;
        let replies = InboundReplyBus::default();

        let scheduling =
            RestSchedulingSystem::new(integrations).context("创建排班系统客户端失败")?;
        let gateway = RestOutreachGateway::new(integrations, replies.clone())
            .context("创建短信/语音网关客户端失败")?;

        let classifier: Arc<dyn IntentClassifier> = match &integrations.intent_service_url {
            Some(url) => Arc::new(
                RestIntentClassifier::new(url, integrations).context("创建意图识别客户端失败")?,
            ),
            None => {
                info!("未配置意图识别服务，使用关键词识别");
                Arc::new(KeywordIntentClassifier::new())
            }
        };
        let notifier: Arc<dyn EscalationNotifier> = match &integrations.escalation_webhook_url {
            Some(url) => Arc::new(
                WebhookEscalationNotifier::new(url, integrations)
                    .context("创建升级通知客户端失败")?,
            ),
            None => {
                info!("未配置升级通知 webhook，升级通知写入日志");
                Arc::new(LogEscalationNotifier)
            }
        };

        let ctx = DispatchContext::new(
            config.clone(),
            Collaborators {
                scheduling: Arc::new(scheduling),
                gateway: Arc::new(gateway),
                classifier,
                notifier,
            },
        );

        Ok(Self {
            config,
            mode,
            service: Arc::new(DispatchService::new(ctx)),
            replies,
        })
    }

    pub fn service(&self) -> &Arc<DispatchService> {
        &self.service
    }

    pub fn mode(&self) -> AppMode {
        self.mode
    }

    /// 运行直到收到关闭信号
    pub async fn run(&self, mut shutdown_rx: broadcast::Receiver<()>) -> Result<()> {
        if self.config.observability.metrics_enabled {
            init_metrics(&self.config.observability.metrics_bind_address)?;
        }

        let dispatcher_handle = tokio::spawn(self.service.clone().run(shutdown_rx.resubscribe()));

        let server_handle = if self.mode == AppMode::All && self.config.server.enabled {
            Some(self.start_api_server(shutdown_rx.resubscribe()).await?)
        } else {
            None
        };

        let _ = shutdown_rx.recv().await;
        info!("应用收到关闭信号");

        if let Err(e) = dispatcher_handle.await {
            error!("调度服务任务异常退出: {}", e);
        }
        if let Some(handle) = server_handle {
            if let Err(e) = handle.await {
                error!("HTTP服务任务异常退出: {}", e);
            }
        }

        info!("应用已停止");
        Ok(())
    }

    async fn start_api_server(
        &self,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) -> Result<tokio::task::JoinHandle<()>> {
        let bind_address = &self.config.server.bind_address;
        let listener = TcpListener::bind(bind_address)
            .await
            .with_context(|| format!("绑定HTTP地址失败: {}", bind_address))?;
        info!("HTTP服务监听: {}", bind_address);

        let app = create_app(AppState {
            service: self.service.clone(),
            replies: self.replies.clone(),
        });

        Ok(tokio::spawn(async move {
            let result = axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    let _ = shutdown_rx.recv().await;
                })
                .await;
            if let Err(e) = result {
                error!("HTTP服务运行失败: {}", e);
            }
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_application_wires_default_config() {
        let app = Application::new(AppConfig::default(), AppMode::Dispatcher).unwrap();
        assert_eq!(app.mode(), AppMode::Dispatcher);
        assert_eq!(app.service().active_count().await, 0);
    }

    #[tokio::test]
    async fn test_dispatcher_mode_stops_on_shutdown() {
        let mut config = AppConfig::default();
        config.observability.metrics_enabled = false;
        let app = Arc::new(Application::new(config, AppMode::Dispatcher).unwrap());

        let (tx, rx) = broadcast::channel(1);
        let running = {
            let app = app.clone();
            tokio::spawn(async move { app.run(rx).await })
        };
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        tx.send(()).unwrap();

        tokio::time::timeout(std::time::Duration::from_secs(30), running)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert!(!app.service().is_running().await);
    }
}
