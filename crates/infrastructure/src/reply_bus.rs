use futures::stream::{self, BoxStream, StreamExt};
use tokio::sync::broadcast;
use tracing::{debug, warn};

use shiftfill_domain::ReplyEvent;

/// 入站回复总线
///
/// 网关通过 webhook 推送短信回复和按键结果，HTTP 层把它们发布到这里，
/// 网关适配器的 `inbound_replies` 从这里订阅。订阅者只能收到订阅之后发布的回复。
#[derive(Debug, Clone)]
pub struct InboundReplyBus {
    sender: broadcast::Sender<ReplyEvent>,
}

impl InboundReplyBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// 返回当前订阅者数量，没有订阅者时回复只能靠补拉
    pub fn publish(&self, reply: ReplyEvent) -> usize {
        match self.sender.send(reply) {
            Ok(receivers) => receivers,
            Err(broadcast::error::SendError(reply)) => {
                debug!("没有回复订阅者，回复 {} 等待补拉", reply.id);
                0
            }
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    pub fn subscribe(&self) -> BoxStream<'static, ReplyEvent> {
        stream::unfold(self.sender.subscribe(), |mut rx| async move {
            loop {
                match rx.recv().await {
                    Ok(reply) => return Some((reply, rx)),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        // 丢失的回复由补拉覆盖
                        warn!("回复订阅落后，跳过 {} 条", skipped);
                    }
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            }
        })
        .boxed()
    }
}

impl Default for InboundReplyBus {
    fn default() -> Self {
        Self::new(1024)
    }
}
