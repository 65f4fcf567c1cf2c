mod common;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc};
use tokio::time::Instant;

use shiftfill_dispatcher::{GapCoordinator, ReplyListener};
use shiftfill_domain::{CaregiverId, GapStatus};
use shiftfill_testing_utils::{phone_for, test_config, text_reply, ShiftGapBuilder, TestEnv};

use common::{caregiver, Harness};

async fn wait_for_subscriber(h: &Harness) {
    let gateway = h.gateway.clone();
    let subscribed = TestEnv::wait_for(
        move || {
            let gateway = gateway.clone();
            async move { gateway.subscriber_count() >= 1 }
        },
        Duration::from_secs(60),
    )
    .await;
    assert!(subscribed, "listener never subscribed to inbound replies");
}

#[tokio::test(start_paused = true)]
async fn test_live_reply_reaches_coordinator() {
    let gap = ShiftGapBuilder::new("gap-1").build();
    let h = Harness::new(vec![caregiver("cg-1", &gap, 0.9)]);
    let listener = Arc::new(ReplyListener::new(&h.ctx));
    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let running = {
        let listener = listener.clone();
        tokio::spawn(async move { listener.run(shutdown_rx).await })
    };
    wait_for_subscriber(&h).await;

    let handle = GapCoordinator::spawn(h.ctx.clone(), gap.clone()).await;
    h.wait_for_sms(1).await;
    h.gateway.deliver(text_reply("r-1", &phone_for("cg-1"), "yes"));

    let outcome = handle.wait().await.unwrap();
    assert_eq!(outcome.status(), GapStatus::Filled);

    shutdown_tx.send(()).unwrap();
    running.await.unwrap();
    assert!(!listener.is_running().await);
}

#[tokio::test(start_paused = true)]
async fn test_reply_missed_during_disconnect_is_recovered() {
    let gap = ShiftGapBuilder::new("gap-1").build();
    let h = Harness::new(vec![caregiver("cg-1", &gap, 0.9)]);
    let listener = Arc::new(ReplyListener::new(&h.ctx));
    let (_shutdown_tx, shutdown_rx) = broadcast::channel(1);
    {
        let listener = listener.clone();
        tokio::spawn(async move { listener.run(shutdown_rx).await });
    }
    wait_for_subscriber(&h).await;

    let handle = GapCoordinator::spawn(h.ctx.clone(), gap.clone()).await;
    h.wait_for_sms(1).await;

    h.gateway.disconnect();
    h.gateway
        .deliver_while_disconnected(text_reply("r-1", &phone_for("cg-1"), "yes"));

    let outcome = handle.wait().await.unwrap();
    assert_eq!(outcome.status(), GapStatus::Filled);
    assert_eq!(
        outcome.assignment.unwrap().caregiver_id,
        CaregiverId::from("cg-1")
    );
    assert!(!h.gateway.fetch_calls().is_empty());
    wait_for_subscriber(&h).await;
}

#[tokio::test(start_paused = true)]
async fn test_reconcile_skips_replies_already_seen() {
    let gap = ShiftGapBuilder::new("gap-1").build();
    let h = Harness::new(vec![caregiver("cg-1", &gap, 0.9), caregiver("cg-2", &gap, 0.5)]);
    let listener = ReplyListener::new(&h.ctx);

    let _handle = GapCoordinator::spawn(h.ctx.clone(), gap.clone()).await;
    h.wait_for_sms(2).await;

    h.gateway
        .deliver_while_disconnected(text_reply("r-1", &phone_for("cg-1"), "no"));
    assert_eq!(listener.reconcile().await, 1);
    // 同一条回复第二次拉到时已被去重
    assert_eq!(listener.reconcile().await, 0);
    assert_eq!(h.gateway.fetch_calls().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_slow_late_notice_does_not_delay_other_gap_replies() {
    let mut config = test_config();
    config.outreach.send.base_delay_ms = 1_000;
    config.outreach.send.max_delay_ms = 5_000;
    let h = Harness::with_config(config, vec![]);
    let correlator = h.ctx.correlator.clone();

    let closed = ShiftGapBuilder::new("gap-a").build();
    let open = ShiftGapBuilder::new("gap-b").build();
    let (closed_tx, _closed_rx) = mpsc::channel(8);
    let (open_tx, mut open_rx) = mpsc::channel(8);
    correlator.register_gap(&closed, closed_tx).await;
    correlator.register_gap(&open, open_tx).await;
    correlator
        .expect_reply(&closed.id, &CaregiverId::from("cg-1"), "Ana", "en", &phone_for("cg-1"))
        .await;
    correlator
        .expect_reply(&open.id, &CaregiverId::from("cg-2"), "Ben", "en", &phone_for("cg-2"))
        .await;
    correlator.close_gap(&closed.id, GapStatus::Filled).await;
    // 网关对 cg-1 持续限流，已补满通知会一直退避重试
    h.gateway.fail_contact_transiently(&phone_for("cg-1"), 100);

    let listener = Arc::new(ReplyListener::new(&h.ctx));
    let (_shutdown_tx, shutdown_rx) = broadcast::channel(1);
    {
        let listener = listener.clone();
        tokio::spawn(async move { listener.run(shutdown_rx).await });
    }
    wait_for_subscriber(&h).await;

    let started = Instant::now();
    h.gateway.deliver(text_reply("r-a", &phone_for("cg-1"), "yes"));
    h.gateway.deliver(text_reply("r-b", &phone_for("cg-2"), "yes"));

    let forwarded = open_rx.recv().await.unwrap();
    assert_eq!(forwarded.reply.id, "r-b");
    assert!(started.elapsed() < Duration::from_secs(1));
    assert!(h.texts_to("cg-1").is_empty());
}
