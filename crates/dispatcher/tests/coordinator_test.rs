mod common;

use std::time::Duration;

use chrono::Duration as ChronoDuration;
use tokio::time::Instant;

use shiftfill_core::DispatchError;
use shiftfill_dispatcher::{GapCoordinator, RouteOutcome};
use shiftfill_domain::{
    CallOutcome, CaregiverId, Channel, DeliveryStatus, EscalationKind, GapEvent, GapStatus,
    ResponseIntent, SyncStatus,
};
use shiftfill_testing_utils::{
    phone_for, test_config, wait_for_status, CaregiverBuilder, ShiftGapBuilder,
};

use common::{caregiver, Harness};

#[tokio::test(start_paused = true)]
async fn test_first_accept_fills_gap() {
    let gap = ShiftGapBuilder::new("gap-1").build();
    let h = Harness::new(vec![
        caregiver("cg-1", &gap, 0.9),
        caregiver("cg-2", &gap, 0.5),
        caregiver("cg-3", &gap, 0.2),
    ]);

    let handle = GapCoordinator::spawn(h.ctx.clone(), gap.clone()).await;
    h.wait_for_sms(3).await;
    assert_eq!(handle.snapshot().status, GapStatus::OutreachSms);

    let routed = h.reply("r-1", "cg-2", "YES").await;
    assert_eq!(
        routed,
        RouteOutcome::Forwarded {
            gap_id: gap.id.clone(),
            intent: ResponseIntent::Accept
        }
    );

    let outcome = handle.wait().await.unwrap();
    assert_eq!(outcome.status(), GapStatus::Filled);
    let assignment = outcome.assignment.clone().unwrap();
    assert_eq!(assignment.caregiver_id, CaregiverId::from("cg-2"));
    assert_eq!(assignment.channel, Channel::Sms);
    assert!(matches!(assignment.sync_status, SyncStatus::Synced { attempts: 1, .. }));

    assert_eq!(h.scheduling.commit_calls().len(), 1);
    assert_eq!(h.scheduling.assignment_for(&gap.id), Some(CaregiverId::from("cg-2")));
    assert_eq!(h.gateway.call_count(), 0);
    assert!(h.texts_to("cg-2").iter().any(|t| t.contains("You are confirmed")));
    assert!(h.notifier.notices().is_empty());
    assert_eq!(outcome.snapshot.status, GapStatus::Filled);
}

#[tokio::test(start_paused = true)]
async fn test_sms_wave_contacts_top_k_in_rank_order() {
    let gap = ShiftGapBuilder::new("gap-1").build();
    let pool = (1..=7)
        .map(|i| caregiver(&format!("cg-{}", i), &gap, 0.1 * i as f64))
        .collect();
    let h = Harness::new(pool);

    let handle = GapCoordinator::spawn(h.ctx.clone(), gap.clone()).await;
    h.wait_for_sms(5).await;
    tokio::time::sleep(Duration::from_secs(1)).await;

    assert_eq!(h.gateway.sms_count(), 5);
    let snapshot = handle.snapshot();
    assert_eq!(snapshot.ranked_candidates.len(), 7);
    assert_eq!(snapshot.ranked_candidates[0], CaregiverId::from("cg-7"));
    assert_eq!(snapshot.wave, 1);
    // 排名最低的两人不在首波
    assert!(h.texts_to("cg-1").is_empty());
    assert!(h.texts_to("cg-2").is_empty());
    assert!(snapshot.attempts.iter().all(|a| a.channel == Channel::Sms && a.wave == 1));
}

#[tokio::test(start_paused = true)]
async fn test_silence_moves_to_voice_then_escalates() {
    let gap = ShiftGapBuilder::new("gap-1").build();
    let h = Harness::new(vec![caregiver("cg-1", &gap, 0.9), caregiver("cg-2", &gap, 0.5)]);

    let started = Instant::now();
    let handle = GapCoordinator::spawn(h.ctx.clone(), gap.clone()).await;
    let mut rx = handle.subscribe();

    wait_for_status(&mut rx, GapStatus::OutreachVoice).await;
    assert!(started.elapsed() >= Duration::from_secs(600));
    h.wait_for_calls(2).await;
    assert_eq!(handle.snapshot().wave, 2);

    wait_for_status(&mut rx, GapStatus::Escalated).await;
    assert!(started.elapsed() >= Duration::from_secs(600 + 900));
    h.wait_for_notice(EscalationKind::OutreachExhausted).await;

    let notice = &h.notifier.notices()[0];
    assert_eq!(notice.gap.id, gap.id);
    assert_eq!(notice.attempts.len(), 4);
    assert!(notice
        .history
        .iter()
        .any(|e| matches!(e, GapEvent::StatusChanged { to: GapStatus::Escalated, .. })));
}

#[tokio::test(start_paused = true)]
async fn test_voice_wave_skips_decliners_and_keeps_unreachable() {
    let gap = ShiftGapBuilder::new("gap-1").build();
    let h = Harness::new(vec![
        caregiver("cg-1", &gap, 0.9),
        caregiver("cg-2", &gap, 0.5),
        caregiver("cg-3", &gap, 0.3),
    ]);
    // 重试耗尽后短信不可达，语音正常
    h.gateway.fail_contact_transiently(&phone_for("cg-3"), 3);

    let handle = GapCoordinator::spawn(h.ctx.clone(), gap.clone()).await;
    let mut rx = handle.subscribe();
    h.wait_for_sms(2).await;
    h.reply("r-1", "cg-1", "no").await;

    wait_for_status(&mut rx, GapStatus::OutreachVoice).await;
    h.wait_for_calls(2).await;

    let called: Vec<String> = h
        .gateway
        .sent()
        .into_iter()
        .filter(|m| m.channel == Channel::Voice)
        .map(|m| m.contact)
        .collect();
    assert!(called.contains(&phone_for("cg-2")));
    assert!(called.contains(&phone_for("cg-3")));
    assert!(!called.contains(&phone_for("cg-1")));

    let unreachable = handle
        .snapshot()
        .attempts
        .into_iter()
        .find(|a| a.caregiver_id == CaregiverId::from("cg-3") && a.wave == 1)
        .unwrap();
    assert!(matches!(unreachable.status, DeliveryStatus::Unreachable { tries: 3, .. }));
}

#[tokio::test(start_paused = true)]
async fn test_all_declines_escalate_without_calls() {
    let gap = ShiftGapBuilder::new("gap-1").build();
    let h = Harness::new(vec![caregiver("cg-1", &gap, 0.9), caregiver("cg-2", &gap, 0.5)]);

    let started = Instant::now();
    let handle = GapCoordinator::spawn(h.ctx.clone(), gap.clone()).await;
    let mut rx = handle.subscribe();
    h.wait_for_sms(2).await;

    h.reply("r-1", "cg-1", "no").await;
    h.reply("r-2", "cg-2", "decline").await;

    wait_for_status(&mut rx, GapStatus::Escalated).await;
    assert!(started.elapsed() < Duration::from_secs(600));
    assert_eq!(h.gateway.call_count(), 0);
    h.wait_for_notice(EscalationKind::OutreachExhausted).await;
}

#[tokio::test(start_paused = true)]
async fn test_voice_keypress_accept_fills_gap() {
    let gap = ShiftGapBuilder::new("gap-1").build();
    let h = Harness::new(vec![caregiver("cg-1", &gap, 0.9)]);

    let handle = GapCoordinator::spawn(h.ctx.clone(), gap.clone()).await;
    h.wait_for_calls(1).await;

    let routed = h.press("c-1", "cg-1", CallOutcome::Accepted).await;
    assert!(matches!(routed, RouteOutcome::Forwarded { intent: ResponseIntent::Accept, .. }));

    let outcome = handle.wait().await.unwrap();
    assert_eq!(outcome.status(), GapStatus::Filled);
    assert_eq!(outcome.assignment.unwrap().channel, Channel::Voice);
}

#[tokio::test(start_paused = true)]
async fn test_acceptance_after_escalation_still_fills() {
    let gap = ShiftGapBuilder::new("gap-1").build();
    let h = Harness::new(vec![caregiver("cg-1", &gap, 0.9)]);

    let handle = GapCoordinator::spawn(h.ctx.clone(), gap.clone()).await;
    let mut rx = handle.subscribe();
    wait_for_status(&mut rx, GapStatus::Escalated).await;

    h.reply("r-late", "cg-1", "yes").await;
    let outcome = handle.wait().await.unwrap();
    assert_eq!(outcome.status(), GapStatus::Filled);
    assert_eq!(outcome.escalations, vec![EscalationKind::OutreachExhausted]);
}

#[tokio::test(start_paused = true)]
async fn test_simultaneous_accepts_produce_single_assignment() {
    let gap = ShiftGapBuilder::new("gap-1").build();
    let h = Harness::new(vec![caregiver("cg-1", &gap, 0.9), caregiver("cg-2", &gap, 0.5)]);

    let handle = GapCoordinator::spawn(h.ctx.clone(), gap.clone()).await;
    h.wait_for_sms(2).await;

    let (first, second) = tokio::join!(
        h.reply("r-1", "cg-1", "yes"),
        h.reply("r-2", "cg-2", "yes")
    );
    assert!(matches!(first, RouteOutcome::Forwarded { .. }));
    assert!(matches!(second, RouteOutcome::Forwarded { .. }));

    let outcome = handle.wait().await.unwrap();
    assert_eq!(outcome.status(), GapStatus::Filled);
    let winner = outcome.assignment.as_ref().unwrap().caregiver_id.clone();
    let loser = if winner == CaregiverId::from("cg-1") { "cg-2" } else { "cg-1" };
    assert_eq!(h.scheduling.assignment_count(), 1);
    assert_eq!(h.scheduling.commit_calls().len(), 1);
    assert!(h
        .texts_to(loser)
        .iter()
        .any(|t| t.contains("already been filled")));
    assert!(outcome.history.iter().any(|e| matches!(
        e,
        GapEvent::LateReplyRejected { caregiver_id, .. } if caregiver_id == &CaregiverId::from(loser)
    )));
}

#[tokio::test(start_paused = true)]
async fn test_duplicate_reply_is_ignored() {
    let gap = ShiftGapBuilder::new("gap-1").build();
    let h = Harness::new(vec![caregiver("cg-1", &gap, 0.9), caregiver("cg-2", &gap, 0.5)]);

    let _handle = GapCoordinator::spawn(h.ctx.clone(), gap.clone()).await;
    h.wait_for_sms(2).await;

    assert!(matches!(h.reply("r-1", "cg-1", "no").await, RouteOutcome::Forwarded { .. }));
    assert_eq!(h.reply("r-1", "cg-1", "no").await, RouteOutcome::Duplicate);
}

#[tokio::test(start_paused = true)]
async fn test_ambiguous_reply_notifies_operator_without_accepting() {
    let gap = ShiftGapBuilder::new("gap-1").build();
    let h = Harness::new(vec![caregiver("cg-1", &gap, 0.9), caregiver("cg-2", &gap, 0.5)]);

    let handle = GapCoordinator::spawn(h.ctx.clone(), gap.clone()).await;
    h.wait_for_sms(2).await;

    let routed = h.reply("r-1", "cg-1", "maybe").await;
    assert!(matches!(routed, RouteOutcome::Forwarded { intent: ResponseIntent::Ambiguous, .. }));
    h.wait_for_notice(EscalationKind::AmbiguousReply).await;

    let snapshot = handle.snapshot();
    assert_eq!(snapshot.status, GapStatus::OutreachSms);
    assert!(snapshot.assignment.is_none());
    assert_eq!(h.scheduling.commit_calls().len(), 0);

    h.reply("r-2", "cg-1", "yes").await;
    let outcome = handle.wait().await.unwrap();
    assert_eq!(outcome.status(), GapStatus::Filled);
    assert_eq!(outcome.escalations, vec![EscalationKind::AmbiguousReply]);
}

#[tokio::test(start_paused = true)]
async fn test_ineligible_acceptor_is_excluded_and_next_accept_wins() {
    let gap = ShiftGapBuilder::new("gap-1").build();
    let h = Harness::new(vec![caregiver("cg-1", &gap, 0.9), caregiver("cg-2", &gap, 0.5)]);
    h.scheduling.mark_ineligible("cg-1");

    let handle = GapCoordinator::spawn(h.ctx.clone(), gap.clone()).await;
    h.wait_for_sms(2).await;

    h.reply("r-1", "cg-1", "yes").await;
    h.reply("r-2", "cg-2", "yes").await;

    let outcome = handle.wait().await.unwrap();
    assert_eq!(outcome.status(), GapStatus::Filled);
    assert_eq!(
        outcome.assignment.unwrap().caregiver_id,
        CaregiverId::from("cg-2")
    );
    assert!(h
        .texts_to("cg-1")
        .iter()
        .any(|t| t.contains("unable to assign you")));
    assert_eq!(h.scheduling.eligibility_checks().len(), 2);
    assert!(outcome
        .history
        .iter()
        .any(|e| matches!(e, GapEvent::CandidateExcluded { .. })));
}

#[tokio::test(start_paused = true)]
async fn test_eligibility_error_goes_to_operator() {
    let gap = ShiftGapBuilder::new("gap-1").build();
    let h = Harness::new(vec![caregiver("cg-1", &gap, 0.9)]);
    h.scheduling.fail_eligibility_for("cg-1");

    let handle = GapCoordinator::spawn(h.ctx.clone(), gap.clone()).await;
    h.wait_for_sms(1).await;
    h.reply("r-1", "cg-1", "yes").await;

    h.wait_for_notice(EscalationKind::EligibilityCheckFailed).await;
    assert_eq!(handle.snapshot().status, GapStatus::OutreachSms);
    assert!(handle.snapshot().assignment.is_none());
}

#[tokio::test(start_paused = true)]
async fn test_external_resolution_cancels_outreach() {
    let gap = ShiftGapBuilder::new("gap-1").build();
    let h = Harness::new(vec![caregiver("cg-1", &gap, 0.9), caregiver("cg-2", &gap, 0.5)]);

    let handle = GapCoordinator::spawn(h.ctx.clone(), gap.clone()).await;
    h.wait_for_sms(2).await;

    h.scheduling.resolve_externally(&gap.id, "filled by agency");
    let outcome = handle.wait().await.unwrap();
    assert_eq!(outcome.status(), GapStatus::Cancelled);
    assert!(outcome.assignment.is_none());
    assert!(h.notifier.notices().is_empty());

    tokio::time::sleep(Duration::from_secs(2_000)).await;
    assert_eq!(h.gateway.call_count(), 0);

    let routed = h.reply("r-1", "cg-1", "yes").await;
    assert_eq!(
        routed,
        RouteOutcome::AnsweredAlreadyFilled {
            gap_id: gap.id.clone()
        }
    );
    h.wait_for_text("cg-1", "already been filled").await;
    assert_eq!(h.scheduling.commit_calls().len(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_operator_resolution_through_handle() {
    let gap = ShiftGapBuilder::new("gap-1").build();
    let h = Harness::new(vec![caregiver("cg-1", &gap, 0.9)]);

    let handle = GapCoordinator::spawn(h.ctx.clone(), gap.clone()).await;
    h.wait_for_sms(1).await;

    handle.resolve("covered by office staff");
    let outcome = handle.wait().await.unwrap();
    assert_eq!(outcome.status(), GapStatus::Cancelled);
}

#[tokio::test(start_paused = true)]
async fn test_transient_commit_failures_are_retried() {
    let gap = ShiftGapBuilder::new("gap-1").build();
    let h = Harness::new(vec![caregiver("cg-1", &gap, 0.9), caregiver("cg-2", &gap, 0.5)]);
    h.scheduling.fail_commits(2, DispatchError::scheduling("503"));

    let handle = GapCoordinator::spawn(h.ctx.clone(), gap.clone()).await;
    h.wait_for_sms(2).await;
    h.reply("r-1", "cg-1", "yes").await;

    let outcome = handle.wait().await.unwrap();
    assert_eq!(outcome.status(), GapStatus::Filled);
    assert!(matches!(
        outcome.assignment.unwrap().sync_status,
        SyncStatus::Synced { attempts: 3, .. }
    ));
    assert_eq!(h.scheduling.commit_calls().len(), 3);
    // 两条邀约加一条确认，写入重试不会触发新的外呼
    assert_eq!(h.gateway.sms_count(), 3);
    assert_eq!(h.gateway.call_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_exhausted_commit_stays_pending_sync() {
    let gap = ShiftGapBuilder::new("gap-1").build();
    let h = Harness::new(vec![caregiver("cg-1", &gap, 0.9)]);
    h.scheduling.fail_commits(10, DispatchError::scheduling("503"));

    let handle = GapCoordinator::spawn(h.ctx.clone(), gap.clone()).await;
    h.wait_for_sms(1).await;
    h.reply("r-1", "cg-1", "yes").await;

    let outcome = handle.wait().await.unwrap();
    assert_eq!(outcome.status(), GapStatus::FilledPendingSync);
    assert!(matches!(
        outcome.assignment.unwrap().sync_status,
        SyncStatus::Failed { attempts: 3, .. }
    ));
    assert_eq!(outcome.escalations, vec![EscalationKind::CommitSyncFailed]);
    assert_eq!(h.notifier.count(EscalationKind::CommitSyncFailed), 1);
}

#[tokio::test(start_paused = true)]
async fn test_commit_retry_after_lost_ack_is_idempotent() {
    let gap = ShiftGapBuilder::new("gap-1").build();
    let h = Harness::new(vec![caregiver("cg-1", &gap, 0.9)]);
    h.scheduling.fail_after_write(1);

    let handle = GapCoordinator::spawn(h.ctx.clone(), gap.clone()).await;
    h.wait_for_sms(1).await;
    h.reply("r-1", "cg-1", "yes").await;

    let outcome = handle.wait().await.unwrap();
    assert_eq!(outcome.status(), GapStatus::Filled);
    assert_eq!(h.scheduling.assignment_count(), 1);
    assert_eq!(h.scheduling.commit_calls().len(), 1);
    assert!(outcome.history.iter().any(|e| matches!(
        e,
        GapEvent::AssignmentCommitted { outcome, .. } if outcome == "already_committed"
    )));
}

#[tokio::test(start_paused = true)]
async fn test_commit_conflict_keeps_remote_assignment() {
    let gap = ShiftGapBuilder::new("gap-1").build();
    let h = Harness::new(vec![caregiver("cg-1", &gap, 0.9)]);

    let handle = GapCoordinator::spawn(h.ctx.clone(), gap.clone()).await;
    h.wait_for_sms(1).await;
    h.scheduling.assign_externally(&gap.id, "cg-9");
    h.reply("r-1", "cg-1", "yes").await;

    let outcome = handle.wait().await.unwrap();
    assert_eq!(outcome.status(), GapStatus::Filled);
    assert_eq!(
        outcome.assignment.unwrap().sync_status,
        SyncStatus::Conflict {
            assigned_to: CaregiverId::from("cg-9")
        }
    );
    assert_eq!(h.scheduling.assignment_for(&gap.id), Some(CaregiverId::from("cg-9")));
    assert_eq!(h.notifier.count(EscalationKind::CommitConflict), 1);
}

#[tokio::test(start_paused = true)]
async fn test_no_eligible_candidates_escalates_without_outreach() {
    let gap = ShiftGapBuilder::new("gap-1").with_skills(&["dementia"]).build();
    let h = Harness::new(vec![
        CaregiverBuilder::new("cg-1").with_skills(&["companionship"]).build(),
        CaregiverBuilder::new("cg-2").build(),
    ]);

    let handle = GapCoordinator::spawn(h.ctx.clone(), gap.clone()).await;
    let mut rx = handle.subscribe();
    wait_for_status(&mut rx, GapStatus::Escalated).await;
    h.wait_for_notice(EscalationKind::NoEligibleCandidates).await;

    assert!(h.gateway.sent().is_empty());
    assert_eq!(h.scheduling.pool_calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_pool_failure_escalates_after_retries() {
    let gap = ShiftGapBuilder::new("gap-1").build();
    let h = Harness::new(vec![caregiver("cg-1", &gap, 0.9)]);
    h.scheduling
        .fail_pool_reads(3, DispatchError::scheduling("scheduling system down"));

    let handle = GapCoordinator::spawn(h.ctx.clone(), gap.clone()).await;
    let mut rx = handle.subscribe();
    wait_for_status(&mut rx, GapStatus::Escalated).await;
    h.wait_for_notice(EscalationKind::CandidatePoolUnavailable).await;

    assert_eq!(h.scheduling.pool_calls(), 3);
    assert!(h.gateway.sent().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_gap_expires_at_start_time() {
    let gap = ShiftGapBuilder::new("gap-1")
        .starting_in(ChronoDuration::minutes(20))
        .build();
    let h = Harness::new(vec![caregiver("cg-1", &gap, 0.9)]);

    let started = Instant::now();
    let handle = GapCoordinator::spawn(h.ctx.clone(), gap.clone()).await;

    let outcome = handle.wait().await.unwrap();
    assert_eq!(outcome.status(), GapStatus::Expired);
    assert!(started.elapsed() >= Duration::from_secs(19 * 60));
    assert!(started.elapsed() < Duration::from_secs(600 + 900));
    assert_eq!(outcome.escalations, vec![EscalationKind::GapExpired]);

    // 过期后的接受不会产生分配
    let routed = h.reply("r-1", "cg-1", "yes").await;
    assert!(matches!(routed, RouteOutcome::AnsweredAlreadyFilled { .. }));
    assert_eq!(h.scheduling.commit_calls().len(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_gap_already_started_expires_immediately() {
    let gap = ShiftGapBuilder::new("gap-1")
        .starting_in(ChronoDuration::minutes(-5))
        .build();
    let h = Harness::new(vec![caregiver("cg-1", &gap, 0.9)]);

    let handle = GapCoordinator::spawn(h.ctx.clone(), gap.clone()).await;
    let outcome = handle.wait().await.unwrap();

    assert_eq!(outcome.status(), GapStatus::Expired);
    assert_eq!(h.scheduling.pool_calls(), 0);
    assert!(h.gateway.sent().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_escalation_deadline_escalates_early() {
    let gap = ShiftGapBuilder::new("gap-1")
        .with_escalation_deadline(ChronoDuration::minutes(5))
        .build();
    let h = Harness::new(vec![caregiver("cg-1", &gap, 0.9)]);

    let started = Instant::now();
    let handle = GapCoordinator::spawn(h.ctx.clone(), gap.clone()).await;
    let mut rx = handle.subscribe();
    wait_for_status(&mut rx, GapStatus::Escalated).await;

    assert!(started.elapsed() < Duration::from_secs(600));
    tokio::time::sleep(Duration::from_secs(1_800)).await;
    assert_eq!(h.gateway.call_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_expiry_lead_shortens_fill_window() {
    let mut config = test_config();
    config.dispatch.expiry_lead_seconds = 3_600;
    let gap = ShiftGapBuilder::new("gap-1")
        .starting_in(ChronoDuration::minutes(30))
        .build();
    let h = Harness::with_config(config, vec![caregiver("cg-1", &gap, 0.9)]);

    let handle = GapCoordinator::spawn(h.ctx.clone(), gap.clone()).await;
    let outcome = handle.wait().await.unwrap();
    assert_eq!(outcome.status(), GapStatus::Expired);
    assert!(h.gateway.sent().is_empty());
}
