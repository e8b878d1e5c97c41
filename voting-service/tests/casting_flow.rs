mod common;

use std::time::Duration as StdDuration;

use chrono::{Duration, Utc};
use common::*;

use voting_service::audit::AuditKind;
use voting_service::casting::CastMode;
use voting_service::database::models::{CampaignRecord, CampaignState, NewVote, VoteRecord, VoteStatus};
use voting_service::error::{StoreError, VoteError};
use voting_service::hasher::vote_content_hash;
use voting_service::ledger::LedgerError;

#[tokio::test]
async fn synchronous_cast_confirms_and_blocks_second_vote() {
    let ctx = setup().await;
    let campaign = seed_open_campaign(&ctx, &["Yes", "No"], true).await;
    let options = CampaignRecord::options(ctx.db.pool(), campaign.id)
        .await
        .unwrap();

    let receipt = ctx
        .casting
        .cast_vote(campaign.id, 42, options[0].id, "dni-42", CastMode::Synchronous)
        .await
        .unwrap();
    assert_eq!(receipt.status, VoteStatus::Confirmed);
    assert!(receipt.ledger_tx.is_some());
    assert!(receipt.confirmed_at.is_some());

    let tally = VoteRecord::tally(ctx.db.pool(), campaign.id).await.unwrap();
    assert_eq!(tally[0].label, "Yes");
    assert_eq!(tally[0].votes, 1);
    assert_eq!(tally[1].label, "No");
    assert_eq!(tally[1].votes, 0);

    // The same voter picking the other option later is refused.
    let err = ctx
        .casting
        .cast_vote(campaign.id, 42, options[1].id, "dni-42", CastMode::Synchronous)
        .await
        .unwrap_err();
    assert!(matches!(err, VoteError::AlreadyVoted { .. }));
}

#[tokio::test]
async fn casting_outside_the_window_is_invalid_and_never_reaches_the_ledger() {
    let ctx = setup().await;
    let now = Utc::now();

    // Window already over.
    let ended = seed_campaign(
        &ctx,
        CampaignState::Open,
        now - Duration::hours(2),
        now - Duration::seconds(1),
        &["Yes", "No"],
        true,
    )
    .await;
    let options = CampaignRecord::options(ctx.db.pool(), ended.id).await.unwrap();
    let err = ctx
        .casting
        .cast_vote(ended.id, 1, options[0].id, "dni-1", CastMode::Synchronous)
        .await
        .unwrap_err();
    assert!(matches!(err, VoteError::InvalidVoteRequest(_)));

    // Window not started yet.
    let upcoming = seed_campaign(
        &ctx,
        CampaignState::Open,
        now + Duration::hours(1),
        now + Duration::hours(2),
        &["Yes", "No"],
        true,
    )
    .await;
    let options = CampaignRecord::options(ctx.db.pool(), upcoming.id).await.unwrap();
    let err = ctx
        .casting
        .cast_vote(upcoming.id, 1, options[0].id, "dni-1", CastMode::Synchronous)
        .await
        .unwrap_err();
    assert!(matches!(err, VoteError::InvalidVoteRequest(_)));

    assert_eq!(ctx.ledger.submit_call_count(), 0);
}

#[tokio::test]
async fn non_open_campaign_and_foreign_option_are_invalid() {
    let ctx = setup().await;
    let now = Utc::now();

    let draft = seed_campaign(
        &ctx,
        CampaignState::Draft,
        now - Duration::minutes(5),
        now + Duration::hours(1),
        &["Yes", "No"],
        false,
    )
    .await;
    let draft_options = CampaignRecord::options(ctx.db.pool(), draft.id).await.unwrap();
    let err = ctx
        .casting
        .cast_vote(draft.id, 1, draft_options[0].id, "dni-1", CastMode::Synchronous)
        .await
        .unwrap_err();
    assert!(matches!(err, VoteError::InvalidVoteRequest(_)));

    // An option id from another campaign is refused even though it exists.
    let open = seed_open_campaign(&ctx, &["A", "B"], true).await;
    let err = ctx
        .casting
        .cast_vote(open.id, 1, draft_options[0].id, "dni-1", CastMode::Synchronous)
        .await
        .unwrap_err();
    assert!(matches!(err, VoteError::InvalidVoteRequest(_)));

    let err = ctx
        .casting
        .cast_vote(999, 1, 1, "dni-1", CastMode::Synchronous)
        .await
        .unwrap_err();
    assert!(matches!(err, VoteError::InvalidVoteRequest(_)));
}

#[tokio::test]
async fn rejected_attempt_is_kept_but_does_not_block_a_retry() {
    let ctx = setup().await;
    let campaign = seed_open_campaign(&ctx, &["Yes", "No"], true).await;
    let options = CampaignRecord::options(ctx.db.pool(), campaign.id)
        .await
        .unwrap();

    ctx.ledger
        .queue_submit(Err(LedgerError::Unavailable("node timed out".to_string())));

    // The failed attempt surfaces as a rejected receipt, not an error.
    let first = ctx
        .casting
        .cast_vote(campaign.id, 42, options[0].id, "dni-42", CastMode::Synchronous)
        .await
        .unwrap();
    assert_eq!(first.status, VoteStatus::Rejected);
    assert!(first.ledger_error.is_some());
    assert!(first.ledger_tx.is_none());

    // The rejected row stays behind for audit...
    let kept = VoteRecord::get(ctx.db.pool(), first.vote_id).await.unwrap();
    assert_eq!(kept.status, VoteStatus::Rejected);

    // ...and does not count as having voted, so a fresh attempt succeeds.
    assert!(!ctx.casting.has_voted(42, campaign.id).await.unwrap());
    let second = ctx
        .casting
        .cast_vote(campaign.id, 42, options[0].id, "dni-42", CastMode::Synchronous)
        .await
        .unwrap();
    assert_eq!(second.status, VoteStatus::Confirmed);
    assert!(ctx.casting.has_voted(42, campaign.id).await.unwrap());
}

#[tokio::test]
async fn duplicate_insert_is_stopped_by_the_uniqueness_constraint() {
    let ctx = setup().await;
    let campaign = seed_open_campaign(&ctx, &["Yes", "No"], false).await;
    let options = CampaignRecord::options(ctx.db.pool(), campaign.id)
        .await
        .unwrap();

    let first = NewVote {
        voter_id: 7,
        campaign_id: campaign.id,
        option_id: options[0].id,
        content_hash: vote_content_hash(campaign.id, 7, options[0].id, "dni-7", 1),
    };
    VoteRecord::insert_pending(ctx.db.pool(), &first)
        .await
        .unwrap();

    // Same voter, different hash: the (campaign, voter) guard fires.
    let second = NewVote {
        voter_id: 7,
        campaign_id: campaign.id,
        option_id: options[1].id,
        content_hash: vote_content_hash(campaign.id, 7, options[1].id, "dni-7", 2),
    };
    let err = VoteRecord::insert_pending(ctx.db.pool(), &second)
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::Duplicate));
}

#[tokio::test]
async fn concurrent_attempts_leave_at_most_one_live_vote() {
    let ctx = setup().await;
    let campaign = seed_open_campaign(&ctx, &["Yes", "No"], true).await;
    let options = CampaignRecord::options(ctx.db.pool(), campaign.id)
        .await
        .unwrap();

    let (a, b) = tokio::join!(
        ctx.casting
            .cast_vote(campaign.id, 42, options[0].id, "dni-42", CastMode::Synchronous),
        ctx.casting
            .cast_vote(campaign.id, 42, options[1].id, "dni-42", CastMode::Synchronous),
    );

    let succeeded = [a.is_ok(), b.is_ok()].iter().filter(|ok| **ok).count();
    assert_eq!(succeeded, 1);

    // The loser saw either the pre-check answer or the torn mid-flight state.
    let err = if a.is_err() {
        a.unwrap_err()
    } else {
        b.unwrap_err()
    };
    assert!(matches!(
        err,
        VoteError::AlreadyVoted { .. } | VoteError::IntegrityConflict { .. }
    ));

    let tally = VoteRecord::tally(ctx.db.pool(), campaign.id).await.unwrap();
    let confirmed: i64 = tally.iter().map(|t| t.votes).sum();
    assert_eq!(confirmed, 1);
}

#[tokio::test]
async fn confirmation_update_is_idempotent() {
    let ctx = setup().await;
    let campaign = seed_open_campaign(&ctx, &["Yes", "No"], false).await;
    let options = CampaignRecord::options(ctx.db.pool(), campaign.id)
        .await
        .unwrap();

    let vote = VoteRecord::insert_pending(
        ctx.db.pool(),
        &NewVote {
            voter_id: 5,
            campaign_id: campaign.id,
            option_id: options[0].id,
            content_hash: vote_content_hash(campaign.id, 5, options[0].id, "dni-5", 1),
        },
    )
    .await
    .unwrap();

    VoteRecord::update_confirmation(ctx.db.pool(), vote.id, Some("tx-1"), VoteStatus::Confirmed)
        .await
        .unwrap();
    let after_first = VoteRecord::get(ctx.db.pool(), vote.id).await.unwrap();

    tokio::time::sleep(StdDuration::from_millis(20)).await;

    VoteRecord::update_confirmation(ctx.db.pool(), vote.id, Some("tx-1"), VoteStatus::Confirmed)
        .await
        .unwrap();
    let after_second = VoteRecord::get(ctx.db.pool(), vote.id).await.unwrap();

    assert_eq!(after_second.status, VoteStatus::Confirmed);
    assert_eq!(after_second.ledger_tx, after_first.ledger_tx);
    assert_eq!(after_second.confirmed_at, after_first.confirmed_at);
}

#[tokio::test]
async fn ledger_query_failure_reads_as_unknown_not_false() {
    let ctx = setup().await;
    let campaign = seed_open_campaign(&ctx, &["Yes", "No"], true).await;
    let options = CampaignRecord::options(ctx.db.pool(), campaign.id)
        .await
        .unwrap();

    // The verdict records the failure and stays consistent.
    ctx.ledger
        .queue_has_voted(Err(LedgerError::Query("node down".to_string())));
    let verdict = ctx.checker.check(42, campaign.id).await.unwrap();
    assert_eq!(verdict.remote_has_voted, None);
    assert!(verdict.remote_error.is_some());
    assert!(verdict.consistent);

    // Casting still goes through on the strength of the local store.
    ctx.ledger
        .queue_has_voted(Err(LedgerError::Query("node down".to_string())));
    let receipt = ctx
        .casting
        .cast_vote(campaign.id, 42, options[0].id, "dni-42", CastMode::Synchronous)
        .await
        .unwrap();
    assert_eq!(receipt.status, VoteStatus::Confirmed);
}

#[tokio::test]
async fn divergence_is_surfaced_as_conflict_and_audited_once() {
    let ctx = setup().await;
    let campaign = seed_open_campaign(&ctx, &["Yes", "No"], true).await;
    let options = CampaignRecord::options(ctx.db.pool(), campaign.id)
        .await
        .unwrap();

    let receipt = ctx
        .casting
        .cast_vote(campaign.id, 42, options[0].id, "dni-42", CastMode::Synchronous)
        .await
        .unwrap();
    assert_eq!(receipt.status, VoteStatus::Confirmed);
    assert_eq!(
        ctx.audit
            .count_kind(AuditKind::IntegrityConflict)
            .await
            .unwrap(),
        0
    );

    // The ledger now claims this voter never voted: local and remote diverge.
    ctx.ledger.queue_has_voted(Ok(false));
    let err = ctx
        .casting
        .cast_vote(campaign.id, 42, options[1].id, "dni-42", CastMode::Synchronous)
        .await
        .unwrap_err();
    assert!(matches!(err, VoteError::IntegrityConflict { .. }));

    assert_eq!(
        ctx.audit
            .count_kind(AuditKind::IntegrityConflict)
            .await
            .unwrap(),
        1
    );
}

#[tokio::test]
async fn background_cast_returns_pending_then_confirms() {
    let ctx = setup().await;
    let campaign = seed_open_campaign(&ctx, &["Yes", "No"], true).await;
    let options = CampaignRecord::options(ctx.db.pool(), campaign.id)
        .await
        .unwrap();

    let receipt = ctx
        .casting
        .cast_vote(campaign.id, 42, options[0].id, "dni-42", CastMode::Background)
        .await
        .unwrap();
    assert_eq!(receipt.status, VoteStatus::Pending);
    assert!(receipt.ledger_tx.is_none());

    // The spawned observer settles the row shortly after.
    let mut vote = VoteRecord::get(ctx.db.pool(), receipt.vote_id).await.unwrap();
    for _ in 0..100 {
        if vote.status != VoteStatus::Pending {
            break;
        }
        tokio::time::sleep(StdDuration::from_millis(20)).await;
        vote = VoteRecord::get(ctx.db.pool(), receipt.vote_id).await.unwrap();
    }
    assert_eq!(vote.status, VoteStatus::Confirmed);
    assert!(vote.ledger_tx.is_some());
    assert!(vote.confirmed_at.is_some());
}

#[tokio::test]
async fn receipt_verification_follows_the_ledger_tx() {
    let ctx = setup().await;
    let campaign = seed_open_campaign(&ctx, &["Yes", "No"], true).await;
    let options = CampaignRecord::options(ctx.db.pool(), campaign.id)
        .await
        .unwrap();

    let receipt = ctx
        .casting
        .cast_vote(campaign.id, 42, options[0].id, "dni-42", CastMode::Synchronous)
        .await
        .unwrap();

    let verification = ctx
        .checker
        .verify_vote(&receipt.content_hash)
        .await
        .unwrap();
    assert!(verification.verified);
    assert_eq!(verification.ledger_tx, receipt.ledger_tx);
    assert!(verification.block_ref.is_some());

    // Unknown hash.
    let missing = ctx.checker.verify_vote("deadbeef").await.unwrap();
    assert!(!missing.verified);

    // A vote that never reached the ledger is reported as pending.
    let pending = VoteRecord::insert_pending(
        ctx.db.pool(),
        &NewVote {
            voter_id: 43,
            campaign_id: campaign.id,
            option_id: options[0].id,
            content_hash: vote_content_hash(campaign.id, 43, options[0].id, "dni-43", 1),
        },
    )
    .await
    .unwrap();
    let unverified = ctx
        .checker
        .verify_vote(&pending.content_hash)
        .await
        .unwrap();
    assert!(!unverified.verified);
    assert!(unverified.ledger_tx.is_none());
}
