use std::sync::Arc;

use engagement_ledger::{EngagementLedger, LedgerError, LedgerSettings};
use engagement_ledger_repository::{EngagementRepository, InMemoryEngagementRepository};
use engagement_ledger_shared::types::{
    AwardOutcome, EngagementCounters, Metadata, PointsAward, PointsChangeset, PointsReason, TargetType,
    VoteState, VoteTarget, VoteValue,
};
use futures::future::join_all;
use uuid::Uuid;

struct Fixture {
    repository: Arc<InMemoryEngagementRepository>,
    ledger: EngagementLedger,
}

fn fixture_with(settings: LedgerSettings) -> Fixture {
    let repository = Arc::new(InMemoryEngagementRepository::new());
    let ledger = EngagementLedger::new(repository.clone(), settings);
    Fixture { repository, ledger }
}

fn fixture() -> Fixture {
    fixture_with(LedgerSettings::default())
}

async fn user(fixture: &Fixture) -> Uuid {
    let user_id = Uuid::new_v4();
    fixture.ledger.register_user(user_id).await.unwrap();
    user_id
}

async fn comment(fixture: &Fixture, owner_id: Option<Uuid>) -> VoteTarget {
    let target = VoteTarget::new(Uuid::new_v4(), TargetType::Comment, owner_id, None);
    fixture.ledger.register_target(&target).await.unwrap();
    target
}

fn canvas(canvas_id: i64) -> Metadata {
    Metadata::new().with("canvasId", canvas_id)
}

#[tokio::test]
async fn test_scenario_canvas_approval_is_awarded_once() {
    let fixture = fixture();
    let author = user(&fixture).await;
    let subject = Some(Uuid::new_v4());

    let first = fixture
        .ledger
        .award_points(author, 100, PointsReason::CanvasApproved, subject, canvas(42))
        .await
        .unwrap();
    assert!(first.is_applied());
    assert_eq!(fixture.ledger.get_user_total_points(author).await.unwrap(), 100);

    let retried = fixture
        .ledger
        .award_points(author, 100, PointsReason::CanvasApproved, subject, canvas(42))
        .await
        .unwrap();
    assert_eq!(retried, AwardOutcome::AlreadyActive);
    assert_eq!(fixture.ledger.get_user_total_points(author).await.unwrap(), 100);
    assert_eq!(fixture.repository.entry_count(author), 1);
    assert!(fixture.ledger.check_points_awarded(author, &canvas(42)).await.unwrap());
}

#[tokio::test]
async fn test_scenario_like_toggle_then_dislike() {
    let fixture = fixture();
    let voter = user(&fixture).await;
    let target = comment(&fixture, None).await;
    let toggle = |vote| fixture.ledger.toggle_vote(voter, target.target_id, TargetType::Comment, vote);

    assert_eq!(toggle(VoteValue::Like).await.unwrap(), EngagementCounters::new(1, 0));
    assert_eq!(toggle(VoteValue::Like).await.unwrap(), EngagementCounters::new(0, 0));

    let counters = toggle(VoteValue::Dislike).await.unwrap();
    assert_eq!(counters, EngagementCounters::new(0, 1));
    assert_eq!(counters.net_score, -1);
    assert_eq!(
        fixture.ledger.get_vote(voter, target.target_id, TargetType::Comment).await.unwrap(),
        VoteState::Disliked
    );
}

#[tokio::test]
async fn test_toggle_symmetry_restores_counters() {
    let fixture = fixture();
    let target = comment(&fixture, None).await;
    for _ in 0..3 {
        let other = user(&fixture).await;
        fixture.ledger.toggle_vote(other, target.target_id, TargetType::Comment, VoteValue::Dislike).await.unwrap();
    }
    let original = fixture.ledger.get_counters(target.target_id, TargetType::Comment).await.unwrap();

    let voter = user(&fixture).await;
    fixture.ledger.toggle_vote(voter, target.target_id, TargetType::Comment, VoteValue::Like).await.unwrap();
    let restored = fixture
        .ledger
        .toggle_vote(voter, target.target_id, TargetType::Comment, VoteValue::Like)
        .await
        .unwrap();

    assert_eq!(restored, original);
    assert_eq!(
        fixture.ledger.get_vote(voter, target.target_id, TargetType::Comment).await.unwrap(),
        VoteState::None
    );
}

#[tokio::test]
async fn test_switch_from_like_to_dislike_moves_net_score_by_two() {
    let fixture = fixture();
    let voter = user(&fixture).await;
    let target = comment(&fixture, None).await;

    let liked = fixture
        .ledger
        .toggle_vote(voter, target.target_id, TargetType::Comment, VoteValue::Like)
        .await
        .unwrap();
    let switched = fixture
        .ledger
        .toggle_vote(voter, target.target_id, TargetType::Comment, VoteValue::Dislike)
        .await
        .unwrap();

    assert_eq!(switched.upvotes - liked.upvotes, -1);
    assert_eq!(switched.downvotes - liked.downvotes, 1);
    assert_eq!(switched.net_score - liked.net_score, -2);
}

#[tokio::test]
async fn test_conservation_after_awards_and_revokes() {
    let fixture = fixture();
    let learner = user(&fixture).await;
    let mut awarded = 0;
    let mut revoked = 0;

    for quiz_id in 0..6 {
        let metadata = Metadata::new().with("quizId", quiz_id);
        let points = 10 + quiz_id;
        if fixture
            .ledger
            .award_points(learner, points, PointsReason::QuizCompleted, None, metadata.clone())
            .await
            .unwrap()
            .is_applied()
        {
            awarded += points;
        }
        if quiz_id % 2 == 0 {
            fixture
                .ledger
                .revoke_points(learner, points, PointsReason::QuizCompleted, None, metadata)
                .await
                .unwrap();
            revoked += points;
        }
    }

    let report = fixture.ledger.reconcile_user_points(learner).await.unwrap();
    assert!(!report.corrected);
    assert_eq!(report.after, awarded - revoked);
    assert_eq!(fixture.ledger.get_user_total_points(learner).await.unwrap(), awarded - revoked);
}

#[tokio::test]
async fn test_reward_can_be_reawarded_after_revocation() {
    let fixture = fixture();
    let author = user(&fixture).await;

    fixture.ledger.award_points(author, 20, PointsReason::CommentApproved, None, canvas(1)).await.unwrap();
    fixture.ledger.revoke_points(author, 20, PointsReason::CommentApproved, None, canvas(1)).await.unwrap();
    assert!(!fixture.ledger.check_points_awarded(author, &canvas(1)).await.unwrap());

    let again = fixture
        .ledger
        .award_points(author, 20, PointsReason::CommentApproved, None, canvas(1))
        .await
        .unwrap();
    assert!(again.is_applied());
    assert_eq!(fixture.ledger.get_user_total_points(author).await.unwrap(), 20);
    assert_eq!(fixture.repository.entry_count(author), 3);
}

#[tokio::test]
async fn test_reconciliation_repairs_corrupted_total() {
    let fixture = fixture();
    let author = user(&fixture).await;
    fixture.ledger.award_points(author, 30, PointsReason::CanvasApproved, None, canvas(7)).await.unwrap();
    fixture.repository.overwrite_cached_total(author, 999);

    let report = fixture.ledger.reconcile_user_points(author).await.unwrap();

    assert!(report.corrected);
    assert_eq!((report.before, report.after), (999, 30));
    assert_eq!(fixture.ledger.get_user_total_points(author).await.unwrap(), 30);
    assert!(!fixture.ledger.reconcile_user_points(author).await.unwrap().corrected);
}

#[tokio::test]
async fn test_reconcile_all_users_sweeps_in_batches() {
    let fixture = fixture_with(LedgerSettings { reconcile_batch_size: 2, ..LedgerSettings::default() });
    let mut drifted = Vec::new();
    for canvas_id in 0..5 {
        let author = user(&fixture).await;
        fixture
            .ledger
            .award_points(author, 5, PointsReason::CanvasApproved, None, canvas(canvas_id))
            .await
            .unwrap();
        if canvas_id != 0 {
            fixture.repository.overwrite_cached_total(author, -1);
            drifted.push(author);
        }
    }

    let mut corrected: Vec<Uuid> = fixture
        .ledger
        .reconcile_all_users()
        .await
        .unwrap()
        .into_iter()
        .map(|report| report.user_id)
        .collect();
    corrected.sort();
    drifted.sort();

    assert_eq!(corrected, drifted);
    assert!(fixture.repository.find_drifted_users(10).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_invalid_awards_are_rejected() {
    let fixture = fixture();
    let author = user(&fixture).await;

    for points in [0, -10] {
        let result = fixture.ledger.award_points(author, points, PointsReason::QuizCompleted, None, canvas(1)).await;
        assert!(matches!(result, Err(LedgerError::Validation(_))));
    }
    let empty = fixture
        .ledger
        .award_points(author, 5, PointsReason::QuizCompleted, None, Metadata::new())
        .await;
    assert!(matches!(empty, Err(LedgerError::Validation(_))));
    let history = fixture.ledger.get_points_history(author, 0).await;
    assert!(matches!(history, Err(LedgerError::Validation(_))));

    assert_eq!(fixture.repository.entry_count(author), 0);
}

#[tokio::test]
async fn test_unknown_user_and_target_are_not_found() {
    let fixture = fixture();
    let voter = user(&fixture).await;

    let vote = fixture.ledger.toggle_vote(voter, Uuid::new_v4(), TargetType::Post, VoteValue::Like).await;
    assert!(matches!(vote, Err(LedgerError::NotFound(_))));

    let award = fixture
        .ledger
        .award_points(Uuid::new_v4(), 5, PointsReason::QuizCompleted, None, canvas(1))
        .await;
    assert!(matches!(award, Err(LedgerError::NotFound(_))));

    let ownerless = VoteTarget::new(Uuid::new_v4(), TargetType::Canvas, Some(Uuid::new_v4()), None);
    let registered = fixture.ledger.register_target(&ownerless).await;
    assert!(matches!(registered, Err(LedgerError::NotFound(_))));

    let total = fixture.ledger.get_user_total_points(Uuid::new_v4()).await;
    assert!(matches!(total, Err(LedgerError::NotFound(_))));
    assert!(fixture.ledger.get_user_points_breakdown(Uuid::new_v4(), None).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_concurrent_identical_awards_apply_once() {
    let fixture = fixture();
    let learner = user(&fixture).await;
    let metadata = Metadata::new().with("quizId", 12).with("attempt", 1);

    let outcomes = join_all((0..16).map(|_| {
        fixture
            .ledger
            .award_points(learner, 15, PointsReason::QuizCompleted, None, metadata.clone())
    }))
    .await;

    let applied = outcomes.iter().filter(|outcome| outcome.as_ref().unwrap().is_applied()).count();
    assert_eq!(applied, 1);
    assert_eq!(fixture.ledger.get_user_total_points(learner).await.unwrap(), 15);
    assert_eq!(fixture.repository.entry_count(learner), 1);
}

#[tokio::test]
async fn test_like_reward_follows_the_vote() {
    let fixture = fixture_with(LedgerSettings { like_reward_points: 3, ..LedgerSettings::default() });
    let author = user(&fixture).await;
    let voter = user(&fixture).await;
    let target = comment(&fixture, Some(author)).await;
    let toggle = |vote| fixture.ledger.toggle_vote(voter, target.target_id, TargetType::Comment, vote);

    toggle(VoteValue::Like).await.unwrap();
    assert_eq!(fixture.ledger.get_user_total_points(author).await.unwrap(), 3);

    toggle(VoteValue::Dislike).await.unwrap();
    assert_eq!(fixture.ledger.get_user_total_points(author).await.unwrap(), 0);

    toggle(VoteValue::Like).await.unwrap();
    assert_eq!(fixture.ledger.get_user_total_points(author).await.unwrap(), 3);

    toggle(VoteValue::Like).await.unwrap();
    assert_eq!(fixture.ledger.get_user_total_points(author).await.unwrap(), 0);
    assert_eq!(fixture.ledger.get_user_total_points(voter).await.unwrap(), 0);

    let breakdown = fixture.ledger.get_user_points_breakdown(author, None).await.unwrap();
    assert_eq!(breakdown.len(), 1);
    assert_eq!(breakdown[0].reason, PointsReason::ContentLiked);
    assert_eq!((breakdown[0].total_points, breakdown[0].count), (0, 4));
}

#[tokio::test]
async fn test_unlike_after_rewards_disabled_still_revokes() {
    let rewarding = fixture_with(LedgerSettings { like_reward_points: 3, ..LedgerSettings::default() });
    let disabled = EngagementLedger::new(
        rewarding.repository.clone(),
        LedgerSettings { like_reward_points: 0, ..LedgerSettings::default() },
    );
    let author = user(&rewarding).await;
    let voter = user(&rewarding).await;
    let target = comment(&rewarding, Some(author)).await;

    rewarding.ledger.toggle_vote(voter, target.target_id, TargetType::Comment, VoteValue::Like).await.unwrap();
    assert_eq!(rewarding.ledger.get_user_total_points(author).await.unwrap(), 3);

    disabled.toggle_vote(voter, target.target_id, TargetType::Comment, VoteValue::Like).await.unwrap();
    assert_eq!(
        disabled.get_vote(voter, target.target_id, TargetType::Comment).await.unwrap(),
        VoteState::None
    );
    assert_eq!(disabled.get_user_total_points(author).await.unwrap(), 0);
    assert!(!disabled.reconcile_user_points(author).await.unwrap().corrected);
}

#[tokio::test]
async fn test_self_votes_earn_nothing() {
    let fixture = fixture();
    let author = user(&fixture).await;
    let target = comment(&fixture, Some(author)).await;

    fixture.ledger.toggle_vote(author, target.target_id, TargetType::Comment, VoteValue::Like).await.unwrap();

    assert_eq!(fixture.ledger.get_user_total_points(author).await.unwrap(), 0);
    assert_eq!(fixture.repository.entry_count(author), 0);
}

#[tokio::test]
async fn test_recount_repairs_drifted_counters() {
    let fixture = fixture();
    let target = comment(&fixture, None).await;
    for vote in [VoteValue::Like, VoteValue::Like, VoteValue::Dislike] {
        let voter = user(&fixture).await;
        fixture.ledger.toggle_vote(voter, target.target_id, TargetType::Comment, vote).await.unwrap();
    }
    fixture
        .repository
        .overwrite_counters((target.target_id, TargetType::Comment), EngagementCounters::new(40, 0));

    let recount = fixture.ledger.recount_target_counters(target.target_id, TargetType::Comment).await.unwrap();

    assert!(recount.corrected);
    assert_eq!(recount.after, EngagementCounters::new(2, 1));
    assert_eq!(
        fixture.ledger.get_counters(target.target_id, TargetType::Comment).await.unwrap(),
        EngagementCounters::new(2, 1)
    );
}

#[tokio::test]
async fn test_breakdown_groups_by_reason_and_subject() {
    let fixture = fixture();
    let author = user(&fixture).await;
    let course = Uuid::new_v4();

    fixture.ledger.award_points(author, 100, PointsReason::CanvasApproved, Some(course), canvas(1)).await.unwrap();
    fixture.ledger.award_points(author, 50, PointsReason::CanvasApproved, None, canvas(2)).await.unwrap();
    fixture
        .ledger
        .award_points(author, 10, PointsReason::QuizCompleted, Some(course), Metadata::new().with("quizId", 1))
        .await
        .unwrap();

    let all = fixture.ledger.get_user_points_breakdown(author, None).await.unwrap();
    let canvas_row = all.iter().find(|row| row.reason == PointsReason::CanvasApproved).unwrap();
    assert_eq!((canvas_row.total_points, canvas_row.count), (150, 2));

    let scoped = fixture.ledger.get_user_points_breakdown(author, Some(course)).await.unwrap();
    let total: i64 = scoped.iter().map(|row| row.total_points).sum();
    assert_eq!(total, 110);
    assert_eq!(scoped.len(), 2);
}

#[tokio::test]
async fn test_changeset_awards_author_and_reviewer_together() {
    let fixture = fixture();
    let author = user(&fixture).await;
    let reviewer = user(&fixture).await;
    let metadata = Metadata::new().with("commentId", 9);

    let awards = [
        PointsAward {
            user_id: author,
            points: 20,
            reason: PointsReason::CommentApproved,
            subject_id: None,
            metadata: metadata.clone(),
        },
        PointsAward {
            user_id: reviewer,
            points: 5,
            reason: PointsReason::Other("REVIEW_COMPLETED".to_string()),
            subject_id: None,
            metadata,
        },
    ];

    let outcomes = fixture
        .ledger
        .persist_changeset(&PointsChangeset { awards: &awards, revokes: &[] })
        .await
        .unwrap();
    assert!(outcomes.iter().all(|outcome| outcome.is_applied()));
    assert_eq!(fixture.ledger.get_user_total_points(author).await.unwrap(), 20);
    assert_eq!(fixture.ledger.get_user_total_points(reviewer).await.unwrap(), 5);

    let history = fixture.ledger.get_points_history(reviewer, 10).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].reason.as_str(), "REVIEW_COMPLETED");
}
