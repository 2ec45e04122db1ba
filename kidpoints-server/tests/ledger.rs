//! Storage-level tests for the points & goals ledger: balance/ledger
//! lockstep, goal achievement paths, and transactional rollback.

use diesel::prelude::*;
use kidpoints_server::storage::{StorageError, Store};
use kidpoints_shared::domain::TransactionKind;

struct TestStore {
    store: Store,
    db_path: String,
    _tempdir: tempfile::TempDir,
}

async fn test_store() -> TestStore {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("test.db").to_str().unwrap().to_string();
    let store = Store::connect_sqlite(&db_path).await.expect("db");
    TestStore {
        store,
        db_path,
        _tempdir: dir,
    }
}

/// Seeds one parent with one kid and returns their ids.
async fn parent_and_kid(store: &Store) -> (i32, i32) {
    let parent = store
        .create_parent("Pat", "pat@example.com", "not-a-real-hash")
        .await
        .expect("parent");
    let kid = store
        .create_kid(parent.id, "Sam", Some(8))
        .await
        .expect("kid");
    (parent.id, kid.id)
}

async fn balance(store: &Store, kid: i32, parent: i32) -> i32 {
    store
        .get_kid(kid, parent)
        .await
        .expect("get_kid")
        .expect("kid row")
        .total_points
}

#[tokio::test]
async fn balance_always_equals_ledger_sum() {
    let ts = test_store().await;
    let (parent, kid) = parent_and_kid(&ts.store).await;

    let deltas = [
        (10, TransactionKind::Reward),
        (-3, TransactionKind::Penalty),
        (25, TransactionKind::Reward),
        (-7, TransactionKind::Penalty),
    ];
    let mut expected = 0;
    for (points, kind) in deltas {
        ts.store
            .apply_points(kid, points, "entry", kind)
            .await
            .expect("apply");
        expected += points;
        assert_eq!(balance(&ts.store, kid, parent).await, expected);
    }

    let history = ts.store.point_history(kid, 50).await.expect("history");
    assert_eq!(history.len(), deltas.len());
    let sum: i32 = history.iter().map(|t| t.points).sum();
    assert_eq!(sum, expected);
    // Sign always matches kind, and deltas are never zero
    for t in &history {
        match t.kind.as_str() {
            "reward" => assert!(t.points > 0),
            "penalty" => assert!(t.points < 0),
            other => panic!("unexpected kind {other}"),
        }
    }
}

#[tokio::test]
async fn validation_failures_leave_no_trace() {
    let ts = test_store().await;
    let (parent, kid) = parent_and_kid(&ts.store).await;

    let cases = [
        (0, "zero", TransactionKind::Reward),
        (-5, "wrong sign", TransactionKind::Reward),
        (5, "wrong sign", TransactionKind::Penalty),
        (5, "   ", TransactionKind::Reward),
        (5, "", TransactionKind::Penalty),
    ];
    for (points, description, kind) in cases {
        let err = ts
            .store
            .apply_points(kid, points, description, kind)
            .await
            .expect_err("should reject");
        assert!(matches!(err, StorageError::InvalidInput(_)), "{err}");
    }

    assert_eq!(balance(&ts.store, kid, parent).await, 0);
    assert!(ts.store.point_history(kid, 50).await.unwrap().is_empty());
}

#[tokio::test]
async fn descriptions_are_stored_trimmed() {
    let ts = test_store().await;
    let (_parent, kid) = parent_and_kid(&ts.store).await;
    let tx = ts
        .store
        .apply_points(kid, 4, "  swept the floor  ", TransactionKind::Reward)
        .await
        .expect("apply");
    assert_eq!(tx.description, "swept the floor");
}

#[tokio::test]
async fn rewards_bulk_achieve_goals_with_timestamp() {
    let ts = test_store().await;
    let (_parent, kid) = parent_and_kid(&ts.store).await;

    let near = ts
        .store
        .create_goal(kid, "comic", None, 10)
        .await
        .expect("goal");
    let mid = ts
        .store
        .create_goal(kid, "toy", Some("lego set"), 50)
        .await
        .expect("goal");
    let far = ts
        .store
        .create_goal(kid, "bike", None, 100)
        .await
        .expect("goal");

    ts.store
        .apply_points(kid, 50, "bonus", TransactionKind::Reward)
        .await
        .expect("apply");

    let goals = ts.store.list_goals(kid).await.expect("goals");
    let by_id = |id: i32| goals.iter().find(|g| g.id == id).unwrap();
    assert!(by_id(near.id).is_achieved);
    assert!(by_id(near.id).achieved_at.is_some());
    assert!(by_id(mid.id).is_achieved);
    assert!(by_id(mid.id).achieved_at.is_some());
    assert!(!by_id(far.id).is_achieved);
    assert!(by_id(far.id).achieved_at.is_none());

    let stats = ts.store.kid_stats(kid).await.expect("stats");
    assert_eq!(stats.goals_achieved, 2);
    assert_eq!(stats.goals_total, 3);

    // Penalties never flip goals, even if the balance still covers them
    let late = ts
        .store
        .create_goal(kid, "late goal", None, 5)
        .await
        .expect("goal");
    ts.store
        .apply_points(kid, -1, "mess", TransactionKind::Penalty)
        .await
        .expect("apply");
    let goals = ts.store.list_goals(kid).await.expect("goals");
    assert!(!goals.iter().find(|g| g.id == late.id).unwrap().is_achieved);
}

#[tokio::test]
async fn manual_achieve_flips_exactly_once() {
    let ts = test_store().await;
    let (_parent, kid) = parent_and_kid(&ts.store).await;

    ts.store
        .apply_points(kid, 100, "allowance", TransactionKind::Reward)
        .await
        .expect("apply");
    // Created after the reward, so the auto path never saw it
    let goal = ts
        .store
        .create_goal(kid, "game", None, 80)
        .await
        .expect("goal");
    assert!(!goal.is_achieved);

    let achieved = ts.store.achieve_goal(goal.id, kid).await.expect("achieve");
    assert!(achieved.is_achieved);
    let stamp = achieved.achieved_at.expect("achieved_at set");

    let err = ts
        .store
        .achieve_goal(goal.id, kid)
        .await
        .expect_err("second achieve must fail");
    assert!(matches!(err, StorageError::NotEligible(_)), "{err}");

    let goals = ts.store.list_goals(kid).await.expect("goals");
    let unchanged = goals.iter().find(|g| g.id == goal.id).unwrap();
    assert!(unchanged.is_achieved);
    assert_eq!(unchanged.achieved_at, Some(stamp));
}

#[tokio::test]
async fn achieve_requires_enough_points_and_ownership() {
    let ts = test_store().await;
    let (parent, kid) = parent_and_kid(&ts.store).await;

    ts.store
        .apply_points(kid, 10, "allowance", TransactionKind::Reward)
        .await
        .expect("apply");
    let goal = ts
        .store
        .create_goal(kid, "bike", None, 500)
        .await
        .expect("goal");

    let err = ts
        .store
        .achieve_goal(goal.id, kid)
        .await
        .expect_err("insufficient points");
    assert!(matches!(err, StorageError::NotEligible(_)), "{err}");
    assert!(!ts.store.list_goals(kid).await.unwrap()[0].is_achieved);

    // A goal id that belongs to another kid is not eligible either
    let other = ts
        .store
        .create_kid(parent, "Alex", None)
        .await
        .expect("second kid");
    let err = ts
        .store
        .achieve_goal(goal.id, other.id)
        .await
        .expect_err("wrong kid");
    assert!(matches!(err, StorageError::NotEligible(_)), "{err}");

    let err = ts
        .store
        .achieve_goal(9999, kid)
        .await
        .expect_err("unknown goal");
    assert!(matches!(err, StorageError::NotEligible(_)), "{err}");
}

#[tokio::test]
async fn mid_transaction_failure_rolls_everything_back() {
    let ts = test_store().await;
    let (parent, kid) = parent_and_kid(&ts.store).await;

    ts.store
        .create_goal(kid, "comic", None, 5)
        .await
        .expect("goal");
    ts.store
        .create_goal(kid, "toy", None, 10)
        .await
        .expect("goal");

    // Make the balance update blow up after the transaction row has been
    // inserted, simulating a storage fault in the middle of apply_points.
    let mut conn = SqliteConnection::establish(&ts.db_path).expect("raw conn");
    diesel::sql_query(
        "CREATE TRIGGER simulated_fault BEFORE UPDATE ON kids \
         WHEN NEW.total_points > 100 \
         BEGIN SELECT RAISE(ABORT, 'simulated storage fault'); END;",
    )
    .execute(&mut conn)
    .expect("trigger");

    let err = ts
        .store
        .apply_points(kid, 500, "jackpot", TransactionKind::Reward)
        .await
        .expect_err("update step must fail");
    assert!(matches!(err, StorageError::Database(_)), "{err}");

    // Neither the transaction row, the balance, nor the goal flags persist
    assert!(ts.store.point_history(kid, 50).await.unwrap().is_empty());
    assert_eq!(balance(&ts.store, kid, parent).await, 0);
    let goals = ts.store.list_goals(kid).await.unwrap();
    assert!(goals.iter().all(|g| !g.is_achieved && g.achieved_at.is_none()));

    // With the fault removed the same reward commits all three steps
    diesel::sql_query("DROP TRIGGER simulated_fault;")
        .execute(&mut conn)
        .expect("drop trigger");
    ts.store
        .apply_points(kid, 500, "jackpot", TransactionKind::Reward)
        .await
        .expect("apply");
    assert_eq!(balance(&ts.store, kid, parent).await, 500);
    let goals = ts.store.list_goals(kid).await.unwrap();
    assert!(goals.iter().all(|g| g.is_achieved && g.achieved_at.is_some()));
}

#[tokio::test]
async fn deleting_a_kid_is_an_atomic_cascade() {
    let ts = test_store().await;
    let (parent, kid) = parent_and_kid(&ts.store).await;

    ts.store
        .apply_points(kid, 5, "chores", TransactionKind::Reward)
        .await
        .expect("apply");
    ts.store
        .create_goal(kid, "toy", None, 50)
        .await
        .expect("goal");

    // Wrong parent: the whole cascade rolls back, child rows survive
    let err = ts
        .store
        .delete_kid(kid, parent + 1)
        .await
        .expect_err("wrong parent");
    assert!(matches!(err, StorageError::NotEligible(_)), "{err}");
    assert_eq!(ts.store.point_history(kid, 50).await.unwrap().len(), 1);
    assert_eq!(ts.store.list_goals(kid).await.unwrap().len(), 1);

    ts.store.delete_kid(kid, parent).await.expect("delete");
    assert!(ts.store.get_kid(kid, parent).await.unwrap().is_none());
    assert!(ts.store.point_history(kid, 50).await.unwrap().is_empty());
    assert!(ts.store.list_goals(kid).await.unwrap().is_empty());
}

#[tokio::test]
async fn kid_names_are_unique_within_a_parent() {
    let ts = test_store().await;
    let (parent, kid) = parent_and_kid(&ts.store).await;

    let err = ts
        .store
        .create_kid(parent, "Sam", None)
        .await
        .expect_err("duplicate name");
    assert!(matches!(err, StorageError::InvalidInput(_)), "{err}");

    // Renaming a kid to its own name is not a conflict
    let same = ts
        .store
        .update_kid(kid, parent, Some("Sam"), Some(9))
        .await
        .expect("self-rename");
    assert_eq!(same.age, Some(9));

    let other = ts
        .store
        .create_kid(parent, "Alex", None)
        .await
        .expect("kid");
    let err = ts
        .store
        .update_kid(other.id, parent, Some("Sam"), None)
        .await
        .expect_err("rename onto taken name");
    assert!(matches!(err, StorageError::InvalidInput(_)), "{err}");

    // Another parent may reuse the name
    let quinn = ts
        .store
        .create_parent("Quinn", "quinn@example.com", "not-a-real-hash")
        .await
        .expect("parent");
    ts.store
        .create_kid(quinn.id, "Sam", None)
        .await
        .expect("same name, different parent");
}

#[tokio::test]
async fn stats_project_the_ledger() {
    let ts = test_store().await;
    let (_parent, kid) = parent_and_kid(&ts.store).await;

    ts.store
        .apply_points(kid, 10, "chores", TransactionKind::Reward)
        .await
        .unwrap();
    ts.store
        .apply_points(kid, 5, "homework", TransactionKind::Reward)
        .await
        .unwrap();
    ts.store
        .apply_points(kid, -3, "mess", TransactionKind::Penalty)
        .await
        .unwrap();
    ts.store.create_goal(kid, "toy", None, 50).await.unwrap();
    ts.store.create_goal(kid, "comic", None, 4).await.unwrap();
    // Reaching the comic threshold happens on the next reward
    ts.store
        .apply_points(kid, 1, "tidy desk", TransactionKind::Reward)
        .await
        .unwrap();

    let stats = ts.store.kid_stats(kid).await.expect("stats");
    assert_eq!(stats.total_points, 13);
    assert_eq!(stats.total_rewards, 16);
    assert_eq!(stats.total_penalties, 3);
    assert_eq!(stats.goals_achieved, 1);
    assert_eq!(stats.goals_total, 2);
}
