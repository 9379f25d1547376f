mod common;

use common::{
    FakeDatabase, ORDERS_QUERY, create_index_finding, drop_index_finding, finding,
    schema_drop_index_finding,
};
use planwise_analyzer::{
    AdvisorConfig, Assessment, Category, MISSING_INDEX_RULE, MISSING_STATS_RULE, RawPlan,
    SchemaChange, Target, analyze_query,
};
use planwise_core::{Connection, EngineKind};
use planwise_validation::{
    Harness, HarnessConfig, HarnessErrorKind, HarnessState, TrialKey, TrialLocks, run_validation,
};
use rstest::rstest;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

fn harness(db: &Arc<FakeDatabase>) -> Harness {
    Harness::new(db.clone(), HarnessConfig::default().with_iterations(1))
}

mod success_tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_create_index_trial_measures_and_reverts() {
        let db = Arc::new(FakeDatabase::new(EngineKind::Postgresql));
        let mut harness = harness(&db);

        let evidence = harness
            .run(ORDERS_QUERY, &create_index_finding(EngineKind::Postgresql))
            .await
            .unwrap();

        assert_eq!(evidence.rule_id, MISSING_INDEX_RULE);
        assert_eq!(
            evidence.applied,
            "CREATE INDEX idx_orders_customer_id ON orders (customer_id);"
        );
        assert_eq!(evidence.reverted_with, "DROP INDEX idx_orders_customer_id;");
        assert_eq!(evidence.before_time.mean_ms, 10.0);
        assert_eq!(evidence.after_time.mean_ms, 2.0);
        assert!((evidence.improvement_pct - 80.0).abs() < 1e-9);
        assert!(evidence.plan_improved);
        assert_eq!(evidence.assessment, Assessment::Excellent);
        assert!(evidence.reverted);
        assert!(evidence.cost_change_pct.is_some_and(|pct| pct > 99.0));
        assert_eq!(evidence.before.full_scans(), vec!["orders"]);

        assert_eq!(harness.state(), HarnessState::Done);
        assert_eq!(
            harness.history(),
            &[
                HarnessState::Idle,
                HarnessState::Applying,
                HarnessState::Measuring,
                HarnessState::Reverting,
                HarnessState::Done,
            ]
        );
        assert!(db.index_names().is_empty());
    }

    #[rstest]
    #[case(EngineKind::Postgresql)]
    #[case(EngineKind::Mysql)]
    #[tokio::test]
    async fn test_schema_is_unchanged_after_trial(#[case] engine: EngineKind) {
        let db = Arc::new(FakeDatabase::new(engine).with_index("idx_users_email", "users", &["email"]));
        let before = db.schema();

        let evidence = harness(&db)
            .run(ORDERS_QUERY, &create_index_finding(engine))
            .await
            .unwrap();

        assert!(evidence.plan_improved);
        assert_eq!(db.schema(), before);
        assert_eq!(db.ddl().len(), 2);
    }

    #[tokio::test]
    async fn test_repeat_runs_are_averaged() {
        let db = Arc::new(FakeDatabase::new(EngineKind::Postgresql));
        let mut harness = Harness::new(db.clone(), HarnessConfig::default().with_iterations(3));

        let evidence = harness
            .run(ORDERS_QUERY, &create_index_finding(EngineKind::Postgresql))
            .await
            .unwrap();

        assert_eq!(evidence.before_time.runs, 3);
        assert_eq!(evidence.after_time.runs, 3);
        let explains = db
            .statements()
            .iter()
            .filter(|s| s.starts_with("EXPLAIN"))
            .count();
        assert_eq!(explains, 6);
    }

    #[tokio::test]
    async fn test_advice_from_live_plan_can_be_validated() {
        let db = Arc::new(FakeDatabase::new(EngineKind::Postgresql));
        let explain = db
            .query("EXPLAIN (ANALYZE, FORMAT JSON) SELECT * FROM orders WHERE customer_id = 42", &[])
            .await
            .unwrap();
        let raw = RawPlan::from_query_result(&explain).unwrap();
        let report = analyze_query(
            EngineKind::Postgresql,
            ORDERS_QUERY,
            &raw,
            &[],
            AdvisorConfig::default(),
        )
        .unwrap();
        let top = &report.findings[0].finding;
        assert_eq!(top.rule_id, MISSING_INDEX_RULE);

        let evidence = run_validation(db.clone(), ORDERS_QUERY, top).await.unwrap();
        assert_eq!(evidence.assessment, Assessment::Excellent);
        assert!(db.index_names().is_empty());
    }

    #[tokio::test]
    async fn test_drop_index_trial_recreates_from_definition() {
        let db = Arc::new(
            FakeDatabase::new(EngineKind::Postgresql).with_index(
                "idx_orders_status",
                "orders",
                &["status"],
            ),
        );
        let before = db.schema();

        let evidence = harness(&db)
            .run(ORDERS_QUERY, &drop_index_finding("idx_orders_status"))
            .await
            .unwrap();

        assert_eq!(evidence.applied, "DROP INDEX idx_orders_status;");
        assert_eq!(
            evidence.reverted_with,
            "CREATE INDEX idx_orders_status ON orders (status);"
        );
        assert!(!evidence.plan_improved);
        assert_eq!(evidence.after.full_scans(), vec!["orders"]);
        assert_eq!(evidence.assessment, Assessment::Negative);
        assert_eq!(db.schema(), before);
    }

    #[tokio::test]
    async fn test_mysql_drop_index_definition_is_rebuilt() {
        let db = Arc::new(FakeDatabase::new(EngineKind::Mysql).with_index(
            "idx_orders_status",
            "orders",
            &["status", "created_at"],
        ));

        let evidence = harness(&db)
            .run(ORDERS_QUERY, &drop_index_finding("idx_orders_status"))
            .await
            .unwrap();

        assert_eq!(evidence.applied, "DROP INDEX idx_orders_status ON orders;");
        assert_eq!(
            evidence.reverted_with,
            "CREATE INDEX idx_orders_status ON orders (status, created_at);"
        );
        assert_eq!(db.index_names(), vec!["idx_orders_status".to_string()]);
    }

    #[rstest]
    #[case(EngineKind::Postgresql, "DROP INDEX billing.idx_orders_legacy;")]
    #[case(EngineKind::Mysql, "DROP INDEX idx_orders_legacy ON billing.orders;")]
    #[tokio::test]
    async fn test_drop_index_trial_stays_in_its_schema(
        #[case] engine: EngineKind,
        #[case] applied: &str,
    ) {
        let db = Arc::new(
            FakeDatabase::new(engine)
                .with_index_in("archive", "idx_orders_legacy", "orders", &["status"])
                .with_index_in("billing", "idx_orders_legacy", "orders", &["customer_id"]),
        );
        let before = db.schema();

        let evidence = harness(&db)
            .run(
                ORDERS_QUERY,
                &schema_drop_index_finding(Some("billing"), "idx_orders_legacy"),
            )
            .await
            .unwrap();

        assert_eq!(evidence.applied, applied);
        assert_eq!(
            evidence.reverted_with,
            "CREATE INDEX idx_orders_legacy ON billing.orders (customer_id);"
        );
        assert_eq!(
            db.ddl(),
            vec![
                applied.to_string(),
                "CREATE INDEX idx_orders_legacy ON billing.orders (customer_id);".to_string(),
            ]
        );
        assert_eq!(db.schema(), before);
    }
}

mod failure_tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_apply_failure_issues_no_revert() {
        let db = Arc::new(FakeDatabase::new(EngineKind::Postgresql).with_index(
            "idx_orders_customer_id",
            "orders",
            &["customer_id"],
        ));
        let before = db.schema();
        let mut harness = harness(&db);

        let err = harness
            .run(ORDERS_QUERY, &create_index_finding(EngineKind::Postgresql))
            .await
            .unwrap_err();

        assert_eq!(err.phase, HarnessState::Applying);
        assert!(!err.is_escalated());
        assert!(err.to_string().contains("already exists"));
        assert_eq!(
            db.ddl(),
            vec!["CREATE INDEX idx_orders_customer_id ON orders (customer_id);".to_string()]
        );
        assert_eq!(db.schema(), before);
        assert_eq!(harness.state(), HarnessState::Failed);
    }

    #[tokio::test]
    async fn test_baseline_failure_happens_before_any_ddl() {
        let db = Arc::new(FakeDatabase::new(EngineKind::Postgresql));
        db.fail_on("EXPLAIN");

        let err = harness(&db)
            .run(ORDERS_QUERY, &create_index_finding(EngineKind::Postgresql))
            .await
            .unwrap_err();

        assert_eq!(err.phase, HarnessState::Applying);
        assert!(matches!(err.kind, HarnessErrorKind::Statement { .. }));
        assert!(db.ddl().is_empty());
    }

    #[tokio::test]
    async fn test_measuring_failure_still_reverts() {
        let db = Arc::new(FakeDatabase::new(EngineKind::Postgresql));
        db.fail_while_indexed("EXPLAIN");
        let mut harness = harness(&db);

        let err = harness
            .run(ORDERS_QUERY, &create_index_finding(EngineKind::Postgresql))
            .await
            .unwrap_err();

        assert_eq!(err.phase, HarnessState::Measuring);
        assert!(!err.is_escalated());
        assert_eq!(
            db.ddl(),
            vec![
                "CREATE INDEX idx_orders_customer_id ON orders (customer_id);".to_string(),
                "DROP INDEX idx_orders_customer_id;".to_string(),
            ]
        );
        assert!(db.index_names().is_empty());
        assert_eq!(harness.state(), HarnessState::Failed);
    }

    #[tokio::test]
    async fn test_revert_failure_is_escalated() {
        let db = Arc::new(FakeDatabase::new(EngineKind::Postgresql));
        db.fail_on("DROP INDEX");
        let mut harness = harness(&db);

        let err = harness
            .run(ORDERS_QUERY, &create_index_finding(EngineKind::Postgresql))
            .await
            .unwrap_err();

        assert_eq!(err.phase, HarnessState::Reverting);
        assert!(err.is_escalated());
        assert_eq!(
            err.pending_revert.as_deref(),
            Some("DROP INDEX idx_orders_customer_id;")
        );
        assert!(err.to_string().contains("MANUAL CLEANUP REQUIRED"));
        assert_eq!(db.index_names(), vec!["idx_orders_customer_id".to_string()]);
        assert_eq!(harness.state(), HarnessState::Failed);
        assert_eq!(
            harness.history(),
            &[
                HarnessState::Idle,
                HarnessState::Applying,
                HarnessState::Measuring,
                HarnessState::Reverting,
                HarnessState::Failed,
            ]
        );
    }

    #[tokio::test]
    async fn test_analyze_is_not_trialable() {
        let db = Arc::new(FakeDatabase::new(EngineKind::Postgresql));
        let analyze = finding(
            MISSING_STATS_RULE,
            Category::StatsIssue,
            Target::columns("orders", Vec::new()),
            SchemaChange::Analyze {
                tables: vec!["orders".to_string()],
            },
        );

        let err = harness(&db).run(ORDERS_QUERY, &analyze).await.unwrap_err();

        assert!(matches!(err.kind, HarnessErrorKind::NotReversible(_)));
        assert_eq!(err.phase, HarnessState::Applying);
        assert!(db.statements().is_empty());
    }

    #[tokio::test]
    async fn test_missing_definition_blocks_drop_trial() {
        let db = Arc::new(FakeDatabase::new(EngineKind::Postgresql));

        let err = harness(&db)
            .run(ORDERS_QUERY, &drop_index_finding("idx_gone"))
            .await
            .unwrap_err();

        assert!(matches!(err.kind, HarnessErrorKind::MissingDefinition { .. }));
        assert!(db.ddl().is_empty());
    }
}

mod cancellation_tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_cancelled_before_apply_issues_no_ddl() {
        let db = Arc::new(FakeDatabase::new(EngineKind::Postgresql));
        let token = CancellationToken::new();
        token.cancel();

        let err = harness(&db)
            .with_cancellation(token)
            .run(ORDERS_QUERY, &create_index_finding(EngineKind::Postgresql))
            .await
            .unwrap_err();

        assert!(err.is_cancelled());
        assert_eq!(err.phase, HarnessState::Applying);
        assert!(db.statements().is_empty());
    }

    #[tokio::test]
    async fn test_cancelled_after_apply_still_reverts() {
        let db = Arc::new(FakeDatabase::new(EngineKind::Postgresql));
        let token = CancellationToken::new();
        db.cancel_on_apply(token.clone());
        let mut harness = harness(&db).with_cancellation(token);

        let err = harness
            .run(ORDERS_QUERY, &create_index_finding(EngineKind::Postgresql))
            .await
            .unwrap_err();

        assert!(err.is_cancelled());
        assert_eq!(err.phase, HarnessState::Measuring);
        assert!(!err.is_escalated());
        assert_eq!(
            db.ddl(),
            vec![
                "CREATE INDEX idx_orders_customer_id ON orders (customer_id);".to_string(),
                "DROP INDEX idx_orders_customer_id;".to_string(),
            ]
        );
        assert!(db.index_names().is_empty());
        assert!(harness.history().contains(&HarnessState::Reverting));
    }
}

mod abandonment_tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    #[tokio::test]
    async fn test_dropped_trial_reverts_in_background() {
        let db = Arc::new(FakeDatabase::new(EngineKind::Postgresql));
        db.stall_while_indexed();
        let mut harness = harness(&db);
        let finding = create_index_finding(EngineKind::Postgresql);

        let outcome =
            tokio::time::timeout(Duration::from_millis(50), harness.run(ORDERS_QUERY, &finding))
                .await;
        assert!(outcome.is_err());

        for _ in 0..100 {
            if db.index_names().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(db.index_names().is_empty());
        assert_eq!(
            db.ddl().last().map(String::as_str),
            Some("DROP INDEX idx_orders_customer_id;")
        );
    }

    #[tokio::test]
    async fn test_abandoned_trial_holds_lock_until_reverted() {
        let db = Arc::new(FakeDatabase::new(EngineKind::Postgresql));
        db.stall_while_indexed();
        db.hold_drops();
        let locks = TrialLocks::new();
        let mut harness = harness(&db).with_locks(locks.clone());
        let finding = create_index_finding(EngineKind::Postgresql);
        let key = TrialKey::new("orders", &finding.suggested_action);

        let outcome =
            tokio::time::timeout(Duration::from_millis(50), harness.run(ORDERS_QUERY, &finding))
                .await;
        assert!(outcome.is_err());

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(db.index_names(), vec!["idx_orders_customer_id".to_string()]);
        assert!(locks.try_acquire(key.clone()).is_none());

        db.release_drops();
        let mut permit = None;
        for _ in 0..100 {
            permit = locks.try_acquire(key.clone());
            if permit.is_some() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(permit.is_some());
        assert!(db.index_names().is_empty());

        drop(permit);
        assert!(locks.is_empty());
    }
}

mod lock_tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_concurrent_trials_of_same_change_are_serialized() {
        let db = Arc::new(FakeDatabase::new(EngineKind::Postgresql));
        let locks = TrialLocks::new();

        let trials: Vec<_> = (0..2)
            .map(|_| {
                let db = db.clone();
                let locks = locks.clone();
                tokio::spawn(async move {
                    Harness::new(db, HarnessConfig::default().with_iterations(2))
                        .with_locks(locks)
                        .run(ORDERS_QUERY, &create_index_finding(EngineKind::Postgresql))
                        .await
                })
            })
            .collect();
        for trial in trials {
            assert!(trial.await.unwrap().is_ok());
        }

        assert_eq!(
            db.ddl(),
            vec![
                "CREATE INDEX idx_orders_customer_id ON orders (customer_id);".to_string(),
                "DROP INDEX idx_orders_customer_id;".to_string(),
                "CREATE INDEX idx_orders_customer_id ON orders (customer_id);".to_string(),
                "DROP INDEX idx_orders_customer_id;".to_string(),
            ]
        );
        assert!(locks.is_empty());
    }
}
