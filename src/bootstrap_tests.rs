// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for `bootstrap.rs`

#[cfg(test)]
mod tests {
    use super::super::*;
    use crate::store::MemoryAnnotationStore;
    use crate::test_support::RecordingSqlRunner;
    use tokio::time::Instant;

    const NS: &str = "db";

    fn labels(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    fn sharded(role: &str) -> BTreeMap<String, String> {
        labels(&[
            (BGCLUSTER_PART_OF_LABEL, "shop"),
            (BGCLUSTER_ROLE_LABEL, role),
        ])
    }

    struct Harness {
        store: Arc<MemoryAnnotationStore>,
        runner: Arc<RecordingSqlRunner>,
        pod: ObjectRef,
        cluster: ObjectRef,
    }

    impl Harness {
        fn new(cluster: &str, annotations: &[(&str, &str)], runner: RecordingSqlRunner) -> Self {
            let store = Arc::new(MemoryAnnotationStore::new());
            let pod = ObjectRef::pod(NS, &format!("{cluster}-0"));
            let cluster = ObjectRef::bg_cluster(NS, cluster);
            store.insert(&pod, []);
            store.insert(&cluster, annotations.iter().copied());
            Self {
                store,
                runner: Arc::new(runner),
                pod,
                cluster,
            }
        }

        fn bootstrapper(&self) -> Bootstrapper {
            Bootstrapper::new(
                self.store.clone(),
                SqlExecutor::new(self.runner.clone()),
                self.pod.clone(),
                self.cluster.clone(),
            )
        }
    }

    #[test]
    fn test_classify_is_total() {
        let cases = [
            (labels(&[]), Some(Role::Standalone)),
            (labels(&[(BGCLUSTER_ROLE_LABEL, "worker")]), Some(Role::Standalone)),
            (labels(&[(BGCLUSTER_ROLE_LABEL, "bogus")]), Some(Role::Standalone)),
            (sharded("worker"), Some(Role::Worker)),
            (sharded("coordinator"), Some(Role::Coordinator)),
            (sharded("observer"), None),
            (labels(&[(BGCLUSTER_PART_OF_LABEL, "shop")]), None),
        ];

        for (labels, expected) in cases {
            let result = classify("shop-x", &labels);
            match expected {
                Some(role) => assert_eq!(result.unwrap(), role, "labels: {labels:?}"),
                None => assert!(
                    matches!(result, Err(BootstrapError::UnresolvableRole { .. })),
                    "labels: {labels:?}"
                ),
            }
        }
    }

    #[test]
    fn test_unresolvable_role_carries_label_value() {
        let err = classify("shop-x", &sharded("observer")).unwrap_err();

        match err {
            BootstrapError::UnresolvableRole { cluster, role } => {
                assert_eq!(cluster, "shop-x");
                assert_eq!(role.as_deref(), Some("observer"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_initialized_cluster_runs_no_sql() {
        let h = Harness::new(
            "orders",
            &[(BGCLUSTER_INITIALIZED_ANNOTATION, "true")],
            RecordingSqlRunner::new(),
        );
        let mut bootstrapper = h.bootstrapper();

        let outcome = bootstrapper
            .run(&sharded("coordinator"), &["CREATE TABLE t ();".to_string()])
            .await
            .unwrap();

        assert_eq!(outcome, BootstrapOutcome::AlreadyInitialized);
        assert!(h.runner.attempts().is_empty());
        assert_eq!(bootstrapper.state(), BootstrapState::Initialized);
        assert_eq!(h.store.value(&h.pod, BGDBOPS_COMPLETED_ANNOTATION), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_initialized_cluster_with_pending_restart_marks_pod_complete() {
        let h = Harness::new(
            "orders",
            &[
                (BGCLUSTER_INITIALIZED_ANNOTATION, "true"),
                (BGDBOPS_PENDING_ANNOTATION, "true"),
                (BGDBOPS_OP_ANNOTATION, "restart"),
            ],
            RecordingSqlRunner::new(),
        );

        h.bootstrapper().run(&labels(&[]), &[]).await.unwrap();

        assert_eq!(
            h.store.value(&h.pod, BGDBOPS_COMPLETED_ANNOTATION).as_deref(),
            Some("true")
        );
        assert!(h.runner.attempts().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_initialized_cluster_with_pending_vacuum_leaves_pod_alone() {
        let h = Harness::new(
            "orders",
            &[
                (BGCLUSTER_INITIALIZED_ANNOTATION, "true"),
                (BGDBOPS_PENDING_ANNOTATION, "true"),
                (BGDBOPS_OP_ANNOTATION, "vacuum"),
            ],
            RecordingSqlRunner::new(),
        );

        h.bootstrapper().run(&labels(&[]), &[]).await.unwrap();

        assert_eq!(h.store.value(&h.pod, BGDBOPS_COMPLETED_ANNOTATION), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unresolvable_role_runs_nothing() {
        let h = Harness::new("orders", &[], RecordingSqlRunner::new());
        let mut bootstrapper = h.bootstrapper();

        let err = bootstrapper.run(&sharded("observer"), &[]).await.unwrap_err();

        assert!(matches!(err, BootstrapError::UnresolvableRole { .. }));
        assert_eq!(bootstrapper.state(), BootstrapState::Unclassified);
        assert_eq!(h.store.value(&h.cluster, BGCLUSTER_INITIALIZED_ANNOTATION), None);
        assert!(h.runner.attempts().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_standalone_runs_user_sql_and_marks_initialized() {
        let h = Harness::new("orders", &[], RecordingSqlRunner::new());
        let start = Instant::now();

        let outcome = h
            .bootstrapper()
            .run(&labels(&[]), &["CREATE ROLE app;".to_string()])
            .await
            .unwrap();

        assert_eq!(outcome, BootstrapOutcome::Completed(Role::Standalone));
        assert_eq!(h.runner.attempts(), vec!["CREATE ROLE app;"]);
        assert_eq!(start.elapsed(), Duration::from_secs(BOOTSTRAP_GRACE_PERIOD_SECS));
        assert_eq!(
            h.store.value(&h.cluster, BGCLUSTER_INITIALIZED_ANNOTATION).as_deref(),
            Some("true")
        );
        assert_eq!(
            h.store.value(&h.pod, BGCLUSTER_INITIALIZED_ANNOTATION).as_deref(),
            Some("true")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_marker_passes_through_false() {
        let h = Harness::new("orders", &[], RecordingSqlRunner::new());

        h.bootstrapper().run(&labels(&[]), &[]).await.unwrap();

        // <unset> -> "false" -> "true"
        assert_eq!(h.store.write_count(&h.cluster, BGCLUSTER_INITIALIZED_ANNOTATION), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_user_sql_failure_is_not_fatal() {
        let h = Harness::new(
            "orders",
            &[],
            RecordingSqlRunner::new().semantic_on("broken"),
        );

        let outcome = h
            .bootstrapper()
            .run(
                &labels(&[]),
                &["SELECT broken;".to_string(), "SELECT never;".to_string()],
            )
            .await
            .unwrap();

        assert_eq!(outcome, BootstrapOutcome::Completed(Role::Standalone));
        assert_eq!(h.runner.attempts(), vec!["SELECT broken;"]);
        assert_eq!(
            h.store.value(&h.cluster, BGCLUSTER_INITIALIZED_ANNOTATION).as_deref(),
            Some("true")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_worker_creates_extension_then_user_sql() {
        let h = Harness::new("shop-worker-0", &[], RecordingSqlRunner::new());

        let outcome = h
            .bootstrapper()
            .run(&sharded("worker"), &["CREATE TABLE t ();".to_string()])
            .await
            .unwrap();

        assert_eq!(outcome, BootstrapOutcome::Completed(Role::Worker));
        assert_eq!(
            h.runner.attempts(),
            vec![CREATE_CITUS_EXTENSION_SQL, "CREATE TABLE t ();"]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_worker_extension_failure_is_fatal() {
        let h = Harness::new(
            "shop-worker-0",
            &[],
            RecordingSqlRunner::new().semantic_on("CREATE EXTENSION"),
        );

        let err = h
            .bootstrapper()
            .run(&sharded("worker"), &["CREATE TABLE t ();".to_string()])
            .await
            .unwrap_err();

        assert!(matches!(err, BootstrapError::SystemSql { .. }));
        assert_eq!(h.runner.attempts(), vec![CREATE_CITUS_EXTENSION_SQL]);
        assert_eq!(
            h.store.value(&h.cluster, BGCLUSTER_INITIALIZED_ANNOTATION).as_deref(),
            Some("false"),
            "Marker stays false after a failed bootstrap"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_coordinator_adds_ready_worker_and_late_worker_after_timeout() {
        let h = Harness::new(
            "shop",
            &[(BGSHARDEDCLUSTER_WORKERS_ANNOTATION, r#"["w0","w1"]"#)],
            RecordingSqlRunner::new(),
        );
        let start = Instant::now();

        let store = h.store.clone();
        let cluster = h.cluster.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            store.put(&cluster, &worker_initialized_annotation("w0"), "true");
        });
        let runner = h.runner.clone();
        let before_w0_seen = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(WORKER_WAIT_INTERVAL_SECS - 1)).await;
            runner.attempts()
        });

        let outcome = h
            .bootstrapper()
            .with_grace_period(Duration::ZERO)
            .run(&sharded("coordinator"), &[])
            .await
            .unwrap();

        assert_eq!(outcome, BootstrapOutcome::Completed(Role::Coordinator));
        assert_eq!(
            h.runner.attempts(),
            vec![
                CREATE_CITUS_EXTENSION_SQL.to_string(),
                "SELECT citus_set_coordinator_host('shop-coordinator', 5432);".to_string(),
                "SELECT * FROM citus_add_node('w0', 5432);".to_string(),
                "SELECT * FROM citus_add_node('w1', 5432);".to_string(),
            ]
        );
        // w0 flipped after the first probe, so it is only added on the second one
        let early = before_w0_seen.await.unwrap();
        assert_eq!(early.len(), 2);
        assert!(!early.iter().any(|s| s.contains("citus_add_node('w0'")));
        // w0 seen one interval in, w1 waits out the full timeout
        assert_eq!(
            start.elapsed(),
            Duration::from_secs(WORKER_WAIT_INTERVAL_SECS + WORKER_WAIT_TIMEOUT_SECS)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_coordinator_add_node_semantic_error_is_fatal() {
        let h = Harness::new(
            "shop",
            &[
                (BGSHARDEDCLUSTER_WORKERS_ANNOTATION, r#"["w0","w1"]"#),
                ("bgshardedcluster.bestgres.io/w0-initialized", "true"),
                ("bgshardedcluster.bestgres.io/w1-initialized", "true"),
            ],
            RecordingSqlRunner::new().semantic_on("citus_add_node('w0'"),
        );

        let err = h
            .bootstrapper()
            .run(&sharded("coordinator"), &[])
            .await
            .unwrap_err();

        assert!(matches!(err, BootstrapError::SystemSql { .. }));
        assert_eq!(h.runner.attempts_matching("citus_add_node('w1'"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_coordinator_add_node_transient_exhaustion_continues() {
        let h = Harness::new(
            "shop",
            &[
                (BGSHARDEDCLUSTER_WORKERS_ANNOTATION, r#"["w0","w1"]"#),
                ("bgshardedcluster.bestgres.io/w0-initialized", "true"),
                ("bgshardedcluster.bestgres.io/w1-initialized", "true"),
            ],
            RecordingSqlRunner::new().transient_on("citus_add_node('w0'", u32::MAX),
        );

        h.bootstrapper()
            .run(&sharded("coordinator"), &[])
            .await
            .unwrap();

        assert_eq!(h.runner.attempts_matching("citus_add_node('w0'"), 5);
        assert_eq!(h.runner.attempts_matching("citus_add_node('w1'"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_coordinator_without_worker_list_continues() {
        let h = Harness::new("shop", &[], RecordingSqlRunner::new());

        let outcome = h
            .bootstrapper()
            .with_worker_wait(WaitPolicy::lenient(Duration::from_secs(5), Duration::from_secs(10)))
            .run(&sharded("coordinator"), &[])
            .await
            .unwrap();

        assert_eq!(outcome, BootstrapOutcome::Completed(Role::Coordinator));
        assert_eq!(h.runner.attempts_matching("citus_add_node"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_coordinator_with_undecodable_worker_list_continues() {
        let h = Harness::new(
            "shop",
            &[(BGSHARDEDCLUSTER_WORKERS_ANNOTATION, "w0,w1")],
            RecordingSqlRunner::new(),
        );

        h.bootstrapper()
            .run(&sharded("coordinator"), &[])
            .await
            .unwrap();

        assert_eq!(h.runner.attempts_matching("citus_add_node"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_cluster_is_marker_error() {
        let store = Arc::new(MemoryAnnotationStore::new());
        let runner = Arc::new(RecordingSqlRunner::new());
        let mut bootstrapper = Bootstrapper::new(
            store,
            SqlExecutor::new(runner),
            ObjectRef::pod(NS, "ghost-0"),
            ObjectRef::bg_cluster(NS, "ghost"),
        );

        let err = bootstrapper.run(&labels(&[]), &[]).await.unwrap_err();

        assert!(matches!(err, BootstrapError::Marker { .. }));
    }
}
