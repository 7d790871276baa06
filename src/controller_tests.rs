// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for `controller.rs`

#[cfg(test)]
mod tests {
    use super::super::*;
    use crate::crd::DbOpKind;
    use crate::labels::{
        pod_completion_annotation, BGDBOPS_IN_PROGRESS_ANNOTATION, BGDBOPS_OP_ANNOTATION,
    };
    use crate::store::MemoryAnnotationStore;
    use crate::test_support::RecordingLifecycle;

    const NS: &str = "db";

    struct Harness {
        store: Arc<MemoryAnnotationStore>,
        lifecycle: Arc<RecordingLifecycle>,
        pod: ObjectRef,
        cluster: ObjectRef,
        db_ops: ObjectRef,
        reconcile_loop: ReconcileLoop,
    }

    fn harness(cluster_annotations: &[(&str, &str)], pod_annotations: &[(&str, &str)]) -> Harness {
        let store = Arc::new(MemoryAnnotationStore::new());
        let lifecycle = Arc::new(RecordingLifecycle::new());
        let pod = ObjectRef::pod(NS, "orders-0");
        let cluster = ObjectRef::bg_cluster(NS, "orders");
        let db_ops = ObjectRef::bg_db_ops(NS, "orders-op");
        store.insert(&pod, pod_annotations.iter().copied());
        store.insert(&cluster, cluster_annotations.iter().copied());
        store.insert(&db_ops, []);

        let dispatcher = Dispatcher::new(
            store.clone(),
            lifecycle.clone(),
            pod.clone(),
            cluster.clone(),
        );
        let reconcile_loop =
            ReconcileLoop::new(store.clone(), dispatcher, pod.clone(), cluster.clone());
        Harness {
            store,
            lifecycle,
            pod,
            cluster,
            db_ops,
            reconcile_loop,
        }
    }

    fn armed(op: &str) -> Vec<(&str, &str)> {
        vec![
            (BGDBOPS_PENDING_ANNOTATION, "true"),
            (BGDBOPS_OP_ANNOTATION, op),
            (BGDBOPS_IN_PROGRESS_ANNOTATION, "orders-op"),
        ]
    }

    #[tokio::test]
    async fn test_idle_pass_clears_stale_completion() {
        let h = harness(&[], &[(BGDBOPS_COMPLETED_ANNOTATION, "true")]);

        let iteration = h.reconcile_loop.reconcile_once().await.unwrap();

        assert_eq!(iteration, LoopIteration::Idle);
        assert_eq!(h.store.value(&h.pod, BGDBOPS_COMPLETED_ANNOTATION), None);
    }

    #[tokio::test]
    async fn test_pending_false_is_idle() {
        let h = harness(
            &[(BGDBOPS_PENDING_ANNOTATION, "false"), (BGDBOPS_OP_ANNOTATION, "restart")],
            &[],
        );

        let iteration = h.reconcile_loop.reconcile_once().await.unwrap();

        assert_eq!(iteration, LoopIteration::Idle);
        assert_eq!(h.lifecycle.requests(), 0);
    }

    #[tokio::test]
    async fn test_pending_restart_requests_termination() {
        let h = harness(&armed("restart"), &[]);

        let iteration = h.reconcile_loop.reconcile_once().await.unwrap();

        assert_eq!(iteration, LoopIteration::Dispatched(DispatchOutcome::SelfTerminating));
        assert_eq!(h.lifecycle.requests(), 1);
    }

    #[tokio::test]
    async fn test_restarted_pod_records_fan_in() {
        let h = harness(&armed("restart"), &[(BGDBOPS_COMPLETED_ANNOTATION, "true")]);

        let iteration = h.reconcile_loop.reconcile_once().await.unwrap();

        assert_eq!(
            iteration,
            LoopIteration::Dispatched(DispatchOutcome::FanIn {
                db_ops: "orders-op".to_string()
            })
        );
        assert_eq!(
            h.store.value(&h.db_ops, &pod_completion_annotation("orders-0")).as_deref(),
            Some("true")
        );
        assert_eq!(h.lifecycle.requests(), 0);
    }

    #[tokio::test]
    async fn test_unknown_operation_is_logged_not_fatal() {
        let h = harness(&armed("reindex"), &[]);
        let pod_version = h.store.version(&h.pod);
        let errors = metrics::ERRORS_TOTAL.with_label_values(&[KIND_BG_CLUSTER, "dispatch"]);
        let errors_before = errors.get();

        let iteration = h.reconcile_loop.reconcile_once().await.unwrap();

        assert_eq!(iteration, LoopIteration::DispatchFailed);
        assert!(errors.get() > errors_before);
        assert_eq!(h.store.version(&h.pod), pod_version);
        assert_eq!(h.lifecycle.requests(), 0);
    }

    #[tokio::test]
    async fn test_missing_cluster_is_an_error() {
        let h = harness(&[], &[]);
        let orphan = {
            let dispatcher = Dispatcher::new(
                h.store.clone(),
                h.lifecycle.clone(),
                h.pod.clone(),
                ObjectRef::bg_cluster(NS, "gone"),
            );
            ReconcileLoop::new(
                h.store.clone(),
                dispatcher,
                h.pod.clone(),
                ObjectRef::bg_cluster(NS, "gone"),
            )
        };

        assert!(orphan.reconcile_once().await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_refresh_is_counted_and_backs_off() {
        let h = harness(&[], &[]);
        let dispatcher = Dispatcher::new(
            h.store.clone(),
            h.lifecycle.clone(),
            h.pod.clone(),
            ObjectRef::bg_cluster(NS, "gone"),
        );
        let orphan = ReconcileLoop::new(
            h.store.clone(),
            dispatcher,
            h.pod.clone(),
            ObjectRef::bg_cluster(NS, "gone"),
        );
        let errors = metrics::ERRORS_TOTAL.with_label_values(&[KIND_BG_CLUSTER, "refresh"]);
        let errors_before = errors.get();

        // One failed pass, then the 5s backoff is still running at 4s.
        let _ = tokio::time::timeout(Duration::from_secs(4), orphan.run()).await;

        assert_eq!(errors.get(), errors_before + 1.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_loop_completes_then_cleans_up() {
        let h = harness(&armed(DbOpKind::Vacuum.as_str()), &[]);

        let _ = tokio::time::timeout(Duration::from_secs(7), h.reconcile_loop.run()).await;

        assert_eq!(
            h.store.value(&h.pod, BGDBOPS_COMPLETED_ANNOTATION).as_deref(),
            Some("true")
        );
        // Later passes see the pod completed and do not run the placeholder again.
        assert_eq!(h.store.write_count(&h.pod, BGDBOPS_COMPLETED_ANNOTATION), 1);

        delete_annotation(&*h.store, &h.cluster, BGDBOPS_PENDING_ANNOTATION)
            .await
            .unwrap();
        let _ = tokio::time::timeout(Duration::from_secs(3), h.reconcile_loop.run()).await;

        assert_eq!(h.store.value(&h.pod, BGDBOPS_COMPLETED_ANNOTATION), None);
    }
}
