// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for reconciler helper functions.

#[cfg(test)]
mod tests {
    use super::super::status_changed;
    use crate::crd::BGShardedClusterStatus;

    #[test]
    fn test_status_changed_from_none() {
        let current: Option<String> = None;
        let new = Some("Ready".to_string());

        assert!(status_changed(&current, &new));
    }

    #[test]
    fn test_status_unchanged() {
        let status = BGShardedClusterStatus {
            status: "Ready".to_string(),
            coordinator_cluster: "shop-coordinator".to_string(),
            worker_clusters: vec!["shop-worker-0".to_string()],
        };

        assert!(!status_changed(&Some(status.clone()), &Some(status)));
    }

    #[test]
    fn test_status_changed_when_workers_differ() {
        let current = BGShardedClusterStatus {
            status: "Ready".to_string(),
            coordinator_cluster: "shop-coordinator".to_string(),
            worker_clusters: vec!["shop-worker-0".to_string()],
        };
        let mut new = current.clone();
        new.worker_clusters.push("shop-worker-1".to_string());

        assert!(status_changed(&Some(current), &Some(new)));
    }
}
