// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for `sql.rs`

#[cfg(test)]
mod tests {
    use super::super::*;
    use crate::test_support::RecordingSqlRunner;
    use std::os::unix::fs::PermissionsExt;
    use tokio::time::Instant;

    fn executor(runner: &Arc<RecordingSqlRunner>) -> SqlExecutor {
        SqlExecutor::new(runner.clone())
    }

    #[tokio::test(start_paused = true)]
    async fn test_semantic_error_stops_list_without_retry() {
        let runner = Arc::new(RecordingSqlRunner::new().semantic_on("s3"));
        let statements = [
            "SELECT 's1';",
            "SELECT 's2';",
            "SELECT 's3';",
            "SELECT 's4';",
            "SELECT 's5';",
        ];

        let err = executor(&runner)
            .execute_all(&statements)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            SqlError::Semantic { ref statement, .. } if statement == "SELECT 's3';"
        ));
        assert_eq!(
            runner.attempts(),
            vec!["SELECT 's1';", "SELECT 's2';", "SELECT 's3';"],
            "s3 ran exactly once and s4/s5 never ran"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_error_retried_max_attempts_at_interval() {
        let runner = Arc::new(RecordingSqlRunner::new().transient_on("citus_add_node", u32::MAX));
        let start = Instant::now();

        let err = executor(&runner)
            .execute("SELECT * FROM citus_add_node('w0', 5432);")
            .await
            .unwrap_err();

        assert_eq!(runner.attempts_matching("citus_add_node"), SQL_MAX_ATTEMPTS as usize);
        assert_eq!(
            start.elapsed(),
            Duration::from_secs(SQL_RETRY_INTERVAL_SECS * u64::from(SQL_MAX_ATTEMPTS - 1))
        );
        match err {
            SqlError::RetriesExhausted {
                attempts,
                last_error,
                ..
            } => {
                assert_eq!(attempts, SQL_MAX_ATTEMPTS);
                assert_eq!(last_error, "could not connect to server");
            }
            other => panic!("expected RetriesExhausted, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_error_recovers() {
        let runner = Arc::new(RecordingSqlRunner::new().transient_on("SELECT 1", 2));

        executor(&runner).execute("SELECT 1;").await.unwrap();

        assert_eq!(runner.attempts_matching("SELECT 1"), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_list_succeeds() {
        let runner = Arc::new(RecordingSqlRunner::new());
        let statements: [&str; 0] = [];

        executor(&runner).execute_all(&statements).await.unwrap();

        assert!(runner.attempts().is_empty());
    }

    #[test]
    fn test_zero_attempts_is_clamped_to_one() {
        let runner = Arc::new(RecordingSqlRunner::new());
        let exec = SqlExecutor::with_policy(runner, 0, Duration::from_secs(1));

        assert_eq!(exec.max_attempts, 1);
    }

    fn fake_psql(dir: &tempfile::TempDir, exit_code: i32) -> String {
        let path = dir.path().join("psql");
        std::fs::write(
            &path,
            format!("#!/bin/sh\necho \"psql: $*\" >&2\nexit {exit_code}\n"),
        )
        .unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path.to_string_lossy().into_owned()
    }

    #[tokio::test]
    async fn test_psql_exit_code_one_is_semantic() {
        let dir = tempfile::tempdir().unwrap();
        let runner = PsqlRunner::new(fake_psql(&dir, 1), "postgres");

        let err = runner.run("SELECT nope;").await.unwrap_err();

        match err {
            SqlError::Semantic { stderr, .. } => {
                assert!(stderr.contains("-U postgres -c SELECT nope;"));
            }
            other => panic!("expected Semantic, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_psql_other_exit_code_is_transient() {
        let dir = tempfile::tempdir().unwrap();
        let runner = PsqlRunner::new(fake_psql(&dir, 2), "postgres");

        let err = runner.run("SELECT 1;").await.unwrap_err();

        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn test_psql_success() {
        let dir = tempfile::tempdir().unwrap();
        let runner = PsqlRunner::new(fake_psql(&dir, 0), "postgres");

        runner.run("SELECT 1;").await.unwrap();
    }

    #[tokio::test]
    async fn test_missing_binary_is_transient() {
        let runner = PsqlRunner::new("/nonexistent/psql", "postgres");

        let err = runner.run("SELECT 1;").await.unwrap_err();

        assert!(err.is_transient());
    }
}
