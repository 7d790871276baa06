// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Fakes shared by unit tests.

use crate::errors::SqlError;
use crate::lifecycle::PodLifecycle;
use crate::readiness::HealthCheck;
use crate::sql::SqlRunner;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

#[derive(Clone, Copy)]
enum Failure {
    Semantic,
    Transient { remaining: u32 },
}

/// [`SqlRunner`] that records every attempt and fails statements on demand.
///
/// Failures are keyed by substring; the first matching rule applies.
#[derive(Default)]
pub struct RecordingSqlRunner {
    attempts: Mutex<Vec<String>>,
    rules: Mutex<Vec<(String, Failure)>>,
}

impl RecordingSqlRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Statements containing `pattern` fail with exit code 1.
    pub fn semantic_on(self, pattern: &str) -> Self {
        self.rules
            .lock()
            .unwrap()
            .push((pattern.to_string(), Failure::Semantic));
        self
    }

    /// Statements containing `pattern` fail transiently `times` times, then succeed.
    pub fn transient_on(self, pattern: &str, times: u32) -> Self {
        self.rules
            .lock()
            .unwrap()
            .push((pattern.to_string(), Failure::Transient { remaining: times }));
        self
    }

    /// Every attempt, in order.
    pub fn attempts(&self) -> Vec<String> {
        self.attempts.lock().unwrap().clone()
    }

    /// Distinct statements in first-attempt order.
    pub fn statements(&self) -> Vec<String> {
        let mut seen = Vec::new();
        for s in self.attempts() {
            if !seen.contains(&s) {
                seen.push(s);
            }
        }
        seen
    }

    /// Attempts made at statements containing `pattern`.
    pub fn attempts_matching(&self, pattern: &str) -> usize {
        self.attempts()
            .iter()
            .filter(|s| s.contains(pattern))
            .count()
    }
}

#[async_trait]
impl SqlRunner for RecordingSqlRunner {
    async fn run(&self, statement: &str) -> Result<(), SqlError> {
        self.attempts.lock().unwrap().push(statement.to_string());

        let mut rules = self.rules.lock().unwrap();
        let Some((_, failure)) = rules
            .iter_mut()
            .find(|(pattern, _)| statement.contains(pattern.as_str()))
        else {
            return Ok(());
        };

        match failure {
            Failure::Semantic => Err(SqlError::Semantic {
                statement: statement.to_string(),
                stderr: "ERROR: simulated".to_string(),
            }),
            Failure::Transient { remaining } if *remaining > 0 => {
                *remaining = remaining.saturating_sub(1);
                Err(SqlError::Transient {
                    statement: statement.to_string(),
                    message: "could not connect to server".to_string(),
                })
            }
            Failure::Transient { .. } => Ok(()),
        }
    }
}

/// [`HealthCheck`] that always reports `state`.
pub struct FixedHealth(pub &'static str);

#[async_trait]
impl HealthCheck for FixedHealth {
    async fn state(&self) -> anyhow::Result<String> {
        Ok(self.0.to_string())
    }
}

/// [`PodLifecycle`] that counts termination requests.
#[derive(Default)]
pub struct RecordingLifecycle {
    requests: AtomicU32,
    pub names: Mutex<HashMap<String, u32>>,
}

impl RecordingLifecycle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn requests(&self) -> u32 {
        self.requests.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PodLifecycle for RecordingLifecycle {
    async fn request_self_termination(&self, pod: &str) -> anyhow::Result<()> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        *self.names.lock().unwrap().entry(pod.to_string()).or_default() += 1;
        Ok(())
    }
}
