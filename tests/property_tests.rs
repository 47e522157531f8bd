//! Property-based tests for sqlbatch
//!
//! These tests verify:
//! - Retry accounting (attempt counts for any budget)
//! - Script assembly is deterministic and always single-line
//! - Settings filtering keeps exactly the non-comment lines
//! - The pool never runs more jobs than its capacity

use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use proptest::prelude::*;

use sqlbatch::log_record::LogRecord;
use sqlbatch::{
    AttemptOutcome, JobCommand, JobRunner, RetryPolicy, ScriptAssembler, Settings, Statement,
    WorkerPool,
};

// =============================================================================
// Retry Policy Property Tests
// =============================================================================

proptest! {
    /// A job that never succeeds is attempted exactly retries + 1 times
    #[test]
    fn retry_fail_forever_attempts(retries in 0u32..50) {
        let mut calls = 0u32;
        let outcome = RetryPolicy::new(retries).execute(|_| {
            calls += 1;
            false
        });
        prop_assert!(!outcome.succeeded);
        prop_assert_eq!(outcome.attempts, retries + 1);
        prop_assert_eq!(calls, retries + 1);
    }

    /// A job succeeding on attempt k within budget runs exactly k times
    #[test]
    fn retry_success_on_attempt_k(retries in 0u32..50, k in 1u32..60) {
        let outcome = RetryPolicy::new(retries).execute(|attempt| attempt == k);
        if k <= retries + 1 {
            prop_assert!(outcome.succeeded);
            prop_assert_eq!(outcome.attempts, k);
        } else {
            prop_assert!(!outcome.succeeded);
            prop_assert_eq!(outcome.attempts, retries + 1);
        }
    }

    /// Attempt numbers handed to the closure count up from 1
    #[test]
    fn retry_attempt_numbers_are_sequential(retries in 0u32..20) {
        let mut seen = Vec::new();
        RetryPolicy::new(retries).execute(|attempt| {
            seen.push(attempt);
            false
        });
        let expected: Vec<u32> = (1..=retries + 1).collect();
        prop_assert_eq!(seen, expected);
    }
}

// =============================================================================
// Script Assembly Property Tests
// =============================================================================

/// Template text with the characters that need flattening mixed in
fn template_strategy() -> impl Strategy<Value = String> {
    prop::collection::vec(
        prop_oneof![
            "[a-z_ ]{1,8}",
            Just("`".to_string()),
            Just("\n".to_string()),
            Just("\r\n".to_string()),
            Just("'".to_string()),
            Just(";".to_string()),
        ],
        0..20,
    )
    .prop_map(|parts| parts.concat())
}

fn assembler(settings: &str) -> ScriptAssembler {
    ScriptAssembler::new("/carrier/udtf.jar", "/carrier/odps_config.ini", Settings::parse(settings))
}

proptest! {
    /// Same inputs always give the same script
    #[test]
    fn assembly_is_deterministic(template in template_strategy(), settings in "[a-z=.\n#]{0,40}") {
        let first = assembler(&settings).assemble(&template).render();
        let second = assembler(&settings).assemble(&template).render();
        prop_assert_eq!(first, second);
    }

    /// Rendered scripts never contain line breaks or backticks
    #[test]
    fn assembly_is_single_line(template in template_strategy()) {
        let rendered = assembler("a=1\n").assemble(&template).render();
        prop_assert!(!rendered.contains('\n'));
        prop_assert!(!rendered.contains('\r'));
        prop_assert!(!rendered.contains('`'));
    }

    /// The preamble always leads and the body always comes last
    #[test]
    fn assembly_order(template in template_strategy()) {
        let script = assembler("").assemble(&template);
        let statements = script.statements();
        prop_assert!(matches!(statements.first(), Some(Statement::AddJar(_))));
        prop_assert!(matches!(statements.last(), Some(Statement::Raw(_))));
    }

    /// One `set` statement per non-blank, non-comment settings line
    #[test]
    fn settings_keep_only_entries(
        lines in prop::collection::vec(
            prop_oneof![
                "[a-z.]{1,10}=[a-z0-9]{1,5}",
                "#[a-z ]{0,10}",
                Just(String::new()),
                Just("   ".to_string()),
            ],
            0..15,
        )
    ) {
        let content = lines.join("\n");
        let expected: Vec<&String> = lines
            .iter()
            .filter(|l| !l.trim().is_empty() && !l.trim().starts_with('#'))
            .collect();

        let settings = Settings::parse(&content);
        prop_assert_eq!(settings.entries().len(), expected.len());

        let script = assembler(&content).assemble("select 1");
        let sets = script
            .statements()
            .iter()
            .filter(|s| matches!(s, Statement::Set(_)))
            .count();
        prop_assert_eq!(sets, expected.len());
    }
}

// =============================================================================
// Pool Capacity Property Tests
// =============================================================================

/// Runner that tracks how many attempts run at once.
#[derive(Default)]
struct CountingRunner {
    running: AtomicUsize,
    peak: AtomicUsize,
    finished: AtomicUsize,
}

impl JobRunner for CountingRunner {
    fn run_attempt(&self, _command: &JobCommand, _log: &LogRecord, _attempt: u32) -> AttemptOutcome {
        let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        thread::sleep(Duration::from_millis(2));
        self.running.fetch_sub(1, Ordering::SeqCst);
        self.finished.fetch_add(1, Ordering::SeqCst);
        AttemptOutcome::Succeeded
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    /// At most `capacity` jobs run concurrently, and every job runs
    #[test]
    fn pool_never_exceeds_capacity(capacity in 1usize..6, burst in 0usize..40) {
        let tmp = tempfile::TempDir::new().unwrap();
        let runner = Arc::new(CountingRunner::default());
        let pool = WorkerPool::new(capacity, runner.clone()).unwrap();
        pool.start().unwrap();

        for i in 0..burst {
            let log_dir: PathBuf = tmp.path().join(i.to_string());
            pool.submit(JobCommand::shell("true"), log_dir, 0).unwrap();
        }
        pool.join_all().unwrap();
        pool.stop().unwrap();

        prop_assert!(runner.peak.load(Ordering::SeqCst) <= capacity);
        prop_assert_eq!(runner.finished.load(Ordering::SeqCst), burst);
    }
}
