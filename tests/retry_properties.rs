use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use proptest::prelude::*;
use syncwarden::config::{PoolConfig, RetryConfig};
use syncwarden::retry::{PoolKind, PoolStatus, RetryError, RetryExecutor};

fn executor(max_retries: u32) -> RetryExecutor {
    RetryExecutor::new(&RetryConfig {
        base_delay_ms: 1,
        pools: vec![PoolConfig::new("cache", PoolKind::Cache, max_retries)],
    })
}

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .start_paused(true)
        .build()
        .expect("runtime")
}

/// Runs an operation that fails `fail_first` times before succeeding.
fn run_flaky(max_retries: u32, fail_first: u32) -> (RetryExecutor, u32, Result<u32, RetryError>) {
    let exec = executor(max_retries);
    let calls = Arc::new(AtomicU32::new(0));

    let result = runtime().block_on(exec.execute_with_retry("cache", "warm cache", || {
        let calls = Arc::clone(&calls);
        async move {
            let attempt = calls.fetch_add(1, Ordering::SeqCst);
            if attempt < fail_first {
                anyhow::bail!("miss on attempt {attempt}");
            }
            Ok(attempt)
        }
    }));

    let calls = calls.load(Ordering::SeqCst);
    (exec, calls, result)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn success_within_budget_leaves_pool_idle(
        (max_retries, fail_first) in (0u32..6).prop_flat_map(|max| (Just(max), 0..=max))
    ) {
        let (exec, calls, result) = run_flaky(max_retries, fail_first);

        prop_assert_eq!(result.ok(), Some(fail_first));
        prop_assert_eq!(calls, fail_first + 1);
        let pool = exec.pool("cache").expect("pool");
        prop_assert_eq!(pool.retry_count, 0);
        prop_assert_eq!(pool.status, PoolStatus::Idle);
    }

    #[test]
    fn failure_past_budget_uses_exactly_max_retries_plus_one_attempts(
        (max_retries, fail_first) in (0u32..6).prop_flat_map(|max| (Just(max), (max + 1)..20))
    ) {
        let (exec, calls, result) = run_flaky(max_retries, fail_first);

        prop_assert!(matches!(result, Err(RetryError::Exhausted { .. })), "expected RetryError::Exhausted, got {:?}", result);
        prop_assert_eq!(calls, max_retries + 1);
        prop_assert_eq!(exec.pool("cache").expect("pool").status, PoolStatus::Error);
    }
}
