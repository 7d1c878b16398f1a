//! Interval-driven periodic tasks with an explicit start/stop lifecycle.
//!
//! Every tick carries a `task#n` tag in its log lines. A tick that fails or
//! panics is logged and the next tick runs on schedule. Stopping waits for a
//! tick already in flight instead of interrupting it.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::common::time::elapsed_ms;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TickId {
    pub task: String,
    pub tick: u64,
}

impl fmt::Display for TickId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.task, self.tick)
    }
}

#[async_trait]
pub trait PeriodicTask: Send + Sync {
    fn name(&self) -> &str;

    fn interval(&self) -> Duration;

    async fn run(&self, tick: &TickId) -> anyhow::Result<()>;
}

struct Scheduled {
    task: Arc<dyn PeriodicTask>,
    ticks: AtomicU64,
}

impl Scheduled {
    async fn run_tick(self: Arc<Self>) -> bool {
        let tick = TickId {
            task: self.task.name().to_string(),
            tick: self.ticks.fetch_add(1, Ordering::SeqCst) + 1,
        };
        let started = Instant::now();

        // Run on its own task so a panic is contained to this tick.
        let task = Arc::clone(&self.task);
        let tag = tick.clone();
        let outcome = tokio::spawn(async move { task.run(&tag).await }).await;

        match outcome {
            Ok(Ok(())) => {
                log::debug!("[{tick}] finished in {}ms", elapsed_ms(started));
                true
            }
            Ok(Err(e)) => {
                log::error!("[{tick}] failed after {}ms: {e:#}", elapsed_ms(started));
                false
            }
            Err(e) => {
                log::error!("[{tick}] aborted: {e}");
                false
            }
        }
    }
}

#[derive(Default)]
pub struct Scheduler {
    tasks: Vec<Arc<Scheduled>>,
    running: Mutex<Option<Running>>,
}

struct Running {
    cancel: CancellationToken,
    handles: Vec<JoinHandle<()>>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_task(mut self, task: Arc<dyn PeriodicTask>) -> Self {
        self.tasks.push(Arc::new(Scheduled {
            task,
            ticks: AtomicU64::new(0),
        }));
        self
    }

    pub fn task_names(&self) -> Vec<String> {
        self.tasks.iter().map(|s| s.task.name().to_string()).collect()
    }

    pub fn is_running(&self) -> bool {
        self.running.lock().is_some()
    }

    /// Ticks started so far for `name`, including ones run through `run_now`.
    pub fn tick_count(&self, name: &str) -> Option<u64> {
        self.find(name).map(|s| s.ticks.load(Ordering::SeqCst))
    }

    /// Spawns one loop per task. The first tick of each fires after one interval.
    /// Calling `start` on a running scheduler does nothing.
    pub fn start(&self) {
        let mut running = self.running.lock();
        if running.is_some() {
            log::debug!("Scheduler already running");
            return;
        }

        let cancel = CancellationToken::new();
        let handles = self
            .tasks
            .iter()
            .map(|scheduled| {
                let scheduled = Arc::clone(scheduled);
                let cancel = cancel.clone();
                tokio::spawn(async move {
                    let period = scheduled.task.interval();
                    let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
                    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
                    loop {
                        tokio::select! {
                            _ = cancel.cancelled() => break,
                            _ = interval.tick() => {
                                Arc::clone(&scheduled).run_tick().await;
                            }
                        }
                    }
                    log::debug!("Periodic task '{}' stopped", scheduled.task.name());
                })
            })
            .collect();

        log::info!("Scheduler started with {} periodic tasks", self.tasks.len());
        *running = Some(Running { cancel, handles });
    }

    /// Cancels every loop and waits for ticks in flight to finish.
    pub async fn stop(&self) {
        let running = self.running.lock().take();
        let Some(running) = running else {
            return;
        };
        running.cancel.cancel();
        for handle in running.handles {
            if let Err(e) = handle.await {
                log::warn!("Periodic task loop ended abnormally: {e}");
            }
        }
        log::info!("Scheduler stopped");
    }

    /// Runs one tick of `name` immediately. Returns `None` for an unknown task,
    /// otherwise whether the tick succeeded.
    pub async fn run_now(&self, name: &str) -> Option<bool> {
        let scheduled = self.find(name)?;
        Some(scheduled.run_tick().await)
    }

    fn find(&self, name: &str) -> Option<Arc<Scheduled>> {
        self.tasks.iter().find(|s| s.task.name() == name).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    struct Flaky {
        runs: AtomicUsize,
    }

    #[async_trait]
    impl PeriodicTask for Flaky {
        fn name(&self) -> &str {
            "flaky"
        }

        fn interval(&self) -> Duration {
            Duration::from_millis(10)
        }

        async fn run(&self, tick: &TickId) -> anyhow::Result<()> {
            self.runs.fetch_add(1, Ordering::SeqCst);
            match tick.tick {
                1 => anyhow::bail!("first tick fails"),
                2 => panic!("second tick panics"),
                _ => Ok(()),
            }
        }
    }

    #[tokio::test]
    async fn failing_ticks_do_not_stop_later_ticks() {
        let flaky = Arc::new(Flaky {
            runs: AtomicUsize::new(0),
        });
        let scheduler = Scheduler::new().with_task(flaky.clone());

        assert_eq!(scheduler.run_now("flaky").await, Some(false));
        assert_eq!(scheduler.run_now("flaky").await, Some(false));
        assert_eq!(scheduler.run_now("flaky").await, Some(true));
        assert_eq!(scheduler.run_now("missing").await, None);
        assert_eq!(scheduler.tick_count("flaky"), Some(3));
        assert_eq!(flaky.runs.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn started_loops_tick_until_stopped() {
        let flaky = Arc::new(Flaky {
            runs: AtomicUsize::new(0),
        });
        let scheduler = Scheduler::new().with_task(flaky.clone());

        scheduler.start();
        scheduler.start();
        assert!(scheduler.is_running());

        tokio::time::sleep(Duration::from_millis(55)).await;
        scheduler.stop().await;
        assert!(!scheduler.is_running());

        let runs = flaky.runs.load(Ordering::SeqCst);
        assert!(runs >= 4, "expected at least 4 ticks, got {runs}");

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(flaky.runs.load(Ordering::SeqCst), runs);
    }

    #[test]
    fn tick_ids_render_as_task_and_number() {
        let tick = TickId {
            task: "health".into(),
            tick: 7,
        };
        assert_eq!(tick.to_string(), "health#7");
    }
}
