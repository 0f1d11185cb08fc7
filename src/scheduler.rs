use futures_util::future::BoxFuture;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::info;

type TaskFn = Arc<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>;

struct PeriodicTask {
    name: &'static str,
    period: Duration,
    run: TaskFn,
}

/// Fixed set of independent periodic tasks.
///
/// Every tick spawns the task body as its own tokio task and goes straight
/// back to waiting, so a slow run never delays the next tick of any task,
/// itself included. Overlapping runs of one task are allowed.
#[derive(Default)]
pub struct Scheduler {
    tasks: Vec<PeriodicTask>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn every<F, Fut>(mut self, name: &'static str, period: Duration, task: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.tasks.push(PeriodicTask {
            name,
            period,
            run: Arc::new(move || -> BoxFuture<'static, ()> { Box::pin(task()) }),
        });
        self
    }

    /// Spawn one ticker per task. The first tick fires one period from now.
    pub fn start(self) -> SchedulerHandle {
        let tickers = self
            .tasks
            .into_iter()
            .map(|task| {
                info!("Scheduling '{}' every {:?}", task.name, task.period);
                tokio::spawn(async move {
                    let mut ticker = interval_at(Instant::now() + task.period, task.period);
                    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
                    loop {
                        ticker.tick().await;
                        tokio::spawn((task.run)());
                    }
                })
            })
            .collect();
        SchedulerHandle { tickers }
    }
}

pub struct SchedulerHandle {
    tickers: Vec<JoinHandle<()>>,
}

impl SchedulerHandle {
    /// Stop ticking. Runs already spawned finish on their own.
    pub fn shutdown(self) {
        for ticker in self.tickers {
            ticker.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counter() -> Arc<AtomicUsize> {
        Arc::new(AtomicUsize::new(0))
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_tick_after_one_period() {
        let runs = counter();
        let r = runs.clone();
        let handle = Scheduler::new()
            .every("count", Duration::from_secs(10), move || {
                let r = r.clone();
                async move {
                    r.fetch_add(1, Ordering::SeqCst);
                }
            })
            .start();

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 0);
        tokio::time::sleep(Duration::from_secs(31)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 3);
        handle.shutdown();
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_run_does_not_delay_next_tick() {
        let started = counter();
        let s = started.clone();
        let handle = Scheduler::new()
            .every("slow", Duration::from_secs(1), move || {
                let s = s.clone();
                async move {
                    s.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_secs(60)).await;
                }
            })
            .start();

        tokio::time::sleep(Duration::from_millis(5_500)).await;
        assert_eq!(started.load(Ordering::SeqCst), 5);
        handle.shutdown();
    }

    #[tokio::test(start_paused = true)]
    async fn test_tasks_tick_independently() {
        let fast = counter();
        let slow = counter();
        let (f, s) = (fast.clone(), slow.clone());
        let handle = Scheduler::new()
            .every("fast", Duration::from_secs(1), move || {
                let f = f.clone();
                async move {
                    f.fetch_add(1, Ordering::SeqCst);
                }
            })
            .every("slow", Duration::from_secs(4), move || {
                let s = s.clone();
                async move {
                    s.fetch_add(1, Ordering::SeqCst);
                }
            })
            .start();

        tokio::time::sleep(Duration::from_millis(8_500)).await;
        assert_eq!(fast.load(Ordering::SeqCst), 8);
        assert_eq!(slow.load(Ordering::SeqCst), 2);
        handle.shutdown();
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_stops_ticking() {
        let runs = counter();
        let r = runs.clone();
        let handle = Scheduler::new()
            .every("count", Duration::from_secs(1), move || {
                let r = r.clone();
                async move {
                    r.fetch_add(1, Ordering::SeqCst);
                }
            })
            .start();

        tokio::time::sleep(Duration::from_millis(2_500)).await;
        handle.shutdown();
        let seen = runs.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(runs.load(Ordering::SeqCst), seen);
    }
}
