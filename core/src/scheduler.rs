//! Recurring tick sources for the watcher.
//!
//! [`TokioScheduler`] drives real polling; [`ManualScheduler`] is a fake clock
//! whose ticks only happen when [`ManualScheduler::fire`] is called.

use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

pub type TickFn = Arc<dyn Fn() + Send + Sync>;

/// Handle to a scheduled repeating tick. After `cancel` returns no new tick
/// is started.
pub trait ScheduledTick: Send {
    fn cancel(&self);
}

pub trait Scheduler: Send + Sync {
    fn schedule_repeating(&self, period: Duration, tick: TickFn) -> Box<dyn ScheduledTick>;
}

pub struct TokioScheduler {
    handle: Handle,
}

impl TokioScheduler {
    pub fn new(handle: Handle) -> Self {
        Self { handle }
    }

    pub fn current() -> Self {
        Self::new(Handle::current())
    }
}

struct TokioTick {
    task: JoinHandle<()>,
    cancelled: Arc<AtomicBool>,
}

impl ScheduledTick for TokioTick {
    fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        self.task.abort();
    }
}

impl Scheduler for TokioScheduler {
    fn schedule_repeating(&self, period: Duration, tick: TickFn) -> Box<dyn ScheduledTick> {
        let cancelled = Arc::new(AtomicBool::new(false));
        let flag = cancelled.clone();

        let task = self.handle.spawn(async move {
            let mut interval = tokio::time::interval(period);
            // a late tick is dropped, never queued
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            interval.tick().await;

            loop {
                interval.tick().await;
                if flag.load(Ordering::SeqCst) {
                    break;
                }
                // clipboard reads may block; overlapping runs are dropped by the watcher
                let tick = tick.clone();
                let flag = flag.clone();
                tokio::task::spawn_blocking(move || {
                    if !flag.load(Ordering::SeqCst) {
                        tick();
                    }
                });
            }
        });

        Box::new(TokioTick { task, cancelled })
    }
}

struct ManualTask {
    id: u64,
    period: Duration,
    tick: TickFn,
}

/// Deterministic scheduler for tests and embedding: every live task runs once
/// per [`fire`](ManualScheduler::fire).
#[derive(Clone, Default)]
pub struct ManualScheduler {
    tasks: Arc<Mutex<Vec<ManualTask>>>,
    next_id: Arc<AtomicU64>,
}

struct ManualTick {
    id: u64,
    tasks: Arc<Mutex<Vec<ManualTask>>>,
}

impl ScheduledTick for ManualTick {
    fn cancel(&self) {
        self.tasks.lock().retain(|t| t.id != self.id);
    }
}

impl ManualScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fire(&self) -> usize {
        // snapshot so a tick may cancel or schedule without deadlocking
        let ticks: Vec<TickFn> = self.tasks.lock().iter().map(|t| t.tick.clone()).collect();
        for tick in &ticks {
            tick();
        }
        ticks.len()
    }

    pub fn active(&self) -> usize {
        self.tasks.lock().len()
    }

    pub fn periods(&self) -> Vec<Duration> {
        self.tasks.lock().iter().map(|t| t.period).collect()
    }
}

impl Scheduler for ManualScheduler {
    fn schedule_repeating(&self, period: Duration, tick: TickFn) -> Box<dyn ScheduledTick> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.tasks.lock().push(ManualTask { id, period, tick });
        Box::new(ManualTick {
            id,
            tasks: self.tasks.clone(),
        })
    }
}
