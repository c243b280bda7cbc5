use log::{debug, error, warn};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use crate::detector;
use crate::error::Result;
use crate::reader::ClipboardReader;
use crate::scheduler::{ScheduledTick, Scheduler};
use crate::snapshot::{ContentKind, ContentSnapshot, ImageSnapshot};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClipboardChange {
    pub content_type: ContentKind,
    pub text: Option<String>,
    pub html: Option<String>,
    pub image_data: Option<ImageSnapshot>,
}

impl ClipboardChange {
    fn from_snapshot(snapshot: &ContentSnapshot) -> Self {
        let mut change = Self {
            content_type: snapshot.kind,
            text: None,
            html: None,
            image_data: None,
        };
        match snapshot.kind {
            ContentKind::Html => {
                change.html = snapshot.html.clone();
                change.text = snapshot.text.clone();
            }
            ContentKind::Text => change.text = snapshot.text.clone(),
            ContentKind::Image => change.image_data = snapshot.image.clone(),
        }
        change
    }
}

pub type ChangeCallback = Arc<dyn Fn(&ClipboardChange) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollState {
    Stopped,
    Running,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Another read was still in flight.
    Skipped,
    ReadFailed,
    Unchanged,
    /// Our own write was read back and adopted silently.
    Reconciled,
    /// A write is pending but the clipboard still shows the old content.
    AwaitingWrite,
    Changed,
}

struct WatcherState {
    poll: PollState,
    task: Option<Box<dyn ScheduledTick>>,
    baseline: Option<ContentSnapshot>,
    pending_write: Option<ContentSnapshot>,
}

pub struct ClipboardWatcher {
    reader: ClipboardReader,
    scheduler: Arc<dyn Scheduler>,
    interval: Duration,
    state: Mutex<WatcherState>,
    in_flight: AtomicBool,
    subscribers: RwLock<Vec<ChangeCallback>>,
}

struct InFlight<'a>(&'a AtomicBool);

impl<'a> InFlight<'a> {
    fn enter(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| InFlight(flag))
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl ClipboardWatcher {
    pub fn new(reader: ClipboardReader, scheduler: Arc<dyn Scheduler>, interval: Duration) -> Self {
        Self {
            reader,
            scheduler,
            interval,
            state: Mutex::new(WatcherState {
                poll: PollState::Stopped,
                task: None,
                baseline: None,
                pending_write: None,
            }),
            in_flight: AtomicBool::new(false),
            subscribers: RwLock::new(Vec::new()),
        }
    }

    pub fn prime(&self) -> Result<()> {
        let current = self.reader.read_snapshot()?;
        self.state.lock().baseline = Some(current);
        Ok(())
    }

    pub fn start_polling(self: &Arc<Self>) {
        let mut state = self.state.lock();
        if state.poll == PollState::Running {
            return;
        }

        let watcher: Weak<Self> = Arc::downgrade(self);
        let task = self.scheduler.schedule_repeating(
            self.interval,
            Arc::new(move || {
                if let Some(watcher) = watcher.upgrade() {
                    if watcher.poll_state() == PollState::Running {
                        watcher.poll_once();
                    }
                }
            }),
        );

        state.task = Some(task);
        state.poll = PollState::Running;
        debug!("clipboard polling started ({:?} interval)", self.interval);
    }

    pub fn stop_polling(&self) {
        let mut state = self.state.lock();
        if let Some(task) = state.task.take() {
            task.cancel();
        }
        if state.poll == PollState::Running {
            debug!("clipboard polling stopped");
        }
        state.poll = PollState::Stopped;
    }

    pub fn poll_state(&self) -> PollState {
        self.state.lock().poll
    }

    pub fn on_change(&self, callback: ChangeCallback) -> bool {
        let mut subscribers = self.subscribers.write();
        if subscribers.iter().any(|cb| Arc::ptr_eq(cb, &callback)) {
            return false;
        }
        subscribers.push(callback);
        true
    }

    pub fn off_change(&self, callback: &ChangeCallback) -> bool {
        let mut subscribers = self.subscribers.write();
        let before = subscribers.len();
        subscribers.retain(|cb| !Arc::ptr_eq(cb, callback));
        subscribers.len() != before
    }

    pub fn write(&self, content: &ContentSnapshot) -> Result<()> {
        self.state.lock().pending_write = Some(content.clone());

        if let Err(e) = self.reader.write(content) {
            self.state.lock().pending_write = None;
            return Err(e);
        }
        Ok(())
    }

    /// Empty the OS clipboard; the empty clipboard becomes the baseline.
    pub fn clear(&self) -> Result<()> {
        self.reader.clear()?;
        let mut state = self.state.lock();
        state.baseline = Some(ContentSnapshot::default());
        state.pending_write = None;
        Ok(())
    }

    pub fn poll_once(&self) -> TickOutcome {
        let Some(_in_flight) = InFlight::enter(&self.in_flight) else {
            debug!("clipboard read still in flight, skipping tick");
            return TickOutcome::Skipped;
        };

        let current = match self.reader.read_snapshot() {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!("clipboard read failed: {}", e);
                return TickOutcome::ReadFailed;
            }
        };

        let change = {
            let mut state = self.state.lock();
            let pending = state.pending_write.take();

            if let Some(written) = &pending {
                if written.same_content(&current) {
                    state.baseline = Some(current);
                    return TickOutcome::Reconciled;
                }
            }

            if !detector::has_changed(state.baseline.as_ref(), &current) {
                if pending.is_some() {
                    state.pending_write = pending;
                    return TickOutcome::AwaitingWrite;
                }
                return TickOutcome::Unchanged;
            }

            if pending.is_some() {
                debug!("clipboard changed externally before our write was observed");
            }
            state
                .baseline
                .get_or_insert_with(ContentSnapshot::default)
                .adopt_changed(&current);
            ClipboardChange::from_snapshot(&current)
        };

        self.notify(&change);
        TickOutcome::Changed
    }

    fn notify(&self, change: &ClipboardChange) {
        let subscribers: Vec<ChangeCallback> = self.subscribers.read().clone();
        for callback in subscribers {
            if let Err(panic) = catch_unwind(AssertUnwindSafe(|| callback(change))) {
                error!("clipboard change subscriber panicked: {}", panic_message(&*panic));
            }
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s
    } else {
        "unknown panic"
    }
}

impl Drop for ClipboardWatcher {
    fn drop(&mut self) {
        if let Some(task) = self.state.get_mut().task.take() {
            task.cancel();
        }
    }
}
