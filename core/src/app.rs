use log::{debug, info, warn};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;

use crate::Config;
use crate::error::{ClipError, Result};
use crate::history::HistoryStore;
use crate::hotkeys::HotkeyRegistrar;
use crate::idle::{IdleSource, PauseGate, PauseReason};
use crate::message::{InboundMessage, OutboundMessage};
use crate::watcher::{ChangeCallback, ClipboardChange, ClipboardWatcher};

/// Orchestrates the watcher and the history, and relays results to the
/// presentation layer.
pub struct ClipboardApp {
    watcher: Arc<ClipboardWatcher>,
    history: HistoryStore,
    hotkeys: Box<dyn HotkeyRegistrar>,
    idle: Box<dyn IdleSource>,
    idle_threshold: Duration,
    idle_check_interval: Duration,
    capture_on_start: bool,
    pause: PauseGate,
    outbound: mpsc::UnboundedSender<OutboundMessage>,
    changes: mpsc::UnboundedReceiver<ClipboardChange>,
    subscription: ChangeCallback,
}

impl ClipboardApp {
    pub fn new(
        config: &Config,
        watcher: Arc<ClipboardWatcher>,
        hotkeys: Box<dyn HotkeyRegistrar>,
        idle: Box<dyn IdleSource>,
        outbound: mpsc::UnboundedSender<OutboundMessage>,
    ) -> Self {
        let (tx, changes) = mpsc::unbounded_channel();
        let subscription: ChangeCallback = Arc::new(move |change: &ClipboardChange| {
            let _ = tx.send(change.clone());
        });
        watcher.on_change(subscription.clone());

        Self {
            watcher,
            history: HistoryStore::new(config.max_history_entries, config.capacity_policy()),
            hotkeys,
            idle,
            idle_threshold: Duration::from_millis(config.idle_threshold_ms),
            idle_check_interval: Duration::from_millis(config.idle_check_interval_ms),
            capture_on_start: config.capture_on_start,
            pause: PauseGate::new(),
            outbound,
            changes,
            subscription,
        }
    }

    pub fn history(&self) -> &HistoryStore {
        &self.history
    }

    pub fn pause_gate(&self) -> &PauseGate {
        &self.pause
    }

    pub fn start(&mut self) {
        if !self.capture_on_start {
            if let Err(e) = self.watcher.prime() {
                warn!("could not read initial clipboard: {}", e);
            }
        }
        self.watcher.start_polling();
        self.publish_history();
        info!(
            "watching clipboard, keeping up to {} entries",
            self.history.capacity()
        );
    }

    /// Stop polling and release the watcher subscription and every shortcut.
    pub fn shutdown(&mut self) {
        self.watcher.stop_polling();
        self.watcher.off_change(&self.subscription);
        if let Err(e) = self.hotkeys.unregister_all() {
            warn!("failed to release shortcuts: {}", e);
        }
        info!("clipboard watcher shut down");
    }

    pub async fn run<F>(&mut self, mut inbound: mpsc::Receiver<InboundMessage>, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        self.start();

        let mut idle_check = tokio::time::interval(self.idle_check_interval);
        idle_check.set_missed_tick_behavior(MissedTickBehavior::Skip);
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                Some(change) = self.changes.recv() => self.handle_change(change),
                msg = inbound.recv() => match msg {
                    Some(msg) => self.handle_message(msg),
                    None => break,
                },
                _ = idle_check.tick() => self.check_idle(),
                _ = &mut shutdown => break,
            }
        }

        self.shutdown();
    }

    pub fn process_pending_changes(&mut self) -> usize {
        let mut applied = 0;
        while let Ok(change) = self.changes.try_recv() {
            self.handle_change(change);
            applied += 1;
        }
        applied
    }

    pub fn handle_change(&mut self, change: ClipboardChange) {
        debug!("captured {:?} clipboard content", change.content_type);
        for evicted in self.history.insert(change.into()) {
            debug!("evicted {:?} entry", evicted.content_type);
        }
        self.refresh_shortcuts();
        self.publish_history();
    }

    pub fn handle_message(&mut self, msg: InboundMessage) {
        let result = match msg {
            InboundMessage::SetClipboard(index) => self.recall(index),
            InboundMessage::DisplayFullTextWindow(index) => self.inspect(index),
            InboundMessage::FullTextWindowClosed => {
                self.resume(PauseReason::FullTextViewer);
                Ok(())
            }
            InboundMessage::PinEntry(index) => self.toggle_pin(index).map(|_| ()),
            InboundMessage::WindowMove => {
                self.pause(PauseReason::WindowDrag);
                Ok(())
            }
            InboundMessage::WindowMoved => {
                self.resume(PauseReason::WindowDrag);
                Ok(())
            }
            InboundMessage::ClearHistory => {
                self.clear();
                Ok(())
            }
        };

        match result {
            Ok(()) => {}
            Err(e @ ClipError::IndexOutOfRange { .. }) => debug!("ignoring {:?}: {}", msg, e),
            Err(e) => warn!("{:?} failed: {}", msg, e),
        }
    }

    pub fn recall(&mut self, index: usize) -> Result<()> {
        let content = self.history.get(index)?.content();
        self.watcher.write(&content)?;
        self.send(OutboundMessage::UpdateActiveContent(index));
        Ok(())
    }

    pub fn toggle_pin(&mut self, index: usize) -> Result<bool> {
        let pinned = self.history.toggle_pin(index)?;
        self.publish_history();
        Ok(pinned)
    }

    /// Hand an entry to the full-text viewer; polling pauses while it is open.
    pub fn inspect(&mut self, index: usize) -> Result<()> {
        let entry = self.history.get(index)?.clone();
        self.pause(PauseReason::FullTextViewer);
        self.send(OutboundMessage::DisplayFullText { index, entry });
        Ok(())
    }

    pub fn clear(&mut self) {
        // captures queued before the clear must not repopulate it
        let mut dropped = 0;
        while self.changes.try_recv().is_ok() {
            dropped += 1;
        }
        if dropped > 0 {
            debug!("discarded {} queued captures", dropped);
        }
        self.history.clear();
        if let Err(e) = self.watcher.clear() {
            warn!("failed to clear clipboard: {}", e);
        }
        self.refresh_shortcuts();
        self.send(OutboundMessage::RefreshHistory(Vec::new()));
    }

    pub fn check_idle(&mut self) {
        match self.idle.idle_time() {
            Ok(idle) if idle > self.idle_threshold => self.pause(PauseReason::Idle),
            Ok(_) => self.resume(PauseReason::Idle),
            Err(e) => warn!("idle check failed: {}", e),
        }
    }

    fn pause(&mut self, reason: PauseReason) {
        if self.pause.pause(reason) {
            self.watcher.stop_polling();
            debug!("polling paused ({:?})", reason);
        }
    }

    fn resume(&mut self, reason: PauseReason) {
        if self.pause.resume(reason) {
            self.watcher.start_polling();
            debug!("polling resumed ({:?} cleared)", reason);
        }
    }

    fn refresh_shortcuts(&mut self) {
        if let Err(e) = self.hotkeys.unregister_all() {
            warn!("failed to release shortcuts: {}", e);
        }
        let bindings = self.history.assign_shortcuts();
        if let Err(e) = self.hotkeys.register_all(&bindings) {
            warn!("failed to bind shortcuts: {}", e);
        }
    }

    fn publish_history(&self) {
        self.send(OutboundMessage::RefreshHistory(
            self.history.entries().to_vec(),
        ));
    }

    fn send(&self, msg: OutboundMessage) {
        if self.outbound.send(msg).is_err() {
            debug!("presentation channel closed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{ClipboardBackend, MemoryClipboard};
    use crate::history::ShortcutBinding;
    use crate::reader::ClipboardReader;
    use crate::scheduler::ManualScheduler;
    use crate::snapshot::ContentKind;
    use crate::watcher::PollState;
    use parking_lot::Mutex;

    #[derive(Debug, Clone, PartialEq)]
    enum HotkeyCall {
        Register(Vec<usize>),
        UnregisterAll,
    }

    #[derive(Clone, Default)]
    struct RecordingHotkeys(Arc<Mutex<Vec<HotkeyCall>>>);

    impl HotkeyRegistrar for RecordingHotkeys {
        fn register_all(&mut self, bindings: &[ShortcutBinding]) -> Result<()> {
            self.0
                .lock()
                .push(HotkeyCall::Register(bindings.iter().map(|b| b.index).collect()));
            Ok(())
        }

        fn unregister_all(&mut self) -> Result<()> {
            self.0.lock().push(HotkeyCall::UnregisterAll);
            Ok(())
        }
    }

    #[derive(Clone, Default)]
    struct SettableIdle(Arc<Mutex<Duration>>);

    impl IdleSource for SettableIdle {
        fn idle_time(&self) -> Result<Duration> {
            Ok(*self.0.lock())
        }
    }

    struct Fixture {
        clip: Arc<MemoryClipboard>,
        scheduler: ManualScheduler,
        watcher: Arc<ClipboardWatcher>,
        hotkeys: RecordingHotkeys,
        idle: SettableIdle,
        app: ClipboardApp,
        out: mpsc::UnboundedReceiver<OutboundMessage>,
    }

    impl Fixture {
        fn with_config(config: Config) -> Self {
            let clip = Arc::new(MemoryClipboard::new());
            let scheduler = ManualScheduler::new();
            let watcher = Arc::new(ClipboardWatcher::new(
                ClipboardReader::new(clip.clone()),
                Arc::new(scheduler.clone()),
                Duration::from_millis(config.poll_interval_ms),
            ));
            let hotkeys = RecordingHotkeys::default();
            let idle = SettableIdle::default();
            let (tx, out) = mpsc::unbounded_channel();
            let app = ClipboardApp::new(
                &config,
                watcher.clone(),
                Box::new(hotkeys.clone()),
                Box::new(idle.clone()),
                tx,
            );
            Self {
                clip,
                scheduler,
                watcher,
                hotkeys,
                idle,
                app,
                out,
            }
        }

        fn new() -> Self {
            let mut f = Self::with_config(Config::default());
            f.app.start();
            f.drain();
            f
        }

        fn copy(&mut self, text: &str) {
            self.clip.copy_text(text);
            self.scheduler.fire();
            self.app.process_pending_changes();
        }

        fn drain(&mut self) -> Vec<OutboundMessage> {
            let mut msgs = Vec::new();
            while let Ok(msg) = self.out.try_recv() {
                msgs.push(msg);
            }
            msgs
        }

        fn texts(&self) -> Vec<String> {
            self.app
                .history()
                .entries()
                .iter()
                .map(|e| e.text.clone().unwrap_or_default())
                .collect()
        }
    }

    #[test]
    fn capture_updates_history_shortcuts_and_presentation() {
        let mut f = Fixture::new();
        f.copy("hello");

        assert_eq!(f.texts(), vec!["hello"]);
        let calls = f.hotkeys.0.lock().clone();
        assert_eq!(
            calls,
            vec![HotkeyCall::UnregisterAll, HotkeyCall::Register(vec![0])]
        );

        match f.drain().as_slice() {
            [OutboundMessage::RefreshHistory(entries)] => {
                assert_eq!(entries.len(), 1);
                assert_eq!(entries[0].content_type, ContentKind::Text);
            }
            other => panic!("unexpected messages: {:?}", other),
        }
    }

    #[test]
    fn same_text_twice_is_one_entry() {
        let mut f = Fixture::new();
        f.copy("hello");
        f.copy("hello");
        assert_eq!(f.texts(), vec!["hello"]);
    }

    #[test]
    fn existing_clipboard_is_not_captured_at_start() {
        let mut f = Fixture::with_config(Config::default());
        f.clip.copy_text("before launch");
        f.app.start();
        f.scheduler.fire();
        assert_eq!(f.app.process_pending_changes(), 0);

        let config = Config {
            capture_on_start: true,
            ..Config::default()
        };
        let mut f = Fixture::with_config(config);
        f.clip.copy_text("before launch");
        f.app.start();
        f.scheduler.fire();
        assert_eq!(f.app.process_pending_changes(), 1);
    }

    #[test]
    fn recall_writes_without_recapturing() {
        let mut f = Fixture::new();
        f.copy("first");
        f.copy("second");
        f.drain();

        f.app.handle_message(InboundMessage::SetClipboard(1));
        assert_eq!(f.clip.read_text().unwrap(), Some("first".to_string()));
        assert!(matches!(
            f.drain().as_slice(),
            [OutboundMessage::UpdateActiveContent(1)]
        ));

        f.scheduler.fire();
        assert_eq!(f.app.process_pending_changes(), 0);
        assert_eq!(f.texts(), vec!["second", "first"]);
    }

    #[test]
    fn stale_index_is_a_no_op() {
        let mut f = Fixture::new();
        f.copy("only");
        f.drain();
        let writes = f.clip.write_count();

        f.app.handle_message(InboundMessage::SetClipboard(5));
        f.app.handle_message(InboundMessage::PinEntry(5));
        f.app.handle_message(InboundMessage::DisplayFullTextWindow(5));

        assert_eq!(f.clip.write_count(), writes);
        assert!(f.drain().is_empty());
        assert!(!f.app.history().get(0).unwrap().is_pinned);
        assert!(!f.app.pause_gate().is_paused());
    }

    #[test]
    fn pin_then_clear_empties_everything() {
        let mut f = Fixture::new();
        f.copy("pinned");
        f.app.handle_message(InboundMessage::PinEntry(0));
        assert!(f.app.history().get(0).unwrap().is_pinned);
        f.hotkeys.0.lock().clear();
        f.drain();

        f.app.handle_message(InboundMessage::ClearHistory);
        assert!(f.app.history().is_empty());
        assert!(f.clip.is_empty());
        assert_eq!(
            *f.hotkeys.0.lock(),
            vec![HotkeyCall::UnregisterAll, HotkeyCall::Register(vec![])]
        );
        match f.drain().as_slice() {
            [OutboundMessage::RefreshHistory(entries)] => assert!(entries.is_empty()),
            other => panic!("unexpected messages: {:?}", other),
        }
    }

    #[test]
    fn shortcuts_never_point_past_the_history() {
        let mut f = Fixture::new();
        for i in 0..12 {
            f.copy(&format!("entry {}", i));
        }
        let last = f.hotkeys.0.lock().last().cloned();
        assert_eq!(last, Some(HotkeyCall::Register((0..9).collect())));

        f.app.clear();
        f.copy("fresh");
        let last = f.hotkeys.0.lock().last().cloned();
        assert_eq!(last, Some(HotkeyCall::Register(vec![0])));
    }

    #[test]
    fn drag_and_idle_pauses_overlap() {
        let mut f = Fixture::new();

        f.app.handle_message(InboundMessage::WindowMove);
        assert_eq!(f.watcher.poll_state(), PollState::Stopped);

        *f.idle.0.lock() = Duration::from_secs(60);
        f.app.check_idle();

        f.app.handle_message(InboundMessage::WindowMoved);
        assert_eq!(f.watcher.poll_state(), PollState::Stopped);

        *f.idle.0.lock() = Duration::from_millis(10);
        f.app.check_idle();
        assert_eq!(f.watcher.poll_state(), PollState::Running);
    }

    #[test]
    fn viewer_pauses_until_closed() {
        let mut f = Fixture::new();
        f.copy("long text");
        f.drain();

        f.app.handle_message(InboundMessage::DisplayFullTextWindow(0));
        assert_eq!(f.watcher.poll_state(), PollState::Stopped);
        match f.drain().as_slice() {
            [OutboundMessage::DisplayFullText { index: 0, entry }] => {
                assert_eq!(entry.text.as_deref(), Some("long text"))
            }
            other => panic!("unexpected messages: {:?}", other),
        }

        f.clip.copy_text("copied while viewing");
        assert_eq!(f.scheduler.fire(), 0);

        f.app.handle_message(InboundMessage::FullTextWindowClosed);
        assert_eq!(f.watcher.poll_state(), PollState::Running);
        f.scheduler.fire();
        assert_eq!(f.app.process_pending_changes(), 1);
    }

    #[test]
    fn clear_discards_queued_captures() {
        let mut f = Fixture::new();
        f.copy("kept until clear");
        f.clip.copy_text("queued");
        f.scheduler.fire();

        f.app.handle_message(InboundMessage::ClearHistory);
        assert_eq!(f.app.process_pending_changes(), 0);
        assert!(f.app.history().is_empty());
    }

    struct BrokenIdle;

    impl IdleSource for BrokenIdle {
        fn idle_time(&self) -> Result<Duration> {
            Err(ClipError::Idle("no display".into()))
        }
    }

    #[test]
    fn idle_errors_leave_polling_alone() {
        let mut f = Fixture::new();
        f.app.idle = Box::new(BrokenIdle);
        f.app.check_idle();
        assert!(!f.app.pause_gate().is_paused());
        assert_eq!(f.watcher.poll_state(), PollState::Running);
    }

    #[test]
    fn read_failures_leave_history_alone() {
        let mut f = Fixture::new();
        f.copy("kept");
        f.clip.set_failing(true);
        for _ in 0..3 {
            f.scheduler.fire();
        }
        assert_eq!(f.app.process_pending_changes(), 0);
        assert_eq!(f.texts(), vec!["kept"]);
        assert_eq!(f.watcher.poll_state(), PollState::Running);
    }

    #[test]
    fn shutdown_releases_everything() {
        let mut f = Fixture::new();
        f.copy("x");
        f.app.shutdown();
        assert_eq!(f.scheduler.active(), 0);
        assert_eq!(f.hotkeys.0.lock().last(), Some(&HotkeyCall::UnregisterAll));

        f.clip.copy_text("after shutdown");
        assert_eq!(f.watcher.poll_once(), crate::watcher::TickOutcome::Changed);
        assert_eq!(f.app.process_pending_changes(), 0);
    }

    #[tokio::test]
    async fn run_loop_handles_changes_and_messages() {
        let mut f = Fixture::with_config(Config::default());
        let (inbound_tx, inbound_rx) = mpsc::channel(8);
        let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();

        let clip = f.clip.clone();
        let scheduler = f.scheduler.clone();
        let mut out = std::mem::replace(&mut f.out, mpsc::unbounded_channel().1);

        let driver = async move {
            // initial refresh on start
            assert!(matches!(
                out.recv().await,
                Some(OutboundMessage::RefreshHistory(_))
            ));

            clip.copy_text("from run loop");
            scheduler.fire();
            match out.recv().await {
                Some(OutboundMessage::RefreshHistory(entries)) => assert_eq!(entries.len(), 1),
                other => panic!("unexpected message: {:?}", other),
            }

            inbound_tx.send(InboundMessage::PinEntry(0)).await.unwrap();
            match out.recv().await {
                Some(OutboundMessage::RefreshHistory(entries)) => assert!(entries[0].is_pinned),
                other => panic!("unexpected message: {:?}", other),
            }

            let _ = stop_tx.send(());
        };

        let shutdown = async {
            let _ = stop_rx.await;
        };
        tokio::join!(f.app.run(inbound_rx, shutdown), driver);

        assert_eq!(f.app.history().len(), 1);
        assert_eq!(f.scheduler.active(), 0);
    }
}
