use global_hotkey::{
    GlobalHotKeyEvent, GlobalHotKeyManager, HotKeyState,
    hotkey::{Code, HotKey, Modifiers},
};
use log::{debug, warn};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::thread;
use tokio::sync::mpsc;

use crate::error::{ClipError, Result};
use crate::history::ShortcutBinding;
use crate::message::InboundMessage;

/// Capability to bind `Ctrl+1..9` system-wide. The controller releases every
/// binding before installing a fresh set.
pub trait HotkeyRegistrar {
    fn register_all(&mut self, bindings: &[ShortcutBinding]) -> Result<()>;
    fn unregister_all(&mut self) -> Result<()>;
}

pub struct NoHotkeys;

impl HotkeyRegistrar for NoHotkeys {
    fn register_all(&mut self, _bindings: &[ShortcutBinding]) -> Result<()> {
        Ok(())
    }

    fn unregister_all(&mut self) -> Result<()> {
        Ok(())
    }
}

pub struct GlobalHotkeys {
    manager: GlobalHotKeyManager,
    registered: Vec<HotKey>,
    slots: Arc<RwLock<HashMap<u32, usize>>>,
}

fn hotkey_error(e: impl std::fmt::Display) -> ClipError {
    ClipError::Hotkey(e.to_string())
}

fn digit_code(index: usize) -> Option<Code> {
    Some(match index {
        0 => Code::Digit1,
        1 => Code::Digit2,
        2 => Code::Digit3,
        3 => Code::Digit4,
        4 => Code::Digit5,
        5 => Code::Digit6,
        6 => Code::Digit7,
        7 => Code::Digit8,
        8 => Code::Digit9,
        _ => return None,
    })
}

impl GlobalHotkeys {
    /// Presses are turned into `set-clipboard` requests on `requests`.
    ///
    /// Linux only: on Windows and macOS, global-hotkey delivers events through
    /// the platform event loop of the creating thread, which the daemon does
    /// not run.
    pub fn new(requests: mpsc::Sender<InboundMessage>) -> Result<Self> {
        if !Self::supported() {
            return Err(ClipError::Hotkey(
                "global shortcuts need a platform event loop on this OS".to_string(),
            ));
        }
        let manager = GlobalHotKeyManager::new().map_err(hotkey_error)?;
        let slots: Arc<RwLock<HashMap<u32, usize>>> = Arc::new(RwLock::new(HashMap::new()));

        let lookup = slots.clone();
        thread::Builder::new()
            .name("pinclip-hotkeys".to_string())
            .spawn(move || {
                let receiver = GlobalHotKeyEvent::receiver();
                while let Ok(event) = receiver.recv() {
                    if event.state != HotKeyState::Pressed {
                        continue;
                    }
                    let Some(slot) = lookup.read().get(&event.id).copied() else {
                        continue;
                    };
                    debug!("shortcut pressed for slot {}", slot);
                    if requests.blocking_send(InboundMessage::SetClipboard(slot)).is_err() {
                        break;
                    }
                }
            })
            .map_err(hotkey_error)?;

        Ok(Self {
            manager,
            registered: Vec::new(),
            slots,
        })
    }

    pub fn supported() -> bool {
        cfg!(target_os = "linux")
    }
}

impl HotkeyRegistrar for GlobalHotkeys {
    fn register_all(&mut self, bindings: &[ShortcutBinding]) -> Result<()> {
        for binding in bindings {
            let Some(code) = digit_code(binding.index) else {
                warn!("no key for shortcut slot {}", binding.index);
                continue;
            };
            let hotkey = HotKey::new(Some(Modifiers::CONTROL), code);
            self.manager.register(hotkey).map_err(|e| {
                ClipError::Hotkey(format!("{}: {}", binding.accelerator, e))
            })?;
            self.slots.write().insert(hotkey.id(), binding.index);
            self.registered.push(hotkey);
        }
        Ok(())
    }

    fn unregister_all(&mut self) -> Result<()> {
        self.slots.write().clear();
        if self.registered.is_empty() {
            return Ok(());
        }
        let result = self.manager.unregister_all(&self.registered);
        self.registered.clear();
        result.map_err(hotkey_error)
    }
}

impl Drop for GlobalHotkeys {
    fn drop(&mut self) {
        if let Err(e) = self.unregister_all() {
            warn!("failed to release shortcuts: {}", e);
        }
    }
}
