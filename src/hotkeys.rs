// SPDX-License-Identifier: GPL-3.0-only

//! Global hotkey grammar and OS binding.
//!
//! Combos use the form `[modifier+]*key` (case-insensitive ASCII), e.g.
//! `ctrl+shift+space`. The last token is the key watched for release in
//! push-to-talk mode.

use crate::error::CoreError;
use log::{debug, warn};
use parking_lot::Mutex;
use std::sync::{Arc, OnceLock};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Modifier {
    Ctrl,
    Shift,
    Alt,
    Win,
}

impl Modifier {
    fn parse(token: &str) -> Option<Self> {
        match token {
            "ctrl" => Some(Self::Ctrl),
            "shift" => Some(Self::Shift),
            "alt" => Some(Self::Alt),
            "win" => Some(Self::Win),
            _ => None,
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            Self::Ctrl => "ctrl",
            Self::Shift => "shift",
            Self::Alt => "alt",
            Self::Win => "win",
        }
    }
}

/// A parsed hotkey combination. The key token is kept normalized lowercase;
/// whether it maps to an actual OS key is decided at bind time.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct HotkeyCombo {
    pub modifiers: Vec<Modifier>,
    pub key: String,
}

impl HotkeyCombo {
    /// Parse a combo string such as `ctrl+shift+space`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidSetting` when the string is empty, a modifier token is
    /// unknown, or the final key token is missing.
    pub fn parse(combo: &str) -> Result<Self, CoreError> {
        let normalized = combo.trim().to_ascii_lowercase();
        if normalized.is_empty() {
            return Err(CoreError::InvalidSetting {
                field: "hotkey",
                reason: "empty combo".to_string(),
            });
        }

        let tokens: Vec<&str> = normalized.split('+').map(str::trim).collect();
        if tokens.iter().any(|t| t.is_empty()) {
            return Err(CoreError::InvalidSetting {
                field: "hotkey",
                reason: format!("malformed combo '{combo}'"),
            });
        }

        let Some((key, modifier_tokens)) = tokens.split_last() else {
            return Err(CoreError::InvalidSetting {
                field: "hotkey",
                reason: format!("malformed combo '{combo}'"),
            });
        };
        let mut modifiers = Vec::new();
        for token in modifier_tokens {
            let modifier = Modifier::parse(token).ok_or_else(|| CoreError::InvalidSetting {
                field: "hotkey",
                reason: format!("unknown modifier '{token}' in '{combo}'"),
            })?;
            if !modifiers.contains(&modifier) {
                modifiers.push(modifier);
            }
        }

        Ok(Self {
            modifiers,
            key: (*key).to_string(),
        })
    }
}

impl std::fmt::Display for HotkeyCombo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for modifier in &self.modifiers {
            write!(f, "{}+", modifier.as_str())?;
        }
        write!(f, "{}", self.key)
    }
}

pub type HotkeyHandler = Box<dyn Fn() + Send + Sync>;

/// OS-level global hotkey hooks consumed by the pipeline controller.
pub trait OsHotkeyBinder: Send {
    /// Invoke `handler` when the full combo is pressed.
    ///
    /// # Errors
    ///
    /// Returns `HotkeyBindFailed` when the combo cannot be hooked.
    fn bind_press(&mut self, combo: &HotkeyCombo, handler: HotkeyHandler) -> Result<(), CoreError>;

    /// Invoke `handler` when `key` (a bare key token) is released.
    ///
    /// # Errors
    ///
    /// Returns `HotkeyBindFailed` when the key cannot be hooked.
    fn bind_release(&mut self, key: &str, handler: HotkeyHandler) -> Result<(), CoreError>;

    /// Remove every installed hook.
    fn unbind_all(&mut self);
}

// ---------------------------------------------------------------------------
// rdev-backed implementation
// ---------------------------------------------------------------------------

struct PressBinding {
    modifiers: Vec<Modifier>,
    key: rdev::Key,
    handler: HotkeyHandler,
}

struct ReleaseBinding {
    key: rdev::Key,
    handler: HotkeyHandler,
}

#[derive(Default)]
struct ListenerState {
    press: Vec<PressBinding>,
    release: Vec<ReleaseBinding>,
    down_keys: Vec<rdev::Key>,
}

impl ListenerState {
    fn modifier_down(&self, modifier: Modifier) -> bool {
        let candidates: &[rdev::Key] = match modifier {
            Modifier::Ctrl => &[rdev::Key::ControlLeft, rdev::Key::ControlRight],
            Modifier::Shift => &[rdev::Key::ShiftLeft, rdev::Key::ShiftRight],
            Modifier::Alt => &[rdev::Key::Alt, rdev::Key::AltGr],
            Modifier::Win => &[rdev::Key::MetaLeft, rdev::Key::MetaRight],
        };
        candidates.iter().any(|k| self.down_keys.contains(k))
    }

    fn on_event(&mut self, event: &rdev::Event) {
        match event.event_type {
            rdev::EventType::KeyPress(key) => {
                let repeat = self.down_keys.contains(&key);
                if !repeat {
                    self.down_keys.push(key);
                    for binding in &self.press {
                        if binding.key == key
                            && binding.modifiers.iter().all(|&m| self.modifier_down(m))
                        {
                            (binding.handler)();
                        }
                    }
                }
            }
            rdev::EventType::KeyRelease(key) => {
                self.down_keys.retain(|&k| k != key);
                for binding in &self.release {
                    if binding.key == key {
                        (binding.handler)();
                    }
                }
            }
            _ => {}
        }
    }
}

static LISTENER_STATE: OnceLock<Arc<Mutex<ListenerState>>> = OnceLock::new();

fn listener_state() -> &'static Arc<Mutex<ListenerState>> {
    LISTENER_STATE.get_or_init(|| {
        let state = Arc::new(Mutex::new(ListenerState::default()));
        let state_for_thread = Arc::clone(&state);
        std::thread::Builder::new()
            .name("voxkey-hotkeys".to_string())
            .spawn(move || {
                // rdev::listen blocks for the process lifetime; bindings are
                // swapped through the shared state instead of restarting it.
                let result = rdev::listen(move |event| {
                    state_for_thread.lock().on_event(&event);
                });
                if let Err(e) = result {
                    warn!("Global hotkey listener stopped: {e:?}");
                }
            })
            .expect("failed to spawn hotkey listener thread");
        state
    })
}

/// Global hotkey binder backed by an `rdev` keyboard hook.
#[derive(Default)]
pub struct RdevHotkeyBinder;

impl RdevHotkeyBinder {
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl OsHotkeyBinder for RdevHotkeyBinder {
    fn bind_press(&mut self, combo: &HotkeyCombo, handler: HotkeyHandler) -> Result<(), CoreError> {
        let key = key_from_token(&combo.key).ok_or_else(|| CoreError::HotkeyBindFailed {
            combo: combo.to_string(),
            reason: format!("unmappable key '{}'", combo.key),
        })?;
        debug!("Binding press hook for '{combo}'");
        listener_state().lock().press.push(PressBinding {
            modifiers: combo.modifiers.clone(),
            key,
            handler,
        });
        Ok(())
    }

    fn bind_release(&mut self, key: &str, handler: HotkeyHandler) -> Result<(), CoreError> {
        let mapped = key_from_token(key).ok_or_else(|| CoreError::HotkeyBindFailed {
            combo: key.to_string(),
            reason: format!("unmappable key '{key}'"),
        })?;
        debug!("Binding release hook for '{key}'");
        listener_state()
            .lock()
            .release
            .push(ReleaseBinding {
                key: mapped,
                handler,
            });
        Ok(())
    }

    fn unbind_all(&mut self) {
        let mut state = listener_state().lock();
        state.press.clear();
        state.release.clear();
    }
}

/// Map a combo key token to an `rdev` key.
#[must_use]
pub fn key_from_token(token: &str) -> Option<rdev::Key> {
    use rdev::Key;

    let named = match token {
        "space" => Some(Key::Space),
        "enter" | "return" => Some(Key::Return),
        "tab" => Some(Key::Tab),
        "esc" | "escape" => Some(Key::Escape),
        "backspace" => Some(Key::Backspace),
        "delete" => Some(Key::Delete),
        "insert" => Some(Key::Insert),
        "home" => Some(Key::Home),
        "end" => Some(Key::End),
        "pageup" => Some(Key::PageUp),
        "pagedown" => Some(Key::PageDown),
        "up" => Some(Key::UpArrow),
        "down" => Some(Key::DownArrow),
        "left" => Some(Key::LeftArrow),
        "right" => Some(Key::RightArrow),
        "f1" => Some(Key::F1),
        "f2" => Some(Key::F2),
        "f3" => Some(Key::F3),
        "f4" => Some(Key::F4),
        "f5" => Some(Key::F5),
        "f6" => Some(Key::F6),
        "f7" => Some(Key::F7),
        "f8" => Some(Key::F8),
        "f9" => Some(Key::F9),
        "f10" => Some(Key::F10),
        "f11" => Some(Key::F11),
        "f12" => Some(Key::F12),
        _ => None,
    };
    if named.is_some() {
        return named;
    }

    let mut chars = token.chars();
    let (first, rest) = (chars.next()?, chars.next());
    if rest.is_some() {
        return None;
    }
    match first {
        'a' => Some(Key::KeyA),
        'b' => Some(Key::KeyB),
        'c' => Some(Key::KeyC),
        'd' => Some(Key::KeyD),
        'e' => Some(Key::KeyE),
        'f' => Some(Key::KeyF),
        'g' => Some(Key::KeyG),
        'h' => Some(Key::KeyH),
        'i' => Some(Key::KeyI),
        'j' => Some(Key::KeyJ),
        'k' => Some(Key::KeyK),
        'l' => Some(Key::KeyL),
        'm' => Some(Key::KeyM),
        'n' => Some(Key::KeyN),
        'o' => Some(Key::KeyO),
        'p' => Some(Key::KeyP),
        'q' => Some(Key::KeyQ),
        'r' => Some(Key::KeyR),
        's' => Some(Key::KeyS),
        't' => Some(Key::KeyT),
        'u' => Some(Key::KeyU),
        'v' => Some(Key::KeyV),
        'w' => Some(Key::KeyW),
        'x' => Some(Key::KeyX),
        'y' => Some(Key::KeyY),
        'z' => Some(Key::KeyZ),
        '0' => Some(Key::Num0),
        '1' => Some(Key::Num1),
        '2' => Some(Key::Num2),
        '3' => Some(Key::Num3),
        '4' => Some(Key::Num4),
        '5' => Some(Key::Num5),
        '6' => Some(Key::Num6),
        '7' => Some(Key::Num7),
        '8' => Some(Key::Num8),
        '9' => Some(Key::Num9),
        _ => None,
    }
}
