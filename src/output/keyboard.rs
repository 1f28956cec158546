// SPDX-License-Identifier: GPL-3.0-only

//! Keyboard simulation for the paste keystroke.

use crate::hotkeys::{HotkeyCombo, Modifier};
use anyhow::{Result, anyhow};
use enigo::{Direction, Enigo, Key, Keyboard, Settings};
use log::debug;

/// Simulated key input toward the focused window.
pub trait KeyboardInjector: Send {
    /// Press the combo: modifiers held, key clicked, modifiers released.
    ///
    /// # Errors
    ///
    /// Returns an error when the OS input connection fails or the combo key
    /// has no OS mapping.
    fn send(&mut self, combo: &HotkeyCombo) -> Result<()>;
}

/// Default injector over `enigo`; the connection is established on first
/// use.
#[derive(Default)]
pub struct EnigoInjector {
    inner: Option<Enigo>,
}

impl EnigoInjector {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyboardInjector for EnigoInjector {
    fn send(&mut self, combo: &HotkeyCombo) -> Result<()> {
        let enigo = match &mut self.inner {
            Some(enigo) => enigo,
            slot => slot.insert(
                Enigo::new(&Settings::default())
                    .map_err(|e| anyhow!("failed to initialize keyboard injection: {e}"))?,
            ),
        };

        let key = enigo_key(&combo.key)
            .ok_or_else(|| anyhow!("unmappable key '{}'", combo.key))?;

        for modifier in &combo.modifiers {
            enigo
                .key(enigo_modifier(*modifier), Direction::Press)
                .map_err(|e| anyhow!("key press failed: {e}"))?;
        }
        let result = enigo
            .key(key, Direction::Click)
            .map_err(|e| anyhow!("key click failed: {e}"));
        for modifier in combo.modifiers.iter().rev() {
            let _ = enigo.key(enigo_modifier(*modifier), Direction::Release);
        }
        result?;

        debug!("Injected keystroke '{combo}'");
        Ok(())
    }
}

fn enigo_modifier(modifier: Modifier) -> Key {
    match modifier {
        Modifier::Ctrl => Key::Control,
        Modifier::Shift => Key::Shift,
        Modifier::Alt => Key::Alt,
        Modifier::Win => Key::Meta,
    }
}

fn enigo_key(token: &str) -> Option<Key> {
    let named = match token {
        "space" => Some(Key::Space),
        "enter" | "return" => Some(Key::Return),
        "tab" => Some(Key::Tab),
        "esc" | "escape" => Some(Key::Escape),
        "backspace" => Some(Key::Backspace),
        "delete" => Some(Key::Delete),
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
    match (chars.next(), chars.next()) {
        (Some(c), None) => Some(Key::Unicode(c)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_named_and_unicode_keys() {
        assert!(matches!(enigo_key("space"), Some(Key::Space)));
        assert!(matches!(enigo_key("v"), Some(Key::Unicode('v'))));
        assert!(enigo_key("notakey").is_none());
    }
}
