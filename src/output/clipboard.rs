// SPDX-License-Identifier: GPL-3.0-only
use anyhow::{Result, anyhow};
use log::debug;

/// System clipboard writes, as consumed by the pipeline controller.
pub trait ClipboardService: Send {
    /// Replace the clipboard contents with `text`.
    ///
    /// # Errors
    ///
    /// Returns an error when the OS clipboard cannot be reached.
    fn set_text(&mut self, text: &str) -> Result<()>;
}

/// Default clipboard over `arboard`. The OS handle is created on first use
/// so construction never touches the display server.
#[derive(Default)]
pub struct ArboardClipboard {
    inner: Option<arboard::Clipboard>,
}

impl ArboardClipboard {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl ClipboardService for ArboardClipboard {
    fn set_text(&mut self, text: &str) -> Result<()> {
        let clipboard = match &mut self.inner {
            Some(clipboard) => clipboard,
            slot => slot.insert(
                arboard::Clipboard::new().map_err(|e| anyhow!("clipboard unavailable: {e}"))?,
            ),
        };
        clipboard
            .set_text(text.to_string())
            .map_err(|e| anyhow!("clipboard write failed: {e}"))?;
        debug!("Copied {} chars to clipboard", text.chars().count());
        Ok(())
    }
}
