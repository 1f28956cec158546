// SPDX-License-Identifier: GPL-3.0-only
pub mod clipboard;
pub mod keyboard;

pub use clipboard::{ArboardClipboard, ClipboardService};
pub use keyboard::{EnigoInjector, KeyboardInjector};
