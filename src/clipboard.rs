//! System clipboard access for copying messages

use crate::{Error, Result};

/// Destination for copied message text
pub trait Clipboard {
    /// Replace the clipboard contents
    ///
    /// # Errors
    ///
    /// Returns error if the clipboard is unavailable
    fn copy(&mut self, text: &str) -> Result<()>;
}

/// The desktop clipboard
#[derive(Debug, Default)]
pub struct SystemClipboard;

impl Clipboard for SystemClipboard {
    fn copy(&mut self, text: &str) -> Result<()> {
        cli_clipboard::set_contents(text.to_owned()).map_err(|e| Error::Clipboard(e.to_string()))
    }
}
