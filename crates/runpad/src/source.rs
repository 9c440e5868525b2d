//! Source buffer collaborator
//!
//! The editor holding the user's program. The controller reads it on every
//! run and only writes to it on backend switch, clear, or example load.

use std::sync::{Arc, Mutex, PoisonError};

pub trait SourceBuffer: Send {
    fn get_value(&self) -> String;

    fn set_value(&mut self, text: &str);

    fn focus(&mut self);

    /// Update the language mode tag (syntax highlighting and the like)
    fn set_language_mode(&mut self, mode: &str);
}

impl<T: SourceBuffer> SourceBuffer for Arc<Mutex<T>> {
    fn get_value(&self) -> String {
        self.lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get_value()
    }

    fn set_value(&mut self, text: &str) {
        self.lock()
            .unwrap_or_else(PoisonError::into_inner)
            .set_value(text)
    }

    fn focus(&mut self) {
        self.lock().unwrap_or_else(PoisonError::into_inner).focus()
    }

    fn set_language_mode(&mut self, mode: &str) {
        self.lock()
            .unwrap_or_else(PoisonError::into_inner)
            .set_language_mode(mode)
    }
}

/// Plain in-memory buffer
#[derive(Debug, Clone, Default)]
pub struct TextBuffer {
    text: String,
    mode: String,
    focused: bool,
}

impl TextBuffer {
    pub fn new(text: impl Into<String>, mode: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            mode: mode.into(),
            focused: false,
        }
    }

    /// Wrap a new buffer for sharing with a controller
    pub fn shared(text: impl Into<String>, mode: impl Into<String>) -> Arc<Mutex<Self>> {
        Arc::new(Mutex::new(Self::new(text, mode)))
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn mode(&self) -> &str {
        &self.mode
    }

    pub fn is_focused(&self) -> bool {
        self.focused
    }

    /// Append a line of text, as typed into an editor
    pub fn push_line(&mut self, line: &str) {
        if !self.text.is_empty() && !self.text.ends_with('\n') {
            self.text.push('\n');
        }
        self.text.push_str(line);
        self.text.push('\n');
    }
}

impl SourceBuffer for TextBuffer {
    fn get_value(&self) -> String {
        self.text.clone()
    }

    fn set_value(&mut self, text: &str) {
        text.clone_into(&mut self.text);
    }

    fn focus(&mut self) {
        self.focused = true;
    }

    fn set_language_mode(&mut self, mode: &str) {
        mode.clone_into(&mut self.mode);
    }
}
