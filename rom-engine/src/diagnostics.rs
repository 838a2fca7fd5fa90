//! Recoverable-warning sink, kept separate from [`crate::error::EngineError`]
//! so conditions that don't abort a save (duplicate loading-file entries,
//! auto-added file dependencies) never reach for `assert!`.

use log::warn;

pub trait Sink {
    fn warn(&self, message: &str);
}

/// Routes warnings through the `log` crate at `warn` level.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl Sink for LogSink {
    fn warn(&self, message: &str) {
        warn!("{}", message);
    }
}

/// Collects warnings into memory; used by tests that want to assert on
/// diagnostics without capturing `log` output.
#[derive(Debug, Default)]
pub struct RecordingSink {
    pub messages: std::cell::RefCell<Vec<String>>,
}

impl Sink for RecordingSink {
    fn warn(&self, message: &str) {
        self.messages.borrow_mut().push(message.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recording_sink_captures_messages_in_order() {
        let sink = RecordingSink::default();
        sink.warn("first");
        sink.warn("second");
        assert_eq!(sink.messages.into_inner(), vec!["first", "second"]);
    }
}
