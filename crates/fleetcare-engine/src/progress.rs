//! Progress event sink.

use tracing::{info, warn};

/// Receives one line per notable event: device start, device result,
/// periodic heartbeat, completion. Sits on the critical path between
/// devices, so implementations must be cheap and must not block.
pub trait ProgressSink: Send + Sync {
    fn emit(&self, message: &str, is_error: bool);
}

/// Discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

impl ProgressSink for NullSink {
    fn emit(&self, _message: &str, _is_error: bool) {}
}

/// Forwards progress lines to the tracing subscriber.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl ProgressSink for TracingSink {
    fn emit(&self, message: &str, is_error: bool) {
        if is_error {
            warn!("{message}");
        } else {
            info!("{message}");
        }
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::ProgressSink;
    use parking_lot::Mutex;
    use std::sync::Arc;

    /// Captures every emitted line for assertions.
    #[derive(Debug, Clone, Default)]
    pub struct RecordingSink {
        pub lines: Arc<Mutex<Vec<(String, bool)>>>,
    }

    impl RecordingSink {
        pub fn messages(&self) -> Vec<String> {
            self.lines
                .lock()
                .iter()
                .map(|(message, _)| message.clone())
                .collect()
        }

        pub fn error_count(&self) -> usize {
            self.lines.lock().iter().filter(|(_, err)| *err).count()
        }
    }

    impl ProgressSink for RecordingSink {
        fn emit(&self, message: &str, is_error: bool) {
            self.lines.lock().push((message.to_string(), is_error));
        }
    }
}
