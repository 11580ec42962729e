//! Progress reporting contract
//!
//! Long operations report through a [`Progress`] observer: a completion
//! fraction with a message, plus an error sink for problems that do not
//! stop the batch. Observers are `Send + Sync` so the library can run on a
//! worker thread while the caller renders events elsewhere.

/// Observer for batch operations
pub trait Progress: Send + Sync {
    /// Report completion in `0.0..=1.0` with a human-readable message
    fn progress(&self, fraction: f64, message: &str);

    /// Report a non-fatal problem
    fn error(&self, message: &str);
}

/// Forwards every event to `tracing`
#[derive(Debug, Default, Clone, Copy)]
pub struct LogProgress;

impl Progress for LogProgress {
    fn progress(&self, fraction: f64, message: &str) {
        tracing::info!("[{:3.0}%] {}", fraction * 100.0, message);
    }

    fn error(&self, message: &str) {
        tracing::warn!("{}", message);
    }
}

/// Discards every event
#[derive(Debug, Default, Clone, Copy)]
pub struct NoProgress;

impl Progress for NoProgress {
    fn progress(&self, _fraction: f64, _message: &str) {}

    fn error(&self, _message: &str) {}
}

/// Maps a sub-operation's `0..1` range into a slice of a parent range
pub struct ScaledProgress<'a> {
    inner: &'a dyn Progress,
    offset: f64,
    span: f64,
}

impl<'a> ScaledProgress<'a> {
    pub fn new(inner: &'a dyn Progress, offset: f64, span: f64) -> Self {
        Self {
            inner,
            offset,
            span,
        }
    }
}

impl Progress for ScaledProgress<'_> {
    fn progress(&self, fraction: f64, message: &str) {
        let scaled = self.offset + fraction.clamp(0.0, 1.0) * self.span;
        self.inner.progress(scaled.clamp(0.0, 1.0), message);
    }

    fn error(&self, message: &str) {
        self.inner.error(message);
    }
}
