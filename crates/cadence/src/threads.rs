//! Worker thread naming.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tracing::trace;

/// Produces names for worker threads from a pattern.
///
/// The first `{}` in the pattern is replaced by a counter starting at 1.
/// Patterns without a placeholder get `-<index>` appended.
#[derive(Debug, Clone)]
pub(crate) struct ThreadNamer {
    pattern: Arc<str>,
    counter: Arc<AtomicUsize>,
}

impl ThreadNamer {
    pub(crate) fn new(pattern: &str) -> Self {
        Self {
            pattern: Arc::from(pattern),
            counter: Arc::new(AtomicUsize::new(1)),
        }
    }

    pub(crate) fn next_name(&self) -> String {
        let index = self.counter.fetch_add(1, Ordering::Relaxed);
        format_name(&self.pattern, index)
    }
}

pub(crate) fn format_name(pattern: &str, index: usize) -> String {
    if pattern.contains("{}") {
        pattern.replacen("{}", &index.to_string(), 1)
    } else {
        format!("{}-{}", pattern, index)
    }
}

pub(crate) fn on_worker_start() {
    trace!(
        thread = std::thread::current().name().unwrap_or("<unnamed>"),
        "worker started"
    );
}

pub(crate) fn on_worker_stop() {
    trace!(
        thread = std::thread::current().name().unwrap_or("<unnamed>"),
        "worker stopped"
    );
}
