use crate::Warning;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};

/// Bounded buffer of non-fatal housekeeping failures.
///
/// Every warning is logged when reported. Once `capacity` undrained warnings
/// are buffered, the oldest is dropped to make room.
#[derive(Debug)]
pub(crate) struct WarningChannel {
    capacity: usize,
    queue: Mutex<VecDeque<Warning>>,
    dropped: AtomicU64,
}

impl WarningChannel {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            capacity,
            queue: Mutex::new(VecDeque::with_capacity(capacity.min(1024))),
            dropped: AtomicU64::new(0),
        }
    }

    pub(crate) fn report(&self, warning: Warning) {
        tracing::warn!("{}", warning);

        if self.capacity == 0 {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            return;
        }

        let mut queue = self.queue.lock();
        if queue.len() >= self.capacity {
            queue.pop_front();
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
        queue.push_back(warning);
    }

    pub(crate) fn drain(&self) -> Vec<Warning> {
        let dropped = self.dropped.swap(0, Ordering::Relaxed);
        if dropped > 0 {
            tracing::warn!(dropped, "warning buffer overflowed");
        }

        self.queue.lock().drain(..).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;
    use std::path::PathBuf;

    fn warning(name: &str) -> Warning {
        Warning::Retention {
            path: PathBuf::from(name),
            source: io::Error::from(io::ErrorKind::PermissionDenied),
        }
    }

    #[test]
    fn test_drain_returns_warnings_in_order() {
        let channel = WarningChannel::new(4);
        channel.report(warning("a"));
        channel.report(warning("b"));

        let paths: Vec<_> = channel.drain().iter().map(|w| w.path().to_path_buf()).collect();
        assert_eq!(paths, vec![PathBuf::from("a"), PathBuf::from("b")]);
        assert!(channel.drain().is_empty());
    }

    #[test]
    fn test_oldest_warning_is_dropped_when_full() {
        let channel = WarningChannel::new(2);
        channel.report(warning("a"));
        channel.report(warning("b"));
        channel.report(warning("c"));

        let paths: Vec<_> = channel.drain().iter().map(|w| w.path().to_path_buf()).collect();
        assert_eq!(paths, vec![PathBuf::from("b"), PathBuf::from("c")]);
    }

    #[test]
    fn test_zero_capacity_only_logs() {
        let channel = WarningChannel::new(0);
        channel.report(warning("a"));
        assert!(channel.drain().is_empty());
    }
}
