//! Named counters collected while the pipeline runs.

use std::sync::atomic::{AtomicI64, Ordering};

use crossbeam_skiplist::SkipMap;

/// A thread-safe, name-ordered set of `i64` counters.
///
/// Counters spring into existence at zero on first use and only ever change by
/// [`MetricSink::incr`], so concurrent workers can record into the same sink.
#[derive(Debug, Default)]
pub struct MetricSink {
    counters: SkipMap<String, AtomicI64>,
}

impl MetricSink {
    /// An empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `delta` to the counter `name`.
    pub fn incr(&self, name: &str, delta: i64) {
        if let Some(entry) = self.counters.get(name) {
            entry.value().fetch_add(delta, Ordering::Relaxed);
            return;
        }
        self.counters
            .get_or_insert_with(name.to_string(), || AtomicI64::new(0))
            .value()
            .fetch_add(delta, Ordering::Relaxed);
    }

    /// The value of `name`; zero for a counter never touched.
    #[must_use]
    pub fn get(&self, name: &str) -> i64 {
        self.counters
            .get(name)
            .map_or(0, |e| e.value().load(Ordering::Relaxed))
    }

    /// Every counter in name order.
    #[must_use]
    pub fn snapshot(&self) -> Vec<(String, i64)> {
        self.counters
            .iter()
            .map(|e| (e.key().clone(), e.value().load(Ordering::Relaxed)))
            .collect()
    }

    /// Counters whose name starts with `prefix`, in name order.
    #[must_use]
    pub fn with_prefix(&self, prefix: &str) -> Vec<(String, i64)> {
        self.counters
            .range(prefix.to_string()..)
            .take_while(|e| e.key().starts_with(prefix))
            .map(|e| (e.key().clone(), e.value().load(Ordering::Relaxed)))
            .collect()
    }

    /// Number of counters.
    #[must_use]
    pub fn len(&self) -> usize {
        self.counters.len()
    }

    /// `true` if no counter was ever touched.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.counters.is_empty()
    }
}

/// A collection size as a counter delta.
pub(crate) fn as_metric(n: usize) -> i64 {
    i64::try_from(n).unwrap_or(i64::MAX)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use rayon::prelude::*;

    use super::*;

    #[test]
    fn concurrent_increments_add_up() {
        let sink = Arc::new(MetricSink::new());
        (0..1000).into_par_iter().for_each(|i| {
            sink.incr("pass.count", 1);
            if i % 2 == 0 {
                sink.incr("pass.even", 2);
            }
        });
        assert_eq!(sink.get("pass.count"), 1000);
        assert_eq!(sink.get("pass.even"), 1000);
        assert_eq!(sink.get("pass.missing"), 0);
        assert_eq!(
            sink.snapshot(),
            vec![("pass.count".to_string(), 1000), ("pass.even".to_string(), 1000)]
        );
    }

    #[test]
    fn prefix_query() {
        let sink = MetricSink::new();
        sink.incr("A.x", 1);
        sink.incr("B.x", 2);
        sink.incr("B.y", 3);
        sink.incr("C.x", 4);
        assert_eq!(
            sink.with_prefix("B."),
            vec![("B.x".to_string(), 2), ("B.y".to_string(), 3)]
        );
        assert_eq!(sink.len(), 4);
    }
}
