//! Append-only merge of a provider's collection pass into an item's
//! metric history.

use crate::types::{MetricSnapshot, MetricValue, MetricValues, Metrics, Timestamp};

/// Qualify a metric name with its provider unless it already carries one.
pub fn qualified_metric_name(provider: &str, metric: &str) -> String {
    if metric.contains(':') {
        metric.to_string()
    } else {
        format!("{provider}:{metric}")
    }
}

/// Merge `new_values` collected by `provider` at `collected_at` into `existing`.
///
/// Each value becomes a new snapshot inserted after every snapshot with an
/// equal or earlier `collected_at`; earlier snapshots are never removed or
/// reordered. Every call appends, even when an identical snapshot (same
/// time, same value) already exists. Metrics that are absent from
/// `new_values` are left untouched.
pub fn merge(
    existing: &Metrics,
    provider: &str,
    new_values: &MetricValues,
    collected_at: Timestamp,
) -> Metrics {
    let mut merged = existing.clone();

    for (name, value) in new_values {
        let history = merged
            .entry(qualified_metric_name(provider, name))
            .or_default();

        let position = history
            .iter()
            .rposition(|s| s.collected_at <= collected_at)
            .map_or(0, |i| i + 1);
        history.insert(
            position,
            MetricSnapshot {
                value: value.clone(),
                collected_at,
            },
        );
    }

    merged
}

/// Number of snapshots recorded for one metric.
pub fn history_len(metrics: &Metrics, name: &str) -> usize {
    metrics.get(name).map_or(0, Vec::len)
}

/// Value of the most recent snapshot of one metric.
pub fn current_value<'a>(metrics: &'a Metrics, name: &str) -> Option<&'a MetricValue> {
    metrics.get(name).and_then(|h| h.last()).map(|s| &s.value)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn values(pairs: &[(&str, i64)]) -> MetricValues {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), MetricValue::Count(*v)))
            .collect()
    }

    #[test]
    fn appends_in_time_order() {
        let m = merge(&Metrics::new(), "github", &values(&[("github:forks", 5)]), 100);
        let m = merge(&m, "github", &values(&[("github:forks", 7)]), 200);

        let history = &m["github:forks"];
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].value, MetricValue::Count(5));
        assert_eq!(history[1].value, MetricValue::Count(7));
    }

    #[test]
    fn absent_metrics_are_left_alone() {
        let m = merge(
            &Metrics::new(),
            "github",
            &values(&[("github:forks", 5), ("github:watchers", 3)]),
            100,
        );
        let m = merge(&m, "github", &values(&[("github:forks", 6)]), 200);

        assert_eq!(history_len(&m, "github:watchers"), 1);
        assert_eq!(history_len(&m, "github:forks"), 2);
    }

    #[test]
    fn empty_pass_changes_nothing() {
        let m = merge(&Metrics::new(), "github", &values(&[("github:forks", 5)]), 100);
        let after = merge(&m, "github", &MetricValues::new(), 200);
        assert_eq!(after, m);
    }

    #[test]
    fn late_snapshot_is_inserted_without_reordering_prior_ones() {
        let m = merge(&Metrics::new(), "p", &values(&[("p:x", 1)]), 100);
        let m = merge(&m, "p", &values(&[("p:x", 3)]), 300);
        let m = merge(&m, "p", &values(&[("p:x", 2)]), 200);

        let times: Vec<_> = m["p:x"].iter().map(|s| s.collected_at).collect();
        assert_eq!(times, vec![100, 200, 300]);
        assert_eq!(current_value(&m, "p:x"), Some(&MetricValue::Count(3)));
    }

    #[test]
    fn same_millisecond_collections_both_append() {
        let pass = values(&[("p:x", 1)]);
        let m = merge(&Metrics::new(), "p", &pass, 100);
        let m = merge(&m, "p", &pass, 100);
        assert_eq!(history_len(&m, "p:x"), 2);
    }

    #[test]
    fn bare_names_are_qualified_with_provider() {
        let m = merge(&Metrics::new(), "pubmed", &values(&[("f1000", 1)]), 100);
        assert!(m.contains_key("pubmed:f1000"));
        assert_eq!(qualified_metric_name("pubmed", "github:forks"), "github:forks");
    }

    #[test]
    fn history_length_never_decreases() {
        let mut m = Metrics::new();
        let mut last_len = 0;
        for (i, v) in [4, 4, 9, 2, 2, 11].iter().enumerate() {
            m = merge(&m, "p", &values(&[("p:x", *v)]), (i as u64) * 10);
            let len = history_len(&m, "p:x");
            assert!(len >= last_len);
            last_len = len;
        }
        assert_eq!(last_len, 6);
    }
}
