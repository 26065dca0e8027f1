//! Per-tool SLA collection, consulted by the event translator to
//! enrich `tool.completed` envelopes.

use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Mutex;

/// Snapshot of a tool's observed performance, as carried in a
/// `tool.completed` envelope's `tool_sla` payload key.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ToolSla {
    /// 50th percentile latency, milliseconds.
    pub p50_ms: u64,
    /// 95th percentile latency, milliseconds.
    pub p95_ms: u64,
    /// 99th percentile latency, milliseconds.
    pub p99_ms: u64,
    /// Fraction of calls that failed, in `[0, 1]`.
    pub error_rate: f64,
    /// Total calls observed.
    pub call_count: u64,
    /// Fraction of calls that succeeded, in `[0, 1]`.
    pub success_rate: f64,
    /// Cumulative USD cost across all observed calls.
    pub cumulative_cost: Decimal,
    /// USD cost of the most recent call.
    pub per_call_cost: Decimal,
}

#[derive(Default)]
struct ToolSamples {
    latencies_ms: Vec<u64>,
    failures: u64,
    cumulative_cost: Decimal,
    last_cost: Decimal,
}

fn percentile(sorted: &[u64], pct: f64) -> u64 {
    if sorted.is_empty() {
        return 0;
    }
    let rank = ((sorted.len() - 1) as f64 * pct).round() as usize;
    sorted[rank.min(sorted.len() - 1)]
}

/// Collects per-tool latency/cost samples and computes [`ToolSla`]
/// snapshots on demand.
pub trait SlaCollector: Send + Sync {
    /// Record one completed call.
    fn record(&self, tool_name: &str, latency_ms: u64, success: bool, cost: Decimal);

    /// Compute the current snapshot for a tool, if any calls have been
    /// recorded.
    fn snapshot(&self, tool_name: &str) -> Option<ToolSla>;
}

/// In-process [`SlaCollector`] backed by a mutex-guarded map — no
/// persistence, suitable for a single process's lifetime.
#[derive(Default)]
pub struct InMemorySlaCollector {
    samples: Mutex<HashMap<String, ToolSamples>>,
}

impl InMemorySlaCollector {
    /// An empty collector.
    pub fn new() -> Self {
        Self::default()
    }
}

impl SlaCollector for InMemorySlaCollector {
    fn record(&self, tool_name: &str, latency_ms: u64, success: bool, cost: Decimal) {
        let mut samples = self.samples.lock().unwrap();
        let entry = samples.entry(tool_name.to_string()).or_default();
        entry.latencies_ms.push(latency_ms);
        if !success {
            entry.failures += 1;
        }
        entry.cumulative_cost += cost;
        entry.last_cost = cost;
    }

    fn snapshot(&self, tool_name: &str) -> Option<ToolSla> {
        let samples = self.samples.lock().unwrap();
        let entry = samples.get(tool_name)?;
        if entry.latencies_ms.is_empty() {
            return None;
        }
        let mut sorted = entry.latencies_ms.clone();
        sorted.sort_unstable();
        let call_count = sorted.len() as u64;
        let error_rate = entry.failures as f64 / call_count as f64;
        Some(ToolSla {
            p50_ms: percentile(&sorted, 0.50),
            p95_ms: percentile(&sorted, 0.95),
            p99_ms: percentile(&sorted, 0.99),
            error_rate,
            call_count,
            success_rate: 1.0 - error_rate,
            cumulative_cost: entry.cumulative_cost,
            per_call_cost: entry.last_cost,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_is_none_before_any_samples() {
        let collector = InMemorySlaCollector::new();
        assert!(collector.snapshot("deploy").is_none());
    }

    #[test]
    fn snapshot_computes_percentiles_and_rates() {
        let collector = InMemorySlaCollector::new();
        for (latency, success) in [(100, true), (200, true), (300, false), (400, true)] {
            collector.record("deploy", latency, success, Decimal::new(1, 2));
        }
        let snap = collector.snapshot("deploy").unwrap();
        assert_eq!(snap.call_count, 4);
        assert_eq!(snap.error_rate, 0.25);
        assert_eq!(snap.p50_ms, 200);
        assert_eq!(snap.p99_ms, 400);
    }
}
