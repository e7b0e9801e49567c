use std::fmt;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

use crate::search::{ContextOutcome, EmptyReason};

use super::MAX_METRICS_HISTORY;

/// Collects chat session metrics
pub struct MetricsCollector {
    state: RwLock<MetricsState>,
    start_time: Instant,
}

#[derive(Debug, Default)]
struct MetricsState {
    // Model lifecycle
    model_loads: usize,
    last_load_time: Option<Duration>,

    // Generation metrics
    generation_passes: usize,
    total_tokens: usize,
    tokens_per_second: Vec<f32>,
    latencies: Vec<Duration>,

    // Search metrics
    lookups: usize,
    augmented_lookups: usize,
    empty_lookups: Vec<(String, usize)>,

    // Error metrics
    total_errors: usize,
    error_types: Vec<(String, usize)>,
}

/// A snapshot of current metrics
#[derive(Debug, Clone)]
pub struct MetricsSnapshot {
    pub uptime: Duration,

    pub model_loads: usize,
    pub last_load_time: Option<Duration>,

    pub generation_passes: usize,
    pub total_tokens: usize,
    pub average_tokens_per_second: f32,
    pub average_latency: Duration,
    pub p95_latency: Duration,

    pub lookups: usize,
    pub augmented_lookups: usize,
    pub empty_lookups: Vec<(String, usize)>,

    pub total_errors: usize,
    pub error_types: Vec<(String, usize)>,
}

fn bump(counts: &mut Vec<(String, usize)>, key: &str) {
    if let Some(entry) = counts.iter_mut().find(|(k, _)| k == key) {
        entry.1 += 1;
    } else {
        counts.push((key.to_string(), 1));
    }
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(MetricsState::default()),
            start_time: Instant::now(),
        }
    }

    pub async fn record_model_load(&self, duration: Duration) {
        let mut state = self.state.write().await;
        state.model_loads += 1;
        state.last_load_time = Some(duration);
    }

    /// Record one finished generation pass
    pub async fn record_generation(&self, tokens: usize, duration: Duration) {
        let mut state = self.state.write().await;
        state.generation_passes += 1;
        state.total_tokens += tokens;
        state.latencies.push(duration);

        let secs = duration.as_secs_f32();
        if secs > 0.0 {
            state.tokens_per_second.push(tokens as f32 / secs);
        }

        // Keep history bounded
        if state.latencies.len() > MAX_METRICS_HISTORY {
            state.latencies.remove(0);
        }
        if state.tokens_per_second.len() > MAX_METRICS_HISTORY {
            state.tokens_per_second.remove(0);
        }
    }

    pub async fn record_lookup(&self, outcome: &ContextOutcome) {
        let mut state = self.state.write().await;
        state.lookups += 1;
        match outcome {
            ContextOutcome::Found { .. } => state.augmented_lookups += 1,
            ContextOutcome::Empty { reason } => {
                let key = match reason {
                    EmptyReason::NoResults => "no_results",
                    EmptyReason::FetchFailed(_) => "fetch_failed",
                };
                bump(&mut state.empty_lookups, key);
            }
        }
    }

    pub async fn record_error(&self, error_type: &str) {
        let mut state = self.state.write().await;
        state.total_errors += 1;
        bump(&mut state.error_types, error_type);
    }

    /// Get a snapshot of current metrics
    pub async fn snapshot(&self) -> MetricsSnapshot {
        let state = self.state.read().await;

        let average_tps = if !state.tokens_per_second.is_empty() {
            state.tokens_per_second.iter().sum::<f32>() / state.tokens_per_second.len() as f32
        } else {
            0.0
        };

        let mut latencies = state.latencies.clone();
        latencies.sort();
        let p95_idx = ((latencies.len() as f32 * 0.95) as usize).min(latencies.len().saturating_sub(1));

        let average_latency = if !latencies.is_empty() {
            latencies.iter().sum::<Duration>() / latencies.len() as u32
        } else {
            Duration::default()
        };

        MetricsSnapshot {
            uptime: self.start_time.elapsed(),
            model_loads: state.model_loads,
            last_load_time: state.last_load_time,
            generation_passes: state.generation_passes,
            total_tokens: state.total_tokens,
            average_tokens_per_second: average_tps,
            average_latency,
            p95_latency: latencies.get(p95_idx).copied().unwrap_or_default(),
            lookups: state.lookups,
            augmented_lookups: state.augmented_lookups,
            empty_lookups: state.empty_lookups.clone(),
            total_errors: state.total_errors,
            error_types: state.error_types.clone(),
        }
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for MetricsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "uptime:           {:.0?}", self.uptime)?;
        match self.last_load_time {
            Some(load) => writeln!(f, "model loads:      {} (last {:.1?})", self.model_loads, load)?,
            None => writeln!(f, "model loads:      {}", self.model_loads)?,
        }
        writeln!(f, "generation passes: {}", self.generation_passes)?;
        writeln!(f, "tokens:           {} ({:.1} tok/s)", self.total_tokens, self.average_tokens_per_second)?;
        writeln!(f, "latency:          avg {:.1?}, p95 {:.1?}", self.average_latency, self.p95_latency)?;
        writeln!(f, "lookups:          {} ({} augmented)", self.lookups, self.augmented_lookups)?;
        for (reason, count) in &self.empty_lookups {
            writeln!(f, "  empty/{}: {}", reason, count)?;
        }
        write!(f, "errors:           {}", self.total_errors)?;
        for (kind, count) in &self.error_types {
            write!(f, "\n  {}: {}", kind, count)?;
        }
        Ok(())
    }
}
