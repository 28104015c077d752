use std::collections::BTreeMap;
use std::time::Instant;

/// Observer for orchestration events: stage timings, batch progress and metrics.
///
/// Use cases report through this port so the CLI can summarise a run while
/// tests stay silent.
pub trait PipelineLogger: Send {
    /// Report progress through a counted unit of work (stages, batches).
    fn progress(&mut self, current: usize, total: usize);

    /// Record how long one named step took.
    fn timing(&mut self, step: &str, duration_ms: f64);

    /// Record a point-in-time value (fill ratio, frame count).
    fn metric(&mut self, name: &str, value: f64);

    fn info(&mut self, message: &str);

    /// Emit an end-of-run summary. Default: no-op.
    fn summary(&self) {}
}

/// Discards all events.
pub struct NullPipelineLogger;

impl PipelineLogger for NullPipelineLogger {
    fn progress(&mut self, _current: usize, _total: usize) {}
    fn timing(&mut self, _step: &str, _duration_ms: f64) {}
    fn metric(&mut self, _name: &str, _value: f64) {}
    fn info(&mut self, _message: &str) {}
}

/// Forwards events to the `log` facade and keeps totals for the summary.
///
/// Progress lines are throttled to every `throttle` units.
pub struct StdoutPipelineLogger {
    throttle: usize,
    timings: BTreeMap<String, Vec<f64>>,
    metrics: BTreeMap<String, Vec<f64>>,
    start_time: Instant,
    total_units: usize,
    messages: Vec<String>,
}

impl StdoutPipelineLogger {
    pub fn new(throttle: usize) -> Self {
        Self {
            throttle: throttle.max(1),
            timings: BTreeMap::new(),
            metrics: BTreeMap::new(),
            start_time: Instant::now(),
            total_units: 0,
            messages: Vec::new(),
        }
    }

    /// Formatted summary, or `None` if nothing was recorded.
    pub fn summary_string(&self) -> Option<String> {
        if self.timings.is_empty() && self.metrics.is_empty() {
            return None;
        }

        let elapsed_s = self.start_time.elapsed().as_secs_f64();
        let mut lines = vec![format!("Run summary ({elapsed_s:.1}s wall time):")];

        for (step, durations) in &self.timings {
            let total_ms: f64 = durations.iter().sum();
            if durations.len() == 1 {
                lines.push(format!("  {step:14}: {:8.1}s", total_ms / 1000.0));
            } else {
                let avg_ms = total_ms / durations.len() as f64;
                lines.push(format!(
                    "  {step:14}: {:8.1}s over {} calls (avg {avg_ms:.1}ms)",
                    total_ms / 1000.0,
                    durations.len()
                ));
            }
        }

        for (name, values) in &self.metrics {
            let avg = values.iter().sum::<f64>() / values.len().max(1) as f64;
            lines.push(format!("  {name}: avg {avg:.3}"));
        }

        Some(lines.join("\n"))
    }

    pub fn timings_for(&self, step: &str) -> Option<&[f64]> {
        self.timings.get(step).map(|v| v.as_slice())
    }

    pub fn metrics_for(&self, name: &str) -> Option<&[f64]> {
        self.metrics.get(name).map(|v| v.as_slice())
    }
}

impl Default for StdoutPipelineLogger {
    fn default() -> Self {
        Self::new(50)
    }
}

impl PipelineLogger for StdoutPipelineLogger {
    fn progress(&mut self, current: usize, total: usize) {
        self.total_units = total;
        if total > 0 && (current % self.throttle == 0 || current == total) {
            let pct = current as f64 / total as f64 * 100.0;
            log::info!("Progress: {current}/{total} ({pct:.1}%)");
        }
    }

    fn timing(&mut self, step: &str, duration_ms: f64) {
        self.timings
            .entry(step.to_string())
            .or_default()
            .push(duration_ms);
    }

    fn metric(&mut self, name: &str, value: f64) {
        self.metrics.entry(name.to_string()).or_default().push(value);
    }

    fn info(&mut self, message: &str) {
        self.messages.push(message.to_string());
        log::info!("{message}");
    }

    fn summary(&self) {
        if let Some(text) = self.summary_string() {
            log::info!("\n\n{text}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_null_logger_accepts_everything() {
        let mut logger = NullPipelineLogger;
        logger.progress(1, 10);
        logger.timing("train(mono)", 5.0);
        logger.metric("fill_ratio", 0.5);
        logger.info("hello");
        logger.summary();
    }

    #[test]
    fn test_timings_accumulate_per_step() {
        let mut logger = StdoutPipelineLogger::new(10);
        logger.timing("align(tri)", 2000.0);
        logger.timing("batch", 3.0);
        logger.timing("batch", 5.0);

        assert_eq!(logger.timings_for("align(tri)"), Some(&[2000.0][..]));
        assert_eq!(logger.timings_for("batch").map(<[f64]>::len), Some(2));
        assert!(logger.timings_for("test(tri)").is_none());
    }

    #[test]
    fn test_summary_lists_steps_and_metrics() {
        let mut logger = StdoutPipelineLogger::new(10);
        logger.timing("train(mono)", 1500.0);
        logger.timing("batch", 4.0);
        logger.timing("batch", 6.0);
        logger.metric("fill_ratio", 0.25);
        logger.metric("fill_ratio", 0.75);

        let summary = logger.summary_string().unwrap();
        assert!(summary.starts_with("Run summary"));
        assert!(summary.contains("train(mono)"));
        assert!(summary.contains("over 2 calls (avg 5.0ms)"));
        assert!(summary.contains("fill_ratio: avg 0.500"));
        let values = logger.metrics_for("fill_ratio").unwrap();
        assert_relative_eq!(values.iter().sum::<f64>(), 1.0);
    }

    #[test]
    fn test_empty_summary_returns_none() {
        assert!(StdoutPipelineLogger::default().summary_string().is_none());
    }

    #[test]
    fn test_progress_records_total_and_messages_are_kept() {
        let mut logger = StdoutPipelineLogger::new(3);
        for i in 1..=7 {
            logger.progress(i, 7);
        }
        logger.info("done");
        assert_eq!(logger.total_units, 7);
        assert_eq!(logger.messages, vec!["done".to_string()]);
    }
}
