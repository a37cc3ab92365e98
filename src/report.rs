use std::time::Duration;

/// Aggregated statistics for one streaming scenario (a prompt or a context
/// length), reduced over sequential trials.
#[derive(Debug, Clone)]
pub struct TrialReport {
    pub label: String,
    pub ttft_p50_ms: Option<f64>,
    pub ttft_p95_ms: Option<f64>,
    pub tps_p50: Option<f64>,
    pub tps_p95: Option<f64>,
    pub samples: u64,
    pub failures: u64,
}

/// Aggregated statistics for one concurrency step of the load sweep.
#[derive(Debug, Clone)]
pub struct StepReport {
    pub concurrency: usize,
    pub ok: u64,
    pub failures: u64,
    pub qps: f64,
    pub latency_p50_ms: Option<f64>,
    pub latency_p95_ms: Option<f64>,
    pub wall: Duration,
}

impl StepReport {
    pub fn summary_line(&self) -> String {
        if self.ok > 0 {
            format!(
                "concurrency={:<3}  ok={:<3} fail={:<3}  QPS={:.2}  p50={}ms  p95={}ms  wall={:.1}s",
                self.concurrency,
                self.ok,
                self.failures,
                self.qps,
                format_ms_0(self.latency_p50_ms),
                format_ms_0(self.latency_p95_ms),
                self.wall.as_secs_f64(),
            )
        } else {
            format!(
                "concurrency={:<3}  ok=0   fail={:<3}  QPS=0.00  (all failed or timed out)  wall={:.1}s",
                self.concurrency,
                self.failures,
                self.wall.as_secs_f64(),
            )
        }
    }
}

/// Renders an optional millisecond value, "n/a" when the statistic is
/// undefined (no successful samples).
pub fn format_ms(value: Option<f64>) -> String {
    match value {
        Some(ms) => format!("{:.1}", ms),
        None => "n/a".to_string(),
    }
}

fn format_ms_0(value: Option<f64>) -> String {
    match value {
        Some(ms) => format!("{:.0}", ms),
        None => "n/a".to_string(),
    }
}
