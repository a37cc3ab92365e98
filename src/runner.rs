use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{anyhow, Context, Result};
use reqwest::Client;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, warn};

use crate::client::{measure_once, measure_stream};
use crate::config::BenchConfig;
use crate::gpu::gpu_mem_mib;
use crate::report::{format_ms, StepReport, TrialReport};
use crate::stats;

/// One point of the context-length sweep: filler text repeated to an
/// approximate prompt size, reported under a human-readable label.
#[derive(Debug, Clone)]
pub struct ContextScenario {
    pub label: String,
    pub filler_repeats: usize,
}

const CONTEXT_FILLER: &str = "This is filler text to increase the prompt context length. ";
const CONTEXT_QUESTION: &str = "\nIn 3 bullets, explain KV cache.";

fn context_prompt(filler_repeats: usize) -> String {
    let mut prompt = CONTEXT_FILLER.repeat(filler_repeats);
    prompt.push_str(CONTEXT_QUESTION);
    prompt
}

/// Repeats one streaming measurement sequentially and reduces the samples to
/// percentiles. Trials for a single scenario run back to back so they never
/// contend with each other for server capacity.
pub async fn run_trials(
    client: &Client,
    config: &BenchConfig,
    label: &str,
    prompt: &str,
    max_tokens: u32,
    repeats: usize,
    show_runs: bool,
) -> TrialReport {
    let mut ttfts = Vec::new();
    let mut rates = Vec::new();
    let mut failures = 0u64;

    for _ in 0..repeats {
        match measure_stream(client, config, prompt, max_tokens).await {
            Ok(sample) => {
                if show_runs {
                    println!(
                        "prompt='{}'  TTFT={} ms | tokens/sec={:.2} | dur={:.2}s | events={}",
                        truncate_label(prompt),
                        format_ms(sample.ttft_ms()),
                        sample.tokens_per_second(),
                        sample.duration.as_secs_f64(),
                        sample.events,
                    );
                }
                if let Some(ttft_ms) = sample.ttft_ms() {
                    ttfts.push(ttft_ms);
                }
                rates.push(sample.tokens_per_second());
            }
            Err(err) => {
                failures += 1;
                warn!(error = %err, label, "streaming trial failed");
            }
        }
    }

    TrialReport {
        label: label.to_string(),
        ttft_p50_ms: stats::median(&ttfts),
        ttft_p95_ms: stats::p95(&ttfts),
        tps_p50: stats::median(&rates),
        tps_p95: stats::p95(&rates),
        samples: rates.len() as u64,
        failures,
    }
}

/// Fans `total` operations out through a counting admission gate so that at
/// most `concurrency` are in flight at any instant, then joins the full
/// batch. Wall time runs from first submission to last completion.
async fn dispatch_gated<F, Fut, T>(
    concurrency: usize,
    total: usize,
    mut op: F,
) -> Result<(Vec<T>, std::time::Duration)>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = T> + Send + 'static,
    T: Send + 'static,
{
    if concurrency == 0 {
        return Err(anyhow!("concurrency must be greater than zero"));
    }

    let gate = Arc::new(Semaphore::new(concurrency));
    let started = Instant::now();

    let mut join_set = JoinSet::new();
    for _ in 0..total {
        let gate = Arc::clone(&gate);
        let request = op();
        join_set.spawn(async move {
            // Held for exactly the lifetime of the request; the guard drops
            // on every exit path, including timeouts.
            let _permit = gate.acquire_owned().await.expect("admission gate closed");
            request.await
        });
    }

    let mut outcomes = Vec::with_capacity(total);
    while let Some(joined) = join_set.join_next().await {
        outcomes.push(joined.context("request task panicked")?);
    }

    Ok((outcomes, started.elapsed()))
}

/// One concurrency step of the load sweep: `total` non-streaming requests
/// gated to `concurrency` in flight, reduced to QPS and latency percentiles
/// over the successful samples only.
pub async fn run_step(
    client: &Client,
    config: &BenchConfig,
    prompt: &str,
    max_tokens: u32,
    concurrency: usize,
    total: usize,
) -> Result<StepReport> {
    let (outcomes, wall) = dispatch_gated(concurrency, total, || {
        let client = client.clone();
        let config = config.clone();
        let prompt = prompt.to_string();
        async move {
            match measure_once(&client, &config, &prompt, max_tokens).await {
                Ok(latency) => Some(latency.as_secs_f64() * 1000.0),
                Err(err) => {
                    debug!(error = %err, "load request failed");
                    None
                }
            }
        }
    })
    .await?;

    let latencies: Vec<f64> = outcomes.into_iter().flatten().collect();
    let ok = latencies.len() as u64;
    let failures = total as u64 - ok;

    Ok(StepReport {
        concurrency,
        ok,
        failures,
        qps: stats::throughput(ok, wall),
        latency_p50_ms: stats::median(&latencies),
        latency_p95_ms: stats::p95(&latencies),
        wall,
    })
}

/// Streaming benchmark over a fixed prompt list: per-run detail lines while
/// trials execute, then one summary line per prompt.
pub async fn run_stream_sweep(
    client: &Client,
    config: &BenchConfig,
    prompts: &[String],
    max_tokens: u32,
    repeats: usize,
) -> Vec<TrialReport> {
    warm_up_stream(client, config, "Say hello in one sentence.", 32).await;

    let mut reports = Vec::with_capacity(prompts.len());
    for prompt in prompts {
        let label = truncate_label(prompt);
        let report = run_trials(client, config, &label, prompt, max_tokens, repeats, true).await;
        reports.push(report);
    }

    println!("\n=== SUMMARY (streaming) ===");
    for report in &reports {
        println!(
            "prompt='{}'  TTFT ms: p50={} p95={}  Tokens/s: p50={} p95={}  failures={}",
            report.label,
            format_ms(report.ttft_p50_ms),
            format_ms(report.ttft_p95_ms),
            format_rate(report.tps_p50),
            format_rate(report.tps_p95),
            report.failures,
        );
    }
    reports
}

/// TTFT scaling against prompt context length: one scenario per filler size,
/// one summary line each.
pub async fn run_context_sweep(
    client: &Client,
    config: &BenchConfig,
    scenarios: &[ContextScenario],
    max_tokens: u32,
    repeats: usize,
) -> Vec<TrialReport> {
    warm_up_stream(client, config, "Hello", 16).await;

    let mut reports = Vec::with_capacity(scenarios.len());
    for scenario in scenarios {
        let prompt = context_prompt(scenario.filler_repeats);
        let report = run_trials(
            client,
            config,
            &scenario.label,
            &prompt,
            max_tokens,
            repeats,
            false,
        )
        .await;
        println!(
            "context={}  TTFT_p50={}ms  tok/s_p50={}",
            report.label,
            format_ms(report.ttft_p50_ms),
            format_rate(report.tps_p50),
        );
        reports.push(report);
    }
    reports
}

/// Non-streaming load sweep across concurrency steps, with optional GPU
/// memory readings bracketing each step. Always prints one line per step,
/// even when every request in it failed.
pub async fn run_load_sweep(
    client: &Client,
    config: &BenchConfig,
    prompt: &str,
    max_tokens: u32,
    steps: &[usize],
    total: usize,
    sample_gpu: bool,
) -> Result<Vec<StepReport>> {
    // Cold-start warmup, result discarded.
    if let Err(err) = measure_once(client, config, prompt, max_tokens).await {
        debug!(error = %err, "warmup request failed");
    }

    let mut reports = Vec::with_capacity(steps.len());
    for &concurrency in steps {
        if sample_gpu {
            if let Some(mib) = gpu_mem_mib().await {
                println!(
                    "[GPU] before concurrency={}: mem_used={} MiB",
                    concurrency, mib
                );
            }
        }

        let report = run_step(client, config, prompt, max_tokens, concurrency, total).await?;

        if sample_gpu {
            if let Some(mib) = gpu_mem_mib().await {
                println!(
                    "[GPU] after  concurrency={}: mem_used={} MiB",
                    concurrency, mib
                );
            }
        }

        println!("{}", report.summary_line());
        println!("{}", "-".repeat(72));
        reports.push(report);
    }
    Ok(reports)
}

async fn warm_up_stream(client: &Client, config: &BenchConfig, prompt: &str, max_tokens: u32) {
    if let Err(err) = measure_stream(client, config, prompt, max_tokens).await {
        debug!(error = %err, "warmup request failed");
    }
}

fn truncate_label(prompt: &str) -> String {
    let head: String = prompt.chars().take(28).collect();
    if head.len() < prompt.len() {
        format!("{}...", head)
    } else {
        head
    }
}

fn format_rate(value: Option<f64>) -> String {
    match value {
        Some(rate) => format!("{:.2}", rate),
        None => "n/a".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread::sleep;
    use std::time::Duration;

    use super::*;

    fn test_config(server_url: &str, timeout: Duration) -> BenchConfig {
        BenchConfig::try_new(
            format!("{}/v1/chat/completions", server_url),
            "test-model",
            None,
        )
        .unwrap()
        .with_request_timeout(timeout)
    }

    #[tokio::test]
    async fn admission_gate_bounds_in_flight_operations() {
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let (outcomes, _wall) = dispatch_gated(8, 50, || {
            let in_flight = Arc::clone(&in_flight);
            let peak = Arc::clone(&peak);
            async move {
                let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(10)).await;
                in_flight.fetch_sub(1, Ordering::SeqCst);
            }
        })
        .await
        .unwrap();

        assert_eq!(outcomes.len(), 50);
        let peak = peak.load(Ordering::SeqCst);
        assert!(peak <= 8, "peak in-flight was {}", peak);
    }

    #[tokio::test]
    async fn zero_concurrency_is_rejected() {
        let result = dispatch_gated(0, 4, || async { () }).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn empty_batch_joins_immediately() {
        let (outcomes, _wall) = dispatch_gated(4, 0, || async { 1u32 }).await.unwrap();
        assert!(outcomes.is_empty());
    }

    #[tokio::test]
    async fn run_step_counts_every_success() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/v1/chat/completions")
            .with_status(200)
            .with_body("{\"choices\":[]}")
            .create_async()
            .await;

        let client = Client::new();
        let config = test_config(&server.url(), Duration::from_secs(5));
        let report = run_step(&client, &config, "hello", 16, 4, 16)
            .await
            .unwrap();

        assert_eq!(report.ok, 16);
        assert_eq!(report.failures, 0);
        assert_eq!(report.ok + report.failures, 16);
        assert!(report.qps > 0.0);
        assert!(report.latency_p50_ms.is_some());
        assert!(report.latency_p95_ms.is_some());
    }

    #[tokio::test]
    async fn run_step_with_all_timeouts_reports_undefined_percentiles() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/v1/chat/completions")
            .with_status(200)
            .with_chunked_body(|w| {
                sleep(Duration::from_secs(2));
                w.write_all(b"{}")
            })
            .create_async()
            .await;

        let client = Client::new();
        let config = test_config(&server.url(), Duration::from_millis(150));
        let report = run_step(&client, &config, "hello", 16, 2, 4)
            .await
            .unwrap();

        assert_eq!(report.ok, 0);
        assert_eq!(report.failures, 4);
        assert_eq!(report.qps, 0.0);
        assert!(report.latency_p50_ms.is_none());
        assert!(report.latency_p95_ms.is_none());
    }

    #[tokio::test]
    async fn run_step_with_unreachable_server_never_hangs() {
        // Nothing listens on this port; every attempt is a transport failure.
        let config = test_config("http://127.0.0.1:9", Duration::from_millis(500));
        let client = Client::new();
        let report = run_step(&client, &config, "hello", 16, 2, 6)
            .await
            .unwrap();

        assert_eq!(report.ok, 0);
        assert_eq!(report.failures, 6);
        assert_eq!(report.qps, 0.0);
    }

    #[tokio::test]
    async fn trials_aggregate_stream_samples() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/v1/chat/completions")
            .with_status(200)
            .with_header("content-type", "text/event-stream")
            .with_chunked_body(|w| {
                w.write_all(b"data: {\"choices\":[{\"delta\":{\"content\":\"x\"}}]}\n")?;
                w.write_all(b"data: {\"choices\":[{\"delta\":{\"content\":\"y\"}}]}\n")?;
                w.write_all(b"data: [DONE]\n")
            })
            .create_async()
            .await;

        let client = Client::new();
        let config = test_config(&server.url(), Duration::from_secs(5));
        let report = run_trials(&client, &config, "short", "hello", 16, 3, false).await;

        assert_eq!(report.samples, 3);
        assert_eq!(report.failures, 0);
        assert!(report.ttft_p50_ms.is_some());
        assert!(report.tps_p50.is_some());
    }

    #[tokio::test]
    async fn failed_trials_leave_statistics_undefined() {
        let config = test_config("http://127.0.0.1:9", Duration::from_millis(300));
        let client = Client::new();
        let report = run_trials(&client, &config, "dead", "hello", 16, 2, false).await;

        assert_eq!(report.samples, 0);
        assert_eq!(report.failures, 2);
        assert!(report.ttft_p50_ms.is_none());
        assert!(report.tps_p50.is_none());
    }

    #[test]
    fn context_prompt_grows_with_repeats() {
        let small = context_prompt(1);
        let large = context_prompt(10);
        assert!(large.len() > small.len());
        assert!(small.ends_with("explain KV cache."));
    }

    #[test]
    fn labels_truncate_long_prompts() {
        assert_eq!(truncate_label("short"), "short");
        let long = "a".repeat(40);
        assert_eq!(truncate_label(&long), format!("{}...", "a".repeat(28)));
    }
}
