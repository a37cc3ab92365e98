use std::time::{Duration, Instant};

use futures_util::StreamExt;
use reqwest::{Client, StatusCode};
use thiserror::Error;

use crate::config::BenchConfig;

const DATA_PREFIX: &str = "data:";
const DONE_SENTINEL: &str = "data: [DONE]";

/// How a single request attempt went wrong.
///
/// Malformed bytes inside an otherwise healthy stream are not represented
/// here: stream lines are decoded lossily, so only catastrophic termination
/// (connection drop, timeout) or a bad HTTP status fails a measurement.
#[derive(Debug, Error)]
pub enum RequestError {
    #[error("request timed out")]
    Timeout,
    #[error("transport failure: {0}")]
    Transport(reqwest::Error),
    #[error("server returned status {0}")]
    Status(StatusCode),
}

impl From<reqwest::Error> for RequestError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            RequestError::Timeout
        } else {
            RequestError::Transport(err)
        }
    }
}

/// Raw measurement from one streaming attempt.
///
/// `ttft` is set exactly when at least one data event arrived before the
/// terminal sentinel; a stream that ended with zero events yields
/// `ttft: None, events: 0` rather than an error.
#[derive(Debug, Clone)]
pub struct StreamSample {
    pub ttft: Option<Duration>,
    pub events: u64,
    pub duration: Duration,
}

impl StreamSample {
    pub fn ttft_ms(&self) -> Option<f64> {
        self.ttft.map(|d| d.as_secs_f64() * 1000.0)
    }

    /// Emission events per second of wall time, 0.0 for a zero-length run.
    pub fn tokens_per_second(&self) -> f64 {
        let secs = self.duration.as_secs_f64();
        if secs > 0.0 {
            self.events as f64 / secs
        } else {
            0.0
        }
    }
}

/// Issues one streaming chat-completion request and times the response.
///
/// Counts every `data:`-prefixed line as one emission event, stopping at the
/// literal `data: [DONE]` sentinel (which is not counted). The elapsed time
/// at the first event becomes the time-to-first-token.
pub async fn measure_stream(
    client: &Client,
    config: &BenchConfig,
    prompt: &str,
    max_tokens: u32,
) -> Result<StreamSample, RequestError> {
    let body = config.chat_body(prompt, max_tokens, true);
    let start = Instant::now();

    let response = client
        .post(config.endpoint.clone())
        .headers(config.headers.clone())
        .json(&body)
        .timeout(config.request_timeout)
        .send()
        .await?;
    let status = response.status();
    if !status.is_success() {
        return Err(RequestError::Status(status));
    }

    let mut ttft = None;
    let mut events: u64 = 0;
    let mut buffer: Vec<u8> = Vec::new();
    let mut saw_sentinel = false;

    let mut stream = response.bytes_stream();
    'read: while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        buffer.extend_from_slice(&chunk);

        while let Some(newline) = buffer.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = buffer.drain(..=newline).collect();
            match classify_line(&line) {
                Line::Data => {
                    if ttft.is_none() {
                        ttft = Some(start.elapsed());
                    }
                    events += 1;
                }
                Line::Sentinel => {
                    saw_sentinel = true;
                    break 'read;
                }
                Line::Other => {}
            }
        }
    }

    // A server may close the stream with an unterminated final line.
    if !saw_sentinel && !buffer.is_empty() {
        if let Line::Data = classify_line(&buffer) {
            if ttft.is_none() {
                ttft = Some(start.elapsed());
            }
            events += 1;
        }
    }

    Ok(StreamSample {
        ttft,
        events,
        duration: start.elapsed(),
    })
}

enum Line {
    Data,
    Sentinel,
    Other,
}

fn classify_line(raw: &[u8]) -> Line {
    // Lossy on purpose: a mangled byte inside a chunk should cost at most
    // that chunk's payload, never the whole measurement.
    let decoded = String::from_utf8_lossy(raw);
    let line = decoded.trim();
    if !line.starts_with(DATA_PREFIX) {
        return Line::Other;
    }
    if line == DONE_SENTINEL {
        return Line::Sentinel;
    }
    Line::Data
}

/// Issues one non-streaming request and returns the full round-trip latency.
///
/// Success means exactly HTTP 200 with the body fully received; callers that
/// only need a success/failure binary collapse the error via `.ok()`.
pub async fn measure_once(
    client: &Client,
    config: &BenchConfig,
    prompt: &str,
    max_tokens: u32,
) -> Result<Duration, RequestError> {
    let body = config.chat_body(prompt, max_tokens, false);
    let start = Instant::now();

    let response = client
        .post(config.endpoint.clone())
        .headers(config.headers.clone())
        .json(&body)
        .timeout(config.request_timeout)
        .send()
        .await?;
    let status = response.status();
    response.bytes().await?;
    let elapsed = start.elapsed();

    if status != StatusCode::OK {
        return Err(RequestError::Status(status));
    }
    Ok(elapsed)
}
