use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::Url;
use serde_json::{json, Value};

/// Connection settings shared by every request in a benchmark run.
///
/// Replaces the usual pile of module-level constants (endpoint, model name,
/// temperature) with one value handed to each component at construction.
#[derive(Clone, Debug)]
pub struct BenchConfig {
    pub endpoint: Url,
    pub model: String,
    pub temperature: f64,
    pub request_timeout: Duration,
    pub headers: HeaderMap,
}

impl BenchConfig {
    pub fn try_new(
        endpoint: impl AsRef<str>,
        model: impl Into<String>,
        api_key: Option<String>,
    ) -> Result<Self> {
        let model = model.into();
        if model.is_empty() {
            return Err(anyhow!("model must not be empty"));
        }

        let endpoint = Url::parse(endpoint.as_ref())
            .with_context(|| format!("invalid endpoint URL: {}", endpoint.as_ref()))?;

        let mut headers = HeaderMap::new();
        if let Some(api_key) = api_key {
            if !api_key.is_empty() {
                let auth_value = format!("Bearer {}", api_key);
                let header_value = HeaderValue::from_str(&auth_value)
                    .context("failed to build Authorization header from api_key")?;
                headers.insert(AUTHORIZATION, header_value);
            }
        }
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        Ok(Self {
            endpoint,
            model,
            temperature: 0.0,
            request_timeout: Duration::from_secs(180),
            headers,
        })
    }

    pub fn with_temperature(mut self, temperature: f64) -> Result<Self> {
        if !temperature.is_finite() || temperature < 0.0 {
            return Err(anyhow!("temperature must be a finite non-negative number"));
        }
        self.temperature = temperature;
        Ok(self)
    }

    pub fn with_request_timeout(mut self, request_timeout: Duration) -> Self {
        if !request_timeout.is_zero() {
            self.request_timeout = request_timeout;
        }
        self
    }

    /// Chat-completion request body for one attempt.
    pub fn chat_body(&self, prompt: &str, max_tokens: u32, stream: bool) -> Value {
        json!({
            "model": self.model,
            "messages": [
                {
                    "role": "user",
                    "content": prompt,
                }
            ],
            "temperature": self.temperature,
            "max_tokens": max_tokens,
            "stream": stream,
        })
    }
}
