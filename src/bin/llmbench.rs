use std::time::Duration;

use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use llmbench_rs::{
    run_context_sweep, run_load_sweep, run_stream_sweep, BenchConfig, ContextScenario,
};
use reqwest::Client;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "llmbench",
    about = "Latency and throughput benchmarks for OpenAI-style chat-completion endpoints"
)]
struct Args {
    /// Host to target (e.g. http://127.0.0.1:8000)
    #[arg(long, default_value = "http://127.0.0.1:8000")]
    host: String,

    /// Endpoint path or full URL (e.g. /v1/chat/completions)
    #[arg(long, default_value = "/v1/chat/completions")]
    endpoint: String,

    /// Model identifier to embed in each request body
    #[arg(long, default_value = "mistralai/Mistral-7B-Instruct-v0.2")]
    model: String,

    /// API key to use; if omitted an environment variable is read
    #[arg(long)]
    api_key: Option<String>,

    /// Environment variable name to read the API key from when --api-key is not supplied
    #[arg(long, default_value = "OPENAI_API_KEY")]
    api_key_env: String,

    /// Per-request timeout in seconds
    #[arg(long, default_value_t = 180)]
    request_timeout_secs: u64,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Streaming TTFT and token-rate trials over a set of prompts
    Stream {
        /// Prompt to measure; repeat the flag for several (a built-in trio is used when omitted)
        #[arg(long = "prompt")]
        prompts: Vec<String>,

        /// Trials per prompt
        #[arg(long, default_value_t = 3)]
        repeats: usize,

        /// Token budget per request
        #[arg(long, default_value_t = 256)]
        max_tokens: u32,

        /// Sampling temperature
        #[arg(long, default_value_t = 0.2)]
        temperature: f64,
    },
    /// Streaming TTFT scaling against prompt context length
    Context {
        /// Trials per context size
        #[arg(long, default_value_t = 3)]
        repeats: usize,

        /// Token budget per request
        #[arg(long, default_value_t = 60)]
        max_tokens: u32,
    },
    /// Non-streaming load sweep across concurrency steps
    Load {
        /// Concurrency steps, run in the order given
        #[arg(long, value_delimiter = ',', default_value = "8,16,32,64")]
        concurrency: Vec<usize>,

        /// Requests issued per step
        #[arg(long, default_value_t = 128)]
        total: usize,

        /// Token budget per request
        #[arg(long, default_value_t = 60)]
        max_tokens: u32,

        /// Filler repetitions used to build the fixed load prompt
        #[arg(long, default_value_t = 1200)]
        prompt_repeats: usize,

        /// Skip the GPU memory readings around each step
        #[arg(long)]
        no_gpu: bool,
    },
}

const LOAD_PROMPT_BASE: &str = "Explain batching in one paragraph. Keep it short and technical.";

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args = Args::parse();

    let api_key = args
        .api_key
        .clone()
        .or_else(|| std::env::var(&args.api_key_env).ok());
    let endpoint = resolve_endpoint(&args.host, &args.endpoint);

    let config = BenchConfig::try_new(endpoint, args.model.clone(), api_key)?
        .with_request_timeout(Duration::from_secs(args.request_timeout_secs));
    let client = Client::new();

    match args.command {
        Command::Stream {
            prompts,
            repeats,
            max_tokens,
            temperature,
        } => {
            if repeats == 0 {
                return Err(anyhow!("repeats must be greater than zero"));
            }
            let config = config.with_temperature(temperature)?;
            let prompts = if prompts.is_empty() {
                default_prompts()
            } else {
                prompts
            };
            run_stream_sweep(&client, &config, &prompts, max_tokens, repeats).await;
        }
        Command::Context {
            repeats,
            max_tokens,
        } => {
            if repeats == 0 {
                return Err(anyhow!("repeats must be greater than zero"));
            }
            run_context_sweep(&client, &config, &context_steps(), max_tokens, repeats).await;
        }
        Command::Load {
            concurrency,
            total,
            max_tokens,
            prompt_repeats,
            no_gpu,
        } => {
            if concurrency.is_empty() {
                return Err(anyhow!("at least one concurrency step is required"));
            }
            if concurrency.contains(&0) {
                return Err(anyhow!("concurrency steps must be greater than zero"));
            }
            if total == 0 {
                return Err(anyhow!("total must be greater than zero"));
            }

            let prompt = LOAD_PROMPT_BASE.repeat(prompt_repeats.max(1));

            println!("\n=== LOAD TEST (non-streaming) ===");
            println!("URL={}", config.endpoint);
            println!("MODEL={}", config.model);
            println!(
                "prompt_len_chars={}  max_tokens={}  temp={}",
                prompt.len(),
                max_tokens,
                config.temperature
            );
            println!(
                "total_per_step={}  timeout={}s",
                total, args.request_timeout_secs
            );
            println!("concurrency_steps={:?}\n", concurrency);

            run_load_sweep(
                &client,
                &config,
                &prompt,
                max_tokens,
                &concurrency,
                total,
                !no_gpu,
            )
            .await?;

            println!("\nDone.\n");
        }
    }

    Ok(())
}

fn default_prompts() -> Vec<String> {
    vec![
        "Explain KV cache in simple terms.".to_string(),
        "Give 6 bullets on why batching increases GPU throughput.".to_string(),
        "What is paged attention? Explain briefly.".to_string(),
    ]
}

fn context_steps() -> Vec<ContextScenario> {
    [("~512", 60), ("~1024", 120), ("~2048", 240), ("~3072", 360)]
        .into_iter()
        .map(|(label, filler_repeats)| ContextScenario {
            label: label.to_string(),
            filler_repeats,
        })
        .collect()
}

fn resolve_endpoint(host: &str, endpoint: &str) -> String {
    if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
        return endpoint.to_string();
    }

    let normalized_host = if host.starts_with("http://") || host.starts_with("https://") {
        host.trim_end_matches('/').to_string()
    } else {
        format!("https://{}", host.trim_end_matches('/'))
    };

    format!("{}/{}", normalized_host, endpoint.trim_start_matches('/'))
}
