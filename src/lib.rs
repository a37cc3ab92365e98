mod client;
mod config;
mod gpu;
mod report;
mod runner;
mod stats;

pub use client::{measure_once, measure_stream, RequestError, StreamSample};
pub use config::BenchConfig;
pub use gpu::gpu_mem_mib;
pub use report::{format_ms, StepReport, TrialReport};
pub use runner::{
    run_context_sweep, run_load_sweep, run_step, run_stream_sweep, run_trials, ContextScenario,
};
pub use stats::{median, p95, throughput};
