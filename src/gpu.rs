use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;
use tokio::time::timeout;
use tracing::debug;

const SAMPLE_TIMEOUT: Duration = Duration::from_secs(5);

/// Best-effort sample of used GPU memory in MiB for device 0.
///
/// Returns `None` when nvidia-smi is missing, exits non-zero, hangs, or
/// prints something unparsable. A benchmark run must never fail because the
/// diagnostic tool is unavailable.
pub async fn gpu_mem_mib() -> Option<u64> {
    let result = timeout(
        SAMPLE_TIMEOUT,
        Command::new("nvidia-smi")
            .args(["--query-gpu=memory.used", "--format=csv,noheader,nounits"])
            .stderr(Stdio::null())
            .output(),
    )
    .await;

    let output = match result {
        Ok(Ok(output)) => output,
        Ok(Err(err)) => {
            debug!(error = %err, "nvidia-smi unavailable");
            return None;
        }
        Err(_) => {
            debug!("nvidia-smi timed out");
            return None;
        }
    };

    if !output.status.success() {
        debug!(status = ?output.status, "nvidia-smi exited non-zero");
        return None;
    }

    parse_mem_mib(&String::from_utf8_lossy(&output.stdout))
}

fn parse_mem_mib(stdout: &str) -> Option<u64> {
    let first = stdout.lines().next()?.trim();
    match first.parse::<u64>() {
        Ok(mib) => Some(mib),
        Err(_) => {
            debug!(line = first, "unparsable nvidia-smi output");
            None
        }
    }
}
