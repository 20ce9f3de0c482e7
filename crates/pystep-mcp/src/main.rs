use std::{
    env,
    io::{self, BufReader},
    sync::Arc,
    thread,
    time::Duration,
};

use pystep::debugger::{DebugLimits, SessionRegistry};
use pystep_mcp::{
    handler::McpHandler,
    protocol::{handle_message, parse_error, read_framed_message, write_framed_message},
};
use serde_json::Value;
use tracing_subscriber::EnvFilter;

/// How often expired sessions are swept.
const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

fn main() -> io::Result<()> {
    init_logging();

    let limits = parse_limits().map_err(|err| io::Error::new(io::ErrorKind::InvalidInput, err))?;
    tracing::info!(?limits, "starting pystep-mcp");
    let registry = Arc::new(SessionRegistry::new(limits));
    spawn_sweeper(Arc::clone(&registry))?;
    let handler = McpHandler::new(registry);

    let stdin = io::stdin();
    let stdout = io::stdout();
    let mut reader = BufReader::new(stdin.lock());
    let mut writer = stdout.lock();

    while let Some(body) = read_framed_message(&mut reader)? {
        let response = match serde_json::from_slice::<Value>(&body) {
            Ok(message) => handle_message(&handler, message),
            Err(err) => Some(parse_error(&err)),
        };
        if let Some(response) = response {
            write_framed_message(&mut writer, &response)?;
        }
    }

    tracing::info!("stdin closed, shutting down");
    Ok(())
}

fn spawn_sweeper(registry: Arc<SessionRegistry>) -> io::Result<()> {
    thread::Builder::new().name("pystep-sweeper".to_owned()).spawn(move || {
        loop {
            thread::sleep(SWEEP_INTERVAL);
            let removed = registry.sweep_expired();
            if removed > 0 {
                tracing::info!(removed, "swept expired sessions");
            }
        }
    })?;
    Ok(())
}

/// Reads limits from `--step-timeout-ms`, `--max-run-steps` and
/// `--session-ttl-secs`, falling back to `PYSTEP_STEP_TIMEOUT_MS`,
/// `PYSTEP_MAX_RUN_STEPS` and `PYSTEP_SESSION_TTL_SECS`.
fn parse_limits() -> Result<DebugLimits, String> {
    let args: Vec<String> = env::args().collect();
    let mut limits = DebugLimits::new();
    if let Some(ms) = setting(&args, "--step-timeout-ms", "PYSTEP_STEP_TIMEOUT_MS")? {
        limits = limits.step_timeout(Duration::from_millis(ms));
    }
    if let Some(steps) = setting(&args, "--max-run-steps", "PYSTEP_MAX_RUN_STEPS")? {
        let steps = usize::try_from(steps).map_err(|err| format!("--max-run-steps: {err}"))?;
        limits = limits.max_run_steps(steps);
    }
    if let Some(secs) = setting(&args, "--session-ttl-secs", "PYSTEP_SESSION_TTL_SECS")? {
        limits = limits.session_ttl(Duration::from_secs(secs));
    }
    Ok(limits)
}

fn setting(args: &[String], flag: &str, var: &str) -> Result<Option<u64>, String> {
    let raw = args
        .iter()
        .position(|arg| arg == flag)
        .map(|i| args.get(i + 1).cloned().ok_or_else(|| format!("{flag} needs a value")))
        .transpose()?
        .or_else(|| env::var(var).ok());
    raw.map(|value| value.trim().parse::<u64>().map_err(|err| format!("{flag}: {err}")))
        .transpose()
}

/// Logs to stderr. `RUST_LOG` overrides the default filter.
fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,pystep=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(io::stderr)
        .init();
}
