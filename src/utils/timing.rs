use std::time::{Duration, Instant};

use serde_json::json;

use crate::logging::{LogLevel, Logger};

/// Runs `task` and logs its wall time at debug level. The payload carries
/// the raw milliseconds so log scrapers need not parse the readable form.
pub fn measure_execution<T, F>(
    task_name: &str,
    context: Option<&str>,
    logger: &Logger,
    task: F,
) -> T
where
    F: FnOnce() -> T,
{
    let started_at = Instant::now();
    let value = task();
    let elapsed = started_at.elapsed();

    logger.log(
        LogLevel::Debug,
        context,
        &format!("{task_name} took {}", describe_elapsed(elapsed)),
        Some(json!({
            "task": task_name,
            "elapsed_ms": elapsed.as_millis() as u64,
        })),
    );
    value
}

fn describe_elapsed(elapsed: Duration) -> String {
    let millis = elapsed.as_millis();
    if millis < 1_000 {
        return format!("{millis} ms");
    }

    let seconds = elapsed.as_secs_f64();
    if seconds < 60.0 {
        return format!("{seconds:.2} s");
    }

    let minutes = elapsed.as_secs() / 60;
    format!("{minutes}m {:05.2}s", seconds - (minutes * 60) as f64)
}
