//! Relays the worker's structured stdout/stderr into the `log` facade.

use log::Level;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio_util::sync::CancellationToken;

/// Spawn a task that reads one JSON log record per line from `stream` until
/// EOF or cancellation, re-emitting each record through `log`.
pub(crate) fn spawn_relay<R>(stream: R, debug: bool, stop: CancellationToken)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(stream).lines();
        loop {
            tokio::select! {
                _ = stop.cancelled() => break,
                line = lines.next_line() => match line {
                    Ok(Some(line)) => {
                        if let Some((level, msg)) = format_record(&line, debug) {
                            log::log!(level, "{msg}");
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        if debug {
                            log::debug!("Error reading worker output: {e}");
                        }
                        break;
                    }
                }
            }
        }
        log::debug!("Worker log output stopped");
    });
}

/// Parse one worker log line into a level and a rendered message.
///
/// Recognized keys: `level`, `time`, `caller`, `mode`, `message`; anything
/// else is appended as `key=value`. Malformed lines and records without a
/// message yield `None` and are swallowed.
pub(crate) fn format_record(line: &str, debug: bool) -> Option<(Level, String)> {
    let value: serde_json::Value = serde_json::from_str(line.trim()).ok()?;
    let record = value.as_object()?;

    let level = record
        .get("level")
        .and_then(|v| v.as_str())
        .unwrap_or("info");
    let message = record.get("message")?.as_str()?;
    let mut msg = capitalize(message);

    let mut extras = Vec::new();
    for (key, val) in record {
        let skip = matches!(key.as_str(), "level" | "time" | "message")
            || (!debug && matches!(key.as_str(), "caller" | "mode"));
        if skip {
            continue;
        }
        let rendered = match val {
            serde_json::Value::String(s) if s.contains(' ') => format!("\"{s}\""),
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        extras.push(format!("{key}={rendered}"));
    }
    if !extras.is_empty() {
        msg.push(' ');
        msg.push_str(&extras.join(" "));
    }

    Some((map_level(level), msg))
}

fn map_level(level: &str) -> Level {
    match level {
        "trace" | "debug" => Level::Debug,
        "info" => Level::Info,
        "warn" => Level::Warn,
        "error" | "fatal" | "panic" => Level::Error,
        _ => Level::Info,
    }
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}
