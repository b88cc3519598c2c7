use std::time::Duration;

use rand::Rng;

/// Exponential backoff with full jitter.
///
/// Returns a random duration between `base` and `min(cap, base * 2^(attempts - 1))`,
/// or the deterministic maximum when `jitter` is off.
/// <https://aws.amazon.com/blogs/architecture/exponential-backoff-and-jitter/>
pub fn expo_backoff(base: Duration, attempts: u32, cap: Duration, jitter: bool) -> Duration {
    let base_s = base.as_secs_f64();
    let exp = base_s * 2f64.powi(attempts.saturating_sub(1).min(32) as i32);
    let max_s = exp.min(cap.as_secs_f64());
    if !jitter || max_s <= base_s {
        return Duration::from_secs_f64(max_s.max(base_s));
    }
    let mut rng = rand::rng();
    Duration::from_secs_f64(rng.random_range(base_s..=max_s))
}

/// A random duration between zero and `d`.
pub fn full_jitter(d: Duration) -> Duration {
    let secs = d.as_secs_f64();
    if secs <= 0.0 {
        return Duration::ZERO;
    }
    let mut rng = rand::rng();
    Duration::from_secs_f64(rng.random_range(0.0..=secs))
}

/// Render a duration as `1h 2min 3.000sec`, omitting empty leading units.
pub fn duration_string(d: Duration) -> String {
    let total = d.as_secs_f64();
    let hours = (total / 3600.0) as u64;
    let rem = total - (hours * 3600) as f64;
    let minutes = (rem / 60.0) as u64;
    let seconds = rem - (minutes * 60) as f64;

    let mut out = String::new();
    if hours > 0 {
        out.push_str(&format!("{hours}h "));
    }
    if minutes > 0 {
        out.push_str(&format!("{minutes}min "));
    }
    out.push_str(&format!("{seconds:.3}sec"));
    out
}
