use rand::Rng;
use std::time::Duration;

/// Pause policy after loop-level faults (queue or job table unreachable).
#[derive(Debug, Clone)]
pub struct BackoffConfig {
    pub base_ms: u64,
    pub max_ms: u64,
    pub jitter_pct: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base_ms: 500,
            max_ms: 30_000,
            jitter_pct: 0.20,
        }
    }
}

/// `base * 2^(failures-1)`, capped at `max`, then jittered by ±`jitter_pct`
/// and clamped back into `[0, max]`.
pub fn next_delay(
    consecutive_failures: u32,
    cfg: &BackoffConfig,
    rng: &mut impl Rng,
) -> Duration {
    let exp = consecutive_failures.max(1).saturating_sub(1);

    // If exp is too large, treat the multiplier as huge and let the cap handle it.
    let pow2 = 1_u64.checked_shl(exp).unwrap_or(u64::MAX);
    let delay = cfg.base_ms.saturating_mul(pow2).min(cfg.max_ms);

    let jitter_range = (delay as f64) * cfg.jitter_pct.clamp(0.0, 1.0);
    let jitter = if jitter_range > 0.0 {
        rng.gen_range(-jitter_range..=jitter_range)
    } else {
        0.0
    };

    let jittered = (delay as f64 + jitter).round().max(0.0) as u64;
    Duration::from_millis(jittered.min(cfg.max_ms))
}
