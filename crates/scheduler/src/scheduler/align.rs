/// Smallest `t > now_ms` that is a multiple of `interval_seconds`
pub fn next_aligned(now_ms: i64, interval_seconds: i64) -> i64 {
    let interval_ms = interval_seconds.saturating_mul(1000);
    if interval_ms <= 0 {
        return now_ms;
    }
    (now_ms.div_euclid(interval_ms) + 1) * interval_ms
}
