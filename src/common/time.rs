use std::time::Instant;

/// Wall-clock milliseconds elapsed since `start`, never reported as zero.
pub fn elapsed_ms(start: Instant) -> u64 {
    (start.elapsed().as_millis() as u64).max(1)
}
