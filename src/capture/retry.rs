//! Bounded retry combinator for sensor and GNSS acquisition

use std::fmt::Display;

use tracing::debug;

/// Run `op` up to `attempts` times, returning the first success or the last
/// error. At least one attempt is always made.
pub fn retry<T, E, F>(attempts: u32, mut op: F) -> Result<T, E>
where
    E: Display,
    F: FnMut() -> Result<T, E>,
{
    let attempts = attempts.max(1);
    let mut attempt = 1;
    loop {
        match op() {
            Ok(value) => return Ok(value),
            Err(e) if attempt < attempts => {
                debug!("Attempt {}/{} failed: {}", attempt, attempts, e);
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}
