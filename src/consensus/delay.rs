//! Randomized mint delay ("proof of elapsed time").

use rand::Rng;
use std::time::Duration;

/// How long a node waits before trying to mint.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MintDelay {
    /// Uniform draw in `[0, max)`
    Uniform { max: Duration },

    /// Always the same wait
    Fixed(Duration),
}

impl Default for MintDelay {
    fn default() -> Self {
        MintDelay::Uniform {
            max: Duration::from_secs(15),
        }
    }
}

impl MintDelay {
    pub fn from_millis(max_ms: u64, fixed_ms: Option<u64>) -> Self {
        match fixed_ms {
            Some(ms) => MintDelay::Fixed(Duration::from_millis(ms)),
            None => MintDelay::Uniform {
                max: Duration::from_millis(max_ms),
            },
        }
    }

    /// Draw the wait for one attempt.
    pub fn draw(&self) -> Duration {
        match *self {
            MintDelay::Fixed(delay) => delay,
            MintDelay::Uniform { max } if max.is_zero() => Duration::ZERO,
            MintDelay::Uniform { max } => {
                let micros = rand::thread_rng().gen_range(0..max.as_micros().max(1) as u64);
                Duration::from_micros(micros)
            }
        }
    }
}
