//! Ledger id generation
//!
//! Time-ordered 128-bit ids: millisecond timestamp in the high 48 bits,
//! random low 80 bits. Within one millisecond the random part is incremented
//! so ids from one generator are strictly increasing.

use parking_lot::Mutex;
use rand::Rng;
use std::time::{SystemTime, UNIX_EPOCH};

const RANDOM_BITS: u32 = 80;
const RANDOM_MASK: u128 = (1u128 << RANDOM_BITS) - 1;

#[derive(Debug, Default)]
struct GeneratorState {
    last_millis: u64,
    last_random: u128,
}

/// Shared id source for customer accounts, system accounts and transfers
#[derive(Debug, Default)]
pub struct IdGenerator {
    state: Mutex<GeneratorState>,
}

impl IdGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Next id; never zero
    pub fn generate(&self) -> u128 {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or_default();

        let mut state = self.state.lock();

        if now > state.last_millis {
            state.last_millis = now;
            state.last_random = rand::thread_rng().gen::<u128>() & RANDOM_MASK;
        } else {
            // Same (or earlier) millisecond: stay monotonic
            state.last_random = (state.last_random + 1) & RANDOM_MASK;
            if state.last_random == 0 {
                state.last_millis += 1;
            }
        }

        let id = (u128::from(state.last_millis) << RANDOM_BITS) | state.last_random;
        id.max(1)
    }
}
