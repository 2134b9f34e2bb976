//! Chronologically-sortable push-key generation.
//!
//! Keys are 20 characters: 8 encoding the millisecond timestamp in a
//! lexicographically ordered 64-symbol alphabet, followed by 12 random
//! symbols. Keys generated in the same millisecond increment the random
//! suffix so that lexicographic order always matches creation order.

use std::sync::Mutex;

use rand::Rng;

/// 64 symbols in ASCII order, so encoded timestamps sort correctly.
const ALPHABET: &[u8; 64] =
    b"-0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ_abcdefghijklmnopqrstuvwxyz";

const TIMESTAMP_CHARS: usize = 8;
const RANDOM_CHARS: usize = 12;

/// Stateful generator; one per store instance.
pub struct PushIdGenerator {
    state: Mutex<GeneratorState>,
}

struct GeneratorState {
    last_millis: u64,
    last_random: [usize; RANDOM_CHARS],
}

impl PushIdGenerator {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(GeneratorState {
                last_millis: 0,
                last_random: [0; RANDOM_CHARS],
            }),
        }
    }

    /// Generate the next key for the given millisecond timestamp.
    pub fn generate(&self, now_millis: u64) -> String {
        let mut state = self.state.lock().expect("push id state poisoned");

        if now_millis == state.last_millis {
            // Same millisecond: increment the previous random suffix to
            // preserve ordering.
            for slot in state.last_random.iter_mut().rev() {
                if *slot < ALPHABET.len() - 1 {
                    *slot += 1;
                    break;
                }
                *slot = 0;
            }
        } else {
            let mut rng = rand::thread_rng();
            for slot in state.last_random.iter_mut() {
                *slot = rng.gen_range(0..ALPHABET.len());
            }
            state.last_millis = now_millis;
        }

        let mut key = String::with_capacity(TIMESTAMP_CHARS + RANDOM_CHARS);
        let mut ts = now_millis;
        let mut ts_chars = [0u8; TIMESTAMP_CHARS];
        for slot in ts_chars.iter_mut().rev() {
            *slot = ALPHABET[(ts % 64) as usize];
            ts /= 64;
        }
        key.extend(ts_chars.iter().map(|&b| b as char));
        key.extend(state.last_random.iter().map(|&i| ALPHABET[i] as char));
        key
    }

    /// Generate a key for the current wall clock.
    pub fn generate_now(&self) -> String {
        self.generate(current_millis())
    }
}

impl Default for PushIdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

/// Current unix time in milliseconds.
pub fn current_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keys_sort_by_timestamp() {
        let generator = PushIdGenerator::new();
        let earlier = generator.generate(1_000);
        let later = generator.generate(2_000);
        assert!(earlier < later);
        assert_eq!(earlier.len(), 20);
    }

    #[test]
    fn test_same_millisecond_keys_stay_ordered() {
        let generator = PushIdGenerator::new();
        let mut previous = generator.generate(5_000);
        for _ in 0..100 {
            let next = generator.generate(5_000);
            assert!(previous < next, "{previous} !< {next}");
            previous = next;
        }
    }
}
