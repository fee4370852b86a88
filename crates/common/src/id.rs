//! Random token generation.

use rand::Rng;
use rand::distributions::Alphanumeric;

/// Length of generated queue names.
pub const QUEUE_NAME_LEN: usize = 12;

/// Generator for random identifiers.
#[derive(Debug, Clone, Default)]
pub struct IdGenerator {
    _private: (),
}

impl IdGenerator {
    /// Create a new ID generator.
    #[must_use]
    pub const fn new() -> Self {
        Self { _private: () }
    }

    /// Generate a random alphanumeric token of the given length.
    #[must_use]
    pub fn generate_token(&self, len: usize) -> String {
        rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(len)
            .map(char::from)
            .collect()
    }

    /// Generate a queue name.
    #[must_use]
    pub fn generate_queue_name(&self) -> String {
        self.generate_token(QUEUE_NAME_LEN)
    }
}
