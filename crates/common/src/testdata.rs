//! Random test data
//!
//! Each test builds its own [`TestData`]; pass a seed to reproduce a failing run.

use rand::distributions::{Alphanumeric, DistString};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

const ADJECTIVES: &[&str] = &[
    "brave", "calm", "eager", "fuzzy", "gentle", "happy", "jolly", "lucky", "merry", "quiet",
    "rapid", "sunny", "tidy", "witty",
];

const ANIMALS: &[&str] = &[
    "badger", "beaver", "falcon", "ferret", "gecko", "heron", "koala", "lynx", "marten", "otter",
    "panda", "raven", "tapir", "walrus",
];

const CATEGORIES: &[&str] = &[
    "Groceries", "Travel", "Books", "Sport", "Cinema", "Taxi", "Coffee", "Gifts", "Rent",
];

/// Generator for usernames, passwords and category names
pub struct TestData {
    rng: StdRng,
}

impl Default for TestData {
    fn default() -> Self {
        Self::new()
    }
}

impl TestData {
    pub fn new() -> Self {
        Self {
            rng: StdRng::from_entropy(),
        }
    }

    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Lowercase, underscore-joined, with a numeric suffix to stay unique
    pub fn username(&mut self) -> String {
        let adjective = ADJECTIVES[self.rng.gen_range(0..ADJECTIVES.len())];
        let animal = ANIMALS[self.rng.gen_range(0..ANIMALS.len())];
        let suffix: u32 = self.rng.gen_range(1000..100_000);
        format!("{adjective}_{animal}{suffix}")
    }

    /// Letters and digits only
    pub fn password(&mut self) -> String {
        Alphanumeric.sample_string(&mut self.rng, 12)
    }

    pub fn category_name(&mut self) -> String {
        let base = CATEGORIES[self.rng.gen_range(0..CATEGORIES.len())];
        let suffix: u16 = self.rng.gen_range(100..1000);
        format!("{base} {suffix}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seeded_generators_repeat() {
        let mut a = TestData::seeded(7);
        let mut b = TestData::seeded(7);
        assert_eq!(a.username(), b.username());
        assert_eq!(a.password(), b.password());
    }

    #[test]
    fn test_password_is_alphanumeric() {
        let password = TestData::new().password();
        assert_eq!(password.len(), 12);
        assert!(password.chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[test]
    fn test_username_shape() {
        let username = TestData::seeded(1).username();
        assert!(username.contains('_'));
        assert!(username.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_'));
    }
}
