use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::{error::EnvError, reward::RewardConfig, EnvId};

/// Probability range for a spawned tile being a 2 rather than a 4.
///
/// Every spawn draws its own probability uniformly from the closed range, which varies the spawn
/// rate slightly between tiles. Set both bounds equal for a fixed rate.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpawnConfig {
    pub two_probability_min: f64,
    pub two_probability_max: f64,
}

impl Default for SpawnConfig {
    fn default() -> Self {
        Self {
            two_probability_min: 0.88,
            two_probability_max: 0.92,
        }
    }
}

impl SpawnConfig {
    pub fn two_probability(&self, rng: &mut impl Rng) -> f64 {
        let probability = if self.two_probability_min < self.two_probability_max {
            rng.gen_range(self.two_probability_min..=self.two_probability_max)
        } else {
            self.two_probability_min
        };

        probability.clamp(0.0, 1.0)
    }

    pub fn validate(&self) -> Result<(), EnvError> {
        let in_range = |p: f64| (0.0..=1.0).contains(&p);

        if !in_range(self.two_probability_min) || !in_range(self.two_probability_max) {
            return Err(EnvError::Config(format!(
                "spawn probabilities must lie in [0, 1], got {}..={}",
                self.two_probability_min, self.two_probability_max
            )));
        }

        if self.two_probability_min > self.two_probability_max {
            return Err(EnvError::Config(format!(
                "two_probability_min {} exceeds two_probability_max {}",
                self.two_probability_min, self.two_probability_max
            )));
        }

        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnvConfig {
    pub num_envs: usize,
    /// Base seed; instance `id` uses ChaCha stream `id` of this seed. Entropy when unset.
    pub seed: Option<u64>,
    /// Reset a finished game on its next action instead of skipping it.
    pub auto_reset: bool,
    pub spawn: SpawnConfig,
    pub reward: RewardConfig,
}

impl Default for EnvConfig {
    fn default() -> Self {
        Self {
            num_envs: 16,
            seed: None,
            auto_reset: true,
            spawn: SpawnConfig::default(),
            reward: RewardConfig::default(),
        }
    }
}

impl EnvConfig {
    pub const MAX_ENVS: usize = EnvId::MAX as usize + 1;

    pub fn validate(&self) -> Result<(), EnvError> {
        if self.num_envs == 0 || self.num_envs > Self::MAX_ENVS {
            return Err(EnvError::Config(format!(
                "num_envs must be between 1 and {}, got {}",
                Self::MAX_ENVS,
                self.num_envs
            )));
        }

        self.spawn.validate()
    }
}

#[cfg(test)]
mod tests {
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    use super::*;

    #[test]
    fn spawn_probability_stays_in_range() {
        let spawn = SpawnConfig::default();
        let mut rng = ChaCha8Rng::seed_from_u64(3);

        for _ in 0..1000 {
            let p = spawn.two_probability(&mut rng);
            assert!((0.88..=0.92).contains(&p));
        }

        let fixed = SpawnConfig {
            two_probability_min: 0.9,
            two_probability_max: 0.9,
        };
        assert_eq!(fixed.two_probability(&mut rng), 0.9);
    }

    #[test]
    fn rejects_bad_configs() {
        assert!(EnvConfig::default().validate().is_ok());

        let no_envs = EnvConfig {
            num_envs: 0,
            ..EnvConfig::default()
        };
        assert!(matches!(no_envs.validate(), Err(EnvError::Config(_))));

        let inverted = SpawnConfig {
            two_probability_min: 0.95,
            two_probability_max: 0.9,
        };
        assert!(inverted.validate().is_err());

        let out_of_range = SpawnConfig {
            two_probability_min: 0.5,
            two_probability_max: 1.5,
        };
        assert!(out_of_range.validate().is_err());
    }
}
