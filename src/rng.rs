use rand::{rngs::StdRng, SeedableRng};

/// Seed the secondary generator is reset to before every run.
pub const SECONDARY_SEED: u64 = 0;

/// Random state owned by a single training run.
///
/// `framework` drives pair sampling, weight init, batch shuffling and dropout;
/// `secondary` drives the rotation/translation augmentations.
pub struct RunContext {
    pub seed: u64,
    pub framework: StdRng,
    pub secondary: StdRng,
}

impl RunContext {
    /// Resets both generators: framework first, with `seed`, then secondary to a fixed constant.
    pub fn new(seed: u64) -> Self {
        let framework = StdRng::seed_from_u64(seed);
        let secondary = StdRng::seed_from_u64(SECONDARY_SEED);

        Self {
            seed,
            framework,
            secondary,
        }
    }
}
