//! Paired-digit datasets built from the base MNIST digits.

use nalgebra::{DMatrix, DVector};
use rand::{rngs::StdRng, seq::index};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{
    augment::{self, Augmentation},
    error::DataError,
    mnist::{DigitSet, MNISTData, IMAGE_SIDE},
    rng::RunContext,
};

pub const PAIR_SIDE: usize = IMAGE_SIDE / 2;
pub const CHANNEL_LEN: usize = PAIR_SIDE * PAIR_SIDE;
pub const PAIR_LEN: usize = 2 * CHANNEL_LEN;

/// Comparison target for a digit pair: 1 when the first digit is <= the second.
pub fn comparison_target(classes: [u8; 2]) -> u8 {
    u8::from(classes[0] <= classes[1])
}

/// Ordered collection of paired examples, one 392-row column per pair.
#[derive(Clone, Debug)]
pub struct PairSet {
    pub inputs: DMatrix<f32>,
    pub targets: DVector<u8>,
    pub classes: Vec<[u8; 2]>,
}

impl PairSet {
    /// Wraps `inputs` (one `PAIR_LEN` column per pair) and derives the targets from `classes`.
    pub fn new(inputs: DMatrix<f32>, classes: Vec<[u8; 2]>) -> Result<Self, DataError> {
        if inputs.nrows() != PAIR_LEN || inputs.ncols() != classes.len() {
            return Err(DataError::PairShape {
                rows: inputs.nrows(),
                inputs: inputs.ncols(),
                classes: classes.len(),
            });
        }

        Ok(Self::from_classes(inputs, classes))
    }

    /// Shapes must already agree.
    pub(crate) fn from_classes(inputs: DMatrix<f32>, classes: Vec<[u8; 2]>) -> Self {
        debug_assert_eq!(inputs.nrows(), PAIR_LEN);
        debug_assert_eq!(inputs.ncols(), classes.len());

        let targets = DVector::from_iterator(
            classes.len(),
            classes.iter().map(|&c| comparison_target(c)),
        );

        Self {
            inputs,
            targets,
            classes,
        }
    }

    /// Draws `count` pairs of distinct digits from `digits`, average-pooled to 14x14.
    pub fn sample(digits: &DigitSet, count: usize, rng: &mut StdRng) -> Result<Self, DataError> {
        if 2 * count > digits.len() {
            return Err(DataError::NotEnoughDigits {
                requested: 2 * count,
                available: digits.len(),
            });
        }

        let picks = index::sample(rng, digits.len(), 2 * count).into_vec();
        let mut inputs = DMatrix::zeros(PAIR_LEN, count);
        let mut classes = Vec::with_capacity(count);

        for (col, pair) in picks.chunks_exact(2).enumerate() {
            let mut column = inputs.column_mut(col);

            for (channel, &digit) in pair.iter().enumerate() {
                let pooled = downsample(digits.images.column(digit).as_slice());
                column
                    .rows_mut(channel * CHANNEL_LEN, CHANNEL_LEN)
                    .copy_from_slice(&pooled);
            }

            classes.push([digits.labels[pair[0]], digits.labels[pair[1]]]);
        }

        Ok(Self::from_classes(inputs, classes))
    }

    pub fn len(&self) -> usize {
        self.classes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }

    pub fn input(&self, idx: usize) -> DVector<f32> {
        self.inputs.column(idx).clone_owned()
    }

    /// Splits off everything from `at` onwards, leaving `[0, at)` in `self`.
    pub fn split_off(&mut self, at: usize) -> Self {
        let tail = self.inputs.columns(at, self.len() - at).clone_owned();
        let classes = self.classes.split_off(at);

        self.inputs = self.inputs.columns(0, at).clone_owned();
        self.targets = self.targets.rows(0, at).clone_owned();

        Self::from_classes(tail, classes)
    }

    /// Copy of the set with both channels and both class labels exchanged.
    pub fn swapped(&self) -> Self {
        let mut inputs = self.inputs.clone();

        for mut column in inputs.column_iter_mut() {
            for row in 0..CHANNEL_LEN {
                column.swap_rows(row, row + CHANNEL_LEN);
            }
        }

        let classes = self.classes.iter().map(|&[a, b]| [b, a]).collect();

        Self::from_classes(inputs, classes)
    }

    pub fn append(&mut self, other: Self) {
        let (len, extra) = (self.len(), other.len());
        let inputs = std::mem::replace(&mut self.inputs, DMatrix::zeros(0, 0));
        let mut inputs = inputs.resize_horizontally(len + extra, 0.0);

        inputs.columns_mut(len, extra).copy_from(&other.inputs);

        self.inputs = inputs;
        self.classes.extend(other.classes);
        self.targets = DVector::from_iterator(
            self.classes.len(),
            self.classes.iter().map(|&c| comparison_target(c)),
        );
    }

    /// Mean and unbiased standard deviation over every pixel of the split.
    pub fn statistics(&self) -> (f32, f32) {
        let n = self.inputs.len();

        if n < 2 {
            return (self.inputs.mean(), 0.0);
        }

        let mean = self.inputs.mean();
        let sq: f32 = self.inputs.iter().map(|v| (v - mean).powi(2)).sum();

        (mean, (sq / (n - 1) as f32).sqrt())
    }

    /// Shifts and scales the split to zero mean, unit variance using its own statistics.
    pub fn normalize(&mut self) -> (f32, f32) {
        let (mean, std) = self.statistics();
        let scale = if std > 0.0 { std } else { 1.0 };

        self.inputs.apply(|v| *v = (*v - mean) / scale);

        (mean, std)
    }
}

/// 2x2 average pooling of a 28x28 image.
fn downsample(image: &[f32]) -> Vec<f32> {
    let mut out = Vec::with_capacity(CHANNEL_LEN);

    for y in 0..PAIR_SIDE {
        for x in 0..PAIR_SIDE {
            let at = |dy: usize, dx: usize| image[(2 * y + dy) * IMAGE_SIDE + 2 * x + dx];
            out.push((at(0, 0) + at(0, 1) + at(1, 0) + at(1, 1)) / 4.0);
        }
    }

    out
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct DataSettings {
    /// Number of pairs drawn for each of the train and test sets.
    pub pairs: usize,
    /// Tail fraction of the train pairs held out for validation.
    pub validation_fraction: f32,
    #[serde(default)]
    pub augmentation: Augmentation,
}

impl Default for DataSettings {
    fn default() -> Self {
        Self {
            pairs: 1000,
            validation_fraction: 0.2,
            augmentation: Augmentation::default(),
        }
    }
}

#[derive(Clone, Debug)]
pub struct PairSplits {
    pub train: PairSet,
    pub validation: PairSet,
    pub test: PairSet,
}

impl PairSplits {
    /// Builds fresh train/validation/test splits for one run.
    pub fn build(
        digits: &MNISTData,
        settings: &DataSettings,
        ctx: &mut RunContext,
    ) -> Result<Self, DataError> {
        let fraction = settings.validation_fraction;
        if !(fraction > 0.0 && fraction < 1.0) {
            return Err(DataError::ValidationFraction(fraction));
        }

        let mut train = PairSet::sample(&digits.training, settings.pairs, &mut ctx.framework)?;
        let mut test = PairSet::sample(&digits.test, settings.pairs, &mut ctx.framework)?;

        let held_out = (train.len() as f32 * fraction).round() as usize;
        let mut validation = train.split_off(train.len() - held_out.min(train.len()));

        for (name, split) in [("train", &train), ("validation", &validation), ("test", &test)] {
            if split.is_empty() {
                return Err(DataError::EmptySplit(name));
            }
        }

        augment::perturb(&mut train, &settings.augmentation, &mut ctx.secondary);

        if settings.augmentation.swap_channel {
            let mirrored = train.swapped();
            train.append(mirrored);
        }

        let (mean, std) = train.normalize();
        validation.normalize();
        test.normalize();

        debug!(
            seed = ctx.seed,
            train = train.len(),
            validation = validation.len(),
            test = test.len(),
            mean,
            std,
            "built pair splits"
        );

        Ok(Self {
            train,
            validation,
            test,
        })
    }
}
