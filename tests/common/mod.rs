#![allow(dead_code)]

use nalgebra::{DMatrix, DVector};
use pairnet::mnist::{DigitSet, MNISTData, IMAGE_LEN, IMAGE_SIDE};
use rand::{rngs::StdRng, Rng, SeedableRng};

/// Digits drawn as a bright square whose intensity grows with the label.
pub fn digits(count: usize, seed: u64) -> DigitSet {
    let mut rng = StdRng::seed_from_u64(seed);
    let labels: Vec<u8> = (0..count).map(|i| (i % 10) as u8).collect();
    let images = DMatrix::from_fn(IMAGE_LEN, count, |row, col| {
        let (y, x) = (row / IMAGE_SIDE, row % IMAGE_SIDE);
        let lit = (6..22).contains(&y) && (6..22).contains(&x);
        let base = if lit { 0.1 + labels[col] as f32 / 12.0 } else { 0.0 };
        (base + rng.gen::<f32>() * 0.05).min(1.0)
    });

    DigitSet::new(images, DVector::from_vec(labels)).unwrap()
}

pub fn mnist(count: usize) -> MNISTData {
    MNISTData {
        training: digits(count, 11),
        test: digits(count, 12),
    }
}
