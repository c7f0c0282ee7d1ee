//! Image-space augmentations applied to single 14x14 channels.

use rand::{rngs::StdRng, Rng};
use serde::{Deserialize, Serialize};

use crate::pairs::{PairSet, CHANNEL_LEN, PAIR_SIDE};

pub const MAX_ROTATION_DEGREES: f32 = 15.0;
pub const MAX_SHIFT: i32 = 2;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Augmentation {
    pub rotate: bool,
    pub translate: bool,
    pub swap_channel: bool,
}

/// Rotates a square channel about its center, nearest-neighbour, zero fill.
pub fn rotate(image: &[f32], degrees: f32) -> Vec<f32> {
    let side = PAIR_SIDE as f32;
    let center = (side - 1.0) / 2.0;
    let (sin, cos) = degrees.to_radians().sin_cos();

    let mut out = vec![0.0; image.len()];

    for y in 0..PAIR_SIDE {
        for x in 0..PAIR_SIDE {
            let dx = x as f32 - center;
            let dy = y as f32 - center;
            let sx = (cos * dx + sin * dy + center).round();
            let sy = (-sin * dx + cos * dy + center).round();

            if sx >= 0.0 && sx < side && sy >= 0.0 && sy < side {
                out[y * PAIR_SIDE + x] = image[sy as usize * PAIR_SIDE + sx as usize];
            }
        }
    }

    out
}

/// Shifts a square channel by whole pixels, zero fill.
pub fn translate(image: &[f32], dx: i32, dy: i32) -> Vec<f32> {
    let side = PAIR_SIDE as i32;
    let mut out = vec![0.0; image.len()];

    for y in 0..side {
        for x in 0..side {
            let (sx, sy) = (x - dx, y - dy);

            if (0..side).contains(&sx) && (0..side).contains(&sy) {
                out[(y * side + x) as usize] = image[(sy * side + sx) as usize];
            }
        }
    }

    out
}

/// Applies the in-place perturbations (rotation, translation) to every channel of `set`.
pub fn perturb(set: &mut PairSet, augmentation: &Augmentation, rng: &mut StdRng) {
    if !augmentation.rotate && !augmentation.translate {
        return;
    }

    // Column-major storage: consecutive chunks are the channels of consecutive pairs.
    for channel in set.inputs.as_mut_slice().chunks_exact_mut(CHANNEL_LEN) {
        let mut image = channel.to_vec();

        if augmentation.rotate {
            let angle = rng.gen_range(-MAX_ROTATION_DEGREES..=MAX_ROTATION_DEGREES);
            image = rotate(&image, angle);
        }

        if augmentation.translate {
            let dx = rng.gen_range(-MAX_SHIFT..=MAX_SHIFT);
            let dy = rng.gen_range(-MAX_SHIFT..=MAX_SHIFT);
            image = translate(&image, dx, dy);
        }

        channel.copy_from_slice(&image);
    }
}
