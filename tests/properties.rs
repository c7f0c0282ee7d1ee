mod common;

use nalgebra::DMatrix;
use pairnet::{
    augment::{rotate, translate, Augmentation},
    metrics::compute_nb_errors,
    pairs::{comparison_target, DataSettings, PairSplits, CHANNEL_LEN},
    rng::RunContext,
};
use proptest::prelude::*;

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_nb_errors_is_bounded(
        logits in prop::collection::vec((-5.0f32..5.0, -5.0f32..5.0), 1..64),
        flips in prop::collection::vec(any::<bool>(), 64),
    ) {
        let outputs = DMatrix::from_fn(2, logits.len(), |r, c| if r == 0 { logits[c].0 } else { logits[c].1 });
        let predicted: Vec<u8> = outputs.column_iter().map(|col| col.argmax().0 as u8).collect();
        let wrong: Vec<u8> = predicted.iter().map(|p| 1 - p).collect();
        let mixed: Vec<u8> = predicted
            .iter()
            .zip(&flips)
            .map(|(&p, &flip)| if flip { 1 - p } else { p })
            .collect();

        prop_assert_eq!(compute_nb_errors(&outputs, &predicted), 0);
        prop_assert_eq!(compute_nb_errors(&outputs, &wrong), logits.len());
        prop_assert_eq!(
            compute_nb_errors(&outputs, &mixed),
            flips.iter().take(logits.len()).filter(|&&f| f).count()
        );
    }

    #[test]
    fn prop_shifts_never_add_ink(
        image in prop::collection::vec(0.0f32..1.0, CHANNEL_LEN..=CHANNEL_LEN),
        dx in -2i32..=2,
        dy in -2i32..=2,
        degrees in -15.0f32..15.0,
    ) {
        let total: f32 = image.iter().sum();

        prop_assert_eq!(translate(&image, 0, 0), image.clone());
        prop_assert_eq!(rotate(&image, 0.0), image.clone());
        prop_assert!(translate(&image, dx, dy).iter().sum::<f32>() <= total + 1e-3);
        prop_assert_eq!(rotate(&image, degrees).len(), CHANNEL_LEN);
    }

    #[test]
    fn prop_splits_respect_augmentation(seed in 0u64..1000, swap in any::<bool>(), rotate in any::<bool>()) {
        let digits = common::mnist(80);
        let settings = DataSettings {
            pairs: 30,
            validation_fraction: 0.2,
            augmentation: Augmentation { rotate, translate: false, swap_channel: swap },
        };

        let splits = PairSplits::build(&digits, &settings, &mut RunContext::new(seed)).unwrap();
        let expected_train = if swap { 48 } else { 24 };

        prop_assert_eq!(splits.train.len(), expected_train);
        prop_assert_eq!(splits.validation.len(), 6);
        prop_assert_eq!(splits.test.len(), 30);

        for (classes, &target) in splits.train.classes.iter().zip(splits.train.targets.iter()) {
            prop_assert_eq!(target, comparison_target(*classes));
        }

        let (mean, std) = splits.train.statistics();
        prop_assert!(mean.abs() < 1e-3);
        prop_assert!((std - 1.0).abs() < 1e-3);
    }
}

#[test]
fn reseeding_rebuilds_identical_splits() {
    let digits = common::mnist(80);
    let settings = DataSettings {
        pairs: 30,
        validation_fraction: 0.2,
        augmentation: Augmentation {
            rotate: true,
            translate: true,
            swap_channel: true,
        },
    };

    let a = PairSplits::build(&digits, &settings, &mut RunContext::new(3)).unwrap();
    let b = PairSplits::build(&digits, &settings, &mut RunContext::new(3)).unwrap();

    assert_eq!(a.train.inputs, b.train.inputs);
    assert_eq!(a.test.classes, b.test.classes);
}
