mod common;

use approx::assert_relative_eq;
use burn::optim::AdamConfig;
use common::FixedScore;
use data_contracts::{Split, NUM_CLASSES, NUM_MODALITIES};
use inference::Segmenter;
use ndarray::{Array3, Array4};
use seg_dataset::SplitArrays;
use training::{
    evaluate_split, score_host_batch, ADBackend, SoftDice, TrainOps, UNet, UNetConfig,
    UNetTrainer,
};

fn split(samples: usize, size: usize) -> SplitArrays {
    let images = Array4::from_shape_fn((samples, size, size, NUM_MODALITIES), |(n, y, x, c)| {
        ((n * 3 + y + x + c) % 5) as f32 / 5.0
    });
    let labels = Array3::from_shape_fn((samples, size, size), |(n, y, x)| {
        ((n + y + x) % NUM_CLASSES) as u8
    });
    let mask = Array3::from_shape_fn((samples, size, size), |(n, y, _)| u8::from(y >= n % 2));
    SplitArrays::from_arrays(Split::Valid, images, labels, mask).unwrap()
}

/// Trains a tiny U-Net for two steps and loads it back from its checkpoint.
fn checkpointed_segmenter(dir: &std::path::Path) -> Segmenter {
    let mut ops = UNetTrainer::<ADBackend, _, _>::new(
        UNetConfig {
            base_filters: 2,
            depth: 1,
            ..Default::default()
        },
        AdamConfig::new().init::<ADBackend, UNet<ADBackend>>(),
        SoftDice::default(),
        1e-3,
        Default::default(),
    );
    let arrays = split(2, 4);
    for _ in 0..2 {
        ops.train_step(arrays.assemble(&[0, 1]).unwrap()).unwrap();
    }
    ops.save_checkpoint(dir).unwrap();
    Segmenter::from_checkpoint(dir).unwrap()
}

#[test]
fn split_score_weights_batches_by_sample_count() {
    let tmp = tempfile::tempdir().unwrap();
    let segmenter = checkpointed_segmenter(&tmp.path().join("checkpoint"));
    let arrays = split(5, 4);
    let dice = SoftDice::default();

    let score = evaluate_split(&segmenter, &arrays, 2, &dice).unwrap();
    assert_eq!(score.samples, 5);
    assert_eq!(score.global_step, 2);

    // Batches [0, 1], [2, 3], [4].
    let mut expected = [0f32; NUM_CLASSES + 1];
    for chunk in [&[0, 1][..], &[2, 3], &[4]] {
        let batch = arrays.assemble(chunk).unwrap();
        let values = score_host_batch(&segmenter, &batch, &dice).unwrap().values();
        for (acc, v) in expected.iter_mut().zip(values) {
            *acc += v * chunk.len() as f32 / 5.0;
        }
    }
    for (got, want) in score.mean.values().iter().zip(expected) {
        assert_relative_eq!(*got, want, epsilon = 1e-5);
    }
    assert!(score.mean.aggregate > 0.0 && score.mean.aggregate <= 1.0);
}

#[test]
fn one_batch_covering_the_split_matches_a_direct_score() {
    let tmp = tempfile::tempdir().unwrap();
    let segmenter = checkpointed_segmenter(&tmp.path().join("checkpoint"));
    let arrays = split(3, 4);
    let dice = SoftDice::default();

    let score = evaluate_split(&segmenter, &arrays, 8, &dice).unwrap();
    let direct = score_host_batch(&segmenter, &arrays.assemble(&[0, 1, 2]).unwrap(), &dice).unwrap();
    for (got, want) in score.mean.values().iter().zip(direct.values()) {
        assert_relative_eq!(*got, want, epsilon = 1e-6);
    }
}

#[test]
fn fixed_objective_averages_to_its_constant() {
    let tmp = tempfile::tempdir().unwrap();
    let segmenter = checkpointed_segmenter(&tmp.path().join("checkpoint"));
    let score = evaluate_split(&segmenter, &split(3, 4), 2, &FixedScore(0.25)).unwrap();
    assert_relative_eq!(score.mean.aggregate, 0.25, epsilon = 1e-6);
    assert_eq!(score.mean.per_class, [0.0; NUM_CLASSES]);
}

#[test]
fn zero_batch_size_is_rejected() {
    let tmp = tempfile::tempdir().unwrap();
    let segmenter = checkpointed_segmenter(&tmp.path().join("checkpoint"));
    assert!(evaluate_split(&segmenter, &split(1, 4), 0, &SoftDice::default()).is_err());
}
