use burn::module::Module;
use burn::record::{BinFileRecorder, FullPrecisionSettings};
use data_contracts::checkpoint::MODEL_FILE;
use data_contracts::{CheckpointManifest, HostBatch, NUM_CLASSES};
use inference::{InferenceBackend, Segmenter};
use models::{UNet, UNetConfig};

fn write_checkpoint(dir: &std::path::Path, cfg: UNetConfig, step: u64) {
    let device = Default::default();
    let recorder = BinFileRecorder::<FullPrecisionSettings>::new();
    UNet::<InferenceBackend>::new(cfg, &device)
        .save_file(dir.join(MODEL_FILE), &recorder)
        .unwrap();
    CheckpointManifest::new(step, 1e-4, cfg.base_filters, cfg.depth)
        .save(dir)
        .unwrap();
}

#[test]
fn segmenter_loads_saved_unet() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = UNetConfig {
        base_filters: 2,
        depth: 1,
        ..Default::default()
    };
    write_checkpoint(dir.path(), cfg, 42);

    let segmenter = Segmenter::from_checkpoint(dir.path()).unwrap();
    assert_eq!(segmenter.global_step(), 42);
    assert_eq!(segmenter.config(), cfg);

    let batch = HostBatch::zeros(2, 4, 4);
    let classes = segmenter.segment(&batch).unwrap();
    assert_eq!(classes.len(), 2 * 4 * 4);
    assert!(classes.iter().all(|&c| (c as usize) < NUM_CLASSES));

    let probs = segmenter.probabilities(&batch).unwrap();
    assert_eq!(probs.dims(), [2, NUM_CLASSES, 4, 4]);
}

#[test]
fn corrupt_model_record_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = UNetConfig {
        base_filters: 2,
        depth: 1,
        ..Default::default()
    };
    write_checkpoint(dir.path(), cfg, 1);
    std::fs::write(dir.path().join(MODEL_FILE), b"not a record").unwrap();
    assert!(matches!(
        Segmenter::from_checkpoint(dir.path()),
        Err(inference::InferenceError::Record { .. })
    ));
}
