use anyhow::Context;
use clap::Parser;
use cli_support::RunDirArgs;
use data_contracts::{Split, CLASS_NAMES};
use inference::Segmenter;
use seg_dataset::SplitArrays;
use std::path::{Path, PathBuf};
use training::{evaluate_split, SoftDice};

#[derive(Parser, Debug)]
#[command(
    name = "eval",
    about = "Score a U-Net checkpoint on the validation split (soft Dice per class)"
)]
struct Args {
    #[command(flatten)]
    dirs: RunDirArgs,
    /// Checkpoint directory (defaults to `<output_dir>/checkpoint`).
    #[arg(long)]
    checkpoint: Option<PathBuf>,
    /// Split to score.
    #[arg(long, default_value = "valid")]
    split: String,
    /// Samples per forward pass.
    #[arg(long, default_value_t = 4)]
    batch_size: usize,
}

fn main() -> anyhow::Result<()> {
    cli_support::init_logging();
    let args = Args::parse();
    let split = match args.split.as_str() {
        "train" => Split::Train,
        "valid" => Split::Valid,
        other => anyhow::bail!("unknown split {other:?}; expected train or valid"),
    };
    anyhow::ensure!(args.batch_size > 0, "batch_size must be > 0");

    let data_root = args.dirs.data_root_or(Path::new("data"));
    let ckpt_dir = args
        .checkpoint
        .clone()
        .unwrap_or_else(|| args.dirs.checkpoint_dir_or(Path::new("runs/unet")));

    let segmenter = Segmenter::from_checkpoint(&ckpt_dir)
        .with_context(|| format!("loading checkpoint from {}", ckpt_dir.display()))?;
    let arrays = SplitArrays::load(&data_root, split)?;
    let score = evaluate_split(&segmenter, &arrays, args.batch_size, &SoftDice::default())?;

    println!(
        "Eval at step {} on {} {} samples:",
        score.global_step, score.samples, split
    );
    for (i, (name, value)) in score.mean.named().into_iter().enumerate() {
        let label = if i == 0 { "all classes" } else { CLASS_NAMES[i - 1] };
        println!("  {name:<7} {value:.4}  ({label})");
    }
    Ok(())
}
