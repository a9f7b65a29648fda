use clap::Parser;
use training::util::{run_train, TrainArgs};

fn main() -> anyhow::Result<()> {
    cli_support::init_logging();
    let args = TrainArgs::parse();
    let report = run_train(args)?;
    if let Some(dir) = &report.checkpoint {
        println!(
            "Trained {} iterations ({} validations); checkpoint in {}",
            report.iterations,
            report.validations,
            dir.display()
        );
    }
    Ok(())
}
