use clap::Parser;
use training::logging::init_tracing;
use training::{run_train, TrainArgs};

fn main() -> anyhow::Result<()> {
    init_tracing();
    let args = TrainArgs::parse();
    run_train(args)?;
    Ok(())
}
