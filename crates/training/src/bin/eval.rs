use clap::Parser;
use data_contracts::InputArity;
use density_dataset::SampleStore;
use training::logging::init_tracing;
use training::{run_train, TrainArgs};

/// Evaluate a saved checkpoint on the test split and write `correlation_test.png`.
#[derive(Parser, Debug)]
#[command(name = "eval", about = "Evaluate a density-model checkpoint on the test split")]
struct Args {
    #[command(flatten)]
    run: TrainArgs,
    /// Evaluate a freshly initialized model instead of loading the named checkpoint.
    #[arg(long)]
    no_checkpoint: bool,
    /// Log the label mass ratio of the dataset before evaluating.
    #[arg(long)]
    class_counts: bool,
}

fn main() -> anyhow::Result<()> {
    init_tracing();
    let Args {
        mut run,
        no_checkpoint,
        class_counts,
    } = Args::parse();
    run.eval_only = true;
    run.load_from_checkpoint = !no_checkpoint;

    if class_counts {
        if let (Some(data), Some(label)) = (&run.data_path, &run.label_path) {
            let store = SampleStore::load(data, run.init_path.as_deref(), label)?;
            let (positive, negative) = store.class_counts();
            let variant = if store.arity() == InputArity::ImageAndInit {
                "image+init"
            } else {
                "image"
            };
            tracing::info!(positive, negative, variant, "dataset class ratios");
        }
    }

    run_train(run)?;
    Ok(())
}
