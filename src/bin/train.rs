//! Train a small classifier on synthetic data
//!
//! Usage: cargo run --bin train -- --config model.toml --epochs 200

use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use ndarray::{concatenate, Array1, Array2, Axis};
use ndarray_rand::rand_distr::Normal;
use ndarray_rand::RandomExt;
use rand::rngs::StdRng;
use rand::SeedableRng;
use rust_nn_basics::{Config, Targets};
use tracing::info;

#[derive(Parser, Debug)]
#[command(author, version, about = "Train a dense network on two synthetic Gaussian blobs")]
struct Args {
    /// TOML configuration file (defaults are used when omitted)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Override the number of epochs
    #[arg(long)]
    epochs: Option<usize>,

    /// Override the mini-batch size
    #[arg(long)]
    batch_size: Option<usize>,

    /// Samples per class
    #[arg(long, default_value = "200")]
    samples: usize,

    /// Seed for the synthetic data
    #[arg(long, default_value = "42")]
    seed: u64,

    /// Override the log level (trace, debug, info, warn, error)
    #[arg(long)]
    log_level: Option<String>,

    /// Write the default configuration to this path and exit
    #[arg(long)]
    write_default_config: Option<PathBuf>,
}

/// Two 2-D Gaussian blobs centred at (-1, -1) and (1, 1), labelled 0 and 1
fn make_blobs(samples: usize, seed: u64) -> Result<(Array2<f64>, Array1<usize>)> {
    let mut rng = StdRng::seed_from_u64(seed);
    let noise = Normal::new(0.0, 0.6)?;
    let class0 = Array2::random_using((samples, 2), noise, &mut rng) - 1.0;
    let class1 = Array2::random_using((samples, 2), noise, &mut rng) + 1.0;
    let x = concatenate(Axis(0), &[class0.view(), class1.view()])?;
    let labels = (0..2 * samples).map(|i| usize::from(i >= samples)).collect();
    Ok((x, labels))
}

fn main() -> Result<()> {
    let args = Args::parse();

    if let Some(path) = &args.write_default_config {
        Config::default().save(path)?;
        println!("Wrote default configuration to {}", path.display());
        return Ok(());
    }

    let mut config = match &args.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };
    if let Some(level) = args.log_level {
        config.logging.level = level;
    }
    if let Some(epochs) = args.epochs {
        config.training.epochs = epochs;
    }
    if let Some(batch_size) = args.batch_size {
        config.training.batch_size = batch_size;
    }

    tracing_subscriber::fmt()
        .with_max_level(config.logging.level()?)
        .init();

    let (x, labels) = make_blobs(args.samples, args.seed)?;
    let split = x.nrows() * 4 / 5;
    let order: Vec<usize> = {
        use rand::seq::SliceRandom;
        let mut order: Vec<usize> = (0..x.nrows()).collect();
        order.shuffle(&mut StdRng::seed_from_u64(args.seed.wrapping_add(1)));
        order
    };
    let (train_idx, test_idx) = order.split_at(split);
    let x_train = x.select(Axis(0), train_idx);
    let x_test = x.select(Axis(0), test_idx);
    let y_train = Targets::from(labels.select(Axis(0), train_idx));
    let y_test = Targets::from(labels.select(Axis(0), test_idx));
    info!("Train: {}, Test: {}", x_train.nrows(), x_test.nrows());

    let mut model = config.build_model()?;
    let losses = model.fit(&x_train, &y_train, &config.training)?;
    let validation_loss = model.validation(&x_test, &y_test)?;

    let predictions = model.predict(&x_test)?;
    let correct = predictions
        .rows()
        .into_iter()
        .zip(labels.select(Axis(0), test_idx).iter())
        .filter(|(row, &label)| {
            let best = row
                .iter()
                .enumerate()
                .fold((0, f64::NEG_INFINITY), |acc, (i, &v)| if v > acc.1 { (i, v) } else { acc });
            best.0 == label
        })
        .count();

    println!("{}", model.describe());
    if let Some(last) = losses.last() {
        println!("Final training loss: {:.6}", last);
    }
    println!("Validation loss: {:.6}", validation_loss);
    println!(
        "Validation accuracy: {:.2}%",
        100.0 * correct as f64 / x_test.nrows().max(1) as f64
    );
    Ok(())
}
