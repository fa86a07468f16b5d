//! Trains a small ReLU network to add two numbers.
//!
//! Usage: `cargo run --example sum_regression -- --iterations 50000 --hidden 8,8`
//! Set `RUST_LOG=scalargrad=trace` to watch the graph traversals.

use clap::Parser;
use color_eyre::Result;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use scalargrad::nn::{Mlp, Module};
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Trains a small ReLU network on `a + b` with `a, b` drawn from [0, 1).
#[derive(Parser, Debug)]
#[command(name = "sum_regression")]
#[command(about = "Train an MLP to add two numbers", long_about = None)]
struct TrainConfig {
    /// Number of training steps
    #[arg(long, default_value_t = 20_000)]
    iterations: u64,

    /// Gradient descent step size
    #[arg(long, default_value_t = 1e-3)]
    rate: f64,

    /// Seed for weight initialisation and sampling
    #[arg(long, default_value_t = 0)]
    seed: u64,

    /// Log the loss every N steps
    #[arg(long = "report-every", default_value_t = 1_000, value_parser = clap::value_parser!(u64).range(1..))]
    report_every: u64,

    /// Hidden layer sizes, comma separated
    #[arg(long, value_delimiter = ',', default_values_t = [4, 4])]
    hidden: Vec<usize>,
}

fn main() -> Result<()> {
    color_eyre::install()?;
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = TrainConfig::parse();
    info!(?config, "training");

    let mut rng = StdRng::seed_from_u64(config.seed);
    let mlp = Mlp::new(&mut rng, 2, &config.hidden, 1)?;
    info!(network = %mlp, parameters = mlp.parameters().len());

    for i in 0..config.iterations {
        let v1: f64 = rng.gen();
        let v2: f64 = rng.gen();
        let loss = mlp.train_step(&[v1, v2], &[v1 + v2], config.rate)?;

        if i % config.report_every == 0 {
            info!(iteration = i, loss, "progress");
        }
    }

    for (v1, v2) in [(0.25, 0.5), (0.1, 0.8), (0.9, 0.9)] {
        let out = mlp.predict(&[v1, v2])?;
        println!("{v1} + {v2} = {:.4}", out[0]);
    }

    Ok(())
}
