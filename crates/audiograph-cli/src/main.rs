//! audiograph CLI - build frame graphs and classify them from the command line.
//!
//! # Usage
//!
//! ```bash
//! # Node/edge counts of one example
//! audiograph inspect example.json
//!
//! # Which view and parameter set each round uses
//! audiograph schedule --config model.json
//!
//! # Logits for a batch of examples (JSON on stdout)
//! audiograph forward --config model.json a.json b.json --seed 7
//! ```
//!
//! An example file holds `{"features": [[f32; F]; N], "adjacency": [[[f32; N]; N]; K]}`.
//! Set `RUST_LOG=debug` to log every message-passing round.

use anyhow::{Context, Result};
use audiograph_core::{AdjacencyStack, GraphBuilder, GraphTensor, Matrix};
use audiograph_nn::schedule::round_layer_map;
use audiograph_nn::{AudioGraphModel, ModelConfig};
use candle_core::Device;
use candle_nn::VarMap;
use clap::{Parser, Subcommand};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "audiograph")]
#[command(about = "Audio frame graph classifier", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show node and edge counts of an example graph
    Inspect {
        /// Example file (JSON features + adjacency stack)
        input: PathBuf,
    },

    /// Print the view and parameter set used by every round
    Schedule {
        /// Model config (JSON); defaults when omitted
        #[arg(short, long)]
        config: Option<PathBuf>,
    },

    /// Classify examples as one merged batch and print logits as JSON
    Forward {
        /// Example files
        #[arg(required = true)]
        inputs: Vec<PathBuf>,

        /// Model config (JSON); defaults when omitted
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Parameter seed, used when the config sets none
        #[arg(long, default_value = "0")]
        seed: u64,
    },
}

#[derive(Deserialize)]
struct Example {
    features: Vec<Vec<f32>>,
    adjacency: Vec<Vec<Vec<f32>>>,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Inspect { input } => cmd_inspect(&input),
        Commands::Schedule { config } => cmd_schedule(config.as_deref()),
        Commands::Forward {
            inputs,
            config,
            seed,
        } => cmd_forward(&inputs, config.as_deref(), seed),
    }
}

fn load_config(path: Option<&Path>) -> Result<ModelConfig> {
    match path {
        Some(path) => ModelConfig::from_json_file(path)
            .with_context(|| format!("Failed to load config {}", path.display())),
        None => Ok(ModelConfig::default()),
    }
}

fn load_example(path: &Path) -> Result<GraphTensor> {
    let text =
        fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?;
    let example: Example = serde_json::from_str(&text)
        .with_context(|| format!("Failed to parse example {}", path.display()))?;
    let features = Matrix::from_rows(&example.features)
        .with_context(|| format!("Bad feature matrix in {}", path.display()))?;
    let adjacency = AdjacencyStack::from_nested(&example.adjacency)
        .with_context(|| format!("Bad adjacency stack in {}", path.display()))?;
    GraphBuilder::new()
        .build(&features, &adjacency)
        .with_context(|| format!("Failed to build graph from {}", path.display()))
}

fn cmd_inspect(input: &Path) -> Result<()> {
    let graph = load_example(input)?;
    let stats = graph.stats();

    println!("Graph Statistics");
    println!("================");
    println!("Components: {}", stats.num_components);
    for (name, count) in &stats.node_counts {
        let dim = graph.node_set(name).map_or(0, |ns| ns.feature_dim());
        println!("Node set {name}: {count} nodes, {dim} features");
    }
    for (name, count) in &stats.edge_counts {
        println!("Edge set {name}: {count} edges");
    }
    Ok(())
}

fn cmd_schedule(config: Option<&Path>) -> Result<()> {
    let config = load_config(config)?;
    let layers = round_layer_map(&config);
    let views = audiograph_nn::view_schedule(layers.len(), config.effective_views());

    println!("Rounds: {}", layers.len());
    println!("Views:  {}", config.effective_views());
    for (round, (view, layer)) in views.iter().zip(&layers).enumerate() {
        println!("  round {round}: view_{view}, parameters {layer}");
    }
    Ok(())
}

fn cmd_forward(inputs: &[PathBuf], config: Option<&Path>, seed: u64) -> Result<()> {
    let mut config = load_config(config)?;
    config.seed = config.seed.or(Some(seed));

    let graphs = inputs
        .iter()
        .map(|p| load_example(p))
        .collect::<Result<Vec<_>>>()?;

    let varmap = VarMap::new();
    let model = AudioGraphModel::with_varmap(config, &varmap, &Device::Cpu)
        .context("Failed to build model")?;
    let logits = model
        .forward_batch(&graphs, false)
        .context("Forward pass failed")?
        .to_vec2::<f32>()?;

    let rows: Vec<_> = inputs
        .iter()
        .zip(logits)
        .map(|(path, logits)| serde_json::json!({ "input": path.display().to_string(), "logits": logits }))
        .collect();
    println!("{}", serde_json::to_string_pretty(&rows)?);
    Ok(())
}
