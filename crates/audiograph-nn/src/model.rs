//! End-to-end utterance classifier.
//!
//! ```text
//! GraphTensor --init--> GraphState --L rounds--> GraphState --head--> logits
//! ```

use crate::config::ModelConfig;
use crate::dense::sum_penalties;
use crate::error::{Error, Result};
use crate::head::ClassifierHead;
use crate::init::StateInitializer;
use crate::schedule::{RoundTrace, UpdateScheduler};
use crate::state::{GraphInputs, GraphState};
use audiograph_core::{merge_batch, GraphTensor};
use candle_core::{DType, Device, Tensor};
use candle_nn::{VarBuilder, VarMap};
use rand::{Rng, SeedableRng};
use rand_xorshift::XorShiftRng;

/// Graph classifier over frame graphs with dilation views.
pub struct AudioGraphModel {
    config: ModelConfig,
    initializer: StateInitializer,
    scheduler: UpdateScheduler,
    head: ClassifierHead,
    device: Device,
}

impl AudioGraphModel {
    pub fn new(config: ModelConfig, vb: VarBuilder) -> Result<Self> {
        config.validate()?;
        let device = vb.device().clone();
        let initializer = StateInitializer::new(&config, vb.pp("init"))?;
        let scheduler = UpdateScheduler::new(&config, vb.pp("rounds"))?;
        let head = ClassifierHead::new(&config, vb.pp("head"))?;
        tracing::info!(
            rounds = scheduler.num_rounds(),
            views = scheduler.num_views(),
            parameter_sets = scheduler.num_layers(),
            variant = ?config.convolution_variant,
            receiver = ?config.receiver_endpoint,
            classes = config.num_classes,
            "built audio graph model"
        );
        Ok(Self {
            config,
            initializer,
            scheduler,
            head,
            device,
        })
    }

    /// Build on a fresh variable map, re-seeding every parameter when
    /// `config.seed` is set.
    pub fn with_varmap(config: ModelConfig, varmap: &VarMap, device: &Device) -> Result<Self> {
        let seed = config.seed;
        let vb = VarBuilder::from_varmap(varmap, DType::F32, device);
        let model = Self::new(config, vb)?;
        if let Some(seed) = seed {
            seed_parameters(varmap, seed)?;
        }
        Ok(model)
    }

    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    pub fn scheduler(&self) -> &UpdateScheduler {
        &self.scheduler
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    /// Upload a graph's structure for the scheduled views.
    pub fn inputs(&self, graph: &GraphTensor) -> Result<GraphInputs> {
        GraphInputs::new(
            graph,
            self.config.effective_views(),
            self.config.receiver_endpoint,
            &self.device,
        )
    }

    /// Initial hidden states of a graph.
    pub fn initial_state(&self, graph: &GraphTensor) -> Result<GraphState> {
        self.initializer.initialize(&self.inputs(graph)?, false)
    }

    /// Inference-mode logits `(G, num_classes)`.
    pub fn forward(&self, graph: &GraphTensor) -> Result<Tensor> {
        self.forward_t(graph, false)
    }

    pub fn forward_t(&self, graph: &GraphTensor, train: bool) -> Result<Tensor> {
        Ok(self.forward_traced(graph, train)?.0)
    }

    /// Logits plus the frame messages of every round.
    pub fn forward_traced(&self, graph: &GraphTensor, train: bool) -> Result<(Tensor, Vec<RoundTrace>)> {
        let inputs = self.inputs(graph)?;
        let state = self.initializer.initialize(&inputs, train)?;
        let (state, traces) = self.scheduler.run_traced(&inputs, state, train)?;
        let logits = self.head.forward_t(&inputs, &state, train)?;
        Ok((logits, traces))
    }

    /// Merge single-example graphs and classify them together; row `i` of the
    /// result belongs to `graphs[i]`.
    pub fn forward_batch(&self, graphs: &[GraphTensor], train: bool) -> Result<Tensor> {
        let merged = merge_batch(graphs)?;
        tracing::debug!(
            batch = graphs.len(),
            nodes = merged.frames().map_or(0, |f| f.len()),
            "merged batch"
        );
        self.forward_t(&merged, train)
    }

    /// Sum of `l2_reg_factor * ||theta||^2` over regularized blocks.
    pub fn l2_penalty(&self) -> Result<Tensor> {
        Ok(sum_penalties(&self.scheduler.l2_terms()?, &self.device)?)
    }
}

/// Overwrite every variable with values drawn from a seeded xorshift stream.
///
/// Variables are visited in name order. Layer-norm gains are set to 1 and
/// their offsets to 0; every other tensor is uniform in `+-1/sqrt(fan_in)`,
/// where `fan_in` is its last dimension.
pub fn seed_parameters(varmap: &VarMap, seed: u64) -> Result<()> {
    let data = varmap
        .data()
        .lock()
        .map_err(|_| Error::InvalidConfig("parameter map lock poisoned".into()))?;
    let mut names: Vec<&String> = data.keys().collect();
    names.sort();

    let mut rng = XorShiftRng::seed_from_u64(seed);
    for name in names {
        let var = &data[name];
        let shape = var.shape().clone();
        let count = shape.elem_count();
        let values: Vec<f32> = if name.ends_with("norm.weight") {
            vec![1.0; count]
        } else if name.ends_with("norm.bias") {
            vec![0.0; count]
        } else {
            let fan_in = shape.dims().last().copied().unwrap_or(1).max(1);
            let bound = 1.0 / (fan_in as f32).sqrt();
            (0..count).map(|_| rng.gen_range(-bound..=bound)).collect()
        };
        var.set(&Tensor::from_vec(values, shape, var.device())?)?;
    }
    Ok(())
}
