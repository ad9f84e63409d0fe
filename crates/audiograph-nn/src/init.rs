//! Initial hidden states for frames, view edges, and graph contexts.
//!
//! Entity kinds form a closed vocabulary. The initializer builds one handler
//! per kind the configuration needs and rejects every other name.

use crate::config::{ModelConfig, NodeEncoder};
use crate::dense::{Dense, DenseSpec};
use crate::error::{Error, Result};
use crate::state::{GraphInputs, GraphState};
use audiograph_core::{view_name, FRAMES, VIEW_PREFIX};
use candle_core::{DType, ModuleT, Tensor};
use candle_nn::VarBuilder;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Name of the per-graph pseudo-entity.
pub const CONTEXT: &str = "context";

/// Closed set of entity kinds that carry hidden state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EntityKind {
    Frames,
    View(usize),
    Context,
}

impl FromStr for EntityKind {
    type Err = Error;

    fn from_str(name: &str) -> Result<Self> {
        if name == FRAMES {
            return Ok(Self::Frames);
        }
        if name == CONTEXT {
            return Ok(Self::Context);
        }
        name.strip_prefix(VIEW_PREFIX)
            .and_then(|k| k.parse().ok())
            .map(Self::View)
            .ok_or_else(|| Error::InvalidNodeSet(name.to_string()))
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Frames => f.write_str(FRAMES),
            Self::View(k) => f.write_str(&view_name(*k)),
            Self::Context => f.write_str(CONTEXT),
        }
    }
}

enum FrameEncoder {
    Dense(Dense),
    FeatureGroups {
        groups: Vec<(usize, usize, Dense)>,
        combine: Dense,
    },
}

impl FrameEncoder {
    fn forward_t(&self, features: &Tensor, train: bool) -> Result<Tensor> {
        match self {
            Self::Dense(dense) => Ok(dense.forward_t(features, train)?),
            Self::FeatureGroups { groups, combine } => {
                let parts = groups
                    .iter()
                    .map(|(start, width, dense)| {
                        dense.forward_t(&features.narrow(1, *start, *width)?, train)
                    })
                    .collect::<candle_core::Result<Vec<_>>>()?;
                Ok(combine.forward_t(&Tensor::cat(&parts, 1)?, train)?)
            }
        }
    }
}

enum Handler {
    Frames(FrameEncoder),
    Edges(Dense),
    Context { dim: usize },
}

/// Row-wise initial-state encoders, one per entity kind.
pub struct StateInitializer {
    handlers: BTreeMap<EntityKind, Handler>,
    input_dim: usize,
    num_views: usize,
}

impl StateInitializer {
    /// Build handlers for frames, every scheduled view (when edge states are
    /// enabled), and the context (when the model carries one).
    pub fn new(config: &ModelConfig, vb: VarBuilder) -> Result<Self> {
        config.validate()?;
        let mut handlers = BTreeMap::new();
        let frames = match config.node_encoder {
            NodeEncoder::Dense => FrameEncoder::Dense(Dense::new(
                config.input_feature_dim,
                DenseSpec::relu(config.initial_node_state_dim),
                vb.pp("frames"),
            )?),
            NodeEncoder::FeatureGroups => {
                let vb = vb.pp("frames");
                let groups = config
                    .feature_groups
                    .iter()
                    .enumerate()
                    .map(|(i, g)| {
                        let spec = DenseSpec::relu(g.units).with_layer_norm(true);
                        Dense::new(g.width(), spec, vb.pp(format!("group_{i}")))
                            .map(|d| (g.start, g.width(), d))
                    })
                    .collect::<candle_core::Result<Vec<_>>>()?;
                let concat: usize = config.feature_groups.iter().map(|g| g.units).sum();
                let combine = Dense::new(
                    concat,
                    DenseSpec::relu(config.initial_node_state_dim),
                    vb.pp("combine"),
                )?;
                FrameEncoder::FeatureGroups { groups, combine }
            }
        };
        handlers.insert(EntityKind::Frames, Handler::Frames(frames));

        let num_views = config.effective_views();
        if let Some(edge_dim) = config.initial_edge_state_dim {
            for k in 0..num_views {
                let dense = Dense::new(1, DenseSpec::relu(edge_dim), vb.pp(view_name(k)))?;
                handlers.insert(EntityKind::View(k), Handler::Edges(dense));
            }
        }
        if config.is_context_bearing() {
            handlers.insert(
                EntityKind::Context,
                Handler::Context {
                    dim: config.next_state_dim,
                },
            );
        }
        Ok(Self {
            handlers,
            input_dim: config.input_feature_dim,
            num_views,
        })
    }

    /// Kinds with a handler, in order.
    pub fn kinds(&self) -> impl Iterator<Item = EntityKind> + '_ {
        self.handlers.keys().copied()
    }

    /// Parse a name and check it against the configured vocabulary.
    pub fn resolve(&self, name: &str) -> Result<EntityKind> {
        let kind: EntityKind = name.parse()?;
        if let EntityKind::View(k) = kind {
            if k >= self.num_views {
                return Err(Error::InvalidNodeSet(name.to_string()));
            }
        }
        Ok(kind)
    }

    fn handler(&self, name: &str) -> Result<&Handler> {
        let kind = self.resolve(name)?;
        self.handlers
            .get(&kind)
            .ok_or_else(|| Error::InvalidNodeSet(format!("{name} has no initializer")))
    }

    /// Encode `(N, F)` raw frame features to `(N, initial_node_state_dim)`.
    pub fn init_nodes(&self, name: &str, features: &Tensor, train: bool) -> Result<Tensor> {
        match self.handler(name)? {
            Handler::Frames(encoder) => {
                let got = features.dim(1)?;
                if got != self.input_dim {
                    return Err(Error::DimensionMismatch {
                        expected: self.input_dim,
                        got,
                    });
                }
                encoder.forward_t(features, train)
            }
            _ => Err(Error::InvalidNodeSet(format!("{name} is not a node set"))),
        }
    }

    /// Encode `(E, 1)` edge weights to `(E, initial_edge_state_dim)`.
    pub fn init_edges(&self, name: &str, weights: &Tensor, train: bool) -> Result<Tensor> {
        match self.handler(name)? {
            Handler::Edges(dense) => {
                if weights.dim(0)? == 0 {
                    return Ok(Tensor::zeros(
                        (0, dense.out_dim()),
                        DType::F32,
                        weights.device(),
                    )?);
                }
                Ok(dense.forward_t(weights, train)?)
            }
            _ => Err(Error::InvalidNodeSet(format!("{name} is not an edge set"))),
        }
    }

    /// Zero context state, one row per component.
    pub fn init_context(&self, inputs: &GraphInputs) -> Result<Tensor> {
        match self.handler(CONTEXT)? {
            Handler::Context { dim } => Ok(Tensor::zeros(
                (inputs.num_components(), *dim),
                DType::F32,
                inputs.device(),
            )?),
            _ => Err(Error::InvalidNodeSet(CONTEXT.to_string())),
        }
    }

    /// Initial state of every entity with a handler.
    pub fn initialize(&self, inputs: &GraphInputs, train: bool) -> Result<GraphState> {
        let mut state = GraphState::new(self.init_nodes(FRAMES, inputs.features(), train)?);
        for kind in self.kinds() {
            match kind {
                EntityKind::View(k) => {
                    let weights = inputs.view(k)?.incidence.weights();
                    state = state.with_edge(k, self.init_edges(&kind.to_string(), weights, train)?);
                }
                EntityKind::Context => state = state.with_context(self.init_context(inputs)?),
                EntityKind::Frames => {}
            }
        }
        Ok(state)
    }
}
