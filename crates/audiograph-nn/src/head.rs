//! Per-graph readout and classification head.

use crate::config::{ModelConfig, PoolingOp};
use crate::error::{Error, Result};
use crate::pool::pool_nodes;
use crate::state::{GraphInputs, GraphState};
use candle_core::{Module, ModuleT, Tensor};
use candle_nn::{linear, Dropout, Linear, VarBuilder};

/// Where the per-graph vector comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readout {
    /// Reduce final frame states per graph.
    Pool(PoolingOp),
    /// Read the final context state.
    Context,
}

/// Readout followed by a linear map to raw class logits.
pub struct ClassifierHead {
    readout: Readout,
    dropout: Option<Dropout>,
    linear: Linear,
    in_dim: usize,
}

impl ClassifierHead {
    pub fn new(config: &ModelConfig, vb: VarBuilder) -> Result<Self> {
        let readout = if config.is_context_bearing() {
            Readout::Context
        } else {
            Readout::Pool(config.pooling)
        };
        let in_dim = config.next_state_dim;
        let dropout = (readout == Readout::Context && config.dropout_rate > 0.0)
            .then(|| Dropout::new(config.dropout_rate));
        Ok(Self {
            readout,
            dropout,
            linear: linear(in_dim, config.num_classes, vb.pp("logits"))?,
            in_dim,
        })
    }

    pub fn readout(&self) -> Readout {
        self.readout
    }

    /// `(G, H)` per-graph vectors.
    pub fn read(&self, inputs: &GraphInputs, state: &GraphState, train: bool) -> Result<Tensor> {
        let pooled = match self.readout {
            Readout::Pool(op) => pool_nodes(op, state.nodes(), inputs.owner(), inputs.ranges())?,
            Readout::Context => {
                let context = state
                    .context()
                    .ok_or_else(|| Error::InvalidNodeSet("context state not initialized".into()))?;
                match &self.dropout {
                    Some(dropout) => dropout.forward_t(context, train)?,
                    None => context.clone(),
                }
            }
        };
        let got = pooled.dim(1)?;
        if got != self.in_dim {
            return Err(Error::DimensionMismatch {
                expected: self.in_dim,
                got,
            });
        }
        Ok(pooled)
    }

    /// `(G, num_classes)` raw logits; no activation.
    pub fn forward_t(&self, inputs: &GraphInputs, state: &GraphState, train: bool) -> Result<Tensor> {
        Ok(self.linear.forward(&self.read(inputs, state, train)?)?)
    }
}
