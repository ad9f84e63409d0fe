//! Multi-round message passing over dilation views.
//!
//! Round `r` uses view `r mod V` and its own [`RoundLayer`]. Within a round
//! every update reads the pre-round [`GraphState`]:
//!
//! 1. edge states of the selected view (if enabled)
//! 2. frame states, from the view's messages (or the broadcast context)
//! 3. context states (context-bearing models)
//!
//! The round count is fixed when the scheduler is built.

use crate::config::{ContextUpdate, ConvolutionVariant, ModelConfig, PoolingOp, Receiver, SkipConnection};
use crate::conv::{build_convolution, ConvDims, ConvInput, Convolution};
use crate::dense::{Dense, DenseSpec};
use crate::error::{Error, Result};
use crate::pool::pool_nodes;
use crate::state::{GraphInputs, GraphState};
use candle_core::{Module, ModuleT, Tensor};
use candle_nn::{linear_no_bias, Linear, VarBuilder};

/// `[0, 1, .., V-1, 0, 1, ..]` truncated to `rounds` entries.
pub fn view_schedule(rounds: usize, views: usize) -> Vec<usize> {
    (0..rounds).map(|r| r % views.max(1)).collect()
}

/// Round -> parameter-set map.
///
/// Without sharing every round owns its layer. With sharing, rounds whose
/// input dims agree reuse one layer: round 0 reads `initial_node_state_dim`,
/// later rounds read `next_state_dim`.
pub fn round_layer_map(config: &ModelConfig) -> Vec<usize> {
    let rounds = config.n_message_passing_layers;
    if !config.share_round_weights {
        return (0..rounds).collect();
    }
    if config.initial_node_state_dim == config.next_state_dim {
        return vec![0; rounds];
    }
    (0..rounds).map(|r| r.min(1)).collect()
}

enum Residual {
    Identity,
    Projection(Linear),
}

impl Residual {
    fn forward(&self, xs: &Tensor) -> candle_core::Result<Tensor> {
        match self {
            Self::Identity => Ok(xs.clone()),
            Self::Projection(linear) => linear.forward(xs),
        }
    }
}

enum ContextAggregator {
    MeanPool,
    /// Kernel over node -> context membership.
    Members(Box<dyn Convolution>),
    /// Kernel over the selected view's edges, received by the context.
    View(Box<dyn Convolution>),
}

struct ContextStep {
    aggregator: ContextAggregator,
    next: Dense,
}

/// Parameters of one round.
pub struct RoundLayer {
    in_dim: usize,
    edge_update: Option<Dense>,
    /// `None` when frames read the broadcast context instead.
    node_conv: Option<Box<dyn Convolution>>,
    node_next: Dense,
    residual: Option<Residual>,
    context: Option<ContextStep>,
}

impl RoundLayer {
    fn new(config: &ModelConfig, in_dim: usize, vb: VarBuilder) -> Result<Self> {
        let next_dim = config.next_state_dim;
        let ctx_dim = config.next_state_dim;
        let edge_dim = config.initial_edge_state_dim;
        let next_spec = DenseSpec::relu(next_dim)
            .with_dropout(config.dropout_rate)
            .with_layer_norm(config.use_layer_normalization)
            .with_l2(config.l2_reg_factor);

        let edge_update = edge_dim
            .map(|d| {
                let spec = DenseSpec::relu(d)
                    .with_dropout(config.dropout_rate)
                    .with_layer_norm(config.use_layer_normalization)
                    .with_l2(config.l2_reg_factor);
                Dense::new(d + 2 * in_dim, spec, vb.pp("edge_next"))
            })
            .transpose()?;

        let (node_conv, context) = if config.receiver_endpoint == Receiver::Context {
            let conv = build_convolution(
                config.convolution_variant,
                ConvDims {
                    sender: in_dim,
                    receiver: ctx_dim,
                    edge: edge_dim,
                },
                config,
                vb.pp("context_conv"),
            )?;
            let next = Dense::new(conv.out_dim() + ctx_dim, next_spec, vb.pp("context_next"))?;
            let step = ContextStep {
                aggregator: ContextAggregator::View(conv),
                next,
            };
            (None, Some(step))
        } else {
            let conv = build_convolution(
                config.convolution_variant,
                ConvDims {
                    sender: in_dim,
                    receiver: in_dim,
                    edge: edge_dim,
                },
                config,
                vb.pp("conv"),
            )?;
            let context = match config.context_update {
                ContextUpdate::None => None,
                ContextUpdate::MeanPool => Some(ContextStep {
                    aggregator: ContextAggregator::MeanPool,
                    next: Dense::new(in_dim + ctx_dim, next_spec, vb.pp("context_next"))?,
                }),
                ContextUpdate::Attention => {
                    let conv = build_convolution(
                        ConvolutionVariant::Attention,
                        ConvDims {
                            sender: in_dim,
                            receiver: ctx_dim,
                            edge: None,
                        },
                        config,
                        vb.pp("context_conv"),
                    )?;
                    let next = Dense::new(conv.out_dim() + ctx_dim, next_spec, vb.pp("context_next"))?;
                    Some(ContextStep {
                        aggregator: ContextAggregator::Members(conv),
                        next,
                    })
                }
            };
            (Some(conv), context)
        };

        let message_dim = node_conv.as_ref().map_or(ctx_dim, |c| c.out_dim());
        let node_next = Dense::new(in_dim + message_dim, next_spec, vb.pp("node_next"))?;
        let residual = match config.skip_connection {
            SkipConnection::None => None,
            SkipConnection::Sum if in_dim == next_dim => Some(Residual::Identity),
            SkipConnection::Sum => Some(Residual::Projection(linear_no_bias(
                in_dim,
                next_dim,
                vb.pp("residual"),
            )?)),
        };

        Ok(Self {
            in_dim,
            edge_update,
            node_conv,
            node_next,
            residual,
            context,
        })
    }

    pub fn in_dim(&self) -> usize {
        self.in_dim
    }

    pub fn out_dim(&self) -> usize {
        self.node_next.out_dim()
    }

    fn l2_terms(&self) -> candle_core::Result<Vec<Tensor>> {
        let mut terms = Vec::new();
        for dense in [self.edge_update.as_ref(), Some(&self.node_next)]
            .into_iter()
            .flatten()
        {
            terms.extend(dense.l2_penalty()?);
        }
        if let Some(conv) = &self.node_conv {
            terms.extend(conv.l2_terms()?);
        }
        if let Some(step) = &self.context {
            terms.extend(step.next.l2_penalty()?);
            match &step.aggregator {
                ContextAggregator::MeanPool => {}
                ContextAggregator::Members(conv) | ContextAggregator::View(conv) => {
                    terms.extend(conv.l2_terms()?)
                }
            }
        }
        Ok(terms)
    }

    /// One round over view `view`; returns the new state and the frame messages.
    fn step(
        &self,
        inputs: &GraphInputs,
        state: &GraphState,
        view: usize,
        train: bool,
    ) -> Result<(GraphState, Tensor)> {
        let edges = inputs.view(view)?;
        let nodes = state.nodes();
        let got = nodes.dim(1)?;
        if got != self.in_dim {
            return Err(Error::DimensionMismatch {
                expected: self.in_dim,
                got,
            });
        }

        let next_edges = match (&self.edge_update, state.edge(view)) {
            (Some(dense), Some(prev)) if edges.num_edges > 0 => {
                let hs = nodes.index_select(&edges.source, 0)?;
                let ht = nodes.index_select(&edges.target, 0)?;
                Some(dense.forward_t(&Tensor::cat(&[prev, &hs, &ht], 1)?, train)?)
            }
            (Some(_), Some(prev)) => Some(prev.clone()),
            (Some(_), None) => return Err(Error::MissingView(format!("edge states of view_{view}"))),
            _ => None,
        };

        let messages = match &self.node_conv {
            Some(conv) => conv.convolve(
                &ConvInput {
                    incidence: &edges.incidence,
                    senders: nodes,
                    receivers: nodes,
                    edge_states: state.edge(view),
                },
                train,
            )?,
            None => self.prior_context(state)?.index_select(inputs.owner(), 0)?,
        };
        let mut next_nodes = self
            .node_next
            .forward_t(&Tensor::cat(&[nodes, &messages], 1)?, train)?;
        if let Some(residual) = &self.residual {
            next_nodes = (next_nodes + residual.forward(nodes)?)?;
        }

        let next_context = match &self.context {
            Some(step) => {
                let prior = self.prior_context(state)?;
                let pooled = match &step.aggregator {
                    ContextAggregator::MeanPool => {
                        pool_nodes(PoolingOp::Mean, nodes, inputs.owner(), inputs.ranges())?
                    }
                    ContextAggregator::Members(conv) => conv.convolve(
                        &ConvInput {
                            incidence: inputs.membership(),
                            senders: nodes,
                            receivers: prior,
                            edge_states: None,
                        },
                        train,
                    )?,
                    ContextAggregator::View(conv) => conv.convolve(
                        &ConvInput {
                            incidence: &edges.incidence,
                            senders: nodes,
                            receivers: prior,
                            edge_states: state.edge(view),
                        },
                        train,
                    )?,
                };
                Some(step.next.forward_t(&Tensor::cat(&[&pooled, prior], 1)?, train)?)
            }
            None => None,
        };

        let mut next = state.clone().with_nodes(next_nodes);
        if let Some(e) = next_edges {
            next = next.with_edge(view, e);
        }
        if let Some(c) = next_context {
            next = next.with_context(c);
        }
        Ok((next, messages))
    }

    fn prior_context<'a>(&self, state: &'a GraphState) -> Result<&'a Tensor> {
        state
            .context()
            .ok_or_else(|| Error::InvalidNodeSet("context state not initialized".into()))
    }
}

/// Messages received by frames in one round.
#[derive(Debug, Clone)]
pub struct RoundTrace {
    pub round: usize,
    pub view: usize,
    /// `(N, message_dim)` aggregated messages, before the next-state block.
    pub messages: Tensor,
}

/// Drives `n_message_passing_layers` rounds.
pub struct UpdateScheduler {
    layers: Vec<RoundLayer>,
    round_to_layer: Vec<usize>,
    num_views: usize,
}

impl UpdateScheduler {
    pub fn new(config: &ModelConfig, vb: VarBuilder) -> Result<Self> {
        config.validate()?;
        let round_to_layer = round_layer_map(config);
        let num_layers = round_to_layer.iter().max().map_or(0, |&m| m + 1);
        let layers = (0..num_layers)
            .map(|i| {
                let in_dim = if i == 0 {
                    config.initial_node_state_dim
                } else {
                    config.next_state_dim
                };
                RoundLayer::new(config, in_dim, vb.pp(format!("round_{i}")))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            layers,
            round_to_layer,
            num_views: config.effective_views(),
        })
    }

    pub fn num_rounds(&self) -> usize {
        self.round_to_layer.len()
    }

    pub fn num_views(&self) -> usize {
        self.num_views
    }

    /// Number of distinct parameter sets.
    pub fn num_layers(&self) -> usize {
        self.layers.len()
    }

    pub fn view_for_round(&self, round: usize) -> usize {
        round % self.num_views
    }

    pub fn layer_for_round(&self, round: usize) -> usize {
        self.round_to_layer[round]
    }

    pub fn view_schedule(&self) -> Vec<usize> {
        view_schedule(self.num_rounds(), self.num_views)
    }

    pub fn run(&self, inputs: &GraphInputs, state: GraphState, train: bool) -> Result<GraphState> {
        Ok(self.run_traced(inputs, state, train)?.0)
    }

    /// Run every round, recording the frame messages of each.
    pub fn run_traced(
        &self,
        inputs: &GraphInputs,
        mut state: GraphState,
        train: bool,
    ) -> Result<(GraphState, Vec<RoundTrace>)> {
        let mut traces = Vec::with_capacity(self.num_rounds());
        for (round, &layer_idx) in self.round_to_layer.iter().enumerate() {
            let view = self.view_for_round(round);
            let layer = &self.layers[layer_idx];
            let edges = inputs.view(view)?.num_edges;
            tracing::debug!(
                round,
                view,
                layer = layer_idx,
                in_dim = layer.in_dim(),
                out_dim = layer.out_dim(),
                edges,
                "message passing round"
            );
            let (next, messages) = layer.step(inputs, &state, view, train)?;
            state = next;
            traces.push(RoundTrace {
                round,
                view,
                messages,
            });
        }
        Ok((state, traces))
    }

    pub fn l2_terms(&self) -> Result<Vec<Tensor>> {
        let mut terms = Vec::new();
        for layer in &self.layers {
            terms.extend(layer.l2_terms()?);
        }
        Ok(terms)
    }
}
