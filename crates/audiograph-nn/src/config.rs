//! Model configuration.
//!
//! Every option has a default matching the reference setup (98 frames of 39
//! MFCC features, 35 keyword classes, 4 rounds of message passing). Configs
//! load from JSON with missing keys filled from [`ModelConfig::default`].
//!
//! ```rust
//! use audiograph_nn::config::{ConvolutionVariant, ModelConfig};
//!
//! let config = ModelConfig::default()
//!     .with_message_passing_layers(4)
//!     .with_dilation(2)
//!     .with_convolution(ConvolutionVariant::WeightedSum);
//! config.validate().unwrap();
//! assert_eq!(config.effective_views(), 2);
//! ```

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// How messages are computed and aggregated over an edge set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConvolutionVariant {
    /// `sum(transform(concat(sender, receiver)))`
    #[default]
    UnweightedSum,
    /// `sum(w_e * transform(sender))`
    WeightedSum,
    /// `sum(w_e * norm_e * transform(sender))`
    DegreeNormalized,
    /// Multi-head attention over incident edges
    Attention,
}

/// Degree normalization used by [`ConvolutionVariant::DegreeNormalized`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DegreeNormalization {
    /// `1 / deg(receiver)`
    #[default]
    In,
    /// `1 / sqrt(deg(sender) * deg(receiver))`
    Symmetric,
}

/// Which side of an edge accumulates messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Receiver {
    /// Messages flow from target to source.
    #[default]
    Source,
    /// Messages flow from source to target.
    Target,
    /// Messages flow into the per-graph context.
    Context,
}

/// Per-round context update for node-receiving models.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ContextUpdate {
    /// No context state; the head pools final node states.
    #[default]
    None,
    /// Mean of node states pooled into the context each round.
    MeanPool,
    /// Attention from the context over its nodes each round.
    Attention,
}

/// Order-invariant reduction over a group of vectors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PoolingOp {
    #[default]
    Sum,
    Mean,
    Max,
}

/// Residual connection around each node update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SkipConnection {
    #[default]
    None,
    /// `h' = update(h) + project(h)`; `project` is the identity when dims agree.
    Sum,
}

/// Initial node-state encoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NodeEncoder {
    /// One dense ReLU layer over all features.
    #[default]
    Dense,
    /// Separate dense blocks per feature column group, concatenated.
    FeatureGroups,
}

/// A contiguous block of feature columns encoded separately.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureGroup {
    pub start: usize,
    pub end: usize,
    pub units: usize,
}

impl FeatureGroup {
    pub fn new(start: usize, end: usize, units: usize) -> Self {
        Self { start, end, units }
    }

    pub fn width(&self) -> usize {
        self.end - self.start
    }
}

/// Base MFCCs, deltas, delta-deltas, energies of a 39-column MFCC frame.
pub fn mfcc_feature_groups() -> Vec<FeatureGroup> {
    vec![
        FeatureGroup::new(0, 12, 24),
        FeatureGroup::new(12, 24, 24),
        FeatureGroup::new(24, 36, 24),
        FeatureGroup::new(36, 39, 8),
    ]
}

/// Model configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// Raw per-frame feature dimension F (default: 39).
    pub input_feature_dim: usize,
    /// Node hidden-state dimension after initialization (default: 64).
    pub initial_node_state_dim: usize,
    /// Edge hidden-state dimension; `None` disables edge states (default).
    pub initial_edge_state_dim: Option<usize>,
    /// Message dimension produced by the convolution (default: 128).
    pub message_dim: usize,
    /// Node/context hidden-state dimension after each round (default: 128).
    pub next_state_dim: usize,
    /// Number of output logits (default: 35).
    pub num_classes: usize,
    /// L2 weight on update-layer kernels and biases (default: 6e-6).
    pub l2_reg_factor: f64,
    /// Dropout rate inside dense blocks (default: 0.2).
    pub dropout_rate: f32,
    /// Layer normalization after next-state blocks (default: true).
    pub use_layer_normalization: bool,
    /// Number of rounds L (default: 4).
    pub n_message_passing_layers: usize,
    /// Cycle through dilation views (default: false).
    pub enable_dilation: bool,
    /// Number of views V cycled when dilation is enabled (default: 2).
    pub n_dilation_views: usize,
    pub convolution_variant: ConvolutionVariant,
    pub receiver_endpoint: Receiver,
    pub degree_normalization: DegreeNormalization,
    /// Attention heads (default: 2).
    pub attention_heads: usize,
    /// Output channels per attention head (default: 32).
    pub per_head_channels: usize,
    /// Include the receiver state in unweighted-sum messages (default: true).
    pub combine_receiver_state: bool,
    pub context_update: ContextUpdate,
    /// Readout pooling for models without a context state (default: sum).
    pub pooling: PoolingOp,
    pub skip_connection: SkipConnection,
    /// Reuse one parameter set for every round with matching input dims.
    pub share_round_weights: bool,
    pub node_encoder: NodeEncoder,
    /// Column groups for [`NodeEncoder::FeatureGroups`].
    pub feature_groups: Vec<FeatureGroup>,
    /// Seed for deterministic parameter initialization.
    pub seed: Option<u64>,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            input_feature_dim: 39,
            initial_node_state_dim: 64,
            initial_edge_state_dim: None,
            message_dim: 128,
            next_state_dim: 128,
            num_classes: 35,
            l2_reg_factor: 6e-6,
            dropout_rate: 0.2,
            use_layer_normalization: true,
            n_message_passing_layers: 4,
            enable_dilation: false,
            n_dilation_views: 2,
            convolution_variant: ConvolutionVariant::default(),
            receiver_endpoint: Receiver::default(),
            degree_normalization: DegreeNormalization::default(),
            attention_heads: 2,
            per_head_channels: 32,
            combine_receiver_state: true,
            context_update: ContextUpdate::default(),
            pooling: PoolingOp::default(),
            skip_connection: SkipConnection::default(),
            share_round_weights: false,
            node_encoder: NodeEncoder::default(),
            feature_groups: mfcc_feature_groups(),
            seed: None,
        }
    }
}

impl ModelConfig {
    /// Load and validate a JSON config file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    /// Parse and validate a JSON config.
    pub fn from_json_str(text: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn with_input_feature_dim(mut self, dim: usize) -> Self {
        self.input_feature_dim = dim;
        self
    }

    pub fn with_dims(mut self, initial: usize, message: usize, next: usize) -> Self {
        self.initial_node_state_dim = initial;
        self.message_dim = message;
        self.next_state_dim = next;
        self
    }

    pub fn with_edge_state_dim(mut self, dim: usize) -> Self {
        self.initial_edge_state_dim = Some(dim);
        self
    }

    pub fn with_num_classes(mut self, n: usize) -> Self {
        self.num_classes = n;
        self
    }

    pub fn with_message_passing_layers(mut self, n: usize) -> Self {
        self.n_message_passing_layers = n;
        self
    }

    /// Enable dilation with `views` cycled views.
    pub fn with_dilation(mut self, views: usize) -> Self {
        self.enable_dilation = true;
        self.n_dilation_views = views;
        self
    }

    pub fn with_convolution(mut self, variant: ConvolutionVariant) -> Self {
        self.convolution_variant = variant;
        self
    }

    pub fn with_receiver(mut self, receiver: Receiver) -> Self {
        self.receiver_endpoint = receiver;
        self
    }

    pub fn with_context_update(mut self, update: ContextUpdate) -> Self {
        self.context_update = update;
        self
    }

    pub fn with_pooling(mut self, op: PoolingOp) -> Self {
        self.pooling = op;
        self
    }

    pub fn with_skip_connection(mut self, skip: SkipConnection) -> Self {
        self.skip_connection = skip;
        self
    }

    pub fn with_dropout(mut self, rate: f32) -> Self {
        self.dropout_rate = rate;
        self
    }

    pub fn with_layer_normalization(mut self, enabled: bool) -> Self {
        self.use_layer_normalization = enabled;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Number of views V the scheduler cycles through (1 without dilation).
    pub fn effective_views(&self) -> usize {
        if self.enable_dilation {
            self.n_dilation_views
        } else {
            1
        }
    }

    /// Whether the model carries a per-graph context state.
    pub fn is_context_bearing(&self) -> bool {
        self.receiver_endpoint == Receiver::Context || self.context_update != ContextUpdate::None
    }

    /// Whether any attention kernel is configured.
    pub fn uses_attention(&self) -> bool {
        self.convolution_variant == ConvolutionVariant::Attention
            || self.context_update == ContextUpdate::Attention
    }

    /// Reject inconsistent settings.
    pub fn validate(&self) -> Result<()> {
        let positive = [
            ("input_feature_dim", self.input_feature_dim),
            ("initial_node_state_dim", self.initial_node_state_dim),
            ("message_dim", self.message_dim),
            ("next_state_dim", self.next_state_dim),
            ("num_classes", self.num_classes),
            ("n_message_passing_layers", self.n_message_passing_layers),
        ];
        for (name, value) in positive {
            if value == 0 {
                return Err(Error::InvalidConfig(format!("{name} must be positive")));
            }
        }
        if self.enable_dilation && self.n_dilation_views == 0 {
            return Err(Error::InvalidConfig(
                "n_dilation_views must be positive when dilation is enabled".into(),
            ));
        }
        if !(0.0..1.0).contains(&self.dropout_rate) {
            return Err(Error::InvalidConfig(format!(
                "dropout_rate {} outside [0, 1)",
                self.dropout_rate
            )));
        }
        if self.l2_reg_factor < 0.0 {
            return Err(Error::InvalidConfig("l2_reg_factor must be >= 0".into()));
        }
        if self.uses_attention() && (self.attention_heads == 0 || self.per_head_channels == 0) {
            return Err(Error::InvalidConfig(
                "attention needs positive attention_heads and per_head_channels".into(),
            ));
        }
        if self.receiver_endpoint == Receiver::Context && self.context_update != ContextUpdate::None {
            return Err(Error::InvalidConfig(
                "receiver_endpoint = context already routes view messages into the context; \
                 context_update must be none"
                    .into(),
            ));
        }
        if let Some(dim) = self.initial_edge_state_dim {
            if dim == 0 {
                return Err(Error::InvalidConfig(
                    "initial_edge_state_dim must be positive".into(),
                ));
            }
            if !matches!(
                self.convolution_variant,
                ConvolutionVariant::UnweightedSum | ConvolutionVariant::Attention
            ) {
                return Err(Error::InvalidConfig(format!(
                    "{:?} convolution does not read edge states",
                    self.convolution_variant
                )));
            }
        }
        if self.node_encoder == NodeEncoder::FeatureGroups {
            if self.feature_groups.is_empty() {
                return Err(Error::InvalidConfig("feature_groups is empty".into()));
            }
            for g in &self.feature_groups {
                if g.start >= g.end || g.end > self.input_feature_dim || g.units == 0 {
                    return Err(Error::InvalidConfig(format!(
                        "feature group {}..{} ({} units) invalid for {} input features",
                        g.start, g.end, g.units, self.input_feature_dim
                    )));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        ModelConfig::default().validate().unwrap();
    }

    #[test]
    fn test_json_defaults_fill_missing_keys() {
        let config = ModelConfig::from_json_str(
            r#"{"num_classes": 10, "convolution_variant": "degree-normalized",
                "receiver_endpoint": "target", "enable_dilation": true}"#,
        )
        .unwrap();
        assert_eq!(config.num_classes, 10);
        assert_eq!(config.convolution_variant, ConvolutionVariant::DegreeNormalized);
        assert_eq!(config.receiver_endpoint, Receiver::Target);
        assert_eq!(config.message_dim, 128);
        assert_eq!(config.effective_views(), 2);
    }

    #[test]
    fn test_unknown_variant_rejected() {
        assert!(matches!(
            ModelConfig::from_json_str(r#"{"convolution_variant": "max-pool"}"#),
            Err(Error::Serialization(_))
        ));
    }

    #[test]
    fn test_dilation_disabled_uses_one_view() {
        let config = ModelConfig {
            n_dilation_views: 3,
            ..ModelConfig::default()
        };
        assert_eq!(config.effective_views(), 1);
    }

    #[test]
    fn test_context_receiver_excludes_context_update() {
        let config = ModelConfig::default()
            .with_receiver(Receiver::Context)
            .with_context_update(ContextUpdate::MeanPool);
        assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn test_edge_states_require_consuming_variant() {
        let config = ModelConfig::default()
            .with_edge_state_dim(16)
            .with_convolution(ConvolutionVariant::WeightedSum);
        assert!(config.validate().is_err());

        let config = config.with_convolution(ConvolutionVariant::Attention);
        config.validate().unwrap();
    }

    #[test]
    fn test_feature_groups_checked_against_input_dim() {
        let config = ModelConfig {
            node_encoder: NodeEncoder::FeatureGroups,
            input_feature_dim: 20,
            ..ModelConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_rounds_rejected() {
        let config = ModelConfig::default().with_message_passing_layers(0);
        assert!(config.validate().is_err());
    }
}
