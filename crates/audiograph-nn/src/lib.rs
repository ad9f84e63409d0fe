#![allow(clippy::must_use_candidate)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_precision_loss)]

//! Message passing over audio frame graphs.
//!
//! A model runs L rounds over the graph tensors built by `audiograph-core`.
//! Each round picks one dilation view and updates every hidden state from
//! the states of the previous round:
//!
//! ```text
//! h_i^{(r+1)} = NEXT([h_i^{(r)} || SUM_{e into i} MESSAGE(h_sender(e)^{(r)}, h_i^{(r)}, e)])
//! ```
//!
//! Kernels differ in MESSAGE (plain sum, edge-weighted sum, degree
//! normalized, multi-head attention). Context-bearing models also keep one
//! state per utterance that either receives the view's messages or pools the
//! frames each round; the head reads it (or pools the frames) and maps it to
//! class logits.
//!
//! - [`init`] - initial states per entity kind
//! - [`conv`] - convolution kernels and incidence buffers
//! - [`schedule`] - round loop, view cycling, per-round parameters
//! - [`head`] - readout and logits
//! - [`model`] - assembly, batching, seeded parameters
//!
//! # Example
//!
//! ```rust,no_run
//! use audiograph_core::{dilated_path_stack, GraphBuilder, Matrix};
//! use audiograph_nn::{AudioGraphModel, ModelConfig};
//! use candle_core::Device;
//! use candle_nn::VarMap;
//!
//! let config = ModelConfig::default().with_dilation(2).with_seed(0);
//! let varmap = VarMap::new();
//! let model = AudioGraphModel::with_varmap(config, &varmap, &Device::Cpu)?;
//!
//! let graph = GraphBuilder::with_views(2)
//!     .build(&Matrix::zeros(98, 39), &dilated_path_stack(98, &[1, 2]))?;
//! let logits = model.forward(&graph)?;
//! assert_eq!(logits.dims(), &[1, 35]);
//! # Ok::<(), audiograph_nn::Error>(())
//! ```

pub mod config;
pub mod conv;
pub mod dense;
mod error;
pub mod head;
pub mod init;
pub mod model;
pub mod pool;
pub mod schedule;
pub mod state;

pub use config::{
    ContextUpdate, ConvolutionVariant, DegreeNormalization, ModelConfig, NodeEncoder, PoolingOp,
    Receiver, SkipConnection,
};
pub use conv::{Convolution, Incidence};
pub use error::{Error, Result};
pub use init::{EntityKind, StateInitializer};
pub use model::{seed_parameters, AudioGraphModel};
pub use schedule::{view_schedule, RoundTrace, UpdateScheduler};
pub use state::{GraphInputs, GraphState};
