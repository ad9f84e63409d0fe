#![allow(clippy::must_use_candidate)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::cast_possible_truncation)]

//! Graph tensors for audio frame graphs.
//!
//! An utterance is a sequence of feature frames (e.g. 98 frames of 39 MFCC
//! coefficients). This crate turns each utterance into a graph whose nodes
//! are frames and whose edges come from K adjacency matrices ("views"), and
//! batches such graphs into one disjoint-union graph for message passing.
//!
//! - [`GraphBuilder`] - features `[N,F]` + adjacency stack `[K,N,N]` ->
//!   single-example [`GraphTensor`] with node set `frames` and edge sets
//!   `view_0 .. view_{K-1}`
//! - [`merge_batch`] - B graph tensors -> one contiguously indexed tensor with
//!   a per-node owner (component id) array
//!
//! # Example
//!
//! ```rust
//! use audiograph_core::{dilated_path_stack, merge_batch, GraphBuilder, Matrix};
//!
//! let builder = GraphBuilder::with_views(2);
//! let a = builder.build(&Matrix::zeros(5, 39), &dilated_path_stack(5, &[1, 2]))?;
//! let b = builder.build(&Matrix::zeros(3, 39), &dilated_path_stack(3, &[1, 2]))?;
//!
//! let batch = merge_batch(&[a, b])?;
//! assert_eq!(batch.num_components(), 2);
//! assert_eq!(batch.frames().unwrap().len(), 8);
//! # Ok::<(), audiograph_core::Error>(())
//! ```

pub mod builder;
mod error;
pub mod graph;
pub mod merge;

pub use builder::{dilated_path_stack, AdjacencyStack, GraphBuilder};
pub use error::{Error, Result};
pub use graph::{view_name, EdgeSet, GraphStats, GraphTensor, Matrix, NodeSet, FRAMES, VIEW_PREFIX};
pub use merge::merge_batch;
