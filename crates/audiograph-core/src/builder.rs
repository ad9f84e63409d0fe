//! Per-example graph construction from features and adjacency matrices.
//!
//! Each of the K adjacency matrices becomes one edge set (`view_k`). Entries
//! are scanned row-major and every strictly positive `A[i][j]` yields a
//! directed edge `i -> j` whose weight is `A[i][j]`. Conversion is eager: the
//! scheduler later works only on these dense index buffers.

use crate::error::{Error, Result};
use crate::graph::{view_name, EdgeSet, GraphTensor, Matrix, NodeSet, FRAMES};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A stack of K square adjacency matrices, one per view.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdjacencyStack {
    views: Vec<Matrix>,
}

impl AdjacencyStack {
    pub fn new(views: Vec<Matrix>) -> Self {
        Self { views }
    }

    /// Build from `[K][N][N]` nested vectors.
    pub fn from_nested(views: &[Vec<Vec<f32>>]) -> Result<Self> {
        let views = views
            .iter()
            .map(|m| Matrix::from_rows(m))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { views })
    }

    /// Number of views K.
    pub fn len(&self) -> usize {
        self.views.len()
    }

    pub fn is_empty(&self) -> bool {
        self.views.is_empty()
    }

    pub fn views(&self) -> &[Matrix] {
        &self.views
    }
}

/// Builds single-example [`GraphTensor`]s.
#[derive(Debug, Clone, Default)]
pub struct GraphBuilder {
    expected_views: Option<usize>,
}

impl GraphBuilder {
    /// Builder accepting any number of views.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder requiring exactly `k` adjacency matrices per example.
    pub fn with_views(k: usize) -> Self {
        Self {
            expected_views: Some(k),
        }
    }

    /// Build one example graph: node set `frames` plus one edge set per view.
    pub fn build(&self, features: &Matrix, adjacency: &AdjacencyStack) -> Result<GraphTensor> {
        let n = features.rows();
        if let Some(k) = self.expected_views {
            if adjacency.len() != k {
                return Err(Error::shape("adjacency stack depth", k, adjacency.len()));
            }
        }
        for (k, a) in adjacency.views().iter().enumerate() {
            if !a.is_square() {
                return Err(Error::shape(
                    format!("adjacency view {k}"),
                    "square matrix",
                    format!("{}x{}", a.rows(), a.cols()),
                ));
            }
            if a.rows() != n {
                return Err(Error::shape(
                    format!("adjacency view {k} vs feature rows"),
                    n,
                    a.rows(),
                ));
            }
        }

        let edge_sets: BTreeMap<String, EdgeSet> = adjacency
            .views()
            .par_iter()
            .enumerate()
            .map(|(k, a)| (view_name(k), extract_edges(a)))
            .collect();

        let mut node_sets = BTreeMap::new();
        node_sets.insert(FRAMES.to_string(), NodeSet::from_features(features.clone()));

        Ok(GraphTensor::from_parts_unchecked(node_sets, edge_sets, 1))
    }

    /// Build many examples in parallel; output order matches input order.
    pub fn build_batch(&self, examples: &[(Matrix, AdjacencyStack)]) -> Result<Vec<GraphTensor>> {
        examples
            .par_iter()
            .map(|(features, adjacency)| self.build(features, adjacency))
            .collect()
    }
}

fn extract_edges(a: &Matrix) -> EdgeSet {
    let n = a.rows();
    let mut source = Vec::new();
    let mut target = Vec::new();
    let mut weights = Vec::new();
    for i in 0..n {
        for (j, &w) in a.row(i).iter().enumerate() {
            if w > 0.0 {
                source.push(i as u32);
                target.push(j as u32);
                weights.push(w);
            }
        }
    }
    let e = source.len();
    EdgeSet::from_parts(FRAMES.to_string(), source, target, weights, vec![e])
}

/// Dilated temporal window adjacency.
///
/// View `k` connects frames `i` and `i + dilations[k]` in both directions with
/// weight 1. `dilations = [1, 2]` gives the undilated path graph as view 0 and
/// a stride-2 graph as view 1.
pub fn dilated_path_stack(n: usize, dilations: &[usize]) -> AdjacencyStack {
    let views = dilations
        .iter()
        .map(|&d| {
            let mut m = vec![0.0f32; n * n];
            if d > 0 {
                for i in 0..n.saturating_sub(d) {
                    m[i * n + i + d] = 1.0;
                    m[(i + d) * n + i] = 1.0;
                }
            }
            Matrix::new(n, n, m).unwrap_or_else(|_| Matrix::zeros(n, n))
        })
        .collect();
    AdjacencyStack::new(views)
}
