//! Graph tensor data model.
//!
//! A [`GraphTensor`] holds one or more disjoint graphs ("components") in a
//! single contiguously indexed structure:
//!
//! - node sets keyed by name, each with a dense feature matrix and the
//!   component id (owner) of every node;
//! - edge sets keyed by name, stored in COO form (`source[i]`, `target[i]`)
//!   with one scalar weight per edge.
//!
//! A freshly built example has exactly one component. Merging a batch
//! (see [`crate::merge`]) concatenates components and shifts indices so that
//! no edge ever spans two components.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::ops::Range;

/// Name of the node set holding audio frames.
pub const FRAMES: &str = "frames";

/// Prefix of edge-set names; view `k` is named `view_k`.
pub const VIEW_PREFIX: &str = "view_";

/// Edge-set name for dilation view `k`.
pub fn view_name(k: usize) -> String {
    format!("{VIEW_PREFIX}{k}")
}

/// Dense row-major `f32` matrix.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Matrix {
    rows: usize,
    cols: usize,
    data: Vec<f32>,
}

impl Matrix {
    /// Wrap row-major data.
    pub fn new(rows: usize, cols: usize, data: Vec<f32>) -> Result<Self> {
        if data.len() != rows * cols {
            return Err(Error::shape(
                "matrix data",
                rows * cols,
                data.len(),
            ));
        }
        Ok(Self { rows, cols, data })
    }

    /// Zero-filled matrix.
    pub fn zeros(rows: usize, cols: usize) -> Self {
        Self {
            rows,
            cols,
            data: vec![0.0; rows * cols],
        }
    }

    /// Build from nested rows; all rows must have equal length.
    pub fn from_rows(rows: &[Vec<f32>]) -> Result<Self> {
        let cols = rows.first().map_or(0, Vec::len);
        let mut data = Vec::with_capacity(rows.len() * cols);
        for (i, row) in rows.iter().enumerate() {
            if row.len() != cols {
                return Err(Error::shape(format!("row {i}"), cols, row.len()));
            }
            data.extend_from_slice(row);
        }
        Ok(Self {
            rows: rows.len(),
            cols,
            data,
        })
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    /// Whether the matrix is `n x n`.
    pub fn is_square(&self) -> bool {
        self.rows == self.cols
    }

    pub fn get(&self, i: usize, j: usize) -> f32 {
        self.data[i * self.cols + j]
    }

    pub fn row(&self, i: usize) -> &[f32] {
        &self.data[i * self.cols..(i + 1) * self.cols]
    }

    /// Raw row-major buffer.
    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }

    pub fn into_vec(self) -> Vec<f32> {
        self.data
    }
}

/// A homogeneous set of nodes with one feature row each.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeSet {
    features: Matrix,
    /// Node count per component.
    sizes: Vec<usize>,
    /// Component id per node.
    owner: Vec<u32>,
}

impl NodeSet {
    /// Single-component node set.
    pub fn from_features(features: Matrix) -> Self {
        let n = features.rows();
        Self {
            features,
            sizes: vec![n],
            owner: vec![0; n],
        }
    }

    pub(crate) fn from_parts(features: Matrix, sizes: Vec<usize>, owner: Vec<u32>) -> Self {
        debug_assert_eq!(sizes.iter().sum::<usize>(), features.rows());
        debug_assert_eq!(owner.len(), features.rows());
        Self {
            features,
            sizes,
            owner,
        }
    }

    /// Total number of nodes.
    pub fn len(&self) -> usize {
        self.features.rows()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn features(&self) -> &Matrix {
        &self.features
    }

    /// Feature dimension F.
    pub fn feature_dim(&self) -> usize {
        self.features.cols()
    }

    pub fn sizes(&self) -> &[usize] {
        &self.sizes
    }

    /// Component (graph) id of every node.
    pub fn owner(&self) -> &[u32] {
        &self.owner
    }

    /// `[start, end)` node range of every component.
    pub fn component_ranges(&self) -> Vec<Range<usize>> {
        let mut start = 0;
        self.sizes
            .iter()
            .map(|&n| {
                let range = start..start + n;
                start += n;
                range
            })
            .collect()
    }
}

/// Directed edges between two endpoints of one node set, with scalar weights.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EdgeSet {
    /// Node set both endpoints index into.
    node_set: String,
    source: Vec<u32>,
    target: Vec<u32>,
    weights: Vec<f32>,
    /// Edge count per component.
    sizes: Vec<usize>,
}

impl EdgeSet {
    /// Single-component edge set.
    pub fn new(
        node_set: impl Into<String>,
        source: Vec<u32>,
        target: Vec<u32>,
        weights: Vec<f32>,
    ) -> Result<Self> {
        if source.len() != target.len() || source.len() != weights.len() {
            return Err(Error::shape(
                "edge set columns",
                format!("{} sources, targets and weights", source.len()),
                format!("{} targets, {} weights", target.len(), weights.len()),
            ));
        }
        let e = source.len();
        Ok(Self {
            node_set: node_set.into(),
            source,
            target,
            weights,
            sizes: vec![e],
        })
    }

    pub(crate) fn from_parts(
        node_set: String,
        source: Vec<u32>,
        target: Vec<u32>,
        weights: Vec<f32>,
        sizes: Vec<usize>,
    ) -> Self {
        Self {
            node_set,
            source,
            target,
            weights,
            sizes,
        }
    }

    pub fn len(&self) -> usize {
        self.source.len()
    }

    pub fn is_empty(&self) -> bool {
        self.source.is_empty()
    }

    pub fn node_set(&self) -> &str {
        &self.node_set
    }

    pub fn source(&self) -> &[u32] {
        &self.source
    }

    pub fn target(&self) -> &[u32] {
        &self.target
    }

    pub fn weights(&self) -> &[f32] {
        &self.weights
    }

    pub fn sizes(&self) -> &[usize] {
        &self.sizes
    }

    /// Iterate over `(source, target, weight)`.
    pub fn iter(&self) -> impl Iterator<Item = (u32, u32, f32)> + '_ {
        self.source
            .iter()
            .zip(&self.target)
            .zip(&self.weights)
            .map(|((&s, &t), &w)| (s, t, w))
    }
}

/// Node sets and edge sets of one or more disjoint graphs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphTensor {
    node_sets: BTreeMap<String, NodeSet>,
    edge_sets: BTreeMap<String, EdgeSet>,
    num_components: usize,
}

impl GraphTensor {
    /// Assemble and validate a graph tensor.
    ///
    /// Every edge set must reference an existing node set, keep its
    /// endpoints in range, and agree on the component count.
    pub fn from_pieces(
        node_sets: BTreeMap<String, NodeSet>,
        edge_sets: BTreeMap<String, EdgeSet>,
    ) -> Result<Self> {
        let num_components = node_sets
            .values()
            .next()
            .map_or(0, |ns| ns.sizes().len());
        let graph = Self {
            node_sets,
            edge_sets,
            num_components,
        };
        graph.validate()?;
        Ok(graph)
    }

    pub(crate) fn from_parts_unchecked(
        node_sets: BTreeMap<String, NodeSet>,
        edge_sets: BTreeMap<String, EdgeSet>,
        num_components: usize,
    ) -> Self {
        Self {
            node_sets,
            edge_sets,
            num_components,
        }
    }

    /// Check endpoint ranges and component bookkeeping.
    pub fn validate(&self) -> Result<()> {
        for (name, ns) in &self.node_sets {
            if ns.sizes().len() != self.num_components {
                return Err(Error::SchemaMismatch(format!(
                    "node set {name} has {} components, graph has {}",
                    ns.sizes().len(),
                    self.num_components
                )));
            }
        }
        for (name, es) in &self.edge_sets {
            let ns = self.node_sets.get(es.node_set()).ok_or_else(|| {
                Error::SchemaMismatch(format!(
                    "edge set {name} references unknown node set {}",
                    es.node_set()
                ))
            })?;
            if es.sizes().len() != self.num_components {
                return Err(Error::SchemaMismatch(format!(
                    "edge set {name} has {} components, graph has {}",
                    es.sizes().len(),
                    self.num_components
                )));
            }
            let size = ns.len();
            if let Some(&bad) = es
                .source()
                .iter()
                .chain(es.target())
                .find(|&&i| i as usize >= size)
            {
                return Err(Error::InvalidIndex {
                    index: bad as usize,
                    size,
                });
            }
        }
        Ok(())
    }

    /// Number of disjoint graphs held.
    pub fn num_components(&self) -> usize {
        self.num_components
    }

    pub fn node_sets(&self) -> &BTreeMap<String, NodeSet> {
        &self.node_sets
    }

    pub fn edge_sets(&self) -> &BTreeMap<String, EdgeSet> {
        &self.edge_sets
    }

    pub fn node_set(&self, name: &str) -> Option<&NodeSet> {
        self.node_sets.get(name)
    }

    pub fn edge_set(&self, name: &str) -> Option<&EdgeSet> {
        self.edge_sets.get(name)
    }

    /// The `frames` node set, if present.
    pub fn frames(&self) -> Option<&NodeSet> {
        self.node_set(FRAMES)
    }

    /// Edge set of dilation view `k`, if present.
    pub fn view(&self, k: usize) -> Option<&EdgeSet> {
        self.edge_sets.get(&view_name(k))
    }

    /// Summary counts.
    pub fn stats(&self) -> GraphStats {
        GraphStats {
            num_components: self.num_components,
            node_counts: self
                .node_sets
                .iter()
                .map(|(k, v)| (k.clone(), v.len()))
                .collect(),
            edge_counts: self
                .edge_sets
                .iter()
                .map(|(k, v)| (k.clone(), v.len()))
                .collect(),
        }
    }
}

/// Node and edge counts of a [`GraphTensor`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphStats {
    pub num_components: usize,
    pub node_counts: BTreeMap<String, usize>,
    pub edge_counts: BTreeMap<String, usize>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tiny() -> GraphTensor {
        let features = Matrix::zeros(3, 2);
        let mut node_sets = BTreeMap::new();
        node_sets.insert(FRAMES.to_string(), NodeSet::from_features(features));
        let mut edge_sets = BTreeMap::new();
        edge_sets.insert(
            view_name(0),
            EdgeSet::new(FRAMES, vec![0, 1], vec![1, 2], vec![1.0, 0.5]).unwrap(),
        );
        GraphTensor::from_pieces(node_sets, edge_sets).unwrap()
    }

    #[test]
    fn test_matrix_from_rows_rejects_ragged() {
        let err = Matrix::from_rows(&[vec![1.0, 2.0], vec![3.0]]).unwrap_err();
        assert!(matches!(err, Error::ShapeMismatch { .. }));
    }

    #[test]
    fn test_matrix_accessors() {
        let m = Matrix::from_rows(&[vec![1.0, 2.0], vec![3.0, 4.0]]).unwrap();
        assert!(m.is_square());
        assert_eq!(m.get(1, 0), 3.0);
        assert_eq!(m.row(0), &[1.0, 2.0]);
    }

    #[test]
    fn test_view_lookup_and_stats() {
        let g = tiny();
        assert_eq!(g.num_components(), 1);
        assert_eq!(g.view(0).unwrap().len(), 2);
        assert!(g.view(1).is_none());

        let stats = g.stats();
        assert_eq!(stats.node_counts[FRAMES], 3);
        assert_eq!(stats.edge_counts["view_0"], 2);
    }

    #[test]
    fn test_from_pieces_rejects_out_of_range_endpoint() {
        let mut node_sets = BTreeMap::new();
        node_sets.insert(FRAMES.to_string(), NodeSet::from_features(Matrix::zeros(2, 1)));
        let mut edge_sets = BTreeMap::new();
        edge_sets.insert(
            view_name(0),
            EdgeSet::new(FRAMES, vec![0], vec![5], vec![1.0]).unwrap(),
        );
        let err = GraphTensor::from_pieces(node_sets, edge_sets).unwrap_err();
        assert_eq!(err, Error::InvalidIndex { index: 5, size: 2 });
    }

    #[test]
    fn test_edge_set_rejects_mismatched_columns() {
        assert!(EdgeSet::new(FRAMES, vec![0, 1], vec![1], vec![1.0, 1.0]).is_err());
    }

    #[test]
    fn test_component_ranges_single() {
        let ns = NodeSet::from_features(Matrix::zeros(4, 1));
        assert_eq!(ns.component_ranges(), vec![0..4]);
        assert_eq!(ns.owner(), &[0, 0, 0, 0]);
    }

    #[test]
    fn test_json_roundtrip() {
        let g = tiny();
        let json = serde_json::to_string(&g).unwrap();
        let back: GraphTensor = serde_json::from_str(&json).unwrap();
        assert_eq!(g, back);
    }
}
