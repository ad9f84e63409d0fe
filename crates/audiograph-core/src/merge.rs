//! Disjoint-union batching of graph tensors.
//!
//! Merging `B` graph tensors produces one tensor whose components are the
//! concatenation of the inputs' components:
//!
//! ```text
//! node ids:   [0 .. N0) [N0 .. N0+N1) ...
//! edge ids:   (s, t) of graph b  ->  (s + off_b, t + off_b)
//! owner ids:  c of graph b       ->  c + comp_off_b
//! ```
//!
//! Because owner ids are shifted by the component offset (not the graph
//! index), merging already-merged tensors is associative.

use crate::error::{Error, Result};
use crate::graph::{EdgeSet, GraphTensor, Matrix, NodeSet};
use std::collections::BTreeMap;

/// Merge a batch into one contiguously indexed graph tensor.
///
/// All inputs must have the same node-set names (with equal feature
/// dimensions) and the same edge-set names.
pub fn merge_batch(graphs: &[GraphTensor]) -> Result<GraphTensor> {
    let first = graphs.first().ok_or(Error::EmptyBatch)?;
    for (b, g) in graphs.iter().enumerate().skip(1) {
        check_schema(first, g, b)?;
    }

    // Per node set: offset of each input graph.
    let mut node_offsets: BTreeMap<&str, Vec<usize>> = BTreeMap::new();
    let mut node_sets = BTreeMap::new();
    for (name, ns0) in first.node_sets() {
        let dim = ns0.feature_dim();
        let total: usize = graphs.iter().map(|g| g.node_sets()[name].len()).sum();
        let mut data = Vec::with_capacity(total * dim);
        let mut sizes = Vec::new();
        let mut owner = Vec::with_capacity(total);
        let mut offsets = Vec::with_capacity(graphs.len());
        let mut node_offset = 0usize;
        let mut comp_offset = 0u32;
        for g in graphs {
            let ns = &g.node_sets()[name];
            offsets.push(node_offset);
            data.extend_from_slice(ns.features().as_slice());
            sizes.extend_from_slice(ns.sizes());
            owner.extend(ns.owner().iter().map(|&c| c + comp_offset));
            node_offset += ns.len();
            comp_offset += g.num_components() as u32;
        }
        let features = Matrix::new(total, dim, data)?;
        node_sets.insert(name.clone(), NodeSet::from_parts(features, sizes, owner));
        node_offsets.insert(name.as_str(), offsets);
    }

    let mut edge_sets = BTreeMap::new();
    for (name, es0) in first.edge_sets() {
        let offsets = &node_offsets[es0.node_set()];
        let total: usize = graphs.iter().map(|g| g.edge_sets()[name].len()).sum();
        let mut source = Vec::with_capacity(total);
        let mut target = Vec::with_capacity(total);
        let mut weights = Vec::with_capacity(total);
        let mut sizes = Vec::new();
        for (g, &off) in graphs.iter().zip(offsets) {
            let es = &g.edge_sets()[name];
            let off = off as u32;
            source.extend(es.source().iter().map(|&s| s + off));
            target.extend(es.target().iter().map(|&t| t + off));
            weights.extend_from_slice(es.weights());
            sizes.extend_from_slice(es.sizes());
        }
        edge_sets.insert(
            name.clone(),
            EdgeSet::from_parts(es0.node_set().to_string(), source, target, weights, sizes),
        );
    }

    let num_components = graphs.iter().map(GraphTensor::num_components).sum();
    Ok(GraphTensor::from_parts_unchecked(
        node_sets,
        edge_sets,
        num_components,
    ))
}

fn check_schema(first: &GraphTensor, other: &GraphTensor, index: usize) -> Result<()> {
    let names = |g: &GraphTensor| g.node_sets().keys().cloned().collect::<Vec<_>>();
    if names(first) != names(other) {
        return Err(Error::SchemaMismatch(format!(
            "graph {index} node sets {:?} differ from {:?}",
            names(other),
            names(first)
        )));
    }
    for (name, ns) in first.node_sets() {
        let dim = other.node_sets()[name].feature_dim();
        if dim != ns.feature_dim() {
            return Err(Error::SchemaMismatch(format!(
                "graph {index} node set {name} has feature dim {dim}, expected {}",
                ns.feature_dim()
            )));
        }
    }
    let edge_names = |g: &GraphTensor| g.edge_sets().keys().cloned().collect::<Vec<_>>();
    if edge_names(first) != edge_names(other) {
        return Err(Error::SchemaMismatch(format!(
            "graph {index} edge sets {:?} differ from {:?}",
            edge_names(other),
            edge_names(first)
        )));
    }
    Ok(())
}
