//! Hidden states and device-side graph structure for one forward pass.

use crate::config::Receiver;
use crate::conv::Incidence;
use crate::error::{Error, Result};
use audiograph_core::{view_name, GraphTensor, FRAMES};
use candle_core::{Device, Tensor};
use std::collections::BTreeMap;
use std::ops::Range;

/// Hidden states of every entity after some number of rounds.
///
/// Rounds never mutate a state in place: each produces a new value from the
/// previous one, so every update reads only pre-round states.
#[derive(Debug, Clone)]
pub struct GraphState {
    nodes: Tensor,
    edges: BTreeMap<usize, Tensor>,
    context: Option<Tensor>,
}

impl GraphState {
    pub fn new(nodes: Tensor) -> Self {
        Self {
            nodes,
            edges: BTreeMap::new(),
            context: None,
        }
    }

    /// Frame hidden states `(N, H)`.
    pub fn nodes(&self) -> &Tensor {
        &self.nodes
    }

    /// Hidden states `(E_k, D_e)` of view `k`, if edge states are enabled.
    pub fn edge(&self, view: usize) -> Option<&Tensor> {
        self.edges.get(&view)
    }

    pub fn edges(&self) -> &BTreeMap<usize, Tensor> {
        &self.edges
    }

    /// Per-graph context states `(G, H_c)`, if the model carries one.
    pub fn context(&self) -> Option<&Tensor> {
        self.context.as_ref()
    }

    pub fn with_nodes(mut self, nodes: Tensor) -> Self {
        self.nodes = nodes;
        self
    }

    pub fn with_edge(mut self, view: usize, states: Tensor) -> Self {
        self.edges.insert(view, states);
        self
    }

    pub fn with_context(mut self, context: Tensor) -> Self {
        self.context = Some(context);
        self
    }
}

/// Index buffers of one view, uploaded once per forward pass.
#[derive(Debug, Clone)]
pub struct ViewInputs {
    pub source: Tensor,
    pub target: Tensor,
    /// Incidence for the configured receiver endpoint.
    pub incidence: Incidence,
    pub num_edges: usize,
}

/// Device-side structure of a (possibly merged) graph.
#[derive(Debug, Clone)]
pub struct GraphInputs {
    features: Tensor,
    owner: Tensor,
    ranges: Vec<Range<usize>>,
    views: Vec<ViewInputs>,
    membership: Incidence,
    num_components: usize,
}

impl GraphInputs {
    /// Upload frame features, component ownership, and the first
    /// `num_views` views.
    ///
    /// Fails with [`Error::MissingView`] when a view the schedule visits is
    /// absent; extra views are ignored.
    pub fn new(
        graph: &GraphTensor,
        num_views: usize,
        receiver: Receiver,
        device: &Device,
    ) -> Result<Self> {
        let frames = graph
            .frames()
            .ok_or_else(|| Error::InvalidNodeSet(format!("graph has no `{FRAMES}` node set")))?;
        let n = frames.len();
        let g = graph.num_components();
        let features = Tensor::from_vec(
            frames.features().as_slice().to_vec(),
            (n, frames.feature_dim()),
            device,
        )?;
        let owner_ids = frames.owner();
        let owner = Tensor::from_vec(owner_ids.to_vec(), n, device)?;

        let mut views = Vec::with_capacity(num_views);
        for k in 0..num_views {
            let edges = graph
                .view(k)
                .ok_or_else(|| Error::MissingView(view_name(k)))?;
            if edges.node_set() != FRAMES {
                return Err(Error::InvalidNodeSet(format!(
                    "{} connects `{}`, expected `{FRAMES}`",
                    view_name(k),
                    edges.node_set()
                )));
            }
            views.push(ViewInputs {
                source: Tensor::from_vec(edges.source().to_vec(), edges.len(), device)?,
                target: Tensor::from_vec(edges.target().to_vec(), edges.len(), device)?,
                incidence: Incidence::from_edge_set(edges, receiver, owner_ids, g, device)?,
                num_edges: edges.len(),
            });
        }

        Ok(Self {
            features,
            owner,
            ranges: frames.component_ranges(),
            views,
            membership: Incidence::node_to_context(owner_ids, g, device)?,
            num_components: g,
        })
    }

    /// Raw frame features `(N, F)`.
    pub fn features(&self) -> &Tensor {
        &self.features
    }

    /// Component id per node, as a `u32` index tensor.
    pub fn owner(&self) -> &Tensor {
        &self.owner
    }

    pub fn ranges(&self) -> &[Range<usize>] {
        &self.ranges
    }

    pub fn num_nodes(&self) -> usize {
        self.ranges.last().map_or(0, |r| r.end)
    }

    pub fn num_components(&self) -> usize {
        self.num_components
    }

    pub fn num_views(&self) -> usize {
        self.views.len()
    }

    pub fn view(&self, k: usize) -> Result<&ViewInputs> {
        self.views
            .get(k)
            .ok_or_else(|| Error::MissingView(view_name(k)))
    }

    /// Node-to-context incidence (every node sends to its own graph).
    pub fn membership(&self) -> &Incidence {
        &self.membership
    }

    pub fn device(&self) -> &Device {
        self.features.device()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use audiograph_core::{dilated_path_stack, merge_batch, GraphBuilder, Matrix};

    fn graph(n: usize) -> GraphTensor {
        GraphBuilder::new()
            .build(&Matrix::zeros(n, 3), &dilated_path_stack(n, &[1, 2]))
            .unwrap()
    }

    #[test]
    fn test_inputs_for_merged_batch() {
        let merged = merge_batch(&[graph(3), graph(4)]).unwrap();
        let inputs = GraphInputs::new(&merged, 2, Receiver::Target, &Device::Cpu).unwrap();
        assert_eq!(inputs.num_nodes(), 7);
        assert_eq!(inputs.num_components(), 2);
        assert_eq!(inputs.ranges(), &[0..3, 3..7]);
        assert_eq!(inputs.owner().to_vec1::<u32>().unwrap(), vec![0, 0, 0, 1, 1, 1, 1]);
        assert_eq!(inputs.view(0).unwrap().num_edges, 2 * 2 + 2 * 3);
        assert_eq!(inputs.membership().num_receivers(), 2);
    }

    #[test]
    fn test_missing_view_reported() {
        let g = GraphBuilder::new()
            .build(&Matrix::zeros(3, 3), &dilated_path_stack(3, &[1]))
            .unwrap();
        let err = GraphInputs::new(&g, 2, Receiver::Source, &Device::Cpu).unwrap_err();
        assert!(matches!(err, Error::MissingView(name) if name == "view_1"));
    }

    #[test]
    fn test_state_updates_are_new_values() {
        let a = Tensor::zeros((2, 2), candle_core::DType::F32, &Device::Cpu).unwrap();
        let b = Tensor::ones((2, 2), candle_core::DType::F32, &Device::Cpu).unwrap();
        let before = GraphState::new(a);
        let after = before.clone().with_nodes(b).with_context(
            Tensor::zeros((1, 2), candle_core::DType::F32, &Device::Cpu).unwrap(),
        );
        assert_eq!(before.nodes().sum_all().unwrap().to_scalar::<f32>().unwrap(), 0.0);
        assert_eq!(after.nodes().sum_all().unwrap().to_scalar::<f32>().unwrap(), 4.0);
        assert!(before.context().is_none());
        assert!(after.context().is_some());
    }
}
