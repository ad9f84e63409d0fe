//! Message-passing convolution kernels.
//!
//! A kernel turns the sender-side states of an [`Incidence`] into one
//! aggregated message row per receiver:
//!
//! ```text
//! m_r = SUM_{e : receiver(e) = r} MESSAGE(h_sender(e), h_r, e)
//! ```
//!
//! Variants differ only in MESSAGE:
//! - [`UnweightedSumConv`]: `transform([h_s || h_r || e])`
//! - [`WeightedSumConv`]: `w_e * transform(h_s)`
//! - [`DegreeNormalizedConv`]: `w_e * norm_e * transform(h_s)` (GCN-style)
//! - [`AttentionConv`]: `alpha_e * W h_s` with per-receiver softmax (GATv2-style)
//!
//! Aggregation is always a scatter-sum (`index_add`), so results do not
//! depend on edge order. Receivers without incident edges get a zero row, and
//! an empty incidence short-circuits to an all-zero result.

use crate::config::{ConvolutionVariant, DegreeNormalization, ModelConfig, Receiver};
use crate::dense::{Dense, DenseSpec};
use audiograph_core::EdgeSet;
use candle_core::{DType, Device, Module, ModuleT, Result, Tensor, D};
use candle_nn::{init, linear, linear_no_bias, Linear, VarBuilder};

/// Sender -> receiver index buffers for one aggregation.
#[derive(Debug, Clone)]
pub struct Incidence {
    senders: Tensor,
    receivers: Tensor,
    weights: Tensor,
    sender_ids: Vec<u32>,
    receiver_ids: Vec<u32>,
    weight_values: Vec<f32>,
    num_senders: usize,
    num_receivers: usize,
}

impl Incidence {
    /// Wrap host index buffers; `weights` has one entry per pair.
    pub fn new(
        sender_ids: Vec<u32>,
        receiver_ids: Vec<u32>,
        weight_values: Vec<f32>,
        num_senders: usize,
        num_receivers: usize,
        device: &Device,
    ) -> Result<Self> {
        let e = sender_ids.len();
        if receiver_ids.len() != e || weight_values.len() != e {
            return Err(candle_core::Error::Msg(format!(
                "incidence columns disagree: {e} senders, {} receivers, {} weights",
                receiver_ids.len(),
                weight_values.len()
            )));
        }
        let senders = Tensor::from_vec(sender_ids.clone(), e, device)?;
        let receivers = Tensor::from_vec(receiver_ids.clone(), e, device)?;
        let weights = Tensor::from_vec(weight_values.clone(), (e, 1), device)?;
        Ok(Self {
            senders,
            receivers,
            weights,
            sender_ids,
            receiver_ids,
            weight_values,
            num_senders,
            num_receivers,
        })
    }

    /// Incidence of an edge set for the given receiver endpoint.
    ///
    /// - `Source`: target nodes send to source nodes
    /// - `Target`: source nodes send to target nodes
    /// - `Context`: source nodes send to the context of their component
    pub fn from_edge_set(
        edges: &EdgeSet,
        receiver: Receiver,
        owner: &[u32],
        num_components: usize,
        device: &Device,
    ) -> Result<Self> {
        let n = owner.len();
        let (senders, receivers, num_receivers) = match receiver {
            Receiver::Source => (edges.target().to_vec(), edges.source().to_vec(), n),
            Receiver::Target => (edges.source().to_vec(), edges.target().to_vec(), n),
            Receiver::Context => (
                edges.source().to_vec(),
                edges.source().iter().map(|&s| owner[s as usize]).collect(),
                num_components,
            ),
        };
        Self::new(
            senders,
            receivers,
            edges.weights().to_vec(),
            n,
            num_receivers,
            device,
        )
    }

    /// Every node sends to the context of its component with weight 1.
    pub fn node_to_context(owner: &[u32], num_components: usize, device: &Device) -> Result<Self> {
        let n = owner.len();
        Self::new(
            (0..n as u32).collect(),
            owner.to_vec(),
            vec![1.0; n],
            n,
            num_components,
            device,
        )
    }

    pub fn len(&self) -> usize {
        self.sender_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sender_ids.is_empty()
    }

    pub fn senders(&self) -> &Tensor {
        &self.senders
    }

    pub fn receivers(&self) -> &Tensor {
        &self.receivers
    }

    /// Edge weights as an `(E, 1)` column.
    pub fn weights(&self) -> &Tensor {
        &self.weights
    }

    pub fn receiver_ids(&self) -> &[u32] {
        &self.receiver_ids
    }

    pub fn num_receivers(&self) -> usize {
        self.num_receivers
    }

    /// Weighted in-degree of every receiver.
    pub fn receiver_degrees(&self) -> Vec<f32> {
        let mut deg = vec![0.0f32; self.num_receivers];
        for (&r, &w) in self.receiver_ids.iter().zip(&self.weight_values) {
            deg[r as usize] += w;
        }
        deg
    }

    /// Weighted out-degree of every sender.
    pub fn sender_degrees(&self) -> Vec<f32> {
        let mut deg = vec![0.0f32; self.num_senders];
        for (&s, &w) in self.sender_ids.iter().zip(&self.weight_values) {
            deg[s as usize] += w;
        }
        deg
    }
}

/// Inputs to one convolution call.
pub struct ConvInput<'a> {
    pub incidence: &'a Incidence,
    /// Sender-side states, indexed by sender id.
    pub senders: &'a Tensor,
    /// Receiver-side states, indexed by receiver id.
    pub receivers: &'a Tensor,
    /// Per-edge hidden states, row-aligned with the incidence.
    pub edge_states: Option<&'a Tensor>,
}

/// A message computation + order-invariant aggregation.
pub trait Convolution: Send + Sync {
    /// Width of each aggregated message row.
    fn out_dim(&self) -> usize;

    /// One message row per receiver; zero rows for receivers without edges.
    fn convolve(&self, input: &ConvInput<'_>, train: bool) -> Result<Tensor>;

    /// Whether messages read per-edge hidden states.
    fn uses_edge_states(&self) -> bool {
        false
    }

    /// Regularization penalties of owned parameters.
    fn l2_terms(&self) -> Result<Vec<Tensor>> {
        Ok(Vec::new())
    }
}

/// Input widths a kernel is built for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConvDims {
    pub sender: usize,
    pub receiver: usize,
    pub edge: Option<usize>,
}

/// Build the kernel selected by `variant`.
pub fn build_convolution(
    variant: ConvolutionVariant,
    dims: ConvDims,
    config: &ModelConfig,
    vb: VarBuilder,
) -> Result<Box<dyn Convolution>> {
    let spec = DenseSpec::relu(config.message_dim)
        .with_dropout(config.dropout_rate)
        .with_l2(config.l2_reg_factor);
    let conv: Box<dyn Convolution> = match variant {
        ConvolutionVariant::UnweightedSum => Box::new(UnweightedSumConv::new(
            dims,
            config.combine_receiver_state,
            spec,
            vb,
        )?),
        ConvolutionVariant::WeightedSum => Box::new(WeightedSumConv::new(dims.sender, spec, vb)?),
        ConvolutionVariant::DegreeNormalized => Box::new(DegreeNormalizedConv::new(
            dims.sender,
            config.degree_normalization,
            spec,
            vb,
        )?),
        ConvolutionVariant::Attention => Box::new(AttentionConv::new(
            dims,
            config.attention_heads,
            config.per_head_channels,
            0.2,
            vb,
        )?),
    };
    Ok(conv)
}

fn zero_messages(input: &ConvInput<'_>, dim: usize) -> Result<Tensor> {
    Tensor::zeros(
        (input.incidence.num_receivers(), dim),
        DType::F32,
        input.senders.device(),
    )
}

/// Scatter-sum `(E, d)` edge messages onto `(R, d)` receivers.
fn scatter_sum(input: &ConvInput<'_>, messages: &Tensor) -> Result<Tensor> {
    zero_messages(input, messages.dim(1)?)?.index_add(input.incidence.receivers(), messages, 0)
}

/// Plain sum of transformed `[sender || receiver || edge]` rows.
pub struct UnweightedSumConv {
    transform: Dense,
    combine_receiver: bool,
    edge_dim: Option<usize>,
}

impl UnweightedSumConv {
    pub fn new(dims: ConvDims, combine_receiver: bool, spec: DenseSpec, vb: VarBuilder) -> Result<Self> {
        let mut in_dim = dims.sender;
        if combine_receiver {
            in_dim += dims.receiver;
        }
        if let Some(e) = dims.edge {
            in_dim += e;
        }
        Ok(Self {
            transform: Dense::new(in_dim, spec, vb.pp("message"))?,
            combine_receiver,
            edge_dim: dims.edge,
        })
    }
}

impl Convolution for UnweightedSumConv {
    fn out_dim(&self) -> usize {
        self.transform.out_dim()
    }

    fn convolve(&self, input: &ConvInput<'_>, train: bool) -> Result<Tensor> {
        let inc = input.incidence;
        if inc.is_empty() {
            return zero_messages(input, self.out_dim());
        }
        let mut parts = vec![input.senders.index_select(inc.senders(), 0)?];
        if self.combine_receiver {
            parts.push(input.receivers.index_select(inc.receivers(), 0)?);
        }
        if self.edge_dim.is_some() {
            let edges = input.edge_states.ok_or_else(|| {
                candle_core::Error::Msg("edge states required by this convolution".into())
            })?;
            parts.push(edges.clone());
        }
        let messages = self.transform.forward_t(&Tensor::cat(&parts, 1)?, train)?;
        scatter_sum(input, &messages)
    }

    fn uses_edge_states(&self) -> bool {
        self.edge_dim.is_some()
    }

    fn l2_terms(&self) -> Result<Vec<Tensor>> {
        Ok(self.transform.l2_penalty()?.into_iter().collect())
    }
}

/// Sum of `w_e * transform(h_sender)`.
pub struct WeightedSumConv {
    transform: Dense,
}

impl WeightedSumConv {
    pub fn new(sender_dim: usize, spec: DenseSpec, vb: VarBuilder) -> Result<Self> {
        Ok(Self {
            transform: Dense::new(sender_dim, spec, vb.pp("message"))?,
        })
    }
}

impl Convolution for WeightedSumConv {
    fn out_dim(&self) -> usize {
        self.transform.out_dim()
    }

    fn convolve(&self, input: &ConvInput<'_>, train: bool) -> Result<Tensor> {
        let inc = input.incidence;
        if inc.is_empty() {
            return zero_messages(input, self.out_dim());
        }
        let xs = input.senders.index_select(inc.senders(), 0)?;
        let messages = self
            .transform
            .forward_t(&xs, train)?
            .broadcast_mul(inc.weights())?;
        scatter_sum(input, &messages)
    }

    fn l2_terms(&self) -> Result<Vec<Tensor>> {
        Ok(self.transform.l2_penalty()?.into_iter().collect())
    }
}

/// GCN-style degree-normalized sum.
///
/// Degrees are weighted (sum of incident edge weights), so with unit weights
/// they are plain edge counts. A non-positive degree yields a factor of 0:
/// the message is exactly zero rather than NaN or infinite.
pub struct DegreeNormalizedConv {
    transform: Dense,
    normalization: DegreeNormalization,
}

impl DegreeNormalizedConv {
    pub fn new(
        sender_dim: usize,
        normalization: DegreeNormalization,
        spec: DenseSpec,
        vb: VarBuilder,
    ) -> Result<Self> {
        Ok(Self {
            transform: Dense::new(sender_dim, spec, vb.pp("message"))?,
            normalization,
        })
    }

    /// Per-edge coefficient `w_e * norm_e` as an `(E, 1)` column.
    pub fn coefficients(&self, inc: &Incidence, device: &Device) -> Result<Tensor> {
        let deg_r = inc.receiver_degrees();
        let deg_s = match self.normalization {
            DegreeNormalization::In => Vec::new(),
            DegreeNormalization::Symmetric => inc.sender_degrees(),
        };
        let coeffs: Vec<f32> = inc
            .sender_ids
            .iter()
            .zip(&inc.receiver_ids)
            .zip(&inc.weight_values)
            .map(|((&s, &r), &w)| {
                let norm = match self.normalization {
                    DegreeNormalization::In => inverse(deg_r[r as usize]),
                    DegreeNormalization::Symmetric => {
                        inverse_sqrt(deg_s[s as usize] * deg_r[r as usize])
                    }
                };
                w * norm
            })
            .collect();
        Tensor::from_vec(coeffs, (inc.len(), 1), device)
    }
}

fn inverse(d: f32) -> f32 {
    if d > 0.0 {
        1.0 / d
    } else {
        0.0
    }
}

fn inverse_sqrt(d: f32) -> f32 {
    if d > 0.0 {
        1.0 / d.sqrt()
    } else {
        0.0
    }
}

impl Convolution for DegreeNormalizedConv {
    fn out_dim(&self) -> usize {
        self.transform.out_dim()
    }

    fn convolve(&self, input: &ConvInput<'_>, train: bool) -> Result<Tensor> {
        let inc = input.incidence;
        if inc.is_empty() {
            return zero_messages(input, self.out_dim());
        }
        let xs = input.senders.index_select(inc.senders(), 0)?;
        let coeffs = self.coefficients(inc, xs.device())?;
        let messages = self.transform.forward_t(&xs, train)?.broadcast_mul(&coeffs)?;
        scatter_sum(input, &messages)
    }

    fn l2_terms(&self) -> Result<Vec<Tensor>> {
        Ok(self.transform.l2_penalty()?.into_iter().collect())
    }
}

/// Multi-head attention convolution (GATv2 scoring).
///
/// For head `k` and edge `e = (s -> r)`:
///
/// ```text
/// z_e      = LeakyReLU(W_s h_s + W_r h_r [+ W_e x_e])
/// logit_ek = a_k . z_e[k]
/// alpha_ek = softmax over edges into r of logit_ek
/// m_r[k]   = SUM_e alpha_ek * (W_s h_s)[k]
/// ```
///
/// Heads are concatenated, giving `heads * channels` output columns.
///
/// # Reference
///
/// Brody et al., "How Attentive are Graph Attention Networks?", ICLR 2022.
pub struct AttentionConv {
    w_sender: Linear,
    w_receiver: Linear,
    w_edge: Option<Linear>,
    attn: Tensor,
    heads: usize,
    channels: usize,
    negative_slope: f64,
}

impl AttentionConv {
    pub fn new(
        dims: ConvDims,
        heads: usize,
        channels: usize,
        negative_slope: f64,
        vb: VarBuilder,
    ) -> Result<Self> {
        let out = heads * channels;
        let w_sender = linear(dims.sender, out, vb.pp("w_sender"))?;
        let w_receiver = linear_no_bias(dims.receiver, out, vb.pp("w_receiver"))?;
        let w_edge = dims
            .edge
            .map(|e| linear_no_bias(e, out, vb.pp("w_edge")))
            .transpose()?;
        let attn = vb.get_with_hints((1, heads, channels), "attn", init::DEFAULT_KAIMING_NORMAL)?;
        Ok(Self {
            w_sender,
            w_receiver,
            w_edge,
            attn,
            heads,
            channels,
            negative_slope,
        })
    }

    /// Projected sender values `(E, heads*channels)` and attention weights `(E, heads)`.
    pub fn attention(&self, input: &ConvInput<'_>) -> Result<(Tensor, Tensor)> {
        let inc = input.incidence;
        let e = inc.len();
        let xs = input.senders.index_select(inc.senders(), 0)?;
        let xr = input.receivers.index_select(inc.receivers(), 0)?;
        let values = self.w_sender.forward(&xs)?;
        let mut z = (&values + self.w_receiver.forward(&xr)?)?;
        if let Some(w_edge) = &self.w_edge {
            let edges = input.edge_states.ok_or_else(|| {
                candle_core::Error::Msg("edge states required by attention".into())
            })?;
            z = (z + w_edge.forward(edges)?)?;
        }
        let z = leaky_relu(&z, self.negative_slope)?.reshape((e, self.heads, self.channels))?;
        let logits = z.broadcast_mul(&self.attn)?.sum(D::Minus1)?;
        let alpha = segment_softmax(&logits, inc)?;
        Ok((values, alpha))
    }
}

impl Convolution for AttentionConv {
    fn out_dim(&self) -> usize {
        self.heads * self.channels
    }

    fn convolve(&self, input: &ConvInput<'_>, _train: bool) -> Result<Tensor> {
        let inc = input.incidence;
        if inc.is_empty() {
            return zero_messages(input, self.out_dim());
        }
        let e = inc.len();
        let (values, alpha) = self.attention(input)?;
        let weighted = values
            .reshape((e, self.heads, self.channels))?
            .broadcast_mul(&alpha.unsqueeze(2)?)?
            .reshape((e, self.out_dim()))?;
        scatter_sum(input, &weighted)
    }

    fn uses_edge_states(&self) -> bool {
        self.w_edge.is_some()
    }
}

fn leaky_relu(xs: &Tensor, negative_slope: f64) -> Result<Tensor> {
    let neg = (xs.neg()?.relu()? * negative_slope)?;
    xs.relu()? - neg
}

/// Softmax of `(E, H)` logits over the edges sharing a receiver.
///
/// Logits are shifted by their per-receiver maximum (a constant, so the
/// result is unchanged) before exponentiation. A receiver with a single
/// incident edge gets weight exactly 1.
pub fn segment_softmax(logits: &Tensor, inc: &Incidence) -> Result<Tensor> {
    let (e, h) = logits.dims2()?;
    let host = logits.to_vec2::<f32>()?;
    let mut max = vec![f32::NEG_INFINITY; inc.num_receivers() * h];
    for (row, &r) in host.iter().zip(inc.receiver_ids()) {
        let slot = &mut max[r as usize * h..(r as usize + 1) * h];
        for (m, &x) in slot.iter_mut().zip(row) {
            *m = m.max(x);
        }
    }
    let shift: Vec<f32> = inc
        .receiver_ids()
        .iter()
        .flat_map(|&r| max[r as usize * h..(r as usize + 1) * h].iter().copied())
        .collect();
    let shift = Tensor::from_vec(shift, (e, h), logits.device())?;
    let exp = (logits - shift)?.exp()?;
    let denom = Tensor::zeros((inc.num_receivers(), h), DType::F32, logits.device())?
        .index_add(inc.receivers(), &exp, 0)?
        .index_select(inc.receivers(), 0)?;
    exp / denom
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_nn::VarMap;

    fn vb(varmap: &VarMap) -> VarBuilder<'_> {
        VarBuilder::from_varmap(varmap, DType::F32, &Device::Cpu)
    }

    /// Path 0 -> 1 -> 2 plus an isolated node 3, messages flowing to targets.
    fn path_incidence() -> Incidence {
        Incidence::new(vec![0, 1], vec![1, 2], vec![1.0, 1.0], 4, 4, &Device::Cpu).unwrap()
    }

    fn states(n: usize, d: usize) -> Tensor {
        Tensor::randn(0f32, 1f32, (n, d), &Device::Cpu).unwrap()
    }

    fn row_is_zero(t: &Tensor, i: usize) -> bool {
        t.get(i).unwrap().to_vec1::<f32>().unwrap().iter().all(|&v| v == 0.0)
    }

    #[test]
    fn test_incidence_receiver_endpoints() {
        let es = EdgeSet::new("frames", vec![0, 1], vec![1, 2], vec![0.5, 2.0]).unwrap();
        let owner = [0, 0, 0];

        let src = Incidence::from_edge_set(&es, Receiver::Source, &owner, 1, &Device::Cpu).unwrap();
        assert_eq!(src.receiver_ids(), &[0, 1]);
        let tgt = Incidence::from_edge_set(&es, Receiver::Target, &owner, 1, &Device::Cpu).unwrap();
        assert_eq!(tgt.receiver_ids(), &[1, 2]);
        assert_eq!(tgt.receiver_degrees(), vec![0.0, 0.5, 2.0]);
        let ctx = Incidence::from_edge_set(&es, Receiver::Context, &owner, 1, &Device::Cpu).unwrap();
        assert_eq!(ctx.receiver_ids(), &[0, 0]);
        assert_eq!(ctx.num_receivers(), 1);
    }

    #[test]
    fn test_unweighted_sum_isolated_receiver_is_zero() {
        let varmap = VarMap::new();
        let dims = ConvDims { sender: 4, receiver: 4, edge: None };
        let conv = UnweightedSumConv::new(dims, true, DenseSpec::relu(8), vb(&varmap)).unwrap();

        let inc = path_incidence();
        let h = states(4, 4);
        let input = ConvInput { incidence: &inc, senders: &h, receivers: &h, edge_states: None };
        let out = conv.convolve(&input, false).unwrap();
        assert_eq!(out.dims(), &[4, 8]);
        assert!(row_is_zero(&out, 0));
        assert!(row_is_zero(&out, 3));
    }

    #[test]
    fn test_sum_is_edge_order_invariant() {
        let varmap = VarMap::new();
        let conv = WeightedSumConv::new(3, DenseSpec::relu(5), vb(&varmap)).unwrap();
        let h = states(3, 3);

        let a = Incidence::new(vec![0, 1, 2], vec![2, 2, 0], vec![1.0, 0.5, 2.0], 3, 3, &Device::Cpu).unwrap();
        let b = Incidence::new(vec![2, 1, 0], vec![0, 2, 2], vec![2.0, 0.5, 1.0], 3, 3, &Device::Cpu).unwrap();
        let out_a = conv
            .convolve(&ConvInput { incidence: &a, senders: &h, receivers: &h, edge_states: None }, false)
            .unwrap()
            .to_vec2::<f32>()
            .unwrap();
        let out_b = conv
            .convolve(&ConvInput { incidence: &b, senders: &h, receivers: &h, edge_states: None }, false)
            .unwrap()
            .to_vec2::<f32>()
            .unwrap();
        for (ra, rb) in out_a.iter().zip(&out_b) {
            for (x, y) in ra.iter().zip(rb) {
                assert!((x - y).abs() < 1e-5);
            }
        }
    }

    #[test]
    fn test_weighted_sum_scales_by_weight() {
        let varmap = VarMap::new();
        let conv = WeightedSumConv::new(2, DenseSpec::relu(3), vb(&varmap)).unwrap();
        let h = Tensor::ones((2, 2), DType::F32, &Device::Cpu).unwrap();

        let unit = Incidence::new(vec![0], vec![1], vec![1.0], 2, 2, &Device::Cpu).unwrap();
        let triple = Incidence::new(vec![0], vec![1], vec![3.0], 2, 2, &Device::Cpu).unwrap();
        let m1 = conv
            .convolve(&ConvInput { incidence: &unit, senders: &h, receivers: &h, edge_states: None }, false)
            .unwrap()
            .get(1)
            .unwrap()
            .to_vec1::<f32>()
            .unwrap();
        let m3 = conv
            .convolve(&ConvInput { incidence: &triple, senders: &h, receivers: &h, edge_states: None }, false)
            .unwrap()
            .get(1)
            .unwrap()
            .to_vec1::<f32>()
            .unwrap();
        for (a, b) in m1.iter().zip(&m3) {
            assert!((3.0 * a - b).abs() < 1e-5);
        }
    }

    #[test]
    fn test_degree_normalized_zero_degree_is_exact_zero() {
        for normalization in [DegreeNormalization::In, DegreeNormalization::Symmetric] {
            let varmap = VarMap::new();
            let conv = DegreeNormalizedConv::new(4, normalization, DenseSpec::relu(6), vb(&varmap)).unwrap();
            let inc = path_incidence();
            let h = (states(4, 4) * 1e30).unwrap();
            let input = ConvInput { incidence: &inc, senders: &h, receivers: &h, edge_states: None };
            let out = conv.convolve(&input, false).unwrap();
            assert!(row_is_zero(&out, 0));
            assert!(row_is_zero(&out, 3));
        }
    }

    #[test]
    fn test_degree_normalized_zero_weight_edges_never_nan() {
        let varmap = VarMap::new();
        let conv = DegreeNormalizedConv::new(
            2,
            DegreeNormalization::Symmetric,
            DenseSpec::relu(2),
            vb(&varmap),
        )
        .unwrap();
        let inc = Incidence::new(vec![0, 1], vec![1, 0], vec![0.0, 0.0], 2, 2, &Device::Cpu).unwrap();
        let coeffs = conv.coefficients(&inc, &Device::Cpu).unwrap();
        assert_eq!(coeffs.flatten_all().unwrap().to_vec1::<f32>().unwrap(), vec![0.0, 0.0]);
    }

    #[test]
    fn test_degree_normalized_in_coefficients() {
        let varmap = VarMap::new();
        let conv = DegreeNormalizedConv::new(1, DegreeNormalization::In, DenseSpec::relu(1), vb(&varmap)).unwrap();
        // Receiver 2 has two incoming edges, receiver 1 one.
        let inc = Incidence::new(vec![0, 1, 0], vec![2, 2, 1], vec![1.0, 1.0, 1.0], 3, 3, &Device::Cpu).unwrap();
        let coeffs = conv.coefficients(&inc, &Device::Cpu).unwrap();
        assert_eq!(coeffs.flatten_all().unwrap().to_vec1::<f32>().unwrap(), vec![0.5, 0.5, 1.0]);
    }

    #[test]
    fn test_segment_softmax_single_edge_weight_is_one() {
        let inc = Incidence::new(vec![0, 1, 2], vec![1, 2, 2], vec![1.0; 3], 3, 3, &Device::Cpu).unwrap();
        let logits = Tensor::new(&[[1234.5f32, -80.0], [3.0, 0.0], [1.0, 0.0]], &Device::Cpu).unwrap();
        let alpha = segment_softmax(&logits, &inc).unwrap().to_vec2::<f32>().unwrap();
        assert_eq!(alpha[0], vec![1.0, 1.0]);
        // Receiver 2 splits its mass across two edges.
        assert!((alpha[1][0] + alpha[2][0] - 1.0).abs() < 1e-6);
        assert!((alpha[1][1] - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_attention_single_incident_edge() {
        let varmap = VarMap::new();
        let dims = ConvDims { sender: 4, receiver: 4, edge: None };
        let conv = AttentionConv::new(dims, 3, 2, 0.2, vb(&varmap)).unwrap();
        let inc = path_incidence();
        let h = (states(4, 4) * 50.0).unwrap();
        let input = ConvInput { incidence: &inc, senders: &h, receivers: &h, edge_states: None };

        let (_, alpha) = conv.attention(&input).unwrap();
        for row in alpha.to_vec2::<f32>().unwrap() {
            assert_eq!(row, vec![1.0, 1.0, 1.0]);
        }
        let out = conv.convolve(&input, false).unwrap();
        assert_eq!(out.dims(), &[4, 6]);
        assert!(row_is_zero(&out, 0));
    }

    #[test]
    fn test_attention_into_context() {
        let varmap = VarMap::new();
        let dims = ConvDims { sender: 3, receiver: 5, edge: None };
        let conv = AttentionConv::new(dims, 2, 4, 0.2, vb(&varmap)).unwrap();
        let inc = Incidence::node_to_context(&[0, 0, 1, 1, 1], 2, &Device::Cpu).unwrap();
        let nodes = states(5, 3);
        let context = Tensor::zeros((2, 5), DType::F32, &Device::Cpu).unwrap();
        let input = ConvInput { incidence: &inc, senders: &nodes, receivers: &context, edge_states: None };

        let (_, alpha) = conv.attention(&input).unwrap();
        let alpha = alpha.to_vec2::<f32>().unwrap();
        for head in 0..2 {
            let g0: f32 = alpha[..2].iter().map(|r| r[head]).sum();
            let g1: f32 = alpha[2..].iter().map(|r| r[head]).sum();
            assert!((g0 - 1.0).abs() < 1e-5);
            assert!((g1 - 1.0).abs() < 1e-5);
        }
        assert_eq!(conv.convolve(&input, false).unwrap().dims(), &[2, 8]);
    }

    #[test]
    fn test_empty_incidence_gives_zero_messages() {
        let varmap = VarMap::new();
        let config = ModelConfig::default().with_dims(4, 6, 4);
        let dims = ConvDims { sender: 4, receiver: 4, edge: None };
        let inc = Incidence::new(vec![], vec![], vec![], 3, 3, &Device::Cpu).unwrap();
        let h = states(3, 4);
        for (i, variant) in [
            ConvolutionVariant::UnweightedSum,
            ConvolutionVariant::WeightedSum,
            ConvolutionVariant::DegreeNormalized,
            ConvolutionVariant::Attention,
        ]
        .into_iter()
        .enumerate()
        {
            let conv = build_convolution(variant, dims, &config, vb(&varmap).pp(format!("c{i}"))).unwrap();
            let input = ConvInput { incidence: &inc, senders: &h, receivers: &h, edge_states: None };
            let out = conv.convolve(&input, false).unwrap();
            assert_eq!(out.dim(0).unwrap(), 3);
            for r in 0..3 {
                assert!(row_is_zero(&out, r));
            }
        }
    }
}
