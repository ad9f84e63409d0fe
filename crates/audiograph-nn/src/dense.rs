//! Dense feed-forward block: linear -> ReLU -> dropout -> layer norm.
//!
//! This is the opaque parametrized transform used for messages, next states,
//! edge states and initial encoders. Each block remembers its L2 factor so the
//! model can report a regularization penalty for an external loss.

use candle_core::{DType, ModuleT, Module, Result, Tensor};
use candle_nn::{layer_norm, linear, Dropout, LayerNorm, Linear, VarBuilder};

const LAYER_NORM_EPS: f64 = 1e-3;

/// Shape and regularization of a [`Dense`] block.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DenseSpec {
    pub units: usize,
    pub relu: bool,
    pub dropout: f32,
    pub layer_norm: bool,
    /// L2 factor on kernel and bias (0 = unregularized).
    pub l2: f64,
}

impl DenseSpec {
    /// Plain ReLU layer, no dropout, no normalization, unregularized.
    pub fn relu(units: usize) -> Self {
        Self {
            units,
            relu: true,
            dropout: 0.0,
            layer_norm: false,
            l2: 0.0,
        }
    }

    pub fn with_dropout(mut self, rate: f32) -> Self {
        self.dropout = rate;
        self
    }

    pub fn with_layer_norm(mut self, enabled: bool) -> Self {
        self.layer_norm = enabled;
        self
    }

    pub fn with_l2(mut self, factor: f64) -> Self {
        self.l2 = factor;
        self
    }
}

/// Linear layer with optional ReLU, dropout and layer normalization.
pub struct Dense {
    linear: Linear,
    relu: bool,
    dropout: Option<Dropout>,
    norm: Option<LayerNorm>,
    l2: f64,
    in_dim: usize,
    out_dim: usize,
}

impl Dense {
    /// Create a block mapping `in_dim` to `spec.units`.
    ///
    /// Parameters live under `vb`: `lin.weight`, `lin.bias`, and `norm.*` when
    /// layer normalization is on.
    pub fn new(in_dim: usize, spec: DenseSpec, vb: VarBuilder) -> Result<Self> {
        let linear = linear(in_dim, spec.units, vb.pp("lin"))?;
        let norm = if spec.layer_norm {
            Some(layer_norm(spec.units, LAYER_NORM_EPS, vb.pp("norm"))?)
        } else {
            None
        };
        let dropout = (spec.dropout > 0.0).then(|| Dropout::new(spec.dropout));
        Ok(Self {
            linear,
            relu: spec.relu,
            dropout,
            norm,
            l2: spec.l2,
            in_dim,
            out_dim: spec.units,
        })
    }

    pub fn in_dim(&self) -> usize {
        self.in_dim
    }

    pub fn out_dim(&self) -> usize {
        self.out_dim
    }

    /// `l2 * (||W||^2 + ||b||^2)`, or `None` for unregularized blocks.
    pub fn l2_penalty(&self) -> Result<Option<Tensor>> {
        if self.l2 == 0.0 {
            return Ok(None);
        }
        let mut total = self.linear.weight().sqr()?.sum_all()?;
        if let Some(b) = self.linear.bias() {
            total = (total + b.sqr()?.sum_all()?)?;
        }
        Ok(Some((total * self.l2)?))
    }
}

impl ModuleT for Dense {
    fn forward_t(&self, xs: &Tensor, train: bool) -> Result<Tensor> {
        if xs.dim(1)? != self.in_dim {
            return Err(candle_core::Error::Msg(format!(
                "dense block expects {} input features, got {}",
                self.in_dim,
                xs.dim(1)?
            )));
        }
        let mut h = self.linear.forward(xs)?;
        if self.relu {
            h = h.relu()?;
        }
        if let Some(dropout) = &self.dropout {
            h = dropout.forward_t(&h, train)?;
        }
        if let Some(norm) = &self.norm {
            h = norm.forward(&h)?;
        }
        Ok(h)
    }
}

/// Sum a list of scalar penalties; zero when empty.
pub fn sum_penalties(terms: &[Tensor], device: &candle_core::Device) -> Result<Tensor> {
    if terms.is_empty() {
        return Tensor::zeros((), DType::F32, device);
    }
    Tensor::stack(terms, 0)?.sum_all()
}
