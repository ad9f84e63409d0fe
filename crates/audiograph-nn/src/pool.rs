//! Per-graph pooling of node states.

use crate::config::PoolingOp;
use candle_core::{DType, Result, Tensor};
use std::ops::Range;

/// Reduce `(N, H)` node states to `(G, H)`, one row per component.
///
/// `owner` maps nodes to components and `ranges` gives each component's
/// contiguous node range. Components without nodes pool to a zero row for
/// every operator, including max.
pub fn pool_nodes(op: PoolingOp, states: &Tensor, owner: &Tensor, ranges: &[Range<usize>]) -> Result<Tensor> {
    let (n, h) = states.dims2()?;
    let g = ranges.len();
    let zeros = Tensor::zeros((g, h), DType::F32, states.device())?;
    if n == 0 || g == 0 {
        return Ok(zeros);
    }
    match op {
        PoolingOp::Sum => zeros.index_add(owner, states, 0),
        PoolingOp::Mean => {
            let counts: Vec<f32> = ranges.iter().map(|r| r.len().max(1) as f32).collect();
            let counts = Tensor::from_vec(counts, (g, 1), states.device())?;
            zeros.index_add(owner, states, 0)?.broadcast_div(&counts)
        }
        PoolingOp::Max => {
            let rows = ranges
                .iter()
                .map(|r| {
                    if r.is_empty() {
                        Tensor::zeros((1, h), DType::F32, states.device())
                    } else {
                        states.narrow(0, r.start, r.len())?.max_keepdim(0)
                    }
                })
                .collect::<Result<Vec<_>>>()?;
            Tensor::cat(&rows, 0)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Device;

    fn fixture() -> (Tensor, Tensor, Vec<Range<usize>>) {
        let states = Tensor::new(&[[1f32, -2.0], [3.0, 4.0], [-5.0, 6.0]], &Device::Cpu).unwrap();
        let owner = Tensor::new(&[0u32, 0, 2], &Device::Cpu).unwrap();
        (states, owner, vec![0..2, 2..2, 2..3])
    }

    #[test]
    fn test_sum_pool() {
        let (s, o, r) = fixture();
        let out = pool_nodes(PoolingOp::Sum, &s, &o, &r).unwrap().to_vec2::<f32>().unwrap();
        assert_eq!(out, vec![vec![4.0, 2.0], vec![0.0, 0.0], vec![-5.0, 6.0]]);
    }

    #[test]
    fn test_mean_pool() {
        let (s, o, r) = fixture();
        let out = pool_nodes(PoolingOp::Mean, &s, &o, &r).unwrap().to_vec2::<f32>().unwrap();
        assert_eq!(out, vec![vec![2.0, 1.0], vec![0.0, 0.0], vec![-5.0, 6.0]]);
    }

    #[test]
    fn test_max_pool_empty_component_is_zero() {
        let (s, o, r) = fixture();
        let out = pool_nodes(PoolingOp::Max, &s, &o, &r).unwrap().to_vec2::<f32>().unwrap();
        assert_eq!(out, vec![vec![3.0, 4.0], vec![0.0, 0.0], vec![-5.0, 6.0]]);
    }
}
