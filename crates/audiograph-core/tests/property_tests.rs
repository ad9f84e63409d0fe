//! Property-based tests for graph construction and batching.
//!
//! - Edge extraction matches the positive entries of every adjacency matrix
//! - Merging is associative
//! - Merged graphs never connect nodes of different components

use audiograph_core::{merge_batch, AdjacencyStack, GraphBuilder, GraphTensor, Matrix};
use proptest::prelude::*;

/// Adjacency entries: mostly zero, some positive weights.
fn arb_entry() -> impl Strategy<Value = f32> {
    prop_oneof![3 => Just(0.0f32), 2 => 0.01f32..5.0f32]
}

fn arb_matrix(n: usize) -> impl Strategy<Value = Matrix> {
    prop::collection::vec(arb_entry(), n * n).prop_map(move |data| Matrix::new(n, n, data).unwrap())
}

/// One example with `k` views over 1..=8 frames.
fn arb_example(k: usize) -> impl Strategy<Value = (Matrix, AdjacencyStack)> {
    (1usize..=8).prop_flat_map(move |n| {
        (
            prop::collection::vec(-1.0f32..1.0f32, n * 3)
                .prop_map(move |d| Matrix::new(n, 3, d).unwrap()),
            prop::collection::vec(arb_matrix(n), k).prop_map(AdjacencyStack::new),
        )
    })
}

fn build(example: &(Matrix, AdjacencyStack)) -> GraphTensor {
    GraphBuilder::new().build(&example.0, &example.1).unwrap()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(128))]

    #[test]
    fn edge_count_equals_positive_entries((features, stack) in arb_example(2)) {
        let g = GraphBuilder::with_views(2).build(&features, &stack).unwrap();
        for (k, a) in stack.views().iter().enumerate() {
            let es = g.view(k).unwrap();
            let positives = a.as_slice().iter().filter(|&&w| w > 0.0).count();
            prop_assert_eq!(es.len(), positives);
            for (s, t, w) in es.iter() {
                prop_assert_eq!(w, a.get(s as usize, t as usize));
            }
        }
    }

    #[test]
    fn merge_is_associative(
        e1 in arb_example(2),
        e2 in arb_example(2),
        e3 in arb_example(2),
    ) {
        let (g1, g2, g3) = (build(&e1), build(&e2), build(&e3));

        let nested = merge_batch(&[merge_batch(&[g1.clone(), g2.clone()]).unwrap(), g3.clone()]).unwrap();
        let flat = merge_batch(&[g1, g2, g3]).unwrap();

        prop_assert_eq!(nested.frames().unwrap().len(), flat.frames().unwrap().len());
        prop_assert_eq!(nested.frames().unwrap().owner(), flat.frames().unwrap().owner());
        prop_assert_eq!(nested.edge_sets(), flat.edge_sets());
        prop_assert_eq!(nested, flat);
    }

    #[test]
    fn merged_edges_stay_within_components(
        examples in prop::collection::vec(arb_example(1), 1..6),
    ) {
        let graphs: Vec<_> = examples.iter().map(build).collect();
        let merged = merge_batch(&graphs).unwrap();
        prop_assert!(merged.validate().is_ok());

        let owner = merged.frames().unwrap().owner();
        for (s, t, _) in merged.view(0).unwrap().iter() {
            prop_assert_eq!(owner[s as usize], owner[t as usize]);
        }
        prop_assert_eq!(merged.num_components(), examples.len());
    }
}
