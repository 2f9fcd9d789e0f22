//! End-to-end behavior of the library nodes on small graphs.

use pulldag::error::{CloseError, TypeFunctionError};
use pulldag::{BufferHandle, Graph};
use pulldag_nodes::{
    Array, Cholesky, Concatenation, McMode, MonteCarlo, NormalizeCorrelatedVars, Product, Sum,
    View,
};

fn assert_close(actual: &[f64], expected: &[f64]) {
    assert_eq!(actual.len(), expected.len());
    for (a, e) in actual.iter().zip(expected) {
        assert!((a - e).abs() < 1e-12, "got {actual:?}, expected {expected:?}");
    }
}

#[test]
fn sum_and_product_reduce_elementwise() {
    let graph = Graph::new("arith");
    let (a, _) = Array::build(&graph, "a", vec![1.0, 2.0, 3.0]).unwrap();
    let (b, _) = Array::build(&graph, "b", vec![10.0, 20.0, 30.0]).unwrap();
    let sum = Sum::build(&graph, "sum").unwrap();
    let product = Product::build(&graph, "product").unwrap();
    (a.output(0), b.output(0)) >> sum;
    (a.output(0), b.output(0)) >> product;
    graph.close().unwrap();

    assert_close(&sum.output(0).data().unwrap().f64(), &[11.0, 22.0, 33.0]);
    assert_close(
        &product.output(0).data().unwrap().f64(),
        &[10.0, 40.0, 90.0],
    );
}

#[test]
fn sum_recomputes_after_source_update() {
    let graph = Graph::new("update");
    let (a, handle) = Array::build(&graph, "a", vec![1.0, 1.0]).unwrap();
    let (b, _) = Array::build(&graph, "b", vec![2.0, 2.0]).unwrap();
    let sum = Sum::build(&graph, "sum").unwrap();
    (a.output(0), b.output(0)) >> sum;
    graph.close().unwrap();
    assert_close(&sum.output(0).data().unwrap().f64(), &[3.0, 3.0]);

    handle.set(&graph, &[5.0, 7.0]);
    assert!(sum.is_tainted());
    assert_close(&sum.output(0).data().unwrap().f64(), &[7.0, 9.0]);
}

#[test]
fn mixed_dtypes_fail_the_close() {
    let graph = Graph::new("mixed");
    let (a, _) = Array::build(&graph, "a", vec![1.0, 2.0]).unwrap();
    let (b, _) = Array::build_i32(&graph, "b", vec![1, 2]).unwrap();
    let sum = Sum::build(&graph, "sum").unwrap();
    (a.output(0), b.output(0)) >> sum;
    let err = graph.close().unwrap_err();
    assert!(matches!(
        err,
        CloseError::Type(TypeFunctionError::Dtype { .. })
    ));
    assert!(!graph.is_closed());
}

#[test]
fn concatenation_tracks_offsets() {
    let graph = Graph::new("concat");
    let (a, _) = Array::build(&graph, "a", vec![1.0, 2.0, 3.0]).unwrap();
    let (b, _) = Array::build(&graph, "b", vec![4.0, 5.0, 6.0, 7.0, 8.0]).unwrap();
    let (c, _) = Array::build(&graph, "c", vec![9.0, 10.0]).unwrap();
    let (concat, offsets) = Concatenation::build(&graph, "concat").unwrap();
    (a.output(0), b.output(0), c.output(0)) >> concat;
    graph.close().unwrap();

    assert_eq!(offsets.get(), vec![0, 3, 8]);
    assert_close(
        &concat.output(0).data().unwrap().f64(),
        &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0, 10.0],
    );
}

#[test]
fn view_shares_the_upstream_buffer() {
    let graph = Graph::new("view");
    let (a, handle) = Array::build(&graph, "a", vec![1.0, 2.0]).unwrap();
    let view = View::build(&graph, "view").unwrap();
    a.output(0) >> view;
    graph.close().unwrap();

    let viewed = view.output(0).data().unwrap();
    let upstream = a.output(0).buffer().unwrap();
    assert!(BufferHandle::same_buffer(&viewed, &upstream));
    assert_close(&viewed.f64(), &[1.0, 2.0]);

    handle.set(&graph, &[8.0, 9.0]);
    assert!(view.is_tainted());
    assert_close(&view.output(0).data().unwrap().f64(), &[8.0, 9.0]);
}

#[test]
fn cholesky_factorizes_a_square_matrix() {
    let graph = Graph::new("chol");
    let (v, _) = Array::build_matrix(&graph, "v", vec![4.0, 2.0, 2.0, 10.0], &[2, 2]).unwrap();
    let chol = Cholesky::build(&graph, "chol").unwrap();
    v.output(0) >> chol;
    graph.close().unwrap();
    // V = L Lt with L = [[2, 0], [1, 3]].
    assert_close(&chol.output(0).data().unwrap().f64(), &[2.0, 0.0, 1.0, 3.0]);
}

#[test]
fn cholesky_takes_square_roots_of_a_diagonal() {
    let graph = Graph::new("chol-diag");
    let (v, _) = Array::build(&graph, "v", vec![4.0, 9.0]).unwrap();
    let chol = Cholesky::build(&graph, "chol").unwrap();
    v.output(0) >> chol;
    graph.close().unwrap();
    assert_close(&chol.output(0).data().unwrap().f64(), &[2.0, 3.0]);
}

#[test]
fn cholesky_rejects_rectangular_input() {
    let graph = Graph::new("chol-rect");
    let (v, _) = Array::build_matrix(&graph, "v", vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0], &[2, 3])
        .unwrap();
    let chol = Cholesky::build(&graph, "chol").unwrap();
    v.output(0) >> chol;
    let err = graph.close().unwrap_err();
    assert!(matches!(
        err,
        CloseError::Type(TypeFunctionError::NotSquareOrDiag { .. })
    ));
}

#[test]
fn normalize_solves_against_a_full_factor() {
    let graph = Graph::new("norm-full");
    // L = [[2, 0], [1, 3]], mu = [1, 1], x = [5, 9]:
    // z0 = (5 - 1) / 2 = 2, z1 = (9 - 1 - 1 * 2) / 3 = 2.
    let (value, _) = Array::build(&graph, "value", vec![5.0, 9.0]).unwrap();
    let (factor, _) = Array::build_matrix(&graph, "factor", vec![2.0, 0.0, 1.0, 3.0], &[2, 2])
        .unwrap();
    let (central, _) = Array::build(&graph, "central", vec![1.0, 1.0]).unwrap();
    let norm = NormalizeCorrelatedVars::build(&graph, "norm").unwrap();
    value.output(0) >> norm;
    graph
        .connect_named(factor.output(0).id(), norm.id(), "matrix")
        .unwrap();
    graph
        .connect_named(central.output(0).id(), norm.id(), "central")
        .unwrap();
    graph.close().unwrap();

    assert_close(&norm.output(0).data().unwrap().f64(), &[2.0, 2.0]);
}

#[test]
fn normalize_diagonal_scores() {
    let graph = Graph::new("norm-diag");
    let (value, _) = Array::build(&graph, "value", vec![5.0, 1.0]).unwrap();
    let (sigma, _) = Array::build(&graph, "sigma", vec![2.0, 1.0]).unwrap();
    let (central, _) = Array::build(&graph, "central", vec![1.0, 1.0]).unwrap();
    let norm = NormalizeCorrelatedVars::build(&graph, "norm").unwrap();
    value.output(0) >> norm;
    graph
        .connect_named(sigma.output(0).id(), norm.id(), "matrix")
        .unwrap();
    graph
        .connect_named(central.output(0).id(), norm.id(), "central")
        .unwrap();
    graph.close().unwrap();

    // z = (x - mu) / sigma.
    assert_close(&norm.output(0).data().unwrap().f64(), &[2.0, 0.0]);
}

#[test]
fn normalize_keeps_its_buffer_identity_across_closes() {
    let graph = Graph::new("norm-pinned");
    let (value, _) = Array::build(&graph, "value", vec![3.0]).unwrap();
    let (sigma, _) = Array::build(&graph, "sigma", vec![1.5]).unwrap();
    let (central, _) = Array::build(&graph, "central", vec![0.0]).unwrap();
    let norm = NormalizeCorrelatedVars::build(&graph, "norm").unwrap();
    value.output(0) >> norm;
    graph
        .connect_named(sigma.output(0).id(), norm.id(), "matrix")
        .unwrap();
    graph
        .connect_named(central.output(0).id(), norm.id(), "central")
        .unwrap();
    graph.close().unwrap();
    let first = norm.output(0).data().unwrap();
    assert_close(&first.f64(), &[2.0]);

    graph.open();
    graph.close().unwrap();
    let second = norm.output(0).data().unwrap();
    assert!(BufferHandle::same_buffer(&first, &second));
}

#[test]
fn monte_carlo_asimov_equals_central() {
    let graph = Graph::new("mc-asimov");
    let (central, _) = Array::build(&graph, "central", vec![1.0, 2.0, 3.0]).unwrap();
    let (sigma, _) = Array::build(&graph, "sigma", vec![0.1, 0.1, 0.1]).unwrap();
    let (mc, _) = MonteCarlo::build(&graph, "mc", McMode::Asimov, 7).unwrap();
    (central.output(0), sigma.output(0)) >> mc;
    graph.close().unwrap();

    assert_close(&mc.output(0).data().unwrap().f64(), &[1.0, 2.0, 3.0]);
}

#[test]
fn monte_carlo_sample_is_frozen_until_advanced() {
    let graph = Graph::new("mc-frozen");
    let (central, handle) = Array::build(&graph, "central", vec![1.0, 2.0]).unwrap();
    let (sigma, _) = Array::build(&graph, "sigma", vec![0.5, 0.5]).unwrap();
    let (mc, mc_handle) = MonteCarlo::build(&graph, "mc", McMode::Normal, 42).unwrap();
    (central.output(0), sigma.output(0)) >> mc;
    graph.close().unwrap();

    let first = mc.output(0).data().unwrap().to_f64_vec();
    assert!(mc.is_frozen());

    // Upstream changes are absorbed while the sample is pinned.
    handle.set(&graph, &[100.0, 200.0]);
    assert!(!mc.is_tainted());
    let pinned = mc.output(0).data().unwrap().to_f64_vec();
    assert_eq!(first, pinned);

    // The next sample sees the new central values.
    mc_handle.next_sample(&graph).unwrap();
    let advanced = mc.output(0).data().unwrap().to_f64_vec();
    assert_ne!(first, advanced);
    assert!((advanced[0] - 100.0).abs() < 10.0);
    assert!((advanced[1] - 200.0).abs() < 10.0);
}

#[test]
fn monte_carlo_is_deterministic_per_seed() {
    let build = || {
        let graph = Graph::new("mc-seeded");
        let (central, _) = Array::build(&graph, "central", vec![0.0, 0.0, 0.0]).unwrap();
        let (sigma, _) = Array::build(&graph, "sigma", vec![1.0, 1.0, 1.0]).unwrap();
        let (mc, _) = MonteCarlo::build(&graph, "mc", McMode::Normal, 1234).unwrap();
        (central.output(0), sigma.output(0)) >> mc;
        graph.close().unwrap();
        let sample = mc.output(0).data().unwrap().to_f64_vec();
        sample
    };
    let first = build();
    let second = build();
    assert_eq!(first, second);
    assert_ne!(first, vec![0.0, 0.0, 0.0]);
}

#[test]
fn monte_carlo_reset_returns_to_central() {
    let graph = Graph::new("mc-reset");
    let (central, _) = Array::build(&graph, "central", vec![1.0, 2.0]).unwrap();
    let (sigma, _) = Array::build(&graph, "sigma", vec![0.5, 0.5]).unwrap();
    let (mc, handle) = MonteCarlo::build(&graph, "mc", McMode::Normal, 9).unwrap();
    (central.output(0), sigma.output(0)) >> mc;
    graph.close().unwrap();

    let drawn = mc.output(0).data().unwrap().to_f64_vec();
    assert_ne!(drawn, vec![1.0, 2.0]);

    handle.reset(&graph).unwrap();
    assert_close(&mc.output(0).data().unwrap().f64(), &[1.0, 2.0]);

    // The reset applies to one sample only.
    handle.next_sample(&graph).unwrap();
    let next = mc.output(0).data().unwrap().to_f64_vec();
    assert_ne!(next, vec![1.0, 2.0]);
}

#[test]
fn monte_carlo_pairs_blocks_with_outputs() {
    let graph = Graph::new("mc-blocks");
    let (c1, _) = Array::build(&graph, "c1", vec![1.0, 2.0]).unwrap();
    let (s1, _) = Array::build(&graph, "s1", vec![0.1, 0.1]).unwrap();
    let (c2, _) = Array::build(&graph, "c2", vec![7.0]).unwrap();
    let (s2, _) = Array::build(&graph, "s2", vec![0.2]).unwrap();
    let (mc, _) = MonteCarlo::build(&graph, "mc", McMode::Asimov, 5).unwrap();
    (c1.output(0), s1.output(0)) >> mc;
    (c2.output(0), s2.output(0)) >> mc;
    assert_eq!(mc.num_outputs(), 2);
    graph.close().unwrap();

    assert_close(&mc.output(0).data().unwrap().f64(), &[1.0, 2.0]);
    assert_close(&mc.output(1).data().unwrap().f64(), &[7.0]);
}

#[test]
fn monte_carlo_rejects_an_incomplete_pair() {
    let graph = Graph::new("mc-odd");
    let (c1, _) = Array::build(&graph, "c1", vec![1.0]).unwrap();
    let (s1, _) = Array::build(&graph, "s1", vec![0.1]).unwrap();
    let (c2, _) = Array::build(&graph, "c2", vec![2.0]).unwrap();
    let (mc, _) = MonteCarlo::build(&graph, "mc", McMode::Normal, 3).unwrap();
    (c1.output(0), s1.output(0), c2.output(0)) >> mc;
    let err = graph.close().unwrap_err();
    assert!(matches!(
        err,
        CloseError::Type(TypeFunctionError::BlockArity { .. })
    ));
}

#[test]
fn array_edges_annotate_the_descriptor() {
    let graph = Graph::new("edges");
    let (edges, _) = Array::build(&graph, "edges", vec![0.0, 1.0, 2.0, 3.0]).unwrap();
    let (hist, _) = Array::build(&graph, "hist", vec![5.0, 6.0, 7.0]).unwrap();
    graph
        .connect_named(edges.output(0).id(), hist.id(), "edges")
        .unwrap();
    graph.close().unwrap();

    let dd = hist.output(0).dd().unwrap();
    assert_eq!(dd.axes_edges, vec![edges.output(0).id()]);
}

#[test]
fn mismatched_edges_fail_the_close() {
    let graph = Graph::new("bad-edges");
    let (edges, _) = Array::build(&graph, "edges", vec![0.0, 1.0]).unwrap();
    let (hist, _) = Array::build(&graph, "hist", vec![5.0, 6.0, 7.0]).unwrap();
    graph
        .connect_named(edges.output(0).id(), hist.id(), "edges")
        .unwrap();
    let err = graph.close().unwrap_err();
    assert!(matches!(
        err,
        CloseError::Type(TypeFunctionError::BadEdges { .. })
    ));
}
