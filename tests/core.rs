use approx::assert_abs_diff_eq;
use briny_grad::backprop::{add, linear, log_softmax, mean, mul, nll_loss, relu, scale, sum};
use briny_grad::graph::{Op, Tape};
use briny_grad::nn::Sgd;
use briny_grad::tensors::Tensor;
use briny_grad::variable::{Origin, Variable};
use briny_grad::{tensor, Error};

#[test]
fn test_relu_records_mask_and_gates_gradient() {
    let mut tape = Tape::new();
    let x = Variable::parameter(Tensor::new(vec![3], vec![-1.0, 0.0, 2.0]));
    let (out, node) = relu(&mut tape, &x).unwrap();
    assert_eq!(out.to_tensor().data, vec![0.0, 0.0, 2.0]);

    match tape.node(node).unwrap().op() {
        Op::Relu { mask } => assert_eq!(mask, &vec![false, false, true]),
        other => panic!("expected relu, got {other:?}"),
    }

    tape.backward_with(&out, tensor!([1.0, 1.0, 1.0])).unwrap();
    assert_eq!(x.grad().unwrap().data, vec![0.0, 0.0, 1.0]);
}

#[test]
fn test_linear_forward_and_gradients() {
    let mut tape = Tape::new();
    let x = Variable::input(tensor!([[1.0, 2.0], [3.0, 4.0]]));
    let w = Variable::parameter(tensor!([[1.0, 0.0], [0.0, 1.0], [1.0, 1.0]]));
    let b = Variable::parameter(tensor!([0.0, 1.0, 2.0]));

    let (y, node) = linear(&mut tape, &x, &w, &b).unwrap();
    assert_eq!(y.shape(), vec![2, 3]);
    assert_eq!(y.to_tensor().data, vec![1.0, 3.0, 5.0, 3.0, 5.0, 9.0]);
    assert_eq!(tape.node(node).unwrap().inputs().len(), 3);

    let (loss, _) = sum(&mut tape, &y).unwrap();
    tape.backward(&loss).unwrap();

    // dL/dW[j] = sum of input rows, dL/db = batch size
    assert_eq!(w.grad().unwrap().data, vec![4.0, 6.0, 4.0, 6.0, 4.0, 6.0]);
    assert_eq!(b.grad().unwrap().data, vec![2.0, 2.0, 2.0]);
    assert!(x.grad().is_none());
}

#[test]
fn test_linear_rejects_feature_width_mismatch() {
    let mut tape = Tape::new();
    let x = Variable::input(Tensor::zeros(vec![4, 3]));
    let w = Variable::parameter(Tensor::zeros(vec![2, 5]));
    let b = Variable::parameter(Tensor::zeros(vec![2]));

    let err = linear(&mut tape, &x, &w, &b).unwrap_err();
    assert_eq!(
        err,
        Error::ShapeMismatch {
            op: "linear",
            expected: vec![4, 5],
            got: vec![4, 3],
        }
    );
    assert!(tape.is_empty());
}

#[test]
fn test_linear_rejects_bias_mismatch() {
    let mut tape = Tape::new();
    let x = Variable::input(Tensor::zeros(vec![1, 2]));
    let w = Variable::parameter(Tensor::zeros(vec![3, 2]));
    let b = Variable::parameter(Tensor::zeros(vec![2]));

    assert!(matches!(
        linear(&mut tape, &x, &w, &b),
        Err(Error::ShapeMismatch { op: "linear", .. })
    ));
}

#[test]
fn test_log_softmax_normalizes_selected_dim() {
    let mut tape = Tape::new();
    let x = Variable::input(tensor!([[1.0, 2.0], [3.0, 5.0]]));

    let (rows, _) = log_softmax(&mut tape, &x, 1).unwrap();
    for row in rows.to_tensor().data.chunks(2) {
        assert_abs_diff_eq!(row.iter().map(|v| v.exp()).sum::<f64>(), 1.0, epsilon = 1e-12);
    }

    let (cols, _) = log_softmax(&mut tape, &x, 0).unwrap();
    let cols = cols.to_tensor().transpose();
    for col in cols.data.chunks(2) {
        assert_abs_diff_eq!(col.iter().map(|v| v.exp()).sum::<f64>(), 1.0, epsilon = 1e-12);
    }
}

#[test]
fn test_log_softmax_is_stable_for_large_logits() {
    let mut tape = Tape::new();
    let x = Variable::input(tensor!([[1000.0, 1000.0]]));
    let (out, _) = log_softmax(&mut tape, &x, 1).unwrap();
    for v in out.to_tensor().data {
        assert_abs_diff_eq!(v, -(2.0f64.ln()), epsilon = 1e-12);
    }
}

#[test]
fn test_log_softmax_rejects_bad_dim() {
    let mut tape = Tape::new();
    let x = Variable::input(tensor!([[1.0, 2.0]]));
    assert_eq!(
        log_softmax(&mut tape, &x, 2).unwrap_err(),
        Error::InvalidDim { dim: 2, rank: 2 }
    );
}

#[test]
fn test_nll_loss_value() {
    let mut tape = Tape::new();
    let lp = Variable::input(Tensor::new(
        vec![2, 2],
        vec![0.5f64.ln(), 0.5f64.ln(), 0.25f64.ln(), 0.75f64.ln()],
    ));
    let (loss, _) = nll_loss(&mut tape, &lp, &[0, 1]).unwrap();
    let expected = -(0.5f64.ln() + 0.75f64.ln()) / 2.0;
    assert_abs_diff_eq!(loss.item().unwrap(), expected, epsilon = 1e-12);
}

#[test]
fn test_nll_loss_is_zero_for_perfect_predictions() {
    let mut tape = Tape::new();
    let lp = Variable::input(Tensor::new(
        vec![3, 3],
        vec![0.0, -60.0, -60.0, -60.0, 0.0, -60.0, -60.0, -60.0, 0.0],
    ));
    let (loss, _) = nll_loss(&mut tape, &lp, &[0, 1, 2]).unwrap();
    assert_eq!(loss.item().unwrap(), 0.0);
}

#[test]
fn test_nll_loss_rejects_out_of_range_label() {
    let mut tape = Tape::new();
    let lp = Variable::input(Tensor::zeros(vec![2, 3]));
    assert_eq!(
        nll_loss(&mut tape, &lp, &[0, 5]).unwrap_err(),
        Error::InvalidLabel { label: 5, classes: 3 }
    );
    assert!(matches!(
        nll_loss(&mut tape, &lp, &[0]),
        Err(Error::ShapeMismatch { op: "nll_loss", .. })
    ));
}

#[test]
fn test_nll_gradient_through_log_softmax() {
    // d(nll ∘ log_softmax)/dz = (softmax(z) - onehot) / n
    let mut tape = Tape::new();
    let z = Variable::parameter(tensor!([[0.0, 0.0], [0.0, 0.0]]));
    let (lp, _) = log_softmax(&mut tape, &z, 1).unwrap();
    let (loss, _) = nll_loss(&mut tape, &lp, &[0, 1]).unwrap();
    tape.backward(&loss).unwrap();

    let grad = z.grad().unwrap();
    let expected = [-0.25, 0.25, 0.25, -0.25];
    for (g, e) in grad.data.iter().zip(expected) {
        assert_abs_diff_eq!(*g, e, epsilon = 1e-12);
    }
}

#[test]
fn test_elementwise_ops() {
    let mut tape = Tape::new();
    let a = Variable::parameter(tensor!([1.0, 2.0]));
    let b = Variable::parameter(tensor!([3.0, 4.0]));

    let (s, _) = add(&mut tape, &a, &b).unwrap();
    let (p, _) = mul(&mut tape, &s, &b).unwrap();
    let (q, _) = scale(&mut tape, &p, 0.5).unwrap();
    let (loss, _) = mean(&mut tape, &q).unwrap();
    assert_eq!(q.to_tensor().data, vec![6.0, 12.0]);
    assert_eq!(loss.item().unwrap(), 9.0);

    tape.backward(&loss).unwrap();
    // loss = mean(0.5 * (a + b) * b)
    assert_eq!(a.grad().unwrap().data, vec![0.75, 1.0]);
    assert_eq!(b.grad().unwrap().data, vec![1.75, 2.5]);
}

#[test]
fn test_fan_out_accumulates_every_consumer() {
    let mut tape = Tape::new();
    let w = Variable::parameter(tensor!([1.0, 2.0, 3.0]));
    let (twice, _) = add(&mut tape, &w, &w).unwrap();
    let (sq, _) = mul(&mut tape, &twice, &w).unwrap();
    let (loss, _) = sum(&mut tape, &sq).unwrap();
    tape.backward(&loss).unwrap();

    // loss = Σ 2w², so dL/dw = 4w
    assert_eq!(w.grad().unwrap().data, vec![4.0, 8.0, 12.0]);
}

#[test]
fn test_nodes_are_recorded_in_creation_order() {
    let mut tape = Tape::new();
    let x = Variable::input(tensor!([[1.0, 2.0]]));
    let w = Variable::parameter(tensor!([[1.0, 1.0]]));
    let b = Variable::parameter(tensor!([0.0]));

    let (y, n0) = linear(&mut tape, &x, &w, &b).unwrap();
    let (h, n1) = relu(&mut tape, &y).unwrap();
    let (_, n2) = sum(&mut tape, &h).unwrap();

    assert_eq!([n0.index(), n1.index(), n2.index()], [0, 1, 2]);
    assert_eq!(h.origin(), Origin::Node(n1));
    let names: Vec<_> = tape.nodes().iter().map(|n| n.op().name()).collect();
    assert_eq!(names, vec!["linear", "relu", "sum"]);
    assert!(tape.nodes()[1].inputs()[0].ptr_eq(&y));
}

#[test]
fn test_backward_requires_scalar_or_seed() {
    let mut tape = Tape::new();
    let w = Variable::parameter(tensor!([1.0, 2.0]));
    let (y, _) = scale(&mut tape, &w, 3.0).unwrap();
    assert_eq!(
        tape.backward(&y).unwrap_err(),
        Error::NonScalarOutput { shape: vec![2] }
    );

    tape.backward_with(&y, tensor!([1.0, 1.0])).unwrap();
    assert_eq!(w.grad().unwrap().data, vec![3.0, 3.0]);
}

#[test]
fn test_backward_rejects_untracked_and_stale_outputs() {
    let mut tape = Tape::new();
    let x = Variable::input(Tensor::scalar(1.0));
    assert_eq!(tape.backward(&x).unwrap_err(), Error::NotTracked);

    let w = Variable::parameter(tensor!([1.0, 2.0]));
    let (loss, node) = sum(&mut tape, &w).unwrap();
    tape.clear();
    assert!(tape.node(node).is_none());
    assert_eq!(tape.backward(&loss).unwrap_err(), Error::StaleGraph);

    let other = Tape::new();
    let (loss, _) = sum(&mut tape, &w).unwrap();
    assert_eq!(other.backward(&loss).unwrap_err(), Error::StaleGraph);
}

#[test]
fn test_backward_on_parameter_seeds_its_gradient() {
    let tape = Tape::new();
    let w = Variable::parameter(Tensor::scalar(4.0));
    tape.backward(&w).unwrap();
    assert_eq!(w.grad().unwrap().data, vec![1.0]);
}

#[test]
fn test_sgd_step_updates_in_place() {
    let w = Variable::parameter(tensor!([1.0, 2.0]));
    let mut tape = Tape::new();
    let (loss, _) = mul(&mut tape, &w, &w).unwrap();
    tape.backward_with(&loss, tensor!([0.05, 0.05])).unwrap();

    let mut opt = Sgd::new(vec![w.clone()], 0.5);
    opt.step().unwrap();
    assert_eq!(w.to_tensor().data, vec![0.95, 1.9]);
    // step leaves the gradient alone; zero_grad is explicit
    assert_eq!(w.grad().unwrap().data, vec![0.1, 0.2]);
}

#[test]
fn test_sgd_step_before_backward_fails() {
    let a = Variable::parameter(tensor!([1.0]));
    let b = Variable::parameter(tensor!([2.0]));
    let mut tape = Tape::new();
    let (loss, _) = sum(&mut tape, &a).unwrap();
    tape.backward(&loss).unwrap();

    let mut opt = Sgd::new(vec![a.clone(), b.clone()], 0.1);
    assert_eq!(opt.step().unwrap_err(), Error::MissingGradient { index: 1 });
    // nothing was updated
    assert_eq!(a.to_tensor().data, vec![1.0]);
}

#[test]
fn test_sgd_momentum_accumulates_velocity() {
    let w = Variable::parameter(tensor!([1.0]));
    let mut opt = Sgd::with_momentum(vec![w.clone()], 0.1, 0.9);
    let mut tape = Tape::new();

    let (loss, _) = sum(&mut tape, &w).unwrap();
    tape.backward(&loss).unwrap();
    opt.step().unwrap();
    assert_abs_diff_eq!(w.to_tensor().data[0], 0.9, epsilon = 1e-12);

    // same gradient again: v = 0.9 * 1 + 1 = 1.9
    opt.step().unwrap();
    assert_abs_diff_eq!(w.to_tensor().data[0], 0.71, epsilon = 1e-12);
}

#[test]
fn test_recording_rejects_inputs_from_a_cleared_tape() {
    let mut tape = Tape::new();
    let p = Variable::parameter(tensor!([1.0, 2.0]));
    let w = Variable::parameter(tensor!([3.0, 4.0]));
    let (y_old, _) = scale(&mut tape, &w, 2.0).unwrap();

    tape.clear();
    assert_eq!(mul(&mut tape, &p, &y_old).unwrap_err(), Error::StaleGraph);
    assert_eq!(relu(&mut tape, &y_old).unwrap_err(), Error::StaleGraph);
    assert!(tape.is_empty());

    // a foreign tape's output is rejected the same way
    let mut other = Tape::new();
    let (y_other, _) = scale(&mut other, &w, 2.0).unwrap();
    assert_eq!(add(&mut tape, &p, &y_other).unwrap_err(), Error::StaleGraph);

    assert!(p.grad().is_none());
    assert!(w.grad().is_none());
}

#[test]
fn test_failed_backward_leaves_gradients_untouched() {
    let mut tape = Tape::new();
    let p = Variable::parameter(tensor!([1.0, 2.0]));
    let (y, _) = mul(&mut tape, &p, &p).unwrap();
    let (loss, _) = sum(&mut tape, &y).unwrap();
    tape.backward(&loss).unwrap();
    assert_eq!(p.grad().unwrap().data, vec![2.0, 4.0]);

    tape.clear();
    assert_eq!(tape.backward(&loss).unwrap_err(), Error::StaleGraph);
    assert_eq!(
        tape.backward_with(&y, tensor!([1.0, 1.0])).unwrap_err(),
        Error::StaleGraph
    );
    assert_eq!(p.grad().unwrap().data, vec![2.0, 4.0]);
}

#[test]
fn test_repeated_backward_uses_forward_values_after_step() {
    let mut tape = Tape::new();
    let w = Variable::parameter(tensor!([1.0, 2.0]));
    let (sq, _) = mul(&mut tape, &w, &w).unwrap();
    let (loss, _) = sum(&mut tape, &sq).unwrap();
    tape.backward(&loss).unwrap();
    assert_eq!(w.grad().unwrap().data, vec![2.0, 4.0]);

    let mut opt = Sgd::new(vec![w.clone()], 0.25);
    opt.step().unwrap();
    assert_eq!(w.to_tensor().data, vec![0.5, 1.0]);

    // the tape still describes w = [1, 2], so the same gradient is added again
    tape.backward(&loss).unwrap();
    assert_eq!(w.grad().unwrap().data, vec![4.0, 8.0]);
    assert_eq!(loss.item().unwrap(), 5.0);
}

#[test]
fn test_linear_backward_uses_recorded_weight() {
    let mut tape = Tape::new();
    let x = Variable::parameter(tensor!([[1.0, -1.0]]));
    let w = Variable::parameter(tensor!([[2.0, 3.0]]));
    let b = Variable::parameter(tensor!([0.0]));
    let (y, _) = linear(&mut tape, &x, &w, &b).unwrap();
    let (loss, _) = sum(&mut tape, &y).unwrap();

    w.set_value(tensor!([[-10.0, 10.0]])).unwrap();
    tape.backward(&loss).unwrap();
    assert_eq!(x.grad().unwrap().data, vec![2.0, 3.0]);
    assert_eq!(w.grad().unwrap().data, vec![1.0, -1.0]);
}
