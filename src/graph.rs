//! The operation graph and reverse-mode backward traversal.
//!
//! # Tape
//!
//! Every forward call in [`crate::backprop`] appends exactly one [`Node`] to
//! a [`Tape`]. A node only ever references variables that existed before
//! it, so creation order is a topological order and the backward pass is a
//! single reverse walk over the tape.
//!
//! ## Gradient flow
//!
//! 1. The output's adjoint is seeded (1 for a scalar, or an explicit seed).
//! 2. Nodes are visited newest to oldest; each applies its local rule to
//!    its upstream adjoint.
//! 3. Contributions are *added*: into parameter gradient buffers, or into a
//!    traversal-local adjoint for intermediates. Inputs are skipped.
//!
//! The tape survives `backward`, so a second call with no `zero_grad` in
//! between doubles every parameter gradient. [`Tape::clear`] drops all nodes
//! and moves to a fresh generation; variables recorded before it are then
//! rejected as [`Error::StaleGraph`], both when they are fed to a new
//! operation and when backward is run from them. A failed backward leaves
//! every parameter gradient untouched.

use core::sync::atomic::{AtomicU64, Ordering};
use std::collections::HashMap;

use crate::error::{Error, Result};
use crate::ops::cpu;
use crate::tensors::{Ten64, Tensor};
use crate::variable::{Origin, Variable};

/// Source of unique tape generations, shared by every tape in the process.
static TAPE_GENERATION: AtomicU64 = AtomicU64::new(0);

fn next_generation() -> u64 {
    TAPE_GENERATION.fetch_add(1, Ordering::Relaxed)
}

/// Identifies a node: the tape generation that recorded it and its position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId {
    generation: u64,
    index: usize,
}

impl NodeId {
    /// Position of the node on its tape.
    pub fn index(&self) -> usize {
        self.index
    }
}

/// A recorded operation and the forward state its gradient rule needs.
#[derive(Debug, Clone, PartialEq)]
pub enum Op {
    /// `y = x Wᵀ + b`; inputs are `[x, W, b]`. Keeps `x` and `W` as they
    /// were when the node was recorded.
    Linear { x: Ten64, weight: Ten64 },
    /// `max(x, 0)`; keeps the mask of positive inputs.
    Relu { mask: Vec<bool> },
    /// Log-softmax along `dim`; keeps the softmax probabilities.
    LogSoftmax { dim: usize, probs: Ten64 },
    /// Mean negative log-likelihood of `targets`.
    NllLoss { targets: Vec<usize> },
    /// Element-wise `a + b`.
    Add,
    /// Element-wise `a * b`; keeps both operands.
    Mul { a: Ten64, b: Ten64 },
    /// `x * factor`.
    Scale { factor: f64 },
    /// Sum of all elements.
    Sum,
    /// Mean of all elements.
    Mean,
}

impl Op {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Linear { .. } => "linear",
            Self::Relu { .. } => "relu",
            Self::LogSoftmax { .. } => "log_softmax",
            Self::NllLoss { .. } => "nll_loss",
            Self::Add => "add",
            Self::Mul { .. } => "mul",
            Self::Scale { .. } => "scale",
            Self::Sum => "sum",
            Self::Mean => "mean",
        }
    }

    /// Local gradient rule: maps `dL/d(output)` to one `dL/d(input)` per input.
    ///
    /// Only forward-time state is read, so later in-place parameter updates
    /// do not leak into a repeated backward pass.
    fn backward(&self, inputs: &[Variable], upstream: &Ten64) -> Vec<Ten64> {
        match self {
            Self::Linear { x, weight } => {
                let (dx, dw, db) = cpu::linear_backward(x, weight, upstream);
                vec![dx, dw, db]
            }
            Self::Relu { mask } => vec![cpu::relu_backward(mask, upstream)],
            Self::LogSoftmax { dim, probs } => {
                vec![cpu::log_softmax_backward(probs, upstream, *dim)]
            }
            Self::NllLoss { targets } => {
                let shape = inputs[0].shape();
                vec![cpu::nll_loss_backward(&shape, targets, upstream.data[0])]
            }
            Self::Add => vec![upstream.clone(), upstream.clone()],
            Self::Mul { a, b } => vec![cpu::mul(upstream, b), cpu::mul(upstream, a)],
            Self::Scale { factor } => vec![upstream.scale(*factor)],
            Self::Sum => vec![Tensor::filled(inputs[0].shape(), upstream.data[0])],
            Self::Mean => {
                let shape = inputs[0].shape();
                let count = shape.iter().product::<usize>().max(1) as f64;
                vec![Tensor::filled(shape, upstream.data[0] / count)]
            }
        }
    }
}

/// One recorded forward call.
#[derive(Debug)]
pub struct Node {
    id: NodeId,
    op: Op,
    inputs: Vec<Variable>,
    output: Variable,
}

impl Node {
    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn op(&self) -> &Op {
        &self.op
    }

    /// The variables this node consumed, in argument order.
    pub fn inputs(&self) -> &[Variable] {
        &self.inputs
    }

    pub fn output(&self) -> &Variable {
        &self.output
    }
}

/// Append-only record of the operations of one forward pass.
#[derive(Debug)]
pub struct Tape {
    generation: u64,
    nodes: Vec<Node>,
}

impl Default for Tape {
    fn default() -> Self {
        Self::new()
    }
}

impl Tape {
    pub fn new() -> Self {
        Self {
            generation: next_generation(),
            nodes: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// All nodes in creation order.
    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    /// Looks up a node recorded by this tape in its current generation.
    pub fn node(&self, id: NodeId) -> Option<&Node> {
        if id.generation != self.generation {
            return None;
        }
        self.nodes.get(id.index)
    }

    /// Drops every node and starts a new generation.
    pub fn clear(&mut self) {
        self.nodes.clear();
        self.generation = next_generation();
    }

    /// Appends a node producing `value` and returns the new output variable.
    ///
    /// # Errors
    /// [`Error::StaleGraph`] if an input was produced by a cleared or
    /// different tape. Nothing is recorded in that case.
    pub(crate) fn record(
        &mut self,
        op: Op,
        inputs: Vec<Variable>,
        value: Ten64,
    ) -> Result<(Variable, NodeId)> {
        for input in &inputs {
            if let Origin::Node(src) = input.origin() {
                self.resolve(src)?;
            }
        }

        let id = NodeId {
            generation: self.generation,
            index: self.nodes.len(),
        };
        let output = Variable::produced(value, id);
        self.nodes.push(Node {
            id,
            op,
            inputs,
            output: output.clone(),
        });
        Ok((output, id))
    }

    fn resolve(&self, id: NodeId) -> Result<usize> {
        if id.generation != self.generation || id.index >= self.nodes.len() {
            return Err(Error::StaleGraph);
        }
        Ok(id.index)
    }

    /// Back-propagates from a scalar `output`, seeding its gradient with 1.
    ///
    /// # Errors
    /// - [`Error::NonScalarOutput`] if `output` has more than one element
    /// - [`Error::NotTracked`] if `output` is an input leaf
    /// - [`Error::StaleGraph`] if `output` was recorded by another tape or generation
    ///
    /// # Example
    /// ```rust
    /// use briny_grad::{backprop, graph::Tape, tensor, variable::Variable};
    ///
    /// let mut tape = Tape::new();
    /// let w = Variable::parameter(tensor!([1.0, 2.0, 3.0]));
    /// let (sq, _) = backprop::mul(&mut tape, &w, &w).unwrap();
    /// let (loss, _) = backprop::sum(&mut tape, &sq).unwrap();
    /// tape.backward(&loss).unwrap();
    /// assert_eq!(w.grad().unwrap().data, vec![2.0, 4.0, 6.0]);
    /// ```
    pub fn backward(&self, output: &Variable) -> Result<()> {
        let shape = output.shape();
        if shape.iter().product::<usize>() != 1 {
            return Err(Error::NonScalarOutput { shape });
        }
        self.backward_with(output, Tensor::filled(shape, 1.0))
    }

    /// Back-propagates from `output` with an explicit seed gradient.
    ///
    /// # Errors
    /// As [`Tape::backward`], plus [`Error::ShapeMismatch`] when `seed` and
    /// `output` disagree.
    pub fn backward_with(&self, output: &Variable, seed: Ten64) -> Result<()> {
        let shape = output.shape();
        if seed.shape != shape {
            return Err(Error::ShapeMismatch {
                op: "backward",
                expected: shape,
                got: seed.shape,
            });
        }

        let root = match output.origin() {
            Origin::Input => return Err(Error::NotTracked),
            Origin::Parameter => return output.accumulate_grad(&seed),
            Origin::Node(id) => self.resolve(id)?,
        };

        let mut adjoints: HashMap<usize, Ten64> = HashMap::new();
        adjoints.insert(root, seed);
        // parameter contributions are held back until the whole walk succeeded
        let mut pending: Vec<(&Variable, Ten64)> = Vec::new();

        for node in self.nodes[..=root].iter().rev() {
            let Some(upstream) = adjoints.remove(&node.id.index) else {
                continue;
            };
            log::trace!("backward through #{} ({})", node.id.index, node.op.name());

            let grads = node.op.backward(&node.inputs, &upstream);
            for (input, grad) in node.inputs.iter().zip(grads) {
                match input.origin() {
                    Origin::Input => {}
                    Origin::Parameter => {
                        let shape = input.shape();
                        if shape != grad.shape {
                            return Err(Error::ShapeMismatch {
                                op: node.op.name(),
                                expected: shape,
                                got: grad.shape,
                            });
                        }
                        pending.push((input, grad));
                    }
                    Origin::Node(src) => {
                        let index = self.resolve(src)?;
                        match adjoints.get_mut(&index) {
                            Some(acc) => acc.add_assign(&grad)?,
                            None => {
                                adjoints.insert(index, grad);
                            }
                        }
                    }
                }
            }
        }

        for (param, grad) in pending {
            param.accumulate_grad(&grad)?;
        }
        Ok(())
    }
}
