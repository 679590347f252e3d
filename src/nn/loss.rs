//! Classification criteria.

use crate::backprop;
use crate::error::Result;
use crate::graph::{NodeId, Tape};
use crate::variable::Variable;

/// Negative log-likelihood over log-probabilities.
///
/// Expects the output of a log-softmax over the class axis and one class
/// index per row.
#[derive(Debug, Clone, Copy, Default)]
pub struct NllLoss;

impl NllLoss {
    pub fn new() -> Self {
        Self
    }

    /// Records the mean NLL of `targets` under `log_probs`.
    pub fn forward(
        &self,
        tape: &mut Tape,
        log_probs: &Variable,
        targets: &[usize],
    ) -> Result<(Variable, NodeId)> {
        backprop::nll_loss(tape, log_probs, targets)
    }
}

/// Cross-entropy over raw logits: log-softmax along the class axis followed
/// by [`NllLoss`].
#[derive(Debug, Clone, Copy, Default)]
pub struct CrossEntropyLoss;

impl CrossEntropyLoss {
    pub fn new() -> Self {
        Self
    }

    /// Records both steps and returns the loss plus the two node ids.
    pub fn forward(
        &self,
        tape: &mut Tape,
        logits: &Variable,
        targets: &[usize],
    ) -> Result<(Variable, [NodeId; 2])> {
        let (log_probs, softmax_node) = backprop::log_softmax(tape, logits, 1)?;
        let (loss, loss_node) = backprop::nll_loss(tape, &log_probs, targets)?;
        Ok((loss, [softmax_node, loss_node]))
    }
}
