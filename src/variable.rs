//! Gradient-tracked tensor handles.
//!
//! A [`Variable`] is a cheap, shared handle around a tensor value. Cloning a
//! variable clones the handle, not the data, so one value can feed several
//! recorded nodes (fan-out) and still be updated in place by an optimizer.
//!
//! Only [`Origin::Parameter`] variables own a gradient buffer. The buffer
//! is allocated on the first backward contribution and from then on sums
//! every contribution until it is explicitly zeroed.
//!
//! Handles use `Rc<RefCell<_>>` and are therefore confined to one thread;
//! the training loop is sequential.

use core::cell::{Ref, RefCell};
use core::fmt;
use std::rc::Rc;

use crate::error::{Error, Result};
use crate::graph::NodeId;
use crate::tensors::Ten64;

/// Where a variable's value came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    /// A leaf that never receives gradients (input data).
    Input,
    /// A trainable leaf; accumulates gradients.
    Parameter,
    /// The output of a recorded node.
    Node(NodeId),
}

struct Slot {
    value: Ten64,
    grad: Option<Ten64>,
    origin: Origin,
}

/// Shared handle to a tensor value, its gradient buffer and its origin.
#[derive(Clone)]
pub struct Variable(Rc<RefCell<Slot>>);

impl Variable {
    fn with_origin(value: Ten64, origin: Origin) -> Self {
        Self(Rc::new(RefCell::new(Slot {
            value,
            grad: None,
            origin,
        })))
    }

    /// Wraps input data. Inputs are never differentiated.
    pub fn input(value: Ten64) -> Self {
        Self::with_origin(value, Origin::Input)
    }

    /// Wraps a trainable parameter.
    ///
    /// ```rust
    /// use briny_grad::{tensor, variable::Variable};
    ///
    /// let w = Variable::parameter(tensor!([1.0, 2.0]));
    /// assert!(w.is_trainable());
    /// assert!(w.grad().is_none());
    /// ```
    pub fn parameter(value: Ten64) -> Self {
        Self::with_origin(value, Origin::Parameter)
    }

    pub(crate) fn produced(value: Ten64, node: NodeId) -> Self {
        Self::with_origin(value, Origin::Node(node))
    }

    /// Borrows the current value.
    ///
    /// # Panics
    /// Panics if the value is being mutated at the same time, which only
    /// happens inside an optimizer step.
    pub fn value(&self) -> Ref<'_, Ten64> {
        Ref::map(self.0.borrow(), |slot| &slot.value)
    }

    /// Copies the current value out of the handle.
    pub fn to_tensor(&self) -> Ten64 {
        self.0.borrow().value.clone()
    }

    pub fn shape(&self) -> Vec<usize> {
        self.0.borrow().value.shape.clone()
    }

    /// The scalar value of a single-element variable.
    ///
    /// # Errors
    /// [`Error::NonScalarOutput`] if the variable holds more than one element.
    pub fn item(&self) -> Result<f64> {
        let slot = self.0.borrow();
        slot.value.item().ok_or_else(|| Error::NonScalarOutput {
            shape: slot.value.shape.clone(),
        })
    }

    pub fn origin(&self) -> Origin {
        self.0.borrow().origin
    }

    /// True for parameters, the only variables that keep gradients.
    pub fn is_trainable(&self) -> bool {
        matches!(self.origin(), Origin::Parameter)
    }

    /// True for anything a gradient can flow through: parameters and node outputs.
    pub fn requires_grad(&self) -> bool {
        !matches!(self.origin(), Origin::Input)
    }

    /// A copy of the accumulated gradient, if one has been allocated.
    pub fn grad(&self) -> Option<Ten64> {
        self.0.borrow().grad.clone()
    }

    /// True once a gradient buffer has been allocated.
    pub fn has_grad(&self) -> bool {
        self.0.borrow().grad.is_some()
    }

    /// True if both handles point at the same slot.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    /// Adds `contribution` into the gradient buffer, allocating it on first use.
    pub(crate) fn accumulate_grad(&self, contribution: &Ten64) -> Result<()> {
        let mut slot = self.0.borrow_mut();
        if slot.origin != Origin::Parameter {
            return Err(Error::NotTracked);
        }
        if slot.value.shape != contribution.shape {
            return Err(Error::ShapeMismatch {
                op: "accumulate_grad",
                expected: slot.value.shape.clone(),
                got: contribution.shape.clone(),
            });
        }
        match slot.grad.as_mut() {
            Some(grad) => grad.add_assign(contribution),
            None => {
                slot.grad = Some(contribution.clone());
                Ok(())
            }
        }
    }

    /// Fills an allocated gradient buffer with zeros. No-op when unallocated.
    pub fn zero_grad(&self) {
        if let Some(grad) = self.0.borrow_mut().grad.as_mut() {
            grad.data.iter_mut().for_each(|g| *g = 0.0);
        }
    }

    /// Runs `update(value, grad)` against the parameter's buffers.
    ///
    /// Returns `None` when no gradient has been allocated yet.
    pub(crate) fn update_with_grad<R>(&self, update: impl FnOnce(&mut Ten64, &Ten64) -> R) -> Option<R> {
        let mut slot = self.0.borrow_mut();
        let Slot { value, grad, .. } = &mut *slot;
        grad.as_ref().map(|grad| update(value, grad))
    }

    /// Overwrites the value in place, keeping the gradient buffer.
    ///
    /// # Errors
    /// [`Error::ShapeMismatch`] if the new value has a different shape.
    pub fn set_value(&self, value: Ten64) -> Result<()> {
        let mut slot = self.0.borrow_mut();
        if slot.value.shape != value.shape {
            return Err(Error::ShapeMismatch {
                op: "set_value",
                expected: slot.value.shape.clone(),
                got: value.shape,
            });
        }
        slot.value = value;
        Ok(())
    }
}

impl fmt::Debug for Variable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let slot = self.0.borrow();
        f.debug_struct("Variable")
            .field("origin", &slot.origin)
            .field("shape", &slot.value.shape)
            .field("has_grad", &slot.grad.is_some())
            .finish()
    }
}
