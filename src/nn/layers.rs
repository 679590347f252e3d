//! Layers and the `Sequential` model.
//!
//! Layers hold their parameters as [`Variable`] handles, so the same
//! handles can be given to an optimizer and updated in place between
//! forward passes.

use rand::Rng;

use crate::backprop;
use crate::error::{Error, Result};
use crate::graph::{NodeId, Tape};
use crate::ops::cpu;
use crate::tensors::{Ten64, Tensor};
use crate::variable::Variable;

/// Fully connected layer computing `y = x Wᵀ + b`.
#[derive(Debug, Clone)]
pub struct Linear {
    weight: Variable,
    bias: Variable,
    in_features: usize,
    out_features: usize,
}

impl Linear {
    /// Creates a layer with weights and bias drawn uniformly from
    /// `[-1/sqrt(in), 1/sqrt(in))`.
    pub fn new<R: Rng>(in_features: usize, out_features: usize, rng: &mut R) -> Self {
        let bound = 1.0 / (in_features.max(1) as f64).sqrt();
        let mut sample = |len: usize| -> Vec<f64> {
            (0..len).map(|_| rng.random_range(-bound..bound)).collect()
        };
        let weight = Tensor::new(
            vec![out_features, in_features],
            sample(out_features * in_features),
        );
        let bias = Tensor::new(vec![out_features], sample(out_features));

        Self {
            weight: Variable::parameter(weight),
            bias: Variable::parameter(bias),
            in_features,
            out_features,
        }
    }

    /// Builds a layer around existing parameter values.
    ///
    /// # Errors
    /// [`Error::ShapeMismatch`] unless `weight` is `[out, in]` and `bias` is `[out]`.
    pub fn from_parameters(weight: Ten64, bias: Ten64) -> Result<Self> {
        if weight.rank() != 2 || bias.shape != [weight.shape[0]] {
            return Err(Error::ShapeMismatch {
                op: "linear",
                expected: weight.shape.first().map(|&out| vec![out]).unwrap_or_default(),
                got: bias.shape,
            });
        }
        let (out_features, in_features) = (weight.shape[0], weight.shape[1]);
        Ok(Self {
            weight: Variable::parameter(weight),
            bias: Variable::parameter(bias),
            in_features,
            out_features,
        })
    }

    pub fn in_features(&self) -> usize {
        self.in_features
    }

    pub fn out_features(&self) -> usize {
        self.out_features
    }

    pub fn weight(&self) -> &Variable {
        &self.weight
    }

    pub fn bias(&self) -> &Variable {
        &self.bias
    }

    /// Records `x Wᵀ + b` on the tape.
    pub fn forward(&self, tape: &mut Tape, x: &Variable) -> Result<(Variable, NodeId)> {
        backprop::linear(tape, x, &self.weight, &self.bias)
    }

    fn apply(&self, x: &Ten64) -> Result<Ten64> {
        if x.rank() != 2 || x.shape[1] != self.in_features {
            return Err(Error::ShapeMismatch {
                op: "linear",
                expected: vec![x.shape.first().copied().unwrap_or(0), self.in_features],
                got: x.shape.clone(),
            });
        }
        Ok(cpu::linear(x, &self.weight.value(), Some(&*self.bias.value())))
    }
}

/// One stage of a [`Sequential`] model.
#[derive(Debug, Clone)]
pub enum Layer {
    Linear(Linear),
    Relu,
    /// Log-softmax with `dim` as the normalized axis.
    LogSoftmax { dim: usize },
}

impl Layer {
    /// Records this layer's operation on the tape.
    pub fn forward(&self, tape: &mut Tape, x: &Variable) -> Result<(Variable, NodeId)> {
        match self {
            Self::Linear(linear) => linear.forward(tape, x),
            Self::Relu => backprop::relu(tape, x),
            Self::LogSoftmax { dim } => backprop::log_softmax(tape, x, *dim),
        }
    }

    fn apply(&self, x: &Ten64) -> Result<Ten64> {
        match self {
            Self::Linear(linear) => linear.apply(x),
            Self::Relu => Ok(cpu::relu(x).0),
            Self::LogSoftmax { dim } => {
                if x.rank() != 2 {
                    return Err(Error::ShapeMismatch {
                        op: "log_softmax",
                        expected: vec![0, 0],
                        got: x.shape.clone(),
                    });
                }
                if *dim > 1 {
                    return Err(Error::InvalidDim { dim: *dim, rank: 2 });
                }
                Ok(cpu::log_softmax(x, *dim))
            }
        }
    }

    fn parameters(&self) -> Vec<Variable> {
        match self {
            Self::Linear(linear) => vec![linear.weight.clone(), linear.bias.clone()],
            Self::Relu | Self::LogSoftmax { .. } => Vec::new(),
        }
    }
}

/// An ordered stack of layers applied one after another.
///
/// # Example
/// ```rust
/// use briny_grad::nn::Sequential;
/// use rand::{SeedableRng, rngs::StdRng};
///
/// let mut rng = StdRng::seed_from_u64(7);
/// let model = Sequential::mlp(&[784, 128, 64, 10], &mut rng);
/// assert_eq!(model.len(), 6);
/// assert_eq!(model.parameters().len(), 6);
/// ```
#[derive(Debug, Clone, Default)]
pub struct Sequential {
    layers: Vec<Layer>,
}

impl Sequential {
    pub fn new(layers: Vec<Layer>) -> Self {
        Self { layers }
    }

    /// Builds `Linear → ReLU → … → Linear → LogSoftmax(dim = 1)` over `widths`.
    ///
    /// `widths` lists the feature count of every boundary, input first, so
    /// `[784, 128, 10]` yields two linear layers.
    pub fn mlp<R: Rng>(widths: &[usize], rng: &mut R) -> Self {
        let mut layers = Vec::new();
        let last = widths.len().saturating_sub(2);
        for (i, pair) in widths.windows(2).enumerate() {
            layers.push(Layer::Linear(Linear::new(pair[0], pair[1], rng)));
            if i < last {
                layers.push(Layer::Relu);
            }
        }
        layers.push(Layer::LogSoftmax { dim: 1 });
        Self { layers }
    }

    pub fn push(&mut self, layer: Layer) {
        self.layers.push(layer);
    }

    pub fn layers(&self) -> &[Layer] {
        &self.layers
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    /// Feature width the first linear layer expects, if there is one.
    pub fn in_features(&self) -> Option<usize> {
        self.layers.iter().find_map(|layer| match layer {
            Layer::Linear(linear) => Some(linear.in_features),
            _ => None,
        })
    }

    /// Every trainable parameter, in layer order.
    pub fn parameters(&self) -> Vec<Variable> {
        self.layers.iter().flat_map(Layer::parameters).collect()
    }

    /// Runs every layer on the tape and returns the output together with
    /// the node each layer recorded.
    pub fn forward(&self, tape: &mut Tape, x: &Variable) -> Result<(Variable, Vec<NodeId>)> {
        let mut nodes = Vec::with_capacity(self.layers.len());
        let mut current = x.clone();
        for layer in &self.layers {
            let (out, node) = layer.forward(tape, &current)?;
            nodes.push(node);
            current = out;
        }
        Ok((current, nodes))
    }

    /// Evaluates the model without recording anything.
    pub fn infer(&self, x: &Ten64) -> Result<Ten64> {
        let mut current = x.clone();
        for layer in &self.layers {
            current = layer.apply(&current)?;
        }
        Ok(current)
    }
}
