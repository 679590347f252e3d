//! Training sessions.
//!
//! A [`TrainingSession`] owns everything one training run mutates: the
//! model, its optimizer, the criterion and the tape. It is built once and
//! every step goes through it, so no module-level state is involved.
//!
//! Each step runs the fixed cycle
//!
//! ```text
//! zero_grad → clear tape → forward → loss → backward → step
//! ```
//!
//! Batches come from any [`BatchSource`]: a finite sequence that can be
//! replayed from the start at every epoch.

use rand::{SeedableRng, rngs::StdRng};

use crate::config::TrainConfig;
use crate::error::{Error, Result};
use crate::graph::Tape;
use crate::nn::{NllLoss, Sequential, Sgd};
use crate::tensors::Ten64;
use crate::variable::Variable;

/// One mini-batch: inputs shaped `[n, ...]` and one class label per sample.
#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    inputs: Ten64,
    labels: Vec<usize>,
}

impl Batch {
    /// # Errors
    /// [`Error::ShapeMismatch`] if `inputs` has no batch axis or the label
    /// count differs from its length.
    pub fn new(inputs: Ten64, labels: Vec<usize>) -> Result<Self> {
        match inputs.shape.first() {
            Some(&n) if n == labels.len() => Ok(Self { inputs, labels }),
            _ => Err(Error::ShapeMismatch {
                op: "batch",
                expected: vec![labels.len()],
                got: inputs.shape,
            }),
        }
    }

    pub fn inputs(&self) -> &Ten64 {
        &self.inputs
    }

    pub fn labels(&self) -> &[usize] {
        &self.labels
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// The inputs as a row-per-sample matrix `[n, features]`.
    pub fn flattened(&self) -> Ten64 {
        let n = self.labels.len();
        let features = self.inputs.shape[1..].iter().product();
        Ten64 {
            shape: vec![n, features],
            data: self.inputs.data.clone(),
        }
    }
}

/// A finite, restartable sequence of batches.
///
/// `batches` is called once per epoch and must start from the beginning
/// every time.
pub trait BatchSource {
    fn batches(&self) -> impl Iterator<Item = &Batch>;
}

impl BatchSource for [Batch] {
    fn batches(&self) -> impl Iterator<Item = &Batch> {
        self.iter()
    }
}

impl BatchSource for Vec<Batch> {
    fn batches(&self) -> impl Iterator<Item = &Batch> {
        self.iter()
    }
}

/// Loss bookkeeping for one epoch.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EpochReport {
    /// Zero-based epoch number within the session.
    pub epoch: usize,
    /// Batches processed.
    pub batches: usize,
    /// Sum of every batch loss.
    pub running_loss: f64,
}

impl EpochReport {
    /// Running loss divided by the number of batches.
    pub fn mean_loss(&self) -> f64 {
        self.running_loss / self.batches as f64
    }
}

/// Model, optimizer, criterion and tape for one training run.
#[derive(Debug)]
pub struct TrainingSession {
    model: Sequential,
    optimizer: Sgd,
    criterion: NllLoss,
    tape: Tape,
    config: TrainConfig,
    steps: usize,
    epochs_run: usize,
}

impl TrainingSession {
    /// Wraps `model`, building an optimizer over all of its parameters.
    ///
    /// # Errors
    /// [`Error::InvalidConfig`] if `config` fails validation.
    pub fn new(model: Sequential, config: TrainConfig) -> Result<Self> {
        let config = config.validated()?;
        let optimizer = Sgd::with_momentum(model.parameters(), config.learning_rate, config.momentum);
        log::info!(
            "training session: {} layers, {} parameter tensors, lr={}, momentum={}",
            model.len(),
            optimizer.params().len(),
            config.learning_rate,
            config.momentum
        );

        Ok(Self {
            model,
            optimizer,
            criterion: NllLoss::new(),
            tape: Tape::new(),
            config,
            steps: 0,
            epochs_run: 0,
        })
    }

    /// Builds a [`Sequential::mlp`] over `widths`, seeded from `config.seed`.
    ///
    /// # Example
    /// ```rust
    /// use briny_grad::{config::TrainConfig, session::TrainingSession};
    ///
    /// let session = TrainingSession::mlp(&[784, 128, 64, 10], TrainConfig::default()).unwrap();
    /// assert_eq!(session.model().in_features(), Some(784));
    /// ```
    pub fn mlp(widths: &[usize], config: TrainConfig) -> Result<Self> {
        let mut rng = StdRng::seed_from_u64(config.seed);
        Self::new(Sequential::mlp(widths, &mut rng), config)
    }

    pub fn model(&self) -> &Sequential {
        &self.model
    }

    pub fn optimizer(&self) -> &Sgd {
        &self.optimizer
    }

    pub fn config(&self) -> &TrainConfig {
        &self.config
    }

    /// The tape of the most recent step.
    pub fn tape(&self) -> &Tape {
        &self.tape
    }

    /// Optimizer steps taken so far.
    pub fn steps(&self) -> usize {
        self.steps
    }

    /// Runs one full training iteration on `batch` and returns its loss.
    pub fn train_step(&mut self, batch: &Batch) -> Result<f64> {
        self.optimizer.zero_grad();
        self.tape.clear();

        let x = Variable::input(batch.flattened());
        let (log_probs, _) = self.model.forward(&mut self.tape, &x)?;
        let (loss, _) = self.criterion.forward(&mut self.tape, &log_probs, batch.labels())?;
        self.tape.backward(&loss)?;
        self.optimizer.step()?;

        self.steps += 1;
        let loss = loss.item()?;
        if self.config.log_every > 0 && self.steps.is_multiple_of(self.config.log_every) {
            log::debug!("step {}: loss={:.6}", self.steps, loss);
        }
        Ok(loss)
    }

    /// One pass over `source`, accumulating the running loss.
    ///
    /// # Errors
    /// [`Error::EmptyEpoch`] if the source yields nothing, or the first
    /// error raised by a step.
    pub fn train_epoch<S: BatchSource + ?Sized>(&mut self, source: &S) -> Result<EpochReport> {
        let epoch = self.epochs_run;
        let mut report = EpochReport {
            epoch,
            batches: 0,
            running_loss: 0.0,
        };
        for batch in source.batches() {
            report.running_loss += self.train_step(batch)?;
            report.batches += 1;
        }
        if report.batches == 0 {
            return Err(Error::EmptyEpoch { epoch });
        }

        self.epochs_run += 1;
        log::info!(
            "epoch {}: training loss {:.6} over {} batches",
            epoch,
            report.mean_loss(),
            report.batches
        );
        Ok(report)
    }

    /// Runs `config.epochs` epochs and returns one report per epoch.
    pub fn fit<S: BatchSource + ?Sized>(&mut self, source: &S) -> Result<Vec<EpochReport>> {
        (0..self.config.epochs)
            .map(|_| self.train_epoch(source))
            .collect()
    }

    /// Class probabilities for `inputs` (`[n, ...]`), computed without
    /// touching the tape or any gradient.
    ///
    /// A rank-0 or rank-1 tensor is a single sample and yields `[1, classes]`.
    pub fn predict_proba(&self, inputs: &Ten64) -> Result<Ten64> {
        let (n, features) = match inputs.rank() {
            0 | 1 => (1, inputs.numel()),
            _ => (inputs.shape[0], inputs.shape[1..].iter().product()),
        };
        let flat = inputs.clone().reshape(vec![n, features])?;
        Ok(self.model.infer(&flat)?.map(|v| v.exp()))
    }
}
