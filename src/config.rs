//! Training configuration.
//!
//! A [`TrainConfig`] is plain data with `with_*` builders. Sessions only
//! accept a config after it passes [`briny`] validation, so an invalid
//! learning rate or epoch count fails at construction rather than halfway
//! through training.

use briny::prelude::{TrustedData, Validate, ValidationError};

use crate::error::{Error, Result};

/// Hyperparameters for a [`crate::session::TrainingSession`].
#[derive(Debug, Clone, PartialEq)]
pub struct TrainConfig {
    /// SGD step size.
    pub learning_rate: f64,
    /// Momentum coefficient; `0.0` is plain SGD.
    pub momentum: f64,
    /// Number of passes over the batch source in `fit`.
    pub epochs: usize,
    /// Seed for parameter initialisation.
    pub seed: u64,
    /// Emit a debug log line every this many steps; `0` disables them.
    pub log_every: usize,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            learning_rate: 0.003,
            momentum: 0.0,
            epochs: 5,
            seed: 0,
            log_every: 100,
        }
    }
}

impl TrainConfig {
    pub fn with_learning_rate(mut self, learning_rate: f64) -> Self {
        self.learning_rate = learning_rate;
        self
    }

    pub fn with_momentum(mut self, momentum: f64) -> Self {
        self.momentum = momentum;
        self
    }

    pub fn with_epochs(mut self, epochs: usize) -> Self {
        self.epochs = epochs;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_log_every(mut self, log_every: usize) -> Self {
        self.log_every = log_every;
        self
    }

    fn problem(&self) -> Option<&'static str> {
        if !self.learning_rate.is_finite() || self.learning_rate <= 0.0 {
            Some("learning rate must be finite and positive")
        } else if !(0.0..1.0).contains(&self.momentum) {
            Some("momentum must lie in [0, 1)")
        } else if self.epochs == 0 {
            Some("epochs must be at least 1")
        } else {
            None
        }
    }

    /// Runs validation and hands the config back if it passes.
    ///
    /// # Errors
    /// [`Error::InvalidConfig`] naming the first offending field.
    ///
    /// ```rust
    /// use briny_grad::config::TrainConfig;
    ///
    /// assert!(TrainConfig::default().validated().is_ok());
    /// assert!(TrainConfig::default().with_learning_rate(0.0).validated().is_err());
    /// ```
    pub fn validated(self) -> Result<Self> {
        let reason = self.problem().unwrap_or("rejected by validation");
        TrustedData::new(self)
            .map(|trusted| trusted.into_inner())
            .map_err(|_| Error::InvalidConfig(reason.to_string()))
    }
}

impl Validate for TrainConfig {
    fn validate(&self) -> core::result::Result<(), ValidationError> {
        match self.problem() {
            Some(_) => Err(ValidationError),
            None => Ok(()),
        }
    }
}
