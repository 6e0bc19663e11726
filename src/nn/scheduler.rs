//! Learning Rate Schedulers
//!
//! A scheduler is a pure function from the optimizer step (and optionally
//! the current loss) to a learning rate.

use std::fmt;

use crate::error::{NnError, Result};

/// Learning rate schedule consulted by an optimizer on every update
pub trait Scheduler: Send + Sync + fmt::Display {
    /// Learning rate at `step`
    fn rate(&self, step: usize, current_loss: Option<f64>) -> f64;

    /// Clone the scheduler behind a box
    fn clone_box(&self) -> Box<dyn Scheduler>;
}

fn check_positive(name: &str, value: f64) -> Result<()> {
    if !value.is_finite() || value <= 0.0 {
        return Err(NnError::Config(format!("{} must be finite and > 0, got {}", name, value)));
    }
    Ok(())
}

/// Fixed learning rate
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConstantScheduler {
    rate: f64,
}

impl ConstantScheduler {
    pub fn new(rate: f64) -> Result<Self> {
        check_positive("learning rate", rate)?;
        Ok(Self { rate })
    }
}

impl Scheduler for ConstantScheduler {
    fn rate(&self, _step: usize, _current_loss: Option<f64>) -> f64 {
        self.rate
    }

    fn clone_box(&self) -> Box<dyn Scheduler> {
        Box::new(*self)
    }
}

impl fmt::Display for ConstantScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Constant Scheduler: learning rate {}", self.rate)
    }
}

/// Exponential decay: `initial_rate * decay^(step / stage_length)`
///
/// With `staircase` the exponent is floored, so the rate changes once per
/// stage. A decay in `(0, 1)` shrinks the rate, a decay `>= 1` grows it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExponentialScheduler {
    initial_rate: f64,
    decay: f64,
    stage_length: usize,
    staircase: bool,
}

impl ExponentialScheduler {
    pub fn new(initial_rate: f64, decay: f64, stage_length: usize) -> Result<Self> {
        check_positive("initial learning rate", initial_rate)?;
        if !decay.is_finite() || decay < 0.0 {
            return Err(NnError::Config(format!("decay must be finite and >= 0, got {}", decay)));
        }
        if stage_length == 0 {
            return Err(NnError::Config("stage length must be > 0".to_string()));
        }
        Ok(Self {
            initial_rate,
            decay,
            stage_length,
            staircase: false,
        })
    }

    /// Floor the stage so the rate is piecewise constant
    pub fn with_staircase(mut self, staircase: bool) -> Self {
        self.staircase = staircase;
        self
    }

    fn stage(&self, step: usize) -> f64 {
        let stage = step as f64 / self.stage_length as f64;
        if self.staircase {
            stage.floor()
        } else {
            stage
        }
    }
}

impl Scheduler for ExponentialScheduler {
    fn rate(&self, step: usize, _current_loss: Option<f64>) -> f64 {
        self.initial_rate * self.decay.powf(self.stage(step))
    }

    fn clone_box(&self) -> Box<dyn Scheduler> {
        Box::new(*self)
    }
}

impl fmt::Display for ExponentialScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Exponential Scheduler: initial learning rate {}, stage length {}, staircase {}, \
             decay {}",
            self.initial_rate, self.stage_length, self.staircase, self.decay
        )
    }
}
