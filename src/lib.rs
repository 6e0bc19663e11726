//! # Rust Neural Network Basics
//!
//! Fully-connected layers, activations, losses, gradient-descent optimizers
//! and learning-rate schedulers on top of `ndarray`.
//!
//! ## Modules
//!
//! - `nn` - Layers, activations, losses, optimizers, schedulers and the model
//! - `config` - TOML configuration that builds compiled models
//! - `error` - Error type shared by the crate
//! - `utils` - Distance helpers
//!
//! ## Example
//!
//! ```rust
//! use ndarray::array;
//! use rust_nn_basics::prelude::*;
//!
//! let scheduler = ConstantScheduler::new(0.1)?;
//! let layer = DenseLayer::new(1, Box::new(Sgd::new(Box::new(scheduler))))?.with_seed(0);
//!
//! let mut model = Model::new();
//! model.add_layer(layer)?;
//! model.add_loss(LossFunction::L2)?;
//! model.compile()?;
//!
//! let x = array![[1.0, 2.0], [0.5, -1.0]];
//! let y = Targets::from(array![[1.0], [0.0]]);
//! let losses = model.train(&x, &y, 10, 2, false)?;
//! assert_eq!(losses.len(), 10);
//! # Ok::<(), rust_nn_basics::NnError>(())
//! ```

pub mod config;
pub mod error;
pub mod nn;
pub mod utils;

pub use config::Config;
pub use error::{NnError, Result};
pub use nn::{DenseLayer, LossFunction, Model, Targets};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::config::{
        Config, LayerConfig, ModelConfig, OptimizerConfig, SchedulerConfig, TrainingConfig,
    };
    pub use crate::error::{NnError, Result};
    pub use crate::nn::{
        Activation, ActivationType, Adam, ConstantScheduler, DenseLayer, ExponentialScheduler,
        LossFunction, Model, Optimizer, Scheduler, Sgd, Targets,
    };
}
