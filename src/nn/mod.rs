//! Neural Network Module
//!
//! Provides building blocks for feedforward neural networks:
//! - Activation functions (ReLU, Sigmoid, Tanh)
//! - Loss functions (L2, L1, Hinge, Softmax cross-entropy)
//! - Learning rate schedulers and optimizers (SGD, Adam)
//! - Dense layers with forward and backward propagation
//! - A model that wires them into a training loop

pub mod activation;
pub mod layer;
pub mod loss;
pub mod model;
pub mod optimizer;
pub mod scheduler;

pub use activation::{create_activation, Activation, ActivationType};
pub use layer::{DenseLayer, BIAS, WEIGHTS};
pub use loss::{LossFunction, Targets};
pub use model::{LayerSummary, Model, ModelSummary};
pub use optimizer::{Adam, Optimizer, Sgd};
pub use scheduler::{ConstantScheduler, ExponentialScheduler, Scheduler};
