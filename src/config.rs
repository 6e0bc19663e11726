//! Configuration management
//!
//! Loads model, training and logging settings from TOML and turns them into
//! a compiled [`Model`]. Every collaborator must be spelled out: an
//! optimizer without a scheduler is rejected instead of defaulted.

use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{NnError, Result};
use crate::nn::{
    ActivationType, Adam, ConstantScheduler, DenseLayer, ExponentialScheduler, LossFunction, Model,
    Optimizer, Scheduler, Sgd,
};

/// Learning rate schedule
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SchedulerConfig {
    Constant {
        rate: f64,
    },
    Exponential {
        initial_rate: f64,
        decay: f64,
        stage_length: usize,
        #[serde(default)]
        staircase: bool,
    },
}

impl SchedulerConfig {
    pub fn build(&self) -> Result<Box<dyn Scheduler>> {
        let scheduler: Box<dyn Scheduler> = match *self {
            SchedulerConfig::Constant { rate } => Box::new(ConstantScheduler::new(rate)?),
            SchedulerConfig::Exponential {
                initial_rate,
                decay,
                stage_length,
                staircase,
            } => Box::new(
                ExponentialScheduler::new(initial_rate, decay, stage_length)?
                    .with_staircase(staircase),
            ),
        };
        Ok(scheduler)
    }
}

fn default_beta1() -> f64 {
    0.9
}

fn default_beta2() -> f64 {
    0.999
}

fn default_epsilon() -> f64 {
    1e-8
}

/// Optimizer selection and hyperparameters
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OptimizerConfig {
    Sgd {
        #[serde(default)]
        momentum: f64,
        #[serde(default)]
        clip_norm: Option<f64>,
        #[serde(default)]
        scheduler: Option<SchedulerConfig>,
    },
    Adam {
        #[serde(default = "default_beta1")]
        beta1: f64,
        #[serde(default = "default_beta2")]
        beta2: f64,
        #[serde(default = "default_epsilon")]
        epsilon: f64,
        #[serde(default)]
        scheduler: Option<SchedulerConfig>,
    },
}

impl OptimizerConfig {
    pub fn build(&self) -> Result<Box<dyn Optimizer>> {
        match *self {
            OptimizerConfig::Sgd {
                momentum,
                clip_norm,
                scheduler,
            } => {
                let scheduler = require_scheduler(scheduler)?;
                let mut sgd = Sgd::new(scheduler.build()?).with_momentum(momentum)?;
                if let Some(clip) = clip_norm {
                    sgd = sgd.with_clip_norm(clip)?;
                }
                Ok(Box::new(sgd))
            }
            OptimizerConfig::Adam {
                beta1,
                beta2,
                epsilon,
                scheduler,
            } => {
                let scheduler = require_scheduler(scheduler)?;
                let adam = Adam::new(scheduler.build()?)
                    .with_betas(beta1, beta2)?
                    .with_epsilon(epsilon)?;
                Ok(Box::new(adam))
            }
        }
    }
}

fn require_scheduler(scheduler: Option<SchedulerConfig>) -> Result<SchedulerConfig> {
    scheduler.ok_or_else(|| NnError::Config("optimizer has no scheduler".to_string()))
}

/// One dense layer
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct LayerConfig {
    pub units: usize,
    #[serde(default)]
    pub activation: Option<ActivationType>,
    #[serde(default)]
    pub seed: Option<u64>,
    #[serde(default)]
    pub frozen: bool,
    pub optimizer: OptimizerConfig,
}

impl LayerConfig {
    pub fn build(&self) -> Result<DenseLayer> {
        let mut layer = DenseLayer::new(self.units, self.optimizer.build()?)?;
        if let Some(activation) = self.activation {
            layer = layer.with_activation(activation);
        }
        if let Some(seed) = self.seed {
            layer = layer.with_seed(seed);
        }
        if self.frozen {
            layer.freeze();
        }
        Ok(layer)
    }
}

/// Model configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ModelConfig {
    pub loss: LossFunction,
    pub layers: Vec<LayerConfig>,
}

impl Default for ModelConfig {
    fn default() -> Self {
        let scheduler = Some(SchedulerConfig::Exponential {
            initial_rate: 0.1,
            decay: 0.5,
            stage_length: 500,
            staircase: true,
        });
        Self {
            loss: LossFunction::SoftmaxCrossEntropy,
            layers: vec![
                LayerConfig {
                    units: 16,
                    activation: Some(ActivationType::Tanh),
                    seed: Some(1),
                    frozen: false,
                    optimizer: OptimizerConfig::Sgd {
                        momentum: 0.9,
                        clip_norm: Some(5.0),
                        scheduler,
                    },
                },
                LayerConfig {
                    units: 2,
                    activation: None,
                    seed: Some(2),
                    frozen: false,
                    optimizer: OptimizerConfig::Sgd {
                        momentum: 0.9,
                        clip_norm: Some(5.0),
                        scheduler,
                    },
                },
            ],
        }
    }
}

impl ModelConfig {
    /// Build and compile the model
    pub fn build(&self) -> Result<Model> {
        let mut model = Model::new();
        for layer in &self.layers {
            model.add_layer(layer.build()?)?;
        }
        model.add_loss(self.loss)?;
        model.compile()?;
        Ok(model)
    }
}

/// Training configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TrainingConfig {
    pub epochs: usize,
    pub batch_size: usize,
    pub verbose: bool,
    /// Report the loss every `log_every` epochs when verbose
    pub log_every: usize,
    /// Shuffle rows each epoch with this seed; keep order when unset
    pub shuffle_seed: Option<u64>,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            epochs: 100,
            batch_size: 32,
            verbose: true,
            log_every: 10,
            shuffle_seed: None,
        }
    }
}

impl TrainingConfig {
    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(NnError::Config("batch size must be > 0".to_string()));
        }
        if self.log_every == 0 {
            return Err(NnError::Config("log_every must be > 0".to_string()));
        }
        Ok(())
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl LoggingConfig {
    pub fn level(&self) -> Result<tracing::Level> {
        tracing::Level::from_str(&self.level)
            .map_err(|_| NnError::Config(format!("unknown log level '{}'", self.level)))
    }
}

/// Main configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(default)]
pub struct Config {
    pub model: ModelConfig,
    pub training: TrainingConfig,
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)?;
        config.training.validate()?;
        Ok(config)
    }

    /// Save configuration to file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Build the compiled model described by `[model]`
    pub fn build_model(&self) -> Result<Model> {
        self.model.build()
    }
}
