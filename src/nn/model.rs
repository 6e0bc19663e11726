//! Model Orchestration
//!
//! An ordered stack of dense layers with one loss function. Layers and the
//! loss are added first, `compile` checks the stack, and only then can the
//! model train, predict or validate.

use std::fmt;

use ndarray::{Array2, Axis};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use tracing::{debug, info};

use super::layer::DenseLayer;
use super::loss::{LossFunction, Targets};
use crate::config::TrainingConfig;
use crate::error::{NnError, Result};

/// Feedforward model built from dense layers
#[derive(Default)]
pub struct Model {
    layers: Vec<DenseLayer>,
    loss: Option<LossFunction>,
    compiled: bool,
}

impl Model {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a layer; only allowed before `compile`
    pub fn add_layer(&mut self, layer: DenseLayer) -> Result<()> {
        if self.compiled {
            return Err(NnError::AlreadyCompiled("add a layer"));
        }
        self.layers.push(layer);
        Ok(())
    }

    /// Set the loss function; only allowed before `compile`
    pub fn add_loss(&mut self, loss: LossFunction) -> Result<()> {
        if self.compiled {
            return Err(NnError::AlreadyCompiled("change the loss"));
        }
        self.loss = Some(loss);
        Ok(())
    }

    /// Check the layer stack and loss, then allow training
    pub fn compile(&mut self) -> Result<()> {
        if self.layers.is_empty() {
            return Err(NnError::Config("no layers to compile".to_string()));
        }
        if self.loss.is_none() {
            return Err(NnError::Config("no loss function".to_string()));
        }
        for pair in self.layers.windows(2) {
            if let Some(input) = pair[1].input_size() {
                if input != pair[0].output_size() {
                    return Err(NnError::shape("layer stack", &[pair[0].output_size()], &[input]));
                }
            }
        }
        self.compiled = true;
        debug!("Compiled model with {} layers", self.layers.len());
        Ok(())
    }

    fn ready(&self, operation: &'static str) -> Result<LossFunction> {
        if !self.compiled {
            return Err(NnError::NotCompiled(operation));
        }
        self.loss
            .ok_or_else(|| NnError::Config("no loss function".to_string()))
    }

    fn check_caches_empty(&self) -> Result<()> {
        for (layer, l) in self.layers.iter().enumerate() {
            let cached = l.cache_len().max(l.derived_cache_len());
            if cached > 0 {
                return Err(NnError::PendingCache { layer, cached });
            }
        }
        Ok(())
    }

    fn check_inputs(&self, x: &Array2<f64>) -> Result<()> {
        if let Some(input) = self.layers.first().and_then(|l| l.input_size()) {
            if x.ncols() != input {
                return Err(NnError::shape("model input", &[x.nrows(), input], x.shape()));
            }
        }
        Ok(())
    }

    /// Train with per-epoch loss reporting every epoch when `verbose`
    ///
    /// Returns the loss of every epoch, averaged over samples so a short
    /// last batch weighs in proportion to its size.
    pub fn train(
        &mut self,
        x: &Array2<f64>,
        y: &Targets,
        epochs: usize,
        batch_size: usize,
        verbose: bool,
    ) -> Result<Vec<f64>> {
        let config = TrainingConfig {
            epochs,
            batch_size,
            verbose,
            log_every: 1,
            shuffle_seed: None,
        };
        self.fit(x, y, &config)
    }

    /// Train with full control over batching, shuffling and logging cadence
    pub fn fit(
        &mut self,
        x: &Array2<f64>,
        y: &Targets,
        config: &TrainingConfig,
    ) -> Result<Vec<f64>> {
        let loss_fn = self.ready("train")?;
        config.validate()?;
        let n_samples = x.nrows();
        if n_samples != y.len() {
            return Err(NnError::SampleCountMismatch {
                inputs: n_samples,
                targets: y.len(),
            });
        }
        if n_samples == 0 {
            return Err(NnError::EmptyBatch("train"));
        }
        self.check_inputs(x)?;
        loss_fn.validate_targets(y, self.output_size())?;
        self.check_caches_empty()?;

        info!(
            "Start training with {} samples, {} epochs, batch size {}",
            n_samples, config.epochs, config.batch_size
        );

        let mut rng = config.shuffle_seed.map(StdRng::seed_from_u64);
        let mut indices: Vec<usize> = (0..n_samples).collect();
        let mut losses = Vec::with_capacity(config.epochs);

        for epoch in 0..config.epochs {
            if let Some(rng) = rng.as_mut() {
                indices.shuffle(rng);
            }

            let mut total_loss = 0.0;
            for batch in indices.chunks(config.batch_size) {
                let x_batch = x.select(Axis(0), batch);
                let y_batch = y.select(batch);
                match self.train_step(&x_batch, &y_batch, loss_fn) {
                    Ok(loss) => total_loss += loss * batch.len() as f64,
                    Err(e) => {
                        self.discard_caches();
                        return Err(e);
                    }
                }
            }

            let loss = total_loss / n_samples as f64;
            losses.push(loss);

            if config.verbose && (epoch + 1) % config.log_every == 0 {
                info!("Epoch {}/{}: loss = {:.6}", epoch + 1, config.epochs, loss);
            }
        }

        info!("Done training");
        Ok(losses)
    }

    /// Forward, loss, reverse pass and per-layer update for one mini-batch
    fn train_step(&mut self, x: &Array2<f64>, y: &Targets, loss_fn: LossFunction) -> Result<f64> {
        let mut output = x.clone();
        for layer in &mut self.layers {
            output = layer.forward(&output, true)?;
        }

        let (loss, gradient) = loss_fn.evaluate(&output, y)?;
        debug!("Batch loss = {:.6}", loss);

        let mut gradients = vec![gradient];
        for layer in self.layers.iter_mut().rev() {
            if layer.is_trainable() {
                gradients = layer.backward(&gradients, true)?;
                layer.update(Some(loss))?;
            } else {
                gradients = layer.propagate(&gradients)?;
                layer.clear_cache();
            }
        }
        Ok(loss)
    }

    fn discard_caches(&mut self) {
        for layer in &mut self.layers {
            layer.clear_cache();
        }
    }

    fn forward_inference(&mut self, x: &Array2<f64>) -> Result<Array2<f64>> {
        self.check_inputs(x)?;
        let mut output = x.clone();
        for layer in &mut self.layers {
            output = layer.forward(&output, false)?;
        }
        Ok(output)
    }

    /// Forward pass without caching
    pub fn predict(&mut self, x: &Array2<f64>) -> Result<Array2<f64>> {
        self.ready("predict")?;
        self.forward_inference(x)
    }

    /// Loss of the current parameters on `(x, y)`
    pub fn validation(&mut self, x: &Array2<f64>, y: &Targets) -> Result<f64> {
        let loss_fn = self.ready("validation")?;
        if x.nrows() != y.len() {
            return Err(NnError::SampleCountMismatch {
                inputs: x.nrows(),
                targets: y.len(),
            });
        }
        loss_fn.validate_targets(y, self.output_size())?;
        let predictions = self.forward_inference(x)?;
        loss_fn.value(&predictions, y)
    }

    /// Per-layer description and parameter counts
    pub fn describe(&self) -> ModelSummary {
        let layers = self
            .layers
            .iter()
            .map(|l| LayerSummary {
                description: l.summary(),
                parameters: l.num_parameters(),
            })
            .collect();
        ModelSummary {
            layers,
            total_parameters: self.num_parameters(),
            loss: self.loss,
        }
    }

    /// Get total number of parameters
    pub fn num_parameters(&self) -> usize {
        self.layers.iter().map(|l| l.num_parameters()).sum()
    }

    /// Width of the final layer
    pub fn output_size(&self) -> usize {
        self.layers.last().map_or(0, |l| l.output_size())
    }

    pub fn layers(&self) -> &[DenseLayer] {
        &self.layers
    }

    pub fn layers_mut(&mut self) -> &mut [DenseLayer] {
        &mut self.layers
    }

    pub fn loss(&self) -> Option<LossFunction> {
        self.loss
    }

    pub fn is_compiled(&self) -> bool {
        self.compiled
    }
}

/// Summary of one layer
#[derive(Debug, Clone, PartialEq)]
pub struct LayerSummary {
    pub description: String,
    pub parameters: usize,
}

/// Report produced by [`Model::describe`]
#[derive(Debug, Clone, PartialEq)]
pub struct ModelSummary {
    pub layers: Vec<LayerSummary>,
    pub total_parameters: usize,
    pub loss: Option<LossFunction>,
}

impl fmt::Display for ModelSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, layer) in self.layers.iter().enumerate() {
            writeln!(f, "----------------------------")?;
            writeln!(f, "Layer {}: {}, params: {}", i + 1, layer.description, layer.parameters)?;
        }
        writeln!(f, "----------------------------")?;
        writeln!(f, "Total parameters: {}", self.total_parameters)?;
        match self.loss {
            Some(loss) => write!(f, "Loss function: {:?}", loss),
            None => write!(f, "Loss function: none"),
        }
    }
}
