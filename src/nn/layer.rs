//! Dense (Fully Connected) Layer Implementation
//!
//! A dense layer performs: output = activation(input @ W + b)
//!
//! The input width is only known at the first forward call, which is where
//! `W` (drawn from a standard normal) and `b` (zeros) are created. While
//! training, every forward call appends its input and pre-activation to the
//! layer caches; `backward` consumes one incoming gradient per cached call
//! and `update` applies the accumulated gradients and flushes.

use ndarray::{Array2, Axis};
use ndarray_rand::rand_distr::StandardNormal;
use ndarray_rand::RandomExt;
use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::debug;

use super::activation::{create_activation, ActivationType};
use super::optimizer::Optimizer;
use crate::error::{NnError, Result};

/// Name of the weight matrix
pub const WEIGHTS: &str = "W";
/// Name of the bias row
pub const BIAS: &str = "b";

/// Parameters and their gradient accumulators
struct Parameters {
    weights: Array2<f64>,
    bias: Array2<f64>,
    weight_grad: Array2<f64>,
    bias_grad: Array2<f64>,
}

impl Parameters {
    fn new(weights: Array2<f64>, bias: Array2<f64>) -> Self {
        let weight_grad = Array2::zeros(weights.dim());
        let bias_grad = Array2::zeros(bias.dim());
        Self {
            weights,
            bias,
            weight_grad,
            bias_grad,
        }
    }

    fn zero_grad(&mut self) {
        self.weight_grad.fill(0.0);
        self.bias_grad.fill(0.0);
    }
}

/// Gradients produced by one cached forward call
struct StepGradients {
    input: Array2<f64>,
    weights: Array2<f64>,
    bias: Array2<f64>,
}

/// Dense layer with weights, bias, optional activation and its own optimizer
pub struct DenseLayer {
    output_size: usize,
    activation_type: Option<ActivationType>,
    optimizer: Box<dyn Optimizer>,
    seed: Option<u64>,
    trainable: bool,
    params: Option<Parameters>,
    input_cache: Vec<Array2<f64>>,
    derived_cache: Vec<Array2<f64>>,
}

impl DenseLayer {
    /// Create an uninitialized layer with `output_size` units
    pub fn new(output_size: usize, optimizer: Box<dyn Optimizer>) -> Result<Self> {
        if output_size == 0 {
            return Err(NnError::Config("layer output size must be > 0".to_string()));
        }
        Ok(Self {
            output_size,
            activation_type: None,
            optimizer,
            seed: None,
            trainable: true,
            params: None,
            input_cache: Vec::new(),
            derived_cache: Vec::new(),
        })
    }

    /// Apply `activation` after the affine transform
    pub fn with_activation(mut self, activation: ActivationType) -> Self {
        self.activation_type = Some(activation);
        self
    }

    /// Seed the weight initialization
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Start from fixed parameters instead of random initialization
    ///
    /// `weights` must be `(in, out)` and `bias` must be `(1, out)`.
    pub fn with_initial_parameters(
        mut self,
        weights: Array2<f64>,
        bias: Array2<f64>,
    ) -> Result<Self> {
        if weights.nrows() == 0 {
            return Err(NnError::Config("initial weights need at least one input row".to_string()));
        }
        if weights.ncols() != self.output_size {
            return Err(NnError::shape(
                "initial weights",
                &[weights.nrows(), self.output_size],
                weights.shape(),
            ));
        }
        if bias.dim() != (1, self.output_size) {
            return Err(NnError::shape("initial bias", &[1, self.output_size], bias.shape()));
        }
        self.params = Some(Parameters::new(weights, bias));
        Ok(self)
    }

    fn initialize(&mut self, input_size: usize) {
        let shape = (input_size, self.output_size);
        let weights = match self.seed {
            Some(seed) => {
                Array2::random_using(shape, StandardNormal, &mut StdRng::seed_from_u64(seed))
            }
            None => Array2::random(shape, StandardNormal),
        };
        let bias = Array2::zeros((1, self.output_size));
        debug!("Initialized dense layer {} -> {}", input_size, self.output_size);
        self.params = Some(Parameters::new(weights, bias));
    }

    /// Forward pass through the layer
    ///
    /// With `save_derived` the input and pre-activation are cached for
    /// `backward`; inference calls should pass `false`.
    pub fn forward(&mut self, input: &Array2<f64>, save_derived: bool) -> Result<Array2<f64>> {
        if self.params.is_none() {
            self.initialize(input.ncols());
        }
        let params = self.params.as_ref().ok_or(NnError::Uninitialized)?;
        if input.ncols() != params.weights.nrows() {
            return Err(NnError::shape(
                "layer input",
                &[input.nrows(), params.weights.nrows()],
                input.shape(),
            ));
        }

        // Linear transformation: z = input @ W + b
        let z = input.dot(&params.weights) + &params.bias;
        let output = match self.activation_type {
            Some(kind) => create_activation(kind).forward(&z),
            None => z.clone(),
        };

        if save_derived {
            self.input_cache.push(input.clone());
            self.derived_cache.push(z);
        }
        Ok(output)
    }

    fn backprop(&self, gradients: &[Array2<f64>]) -> Result<Vec<StepGradients>> {
        let params = self.params.as_ref().ok_or(NnError::Uninitialized)?;
        if self.input_cache.is_empty() {
            return Err(NnError::EmptyCache);
        }
        if gradients.len() != self.input_cache.len() {
            return Err(NnError::CacheMismatch {
                cached: self.input_cache.len(),
                received: gradients.len(),
            });
        }
        let activation = self.activation_type.map(create_activation);

        self.input_cache
            .iter()
            .zip(&self.derived_cache)
            .zip(gradients)
            .map(|((input, z), grad)| {
                if grad.dim() != z.dim() {
                    return Err(NnError::shape("layer output gradient", z.shape(), grad.shape()));
                }
                let dz = match &activation {
                    Some(act) => grad * &act.backward(z),
                    None => grad.clone(),
                };
                Ok(StepGradients {
                    input: dz.dot(&params.weights.t()),
                    weights: input.t().dot(&dz),
                    bias: dz.sum_axis(Axis(0)).insert_axis(Axis(0)),
                })
            })
            .collect()
    }

    /// Backward pass, one incoming gradient per cached forward call
    ///
    /// Returns the gradients with respect to each cached input, in cache
    /// order. With `save_gradient` the parameter gradients are accumulated.
    pub fn backward(
        &mut self,
        gradients: &[Array2<f64>],
        save_gradient: bool,
    ) -> Result<Vec<Array2<f64>>> {
        if !self.trainable {
            return Err(NnError::FrozenLayer("run backward"));
        }
        let steps = self.backprop(gradients)?;
        if save_gradient {
            let params = self.params.as_mut().ok_or(NnError::Uninitialized)?;
            for step in &steps {
                params.weight_grad += &step.weights;
                params.bias_grad += &step.bias;
            }
        }
        Ok(steps.into_iter().map(|s| s.input).collect())
    }

    /// Backward pass for the common case of exactly one cached forward call
    pub fn backward_single(
        &mut self,
        gradient: &Array2<f64>,
        save_gradient: bool,
    ) -> Result<Array2<f64>> {
        let mut inputs = self.backward(std::slice::from_ref(gradient), save_gradient)?;
        inputs.pop().ok_or(NnError::EmptyCache)
    }

    /// Input gradients without accumulation; also valid for frozen layers
    pub(crate) fn propagate(&self, gradients: &[Array2<f64>]) -> Result<Vec<Array2<f64>>> {
        Ok(self.backprop(gradients)?.into_iter().map(|s| s.input).collect())
    }

    /// Apply the accumulated gradients through the optimizer, then flush
    pub fn update(&mut self, current_loss: Option<f64>) -> Result<()> {
        if !self.trainable {
            return Err(NnError::FrozenLayer("update"));
        }
        let params = self.params.as_mut().ok_or(NnError::Uninitialized)?;

        self.optimizer.advance_step();
        let weights = self
            .optimizer
            .update(&params.weights, &params.weight_grad, WEIGHTS, current_loss)?;
        let bias = self.optimizer.update(&params.bias, &params.bias_grad, BIAS, current_loss)?;
        params.weights = weights;
        params.bias = bias;
        debug!("Updated dense layer at optimizer step {}", self.optimizer.step());

        self.flush()
    }

    /// Clear caches and zero gradient accumulators
    pub fn flush(&mut self) -> Result<()> {
        if !self.trainable {
            return Err(NnError::FrozenLayer("flush"));
        }
        self.clear_cache();
        if let Some(params) = self.params.as_mut() {
            params.zero_grad();
        }
        Ok(())
    }

    pub(crate) fn clear_cache(&mut self) {
        self.input_cache.clear();
        self.derived_cache.clear();
    }

    /// Stop gradient accumulation and updates
    pub fn freeze(&mut self) {
        self.trainable = false;
    }

    pub fn unfreeze(&mut self) {
        self.trainable = true;
    }

    pub fn is_trainable(&self) -> bool {
        self.trainable
    }

    pub fn is_initialized(&self) -> bool {
        self.params.is_some()
    }

    /// Parameter by name (`"W"` or `"b"`)
    pub fn parameter(&self, name: &str) -> Option<&Array2<f64>> {
        let params = self.params.as_ref()?;
        match name {
            WEIGHTS => Some(&params.weights),
            BIAS => Some(&params.bias),
            _ => None,
        }
    }

    /// Accumulated gradient by parameter name
    pub fn gradient(&self, name: &str) -> Option<&Array2<f64>> {
        let params = self.params.as_ref()?;
        match name {
            WEIGHTS => Some(&params.weight_grad),
            BIAS => Some(&params.bias_grad),
            _ => None,
        }
    }

    pub fn weights(&self) -> Option<&Array2<f64>> {
        self.parameter(WEIGHTS)
    }

    pub fn bias(&self) -> Option<&Array2<f64>> {
        self.parameter(BIAS)
    }

    pub fn input_size(&self) -> Option<usize> {
        self.params.as_ref().map(|p| p.weights.nrows())
    }

    pub fn output_size(&self) -> usize {
        self.output_size
    }

    pub fn activation(&self) -> Option<ActivationType> {
        self.activation_type
    }

    pub fn optimizer(&self) -> &dyn Optimizer {
        self.optimizer.as_ref()
    }

    /// Number of cached forward calls since the last flush
    pub fn cache_len(&self) -> usize {
        self.input_cache.len()
    }

    /// Number of cached pre-activations since the last flush
    pub fn derived_cache_len(&self) -> usize {
        self.derived_cache.len()
    }

    /// Get number of parameters (0 until initialized)
    pub fn num_parameters(&self) -> usize {
        self.params
            .as_ref()
            .map_or(0, |p| p.weights.len() + p.bias.len())
    }

    /// One-line description
    pub fn summary(&self) -> String {
        let input = self
            .input_size()
            .map_or_else(|| "?".to_string(), |n| n.to_string());
        let activation = self
            .activation_type
            .map_or_else(|| "none".to_string(), |a| a.to_string());
        format!(
            "Dense({} -> {}, activation: {}, optimizer: {}{})",
            input,
            self.output_size,
            activation,
            self.optimizer.name(),
            if self.trainable { "" } else { ", frozen" }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nn::optimizer::Sgd;
    use crate::nn::scheduler::ConstantScheduler;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    fn sgd(rate: f64) -> Box<dyn Optimizer> {
        Box::new(Sgd::new(Box::new(ConstantScheduler::new(rate).unwrap())))
    }

    #[test]
    fn test_layer_initialized_on_first_forward() {
        let mut layer = DenseLayer::new(5, sgd(0.1)).unwrap();
        assert!(!layer.is_initialized());
        assert_eq!(layer.num_parameters(), 0);

        let output = layer.forward(&Array2::ones((2, 10)), true).unwrap();
        assert_eq!(output.dim(), (2, 5));
        assert_eq!(layer.weights().unwrap().dim(), (10, 5));
        assert_eq!(layer.bias().unwrap(), &Array2::<f64>::zeros((1, 5)));
        assert_eq!(layer.gradient(WEIGHTS).unwrap(), &Array2::<f64>::zeros((10, 5)));
        assert_eq!(layer.num_parameters(), 10 * 5 + 5);
    }

    #[test]
    fn test_seeded_initialization_is_reproducible() {
        let mut a = DenseLayer::new(3, sgd(0.1)).unwrap().with_seed(7);
        let mut b = DenseLayer::new(3, sgd(0.1)).unwrap().with_seed(7);
        a.forward(&Array2::ones((1, 4)), false).unwrap();
        b.forward(&Array2::ones((1, 4)), false).unwrap();
        assert_eq!(a.weights(), b.weights());
    }

    #[test]
    fn test_forward_with_activation() {
        let mut layer = DenseLayer::new(2, sgd(0.1))
            .unwrap()
            .with_activation(ActivationType::ReLU)
            .with_initial_parameters(array![[1.0, -1.0], [2.0, 1.0]], array![[0.5, -4.0]])
            .unwrap();
        let out = layer.forward(&array![[1.0, 1.0]], false).unwrap();
        // z = [3.5, -4.0]
        assert_eq!(out, array![[3.5, 0.0]]);
    }

    #[test]
    fn test_inference_does_not_cache() {
        let mut layer = DenseLayer::new(3, sgd(0.1)).unwrap();
        for _ in 0..5 {
            layer.forward(&Array2::ones((4, 2)), false).unwrap();
        }
        assert_eq!(layer.cache_len(), 0);
        layer.forward(&Array2::ones((4, 2)), true).unwrap();
        layer.forward(&Array2::ones((4, 2)), true).unwrap();
        assert_eq!(layer.cache_len(), 2);
    }

    #[test]
    fn test_forward_rejects_wrong_width() {
        let mut layer = DenseLayer::new(3, sgd(0.1)).unwrap();
        layer.forward(&Array2::ones((1, 2)), true).unwrap();
        let err = layer.forward(&Array2::ones((1, 4)), true);
        assert!(matches!(err, Err(NnError::ShapeMismatch { .. })));
        assert_eq!(layer.cache_len(), 1);
    }

    #[test]
    fn test_backward_gradients() {
        let mut layer = DenseLayer::new(1, sgd(0.1))
            .unwrap()
            .with_initial_parameters(array![[0.5], [-1.0]], array![[0.25]])
            .unwrap();
        let x = array![[1.0, 2.0], [3.0, -1.0]];
        layer.forward(&x, true).unwrap();
        let d_input = layer.backward_single(&array![[1.0], [2.0]], true).unwrap();

        assert_eq!(d_input, array![[0.5, -1.0], [1.0, -2.0]]);
        // x^T @ dz
        assert_eq!(layer.gradient(WEIGHTS).unwrap(), &array![[7.0], [0.0]]);
        assert_eq!(layer.gradient(BIAS).unwrap(), &array![[3.0]]);
    }

    #[test]
    fn test_backward_through_activation_matches_finite_difference() {
        let w = array![[0.3, -0.7], [0.9, 0.2], [-0.4, 0.5]];
        let b = array![[0.1, -0.2]];
        let x = array![[0.5, -1.0, 2.0]];
        let mut layer = DenseLayer::new(2, sgd(0.1))
            .unwrap()
            .with_activation(ActivationType::Tanh)
            .with_initial_parameters(w.clone(), b.clone())
            .unwrap();
        layer.forward(&x, true).unwrap();
        // loss = sum(output), so the incoming gradient is all ones
        layer.backward_single(&Array2::ones((1, 2)), true).unwrap();
        let analytic = layer.gradient(WEIGHTS).unwrap().clone();

        let h = 1e-6;
        for i in 0..3 {
            for j in 0..2 {
                let mut plus = w.clone();
                plus[[i, j]] += h;
                let mut minus = w.clone();
                minus[[i, j]] -= h;
                let f = |weights: Array2<f64>| {
                    let mut probe = DenseLayer::new(2, sgd(0.1))
                        .unwrap()
                        .with_activation(ActivationType::Tanh)
                        .with_initial_parameters(weights, b.clone())
                        .unwrap();
                    probe.forward(&x, false).unwrap().sum()
                };
                let numeric = (f(plus) - f(minus)) / (2.0 * h);
                assert_abs_diff_eq!(analytic[[i, j]], numeric, epsilon = 1e-4);
            }
        }
    }

    #[test]
    fn test_backward_multiple_cached_calls() {
        let mut layer = DenseLayer::new(1, sgd(0.1))
            .unwrap()
            .with_initial_parameters(array![[1.0], [1.0]], array![[0.0]])
            .unwrap();
        layer.forward(&array![[1.0, 0.0]], true).unwrap();
        layer.forward(&array![[0.0, 1.0]], true).unwrap();

        let inputs = layer.backward(&[array![[1.0]], array![[3.0]]], true).unwrap();
        assert_eq!(inputs.len(), 2);
        assert_eq!(inputs[1], array![[3.0, 3.0]]);
        assert_eq!(layer.gradient(WEIGHTS).unwrap(), &array![[1.0], [3.0]]);

        let err = layer.backward(&[array![[1.0]]], true);
        assert!(matches!(err, Err(NnError::CacheMismatch { cached: 2, received: 1 })));
    }

    #[test]
    fn test_backward_without_saving_leaves_accumulators() {
        let mut layer = DenseLayer::new(2, sgd(0.1)).unwrap();
        layer.forward(&Array2::ones((3, 4)), true).unwrap();
        layer.backward_single(&Array2::ones((3, 2)), false).unwrap();
        assert!(layer.gradient(WEIGHTS).unwrap().iter().all(|&g| g == 0.0));
    }

    #[test]
    fn test_backward_with_empty_cache() {
        let mut layer = DenseLayer::new(2, sgd(0.1)).unwrap();
        layer.forward(&Array2::ones((1, 2)), false).unwrap();
        assert!(matches!(
            layer.backward_single(&Array2::ones((1, 2)), true),
            Err(NnError::EmptyCache)
        ));
    }

    #[test]
    fn test_update_flushes() {
        let mut layer = DenseLayer::new(3, sgd(0.1)).unwrap().with_seed(1);
        layer.forward(&Array2::ones((2, 4)), true).unwrap();
        assert_eq!(layer.derived_cache_len(), 1);
        layer.backward_single(&Array2::ones((2, 3)), true).unwrap();
        let before = layer.weights().unwrap().clone();
        layer.update(Some(1.0)).unwrap();

        assert_eq!(layer.cache_len(), 0);
        assert_eq!(layer.derived_cache_len(), 0);
        assert_eq!(layer.gradient(WEIGHTS).unwrap(), &Array2::<f64>::zeros((4, 3)));
        assert_eq!(layer.gradient(BIAS).unwrap(), &Array2::<f64>::zeros((1, 3)));
        // each weight received gradient 2 (two rows of ones)
        assert_eq!(layer.weights().unwrap(), &(before - 0.2));
        assert_eq!(layer.optimizer().step(), 1);
    }

    #[test]
    fn test_update_before_forward() {
        let mut layer = DenseLayer::new(3, sgd(0.1)).unwrap();
        assert!(matches!(layer.update(None), Err(NnError::Uninitialized)));
    }

    #[test]
    fn test_frozen_layer() {
        let mut layer = DenseLayer::new(2, sgd(0.1)).unwrap();
        layer.forward(&Array2::ones((1, 2)), true).unwrap();
        layer.freeze();
        assert!(!layer.is_trainable());
        assert!(matches!(layer.update(None), Err(NnError::FrozenLayer(_))));
        assert!(matches!(layer.flush(), Err(NnError::FrozenLayer(_))));
        assert!(matches!(
            layer.backward_single(&Array2::ones((1, 2)), true),
            Err(NnError::FrozenLayer(_))
        ));
        assert!(layer.summary().contains("frozen"));

        layer.unfreeze();
        layer.backward_single(&Array2::ones((1, 2)), true).unwrap();
        layer.update(None).unwrap();
    }

    #[test]
    fn test_invalid_construction() {
        assert!(DenseLayer::new(0, sgd(0.1)).is_err());
        let bad_bias = DenseLayer::new(2, sgd(0.1))
            .unwrap()
            .with_initial_parameters(Array2::zeros((3, 2)), Array2::zeros((2, 1)));
        assert!(matches!(bad_bias, Err(NnError::ShapeMismatch { .. })));
    }

    #[test]
    fn test_summary() {
        let mut layer = DenseLayer::new(4, sgd(0.1))
            .unwrap()
            .with_activation(ActivationType::Sigmoid);
        assert_eq!(layer.summary(), "Dense(? -> 4, activation: Sigmoid, optimizer: SGD)");
        layer.forward(&Array2::ones((1, 6)), false).unwrap();
        assert_eq!(layer.summary(), "Dense(6 -> 4, activation: Sigmoid, optimizer: SGD)");
    }
}
