//! Optimization Algorithms
//!
//! Implements the parameter update rules used by layers:
//! - SGD with momentum and optional gradient-norm clipping
//! - Adam (Adaptive Moment Estimation)
//!
//! Every optimizer returns the fully updated parameter and keeps its
//! auxiliary state keyed by parameter name, so one instance can serve all
//! parameters of a layer.

use std::collections::HashMap;

use ndarray::Array2;
use tracing::debug;

use super::scheduler::Scheduler;
use crate::error::{NnError, Result};

/// Optimizer trait for parameter updates
pub trait Optimizer: Send + Sync {
    /// Return `param` after one update step with `grad`
    fn update(
        &mut self,
        param: &Array2<f64>,
        grad: &Array2<f64>,
        name: &str,
        current_loss: Option<f64>,
    ) -> Result<Array2<f64>>;

    /// Advance the step counter consulted by the scheduler
    fn advance_step(&mut self);

    /// Current step counter
    fn step(&self) -> usize;

    /// Reset optimizer state (for new training run)
    fn reset(&mut self);

    /// Clone the configuration with fresh state
    fn clone_box(&self) -> Box<dyn Optimizer>;

    /// Short name for summaries
    fn name(&self) -> &'static str;
}

fn check_shapes(param: &Array2<f64>, grad: &Array2<f64>) -> Result<()> {
    if param.dim() != grad.dim() {
        return Err(NnError::shape("optimizer gradient", param.shape(), grad.shape()));
    }
    Ok(())
}

fn check_unit_interval(name: &str, value: f64) -> Result<()> {
    if !(0.0..1.0).contains(&value) {
        return Err(NnError::Config(format!("{} must be in [0, 1), got {}", name, value)));
    }
    Ok(())
}

/// L2 norm over every element
pub fn frobenius_norm(x: &Array2<f64>) -> f64 {
    x.iter().map(|v| v * v).sum::<f64>().sqrt()
}

/// Stochastic Gradient Descent with momentum and gradient clipping
pub struct Sgd {
    momentum: f64,
    clip_norm: Option<f64>,
    scheduler: Box<dyn Scheduler>,
    current_step: usize,
    velocity: HashMap<String, Array2<f64>>,
}

impl Sgd {
    pub fn new(scheduler: Box<dyn Scheduler>) -> Self {
        Self {
            momentum: 0.0,
            clip_norm: None,
            scheduler,
            current_step: 0,
            velocity: HashMap::new(),
        }
    }

    pub fn with_momentum(mut self, momentum: f64) -> Result<Self> {
        check_unit_interval("momentum", momentum)?;
        self.momentum = momentum;
        Ok(self)
    }

    /// Rescale gradients whose L2 norm exceeds `clip_norm`
    pub fn with_clip_norm(mut self, clip_norm: f64) -> Result<Self> {
        if !clip_norm.is_finite() || clip_norm <= 0.0 {
            return Err(NnError::Config(format!(
                "clip norm must be finite and > 0, got {}",
                clip_norm
            )));
        }
        self.clip_norm = Some(clip_norm);
        Ok(self)
    }

    pub fn momentum(&self) -> f64 {
        self.momentum
    }

    pub fn clip_norm(&self) -> Option<f64> {
        self.clip_norm
    }

    /// Velocity stored for `name`, if any update has been applied to it
    pub fn velocity(&self, name: &str) -> Option<&Array2<f64>> {
        self.velocity.get(name)
    }

    fn clip(&self, grad: &Array2<f64>) -> Array2<f64> {
        match self.clip_norm {
            Some(threshold) => {
                let norm = frobenius_norm(grad);
                // a zero norm never exceeds a positive threshold
                if norm > threshold {
                    debug!("Clipping gradient norm {:.6} to {}", norm, threshold);
                    grad * (threshold / norm)
                } else {
                    grad.clone()
                }
            }
            None => grad.clone(),
        }
    }
}

impl Optimizer for Sgd {
    fn update(
        &mut self,
        param: &Array2<f64>,
        grad: &Array2<f64>,
        name: &str,
        current_loss: Option<f64>,
    ) -> Result<Array2<f64>> {
        check_shapes(param, grad)?;
        let rate = self.scheduler.rate(self.current_step, current_loss);
        let grad = self.clip(grad);

        let update = match self.velocity.get(name) {
            Some(prev) => {
                check_shapes(param, prev)?;
                prev * self.momentum + &grad * rate
            }
            None => grad * rate,
        };
        let updated = param - &update;
        self.velocity.insert(name.to_string(), update);
        Ok(updated)
    }

    fn advance_step(&mut self) {
        self.current_step += 1;
    }

    fn step(&self) -> usize {
        self.current_step
    }

    fn reset(&mut self) {
        self.current_step = 0;
        self.velocity.clear();
    }

    fn clone_box(&self) -> Box<dyn Optimizer> {
        Box::new(Self {
            momentum: self.momentum,
            clip_norm: self.clip_norm,
            scheduler: self.scheduler.clone_box(),
            current_step: 0,
            velocity: HashMap::new(),
        })
    }

    fn name(&self) -> &'static str {
        "SGD"
    }
}

/// First/second moment estimates for one parameter
#[derive(Debug, Clone)]
struct Moments {
    m: Array2<f64>,
    v: Array2<f64>,
    t: i32,
}

/// Adam optimizer (Adaptive Moment Estimation)
pub struct Adam {
    beta1: f64,
    beta2: f64,
    epsilon: f64,
    scheduler: Box<dyn Scheduler>,
    current_step: usize,
    moments: HashMap<String, Moments>,
}

impl Adam {
    pub fn new(scheduler: Box<dyn Scheduler>) -> Self {
        Self {
            beta1: 0.9,
            beta2: 0.999,
            epsilon: 1e-8,
            scheduler,
            current_step: 0,
            moments: HashMap::new(),
        }
    }

    pub fn with_betas(mut self, beta1: f64, beta2: f64) -> Result<Self> {
        check_unit_interval("beta1", beta1)?;
        check_unit_interval("beta2", beta2)?;
        self.beta1 = beta1;
        self.beta2 = beta2;
        Ok(self)
    }

    pub fn with_epsilon(mut self, epsilon: f64) -> Result<Self> {
        if !epsilon.is_finite() || epsilon <= 0.0 {
            return Err(NnError::Config(format!("epsilon must be finite and > 0, got {}", epsilon)));
        }
        self.epsilon = epsilon;
        Ok(self)
    }

    /// Number of updates applied to `name`
    pub fn updates_for(&self, name: &str) -> usize {
        self.moments.get(name).map_or(0, |s| s.t as usize)
    }
}

impl Optimizer for Adam {
    fn update(
        &mut self,
        param: &Array2<f64>,
        grad: &Array2<f64>,
        name: &str,
        current_loss: Option<f64>,
    ) -> Result<Array2<f64>> {
        check_shapes(param, grad)?;
        let rate = self.scheduler.rate(self.current_step, current_loss);

        let state = self.moments.entry(name.to_string()).or_insert_with(|| Moments {
            m: Array2::zeros(param.dim()),
            v: Array2::zeros(param.dim()),
            t: 0,
        });
        check_shapes(param, &state.m)?;

        state.t += 1;
        state.m = &state.m * self.beta1 + grad * (1.0 - self.beta1);
        state.v = &state.v * self.beta2 + &(grad * grad) * (1.0 - self.beta2);

        let m_hat = &state.m / (1.0 - self.beta1.powi(state.t));
        let v_hat = &state.v / (1.0 - self.beta2.powi(state.t));

        Ok(param - &(&m_hat * rate / &(v_hat.mapv(f64::sqrt) + self.epsilon)))
    }

    fn advance_step(&mut self) {
        self.current_step += 1;
    }

    fn step(&self) -> usize {
        self.current_step
    }

    fn reset(&mut self) {
        self.current_step = 0;
        self.moments.clear();
    }

    fn clone_box(&self) -> Box<dyn Optimizer> {
        Box::new(Self {
            beta1: self.beta1,
            beta2: self.beta2,
            epsilon: self.epsilon,
            scheduler: self.scheduler.clone_box(),
            current_step: 0,
            moments: HashMap::new(),
        })
    }

    fn name(&self) -> &'static str {
        "Adam"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nn::scheduler::{ConstantScheduler, ExponentialScheduler};
    use approx::assert_relative_eq;
    use ndarray::array;

    fn constant(rate: f64) -> Box<dyn Scheduler> {
        Box::new(ConstantScheduler::new(rate).unwrap())
    }

    #[test]
    fn test_sgd_update() {
        let mut optimizer = Sgd::new(constant(0.01));
        let weights = Array2::ones((3, 2));
        let gradients = Array2::ones((3, 2));
        let updated = optimizer.update(&weights, &gradients, "W", None).unwrap();

        assert!((updated[[0, 0]] - 0.99).abs() < 1e-10);
    }

    #[test]
    fn test_sgd_plain_step_is_rate_times_gradient() {
        let mut optimizer = Sgd::new(constant(0.1));
        let param = array![[1.0, -2.0], [0.5, 3.0]];
        let grad = array![[0.2, 0.4], [-1.0, 0.0]];
        let updated = optimizer.update(&param, &grad, "W", None).unwrap();
        assert_eq!(updated, &param - &(&grad * 0.1));
        assert_eq!(optimizer.velocity("W").unwrap(), &(&grad * 0.1));
    }

    #[test]
    fn test_sgd_momentum_accumulates_per_name() {
        let mut optimizer = Sgd::new(constant(1.0)).with_momentum(0.5).unwrap();
        let param = array![[0.0]];
        let grad = array![[1.0]];

        let p1 = optimizer.update(&param, &grad, "W", None).unwrap();
        assert_eq!(p1, array![[-1.0]]);
        let p2 = optimizer.update(&p1, &grad, "W", None).unwrap();
        // velocity = 0.5 * 1 + 1
        assert_eq!(p2, array![[-2.5]]);

        // a fresh name starts from zero velocity
        let b = optimizer.update(&param, &grad, "b", None).unwrap();
        assert_eq!(b, array![[-1.0]]);
    }

    #[test]
    fn test_sgd_clipping() {
        let mut optimizer = Sgd::new(constant(1.0)).with_clip_norm(1.0).unwrap();
        let param = array![[0.0, 0.0]];
        let grad = array![[3.0, 4.0]];
        let updated = optimizer.update(&param, &grad, "W", None).unwrap();
        assert_relative_eq!(updated[[0, 0]], -0.6, epsilon = 1e-12);
        assert_relative_eq!(updated[[0, 1]], -0.8, epsilon = 1e-12);
        assert_relative_eq!(frobenius_norm(optimizer.velocity("W").unwrap()), 1.0, epsilon = 1e-12);

        // below the threshold, untouched
        let small = array![[0.3, 0.4]];
        let mut fresh = Sgd::new(constant(1.0)).with_clip_norm(1.0).unwrap();
        assert_eq!(fresh.update(&param, &small, "W", None).unwrap(), -&small);
    }

    #[test]
    fn test_sgd_clipping_zero_gradient() {
        let mut optimizer = Sgd::new(constant(0.5)).with_clip_norm(1.0).unwrap();
        let param = array![[1.0, 2.0]];
        let updated = optimizer.update(&param, &Array2::zeros((1, 2)), "W", None).unwrap();
        assert_eq!(updated, param);
        assert!(updated.iter().all(|v| v.is_finite()));
    }

    #[test]
    fn test_sgd_uses_scheduler_step() {
        let scheduler = ExponentialScheduler::new(1.0, 0.5, 1).unwrap();
        let mut optimizer = Sgd::new(Box::new(scheduler));
        let param = array![[0.0]];
        let grad = array![[1.0]];

        assert_eq!(optimizer.update(&param, &grad, "W", None).unwrap(), array![[-1.0]]);
        optimizer.advance_step();
        optimizer.advance_step();
        assert_eq!(optimizer.step(), 2);
        assert_eq!(optimizer.update(&param, &grad, "b", None).unwrap(), array![[-0.25]]);

        optimizer.reset();
        assert_eq!(optimizer.step(), 0);
        assert!(optimizer.velocity("W").is_none());
    }

    #[test]
    fn test_sgd_rejects_bad_config_and_shapes() {
        assert!(Sgd::new(constant(0.1)).with_momentum(1.0).is_err());
        assert!(Sgd::new(constant(0.1)).with_momentum(-0.1).is_err());
        assert!(Sgd::new(constant(0.1)).with_clip_norm(0.0).is_err());

        let mut optimizer = Sgd::new(constant(0.1));
        let err = optimizer.update(&Array2::zeros((2, 2)), &Array2::zeros((2, 3)), "W", None);
        assert!(matches!(err, Err(NnError::ShapeMismatch { .. })));
    }

    #[test]
    fn test_adam_update() {
        let mut optimizer = Adam::new(constant(0.001));
        let mut weights = Array2::ones((3, 2));
        let gradients = Array2::ones((3, 2));

        // Multiple updates
        for _ in 0..10 {
            weights = optimizer.update(&weights, &gradients, "W", None).unwrap();
        }

        // Weights should have decreased
        assert!(weights[[0, 0]] < 1.0);
    }

    #[test]
    fn test_adam_first_step_moves_by_rate() {
        let mut optimizer = Adam::new(constant(0.01));
        let param = array![[1.0, 1.0]];
        let grad = array![[5.0, -0.2]];
        let updated = optimizer.update(&param, &grad, "W", None).unwrap();
        // bias-corrected first step is rate * sign(g) up to epsilon
        assert_relative_eq!(updated[[0, 0]], 0.99, epsilon = 1e-8);
        assert_relative_eq!(updated[[0, 1]], 1.01, epsilon = 1e-8);
    }

    #[test]
    fn test_adam_moments_are_per_parameter() {
        let mut optimizer = Adam::new(constant(0.01));
        let w = array![[1.0]];
        for _ in 0..5 {
            optimizer.update(&w, &array![[1.0]], "W", None).unwrap();
        }
        let b = optimizer.update(&array![[0.0, 0.0]], &array![[2.0, -2.0]], "b", None).unwrap();

        assert_eq!(optimizer.updates_for("W"), 5);
        assert_eq!(optimizer.updates_for("b"), 1);
        assert_relative_eq!(b[[0, 0]], -0.01, epsilon = 1e-8);
        assert_relative_eq!(b[[0, 1]], 0.01, epsilon = 1e-8);
    }

    #[test]
    fn test_clone_box_has_fresh_state() {
        let mut optimizer = Adam::new(constant(0.01)).with_betas(0.8, 0.9).unwrap();
        optimizer.advance_step();
        optimizer.update(&array![[1.0]], &array![[1.0]], "W", None).unwrap();
        let copy = optimizer.clone_box();
        assert_eq!(copy.step(), 0);
        assert_eq!(copy.name(), "Adam");
    }
}
