//! Activation Functions
//!
//! Elementwise nonlinearities applied to pre-activation tensors. Derivatives
//! are evaluated at the pre-activation input, not at the output.

use std::fmt;

use ndarray::{Array1, Array2, Axis};
use serde::{Deserialize, Serialize};

/// Types of activation functions available
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ActivationType {
    /// Rectified Linear Unit: max(0, x)
    ReLU,
    /// Sigmoid: 1 / (1 + exp(-x))
    Sigmoid,
    /// Hyperbolic tangent
    Tanh,
}

impl fmt::Display for ActivationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActivationType::ReLU => write!(f, "ReLU"),
            ActivationType::Sigmoid => write!(f, "Sigmoid"),
            ActivationType::Tanh => write!(f, "Tanh"),
        }
    }
}

/// Activation function trait with forward and backward passes
pub trait Activation: Send + Sync {
    /// Apply the activation to a batch
    fn forward(&self, x: &Array2<f64>) -> Array2<f64>;

    /// First derivative at the pre-activation `x`
    fn backward(&self, x: &Array2<f64>) -> Array2<f64>;

    /// Second derivative at the pre-activation `x`
    fn second_derivative(&self, x: &Array2<f64>) -> Array2<f64>;

    /// Apply to a single sample, returned as a batch of one
    fn forward_row(&self, x: &Array1<f64>) -> Array2<f64> {
        self.forward(&as_batch(x))
    }

    /// Derivative for a single sample, returned as a batch of one
    fn backward_row(&self, x: &Array1<f64>) -> Array2<f64> {
        self.backward(&as_batch(x))
    }
}

/// Reshape a 1-D sample into a `(1, n)` batch
pub fn as_batch(x: &Array1<f64>) -> Array2<f64> {
    x.clone().insert_axis(Axis(0))
}

/// ReLU activation function
pub struct ReLU;

impl Activation for ReLU {
    fn forward(&self, x: &Array2<f64>) -> Array2<f64> {
        x.mapv(|v| v.max(0.0))
    }

    fn backward(&self, x: &Array2<f64>) -> Array2<f64> {
        x.mapv(|v| if v > 0.0 { 1.0 } else { 0.0 })
    }

    fn second_derivative(&self, x: &Array2<f64>) -> Array2<f64> {
        Array2::zeros(x.dim())
    }
}

/// Sigmoid activation function
pub struct Sigmoid;

fn sigmoid(v: f64) -> f64 {
    1.0 / (1.0 + (-v).exp())
}

impl Activation for Sigmoid {
    fn forward(&self, x: &Array2<f64>) -> Array2<f64> {
        x.mapv(sigmoid)
    }

    fn backward(&self, x: &Array2<f64>) -> Array2<f64> {
        let s = self.forward(x);
        &s * &(1.0 - &s)
    }

    fn second_derivative(&self, x: &Array2<f64>) -> Array2<f64> {
        x.mapv(|v| {
            let s = sigmoid(v);
            s * (1.0 - s) * (1.0 - 2.0 * s)
        })
    }
}

/// Tanh activation function
pub struct TanhActivation;

impl Activation for TanhActivation {
    fn forward(&self, x: &Array2<f64>) -> Array2<f64> {
        x.mapv(f64::tanh)
    }

    fn backward(&self, x: &Array2<f64>) -> Array2<f64> {
        let t = self.forward(x);
        1.0 - &t * &t
    }

    fn second_derivative(&self, x: &Array2<f64>) -> Array2<f64> {
        x.mapv(|v| {
            let t = v.tanh();
            -2.0 * t * (1.0 - t * t)
        })
    }
}

/// Create an activation function from type
pub fn create_activation(activation_type: ActivationType) -> Box<dyn Activation> {
    match activation_type {
        ActivationType::ReLU => Box::new(ReLU),
        ActivationType::Sigmoid => Box::new(Sigmoid),
        ActivationType::Tanh => Box::new(TanhActivation),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::{assert_abs_diff_eq, assert_relative_eq};
    use ndarray::array;

    fn finite_difference(act: &dyn Activation, x: &Array2<f64>) -> Array2<f64> {
        let h = 1e-6;
        let plus = act.forward(&x.mapv(|v| v + h));
        let minus = act.forward(&x.mapv(|v| v - h));
        (plus - minus) / (2.0 * h)
    }

    #[test]
    fn test_relu() {
        let x = array![[-1.0, 0.0, 1.0, 2.0], [3.5, -0.5, 0.25, -7.0]];
        let y = ReLU.forward(&x);
        assert_eq!(y, array![[0.0, 0.0, 1.0, 2.0], [3.5, 0.0, 0.25, 0.0]]);
        assert!(y.iter().all(|&v| v >= 0.0));
        assert_eq!(
            ReLU.backward(&x),
            array![[0.0, 0.0, 1.0, 1.0], [1.0, 0.0, 1.0, 0.0]]
        );
        assert!(ReLU.second_derivative(&x).iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_sigmoid() {
        let y = Sigmoid.forward(&array![[0.0]]);
        assert_relative_eq!(y[[0, 0]], 0.5, epsilon = 1e-10);
    }

    #[test]
    fn test_sigmoid_is_bounded_not_shifted_exponential() {
        // `1/1 + e^-x` would give 2.0 at zero and grow without bound for negative inputs
        let x = Array2::from_shape_fn((4, 15), |(i, j)| (i as f64 * 15.0 + j as f64) - 30.0);
        let y = Sigmoid.forward(&x);
        assert!(y.iter().all(|&v| v > 0.0 && v < 1.0));
        assert_relative_eq!(
            Sigmoid.forward(&array![[-2.0]])[[0, 0]],
            0.11920292202211755,
            epsilon = 1e-12
        );
    }

    #[test]
    fn test_sigmoid_derivative_matches_finite_difference() {
        let x = array![[-3.0, -0.5, 0.0], [0.7, 2.0, 4.5]];
        let analytic = Sigmoid.backward(&x);
        let numeric = finite_difference(&Sigmoid, &x);
        for (a, n) in analytic.iter().zip(numeric.iter()) {
            assert_abs_diff_eq!(a, n, epsilon = 1e-4);
        }
        let s = Sigmoid.forward(&x);
        assert_eq!(analytic, &s * &(1.0 - &s));
    }

    #[test]
    fn test_tanh() {
        let y = TanhActivation.forward(&array![[0.0]]);
        assert_relative_eq!(y[[0, 0]], 0.0, epsilon = 1e-10);

        let x = array![[-1.5, 0.3, 2.0]];
        let numeric = finite_difference(&TanhActivation, &x);
        for (a, n) in TanhActivation.backward(&x).iter().zip(numeric.iter()) {
            assert_abs_diff_eq!(a, n, epsilon = 1e-4);
        }
    }

    #[test]
    fn test_second_derivatives_match_finite_difference() {
        let x = array![[-1.2, 0.1, 0.9]];
        let h = 1e-5;
        for act in [
            create_activation(ActivationType::Sigmoid),
            create_activation(ActivationType::Tanh),
        ] {
            let plus = act.backward(&x.mapv(|v| v + h));
            let minus = act.backward(&x.mapv(|v| v - h));
            let numeric = (plus - minus) / (2.0 * h);
            for (a, n) in act.second_derivative(&x).iter().zip(numeric.iter()) {
                assert_abs_diff_eq!(a, n, epsilon = 1e-4);
            }
        }
    }

    #[test]
    fn test_row_input_becomes_batch_of_one() {
        let row = Array1::from_vec(vec![-1.0, 2.0, 3.0]);
        let out = ReLU.forward_row(&row);
        assert_eq!(out.dim(), (1, 3));
        assert_eq!(out, array![[0.0, 2.0, 3.0]]);
        assert_eq!(ReLU.backward_row(&row).dim(), (1, 3));
    }

    #[test]
    fn test_display_and_serde_names() {
        assert_eq!(ActivationType::ReLU.to_string(), "ReLU");
        assert_eq!(ActivationType::Tanh.to_string(), "Tanh");

        #[derive(Deserialize)]
        struct Wrapper {
            activation: ActivationType,
        }
        let parsed: Wrapper = toml::from_str("activation = \"sigmoid\"").unwrap();
        assert_eq!(parsed.activation, ActivationType::Sigmoid);
    }
}
