//! Loss Functions
//!
//! Each loss maps `(predictions, targets)` to a scalar averaged over the
//! batch and to a gradient with the shape of the predictions. Regression
//! losses take dense targets, classification losses take class labels.

use ndarray::{Array1, Array2, Axis};
use serde::{Deserialize, Serialize};

use crate::error::{NnError, Result};

/// Training targets
#[derive(Debug, Clone, PartialEq)]
pub enum Targets {
    /// Dense targets with the same shape as the predictions (L1, L2)
    Dense(Array2<f64>),
    /// One class index per row (Hinge, Softmax)
    Labels(Array1<usize>),
}

impl From<Array2<f64>> for Targets {
    fn from(targets: Array2<f64>) -> Self {
        Targets::Dense(targets)
    }
}

impl From<Array1<usize>> for Targets {
    fn from(labels: Array1<usize>) -> Self {
        Targets::Labels(labels)
    }
}

impl Targets {
    /// Number of samples
    pub fn len(&self) -> usize {
        match self {
            Targets::Dense(t) => t.nrows(),
            Targets::Labels(l) => l.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Gather the given rows, in order
    pub fn select(&self, rows: &[usize]) -> Targets {
        match self {
            Targets::Dense(t) => Targets::Dense(t.select(Axis(0), rows)),
            Targets::Labels(l) => Targets::Labels(l.select(Axis(0), rows)),
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            Targets::Dense(_) => "dense targets",
            Targets::Labels(_) => "class labels",
        }
    }
}

/// Loss function types
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LossFunction {
    /// Squared error summed over outputs, averaged over the batch
    L2,
    /// Absolute error summed over outputs, averaged over the batch
    L1,
    /// Multiclass SVM hinge loss with unit margin
    Hinge,
    /// Softmax followed by cross-entropy
    SoftmaxCrossEntropy,
}

impl LossFunction {
    fn expects_labels(self) -> bool {
        matches!(self, LossFunction::Hinge | LossFunction::SoftmaxCrossEntropy)
    }

    /// Check targets against a model producing `outputs` columns, before any forward pass
    pub fn validate_targets(self, targets: &Targets, outputs: usize) -> Result<()> {
        match (self.expects_labels(), targets) {
            (false, Targets::Dense(t)) => {
                if t.ncols() != outputs {
                    return Err(NnError::shape("loss targets", &[t.nrows(), outputs], t.shape()));
                }
                Ok(())
            }
            (true, Targets::Labels(labels)) => {
                let out_of_range = labels.iter().enumerate().find(|&(_, &l)| l >= outputs);
                if let Some((row, &label)) = out_of_range {
                    return Err(NnError::LabelOutOfRange {
                        row,
                        label,
                        classes: outputs,
                    });
                }
                Ok(())
            }
            _ => Err(NnError::TargetKind(format!("{:?} loss cannot use {}", self, targets.kind()))),
        }
    }

    /// Full validation of a `(predictions, targets)` pair
    pub fn validate(self, predictions: &Array2<f64>, targets: &Targets) -> Result<()> {
        if predictions.nrows() == 0 {
            return Err(NnError::EmptyBatch("loss"));
        }
        if predictions.nrows() != targets.len() {
            return Err(NnError::SampleCountMismatch {
                inputs: predictions.nrows(),
                targets: targets.len(),
            });
        }
        if let Targets::Dense(t) = targets {
            if t.dim() != predictions.dim() {
                return Err(NnError::shape("loss targets", predictions.shape(), t.shape()));
            }
        }
        self.validate_targets(targets, predictions.ncols())
    }

    /// Scalar loss
    pub fn value(self, predictions: &Array2<f64>, targets: &Targets) -> Result<f64> {
        self.evaluate(predictions, targets).map(|(loss, _)| loss)
    }

    /// Gradient of the loss with respect to the predictions
    pub fn gradient(self, predictions: &Array2<f64>, targets: &Targets) -> Result<Array2<f64>> {
        self.evaluate(predictions, targets).map(|(_, grad)| grad)
    }

    /// Loss and gradient in one pass
    pub fn evaluate(
        self,
        predictions: &Array2<f64>,
        targets: &Targets,
    ) -> Result<(f64, Array2<f64>)> {
        self.validate(predictions, targets)?;
        let out = match (self, targets) {
            (LossFunction::L2, Targets::Dense(t)) => l2_squared(predictions, t),
            (LossFunction::L1, Targets::Dense(t)) => l1_absolute(predictions, t),
            (LossFunction::Hinge, Targets::Labels(l)) => hinge(predictions, l),
            (LossFunction::SoftmaxCrossEntropy, Targets::Labels(l)) => {
                softmax_cross_entropy(predictions, l)
            }
            _ => {
                return Err(NnError::TargetKind(format!(
                    "{:?} loss cannot use {}",
                    self,
                    targets.kind()
                )))
            }
        };
        Ok(out)
    }
}

fn l2_squared(x: &Array2<f64>, y: &Array2<f64>) -> (f64, Array2<f64>) {
    let n = x.nrows() as f64;
    let diff = x - y;
    let loss = diff.mapv(|d| d * d).sum() / n;
    (loss, diff * (2.0 / n))
}

fn l1_absolute(x: &Array2<f64>, y: &Array2<f64>) -> (f64, Array2<f64>) {
    let n = x.nrows() as f64;
    let diff = x - y;
    let loss = diff.mapv(f64::abs).sum() / n;
    // sign(0) is 0; f64::signum would give 1
    let grad = diff.mapv(|d| {
        if d > 0.0 {
            1.0 / n
        } else if d < 0.0 {
            -1.0 / n
        } else {
            0.0
        }
    });
    (loss, grad)
}

fn hinge(x: &Array2<f64>, labels: &Array1<usize>) -> (f64, Array2<f64>) {
    let n = x.nrows() as f64;
    let mut margins: Array2<f64> = Array2::zeros(x.dim());
    for (i, (row, &label)) in x.rows().into_iter().zip(labels.iter()).enumerate() {
        let correct = row[label];
        for (j, &score) in row.iter().enumerate() {
            if j != label {
                margins[[i, j]] = (score - correct + 1.0).max(0.0);
            }
        }
    }
    let loss = margins.sum() / n;

    let mut grad = margins.mapv(|m| if m > 0.0 { 1.0 } else { 0.0 });
    for (i, &label) in labels.iter().enumerate() {
        let positive = grad.row(i).sum();
        grad[[i, label]] = -positive;
    }
    (loss, grad / n)
}

fn softmax_cross_entropy(x: &Array2<f64>, labels: &Array1<usize>) -> (f64, Array2<f64>) {
    let n = x.nrows() as f64;
    let row_max = x.map_axis(Axis(1), |row| row.fold(f64::NEG_INFINITY, |a, &b| a.max(b)));
    let shift = x - &row_max.insert_axis(Axis(1));
    // the row maximum contributes exp(0) = 1, so log_z >= 0 and no log(0) occurs
    let log_z = shift.mapv(f64::exp).sum_axis(Axis(1)).mapv(f64::ln);
    let log_probs = &shift - &log_z.insert_axis(Axis(1));

    let loss = -labels
        .iter()
        .enumerate()
        .map(|(i, &label)| log_probs[[i, label]])
        .sum::<f64>()
        / n;

    let mut grad = log_probs.mapv(f64::exp);
    for (i, &label) in labels.iter().enumerate() {
        grad[[i, label]] -= 1.0;
    }
    (loss, grad / n)
}
