use burn::prelude::*;
use color_eyre::{Result, eyre::bail};

/// Percentage of pixels whose arg-max class equals the target.
pub fn pixel_accuracy<B: Backend>(logits: Tensor<B, 4>, targets: Tensor<B, 3, Int>) -> f32 {
    let predictions: Tensor<B, 3, Int> = logits.argmax(1).squeeze(1);
    let num_pixels: usize = targets.dims().iter().product();
    let num_corrects = predictions.equal(targets).int().sum().into_scalar();

    num_corrects.elem::<f32>() / num_pixels as f32 * 100.0
}

/// Pixel counts indexed `[target][prediction]`.
#[derive(Clone, Debug, PartialEq)]
pub struct ConfusionMatrix {
    num_classes: usize,
    counts: Vec<u64>,
}

impl ConfusionMatrix {
    pub fn new(num_classes: usize) -> Self {
        Self {
            num_classes,
            counts: vec![0; num_classes * num_classes],
        }
    }

    pub fn count(&self, target: usize, prediction: usize) -> u64 {
        self.counts[target * self.num_classes + prediction]
    }

    /// Accumulate one or more label maps flattened in the same order.
    pub fn update(&mut self, predictions: &[i64], targets: &[i64]) -> Result<()> {
        if predictions.len() != targets.len() {
            bail!(
                "Prediction/target size mismatch: {} vs {}",
                predictions.len(),
                targets.len()
            );
        }
        let n = self.num_classes as i64;
        if let Some((p, t)) = predictions
            .iter()
            .zip(targets)
            .find(|(p, t)| !(0..n).contains(*p) || !(0..n).contains(*t))
        {
            bail!("Class id out of range 0..{n}: prediction {p}, target {t}");
        }
        for (&p, &t) in predictions.iter().zip(targets) {
            self.counts[(t * n + p) as usize] += 1;
        }
        Ok(())
    }

    pub fn total(&self) -> u64 {
        self.counts.iter().sum()
    }

    /// Fraction of pixels on the diagonal, in percent.
    pub fn pixel_accuracy(&self) -> f32 {
        let total = self.total();
        if total == 0 {
            return 0.0;
        }
        let correct: u64 = (0..self.num_classes).map(|c| self.count(c, c)).sum();
        correct as f32 / total as f32 * 100.0
    }

    /// Intersection over union per class; `None` when the class appears in
    /// neither prediction nor target.
    pub fn per_class_iou(&self) -> Vec<Option<f32>> {
        (0..self.num_classes)
            .map(|c| {
                let tp = self.count(c, c);
                let target_total: u64 = (0..self.num_classes).map(|p| self.count(c, p)).sum();
                let predicted_total: u64 = (0..self.num_classes).map(|t| self.count(t, c)).sum();
                let union = target_total + predicted_total - tp;
                (union > 0).then(|| tp as f32 / union as f32)
            })
            .collect()
    }

    /// Mean over the classes that have a defined IoU.
    pub fn mean_iou(&self) -> f32 {
        let ious: Vec<f32> = self.per_class_iou().into_iter().flatten().collect();
        if ious.is_empty() {
            return 0.0;
        }
        ious.iter().sum::<f32>() / ious.len() as f32
    }
}
