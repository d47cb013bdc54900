use super::{block_coordinate, BlockObjective, HyperParam};
use crate::mat_util::ScoreMatrix;
use crate::metrics::{mean, ratio};
use crate::{DenseVec, DenseVecView, Index, Result, Solution};
use ndarray::Zip;

/// A per-label utility of the (true positive, false positive, false negative) rates.
pub trait Measure {
    fn value(&self, tp: f32, fp: f32, fn_: f32) -> f32;

    /// Evaluate the measure for every label.
    fn evaluate(&self, tp: DenseVecView, fp: DenseVecView, fn_: DenseVecView) -> DenseVec {
        Zip::from(tp)
            .and(fp)
            .and(fn_)
            .map_collect(|&tp, &fp, &fn_| self.value(tp, fp, fn_))
    }
}

impl<F> Measure for F
where
    F: Fn(f32, f32, f32) -> f32,
{
    fn value(&self, tp: f32, fp: f32, fn_: f32) -> f32 {
        self(tp, fp, fn_)
    }
}

#[derive(Copy, Clone, Debug, Default)]
pub struct Precision;

impl Measure for Precision {
    fn value(&self, tp: f32, fp: f32, _fn: f32) -> f32 {
        ratio(tp, tp + fp)
    }
}

#[derive(Copy, Clone, Debug, Default)]
pub struct Recall;

impl Measure for Recall {
    fn value(&self, tp: f32, _fp: f32, fn_: f32) -> f32 {
        ratio(tp, tp + fn_)
    }
}

#[derive(Copy, Clone, Debug, Default)]
pub struct F1;

impl Measure for F1 {
    fn value(&self, tp: f32, fp: f32, fn_: f32) -> f32 {
        ratio(2. * tp, 2. * tp + fp + fn_)
    }
}

/// Probability that a label is hit at least once, `1 - exp(-N tp)`.
///
/// Only the expected true positive mass is known here, so the product of per-instance miss
/// probabilities is replaced by its Poisson approximation.
#[derive(Copy, Clone, Debug)]
pub struct ApproxCoverage {
    n_instances: f32,
}

impl ApproxCoverage {
    pub fn new(n_instances: usize) -> Self {
        Self {
            n_instances: n_instances as f32,
        }
    }
}

impl Measure for ApproxCoverage {
    fn value(&self, tp: f32, _fp: f32, _fn: f32) -> f32 {
        1. - (-self.n_instances * tp).exp()
    }
}

/// Macro average of a [`Measure`] over expected confusion rates.
///
/// The statistics are kept as masses and divided by the number of instances when the measure
/// is evaluated. The gain of a label for an instance is the difference of the measure with the
/// label included and with it excluded, so any [`Measure`] works without a closed-form gain.
#[derive(Clone, Debug)]
pub struct ConfusionRisk<F> {
    measure: F,
    n_instances: f32,
    tp: Vec<f32>,
    fp: Vec<f32>,
    fn_: Vec<f32>,
    n_predicted: Vec<u32>,
    selected: Vec<bool>,
}

impl<F: Measure> ConfusionRisk<F> {
    pub fn new(measure: F) -> Self {
        Self {
            measure,
            n_instances: 1.,
            tp: Vec::new(),
            fp: Vec::new(),
            fn_: Vec::new(),
            n_predicted: Vec::new(),
            selected: Vec::new(),
        }
    }

    fn update(&mut self, row: &[f32], labels: &[Index], sign: f32) {
        for &j in labels {
            self.selected[j as usize] = true;
        }
        // Every unselected label of the instance counts as a false negative
        for ((f, &p), &selected) in self.fn_.iter_mut().zip(row).zip(&self.selected) {
            if !selected {
                *f = (*f + sign * p).max(0.);
            }
        }
        for &j in labels {
            let j = j as usize;
            self.selected[j] = false;
            if sign > 0. {
                self.n_predicted[j] += 1;
            } else {
                self.n_predicted[j] -= 1;
            }
            if self.n_predicted[j] == 0 {
                // Exact zero rather than rounding residue
                self.tp[j] = 0.;
                self.fp[j] = 0.;
            } else {
                let p = row[j];
                self.tp[j] = (self.tp[j] + sign * p).max(0.);
                self.fp[j] = (self.fp[j] + sign * (1. - p)).max(0.);
            }
        }
    }

    fn value(&self, tp: f32, fp: f32, fn_: f32) -> f32 {
        let n = self.n_instances;
        self.measure.value(tp / n, fp / n, fn_ / n)
    }
}

impl<F: Measure> BlockObjective for ConfusionRisk<F> {
    fn prepare<M: ScoreMatrix>(&mut self, preds: &M) {
        let n_labels = preds.n_labels();
        self.n_instances = preds.n_instances().max(1) as f32;
        self.tp.resize(n_labels, 0.);
        self.fp.resize(n_labels, 0.);
        self.fn_.resize(n_labels, 0.);
        self.n_predicted.resize(n_labels, 0);
        self.selected.resize(n_labels, false);
    }

    fn clear(&mut self) {
        self.tp.fill(0.);
        self.fp.fill(0.);
        self.fn_.fill(0.);
        self.n_predicted.fill(0);
    }

    fn remove_row(&mut self, row: &[f32], labels: &[Index]) {
        self.update(row, labels, -1.);
    }

    fn add_row(&mut self, row: &[f32], labels: &[Index]) {
        self.update(row, labels, 1.);
    }

    fn gains(&self, row: &[f32], gains: &mut [f32]) {
        let n_labels = row.len() as f32;
        for (j, (g, &p)) in gains.iter_mut().zip(row).enumerate() {
            let (tp, fp, fn_) = (self.tp[j], self.fp[j], self.fn_[j]);
            let included = self.value(tp + p, fp + 1. - p, fn_);
            let excluded = self.value(tp, fp, fn_ + p);
            *g = (included - excluded) / n_labels;
        }
    }

    fn objective(&self) -> f32 {
        mean(
            self.tp
                .iter()
                .zip(&self.fp)
                .zip(&self.fn_)
                .map(|((&tp, &fp), &fn_)| self.value(tp, fp, fn_)),
        )
    }
}

/// Maximize the macro average of `measure` over expected confusion rates.
pub fn block_coordinate_risk<M, F>(
    preds: &M,
    measure: F,
    hyper_param: &HyperParam,
) -> Result<Solution>
where
    M: ScoreMatrix,
    F: Measure,
{
    block_coordinate(
        preds,
        ConfusionRisk::new(measure),
        hyper_param,
        hyper_param.initialization(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::optimize::weighted::optimal_instance_precision;
    use crate::optimize::{evaluate, Initialization};
    use crate::{metrics, Assignment, DenseMat};
    use assert_approx_eq::assert_approx_eq;
    use const_default::ConstDefault;
    use ndarray::array;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn random_preds(n_instances: usize, n_labels: usize, seed: u64) -> DenseMat {
        let mut rng = StdRng::seed_from_u64(seed);
        DenseMat::from_shape_fn((n_instances, n_labels), |(_, j)| {
            0.01 + 0.98 * rng.gen::<f32>() / (1. + j as f32)
        })
    }

    fn hyper_param(k: usize) -> HyperParam {
        HyperParam {
            k,
            tolerance: 1e-6,
            max_iter: Some(50),
            ..HyperParam::DEFAULT
        }
    }

    #[test]
    fn test_measures() {
        assert_approx_eq!(0.75, Precision.value(0.3, 0.1, 0.5));
        assert_approx_eq!(0.375, Recall.value(0.3, 0.1, 0.5));
        assert_approx_eq!(0.6 / 1.2, F1.value(0.3, 0.1, 0.5));
        assert_eq!(0., Precision.value(0., 0., 0.3));
        assert_approx_eq!(1. - (-1f32).exp(), ApproxCoverage::new(10).value(0.1, 0., 0.));

        let values = F1.evaluate(
            array![0.3, 0.].view(),
            array![0.1, 0.2].view(),
            array![0.5, 0.1].view(),
        );
        assert_approx_eq!(0.5, values[0]);
        assert_eq!(0., values[1]);
    }

    #[test]
    fn test_incremental_matches_scratch() {
        let preds = random_preds(20, 8, 1);
        let mut rng = StdRng::seed_from_u64(2);
        let mut assignment = Assignment::random(&preds, 3, &mut rng).unwrap();
        let mut risk = ConfusionRisk::new(F1);
        risk.prepare(&preds);
        risk.reset(&preds, &assignment);

        for step in 0..50 {
            let i = step % 20;
            let row = preds.row(i).to_vec();
            let a = rng.gen_range(0..8u32);
            let labels = [a, (a + 3) % 8, (a + 5) % 8];
            risk.remove_row(&row, assignment.row(i));
            risk.add_row(&row, &labels);
            assignment.set_row(i, &labels);
        }
        let incremental = risk.objective();
        risk.reset(&preds, &assignment);
        assert_approx_eq!(risk.objective(), incremental, 1e-5);
        assert_approx_eq!(
            metrics::macro_measure(&preds, &assignment, &F1).unwrap(),
            incremental,
            1e-5
        );
        // F1 over rates equals F1 over masses
        assert_approx_eq!(
            metrics::macro_f1(&preds, &assignment, 0.).unwrap(),
            incremental,
            1e-5
        );
    }

    #[test]
    fn test_gains_are_exact_marginal_changes() {
        let preds = random_preds(10, 6, 3);
        let assignment = Assignment::random(&preds, 2, &mut StdRng::seed_from_u64(4)).unwrap();
        let mut risk = ConfusionRisk::new(Precision);
        risk.prepare(&preds);
        risk.reset(&preds, &assignment);

        let row = preds.row(3).to_vec();
        risk.remove_row(&row, assignment.row(3));
        // An instance without labels still contributes false negatives
        risk.add_row(&row, &[]);
        let base = risk.objective();
        risk.remove_row(&row, &[]);

        let mut gains = vec![0.; 6];
        risk.gains(&row, &mut gains);
        for j in 0..6u32 {
            risk.add_row(&row, &[j]);
            assert_approx_eq!(base + gains[j as usize], risk.objective(), 1e-6);
            risk.remove_row(&row, &[j]);
        }
    }

    #[test]
    fn test_emptied_labels_have_exact_zero_statistics() {
        let preds = random_preds(12, 5, 8);
        let mut risk = ConfusionRisk::new(Precision);
        risk.prepare(&preds);
        risk.clear();
        let rows = (0..12).map(|i| preds.row(i).to_vec()).collect::<Vec<_>>();
        for row in &rows {
            risk.add_row(row, &[0, 2]);
        }
        // Removing in another order leaves rounding residue unless emptied labels are reset
        for row in rows.iter().rev() {
            risk.remove_row(row, &[0, 2]);
        }
        assert_eq!(0., risk.objective());

        let mut gains = vec![0.; 5];
        risk.gains(&rows[3], &mut gains);
        for (g, &p) in gains.iter().zip(&rows[3]) {
            assert_approx_eq!(p / 5., *g, 1e-6);
        }
    }

    #[test]
    fn test_precision_risk_history_is_monotone() {
        let preds = random_preds(50, 12, 6);
        let solution = block_coordinate_risk(&preds, Precision, &hyper_param(3)).unwrap();
        for w in solution.objective_history.windows(2) {
            assert!(w[1] + 1e-5 >= w[0], "{:?}", solution.objective_history);
        }
        let scratch = metrics::macro_measure(&preds, &solution.assignment, &Precision).unwrap();
        assert_approx_eq!(scratch, solution.objective, 1e-5);
    }

    #[test]
    fn test_linear_utility_reduces_to_top_k() {
        let preds = random_preds(30, 8, 5);
        let solution =
            block_coordinate_risk(&preds, |tp: f32, fp: f32, _: f32| tp - 0.5 * fp, &hyper_param(2))
                .unwrap();
        let top_k = optimal_instance_precision(&preds, 2).unwrap();
        assert_eq!(top_k.assignment, solution.assignment);
    }

    #[test]
    fn test_risk_optimizers() {
        let preds = random_preds(50, 12, 6);
        let hp = hyper_param(3);
        for solution in [
            block_coordinate_risk(&preds, Precision, &hp).unwrap(),
            block_coordinate_risk(&preds, Recall, &hp).unwrap(),
            block_coordinate_risk(&preds, F1, &hp).unwrap(),
            block_coordinate_risk(&preds, ApproxCoverage::new(50), &hp).unwrap(),
        ] {
            assert!(solution.assignment.rows().iter().all(|r| r.len() == 3));
            for w in solution.objective_history.windows(2) {
                assert!(w[1] + 1e-5 >= w[0]);
            }
        }

        let top_k = optimal_instance_precision(&preds, 3).unwrap();
        let start = evaluate(&preds, &mut ConfusionRisk::new(F1), &top_k.assignment).unwrap();
        let refined = block_coordinate(
            &preds,
            ConfusionRisk::new(F1),
            &hp,
            Initialization::Warm(top_k.assignment),
        )
        .unwrap();
        assert!(refined.objective + 1e-6 >= start);
    }

    #[test]
    fn test_greedy_start_and_seed() {
        let preds = random_preds(25, 7, 7);
        let hp = HyperParam {
            greedy_start: true,
            seed: 3,
            ..hyper_param(2)
        };
        let first = block_coordinate_risk(&preds, F1, &hp).unwrap();
        let second = block_coordinate_risk(&preds, F1, &hp).unwrap();
        assert!(first.assignment.is_complete());
        assert_eq!(first.assignment, second.assignment);
        assert_eq!(first.objective.to_bits(), second.objective.to_bits());
    }
}
