use super::{block_coordinate, BlockObjective, HyperParam};
use crate::mat_util::{ScoreMatrix, ScoreRow};
use crate::metrics::mean;
use crate::{Error, Index, Result, Solution};
use itertools::izip;

fn expected_positives<M: ScoreMatrix>(preds: &M) -> Vec<f32> {
    let mut positives = vec![0.; preds.n_labels()];
    for i in 0..preds.n_instances() {
        for (j, v) in preds.score_row(i).entries() {
            positives[j] += v;
        }
    }
    positives
}

/// Additive per-label statistics shared by the precision family.
#[derive(Clone, Debug, Default)]
struct Counts {
    true_positives: Vec<f32>,
    predicted_positives: Vec<f32>,
}

impl Counts {
    fn resize(&mut self, n_labels: usize) {
        self.true_positives.resize(n_labels, 0.);
        self.predicted_positives.resize(n_labels, 0.);
    }

    fn clear(&mut self) {
        self.true_positives.fill(0.);
        self.predicted_positives.fill(0.);
    }

    #[inline]
    fn update(&mut self, row: &[f32], labels: &[Index], sign: f32) {
        for &j in labels {
            let j = j as usize;
            self.true_positives[j] += sign * row[j];
            self.predicted_positives[j] += sign;
        }
    }
}

/// Expected macro-averaged precision, `mean_j tp_j / (predicted_j + ε)`.
#[derive(Clone, Debug)]
pub struct MacroPrecision {
    epsilon: f32,
    counts: Counts,
}

impl MacroPrecision {
    pub fn new(epsilon: f32) -> Self {
        Self {
            epsilon,
            counts: Counts::default(),
        }
    }
}

impl BlockObjective for MacroPrecision {
    fn prepare<M: ScoreMatrix>(&mut self, preds: &M) {
        self.counts.resize(preds.n_labels());
    }

    fn clear(&mut self) {
        self.counts.clear();
    }

    fn remove_row(&mut self, row: &[f32], labels: &[Index]) {
        self.counts.update(row, labels, -1.);
    }

    fn add_row(&mut self, row: &[f32], labels: &[Index]) {
        self.counts.update(row, labels, 1.);
    }

    fn gains(&self, row: &[f32], gains: &mut [f32]) {
        let n_labels = row.len() as f32;
        for (g, &p, &a, &c) in izip!(
            gains.iter_mut(),
            row,
            &self.counts.true_positives,
            &self.counts.predicted_positives
        ) {
            // (a + p) / (b + 1) - a / b
            let b = c + self.epsilon;
            *g = (b * p - a) / (b * (b + 1.)) / n_labels;
        }
    }

    fn objective(&self) -> f32 {
        mean(
            self.counts
                .true_positives
                .iter()
                .zip(&self.counts.predicted_positives)
                .map(|(&a, &c)| a / (c + self.epsilon)),
        )
    }
}

/// Expected macro-averaged recall, `mean_j tp_j / (positives_j + ε)`.
///
/// The denominator does not depend on the assignment, so the optimum is reached after a single
/// pass; it is still useful as a building block of mixtures.
#[derive(Clone, Debug)]
pub struct MacroRecall {
    epsilon: f32,
    counts: Counts,
    positives: Vec<f32>,
}

impl MacroRecall {
    pub fn new(epsilon: f32) -> Self {
        Self {
            epsilon,
            counts: Counts::default(),
            positives: Vec::new(),
        }
    }
}

impl BlockObjective for MacroRecall {
    fn prepare<M: ScoreMatrix>(&mut self, preds: &M) {
        self.counts.resize(preds.n_labels());
        self.positives = expected_positives(preds);
    }

    fn clear(&mut self) {
        self.counts.clear();
    }

    fn remove_row(&mut self, row: &[f32], labels: &[Index]) {
        self.counts.update(row, labels, -1.);
    }

    fn add_row(&mut self, row: &[f32], labels: &[Index]) {
        self.counts.update(row, labels, 1.);
    }

    fn gains(&self, row: &[f32], gains: &mut [f32]) {
        let n_labels = row.len() as f32;
        for (g, &p, &m) in izip!(gains.iter_mut(), row, &self.positives) {
            *g = p / (m + self.epsilon) / n_labels;
        }
    }

    fn objective(&self) -> f32 {
        mean(
            self.counts
                .true_positives
                .iter()
                .zip(&self.positives)
                .map(|(&a, &m)| a / (m + self.epsilon)),
        )
    }
}

/// Expected macro-averaged F1, `mean_j 2 tp_j / (predicted_j + positives_j + ε)`.
#[derive(Clone, Debug)]
pub struct MacroF1 {
    epsilon: f32,
    counts: Counts,
    positives: Vec<f32>,
}

impl MacroF1 {
    pub fn new(epsilon: f32) -> Self {
        Self {
            epsilon,
            counts: Counts::default(),
            positives: Vec::new(),
        }
    }
}

impl BlockObjective for MacroF1 {
    fn prepare<M: ScoreMatrix>(&mut self, preds: &M) {
        self.counts.resize(preds.n_labels());
        self.positives = expected_positives(preds);
    }

    fn clear(&mut self) {
        self.counts.clear();
    }

    fn remove_row(&mut self, row: &[f32], labels: &[Index]) {
        self.counts.update(row, labels, -1.);
    }

    fn add_row(&mut self, row: &[f32], labels: &[Index]) {
        self.counts.update(row, labels, 1.);
    }

    fn gains(&self, row: &[f32], gains: &mut [f32]) {
        let n_labels = row.len() as f32;
        for (g, &p, &a, &c, &m) in izip!(
            gains.iter_mut(),
            row,
            &self.counts.true_positives,
            &self.counts.predicted_positives,
            &self.positives
        ) {
            let d = c + m + self.epsilon;
            *g = (2. * (a + p) / (d + 1.) - 2. * a / d) / n_labels;
        }
    }

    fn objective(&self) -> f32 {
        mean(
            izip!(
                &self.counts.true_positives,
                &self.counts.predicted_positives,
                &self.positives
            )
            .map(|(&a, &c, &m)| 2. * a / (c + m + self.epsilon)),
        )
    }
}

/// `(1 - α) · inner + α · instance precision`.
///
/// Small values of α keep most of the macro objective while breaking its indifference towards
/// instances whose labels are all rare or all frequent.
#[derive(Clone, Debug)]
pub struct MixedInstancePrecision<O> {
    inner: O,
    alpha: f32,
    k: usize,
    n_instances: usize,
    true_positives: f32,
}

impl<O: BlockObjective> MixedInstancePrecision<O> {
    pub fn new(inner: O, alpha: f32, k: usize) -> Result<Self> {
        if !(0. ..=1.).contains(&alpha) {
            return Err(Error::InvalidHyperParam(format!(
                "alpha must be in [0, 1], got {}",
                alpha
            )));
        }
        Ok(Self {
            inner,
            alpha,
            k,
            n_instances: 0,
            true_positives: 0.,
        })
    }

    fn normalizer(&self) -> f32 {
        (self.n_instances * self.k).max(1) as f32
    }
}

impl<O: BlockObjective> BlockObjective for MixedInstancePrecision<O> {
    fn prepare<M: ScoreMatrix>(&mut self, preds: &M) {
        self.inner.prepare(preds);
        self.n_instances = preds.n_instances();
    }

    fn clear(&mut self) {
        self.inner.clear();
        self.true_positives = 0.;
    }

    fn prepare_row(&self, row: &mut [f32]) {
        self.inner.prepare_row(row);
    }

    fn remove_row(&mut self, row: &[f32], labels: &[Index]) {
        self.inner.remove_row(row, labels);
        self.true_positives -= labels.iter().map(|&j| row[j as usize]).sum::<f32>();
    }

    fn add_row(&mut self, row: &[f32], labels: &[Index]) {
        self.inner.add_row(row, labels);
        self.true_positives += labels.iter().map(|&j| row[j as usize]).sum::<f32>();
    }

    fn gains(&self, row: &[f32], gains: &mut [f32]) {
        self.inner.gains(row, gains);
        let scale = self.alpha / self.normalizer();
        for (g, &p) in gains.iter_mut().zip(row) {
            *g = (1. - self.alpha) * *g + scale * p;
        }
    }

    fn objective(&self) -> f32 {
        (1. - self.alpha) * self.inner.objective()
            + self.alpha * self.true_positives / self.normalizer()
    }
}

pub fn block_coordinate_macro_precision<M: ScoreMatrix>(
    preds: &M,
    hyper_param: &HyperParam,
) -> Result<Solution> {
    block_coordinate(
        preds,
        MacroPrecision::new(hyper_param.epsilon),
        hyper_param,
        hyper_param.initialization(),
    )
}

pub fn block_coordinate_macro_recall<M: ScoreMatrix>(
    preds: &M,
    hyper_param: &HyperParam,
) -> Result<Solution> {
    block_coordinate(
        preds,
        MacroRecall::new(hyper_param.epsilon),
        hyper_param,
        hyper_param.initialization(),
    )
}

pub fn block_coordinate_macro_f1<M: ScoreMatrix>(
    preds: &M,
    hyper_param: &HyperParam,
) -> Result<Solution> {
    block_coordinate(
        preds,
        MacroF1::new(hyper_param.epsilon),
        hyper_param,
        hyper_param.initialization(),
    )
}

/// Mixture of instance precision and macro precision.
pub fn block_coordinate_mixed_precision<M: ScoreMatrix>(
    preds: &M,
    alpha: f32,
    hyper_param: &HyperParam,
) -> Result<Solution> {
    let objective = MixedInstancePrecision::new(
        MacroPrecision::new(hyper_param.epsilon),
        alpha,
        hyper_param.k,
    )?;
    block_coordinate(preds, objective, hyper_param, hyper_param.initialization())
}

/// Mixture of instance precision and macro F1.
pub fn block_coordinate_mixed_f1<M: ScoreMatrix>(
    preds: &M,
    alpha: f32,
    hyper_param: &HyperParam,
) -> Result<Solution> {
    let objective =
        MixedInstancePrecision::new(MacroF1::new(hyper_param.epsilon), alpha, hyper_param.k)?;
    block_coordinate(preds, objective, hyper_param, hyper_param.initialization())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::optimize::{evaluate, Initialization};
    use crate::{metrics, Assignment, DenseMat, SparseMat};
    use assert_approx_eq::assert_approx_eq;
    use const_default::ConstDefault;
    use ndarray::array;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    /// A skewed score matrix: a few frequent labels with high scores and a long tail.
    fn long_tail_preds(n_instances: usize, n_labels: usize, seed: u64) -> DenseMat {
        let mut rng = StdRng::seed_from_u64(seed);
        DenseMat::from_shape_fn((n_instances, n_labels), |(_, j)| {
            let scale = 1. / (1. + j as f32).sqrt();
            if rng.gen_bool(0.6) {
                rng.gen::<f32>() * scale
            } else {
                0.
            }
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

    /// Apply a sequence of single-instance updates and compare against a fresh recomputation.
    fn check_incremental_matches_scratch<O: BlockObjective + Clone>(objective: O) {
        let preds = long_tail_preds(30, 12, 1);
        let mut rng = StdRng::seed_from_u64(2);
        let mut assignment = Assignment::random(&preds, 3, &mut rng).unwrap();

        let mut incremental = objective.clone();
        incremental.prepare(&preds);
        incremental.reset(&preds, &assignment);
        for step in 0..100 {
            let i = step % preds.nrows();
            let row = preds.row(i).to_vec();
            let mut labels = (0..12u32).collect::<Vec<_>>();
            labels.rotate_left(rng.gen_range(0..12));
            labels.truncate(3);

            incremental.remove_row(&row, assignment.row(i));
            incremental.add_row(&row, &labels);
            assignment.set_row(i, &labels);
        }

        let mut scratch = objective;
        scratch.prepare(&preds);
        scratch.reset(&preds, &assignment);
        assert_approx_eq!(incremental.objective(), scratch.objective(), 1e-5);
    }

    #[test]
    fn test_incremental_statistics() {
        check_incremental_matches_scratch(MacroPrecision::new(1e-3));
        check_incremental_matches_scratch(MacroRecall::new(1e-3));
        check_incremental_matches_scratch(MacroF1::new(1e-3));
        check_incremental_matches_scratch(
            MixedInstancePrecision::new(MacroPrecision::new(1e-3), 0.3, 3).unwrap(),
        );
    }

    #[test]
    fn test_objectives_match_metrics() {
        let preds = long_tail_preds(20, 8, 3);
        let assignment = Assignment::random(&preds, 2, &mut StdRng::seed_from_u64(4)).unwrap();
        assert_approx_eq!(
            metrics::macro_precision(&preds, &assignment, 1e-3).unwrap(),
            evaluate(&preds, &mut MacroPrecision::new(1e-3), &assignment).unwrap()
        );
        assert_approx_eq!(
            metrics::macro_recall(&preds, &assignment, 1e-3).unwrap(),
            evaluate(&preds, &mut MacroRecall::new(1e-3), &assignment).unwrap()
        );
        assert_approx_eq!(
            metrics::macro_f1(&preds, &assignment, 1e-3).unwrap(),
            evaluate(&preds, &mut MacroF1::new(1e-3), &assignment).unwrap()
        );
        let mut mixed = MixedInstancePrecision::new(MacroPrecision::new(1e-3), 0.25, 2).unwrap();
        assert_approx_eq!(
            0.75 * metrics::macro_precision(&preds, &assignment, 1e-3).unwrap()
                + 0.25 * metrics::instance_precision(&preds, &assignment).unwrap(),
            evaluate(&preds, &mut mixed, &assignment).unwrap()
        );
    }

    #[test]
    fn test_gains_are_exact_marginal_changes() {
        let preds = long_tail_preds(10, 6, 5);
        let assignment = Assignment::random(&preds, 2, &mut StdRng::seed_from_u64(6)).unwrap();
        let mut objective = MacroF1::new(1e-3);
        objective.prepare(&preds);
        objective.reset(&preds, &assignment);

        let row = preds.row(0).to_vec();
        objective.remove_row(&row, assignment.row(0));
        let base = objective.objective();
        let mut gains = vec![0.; 6];
        objective.gains(&row, &mut gains);
        for j in 0..6u32 {
            objective.add_row(&row, &[j]);
            assert_approx_eq!(base + gains[j as usize], objective.objective(), 1e-6);
            objective.remove_row(&row, &[j]);
        }
    }

    #[test]
    fn test_row_sums_and_monotonicity() {
        let preds = long_tail_preds(60, 15, 7);
        for k in [1, 3, 5] {
            let hp = hyper_param(k);
            for solution in [
                block_coordinate_macro_precision(&preds, &hp).unwrap(),
                block_coordinate_macro_recall(&preds, &hp).unwrap(),
                block_coordinate_macro_f1(&preds, &hp).unwrap(),
                block_coordinate_mixed_precision(&preds, 0.1, &hp).unwrap(),
                block_coordinate_mixed_f1(&preds, 0.1, &hp).unwrap(),
            ] {
                assert!(solution.assignment.rows().iter().all(|r| r.len() == k));
                let history = &solution.objective_history;
                assert_eq!(solution.iterations, history.len());
                for w in history.windows(2) {
                    assert!(w[1] + 1e-5 >= w[0], "{:?}", history);
                }
            }
        }
    }

    #[test]
    fn test_same_seed_same_output() {
        let preds = long_tail_preds(40, 10, 8);
        let hp = HyperParam {
            seed: 42,
            ..hyper_param(2)
        };
        let first = block_coordinate_macro_precision(&preds, &hp).unwrap();
        let second = block_coordinate_macro_precision(&preds, &hp).unwrap();
        assert_eq!(first.assignment, second.assignment);
        assert_eq!(first.iterations, second.iterations);
        assert_eq!(first.objective.to_bits(), second.objective.to_bits());
    }

    #[test]
    fn test_dense_and_sparse_inputs_agree() {
        let preds = long_tail_preds(40, 10, 9);
        let sparse = SparseMat::csr_from_dense(preds.view(), 0.);
        let hp = hyper_param(3);
        let from_dense = block_coordinate_macro_f1(&preds, &hp).unwrap();
        let from_sparse = block_coordinate_macro_f1(&sparse, &hp).unwrap();
        assert_eq!(from_dense.assignment, from_sparse.assignment);
    }

    #[test]
    fn test_converged_output_is_stable() {
        let preds = long_tail_preds(50, 12, 10);
        let hp = HyperParam {
            tolerance: 1e-7,
            max_iter: Some(100),
            ..hyper_param(2)
        };
        let converged = block_coordinate_macro_precision(&preds, &hp).unwrap();
        assert!(converged.converged);

        let again = block_coordinate(
            &preds,
            MacroPrecision::new(hp.epsilon),
            &HyperParam {
                max_iter: Some(1),
                seed: 123,
                ..hp
            },
            Initialization::Warm(converged.assignment.clone()),
        )
        .unwrap();
        assert_eq!(1, again.iterations);
        assert_approx_eq!(converged.objective, again.objective, 1e-5);
    }

    #[test]
    fn test_improves_on_instance_top_k() {
        let preds = long_tail_preds(80, 20, 11);
        let hp = hyper_param(3);
        let top_k = crate::optimize::weighted::optimal_instance_precision(&preds, 3).unwrap();
        let start = metrics::macro_precision(&preds, &top_k.assignment, hp.epsilon).unwrap();

        let solution = block_coordinate(
            &preds,
            MacroPrecision::new(hp.epsilon),
            &hp,
            Initialization::Warm(top_k.assignment),
        )
        .unwrap();
        assert!(solution.objective + 1e-6 >= start);
    }

    #[test]
    fn test_macro_precision_spreads_labels() {
        // Instance top-1 always picks label 0; macro precision rewards using the other labels
        let preds = array![[0.9, 0.8, 0.], [0.9, 0., 0.7], [0.9, 0.1, 0.1]];
        let solution = block_coordinate_macro_precision(
            &preds,
            &HyperParam {
                greedy_start: true,
                ..hyper_param(1)
            },
        )
        .unwrap();
        let counts = solution.assignment.label_counts();
        assert!(counts.iter().filter(|&&c| c > 0).count() >= 2);
    }

    #[test]
    fn test_greedy_start_with_single_pass() {
        let preds = long_tail_preds(30, 8, 12);
        let solution = block_coordinate_macro_precision(
            &preds,
            &HyperParam {
                greedy_start: true,
                max_iter: Some(1),
                ..hyper_param(2)
            },
        )
        .unwrap();
        assert_eq!(1, solution.iterations);
        assert!(solution.assignment.is_complete());
    }

    #[test]
    fn test_preconditions() {
        let preds = long_tail_preds(5, 4, 13);
        assert!(matches!(
            block_coordinate_macro_precision(&preds, &hyper_param(5)),
            Err(Error::InvalidK { k: 5, n_labels: 4 })
        ));
        assert!(matches!(
            block_coordinate_macro_precision(
                &preds,
                &HyperParam {
                    max_iter: Some(0),
                    ..hyper_param(1)
                }
            ),
            Err(Error::InvalidHyperParam(_))
        ));
        assert!(matches!(
            block_coordinate_mixed_precision(&preds, 1.5, &hyper_param(1)),
            Err(Error::InvalidHyperParam(_))
        ));
        let wrong_shape = Assignment::from_rows(vec![vec![0]; 4], 4, 1).unwrap();
        assert!(matches!(
            block_coordinate(
                &preds,
                MacroPrecision::new(1e-3),
                &hyper_param(1),
                Initialization::Warm(wrong_shape)
            ),
            Err(Error::ShapeMismatch { .. })
        ));
    }
}
