use super::precision::MixedInstancePrecision;
use super::{block_coordinate, BlockObjective, HyperParam};
use crate::mat_util::{ScoreMatrix, ScoreRow};
use crate::metrics::{self, mean};
use crate::topk::TopKSelector;
use crate::{Assignment, Error, Index, Result, Solution};
use log::info;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

/// Scores are clamped to at most `1 - PROBABILITY_MARGIN` so a factor of the product never
/// becomes exactly zero and can always be divided out again.
pub const PROBABILITY_MARGIN: f32 = 1e-5;

/// Floor applied before taking logs in [`greedy_coverage`].
pub const LOG_FLOOR: f32 = 1e-5;

/// Expected fraction of labels predicted correctly for at least one instance.
///
/// Keeps `f_j = Π_i (1 - x_ij p_ij)`, the probability that label j is never captured.
#[derive(Clone, Debug, Default)]
pub struct Coverage {
    uncovered: Vec<f32>,
}

impl Coverage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl BlockObjective for Coverage {
    fn prepare<M: ScoreMatrix>(&mut self, preds: &M) {
        self.uncovered.resize(preds.n_labels(), 1.);
    }

    fn clear(&mut self) {
        self.uncovered.fill(1.);
    }

    fn prepare_row(&self, row: &mut [f32]) {
        for p in row.iter_mut() {
            *p = p.min(1. - PROBABILITY_MARGIN);
        }
    }

    fn remove_row(&mut self, row: &[f32], labels: &[Index]) {
        for &j in labels {
            let j = j as usize;
            self.uncovered[j] /= 1. - row[j];
        }
    }

    fn add_row(&mut self, row: &[f32], labels: &[Index]) {
        for &j in labels {
            let j = j as usize;
            self.uncovered[j] *= 1. - row[j];
        }
    }

    fn gains(&self, row: &[f32], gains: &mut [f32]) {
        let n_labels = row.len() as f32;
        for ((g, &p), &f) in gains.iter_mut().zip(row).zip(&self.uncovered) {
            *g = f * p / n_labels;
        }
    }

    fn objective(&self) -> f32 {
        1. - mean(self.uncovered.iter().copied())
    }
}

pub fn block_coordinate_coverage<M: ScoreMatrix>(
    preds: &M,
    hyper_param: &HyperParam,
) -> Result<Solution> {
    block_coordinate(
        preds,
        Coverage::new(),
        hyper_param,
        hyper_param.initialization(),
    )
}

/// Mixture of instance precision and coverage.
pub fn block_coordinate_mixed_coverage<M: ScoreMatrix>(
    preds: &M,
    alpha: f32,
    hyper_param: &HyperParam,
) -> Result<Solution> {
    let objective = MixedInstancePrecision::new(Coverage::new(), alpha, hyper_param.k)?;
    block_coordinate(preds, objective, hyper_param, hyper_param.initialization())
}

/// Single greedy pass maximizing expected coverage.
///
/// Keeps, in log space, the probability that each label is still uncovered by the instances
/// processed so far, and gives every instance the labels where a hit is most valuable. Before
/// each instance the log-state is multiplied by `decay`; 1.0 means no decay. Instances are
/// visited in index order, or in a random order when `shuffle_seed` is given.
pub fn greedy_coverage<M: ScoreMatrix>(
    preds: &M,
    k: usize,
    decay: f32,
    shuffle_seed: Option<u64>,
) -> Result<Solution> {
    preds.check_layout()?;
    let (n_instances, n_labels) = (preds.n_instances(), preds.n_labels());
    Error::check_k(k, n_labels)?;
    if !decay.is_finite() || decay < 0. {
        return Err(Error::InvalidHyperParam(format!(
            "decay must be finite and non-negative, got {}",
            decay
        )));
    }

    let mut order = (0..n_instances).collect::<Vec<_>>();
    if let Some(seed) = shuffle_seed {
        order.shuffle(&mut StdRng::seed_from_u64(seed));
    }

    let start_t = time::precise_time_s();
    let mut assignment = Assignment::empty(n_instances, n_labels, k);
    let mut log_uncovered = vec![0f32; n_labels];
    let mut row = vec![0f32; n_labels];
    let mut gains = vec![0f32; n_labels];
    let mut selector = TopKSelector::new();
    let mut selected = Vec::<Index>::with_capacity(k);
    for i in order {
        if decay != 1. {
            log_uncovered.iter_mut().for_each(|f| *f *= decay);
        }
        preds.score_row(i).copy_to_dense(&mut row);
        for ((g, &f), &p) in gains.iter_mut().zip(&log_uncovered).zip(&row) {
            *g = f + p.max(LOG_FLOOR).ln();
        }
        selector.select_dense(&gains, k, &mut selected)?;
        for &j in &selected {
            let j = j as usize;
            log_uncovered[j] += (1. - row[j]).max(LOG_FLOOR).ln();
        }
        assignment.set_row(i, &selected);
    }

    let objective = metrics::coverage(preds, &assignment)?;
    info!(
        "Greedy coverage on {} instances; coverage = {:.6}; it took {:.2}s",
        n_instances,
        objective,
        time::precise_time_s() - start_t
    );
    Ok(Solution {
        assignment,
        iterations: 1,
        objective,
        converged: true,
        objective_history: vec![objective],
    })
}
