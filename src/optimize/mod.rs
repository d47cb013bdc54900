pub mod coverage;
pub mod precision;
pub mod risk;
pub mod weighted;

use crate::mat_util::{ScoreMatrix, ScoreRow};
use crate::topk::TopKSelector;
use crate::util::pass_progress_bar;
use crate::{Assignment, Error, Index, Result, Solution};
use const_default::ConstDefault;
use log::{debug, info};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};

/// Settings shared by the optimizers.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HyperParam {
    /// Number of labels to assign to each instance.
    pub k: usize,
    /// Stop once a pass improves the objective by no more than this.
    pub tolerance: f32,
    /// Optional cap on the number of passes.
    pub max_iter: Option<usize>,
    /// Floor added to predicted-positive counts to avoid dividing by zero.
    pub epsilon: f32,
    /// Start from an empty assignment, so the first pass is a sequential greedy fill.
    pub greedy_start: bool,
    /// Seed for the initial assignment and the per-pass instance orders.
    pub seed: u64,
    pub show_progress: bool,
}

impl ConstDefault for HyperParam {
    const DEFAULT: Self = Self {
        k: 5,
        tolerance: 1e-4,
        max_iter: None,
        epsilon: 1e-3,
        greedy_start: false,
        seed: 0,
        show_progress: false,
    };
}

impl Default for HyperParam {
    fn default() -> Self {
        Self::DEFAULT
    }
}

impl HyperParam {
    pub fn validate(&self) -> Result<()> {
        if self.k == 0 {
            return Err(Error::InvalidHyperParam("k must be positive".to_owned()));
        }
        if !self.tolerance.is_finite() || self.tolerance < 0. {
            return Err(Error::InvalidHyperParam(format!(
                "tolerance must be finite and non-negative, got {}",
                self.tolerance
            )));
        }
        if self.max_iter == Some(0) {
            return Err(Error::InvalidHyperParam(
                "max_iter must be at least 1".to_owned(),
            ));
        }
        if !self.epsilon.is_finite() || self.epsilon <= 0. {
            return Err(Error::InvalidHyperParam(format!(
                "epsilon must be finite and positive, got {}",
                self.epsilon
            )));
        }
        Ok(())
    }

    /// The initialization implied by the `greedy_start` flag.
    pub fn initialization(&self) -> Initialization {
        if self.greedy_start {
            Initialization::Greedy
        } else {
            Initialization::Random
        }
    }
}

/// How the assignment is initialized before the first pass.
#[derive(Clone, Debug)]
pub enum Initialization {
    /// Random labels, preferring those with non-zero scores; see [`Assignment::random`].
    Random,
    /// No labels; the first pass fills instances one at a time given those already filled.
    Greedy,
    /// Continue from an existing complete assignment.
    Warm(Assignment),
}

/// A population-level objective that decomposes over instances through per-label statistics.
///
/// Implementations keep sufficient statistics of the current assignment so that the effect of
/// changing one instance's labels can be evaluated without rescanning the others. Rows are passed
/// as dense score slices of length `n_labels`. Instances without labels (only possible during a
/// greedy first pass) contribute nothing to the statistics.
pub trait BlockObjective {
    /// Prepare for a run over the given predictions; called once before anything else.
    fn prepare<M: ScoreMatrix>(&mut self, preds: &M);

    /// Reset the statistics to those of an assignment where no instance has labels.
    fn clear(&mut self);

    /// Adjust a row of scores before it is used; e.g. clamp it into a safe range.
    fn prepare_row(&self, _row: &mut [f32]) {}

    /// Remove the contribution of an instance that currently has the given labels.
    fn remove_row(&mut self, row: &[f32], labels: &[Index]);

    /// Add the contribution of an instance with the given labels.
    fn add_row(&mut self, row: &[f32], labels: &[Index]);

    /// Change in objective from assigning each label to an instance that is currently removed.
    ///
    /// Because the objectives are sums of per-label terms, selecting the k largest gains gives
    /// the best labels for the instance.
    fn gains(&self, row: &[f32], gains: &mut [f32]);

    /// Objective value for the current statistics.
    fn objective(&self) -> f32;

    /// Recompute the statistics from scratch for the given assignment.
    fn reset<M: ScoreMatrix>(&mut self, preds: &M, assignment: &Assignment) {
        self.clear();
        let mut row = vec![0.; preds.n_labels()];
        for (i, labels) in assignment.rows().iter().enumerate() {
            if labels.is_empty() {
                continue;
            }
            preds.score_row(i).copy_to_dense(&mut row);
            self.prepare_row(&mut row);
            self.add_row(&row, labels);
        }
    }
}

/// Objective value of an assignment, computed from scratch.
pub fn evaluate<M, O>(preds: &M, objective: &mut O, assignment: &Assignment) -> Result<f32>
where
    M: ScoreMatrix,
    O: BlockObjective,
{
    preds.check_layout()?;
    assignment.check_shape(preds.n_instances(), preds.n_labels(), assignment.k())?;
    objective.prepare(preds);
    objective.reset(preds, assignment);
    Ok(objective.objective())
}

/// Run block-coordinate ascent of the given objective.
///
/// Each pass visits the instances in a freshly shuffled order and replaces every instance's
/// labels with the best ones given all other instances. Updates are sequential: an instance sees
/// the statistics already changed earlier in the same pass. The result is a plateau of the
/// objective up to `tolerance`, not a certified global optimum.
///
/// All preconditions (hyper-parameters, k against the number of labels, layout, shape of a warm
/// start) are checked before any work is done.
pub fn block_coordinate<M, O>(
    preds: &M,
    mut objective: O,
    hyper_param: &HyperParam,
    init: Initialization,
) -> Result<Solution>
where
    M: ScoreMatrix,
    O: BlockObjective,
{
    hyper_param.validate()?;
    preds.check_layout()?;
    let (n_instances, n_labels) = (preds.n_instances(), preds.n_labels());
    let k = hyper_param.k;
    Error::check_k(k, n_labels)?;

    let mut rng = StdRng::seed_from_u64(hyper_param.seed);
    let mut assignment = match init {
        Initialization::Random => Assignment::random(preds, k, &mut rng)?,
        Initialization::Greedy => Assignment::empty(n_instances, n_labels, k),
        Initialization::Warm(assignment) => {
            assignment.check_shape(n_instances, n_labels, k)?;
            assignment
        }
    };

    info!(
        "Running block coordinate ascent on {} instances, {} labels with k = {}",
        n_instances, n_labels, k
    );
    let start_t = time::precise_time_s();

    objective.prepare(preds);
    objective.reset(preds, &assignment);
    let mut old_objective = objective.objective();

    let mut order = (0..n_instances).collect::<Vec<_>>();
    let mut row = vec![0f32; n_labels];
    let mut gains = vec![0f32; n_labels];
    let mut selector = TopKSelector::new();
    let mut selected = Vec::<Index>::with_capacity(k);
    let mut objective_history = Vec::new();
    let mut iterations = 0;
    let converged = loop {
        iterations += 1;
        order.shuffle(&mut rng);
        // Recomputed every pass so rounding errors do not accumulate across passes
        objective.reset(preds, &assignment);

        let mut pb = pass_progress_bar(hyper_param.show_progress, n_instances);
        for &i in &order {
            preds.score_row(i).copy_to_dense(&mut row);
            objective.prepare_row(&mut row);

            let current = assignment.row(i);
            if !current.is_empty() {
                objective.remove_row(&row, current);
            }
            objective.gains(&row, &mut gains);
            selector.select_dense(&gains, k, &mut selected)?;
            objective.add_row(&row, &selected);
            assignment.set_row(i, &selected);

            if let Some(pb) = pb.as_mut() {
                pb.inc();
            }
        }
        if let Some(pb) = pb.as_mut() {
            pb.finish();
        }

        objective.reset(preds, &assignment);
        let new_objective = objective.objective();
        objective_history.push(new_objective);
        debug!(
            "Pass {}: objective {:.6} -> {:.6}",
            iterations, old_objective, new_objective
        );

        if new_objective <= old_objective + hyper_param.tolerance {
            break true;
        }
        if hyper_param.max_iter.map_or(false, |m| iterations >= m) {
            break false;
        }
        old_objective = new_objective;
    };

    let objective_value = objective.objective();
    info!(
        "Done after {} passes ({}); objective = {:.6}; it took {:.2}s",
        iterations,
        if converged { "converged" } else { "capped" },
        objective_value,
        time::precise_time_s() - start_t
    );
    Ok(Solution {
        assignment,
        iterations,
        objective: objective_value,
        converged,
        objective_history,
    })
}
