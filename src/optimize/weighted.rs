use crate::mat_util::{ScoreMatrix, ScoreRow};
use crate::topk::TopKSelector;
use crate::{weights, Assignment, DenseVec, DenseVecView, Error, Index, Result, Solution};
use log::info;
use rayon::prelude::*;

/// Select for each instance the k labels maximizing `score * weight`.
///
/// There is no coupling between instances, so rows are processed in parallel. The reported
/// objective is the mean weighted score of the selected labels.
pub fn weighted_per_instance<M: ScoreMatrix>(
    preds: &M,
    weights: &[f32],
    k: usize,
) -> Result<Solution> {
    preds.check_layout()?;
    let (n_instances, n_labels) = (preds.n_instances(), preds.n_labels());
    Error::check_k(k, n_labels)?;
    Error::check_len("weight vector", n_labels, weights.len())?;

    let start_t = time::precise_time_s();
    let rows = (0..n_instances)
        .into_par_iter()
        .map_init(TopKSelector::new, |selector, i| -> Result<(Vec<Index>, f32)> {
            let row = preds.score_row(i);
            let mut labels = Vec::with_capacity(k);
            selector.select_weighted_row(&row, weights, k, &mut labels)?;
            labels.sort_unstable();

            let mut gain = 0.;
            let mut it = labels.iter().peekable();
            for (j, v) in row.entries() {
                while it.next_if(|&&l| (l as usize) < j).is_some() {}
                if it.next_if(|&&l| l as usize == j).is_some() {
                    gain += v * weights[j];
                }
            }
            Ok((labels, gain))
        })
        .collect::<Result<Vec<_>>>()?;

    let total_gain: f32 = rows.iter().map(|(_, gain)| gain).sum();
    let assignment = Assignment::from_rows(rows.into_iter().map(|(l, _)| l).collect(), n_labels, k)?;
    info!(
        "Selected top {} labels for {} instances; it took {:.2}s",
        k,
        n_instances,
        time::precise_time_s() - start_t
    );

    let objective = total_gain / (n_instances * k).max(1) as f32;
    Ok(Solution {
        assignment,
        iterations: 1,
        objective,
        converged: true,
        objective_history: vec![objective],
    })
}

fn weighted_by<M: ScoreMatrix>(
    preds: &M,
    marginals: DenseVecView,
    k: usize,
    weight_fn: impl FnOnce(DenseVecView) -> DenseVec,
) -> Result<Solution> {
    Error::check_len("marginal vector", preds.n_labels(), marginals.len())?;
    let weights = weight_fn(marginals).to_vec();
    weighted_per_instance(preds, &weights, k)
}

/// Plain top-k by score; optimal for expected instance-averaged precision.
pub fn optimal_instance_precision<M: ScoreMatrix>(preds: &M, k: usize) -> Result<Solution> {
    let weights = weights::uniform(preds.n_labels()).to_vec();
    weighted_per_instance(preds, &weights, k)
}

/// Top-k by `score / marginal`; optimal for expected macro recall.
pub fn optimal_macro_recall<M: ScoreMatrix>(
    preds: &M,
    marginals: DenseVecView,
    k: usize,
) -> Result<Solution> {
    weighted_by(preds, marginals, k, weights::inverse_marginal)
}

pub fn log_weighted_instance<M: ScoreMatrix>(
    preds: &M,
    marginals: DenseVecView,
    k: usize,
) -> Result<Solution> {
    weighted_by(preds, marginals, k, weights::log_marginal)
}

pub fn sqrt_weighted_instance<M: ScoreMatrix>(
    preds: &M,
    marginals: DenseVecView,
    k: usize,
) -> Result<Solution> {
    weighted_by(preds, marginals, k, weights::sqrt_marginal)
}

pub fn power_law_weighted_instance<M: ScoreMatrix>(
    preds: &M,
    marginals: DenseVecView,
    k: usize,
    beta: f32,
) -> Result<Solution> {
    weighted_by(preds, marginals, k, |m| weights::power_law(m, beta))
}

/// Top-k by `score * inverse propensity`; optimal for propensity-scored precision.
pub fn inv_propensity_weighted_instance<M: ScoreMatrix>(
    preds: &M,
    inv_propensities: DenseVecView,
    k: usize,
) -> Result<Solution> {
    weighted_by(preds, inv_propensities, k, |w| w.to_owned())
}
