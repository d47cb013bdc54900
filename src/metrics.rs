use crate::mat_util::{ScoreMatrix, ScoreRow};
use crate::optimize::risk::Measure;
use crate::{Assignment, DenseVec, Result};

/// Per-label expected confusion mass of an assignment.
#[derive(Clone, Debug)]
pub struct LabelStatistics {
    pub n_instances: usize,
    /// Σ_i x_ij p_ij
    pub true_positives: DenseVec,
    /// Σ_i x_ij
    pub predicted_positives: DenseVec,
    /// Σ_i p_ij
    pub positives: DenseVec,
}

impl LabelStatistics {
    pub fn compute<M: ScoreMatrix>(preds: &M, assignment: &Assignment) -> Result<Self> {
        preds.check_layout()?;
        let (n_instances, n_labels) = (preds.n_instances(), preds.n_labels());
        assignment.check_shape(n_instances, n_labels, assignment.k())?;

        let mut stats = Self {
            n_instances,
            true_positives: DenseVec::zeros(n_labels),
            predicted_positives: DenseVec::zeros(n_labels),
            positives: DenseVec::zeros(n_labels),
        };
        let mut row = vec![0.; n_labels];
        for i in 0..n_instances {
            let score_row = preds.score_row(i);
            for (j, v) in score_row.entries() {
                stats.positives[j] += v;
            }
            score_row.copy_to_dense(&mut row);
            for &j in assignment.row(i) {
                let j = j as usize;
                stats.true_positives[j] += row[j];
                stats.predicted_positives[j] += 1.;
            }
        }
        Ok(stats)
    }

    pub fn false_positives(&self) -> DenseVec {
        &self.predicted_positives - &self.true_positives
    }

    pub fn false_negatives(&self) -> DenseVec {
        &self.positives - &self.true_positives
    }
}

pub fn macro_precision<M: ScoreMatrix>(
    preds: &M,
    assignment: &Assignment,
    epsilon: f32,
) -> Result<f32> {
    let stats = LabelStatistics::compute(preds, assignment)?;
    Ok(mean(
        stats
            .true_positives
            .iter()
            .zip(stats.predicted_positives.iter())
            .map(|(&tp, &pp)| ratio(tp, pp + epsilon)),
    ))
}

pub fn macro_recall<M: ScoreMatrix>(
    preds: &M,
    assignment: &Assignment,
    epsilon: f32,
) -> Result<f32> {
    let stats = LabelStatistics::compute(preds, assignment)?;
    Ok(mean(
        stats
            .true_positives
            .iter()
            .zip(stats.positives.iter())
            .map(|(&tp, &p)| ratio(tp, p + epsilon)),
    ))
}

pub fn macro_f1<M: ScoreMatrix>(preds: &M, assignment: &Assignment, epsilon: f32) -> Result<f32> {
    let stats = LabelStatistics::compute(preds, assignment)?;
    Ok(mean(
        itertools::izip!(
            stats.true_positives.iter(),
            stats.predicted_positives.iter(),
            stats.positives.iter()
        )
        .map(|(&tp, &pp, &p)| ratio(2. * tp, pp + p + epsilon)),
    ))
}

/// Expected precision averaged over instances.
pub fn instance_precision<M: ScoreMatrix>(preds: &M, assignment: &Assignment) -> Result<f32> {
    let stats = LabelStatistics::compute(preds, assignment)?;
    let n = (stats.n_instances * assignment.k()).max(1) as f32;
    Ok(stats.true_positives.sum() / n)
}

/// Expected fraction of labels predicted correctly for at least one instance.
pub fn coverage<M: ScoreMatrix>(preds: &M, assignment: &Assignment) -> Result<f32> {
    preds.check_layout()?;
    let (n_instances, n_labels) = (preds.n_instances(), preds.n_labels());
    assignment.check_shape(n_instances, n_labels, assignment.k())?;

    let mut uncovered = vec![1f32; n_labels];
    let mut row = vec![0.; n_labels];
    for i in 0..n_instances {
        preds.score_row(i).copy_to_dense(&mut row);
        for &j in assignment.row(i) {
            uncovered[j as usize] *= 1. - row[j as usize];
        }
    }
    Ok(1. - mean(uncovered.into_iter()))
}

/// Mean of a per-label measure over the expected confusion rates.
pub fn macro_measure<M, F>(preds: &M, assignment: &Assignment, measure: &F) -> Result<f32>
where
    M: ScoreMatrix,
    F: Measure,
{
    let stats = LabelStatistics::compute(preds, assignment)?;
    let n = stats.n_instances.max(1) as f32;
    let values = measure.evaluate(
        (&stats.true_positives / n).view(),
        (stats.false_positives() / n).view(),
        (stats.false_negatives() / n).view(),
    );
    Ok(mean(values.iter().copied()))
}

/// `numerator / denominator`, or zero when the denominator is not positive.
pub(crate) fn ratio(numerator: f32, denominator: f32) -> f32 {
    if denominator > 0. {
        numerator / denominator
    } else {
        0.
    }
}

pub(crate) fn mean<I: ExactSizeIterator<Item = f32>>(values: I) -> f32 {
    let n = values.len();
    if n == 0 {
        0.
    } else {
        values.sum::<f32>() / n as f32
    }
}
