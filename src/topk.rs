use crate::mat_util::ScoreRow;
use crate::{Error, Index, Result};
use order_stat::kth_by;
use ordered_float::OrderedFloat;
use std::cmp::Ordering;

/// Higher score first, then lower label index.
#[inline]
fn rank_order(l: &(Index, f32), r: &(Index, f32)) -> Ordering {
    OrderedFloat(r.1)
        .cmp(&OrderedFloat(l.1))
        .then_with(|| l.0.cmp(&r.0))
}

/// Reusable top-k selector; holds a candidate buffer so repeated calls do not allocate.
///
/// Dense and sparse rows are both consumed as `(label, score)` pairs in ascending label order,
/// with labels missing from a sparse row scoring zero. Among equal scores the lower label index
/// is preferred; callers should not rely on which of several equally scored labels is returned.
/// The order of the returned indices is unspecified.
#[derive(Clone, Debug, Default)]
pub struct TopKSelector {
    candidates: Vec<(Index, f32)>,
}

impl TopKSelector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Select the k labels with the highest scores.
    ///
    /// `entries` must yield `(label, score)` pairs sorted by label with labels below `n_labels`;
    /// labels that are skipped score zero. The selected labels are written to `out`.
    pub fn select_into<I>(
        &mut self,
        entries: I,
        n_labels: usize,
        k: usize,
        out: &mut Vec<Index>,
    ) -> Result<()>
    where
        I: IntoIterator<Item = (usize, f32)>,
    {
        Error::check_k(k, n_labels)?;

        self.candidates.clear();
        // Only the k lowest absent labels can win a tie against each other, so at most k
        // implicit zeros ever need to be considered.
        let mut n_fill = 0;
        let mut next_label = 0;
        for (j, v) in entries {
            debug_assert!(j >= next_label && j < n_labels);
            while n_fill < k && next_label < j {
                self.candidates.push((next_label as Index, 0.));
                n_fill += 1;
                next_label += 1;
            }
            self.candidates.push((j as Index, v));
            next_label = j + 1;
        }
        while n_fill < k && next_label < n_labels {
            self.candidates.push((next_label as Index, 0.));
            n_fill += 1;
            next_label += 1;
        }

        debug_assert!(self.candidates.len() >= k);
        if self.candidates.len() > k {
            kth_by(&mut self.candidates, k - 1, rank_order);
        }

        out.clear();
        out.extend(self.candidates[..k].iter().map(|&(j, _)| j));
        Ok(())
    }

    /// Select the top k labels of a score row.
    pub fn select_row<R: ScoreRow>(&mut self, row: &R, k: usize) -> Result<Vec<Index>> {
        let mut out = Vec::with_capacity(k);
        self.select_into(row.entries(), row.dim(), k, &mut out)?;
        Ok(out)
    }

    /// Select the top k labels of a score row after multiplying each score by its label weight.
    pub fn select_weighted_row<R: ScoreRow>(
        &mut self,
        row: &R,
        weights: &[f32],
        k: usize,
        out: &mut Vec<Index>,
    ) -> Result<()> {
        Error::check_len("weight vector", row.dim(), weights.len())?;
        self.select_into(
            row.entries().map(|(j, v)| (j, v * weights[j])),
            row.dim(),
            k,
            out,
        )
    }

    /// Select the top k entries of a dense gain vector.
    pub fn select_dense(&mut self, gains: &[f32], k: usize, out: &mut Vec<Index>) -> Result<()> {
        self.select_into(gains.iter().copied().enumerate(), gains.len(), k, out)
    }
}

/// Convenience wrapper selecting the top k labels of a single row.
pub fn top_k<R: ScoreRow>(row: &R, k: usize) -> Result<Vec<Index>> {
    TopKSelector::new().select_row(row, k)
}
