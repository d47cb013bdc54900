use crate::mat_util::{IndexValuePairLists, ScoreMatrix, ScoreRow};
use crate::{DenseMat, Error, Index, IndexSet, Result, SparseMat};
use itertools::Itertools;
use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};

/// A hard top-k label assignment: exactly k distinct labels for every instance.
///
/// Rows are stored as sorted label lists rather than as a dense 0/1 matrix. While an optimizer
/// is running with a greedy start, rows that have not been visited yet are empty; every
/// assignment handed back to callers is complete.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "AssignmentRows")]
pub struct Assignment {
    n_labels: usize,
    k: usize,
    rows: Vec<Vec<Index>>,
}

/// Unchecked serialized form of [`Assignment`].
#[derive(Deserialize)]
struct AssignmentRows {
    n_labels: usize,
    k: usize,
    rows: Vec<Vec<Index>>,
}

impl TryFrom<AssignmentRows> for Assignment {
    type Error = Error;

    fn try_from(raw: AssignmentRows) -> Result<Self> {
        Self::from_rows(raw.rows, raw.n_labels, raw.k)
    }
}

impl Assignment {
    /// An assignment with no labels selected yet.
    pub(crate) fn empty(n_instances: usize, n_labels: usize, k: usize) -> Self {
        Self {
            n_labels,
            k,
            rows: vec![Vec::with_capacity(k); n_instances],
        }
    }

    /// Build an assignment from per-instance label lists, checking that each row holds exactly
    /// k distinct labels within range.
    pub fn from_rows(rows: Vec<Vec<Index>>, n_labels: usize, k: usize) -> Result<Self> {
        Error::check_k(k, n_labels)?;
        let mut assignment = Self {
            n_labels,
            k,
            rows: Vec::with_capacity(rows.len()),
        };
        for (i, mut row) in rows.into_iter().enumerate() {
            row.sort_unstable();
            row.dedup();
            if row.len() != k {
                return Err(Error::InvalidAssignment(format!(
                    "row {} has {} distinct labels, expected {}",
                    i,
                    row.len(),
                    k
                )));
            }
            if let Some(&label) = row.iter().find(|&&j| j as usize >= n_labels) {
                return Err(Error::InvalidAssignment(format!(
                    "row {} contains label {} but there are only {} labels",
                    i, label, n_labels
                )));
            }
            assignment.rows.push(row);
        }
        Ok(assignment)
    }

    /// Pick k labels at random for each instance, preferring labels with non-zero scores.
    ///
    /// If an instance has more than k labels with non-zero scores, k of them are sampled;
    /// otherwise all of them are taken and the rest is filled with other random labels.
    pub fn random<M, R>(preds: &M, k: usize, rng: &mut R) -> Result<Self>
    where
        M: ScoreMatrix,
        R: Rng,
    {
        let n_labels = preds.n_labels();
        Error::check_k(k, n_labels)?;

        let mut assignment = Self::empty(preds.n_instances(), n_labels, k);
        let mut nonzero = Vec::<Index>::new();
        let mut taken = IndexSet::with_capacity(k);
        for (i, row) in assignment.rows.iter_mut().enumerate() {
            nonzero.clear();
            nonzero.extend(
                preds
                    .score_row(i)
                    .entries()
                    .filter(|&(_, v)| v != 0.)
                    .map(|(j, _)| j as Index),
            );
            if nonzero.len() > k {
                row.extend(nonzero.choose_multiple(rng, k).copied());
            } else {
                row.extend_from_slice(&nonzero);
                taken.clear();
                taken.extend(nonzero.iter().copied());
                while row.len() < k {
                    let j = rng.gen_range(0..n_labels) as Index;
                    if taken.insert(j) {
                        row.push(j);
                    }
                }
            }
            row.sort_unstable();
        }
        Ok(assignment)
    }

    pub fn n_instances(&self) -> usize {
        self.rows.len()
    }

    pub fn n_labels(&self) -> usize {
        self.n_labels
    }

    pub fn k(&self) -> usize {
        self.k
    }

    /// Labels selected for instance i, in ascending order.
    pub fn row(&self, i: usize) -> &[Index] {
        &self.rows[i]
    }

    pub fn rows(&self) -> &[Vec<Index>] {
        &self.rows
    }

    pub(crate) fn set_row(&mut self, i: usize, labels: &[Index]) {
        debug_assert_eq!(labels.len(), self.k);
        let row = &mut self.rows[i];
        row.clear();
        row.extend_from_slice(labels);
        row.sort_unstable();
    }

    /// Whether every instance has its k labels.
    pub fn is_complete(&self) -> bool {
        self.rows.iter().all(|row| row.len() == self.k)
    }

    /// Check that the assignment can be used with a prediction matrix of the given shape.
    pub(crate) fn check_shape(&self, n_instances: usize, n_labels: usize, k: usize) -> Result<()> {
        Error::check_len("assignment rows", n_instances, self.n_instances())?;
        Error::check_len("assignment labels", n_labels, self.n_labels)?;
        Error::check_len("assignment labels per row", k, self.k)?;
        if !self.is_complete() {
            return Err(Error::InvalidAssignment(
                "some instances have no labels assigned".to_owned(),
            ));
        }
        Ok(())
    }

    /// Number of instances each label is assigned to.
    pub fn label_counts(&self) -> Vec<usize> {
        let mut counts = vec![0; self.n_labels];
        for &j in self.rows.iter().flatten() {
            counts[j as usize] += 1;
        }
        counts
    }

    /// Dense 0/1 matrix of shape (n_instances, n_labels).
    pub fn to_dense(&self) -> DenseMat {
        let mut mat = DenseMat::zeros((self.n_instances(), self.n_labels));
        for (i, row) in self.rows.iter().enumerate() {
            for &j in row {
                mat[[i, j as usize]] = 1.;
            }
        }
        mat
    }

    /// CSR matrix with a one for every selected label.
    pub fn to_csrmat(&self) -> SparseMat {
        self.rows
            .iter()
            .map(|row| row.iter().map(|&j| (j, 1f32)).collect_vec())
            .collect_vec()
            .copy_to_csrmat(self.n_labels)
    }
}

/// Result of running an optimizer.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Solution {
    pub assignment: Assignment,
    /// Number of passes over the instances.
    pub iterations: usize,
    /// Value of the optimized objective for the returned assignment.
    pub objective: f32,
    /// False if the iteration cap was hit before the objective stopped improving.
    pub converged: bool,
    /// Objective after each pass.
    pub objective_history: Vec<f32>,
}
