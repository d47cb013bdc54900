use crate::{Error, Index, Result, SparseVecView};
use ndarray::{ArrayBase, ArrayView1, Axis, Data, Ix2};
use num_traits::Unsigned;
use sprs::{CsMatBase, SpIndex};
use std::ops::{Deref, DerefMut};

/// A row of scores indexed by label.
///
/// Labels without an explicit entry have an implicit score of zero.
pub trait ScoreRow {
    /// Number of labels, including those without explicit entries.
    fn dim(&self) -> usize;

    /// Explicit `(label, score)` entries, in ascending label order.
    fn entries(&self) -> impl Iterator<Item = (usize, f32)> + '_;

    /// Write the row into a dense buffer of length `dim()`.
    fn copy_to_dense(&self, out: &mut [f32]) {
        assert_eq!(out.len(), self.dim());
        out.fill(0.);
        for (j, v) in self.entries() {
            out[j] = v;
        }
    }
}

impl<'a> ScoreRow for ArrayView1<'a, f32> {
    fn dim(&self) -> usize {
        self.len()
    }

    fn entries(&self) -> impl Iterator<Item = (usize, f32)> + '_ {
        self.iter().copied().enumerate()
    }

    fn copy_to_dense(&self, out: &mut [f32]) {
        assert_eq!(out.len(), self.len());
        for (o, &v) in out.iter_mut().zip(self.iter()) {
            *o = v;
        }
    }
}

impl<'a> ScoreRow for SparseVecView<'a> {
    fn dim(&self) -> usize {
        SparseVecView::dim(self)
    }

    fn entries(&self) -> impl Iterator<Item = (usize, f32)> + '_ {
        self.iter().map(|(j, &v)| (j, v))
    }
}

/// An instance-by-label score matrix, either dense or CSR.
pub trait ScoreMatrix: Sync {
    type Row<'a>: ScoreRow
    where
        Self: 'a;

    fn n_instances(&self) -> usize;

    fn n_labels(&self) -> usize;

    fn score_row(&self, i: usize) -> Self::Row<'_>;

    /// Check that the layout can be read row by row.
    fn check_layout(&self) -> Result<()> {
        Ok(())
    }
}

impl<S> ScoreMatrix for ArrayBase<S, Ix2>
where
    S: Data<Elem = f32> + Sync,
{
    type Row<'a> = ArrayView1<'a, f32> where Self: 'a;

    fn n_instances(&self) -> usize {
        self.nrows()
    }

    fn n_labels(&self) -> usize {
        self.ncols()
    }

    fn score_row(&self, i: usize) -> Self::Row<'_> {
        self.index_axis(Axis(0), i)
    }
}

impl<IptrStorage, IndStorage, DataStorage> ScoreMatrix
    for CsMatBase<f32, Index, IptrStorage, IndStorage, DataStorage>
where
    IptrStorage: Deref<Target = [Index]> + Sync,
    IndStorage: Deref<Target = [Index]> + Sync,
    DataStorage: Deref<Target = [f32]> + Sync,
{
    type Row<'a> = SparseVecView<'a> where Self: 'a;

    fn n_instances(&self) -> usize {
        self.rows()
    }

    fn n_labels(&self) -> usize {
        self.cols()
    }

    fn score_row(&self, i: usize) -> Self::Row<'_> {
        self.outer_view(i)
            .unwrap_or_else(|| panic!("row {} out of bounds for {} rows", i, self.rows()))
    }

    fn check_layout(&self) -> Result<()> {
        if self.is_csr() {
            Ok(())
        } else {
            Err(Error::NotCsr)
        }
    }
}

pub trait IndexValuePairs<IndexT: SpIndex + Unsigned, ValueT: Copy>:
    Deref<Target = [(IndexT, ValueT)]>
{
    fn is_valid_sparse_vec(&self, length: usize) -> bool {
        // If empty, always valid
        if self.is_empty() {
            return true;
        }
        // Check if:
        // - All indices are smaller than max index
        // - Pairs are sorted by indices
        // - There are no duplicate indices
        if self[0].0.index() >= length {
            return false;
        }
        if self.len() > 1 {
            for ((i, _), (j, _)) in self.iter().skip(1).zip(self.iter()) {
                if i.index() >= length || i <= j {
                    return false;
                }
            }
        }

        true
    }
}

impl<IndexT, ValueT, PairsT> IndexValuePairs<IndexT, ValueT> for PairsT
where
    IndexT: SpIndex + Unsigned,
    ValueT: Copy,
    PairsT: Deref<Target = [(IndexT, ValueT)]>,
{
}

pub trait IndexValuePairsMut<IndexT, ValueT>: DerefMut<Target = [(IndexT, ValueT)]> {
    fn sort_by_index(&mut self)
    where
        IndexT: Ord,
    {
        self.sort_unstable_by(|l, r| l.0.cmp(&r.0));
    }
}

impl<IndexT, ValueT, PairsT> IndexValuePairsMut<IndexT, ValueT> for PairsT where
    PairsT: DerefMut<Target = [(IndexT, ValueT)]>
{
}

pub trait IndexValuePairLists<IndexT, ValueT, RowT>: Deref<Target = [RowT]>
where
    RowT: Deref<Target = [(IndexT, ValueT)]>,
{
    /// Copy data to a new sprs CSR matrix object.
    ///
    /// This assumes that is_valid_sparse_vec would return true for each row.
    fn copy_to_csrmat(&self, n_col: usize) -> sprs::CsMatI<ValueT, IndexT>
    where
        IndexT: SpIndex,
        ValueT: Copy,
    {
        let mut indptr: Vec<IndexT> = Vec::with_capacity(self.len() + 1);
        let mut indices: Vec<IndexT> = Vec::new();
        let mut data: Vec<ValueT> = Vec::new();

        indptr.push(IndexT::zero());
        for row in self.iter() {
            for &(i, v) in row.iter() {
                assert!(i.index() < n_col);
                indices.push(i);
                data.push(v);
            }
            indptr.push(IndexT::from_usize(indices.len()));
        }

        sprs::CsMatI::new((self.len(), n_col), indptr, indices, data)
    }
}

impl<IndexT, ValueT, RowT, T> IndexValuePairLists<IndexT, ValueT, RowT> for T
where
    T: Deref<Target = [RowT]>,
    RowT: Deref<Target = [(IndexT, ValueT)]>,
{
}
