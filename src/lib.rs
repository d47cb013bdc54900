pub type Index = u32;
pub type IndexValueVec = Vec<(Index, f32)>;
pub type IndexSet = hashbrown::HashSet<Index>;
pub type SparseMat = sprs::CsMatI<f32, Index>;
pub type SparseVecView<'a> = sprs::CsVecViewI<'a, f32, Index>;
pub type DenseVec = ndarray::Array1<f32>;
pub type DenseVecView<'a> = ndarray::ArrayView1<'a, f32>;
pub type DenseMat = ndarray::Array2<f32>;
pub use assignment::{Assignment, Solution};
pub use error::{Error, Result};
pub use mat_util::{ScoreMatrix, ScoreRow};
pub use optimize::{HyperParam, Initialization};

pub mod assignment;
pub mod data;
mod error;
mod mat_util;
pub mod metrics;
pub mod optimize;
pub mod topk;
mod util;
pub mod weights;
