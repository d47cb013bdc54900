use std::io;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// The selection budget does not fit the label space.
    #[error("k must be in 1..={n_labels}, got {k}")]
    InvalidK { k: usize, n_labels: usize },

    #[error("{what} has length {found}, expected {expected}")]
    ShapeMismatch {
        what: &'static str,
        expected: usize,
        found: usize,
    },

    #[error("invalid hyper-parameter: {0}")]
    InvalidHyperParam(String),

    #[error("sparse prediction matrix must be in CSR layout")]
    NotCsr,

    #[error("invalid assignment: {0}")]
    InvalidAssignment(String),

    #[error("failed to parse {0}")]
    Parse(String),

    #[error(transparent)]
    Io(#[from] io::Error),
}

impl Error {
    pub(crate) fn check_k(k: usize, n_labels: usize) -> Result<()> {
        if k == 0 || k > n_labels {
            Err(Error::InvalidK { k, n_labels })
        } else {
            Ok(())
        }
    }

    pub(crate) fn check_len(what: &'static str, expected: usize, found: usize) -> Result<()> {
        if expected != found {
            Err(Error::ShapeMismatch {
                what,
                expected,
                found,
            })
        } else {
            Ok(())
        }
    }
}
