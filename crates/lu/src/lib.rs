mod dense;

pub use dense::Lu;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// The matrix handed to [`Lu::new`] was empty or not square.
    #[error("matrix must be square and non-empty to factor (got {nrows}x{ncols})")]
    NonSquare { nrows: usize, ncols: usize },

    /// A right-hand side does not match the order of the factored system.
    #[error("right-hand side has {got} rows but the factored system has order {expected}")]
    DimensionMismatch { expected: usize, got: usize },

    /// A row with no nonzero entry was found while computing the implicit scaling, so no
    /// elimination step can pivot on it.
    #[error("a singular matrix was encountered during a LU factorization (row {row} is identically zero)")]
    Singular { row: usize },
}
