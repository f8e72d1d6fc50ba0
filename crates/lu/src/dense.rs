//! LU factorization of dense square matrices, and the direct solves built on it.
//!
use nalgebra::{
    allocator::Allocator, Const, DefaultAllocator, Dim, Matrix, OMatrix, OVector, RealField,
    Scalar, Storage, StorageMut, U1,
};
use num_traits::NumCast;

#[cfg(feature = "serde-serialize")]
use serde::{Deserialize, Serialize};

use crate::Error;

/// Substituted for an exactly zero pivot so elimination can continue on structurally singular
/// input. The resulting factorization is usable but inaccurate; see [`Lu::used_tiny_pivot`].
const TINY: f64 = 1.0e-40;

/// LU factorization of a square matrix, using Crout's method with implicit scaling and partial
/// (row) pivoting.
///
/// A successful factorization of an `n`x`n` matrix `A` leaves the engine with the following
/// state, which later solves read but never modify:
///
/// 1. The combined factor buffer holds `U` in its upper triangular part (including the
///     diagonal), and the elimination multipliers in its strictly lower triangular part. The
///     multipliers are the below-diagonal entries of `L`, whose diagonal is all 1's and is not
///     stored.
///
/// 2. `pivots[k]` contains the row number of the pivot chosen at elimination step `k`,
///     `k = 0, 1, ..., n-1`. Replaying these interchanges in forward order reproduces the row
///     permutation `P` for which `P * A = L * U`.
///
/// 3. `sign` is `+1` or `-1` according to the parity of the row interchanges, so that the
///     determinant of `A` is `sign` times the product of the diagonal of `U`.
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
#[cfg_attr(
    feature = "serde-serialize",
    serde(bound(
        serialize = "T: Serialize, OMatrix<T, D, D>: Serialize, OVector<usize, D>: Serialize"
    ))
)]
#[cfg_attr(
    feature = "serde-serialize",
    serde(bound(
        deserialize = "T: Deserialize<'de>, OMatrix<T, D, D>: Deserialize<'de>, OVector<usize, D>: Deserialize<'de>, DefaultAllocator: Allocator<T, D, D> + Allocator<usize, D>"
    ))
)]
#[derive(Clone, Debug)]
pub struct Lu<T, D>
where
    T: Scalar,
    D: Dim,
    DefaultAllocator: Allocator<T, D, D> + Allocator<usize, D>,
{
    /// Combined L/U storage, row-permuted
    lu: OMatrix<T, D, D>,
    /// Row-interchange history
    pivots: OVector<usize, D>,
    /// Interchange parity, used by the determinant
    sign: T,
    /// Whether any exactly zero pivot was patched with `TINY`
    tiny_pivot: bool,
}

impl<T, D> Lu<T, D>
where
    T: RealField + NumCast + Copy,
    D: Dim,
    DefaultAllocator: Allocator<T, D, D> + Allocator<T, D> + Allocator<usize, D>,
{
    /// Factors the square matrix `a`. The engine owns its own working copy and the input is
    /// left untouched.
    ///
    /// Pivot rows are chosen by largest *scaled* magnitude: each candidate `|a[(i, k)]|` is
    /// weighted by the reciprocal of the largest absolute value in row `i`, so rows of very
    /// different size are compared fairly.
    ///
    /// Returns [`Error::NonSquare`] if `a` is empty or not square, and [`Error::Singular`] if
    /// some row of `a` has no nonzero entry. A zero pivot element encountered during
    /// elimination despite no row being identically zero is *not* an error: it is replaced by
    /// a tiny constant and the factorization continues with degraded accuracy (see
    /// [`Lu::used_tiny_pivot`]).
    pub fn new<S>(a: &Matrix<T, D, D, S>) -> Result<Self, Error>
    where
        S: Storage<T, D, D>,
    {
        let (nrows, ncols) = a.shape();
        if nrows == 0 || nrows != ncols {
            return Err(Error::NonSquare { nrows, ncols });
        }
        let n = nrows;
        tracing::trace!("Lu::new (n={})", n);

        let mut lu = a.clone_owned();
        let (dim, _) = lu.shape_generic();
        let mut pivots = OVector::<usize, D>::zeros_generic(dim, Const::<1>);
        let mut sign = T::one();
        let mut tiny_pivot = false;

        // Loop over rows to get the implicit scaling information: vv[i] is the reciprocal of
        // the largest absolute value in row i.
        let mut vv = OVector::<T, D>::zeros_generic(dim, Const::<1>);
        for i in 0..n {
            let mut big = T::zero();
            for j in 0..n {
                let temp = lu[(i, j)].abs();
                if temp > big {
                    big = temp;
                }
            }
            if big == T::zero() {
                return Err(Error::Singular { row: i });
            }
            vv[i] = big.recip();
        }

        // k-th elimination step number
        for k in 0..n {
            // find imax = pivot row number, comparing scaled magnitudes
            let mut big = T::zero();
            let mut imax = k;
            for i in k..n {
                let temp = vv[i] * lu[(i, k)].abs();
                if temp > big {
                    big = temp;
                    imax = i;
                }
            }

            // swap a(k,1:n) and a(imax,1:n) if necessary, carrying the scale factor of the
            // displaced row forward for pivot comparisons at later columns
            if imax != k {
                for j in 0..n {
                    lu.swap((k, j), (imax, j));
                }
                sign = -sign;
                vv[imax] = vv[k];
            }
            pivots[k] = imax;

            // a zero pivot on a structurally singular matrix keeps the elimination defined at
            // the cost of accuracy in later solves
            if lu[(k, k)] == T::zero() {
                lu[(k, k)] = T::from(TINY).unwrap();
                tiny_pivot = true;
                tracing::warn!("zero pivot at elimination step {}, patched with TINY", k);
            }

            // Scale the elements below the diagonal in column k by 1.0 / a[k,k]. After the
            // above swap a[k,k] holds the pivot element. This scaling stores the pivot row
            // multipliers a(i,k)/a(k,k) in a(i,k), i=k+1, ..., n-1.
            let mult = lu[(k, k)].recip();
            for i in (k + 1)..n {
                lu[(i, k)] *= mult;
            }

            // row_i = row_i - [a(i,k)/a(k,k)] row_k, i=k+1, ..., n-1.
            // The computation is done one column at a time, column j=k+1, ..., n-1.
            for j in (k + 1)..n {
                let a_kj = lu[(k, j)];
                if a_kj != T::zero() {
                    for i in (k + 1)..n {
                        let a_ik = lu[(i, k)];
                        lu[(i, j)] -= a_kj * a_ik;
                    }
                }
            }
        }

        Ok(Lu {
            lu,
            pivots,
            sign,
            tiny_pivot,
        })
    }

    /// Solves `A * x = b` for a single right-hand side, using the stored factorization. `A` is
    /// the original matrix handed to [`Lu::new`], not its permuted factored form.
    ///
    /// Returns [`Error::DimensionMismatch`] if the length of `b` differs from the order of the
    /// factored system (possible only with dynamically sized inputs).
    pub fn solve<S>(&self, b: &Matrix<T, D, U1, S>) -> Result<OVector<T, D>, Error>
    where
        S: Storage<T, D>,
    {
        let n = self.lu.nrows();
        if b.nrows() != n {
            return Err(Error::DimensionMismatch {
                expected: n,
                got: b.nrows(),
            });
        }
        let mut x = b.clone_owned();
        self.solve_in_place(&mut x);
        Ok(x)
    }

    /// Solves `A * X = B` for a matrix of right-hand-side columns, one column at a time. The
    /// columns are independent; each goes through the same substitution as [`Lu::solve`].
    pub fn solve_matrix<C, S>(&self, b: &Matrix<T, D, C, S>) -> Result<OMatrix<T, D, C>, Error>
    where
        C: Dim,
        S: Storage<T, D, C>,
        DefaultAllocator: Allocator<T, D, C>,
    {
        let n = self.lu.nrows();
        if b.nrows() != n {
            return Err(Error::DimensionMismatch {
                expected: n,
                got: b.nrows(),
            });
        }
        let mut x = b.clone_owned();
        for j in 0..x.ncols() {
            self.solve_in_place(&mut x.column_mut(j));
        }
        Ok(x)
    }

    /// Returns the determinant of the original matrix, as the interchange parity times the
    /// product of the diagonal of `U`. If the factorization patched a zero pivot the result
    /// is vanishingly small rather than exactly zero.
    pub fn determinant(&self) -> T {
        let mut det = self.sign;
        for i in 0..self.lu.nrows() {
            det *= self.lu[(i, i)];
        }
        det
    }

    /// Returns the inverse of the original matrix, assembled column by column from the solves
    /// `A * x = e_i` against the standard basis vectors.
    pub fn inverse(&self) -> Result<OMatrix<T, D, D>, Error> {
        let (dim, _) = self.lu.shape_generic();
        self.solve_matrix(&OMatrix::identity_generic(dim, dim))
    }

    /// Returns the unit lower triangular factor `L`.
    ///
    /// Together with [`Lu::u`] this satisfies `P * A = L * U` where `P` is the row permutation
    /// encoded by [`Lu::pivots`], not `A = L * U` directly.
    pub fn l(&self) -> OMatrix<T, D, D> {
        let mut l = self.lu.lower_triangle();
        l.fill_diagonal(T::one());
        l
    }

    /// Returns the upper triangular factor `U`.
    pub fn u(&self) -> OMatrix<T, D, D> {
        self.lu.upper_triangle()
    }

    /// The row-interchange history: `pivots[k]` is the row swapped into position `k` at
    /// elimination step `k`.
    pub fn pivots(&self) -> &OVector<usize, D> {
        &self.pivots
    }

    /// The interchange parity, `+1` or `-1`.
    pub fn sign(&self) -> T {
        self.sign
    }

    /// The packed factor buffer, `U` on and above the diagonal and the multipliers of `L`
    /// strictly below it.
    pub fn lu(&self) -> &OMatrix<T, D, D> {
        &self.lu
    }

    /// True if an exactly zero pivot was patched during factorization. Solves against such a
    /// factorization complete without error but with reduced accuracy; callers that need
    /// strict results should check the residual themselves.
    pub fn used_tiny_pivot(&self) -> bool {
        self.tiny_pivot
    }

    /// Substitution core shared by the solve entry points: permutes `x` by the interchange
    /// history, then runs the two triangular sweeps. `x` must already have the right length.
    fn solve_in_place<S>(&self, x: &mut Matrix<T, D, U1, S>)
    where
        S: StorageMut<T, D>,
    {
        let n = self.lu.nrows();

        // Permute x, replaying the row interchanges in forward order
        for (k, &pk) in self.pivots.iter().enumerate() {
            if pk != k {
                x.swap((k, 0), (pk, 0));
            }
        }

        // Solve L y = P b, store solution y in x. The unit diagonal of L is implied. `first`
        // tracks the first nonzero entry of the permuted right-hand side, so the leading run
        // of zeros skips its multiply-accumulate entirely.
        let mut first = n;
        for i in 0..n {
            let mut sum = x[i];
            if first < n {
                for j in first..i {
                    sum -= self.lu[(i, j)] * x[j];
                }
            } else if sum != T::zero() {
                first = i;
            }
            x[i] = sum;
        }

        // Solve U x = y. The diagonal is never exactly zero, by construction.
        for i in (0..n).rev() {
            let mut sum = x[i];
            for j in (i + 1)..n {
                sum -= self.lu[(i, j)] * x[j];
            }
            x[i] = sum / self.lu[(i, i)];
        }
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;
    use nalgebra::{matrix, vector, DMatrix, DVector, Matrix3};

    use super::*;

    #[test]
    fn test_factor_no_swap() {
        let lu = Lu::new(&matrix![
            2.0, 1.0;
            4.0, 1.0;
        ])
        .unwrap();

        assert_eq!(
            *lu.lu(),
            matrix![
                2.0, 1.0;
                2.0, -1.0;
            ]
        );
        assert_eq!(*lu.pivots(), vector![0, 1]);
        assert_eq!(lu.sign(), 1.0);
        assert!(!lu.used_tiny_pivot());
    }

    #[test]
    fn test_factor_row_swap() {
        // swapping rows 0 and 1 reduces this permutation matrix to the identity
        let lu = Lu::new(&matrix![
            0.0, 1.0, 0.0;
            1.0, 0.0, 0.0;
            0.0, 0.0, 1.0;
        ])
        .unwrap();

        assert_eq!(lu.l(), Matrix3::identity());
        assert_eq!(lu.u(), Matrix3::identity());
        assert_eq!(*lu.pivots(), vector![1, 1, 2]);
        assert_eq!(lu.sign(), -1.0);
        assert_eq!(lu.determinant(), -1.0);
    }

    #[test]
    fn test_scaled_pivot_choice() {
        // raw magnitude comparison would pivot on the 8 in row 1; scaled by the row maxima,
        // row 0 wins and no interchange happens
        let lu = Lu::new(&matrix![
            5.0, 1.0;
            8.0, 1000.0;
        ])
        .unwrap();

        assert_eq!(*lu.pivots(), vector![0, 1]);
        assert_eq!(lu.sign(), 1.0);
        assert_relative_eq!(lu.determinant(), 4992.0, max_relative = 1e-12);
    }

    #[test]
    fn test_tiny_pivot_patch() {
        // rank 1, but no zero row: the second pivot is patched rather than failing
        let lu = Lu::new(&matrix![
            1.0, 2.0;
            2.0, 4.0;
        ])
        .unwrap();

        assert!(lu.used_tiny_pivot());
        assert_relative_eq!(lu.determinant(), 0.0, epsilon = 1e-30);
    }

    #[test]
    fn test_zero_row_is_singular() {
        let result = Lu::new(&matrix![
            1.0, 2.0;
            0.0, 0.0;
        ]);
        assert!(matches!(result, Err(Error::Singular { row: 1 })));
    }

    #[test]
    fn test_non_square_rejected() {
        let a = DMatrix::<f64>::zeros(2, 3);
        assert!(matches!(
            Lu::new(&a),
            Err(Error::NonSquare { nrows: 2, ncols: 3 })
        ));

        let empty = DMatrix::<f64>::zeros(0, 0);
        assert!(matches!(Lu::new(&empty), Err(Error::NonSquare { .. })));
    }

    #[test]
    fn test_solve_length_mismatch() {
        let a = DMatrix::from_row_slice(2, 2, &[4.0, 3.0, 6.0, 3.0]);
        let lu = Lu::new(&a).unwrap();

        let b = DVector::from_element(3, 1.0);
        assert!(matches!(
            lu.solve(&b),
            Err(Error::DimensionMismatch {
                expected: 2,
                got: 3
            })
        ));
        assert!(matches!(
            lu.solve_matrix(&DMatrix::<f64>::zeros(3, 2)),
            Err(Error::DimensionMismatch {
                expected: 2,
                got: 3
            })
        ));
    }

    #[test]
    fn test_dense_solve() {
        let a = matrix![
            5.0, 0.0, 0.0, 1.0;
            2.0, 2.0, 2.0, 1.0;
            4.0, 5.0, 5.0, 5.0;
            1.0, 6.0, 4.0, 5.0;
        ];
        let b = vector![9.0, 16.0, 49.0, 45.0];
        let expected = vector![1.0, 2.0, 3.0, 4.0];

        let lu = Lu::new(&a).unwrap();
        let x = lu.solve(&b).unwrap();
        assert_relative_eq!(x, expected, max_relative = 1e-9);

        // solves leave the factorization untouched; a repeat gives the same answer
        let again = lu.solve(&b).unwrap();
        assert_eq!(x, again);
    }
}
