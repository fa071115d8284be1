//! Abstract Linear Operators and Adjoints
//!
//! A [`LinearOperator`] maps elements of its domain [`Geometry`] to
//! elements of its range geometry, and knows how to apply its adjoint
//! $`K^*`$, i.e. the operator satisfying
//! ```math
//! \langle Kx, y \rangle = \langle x, K^*y \rangle
//! ```
//! for every $`x`$ in the domain and $`y`$ in the range.
//!
//! The operator norm $`\|K\|_2`$ is estimated by power iteration on
//! $`K^*K`$ and is the intended source of step sizes for the solvers in
//! [`crate::prox`]. The absolute row and column sums of the matrix of
//! $`K`$ give element-wise step sizes instead (diagonal preconditioning).

use std::sync::{Arc, OnceLock};

use ndarray::prelude::*;
use ndarray::NdFloat;
use ndarray_rand::rand::rngs::StdRng;
use ndarray_rand::rand::{Rng, SeedableRng};

use crate::error::{Error, Result};
use crate::space::{DataContainer, Geometry};

mod basic;
pub use basic::*;
mod block;
pub use block::*;
mod diff;
pub use diff::*;

/// Iterations of the power method used by [`LinearOperator::norm`]
pub const POWER_ITERATIONS: usize = 50;

/// Fixed seed of the power method start vector, so norms are reproducible
const POWER_SEED: u64 = 0x5EED_CAFE;

/// A linear map between two (product) image spaces
///
/// Implementors provide the `_into` variants, which write into a
/// caller-owned buffer of the right geometry. The allocating variants
/// are built on top of them, so both give the same numbers.
pub trait LinearOperator<A: NdFloat>: Send + Sync {
    fn domain_geometry(&self) -> Geometry;

    fn range_geometry(&self) -> Geometry;

    /// Apply operator, overwriting `out`
    fn direct_into(&self, x: &DataContainer<A>, out: &mut DataContainer<A>) -> Result<()>;

    /// Apply adjoint, overwriting `out`
    fn adjoint_into(&self, y: &DataContainer<A>, out: &mut DataContainer<A>) -> Result<()>;

    /// Apply operator out-place
    fn direct(&self, x: &DataContainer<A>) -> Result<DataContainer<A>> {
        let mut out = self.range_geometry().allocate();
        self.direct_into(x, &mut out)?;
        Ok(out)
    }

    /// Apply adjoint out-place
    fn adjoint(&self, y: &DataContainer<A>) -> Result<DataContainer<A>> {
        let mut out = self.domain_geometry().allocate();
        self.adjoint_into(y, &mut out)?;
        Ok(out)
    }

    /// Estimate of the spectral norm
    ///
    /// The default runs [`power_method`] every call; the operators of this
    /// crate cache the result after the first computation.
    fn norm(&self) -> Result<A> {
        power_method(self, POWER_ITERATIONS)
    }

    /// True for operators that map everything to zero, which block
    /// operators skip entirely.
    fn is_zero(&self) -> bool {
        false
    }

    /// $`\sum_i |K_{ij}|`$ for every $`j`$, an element of the domain
    fn sum_abs_row(&self) -> Result<DataContainer<A>> {
        Err(Error::Unsupported("absolute row sums"))
    }

    /// $`\sum_j |K_{ij}|`$ for every $`i`$, an element of the range
    fn sum_abs_col(&self) -> Result<DataContainer<A>> {
        Err(Error::Unsupported("absolute column sums"))
    }

    /// The adjoint as an operator in its own right
    fn adj(&self) -> Transposed<&Self>
    where
        Self: Sized,
    {
        Transposed(self)
    }
}

/// Once-computed operator norm
#[derive(Clone, Debug)]
pub(crate) struct NormCache<A>(OnceLock<A>);

impl<A: Copy> NormCache<A> {
    pub(crate) fn new() -> NormCache<A> {
        NormCache(OnceLock::new())
    }

    pub(crate) fn get_or_try_init(&self, f: impl FnOnce() -> Result<A>) -> Result<A> {
        if let Some(&norm) = self.0.get() {
            return Ok(norm);
        }
        let norm = f()?;
        Ok(*self.0.get_or_init(|| norm))
    }
}

/// Checks both ends of an application against the operator's geometries.
pub(crate) fn check_io<A: NdFloat>(
    x: &DataContainer<A>,
    domain: &Geometry,
    out: &DataContainer<A>,
    range: &Geometry,
    context: &'static str,
) -> Result<()> {
    x.check_geometry(domain, context)?;
    out.check_geometry(range, context)
}

/// Power iteration on $`K^*K`$
///
/// Returns $`\sqrt{\|K^*Kx_k\|}`$ after `iterations` steps from a seeded
/// random start with $`\|x_0\| = 1`$. The estimate approaches the largest
/// singular value from below.
pub fn power_method<A, K>(op: &K, iterations: usize) -> Result<A>
where
    A: NdFloat,
    K: LinearOperator<A> + ?Sized,
{
    let domain = op.domain_geometry();
    let mut rng = StdRng::seed_from_u64(POWER_SEED);
    let mut x: DataContainer<A> = domain.allocate_random(&mut rng);
    let mut kx = op.range_geometry().allocate();
    let mut ktkx = domain.allocate();

    let n0 = x.norm();
    if n0 == A::zero() {
        return Ok(A::zero());
    }
    x.scale_inplace(n0.recip());

    let mut sq_norm = A::zero();
    for _iter in 0..iterations {
        op.direct_into(&x, &mut kx)?;
        op.adjoint_into(&kx, &mut ktkx)?;
        sq_norm = ktkx.norm();
        if sq_norm == A::zero() {
            return Ok(A::zero());
        }
        let inv = sq_norm.recip();
        x.map_from(&ktkx, move |v| v * inv)?;
    }
    log::trace!("power method: |K|^2 ~ {:.6e}", sq_norm);
    Ok(sq_norm.sqrt())
}

/// Materializes the operator as an explicit `range.size() x domain.size()`
/// matrix acting on flattened elements (see [`DataContainer::to_vec`]).
///
/// Meant for handing small problems to a reference solver.
pub fn to_matrix<A, K>(op: &K) -> Result<Array2<A>>
where
    A: NdFloat,
    K: LinearOperator<A> + ?Sized,
{
    let domain = op.domain_geometry();
    let range = op.range_geometry();
    let (m, n) = (range.size(), domain.size());

    let mut mat = Array2::zeros((m, n));
    let mut unit = vec![A::zero(); n];
    let mut e = domain.allocate();
    let mut col = range.allocate();
    for j in 0..n {
        unit[j] = A::one();
        e.fill_from_slice(&unit)?;
        unit[j] = A::zero();

        op.direct_into(&e, &mut col)?;
        mat.column_mut(j)
            .iter_mut()
            .zip(col.to_vec())
            .for_each(|(m, v)| *m = v);
    }
    Ok(mat)
}

/// Returns $`(\langle Kx, y \rangle, \langle x, K^*y \rangle)`$ for random
/// $`x`$ and $`y`$; the two agree up to rounding for a correct adjoint.
pub fn dot_test<A, K, R>(op: &K, rng: &mut R) -> Result<(A, A)>
where
    A: NdFloat,
    K: LinearOperator<A> + ?Sized,
    R: Rng + ?Sized,
{
    let x = op.domain_geometry().allocate_random(rng);
    let y = op.range_geometry().allocate_random(rng);
    let lhs = op.direct(&x)?.dot(&y)?;
    let rhs = x.dot(&op.adjoint(&y)?)?;
    Ok((lhs, rhs))
}

/// The adjoint $`K^*`$ of a wrapped operator
#[derive(Clone, Debug)]
pub struct Transposed<K>(pub K);

impl<A, K> LinearOperator<A> for Transposed<K>
where
    A: NdFloat,
    K: LinearOperator<A>,
{
    fn domain_geometry(&self) -> Geometry {
        self.0.range_geometry()
    }

    fn range_geometry(&self) -> Geometry {
        self.0.domain_geometry()
    }

    fn direct_into(&self, x: &DataContainer<A>, out: &mut DataContainer<A>) -> Result<()> {
        self.0.adjoint_into(x, out)
    }

    fn adjoint_into(&self, y: &DataContainer<A>, out: &mut DataContainer<A>) -> Result<()> {
        self.0.direct_into(y, out)
    }

    fn norm(&self) -> Result<A> {
        self.0.norm()
    }

    fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    fn sum_abs_row(&self) -> Result<DataContainer<A>> {
        self.0.sum_abs_col()
    }

    fn sum_abs_col(&self) -> Result<DataContainer<A>> {
        self.0.sum_abs_row()
    }
}

macro_rules! forward_linear_operator {
    ($($ptr:ty),*) => {$(
        impl<A, K> LinearOperator<A> for $ptr
        where
            A: NdFloat,
            K: LinearOperator<A> + ?Sized,
        {
            fn domain_geometry(&self) -> Geometry {
                (**self).domain_geometry()
            }

            fn range_geometry(&self) -> Geometry {
                (**self).range_geometry()
            }

            fn direct_into(&self, x: &DataContainer<A>, out: &mut DataContainer<A>) -> Result<()> {
                (**self).direct_into(x, out)
            }

            fn adjoint_into(&self, y: &DataContainer<A>, out: &mut DataContainer<A>) -> Result<()> {
                (**self).adjoint_into(y, out)
            }

            fn norm(&self) -> Result<A> {
                (**self).norm()
            }

            fn is_zero(&self) -> bool {
                (**self).is_zero()
            }

            fn sum_abs_row(&self) -> Result<DataContainer<A>> {
                (**self).sum_abs_row()
            }

            fn sum_abs_col(&self) -> Result<DataContainer<A>> {
                (**self).sum_abs_col()
            }
        }
    )*};
}

forward_linear_operator!(&K, Box<K>, Arc<K>);

/// Compares the absolute sums of `op` with those of its dense matrix.
#[cfg(test)]
pub(crate) fn assert_abs_sums<K: LinearOperator<f64> + ?Sized>(op: &K) {
    let m = to_matrix(op).unwrap().mapv(f64::abs);
    let rows = op.sum_abs_row().unwrap();
    let cols = op.sum_abs_col().unwrap();
    assert!(rows.geometry().is_compatible(&op.domain_geometry()));
    assert!(cols.geometry().is_compatible(&op.range_geometry()));
    for (sums, dense) in [(rows, m.sum_axis(Axis(0))), (cols, m.sum_axis(Axis(1)))] {
        assert_eq!(sums.size(), dense.len());
        for (a, b) in sums.to_vec().iter().zip(dense.iter()) {
            assert!((a - b).abs() < 1e-12, "{} != {}", a, b);
        }
    }
}
