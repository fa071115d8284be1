//! Structural operators: identity, zero, scaling and dense matrices

use ndarray::prelude::*;
use ndarray::NdFloat;

use super::{check_io, LinearOperator, NormCache};
use crate::error::{Error, Result};
use crate::space::{DataContainer, Geometry, ImageGeometry};

/// $`I x = x`$
#[derive(Clone, Debug)]
pub struct Identity {
    geometry: Geometry,
}

impl Identity {
    #[must_use]
    pub fn new(geometry: impl Into<Geometry>) -> Identity {
        Identity {
            geometry: geometry.into(),
        }
    }
}

impl<A: NdFloat> LinearOperator<A> for Identity {
    fn domain_geometry(&self) -> Geometry {
        self.geometry.clone()
    }

    fn range_geometry(&self) -> Geometry {
        self.geometry.clone()
    }

    #[inline]
    fn direct_into(&self, x: &DataContainer<A>, out: &mut DataContainer<A>) -> Result<()> {
        check_io(x, &self.geometry, out, &self.geometry, "identity")?;
        out.fill_from(x)
    }

    #[inline]
    fn adjoint_into(&self, y: &DataContainer<A>, out: &mut DataContainer<A>) -> Result<()> {
        self.direct_into(y, out)
    }

    fn norm(&self) -> Result<A> {
        Ok(A::one())
    }

    fn sum_abs_row(&self) -> Result<DataContainer<A>> {
        Ok(self.geometry.allocate_value(A::one()))
    }

    fn sum_abs_col(&self) -> Result<DataContainer<A>> {
        Ok(self.geometry.allocate_value(A::one()))
    }
}

/// Maps everything in `domain` to the zero element of `range`
#[derive(Clone, Debug)]
pub struct ZeroOperator {
    domain: Geometry,
    range: Geometry,
}

impl ZeroOperator {
    #[must_use]
    pub fn new(domain: impl Into<Geometry>, range: impl Into<Geometry>) -> ZeroOperator {
        ZeroOperator {
            domain: domain.into(),
            range: range.into(),
        }
    }
}

impl<A: NdFloat> LinearOperator<A> for ZeroOperator {
    fn domain_geometry(&self) -> Geometry {
        self.domain.clone()
    }

    fn range_geometry(&self) -> Geometry {
        self.range.clone()
    }

    fn direct_into(&self, x: &DataContainer<A>, out: &mut DataContainer<A>) -> Result<()> {
        check_io(x, &self.domain, out, &self.range, "zero operator")?;
        out.fill(A::zero());
        Ok(())
    }

    fn adjoint_into(&self, y: &DataContainer<A>, out: &mut DataContainer<A>) -> Result<()> {
        check_io(y, &self.range, out, &self.domain, "zero operator adjoint")?;
        out.fill(A::zero());
        Ok(())
    }

    fn norm(&self) -> Result<A> {
        Ok(A::zero())
    }

    fn is_zero(&self) -> bool {
        true
    }

    fn sum_abs_row(&self) -> Result<DataContainer<A>> {
        Ok(self.domain.allocate())
    }

    fn sum_abs_col(&self) -> Result<DataContainer<A>> {
        Ok(self.range.allocate())
    }
}

/// $`cK`$
#[derive(Clone, Debug)]
pub struct ScaledOperator<A, K> {
    scalar: A,
    operator: K,
}

/// Scales an operator, e.g. `scale_operator(-1.0, Identity::new(g))`
/// for the $`-I`$ entry of a block operator.
pub fn scale_operator<A, K>(scalar: A, operator: K) -> ScaledOperator<A, K>
where
    A: NdFloat,
    K: LinearOperator<A>,
{
    ScaledOperator { scalar, operator }
}

impl<A: NdFloat, K> ScaledOperator<A, K> {
    pub fn scalar(&self) -> A {
        self.scalar
    }

    pub fn inner(&self) -> &K {
        &self.operator
    }
}

impl<A, K> LinearOperator<A> for ScaledOperator<A, K>
where
    A: NdFloat,
    K: LinearOperator<A>,
{
    fn domain_geometry(&self) -> Geometry {
        self.operator.domain_geometry()
    }

    fn range_geometry(&self) -> Geometry {
        self.operator.range_geometry()
    }

    fn direct_into(&self, x: &DataContainer<A>, out: &mut DataContainer<A>) -> Result<()> {
        self.operator.direct_into(x, out)?;
        out.scale_inplace(self.scalar);
        Ok(())
    }

    fn adjoint_into(&self, y: &DataContainer<A>, out: &mut DataContainer<A>) -> Result<()> {
        self.operator.adjoint_into(y, out)?;
        out.scale_inplace(self.scalar);
        Ok(())
    }

    fn norm(&self) -> Result<A> {
        Ok(self.scalar.abs() * self.operator.norm()?)
    }

    fn is_zero(&self) -> bool {
        self.scalar == A::zero() || self.operator.is_zero()
    }

    fn sum_abs_row(&self) -> Result<DataContainer<A>> {
        let mut sums = self.operator.sum_abs_row()?;
        sums.scale_inplace(self.scalar.abs());
        Ok(sums)
    }

    fn sum_abs_col(&self) -> Result<DataContainer<A>> {
        let mut sums = self.operator.sum_abs_col()?;
        sums.scale_inplace(self.scalar.abs());
        Ok(sums)
    }
}

/// A dense matrix acting on flattened elements
///
/// This is how a caller hands over an explicit forward model, such as a
/// small projection matrix.
#[derive(Clone, Debug)]
pub struct MatrixOperator<A> {
    matrix: Array2<A>,
    domain: Geometry,
    range: Geometry,
    norm: NormCache<A>,
}

impl<A: NdFloat> MatrixOperator<A> {
    /// Requires `matrix` to be `range.size() x domain.size()`.
    pub fn new(
        matrix: Array2<A>,
        domain: impl Into<Geometry>,
        range: impl Into<Geometry>,
    ) -> Result<MatrixOperator<A>> {
        let (domain, range) = (domain.into(), range.into());
        if matrix.dim() != (range.size(), domain.size()) {
            return Err(Error::shape(
                "matrix operator",
                format!("{} x {} matrix", range.size(), domain.size()),
                format!("{} x {} matrix", matrix.nrows(), matrix.ncols()),
            ));
        }
        Ok(MatrixOperator {
            matrix,
            domain,
            range,
            norm: NormCache::new(),
        })
    }

    /// Vectors in, vectors out
    pub fn from_matrix(matrix: Array2<A>) -> MatrixOperator<A> {
        let domain = ImageGeometry::new([matrix.ncols()]).into();
        let range = ImageGeometry::new([matrix.nrows()]).into();
        MatrixOperator {
            matrix,
            domain,
            range,
            norm: NormCache::new(),
        }
    }

    pub fn matrix(&self) -> ArrayView2<'_, A> {
        self.matrix.view()
    }
}

impl<A: NdFloat> LinearOperator<A> for MatrixOperator<A> {
    fn domain_geometry(&self) -> Geometry {
        self.domain.clone()
    }

    fn range_geometry(&self) -> Geometry {
        self.range.clone()
    }

    fn direct_into(&self, x: &DataContainer<A>, out: &mut DataContainer<A>) -> Result<()> {
        check_io(x, &self.domain, out, &self.range, "matrix operator")?;
        let y = self.matrix.dot(&Array1::from(x.to_vec()));
        out.fill_from_slice(&y.to_vec())
    }

    fn adjoint_into(&self, y: &DataContainer<A>, out: &mut DataContainer<A>) -> Result<()> {
        check_io(y, &self.range, out, &self.domain, "matrix operator adjoint")?;
        let x = self.matrix.t().dot(&Array1::from(y.to_vec()));
        out.fill_from_slice(&x.to_vec())
    }

    fn norm(&self) -> Result<A> {
        self.norm
            .get_or_try_init(|| super::power_method(self, super::POWER_ITERATIONS))
    }

    fn sum_abs_row(&self) -> Result<DataContainer<A>> {
        let sums = self.matrix.mapv(A::abs).sum_axis(Axis(0));
        let mut out = self.domain.allocate();
        out.fill_from_slice(&sums.to_vec())?;
        Ok(out)
    }

    fn sum_abs_col(&self) -> Result<DataContainer<A>> {
        let sums = self.matrix.mapv(A::abs).sum_axis(Axis(1));
        let mut out = self.range.allocate();
        out.fill_from_slice(&sums.to_vec())?;
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::linop::{assert_abs_sums, dot_test};
    use approx::assert_abs_diff_eq;
    use ndarray_rand::rand::rngs::StdRng;
    use ndarray_rand::rand::SeedableRng;

    #[test]
    fn identity() {
        let ig = ImageGeometry::new([2, 2]);
        let id = Identity::new(ig.clone());
        let x = DataContainer::from_array(array![[1., 2.], [3., 4.]]);
        assert_eq!(id.direct(&x).unwrap(), x);
        assert_eq!(id.adjoint(&x).unwrap(), x);

        let wrong = DataContainer::from_array(array![1., 2., 3., 4.]);
        assert!(matches!(id.direct(&wrong), Err(Error::ShapeMismatch { .. })));
    }

    #[test]
    fn zero_maps_between_geometries() {
        let z = ZeroOperator::new(ImageGeometry::new([3]), ImageGeometry::new([2, 2]));
        let x = DataContainer::from_array(array![1., 2., 3.]);
        let y = z.direct(&x).unwrap();
        assert_eq!(y, DataContainer::from_array(Array2::<f64>::zeros((2, 2))));
        assert_eq!(z.adjoint(&y).unwrap().geometry(), x.geometry());
    }

    #[test]
    fn scaled() {
        let a = array![[1., 2.], [3., 4.]];
        let k = scale_operator(-2., MatrixOperator::from_matrix(a.clone()));
        let x = DataContainer::from_array(array![1., 1.]);
        assert_eq!(k.direct(&x).unwrap(), DataContainer::from_array(array![-6., -14.]));
        assert_eq!(k.adjoint(&x).unwrap(), DataContainer::from_array(array![-8., -12.]));

        let mut rng = StdRng::seed_from_u64(3);
        let (lhs, rhs) = dot_test(&k, &mut rng).unwrap();
        assert_abs_diff_eq!(lhs, rhs, epsilon = 1e-12);

        let s = MatrixOperator::from_matrix(a).norm().unwrap();
        assert_abs_diff_eq!(k.norm().unwrap(), 2. * s, epsilon = 1e-12);
    }

    #[test]
    fn matrix_on_images() {
        // 2x2 image to 3-vector
        let m = Array2::from_shape_fn((3, 4), |(i, j)| (i + j) as f64);
        let op =
            MatrixOperator::new(m, ImageGeometry::new([2, 2]), ImageGeometry::new([3])).unwrap();
        let x = DataContainer::from_array(array![[1., 0.], [0., 1.]]);
        assert_eq!(op.direct(&x).unwrap(), DataContainer::from_array(array![3., 5., 7.]));
        let square = Array2::<f64>::zeros((2, 2));
        let (three, two) = (ImageGeometry::new([3]), ImageGeometry::new([2]));
        assert!(MatrixOperator::new(square, three, two).is_err());
    }

    #[test]
    fn absolute_sums() {
        let a = array![[1., -2., 0.], [0., -1., 4.]];
        let op = MatrixOperator::from_matrix(a.clone());
        assert_eq!(op.sum_abs_row().unwrap(), DataContainer::from_array(array![1., 3., 4.]));
        assert_eq!(op.sum_abs_col().unwrap(), DataContainer::from_array(array![3., 5.]));
        assert_abs_sums(&op);
        assert_abs_sums(&op.adj());
        assert_abs_sums(&scale_operator(-0.5, op));

        let ig = ImageGeometry::new([2, 3]);
        assert_abs_sums(&Identity::new(ig.clone()));
        assert_abs_sums(&ZeroOperator::new(ig, ImageGeometry::new([4])));
    }
}
