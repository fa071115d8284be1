//! Finite Difference Operators
//!
//! Forward differences along one axis,
//! ```math
//! (D_k x)_i = \frac{x_{i + e_k} - x_i}{h_k},
//! ```
//! with $`h_k`$ the voxel spacing. The [`Boundary`] decides what happens
//! at the last voxel along the axis. The adjoints are the exact
//! transposes, i.e. negative backward-difference divergences.

use ndarray::prelude::*;
use ndarray::{NdFloat, Slice, Zip};

use super::{check_io, LinearOperator, NormCache};
use crate::error::{Error, Result};
use crate::lit;
use crate::space::{try_for_each_slot, DataContainer, Geometry, ImageGeometry};

/// Boundary condition of a forward difference
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Boundary {
    /// The difference across the last voxel is zero
    #[default]
    Neumann,
    /// The last voxel is differenced against the first
    Periodic,
}

/// `out += scale * D_axis x`
fn diff_add<A: NdFloat>(
    x: ArrayViewD<'_, A>,
    mut out: ArrayViewMutD<'_, A>,
    axis: Axis,
    scale: A,
    boundary: Boundary,
) {
    let n = x.len_of(axis);
    if n < 2 {
        return;
    }
    Zip::from(out.slice_axis_mut(axis, Slice::from(..n - 1)))
        .and(x.slice_axis(axis, Slice::from(1..)))
        .and(x.slice_axis(axis, Slice::from(..n - 1)))
        .for_each(|o, &next, &cur| *o += scale * (next - cur));
    if boundary == Boundary::Periodic {
        Zip::from(out.slice_axis_mut(axis, Slice::from(n - 1..)))
            .and(x.slice_axis(axis, Slice::from(..1)))
            .and(x.slice_axis(axis, Slice::from(n - 1..)))
            .for_each(|o, &first, &last| *o += scale * (first - last));
    }
}

/// `out += scale * D_axis^T y`
fn diff_adjoint_add<A: NdFloat>(
    y: ArrayViewD<'_, A>,
    mut out: ArrayViewMutD<'_, A>,
    axis: Axis,
    scale: A,
    boundary: Boundary,
) {
    let n = y.len_of(axis);
    if n < 2 {
        return;
    }
    // (D^T y)_j = y_{j-1} - y_j, dropping the entries D never produces
    let head = y.slice_axis(axis, Slice::from(..n - 1));
    match boundary {
        Boundary::Neumann => {
            Zip::from(out.slice_axis_mut(axis, Slice::from(..n - 1)))
                .and(&head)
                .for_each(|o, &v| *o -= scale * v);
        }
        Boundary::Periodic => {
            Zip::from(&mut out).and(&y).for_each(|o, &v| *o -= scale * v);
            Zip::from(out.slice_axis_mut(axis, Slice::from(..1)))
                .and(y.slice_axis(axis, Slice::from(n - 1..)))
                .for_each(|o, &v| *o += scale * v);
        }
    }
    Zip::from(out.slice_axis_mut(axis, Slice::from(1..)))
        .and(&head)
        .for_each(|o, &v| *o += scale * v);
}

/// `out += scale * |D_axis|^T 1`, the absolute row sums of `D_axis`
fn abs_row_sums_add<A: NdFloat>(
    mut out: ArrayViewMutD<'_, A>,
    axis: Axis,
    scale: A,
    boundary: Boundary,
) {
    let n = out.len_of(axis);
    if n < 2 {
        return;
    }
    match boundary {
        Boundary::Neumann => {
            // column j is hit by rows j - 1 and j
            out.slice_axis_mut(axis, Slice::from(..n - 1))
                .map_inplace(|o| *o += scale);
            out.slice_axis_mut(axis, Slice::from(1..))
                .map_inplace(|o| *o += scale);
        }
        Boundary::Periodic => out.map_inplace(|o| *o += scale + scale),
    }
}

/// `out += scale * |D_axis| 1`, the absolute column sums of `D_axis`
fn abs_col_sums_add<A: NdFloat>(
    mut out: ArrayViewMutD<'_, A>,
    axis: Axis,
    scale: A,
    boundary: Boundary,
) {
    let n = out.len_of(axis);
    if n < 2 {
        return;
    }
    match boundary {
        Boundary::Neumann => out
            .slice_axis_mut(axis, Slice::from(..n - 1))
            .map_inplace(|o| *o += scale + scale),
        Boundary::Periodic => out.map_inplace(|o| *o += scale + scale),
    }
}

fn inverse_spacing<A: NdFloat>(geometry: &ImageGeometry) -> Vec<A> {
    geometry.spacing().iter().map(|&h| lit(h.recip())).collect()
}

/// Forward difference along a single axis of an image
#[derive(Clone, Debug)]
pub struct FiniteDifference<A> {
    geometry: ImageGeometry,
    axis: usize,
    boundary: Boundary,
    inv_h: A,
    norm: NormCache<A>,
}

impl<A: NdFloat> FiniteDifference<A> {
    pub fn new(
        geometry: ImageGeometry,
        axis: usize,
        boundary: Boundary,
    ) -> Result<FiniteDifference<A>> {
        if axis >= geometry.ndim() {
            return Err(Error::shape(
                "finite difference",
                format!("axis < {}", geometry.ndim()),
                format!("axis {}", axis),
            ));
        }
        let inv_h = inverse_spacing(&geometry)[axis];
        Ok(FiniteDifference {
            geometry,
            axis,
            boundary,
            inv_h,
            norm: NormCache::new(),
        })
    }
}

impl<A: NdFloat> LinearOperator<A> for FiniteDifference<A> {
    fn domain_geometry(&self) -> Geometry {
        self.geometry.clone().into()
    }

    fn range_geometry(&self) -> Geometry {
        self.geometry.clone().into()
    }

    fn direct_into(&self, x: &DataContainer<A>, out: &mut DataContainer<A>) -> Result<()> {
        let g = self.domain_geometry();
        check_io(x, &g, out, &g, "finite difference")?;
        let out = out.as_array_mut()?;
        out.fill(A::zero());
        diff_add(
            x.as_array()?.view(),
            out.view_mut(),
            Axis(self.axis),
            self.inv_h,
            self.boundary,
        );
        Ok(())
    }

    fn adjoint_into(&self, y: &DataContainer<A>, out: &mut DataContainer<A>) -> Result<()> {
        let g = self.domain_geometry();
        check_io(y, &g, out, &g, "finite difference adjoint")?;
        let out = out.as_array_mut()?;
        out.fill(A::zero());
        diff_adjoint_add(
            y.as_array()?.view(),
            out.view_mut(),
            Axis(self.axis),
            self.inv_h,
            self.boundary,
        );
        Ok(())
    }

    fn norm(&self) -> Result<A> {
        self.norm
            .get_or_try_init(|| super::power_method(self, super::POWER_ITERATIONS))
    }

    fn sum_abs_row(&self) -> Result<DataContainer<A>> {
        let mut out = self.domain_geometry().allocate();
        let sums = out.as_array_mut()?;
        abs_row_sums_add(sums.view_mut(), Axis(self.axis), self.inv_h, self.boundary);
        Ok(out)
    }

    fn sum_abs_col(&self) -> Result<DataContainer<A>> {
        let mut out = self.range_geometry().allocate();
        let sums = out.as_array_mut()?;
        abs_col_sums_add(sums.view_mut(), Axis(self.axis), self.inv_h, self.boundary);
        Ok(out)
    }
}

/// Discrete gradient $`\nabla x = (D_0 x, \dots, D_{d-1} x)`$
///
/// Maps an image to a block with one slot per axis. The adjoint is the
/// negative divergence.
#[derive(Clone, Debug)]
pub struct Gradient<A> {
    geometry: ImageGeometry,
    boundary: Boundary,
    inv_h: Vec<A>,
    norm: NormCache<A>,
}

impl<A: NdFloat> Gradient<A> {
    /// Gradient with [`Boundary::Neumann`]
    pub fn new(geometry: ImageGeometry) -> Gradient<A> {
        Gradient::with_boundary(geometry, Boundary::default())
    }

    pub fn with_boundary(geometry: ImageGeometry, boundary: Boundary) -> Gradient<A> {
        let inv_h = inverse_spacing(&geometry);
        Gradient {
            geometry,
            boundary,
            inv_h,
            norm: NormCache::new(),
        }
    }

    pub fn boundary(&self) -> Boundary {
        self.boundary
    }
}

impl<A: NdFloat> LinearOperator<A> for Gradient<A> {
    fn domain_geometry(&self) -> Geometry {
        self.geometry.clone().into()
    }

    fn range_geometry(&self) -> Geometry {
        Geometry::Block(vec![self.geometry.clone().into(); self.geometry.ndim()])
    }

    fn direct_into(&self, x: &DataContainer<A>, out: &mut DataContainer<A>) -> Result<()> {
        check_io(x, &self.domain_geometry(), out, &self.range_geometry(), "gradient")?;
        let x = x.as_array()?;
        try_for_each_slot(out.slots_mut()?, |axis, slot| {
            let slot = slot.as_array_mut()?;
            slot.fill(A::zero());
            let h = self.inv_h[axis];
            diff_add(x.view(), slot.view_mut(), Axis(axis), h, self.boundary);
            Ok(())
        })
    }

    fn adjoint_into(&self, y: &DataContainer<A>, out: &mut DataContainer<A>) -> Result<()> {
        check_io(y, &self.range_geometry(), out, &self.domain_geometry(), "gradient adjoint")?;
        let out = out.as_array_mut()?;
        out.fill(A::zero());
        for (axis, slot) in y.slots()?.iter().enumerate() {
            diff_adjoint_add(
                slot.as_array()?.view(),
                out.view_mut(),
                Axis(axis),
                self.inv_h[axis],
                self.boundary,
            );
        }
        Ok(())
    }

    fn norm(&self) -> Result<A> {
        self.norm
            .get_or_try_init(|| super::power_method(self, super::POWER_ITERATIONS))
    }

    fn sum_abs_row(&self) -> Result<DataContainer<A>> {
        let mut out = self.domain_geometry().allocate();
        let sums = out.as_array_mut()?;
        for (axis, &inv_h) in self.inv_h.iter().enumerate() {
            abs_row_sums_add(sums.view_mut(), Axis(axis), inv_h, self.boundary);
        }
        Ok(out)
    }

    fn sum_abs_col(&self) -> Result<DataContainer<A>> {
        let mut out = self.range_geometry().allocate();
        for (axis, slot) in out.slots_mut()?.iter_mut().enumerate() {
            let sums = slot.as_array_mut()?;
            abs_col_sums_add(sums.view_mut(), Axis(axis), self.inv_h[axis], self.boundary);
        }
        Ok(out)
    }
}

/// Symmetrized gradient of a vector field
///
/// Maps a block of `d` images $`w = (w_0, \dots, w_{d-1})`$ to a block
/// of `d * d` images holding, in row-major order,
/// ```math
/// (\mathcal{E} w)_{ij} = \tfrac12 (D_j w_i + D_i w_j).
/// ```
/// This is the second-order term of total generalised variation.
#[derive(Clone, Debug)]
pub struct SymmetrizedGradient<A> {
    geometry: ImageGeometry,
    boundary: Boundary,
    inv_h: Vec<A>,
    norm: NormCache<A>,
}

impl<A: NdFloat> SymmetrizedGradient<A> {
    /// `geometry` is that of one component of the vector field.
    pub fn new(geometry: ImageGeometry) -> SymmetrizedGradient<A> {
        SymmetrizedGradient::with_boundary(geometry, Boundary::default())
    }

    pub fn with_boundary(geometry: ImageGeometry, boundary: Boundary) -> SymmetrizedGradient<A> {
        let inv_h = inverse_spacing(&geometry);
        SymmetrizedGradient {
            geometry,
            boundary,
            inv_h,
            norm: NormCache::new(),
        }
    }
}

impl<A: NdFloat> LinearOperator<A> for SymmetrizedGradient<A> {
    fn domain_geometry(&self) -> Geometry {
        Geometry::Block(vec![self.geometry.clone().into(); self.geometry.ndim()])
    }

    fn range_geometry(&self) -> Geometry {
        let d = self.geometry.ndim();
        Geometry::Block(vec![self.geometry.clone().into(); d * d])
    }

    fn direct_into(&self, x: &DataContainer<A>, out: &mut DataContainer<A>) -> Result<()> {
        check_io(
            x,
            &self.domain_geometry(),
            out,
            &self.range_geometry(),
            "symmetrized gradient",
        )?;
        let d = self.geometry.ndim();
        let w = x.slots()?;
        let half = lit::<A>(0.5);
        try_for_each_slot(out.slots_mut()?, |k, slot| {
            let (i, j) = (k / d, k % d);
            let slot = slot.as_array_mut()?;
            slot.fill(A::zero());
            let (wi, wj) = (w[i].as_array()?.view(), w[j].as_array()?.view());
            if i == j {
                diff_add(wi, slot.view_mut(), Axis(j), self.inv_h[j], self.boundary);
            } else {
                diff_add(wi, slot.view_mut(), Axis(j), half * self.inv_h[j], self.boundary);
                diff_add(wj, slot.view_mut(), Axis(i), half * self.inv_h[i], self.boundary);
            }
            Ok(())
        })
    }

    fn adjoint_into(&self, y: &DataContainer<A>, out: &mut DataContainer<A>) -> Result<()> {
        check_io(
            y,
            &self.range_geometry(),
            out,
            &self.domain_geometry(),
            "symmetrized gradient adjoint",
        )?;
        let d = self.geometry.ndim();
        let p = y.slots()?;
        let half = lit::<A>(0.5);
        // (E^T p)_i = sum_j D_j^T (p_ij + p_ji) / 2
        try_for_each_slot(out.slots_mut()?, |i, slot| {
            let slot = slot.as_array_mut()?;
            slot.fill(A::zero());
            for j in 0..d {
                let scale = half * self.inv_h[j];
                let (pij, pji) = (p[i * d + j].as_array()?.view(), p[j * d + i].as_array()?.view());
                diff_adjoint_add(pij, slot.view_mut(), Axis(j), scale, self.boundary);
                diff_adjoint_add(pji, slot.view_mut(), Axis(j), scale, self.boundary);
            }
            Ok(())
        })
    }

    fn norm(&self) -> Result<A> {
        self.norm
            .get_or_try_init(|| super::power_method(self, super::POWER_ITERATIONS))
    }

    /// Every component $`w_i`$ meets each $`D_j`$ with total weight one.
    fn sum_abs_row(&self) -> Result<DataContainer<A>> {
        let mut component = Geometry::from(self.geometry.clone()).allocate();
        let sums = component.as_array_mut()?;
        for (axis, &inv_h) in self.inv_h.iter().enumerate() {
            abs_row_sums_add(sums.view_mut(), Axis(axis), inv_h, self.boundary);
        }
        Ok(DataContainer::Block(vec![component; self.geometry.ndim()]))
    }

    fn sum_abs_col(&self) -> Result<DataContainer<A>> {
        let d = self.geometry.ndim();
        let half = lit::<A>(0.5);
        let mut out = self.range_geometry().allocate();
        for (k, slot) in out.slots_mut()?.iter_mut().enumerate() {
            let (i, j) = (k / d, k % d);
            let sums = slot.as_array_mut()?;
            if i == j {
                abs_col_sums_add(sums.view_mut(), Axis(j), self.inv_h[j], self.boundary);
            } else {
                abs_col_sums_add(sums.view_mut(), Axis(j), half * self.inv_h[j], self.boundary);
                abs_col_sums_add(sums.view_mut(), Axis(i), half * self.inv_h[i], self.boundary);
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::linop::{assert_abs_sums, dot_test, to_matrix};
    use approx::assert_abs_diff_eq;
    use ndarray_rand::rand::rngs::StdRng;
    use ndarray_rand::rand::SeedableRng;

    #[test]
    fn gradient_of_ramp() {
        let x = DataContainer::from_array(array![[0., 1., 2.], [3., 4., 5.]]);
        let grad = Gradient::new(ImageGeometry::new([2, 3]));
        let g = grad.direct(&x).unwrap();
        assert_eq!(
            g.slot(0).unwrap().as_array().unwrap(),
            &array![[3., 3., 3.], [0., 0., 0.]].into_dyn()
        );
        assert_eq!(
            g.slot(1).unwrap().as_array().unwrap(),
            &array![[1., 1., 0.], [1., 1., 0.]].into_dyn()
        );

        let periodic = Gradient::with_boundary(ImageGeometry::new([2, 3]), Boundary::Periodic);
        let g = periodic.direct(&x).unwrap();
        assert_eq!(
            g.slot(1).unwrap().as_array().unwrap(),
            &array![[1., 1., -2.], [1., 1., -2.]].into_dyn()
        );
    }

    #[test]
    fn spacing_scales_differences() {
        let ig = ImageGeometry::new([3]).with_spacing([0.5]).unwrap();
        let grad = Gradient::new(ig);
        let x = DataContainer::from_array(array![0., 1., 3.]);
        let g = grad.direct(&x).unwrap();
        assert_eq!(g.slot(0).unwrap().as_array().unwrap(), &array![2., 4., 0.].into_dyn());
    }

    #[test]
    fn gradient_adjoint() {
        let mut rng = StdRng::seed_from_u64(7);
        for boundary in [Boundary::Neumann, Boundary::Periodic] {
            for shape in [vec![7], vec![5, 6], vec![3, 4, 5]] {
                let ig = ImageGeometry::new(shape.clone())
                    .with_spacing(vec![0.7; shape.len()])
                    .unwrap();
                let grad = Gradient::<f64>::with_boundary(ig, boundary);
                for _ in 0..5 {
                    let (lhs, rhs) = dot_test(&grad, &mut rng).unwrap();
                    assert_abs_diff_eq!(lhs, rhs, epsilon = 1e-10);
                }
            }
        }
    }

    #[test]
    fn finite_difference_matches_gradient_slot() {
        let ig = ImageGeometry::new([4, 3]);
        let grad = Gradient::<f64>::new(ig.clone());
        let d1 = FiniteDifference::<f64>::new(ig.clone(), 1, Boundary::Neumann).unwrap();
        let mut rng = StdRng::seed_from_u64(1);
        let x = Geometry::from(ig.clone()).allocate_random(&mut rng);
        assert_eq!(&d1.direct(&x).unwrap(), grad.direct(&x).unwrap().slot(1).unwrap());

        let d = to_matrix(&d1).unwrap();
        let dt = to_matrix(&d1.adj()).unwrap();
        assert_abs_diff_eq!(d.t().to_owned(), dt, epsilon = 1e-15);

        assert!(FiniteDifference::<f64>::new(ig, 2, Boundary::Neumann).is_err());
    }

    #[test]
    fn symmetrized_gradient_adjoint() {
        let mut rng = StdRng::seed_from_u64(11);
        for boundary in [Boundary::Neumann, Boundary::Periodic] {
            for shape in [vec![6, 5], vec![3, 4, 3]] {
                let ig = ImageGeometry::new(shape);
                let sym = SymmetrizedGradient::<f64>::with_boundary(ig, boundary);
                for _ in 0..5 {
                    let (lhs, rhs) = dot_test(&sym, &mut rng).unwrap();
                    assert_abs_diff_eq!(lhs, rhs, epsilon = 1e-10);
                }
            }
        }
    }

    #[test]
    fn symmetrized_gradient_is_symmetric() {
        let ig = ImageGeometry::new([4, 5]);
        let sym = SymmetrizedGradient::<f64>::new(ig.clone());
        let mut rng = StdRng::seed_from_u64(5);
        let w = sym.domain_geometry().allocate_random(&mut rng);
        let e = sym.direct(&w).unwrap();
        assert_eq!(e.slot(1).unwrap(), e.slot(2).unwrap());

        // gradient of a gradient field: E(grad u) is the Hessian of u
        let u = Array2::from_shape_fn((4, 5), |(i, j)| (i * j) as f64);
        let u = DataContainer::from_array(u);
        let grad = Gradient::new(ig);
        let e = sym.direct(&grad.direct(&u).unwrap()).unwrap();
        assert_eq!(e.slot(0).unwrap().as_array().unwrap()[[0, 0]], 0.);
        assert_eq!(e.slot(1).unwrap().as_array().unwrap()[[1, 1]], 1.);
    }

    #[test]
    fn absolute_sums() {
        let ig = ImageGeometry::new([4, 3]).with_spacing([0.5, 2.]).unwrap();
        let grad = Gradient::<f64>::new(ig.clone());
        // interior voxels meet two differences per axis
        let rows = grad.sum_abs_row().unwrap();
        assert_eq!(rows.as_array().unwrap()[[1, 1]], 2. * 2. + 2. * 0.5);
        assert_eq!(rows.as_array().unwrap()[[0, 0]], 2. + 0.5);
        let cols = grad.sum_abs_col().unwrap();
        assert_eq!(cols.slot(0).unwrap().as_array().unwrap()[[3, 0]], 0.);

        for boundary in [Boundary::Neumann, Boundary::Periodic] {
            assert_abs_sums(&Gradient::<f64>::with_boundary(ig.clone(), boundary));
            assert_abs_sums(&FiniteDifference::<f64>::new(ig.clone(), 1, boundary).unwrap());
            assert_abs_sums(&SymmetrizedGradient::<f64>::with_boundary(ig.clone(), boundary));
            let thin = ImageGeometry::new([2, 1, 3]);
            assert_abs_sums(&Gradient::<f64>::with_boundary(thin, boundary));
        }
    }

    #[test]
    fn gradient_norm_bound() {
        // |grad|^2 <= 4 * ndim for unit spacing
        let grad = Gradient::<f64>::new(ImageGeometry::new([16, 16]));
        let n = grad.norm().unwrap();
        assert!(n > 2.5 && n <= 8f64.sqrt() + 1e-9, "norm {}", n);
        // cached
        assert_eq!(grad.norm().unwrap(), n);
    }
}

#[cfg(all(rustc_nightly, test))]
mod benches {
    use super::*;
    use test::Bencher;

    #[bench]
    fn gradient_256(b: &mut Bencher) {
        let ig = ImageGeometry::new([256, 256]);
        let grad = Gradient::<f64>::new(ig.clone());
        let x = Geometry::from(ig).allocate_value(1.0);
        let mut out = grad.range_geometry().allocate();
        b.iter(|| grad.direct_into(&x, &mut out).unwrap());
    }

    #[bench]
    fn gradient_adjoint_256(b: &mut Bencher) {
        let ig = ImageGeometry::new([256, 256]);
        let grad = Gradient::<f64>::new(ig.clone());
        let y = grad.range_geometry().allocate_value(1.0);
        let mut out = Geometry::from(ig).allocate();
        b.iter(|| grad.adjoint_into(&y, &mut out).unwrap());
    }
}
