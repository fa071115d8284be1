use ndarray::prelude::*;
use ndarray::{NdFloat, Zip};

use super::{check_offset, tolerance, Function};
use crate::error::{Error, Result};
use crate::lit;
use crate::space::DataContainer;

fn soft_threshold<A: NdFloat>(v: A, step: A) -> A {
    v.signum() * (v.abs() - step).max(A::zero())
}

/// $`\|x - b\|_1`$
#[derive(Clone, Debug, Default)]
pub struct L1Norm<A> {
    offset: Option<DataContainer<A>>,
}

impl<A: NdFloat> L1Norm<A> {
    pub fn new() -> L1Norm<A> {
        L1Norm { offset: None }
    }

    pub fn with_offset(b: DataContainer<A>) -> L1Norm<A> {
        L1Norm { offset: Some(b) }
    }
}

impl<A: NdFloat> Function<A> for L1Norm<A> {
    fn value(&self, x: &DataContainer<A>) -> Result<A> {
        match &self.offset {
            Some(b) => x.zip_fold(b, A::zero(), |acc, x, b| acc + (x - b).abs()),
            None => Ok(x.norm_l1()),
        }
    }

    /// Soft thresholding around the offset
    fn proximal_into(
        &self,
        x: &DataContainer<A>,
        step: A,
        out: &mut DataContainer<A>,
    ) -> Result<()> {
        check_offset(x, &self.offset, "L1 norm proximal")?;
        match &self.offset {
            Some(b) => out.zip_map_from(x, b, move |x, b| b + soft_threshold(x - b, step)),
            None => out.map_from(x, move |x| soft_threshold(x, step)),
        }
    }

    fn proximal_diag_into(
        &self,
        x: &DataContainer<A>,
        step: &DataContainer<A>,
        out: &mut DataContainer<A>,
    ) -> Result<()> {
        check_offset(x, &self.offset, "L1 norm proximal")?;
        match &self.offset {
            Some(b) => {
                out.fill_from(x)?;
                out.zip2_mut_with(step, b, |o, t, b| *o = b + soft_threshold(*o - b, t))
            }
            None => out.zip_map_from(x, step, soft_threshold),
        }
    }

    /// $`\langle y, b \rangle`$ on the unit $`\ell_\infty`$ ball
    fn convex_conjugate(&self, y: &DataContainer<A>) -> Result<A> {
        check_offset(y, &self.offset, "L1 norm conjugate")?;
        if y.norm_max() > A::one() + tolerance() {
            return Ok(A::infinity());
        }
        match &self.offset {
            Some(b) => y.dot(b),
            None => Ok(A::zero()),
        }
    }

    fn proximal_conjugate_into(
        &self,
        x: &DataContainer<A>,
        step: A,
        out: &mut DataContainer<A>,
    ) -> Result<()> {
        check_offset(x, &self.offset, "L1 norm proximal conjugate")?;
        let (lo, hi) = (-A::one(), A::one());
        match &self.offset {
            Some(b) => out.zip_map_from(x, b, move |x, b| (x - step * b).max(lo).min(hi)),
            None => out.map_from(x, move |x| x.max(lo).min(hi)),
        }
    }

    fn proximal_conjugate_diag_into(
        &self,
        x: &DataContainer<A>,
        step: &DataContainer<A>,
        out: &mut DataContainer<A>,
    ) -> Result<()> {
        check_offset(x, &self.offset, "L1 norm proximal conjugate")?;
        let (lo, hi) = (-A::one(), A::one());
        out.fill_from(x)?;
        match &self.offset {
            Some(b) => out.zip2_mut_with(step, b, move |o, t, b| {
                *o = (*o - t * b).max(lo).min(hi)
            }),
            None => {
                x.check_compatible(step, "L1 norm proximal conjugate")?;
                out.mapv_inplace(move |o| o.max(lo).min(hi));
                Ok(())
            }
        }
    }
}

/// $`\|x - b\|_2^2`$
#[derive(Clone, Debug, Default)]
pub struct L2NormSquared<A> {
    offset: Option<DataContainer<A>>,
}

impl<A: NdFloat> L2NormSquared<A> {
    pub fn new() -> L2NormSquared<A> {
        L2NormSquared { offset: None }
    }

    pub fn with_offset(b: DataContainer<A>) -> L2NormSquared<A> {
        L2NormSquared { offset: Some(b) }
    }
}

impl<A: NdFloat> Function<A> for L2NormSquared<A> {
    fn value(&self, x: &DataContainer<A>) -> Result<A> {
        match &self.offset {
            Some(b) => x.zip_fold(b, A::zero(), |acc, x, b| acc + (x - b) * (x - b)),
            None => Ok(x.squared_norm()),
        }
    }

    /// $`(x + 2\tau b) / (1 + 2\tau)`$
    fn proximal_into(
        &self,
        x: &DataContainer<A>,
        step: A,
        out: &mut DataContainer<A>,
    ) -> Result<()> {
        check_offset(x, &self.offset, "L2 norm squared proximal")?;
        let two_step = lit::<A>(2.) * step;
        let denom = A::one() + two_step;
        match &self.offset {
            Some(b) => out.zip_map_from(x, b, move |x, b| (x + two_step * b) / denom),
            None => out.map_from(x, move |x| x / denom),
        }
    }

    /// $`\|y\|^2 / 4 + \langle y, b \rangle`$
    fn convex_conjugate(&self, y: &DataContainer<A>) -> Result<A> {
        let quarter = lit::<A>(0.25);
        match &self.offset {
            Some(b) => y.zip_fold(b, A::zero(), move |acc, y, b| acc + quarter * y * y + y * b),
            None => Ok(quarter * y.squared_norm()),
        }
    }

    fn proximal_conjugate_into(
        &self,
        x: &DataContainer<A>,
        step: A,
        out: &mut DataContainer<A>,
    ) -> Result<()> {
        check_offset(x, &self.offset, "L2 norm squared proximal conjugate")?;
        let denom = A::one() + step / lit(2.);
        match &self.offset {
            Some(b) => out.zip_map_from(x, b, move |x, b| (x - step * b) / denom),
            None => out.map_from(x, move |x| x / denom),
        }
    }

    fn proximal_diag_into(
        &self,
        x: &DataContainer<A>,
        step: &DataContainer<A>,
        out: &mut DataContainer<A>,
    ) -> Result<()> {
        check_offset(x, &self.offset, "L2 norm squared proximal")?;
        let two = lit::<A>(2.);
        match &self.offset {
            Some(b) => {
                out.fill_from(x)?;
                out.zip2_mut_with(step, b, move |o, t, b| {
                    *o = (*o + two * t * b) / (A::one() + two * t)
                })
            }
            None => out.zip_map_from(x, step, move |x, t| x / (A::one() + two * t)),
        }
    }

    fn proximal_conjugate_diag_into(
        &self,
        x: &DataContainer<A>,
        step: &DataContainer<A>,
        out: &mut DataContainer<A>,
    ) -> Result<()> {
        check_offset(x, &self.offset, "L2 norm squared proximal conjugate")?;
        let half = lit::<A>(0.5);
        match &self.offset {
            Some(b) => {
                out.fill_from(x)?;
                out.zip2_mut_with(step, b, move |o, t, b| {
                    *o = (*o - t * b) / (A::one() + half * t)
                })
            }
            None => out.zip_map_from(x, step, move |x, t| x / (A::one() + half * t)),
        }
    }

    /// $`2(x - b)`$
    fn gradient_into(&self, x: &DataContainer<A>, out: &mut DataContainer<A>) -> Result<()> {
        check_offset(x, &self.offset, "L2 norm squared gradient")?;
        let two = lit::<A>(2.);
        match &self.offset {
            Some(b) => out.zip_map_from(x, b, move |x, b| two * (x - b)),
            None => out.map_from(x, move |x| two * x),
        }
    }

    fn lipschitz(&self) -> Result<Option<A>> {
        Ok(Some(lit(2.)))
    }
}

/// $`\sum_i \big(\sum_k (v_k)_i^2\big)^{1/2}`$ over a block of images
///
/// The isotropic total variation is `MixedL21Norm` composed with the
/// gradient. Every slot must be an image of the same shape.
#[derive(Clone, Copy, Debug, Default)]
pub struct MixedL21Norm;

impl MixedL21Norm {
    pub fn new() -> MixedL21Norm {
        MixedL21Norm
    }
}

/// Euclidean norm across the slots, per position
fn pointwise_norm<A: NdFloat>(v: &DataContainer<A>) -> Result<ArrayD<A>> {
    let slots = v.slots()?;
    let first = match slots.first() {
        Some(s) => s.as_array()?,
        None => return Err(Error::shape("mixed L21 norm", "non-empty block", v.geometry())),
    };
    let mut norm = ArrayD::zeros(first.raw_dim());
    for slot in slots {
        let a = slot.as_array()?;
        if a.shape() != norm.shape() {
            return Err(Error::shape("mixed L21 norm", slots[0].geometry(), slot.geometry()));
        }
        Zip::from(&mut norm).and(a).for_each(|n, &x| *n += x * x);
    }
    norm.mapv_inplace(A::sqrt);
    Ok(norm)
}

/// `out_k = factor * v_k` slot by slot
fn scale_pointwise<A: NdFloat>(
    v: &DataContainer<A>,
    factor: &ArrayD<A>,
    out: &mut DataContainer<A>,
) -> Result<()> {
    v.check_compatible(out, "mixed L21 norm")?;
    for (o, x) in out.slots_mut()?.iter_mut().zip(v.slots()?) {
        Zip::from(o.as_array_mut()?)
            .and(x.as_array()?)
            .and(factor)
            .for_each(|o, &x, &f| *o = f * x);
    }
    Ok(())
}

impl<A: NdFloat> Function<A> for MixedL21Norm {
    fn value(&self, x: &DataContainer<A>) -> Result<A> {
        Ok(pointwise_norm(x)?.sum())
    }

    /// Shrinks each position by `max(0, 1 - step / |v|)`
    fn proximal_into(
        &self,
        x: &DataContainer<A>,
        step: A,
        out: &mut DataContainer<A>,
    ) -> Result<()> {
        let mut factor = pointwise_norm(x)?;
        factor.mapv_inplace(|n| {
            if n > A::zero() {
                (A::one() - step / n).max(A::zero())
            } else {
                A::one()
            }
        });
        scale_pointwise(x, &factor, out)
    }

    /// Indicator of the pointwise unit ball
    fn convex_conjugate(&self, y: &DataContainer<A>) -> Result<A> {
        let bound = A::one() + tolerance();
        let inside = pointwise_norm(y)?.iter().all(|&n| n <= bound);
        Ok(if inside { A::zero() } else { A::infinity() })
    }

    /// Projection of each position onto the unit ball
    fn proximal_conjugate_into(
        &self,
        x: &DataContainer<A>,
        _step: A,
        out: &mut DataContainer<A>,
    ) -> Result<()> {
        let mut factor = pointwise_norm(x)?;
        factor.mapv_inplace(|n| n.max(A::one()).recip());
        scale_pointwise(x, &factor, out)
    }

    /// The projection does not depend on the steps
    fn proximal_conjugate_diag_into(
        &self,
        x: &DataContainer<A>,
        step: &DataContainer<A>,
        out: &mut DataContainer<A>,
    ) -> Result<()> {
        x.check_compatible(step, "mixed L21 norm proximal conjugate")?;
        self.proximal_conjugate_into(x, A::one(), out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::func::testing::{assert_moreau, assert_prox_diag, assert_prox_optimal};
    use crate::space::{Geometry, ImageGeometry};
    use approx::assert_abs_diff_eq;

    fn vector(v: Array1<f64>) -> DataContainer<f64> {
        DataContainer::from_array(v)
    }

    #[test]
    fn l1() {
        let f = L1Norm::new();
        let x = vector(array![-3., 0.5, 2.]);
        assert_eq!(f.value(&x).unwrap(), 5.5);
        assert_eq!(f.proximal(&x, 1.).unwrap(), vector(array![-2., 0., 1.]));
        assert_eq!(f.convex_conjugate(&x).unwrap(), f64::INFINITY);
        assert_eq!(f.convex_conjugate(&x.scale(0.2)).unwrap(), 0.);

        let b = vector(array![1., 1., 1.]);
        let g = L1Norm::with_offset(b.clone());
        assert_eq!(g.value(&b).unwrap(), 0.);
        assert_eq!(g.proximal(&x, 1.).unwrap(), vector(array![-2., 1., 1.]));
    }

    #[test]
    fn l1_prox() {
        let g: Geometry = ImageGeometry::new([4, 3]).into();
        let b = g.allocate_value(0.5);
        for step in [0.1, 1., 3.] {
            assert_prox_optimal(&L1Norm::new(), &g, step);
            assert_prox_optimal(&L1Norm::with_offset(b.clone()), &g, step);
            assert_moreau(&L1Norm::new(), &g, step);
            assert_moreau(&L1Norm::with_offset(b.clone()), &g, step);
        }
    }

    #[test]
    fn l2_squared() {
        let b = vector(array![1., 2.]);
        let f = L2NormSquared::with_offset(b.clone());
        let x = vector(array![3., 0.]);
        assert_eq!(f.value(&x).unwrap(), 8.);
        assert_eq!(f.gradient(&x).unwrap(), vector(array![4., -4.]));
        assert_eq!(f.lipschitz().unwrap(), Some(2.));
        // the minimizer of |z - b|^2 + |z - x|^2 / 2 is (x + 2b) / 3
        let expected = vector(array![5. / 3., 4. / 3.]);
        assert_abs_diff_eq!(f.proximal(&x, 1.).unwrap(), expected, epsilon = 1e-15);

        let g: Geometry = ImageGeometry::new([5]).into();
        let b = g.allocate_value(-1.);
        for step in [0.3, 2.] {
            assert_prox_optimal(&L2NormSquared::new(), &g, step);
            assert_prox_optimal(&L2NormSquared::with_offset(b.clone()), &g, step);
            assert_moreau(&L2NormSquared::with_offset(b.clone()), &g, step);
        }
    }

    #[test]
    fn l2_squared_conjugate_is_fenchel_dual() {
        // f(x) + f*(y) >= <x, y>, with equality at y = grad f(x)
        let b = vector(array![0.5, -1., 2.]);
        let f = L2NormSquared::with_offset(b);
        let x = vector(array![1., 2., 3.]);
        let y = f.gradient(&x).unwrap();
        assert_abs_diff_eq!(
            f.value(&x).unwrap() + f.convex_conjugate(&y).unwrap(),
            x.dot(&y).unwrap(),
            epsilon = 1e-12
        );
    }

    #[test]
    fn mixed_l21() {
        let ig = ImageGeometry::new([2, 2]);
        let v = DataContainer::block([
            DataContainer::from_array(array![[3., 0.], [1., 0.]]),
            DataContainer::from_array(array![[4., 0.], [0., 0.]]),
        ]);
        let f = MixedL21Norm::new();
        assert_eq!(f.value(&v).unwrap(), 6.);

        let p = f.proximal(&v, 1.).unwrap();
        assert_abs_diff_eq!(
            p,
            DataContainer::block([
                DataContainer::from_array(array![[2.4, 0.], [0., 0.]]),
                DataContainer::from_array(array![[3.2, 0.], [0., 0.]]),
            ]),
            epsilon = 1e-14
        );

        let q = f.proximal_conjugate(&v, 1.).unwrap();
        assert_abs_diff_eq!(
            q,
            DataContainer::block([
                DataContainer::from_array(array![[0.6, 0.], [1., 0.]]),
                DataContainer::from_array(array![[0.8, 0.], [0., 0.]]),
            ]),
            epsilon = 1e-15
        );
        assert_eq!(f.convex_conjugate(&q).unwrap(), 0.);
        assert_eq!(f.convex_conjugate(&v).unwrap(), f64::INFINITY);

        let g = Geometry::block([ig.clone().into(), ig.into()]);
        for step in [0.2, 1.5] {
            assert_prox_optimal(&f, &g, step);
            assert_moreau(&f, &g, step);
        }
    }

    #[test]
    fn element_wise_steps() {
        // each entry is thresholded by its own step
        let x = vector(array![-3., 0.5, 2.]);
        let steps = vector(array![1., 1., 0.5]);
        assert_eq!(L1Norm::new().proximal_diag(&x, &steps).unwrap(), vector(array![-2., 0., 1.5]));
        let f = L2NormSquared::with_offset(vector(array![1., 1., 1.]));
        let p = f.proximal_diag(&x, &steps).unwrap();
        assert_abs_diff_eq!(p, vector(array![-1. / 3., 2.5 / 3., 1.5]), epsilon = 1e-15);

        let g: Geometry = ImageGeometry::new([3, 2]).into();
        let b = g.allocate_value(0.5);
        for step in [0.4, 2.] {
            assert_prox_diag(&L1Norm::new(), &g, step);
            assert_prox_diag(&L1Norm::with_offset(b.clone()), &g, step);
            assert_prox_diag(&L2NormSquared::new(), &g, step);
            assert_prox_diag(&L2NormSquared::with_offset(b.clone()), &g, step);
        }

        // the projection of the mixed norm conjugate ignores the steps
        let ig = ImageGeometry::new([2, 2]);
        let v: DataContainer<f64> = Geometry::block([ig.clone().into(), ig.clone().into()])
            .allocate_value(2.);
        let steps = v.scale(0.3);
        assert_eq!(
            MixedL21Norm.proximal_conjugate_diag(&v, &steps).unwrap(),
            MixedL21Norm.proximal_conjugate(&v, 1.).unwrap()
        );
        assert!(matches!(MixedL21Norm.proximal_diag(&v, &steps), Err(Error::Unsupported(_))));
        assert!(MixedL21Norm.proximal_conjugate_diag(&v, &vector(array![1.])).is_err());
    }

    #[test]
    fn mixed_l21_rejects_ragged_blocks() {
        let v = DataContainer::block([
            DataContainer::from_array(array![1., 2.]),
            DataContainer::from_array(array![1., 2., 3.]),
        ]);
        assert!(matches!(MixedL21Norm.value(&v), Err(Error::ShapeMismatch { .. })));
        let image = vector(array![1., 2.]);
        assert!(MixedL21Norm.value(&image).is_err());
    }

    #[test]
    fn offset_shape_mismatch() {
        let f = L2NormSquared::with_offset(vector(array![1., 2.]));
        let x = vector(array![1., 2., 3.]);
        assert!(matches!(f.value(&x), Err(Error::ShapeMismatch { .. })));
        assert!(matches!(f.proximal(&x, 1.), Err(Error::ShapeMismatch { .. })));
    }
}
