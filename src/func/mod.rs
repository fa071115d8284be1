//! Convex Functions and their Proximal Maps
//!
//! A [`Function`] is a proper, convex, lower semi-continuous map into
//! the extended reals. Values outside the domain are reported as
//! $`+\infty`$ rather than as errors, so an objective history can carry
//! them. Besides its value a function knows its proximal map
//! ```math
//! \mathrm{prox}_{\tau f}(x) = \arg\min_z f(z) + \frac{1}{2\tau}\|z - x\|^2,
//! ```
//! its convex conjugate $`f^*`$ and the proximal map of the conjugate.
//! Separable functions also take a step per entry, as used by diagonally
//! preconditioned PDHG. Smooth functions also provide a gradient and its
//! Lipschitz constant.
//!
//! Functions combine through [`scale`], [`compose`] and [`BlockFunction`].

use std::sync::Arc;

use ndarray::NdFloat;

use crate::error::{Error, Result};
use crate::space::DataContainer;

mod composite;
pub use composite::*;
mod indicator;
pub use indicator::*;
mod kl;
pub use kl::*;
mod norms;
pub use norms::*;

/// Slack used when testing membership of a conjugate's domain
pub(crate) fn tolerance<A: NdFloat>() -> A {
    A::epsilon().sqrt()
}

pub(crate) fn check_offset<A: NdFloat>(
    x: &DataContainer<A>,
    offset: &Option<DataContainer<A>>,
    context: &'static str,
) -> Result<()> {
    match offset {
        Some(b) => b.check_compatible(x, context),
        None => Ok(()),
    }
}

/// A proper convex function of a (block) image
pub trait Function<A: NdFloat>: Send + Sync {
    fn value(&self, x: &DataContainer<A>) -> Result<A>;

    /// $`\mathrm{prox}_{\tau f}(x)`$, overwriting `out`
    fn proximal_into(
        &self,
        x: &DataContainer<A>,
        step: A,
        out: &mut DataContainer<A>,
    ) -> Result<()>;

    fn proximal(&self, x: &DataContainer<A>, step: A) -> Result<DataContainer<A>> {
        let mut out = x.geometry().allocate();
        self.proximal_into(x, step, &mut out)?;
        Ok(out)
    }

    /// $`f^*(y) = \sup_x \langle x, y \rangle - f(x)`$
    fn convex_conjugate(&self, _y: &DataContainer<A>) -> Result<A> {
        Err(Error::Unsupported("convex conjugate"))
    }

    /// $`\mathrm{prox}_{\tau f^*}(x)`$, overwriting `out`
    ///
    /// The default goes through Moreau's identity
    /// ```math
    /// \mathrm{prox}_{\tau f^*}(x) = x - \tau \,\mathrm{prox}_{f/\tau}(x/\tau).
    /// ```
    fn proximal_conjugate_into(
        &self,
        x: &DataContainer<A>,
        step: A,
        out: &mut DataContainer<A>,
    ) -> Result<()> {
        let scaled = x.div_scalar(step);
        self.proximal_into(&scaled, step.recip(), out)?;
        out.zip_mut_with(x, move |o, x| *o = x - step * *o)
    }

    fn proximal_conjugate(&self, x: &DataContainer<A>, step: A) -> Result<DataContainer<A>> {
        let mut out = x.geometry().allocate();
        self.proximal_conjugate_into(x, step, &mut out)?;
        Ok(out)
    }

    /// Proximal map with a step per entry,
    /// $`\arg\min_z f(z) + \sum_i (z_i - x_i)^2 / (2\tau_i)`$
    fn proximal_diag_into(
        &self,
        _x: &DataContainer<A>,
        _step: &DataContainer<A>,
        _out: &mut DataContainer<A>,
    ) -> Result<()> {
        Err(Error::Unsupported("proximal map with element-wise steps"))
    }

    fn proximal_diag(
        &self,
        x: &DataContainer<A>,
        step: &DataContainer<A>,
    ) -> Result<DataContainer<A>> {
        let mut out = x.geometry().allocate();
        self.proximal_diag_into(x, step, &mut out)?;
        Ok(out)
    }

    /// Proximal map of $`f^*`$ with a step per entry
    ///
    /// The default applies Moreau's identity entry by entry, which holds
    /// for separable $`f`$:
    /// ```math
    /// \mathrm{prox}_{\tau f^*}(x)_i = x_i - \tau_i \,\mathrm{prox}_{f/\tau}(x/\tau)_i.
    /// ```
    fn proximal_conjugate_diag_into(
        &self,
        x: &DataContainer<A>,
        step: &DataContainer<A>,
        out: &mut DataContainer<A>,
    ) -> Result<()> {
        let scaled = x.div(step)?;
        let inverse = step.mapv(A::recip);
        self.proximal_diag_into(&scaled, &inverse, out)?;
        out.zip2_mut_with(x, step, |o, x, t| *o = x - t * *o)
    }

    fn proximal_conjugate_diag(
        &self,
        x: &DataContainer<A>,
        step: &DataContainer<A>,
    ) -> Result<DataContainer<A>> {
        let mut out = x.geometry().allocate();
        self.proximal_conjugate_diag_into(x, step, &mut out)?;
        Ok(out)
    }

    /// Gradient, for smooth functions only
    fn gradient_into(&self, _x: &DataContainer<A>, _out: &mut DataContainer<A>) -> Result<()> {
        Err(Error::Unsupported("gradient"))
    }

    fn gradient(&self, x: &DataContainer<A>) -> Result<DataContainer<A>> {
        let mut out = x.geometry().allocate();
        self.gradient_into(x, &mut out)?;
        Ok(out)
    }

    /// Lipschitz constant of the gradient, if there is one
    ///
    /// Errors come from estimating it, e.g. an operator norm.
    fn lipschitz(&self) -> Result<Option<A>> {
        Ok(None)
    }
}

macro_rules! forward_function {
    ($($ptr:ty),*) => {$(
        impl<A, F> Function<A> for $ptr
        where
            A: NdFloat,
            F: Function<A> + ?Sized,
        {
            fn value(&self, x: &DataContainer<A>) -> Result<A> {
                (**self).value(x)
            }

            fn proximal_into(
                &self,
                x: &DataContainer<A>,
                step: A,
                out: &mut DataContainer<A>,
            ) -> Result<()> {
                (**self).proximal_into(x, step, out)
            }

            fn convex_conjugate(&self, y: &DataContainer<A>) -> Result<A> {
                (**self).convex_conjugate(y)
            }

            fn proximal_conjugate_into(
                &self,
                x: &DataContainer<A>,
                step: A,
                out: &mut DataContainer<A>,
            ) -> Result<()> {
                (**self).proximal_conjugate_into(x, step, out)
            }

            fn proximal_diag_into(
                &self,
                x: &DataContainer<A>,
                step: &DataContainer<A>,
                out: &mut DataContainer<A>,
            ) -> Result<()> {
                (**self).proximal_diag_into(x, step, out)
            }

            fn proximal_conjugate_diag_into(
                &self,
                x: &DataContainer<A>,
                step: &DataContainer<A>,
                out: &mut DataContainer<A>,
            ) -> Result<()> {
                (**self).proximal_conjugate_diag_into(x, step, out)
            }

            fn gradient_into(
                &self,
                x: &DataContainer<A>,
                out: &mut DataContainer<A>,
            ) -> Result<()> {
                (**self).gradient_into(x, out)
            }

            fn lipschitz(&self) -> Result<Option<A>> {
                (**self).lipschitz()
            }
        }
    )*};
}

forward_function!(&F, Box<F>, Arc<F>);

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::space::Geometry;
    use ndarray_rand::rand::rngs::StdRng;
    use ndarray_rand::rand::SeedableRng;

    /// `p = prox_{step f}(x)` minimizes `f(z) + |z - x|^2 / (2 step)`, so
    /// no random perturbation of `p` may do better.
    pub(crate) fn assert_prox_optimal<F: Function<f64>>(f: &F, geometry: &Geometry, step: f64) {
        let mut rng = StdRng::seed_from_u64(17);
        let objective = |z: &DataContainer<f64>, x: &DataContainer<f64>| {
            f.value(z).unwrap() + z.sub(x).unwrap().squared_norm() / (2. * step)
        };
        for _ in 0..10 {
            let x: DataContainer<f64> = geometry.allocate_random(&mut rng).scale(3.);
            let p = f.proximal(&x, step).unwrap();
            let best = objective(&p, &x);
            assert!(best.is_finite());
            for scale in [1e-1, 1e-2, 1e-3] {
                let d: DataContainer<f64> = geometry.allocate_random(&mut rng).scale(scale);
                let z = p.add(&d).unwrap();
                assert!(
                    objective(&z, &x) >= best - 1e-12,
                    "perturbation of size {} improves the proximal objective",
                    scale
                );
            }
        }
    }

    /// With a constant step the element-wise maps agree with the scalar
    /// ones. With varying steps no perturbation of `p = prox_diag(x)` does
    /// better on `f(z) + sum_i (z_i - x_i)^2 / (2 step_i)`.
    pub(crate) fn assert_prox_diag<F: Function<f64>>(f: &F, geometry: &Geometry, step: f64) {
        let mut rng = StdRng::seed_from_u64(29);
        let constant = geometry.allocate_value(step);
        for _ in 0..5 {
            let x: DataContainer<f64> = geometry.allocate_random(&mut rng).scale(3.);
            approx::assert_abs_diff_eq!(
                f.proximal_diag(&x, &constant).unwrap(),
                f.proximal(&x, step).unwrap(),
                epsilon = 1e-12
            );
            approx::assert_abs_diff_eq!(
                f.proximal_conjugate_diag(&x, &constant).unwrap(),
                f.proximal_conjugate(&x, step).unwrap(),
                epsilon = 1e-12
            );
        }

        let mut steps: DataContainer<f64> = geometry.allocate_random(&mut rng);
        steps.mapv_inplace(|t| step * (t.abs() + 0.1));
        let objective = |z: &DataContainer<f64>, x: &DataContainer<f64>| {
            let mut d = z.sub(x).unwrap();
            d.zip_mut_with(&steps, |d, t| *d = *d * *d / (2. * t)).unwrap();
            f.value(z).unwrap() + d.sum()
        };
        for _ in 0..5 {
            let x: DataContainer<f64> = geometry.allocate_random(&mut rng).scale(3.);
            let p = f.proximal_diag(&x, &steps).unwrap();
            let best = objective(&p, &x);
            assert!(best.is_finite());
            for scale in [1e-1, 1e-2, 1e-3] {
                let d: DataContainer<f64> = geometry.allocate_random(&mut rng).scale(scale);
                assert!(
                    objective(&p.add(&d).unwrap(), &x) >= best - 1e-12,
                    "perturbation of size {} improves the weighted proximal objective",
                    scale
                );
            }
        }
    }

    /// `x = prox_{step f}(x) + step prox_{f*/step}(x / step)`
    pub(crate) fn assert_moreau<F: Function<f64>>(f: &F, geometry: &Geometry, step: f64) {
        let mut rng = StdRng::seed_from_u64(23);
        for _ in 0..5 {
            let x: DataContainer<f64> = geometry.allocate_random(&mut rng).scale(2.);
            let p = f.proximal(&x, step).unwrap();
            let q = f.proximal_conjugate(&x.div_scalar(step), step.recip()).unwrap();
            let mut sum = p.clone();
            sum.axpby(1., &p, step, &q).unwrap();
            approx::assert_abs_diff_eq!(sum, x, epsilon = 1e-10);
        }
    }
}
