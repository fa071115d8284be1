//! Kullback-Leibler divergence, the data term for Poisson noise

use ndarray::NdFloat;

use super::Function;
use crate::error::{Error, Result};
use crate::lit;
use crate::space::DataContainer;

/// $`\mathrm{KL}(x; b) = \sum_i x_i - b_i \log x_i`$
///
/// with the conventions $`+\infty`$ for $`x_i \le 0`$ where $`b_i > 0`$,
/// and $`x_i`$ (or $`+\infty`$ for negative $`x_i`$) where $`b_i = 0`$.
/// The data $`b`$ are counts and must be non-negative.
#[derive(Clone, Debug)]
pub struct KullbackLeibler<A> {
    data: DataContainer<A>,
}

impl<A: NdFloat> KullbackLeibler<A> {
    pub fn new(data: DataContainer<A>) -> Result<KullbackLeibler<A>> {
        let bad = data.fold(A::zero(), |acc, b| {
            if b >= A::zero() {
                acc
            } else {
                acc + A::one()
            }
        });
        if bad > A::zero() {
            return Err(Error::Domain(format!(
                "Kullback-Leibler data must be non-negative, found {:?} bad entries",
                bad
            )));
        }
        Ok(KullbackLeibler { data })
    }

    pub fn data(&self) -> &DataContainer<A> {
        &self.data
    }
}

/// The non-negative root $`(s + \sqrt{s^2 + c})/2`$ of $`p^2 - sp - c/4`$
///
/// For negative $`s`$ the conjugate form $`c / (2(\sqrt{s^2 + c} - s))`$ avoids
/// cancellation.
#[inline]
fn positive_root<A: NdFloat>(s: A, c: A) -> A {
    let two = lit::<A>(2.);
    let r = (s * s + c).sqrt();
    if s < A::zero() {
        c / (two * (r - s))
    } else {
        (s + r) / two
    }
}

impl<A: NdFloat> Function<A> for KullbackLeibler<A> {
    fn value(&self, x: &DataContainer<A>) -> Result<A> {
        x.zip_fold(&self.data, A::zero(), |acc, x, b| {
            if b > A::zero() {
                if x > A::zero() {
                    acc + x - b * x.ln()
                } else {
                    A::infinity()
                }
            } else if x >= A::zero() {
                acc + x
            } else {
                A::infinity()
            }
        })
    }

    fn proximal_into(
        &self,
        x: &DataContainer<A>,
        step: A,
        out: &mut DataContainer<A>,
    ) -> Result<()> {
        let four = lit::<A>(4.);
        out.zip_map_from(x, &self.data, move |x, b| positive_root(x - step, four * step * b))
    }

    fn proximal_diag_into(
        &self,
        x: &DataContainer<A>,
        step: &DataContainer<A>,
        out: &mut DataContainer<A>,
    ) -> Result<()> {
        let four = lit::<A>(4.);
        out.fill_from(x)?;
        out.zip2_mut_with(step, &self.data, move |o, t, b| {
            *o = positive_root(*o - t, four * t * b)
        })
    }

    /// $`\sum_i b_i \log b_i - b_i - b_i \log(1 - y_i)`$ for $`y < 1`$
    fn convex_conjugate(&self, y: &DataContainer<A>) -> Result<A> {
        y.zip_fold(&self.data, A::zero(), |acc, y, b| {
            if b > A::zero() {
                if y < A::one() {
                    acc + b * b.ln() - b - b * (A::one() - y).ln()
                } else {
                    A::infinity()
                }
            } else if y <= A::one() {
                acc
            } else {
                A::infinity()
            }
        })
    }

    fn proximal_conjugate_into(
        &self,
        x: &DataContainer<A>,
        step: A,
        out: &mut DataContainer<A>,
    ) -> Result<()> {
        let (one, four) = (A::one(), lit::<A>(4.));
        out.zip_map_from(x, &self.data, move |x, b| {
            one - positive_root(one - x, four * step * b)
        })
    }

    fn proximal_conjugate_diag_into(
        &self,
        x: &DataContainer<A>,
        step: &DataContainer<A>,
        out: &mut DataContainer<A>,
    ) -> Result<()> {
        let (one, four) = (A::one(), lit::<A>(4.));
        out.fill_from(x)?;
        out.zip2_mut_with(step, &self.data, move |o, t, b| {
            *o = one - positive_root(one - *o, four * t * b)
        })
    }
}
