use ndarray::NdFloat;

use super::{tolerance, Function};
use crate::error::{Error, Result};
use crate::space::DataContainer;

/// Indicator of the box $`\{x : l \le x_i \le u\}`$
///
/// Either bound may be infinite; [`IndicatorBox::non_negative`] is the
/// usual constraint for attenuation images.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct IndicatorBox<A> {
    lower: A,
    upper: A,
}

impl<A: NdFloat> IndicatorBox<A> {
    pub fn new(lower: A, upper: A) -> Result<IndicatorBox<A>> {
        if lower.is_nan() || upper.is_nan() || lower > upper {
            return Err(Error::config(format!(
                "box bounds must satisfy lower <= upper, got [{:?}, {:?}]",
                lower, upper
            )));
        }
        Ok(IndicatorBox { lower, upper })
    }

    /// $`[0, \infty)`$
    pub fn non_negative() -> IndicatorBox<A> {
        IndicatorBox {
            lower: A::zero(),
            upper: A::infinity(),
        }
    }

    pub fn bounds(&self) -> (A, A) {
        (self.lower, self.upper)
    }
}

impl<A: NdFloat> Function<A> for IndicatorBox<A> {
    fn value(&self, x: &DataContainer<A>) -> Result<A> {
        let (lo, hi) = (self.lower, self.upper);
        // NaN entries are outside
        let outside = x.fold(A::zero(), |acc, v| {
            if !(v >= lo && v <= hi) {
                A::one()
            } else {
                acc
            }
        });
        Ok(if outside > A::zero() { A::infinity() } else { A::zero() })
    }

    /// Clamps every entry into the box
    fn proximal_into(
        &self,
        x: &DataContainer<A>,
        _step: A,
        out: &mut DataContainer<A>,
    ) -> Result<()> {
        let (lo, hi) = (self.lower, self.upper);
        out.map_from(x, move |v| v.max(lo).min(hi))
    }

    fn proximal_diag_into(
        &self,
        x: &DataContainer<A>,
        step: &DataContainer<A>,
        out: &mut DataContainer<A>,
    ) -> Result<()> {
        x.check_compatible(step, "box indicator proximal")?;
        self.proximal_into(x, A::one(), out)
    }

    /// Support function of the box, $`\sum_i \max(l y_i, u y_i)`$
    fn convex_conjugate(&self, y: &DataContainer<A>) -> Result<A> {
        let (lo, hi) = (self.lower, self.upper);
        Ok(y.fold(A::zero(), move |acc, v| {
            if v > A::zero() {
                acc + hi * v
            } else if v < A::zero() {
                acc + lo * v
            } else {
                acc
            }
        }))
    }
}

/// $`f(x) = 0`$
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ZeroFunction;

impl ZeroFunction {
    pub fn new() -> ZeroFunction {
        ZeroFunction
    }
}

impl<A: NdFloat> Function<A> for ZeroFunction {
    fn value(&self, _x: &DataContainer<A>) -> Result<A> {
        Ok(A::zero())
    }

    fn proximal_into(
        &self,
        x: &DataContainer<A>,
        _step: A,
        out: &mut DataContainer<A>,
    ) -> Result<()> {
        out.fill_from(x)
    }

    fn proximal_diag_into(
        &self,
        x: &DataContainer<A>,
        step: &DataContainer<A>,
        out: &mut DataContainer<A>,
    ) -> Result<()> {
        x.check_compatible(step, "zero function proximal")?;
        out.fill_from(x)
    }

    /// Indicator of $`\{0\}`$
    fn convex_conjugate(&self, y: &DataContainer<A>) -> Result<A> {
        Ok(if y.norm_max() <= tolerance() {
            A::zero()
        } else {
            A::infinity()
        })
    }

    fn proximal_conjugate_into(
        &self,
        x: &DataContainer<A>,
        _step: A,
        out: &mut DataContainer<A>,
    ) -> Result<()> {
        x.check_compatible(out, "zero function proximal conjugate")?;
        out.fill(A::zero());
        Ok(())
    }

    fn proximal_conjugate_diag_into(
        &self,
        x: &DataContainer<A>,
        step: &DataContainer<A>,
        out: &mut DataContainer<A>,
    ) -> Result<()> {
        x.check_compatible(step, "zero function proximal conjugate")?;
        self.proximal_conjugate_into(x, A::one(), out)
    }

    fn gradient_into(&self, x: &DataContainer<A>, out: &mut DataContainer<A>) -> Result<()> {
        x.check_compatible(out, "zero function gradient")?;
        out.fill(A::zero());
        Ok(())
    }

    fn lipschitz(&self) -> Result<Option<A>> {
        Ok(Some(A::zero()))
    }
}
