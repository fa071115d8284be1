use ndarray::NdFloat;

use super::Function;
use crate::error::{Error, Result};
use crate::linop::LinearOperator;
use crate::space::{try_for_each_slot, DataContainer};

/// $`c f`$ for $`c > 0`$
#[derive(Clone, Debug)]
pub struct ScaledFunction<A, F> {
    scalar: A,
    function: F,
}

/// Scales a function by a positive constant, e.g. the regularization
/// weight in front of a total-variation term.
pub fn scale<A, F>(scalar: A, function: F) -> Result<ScaledFunction<A, F>>
where
    A: NdFloat,
    F: Function<A>,
{
    if !(scalar > A::zero()) || !scalar.is_finite() {
        return Err(Error::config(format!(
            "functions can only be scaled by a positive finite constant, got {:?}",
            scalar
        )));
    }
    Ok(ScaledFunction { scalar, function })
}

impl<A: NdFloat, F> ScaledFunction<A, F> {
    pub fn scalar(&self) -> A {
        self.scalar
    }

    pub fn inner(&self) -> &F {
        &self.function
    }
}

impl<A, F> Function<A> for ScaledFunction<A, F>
where
    A: NdFloat,
    F: Function<A>,
{
    fn value(&self, x: &DataContainer<A>) -> Result<A> {
        Ok(self.scalar * self.function.value(x)?)
    }

    fn proximal_into(
        &self,
        x: &DataContainer<A>,
        step: A,
        out: &mut DataContainer<A>,
    ) -> Result<()> {
        self.function.proximal_into(x, self.scalar * step, out)
    }

    /// $`(cf)^*(y) = c f^*(y / c)`$
    fn convex_conjugate(&self, y: &DataContainer<A>) -> Result<A> {
        Ok(self.scalar * self.function.convex_conjugate(&y.div_scalar(self.scalar))?)
    }

    fn proximal_conjugate_into(
        &self,
        x: &DataContainer<A>,
        step: A,
        out: &mut DataContainer<A>,
    ) -> Result<()> {
        let c = self.scalar;
        self.function
            .proximal_conjugate_into(&x.div_scalar(c), step / c, out)?;
        out.scale_inplace(c);
        Ok(())
    }

    fn proximal_diag_into(
        &self,
        x: &DataContainer<A>,
        step: &DataContainer<A>,
        out: &mut DataContainer<A>,
    ) -> Result<()> {
        self.function.proximal_diag_into(x, &step.scale(self.scalar), out)
    }

    fn proximal_conjugate_diag_into(
        &self,
        x: &DataContainer<A>,
        step: &DataContainer<A>,
        out: &mut DataContainer<A>,
    ) -> Result<()> {
        let c = self.scalar;
        self.function
            .proximal_conjugate_diag_into(&x.div_scalar(c), &step.div_scalar(c), out)?;
        out.scale_inplace(c);
        Ok(())
    }

    fn gradient_into(&self, x: &DataContainer<A>, out: &mut DataContainer<A>) -> Result<()> {
        self.function.gradient_into(x, out)?;
        out.scale_inplace(self.scalar);
        Ok(())
    }

    fn lipschitz(&self) -> Result<Option<A>> {
        Ok(self.function.lipschitz()?.map(|l| self.scalar * l))
    }
}

/// $`x \mapsto f(Kx)`$
///
/// Smooth when $`f`$ is, with gradient $`K^*\nabla f(Kx)`$ and Lipschitz
/// constant $`L_f \|K\|^2`$. There is no closed-form proximal map.
#[derive(Clone, Debug)]
pub struct FunctionOperatorComposition<F, K> {
    function: F,
    operator: K,
}

pub fn compose<A, F, K>(function: F, operator: K) -> FunctionOperatorComposition<F, K>
where
    A: NdFloat,
    F: Function<A>,
    K: LinearOperator<A>,
{
    FunctionOperatorComposition { function, operator }
}

impl<F, K> FunctionOperatorComposition<F, K> {
    pub fn function(&self) -> &F {
        &self.function
    }

    pub fn operator(&self) -> &K {
        &self.operator
    }
}

impl<A, F, K> Function<A> for FunctionOperatorComposition<F, K>
where
    A: NdFloat,
    F: Function<A>,
    K: LinearOperator<A>,
{
    fn value(&self, x: &DataContainer<A>) -> Result<A> {
        self.function.value(&self.operator.direct(x)?)
    }

    fn proximal_into(
        &self,
        _x: &DataContainer<A>,
        _step: A,
        _out: &mut DataContainer<A>,
    ) -> Result<()> {
        Err(Error::Unsupported("proximal map of a function composed with an operator"))
    }

    fn proximal_conjugate_into(
        &self,
        _x: &DataContainer<A>,
        _step: A,
        _out: &mut DataContainer<A>,
    ) -> Result<()> {
        Err(Error::Unsupported("proximal map of a function composed with an operator"))
    }

    fn gradient_into(&self, x: &DataContainer<A>, out: &mut DataContainer<A>) -> Result<()> {
        let kx = self.operator.direct(x)?;
        let grad = self.function.gradient(&kx)?;
        self.operator.adjoint_into(&grad, out)
    }

    /// Only estimates $`\|K\|`$ when $`f`$ is smooth
    fn lipschitz(&self) -> Result<Option<A>> {
        match self.function.lipschitz()? {
            Some(l) => {
                let norm = self.operator.norm()?;
                Ok(Some(l * norm * norm))
            }
            None => Ok(None),
        }
    }
}

/// Separable sum $`F(x) = \sum_i f_i(x_i)`$ over the slots of a block
///
/// Proximal maps act slot by slot, in parallel when rayon is enabled.
pub struct BlockFunction<A> {
    functions: Vec<Box<dyn Function<A>>>,
}

impl<A: NdFloat> BlockFunction<A> {
    pub fn new(functions: Vec<Box<dyn Function<A>>>) -> BlockFunction<A> {
        BlockFunction { functions }
    }

    /// Appends the function of the next slot
    #[must_use]
    pub fn push<F: Function<A> + 'static>(mut self, function: F) -> BlockFunction<A> {
        self.functions.push(Box::new(function));
        self
    }

    pub fn len(&self) -> usize {
        self.functions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }

    fn slots<'a>(
        &self,
        x: &'a DataContainer<A>,
        context: &'static str,
    ) -> Result<&'a [DataContainer<A>]> {
        let slots = x.slots()?;
        if slots.len() != self.functions.len() {
            return Err(Error::shape(
                context,
                format!("block of {} slots", self.functions.len()),
                x.geometry(),
            ));
        }
        Ok(slots)
    }

    /// Applies `map(i, f_i, x_i, out_i)` to every slot
    fn slotwise<P>(
        &self,
        x: &DataContainer<A>,
        out: &mut DataContainer<A>,
        context: &'static str,
        map: P,
    ) -> Result<()>
    where
        P: Fn(usize, &dyn Function<A>, &DataContainer<A>, &mut DataContainer<A>) -> Result<()>
            + Sync
            + Send,
    {
        let xs = self.slots(x, context)?;
        x.check_compatible(out, context)?;
        try_for_each_slot(out.slots_mut()?, |i, out| {
            map(i, self.functions[i].as_ref(), &xs[i], out)
        })
    }
}

impl<A: NdFloat> Default for BlockFunction<A> {
    fn default() -> BlockFunction<A> {
        BlockFunction::new(Vec::new())
    }
}

impl<A: NdFloat> Function<A> for BlockFunction<A> {
    fn value(&self, x: &DataContainer<A>) -> Result<A> {
        let xs = self.slots(x, "block function")?;
        self.functions
            .iter()
            .zip(xs)
            .try_fold(A::zero(), |acc, (f, x)| Ok(acc + f.value(x)?))
    }

    fn proximal_into(
        &self,
        x: &DataContainer<A>,
        step: A,
        out: &mut DataContainer<A>,
    ) -> Result<()> {
        self.slotwise(x, out, "block function proximal", move |_, f, x, out| {
            f.proximal_into(x, step, out)
        })
    }

    fn convex_conjugate(&self, y: &DataContainer<A>) -> Result<A> {
        let ys = self.slots(y, "block function conjugate")?;
        self.functions
            .iter()
            .zip(ys)
            .try_fold(A::zero(), |acc, (f, y)| Ok(acc + f.convex_conjugate(y)?))
    }

    fn proximal_conjugate_into(
        &self,
        x: &DataContainer<A>,
        step: A,
        out: &mut DataContainer<A>,
    ) -> Result<()> {
        self.slotwise(x, out, "block function proximal conjugate", move |_, f, x, out| {
            f.proximal_conjugate_into(x, step, out)
        })
    }

    fn proximal_diag_into(
        &self,
        x: &DataContainer<A>,
        step: &DataContainer<A>,
        out: &mut DataContainer<A>,
    ) -> Result<()> {
        let steps = self.slots(step, "block function proximal")?;
        self.slotwise(x, out, "block function proximal", |i, f, x, out| {
            f.proximal_diag_into(x, &steps[i], out)
        })
    }

    fn proximal_conjugate_diag_into(
        &self,
        x: &DataContainer<A>,
        step: &DataContainer<A>,
        out: &mut DataContainer<A>,
    ) -> Result<()> {
        let steps = self.slots(step, "block function proximal conjugate")?;
        self.slotwise(x, out, "block function proximal conjugate", |i, f, x, out| {
            f.proximal_conjugate_diag_into(x, &steps[i], out)
        })
    }

    fn gradient_into(&self, x: &DataContainer<A>, out: &mut DataContainer<A>) -> Result<()> {
        self.slotwise(x, out, "block function gradient", |_, f, x, out| {
            f.gradient_into(x, out)
        })
    }

    /// Largest slot constant
    fn lipschitz(&self) -> Result<Option<A>> {
        let mut largest = Some(A::zero());
        for f in &self.functions {
            largest = match (largest, f.lipschitz()?) {
                (Some(acc), Some(l)) => Some(acc.max(l)),
                _ => None,
            };
        }
        Ok(largest)
    }
}
