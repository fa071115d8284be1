//! Fast Iterative Shrinking/Thresholding Algorithm

use log::info;
use ndarray::NdFloat;

use crate::algorithm::{Algorithm, AlgorithmConfig, RunState, Scratch};
use crate::error::{Error, Result};
use crate::func::Function;
use crate::lit;
use crate::space::{DataContainer, Geometry};

/// Fast Iterative Shrinking/Thresholding Algorithm
///
/// Minimizes $`f(x) + g(x)`$ for an $`L`$-smooth $`f`$ and a
/// prox-friendly $`g`$.
///
/// Algorithm
/// ---------
/// ```math
/// \begin{aligned}
/// x_k &= \mathrm{prox}_{g/L}\big(y_k - \tfrac1L \nabla f(y_k)\big) \\
/// t_{k+1} &= \tfrac12\big(1 + \sqrt{1 + 4 t_k^2}\big) \\
/// y_{k+1} &= x_k + \frac{t_k - 1}{t_{k+1}} (x_k - x_{k-1})
/// \end{aligned}
/// ```
/// with $`y_0 = x_0`$, $`t_0 = 1`$.
///
/// Parameters
/// ----------
/// - __x_init:__    initial guess, fixes the geometry of the iterates
/// - __f:__         smooth term, must provide a gradient
/// - __g:__         non-smooth term, must provide a proximal map
/// - __lipschitz:__ Lipschitz constant of $`\nabla f`$, taken from
///                  [`Function::lipschitz`] by [`Fista::new`]
/// - __config:__    iteration budget, objective interval and buffer reuse
///
/// The objective $`f(x_k) + g(x_k)`$ is not monotone.
///
/// References
/// ----------
/// A. Beck and M. Teboulle, "A Fast Iterative Shrinkage-Thresholding
/// Algorithm for Linear Inverse Problems," SIAM J. Imaging Sci., 2009.
pub struct Fista<A, F, G> {
    f: F,
    g: G,
    step: A,
    x_init: DataContainer<A>,
    x: DataContainer<A>,
    x_old: DataContainer<A>,
    y: DataContainer<A>,
    t: A,
    geometry: Geometry,
    state: RunState<A>,
    scratch: Scratch<DataContainer<A>>,
}

impl<A, F, G> Fista<A, F, G>
where
    A: NdFloat,
    F: Function<A>,
    G: Function<A>,
{
    /// Step size from `f.lipschitz()`, which must be known
    pub fn new(
        x_init: DataContainer<A>,
        f: F,
        g: G,
        config: AlgorithmConfig,
    ) -> Result<Fista<A, F, G>> {
        let lipschitz = f.lipschitz()?.ok_or_else(|| {
            Error::config(
                "FISTA needs the Lipschitz constant of the smooth term, use Fista::with_lipschitz",
            )
        })?;
        Fista::with_lipschitz(x_init, f, g, lipschitz, config)
    }

    pub fn with_lipschitz(
        x_init: DataContainer<A>,
        f: F,
        g: G,
        lipschitz: A,
        config: AlgorithmConfig,
    ) -> Result<Fista<A, F, G>> {
        if !(lipschitz > A::zero()) || !lipschitz.is_finite() {
            return Err(Error::config(format!(
                "the Lipschitz constant must be positive and finite, got {:?}",
                lipschitz
            )));
        }
        let state = RunState::new(config)?;
        info!(
            "FISTA set up on {} with step 1/L = {:.4e}",
            x_init.geometry(),
            lipschitz.recip()
        );
        Ok(Fista {
            f,
            g,
            step: lipschitz.recip(),
            x: x_init.clone(),
            x_old: x_init.clone(),
            y: x_init.clone(),
            geometry: x_init.geometry(),
            x_init,
            t: A::one(),
            state,
            scratch: Scratch::new(config.reuse_buffers),
        })
    }

    pub fn step_size(&self) -> A {
        self.step
    }
}

impl<A, F, G> Algorithm<A> for Fista<A, F, G>
where
    A: NdFloat,
    F: Function<A>,
    G: Function<A>,
{
    fn name(&self) -> &'static str {
        "FISTA"
    }

    fn state(&self) -> &RunState<A> {
        &self.state
    }

    fn state_mut(&mut self) -> &mut RunState<A> {
        &mut self.state
    }

    fn update(&mut self) -> Result<()> {
        let step = self.step;
        let geometry = &self.geometry;
        let mut u = self.scratch.take_or(|| geometry.allocate());

        // u = y - step * grad f(y)
        self.f.gradient_into(&self.y, &mut u)?;
        u.zip_mut_with(&self.y, move |g, y| *g = y - step * *g)?;

        std::mem::swap(&mut self.x, &mut self.x_old);
        self.g.proximal_into(&u, step, &mut self.x)?;

        let t_old = self.t;
        self.t = (A::one() + (A::one() + lit::<A>(4.) * t_old * t_old).sqrt()) / lit(2.);
        let beta = (t_old - A::one()) / self.t;
        self.y
            .zip_map_from(&self.x, &self.x_old, move |x, x_old| x + beta * (x - x_old))?;

        self.scratch.give_back(u);
        Ok(())
    }

    fn update_objective(&mut self) -> Result<()> {
        let value = self.f.value(&self.x)? + self.g.value(&self.x)?;
        self.state.record(value);
        Ok(())
    }

    fn solution(&self) -> &DataContainer<A> {
        &self.x
    }

    fn reset(&mut self) {
        self.x.clone_from(&self.x_init);
        self.x_old.clone_from(&self.x_init);
        self.y.clone_from(&self.x_init);
        self.t = A::one();
        self.state.reset();
    }
}
