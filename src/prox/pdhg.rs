//! Primal-Dual Hybrid Gradient

use log::{debug, info, warn};
use ndarray::NdFloat;

use crate::algorithm::{Algorithm, AlgorithmConfig, IterationRecord, RunState, Scratch};
use crate::error::{Error, Result};
use crate::func::Function;
use crate::linop::LinearOperator;
use crate::lit;
use crate::space::DataContainer;

/// Relative slack on $`\tau\sigma\|K\|^2 \le 1`$
const STEP_SLACK: f64 = 1e-6;

/// Primal-Dual Hybrid Gradient (Chambolle-Pock)
///
/// Solves the saddle-point form of
/// ```math
/// \min_x f(Kx) + g(x)
/// ```
/// with prox-friendly $`f^*`$ and $`g`$.
///
/// Algorithm
/// ---------
/// ```math
/// \begin{aligned}
/// y_{k+1} &= \mathrm{prox}_{\sigma f^*}(y_k + \sigma K \bar x_k) \\
/// x_{k+1} &= \mathrm{prox}_{\tau g}(x_k - \tau K^* y_{k+1}) \\
/// \bar x_{k+1} &= x_{k+1} + \theta (x_{k+1} - x_k)
/// \end{aligned}
/// ```
/// Convergence requires $`\tau\sigma\|K\|^2 \le 1`$. The defaults are
/// $`\sigma = 1`$, $`\tau = 1/\|K\|^2`$ and $`\theta = 1`$.
/// [`Pdhg::with_diagonal_preconditioning`] switches to steps chosen entry
/// by entry from the absolute row and column sums of $`K`$, which needs
/// separable $`f^*`$ and $`g`$.
///
/// Parameters
/// ----------
/// - __f:__        function of $`Kx`$, must provide the proximal map of its conjugate
/// - __g:__        function of $`x`$, must provide a proximal map
/// - __operator:__ the linear operator $`K`$
/// - __config:__   iteration budget, objective interval and buffer reuse
///
/// Every `update_interval` iterations the primal objective
/// $`f(Kx) + g(x)`$, the dual objective $`-f^*(y) - g^*(-K^*y)`$ and their
/// gap are recorded.
///
/// References
/// ----------
/// A. Chambolle and T. Pock, "A first-order primal-dual algorithm for
/// convex problems with applications to imaging," J. Math. Imaging Vis., 2011.
///
/// T. Pock and A. Chambolle, "Diagonal preconditioning for first order
/// primal-dual algorithms in convex optimization," ICCV, 2011.
pub struct Pdhg<A, F, G, K> {
    f: F,
    g: G,
    operator: K,
    steps: StepSizes<A>,
    theta: A,
    norm: A,
    x_init: DataContainer<A>,
    y_init: DataContainer<A>,
    x: DataContainer<A>,
    x_old: DataContainer<A>,
    x_bar: DataContainer<A>,
    y: DataContainer<A>,
    state: RunState<A>,
    dual: Vec<IterationRecord<A>>,
    gap: Vec<IterationRecord<A>>,
    scratch: Scratch<Buffers<A>>,
}

/// Primal step $`\tau`$ and dual step $`\sigma`$
#[derive(Clone, Debug, PartialEq)]
pub enum StepSizes<A> {
    Scalar {
        tau: A,
        sigma: A,
    },
    /// $`\tau`$ in the domain and $`\sigma`$ in the range of $`K`$
    Diagonal {
        tau: DataContainer<A>,
        sigma: DataContainer<A>,
    },
}

impl<A: NdFloat> StepSizes<A> {
    /// `(tau, sigma)` unless the steps are element-wise
    pub fn as_scalar(&self) -> Option<(A, A)> {
        match *self {
            StepSizes::Scalar { tau, sigma } => Some((tau, sigma)),
            StepSizes::Diagonal { .. } => None,
        }
    }
}

/// One element of the range and one of the domain
struct Buffers<A> {
    range: DataContainer<A>,
    domain: DataContainer<A>,
}

fn check_steps<A: NdFloat>(tau: A, sigma: A, norm: A) -> Result<()> {
    if !(tau > A::zero() && sigma > A::zero()) || !tau.is_finite() || !sigma.is_finite() {
        return Err(Error::config(format!(
            "step sizes must be positive and finite, got tau = {:?}, sigma = {:?}",
            tau, sigma
        )));
    }
    let product = tau * sigma * norm * norm;
    if product > A::one() + lit(STEP_SLACK) {
        return Err(Error::config(format!(
            "tau * sigma * |K|^2 = {:?} exceeds 1 (tau = {:?}, sigma = {:?}, |K| = {:?})",
            product, tau, sigma, norm
        )));
    }
    Ok(())
}

impl<A, F, G, K> Pdhg<A, F, G, K>
where
    A: NdFloat,
    F: Function<A>,
    G: Function<A>,
    K: LinearOperator<A>,
{
    /// Starts from zero, with the default step sizes
    pub fn new(f: F, g: G, operator: K, config: AlgorithmConfig) -> Result<Pdhg<A, F, G, K>> {
        let state = RunState::new(config)?;
        let norm = operator.norm()?;
        let (tau, sigma) = if norm > A::zero() {
            (norm.powi(2).recip(), A::one())
        } else {
            warn!("PDHG operator has zero norm, using unit step sizes");
            (A::one(), A::one())
        };
        let x_init = operator.domain_geometry().allocate();
        let y_init = operator.range_geometry().allocate();
        info!(
            "PDHG set up with |K| = {:.4e}, tau = {:.4e}, sigma = {:.4e}",
            norm, tau, sigma
        );
        Ok(Pdhg {
            f,
            g,
            operator,
            steps: StepSizes::Scalar { tau, sigma },
            theta: A::one(),
            norm,
            x: x_init.clone(),
            x_old: x_init.clone(),
            x_bar: x_init.clone(),
            y: y_init.clone(),
            x_init,
            y_init,
            state,
            dual: Vec::new(),
            gap: Vec::new(),
            scratch: Scratch::new(config.reuse_buffers),
        })
    }

    /// Replaces the default steps, subject to $`\tau\sigma\|K\|^2 \le 1`$
    pub fn with_step_sizes(mut self, tau: A, sigma: A) -> Result<Pdhg<A, F, G, K>> {
        check_steps(tau, sigma, self.norm)?;
        self.steps = StepSizes::Scalar { tau, sigma };
        Ok(self)
    }

    /// Element-wise steps $`\tau_j = 1 / \sum_i |K_{ij}|`$ and
    /// $`\sigma_i = 1 / \sum_j |K_{ij}|`$
    ///
    /// These converge for any $`K`$ without its norm. Entries whose sum
    /// vanishes get a unit step. Both `f` and `g` must support
    /// element-wise steps, see [`Function::proximal_diag_into`].
    pub fn with_diagonal_preconditioning(mut self) -> Result<Pdhg<A, F, G, K>> {
        let invert = |s: A| if s > A::zero() { s.recip() } else { A::one() };
        let mut tau = self.operator.sum_abs_row()?;
        tau.mapv_inplace(invert);
        let mut sigma = self.operator.sum_abs_col()?;
        sigma.mapv_inplace(invert);
        let smallest = |c: &DataContainer<A>| c.fold(A::infinity(), |acc, v| acc.min(v));
        info!(
            "PDHG preconditioned with tau >= {:.4e}, sigma >= {:.4e}",
            smallest(&tau),
            smallest(&sigma)
        );
        self.steps = StepSizes::Diagonal { tau, sigma };
        Ok(self)
    }

    /// Over-relaxation parameter $`\theta \in [0, 1]`$
    pub fn with_relaxation(mut self, theta: A) -> Result<Pdhg<A, F, G, K>> {
        if !(theta >= A::zero() && theta <= A::one()) {
            return Err(Error::config(format!("theta must lie in [0, 1], got {:?}", theta)));
        }
        self.theta = theta;
        Ok(self)
    }

    pub fn with_initial_point(mut self, x0: DataContainer<A>) -> Result<Pdhg<A, F, G, K>> {
        x0.check_geometry(&self.operator.domain_geometry(), "PDHG initial point")?;
        self.x.clone_from(&x0);
        self.x_old.clone_from(&x0);
        self.x_bar.clone_from(&x0);
        self.x_init = x0;
        Ok(self)
    }

    pub fn with_initial_dual(mut self, y0: DataContainer<A>) -> Result<Pdhg<A, F, G, K>> {
        y0.check_geometry(&self.operator.range_geometry(), "PDHG initial dual point")?;
        self.y.clone_from(&y0);
        self.y_init = y0;
        Ok(self)
    }

    pub fn step_sizes(&self) -> &StepSizes<A> {
        &self.steps
    }

    /// Current dual iterate
    pub fn dual_solution(&self) -> &DataContainer<A> {
        &self.y
    }

    /// $`-f^*(y) - g^*(-K^*y)`$
    fn dual_value(&self) -> Result<A> {
        let mut kty = self.operator.adjoint(&self.y)?;
        kty.scale_inplace(-A::one());
        Ok(-(self.f.convex_conjugate(&self.y)? + self.g.convex_conjugate(&kty)?))
    }
}

impl<A, F, G, K> Algorithm<A> for Pdhg<A, F, G, K>
where
    A: NdFloat,
    F: Function<A>,
    G: Function<A>,
    K: LinearOperator<A>,
{
    fn name(&self) -> &'static str {
        "PDHG"
    }

    fn state(&self) -> &RunState<A> {
        &self.state
    }

    fn state_mut(&mut self) -> &mut RunState<A> {
        &mut self.state
    }

    fn update(&mut self) -> Result<()> {
        let theta = self.theta;
        let operator = &self.operator;
        let mut buf = self.scratch.take_or(|| Buffers {
            range: operator.range_geometry().allocate(),
            domain: operator.domain_geometry().allocate(),
        });

        // dual step at the extrapolated point
        self.operator.direct_into(&self.x_bar, &mut buf.range)?;
        match &self.steps {
            StepSizes::Scalar { sigma, .. } => {
                let sigma = *sigma;
                buf.range
                    .zip_mut_with(&self.y, move |kx, y| *kx = y + sigma * *kx)?;
                self.f.proximal_conjugate_into(&buf.range, sigma, &mut self.y)?;
            }
            StepSizes::Diagonal { sigma, .. } => {
                buf.range
                    .zip2_mut_with(&self.y, sigma, |kx, y, s| *kx = y + s * *kx)?;
                self.f
                    .proximal_conjugate_diag_into(&buf.range, sigma, &mut self.y)?;
            }
        }

        // primal step
        std::mem::swap(&mut self.x, &mut self.x_old);
        self.operator.adjoint_into(&self.y, &mut buf.domain)?;
        match &self.steps {
            StepSizes::Scalar { tau, .. } => {
                let tau = *tau;
                buf.domain
                    .zip_mut_with(&self.x_old, move |kty, x| *kty = x - tau * *kty)?;
                self.g.proximal_into(&buf.domain, tau, &mut self.x)?;
            }
            StepSizes::Diagonal { tau, .. } => {
                buf.domain
                    .zip2_mut_with(&self.x_old, tau, |kty, x, t| *kty = x - t * *kty)?;
                self.g.proximal_diag_into(&buf.domain, tau, &mut self.x)?;
            }
        }

        self.x_bar
            .zip_map_from(&self.x, &self.x_old, move |x, x_old| x + theta * (x - x_old))?;

        self.scratch.give_back(buf);
        Ok(())
    }

    fn update_objective(&mut self) -> Result<()> {
        let kx = self.operator.direct(&self.x)?;
        let primal = self.f.value(&kx)? + self.g.value(&self.x)?;
        let dual = match self.dual_value() {
            Ok(value) => value,
            Err(Error::Unsupported(what)) => {
                debug!("PDHG dual objective unavailable: {} is not supported", what);
                A::nan()
            }
            Err(e) => return Err(e),
        };
        let iteration = self.state.iteration();
        self.state.record(primal);
        debug!(
            "iteration {:>6}: dual {:.6e}, gap {:.6e}",
            iteration,
            dual,
            primal - dual
        );
        self.dual.push(IterationRecord {
            iteration,
            value: dual,
        });
        self.gap.push(IterationRecord {
            iteration,
            value: primal - dual,
        });
        Ok(())
    }

    fn solution(&self) -> &DataContainer<A> {
        &self.x
    }

    fn reset(&mut self) {
        self.x.clone_from(&self.x_init);
        self.x_old.clone_from(&self.x_init);
        self.x_bar.clone_from(&self.x_init);
        self.y.clone_from(&self.y_init);
        self.dual.clear();
        self.gap.clear();
        self.state.reset();
    }

    fn dual_objective(&self) -> &[IterationRecord<A>] {
        &self.dual
    }

    fn primal_dual_gap(&self) -> &[IterationRecord<A>] {
        &self.gap
    }
}
