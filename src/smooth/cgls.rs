//! Private Module

use log::{debug, info};
use ndarray::NdFloat;

use crate::algorithm::{Algorithm, AlgorithmConfig, RunState, Scratch};
use crate::error::{Error, Result};
use crate::linop::LinearOperator;
use crate::space::DataContainer;

/// Conjugate Gradient Least Squares
///
/// Minimizes $`\|Ax - b\|_2^2`$ by conjugate gradients on the normal
/// equations $`A^*Ax = A^*b`$, without forming $`A^*A`$.
///
/// Algorithm
/// ---------
/// ```math
/// \begin{aligned}
/// q_k &= A p_k, \quad \alpha_k = \|s_k\|^2 / \|q_k\|^2 \\
/// x_{k+1} &= x_k + \alpha_k p_k \\
/// r_{k+1} &= r_k - \alpha_k q_k \\
/// s_{k+1} &= A^* r_{k+1} \\
/// p_{k+1} &= s_{k+1} + \frac{\|s_{k+1}\|^2}{\|s_k\|^2} p_k
/// \end{aligned}
/// ```
/// with $`r_0 = b - Ax_0`$ and $`p_0 = s_0 = A^* r_0`$.
///
/// Parameters
/// ----------
/// - __x_init:__    initial guess in the domain of `operator`
/// - __operator:__  forward model $`A`$
/// - __data:__      right hand side $`b`$ in the range of `operator`
/// - __config:__    iteration budget, objective interval and buffer reuse
///
/// The recorded objective is $`\|r_k\|^2`$. With a tolerance set by
/// [`Cgls::with_tolerance`], the run ends as
/// [`Converged`](crate::algorithm::Status::Converged) once
/// $`\|s_k\| \le \mathrm{tol} \cdot \|s_0\|`$.
pub struct Cgls<A, K> {
    operator: K,
    tolerance: A,
    x_init: DataContainer<A>,
    r_init: DataContainer<A>,
    s_init: DataContainer<A>,
    x: DataContainer<A>,
    r: DataContainer<A>,
    s: DataContainer<A>,
    p: DataContainer<A>,
    gamma: A,
    gamma_init: A,
    norm_s0: A,
    state: RunState<A>,
    scratch: Scratch<DataContainer<A>>,
}

impl<A, K> Cgls<A, K>
where
    A: NdFloat,
    K: LinearOperator<A>,
{
    pub fn new(
        x_init: DataContainer<A>,
        operator: K,
        data: &DataContainer<A>,
        config: AlgorithmConfig,
    ) -> Result<Cgls<A, K>> {
        let state = RunState::new(config)?;
        x_init.check_geometry(&operator.domain_geometry(), "CGLS initial point")?;
        data.check_geometry(&operator.range_geometry(), "CGLS data")?;

        let mut r = operator.direct(&x_init)?;
        r.zip_mut_with(data, |ax, b| *ax = b - *ax)?;
        let s = operator.adjoint(&r)?;
        let gamma = s.squared_norm();
        info!(
            "CGLS set up with |r0| = {:.4e}, |A^T r0| = {:.4e}",
            r.norm(),
            gamma.sqrt()
        );
        Ok(Cgls {
            operator,
            tolerance: A::zero(),
            x: x_init.clone(),
            x_init,
            r: r.clone(),
            r_init: r,
            p: s.clone(),
            s: s.clone(),
            s_init: s,
            gamma,
            gamma_init: gamma,
            norm_s0: gamma.sqrt(),
            state,
            scratch: Scratch::new(config.reuse_buffers),
        })
    }

    /// Relative tolerance on $`\|A^* r\|`$, zero (the default) disables the test
    pub fn with_tolerance(mut self, tolerance: A) -> Result<Cgls<A, K>> {
        if !(tolerance >= A::zero()) || !tolerance.is_finite() {
            return Err(Error::config(format!(
                "CGLS tolerance must be non-negative and finite, got {:?}",
                tolerance
            )));
        }
        self.tolerance = tolerance;
        Ok(self)
    }

    /// Current residual $`b - Ax`$
    pub fn residual(&self) -> &DataContainer<A> {
        &self.r
    }
}

impl<A, K> Algorithm<A> for Cgls<A, K>
where
    A: NdFloat,
    K: LinearOperator<A>,
{
    fn name(&self) -> &'static str {
        "CGLS"
    }

    fn state(&self) -> &RunState<A> {
        &self.state
    }

    fn state_mut(&mut self) -> &mut RunState<A> {
        &mut self.state
    }

    fn update(&mut self) -> Result<()> {
        if self.gamma == A::zero() {
            return Ok(());
        }
        let operator = &self.operator;
        let mut q = self.scratch.take_or(|| operator.range_geometry().allocate());

        self.operator.direct_into(&self.p, &mut q)?;
        let q_norm2 = q.squared_norm();
        if !(q_norm2 > A::zero()) {
            debug!("CGLS: A p vanished at iteration {}", self.state.iteration());
            self.gamma = A::zero();
            self.scratch.give_back(q);
            return Ok(());
        }
        let alpha = self.gamma / q_norm2;
        self.x.zip_mut_with(&self.p, move |x, p| *x = *x + alpha * p)?;
        self.r.zip_mut_with(&q, move |r, q| *r = *r - alpha * q)?;

        self.operator.adjoint_into(&self.r, &mut self.s)?;
        let gamma = self.s.squared_norm();
        let beta = gamma / self.gamma;
        self.p.zip_mut_with(&self.s, move |p, s| *p = s + beta * *p)?;
        self.gamma = gamma;

        self.scratch.give_back(q);
        Ok(())
    }

    fn update_objective(&mut self) -> Result<()> {
        let value = self.r.squared_norm();
        self.state.record(value);
        Ok(())
    }

    fn is_converged(&self) -> bool {
        self.gamma == A::zero() || self.gamma.sqrt() <= self.tolerance * self.norm_s0
    }

    fn solution(&self) -> &DataContainer<A> {
        &self.x
    }

    fn reset(&mut self) {
        self.x.clone_from(&self.x_init);
        self.r.clone_from(&self.r_init);
        self.s.clone_from(&self.s_init);
        self.p.clone_from(&self.s_init);
        self.gamma = self.gamma_init;
        self.state.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algorithm::{nop, Status};
    use crate::linop::MatrixOperator;
    use crate::space::ImageGeometry;
    use ndarray::prelude::*;
    use ndarray_rand::rand::rngs::StdRng;
    use ndarray_rand::rand::SeedableRng;
    use ndarray_rand::rand_distr::Uniform;
    use ndarray_rand::RandomExt;

    fn init_logger() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    fn random_problem(seed: u64) -> (Array2<f64>, Array1<f64>) {
        let mut rng = StdRng::seed_from_u64(seed);
        let a = Array::random_using((12, 6), Uniform::new(-1., 1.), &mut rng);
        let b = Array::random_using(12, Uniform::new(-1., 1.), &mut rng);
        (a, b)
    }

    #[test]
    fn least_squares() {
        init_logger();
        let (a, b) = random_problem(3);
        let ata = a.t().dot(&a);
        let atb = a.t().dot(&b);
        let normal = nalgebra::DMatrix::from_fn(6, 6, |i, j| ata[[i, j]]);
        let rhs = nalgebra::DVector::from_iterator(6, atb.iter().cloned());
        let expected = normal.lu().solve(&rhs).unwrap();

        let op = MatrixOperator::from_matrix(a);
        let config = AlgorithmConfig::default().with_max_iterations(50);
        let mut cgls = Cgls::new(
            ImageGeometry::new([6]).allocate(),
            op,
            &DataContainer::from_array(b),
            config,
        )
        .unwrap()
        .with_tolerance(1e-10)
        .unwrap();
        let solution = cgls.solve().unwrap();
        assert_eq!(solution.status, Status::Converged);
        assert!(solution.iterations <= 20, "{} iterations", solution.iterations);
        for (x, e) in solution.x.to_vec().iter().zip(expected.iter()) {
            assert!((x - e).abs() < 1e-8, "{} != {}", x, e);
        }

        // the residual never grows
        for pair in solution.objective.windows(2) {
            assert!(pair[1].value <= pair[0].value * (1. + 1e-12));
        }
        assert!(solution.dual_objective.is_empty());
    }

    #[test]
    fn exact_start_converges_immediately() {
        let a = array![[2., 0.], [0., 1.], [1., 1.]];
        let x0 = DataContainer::from_array(array![1., -1.]);
        let b = DataContainer::from_array(a.dot(&array![1., -1.]));
        let op = MatrixOperator::from_matrix(a);
        let mut cgls = Cgls::new(x0.clone(), op, &b, AlgorithmConfig::default()).unwrap();
        assert_eq!(cgls.run(10, nop).unwrap(), Status::Converged);
        assert_eq!(cgls.iteration(), 1);
        assert_eq!(*cgls.solution(), x0);
        assert_eq!(cgls.objective()[0].value, 0.);
    }

    #[test]
    fn reuse_buffers_and_reset() {
        let run = |seed: u64, reuse: bool| {
            let (a, b) = random_problem(seed);
            let config = AlgorithmConfig::default()
                .with_max_iterations(4)
                .with_reuse_buffers(reuse);
            let mut cgls = Cgls::new(
                ImageGeometry::new([6]).allocate(),
                MatrixOperator::from_matrix(a),
                &DataContainer::from_array(b),
                config,
            )
            .unwrap();
            let first = cgls.solve().unwrap();
            cgls.reset();
            assert_eq!(cgls.status(), Status::Initialized);
            let again = cgls.solve().unwrap();
            assert_eq!(again.x, first.x, "seed {}", seed);
            assert_eq!(again.objective, first.objective, "seed {}", seed);
            first
        };
        for seed in 0..20 {
            let (kept, fresh) = (run(seed, true), run(seed, false));
            assert_eq!(kept.x, fresh.x);
            assert_eq!(kept.objective, fresh.objective);
        }
    }

    #[test]
    fn invalid_setup() {
        let (a, b) = random_problem(5);
        let b = DataContainer::from_array(b);
        let op = MatrixOperator::from_matrix(a);
        let wrong = ImageGeometry::new([5]).allocate();
        assert!(matches!(
            Cgls::new(wrong, op.clone(), &b, AlgorithmConfig::default()),
            Err(Error::ShapeMismatch { .. })
        ));
        let x0 = ImageGeometry::new([6]).allocate();
        let cgls = Cgls::new(x0, op, &b, AlgorithmConfig::default()).unwrap();
        assert!(matches!(cgls.with_tolerance(-1.), Err(Error::Configuration(_))));
    }
}
