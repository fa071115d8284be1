//! Shared Run Loop of the Iterative Solvers
//!
//! Every solver owns a [`RunState`] (iteration counter, objective history,
//! status, elapsed time) and implements [`Algorithm`], whose provided
//! [`run`](Algorithm::run) drives the iterations. A run stops when the
//! iteration budget is spent, the user callback returns `true`, or a
//! [`StopHandle`] is triggered. Stopping happens between iterations only,
//! so a stopped solver resumes exactly where it left off.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use log::{debug, info, trace, warn};
use ndarray::NdFloat;

use crate::error::{Error, Result};
use crate::space::DataContainer;

/// Options shared by all solvers
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct AlgorithmConfig {
    /// Total iteration budget
    pub max_iterations: usize,
    /// Objective values are recorded every `update_interval` iterations
    pub update_interval: usize,
    /// Keep scratch buffers between iterations instead of reallocating
    pub reuse_buffers: bool,
}

impl Default for AlgorithmConfig {
    fn default() -> AlgorithmConfig {
        AlgorithmConfig {
            max_iterations: 1000,
            update_interval: 1,
            reuse_buffers: true,
        }
    }
}

impl AlgorithmConfig {
    pub fn with_max_iterations(mut self, max_iterations: usize) -> AlgorithmConfig {
        self.max_iterations = max_iterations;
        self
    }

    pub fn with_update_interval(mut self, update_interval: usize) -> AlgorithmConfig {
        self.update_interval = update_interval;
        self
    }

    pub fn with_reuse_buffers(mut self, reuse_buffers: bool) -> AlgorithmConfig {
        self.reuse_buffers = reuse_buffers;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_iterations == 0 {
            return Err(Error::config("max_iterations must be positive"));
        }
        if self.update_interval == 0 {
            return Err(Error::config("update_interval must be positive"));
        }
        if self.update_interval > self.max_iterations {
            warn!(
                "update_interval {} exceeds max_iterations {}, objectives are only recorded \
                 at the start and end",
                self.update_interval, self.max_iterations
            );
        }
        Ok(())
    }
}

/// One entry of an objective history
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct IterationRecord<A> {
    pub iteration: usize,
    pub value: A,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Status {
    /// Constructed, never run
    Initialized,
    /// Iterations left in the budget
    Running,
    /// The budget is spent
    Finished,
    /// Interrupted by the callback or a [`StopHandle`]
    Stopped,
    /// A stopping criterion of the algorithm itself was met
    Converged,
    /// An iteration returned an error; [`Algorithm::reset`] recovers
    Failed,
}

/// Requests a running solver to stop after the current iteration
///
/// Clones share the flag, so one can be handed to another thread. The
/// request is consumed when the solver honors it.
#[derive(Clone, Debug, Default)]
pub struct StopHandle(Arc<AtomicBool>);

impl StopHandle {
    pub fn new() -> StopHandle {
        StopHandle::default()
    }

    pub fn request_stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_stop_requested(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    fn take(&self) -> bool {
        self.0.swap(false, Ordering::SeqCst)
    }
}

/// Bookkeeping common to all solvers
#[derive(Clone, Debug)]
pub struct RunState<A> {
    config: AlgorithmConfig,
    iteration: usize,
    status: Status,
    elapsed: Duration,
    objective: Vec<IterationRecord<A>>,
    stop: StopHandle,
}

impl<A: NdFloat> RunState<A> {
    pub fn new(config: AlgorithmConfig) -> Result<RunState<A>> {
        config.validate()?;
        Ok(RunState {
            config,
            iteration: 0,
            status: Status::Initialized,
            elapsed: Duration::ZERO,
            objective: Vec::new(),
            stop: StopHandle::new(),
        })
    }

    pub fn config(&self) -> &AlgorithmConfig {
        &self.config
    }

    pub fn iteration(&self) -> usize {
        self.iteration
    }

    pub fn status(&self) -> Status {
        self.status
    }

    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }

    pub fn objective(&self) -> &[IterationRecord<A>] {
        &self.objective
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    /// Appends `value` for the current iteration.
    pub fn record(&mut self, value: A) {
        debug!("iteration {:>6}: objective {:.6e}", self.iteration, value);
        self.objective.push(IterationRecord {
            iteration: self.iteration,
            value,
        });
    }

    /// Back to iteration 0; the stop handle stays connected.
    pub fn reset(&mut self) {
        self.iteration = 0;
        self.status = Status::Initialized;
        self.elapsed = Duration::ZERO;
        self.objective.clear();
        self.stop.take();
    }

    fn is_update_iteration(&self) -> bool {
        self.iteration % self.config.update_interval == 0
            || self.iteration == self.config.max_iterations
    }
}

/// Scratch storage of one iteration
///
/// With `reuse` the buffers survive between iterations, otherwise they
/// are rebuilt each time. Either way every buffer is fully overwritten
/// before it is read, so the iterates do not depend on the choice.
#[derive(Clone, Debug)]
pub(crate) struct Scratch<T> {
    reuse: bool,
    kept: Option<T>,
}

impl<T> Scratch<T> {
    pub(crate) fn new(reuse: bool) -> Scratch<T> {
        Scratch { reuse, kept: None }
    }

    pub(crate) fn take_or(&mut self, make: impl FnOnce() -> T) -> T {
        self.kept.take().unwrap_or_else(make)
    }

    pub(crate) fn give_back(&mut self, buffers: T) {
        if self.reuse {
            self.kept = Some(buffers);
        }
    }
}

/// Result record of a completed solve
#[derive(Clone, Debug)]
pub struct Solution<A> {
    pub x: DataContainer<A>,
    pub status: Status,
    pub iterations: usize,
    pub elapsed: Duration,
    pub objective: Vec<IterationRecord<A>>,
    /// Empty for purely primal methods
    pub dual_objective: Vec<IterationRecord<A>>,
    /// Empty for purely primal methods
    pub primal_dual_gap: Vec<IterationRecord<A>>,
}

/// Do nothing callback for [`Algorithm::run`] (returns false)
pub fn nop<A>(_x: &DataContainer<A>, _iteration: usize) -> bool {
    false
}

/// An iterative solver driven by the shared run loop
pub trait Algorithm<A: NdFloat> {
    /// Short name used in log messages
    fn name(&self) -> &'static str;

    fn state(&self) -> &RunState<A>;

    fn state_mut(&mut self) -> &mut RunState<A>;

    /// Performs one iteration.
    fn update(&mut self) -> Result<()>;

    /// Evaluates and records the objective(s) at the current iterate.
    fn update_objective(&mut self) -> Result<()>;

    /// Current iterate
    fn solution(&self) -> &DataContainer<A>;

    /// Restores the state right after construction.
    fn reset(&mut self);

    /// Algorithm-specific stopping criterion, checked after each iteration
    fn is_converged(&self) -> bool {
        false
    }

    fn dual_objective(&self) -> &[IterationRecord<A>] {
        &[]
    }

    fn primal_dual_gap(&self) -> &[IterationRecord<A>] {
        &[]
    }

    fn iteration(&self) -> usize {
        self.state().iteration()
    }

    fn status(&self) -> Status {
        self.state().status()
    }

    fn objective(&self) -> &[IterationRecord<A>] {
        self.state().objective()
    }

    fn stop_handle(&self) -> StopHandle {
        self.state().stop_handle()
    }

    /// Runs at most `iterations` more iterations of the budget
    ///
    /// The objective at iteration 0 is recorded by the first call.
    /// `callback(x, iteration)` is evaluated after each iteration; if it
    /// returns `true` the run stops. A later call resumes.
    fn run<C>(&mut self, iterations: usize, mut callback: C) -> Result<Status>
    where
        C: FnMut(&DataContainer<A>, usize) -> bool,
        Self: Sized,
    {
        match self.status() {
            Status::Failed => {
                return Err(Error::config(format!(
                    "{} failed at iteration {}, reset it before running again",
                    self.name(),
                    self.iteration()
                )))
            }
            Status::Finished | Status::Converged => return Ok(self.status()),
            _ => {}
        }
        let start = Instant::now();
        let max = self.state().config.max_iterations;
        let target = self.iteration().saturating_add(iterations).min(max);

        if self.status() == Status::Initialized {
            info!("{}: starting, budget of {} iterations", self.name(), max);
            if let Err(e) = self.update_objective() {
                self.state_mut().status = Status::Failed;
                return Err(e);
            }
        }
        self.state_mut().status = Status::Running;

        while self.iteration() < target {
            if self.state().stop.take() {
                self.state_mut().status = Status::Stopped;
                break;
            }
            let stepped = self.update().and_then(|()| {
                self.state_mut().iteration += 1;
                trace!("{}: iteration {}", self.name(), self.iteration());
                if self.state().is_update_iteration() {
                    self.update_objective()
                } else {
                    Ok(())
                }
            });
            if let Err(e) = stepped {
                warn!("{}: iteration {} failed: {}", self.name(), self.iteration(), e);
                let state = self.state_mut();
                state.status = Status::Failed;
                state.elapsed += start.elapsed();
                return Err(e);
            }
            if self.is_converged() {
                self.state_mut().status = Status::Converged;
                break;
            }
            if callback(self.solution(), self.iteration()) {
                self.state_mut().status = Status::Stopped;
                break;
            }
        }

        let state = self.state_mut();
        if state.status == Status::Running && state.iteration >= max {
            state.status = Status::Finished;
        }
        state.elapsed += start.elapsed();
        if state.status != Status::Running {
            info!(
                "{}: {:?} after {} iterations in {:.3?}",
                self.name(),
                self.status(),
                self.iteration(),
                self.state().elapsed
            );
        }
        Ok(self.status())
    }

    /// Runs the rest of the budget and collects the result.
    fn solve(&mut self) -> Result<Solution<A>>
    where
        Self: Sized,
    {
        let remaining = self.state().config.max_iterations - self.iteration();
        let status = self.run(remaining, nop)?;
        Ok(Solution {
            x: self.solution().clone(),
            status,
            iterations: self.iteration(),
            elapsed: self.state().elapsed(),
            objective: self.objective().to_vec(),
            dual_objective: self.dual_objective().to_vec(),
            primal_dual_gap: self.primal_dual_gap().to_vec(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::space::ImageGeometry;
    use ndarray::prelude::*;

    /// x <- x / 2, objective |x|^2, converged below 1e-3
    struct Halving {
        x0: DataContainer<f64>,
        x: DataContainer<f64>,
        state: RunState<f64>,
        fail_at: Option<usize>,
    }

    impl Halving {
        fn new(config: AlgorithmConfig) -> Halving {
            let x0 = DataContainer::from_array(array![1., -1.]);
            Halving {
                x: x0.clone(),
                x0,
                state: RunState::new(config).unwrap(),
                fail_at: None,
            }
        }
    }

    impl Algorithm<f64> for Halving {
        fn name(&self) -> &'static str {
            "halving"
        }

        fn state(&self) -> &RunState<f64> {
            &self.state
        }

        fn state_mut(&mut self) -> &mut RunState<f64> {
            &mut self.state
        }

        fn update(&mut self) -> Result<()> {
            if self.fail_at == Some(self.state.iteration()) {
                return Err(Error::Domain("planned failure".into()));
            }
            self.x.scale_inplace(0.5);
            Ok(())
        }

        fn update_objective(&mut self) -> Result<()> {
            let value = self.x.squared_norm();
            self.state.record(value);
            Ok(())
        }

        fn solution(&self) -> &DataContainer<f64> {
            &self.x
        }

        fn reset(&mut self) {
            self.x = self.x0.clone();
            self.state.reset();
        }

        fn is_converged(&self) -> bool {
            self.x.norm_max() < 1e-3
        }
    }

    #[test]
    fn config_validation() {
        assert!(AlgorithmConfig::default().validate().is_ok());
        let zero = AlgorithmConfig::default().with_max_iterations(0);
        assert!(matches!(zero.validate(), Err(Error::Configuration(_))));
        let zero = AlgorithmConfig::default().with_update_interval(0);
        assert!(RunState::<f64>::new(zero).is_err());
    }

    #[test]
    fn objective_history_follows_interval() {
        let config = AlgorithmConfig::default()
            .with_max_iterations(7)
            .with_update_interval(3);
        let mut alg = Halving::new(config);
        assert_eq!(alg.status(), Status::Initialized);
        assert_eq!(alg.run(100, nop).unwrap(), Status::Finished);
        let iterations: Vec<usize> = alg.objective().iter().map(|r| r.iteration).collect();
        assert_eq!(iterations, vec![0, 3, 6, 7]);
        assert_eq!(alg.objective()[0].value, 2.);
        // spent budget
        assert_eq!(alg.run(5, nop).unwrap(), Status::Finished);
        assert_eq!(alg.iteration(), 7);
    }

    #[test]
    fn resumes_after_partial_runs() {
        let config = AlgorithmConfig::default().with_max_iterations(6);
        let mut alg = Halving::new(config);
        assert_eq!(alg.run(2, nop).unwrap(), Status::Running);
        assert_eq!(alg.iteration(), 2);
        assert_eq!(alg.run(10, nop).unwrap(), Status::Finished);
        assert_eq!(alg.iteration(), 6);
        assert_eq!(alg.solution().as_array().unwrap()[0], 1. / 64.);
        assert_eq!(alg.objective().len(), 7);
    }

    #[test]
    fn callback_and_handle_stop() {
        let mut alg = Halving::new(AlgorithmConfig::default().with_max_iterations(8));
        let status = alg.run(8, |_, it| it == 3).unwrap();
        assert_eq!(status, Status::Stopped);
        assert_eq!(alg.iteration(), 3);

        let handle = alg.stop_handle();
        handle.request_stop();
        assert_eq!(alg.run(8, nop).unwrap(), Status::Stopped);
        assert_eq!(alg.iteration(), 3);
        assert!(!handle.is_stop_requested());

        let solution = alg.solve().unwrap();
        assert_eq!(solution.status, Status::Finished);
        assert_eq!(solution.iterations, 8);
        assert!(solution.dual_objective.is_empty());
    }

    #[test]
    fn converged() {
        let mut alg = Halving::new(AlgorithmConfig::default().with_max_iterations(100));
        assert_eq!(alg.run(100, nop).unwrap(), Status::Converged);
        // 2^-10 < 1e-3
        assert_eq!(alg.iteration(), 10);
    }

    #[test]
    fn failure_requires_reset() {
        let mut alg = Halving::new(AlgorithmConfig::default().with_max_iterations(10));
        alg.fail_at = Some(4);
        assert!(matches!(alg.run(10, nop), Err(Error::Domain(_))));
        assert_eq!(alg.status(), Status::Failed);
        assert!(matches!(alg.run(10, nop), Err(Error::Configuration(_))));

        alg.fail_at = None;
        alg.reset();
        assert_eq!(alg.status(), Status::Initialized);
        assert_eq!(alg.solution().sum(), 0.);
        assert_eq!(alg.run(3, nop).unwrap(), Status::Running);
    }

    #[test]
    fn scratch_reuse() {
        let ig = ImageGeometry::new([2]);
        let mut kept = Scratch::new(true);
        let mut buf: DataContainer<f64> = kept.take_or(|| ig.allocate());
        buf.fill(1.);
        kept.give_back(buf);
        assert_eq!(kept.take_or(|| ig.allocate()).sum(), 2.);

        let mut fresh = Scratch::new(false);
        fresh.give_back(ig.allocate_value(1.));
        assert_eq!(fresh.take_or(|| ig.allocate::<f64>()).sum(), 0.);
    }
}
