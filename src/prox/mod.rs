//! Minimization for Composite Functions consisting of
//! a smooth or operator-composed _f_ and a non-smooth prox-friendly _g_
//!
//! This includes common reconstruction objectives such as the LASSO,
//! total variation and TGV denoising, as well as constrained methods,
//! as a projection is the proximal operator of a constraint set.

mod fista;
pub use fista::*;

mod pdhg;
pub use pdhg::*;
