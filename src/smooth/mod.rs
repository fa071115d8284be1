//! Methods for Smooth Least Squares Objectives
//!
//! For the least squares objective $`f(x) = \|Ax-b\|_2^2`$, the gradient
//! $`\nabla f(x) = 2A^*(Ax - b)`$ is $`L`$-Lipschitz continuous with
//! $`L = 2\sigma_1(A)^2`$, where $`\sigma_1(A)`$ is the largest singular
//! value of $`A`$. Krylov methods such as CGLS exploit the quadratic
//! structure directly and need neither $`L`$ nor a line search.
//!
//! For more info, see [Conjugate gradient method on Wikipedia][cg].
//!
//! [cg]: https://en.wikipedia.org/wiki/Conjugate_gradient_method

mod cgls;
pub use cgls::*;
