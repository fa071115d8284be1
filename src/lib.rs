//! The `ndarray-recon` crate provides the convex optimization core of an
//! iterative image reconstruction toolkit, built on `ndarray`.
//!
//! It includes:
//! - data containers over image geometries, possibly nested in blocks
//! - linear operators: finite differences, gradients, symmetrized
//!   gradients, dense matrices and block operators
//! - proximable functions: L1, squared L2, mixed L2,1, box indicators,
//!   Kullback-Leibler, and their scaled, composed and separable forms
//! - solvers: FISTA, PDHG and CGLS, sharing one resumable run loop
//!
//! A total variation denoising problem
//! $`\min_x \alpha \|\nabla x\|_{2,1} + \frac12 \|x - b\|_2^2`$
//! is posed for PDHG as $`f = \alpha\|\cdot\|_{2,1}`$, $`K = \nabla`$ and
//! $`g = \frac12\|\cdot - b\|_2^2`$.
//!
//! This crate is in the early development stage and is actively changing.
//! The provided methods have been tested, but have not been tuned for
//! maximum performance or minimum memory usage.

#![cfg_attr(all(rustc_nightly, test), feature(test))]
#[cfg(all(rustc_nightly, test))]
extern crate test;

pub mod algorithm;
pub mod error;
pub mod func;
pub mod linop;
pub mod prox;
pub mod smooth;
pub mod space;

pub use error::{Error, Result};

use ndarray::NdFloat;

/// Converts a literal constant to the scalar type
///
/// Every `NdFloat` represents an `f64` approximately, so the `NaN`
/// fallback is never taken.
#[inline]
pub(crate) fn lit<A: NdFloat>(value: f64) -> A {
    num_traits::cast(value).unwrap_or_else(A::nan)
}
