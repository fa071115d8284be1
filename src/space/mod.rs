//! Vector Spaces of Images and their Cartesian Products
//!
//! An [`ImageGeometry`] describes the shape and voxel layout of an image,
//! a [`Geometry`] is either an image geometry or a block (tuple) of
//! geometries, and a [`DataContainer`] is an element of such a space.
//! Geometries act as the allocator for every buffer the operators and
//! solvers need.

mod container;
mod geometry;

pub use container::*;
pub use geometry::*;
