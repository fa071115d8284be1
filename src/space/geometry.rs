use std::fmt;

use ndarray::{Array, IxDyn, NdFloat};
use ndarray_rand::rand::Rng;
use ndarray_rand::rand_distr::Uniform;
use ndarray_rand::RandomExt;

use super::DataContainer;
use crate::error::{Error, Result};
use crate::lit;

/// Shape and voxel layout of an image-like element
///
/// Spacing and origin are kept in `f64` whatever the working float type,
/// they only enter the computation through the finite-difference operators.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ImageGeometry {
    shape: Vec<usize>,
    spacing: Vec<f64>,
    origin: Vec<f64>,
}

impl ImageGeometry {
    /// Unit spacing, zero origin
    #[must_use]
    pub fn new(shape: impl Into<Vec<usize>>) -> ImageGeometry {
        let shape = shape.into();
        let ndim = shape.len();
        ImageGeometry {
            shape,
            spacing: vec![1.0; ndim],
            origin: vec![0.0; ndim],
        }
    }

    /// Sets the per-axis voxel size, which must be positive.
    pub fn with_spacing(mut self, spacing: impl Into<Vec<f64>>) -> Result<ImageGeometry> {
        let spacing = spacing.into();
        if spacing.len() != self.ndim() {
            return Err(Error::shape(
                "image spacing",
                format!("{} axes", self.ndim()),
                format!("{} axes", spacing.len()),
            ));
        }
        if spacing.iter().any(|&h| !(h > 0.0) || !h.is_finite()) {
            return Err(Error::config(format!(
                "voxel spacing must be positive and finite, got {:?}",
                spacing
            )));
        }
        self.spacing = spacing;
        Ok(self)
    }

    pub fn with_origin(mut self, origin: impl Into<Vec<f64>>) -> Result<ImageGeometry> {
        let origin = origin.into();
        if origin.len() != self.ndim() {
            return Err(Error::shape(
                "image origin",
                format!("{} axes", self.ndim()),
                format!("{} axes", origin.len()),
            ));
        }
        self.origin = origin;
        Ok(self)
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn spacing(&self) -> &[f64] {
        &self.spacing
    }

    pub fn origin(&self) -> &[f64] {
        &self.origin
    }

    pub fn ndim(&self) -> usize {
        self.shape.len()
    }

    /// Number of voxels
    pub fn size(&self) -> usize {
        self.shape.iter().product()
    }

    /// Zero-filled image of this geometry
    pub fn allocate<A: NdFloat>(&self) -> DataContainer<A> {
        self.allocate_value(A::zero())
    }

    pub fn allocate_value<A: NdFloat>(&self, value: A) -> DataContainer<A> {
        DataContainer::Image {
            array: Array::from_elem(IxDyn(&self.shape), value),
            geometry: self.clone(),
        }
    }

    /// Image with entries drawn uniformly from `[-1, 1)`
    pub fn allocate_random<A: NdFloat, R: Rng + ?Sized>(&self, rng: &mut R) -> DataContainer<A> {
        let array = Array::random_using(IxDyn(&self.shape), Uniform::new(-1.0f64, 1.0), rng);
        DataContainer::Image {
            array: array.mapv(lit),
            geometry: self.clone(),
        }
    }
}

impl fmt::Display for ImageGeometry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "image{:?}", self.shape)
    }
}

/// Geometry of an element of a vector space, possibly a Cartesian product
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Geometry {
    Image(ImageGeometry),
    Block(Vec<Geometry>),
}

impl Geometry {
    pub fn block(items: impl Into<Vec<Geometry>>) -> Geometry {
        Geometry::Block(items.into())
    }

    /// Total number of scalar entries
    pub fn size(&self) -> usize {
        match self {
            Geometry::Image(ig) => ig.size(),
            Geometry::Block(items) => items.iter().map(Geometry::size).sum(),
        }
    }

    pub fn as_image(&self) -> Option<&ImageGeometry> {
        match self {
            Geometry::Image(ig) => Some(ig),
            Geometry::Block(_) => None,
        }
    }

    pub fn as_block(&self) -> Option<&[Geometry]> {
        match self {
            Geometry::Image(_) => None,
            Geometry::Block(items) => Some(items),
        }
    }

    /// Same shapes all the way down; spacing and origin are ignored.
    pub fn is_compatible(&self, other: &Geometry) -> bool {
        match (self, other) {
            (Geometry::Image(a), Geometry::Image(b)) => a.shape == b.shape,
            (Geometry::Block(a), Geometry::Block(b)) => {
                a.len() == b.len() && a.iter().zip(b).all(|(a, b)| a.is_compatible(b))
            }
            _ => false,
        }
    }

    pub fn check_compatible(&self, other: &Geometry, context: &'static str) -> Result<()> {
        if self.is_compatible(other) {
            Ok(())
        } else {
            Err(Error::shape(context, self, other))
        }
    }

    /// Zero-filled element of this geometry
    pub fn allocate<A: NdFloat>(&self) -> DataContainer<A> {
        self.allocate_value(A::zero())
    }

    pub fn allocate_value<A: NdFloat>(&self, value: A) -> DataContainer<A> {
        match self {
            Geometry::Image(ig) => ig.allocate_value(value),
            Geometry::Block(items) => {
                DataContainer::Block(items.iter().map(|g| g.allocate_value(value)).collect())
            }
        }
    }

    pub fn allocate_random<A: NdFloat, R: Rng + ?Sized>(&self, rng: &mut R) -> DataContainer<A> {
        match self {
            Geometry::Image(ig) => ig.allocate_random(rng),
            Geometry::Block(items) => {
                DataContainer::Block(items.iter().map(|g| g.allocate_random(rng)).collect())
            }
        }
    }
}

impl From<ImageGeometry> for Geometry {
    fn from(ig: ImageGeometry) -> Geometry {
        Geometry::Image(ig)
    }
}

impl fmt::Display for Geometry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Geometry::Image(ig) => ig.fmt(f),
            Geometry::Block(items) => {
                write!(f, "block(")?;
                for (i, g) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    g.fmt(f)?;
                }
                write!(f, ")")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocate_block_is_zero() {
        let ig = ImageGeometry::new([3, 4]);
        let bg = Geometry::block([ig.clone().into(), ig.into()]);
        let x = bg.allocate::<f64>();
        assert_eq!(x.size(), 24);
        assert_eq!(x.sum(), 0.);
        assert!(x.geometry().is_compatible(&bg));
    }

    #[test]
    fn compatibility_ignores_spacing() {
        let a: Geometry = ImageGeometry::new([3, 4]).into();
        let b: Geometry = ImageGeometry::new([3, 4])
            .with_spacing([0.5, 2.0])
            .unwrap()
            .into();
        let c: Geometry = ImageGeometry::new([4, 3]).into();
        assert!(a.is_compatible(&b));
        assert!(!a.is_compatible(&c));
        assert!(!a.is_compatible(&Geometry::block([b])));
        assert_eq!(
            a.check_compatible(&c, "test"),
            Err(Error::shape("test", "image[3, 4]", "image[4, 3]"))
        );
    }

    #[test]
    fn bad_spacing() {
        assert!(ImageGeometry::new([3]).with_spacing([1.0, 1.0]).is_err());
        assert!(ImageGeometry::new([3]).with_spacing([0.0]).is_err());
    }
}
