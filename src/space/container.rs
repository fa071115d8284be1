use approx::{AbsDiffEq, RelativeEq};
use ndarray::prelude::*;
use ndarray::{NdFloat, Zip};

use super::{Geometry, ImageGeometry};
use crate::error::{Error, Result};

/// Arrays shorter than this are never split across threads.
#[cfg(feature = "rayon")]
const PARALLEL_LEN: usize = 1 << 14;

/// An element of a (product of) image space(s)
///
/// `Image` holds an n-dimensional array whose shape must equal the shape
/// of its geometry. `Block` holds the slots of an element of a Cartesian
/// product space, e.g. the components of a gradient.
///
/// Methods ending in `_inplace`, `_from` or `_with`, as well as
/// [`axpby`](DataContainer::axpby) and the `fill*` family, overwrite the
/// receiver. Everything else allocates a new container.
#[derive(Clone, Debug, PartialEq)]
pub enum DataContainer<A> {
    Image {
        array: ArrayD<A>,
        geometry: ImageGeometry,
    },
    Block(Vec<DataContainer<A>>),
}

// element-wise kernels, parallel over large arrays when rayon is enabled

fn kernel1<A, F>(out: &mut ArrayD<A>, f: &F)
where
    A: NdFloat,
    F: Fn(&mut A) + Sync + Send,
{
    #[cfg(feature = "rayon")]
    {
        if out.len() >= PARALLEL_LEN {
            Zip::from(out).par_for_each(|o| f(o));
            return;
        }
    }
    Zip::from(out).for_each(|o| f(o));
}

fn kernel2<A, F>(out: &mut ArrayD<A>, a: &ArrayD<A>, f: &F)
where
    A: NdFloat,
    F: Fn(&mut A, A) + Sync + Send,
{
    #[cfg(feature = "rayon")]
    {
        if out.len() >= PARALLEL_LEN {
            Zip::from(out).and(a).par_for_each(|o, &x| f(o, x));
            return;
        }
    }
    Zip::from(out).and(a).for_each(|o, &x| f(o, x));
}

fn kernel3<A, F>(out: &mut ArrayD<A>, a: &ArrayD<A>, b: &ArrayD<A>, f: &F)
where
    A: NdFloat,
    F: Fn(&mut A, A, A) + Sync + Send,
{
    #[cfg(feature = "rayon")]
    {
        if out.len() >= PARALLEL_LEN {
            Zip::from(out)
                .and(a)
                .and(b)
                .par_for_each(|o, &x, &y| f(o, x, y));
            return;
        }
    }
    Zip::from(out).and(a).and(b).for_each(|o, &x, &y| f(o, x, y));
}

/// Runs `f(index, slot)` over the slots of a block, in parallel when
/// rayon is enabled. The first error wins.
pub(crate) fn try_for_each_slot<A, F>(slots: &mut [DataContainer<A>], f: F) -> Result<()>
where
    A: NdFloat,
    F: Fn(usize, &mut DataContainer<A>) -> Result<()> + Sync + Send,
{
    #[cfg(feature = "rayon")]
    {
        use rayon::prelude::*;
        slots
            .par_iter_mut()
            .enumerate()
            .try_for_each(|(i, slot)| f(i, slot))
    }
    #[cfg(not(feature = "rayon"))]
    {
        slots
            .iter_mut()
            .enumerate()
            .try_for_each(|(i, slot)| f(i, slot))
    }
}

impl<A: NdFloat> DataContainer<A> {
    /// Wraps an array, with unit spacing and zero origin
    pub fn from_array<D: Dimension>(array: Array<A, D>) -> DataContainer<A> {
        let array = array.into_dyn();
        let geometry = ImageGeometry::new(array.shape());
        DataContainer::Image { array, geometry }
    }

    pub fn from_array_with_geometry<D: Dimension>(
        array: Array<A, D>,
        geometry: ImageGeometry,
    ) -> Result<DataContainer<A>> {
        let array = array.into_dyn();
        if array.shape() != geometry.shape() {
            return Err(Error::shape(
                "image data",
                &geometry,
                format!("array{:?}", array.shape()),
            ));
        }
        Ok(DataContainer::Image { array, geometry })
    }

    pub fn block(slots: impl Into<Vec<DataContainer<A>>>) -> DataContainer<A> {
        DataContainer::Block(slots.into())
    }

    pub fn geometry(&self) -> Geometry {
        match self {
            DataContainer::Image { geometry, .. } => Geometry::Image(geometry.clone()),
            DataContainer::Block(slots) => {
                Geometry::Block(slots.iter().map(DataContainer::geometry).collect())
            }
        }
    }

    pub fn is_block(&self) -> bool {
        matches!(self, DataContainer::Block(_))
    }

    /// Total number of scalar entries
    pub fn size(&self) -> usize {
        match self {
            DataContainer::Image { array, .. } => array.len(),
            DataContainer::Block(slots) => slots.iter().map(DataContainer::size).sum(),
        }
    }

    pub fn as_array(&self) -> Result<&ArrayD<A>> {
        match self {
            DataContainer::Image { array, .. } => Ok(array),
            DataContainer::Block(_) => Err(Error::shape("image access", "image", self.geometry())),
        }
    }

    pub fn as_array_mut(&mut self) -> Result<&mut ArrayD<A>> {
        match self {
            DataContainer::Image { array, .. } => Ok(array),
            DataContainer::Block(_) => Err(Error::shape("image access", "image", self.geometry())),
        }
    }

    pub fn into_array(self) -> Result<ArrayD<A>> {
        match self {
            DataContainer::Image { array, .. } => Ok(array),
            DataContainer::Block(_) => Err(Error::shape("image access", "image", self.geometry())),
        }
    }

    pub fn slots(&self) -> Result<&[DataContainer<A>]> {
        match self {
            DataContainer::Block(slots) => Ok(slots),
            DataContainer::Image { geometry, .. } => {
                Err(Error::shape("block access", "block", geometry))
            }
        }
    }

    pub fn slots_mut(&mut self) -> Result<&mut [DataContainer<A>]> {
        match self {
            DataContainer::Block(slots) => Ok(slots),
            DataContainer::Image { geometry, .. } => {
                Err(Error::shape("block access", "block", &*geometry))
            }
        }
    }

    pub fn slot(&self, index: usize) -> Result<&DataContainer<A>> {
        let slots = self.slots()?;
        slots.get(index).ok_or_else(|| {
            Error::shape(
                "block access",
                format!("slot index < {}", slots.len()),
                index,
            )
        })
    }

    /// Same array shapes all the way down
    fn same_layout(&self, other: &DataContainer<A>) -> bool {
        match (self, other) {
            (DataContainer::Image { array: a, .. }, DataContainer::Image { array: b, .. }) => {
                a.shape() == b.shape()
            }
            (DataContainer::Block(a), DataContainer::Block(b)) => {
                a.len() == b.len() && a.iter().zip(b).all(|(a, b)| a.same_layout(b))
            }
            _ => false,
        }
    }

    pub fn check_compatible(&self, other: &DataContainer<A>, context: &'static str) -> Result<()> {
        if self.same_layout(other) {
            Ok(())
        } else {
            Err(Error::shape(context, self.geometry(), other.geometry()))
        }
    }

    pub fn check_geometry(&self, geometry: &Geometry, context: &'static str) -> Result<()> {
        if self.matches(geometry) {
            Ok(())
        } else {
            Err(Error::shape(context, geometry, self.geometry()))
        }
    }

    fn matches(&self, geometry: &Geometry) -> bool {
        match (self, geometry) {
            (DataContainer::Image { array, .. }, Geometry::Image(ig)) => {
                array.shape() == ig.shape()
            }
            (DataContainer::Block(slots), Geometry::Block(items)) => {
                slots.len() == items.len() && slots.iter().zip(items).all(|(s, g)| s.matches(g))
            }
            _ => false,
        }
    }

    // recursive drivers, callers have checked the layout

    fn apply1<F>(&mut self, f: &F)
    where
        F: Fn(&mut A) + Sync + Send,
    {
        match self {
            DataContainer::Image { array, .. } => kernel1(array, f),
            DataContainer::Block(slots) => slots.iter_mut().for_each(|s| s.apply1(f)),
        }
    }

    fn apply2<F>(&mut self, a: &DataContainer<A>, f: &F)
    where
        F: Fn(&mut A, A) + Sync + Send,
    {
        match (self, a) {
            (DataContainer::Image { array: o, .. }, DataContainer::Image { array: x, .. }) => {
                kernel2(o, x, f)
            }
            (DataContainer::Block(os), DataContainer::Block(xs)) => {
                os.iter_mut().zip(xs).for_each(|(o, x)| o.apply2(x, f))
            }
            _ => {}
        }
    }

    fn apply3<F>(&mut self, a: &DataContainer<A>, b: &DataContainer<A>, f: &F)
    where
        F: Fn(&mut A, A, A) + Sync + Send,
    {
        match (self, a, b) {
            (
                DataContainer::Image { array: o, .. },
                DataContainer::Image { array: x, .. },
                DataContainer::Image { array: y, .. },
            ) => kernel3(o, x, y, f),
            (DataContainer::Block(os), DataContainer::Block(xs), DataContainer::Block(ys)) => os
                .iter_mut()
                .zip(xs.iter().zip(ys))
                .for_each(|(o, (x, y))| o.apply3(x, y, f)),
            _ => {}
        }
    }

    fn fold2(&self, other: &DataContainer<A>, init: A, f: &impl Fn(A, A, A) -> A) -> A {
        match (self, other) {
            (DataContainer::Image { array: a, .. }, DataContainer::Image { array: b, .. }) => {
                Zip::from(a).and(b).fold(init, |acc, &x, &y| f(acc, x, y))
            }
            (DataContainer::Block(a), DataContainer::Block(b)) => a
                .iter()
                .zip(b)
                .fold(init, |acc, (a, b)| a.fold2(b, acc, f)),
            _ => init,
        }
    }

    fn fold1(&self, init: A, f: &impl Fn(A, A) -> A) -> A {
        match self {
            DataContainer::Image { array, .. } => array.fold(init, |acc, &x| f(acc, x)),
            DataContainer::Block(slots) => slots.iter().fold(init, |acc, s| s.fold1(acc, f)),
        }
    }

    /// Applies `f` to every entry, in place
    pub fn mapv_inplace<F>(&mut self, f: F) -> &mut DataContainer<A>
    where
        F: Fn(A) -> A + Sync + Send,
    {
        self.apply1(&|o: &mut A| *o = f(*o));
        self
    }

    pub fn mapv<F>(&self, f: F) -> DataContainer<A>
    where
        F: Fn(A) -> A + Sync + Send,
    {
        let mut out = self.clone();
        out.mapv_inplace(f);
        out
    }

    /// Overwrites the receiver with `f(src)`
    pub fn map_from<F>(&mut self, src: &DataContainer<A>, f: F) -> Result<()>
    where
        F: Fn(A) -> A + Sync + Send,
    {
        self.check_compatible(src, "map_from")?;
        self.apply2(src, &|o: &mut A, x| *o = f(x));
        Ok(())
    }

    /// Overwrites the receiver with `f(a, b)`
    pub fn zip_map_from<F>(
        &mut self,
        a: &DataContainer<A>,
        b: &DataContainer<A>,
        f: F,
    ) -> Result<()>
    where
        F: Fn(A, A) -> A + Sync + Send,
    {
        self.check_compatible(a, "zip_map_from")?;
        self.check_compatible(b, "zip_map_from")?;
        self.apply3(a, b, &|o: &mut A, x, y| *o = f(x, y));
        Ok(())
    }

    /// Calls `f(&mut self_i, other_i)` for every entry
    pub fn zip_mut_with<F>(&mut self, other: &DataContainer<A>, f: F) -> Result<()>
    where
        F: Fn(&mut A, A) + Sync + Send,
    {
        self.check_compatible(other, "zip_mut_with")?;
        self.apply2(other, &f);
        Ok(())
    }

    /// Calls `f(&mut self_i, a_i, b_i)` for every entry
    pub fn zip2_mut_with<F>(
        &mut self,
        a: &DataContainer<A>,
        b: &DataContainer<A>,
        f: F,
    ) -> Result<()>
    where
        F: Fn(&mut A, A, A) + Sync + Send,
    {
        self.check_compatible(a, "zip2_mut_with")?;
        self.check_compatible(b, "zip2_mut_with")?;
        self.apply3(a, b, &f);
        Ok(())
    }

    /// Overwrites the receiver with `a * x + b * y`
    pub fn axpby(&mut self, a: A, x: &DataContainer<A>, b: A, y: &DataContainer<A>) -> Result<()> {
        self.zip_map_from(x, y, move |x, y| a * x + b * y)
    }

    pub fn fill(&mut self, value: A) -> &mut DataContainer<A> {
        self.apply1(&|o: &mut A| *o = value);
        self
    }

    /// Copies the values of `other` into the receiver
    pub fn fill_from(&mut self, other: &DataContainer<A>) -> Result<()> {
        self.map_from(other, |x| x)
    }

    /// Copies values from a flat slice, in slot order and then
    /// row-major order within each image
    pub fn fill_from_slice(&mut self, values: &[A]) -> Result<()> {
        if values.len() != self.size() {
            return Err(Error::shape("fill_from_slice", self.size(), values.len()));
        }
        self.fill_from_slice_unchecked(values);
        Ok(())
    }

    fn fill_from_slice_unchecked(&mut self, values: &[A]) {
        match self {
            DataContainer::Image { array, .. } => {
                array.iter_mut().zip(values).for_each(|(o, &v)| *o = v)
            }
            DataContainer::Block(slots) => {
                let mut start = 0;
                for s in slots.iter_mut() {
                    let n = s.size();
                    s.fill_from_slice_unchecked(&values[start..start + n]);
                    start += n;
                }
            }
        }
    }

    pub fn fill_from_array<D: Dimension>(&mut self, array: &Array<A, D>) -> Result<()> {
        let target = self.as_array_mut()?;
        if target.shape() != array.shape() {
            return Err(Error::shape(
                "fill_from_array",
                format!("array{:?}", target.shape()),
                format!("array{:?}", array.shape()),
            ));
        }
        target.assign(&array.view().into_dyn());
        Ok(())
    }

    /// Flattens in the order used by [`fill_from_slice`](DataContainer::fill_from_slice)
    pub fn to_vec(&self) -> Vec<A> {
        let mut out = Vec::with_capacity(self.size());
        self.extend_vec(&mut out);
        out
    }

    fn extend_vec(&self, out: &mut Vec<A>) {
        match self {
            DataContainer::Image { array, .. } => out.extend(array.iter().cloned()),
            DataContainer::Block(slots) => slots.iter().for_each(|s| s.extend_vec(out)),
        }
    }

    pub fn add_inplace(&mut self, other: &DataContainer<A>) -> Result<&mut DataContainer<A>> {
        self.zip_mut_with(other, |o, x| *o += x)?;
        Ok(self)
    }

    pub fn sub_inplace(&mut self, other: &DataContainer<A>) -> Result<&mut DataContainer<A>> {
        self.zip_mut_with(other, |o, x| *o -= x)?;
        Ok(self)
    }

    pub fn mul_inplace(&mut self, other: &DataContainer<A>) -> Result<&mut DataContainer<A>> {
        self.zip_mut_with(other, |o, x| *o *= x)?;
        Ok(self)
    }

    pub fn div_inplace(&mut self, other: &DataContainer<A>) -> Result<&mut DataContainer<A>> {
        self.zip_mut_with(other, |o, x| *o /= x)?;
        Ok(self)
    }

    pub fn add(&self, other: &DataContainer<A>) -> Result<DataContainer<A>> {
        let mut out = self.clone();
        out.add_inplace(other)?;
        Ok(out)
    }

    pub fn sub(&self, other: &DataContainer<A>) -> Result<DataContainer<A>> {
        let mut out = self.clone();
        out.sub_inplace(other)?;
        Ok(out)
    }

    pub fn mul(&self, other: &DataContainer<A>) -> Result<DataContainer<A>> {
        let mut out = self.clone();
        out.mul_inplace(other)?;
        Ok(out)
    }

    pub fn div(&self, other: &DataContainer<A>) -> Result<DataContainer<A>> {
        let mut out = self.clone();
        out.div_inplace(other)?;
        Ok(out)
    }

    pub fn add_scalar_inplace(&mut self, value: A) -> &mut DataContainer<A> {
        self.mapv_inplace(move |x| x + value)
    }

    pub fn sub_scalar_inplace(&mut self, value: A) -> &mut DataContainer<A> {
        self.mapv_inplace(move |x| x - value)
    }

    /// Multiplies every entry by `value`, in place
    pub fn scale_inplace(&mut self, value: A) -> &mut DataContainer<A> {
        self.mapv_inplace(move |x| x * value)
    }

    pub fn div_scalar_inplace(&mut self, value: A) -> &mut DataContainer<A> {
        self.mapv_inplace(move |x| x / value)
    }

    pub fn add_scalar(&self, value: A) -> DataContainer<A> {
        self.mapv(move |x| x + value)
    }

    pub fn sub_scalar(&self, value: A) -> DataContainer<A> {
        self.mapv(move |x| x - value)
    }

    pub fn scale(&self, value: A) -> DataContainer<A> {
        self.mapv(move |x| x * value)
    }

    pub fn div_scalar(&self, value: A) -> DataContainer<A> {
        self.mapv(move |x| x / value)
    }

    pub fn abs_inplace(&mut self) -> &mut DataContainer<A> {
        self.mapv_inplace(A::abs)
    }

    pub fn abs(&self) -> DataContainer<A> {
        self.mapv(A::abs)
    }

    /// Euclidean inner product
    pub fn dot(&self, other: &DataContainer<A>) -> Result<A> {
        self.check_compatible(other, "dot")?;
        Ok(self.fold2(other, A::zero(), &|acc, x, y| acc + x * y))
    }

    /// Folds over all entries, in slot order and then row-major order
    pub fn fold<F>(&self, init: A, f: F) -> A
    where
        F: Fn(A, A) -> A,
    {
        self.fold1(init, &f)
    }

    /// Folds `f(acc, self_i, other_i)` over pairs of entries
    pub fn zip_fold<F>(&self, other: &DataContainer<A>, init: A, f: F) -> Result<A>
    where
        F: Fn(A, A, A) -> A,
    {
        self.check_compatible(other, "zip_fold")?;
        Ok(self.fold2(other, init, &f))
    }

    pub fn sum(&self) -> A {
        self.fold1(A::zero(), &|acc, x| acc + x)
    }

    pub fn squared_norm(&self) -> A {
        self.fold1(A::zero(), &|acc, x| acc + x * x)
    }

    /// Euclidean norm
    pub fn norm(&self) -> A {
        self.squared_norm().sqrt()
    }

    /// Largest absolute entry
    pub fn norm_max(&self) -> A {
        self.fold1(A::zero(), &|acc, x| acc.max(x.abs()))
    }

    pub fn norm_l1(&self) -> A {
        self.fold1(A::zero(), &|acc, x| acc + x.abs())
    }
}

impl<A> AbsDiffEq for DataContainer<A>
where
    A: NdFloat + AbsDiffEq<Epsilon = A>,
{
    type Epsilon = A;

    fn default_epsilon() -> A {
        A::default_epsilon()
    }

    fn abs_diff_eq(&self, other: &DataContainer<A>, epsilon: A) -> bool {
        match (self, other) {
            (DataContainer::Image { array: a, .. }, DataContainer::Image { array: b, .. }) => {
                a.abs_diff_eq(b, epsilon)
            }
            (DataContainer::Block(a), DataContainer::Block(b)) => {
                a.len() == b.len() && a.iter().zip(b).all(|(a, b)| a.abs_diff_eq(b, epsilon))
            }
            _ => false,
        }
    }
}

impl<A> RelativeEq for DataContainer<A>
where
    A: NdFloat + RelativeEq<Epsilon = A>,
{
    fn default_max_relative() -> A {
        A::default_max_relative()
    }

    fn relative_eq(&self, other: &DataContainer<A>, epsilon: A, max_relative: A) -> bool {
        match (self, other) {
            (DataContainer::Image { array: a, .. }, DataContainer::Image { array: b, .. }) => {
                a.relative_eq(b, epsilon, max_relative)
            }
            (DataContainer::Block(a), DataContainer::Block(b)) => {
                a.len() == b.len()
                    && a
                        .iter()
                        .zip(b)
                        .all(|(a, b)| a.relative_eq(b, epsilon, max_relative))
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn image(a: Array2<f64>) -> DataContainer<f64> {
        DataContainer::from_array(a)
    }

    #[test]
    fn pairwise_arithmetic() {
        let x = image(array![[1., 2.], [3., 4.]]);
        let y = image(array![[2., 2.], [2., 2.]]);
        assert_eq!(x.add(&y).unwrap(), image(array![[3., 4.], [5., 6.]]));
        assert_eq!(x.sub(&y).unwrap(), image(array![[-1., 0.], [1., 2.]]));
        assert_eq!(x.mul(&y).unwrap(), image(array![[2., 4.], [6., 8.]]));
        assert_eq!(x.div(&y).unwrap(), image(array![[0.5, 1.], [1.5, 2.]]));
        assert_eq!(x.scale(2.), x.mul(&y).unwrap());
        assert_eq!(x.dot(&y).unwrap(), 20.);
    }

    #[test]
    fn inplace_mutates_receiver() {
        let mut x = image(array![[1., -2.], [3., -4.]]);
        let y = image(array![[1., 1.], [1., 1.]]);
        x.add_inplace(&y).unwrap().scale_inplace(2.).abs_inplace();
        assert_eq!(x, image(array![[4., 2.], [8., 6.]]));

        x.axpby(1., &y, -1., &y).unwrap();
        assert_eq!(x.sum(), 0.);

        let mut z = image(array![[1., 2.], [3., 4.]]);
        let w = image(array![[0., 1.], [2., 3.]]);
        z.zip2_mut_with(&y, &w, |z, y, w| *z = *z * w + y).unwrap();
        assert_eq!(z, image(array![[1., 3.], [7., 13.]]));
        assert!(z.zip2_mut_with(&y, &image(Array2::zeros((1, 2))), |_, _, _| ()).is_err());
    }

    #[test]
    fn shape_mismatch() {
        let mut x = image(Array2::zeros((2, 3)));
        let y = image(Array2::zeros((3, 2)));
        let before = x.clone();
        assert!(matches!(x.add(&y), Err(Error::ShapeMismatch { .. })));
        assert!(matches!(x.add_inplace(&y), Err(Error::ShapeMismatch { .. })));
        assert!(matches!(x.dot(&y), Err(Error::ShapeMismatch { .. })));
        assert_eq!(x, before);

        let b = DataContainer::block([x.clone(), x.clone()]);
        assert!(matches!(b.dot(&x), Err(Error::ShapeMismatch { .. })));
    }

    #[test]
    fn norms() {
        let x = image(array![[3., -4.], [0., 0.]]);
        assert_abs_diff_eq!(x.norm(), 5.);
        assert_abs_diff_eq!(x.squared_norm(), 25.);
        assert_abs_diff_eq!(x.norm_max(), 4.);
        assert_abs_diff_eq!(x.norm_l1(), 7.);

        let b = DataContainer::block([x.clone(), x]);
        assert_abs_diff_eq!(b.squared_norm(), 50.);
        assert_abs_diff_eq!(b.norm_max(), 4.);
    }

    #[test]
    fn flatten_roundtrip_order() {
        let mut b = DataContainer::<f64>::block([
            image(Array2::zeros((2, 2))),
            image(Array2::zeros((1, 3))),
        ]);
        let values: Vec<f64> = (0..7).map(f64::from).collect();
        b.fill_from_slice(&values).unwrap();
        assert_eq!(b.slot(0).unwrap().as_array().unwrap()[[1, 0]], 2.);
        assert_eq!(b.slot(1).unwrap().as_array().unwrap()[[0, 2]], 6.);
        assert_eq!(b.to_vec(), values);
        assert!(b.fill_from_slice(&values[1..]).is_err());
    }

    #[test]
    fn fill_variants() {
        let mut x = image(Array2::zeros((2, 2)));
        x.fill(3.);
        assert_eq!(x.sum(), 12.);
        x.fill_from_array(&array![[1., 2.], [3., 4.]]).unwrap();
        assert_eq!(x.sum(), 10.);
        assert!(x.fill_from_array(&array![1., 2.]).is_err());
    }

    #[test]
    fn geometry_must_match_array() {
        let ig = ImageGeometry::new([2, 3]);
        let wrong = Array2::<f64>::zeros((3, 2));
        assert!(DataContainer::from_array_with_geometry(wrong, ig.clone()).is_err());
        let right = Array2::<f64>::zeros((2, 3));
        let x = DataContainer::from_array_with_geometry(right, ig.clone()).unwrap();
        assert_eq!(x.geometry(), Geometry::Image(ig));
    }

    #[cfg(feature = "rayon")]
    #[test]
    fn large_arrays_match_serial_formula() {
        let n = 300;
        let x = image(Array2::from_shape_fn((n, n), |(i, j)| (i * n + j) as f64));
        let y = x.mapv(|v| v.sin());
        let mut out = x.clone();
        out.axpby(0.5, &x, -2., &y).unwrap();
        for ((o, &a), &b) in out
            .as_array()
            .unwrap()
            .iter()
            .zip(x.as_array().unwrap())
            .zip(y.as_array().unwrap())
        {
            assert_eq!(*o, 0.5 * a - 2. * b);
        }
    }
}
