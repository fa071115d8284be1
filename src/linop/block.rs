use std::fmt;

use ndarray::NdFloat;

use super::{check_io, LinearOperator, NormCache};
use crate::error::{Error, Result};
use crate::space::{try_for_each_slot, DataContainer, Geometry};

/// A `rows x cols` matrix of linear operators
///
/// ```math
/// K = \begin{pmatrix} K_{00} & \cdots & K_{0,c-1} \\
///                     \vdots &        & \vdots \\
///                     K_{r-1,0} & \cdots & K_{r-1,c-1} \end{pmatrix},
/// \qquad (Kx)_i = \sum_j K_{ij} x_j
/// ```
///
/// All entries of a column share a domain and all entries of a row share
/// a range. The domain is the block of column domains and the range the
/// block of row ranges, except that a single column (row) acts on (maps
/// to) a plain element rather than a one-slot block.
///
/// Entries reporting [`LinearOperator::is_zero`] are skipped. Rows are
/// evaluated in parallel when rayon is enabled, and so are the columns of
/// the adjoint.
pub struct BlockOperator<A> {
    rows: usize,
    cols: usize,
    /// row-major
    ops: Vec<Box<dyn LinearOperator<A>>>,
    domains: Vec<Geometry>,
    ranges: Vec<Geometry>,
    norm: NormCache<A>,
}

/// Collects the entries of a [`BlockOperator`] in row-major order
pub struct BlockOperatorBuilder<A> {
    rows: usize,
    cols: usize,
    ops: Vec<Box<dyn LinearOperator<A>>>,
}

impl<A: NdFloat> BlockOperatorBuilder<A> {
    #[must_use]
    pub fn push<K>(mut self, op: K) -> BlockOperatorBuilder<A>
    where
        K: LinearOperator<A> + 'static,
    {
        self.ops.push(Box::new(op));
        self
    }

    pub fn build(self) -> Result<BlockOperator<A>> {
        BlockOperator::new((self.rows, self.cols), self.ops)
    }
}

impl<A: NdFloat> BlockOperator<A> {
    /// Block operator from its entries in row-major order
    pub fn new(
        shape: (usize, usize),
        ops: Vec<Box<dyn LinearOperator<A>>>,
    ) -> Result<BlockOperator<A>> {
        let (rows, cols) = shape;
        if rows == 0 || cols == 0 {
            return Err(Error::config(format!(
                "block operator needs at least one row and one column, got {}x{}",
                rows, cols
            )));
        }
        if ops.len() != rows * cols {
            return Err(Error::config(format!(
                "a {}x{} block operator takes {} entries, got {}",
                rows,
                cols,
                rows * cols,
                ops.len()
            )));
        }

        let domains: Vec<Geometry> = ops[..cols].iter().map(|op| op.domain_geometry()).collect();
        let ranges: Vec<Geometry> = ops
            .iter()
            .step_by(cols)
            .map(|op| op.range_geometry())
            .collect();
        for (k, op) in ops.iter().enumerate() {
            let (r, c) = (k / cols, k % cols);
            domains[c].check_compatible(&op.domain_geometry(), "block operator column domain")?;
            ranges[r].check_compatible(&op.range_geometry(), "block operator row range")?;
        }

        Ok(BlockOperator {
            rows,
            cols,
            ops,
            domains,
            ranges,
            norm: NormCache::new(),
        })
    }

    #[must_use]
    pub fn builder(rows: usize, cols: usize) -> BlockOperatorBuilder<A> {
        BlockOperatorBuilder {
            rows,
            cols,
            ops: Vec::with_capacity(rows * cols),
        }
    }

    pub fn shape(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }

    pub fn get(&self, row: usize, col: usize) -> Option<&dyn LinearOperator<A>> {
        if row < self.rows && col < self.cols {
            Some(self.ops[row * self.cols + col].as_ref())
        } else {
            None
        }
    }

    fn entry(&self, row: usize, col: usize) -> &dyn LinearOperator<A> {
        self.ops[row * self.cols + col].as_ref()
    }

    /// `out = sum_j K_{row,j} x_j`
    fn apply_row(
        &self,
        row: usize,
        xs: &[DataContainer<A>],
        out: &mut DataContainer<A>,
    ) -> Result<()> {
        let mut written = false;
        let mut scratch: Option<DataContainer<A>> = None;
        for (col, x) in xs.iter().enumerate() {
            let op = self.entry(row, col);
            if op.is_zero() {
                continue;
            }
            if !written {
                op.direct_into(x, out)?;
                written = true;
            } else {
                let buf = scratch.get_or_insert_with(|| self.ranges[row].allocate());
                op.direct_into(x, buf)?;
                out.add_inplace(buf)?;
            }
        }
        if !written {
            out.fill(A::zero());
        }
        Ok(())
    }

    /// `out = sum_i K_{i,col}^* y_i`
    fn apply_column(
        &self,
        col: usize,
        ys: &[DataContainer<A>],
        out: &mut DataContainer<A>,
    ) -> Result<()> {
        let mut written = false;
        let mut scratch: Option<DataContainer<A>> = None;
        for (row, y) in ys.iter().enumerate() {
            let op = self.entry(row, col);
            if op.is_zero() {
                continue;
            }
            if !written {
                op.adjoint_into(y, out)?;
                written = true;
            } else {
                let buf = scratch.get_or_insert_with(|| self.domains[col].allocate());
                op.adjoint_into(y, buf)?;
                out.add_inplace(buf)?;
            }
        }
        if !written {
            out.fill(A::zero());
        }
        Ok(())
    }
}

/// Sums `part(entry)` over the non-zero entries of one row or column.
fn sum_parts<'a, A, I, F>(entries: I, zero: &Geometry, part: F) -> Result<DataContainer<A>>
where
    A: NdFloat,
    I: Iterator<Item = &'a dyn LinearOperator<A>>,
    F: Fn(&dyn LinearOperator<A>) -> Result<DataContainer<A>>,
{
    let mut total: Option<DataContainer<A>> = None;
    for op in entries.filter(|op| !op.is_zero()) {
        let sums = part(op)?;
        match total.as_mut() {
            Some(total) => {
                total.add_inplace(&sums)?;
            }
            None => total = Some(sums),
        }
    }
    Ok(total.unwrap_or_else(|| zero.allocate()))
}

/// Unwraps a single slot, the counterpart of [`as_slots`].
fn from_slots<A: NdFloat>(mut slots: Vec<DataContainer<A>>) -> DataContainer<A> {
    if slots.len() == 1 {
        if let Some(only) = slots.pop() {
            return only;
        }
    }
    DataContainer::Block(slots)
}

/// Views a single-slot side as a one-element slice of slots.
fn as_slots<A: NdFloat>(x: &DataContainer<A>, single: bool) -> Result<&[DataContainer<A>]> {
    if single {
        Ok(std::slice::from_ref(x))
    } else {
        x.slots()
    }
}

fn as_slots_mut<A: NdFloat>(
    x: &mut DataContainer<A>,
    single: bool,
) -> Result<&mut [DataContainer<A>]> {
    if single {
        Ok(std::slice::from_mut(x))
    } else {
        x.slots_mut()
    }
}

impl<A: NdFloat> LinearOperator<A> for BlockOperator<A> {
    fn domain_geometry(&self) -> Geometry {
        if self.cols == 1 {
            self.domains[0].clone()
        } else {
            Geometry::Block(self.domains.clone())
        }
    }

    fn range_geometry(&self) -> Geometry {
        if self.rows == 1 {
            self.ranges[0].clone()
        } else {
            Geometry::Block(self.ranges.clone())
        }
    }

    fn direct_into(&self, x: &DataContainer<A>, out: &mut DataContainer<A>) -> Result<()> {
        check_io(x, &self.domain_geometry(), out, &self.range_geometry(), "block operator")?;
        let xs = as_slots(x, self.cols == 1)?;
        try_for_each_slot(as_slots_mut(out, self.rows == 1)?, |row, out| {
            self.apply_row(row, xs, out)
        })
    }

    fn adjoint_into(&self, y: &DataContainer<A>, out: &mut DataContainer<A>) -> Result<()> {
        check_io(
            y,
            &self.range_geometry(),
            out,
            &self.domain_geometry(),
            "block operator adjoint",
        )?;
        let ys = as_slots(y, self.rows == 1)?;
        try_for_each_slot(as_slots_mut(out, self.cols == 1)?, |col, out| {
            self.apply_column(col, ys, out)
        })
    }

    fn norm(&self) -> Result<A> {
        self.norm
            .get_or_try_init(|| super::power_method(self, super::POWER_ITERATIONS))
    }

    fn is_zero(&self) -> bool {
        self.ops.iter().all(|op| op.is_zero())
    }

    fn sum_abs_row(&self) -> Result<DataContainer<A>> {
        let columns = (0..self.cols)
            .map(|col| {
                let entries = (0..self.rows).map(|row| self.entry(row, col));
                sum_parts(entries, &self.domains[col], |op| op.sum_abs_row())
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(from_slots(columns))
    }

    fn sum_abs_col(&self) -> Result<DataContainer<A>> {
        let rows = (0..self.rows)
            .map(|row| {
                let entries = (0..self.cols).map(|col| self.entry(row, col));
                sum_parts(entries, &self.ranges[row], |op| op.sum_abs_col())
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(from_slots(rows))
    }
}

impl<A> fmt::Debug for BlockOperator<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlockOperator")
            .field("shape", &(self.rows, self.cols))
            .field("domains", &self.domains)
            .field("ranges", &self.ranges)
            .finish()
    }
}
