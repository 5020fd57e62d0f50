//! Linear Operators, Adjoints and Operator Norms
//!
//! Every operator maps elements of a domain [`Space`] to elements of a range
//! [`Space`] and knows its adjoint. A [`BroadcastOperator`] stacks several
//! operators with a common domain into one map into a [`ProductSpace`],
//! ```math
//! L(x) = (L_1 x, \dots, L_n x), \qquad L^*(y_1, \dots, y_n) = \sum_i L_i^* y_i
//! ```
//! which is how composite problems such as $`\|x - b\|^2 + \alpha \|\nabla x\|_1`$
//! are handed to the splitting solvers.
//!
//! Step sizes of those solvers depend on $`\|L\|`$, which is estimated by
//! power iteration, see [`power_method_opnorm`].

use ndarray::prelude::*;
use ndarray::{NdFloat, Slice, Zip};

use crate::error::{Error, Result};
use crate::space::{inner, norm, ProductSpace, Space};

/// Default number of power iterations for operator norm estimates.
pub const NORM_ITERATIONS: usize = 20;

/// Factor applied to power-iteration estimates before they are used to pick
/// step sizes. Power iteration approaches the norm from below.
pub const SAFETY_FACTOR: f64 = 1.1;

/// Relative change of the estimate below which power iteration stops early.
const NORM_RTOL: f64 = 1e-10;

pub trait LinearOperator<A: NdFloat> {
    fn domain(&self) -> &Space<A>;

    fn range(&self) -> &Space<A>;

    /// Apply the operator out-place.
    ///
    /// # Panics
    /// if `x` is not an element of [`LinearOperator::domain`].
    fn apply(&self, x: ArrayViewD<A>) -> ArrayD<A>;

    /// Apply the adjoint out-place.
    ///
    /// # Panics
    /// if `y` is not an element of [`LinearOperator::range`].
    fn adjoint(&self, y: ArrayViewD<A>) -> ArrayD<A>;

    /// The adjoint as an operator in its own right.
    fn adj(&self) -> Adjoint<'_, Self>
    where
        Self: Sized,
    {
        Adjoint { op: self }
    }

    /// Power-iteration estimate of the operator norm, see [`power_method_opnorm`].
    fn norm_estimate(&self, seed: ArrayViewD<A>, niter: usize) -> Result<A> {
        self.domain().check(&seed)?;
        power_method_opnorm(|x| self.adjoint(self.apply(x).view()), seed, niter)
    }
}

/// Estimate $`\|L\|`$ by power iteration on the normal operator $`L^*L`$.
///
/// `normal` applies $`L^*L`$. Starting from the normalized `seed`, each step
/// records $`\|Lx\| = \sqrt{\langle x, L^*L x \rangle}`$ for the current unit
/// vector $`x`$ and replaces $`x`$ by the normalized $`L^*Lx`$. Iteration stops
/// after `niter` steps or once the estimate stabilizes.
///
/// The estimate never exceeds the true norm; scale it with [`safe_norm`]
/// before deriving step sizes from it.
///
/// Errors
/// ------
/// [`Error::DegenerateSeed`] if the seed is zero, not finite, or mapped to
/// zero (e.g. a constant seed for a finite difference gradient).
pub fn power_method_opnorm<A: NdFloat>(
    normal: impl Fn(ArrayViewD<A>) -> ArrayD<A>,
    seed: ArrayViewD<A>,
    niter: usize,
) -> Result<A> {
    let seed_norm = norm(&seed);
    if !(seed_norm.is_finite() && seed_norm > A::zero()) {
        return Err(Error::DegenerateSeed);
    }
    let rtol = A::from(NORM_RTOL).unwrap();
    let mut x = seed.mapv(|v| v / seed_norm);
    let mut estimate = A::zero();

    for iter in 0..niter.max(1) {
        let y = normal(x.view());
        let y_norm = norm(&y.view());
        if !(y_norm > A::zero()) {
            return Err(Error::DegenerateSeed);
        }
        let next = inner(&x.view(), &y.view()).max(A::zero()).sqrt();
        let change = (next - estimate).abs();
        estimate = next;
        log::trace!("power iteration {}: ‖L‖ ≈ {:?}", iter, estimate);
        if change <= rtol * estimate {
            break;
        }
        x = y.mapv_into(|v| v / y_norm);
    }
    Ok(estimate)
}

/// `estimate` scaled up by [`SAFETY_FACTOR`].
pub fn safe_norm<A: NdFloat>(estimate: A) -> A {
    estimate * A::from(SAFETY_FACTOR).unwrap()
}

/// Adjoint view of an operator, see [`LinearOperator::adj`].
pub struct Adjoint<'a, O: ?Sized> {
    op: &'a O,
}

impl<'a, A, O> LinearOperator<A> for Adjoint<'a, O>
where
    A: NdFloat,
    O: LinearOperator<A> + ?Sized,
{
    fn domain(&self) -> &Space<A> {
        self.op.range()
    }

    fn range(&self) -> &Space<A> {
        self.op.domain()
    }

    fn apply(&self, x: ArrayViewD<A>) -> ArrayD<A> {
        self.op.adjoint(x)
    }

    fn adjoint(&self, y: ArrayViewD<A>) -> ArrayD<A> {
        self.op.apply(y)
    }
}

#[derive(Clone, Debug)]
pub struct Identity<A> {
    space: Space<A>,
}

impl<A: NdFloat> Identity<A> {
    #[must_use]
    pub fn new(space: Space<A>) -> Identity<A> {
        Identity { space }
    }
}

impl<A: NdFloat> LinearOperator<A> for Identity<A> {
    fn domain(&self) -> &Space<A> {
        &self.space
    }

    fn range(&self) -> &Space<A> {
        &self.space
    }

    #[inline]
    fn apply(&self, x: ArrayViewD<A>) -> ArrayD<A> {
        x.to_owned()
    }

    #[inline]
    fn adjoint(&self, y: ArrayViewD<A>) -> ArrayD<A> {
        y.to_owned()
    }
}

/// Multiplication by a fixed scalar.
#[derive(Clone, Debug)]
pub struct Scaling<A> {
    space: Space<A>,
    factor: A,
}

impl<A: NdFloat> Scaling<A> {
    pub fn new(space: Space<A>, factor: A) -> Self {
        Scaling { space, factor }
    }
}

impl<A: NdFloat> LinearOperator<A> for Scaling<A> {
    fn domain(&self) -> &Space<A> {
        &self.space
    }

    fn range(&self) -> &Space<A> {
        &self.space
    }

    fn apply(&self, x: ArrayViewD<A>) -> ArrayD<A> {
        x.mapv(|v| v * self.factor)
    }

    fn adjoint(&self, y: ArrayViewD<A>) -> ArrayD<A> {
        self.apply(y)
    }
}

/// Pointwise multiplication by a weight array; self-adjoint.
#[derive(Clone, Debug)]
pub struct Diagonal<A> {
    space: Space<A>,
    weights: ArrayD<A>,
}

impl<A: NdFloat> Diagonal<A> {
    pub fn new(weights: ArrayD<A>) -> Self {
        Diagonal {
            space: Space::new(weights.shape()),
            weights,
        }
    }

    pub fn weights(&self) -> ArrayViewD<'_, A> {
        self.weights.view()
    }
}

impl<A: NdFloat> LinearOperator<A> for Diagonal<A> {
    fn domain(&self) -> &Space<A> {
        &self.space
    }

    fn range(&self) -> &Space<A> {
        &self.space
    }

    fn apply(&self, x: ArrayViewD<A>) -> ArrayD<A> {
        &x * &self.weights
    }

    fn adjoint(&self, y: ArrayViewD<A>) -> ArrayD<A> {
        self.apply(y)
    }
}

/// Dense matrix acting on the row-major flattening of domain elements.
///
/// Useful for small projection geometries that are given explicitly as
/// system matrices.
#[derive(Clone, Debug)]
pub struct MatrixOperator<A> {
    matrix: Array2<A>,
    domain: Space<A>,
    range: Space<A>,
}

impl<A: NdFloat> MatrixOperator<A> {
    pub fn new(matrix: Array2<A>, domain: Space<A>, range: Space<A>) -> Result<Self> {
        let (rows, cols) = matrix.dim();
        if cols != domain.size() || rows != range.size() {
            return Err(Error::mismatch(
                "matrix operator",
                &[range.size(), domain.size()],
                &[rows, cols],
            ));
        }
        Ok(MatrixOperator {
            matrix,
            domain,
            range,
        })
    }

    pub fn matrix(&self) -> ArrayView2<'_, A> {
        self.matrix.view()
    }

    fn product(m: ArrayView2<A>, x: ArrayViewD<A>, out: &Space<A>) -> ArrayD<A> {
        let flat: Array1<A> = x.iter().cloned().collect();
        let y = m.dot(&flat);
        let mut res = out.zero();
        res.iter_mut().zip(y.iter()).for_each(|(r, &v)| *r = v);
        res
    }
}

impl<A: NdFloat> LinearOperator<A> for MatrixOperator<A> {
    fn domain(&self) -> &Space<A> {
        &self.domain
    }

    fn range(&self) -> &Space<A> {
        &self.range
    }

    fn apply(&self, x: ArrayViewD<A>) -> ArrayD<A> {
        Self::product(self.matrix.view(), x, &self.range)
    }

    fn adjoint(&self, y: ArrayViewD<A>) -> ArrayD<A> {
        Self::product(self.matrix.t(), y, &self.domain)
    }
}

/// Forward-difference gradient with Neumann boundary conditions
///
/// For a domain of shape $`(n_1, \dots, n_d)`$ the range has shape
/// $`(d, n_1, \dots, n_d)`$, component $`k`$ holding
/// ```math
/// (\nabla x)_k[i] = \frac{x[i + e_k] - x[i]}{h_k}, \qquad i_k < n_k - 1
/// ```
/// and zero on the last slice along axis $`k`$. The adjoint is the negative
/// backward-difference divergence. In 1-D, $`\|\nabla\| < 2/h`$, in $`d`$
/// dimensions $`\|\nabla\|^2 < 4 \sum_k h_k^{-2}`$.
#[derive(Clone, Debug)]
pub struct Gradient<A> {
    domain: Space<A>,
    range: Space<A>,
}

impl<A: NdFloat> Gradient<A> {
    pub fn new(domain: Space<A>) -> Self {
        let mut shape = vec![domain.ndim()];
        shape.extend_from_slice(domain.shape());
        Gradient {
            range: Space::new(&shape),
            domain,
        }
    }
}

impl<A: NdFloat> LinearOperator<A> for Gradient<A> {
    fn domain(&self) -> &Space<A> {
        &self.domain
    }

    fn range(&self) -> &Space<A> {
        &self.range
    }

    fn apply(&self, x: ArrayViewD<A>) -> ArrayD<A> {
        let mut out = self.range.zero();
        for (k, &h) in self.domain.cell_sides().iter().enumerate() {
            let n = x.len_of(Axis(k));
            if n < 2 {
                continue;
            }
            let mut out_k = out.index_axis_mut(Axis(0), k);
            Zip::from(out_k.slice_axis_mut(Axis(k), Slice::from(..n - 1)))
                .and(x.slice_axis(Axis(k), Slice::from(1..)))
                .and(x.slice_axis(Axis(k), Slice::from(..n - 1)))
                .for_each(|o, &hi, &lo| *o = (hi - lo) / h);
        }
        out
    }

    fn adjoint(&self, y: ArrayViewD<A>) -> ArrayD<A> {
        let mut out = self.domain.zero();
        for (k, &h) in self.domain.cell_sides().iter().enumerate() {
            let n = out.len_of(Axis(k));
            if n < 2 {
                continue;
            }
            let p = y.index_axis(Axis(0), k);
            let p = p.slice_axis(Axis(k), Slice::from(..n - 1));
            Zip::from(out.slice_axis_mut(Axis(k), Slice::from(..n - 1)))
                .and(&p)
                .for_each(|o, &v| *o -= v / h);
            Zip::from(out.slice_axis_mut(Axis(k), Slice::from(1..)))
                .and(&p)
                .for_each(|o, &v| *o += v / h);
        }
        out
    }
}

/// Line integrals along one axis, the parallel beam transform for a single
/// axis-aligned direction.
///
/// The range drops `axis` from the domain shape. Broadcasting projections
/// along both axes of an image gives a two-angle tomography problem.
#[derive(Clone, Debug)]
pub struct Projection<A> {
    axis: usize,
    domain: Space<A>,
    range: Space<A>,
}

impl<A: NdFloat> Projection<A> {
    pub fn new(domain: Space<A>, axis: usize) -> Result<Self> {
        if axis >= domain.ndim() {
            return Err(Error::invalid("axis", axis, "must be an axis of the domain"));
        }
        let mut shape = domain.shape().to_vec();
        let mut sides = domain.cell_sides().to_vec();
        shape.remove(axis);
        sides.remove(axis);
        let range = Space::with_cell_sides(&shape, &sides)?;
        Ok(Projection {
            axis,
            domain,
            range,
        })
    }

    pub fn axis(&self) -> usize {
        self.axis
    }
}

impl<A: NdFloat> LinearOperator<A> for Projection<A> {
    fn domain(&self) -> &Space<A> {
        &self.domain
    }

    fn range(&self) -> &Space<A> {
        &self.range
    }

    fn apply(&self, x: ArrayViewD<A>) -> ArrayD<A> {
        let h = self.domain.cell_sides()[self.axis];
        x.sum_axis(Axis(self.axis)).mapv_into(|v| v * h)
    }

    fn adjoint(&self, y: ArrayViewD<A>) -> ArrayD<A> {
        let h = self.domain.cell_sides()[self.axis];
        let smeared = y.mapv(|v| v * h);
        let mut out = self.domain.zero();
        for mut lane in out.axis_iter_mut(Axis(self.axis)) {
            lane.assign(&smeared);
        }
        out
    }
}

/// Several operators on one domain, applied side by side
pub struct BroadcastOperator<A: NdFloat> {
    ops: Vec<Box<dyn LinearOperator<A>>>,
    domain: Space<A>,
    range: ProductSpace<A>,
}

impl<A: NdFloat> BroadcastOperator<A> {
    /// Errors if `ops` is empty or the operators have different domains.
    pub fn new(ops: Vec<Box<dyn LinearOperator<A>>>) -> Result<Self> {
        let domain = match ops.first() {
            Some(op) => op.domain().clone(),
            None => return Err(Error::mismatch("broadcast operator", &[1], &[0])),
        };
        for op in &ops[1..] {
            if op.domain().shape() != domain.shape() {
                return Err(Error::mismatch(
                    "broadcast operator domain",
                    domain.shape(),
                    op.domain().shape(),
                ));
            }
        }
        let range = ProductSpace::new(ops.iter().map(|op| op.range().clone()).collect());
        Ok(BroadcastOperator { ops, domain, range })
    }

    pub fn domain(&self) -> &Space<A> {
        &self.domain
    }

    pub fn range(&self) -> &ProductSpace<A> {
        &self.range
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn operators(&self) -> &[Box<dyn LinearOperator<A>>] {
        &self.ops
    }

    pub fn apply(&self, x: ArrayViewD<A>) -> Vec<ArrayD<A>> {
        self.ops.iter().map(|op| op.apply(x.view())).collect()
    }

    /// $`\sum_i L_i^* y_i`$
    pub fn adjoint(&self, y: &[ArrayD<A>]) -> ArrayD<A> {
        let mut out = self.domain.zero();
        for (op, yi) in self.ops.iter().zip(y) {
            out += &op.adjoint(yi.view());
        }
        out
    }

    /// Estimate of the norm of the stacked operator,
    /// $`\|L\|^2 = \|\sum_i L_i^* L_i\|`$.
    pub fn norm_estimate(&self, seed: ArrayViewD<A>, niter: usize) -> Result<A> {
        self.domain.check(&seed)?;
        power_method_opnorm(
            |x| {
                let mut out = self.domain.zero();
                for op in &self.ops {
                    out += &op.adjoint(op.apply(x.view()).view());
                }
                out
            },
            seed,
            niter,
        )
    }

    /// Norm estimates of every component operator.
    pub fn component_norm_estimates(&self, seed: ArrayViewD<A>, niter: usize) -> Result<Vec<A>> {
        self.ops
            .iter()
            .map(|op| op.norm_estimate(seed.view(), niter))
            .collect()
    }
}


#[cfg(all(rustc_nightly, test))]
mod benches {
    use super::*;
    use test::Bencher;

    #[bench]
    fn gradient_apply_256(b: &mut Bencher) {
        let grad = Gradient::<f64>::new(Space::new(&[256, 256]));
        let x = Array::from_shape_fn(IxDyn(&[256, 256]), |ix| (ix[0] * ix[1]) as f64);
        b.iter(|| grad.apply(x.view()));
    }

    #[bench]
    fn gradient_adjoint_256(b: &mut Bencher) {
        let grad = Gradient::<f64>::new(Space::new(&[256, 256]));
        let y = Array::from_shape_fn(IxDyn(&[2, 256, 256]), |ix| (ix[1] + ix[2]) as f64);
        b.iter(|| grad.adjoint(y.view()));
    }
}
