//! Fixed-architecture networks
//!
//! Every network implements [`Network::apply`]. The classifiers ([`Mlp`],
//! [`ConvNet`]) end in [`log_softmax`], [`DenoisingNet`] is a residual
//! convolution stack and [`IterativeNet`] unrolls gradient-like updates
//! around a forward operator with one learned block per iteration.
//!
//! Only [`Mlp::fit`] trains; the other networks are evaluated with given or
//! randomly initialized weights.

mod conv;
pub use conv::*;

mod dense;
pub use dense::*;

mod iterative;
pub use iterative::*;

use ndarray::prelude::*;
use ndarray::{Dimension, NdFloat};
use ndarray_rand::rand::distributions::uniform::SampleUniform;
use ndarray_rand::rand::Rng;
use ndarray_rand::rand_distr::Uniform;
use ndarray_rand::RandomExt;

use crate::error::{Error, Result};

/// A forward computation `input -> output`.
pub trait Network<A: NdFloat> {
    fn apply(&self, input: ArrayViewD<A>) -> Result<ArrayD<A>>;
}

/// $`x_i - \log\sum_j e^{x_j}`$ along the last axis
///
/// The maximum of each lane is subtracted before exponentiating, so large
/// logits do not overflow.
pub fn log_softmax<A: NdFloat, D: Dimension>(x: ArrayView<A, D>) -> Array<A, D> {
    let mut out = x.to_owned();
    if out.ndim() == 0 {
        return out.mapv_into(|_| A::zero());
    }
    let last = Axis(out.ndim() - 1);
    for mut lane in out.lanes_mut(last) {
        let max = lane.fold(A::neg_infinity(), |m, &v| m.max(v));
        let lse = max + lane.fold(A::zero(), |s, &v| s + (v - max).exp()).ln();
        lane.mapv_inplace(|v| v - lse);
    }
    out
}

pub fn relu<A: NdFloat, D: Dimension>(mut x: Array<A, D>) -> Array<A, D> {
    x.mapv_inplace(|v| v.max(A::zero()));
    x
}

/// Index of the largest entry of every row.
pub fn argmax_rows<A: NdFloat>(x: ArrayView2<A>) -> Array1<usize> {
    x.map_axis(Axis(1), |row| {
        row.indexed_iter()
            .fold((0, A::neg_infinity()), |(bi, bv), (i, &v)| {
                if v > bv {
                    (i, v)
                } else {
                    (bi, bv)
                }
            })
            .0
    })
}

/// Uniform $`[-1/\sqrt{n}, 1/\sqrt{n})`$ weights for fan-in $`n`$.
fn init_uniform<A, Sh, D, R>(shape: Sh, fan_in: usize, rng: &mut R) -> Array<A, D>
where
    A: NdFloat + SampleUniform,
    Sh: ShapeBuilder<Dim = D>,
    D: Dimension,
    R: Rng + ?Sized,
{
    let bound = A::one() / A::from(fan_in.max(1)).unwrap().sqrt();
    Array::random_using(shape, Uniform::new(-bound, bound), rng)
}

/// Views `x` as `(batch, features)`, flattening all trailing axes.
fn flatten_batch<A: NdFloat>(x: ArrayViewD<A>) -> Result<Array2<A>> {
    if x.ndim() == 0 {
        return Err(Error::mismatch("network input", &[1, 1], &[]));
    }
    let batch = x.shape()[0];
    let features = x.shape()[1..].iter().product();
    x.to_owned()
        .into_shape((batch, features))
        .map_err(|_| Error::mismatch("network input", &[batch, features], x.shape()))
}
