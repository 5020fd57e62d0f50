use std::sync::Arc;

use ndarray::prelude::*;
use ndarray::{stack, NdFloat};

use super::Network;
use crate::error::{Error, Result};
use crate::linop::LinearOperator;

/// Unrolled reconstruction with one learned block per iteration
///
/// Starting from $`x_0 = B y`$ with the initializer $`B`$ (the adjoint
/// $`A^*`$ by default), every block sees the current image and the data
/// gradient as two channels and returns an update,
/// ```math
/// x_{k+1} = x_k + \Lambda_k\big([x_k, A^*(A x_k - y)]\big).
/// ```
/// Blocks receive a `(1, 2, height, width)` batch and must return
/// `(1, 1, height, width)`.
pub struct IterativeNet<A: NdFloat> {
    blocks: Vec<Box<dyn Network<A>>>,
    op: Arc<dyn LinearOperator<A>>,
    initializer: Option<Arc<dyn LinearOperator<A>>>,
}

impl<A: NdFloat> IterativeNet<A> {
    /// **Errors**
    /// - The operator domain is not 2-D.
    /// - The initializer does not map the operator range to its domain.
    pub fn new(
        op: Arc<dyn LinearOperator<A>>,
        blocks: Vec<Box<dyn Network<A>>>,
        initializer: Option<Arc<dyn LinearOperator<A>>>,
    ) -> Result<Self> {
        if op.domain().ndim() != 2 {
            return Err(Error::mismatch(
                "iterative net image domain",
                &[2],
                &[op.domain().ndim()],
            ));
        }
        if let Some(init) = &initializer {
            if init.domain().shape() != op.range().shape() {
                return Err(Error::mismatch(
                    "iterative net initializer domain",
                    op.range().shape(),
                    init.domain().shape(),
                ));
            }
            if init.range().shape() != op.domain().shape() {
                return Err(Error::mismatch(
                    "iterative net initializer range",
                    op.domain().shape(),
                    init.range().shape(),
                ));
            }
        }
        Ok(IterativeNet {
            blocks,
            op,
            initializer,
        })
    }

    pub fn blocks(&self) -> &[Box<dyn Network<A>>] {
        &self.blocks
    }

    pub fn operator(&self) -> &Arc<dyn LinearOperator<A>> {
        &self.op
    }

    /// Number of unrolled iterations.
    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn reconstruct(&self, y: ArrayViewD<A>) -> Result<ArrayD<A>> {
        self.op.range().check(&y)?;
        let mut x = match &self.initializer {
            Some(init) => init.apply(y.view()),
            None => self.op.adjoint(y.view()),
        };
        let image = self.op.domain().shape().to_vec();
        let (h, w) = (image[0], image[1]);

        for (k, block) in self.blocks.iter().enumerate() {
            let mut residual = self.op.apply(x.view());
            residual -= &y;
            let grad = self.op.adjoint(residual.view());
            let input = stack(Axis(0), &[x.view(), grad.view()])
                .map_err(|_| Error::mismatch("iterative net block input", &image, grad.shape()))?
                .into_shape((1, 2, h, w))
                .map_err(|_| Error::mismatch("iterative net block input", &[1, 2, h, w], &[]))?;
            let update = block.apply(input.into_dyn().view())?;
            if update.shape() != [1, 1, h, w] {
                return Err(Error::mismatch(
                    "iterative net block output",
                    &[1, 1, h, w],
                    update.shape(),
                ));
            }
            x += &update.into_shape(IxDyn(&image)).map_err(|_| {
                Error::mismatch("iterative net block output", &image, &[])
            })?;
            log::trace!("iterative net block {} applied", k);
        }
        Ok(x)
    }
}

impl<A: NdFloat> Network<A> for IterativeNet<A> {
    fn apply(&self, input: ArrayViewD<A>) -> Result<ArrayD<A>> {
        self.reconstruct(input)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::linop::{Diagonal, Identity, Projection};
    use crate::nn::Conv2d;
    use crate::space::Space;
    use approx::assert_abs_diff_eq;

    /// 1x1 convolution computing `-step * gradient`
    fn gradient_step(step: f64) -> Box<dyn Network<f64>> {
        let weight = Array::from_shape_vec((1, 2, 1, 1), vec![0., -step]).unwrap();
        Box::new(Conv2d::new(weight, array![0.], 0).unwrap())
    }

    #[test]
    fn blocks_can_be_gradient_descent() {
        let weights = array![[1., 2., 0.5], [1.5, 1., 2.]].into_dyn();
        let op: Arc<dyn LinearOperator<f64>> = Arc::new(Diagonal::new(weights.clone()));
        let y = array![[1., -1., 2.], [0.5, 3., 1.]].into_dyn();
        let step = 0.2;
        let net = IterativeNet::new(op, (0..5).map(|_| gradient_step(step)).collect(), None)
            .unwrap();
        assert_eq!(net.len(), 5);

        let mut expected = &y * &weights;
        for _ in 0..5 {
            let grad = &weights * &(&weights * &expected - &y);
            expected.scaled_add(-step, &grad);
        }
        let x = net.apply(y.view()).unwrap();
        assert_abs_diff_eq!(x, expected, epsilon = 1e-12);
    }

    #[test]
    fn initializer_and_validation() {
        let space = Space::new(&[3, 4]);
        let op: Arc<dyn LinearOperator<f64>> = Arc::new(Identity::new(space.clone()));
        let init: Arc<dyn LinearOperator<f64>> =
            Arc::new(crate::linop::Scaling::new(space.clone(), 2.));
        let net = IterativeNet::new(op.clone(), Vec::new(), Some(init)).unwrap();
        assert!(net.is_empty());
        let y = space.one();
        assert_eq!(net.reconstruct(y.view()).unwrap(), y.mapv(|v| 2. * v));
        assert!(net.reconstruct(Space::<f64>::new(&[4, 3]).one().view()).is_err());

        let line: Arc<dyn LinearOperator<f64>> = Arc::new(Identity::new(Space::new(&[5])));
        assert!(IterativeNet::new(line, Vec::new(), None).is_err());

        let proj: Arc<dyn LinearOperator<f64>> = Arc::new(Projection::new(space, 0).unwrap());
        assert!(IterativeNet::new(proj, Vec::new(), Some(op)).is_err());
    }

    #[test]
    fn block_output_shape_is_checked() {
        let op: Arc<dyn LinearOperator<f64>> = Arc::new(Identity::new(Space::new(&[2, 2])));
        let two_channels = Conv2d::new(Array4::zeros((2, 2, 1, 1)), array![0., 0.], 0).unwrap();
        let net = IterativeNet::new(op, vec![Box::new(two_channels) as Box<dyn Network<f64>>], None)
            .unwrap();
        assert!(matches!(
            net.apply(Array::zeros(IxDyn(&[2, 2])).view()),
            Err(Error::DimensionMismatch { .. })
        ));
    }
}
