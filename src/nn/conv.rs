use ndarray::prelude::*;
use ndarray::NdFloat;
use ndarray_rand::rand::distributions::uniform::SampleUniform;
use ndarray_rand::rand::rngs::StdRng;
use ndarray_rand::rand::SeedableRng;

use super::{init_uniform, log_softmax, relu, Dense, Network};
use crate::error::{Error, Result};

/// 2-D convolution (cross-correlation) with stride 1 and zero padding
///
/// Input shape `(batch, in_channels, height, width)`, output shape
/// `(batch, out_channels, height + 2p - k + 1, width + 2p - k + 1)`.
#[derive(Clone, Debug)]
pub struct Conv2d<A> {
    /// shape `(out_channels, in_channels, k, k)`
    weight: Array4<A>,
    bias: Array1<A>,
    padding: usize,
}

impl<A: NdFloat> Conv2d<A> {
    pub fn new(weight: Array4<A>, bias: Array1<A>, padding: usize) -> Result<Self> {
        let (out_channels, _, kh, kw) = weight.dim();
        if kh != kw {
            return Err(Error::mismatch("conv2d kernel", &[kh, kh], &[kh, kw]));
        }
        if bias.len() != out_channels {
            return Err(Error::mismatch("conv2d bias", &[out_channels], &[bias.len()]));
        }
        Ok(Conv2d {
            weight,
            bias,
            padding,
        })
    }

    /// Kernel of size `k` padded by `k / 2`, which keeps odd-sized images
    /// the same size.
    pub fn random(in_channels: usize, out_channels: usize, k: usize, rng: &mut StdRng) -> Self
    where
        A: SampleUniform,
    {
        let fan_in = in_channels * k * k;
        Conv2d {
            weight: init_uniform((out_channels, in_channels, k, k), fan_in, rng),
            bias: init_uniform(out_channels, fan_in, rng),
            padding: k / 2,
        }
    }

    pub fn in_channels(&self) -> usize {
        self.weight.len_of(Axis(1))
    }

    pub fn out_channels(&self) -> usize {
        self.weight.len_of(Axis(0))
    }

    pub fn kernel_size(&self) -> usize {
        self.weight.len_of(Axis(2))
    }

    pub fn weight(&self) -> ArrayView4<'_, A> {
        self.weight.view()
    }

    pub fn weight_mut(&mut self) -> ArrayViewMut4<'_, A> {
        self.weight.view_mut()
    }

    pub fn output_size(&self, size: usize) -> Option<usize> {
        (size + 2 * self.padding + 1).checked_sub(self.kernel_size())
    }

    pub fn forward(&self, x: ArrayView4<A>) -> Result<Array4<A>> {
        let (batch, channels, h, w) = x.dim();
        if channels != self.in_channels() {
            return Err(Error::mismatch(
                "conv2d channels",
                &[self.in_channels()],
                &[channels],
            ));
        }
        let (oh, ow) = match (self.output_size(h), self.output_size(w)) {
            (Some(oh), Some(ow)) if oh > 0 && ow > 0 => (oh, ow),
            _ => {
                return Err(Error::mismatch(
                    "conv2d image size",
                    &[self.kernel_size(), self.kernel_size()],
                    &[h + 2 * self.padding, w + 2 * self.padding],
                ))
            }
        };
        let p = self.padding;
        let mut padded = Array4::zeros((batch, channels, h + 2 * p, w + 2 * p));
        padded.slice_mut(s![.., .., p..p + h, p..p + w]).assign(&x);

        let k = self.kernel_size();
        let mut out = Array4::zeros((batch, self.out_channels(), oh, ow));
        for (mut out_b, in_b) in out.outer_iter_mut().zip(padded.outer_iter()) {
            for (o, mut out_o) in out_b.outer_iter_mut().enumerate() {
                out_o.fill(self.bias[o]);
                for (i, in_i) in in_b.outer_iter().enumerate() {
                    for dy in 0..k {
                        for dx in 0..k {
                            let wv = self.weight[[o, i, dy, dx]];
                            if wv != A::zero() {
                                out_o.scaled_add(wv, &in_i.slice(s![dy..dy + oh, dx..dx + ow]));
                            }
                        }
                    }
                }
            }
        }
        Ok(out)
    }
}

impl<A: NdFloat> Network<A> for Conv2d<A> {
    fn apply(&self, input: ArrayViewD<A>) -> Result<ArrayD<A>> {
        Ok(self.forward(as_images(input)?)?.into_dyn())
    }
}

fn as_images<A>(input: ArrayViewD<A>) -> Result<ArrayView4<A>> {
    let shape = input.shape().to_vec();
    input
        .into_dimensionality::<Ix4>()
        .map_err(|_| Error::mismatch("image batch (batch, channels, height, width)", &[4], &[shape.len()]))
}

/// Maximum over non-overlapping `size x size` windows; trailing rows and
/// columns that do not fill a window are dropped.
pub fn max_pool2d<A: NdFloat>(x: ArrayView4<A>, size: usize) -> Array4<A> {
    let (batch, channels, h, w) = x.dim();
    let (oh, ow) = if size == 0 { (0, 0) } else { (h / size, w / size) };
    let mut out = Array4::from_elem((batch, channels, oh, ow), A::neg_infinity());
    for ((b, c, i, j), o) in out.indexed_iter_mut() {
        let window = x.slice(s![b, c, i * size..(i + 1) * size, j * size..(j + 1) * size]);
        *o = window.fold(A::neg_infinity(), |m, &v| m.max(v));
    }
    out
}

/// Convolution blocks (conv, ReLU, 2x2 max pooling) followed by a dense
/// classifier head with log-probabilities out
#[derive(Clone, Debug)]
pub struct ConvNet<A> {
    convs: Vec<Conv2d<A>>,
    head: Dense<A>,
}

impl<A: NdFloat> ConvNet<A> {
    pub fn new(convs: Vec<Conv2d<A>>, head: Dense<A>) -> Result<Self> {
        for pair in convs.windows(2) {
            if pair[0].out_channels() != pair[1].in_channels() {
                return Err(Error::mismatch(
                    "convnet channels",
                    &[pair[0].out_channels()],
                    &[pair[1].in_channels()],
                ));
            }
        }
        Ok(ConvNet { convs, head })
    }

    /// `channels = [in, c_1, .., c_n]` with `k x k` kernels on square images
    /// of side `image_size`.
    pub fn random(
        channels: &[usize],
        k: usize,
        image_size: usize,
        classes: usize,
        seed: u64,
    ) -> Result<Self>
    where
        A: SampleUniform,
    {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut side = image_size;
        let mut convs = Vec::new();
        for pair in channels.windows(2) {
            let conv = Conv2d::random(pair[0], pair[1], k, &mut rng);
            side = conv.output_size(side).unwrap_or(0) / 2;
            convs.push(conv);
        }
        if side == 0 {
            return Err(Error::invalid(
                "image_size",
                image_size,
                "too small for the convolution blocks",
            ));
        }
        let features = channels.last().copied().unwrap_or(0) * side * side;
        let head = Dense::random(features, classes, &mut rng);
        Self::new(convs, head)
    }
}

impl<A: NdFloat> Network<A> for ConvNet<A> {
    fn apply(&self, input: ArrayViewD<A>) -> Result<ArrayD<A>> {
        let mut x = as_images(input)?.to_owned();
        for conv in &self.convs {
            x = max_pool2d(relu(conv.forward(x.view())?).view(), 2);
        }
        let logits = self.head.apply(x.into_dyn().view())?;
        Ok(log_softmax(logits.view()))
    }
}

/// Residual convolution stack $`x \mapsto x + N(x)`$
///
/// $`N`$ applies every convolution with ReLU in between, the last one
/// without activation.
#[derive(Clone, Debug)]
pub struct DenoisingNet<A> {
    convs: Vec<Conv2d<A>>,
}

impl<A: NdFloat> DenoisingNet<A> {
    pub fn new(convs: Vec<Conv2d<A>>) -> Result<Self> {
        let (first, last) = match (convs.first(), convs.last()) {
            (Some(first), Some(last)) => (first, last),
            _ => return Err(Error::mismatch("denoising net layers", &[1], &[0])),
        };
        if first.in_channels() != last.out_channels() {
            return Err(Error::mismatch(
                "denoising net residual channels",
                &[first.in_channels()],
                &[last.out_channels()],
            ));
        }
        for conv in &convs {
            if conv.kernel_size() % 2 == 0 || conv.padding != conv.kernel_size() / 2 {
                return Err(Error::invalid(
                    "kernel_size",
                    conv.kernel_size(),
                    "residual layers need odd kernels padded to keep the image size",
                ));
            }
        }
        Ok(DenoisingNet { convs })
    }

    /// `channels = [c, hidden.., c]`
    pub fn random(channels: &[usize], k: usize, seed: u64) -> Result<Self>
    where
        A: SampleUniform,
    {
        let mut rng = StdRng::seed_from_u64(seed);
        Self::new(
            channels
                .windows(2)
                .map(|pair| Conv2d::random(pair[0], pair[1], k, &mut rng))
                .collect(),
        )
    }

    pub fn layers_mut(&mut self) -> &mut [Conv2d<A>] {
        &mut self.convs
    }
}

impl<A: NdFloat> Network<A> for DenoisingNet<A> {
    fn apply(&self, input: ArrayViewD<A>) -> Result<ArrayD<A>> {
        let x = as_images(input)?;
        let mut n = x.to_owned();
        let last = self.convs.len() - 1;
        for (i, conv) in self.convs.iter().enumerate() {
            n = conv.forward(n.view())?;
            if i < last {
                n = relu(n);
            }
        }
        n += &x;
        Ok(n.into_dyn())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn image() -> Array4<f64> {
        Array::from_shape_fn((1, 1, 4, 4), |(_, _, i, j)| (4 * i + j) as f64)
    }

    #[test]
    fn centered_delta_kernel_is_identity() {
        let mut weight = Array4::zeros((1, 1, 3, 3));
        weight[[0, 0, 1, 1]] = 1.;
        let conv = Conv2d::new(weight, array![0.], 1).unwrap();
        let x = image();
        assert_eq!(conv.forward(x.view()).unwrap(), x);
    }

    #[test]
    fn valid_box_filter() {
        let conv = Conv2d::new(Array4::ones((2, 1, 2, 2)), array![0., 1.], 0).unwrap();
        let y = conv.forward(image().view()).unwrap();
        assert_eq!(y.dim(), (1, 2, 3, 3));
        // 0 + 1 + 4 + 5
        assert_eq!(y[[0, 0, 0, 0]], 10.);
        assert_eq!(y[[0, 1, 2, 2]], 10. + 11. + 14. + 15. + 1.);
        assert!(conv.forward(Array4::zeros((1, 2, 4, 4)).view()).is_err());
        assert!(conv.forward(Array4::zeros((1, 1, 1, 1)).view()).is_err());
    }

    #[test]
    fn zero_padding() {
        let conv = Conv2d::new(Array4::ones((1, 1, 3, 3)), array![0.], 1).unwrap();
        let y = conv.forward(image().view()).unwrap();
        // corner sees 0 + 1 + 4 + 5
        assert_eq!(y[[0, 0, 0, 0]], 10.);
    }

    #[test]
    fn pooling() {
        let y = max_pool2d(image().view(), 2);
        assert_eq!(y, array![[[5., 7.], [13., 15.]]].insert_axis(Axis(0)));
        assert_eq!(max_pool2d(image().view(), 3).dim(), (1, 1, 1, 1));
    }

    #[test]
    fn convnet_shapes() {
        let net = ConvNet::<f64>::random(&[1, 4, 8], 3, 12, 10, 0).unwrap();
        let x = Array::from_elem(IxDyn(&[2, 1, 12, 12]), 0.5);
        let y = net.apply(x.view()).unwrap();
        assert_eq!(y.shape(), &[2, 10]);
        for row in y.outer_iter() {
            assert_abs_diff_eq!(row.mapv(f64::exp).sum(), 1., epsilon = 1e-12);
        }
        assert!(net.apply(Array::zeros(IxDyn(&[2, 12, 12])).view()).is_err());
        assert!(ConvNet::<f64>::random(&[1, 4, 8], 3, 2, 10, 0).is_err());
    }

    #[test]
    fn denoising_net_is_residual() {
        let mut net = DenoisingNet::<f64>::random(&[1, 4, 1], 3, 0).unwrap();
        let last = net.layers_mut().len() - 1;
        let layer = &mut net.layers_mut()[last];
        layer.weight_mut().fill(0.);
        layer.bias.fill(0.);
        let x = image().into_dyn();
        assert_eq!(net.apply(x.view()).unwrap(), x);
        assert!(DenoisingNet::<f64>::random(&[1, 4, 2], 3, 0).is_err());
        assert!(DenoisingNet::<f64>::random(&[1, 4, 1], 2, 0).is_err());
    }
}
