//! Total-variation regularized denoising and reconstruction
//!
//! Solves
//! ```math
//! \min_x \frac12\|Ax - b\|_2^2 + \alpha \|\nabla x\|_{2,1} \;(+\, \iota_{\{x \geq 0\}}(x))
//! ```
//! by splitting with $`L = (A, \nabla)`$, $`g = (\frac12\|\cdot - b\|^2, \alpha\|\cdot\|_{2,1})`$
//! and $`f`$ the nonnegativity indicator (or zero). Step sizes are derived
//! from power-iteration norm estimates seeded with uniform noise, so a
//! constant image never lands in the kernel of $`\nabla`$.

use ndarray::prelude::*;
use ndarray::NdFloat;
use ndarray_rand::rand::distributions::uniform::SampleUniform;
use ndarray_rand::rand::rngs::StdRng;
use ndarray_rand::rand::SeedableRng;

use crate::error::{Error, Result};
use crate::functional::{Functional, SeparableSum};
use crate::linop::{safe_norm, BroadcastOperator, Gradient, Identity, LinearOperator, NORM_ITERATIONS};
use crate::prox::{douglas_rachford_pd, pdhg, DouglasRachfordParams, PdhgParams};
use crate::space::Space;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Method {
    Pdhg,
    DouglasRachford,
}

#[derive(Clone, Debug)]
pub struct TvOptions<A> {
    /// regularization weight
    pub alpha: A,
    pub niter: usize,
    pub method: Method,
    /// constrain the solution to $`x \geq 0`$, off by default
    pub nonnegative: bool,
    /// power iterations per norm estimate
    pub norm_iterations: usize,
    /// seed of the noise the norm estimates start from
    pub seed: u64,
}

impl<A: NdFloat> TvOptions<A> {
    pub fn new(alpha: A, niter: usize) -> Self {
        TvOptions {
            alpha,
            niter,
            method: Method::Pdhg,
            nonnegative: false,
            norm_iterations: NORM_ITERATIONS,
            seed: 0,
        }
    }

    pub fn method(self, method: Method) -> Self {
        TvOptions { method, ..self }
    }

    pub fn nonnegative(self, nonnegative: bool) -> Self {
        TvOptions {
            nonnegative,
            ..self
        }
    }

    pub fn seed(self, seed: u64) -> Self {
        TvOptions { seed, ..self }
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.alpha.is_finite() && self.alpha > A::zero()) {
            return Err(Error::invalid("alpha", self.alpha, "must be finite and positive"));
        }
        if self.norm_iterations == 0 {
            return Err(Error::invalid(
                "norm_iterations",
                0,
                "at least one power iteration is needed",
            ));
        }
        Ok(())
    }
}

/// The pieces of the TV problem for the forward operator `op`.
fn tv_problem<A: NdFloat>(
    op: Box<dyn LinearOperator<A>>,
    data: ArrayViewD<A>,
    options: &TvOptions<A>,
) -> Result<(Functional<A>, SeparableSum<A>, BroadcastOperator<A>)> {
    options.validate()?;
    let domain = op.domain().clone();
    let range = op.range().clone();
    let grad = Gradient::new(domain.clone());
    let grad_range = grad.range().clone();

    let f = if options.nonnegative {
        Functional::nonnegativity(domain)
    } else {
        Functional::zero(domain)
    };
    let g = SeparableSum::new(vec![
        Functional::l2_norm_squared(range)
            .scaled(A::from(0.5).unwrap())?
            .translated(data.to_owned())?,
        Functional::group_l1_norm(grad_range)?.scaled(options.alpha)?,
    ])?;
    let l = BroadcastOperator::new(vec![op, Box::new(grad) as Box<dyn LinearOperator<A>>])?;
    Ok((f, g, l))
}

/// TV-regularized reconstruction from `data = op(x) + noise`, warm started
/// from `x`.
pub fn tv_reconstruct_from<A>(
    x: &mut ArrayD<A>,
    op: Box<dyn LinearOperator<A>>,
    data: ArrayViewD<A>,
    options: &TvOptions<A>,
    callback: impl FnMut(ArrayViewD<A>, usize) -> bool,
) -> Result<()>
where
    A: NdFloat + SampleUniform,
{
    let (f, g, l) = tv_problem(op, data, options)?;
    l.domain().check(&x.view())?;

    let mut rng = StdRng::seed_from_u64(options.seed);
    let seed = l.domain().noise(&mut rng);

    match options.method {
        Method::Pdhg => {
            let op_norm = safe_norm(l.norm_estimate(seed.view(), options.norm_iterations)?);
            log::debug!("tv: pdhg with |L| <= {:?}", op_norm);
            let params = PdhgParams::balanced(op_norm, options.niter);
            pdhg(x, &f, &g, &l, &params, callback)
        }
        Method::DouglasRachford => {
            let op_norms = l
                .component_norm_estimates(seed.view(), options.norm_iterations)?
                .into_iter()
                .map(safe_norm)
                .collect::<Vec<_>>();
            log::debug!("tv: douglas-rachford with |L_i| <= {:?}", op_norms);
            let params = DouglasRachfordParams::balanced(op_norms, options.niter);
            douglas_rachford_pd(x, &f, &g, &l, &params, callback)
        }
    }
}

/// TV-regularized reconstruction starting from zero.
pub fn tv_reconstruct<A>(
    op: Box<dyn LinearOperator<A>>,
    data: ArrayViewD<A>,
    options: &TvOptions<A>,
    callback: impl FnMut(ArrayViewD<A>, usize) -> bool,
) -> Result<ArrayD<A>>
where
    A: NdFloat + SampleUniform,
{
    let mut x = op.domain().zero();
    tv_reconstruct_from(&mut x, op, data, options, callback)?;
    Ok(x)
}

/// TV denoising, i.e. [`tv_reconstruct`] with $`A = I`$.
pub fn tv_denoise<A>(
    data: ArrayViewD<A>,
    options: &TvOptions<A>,
    callback: impl FnMut(ArrayViewD<A>, usize) -> bool,
) -> Result<ArrayD<A>>
where
    A: NdFloat + SampleUniform,
{
    let space = Space::new(data.shape());
    tv_reconstruct(Box::new(Identity::new(space)), data, options, callback)
}

/// TV denoising warm started from `x`.
pub fn tv_denoise_from<A>(
    x: &mut ArrayD<A>,
    data: ArrayViewD<A>,
    options: &TvOptions<A>,
    callback: impl FnMut(ArrayViewD<A>, usize) -> bool,
) -> Result<()>
where
    A: NdFloat + SampleUniform,
{
    let space = Space::new(data.shape());
    tv_reconstruct_from(x, Box::new(Identity::new(space)), data, options, callback)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::callback::nop;
    use crate::linop::Diagonal;
    use approx::assert_abs_diff_eq;
    use ndarray_rand::rand_distr::Uniform;
    use ndarray_rand::RandomExt;

    fn max_abs_diff(a: &ArrayD<f64>, b: &ArrayD<f64>) -> f64 {
        (a - b).fold(0., |m, &v| v.abs().max(m))
    }

    fn noisy_square(n: usize, seed: u64) -> ArrayD<f64> {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut img = Array::from_elem((n, n), 0.2);
        img.slice_mut(s![n / 4..3 * n / 4, n / 4..3 * n / 4]).fill(1.0);
        let noise = Array::random_using((n, n), Uniform::new(-0.15, 0.15), &mut rng);
        (img + noise).into_dyn()
    }

    #[test]
    fn constant_image_is_kept() {
        for &c in &[0.7, -0.5, -3.0] {
            let data = Array::from_elem(IxDyn(&[16, 16]), c);
            for &method in &[Method::Pdhg, Method::DouglasRachford] {
                let options = TvOptions::new(0.15, 200).method(method);
                let x = tv_denoise(data.view(), &options, nop).unwrap();
                assert_abs_diff_eq!(x, data, epsilon = 1e-6);
            }
        }
    }

    #[test]
    fn nonnegativity_is_opt_in() {
        let data = Array::from_elem(IxDyn(&[8, 8]), -0.5);
        assert!(!TvOptions::<f64>::new(0.15, 10).nonnegative);
        for &method in &[Method::Pdhg, Method::DouglasRachford] {
            let options = TvOptions::new(0.15, 200).method(method).nonnegative(true);
            let x = tv_denoise(data.view(), &options, nop).unwrap();
            assert_abs_diff_eq!(x, ArrayD::<f64>::zeros(IxDyn(&[8, 8])), epsilon = 1e-6);
        }
    }

    #[test]
    fn converged_output_is_a_fixed_point() {
        let data = noisy_square(16, 7);
        let options = TvOptions::new(0.15, 500);
        let x = tv_denoise(data.view(), &options, nop).unwrap();
        // regularization visibly smooths the noise
        assert!(max_abs_diff(&x, &data) > 0.05);

        let mut rerun = x.clone();
        tv_denoise_from(&mut rerun, data.view(), &options, nop).unwrap();
        assert!(max_abs_diff(&x, &rerun) < 1e-3);
    }

    #[test]
    fn pdhg_and_douglas_rachford_agree() {
        let data = noisy_square(16, 11);
        let x_pdhg = tv_denoise(data.view(), &TvOptions::new(0.15, 1000), nop).unwrap();
        let options = TvOptions::new(0.15, 1500).method(Method::DouglasRachford);
        let x_dr = tv_denoise(data.view(), &options, nop).unwrap();
        assert!(max_abs_diff(&x_pdhg, &x_dr) < 1e-2);
    }

    #[test]
    fn inpainting_a_constant_image() {
        let mut rng = StdRng::seed_from_u64(3);
        let mask = Array::random_using((16, 16), Uniform::new(0., 1.), &mut rng)
            .mapv(|v: f64| if v < 0.5 { 1. } else { 0. })
            .into_dyn();
        let data = mask.mapv(|m| 0.7 * m);
        let op = Box::new(Diagonal::new(mask));
        let x = tv_reconstruct(op, data.view(), &TvOptions::new(0.15, 1000), nop).unwrap();
        assert_abs_diff_eq!(x, Array::from_elem(IxDyn(&[16, 16]), 0.7), epsilon = 1e-4);
    }

    #[test]
    fn invalid_options() {
        let data = ArrayD::<f64>::zeros(IxDyn(&[4, 4]));
        let options = TvOptions::new(0.0, 10);
        assert!(matches!(
            tv_denoise(data.view(), &options, nop),
            Err(Error::InvalidParameter { name: "alpha", .. })
        ));
        let mut x = ArrayD::<f64>::zeros(IxDyn(&[3, 4]));
        let options = TvOptions::new(0.1, 10);
        assert!(matches!(
            tv_denoise_from(&mut x, data.view(), &options, nop),
            Err(Error::DimensionMismatch { .. })
        ));
    }
}
