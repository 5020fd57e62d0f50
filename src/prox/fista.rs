//! Fast Iterative Shrinking/Thresholding Algorithm

use ndarray::prelude::*;
use ndarray::{NdFloat, Zip};

use super::{check_positive, f64_of};
use crate::error::{Error, Result};
use crate::functional::Functional;
use crate::linop::LinearOperator;

/// Fast Iterative Shrinking/Thresholding Algorithm
///
/// Minimizes $`\frac12\|Ax - b\|^2 + g(x)`$. The smooth term has a
/// $`\|A\|^2`$-Lipschitz gradient, so `op_norm` should be an over-estimate
/// of $`\|A\|`$. A positive `muf` $`< \|A\|^2`$ selects the constant momentum of the
/// strongly convex case. With `restart`, momentum is reset whenever the
/// gradient-mapping test $`\langle y_{k-1} - x_k, x_k - x_{k-1}\rangle > 0`$
/// fires.
///
/// The callback is evaluated at (x0,0) and then after each iteration.
/// If it returns true, the function terminates early.
pub fn fista<A, O>(
    x: &mut ArrayD<A>,
    op: &O,
    data: ArrayViewD<A>,
    g: &Functional<A>,
    op_norm: A,
    muf: A,
    niter: usize,
    restart: bool,
    mut callback: impl FnMut(ArrayViewD<A>, usize) -> bool,
) -> Result<()>
where
    A: NdFloat,
    O: LinearOperator<A> + ?Sized,
{
    op.domain().check(&x.view())?;
    op.range().check(&data)?;
    g.check_domain(op.domain())?;
    check_positive("op_norm", op_norm)?;

    #[allow(non_snake_case)]
    let Lf = op_norm * op_norm;
    if !(muf >= A::zero() && muf < Lf) {
        return Err(Error::invalid(
            "muf",
            muf,
            "must be nonnegative and below op_norm²",
        ));
    }
    let step = A::one() / Lf;
    log::debug!(
        "fista: niter = {}, Lf = {}, muf = {}, restart = {}",
        niter,
        f64_of(Lf),
        f64_of(muf),
        restart
    );

    let two = A::from(2.).unwrap();
    let four = A::from(4.).unwrap();
    let eight = A::from(8.).unwrap();

    // for the strong convex case
    let q = muf / Lf;
    let beta2 = (two + q - (q.powi(2) + eight * q).sqrt()).powi(2) / four / (A::one() - q);
    let strong = muf > A::zero();

    let mut y = x.clone();
    let mut theta = A::one();

    if callback(x.view(), 0) {
        return Ok(());
    }
    for iter in 1..=niter {
        let x_old = x.clone();
        let theta_old = theta;

        theta = (A::one() + (four * theta.powi(2) + A::one()).sqrt()) / two;
        let beta = if strong {
            beta2
        } else {
            (theta_old - A::one()) / theta
        };

        // gradient of the data term at y
        let mut residual = op.apply(y.view());
        residual -= &data;
        let grad = op.adjoint(residual.view());

        let mut z = y.clone();
        z.scaled_add(-step, &grad);
        *x = g.proximal(z.view(), step)?;

        if restart {
            let overshoot = Zip::from(&y)
                .and(&*x)
                .and(&x_old)
                .fold(A::zero(), |acc, &yo, &xn, &xo| acc + (yo - xn) * (xn - xo));
            if overshoot > A::zero() {
                log::trace!("fista: momentum restart at iteration {}", iter);
                theta = A::one();
            }
        }

        Zip::from(&mut y)
            .and(&*x)
            .and(&x_old)
            .for_each(|yv, &xn, &xo| *yv = xn + beta * (xn - xo));

        if callback(x.view(), iter) {
            break;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::callback::nop;
    use crate::functional::soft_threshold;
    use crate::linop::{Diagonal, Identity};
    use crate::space::Space;
    use approx::assert_abs_diff_eq;

    fn diag() -> Diagonal<f64> {
        Diagonal::new(array![10., 20.].into_dyn())
    }

    #[test]
    fn nonnegative_inside() {
        let op = diag();
        let g = Functional::nonnegativity(Space::new(&[2]));
        let b = array![50., 100.].into_dyn();
        for &restart in &[false, true] {
            let mut x = Array::zeros(IxDyn(&[2]));
            fista(&mut x, &op, b.view(), &g, 20., 0., 200, restart, nop).unwrap();
            assert_abs_diff_eq!(x, array![5., 5.].into_dyn(), epsilon = 1e-6);
        }
    }

    #[test]
    fn nonnegative_active() {
        let op = diag();
        let g = Functional::nonnegativity(Space::new(&[2]));
        let b = array![50., -100.].into_dyn();
        let mut x = Array::ones(IxDyn(&[2]));
        fista(&mut x, &op, b.view(), &g, 20., 0., 200, true, nop).unwrap();
        assert_abs_diff_eq!(x, array![5., 0.].into_dyn(), epsilon = 1e-6);
    }

    #[test]
    fn strongly_convex_momentum() {
        // ‖Ax‖² ≥ 100‖x‖², so muf = 100
        let op = diag();
        let g = Functional::zero(Space::new(&[2]));
        let b = array![50., 100.].into_dyn();
        let mut x = Array::zeros(IxDyn(&[2]));
        fista(&mut x, &op, b.view(), &g, 20., 100., 200, false, nop).unwrap();
        assert_abs_diff_eq!(x, array![5., 5.].into_dyn(), epsilon = 1e-6);
    }

    #[test]
    fn soft_thresholding_in_one_step() {
        let space = Space::new(&[4]);
        let op = Identity::new(space.clone());
        let g = Functional::l1_norm(space.clone()).scaled(0.5).unwrap();
        let b = array![2., -0.3, 0.1, -1.].into_dyn();
        let mut x = space.zero();
        let mut iters = 0;
        fista(&mut x, &op, b.view(), &g, 1., 0., 1, false, |_, it| {
            iters = it;
            false
        })
        .unwrap();
        assert_eq!(iters, 1);
        assert_abs_diff_eq!(x, b.mapv(|v| soft_threshold(v, 0.5)), epsilon = 1e-12);
    }

    #[test]
    fn muf_must_be_below_lipschitz_constant() {
        let op = diag();
        let g = Functional::zero(Space::new(&[2]));
        let b = array![50., 100.].into_dyn();
        for &muf in &[400., 1000., -1., f64::NAN] {
            let mut x = Array::zeros(IxDyn(&[2]));
            let mut called = false;
            let res = fista(&mut x, &op, b.view(), &g, 20., muf, 50, false, |_, _| {
                called = true;
                false
            });
            assert!(matches!(res, Err(Error::InvalidParameter { name: "muf", .. })));
            assert!(!called);
            assert_eq!(x, Array::zeros(IxDyn(&[2])));
        }
    }

    #[test]
    fn data_shape_is_checked() {
        let op = diag();
        let g = Functional::zero(Space::new(&[2]));
        let b = array![1., 2., 3.].into_dyn();
        let mut x = Array::zeros(IxDyn(&[2]));
        assert!(fista(&mut x, &op, b.view(), &g, 20., 0., 10, false, nop).is_err());
    }
}
