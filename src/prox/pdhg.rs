//! Primal-Dual Hybrid Gradient

use ndarray::prelude::*;
use ndarray::{NdFloat, Zip};

use super::{check_pdhg_steps, f64_of};
use crate::error::{Error, Result};
use crate::functional::{Functional, SeparableSum};
use crate::linop::BroadcastOperator;

/// Step sizes and iteration budget for [`pdhg`]
#[derive(Clone, Debug)]
pub struct PdhgParams<A> {
    /// primal step size
    pub tau: A,
    /// dual step size
    pub sigma: A,
    /// (over-)estimate of $`\|L\|`$, see [`crate::linop::safe_norm`]
    pub op_norm: A,
    pub niter: usize,
    /// relaxation parameter in $`[0, 1]`$
    pub theta: A,
    /// strong convexity modulus of $`f`$, enables step size acceleration
    pub gamma_primal: Option<A>,
}

impl<A: NdFloat> PdhgParams<A> {
    pub fn new(tau: A, sigma: A, op_norm: A, niter: usize) -> Self {
        PdhgParams {
            tau,
            sigma,
            op_norm,
            niter,
            theta: A::one(),
            gamma_primal: None,
        }
    }

    /// The usual balanced choice $`\tau = \sigma = 1/\|L\|`$.
    pub fn balanced(op_norm: A, niter: usize) -> Self {
        let step = A::one() / op_norm;
        Self::new(step, step, op_norm, niter)
    }

    pub fn theta(self, theta: A) -> Self {
        PdhgParams { theta, ..self }
    }

    pub fn gamma_primal(self, gamma: A) -> Self {
        PdhgParams {
            gamma_primal: Some(gamma),
            ..self
        }
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.theta >= A::zero() && self.theta <= A::one()) {
            return Err(Error::invalid("theta", self.theta, "must lie in [0, 1]"));
        }
        if let Some(gamma) = self.gamma_primal {
            if !(gamma.is_finite() && gamma >= A::zero()) {
                return Err(Error::invalid("gamma_primal", gamma, "must be finite and nonnegative"));
            }
        }
        check_pdhg_steps(self.op_norm, self.tau, self.sigma)
    }
}

/// Primal-Dual Hybrid Gradient (Chambolle-Pock)
///
/// Minimizes $`f(x) + g(Lx)`$ for a [`SeparableSum`] $`g`$ over the range of
/// the [`BroadcastOperator`] $`L`$.
///
/// Algorithm
/// ---------
/// ```math
/// \begin{aligned}
/// y_{k+1} &= \mathrm{prox}_{\sigma g^*}(y_k + \sigma L \bar x_k) \\
/// x_{k+1} &= \mathrm{prox}_{\tau f}(x_k - \tau L^* y_{k+1}) \\
/// \bar x_{k+1} &= x_{k+1} + \theta (x_{k+1} - x_k)
/// \end{aligned}
/// ```
/// with $`y_0 = 0`$ and $`\bar x_0 = x_0`$. With `gamma_primal` set, the
/// step sizes follow $`\theta_k = 1/\sqrt{1 + 2\gamma\tau_k}`$,
/// $`\tau_{k+1} = \theta_k\tau_k`$, $`\sigma_{k+1} = \sigma_k/\theta_k`$.
///
/// Convergence
/// -----------
/// Requires $`\|L\|^2\tau\sigma \leq 1`$, checked with `params.op_norm`
/// before iterating.
///
/// Parameters
/// ----------
/// - __x:__         initial guess, overwritten by the iterates
/// - __f:__         functional on the domain of $`L`$
/// - __g:__         one functional per component of the range of $`L`$
/// - __op:__        the operator $`L`$
/// - __params:__    step sizes, operator norm and iteration budget
/// - __callback:__  User-defined function to be evaluated with two arguments (x,iter).
///                   It is evaluated at (x0,0) and then after each iteration.
///                   If it returns True, the function terminates early.
///
/// References
/// ----------
/// Chambolle A, Pock T, "A first-order primal-dual algorithm for convex
/// problems with applications to imaging", J. Math. Imaging Vis. 40 (2011)
pub fn pdhg<A: NdFloat>(
    x: &mut ArrayD<A>,
    f: &Functional<A>,
    g: &SeparableSum<A>,
    op: &BroadcastOperator<A>,
    params: &PdhgParams<A>,
    mut callback: impl FnMut(ArrayViewD<A>, usize) -> bool,
) -> Result<()> {
    op.domain().check(&x.view())?;
    f.check_domain(op.domain())?;
    g.check_domain(op.range())?;
    params.validate()?;
    log::debug!(
        "pdhg: niter = {}, tau = {}, sigma = {}, |L| = {}, |L|^2 tau sigma = {}",
        params.niter,
        f64_of(params.tau),
        f64_of(params.sigma),
        f64_of(params.op_norm),
        f64_of(params.op_norm * params.op_norm * params.tau * params.sigma),
    );

    let mut tau = params.tau;
    let mut sigma = params.sigma;
    let mut theta = params.theta;

    let mut y = op.range().zero();
    let mut x_relax = x.clone();

    if callback(x.view(), 0) {
        return Ok(());
    }
    for iter in 1..=params.niter {
        let x_old = x.clone();

        // dual update
        for (yi, lxi) in y.iter_mut().zip(op.apply(x_relax.view())) {
            yi.scaled_add(sigma, &lxi);
        }
        y = g.convex_conj_proximal(&y, sigma)?;

        // primal update
        x.scaled_add(-tau, &op.adjoint(&y));
        *x = f.proximal(x.view(), tau)?;

        if let Some(gamma) = params.gamma_primal {
            theta = A::one() / (A::one() + (gamma + gamma) * tau).sqrt();
            tau = tau * theta;
            sigma = sigma / theta;
        }

        // over-relaxation
        Zip::from(&mut x_relax)
            .and(&*x)
            .and(&x_old)
            .for_each(|r, &xn, &xo| *r = xn + theta * (xn - xo));

        log::trace!("pdhg iteration {}", iter);
        if callback(x.view(), iter) {
            break;
        }
    }
    Ok(())
}
