//! Primal-Dual Douglas-Rachford Splitting

use ndarray::prelude::*;
use ndarray::{NdFloat, Zip};

use super::{check_douglas_rachford_steps, f64_of};
use crate::error::{Error, Result};
use crate::functional::{Functional, SeparableSum};
use crate::linop::BroadcastOperator;

/// Step sizes and iteration budget for [`douglas_rachford_pd`]
#[derive(Clone, Debug)]
pub struct DouglasRachfordParams<A> {
    /// primal step size
    pub tau: A,
    /// one dual step size per operator
    pub sigmas: Vec<A>,
    /// (over-)estimates of $`\|L_i\|`$
    pub op_norms: Vec<A>,
    pub niter: usize,
    /// relaxation parameter in $`(0, 2)`$
    pub lam: A,
}

impl<A: NdFloat> DouglasRachfordParams<A> {
    pub fn new(tau: A, sigmas: Vec<A>, op_norms: Vec<A>, niter: usize) -> Self {
        DouglasRachfordParams {
            tau,
            sigmas,
            op_norms,
            niter,
            lam: A::one(),
        }
    }

    /// $`\tau = 2`$ and $`\sigma_i = 1/(n\|L_i\|^2)`$, so that
    /// $`\tau \sum_i \sigma_i \|L_i\|^2 = 2`$.
    pub fn balanced(op_norms: Vec<A>, niter: usize) -> Self {
        let n = A::from(op_norms.len()).unwrap();
        let sigmas = op_norms
            .iter()
            .map(|&norm| A::one() / (n * norm * norm))
            .collect();
        Self::new(A::from(2.).unwrap(), sigmas, op_norms, niter)
    }

    pub fn lam(self, lam: A) -> Self {
        DouglasRachfordParams { lam, ..self }
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.lam > A::zero() && self.lam < A::from(2.).unwrap()) {
            return Err(Error::invalid("lam", self.lam, "must lie in (0, 2)"));
        }
        check_douglas_rachford_steps(self.tau, &self.sigmas, &self.op_norms)
    }
}

/// Primal-Dual Douglas-Rachford Splitting
///
/// Minimizes $`f(x) + \sum_i g_i(L_i x)`$, see [\[BAC11\]](#references).
///
/// Algorithm
/// ---------
/// ```math
/// \begin{aligned}
/// p_1 &= \mathrm{prox}_{\tau f}\big(x - \tfrac{\tau}{2} \textstyle\sum_i L_i^* v_i\big), &
/// w_1 &= 2 p_1 - x \\
/// p_{2,i} &= \mathrm{prox}_{\sigma_i g_i^*}\big(v_i + \tfrac{\sigma_i}{2} L_i w_1\big), &
/// w_{2,i} &= 2 p_{2,i} - v_i \\
/// z_1 &= w_1 - \tfrac{\tau}{2} \textstyle\sum_i L_i^* w_{2,i}, &
/// x &\leftarrow x + \lambda (z_1 - p_1) \\
/// z_{2,i} &= w_{2,i} + \tfrac{\sigma_i}{2} L_i (2 z_1 - w_1), &
/// v_i &\leftarrow v_i + \lambda (z_{2,i} - p_{2,i})
/// \end{aligned}
/// ```
/// with $`v = 0`$ initially. The primal estimate is $`p_1`$; it is what the
/// callback sees and what `x` holds on return.
///
/// Convergence
/// -----------
/// Requires $`\tau \sum_i \sigma_i \|L_i\|^2 < 4`$ and $`0 < \lambda < 2`$,
/// checked before iterating.
///
/// References
/// ----------
/// \[BAC11\]: Briceño-Arias L M, Combettes P L, "A monotone + skew splitting
/// model for composite monotone inclusions in duality", SIAM J. Optim. 21 (2011)
pub fn douglas_rachford_pd<A: NdFloat>(
    x: &mut ArrayD<A>,
    f: &Functional<A>,
    g: &SeparableSum<A>,
    op: &BroadcastOperator<A>,
    params: &DouglasRachfordParams<A>,
    mut callback: impl FnMut(ArrayViewD<A>, usize) -> bool,
) -> Result<()> {
    op.domain().check(&x.view())?;
    f.check_domain(op.domain())?;
    g.check_domain(op.range())?;
    if params.sigmas.len() != op.len() {
        return Err(Error::mismatch(
            "douglas-rachford dual step sizes",
            &[op.len()],
            &[params.sigmas.len()],
        ));
    }
    params.validate()?;
    log::debug!(
        "douglas-rachford: niter = {}, tau = {}, lam = {}, {} operators",
        params.niter,
        f64_of(params.tau),
        f64_of(params.lam),
        op.len(),
    );

    let tau = params.tau;
    let lam = params.lam;
    let two = A::from(2.).unwrap();
    let half_tau = tau / two;
    let ops = op.operators();
    let funcs = g.functionals();

    let mut v = op.range().zero();
    let mut p1 = x.clone();

    if callback(x.view(), 0) {
        return Ok(());
    }
    for iter in 1..=params.niter {
        // primal proximal step
        let mut tmp = x.clone();
        tmp.scaled_add(-half_tau, &op.adjoint(&v));
        p1 = f.proximal(tmp.view(), tau)?;
        let w1 = &p1 * two - &*x;

        // dual proximal steps, one per operator
        let mut p2 = Vec::with_capacity(ops.len());
        let mut w2 = Vec::with_capacity(ops.len());
        for ((li, gi), (vi, &si)) in ops.iter().zip(funcs).zip(v.iter().zip(&params.sigmas)) {
            let mut tmp = vi.clone();
            tmp.scaled_add(si / two, &li.apply(w1.view()));
            let p2i = gi.convex_conj_proximal(tmp.view(), si)?;
            w2.push(&p2i * two - vi);
            p2.push(p2i);
        }

        // primal update
        let mut z1 = w1.clone();
        z1.scaled_add(-half_tau, &op.adjoint(&w2));
        Zip::from(&mut *x)
            .and(&z1)
            .and(&p1)
            .for_each(|xv, &z, &p| *xv = *xv + lam * (z - p));

        // dual update
        let q = &z1 * two - &w1;
        for ((vi, li), ((w2i, p2i), &si)) in v
            .iter_mut()
            .zip(ops)
            .zip(w2.iter().zip(&p2).zip(&params.sigmas))
        {
            let lq = li.apply(q.view());
            let c = si / two;
            Zip::from(vi)
                .and(w2i)
                .and(&lq)
                .and(p2i)
                .for_each(|v, &w, &l, &p| *v = *v + lam * (w + c * l - p));
        }

        log::trace!("douglas-rachford iteration {}", iter);
        if callback(p1.view(), iter) {
            break;
        }
    }
    *x = p1;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::callback::nop;
    use crate::functional::soft_threshold;
    use crate::linop::{safe_norm, Identity, LinearOperator, Scaling};
    use crate::space::Space;
    use approx::assert_abs_diff_eq;

    #[test]
    fn two_term_l1_denoising() {
        // min ι_{≥0}(x) + ½‖x − d‖² + ‖2x‖₁ → max(soft(d, 2), 0)
        let space = Space::new(&[5]);
        let d = array![3.0, -0.5, 1.2, -4.0, 2.5].into_dyn();
        let op = BroadcastOperator::new(vec![
            Box::new(Identity::new(space.clone())) as Box<dyn LinearOperator<f64>>,
            Box::new(Scaling::new(space.clone(), 2.0)),
        ])
        .unwrap();
        let f = Functional::nonnegativity(space.clone());
        let g = SeparableSum::new(vec![
            Functional::l2_norm_squared(space.clone())
                .scaled(0.5)
                .unwrap()
                .translated(d.clone())
                .unwrap(),
            Functional::l1_norm(space.clone()),
        ])
        .unwrap();
        let params = DouglasRachfordParams::balanced(vec![safe_norm(1.0), safe_norm(2.0)], 500);
        let mut x = space.zero();
        douglas_rachford_pd(&mut x, &f, &g, &op, &params, nop).unwrap();
        let expected = d.mapv(|v| soft_threshold(v, 2.0).max(0.0));
        assert_abs_diff_eq!(x, expected, epsilon = 1e-6);
    }

    #[test]
    fn refuses_divergent_steps() {
        let space = Space::new(&[2]);
        let op = BroadcastOperator::new(vec![
            Box::new(Identity::new(space.clone())) as Box<dyn LinearOperator<f64>>
        ])
        .unwrap();
        let f = Functional::zero(space.clone());
        let g = SeparableSum::new(vec![Functional::l1_norm(space.clone())]).unwrap();
        let mut x = space.one();

        let params = DouglasRachfordParams::new(2.0, vec![2.0], vec![1.0], 10);
        assert!(matches!(
            douglas_rachford_pd(&mut x, &f, &g, &op, &params, nop),
            Err(Error::StepSize { .. })
        ));
        let params = DouglasRachfordParams::new(1.0, vec![1.0, 1.0], vec![1.0, 1.0], 10);
        assert!(matches!(
            douglas_rachford_pd(&mut x, &f, &g, &op, &params, nop),
            Err(Error::DimensionMismatch { .. })
        ));
        let params = DouglasRachfordParams::new(1.0, vec![1.0], vec![1.0], 10).lam(2.0);
        assert!(matches!(
            douglas_rachford_pd(&mut x, &f, &g, &op, &params, nop),
            Err(Error::InvalidParameter { name: "lam", .. })
        ));
        assert_eq!(x, space.one());
    }
}
