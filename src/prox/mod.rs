//! Minimization of Composite Functions by Proximal Splitting
//!
//! Solvers for objectives of the form
//! ```math
//! f(x) + \sum_{i=1}^n g_i(L_i x)
//! ```
//! where $`f`$ and every $`g_i`$ are convex with cheap proximals
//! ([`crate::functional::Functional`]) and $`L = (L_1, \dots, L_n)`$ is a
//! [`crate::linop::BroadcastOperator`]. Only proximals of the individual
//! terms are ever evaluated, never the proximal of $`g \circ L`$.
//!
//! Every solver validates its step sizes against estimated operator norms
//! before the first iteration and fails with [`Error::StepSize`] instead of
//! iterating toward divergence. The iterate is updated in place; the
//! callback is evaluated at $`(x_0, 0)`$ and after each iteration, and
//! returning `true` stops early. Otherwise the iteration budget is the only
//! stopping rule.
//!
//! See also [`fista`] for the smooth-plus-proximal case $`\frac12\|Ax-b\|^2 + g(x)`$.

mod douglas_rachford;
pub use douglas_rachford::*;

mod fista;
pub use fista::*;

mod pdhg;
pub use pdhg::*;

use ndarray::NdFloat;

use crate::error::{Error, Result};

fn f64_of<A: NdFloat>(a: A) -> f64 {
    a.to_f64().unwrap_or(f64::NAN)
}

fn check_positive<A: NdFloat>(name: &'static str, value: A) -> Result<()> {
    if value.is_finite() && value > A::zero() {
        Ok(())
    } else {
        Err(Error::invalid(name, value, "must be finite and positive"))
    }
}

/// PDHG convergence precondition $`\|L\|^2 \tau \sigma \leq 1`$
pub fn check_pdhg_steps<A: NdFloat>(op_norm: A, tau: A, sigma: A) -> Result<()> {
    check_positive("op_norm", op_norm)?;
    check_positive("tau", tau)?;
    check_positive("sigma", sigma)?;
    let value = op_norm * op_norm * tau * sigma;
    if value <= A::one() {
        Ok(())
    } else {
        Err(Error::StepSize {
            inequality: "‖L‖²·τ·σ ≤ 1",
            value: f64_of(value),
            bound: 1.0,
            operands: vec![
                ("‖L‖", f64_of(op_norm)),
                ("τ", f64_of(tau)),
                ("σ", f64_of(sigma)),
            ],
        })
    }
}

/// Douglas-Rachford convergence precondition $`\tau \sum_i \sigma_i \|L_i\|^2 < 4`$
pub fn check_douglas_rachford_steps<A: NdFloat>(tau: A, sigmas: &[A], op_norms: &[A]) -> Result<()> {
    if sigmas.len() != op_norms.len() {
        return Err(Error::mismatch(
            "douglas-rachford step sizes",
            &[op_norms.len()],
            &[sigmas.len()],
        ));
    }
    check_positive("tau", tau)?;
    for (&sigma, &op_norm) in sigmas.iter().zip(op_norms) {
        check_positive("sigma", sigma)?;
        check_positive("op_norm", op_norm)?;
    }
    let sum = sigmas
        .iter()
        .zip(op_norms)
        .fold(A::zero(), |acc, (&s, &n)| acc + s * n * n);
    let value = tau * sum;
    if value < A::from(4.).unwrap() {
        Ok(())
    } else {
        let mut operands = vec![("τ", f64_of(tau))];
        operands.extend(sigmas.iter().map(|&s| ("σ_i", f64_of(s))));
        operands.extend(op_norms.iter().map(|&n| ("‖L_i‖", f64_of(n))));
        Err(Error::StepSize {
            inequality: "τ·Σ σ_i·‖L_i‖² < 4",
            value: f64_of(value),
            bound: 4.0,
            operands,
        })
    }
}
