//! Convex functionals with closed-form proximal operators
//!
//! The proximal operator of a convex function $`f`$ with step $`\sigma > 0`$ is
//! ```math
//! \mathrm{prox}_{\sigma f}(x) = \mathrm{arg}\!\min_y f(y) + \frac{1}{2\sigma}\|x - y\|_2^2 .
//! ```
//! A [`Functional`] is one of a closed set of kinds, optionally scaled and
//! translated, i.e. $`s\,f(x - b)`$, for which
//! ```math
//! \mathrm{prox}_{\sigma s f(\cdot - b)}(x) = \mathrm{prox}_{\sigma s f}(x - b) + b .
//! ```
//! Proximals of convex conjugates follow from the Moreau identity
//! $`\mathrm{prox}_{\sigma F^*}(y) = y - \sigma\,\mathrm{prox}_{F/\sigma}(y/\sigma)`$.
//!
//! A [`SeparableSum`] evaluates one functional per component of a product
//! space, so its proximal splits into independent per-component proximals.

use ndarray::prelude::*;
use ndarray::{NdFloat, Zip};

use crate::error::{Error, Result};
use crate::space::{norm, ProductSpace, Space};

#[derive(Clone, Debug, PartialEq)]
pub enum FunctionalKind<A> {
    /// $`f = 0`$
    Zero,
    /// $`f = \iota_{\{x \geq 0\}}`$
    IndicatorNonnegativity,
    /// $`f = \iota_{\{0\}}`$, translate it to get equality to data
    IndicatorZero,
    /// $`f = \iota_{\{\|x\|_2 \leq r\}}`$
    IndicatorL2Ball { radius: A },
    /// $`f = \sum_i |x_i|`$
    L1Norm,
    /// $`f = \sum_i \|x_{\cdot, i}\|_2`$, the norm over axis 0 summed over all other axes
    GroupL1Norm,
    /// $`f = \|x\|_2`$
    L2Norm,
    /// $`f = \|x\|_2^2`$
    L2NormSquared,
}

impl<A: NdFloat> FunctionalKind<A> {
    fn value(&self, z: &ArrayViewD<A>) -> A {
        let inf = A::infinity();
        match self {
            FunctionalKind::Zero => A::zero(),
            FunctionalKind::IndicatorNonnegativity => {
                if z.iter().any(|&v| v < A::zero()) {
                    inf
                } else {
                    A::zero()
                }
            }
            FunctionalKind::IndicatorZero => {
                if z.iter().all(|&v| v.abs() <= A::epsilon()) {
                    A::zero()
                } else {
                    inf
                }
            }
            FunctionalKind::IndicatorL2Ball { radius } => {
                let slack = A::one() + A::epsilon() * A::from(4.).unwrap();
                if norm(z) <= *radius * slack {
                    A::zero()
                } else {
                    inf
                }
            }
            FunctionalKind::L1Norm => z.fold(A::zero(), |acc, &v| acc + v.abs()),
            FunctionalKind::GroupL1Norm => pointwise_norm(z).sum(),
            FunctionalKind::L2Norm => norm(z),
            FunctionalKind::L2NormSquared => z.fold(A::zero(), |acc, &v| acc + v * v),
        }
    }

    /// $`\mathrm{prox}_{t f}(z)`$ for the unscaled, untranslated kind.
    fn prox(&self, z: ArrayViewD<A>, t: A) -> ArrayD<A> {
        match self {
            FunctionalKind::Zero => z.to_owned(),
            FunctionalKind::IndicatorNonnegativity => z.mapv(|v| v.max(A::zero())),
            FunctionalKind::IndicatorZero => ArrayD::zeros(z.raw_dim()),
            FunctionalKind::IndicatorL2Ball { radius } => {
                let n = norm(&z);
                if n > *radius {
                    let c = *radius / n;
                    z.mapv(|v| v * c)
                } else {
                    z.to_owned()
                }
            }
            FunctionalKind::L1Norm => z.mapv(|v| soft_threshold(v, t)),
            FunctionalKind::GroupL1Norm => {
                let factor = pointwise_norm(&z).mapv_into(|n| shrink_factor(n, t));
                let mut out = z.to_owned();
                for mut component in out.axis_iter_mut(Axis(0)) {
                    component *= &factor;
                }
                out
            }
            FunctionalKind::L2Norm => {
                let c = shrink_factor(norm(&z), t);
                z.mapv(|v| v * c)
            }
            FunctionalKind::L2NormSquared => {
                let c = A::one() / (A::one() + t + t);
                z.mapv(|v| v * c)
            }
        }
    }
}

/// Proximal of $`\sigma |\cdot|`$ at a scalar
///
/// $`t + \sigma`$ if $`t < -\sigma`$, $`0`$ if $`|t| \leq \sigma`$, $`t - \sigma`$ if $`t > \sigma`$.
#[inline]
pub fn soft_threshold<A: NdFloat>(t: A, sigma: A) -> A {
    if t > sigma {
        t - sigma
    } else if t < -sigma {
        t + sigma
    } else {
        A::zero()
    }
}

/// $`\max(0, 1 - t/n)`$, with $`0`$ for $`n = 0`$.
#[inline]
fn shrink_factor<A: NdFloat>(n: A, t: A) -> A {
    if n > t {
        A::one() - t / n
    } else {
        A::zero()
    }
}

/// Euclidean norm across axis 0 at every remaining index.
fn pointwise_norm<A: NdFloat>(z: &ArrayViewD<A>) -> ArrayD<A> {
    z.map_axis(Axis(0), |lane| lane.fold(A::zero(), |acc, &v| acc + v * v).sqrt())
}

/// $`s\,f(x - b)`$ for a [`FunctionalKind`] $`f`$ on a fixed [`Space`].
#[derive(Clone, Debug)]
pub struct Functional<A> {
    kind: FunctionalKind<A>,
    space: Space<A>,
    scale: A,
    translation: Option<ArrayD<A>>,
}

impl<A: NdFloat> Functional<A> {
    fn from_kind(space: Space<A>, kind: FunctionalKind<A>) -> Self {
        Functional {
            kind,
            space,
            scale: A::one(),
            translation: None,
        }
    }

    pub fn zero(space: Space<A>) -> Self {
        Self::from_kind(space, FunctionalKind::Zero)
    }

    pub fn nonnegativity(space: Space<A>) -> Self {
        Self::from_kind(space, FunctionalKind::IndicatorNonnegativity)
    }

    pub fn indicator_zero(space: Space<A>) -> Self {
        Self::from_kind(space, FunctionalKind::IndicatorZero)
    }

    /// Indicator of $`\{x = \text{data}\}`$; its proximal always returns `data`.
    pub fn indicator_equal(space: Space<A>, data: ArrayD<A>) -> Result<Self> {
        Self::indicator_zero(space).translated(data)
    }

    pub fn l2_ball(space: Space<A>, radius: A) -> Result<Self> {
        if !(radius.is_finite() && radius >= A::zero()) {
            return Err(Error::invalid("radius", radius, "must be finite and nonnegative"));
        }
        Ok(Self::from_kind(
            space,
            FunctionalKind::IndicatorL2Ball { radius },
        ))
    }

    pub fn l1_norm(space: Space<A>) -> Self {
        Self::from_kind(space, FunctionalKind::L1Norm)
    }

    /// Sum of Euclidean norms over axis 0, e.g. isotropic total variation
    /// when applied to the output of [`crate::linop::Gradient`].
    pub fn group_l1_norm(space: Space<A>) -> Result<Self> {
        if space.ndim() == 0 {
            return Err(Error::invalid(
                "ndim",
                0,
                "group norms need a component axis",
            ));
        }
        Ok(Self::from_kind(space, FunctionalKind::GroupL1Norm))
    }

    pub fn l2_norm(space: Space<A>) -> Self {
        Self::from_kind(space, FunctionalKind::L2Norm)
    }

    pub fn l2_norm_squared(space: Space<A>) -> Self {
        Self::from_kind(space, FunctionalKind::L2NormSquared)
    }

    /// $`x \mapsto f(x - \text{data})`$
    pub fn translated(mut self, data: ArrayD<A>) -> Result<Self> {
        self.space.check(&data.view())?;
        self.translation = Some(match self.translation.take() {
            Some(b) => b + &data,
            None => data,
        });
        Ok(self)
    }

    /// $`x \mapsto \alpha f(x)`$ for finite $`\alpha > 0`$
    pub fn scaled(mut self, alpha: A) -> Result<Self> {
        if !(alpha.is_finite() && alpha > A::zero()) {
            return Err(Error::invalid("alpha", alpha, "must be finite and positive"));
        }
        self.scale = self.scale * alpha;
        Ok(self)
    }

    pub fn kind(&self) -> &FunctionalKind<A> {
        &self.kind
    }

    pub fn space(&self) -> &Space<A> {
        &self.space
    }

    pub fn scale(&self) -> A {
        self.scale
    }

    pub fn translation(&self) -> Option<ArrayViewD<'_, A>> {
        self.translation.as_ref().map(|b| b.view())
    }

    /// Whether this functional accepts elements of `space`.
    pub fn check_domain(&self, space: &Space<A>) -> Result<()> {
        if self.space.shape() == space.shape() {
            Ok(())
        } else {
            Err(Error::mismatch(
                "functional domain",
                space.shape(),
                self.space.shape(),
            ))
        }
    }

    fn shifted(&self, x: ArrayViewD<A>) -> ArrayD<A> {
        match &self.translation {
            Some(b) => &x - b,
            None => x.to_owned(),
        }
    }

    fn unshift(&self, mut x: ArrayD<A>) -> ArrayD<A> {
        if let Some(b) = &self.translation {
            x += b;
        }
        x
    }

    /// Value at `x`; `A::infinity()` at points outside an indicator's set.
    pub fn call(&self, x: ArrayViewD<A>) -> Result<A> {
        self.space.check(&x)?;
        let v = self.kind.value(&self.shifted(x).view());
        Ok(if v.is_infinite() { v } else { self.scale * v })
    }

    pub fn is_feasible(&self, x: ArrayViewD<A>) -> Result<bool> {
        Ok(self.call(x)?.is_finite())
    }

    /// $`\mathrm{prox}_{t f}`$ including scale and translation, `t` already
    /// multiplied by the scale.
    fn prox_scaled(&self, x: ArrayViewD<A>, t: A) -> ArrayD<A> {
        let p = self.kind.prox(self.shifted(x).view(), t);
        self.unshift(p)
    }

    fn check_step(sigma: A) -> Result<()> {
        if sigma.is_finite() && sigma > A::zero() {
            Ok(())
        } else {
            Err(Error::invalid("sigma", sigma, "step size must be finite and positive"))
        }
    }

    /// $`\mathrm{prox}_{\sigma F}(x)`$
    pub fn proximal(&self, x: ArrayViewD<A>, sigma: A) -> Result<ArrayD<A>> {
        Self::check_step(sigma)?;
        self.space.check(&x)?;
        Ok(self.prox_scaled(x, sigma * self.scale))
    }

    /// $`\mathrm{prox}_{\sigma F^*}(y) = y - \sigma\,\mathrm{prox}_{F/\sigma}(y/\sigma)`$
    pub fn convex_conj_proximal(&self, y: ArrayViewD<A>, sigma: A) -> Result<ArrayD<A>> {
        Self::check_step(sigma)?;
        self.space.check(&y)?;
        let p = self.prox_scaled(y.mapv(|v| v / sigma).view(), self.scale / sigma);
        let mut out = y.to_owned();
        Zip::from(&mut out).and(&p).for_each(|o, &pv| *o = *o - sigma * pv);
        Ok(out)
    }

    /// Gradient of the smooth kinds, `None` for nonsmooth ones.
    pub fn gradient(&self, x: ArrayViewD<A>) -> Option<ArrayD<A>> {
        match self.kind {
            FunctionalKind::Zero => Some(ArrayD::zeros(x.raw_dim())),
            FunctionalKind::L2NormSquared => {
                let c = self.scale + self.scale;
                Some(self.shifted(x).mapv_into(|v| v * c))
            }
            _ => None,
        }
    }
}

/// $`F(x_1, \dots, x_n) = \sum_i F_i(x_i)`$ on a [`ProductSpace`]
#[derive(Clone, Debug)]
pub struct SeparableSum<A: NdFloat> {
    funcs: Vec<Functional<A>>,
    space: ProductSpace<A>,
}

impl<A: NdFloat> SeparableSum<A> {
    pub fn new(funcs: Vec<Functional<A>>) -> Result<Self> {
        if funcs.is_empty() {
            return Err(Error::mismatch("separable sum", &[1], &[0]));
        }
        let space = ProductSpace::new(funcs.iter().map(|f| f.space().clone()).collect());
        Ok(SeparableSum { funcs, space })
    }

    pub fn space(&self) -> &ProductSpace<A> {
        &self.space
    }

    pub fn len(&self) -> usize {
        self.funcs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.funcs.is_empty()
    }

    pub fn functionals(&self) -> &[Functional<A>] {
        &self.funcs
    }

    /// Checks that component `i` accepts elements of `range[i]` for every `i`.
    pub fn check_domain(&self, range: &ProductSpace<A>) -> Result<()> {
        if range.len() != self.funcs.len() {
            return Err(Error::mismatch(
                "separable sum components",
                &[range.len()],
                &[self.funcs.len()],
            ));
        }
        self.funcs
            .iter()
            .zip(range.iter())
            .try_for_each(|(f, space)| f.check_domain(space))
    }

    pub fn call(&self, x: &[ArrayD<A>]) -> Result<A> {
        self.space.check(x)?;
        self.funcs
            .iter()
            .zip(x)
            .try_fold(A::zero(), |acc, (f, xi)| Ok(acc + f.call(xi.view())?))
    }

    pub fn proximal(&self, x: &[ArrayD<A>], sigma: A) -> Result<Vec<ArrayD<A>>> {
        self.space.check(x)?;
        self.funcs
            .iter()
            .zip(x)
            .map(|(f, xi)| f.proximal(xi.view(), sigma))
            .collect()
    }

    pub fn convex_conj_proximal(&self, y: &[ArrayD<A>], sigma: A) -> Result<Vec<ArrayD<A>>> {
        self.space.check(y)?;
        self.funcs
            .iter()
            .zip(y)
            .map(|(f, yi)| f.convex_conj_proximal(yi.view(), sigma))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn vec1(v: &[f64]) -> ArrayD<f64> {
        Array::from(v.to_vec()).into_dyn()
    }

    #[test]
    fn nonnegativity() {
        let space = Space::new(&[4]);
        let f = Functional::nonnegativity(space);
        let x = vec1(&[0., 1., 2.5, 1e-300]);
        assert_eq!(f.call(x.view()).unwrap(), 0.);
        assert_eq!(f.proximal(x.view(), 0.7).unwrap(), x);

        let y = vec1(&[-1., 1., -0.0001, 3.]);
        assert_eq!(f.call(y.view()).unwrap(), f64::INFINITY);
        assert!(!f.is_feasible(y.view()).unwrap());
        assert_eq!(f.proximal(y.view(), 0.7).unwrap(), vec1(&[0., 1., 0., 3.]));
    }

    #[test]
    fn soft_threshold_scalar() {
        let sigma = 0.75;
        assert_eq!(soft_threshold(-2.0, sigma), -1.25);
        assert_eq!(soft_threshold(-0.75, sigma), 0.0);
        assert_eq!(soft_threshold(0.3, sigma), 0.0);
        assert_eq!(soft_threshold(2.0, sigma), 1.25);

        let mut t: f64 = -3.0;
        while t <= 3.0 {
            let p = soft_threshold(t, sigma);
            assert_abs_diff_eq!(p.abs(), (t.abs() - sigma).max(0.), epsilon = 1e-12);
            assert!(p == 0. || p.signum() == t.signum());
            t += 0.125;
        }
    }

    #[test]
    fn l1_proximal_uses_scale() {
        let f = Functional::l1_norm(Space::new(&[3])).scaled(2.0).unwrap();
        let x = vec1(&[-3., 0.5, 4.]);
        assert_abs_diff_eq!(f.call(x.view()).unwrap(), 15.);
        let p = f.proximal(x.view(), 0.5).unwrap();
        assert_abs_diff_eq!(p, vec1(&[-2., 0., 3.]));
    }

    #[test]
    fn indicator_of_data() {
        let data = vec1(&[1., -2., 3.]);
        let f = Functional::indicator_equal(Space::new(&[3]), data.clone()).unwrap();
        assert_eq!(f.call(data.view()).unwrap(), 0.);
        assert_eq!(f.call(vec1(&[1., -2., 3.5]).view()).unwrap(), f64::INFINITY);
        assert_eq!(f.proximal(vec1(&[9., 9., 9.]).view(), 1.0).unwrap(), data);
    }

    #[test]
    fn l2_ball() {
        let f = Functional::l2_ball(Space::new(&[2]), 1.0).unwrap();
        let inside = vec1(&[0.6, 0.0]);
        assert_eq!(f.call(inside.view()).unwrap(), 0.);
        assert_eq!(f.proximal(inside.view(), 3.0).unwrap(), inside);

        let outside = vec1(&[3., 4.]);
        assert_eq!(f.call(outside.view()).unwrap(), f64::INFINITY);
        let p = f.proximal(outside.view(), 3.0).unwrap();
        assert_abs_diff_eq!(p, vec1(&[0.6, 0.8]), epsilon = 1e-12);
        assert_eq!(f.call(p.view()).unwrap(), 0.);
        assert!(Functional::l2_ball(Space::<f64>::new(&[2]), -1.0).is_err());
    }

    #[test]
    fn translated_l2_squared_moves_toward_data() {
        let data = vec1(&[1., 2.]);
        let f = Functional::l2_norm_squared(Space::new(&[2]))
            .translated(data.clone())
            .unwrap();
        let x = vec1(&[5., -2.]);
        assert_abs_diff_eq!(f.call(x.view()).unwrap(), 32.);
        let sigma = 0.25;
        let p = f.proximal(x.view(), sigma).unwrap();
        // (x + 2σ b) / (1 + 2σ)
        let expected = (&x + &(&data * (2. * sigma))) / (1. + 2. * sigma);
        assert_abs_diff_eq!(p, expected, epsilon = 1e-12);
        assert_abs_diff_eq!(f.gradient(x.view()).unwrap(), vec1(&[8., -8.]));
    }

    #[test]
    fn group_l1_shrinks_vectors() {
        let space = Space::new(&[2, 2]);
        let f = Functional::group_l1_norm(space).unwrap();
        // two 2-vectors, (3, 4) and (0.3, 0.4), stored along axis 0
        let x = array![[3., 0.3], [4., 0.4]].into_dyn();
        assert_abs_diff_eq!(f.call(x.view()).unwrap(), 5.5, epsilon = 1e-12);
        let p = f.proximal(x.view(), 1.0).unwrap();
        assert_abs_diff_eq!(p, array![[2.4, 0.], [3.2, 0.]].into_dyn(), epsilon = 1e-12);
        assert!(Functional::group_l1_norm(Space::<f64>::new(&[])).is_err());
    }

    #[test]
    fn l2_norm_block_shrink() {
        let f = Functional::l2_norm(Space::new(&[2]));
        let x = vec1(&[3., 4.]);
        assert_abs_diff_eq!(f.proximal(x.view(), 1.0).unwrap(), vec1(&[2.4, 3.2]), epsilon = 1e-12);
        assert_abs_diff_eq!(f.proximal(x.view(), 6.0).unwrap(), vec1(&[0., 0.]));
    }

    #[test]
    fn convex_conjugate_proximals() {
        // (α‖·‖₁)* is the indicator of the α-box, whose prox clips
        let f = Functional::l1_norm(Space::new(&[4])).scaled(0.5).unwrap();
        let y = vec1(&[-2., -0.2, 0.4, 7.]);
        let p = f.convex_conj_proximal(y.view(), 3.0).unwrap();
        assert_abs_diff_eq!(p, vec1(&[-0.5, -0.2, 0.4, 0.5]), epsilon = 1e-12);

        // (½‖· − d‖²)*(y) = ½‖y‖² + ⟨y, d⟩, prox is (y − σd)/(1 + σ)
        let d = vec1(&[1., -1., 2., 0.]);
        let g = Functional::l2_norm_squared(Space::new(&[4]))
            .scaled(0.5)
            .unwrap()
            .translated(d.clone())
            .unwrap();
        let sigma = 0.4;
        let p = g.convex_conj_proximal(y.view(), sigma).unwrap();
        let expected = (&y - &(&d * sigma)) / (1. + sigma);
        assert_abs_diff_eq!(p, expected, epsilon = 1e-12);

        // ι_{≥0}* = ι_{≤0}
        let h = Functional::nonnegativity(Space::new(&[4]));
        let p = h.convex_conj_proximal(y.view(), 2.0).unwrap();
        assert_abs_diff_eq!(p, vec1(&[-2., -0.2, 0., 0.]), epsilon = 1e-12);
    }

    #[test]
    fn invalid_arguments() {
        let f = Functional::l1_norm(Space::<f64>::new(&[2]));
        let x = vec1(&[1., 2.]);
        assert!(matches!(
            f.proximal(x.view(), 0.0),
            Err(Error::InvalidParameter { name: "sigma", .. })
        ));
        assert!(f.proximal(x.view(), -1.0).is_err());
        assert!(f.clone().scaled(0.0).is_err());
        assert!(f.clone().scaled(f64::INFINITY).is_err());
        assert!(matches!(
            f.clone().translated(vec1(&[1., 2., 3.])),
            Err(Error::DimensionMismatch { .. })
        ));
        assert!(matches!(
            f.proximal(vec1(&[1.]).view(), 1.0),
            Err(Error::DimensionMismatch { .. })
        ));
    }

    #[test]
    fn separable_sum_is_componentwise() {
        let f = SeparableSum::new(vec![
            Functional::nonnegativity(Space::new(&[2])),
            Functional::l1_norm(Space::new(&[3])),
        ])
        .unwrap();
        let x = vec![vec1(&[-1., 2.]), vec1(&[-1., 0.2, 3.])];
        assert_eq!(f.call(&x).unwrap(), f64::INFINITY);
        let p = f.proximal(&x, 0.5).unwrap();
        assert_abs_diff_eq!(p[0], vec1(&[0., 2.]));
        assert_abs_diff_eq!(p[1], vec1(&[-0.5, 0., 2.5]), epsilon = 1e-12);
        assert_abs_diff_eq!(f.call(&p).unwrap(), 3.0, epsilon = 1e-12);

        assert!(f.check_domain(&ProductSpace::new(vec![Space::new(&[2]), Space::new(&[3])])).is_ok());
        assert!(f.check_domain(&ProductSpace::new(vec![Space::new(&[3]), Space::new(&[2])])).is_err());
        assert!(f.check_domain(&ProductSpace::new(vec![Space::new(&[2])])).is_err());
        assert!(f.proximal(&x[..1], 0.5).is_err());
        assert!(SeparableSum::<f64>::new(vec![]).is_err());
    }
}
