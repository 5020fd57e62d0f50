//! Discretized function spaces
//!
//! A [`Space`] describes the shape of the arrays an operator accepts or
//! produces, together with the physical size of one grid cell along each
//! axis. Elements are plain `ArrayD`s; the space only checks and creates
//! them. Inner products are unweighted (Euclidean), so the cell sides only
//! enter through operators such as [`crate::linop::Gradient`].

use std::ops::Index;

use ndarray::prelude::*;
use ndarray::{IxDyn, NdFloat, Zip};
use ndarray_rand::rand::distributions::uniform::SampleUniform;
use ndarray_rand::rand::Rng;
use ndarray_rand::rand_distr::Uniform;
use ndarray_rand::RandomExt;

use crate::error::{Error, Result};

#[derive(Clone, Debug, PartialEq)]
pub struct Space<A> {
    shape: IxDyn,
    cell_sides: Vec<A>,
}

impl<A: NdFloat> Space<A> {
    /// Space of arrays with the given shape and unit cell sides.
    pub fn new(shape: &[usize]) -> Self {
        Space {
            shape: IxDyn(shape),
            cell_sides: vec![A::one(); shape.len()],
        }
    }

    /// Space with one (positive, finite) cell side per axis.
    pub fn with_cell_sides(shape: &[usize], cell_sides: &[A]) -> Result<Self> {
        if cell_sides.len() != shape.len() {
            return Err(Error::mismatch(
                "cell sides",
                &[shape.len()],
                &[cell_sides.len()],
            ));
        }
        if let Some(&h) = cell_sides.iter().find(|h| !(h.is_finite() && **h > A::zero())) {
            return Err(Error::invalid("cell_side", h, "must be finite and positive"));
        }
        Ok(Space {
            shape: IxDyn(shape),
            cell_sides: cell_sides.to_vec(),
        })
    }

    pub fn shape(&self) -> &[usize] {
        self.shape.slice()
    }

    pub fn dim(&self) -> IxDyn {
        self.shape.clone()
    }

    pub fn ndim(&self) -> usize {
        self.shape.ndim()
    }

    /// Number of samples in an element.
    pub fn size(&self) -> usize {
        self.shape.size()
    }

    pub fn cell_sides(&self) -> &[A] {
        &self.cell_sides
    }

    pub fn zero(&self) -> ArrayD<A> {
        ArrayD::zeros(self.shape.clone())
    }

    pub fn one(&self) -> ArrayD<A> {
        ArrayD::ones(self.shape.clone())
    }

    /// Takes ownership of `array` as an element, checking its shape.
    pub fn element(&self, array: ArrayD<A>) -> Result<ArrayD<A>> {
        self.check(&array.view())?;
        Ok(array)
    }

    pub fn contains(&self, x: &ArrayViewD<A>) -> bool {
        x.shape() == self.shape()
    }

    pub fn check(&self, x: &ArrayViewD<A>) -> Result<()> {
        if self.contains(x) {
            Ok(())
        } else {
            Err(Error::mismatch("space element", self.shape(), x.shape()))
        }
    }

    pub fn inner(&self, x: &ArrayViewD<A>, y: &ArrayViewD<A>) -> A {
        inner(x, y)
    }

    pub fn norm(&self, x: &ArrayViewD<A>) -> A {
        norm(x)
    }

    pub fn dist(&self, x: &ArrayViewD<A>, y: &ArrayViewD<A>) -> A {
        let mut acc = A::zero();
        Zip::from(x).and(y).for_each(|&a, &b| acc += (a - b) * (a - b));
        acc.sqrt()
    }

    /// Uniform noise in `[0, 1)`, a non-constant element suitable as a
    /// power-iteration seed.
    pub fn noise<R: Rng + ?Sized>(&self, rng: &mut R) -> ArrayD<A>
    where
        A: SampleUniform,
    {
        ArrayD::random_using(self.shape.clone(), Uniform::new(A::zero(), A::one()), rng)
    }
}

/// Euclidean inner product of two arrays of equal shape.
pub fn inner<A: NdFloat>(x: &ArrayViewD<A>, y: &ArrayViewD<A>) -> A {
    let mut acc = A::zero();
    Zip::from(x).and(y).for_each(|&a, &b| acc += a * b);
    acc
}

pub fn norm<A: NdFloat>(x: &ArrayViewD<A>) -> A {
    x.fold(A::zero(), |acc, &a| acc + a * a).sqrt()
}

/// Ordered tuple of spaces, the range of a broadcast operator.
#[derive(Clone, Debug, PartialEq)]
pub struct ProductSpace<A> {
    spaces: Vec<Space<A>>,
}

impl<A: NdFloat> ProductSpace<A> {
    pub fn new(spaces: Vec<Space<A>>) -> Self {
        ProductSpace { spaces }
    }

    pub fn len(&self) -> usize {
        self.spaces.len()
    }

    pub fn is_empty(&self) -> bool {
        self.spaces.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Space<A>> {
        self.spaces.iter()
    }

    pub fn zero(&self) -> Vec<ArrayD<A>> {
        self.spaces.iter().map(Space::zero).collect()
    }

    pub fn check(&self, x: &[ArrayD<A>]) -> Result<()> {
        if x.len() != self.spaces.len() {
            return Err(Error::mismatch(
                "product space components",
                &[self.spaces.len()],
                &[x.len()],
            ));
        }
        self.spaces
            .iter()
            .zip(x)
            .try_for_each(|(space, xi)| space.check(&xi.view()))
    }

    pub fn inner(&self, x: &[ArrayD<A>], y: &[ArrayD<A>]) -> A {
        x.iter()
            .zip(y)
            .fold(A::zero(), |acc, (xi, yi)| acc + inner(&xi.view(), &yi.view()))
    }
}

impl<A> Index<usize> for ProductSpace<A> {
    type Output = Space<A>;

    fn index(&self, i: usize) -> &Space<A> {
        &self.spaces[i]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray_rand::rand::rngs::StdRng;
    use ndarray_rand::rand::SeedableRng;

    #[test]
    fn element_shape_is_checked() {
        let space = Space::<f64>::new(&[3, 4]);
        assert!(space.element(ArrayD::zeros(IxDyn(&[3, 4]))).is_ok());
        match space.element(ArrayD::zeros(IxDyn(&[4, 3]))) {
            Err(Error::DimensionMismatch { expected, found, .. }) => {
                assert_eq!(expected, vec![3, 4]);
                assert_eq!(found, vec![4, 3]);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn cell_sides_must_be_positive() {
        assert!(Space::with_cell_sides(&[2, 2], &[0.5, 1.0]).is_ok());
        assert!(Space::with_cell_sides(&[2, 2], &[0.5]).is_err());
        assert!(Space::with_cell_sides(&[2, 2], &[0.5, 0.0]).is_err());
        assert!(Space::with_cell_sides(&[2, 2], &[f64::NAN, 1.0]).is_err());
    }

    #[test]
    fn euclidean_geometry() {
        let space = Space::<f64>::new(&[2, 2]);
        let x = array![[1., 2.], [3., 4.]].into_dyn();
        let y = space.one();
        assert_abs_diff_eq!(space.inner(&x.view(), &y.view()), 10.);
        assert_abs_diff_eq!(space.norm(&x.view()), 30f64.sqrt());
        assert_abs_diff_eq!(space.dist(&x.view(), &x.view()), 0.);
    }

    #[test]
    fn noise_is_not_constant() {
        let space = Space::<f64>::new(&[8, 8]);
        let mut rng = StdRng::seed_from_u64(7);
        let x = space.noise(&mut rng);
        let first = x[[0, 0]];
        assert!(x.iter().any(|&v| v != first));
        assert!(x.iter().all(|&v| (0.0..1.0).contains(&v)));
    }

    #[test]
    fn product_space_checks_every_component() {
        let pspace = ProductSpace::new(vec![Space::<f64>::new(&[2]), Space::new(&[2, 3])]);
        let zero = pspace.zero();
        assert!(pspace.check(&zero).is_ok());
        assert!(pspace.check(&zero[..1]).is_err());
        let swapped = vec![zero[1].clone(), zero[0].clone()];
        assert!(pspace.check(&swapped).is_err());
        assert_eq!(pspace[1].shape(), &[2, 3]);
    }
}
