//! Ready-made solver callbacks
//!
//! Every solver takes a `FnMut(ArrayViewD<A>, usize) -> bool` evaluated at
//! $`(x_0, 0)`$ and after each iteration; returning `true` stops early.

use ndarray::prelude::*;
use ndarray::NdFloat;

use crate::space::norm;

/// Never stops.
pub fn nop<A>(_x: ArrayViewD<A>, _iter: usize) -> bool {
    false
}

/// Calls `f` only on iterations divisible by `k` (including iteration 0).
/// An interval of 0 is treated as 1.
pub fn every<A, F>(k: usize, mut f: F) -> impl FnMut(ArrayViewD<A>, usize) -> bool
where
    F: FnMut(ArrayViewD<A>, usize) -> bool,
{
    let k = k.max(1);
    move |x, iter| iter % k == 0 && f(x, iter)
}

/// Logs the iteration count and iterate norm at `info` level every
/// `interval` iterations.
pub fn log_progress<A: NdFloat>(interval: usize) -> impl FnMut(ArrayViewD<A>, usize) -> bool {
    every(interval, |x: ArrayViewD<A>, iter| {
        log::info!(
            "iteration {}: |x| = {}",
            iter,
            norm(&x).to_f64().unwrap_or(f64::NAN)
        );
        false
    })
}

/// Records a copy of the iterate every `interval` iterations into `history`.
pub fn record<'a, A: Clone>(
    interval: usize,
    history: &'a mut Vec<(usize, ArrayD<A>)>,
) -> impl FnMut(ArrayViewD<A>, usize) -> bool + 'a {
    every(interval, move |x: ArrayViewD<A>, iter| {
        history.push((iter, x.to_owned()));
        false
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_skips_iterations() {
        let mut seen = Vec::new();
        let mut cb = every(3, |_: ArrayViewD<f64>, iter| {
            seen.push(iter);
            iter == 6
        });
        let x = ArrayD::<f64>::zeros(IxDyn(&[2]));
        let stops: Vec<bool> = (0..8).map(|i| cb(x.view(), i)).collect();
        drop(cb);
        assert_eq!(seen, vec![0, 3, 6]);
        assert_eq!(stops.iter().position(|&s| s), Some(6));
    }

    #[test]
    fn record_and_log() {
        let mut history = Vec::new();
        {
            let mut cb = record(2, &mut history);
            for i in 0..5 {
                let x = Array::from_elem(IxDyn(&[1]), i as f64);
                assert!(!cb(x.view(), i));
            }
        }
        let iters: Vec<usize> = history.iter().map(|(i, _)| *i).collect();
        assert_eq!(iters, vec![0, 2, 4]);
        assert_eq!(history[2].1[[0]], 4.0);

        let mut cb = log_progress::<f64>(10);
        assert!(!cb(ArrayD::zeros(IxDyn(&[3])).view(), 0));
        assert!(!nop(ArrayD::<f64>::zeros(IxDyn(&[3])).view(), 1));
    }

    #[test]
    fn zero_interval_fires_every_iteration() {
        let mut history = Vec::new();
        {
            let mut cb = record(0, &mut history);
            for i in 0..3 {
                assert!(!cb(ArrayD::<f64>::zeros(IxDyn(&[1])).view(), i));
            }
        }
        let iters: Vec<usize> = history.iter().map(|(i, _)| *i).collect();
        assert_eq!(iters, vec![0, 1, 2]);

        let mut cb = log_progress::<f64>(0);
        assert!(!cb(ArrayD::zeros(IxDyn(&[2])).view(), 5));
    }
}
