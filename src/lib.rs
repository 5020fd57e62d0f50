//! The `ndarray-proximal` crate minimizes composite convex objectives
//! ```math
//! f(x) + \sum_i g_i(L_i x)
//! ```
//! over `ndarray`s by proximal splitting, the workhorse of variational
//! image reconstruction.
//!
//! It includes:
//! - discretized [spaces](space) and [linear operators](linop) (gradient,
//!   axis projections, matrices, ...) with power-iteration norm estimates
//! - [functionals](functional) with closed-form proximals (indicators,
//!   L1/L2 and group norms), translated and scaled
//! - [splitting solvers](prox): PDHG, primal-dual Douglas-Rachford and
//!   FISTA, which check their step-size conditions before iterating
//! - [total-variation](tv) denoising and reconstruction built from the above
//! - small fixed-architecture [networks](nn) for learned reconstruction and
//!   classification, an explicit [experiment configuration](config) and an
//!   [MNIST](dataset) loader
//!
//! Denoising a noisy step:
//! ```
//! use ndarray::prelude::*;
//! use ndarray_proximal::callback::nop;
//! use ndarray_proximal::tv::{tv_denoise, TvOptions};
//!
//! let data = array![0.1, -0.05, 0.02, 1.1, 0.95, 1.0].into_dyn();
//! let options = TvOptions::new(0.05, 200).nonnegative(true);
//! let x = tv_denoise(data.view(), &options, nop)?;
//! assert!(x.iter().all(|&v| v >= 0.));
//! # Ok::<(), ndarray_proximal::Error>(())
//! ```
//!
//! This crate is in the early development stage and is actively changing.

#![cfg_attr(all(rustc_nightly, test), feature(test))]
#[cfg(all(rustc_nightly, test))]
extern crate test;

pub mod callback;
pub mod config;
pub mod dataset;
mod error;
pub mod functional;
pub mod linop;
pub mod nn;
pub mod prox;
pub mod space;
pub mod tv;

pub use error::{Error, Result};
