//! Differentiable operations (backward passes).
//!
//! Each submodule mirrors one forward step of stroke rendering:
//! shape → covariance, covariance + mean → footprint weight, alphas → composite.

pub mod blend_grad;
pub mod footprint_grad;
pub mod math_grad;
pub mod shape_grad;
