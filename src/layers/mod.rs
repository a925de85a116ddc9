/// Neural network layer primitives
///
/// - Normalizations (batch norm with inference mode and freezable affine parameters)

pub mod normalization;

pub use normalization::BatchNorm;
