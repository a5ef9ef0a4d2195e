//! Domain logic with no I/O: pixel conversions and typed command views.

pub mod pixels;
pub mod transform;

pub use pixels::{
    convert, convert_weighted, luminance, weighted_luminance, ConversionError, LUMA_COEFFICIENTS,
};
pub use transform::{Rotation, Transform, TransformKind, Vector3};
