//! Primitive types shared by the box writer and the box-tree verifier.

mod fourcc;

pub use fourcc::FourCC;
