//! ISO base media file format box serialization.
//!
//! Boxes are built as an in-memory tree of [`Mp4Box`]es, usually with a [`BoxWriter`]. Box sizes are computed from
//! the tree bottom-up by [`Mp4Box::encoded_len`], so a tree can be measured before it is written out with
//! [`Mp4Box::put_buf`].

mod avcc;
mod flags;
mod ftyp;
mod header;
mod mp4box;
mod writer;

use std::fmt;

use avcmux_common::parse::FourCC;

pub use avcc::AvcDecoderConfigurationRecord;
pub use flags::{SampleFlags, TfhdFlags, TkhdFlags, TrunFlags};
pub use ftyp::FtypBox;
pub use header::{box_type, BoxHeader, BoxSize, FullBoxHeader};
pub use mp4box::{BoxData, Boxes, Mp4Box};
pub use writer::BoxWriter;

/// The type of a box.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct BoxType(FourCC);

impl BoxType {
    /// Construct a [`BoxType`] from its [`FourCC`].
    pub const fn new(fourcc: FourCC) -> Self {
        Self(fourcc)
    }

    /// The [`FourCC`] of this box type.
    pub const fn fourcc(&self) -> FourCC {
        self.0
    }
}

impl From<FourCC> for BoxType {
    fn from(fourcc: FourCC) -> Self {
        Self(fourcc)
    }
}

impl fmt::Display for BoxType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}
