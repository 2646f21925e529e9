//! Error types returned by the muxer.

use avcmux_common::error::ReportableError;
use avcmux_common::ResultExt;
use derive_more::Display;

use crate::boxes::BoxType;
use crate::nal::NalUnitType;

/// Error type returned by `avcmux`.
pub type Error = avcmux_common::Error<MuxError>;

/// Error type describing why an H.264 stream could not be muxed.
///
/// Each variant is wrapped in a [`Report`](avcmux_common::Report) whose [`Debug`] implementation prints the stack of
/// context attached while the error propagated.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum MuxError {
    /// A parameter set required to describe the track has not been seen in the stream yet.
    #[error("Missing required {0} parameter set")]
    MissingParameterSet(NalUnitType),

    /// A parameter set ended before all of its required fields.
    #[error("Truncated parameter set")]
    TruncatedParameterSet,

    /// A parameter set contains values outside of the ranges allowed by H.264.
    #[error("Invalid parameter set")]
    InvalidParameterSet,

    /// A length-prefixed NAL unit declares a length longer than the data remaining.
    #[error("Truncated NAL unit")]
    TruncatedNalUnit,

    /// A NAL unit is too large to be length-prefixed with four bytes.
    #[error("NAL unit too large: {0} bytes")]
    NalUnitTooLarge(usize),

    /// Boxes were opened, closed, or written to in an order which does not describe a valid box tree.
    #[error("Invalid box layout")]
    InvalidBoxLayout,

    /// The init segment of a track can only be built once.
    #[error("Init segment already built")]
    InitSegmentAlreadyBuilt,
}

pub(crate) trait MuxResultExt: ResultExt + Sized {
    #[track_caller]
    fn while_writing_box(self, box_type: BoxType) -> Self {
        self.attach_printable(WhileWritingBox(box_type))
    }
}

#[derive(Clone, Copy, Debug, Display)]
#[display(fmt = "while parsing {} field `{}`", _0, _1)]
pub(crate) struct WhileParsingField<T>(pub(crate) NalUnitType, pub(crate) T);

#[derive(Clone, Copy, Debug, Display)]
#[display(fmt = "while writing `{}` box", _0)]
pub(crate) struct WhileWritingBox(pub(crate) BoxType);

#[derive(Clone, Copy, Debug, Display)]
#[display(fmt = "where `{} = {}`", _0, _1)]
pub(crate) struct WhereEq<T, U>(pub(crate) T, pub(crate) U);

impl ReportableError for MuxError {}

impl<T> MuxResultExt for avcmux_common::Result<T, MuxError> {}

