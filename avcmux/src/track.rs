//! The video track described by the init segment.

use std::num::NonZeroU32;

use avcmux_common::Result;

use crate::boxes::AvcDecoderConfigurationRecord;
use crate::error::{MuxError, WhereEq};
use crate::params::{ParameterSetCache, Pps, Sps};
use crate::Config;

/// The single H.264 video track of the output.
///
/// A [`Track`] is created from the stream's first SPS and PPS, and is never updated afterwards.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Track {
    /// The `track_ID` of the track.
    pub id: NonZeroU32,
    /// The media timescale of the track, in ticks per second.
    pub timescale: NonZeroU32,
    /// The movie timescale, in ticks per second.
    pub movie_timescale: NonZeroU32,
    /// The width of the video in pixels.
    pub width: u16,
    /// The height of the video in pixels.
    pub height: u16,
    /// The SPS the track was created from.
    pub sps: Sps,
    /// The PPS the track was created from.
    pub pps: Pps,
}

impl Track {
    /// Create a track from the cached parameter sets.
    ///
    /// Fails with [`MuxError::MissingParameterSet`] if either an SPS or a PPS has not been cached yet.
    pub fn new(parameter_sets: &ParameterSetCache, config: &Config) -> Result<Self, MuxError> {
        let (sps, pps) = parameter_sets.get()?;
        let Ok(width) = u16::try_from(sps.width) else {
            bail_attach!(MuxError::InvalidParameterSet, WhereEq("width", sps.width));
        };
        let Ok(height) = u16::try_from(sps.height) else {
            bail_attach!(MuxError::InvalidParameterSet, WhereEq("height", sps.height));
        };
        Ok(Self {
            id: config.track_id,
            timescale: config.timescale,
            movie_timescale: config.movie_timescale,
            width,
            height,
            sps: sps.clone(),
            pps: pps.clone(),
        })
    }

    /// The decoder configuration record of the track's `avcC` box.
    pub fn decoder_configuration(&self) -> Result<AvcDecoderConfigurationRecord, MuxError> {
        AvcDecoderConfigurationRecord::new(&self.sps, &self.pps)
    }
}
