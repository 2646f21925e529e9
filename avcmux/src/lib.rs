#![warn(missing_docs)]

//! `avcmux` is a fragmented MP4 muxer for H.264 elementary streams.
//!
//! The muxer takes H.264 access units in Annex-B format (NAL units separated by `00 00 01` or `00 00 00 01` start
//! codes) and writes a fragmented MP4 stream:
//!
//! - An init segment (`ftyp` + `moov`) describing a single video track, built from the stream's first SPS and PPS
//!   once the first keyframe is seen.
//! - A sequence of fragments (`moof` + `mdat`), each carrying one or more samples whose NAL units are rewritten with
//!   4-byte length prefixes.
//!
//! The output is written incrementally to any [`Write`] sink and never needs to be seeked, so it can be streamed
//! directly to a socket or a pipe.
//!
//! # Limitations
//!
//! The muxer does not currently support:
//!
//! - More than one track, or any codec other than H.264.
//! - B-frame reordering; all samples have a composition time offset of zero.
//! - Random access indexes (`mfra`, `sidx`) or encryption.
//!
//! # Usage
//!
//! The main entry point is [`FragmentBuilder`], which is fed one access unit at a time:
//!
//! ```
//! # use avcmux_test::{annex_b, idr_slice_nal, pps_nal, sps_nal, SpsSpec};
//! #
//! let keyframe = annex_b(&[&sps_nal(&SpsSpec::new(640, 480)), &pps_nal(), &idr_slice_nal(1000)]);
//!
//! let mut builder = avcmux::FragmentBuilder::new(Vec::new());
//! builder.feed(&keyframe, true, 40)?;
//! let output = builder.finish()?;
//!
//! assert_eq!(&output[4..8], b"ftyp");
//! # Ok::<(), avcmux::Error>(())
//! ```
//!
//! A whole stream can also be muxed from a [`SampleSource`] with [`mux`] or [`mux_with_config`].

#[macro_use]
extern crate avcmux_common;

pub mod bitstream;
pub mod boxes;
pub mod error;
pub mod fragment;
pub mod init;
pub mod nal;
pub mod params;
pub mod source;
pub mod timescale;
pub mod track;

use std::io::Write;
use std::num::{NonZeroU32, NonZeroUsize};

use derive_builder::Builder;

pub use crate::error::{Error, MuxError};
pub use crate::fragment::{FragmentBuilder, FragmentStats, SampleDescriptor};
pub use crate::init::InitSegmentBuilder;
pub use crate::nal::{NalScanner, NalUnit, NalUnitType};
pub use crate::params::ParameterSetCache;
pub use crate::source::{AnnexBSource, Sample, SampleSource, TrackGeometry};
pub use crate::track::Track;

//
// public types
//

#[derive(Builder, Clone, Debug)]
#[builder(build_fn(name = "try_build"))]
/// Configuration for the muxer.
pub struct Config {
    /// The media timescale of the video track, in ticks per second.
    ///
    /// The default is 9000.
    #[builder(default = "DEFAULT_TIMESCALE")]
    pub timescale: NonZeroU32,

    /// The movie timescale, in ticks per second.
    ///
    /// The default is 1000.
    #[builder(default = "DEFAULT_MOVIE_TIMESCALE")]
    pub movie_timescale: NonZeroU32,

    /// The `track_ID` of the video track.
    ///
    /// The default is 1.
    #[builder(default = "NonZeroU32::MIN")]
    pub track_id: NonZeroU32,

    /// The duration in milliseconds given to samples fed with a duration of zero.
    ///
    /// The default is 50.
    #[builder(default = "50")]
    pub default_duration_ms: u64,

    /// The number of samples after which a fragment is flushed automatically, or [`None`] to flush only when
    /// [`FragmentBuilder::flush`] or [`FragmentBuilder::finish`] is called.
    ///
    /// The default is one sample per fragment.
    #[builder(default = "Some(NonZeroUsize::MIN)")]
    pub samples_per_fragment: Option<NonZeroUsize>,
}

//
// private types
//

const DEFAULT_TIMESCALE: NonZeroU32 = match NonZeroU32::new(9000) {
    Some(timescale) => timescale,
    None => unreachable!(),
};

const DEFAULT_MOVIE_TIMESCALE: NonZeroU32 = match NonZeroU32::new(1000) {
    Some(timescale) => timescale,
    None => unreachable!(),
};

//
// public functions
//

/// Mux every sample of `source` into a fragmented MP4 stream written to `sink`, using the default [`Config`].
pub fn mux<S: SampleSource, W: Write>(source: S, sink: W) -> Result<FragmentStats, Error> {
    mux_with_config(source, sink, Config::default())
}

/// Mux every sample of `source` into a fragmented MP4 stream written to `sink`.
pub fn mux_with_config<S: SampleSource, W: Write>(
    mut source: S,
    sink: W,
    config: Config,
) -> Result<FragmentStats, Error> {
    let mut builder = FragmentBuilder::with_config(sink, config);
    let mut geometry_logged = false;
    while let Some(sample) = source.next_sample()? {
        if !geometry_logged {
            if let Some(geometry) = source.geometry() {
                log::info!(
                    "source: {width}x{height} @ {frame_rate:?} fps",
                    width = geometry.width,
                    height = geometry.height,
                    frame_rate = geometry.frame_rate,
                );
                geometry_logged = true;
            }
        }
        builder.feed(&sample.data, sample.is_keyframe, sample.duration_ms)?;
    }
    builder.flush()?;
    let stats = *builder.stats();
    builder.finish()?;
    Ok(stats)
}

//
// Config impls
//

impl Config {
    /// Construct a builder for [`Config`].
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }
}

impl ConfigBuilder {
    /// Build a new [`Config`].
    pub fn build(&self) -> Config {
        self.try_build().unwrap()
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::builder().build()
    }
}

#[cfg(test)]
mod test {
    use assert_matches::assert_matches;
    use avcmux_test::{annex_b, idr_slice_nal, init_logger, parse_box_tree, pps_nal, slice_nal, sps_nal, SpsSpec};

    use super::*;

    struct TestSource {
        samples: std::vec::IntoIter<Sample>,
    }

    impl SampleSource for TestSource {
        fn next_sample(&mut self) -> Result<Option<Sample>, Error> {
            Ok(self.samples.next())
        }
    }

    fn test_source(samples: Vec<(Vec<u8>, bool)>) -> TestSource {
        let samples = samples
            .into_iter()
            .map(|(data, is_keyframe)| Sample { data: data.into(), duration_ms: 40, is_keyframe })
            .collect::<Vec<_>>();
        TestSource { samples: samples.into_iter() }
    }

    #[test]
    fn config_defaults() {
        let config = Config::default();
        assert_eq!(config.timescale.get(), 9000);
        assert_eq!(config.movie_timescale.get(), 1000);
        assert_eq!(config.track_id.get(), 1);
        assert_eq!(config.default_duration_ms, 50);
        assert_eq!(config.samples_per_fragment, NonZeroUsize::new(1));
    }

    #[test]
    fn config_builder() {
        let config = Config::builder()
            .timescale(NonZeroU32::new(90000).unwrap())
            .samples_per_fragment(None)
            .build();
        assert_eq!(config.timescale.get(), 90000);
        assert_eq!(config.samples_per_fragment, None);
        assert_eq!(config.track_id.get(), 1);
    }

    #[test]
    fn mux_source() {
        init_logger();
        let keyframe = annex_b(&[&sps_nal(&SpsSpec::new(640, 480)), &pps_nal(), &idr_slice_nal(100)]);
        let source = test_source(vec![(keyframe, true), (annex_b(&[&slice_nal(50)]), false)]);

        let mut output = Vec::new();
        let stats = mux(source, &mut output).unwrap();
        assert_eq!(stats.fragments, 2);
        assert_eq!(stats.samples, 2);
        assert_eq!(stats.bytes_written, output.len() as u64);
        assert_eq!(parse_box_tree(&output).unwrap().len(), 6);
    }

    #[test]
    fn mux_source_without_keyframe() {
        init_logger();
        let source = test_source(vec![(annex_b(&[&slice_nal(50)]), false)]);

        let mut output = Vec::new();
        let stats = mux(source, &mut output).unwrap();
        assert_eq!(stats.dropped_samples, 1);
        assert!(output.is_empty());
    }

    #[test]
    fn mux_source_with_truncated_sps() {
        init_logger();
        let source = test_source(vec![(annex_b(&[&[0x67, 0x42, 0x00], &pps_nal(), &idr_slice_nal(50)]), true)]);

        let err = mux(source, Vec::new()).unwrap_err();
        assert_matches!(err.media_error(), Some(MuxError::TruncatedParameterSet));
    }
}
