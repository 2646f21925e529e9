//! Fragment assembly: the `moof` and `mdat` boxes carrying samples.

use std::io::Write;

use avcmux_common::ResultExt;
use bytes::{Bytes, BytesMut};

use crate::bitstream::put_length_prefixed;
use crate::boxes::{BoxHeader, BoxType, BoxWriter, Boxes, FullBoxHeader, Mp4Box, SampleFlags, TfhdFlags, TrunFlags};
use crate::error::{Error, MuxError, MuxResultExt};
use crate::init::InitSegmentBuilder;
use crate::nal::{NalScanner, NalUnitType};
use crate::params::ParameterSetCache;
use crate::timescale::ms_to_sample_duration;
use crate::track::Track;
use crate::Config;

//
// public types
//

/// Muxes H.264 access units into a fragmented MP4 stream written to `W`.
///
/// The init segment is written before the first fragment, as soon as a keyframe is fed after an SPS and PPS have been
/// seen. Samples fed before that are dropped.
#[derive(Debug)]
pub struct FragmentBuilder<W> {
    sink: W,
    config: Config,
    scanner: NalScanner,
    parameter_sets: ParameterSetCache,
    init_segment: InitSegmentBuilder,
    track: Option<Track>,
    pending: Vec<SampleDescriptor>,
    sequence_number: u32,
    base_media_decode_time: u64,
    stats: FragmentStats,
}

/// A sample waiting to be written in a fragment.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SampleDescriptor {
    /// The length-prefixed slice NAL units of the sample.
    pub data: Bytes,
    /// The duration of the sample, in ticks of the track timescale.
    pub duration: u32,
    /// The `sample_flags` of the sample.
    pub flags: SampleFlags,
    /// The composition time offset of the sample, in ticks of the track timescale.
    pub composition_time_offset: u32,
}

/// Totals reported by a [`FragmentBuilder`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FragmentStats {
    /// The number of `moof`/`mdat` pairs written.
    pub fragments: u64,
    /// The number of samples written.
    pub samples: u64,
    /// The number of samples dropped because they were fed before the init segment could be written.
    pub dropped_samples: u64,
    /// The number of bytes written to the sink, including the init segment.
    pub bytes_written: u64,
}

//
// FragmentBuilder impls
//

impl<W: Write> FragmentBuilder<W> {
    /// Construct a [`FragmentBuilder`] writing to `sink` with the default [`Config`].
    pub fn new(sink: W) -> Self {
        Self::with_config(sink, Config::default())
    }

    /// Construct a [`FragmentBuilder`] writing to `sink`.
    pub fn with_config(sink: W, config: Config) -> Self {
        Self {
            sink,
            config,
            scanner: NalScanner,
            parameter_sets: ParameterSetCache::new(),
            init_segment: InitSegmentBuilder::new(),
            track: None,
            pending: Vec::new(),
            sequence_number: 0,
            base_media_decode_time: 0,
            stats: FragmentStats::default(),
        }
    }

    /// Feed one access unit in Annex-B format.
    ///
    /// Parameter sets in `sample` are cached, and its slice NAL units become one sample lasting `duration_ms`
    /// milliseconds, or the configured default duration if `duration_ms` is zero. Every other NAL unit is discarded.
    ///
    /// If this is the first keyframe, the init segment is written first. Samples fed before the first keyframe are
    /// dropped. Depending on [`Config::samples_per_fragment`], the pending fragment may be flushed before returning.
    pub fn feed(&mut self, sample: &[u8], is_keyframe: bool, duration_ms: u64) -> Result<(), Error> {
        let duration_ms = match duration_ms {
            0 => self.config.default_duration_ms,
            duration_ms => duration_ms,
        };

        let mut data = BytesMut::with_capacity(sample.len());
        let mut slice_count = 0;
        for nal in self.scanner.scan(sample) {
            match nal.nal_type() {
                nal_type if nal_type.is_parameter_set() => {
                    let Some(track) = &self.track else {
                        self.parameter_sets.ingest(&nal)?;
                        continue;
                    };
                    if let Err(err) = self.parameter_sets.ingest(&nal) {
                        log::warn!("malformed {nal_type} after init segment skipped: {err}");
                        continue;
                    }
                    let changed = match nal_type {
                        NalUnitType::Sps => track.sps.raw() != nal.data(),
                        _ => track.pps.raw() != nal.data(),
                    };
                    if changed {
                        log::warn!("new {nal_type} after init segment ignored");
                    }
                }
                nal_type if nal_type.is_slice() => {
                    put_length_prefixed(nal.data(), &mut data)?;
                    slice_count += 1;
                }
                nal_type => log::debug!("{nal_type} NAL unit @ 0x{offset:08x} discarded", offset = nal.offset()),
            }
        }

        if self.track.is_none() {
            if !is_keyframe {
                if slice_count > 0 {
                    log::debug!("sample dropped: no keyframe fed yet");
                    self.stats.dropped_samples += 1;
                }
                return Ok(());
            }
            self.write_init_segment()?;
        }

        if slice_count == 0 {
            log::debug!("sample of {len} bytes has no slices", len = sample.len());
            return Ok(());
        }

        let timescale = self.config.timescale.get();
        self.pending.push(SampleDescriptor {
            data: data.freeze(),
            duration: ms_to_sample_duration(duration_ms, timescale),
            flags: SampleFlags::for_keyframe(is_keyframe),
            composition_time_offset: 0,
        });

        if let Some(samples_per_fragment) = self.config.samples_per_fragment {
            if self.pending.len() >= samples_per_fragment.get() {
                self.flush()?;
            }
        }
        Ok(())
    }

    /// Write all pending samples as one fragment. Does nothing if no samples are pending.
    pub fn flush(&mut self) -> Result<(), Error> {
        if self.pending.is_empty() {
            return Ok(());
        }
        let Some(track) = &self.track else {
            bail_attach!(MuxError::MissingParameterSet(NalUnitType::Sps), "samples pending without a track");
        };

        let sequence_number = self.sequence_number.wrapping_add(1);
        let track_id = track.id.get();
        let mdat_data_len = self.pending.iter().map(|sample| sample.data.len() as u64).sum();
        let mdat_header = BoxHeader::with_data_size(BoxType::MDAT, mdat_data_len);

        // The size of the moof does not depend on the value of data_offset.
        let moof = build_moof(sequence_number, track_id, self.base_media_decode_time, &self.pending, 0)?;
        let data_offset = moof.encoded_len() + mdat_header.encoded_len();
        let Ok(data_offset) = i32::try_from(data_offset) else {
            bail_attach!(MuxError::InvalidBoxLayout, "moof too large for data_offset", WhileFlushing);
        };
        let moof = build_moof(sequence_number, track_id, self.base_media_decode_time, &self.pending, data_offset)?;

        let mut out = BytesMut::with_capacity((moof.encoded_len() + mdat_header.encoded_len()) as usize);
        moof.put_buf(&mut out);
        mdat_header.put_buf(&mut out);

        log::info!(
            "moof @ 0x{pos:08x}: {size} bytes, sequence number {sequence_number}, {count} samples",
            pos = self.stats.bytes_written,
            size = moof.encoded_len(),
            count = self.pending.len(),
        );
        log::info!(
            "mdat @ 0x{pos:08x}: {size} bytes",
            pos = self.stats.bytes_written + moof.encoded_len(),
            size = mdat_header.box_size(),
        );

        self.sink.write_all(&out)?;
        for sample in &self.pending {
            self.sink.write_all(&sample.data)?;
        }

        self.sequence_number = sequence_number;
        let fragment_duration: u64 = self.pending.iter().map(|sample| u64::from(sample.duration)).sum();
        self.base_media_decode_time += fragment_duration;
        self.stats.fragments += 1;
        self.stats.samples += self.pending.len() as u64;
        self.stats.bytes_written += moof.encoded_len() + mdat_header.box_size();
        self.pending.clear();
        Ok(())
    }

    /// Flush any pending samples and flush the sink, returning it.
    pub fn finish(mut self) -> Result<W, Error> {
        self.flush()?;
        self.sink.flush()?;
        log::info!(
            "finished: {fragments} fragments, {samples} samples, {dropped} dropped, {bytes} bytes",
            fragments = self.stats.fragments,
            samples = self.stats.samples,
            dropped = self.stats.dropped_samples,
            bytes = self.stats.bytes_written,
        );
        Ok(self.sink)
    }

    fn write_init_segment(&mut self) -> Result<(), Error> {
        let track = Track::new(&self.parameter_sets, &self.config).attach_printable(WhileWritingInitSegment)?;
        let boxes = self.init_segment.build(&track)?;
        self.write_boxes(&boxes)?;
        log::info!(
            "track {id}: {width}x{height}, profile {profile} level {level}, timescale {timescale}",
            id = track.id,
            width = track.width,
            height = track.height,
            profile = track.sps.profile_idc,
            level = track.sps.level_idc,
            timescale = track.timescale,
        );
        self.track = Some(track);
        Ok(())
    }

    fn write_boxes(&mut self, boxes: &Boxes) -> Result<(), Error> {
        for mp4box in &boxes.boxes {
            let size = mp4box.encoded_len();
            log::info!("{name} @ 0x{pos:08x}: {size} bytes", name = mp4box.box_type, pos = self.stats.bytes_written);
            let mut out = BytesMut::with_capacity(size as usize);
            mp4box.put_buf(&mut out);
            self.sink.write_all(&out)?;
            self.stats.bytes_written += size;
        }
        Ok(())
    }
}

impl<W> FragmentBuilder<W> {
    /// The track, once the init segment has been written.
    pub fn track(&self) -> Option<&Track> {
        self.track.as_ref()
    }

    /// The sequence number of the last fragment written, or 0 if none has been.
    pub fn sequence_number(&self) -> u32 {
        self.sequence_number
    }

    /// The decode time of the next fragment, in ticks of the track timescale.
    pub fn base_media_decode_time(&self) -> u64 {
        self.base_media_decode_time
    }

    /// The samples which will be written by the next [`flush`](Self::flush).
    pub fn pending_samples(&self) -> &[SampleDescriptor] {
        &self.pending
    }

    /// Totals for the stream so far.
    pub fn stats(&self) -> &FragmentStats {
        &self.stats
    }

    /// The parameter sets cached so far.
    pub fn parameter_sets(&self) -> &ParameterSetCache {
        &self.parameter_sets
    }

    /// A reference to the sink.
    pub fn get_ref(&self) -> &W {
        &self.sink
    }
}

#[derive(Clone, Copy, Debug, derive_more::Display)]
#[display(fmt = "while flushing fragment")]
struct WhileFlushing;

#[derive(Clone, Copy, Debug, derive_more::Display)]
#[display(fmt = "while writing init segment")]
struct WhileWritingInitSegment;

/// Build a `moof` box describing `samples`, whose data begins `data_offset` bytes after the start of the `moof`.
fn build_moof(
    sequence_number: u32,
    track_id: u32,
    base_media_decode_time: u64,
    samples: &[SampleDescriptor],
    data_offset: i32,
) -> avcmux_common::Result<Mp4Box, MuxError> {
    let Ok(sample_count) = u32::try_from(samples.len()) else {
        bail_attach!(MuxError::InvalidBoxLayout, "too many samples in fragment");
    };

    let tfhd_flags = TfhdFlags::DEFAULT_BASE_IS_MOOF | TfhdFlags::DEFAULT_SAMPLE_FLAGS_PRESENT;
    let mut trun_flags = TrunFlags::DATA_OFFSET_PRESENT
        | TrunFlags::SAMPLE_DURATION_PRESENT
        | TrunFlags::SAMPLE_SIZE_PRESENT
        | TrunFlags::SAMPLE_FLAGS_PRESENT;
    let has_composition_offsets = samples.iter().any(|sample| sample.composition_time_offset != 0);
    if has_composition_offsets {
        trun_flags |= TrunFlags::SAMPLE_COMPOSITION_TIME_OFFSET_PRESENT;
    }

    let mut writer = BoxWriter::new();
    writer.begin_box(BoxType::MOOF);
    writer
        .begin_full_box(BoxType::MFHD, FullBoxHeader::new(0, 0))
        .put_u32(sequence_number)
        .end_box()?;
    writer.begin_box(BoxType::TRAF);
    writer
        .begin_full_box(BoxType::TFHD, FullBoxHeader::new(0, tfhd_flags.bits()))
        .put_u32(track_id)
        .put_u32(SampleFlags::NON_SYNC.0) // default_sample_flags
        .end_box()?;
    writer
        .begin_full_box(BoxType::TFDT, FullBoxHeader::new(1, 0))
        .put_u64(base_media_decode_time)
        .end_box()?;
    writer
        .begin_full_box(BoxType::TRUN, FullBoxHeader::new(0, trun_flags.bits()))
        .put_u32(sample_count)
        .put_i32(data_offset);
    for sample in samples {
        let Ok(size) = u32::try_from(sample.data.len()) else {
            bail_attach!(MuxError::InvalidBoxLayout, "sample too large", WhereSampleSize(sample.data.len()));
        };
        writer.put_u32(sample.duration).put_u32(size).put_u32(sample.flags.0);
        if has_composition_offsets {
            writer.put_u32(sample.composition_time_offset);
        }
    }
    writer.end_box()?; // trun
    writer.end_box()?; // traf
    writer.end_box()?; // moof

    let mut boxes = writer.finish().while_writing_box(BoxType::MOOF)?;
    match boxes.boxes.pop() {
        Some(moof) if boxes.boxes.is_empty() => Ok(moof),
        _ => bail_attach!(MuxError::InvalidBoxLayout, WhileFlushing),
    }
}

#[derive(Clone, Copy, Debug, derive_more::Display)]
#[display(fmt = "where sample size = {}", _0)]
struct WhereSampleSize(usize);
