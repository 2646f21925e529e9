//! Sources of H.264 access units to mux.

use std::collections::VecDeque;
use std::io;
use std::io::Read;

use bytes::{Bytes, BytesMut};

use crate::error::Error;
use crate::nal::{NalScanner, NalUnitType, START_CODE_PREFIX};
use crate::params::Sps;
use crate::timescale::MILLISECONDS;

//
// public types
//

/// One access unit read from a [`SampleSource`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Sample {
    /// The NAL units of the access unit, in Annex-B format.
    pub data: Bytes,
    /// The duration of the access unit in milliseconds.
    pub duration_ms: u64,
    /// Whether the access unit is a keyframe, i.e. contains an IDR slice.
    pub is_keyframe: bool,
}

/// The geometry of the video read by a [`SampleSource`].
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TrackGeometry {
    /// The width of the video in pixels.
    pub width: u32,
    /// The height of the video in pixels.
    pub height: u32,
    /// The frame rate of the video in frames per second, if known.
    pub frame_rate: Option<f64>,
}

/// A source of access units, read one at a time.
pub trait SampleSource {
    /// Read the next access unit, or return [`None`] at the end of the stream.
    fn next_sample(&mut self) -> Result<Option<Sample>, Error>;

    /// The geometry of the video, if known yet.
    fn geometry(&self) -> Option<TrackGeometry> {
        None
    }
}

/// A [`SampleSource`] reading a raw H.264 Annex-B elementary stream.
///
/// Access units are delimited following the first-VCL-NAL-unit rules of H.264: a new access unit begins at an access
/// unit delimiter, at an SPS, PPS, or SEI following a slice, or at a slice with `first_mb_in_slice` equal to zero
/// following a slice. Each access unit is given the same duration.
///
/// The input is read incrementally. An access unit is returned as soon as the first NAL unit of the next one has been
/// read in full, so only about one access unit is buffered at a time.
#[derive(Debug)]
pub struct AnnexBSource<R> {
    input: R,
    buffer: BytesMut,
    eof: bool,
    bytes_read: u64,
    ready: VecDeque<Sample>,
    frame_duration_ms: u64,
    geometry: Option<TrackGeometry>,
}

//
// private types
//

#[derive(Clone, Copy, Debug)]
struct AccessUnit {
    start: usize,
    end: usize,
    is_keyframe: bool,
}

const READ_CHUNK_LEN: usize = 64 * 1024;

//
// AnnexBSource impls
//

impl<R: Read> AnnexBSource<R> {
    /// Construct an [`AnnexBSource`] reading from `input`, assigning every access unit `frame_duration_ms`.
    pub fn new(input: R, frame_duration_ms: u64) -> Self {
        Self {
            input,
            buffer: BytesMut::new(),
            eof: false,
            bytes_read: 0,
            ready: VecDeque::new(),
            frame_duration_ms,
            geometry: None,
        }
    }

    /// Construct an [`AnnexBSource`] reading from `input` at `frame_rate` frames per second.
    pub fn with_frame_rate(input: R, frame_rate: u32) -> Self {
        Self::new(input, frame_duration_ms(frame_rate))
    }

    /// A reference to the input.
    pub fn get_ref(&self) -> &R {
        &self.input
    }

    fn fill_buffer(&mut self) -> Result<(), Error> {
        let filled = self.buffer.len();
        self.buffer.resize(filled + READ_CHUNK_LEN, 0);
        let read = loop {
            match self.input.read(&mut self.buffer[filled..]) {
                Ok(read) => break read,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => {
                    self.buffer.truncate(filled);
                    return Err(err.into());
                }
            }
        };
        self.buffer.truncate(filled + read);
        self.bytes_read += read as u64;
        if read == 0 {
            self.eof = true;
            log::info!("read {len} bytes of H.264 stream", len = self.bytes_read);
        }
        Ok(())
    }

    /// Move every access unit in the buffer which can no longer grow to the queue of ready samples.
    fn split_ready_access_units(&mut self) {
        let complete_len = if self.eof {
            self.buffer.len()
        } else {
            last_start_code_prefix(&self.buffer).unwrap_or_default()
        };
        let mut access_units = split_access_units(&self.buffer[..complete_len]);
        if !self.eof {
            // The NAL units following the last access unit may still belong to it.
            access_units.pop();
        }
        let Some(last_access_unit) = access_units.last() else {
            if self.eof && !self.buffer.is_empty() {
                log::debug!("{len} trailing bytes without NAL units discarded", len = self.buffer.len());
                self.buffer.clear();
            }
            return;
        };

        let stream = self.buffer.split_to(last_access_unit.end).freeze();
        for access_unit in access_units {
            let data = stream.slice(access_unit.start..access_unit.end);
            if self.geometry.is_none() {
                self.geometry = self.geometry_from(&data);
            }
            self.ready.push_back(Sample {
                data,
                duration_ms: self.frame_duration_ms,
                is_keyframe: access_unit.is_keyframe,
            });
        }
    }

    fn geometry_from(&self, access_unit: &[u8]) -> Option<TrackGeometry> {
        let sps = NalScanner
            .scan(access_unit)
            .filter(|nal| nal.nal_type() == NalUnitType::Sps)
            .find_map(|nal| Sps::parse(nal.data()).ok())?;
        let frame_rate = (self.frame_duration_ms != 0).then(|| MILLISECONDS as f64 / self.frame_duration_ms as f64);
        Some(TrackGeometry { width: sps.width, height: sps.height, frame_rate })
    }
}

impl<R: Read> SampleSource for AnnexBSource<R> {
    fn next_sample(&mut self) -> Result<Option<Sample>, Error> {
        while self.ready.is_empty() && !self.eof {
            self.fill_buffer()?;
            self.split_ready_access_units();
        }
        Ok(self.ready.pop_front())
    }

    fn geometry(&self) -> Option<TrackGeometry> {
        self.geometry
    }
}

/// Return the duration of one frame at `frame_rate` frames per second, rounded to the nearest millisecond.
///
/// A frame rate of zero gives a duration of zero, which the muxer replaces with its default duration.
pub fn frame_duration_ms(frame_rate: u32) -> u64 {
    crate::timescale::convert(1, frame_rate, MILLISECONDS)
}

fn last_start_code_prefix(buf: &[u8]) -> Option<usize> {
    buf.windows(START_CODE_PREFIX.len()).rposition(|window| window == START_CODE_PREFIX)
}

fn split_access_units(stream: &[u8]) -> Vec<AccessUnit> {
    let mut access_units = Vec::new();
    let mut current: Option<AccessUnit> = None;
    let mut seen_slice = false;

    for nal in NalScanner.scan(stream) {
        let nal_type = nal.nal_type();
        let starts_access_unit = match nal_type {
            NalUnitType::AccessUnitDelimiter => true,
            NalUnitType::Sps | NalUnitType::Pps | NalUnitType::Sei => seen_slice,
            NalUnitType::Other(14..=18) => seen_slice,
            _ if nal_type.is_slice() => seen_slice && nal.is_first_slice_of_picture(),
            _ => false,
        };

        if starts_access_unit {
            if let Some(mut access_unit) = current.take() {
                access_unit.end = nal.start_code_offset();
                access_units.push(access_unit);
            }
            seen_slice = false;
        }

        let access_unit = current.get_or_insert(AccessUnit {
            start: nal.start_code_offset(),
            end: stream.len(),
            is_keyframe: false,
        });
        if nal_type.is_slice() {
            seen_slice = true;
            access_unit.is_keyframe |= nal_type == NalUnitType::SliceIdr;
        }
    }

    access_units.extend(current);
    access_units
}
