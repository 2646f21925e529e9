//! Annex-B NAL unit scanning.
//!
//! An Annex-B byte stream separates NAL units with start codes, either `00 00 01` or `00 00 00 01`. [`NalScanner`]
//! locates each start code and yields the NAL unit between it and the next one, with trailing zero bytes belonging to
//! the following start code removed.

use std::fmt;

//
// public types
//

/// The `nal_unit_type` of an H.264 NAL unit.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum NalUnitType {
    /// A coded slice of a non-IDR picture.
    Slice,
    /// A coded slice of an IDR picture.
    SliceIdr,
    /// Supplemental enhancement information.
    Sei,
    /// A sequence parameter set.
    Sps,
    /// A picture parameter set.
    Pps,
    /// An access unit delimiter.
    AccessUnitDelimiter,
    /// End of sequence.
    EndOfSequence,
    /// End of stream.
    EndOfStream,
    /// Filler data.
    FillerData,
    /// Any other `nal_unit_type`, which the muxer does not interpret.
    Other(u8),
}

/// A scanner splitting Annex-B byte streams into NAL units.
#[derive(Clone, Copy, Debug, Default)]
pub struct NalScanner;

/// An iterator over the NAL units of an Annex-B buffer, returned by [`NalScanner::scan`].
#[derive(Clone, Debug)]
pub struct NalUnits<'a> {
    buf: &'a [u8],
    pos: usize,
}

/// A NAL unit borrowed from a scanned buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct NalUnit<'a> {
    data: &'a [u8],
    offset: usize,
    start_code_len: usize,
}

//
// private types
//

pub(crate) const START_CODE_PREFIX: [u8; 3] = [0, 0, 1];

//
// NalUnitType impls
//

impl NalUnitType {
    /// Return whether NAL units of this type carry a coded slice.
    pub fn is_slice(self) -> bool {
        matches!(self, Self::Slice | Self::SliceIdr)
    }

    /// Return whether NAL units of this type carry a parameter set.
    pub fn is_parameter_set(self) -> bool {
        matches!(self, Self::Sps | Self::Pps)
    }
}

impl From<u8> for NalUnitType {
    fn from(nal_unit_type: u8) -> Self {
        match nal_unit_type & 0x1f {
            1 => Self::Slice,
            5 => Self::SliceIdr,
            6 => Self::Sei,
            7 => Self::Sps,
            8 => Self::Pps,
            9 => Self::AccessUnitDelimiter,
            10 => Self::EndOfSequence,
            11 => Self::EndOfStream,
            12 => Self::FillerData,
            other => Self::Other(other),
        }
    }
}

impl From<NalUnitType> for u8 {
    fn from(nal_unit_type: NalUnitType) -> Self {
        match nal_unit_type {
            NalUnitType::Slice => 1,
            NalUnitType::SliceIdr => 5,
            NalUnitType::Sei => 6,
            NalUnitType::Sps => 7,
            NalUnitType::Pps => 8,
            NalUnitType::AccessUnitDelimiter => 9,
            NalUnitType::EndOfSequence => 10,
            NalUnitType::EndOfStream => 11,
            NalUnitType::FillerData => 12,
            NalUnitType::Other(other) => other,
        }
    }
}

impl fmt::Display for NalUnitType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Slice => write!(f, "slice"),
            Self::SliceIdr => write!(f, "IDR slice"),
            Self::Sei => write!(f, "SEI"),
            Self::Sps => write!(f, "SPS"),
            Self::Pps => write!(f, "PPS"),
            Self::AccessUnitDelimiter => write!(f, "AUD"),
            Self::EndOfSequence => write!(f, "end of sequence"),
            Self::EndOfStream => write!(f, "end of stream"),
            Self::FillerData => write!(f, "filler data"),
            Self::Other(nal_unit_type) => write!(f, "type {nal_unit_type}"),
        }
    }
}

//
// NalScanner impls
//

impl NalScanner {
    /// Return an iterator over the NAL units in the Annex-B buffer `buf`.
    ///
    /// Bytes before the first start code are skipped, as are empty NAL units between adjacent start codes.
    pub fn scan<'a>(&self, buf: &'a [u8]) -> NalUnits<'a> {
        NalUnits { buf, pos: 0 }
    }
}

//
// NalUnits impls
//

impl<'a> Iterator for NalUnits<'a> {
    type Item = NalUnit<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let prefix_pos = find_start_code_prefix(self.buf, self.pos)?;
            let start_code_len = if prefix_pos > self.pos && self.buf[prefix_pos - 1] == 0 { 4 } else { 3 };
            let data_start = prefix_pos + START_CODE_PREFIX.len();

            let mut data_end = match find_start_code_prefix(self.buf, data_start) {
                Some(next_prefix_pos) => next_prefix_pos,
                None => self.buf.len(),
            };

            // A NAL unit never ends in a zero byte; trailing zeros belong to the next start code.
            while data_end > data_start && self.buf[data_end - 1] == 0 {
                data_end -= 1;
            }
            self.pos = data_end;

            if data_end > data_start {
                let data = &self.buf[data_start..data_end];
                return Some(NalUnit { data, offset: data_start, start_code_len });
            }
        }
    }
}

//
// NalUnit impls
//

impl<'a> NalUnit<'a> {
    /// Construct a [`NalUnit`] from its bytes, starting with the NAL unit header.
    ///
    /// `data` must not be empty.
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, offset: 0, start_code_len: 0 }
    }

    /// The bytes of the NAL unit, starting with its header byte and excluding any start code.
    pub fn data(&self) -> &'a [u8] {
        self.data
    }

    /// The offset of the NAL unit header within the scanned buffer.
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// The length of the NAL unit in bytes, excluding its start code.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Return whether the NAL unit is empty.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// The length of the start code preceding this NAL unit: 3, 4, or 0 for a NAL unit not found by scanning.
    pub fn start_code_len(&self) -> usize {
        self.start_code_len
    }

    /// The offset of the start code preceding this NAL unit within the scanned buffer.
    pub fn start_code_offset(&self) -> usize {
        self.offset - self.start_code_len
    }

    /// The `nal_unit_type` of the NAL unit.
    pub fn nal_type(&self) -> NalUnitType {
        self.data.first().copied().map(NalUnitType::from).unwrap_or(NalUnitType::Other(0))
    }

    /// The `nal_ref_idc` of the NAL unit.
    pub fn nal_ref_idc(&self) -> u8 {
        self.data.first().map(|header| (header >> 5) & 0x3).unwrap_or_default()
    }

    /// Return whether this is a slice NAL unit whose `first_mb_in_slice` is zero, i.e. the first slice of a picture.
    pub fn is_first_slice_of_picture(&self) -> bool {
        // first_mb_in_slice is ue(v), which is zero exactly when its first bit is set.
        self.nal_type().is_slice() && self.data.get(1).map_or(false, |&byte| byte & 0x80 != 0)
    }
}

fn find_start_code_prefix(buf: &[u8], from: usize) -> Option<usize> {
    buf.get(from..)?
        .windows(START_CODE_PREFIX.len())
        .position(|window| window == START_CODE_PREFIX)
        .map(|pos| from + pos)
}

#[cfg(test)]
mod test {
    use super::*;

    fn scan(buf: &[u8]) -> Vec<(usize, usize, Vec<u8>)> {
        NalScanner
            .scan(buf)
            .map(|nal| (nal.offset(), nal.start_code_len(), nal.data().to_vec()))
            .collect()
    }

    #[test]
    fn four_byte_start_codes() {
        let buf = [0, 0, 0, 1, 0x67, 0x42, 0, 0, 0, 1, 0x68, 0xce];
        assert_eq!(scan(&buf), [(4, 4, vec![0x67, 0x42]), (10, 4, vec![0x68, 0xce])]);
    }

    #[test]
    fn mixed_start_codes() {
        let buf = [0, 0, 1, 0x67, 0x42, 0, 0, 0, 1, 0x68, 0xce, 0, 0, 1, 0x65, 0x88];
        assert_eq!(
            scan(&buf),
            [(3, 3, vec![0x67, 0x42]), (9, 4, vec![0x68, 0xce]), (14, 3, vec![0x65, 0x88])]
        );
    }

    #[test]
    fn leading_garbage_skipped() {
        let buf = [0xff, 0x12, 0, 0, 1, 0x09, 0xf0];
        assert_eq!(scan(&buf), [(5, 3, vec![0x09, 0xf0])]);
    }

    #[test]
    fn trailing_zeros_trimmed() {
        let buf = [0, 0, 1, 0x65, 0x88, 0x80, 0, 0];
        assert_eq!(scan(&buf), [(3, 3, vec![0x65, 0x88, 0x80])]);
    }

    #[test]
    fn empty_nal_units_skipped() {
        let buf = [0, 0, 1, 0, 0, 1, 0x68, 0xce, 0, 0, 0, 1];
        assert_eq!(scan(&buf), [(6, 3, vec![0x68, 0xce])]);
    }

    #[test]
    fn no_start_code() {
        assert!(scan(&[]).is_empty());
        assert!(scan(&[0x65, 0x88, 0, 0]).is_empty());
    }

    #[test]
    fn nal_unit_type_round_trips_through_u8() {
        for nal_unit_type in 0..32 {
            assert_eq!(u8::from(NalUnitType::from(nal_unit_type)), nal_unit_type);
        }
    }

    #[test]
    fn header_fields() {
        let nal = NalUnit::new(&[0x65, 0x88]);
        assert_eq!(nal.nal_type(), NalUnitType::SliceIdr);
        assert_eq!(nal.nal_ref_idc(), 3);
        assert!(nal.is_first_slice_of_picture());

        let nal = NalUnit::new(&[0x41, 0x12]);
        assert_eq!(nal.nal_type(), NalUnitType::Slice);
        assert_eq!(nal.nal_ref_idc(), 2);
        assert!(!nal.is_first_slice_of_picture());
    }
}
