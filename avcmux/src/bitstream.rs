//! Conversions between Annex-B and length-prefixed (AVCC) NAL unit framing.

use avcmux_common::Result;
use bytes::{BufMut, BytesMut};

use crate::error::MuxError;
use crate::nal::NalScanner;

/// The length of the big-endian size field preceding each NAL unit in a length-prefixed sample.
pub const LENGTH_PREFIX_LEN: usize = 4;

/// The four-byte Annex-B start code written by [`to_annex_b`] and [`length_prefixed_to_annex_b`].
pub const START_CODE: [u8; 4] = [0, 0, 0, 1];

/// An iterator over the NAL units of a length-prefixed buffer, returned by [`avcc_nal_units`].
#[derive(Clone, Debug)]
pub struct AvccNalUnits<'a> {
    buf: &'a [u8],
}

/// Write `nal` to `out` preceded by its length as a 4-byte big-endian integer.
pub fn put_length_prefixed<B: BufMut>(nal: &[u8], mut out: B) -> Result<(), MuxError> {
    let Ok(len) = u32::try_from(nal.len()) else {
        bail_attach!(MuxError::NalUnitTooLarge(nal.len()));
    };
    out.put_u32(len);
    out.put_slice(nal);
    Ok(())
}

/// Return `nal` preceded by its length as a 4-byte big-endian integer.
pub fn to_length_prefixed(nal: &[u8]) -> Result<BytesMut, MuxError> {
    let mut out = BytesMut::with_capacity(LENGTH_PREFIX_LEN + nal.len());
    put_length_prefixed(nal, &mut out)?;
    Ok(out)
}

/// Convert a single length-prefixed NAL unit back to Annex-B framing with a 4-byte start code.
///
/// Fails with [`MuxError::TruncatedNalUnit`] unless the length prefix exactly covers the rest of `length_prefixed`.
pub fn to_annex_b(length_prefixed: &[u8]) -> Result<BytesMut, MuxError> {
    let mut nal_units = avcc_nal_units(length_prefixed);
    let nal = nal_units.next().transpose()?.unwrap_or_default();
    ensure_attach!(nal_units.buf.is_empty(), MuxError::TruncatedNalUnit, "trailing data after NAL unit");

    let mut out = BytesMut::with_capacity(START_CODE.len() + nal.len());
    out.put_slice(&START_CODE);
    out.put_slice(nal);
    Ok(out)
}

/// Convert every NAL unit of an Annex-B buffer to length-prefixed framing.
pub fn annex_b_to_length_prefixed(annex_b: &[u8]) -> Result<BytesMut, MuxError> {
    let mut out = BytesMut::with_capacity(annex_b.len() + LENGTH_PREFIX_LEN);
    for nal in NalScanner.scan(annex_b) {
        put_length_prefixed(nal.data(), &mut out)?;
    }
    Ok(out)
}

/// Convert every NAL unit of a length-prefixed buffer to Annex-B framing with 4-byte start codes.
pub fn length_prefixed_to_annex_b(length_prefixed: &[u8]) -> Result<BytesMut, MuxError> {
    let mut out = BytesMut::with_capacity(length_prefixed.len());
    for nal in avcc_nal_units(length_prefixed) {
        out.put_slice(&START_CODE);
        out.put_slice(nal?);
    }
    Ok(out)
}

/// Return an iterator over the NAL units of the length-prefixed buffer `buf`.
pub fn avcc_nal_units(buf: &[u8]) -> AvccNalUnits<'_> {
    AvccNalUnits { buf }
}

impl<'a> Iterator for AvccNalUnits<'a> {
    type Item = Result<&'a [u8], MuxError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.buf.is_empty() {
            return None;
        }
        let Some((len, rest)) = split_length_prefix(self.buf) else {
            self.buf = &[];
            return Some(Err(report_attach!(MuxError::TruncatedNalUnit, "while parsing length prefix")));
        };
        if rest.len() < len {
            let remaining = rest.len();
            self.buf = &[];
            return Some(Err(report_attach!(
                MuxError::TruncatedNalUnit,
                format!("length prefix {len} exceeds remaining {remaining} bytes"),
            )));
        }
        let (nal, rest) = rest.split_at(len);
        self.buf = rest;
        Some(Ok(nal))
    }
}

/// Strip the emulation prevention bytes from the payload of a NAL unit, returning its raw byte sequence payload.
///
/// Every `03` byte following two zero bytes is removed.
pub fn remove_emulation_prevention(nal: &[u8]) -> Vec<u8> {
    let mut rbsp = Vec::with_capacity(nal.len());
    let mut zero_count = 0;
    for &byte in nal {
        if zero_count >= 2 && byte == 0x03 {
            zero_count = 0;
            continue;
        }
        zero_count = if byte == 0 { zero_count + 1 } else { 0 };
        rbsp.push(byte);
    }
    rbsp
}

fn split_length_prefix(buf: &[u8]) -> Option<(usize, &[u8])> {
    let prefix = buf.get(..LENGTH_PREFIX_LEN)?;
    let len = u32::from_be_bytes([prefix[0], prefix[1], prefix[2], prefix[3]]);
    Some((len as usize, &buf[LENGTH_PREFIX_LEN..]))
}

#[cfg(test)]
mod test {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn length_prefix() {
        let out = to_length_prefixed(&[0x65, 0x88, 0x84]).unwrap();
        assert_eq!(&out[..], [0, 0, 0, 3, 0x65, 0x88, 0x84]);
    }

    #[test]
    fn single_nal_to_annex_b() {
        let out = to_annex_b(&[0, 0, 0, 2, 0x68, 0xce]).unwrap();
        assert_eq!(&out[..], [0, 0, 0, 1, 0x68, 0xce]);
    }

    #[test]
    fn single_nal_to_annex_b_truncated() {
        let err = to_annex_b(&[0, 0, 0, 5, 0x68, 0xce]).unwrap_err();
        assert_matches!(err.into_inner(), MuxError::TruncatedNalUnit);

        let err = to_annex_b(&[0, 0, 0, 1, 0x68, 0xce]).unwrap_err();
        assert_matches!(err.into_inner(), MuxError::TruncatedNalUnit);
    }

    #[test]
    fn annex_b_buffer_to_length_prefixed() {
        let annex_b = [0, 0, 0, 1, 0x67, 0x42, 0, 0, 1, 0x68, 0xce, 0x3c, 0x80];
        let out = annex_b_to_length_prefixed(&annex_b).unwrap();
        assert_eq!(&out[..], [0, 0, 0, 2, 0x67, 0x42, 0, 0, 0, 4, 0x68, 0xce, 0x3c, 0x80]);

        let annex_b_again = length_prefixed_to_annex_b(&out).unwrap();
        assert_eq!(&annex_b_again[..], [0, 0, 0, 1, 0x67, 0x42, 0, 0, 0, 1, 0x68, 0xce, 0x3c, 0x80]);
    }

    #[test]
    fn length_prefixed_truncated() {
        let err = length_prefixed_to_annex_b(&[0, 0, 0, 2, 0x67, 0x42, 0, 0, 0, 9, 0x68]).unwrap_err();
        assert_matches!(err.into_inner(), MuxError::TruncatedNalUnit);

        let err = length_prefixed_to_annex_b(&[0, 0, 0, 2, 0x67, 0x42, 0, 0]).unwrap_err();
        assert_matches!(err.into_inner(), MuxError::TruncatedNalUnit);
    }

    #[test]
    fn emulation_prevention_removed() {
        let nal = [0x67, 0, 0, 3, 0, 0, 0, 3, 1, 0, 3];
        assert_eq!(remove_emulation_prevention(&nal), [0x67, 0, 0, 0, 0, 0, 1, 0, 3]);
    }

    #[test]
    fn avcc_iterator_stops_after_error() {
        let mut nal_units = avcc_nal_units(&[0, 0, 0, 9, 0x68]);
        assert_matches!(nal_units.next(), Some(Err(_)));
        assert_matches!(nal_units.next(), None);
    }
}
