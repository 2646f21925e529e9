use avcmux_common::Result;
use bytes::{BufMut, Bytes, BytesMut};

use crate::error::MuxError;
use crate::params::{Pps, Sps};

use super::{BoxType, Mp4Box};

/// The contents of an AVC decoder configuration (`avcC`) box, describing one SPS and one PPS.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AvcDecoderConfigurationRecord {
    /// `AVCProfileIndication`, copied from the SPS `profile_idc`.
    pub profile_indication: u8,
    /// `profile_compatibility`, copied from the SPS constraint flags.
    pub profile_compatibility: u8,
    /// `AVCLevelIndication`, copied from the SPS `level_idc`.
    pub level_indication: u8,
    /// The length in bytes of the NAL unit length prefixes in samples, minus one.
    pub length_size_minus_one: u8,
    sps: Bytes,
    pps: Bytes,
}

const CONFIGURATION_VERSION: u8 = 1;

impl AvcDecoderConfigurationRecord {
    /// Construct a record for samples with 4-byte length prefixes from a parsed SPS and PPS.
    pub fn new(sps: &Sps, pps: &Pps) -> Result<Self, MuxError> {
        let (sps_len, pps_len) = (sps.raw().len(), pps.raw().len());
        ensure_attach!(
            u16::try_from(sps_len).is_ok() && u16::try_from(pps_len).is_ok(),
            MuxError::InvalidParameterSet,
            "parameter set too large for avcC",
        );
        Ok(Self {
            profile_indication: sps.profile_idc,
            profile_compatibility: sps.constraint_flags,
            level_indication: sps.level_idc,
            length_size_minus_one: 3,
            sps: Bytes::copy_from_slice(sps.raw()),
            pps: Bytes::copy_from_slice(pps.raw()),
        })
    }

    /// The encoded length of the record.
    pub fn encoded_len(&self) -> u64 {
        // version, profile, compatibility, level, length size, SPS count, PPS count, and the two 16-bit lengths
        11 + self.sps.len() as u64 + self.pps.len() as u64
    }

    /// Write the record to `out`.
    pub fn put_buf<B: BufMut>(&self, mut out: B) {
        out.put_u8(CONFIGURATION_VERSION);
        out.put_u8(self.profile_indication);
        out.put_u8(self.profile_compatibility);
        out.put_u8(self.level_indication);
        out.put_u8(0b1111_1100 | (self.length_size_minus_one & 0b11));
        out.put_u8(0b1110_0000 | 1);
        out.put_u16(self.sps.len() as u16);
        out.put_slice(&self.sps);
        out.put_u8(1);
        out.put_u16(self.pps.len() as u16);
        out.put_slice(&self.pps);
    }

    /// Convert into an `avcC` [`Mp4Box`].
    pub fn to_box(&self) -> Mp4Box {
        let mut data = BytesMut::with_capacity(self.encoded_len() as usize);
        self.put_buf(&mut data);
        Mp4Box::with_bytes(BoxType::AVCC, data)
    }
}
