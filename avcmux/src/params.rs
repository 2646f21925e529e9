//! H.264 parameter set parsing and caching.

use std::io::Cursor;

use avcmux_common::{Report, Result};
use bitstream_io::{BigEndian, BitRead, BitReader};
use bytes::Bytes;

use crate::bitstream::remove_emulation_prevention;
use crate::error::{MuxError, WhereEq, WhileParsingField};
use crate::nal::{NalUnit, NalUnitType};

//
// public types
//

/// The fields of a sequence parameter set needed to describe a track.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Sps {
    /// `profile_idc`.
    pub profile_idc: u8,

    /// The byte of `constraint_set0_flag` through `constraint_set5_flag` and the reserved zero bits.
    pub constraint_flags: u8,

    /// `level_idc`.
    pub level_idc: u8,

    /// `seq_parameter_set_id`.
    pub id: u32,

    /// `chroma_format_idc`; `1` (4:2:0) unless signalled by a high profile.
    pub chroma_format_idc: u32,

    /// `frame_mbs_only_flag`.
    pub frame_mbs_only: bool,

    /// The width of the decoded picture in luma samples, after cropping.
    pub width: u32,

    /// The height of the decoded picture in luma samples, after cropping.
    pub height: u32,

    raw: Bytes,
}

/// A picture parameter set, kept verbatim.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Pps {
    raw: Bytes,
}

/// A cache of the most recently seen SPS and PPS of a stream.
#[derive(Clone, Debug, Default)]
pub struct ParameterSetCache {
    sps: Option<Sps>,
    pps: Option<Pps>,
}

//
// private types
//

struct RbspReader<'a> {
    reader: BitReader<Cursor<&'a [u8]>, BigEndian>,
    nal_type: NalUnitType,
}

/// The `profile_idc` values whose SPS carries chroma format, bit depth, and scaling matrix fields.
const HIGH_PROFILE_IDCS: [u8; 13] = [100, 110, 122, 244, 44, 83, 86, 118, 128, 138, 139, 134, 135];

const MIN_SPS_LEN: usize = 4;

//
// Sps impls
//

impl Sps {
    /// Parse a sequence parameter set from a NAL unit, including its header byte.
    pub fn parse(nal: &[u8]) -> Result<Self, MuxError> {
        ensure_attach!(
            nal.len() >= MIN_SPS_LEN,
            MuxError::TruncatedParameterSet,
            WhereEq("SPS length", nal.len()),
        );
        let nal_type = NalUnitType::from(nal[0]);
        ensure_attach!(
            nal_type == NalUnitType::Sps,
            MuxError::InvalidParameterSet,
            WhereEq("nal_unit_type", nal_type),
        );

        let rbsp = remove_emulation_prevention(&nal[1..]);
        let mut reader = RbspReader::new(&rbsp, NalUnitType::Sps);

        let profile_idc = reader.read_u8("profile_idc")?;
        let constraint_flags = reader.read_u8("constraint_set_flags")?;
        let level_idc = reader.read_u8("level_idc")?;
        let id = reader.read_ue_max("seq_parameter_set_id", 31)?;

        let mut chroma_format_idc = 1;
        let mut separate_colour_plane = false;
        if HIGH_PROFILE_IDCS.contains(&profile_idc) {
            chroma_format_idc = reader.read_ue_max("chroma_format_idc", 3)?;
            if chroma_format_idc == 3 {
                separate_colour_plane = reader.read_flag("separate_colour_plane_flag")?;
            }
            reader.read_ue_max("bit_depth_luma_minus8", 6)?;
            reader.read_ue_max("bit_depth_chroma_minus8", 6)?;
            reader.read_flag("qpprime_y_zero_transform_bypass_flag")?;
            if reader.read_flag("seq_scaling_matrix_present_flag")? {
                let scaling_list_count = if chroma_format_idc != 3 { 8 } else { 12 };
                for scaling_list_idx in 0..scaling_list_count {
                    if reader.read_flag("seq_scaling_list_present_flag")? {
                        let size = if scaling_list_idx < 6 { 16 } else { 64 };
                        reader.skip_scaling_list(size)?;
                    }
                }
            }
        }

        reader.read_ue_max("log2_max_frame_num_minus4", 12)?;
        match reader.read_ue("pic_order_cnt_type")? {
            0 => {
                reader.read_ue_max("log2_max_pic_order_cnt_lsb_minus4", 12)?;
            }
            1 => {
                reader.read_flag("delta_pic_order_always_zero_flag")?;
                reader.read_se("offset_for_non_ref_pic")?;
                reader.read_se("offset_for_top_to_bottom_field")?;
                let cycle_len = reader.read_ue_max("num_ref_frames_in_pic_order_cnt_cycle", 255)?;
                for _ in 0..cycle_len {
                    reader.read_se("offset_for_ref_frame")?;
                }
            }
            2 => {}
            pic_order_cnt_type => bail_attach!(
                MuxError::InvalidParameterSet,
                WhereEq("pic_order_cnt_type", pic_order_cnt_type),
            ),
        }

        reader.read_ue("max_num_ref_frames")?;
        reader.read_flag("gaps_in_frame_num_value_allowed_flag")?;
        let width_in_mbs = u64::from(reader.read_ue("pic_width_in_mbs_minus1")?) + 1;
        let height_in_map_units = u64::from(reader.read_ue("pic_height_in_map_units_minus1")?) + 1;
        let frame_mbs_only = reader.read_flag("frame_mbs_only_flag")?;
        if !frame_mbs_only {
            reader.read_flag("mb_adaptive_frame_field_flag")?;
        }
        reader.read_flag("direct_8x8_inference_flag")?;

        let mut crop = [0u64; 4];
        if reader.read_flag("frame_cropping_flag")? {
            for (offset, field_name) in crop.iter_mut().zip([
                "frame_crop_left_offset",
                "frame_crop_right_offset",
                "frame_crop_top_offset",
                "frame_crop_bottom_offset",
            ]) {
                *offset = reader.read_ue(field_name)?.into();
            }
        }
        let [crop_left, crop_right, crop_top, crop_bottom] = crop;

        let chroma_array_type = if separate_colour_plane { 0 } else { chroma_format_idc };
        let field_factor = if frame_mbs_only { 1 } else { 2 };
        let (crop_unit_x, crop_unit_y) = match chroma_array_type {
            1 => (2, 2 * field_factor),
            2 => (2, field_factor),
            _ => (1, field_factor),
        };

        let frame_width = width_in_mbs * 16;
        let frame_height = height_in_map_units * 16 * field_factor;
        let crop_width = (crop_left + crop_right) * crop_unit_x;
        let crop_height = (crop_top + crop_bottom) * crop_unit_y;
        let (Some(width), Some(height)) = (frame_width.checked_sub(crop_width), frame_height.checked_sub(crop_height))
        else {
            bail_attach!(MuxError::InvalidParameterSet, "frame cropping exceeds picture size");
        };
        let (Ok(width), Ok(height)) = (u32::try_from(width), u32::try_from(height)) else {
            bail_attach!(MuxError::InvalidParameterSet, "picture size too large");
        };
        ensure_attach!(width > 0 && height > 0, MuxError::InvalidParameterSet, "empty picture after cropping");

        Ok(Self {
            profile_idc,
            constraint_flags,
            level_idc,
            id,
            chroma_format_idc,
            frame_mbs_only,
            width,
            height,
            raw: Bytes::copy_from_slice(nal),
        })
    }

    /// The complete NAL unit this SPS was parsed from, including its header byte.
    pub fn raw(&self) -> &[u8] {
        &self.raw
    }
}

//
// Pps impls
//

impl Pps {
    /// Capture a picture parameter set from a NAL unit, including its header byte.
    pub fn parse(nal: &[u8]) -> Result<Self, MuxError> {
        let Some(&header) = nal.first() else {
            bail_attach!(MuxError::TruncatedParameterSet, "empty PPS");
        };
        let nal_type = NalUnitType::from(header);
        ensure_attach!(
            nal_type == NalUnitType::Pps,
            MuxError::InvalidParameterSet,
            WhereEq("nal_unit_type", nal_type),
        );
        Ok(Self { raw: Bytes::copy_from_slice(nal) })
    }

    /// The complete NAL unit, including its header byte.
    pub fn raw(&self) -> &[u8] {
        &self.raw
    }
}

//
// ParameterSetCache impls
//

impl ParameterSetCache {
    /// Construct an empty [`ParameterSetCache`].
    pub fn new() -> Self {
        Self::default()
    }

    /// Capture `nal` if it is an SPS or PPS, replacing any previously cached parameter set of the same kind.
    ///
    /// Returns whether `nal` was a parameter set. A malformed parameter set leaves the cache unchanged.
    pub fn ingest(&mut self, nal: &NalUnit<'_>) -> Result<bool, MuxError> {
        match nal.nal_type() {
            NalUnitType::Sps => {
                let sps = Sps::parse(nal.data())?;
                log::debug!(
                    "SPS {id} @ 0x{offset:08x}: profile {profile} level {level}, {width}x{height}",
                    id = sps.id,
                    offset = nal.offset(),
                    profile = sps.profile_idc,
                    level = sps.level_idc,
                    width = sps.width,
                    height = sps.height,
                );
                self.sps = Some(sps);
                Ok(true)
            }
            NalUnitType::Pps => {
                self.pps = Some(Pps::parse(nal.data())?);
                log::debug!("PPS @ 0x{offset:08x}: {len} bytes", offset = nal.offset(), len = nal.len());
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    /// Return whether both an SPS and a PPS have been cached.
    pub fn is_ready(&self) -> bool {
        self.sps.is_some() && self.pps.is_some()
    }

    /// The most recently cached SPS.
    pub fn sps(&self) -> Option<&Sps> {
        self.sps.as_ref()
    }

    /// The most recently cached PPS.
    pub fn pps(&self) -> Option<&Pps> {
        self.pps.as_ref()
    }

    /// Return the cached SPS and PPS, or [`MuxError::MissingParameterSet`] naming the first one missing.
    pub fn get(&self) -> Result<(&Sps, &Pps), MuxError> {
        let Some(sps) = &self.sps else {
            bail_attach!(MuxError::MissingParameterSet(NalUnitType::Sps));
        };
        let Some(pps) = &self.pps else {
            bail_attach!(MuxError::MissingParameterSet(NalUnitType::Pps));
        };
        Ok((sps, pps))
    }
}

//
// RbspReader impls
//

impl<'a> RbspReader<'a> {
    fn new(rbsp: &'a [u8], nal_type: NalUnitType) -> Self {
        Self { reader: BitReader::endian(Cursor::new(rbsp), BigEndian), nal_type }
    }

    fn truncated(&self, field_name: &'static str) -> Report<MuxError> {
        report_attach!(MuxError::TruncatedParameterSet, WhileParsingField(self.nal_type, field_name))
    }

    fn read_u8(&mut self, field_name: &'static str) -> Result<u8, MuxError> {
        self.reader.read::<u8>(8).map_err(|_| self.truncated(field_name))
    }

    fn read_flag(&mut self, field_name: &'static str) -> Result<bool, MuxError> {
        self.reader.read_bit().map_err(|_| self.truncated(field_name))
    }

    /// Read an unsigned Exp-Golomb code.
    fn read_ue(&mut self, field_name: &'static str) -> Result<u32, MuxError> {
        let leading_zeros = self.reader.read_unary1().map_err(|_| self.truncated(field_name))?;
        if leading_zeros == 0 {
            return Ok(0);
        }
        ensure_attach!(
            leading_zeros < 32,
            MuxError::InvalidParameterSet,
            "Exp-Golomb code too long",
            WhileParsingField(self.nal_type, field_name),
        );
        let suffix = self.reader.read::<u32>(leading_zeros).map_err(|_| self.truncated(field_name))?;
        Ok((1 << leading_zeros) - 1 + suffix)
    }

    fn read_ue_max(&mut self, field_name: &'static str, max: u32) -> Result<u32, MuxError> {
        let value = self.read_ue(field_name)?;
        ensure_attach!(value <= max, MuxError::InvalidParameterSet, WhereEq(field_name, value));
        Ok(value)
    }

    /// Read a signed Exp-Golomb code.
    fn read_se(&mut self, field_name: &'static str) -> Result<i32, MuxError> {
        let code_num = i64::from(self.read_ue(field_name)?);
        let value = if code_num % 2 == 1 { (code_num + 1) / 2 } else { -(code_num / 2) };
        Ok(value as i32)
    }

    fn skip_scaling_list(&mut self, size: usize) -> Result<(), MuxError> {
        let mut last_scale = 8i32;
        let mut next_scale = 8i32;
        for _ in 0..size {
            if next_scale != 0 {
                let delta_scale = self.read_se("delta_scale")?;
                ensure_attach!(
                    (-128..=127).contains(&delta_scale),
                    MuxError::InvalidParameterSet,
                    WhereEq("delta_scale", delta_scale),
                );
                next_scale = (last_scale + delta_scale + 256) % 256;
            }
            if next_scale != 0 {
                last_scale = next_scale;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use assert_matches::assert_matches;
    use avcmux_test::{pps_nal, sps_nal, SpsSpec};

    use super::*;

    #[test]
    fn baseline_640x480() {
        let sps = Sps::parse(&sps_nal(&SpsSpec::new(640, 480))).unwrap();
        assert_eq!(sps.profile_idc, 66);
        assert_eq!(sps.level_idc, 30);
        assert_eq!((sps.width, sps.height), (640, 480));
        assert!(sps.frame_mbs_only);
    }

    #[test]
    fn baseline_1920x1080_cropped() {
        let sps = Sps::parse(&sps_nal(&SpsSpec::new(1920, 1080))).unwrap();
        assert_eq!((sps.width, sps.height), (1920, 1080));
    }

    #[test]
    fn high_profile_with_scaling_matrix() {
        let spec = SpsSpec { profile_idc: 100, scaling_matrix: true, ..SpsSpec::new(1280, 720) };
        let sps = Sps::parse(&sps_nal(&spec)).unwrap();
        assert_eq!(sps.profile_idc, 100);
        assert_eq!(sps.chroma_format_idc, 1);
        assert_eq!((sps.width, sps.height), (1280, 720));
    }

    #[test]
    fn high_422_profile_crop_units() {
        let spec = SpsSpec { profile_idc: 122, chroma_format_idc: 2, ..SpsSpec::new(1920, 1080) };
        let sps = Sps::parse(&sps_nal(&spec)).unwrap();
        assert_eq!(sps.chroma_format_idc, 2);
        assert_eq!((sps.width, sps.height), (1920, 1080));
    }

    #[test]
    fn mfc_depth_high_profile() {
        let spec = SpsSpec { profile_idc: 135, chroma_format_idc: 2, ..SpsSpec::new(640, 480) };
        let sps = Sps::parse(&sps_nal(&spec)).unwrap();
        assert_eq!(sps.profile_idc, 135);
        assert_eq!(sps.chroma_format_idc, 2);
        assert_eq!((sps.width, sps.height), (640, 480));
    }

    #[test]
    fn emulation_prevention_in_sps() {
        let spec = SpsSpec { profile_idc: 0, constraint_flags: 0, level_idc: 0, ..SpsSpec::new(640, 480) };
        let nal = sps_nal(&spec);
        assert_eq!(nal[1..5], [0, 0, 3, 0]);

        let sps = Sps::parse(&nal).unwrap();
        assert_eq!((sps.profile_idc, sps.level_idc), (0, 0));
        assert_eq!((sps.width, sps.height), (640, 480));
        assert_eq!(sps.raw(), &nal[..]);
    }

    #[test]
    fn interlaced() {
        let spec = SpsSpec { frame_mbs_only: false, ..SpsSpec::new(720, 576) };
        let sps = Sps::parse(&sps_nal(&spec)).unwrap();
        assert!(!sps.frame_mbs_only);
        assert_eq!((sps.width, sps.height), (720, 576));
    }

    #[test]
    fn pic_order_cnt_type_1() {
        let spec = SpsSpec { pic_order_cnt_type: 1, ..SpsSpec::new(320, 240) };
        let sps = Sps::parse(&sps_nal(&spec)).unwrap();
        assert_eq!((sps.width, sps.height), (320, 240));
    }

    #[test]
    fn truncated_sps() {
        let err = Sps::parse(&[0x67, 0x42, 0x00]).unwrap_err();
        assert_matches!(err.into_inner(), MuxError::TruncatedParameterSet);

        let sps = sps_nal(&SpsSpec::new(640, 480));
        let err = Sps::parse(&sps[..5]).unwrap_err();
        assert_matches!(err.into_inner(), MuxError::TruncatedParameterSet);
    }

    #[test]
    fn not_an_sps() {
        let err = Sps::parse(&pps_nal()).unwrap_err();
        assert_matches!(err.into_inner(), MuxError::InvalidParameterSet);
    }

    #[test]
    fn empty_pps() {
        let err = Pps::parse(&[]).unwrap_err();
        assert_matches!(err.into_inner(), MuxError::TruncatedParameterSet);
    }

    #[test]
    fn cache_ready_after_sps_and_pps() {
        let sps = sps_nal(&SpsSpec::new(640, 480));
        let pps = pps_nal();

        let mut cache = ParameterSetCache::new();
        assert!(!cache.is_ready());
        assert_matches!(cache.get().unwrap_err().into_inner(), MuxError::MissingParameterSet(NalUnitType::Sps));

        assert!(cache.ingest(&NalUnit::new(&sps)).unwrap());
        assert!(!cache.is_ready());
        assert_matches!(cache.get().unwrap_err().into_inner(), MuxError::MissingParameterSet(NalUnitType::Pps));

        assert!(cache.ingest(&NalUnit::new(&pps)).unwrap());
        assert!(cache.is_ready());
        let (cached_sps, cached_pps) = cache.get().unwrap();
        assert_eq!(cached_sps.raw(), &sps[..]);
        assert_eq!(cached_pps.raw(), &pps[..]);

        assert!(!cache.ingest(&NalUnit::new(&[0x65, 0x88])).unwrap());
    }

    #[test]
    fn cache_keeps_latest() {
        let mut cache = ParameterSetCache::new();
        cache.ingest(&NalUnit::new(&sps_nal(&SpsSpec::new(640, 480)))).unwrap();
        cache.ingest(&NalUnit::new(&sps_nal(&SpsSpec::new(1280, 720)))).unwrap();
        assert_eq!(cache.sps().map(|sps| sps.width), Some(1280));
    }

    #[test]
    fn cache_unchanged_by_malformed_sps() {
        let mut cache = ParameterSetCache::new();
        cache.ingest(&NalUnit::new(&sps_nal(&SpsSpec::new(640, 480)))).unwrap();
        cache.ingest(&NalUnit::new(&[0x67, 0x42])).unwrap_err();
        assert_eq!(cache.sps().map(|sps| sps.width), Some(640));
    }
}
