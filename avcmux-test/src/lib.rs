//! `avcmux` testing library.
//!
//! This crate is separate from avcmux to workaround cargo's inability to specify optional dev-dependencies (see
//! rust-lang/cargo#1596). It generates synthetic H.264 NAL units and parses muxer output back into a box tree.

mod box_tree;

use bitstream_io::{BigEndian, BitWrite, BitWriter};

pub use box_tree::{parse_box_tree, BoxNode, Tfhd, Trun, TrunEntry, VerifyError};

//
// public types
//

/// The fields of a synthetic sequence parameter set generated by [`sps_nal`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SpsSpec {
    pub profile_idc: u8,
    pub constraint_flags: u8,
    pub level_idc: u8,
    pub width: u32,
    pub height: u32,
    /// Only written for high profiles.
    pub chroma_format_idc: u32,
    pub frame_mbs_only: bool,
    /// Only written for high profiles.
    pub scaling_matrix: bool,
    pub pic_order_cnt_type: u32,
}

//
// private types
//

const HIGH_PROFILE_IDCS: [u8; 13] = [100, 110, 122, 244, 44, 83, 86, 118, 128, 138, 139, 134, 135];

const SLICE_FILL: u8 = 0xab;

//
// SpsSpec impls
//

impl SpsSpec {
    /// A constrained baseline 4:2:0 progressive SPS at level 3.0.
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            profile_idc: 66,
            constraint_flags: 0xc0,
            level_idc: 30,
            width,
            height,
            chroma_format_idc: 1,
            frame_mbs_only: true,
            scaling_matrix: false,
            pic_order_cnt_type: 0,
        }
    }
}

//
// public functions
//

pub fn init_logger() {
    // Ignore errors initializing the logger if tests race to configure it
    let _ignore = env_logger::builder()
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .is_test(true)
        .try_init();
}

/// Generate an SPS NAL unit, including its header byte and emulation prevention bytes.
pub fn sps_nal(spec: &SpsSpec) -> Vec<u8> {
    let mut writer = BitWriter::endian(Vec::new(), BigEndian);
    write_sps_rbsp(&mut writer, spec).unwrap();
    writer.byte_align().unwrap();
    let rbsp = writer.into_writer();

    let mut nal = vec![0x67];
    nal.extend(add_emulation_prevention(&rbsp));
    nal
}

/// A baseline PPS NAL unit: `pic_parameter_set_id` 0, `seq_parameter_set_id` 0, CAVLC.
pub fn pps_nal() -> Vec<u8> {
    vec![0x68, 0xce, 0x3c, 0x80]
}

/// Generate an IDR slice NAL unit `len` bytes long, header included, with `first_mb_in_slice` zero.
pub fn idr_slice_nal(len: usize) -> Vec<u8> {
    slice_with_header([0x65, 0x88], len)
}

/// Generate a non-IDR slice NAL unit `len` bytes long, header included, with `first_mb_in_slice` zero.
pub fn slice_nal(len: usize) -> Vec<u8> {
    slice_with_header([0x41, 0x9a], len)
}

/// Concatenate `nal_units` into an Annex-B byte stream using 4-byte start codes.
pub fn annex_b(nal_units: &[&[u8]]) -> Vec<u8> {
    let mut stream = Vec::new();
    for nal in nal_units {
        stream.extend_from_slice(&[0, 0, 0, 1]);
        stream.extend_from_slice(nal);
    }
    stream
}

fn slice_with_header(header: [u8; 2], len: usize) -> Vec<u8> {
    assert!(len >= header.len(), "slice NAL unit shorter than its header");
    let mut nal = header.to_vec();
    nal.resize(len, SLICE_FILL);
    nal
}

fn write_sps_rbsp<W: BitWrite>(writer: &mut W, spec: &SpsSpec) -> std::io::Result<()> {
    writer.write(8, spec.profile_idc)?;
    writer.write(8, spec.constraint_flags)?;
    writer.write(8, spec.level_idc)?;
    write_ue(writer, 0)?; // seq_parameter_set_id

    let chroma_format_idc = if HIGH_PROFILE_IDCS.contains(&spec.profile_idc) {
        write_ue(writer, spec.chroma_format_idc)?;
        if spec.chroma_format_idc == 3 {
            writer.write_bit(false)?; // separate_colour_plane_flag
        }
        write_ue(writer, 0)?; // bit_depth_luma_minus8
        write_ue(writer, 0)?; // bit_depth_chroma_minus8
        writer.write_bit(false)?; // qpprime_y_zero_transform_bypass_flag
        writer.write_bit(spec.scaling_matrix)?;
        if spec.scaling_matrix {
            let scaling_list_count = if spec.chroma_format_idc != 3 { 8 } else { 12 };
            for scaling_list_idx in 0..scaling_list_count {
                match scaling_list_idx {
                    0 => {
                        writer.write_bit(true)?;
                        for _ in 0..16 {
                            write_se(writer, 0)?;
                        }
                    }
                    1 => {
                        // delta_scale of -8 selects the default list.
                        writer.write_bit(true)?;
                        write_se(writer, -8)?;
                    }
                    _ => writer.write_bit(false)?,
                }
            }
        }
        spec.chroma_format_idc
    } else {
        1
    };

    write_ue(writer, 0)?; // log2_max_frame_num_minus4
    write_ue(writer, spec.pic_order_cnt_type)?;
    match spec.pic_order_cnt_type {
        0 => write_ue(writer, 0)?, // log2_max_pic_order_cnt_lsb_minus4
        1 => {
            writer.write_bit(false)?; // delta_pic_order_always_zero_flag
            write_se(writer, 0)?; // offset_for_non_ref_pic
            write_se(writer, 0)?; // offset_for_top_to_bottom_field
            write_ue(writer, 1)?; // num_ref_frames_in_pic_order_cnt_cycle
            write_se(writer, -1)?; // offset_for_ref_frame
        }
        _ => {}
    }
    write_ue(writer, 1)?; // max_num_ref_frames
    writer.write_bit(false)?; // gaps_in_frame_num_value_allowed_flag

    let field_factor = if spec.frame_mbs_only { 1 } else { 2 };
    let (crop_unit_x, crop_unit_y) = match chroma_format_idc {
        1 => (2, 2 * field_factor),
        2 => (2, field_factor),
        _ => (1, field_factor),
    };
    let width_in_mbs = (spec.width + 15) / 16;
    let height_in_map_units = (spec.height + 16 * field_factor - 1) / (16 * field_factor);
    let crop_right = (width_in_mbs * 16 - spec.width) / crop_unit_x;
    let crop_bottom = (height_in_map_units * 16 * field_factor - spec.height) / crop_unit_y;

    write_ue(writer, width_in_mbs - 1)?;
    write_ue(writer, height_in_map_units - 1)?;
    writer.write_bit(spec.frame_mbs_only)?;
    if !spec.frame_mbs_only {
        writer.write_bit(false)?; // mb_adaptive_frame_field_flag
    }
    writer.write_bit(true)?; // direct_8x8_inference_flag

    let cropping = crop_right != 0 || crop_bottom != 0;
    writer.write_bit(cropping)?;
    if cropping {
        write_ue(writer, 0)?;
        write_ue(writer, crop_right)?;
        write_ue(writer, 0)?;
        write_ue(writer, crop_bottom)?;
    }
    writer.write_bit(false)?; // vui_parameters_present_flag

    // rbsp_trailing_bits
    writer.write_bit(true)
}

fn write_ue<W: BitWrite>(writer: &mut W, value: u32) -> std::io::Result<()> {
    let code = u64::from(value) + 1;
    let len = u64::BITS - code.leading_zeros();
    for _ in 1..len {
        writer.write_bit(false)?;
    }
    writer.write(len, code)
}

fn write_se<W: BitWrite>(writer: &mut W, value: i32) -> std::io::Result<()> {
    let code_num = if value > 0 { 2 * value.unsigned_abs() - 1 } else { 2 * value.unsigned_abs() };
    write_ue(writer, code_num)
}

fn add_emulation_prevention(rbsp: &[u8]) -> Vec<u8> {
    let mut data = Vec::with_capacity(rbsp.len());
    let mut zeros = 0;
    for &byte in rbsp {
        if zeros >= 2 && byte <= 3 {
            data.push(3);
            zeros = 0;
        }
        data.push(byte);
        zeros = if byte == 0 { zeros + 1 } else { 0 };
    }
    data
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn slice_lengths() {
        assert_eq!(idr_slice_nal(10).len(), 10);
        assert_eq!(slice_nal(2), [0x41, 0x9a]);
        assert!(!idr_slice_nal(100).contains(&0));
    }

    #[test]
    fn exp_golomb() {
        let mut writer = BitWriter::endian(Vec::new(), BigEndian);
        write_ue(&mut writer, 0).unwrap();
        write_ue(&mut writer, 3).unwrap();
        write_se(&mut writer, -1).unwrap();
        writer.byte_align().unwrap();
        // 1 00100 011 -> 1001 0001 1000 0000
        assert_eq!(writer.into_writer(), [0x91, 0x80]);
    }

    #[test]
    fn emulation_prevention() {
        assert_eq!(add_emulation_prevention(&[0, 0, 1, 0, 0, 4]), [0, 0, 3, 1, 0, 0, 4]);
    }

    #[test]
    fn baseline_sps_header() {
        let sps = sps_nal(&SpsSpec::new(640, 480));
        assert_eq!(sps[..4], [0x67, 66, 0xc0, 30]);
    }
}
