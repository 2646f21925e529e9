//! Construction of the init segment: the `ftyp` and `moov` boxes describing the track.

use avcmux_common::parse::FourCC;
use avcmux_common::Result;

use crate::boxes::{BoxType, BoxWriter, Boxes, FtypBox, FullBoxHeader, TkhdFlags};
use crate::error::{MuxError, MuxResultExt};
use crate::track::Track;

/// The major brand of the `ftyp` box.
pub const MAJOR_BRAND: FourCC = FourCC::from_str("iso5");

/// The minor version of the `ftyp` box.
pub const MINOR_VERSION: u32 = 512;

/// The compatible brands of the `ftyp` box.
pub const COMPATIBLE_BRANDS: [FourCC; 2] = [FourCC::from_str("iso6"), FourCC::from_str("mp41")];

/// A builder for the init segment of a track, which can be built at most once.
#[derive(Debug, Default)]
pub struct InitSegmentBuilder {
    built: bool,
}

const UNITY_MATRIX: [u32; 9] = [0x0001_0000, 0, 0, 0, 0x0001_0000, 0, 0, 0, 0x4000_0000];

const HANDLER_TYPE: FourCC = FourCC::from_str("vide");

const HANDLER_NAME: &[u8] = b"VideoHandler\0";

/// ISO-639-2/T `und`, packed as three 5-bit letters.
const LANGUAGE_UNDETERMINED: u16 = pack_language(*b"und");

const COMPRESSOR_NAME_LEN: usize = 32;

const DEPTH: u16 = 0x0018;

const DPI_72: u32 = 0x0048_0000;

impl InitSegmentBuilder {
    /// Construct a new [`InitSegmentBuilder`].
    pub fn new() -> Self {
        Self::default()
    }

    /// Return whether the init segment has been built.
    pub fn is_built(&self) -> bool {
        self.built
    }

    /// Build the `ftyp` and `moov` boxes describing `track`.
    ///
    /// Fails with [`MuxError::InitSegmentAlreadyBuilt`] on every call after the first successful one.
    pub fn build(&mut self, track: &Track) -> Result<Boxes, MuxError> {
        ensure_attach!(!self.built, MuxError::InitSegmentAlreadyBuilt);

        let ftyp = FtypBox::new(MAJOR_BRAND, MINOR_VERSION, COMPATIBLE_BRANDS);
        let avcc = track.decoder_configuration()?.to_box();

        let mut writer = BoxWriter::new();
        writer.put_box(ftyp.to_box());
        writer.begin_box(BoxType::MOOV);
        put_mvhd(&mut writer, track)?;
        writer.begin_box(BoxType::TRAK);
        put_tkhd(&mut writer, track)?;
        writer.begin_box(BoxType::MDIA);
        put_mdhd(&mut writer, track)?;
        put_hdlr(&mut writer)?;
        writer.begin_box(BoxType::MINF);
        writer
            .begin_full_box(BoxType::VMHD, FullBoxHeader::new(0, 1))
            .put_u16(0) // graphicsmode
            .put_zeros(6) // opcolor
            .end_box()?;
        writer.begin_box(BoxType::DINF);
        writer.begin_full_box(BoxType::DREF, FullBoxHeader::new(0, 0)).put_u32(1);
        // Media data is in the same file.
        writer.begin_full_box(BoxType::URL, FullBoxHeader::new(0, 1)).end_box()?;
        writer.end_box()?; // dref
        writer.end_box()?; // dinf
        writer.begin_box(BoxType::STBL);
        writer.begin_full_box(BoxType::STSD, FullBoxHeader::new(0, 0)).put_u32(1);
        put_avc1_fields(&mut writer, track);
        writer.put_box(avcc);
        writer.end_box()?; // avc1
        writer.end_box()?; // stsd
        for table in [BoxType::STTS, BoxType::STSC] {
            writer.begin_full_box(table, FullBoxHeader::new(0, 0)).put_u32(0).end_box()?;
        }
        writer
            .begin_full_box(BoxType::STSZ, FullBoxHeader::new(0, 0))
            .put_u32(0) // sample_size
            .put_u32(0) // sample_count
            .end_box()?;
        writer.begin_full_box(BoxType::STCO, FullBoxHeader::new(0, 0)).put_u32(0).end_box()?;
        writer.end_box()?; // stbl
        writer.end_box()?; // minf
        writer.end_box()?; // mdia
        writer.end_box()?; // trak
        writer.begin_box(BoxType::MVEX);
        writer
            .begin_full_box(BoxType::TREX, FullBoxHeader::new(0, 0))
            .put_u32(track.id.get())
            .put_u32(1) // default_sample_description_index
            .put_u32(0) // default_sample_duration
            .put_u32(0) // default_sample_size
            .put_u32(0) // default_sample_flags
            .end_box()?;
        writer.end_box()?; // mvex
        writer.end_box()?; // moov

        let boxes = writer.finish().while_writing_box(BoxType::MOOV)?;
        self.built = true;
        Ok(boxes)
    }
}

fn put_mvhd(writer: &mut BoxWriter, track: &Track) -> Result<(), MuxError> {
    writer
        .begin_full_box(BoxType::MVHD, FullBoxHeader::new(0, 0))
        .put_u32(0) // creation_time
        .put_u32(0) // modification_time
        .put_u32(track.movie_timescale.get())
        .put_u32(0) // duration
        .put_u32(0x0001_0000) // rate
        .put_u16(0x0100) // volume
        .put_zeros(10);
    put_matrix(writer);
    writer
        .put_zeros(24) // pre_defined
        .put_u32(track.id.get().saturating_add(1)) // next_track_ID
        .end_box()
        .while_writing_box(BoxType::MVHD)?;
    Ok(())
}

fn put_tkhd(writer: &mut BoxWriter, track: &Track) -> Result<(), MuxError> {
    let flags = TkhdFlags::ENABLED | TkhdFlags::IN_MOVIE | TkhdFlags::IN_PREVIEW;
    writer
        .begin_full_box(BoxType::TKHD, FullBoxHeader::new(0, flags.bits()))
        .put_u32(0) // creation_time
        .put_u32(0) // modification_time
        .put_u32(track.id.get())
        .put_u32(0) // reserved
        .put_u32(0) // duration
        .put_zeros(8)
        .put_u16(0) // layer
        .put_u16(0) // alternate_group
        .put_u16(0) // volume
        .put_u16(0); // reserved
    put_matrix(writer);
    writer
        .put_u32(u32::from(track.width) << 16)
        .put_u32(u32::from(track.height) << 16)
        .end_box()
        .while_writing_box(BoxType::TKHD)?;
    Ok(())
}

fn put_mdhd(writer: &mut BoxWriter, track: &Track) -> Result<(), MuxError> {
    writer
        .begin_full_box(BoxType::MDHD, FullBoxHeader::new(0, 0))
        .put_u32(0) // creation_time
        .put_u32(0) // modification_time
        .put_u32(track.timescale.get())
        .put_u32(0) // duration
        .put_u16(LANGUAGE_UNDETERMINED)
        .put_u16(0) // pre_defined
        .end_box()?;
    Ok(())
}

fn put_hdlr(writer: &mut BoxWriter) -> Result<(), MuxError> {
    writer
        .begin_full_box(BoxType::HDLR, FullBoxHeader::new(0, 0))
        .put_u32(0) // pre_defined
        .put_fourcc(HANDLER_TYPE)
        .put_zeros(12)
        .put_slice(HANDLER_NAME)
        .end_box()?;
    Ok(())
}

fn put_avc1_fields(writer: &mut BoxWriter, track: &Track) {
    writer
        .begin_box(BoxType::AVC1)
        .put_zeros(6)
        .put_u16(1) // data_reference_index
        .put_zeros(16) // pre_defined and reserved
        .put_u16(track.width)
        .put_u16(track.height)
        .put_u32(DPI_72) // horizresolution
        .put_u32(DPI_72) // vertresolution
        .put_u32(0) // reserved
        .put_u16(1) // frame_count
        .put_zeros(COMPRESSOR_NAME_LEN)
        .put_u16(DEPTH)
        .put_u16(0xffff); // pre_defined = -1
}

fn put_matrix(writer: &mut BoxWriter) {
    for value in UNITY_MATRIX {
        writer.put_u32(value);
    }
}

const fn pack_language(language: [u8; 3]) -> u16 {
    let [a, b, c] = language;
    ((a - 0x60) as u16) << 10 | ((b - 0x60) as u16) << 5 | (c - 0x60) as u16
}

#[cfg(test)]
mod test {
    use assert_matches::assert_matches;
    use avcmux_test::{parse_box_tree, pps_nal, sps_nal, SpsSpec};

    use crate::nal::NalUnit;
    use crate::params::ParameterSetCache;
    use crate::Config;

    use super::*;

    fn test_track(width: u32, height: u32) -> Track {
        let mut cache = ParameterSetCache::new();
        cache.ingest(&NalUnit::new(&sps_nal(&SpsSpec::new(width, height)))).unwrap();
        cache.ingest(&NalUnit::new(&pps_nal())).unwrap();
        Track::new(&cache, &Config::default()).unwrap()
    }

    #[test]
    fn language_und() {
        assert_eq!(LANGUAGE_UNDETERMINED, 0x55c4);
    }

    #[test]
    fn build_once() {
        let track = test_track(640, 480);
        let mut builder = InitSegmentBuilder::new();
        builder.build(&track).unwrap();
        assert!(builder.is_built());
        let err = builder.build(&track).unwrap_err();
        assert_matches!(err.into_inner(), MuxError::InitSegmentAlreadyBuilt);
    }

    #[test]
    fn box_layout() {
        let track = test_track(640, 480);
        let boxes = InitSegmentBuilder::new().build(&track).unwrap();
        let data = boxes.to_bytes();

        let tree = parse_box_tree(&data).unwrap();
        assert_eq!(tree.len(), 2);
        assert_eq!(tree[0].box_type_str(), "ftyp");
        assert_eq!(tree[1].box_type_str(), "moov");
        assert_eq!(tree[1].size, data.len() as u64 - tree[0].size);

        let moov = &tree[1];
        assert_eq!(moov.child_types(), ["mvhd", "trak", "mvex"]);
        let stbl = moov.find(&["trak", "mdia", "minf", "stbl"]).unwrap();
        assert_eq!(stbl.child_types(), ["stsd", "stts", "stsc", "stsz", "stco"]);
        assert!(moov.find(&["trak", "mdia", "minf", "stbl", "stsd", "avc1", "avcC"]).is_some());
        assert!(moov.find(&["trak", "mdia", "minf", "dinf", "dref", "url "]).is_some());
        assert!(moov.find(&["mvex", "trex"]).is_some());
    }

    #[test]
    fn field_values() {
        let track = test_track(1920, 1080);
        let boxes = InitSegmentBuilder::new().build(&track).unwrap();
        let moov = boxes.get(BoxType::MOOV).unwrap();

        let mvhd = moov.child(BoxType::MVHD).unwrap().fields();
        assert_eq!(mvhd.len(), 100);
        assert_eq!(&mvhd[12..16], 1000u32.to_be_bytes());
        assert_eq!(&mvhd[96..100], 2u32.to_be_bytes());

        let tkhd = moov.descendant(&[BoxType::TRAK, BoxType::TKHD]).unwrap().fields();
        assert_eq!(tkhd.len(), 84);
        assert_eq!(&tkhd[..4], [0, 0, 0, 7]);
        assert_eq!(&tkhd[12..16], 1u32.to_be_bytes());
        assert_eq!(&tkhd[76..80], (1920u32 << 16).to_be_bytes());
        assert_eq!(&tkhd[80..84], (1080u32 << 16).to_be_bytes());

        let mdhd = moov.descendant(&[BoxType::TRAK, BoxType::MDIA, BoxType::MDHD]).unwrap().fields();
        assert_eq!(&mdhd[12..16], 9000u32.to_be_bytes());
        assert_eq!(&mdhd[20..22], 0x55c4u16.to_be_bytes());

        let path = [BoxType::TRAK, BoxType::MDIA, BoxType::MINF, BoxType::STBL, BoxType::STSD, BoxType::AVC1];
        let avc1 = moov.descendant(&path).unwrap().fields();
        assert_eq!(avc1.len(), 78);
        assert_eq!(&avc1[24..28], [0x07, 0x80, 0x04, 0x38]);
        assert_eq!(&avc1[74..78], [0, 0x18, 0xff, 0xff]);

        let trex = moov.descendant(&[BoxType::MVEX, BoxType::TREX]).unwrap().fields();
        assert_eq!(trex, [0, 0, 0, 0, 0, 0, 0, 1, 0, 0, 0, 1, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0]);
    }
}
