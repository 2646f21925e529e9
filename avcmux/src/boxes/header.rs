use std::mem::size_of;

use avcmux_common::parse::FourCC;
use bytes::BufMut;

use super::BoxType;

/// The header of a box: its size and type.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BoxHeader {
    box_type: BoxType,
    box_size: BoxSize,
}

/// The size of a box, including its header.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BoxSize {
    /// A size which fits in the 32-bit size field.
    Size(u32),
    /// A size which needs the 64-bit `largesize` field.
    Ext(u64),
}

/// The version and flags fields beginning the data of a "full box".
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FullBoxHeader {
    /// The box version.
    pub version: u8,
    /// The box flags. Only the low 24 bits are encoded.
    pub flags: u32,
}

impl BoxHeader {
    /// The largest encoded length of a [`BoxHeader`].
    pub const MAX_SIZE: u64 = 16;

    /// Construct a [`BoxHeader`] for a box of type `box_type` containing `data_size` bytes of data.
    ///
    /// The 64-bit `largesize` form is used only when the box would not fit in the 32-bit size field.
    pub const fn with_data_size(box_type: BoxType, data_size: u64) -> Self {
        let header_len = Self { box_type, box_size: BoxSize::Size(0) }.encoded_len();
        let box_size = data_size.saturating_add(header_len);
        if box_size <= u32::MAX as u64 {
            return Self { box_type, box_size: BoxSize::Size(box_size as u32) };
        }

        let header_len = Self { box_type, box_size: BoxSize::Ext(0) }.encoded_len();
        Self { box_type, box_size: BoxSize::Ext(data_size.saturating_add(header_len)) }
    }

    /// The encoded length of this header.
    pub const fn encoded_len(&self) -> u64 {
        let mut size = FourCC::size() + size_of::<u32>() as u64;
        if let BoxSize::Ext(_) = self.box_size {
            size += size_of::<u64>() as u64;
        }
        size
    }

    /// The size of the whole box, including this header.
    pub const fn box_size(&self) -> u64 {
        self.box_size.size()
    }

    /// The type of the box.
    pub const fn box_type(&self) -> BoxType {
        self.box_type
    }

    /// Write this header to `out`.
    pub fn put_buf<B: BufMut>(&self, mut out: B) {
        match self.box_size {
            BoxSize::Ext(_) => out.put_u32(1),
            BoxSize::Size(size) => out.put_u32(size),
        }

        self.box_type.fourcc().put_buf(&mut out);

        if let BoxSize::Ext(size) = self.box_size {
            out.put_u64(size);
        }
    }
}

impl BoxSize {
    /// The size as a 64-bit integer.
    pub const fn size(&self) -> u64 {
        match *self {
            BoxSize::Size(size) => size as u64,
            BoxSize::Ext(size) => size,
        }
    }
}

impl FullBoxHeader {
    /// The encoded length of a [`FullBoxHeader`].
    pub const ENCODED_LEN: u64 = 4;

    /// Construct a [`FullBoxHeader`].
    pub const fn new(version: u8, flags: u32) -> Self {
        Self { version, flags }
    }

    /// Write this header to `out`.
    pub fn put_buf<B: BufMut>(&self, mut out: B) {
        out.put_u8(self.version);
        out.put_uint((self.flags & 0x00ff_ffff).into(), 3);
    }
}

macro_rules! box_type {
    ($($name:ident => $fourcc:literal),+ $(,)?) => {
        #[allow(missing_docs)]
        impl BoxType {
            $(pub const $name: Self = Self::new(FourCC::from_str($fourcc));)+
        }

        /// Every box type written by the muxer.
        #[allow(missing_docs)]
        pub mod box_type {
            use super::BoxType;
            $(pub const $name: BoxType = BoxType::$name;)+
        }
    };
}

box_type! {
    AVC1 => "avc1",
    AVCC => "avcC",
    DINF => "dinf",
    DREF => "dref",
    FTYP => "ftyp",
    HDLR => "hdlr",
    MDAT => "mdat",
    MDHD => "mdhd",
    MDIA => "mdia",
    MFHD => "mfhd",
    MINF => "minf",
    MOOF => "moof",
    MOOV => "moov",
    MVEX => "mvex",
    MVHD => "mvhd",
    STBL => "stbl",
    STCO => "stco",
    STSC => "stsc",
    STSD => "stsd",
    STSZ => "stsz",
    STTS => "stts",
    TFDT => "tfdt",
    TFHD => "tfhd",
    TKHD => "tkhd",
    TRAF => "traf",
    TRAK => "trak",
    TREX => "trex",
    TRUN => "trun",
    URL => "url ",
    VMHD => "vmhd",
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn small_box_header() {
        let header = BoxHeader::with_data_size(BoxType::MDAT, 100);
        assert_eq!(header.box_size(), 108);
        assert_eq!(header.encoded_len(), 8);

        let mut out = Vec::new();
        header.put_buf(&mut out);
        assert_eq!(out, [0, 0, 0, 108, b'm', b'd', b'a', b't']);
    }

    #[test]
    fn large_box_header() {
        let data_size = u64::from(u32::MAX) - 4;
        let header = BoxHeader::with_data_size(BoxType::MDAT, data_size);
        assert_eq!(header.encoded_len(), 16);
        assert_eq!(header.box_size(), data_size + 16);

        let mut out = Vec::new();
        header.put_buf(&mut out);
        assert_eq!(&out[..8], [0, 0, 0, 1, b'm', b'd', b'a', b't']);
        assert_eq!(&out[8..], (data_size + 16).to_be_bytes());
    }

    #[test]
    fn largest_small_box_header() {
        let header = BoxHeader::with_data_size(BoxType::MDAT, u64::from(u32::MAX) - 8);
        assert_eq!(header.encoded_len(), 8);
        assert_eq!(header.box_size(), u64::from(u32::MAX));
    }

    #[test]
    fn full_box_header() {
        let mut out = Vec::new();
        FullBoxHeader::new(1, 0x0002_0020).put_buf(&mut out);
        assert_eq!(out, [1, 0x02, 0x00, 0x20]);
    }

    #[test]
    fn box_type_names() {
        assert_eq!(BoxType::AVCC.fourcc().value, *b"avcC");
        assert_eq!(BoxType::URL.fourcc().value, *b"url ");
        assert_eq!(box_type::MOOF.to_string(), "moof");
    }
}
