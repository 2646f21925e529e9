use std::mem::size_of;

use avcmux_common::parse::FourCC;
use bytes::{BufMut, BytesMut};

use super::{BoxType, Mp4Box};

/// A file type (`ftyp`) box.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FtypBox {
    /// The brand the file conforms to best.
    pub major_brand: FourCC,
    /// The version of the major brand.
    pub minor_version: u32,
    compatible_brands: Vec<FourCC>,
}

impl FtypBox {
    /// Construct a new [`FtypBox`].
    pub fn new(major_brand: FourCC, minor_version: u32, compatible_brands: impl IntoIterator<Item = FourCC>) -> Self {
        Self { major_brand, minor_version, compatible_brands: compatible_brands.into_iter().collect() }
    }

    /// The brands the file is compatible with.
    pub fn compatible_brands(&self) -> impl ExactSizeIterator<Item = FourCC> + '_ {
        self.compatible_brands.iter().copied()
    }

    /// The encoded length of the box fields.
    pub fn encoded_len(&self) -> u64 {
        FourCC::size() + size_of::<u32>() as u64 + FourCC::size() * self.compatible_brands.len() as u64
    }

    /// Write the box fields to `out`.
    pub fn put_buf<B: BufMut>(&self, mut out: B) {
        self.major_brand.put_buf(&mut out);
        out.put_u32(self.minor_version);
        for brand in &self.compatible_brands {
            brand.put_buf(&mut out);
        }
    }

    /// Convert into an [`Mp4Box`].
    pub fn to_box(&self) -> Mp4Box {
        let mut data = BytesMut::with_capacity(self.encoded_len() as usize);
        self.put_buf(&mut data);
        Mp4Box::with_bytes(BoxType::FTYP, data)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn encode() {
        let ftyp = FtypBox::new(FourCC::from_str("iso5"), 512, [FourCC::from_str("iso6"), FourCC::from_str("mp41")]);
        let mut out = Vec::new();
        ftyp.to_box().put_buf(&mut out);
        assert_eq!(out.len() as u64, 8 + ftyp.encoded_len());
        assert_eq!(&out[..8], [0, 0, 0, 24, b'f', b't', b'y', b'p']);
        assert_eq!(&out[8..], b"iso5\x00\x00\x02\x00iso6mp41");
    }
}
