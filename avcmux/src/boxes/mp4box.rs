use bytes::{BufMut, BytesMut};

use super::{BoxHeader, BoxType};

/// A box in an in-memory box tree.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Mp4Box {
    /// The type of the box.
    pub box_type: BoxType,
    /// The contents of the box, following its header.
    pub data: BoxData,
}

/// The contents of an [`Mp4Box`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BoxData {
    /// Serialized box fields with no children.
    Bytes(BytesMut),

    /// Serialized box fields followed by child boxes.
    ///
    /// Plain containers like `moov` have empty `fields`; sample entries like `avc1` carry fixed fields before their
    /// children.
    Children {
        /// The box fields preceding the children.
        fields: BytesMut,
        /// The child boxes.
        children: Boxes,
    },
}

/// A sequence of sibling boxes.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Boxes {
    /// The boxes, in encoding order.
    pub boxes: Vec<Mp4Box>,
}

//
// Mp4Box impls
//

impl Mp4Box {
    /// Construct a box containing the serialized fields `data`.
    pub fn with_bytes(box_type: BoxType, data: impl Into<BytesMut>) -> Self {
        Self { box_type, data: BoxData::Bytes(data.into()) }
    }

    /// Construct a container box holding `children`.
    pub fn with_children(box_type: BoxType, children: impl IntoIterator<Item = Mp4Box>) -> Self {
        let children = Boxes { boxes: children.into_iter().collect() };
        Self { box_type, data: BoxData::Children { fields: BytesMut::new(), children } }
    }

    /// The header this box is encoded with.
    pub fn header(&self) -> BoxHeader {
        BoxHeader::with_data_size(self.box_type, self.data.encoded_len())
    }

    /// The encoded length of this box, including its header.
    pub fn encoded_len(&self) -> u64 {
        self.header().box_size()
    }

    /// Write this box and all of its children to `out`.
    pub fn put_buf<B: BufMut>(&self, mut out: B) {
        self.write_to(&mut out)
    }

    fn write_to(&self, out: &mut dyn BufMut) {
        self.header().put_buf(&mut *out);
        self.data.write_to(out);
    }

    /// Return the first child of this box of type `box_type`.
    pub fn child(&self, box_type: BoxType) -> Option<&Mp4Box> {
        match &self.data {
            BoxData::Bytes(_) => None,
            BoxData::Children { children, .. } => children.get(box_type),
        }
    }

    /// Return the first descendant of this box found by following `path` through the tree.
    pub fn descendant(&self, path: &[BoxType]) -> Option<&Mp4Box> {
        path.iter().try_fold(self, |mp4box, &box_type| mp4box.child(box_type))
    }

    /// The serialized fields of this box, excluding any children.
    pub fn fields(&self) -> &[u8] {
        match &self.data {
            BoxData::Bytes(fields) | BoxData::Children { fields, .. } => fields,
        }
    }
}

//
// BoxData impls
//

impl BoxData {
    /// The encoded length of the box contents, excluding the header.
    pub fn encoded_len(&self) -> u64 {
        match self {
            BoxData::Bytes(bytes) => bytes.len() as u64,
            BoxData::Children { fields, children } => fields.len() as u64 + children.encoded_len(),
        }
    }

    /// Write the box contents to `out`.
    pub fn put_buf<B: BufMut>(&self, mut out: B) {
        self.write_to(&mut out)
    }

    fn write_to(&self, out: &mut dyn BufMut) {
        match self {
            BoxData::Bytes(data) => out.put_slice(data),
            BoxData::Children { fields, children } => {
                out.put_slice(fields);
                children.write_to(out);
            }
        }
    }
}

//
// Boxes impls
//

impl Boxes {
    /// The types of the boxes, in encoding order.
    pub fn box_types(&self) -> impl ExactSizeIterator<Item = BoxType> + '_ {
        self.boxes.iter().map(|mp4box| mp4box.box_type)
    }

    /// Return the first box of type `box_type`.
    pub fn get(&self, box_type: BoxType) -> Option<&Mp4Box> {
        self.boxes.iter().find(|mp4box| mp4box.box_type == box_type)
    }

    /// The total encoded length of the boxes.
    pub fn encoded_len(&self) -> u64 {
        self.boxes.iter().map(Mp4Box::encoded_len).sum()
    }

    /// Write the boxes to `out`.
    pub fn put_buf<B: BufMut>(&self, mut out: B) {
        self.write_to(&mut out)
    }

    fn write_to(&self, out: &mut dyn BufMut) {
        for mp4box in &self.boxes {
            mp4box.write_to(out);
        }
    }

    /// Serialize the boxes to a new buffer.
    pub fn to_bytes(&self) -> BytesMut {
        let mut out = BytesMut::with_capacity(self.encoded_len().try_into().unwrap_or_default());
        self.put_buf(&mut out);
        out
    }
}

impl FromIterator<Mp4Box> for Boxes {
    fn from_iter<I: IntoIterator<Item = Mp4Box>>(iter: I) -> Self {
        Self { boxes: iter.into_iter().collect() }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn nested_sizes() {
        let tkhd = Mp4Box::with_bytes(BoxType::TKHD, &[1u8, 2, 3][..]);
        let mdia = Mp4Box::with_children(BoxType::MDIA, []);
        let trak = Mp4Box::with_children(BoxType::TRAK, [tkhd, mdia]);
        let moov = Mp4Box::with_children(BoxType::MOOV, [trak]);

        assert_eq!(moov.encoded_len(), 8 + 8 + (8 + 3) + 8);

        let mut out = Vec::new();
        moov.put_buf(&mut out);
        assert_eq!(out.len() as u64, moov.encoded_len());
        assert_eq!(&out[..8], [0, 0, 0, 35, b'm', b'o', b'o', b'v']);
        assert_eq!(&out[8..16], [0, 0, 0, 27, b't', b'r', b'a', b'k']);
        assert_eq!(&out[16..27], [0, 0, 0, 11, b't', b'k', b'h', b'd', 1, 2, 3]);
        assert_eq!(&out[27..], [0, 0, 0, 8, b'm', b'd', b'i', b'a']);
    }

    #[test]
    fn fields_before_children() {
        let avcc = Mp4Box::with_bytes(BoxType::AVCC, &[9u8][..]);
        let avc1 = Mp4Box {
            box_type: BoxType::AVC1,
            data: BoxData::Children {
                fields: BytesMut::from(&[7u8, 7][..]),
                children: [avcc].into_iter().collect(),
            },
        };
        let mut out = Vec::new();
        avc1.put_buf(&mut out);
        assert_eq!(out, [0, 0, 0, 19, b'a', b'v', b'c', b'1', 7, 7, 0, 0, 0, 9, b'a', b'v', b'c', b'C', 9]);
        assert_eq!(avc1.fields(), [7, 7]);
    }

    #[test]
    fn deeply_nested_put_buf() {
        let depth = 64;
        let mut mp4box = Mp4Box::with_bytes(BoxType::MDAT, &[0xaau8][..]);
        for _ in 0..depth {
            mp4box = Mp4Box::with_children(BoxType::TRAF, [mp4box]);
        }
        assert_eq!(mp4box.encoded_len(), 8 * (depth + 1) + 1);

        let mut out = BytesMut::new();
        mp4box.put_buf(&mut out);
        assert_eq!(out.len() as u64, mp4box.encoded_len());
        assert_eq!(&out[..8], [0, 0, 2, 9, b't', b'r', b'a', b'f']);
        assert_eq!(&out[out.len() - 9..], [0, 0, 0, 9, b'm', b'd', b'a', b't', 0xaa]);

        let boxes: Boxes = [mp4box].into_iter().collect();
        assert_eq!(boxes.to_bytes(), out);
    }

    #[test]
    fn descendant_lookup() {
        let tfdt = Mp4Box::with_bytes(BoxType::TFDT, BytesMut::new());
        let moof = Mp4Box::with_children(BoxType::MOOF, [Mp4Box::with_children(BoxType::TRAF, [tfdt.clone()])]);
        assert_eq!(moof.descendant(&[BoxType::TRAF, BoxType::TFDT]), Some(&tfdt));
        assert_eq!(moof.descendant(&[BoxType::TRAF, BoxType::TRUN]), None);
        assert_eq!(moof.descendant(&[]), Some(&moof));
    }
}
