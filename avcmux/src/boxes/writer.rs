use avcmux_common::parse::FourCC;
use avcmux_common::{Report, Result};
use bytes::{BufMut, BytesMut};

use crate::error::{MuxError, WhileWritingBox};

use super::{BoxData, BoxType, Boxes, FullBoxHeader, Mp4Box};

/// A builder for box trees.
///
/// Boxes are opened with [`begin_box`](Self::begin_box) or [`begin_full_box`](Self::begin_full_box), filled with
/// fields and child boxes, and closed with [`end_box`](Self::end_box). Fields must precede child boxes within a box.
/// Field writes never fail immediately; misuse is reported by the next [`end_box`](Self::end_box) or
/// [`finish`](Self::finish) with [`MuxError::InvalidBoxLayout`].
#[derive(Debug, Default)]
pub struct BoxWriter {
    open: Vec<OpenBox>,
    finished: Boxes,
    error: Option<Report<MuxError>>,
}

#[derive(Debug)]
struct OpenBox {
    box_type: BoxType,
    fields: BytesMut,
    children: Vec<Mp4Box>,
}

impl BoxWriter {
    /// Construct an empty [`BoxWriter`].
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a new box of type `box_type`, as a child of the innermost open box if there is one.
    pub fn begin_box(&mut self, box_type: BoxType) -> &mut Self {
        self.open.push(OpenBox { box_type, fields: BytesMut::new(), children: Vec::new() });
        self
    }

    /// Open a new box of type `box_type` beginning with the full box header `header`.
    pub fn begin_full_box(&mut self, box_type: BoxType, header: FullBoxHeader) -> &mut Self {
        self.begin_box(box_type);
        self.with_fields(|fields| header.put_buf(fields))
    }

    /// Close the innermost open box.
    pub fn end_box(&mut self) -> Result<&mut Self, MuxError> {
        self.take_error()?;
        let Some(OpenBox { box_type, fields, children }) = self.open.pop() else {
            bail_attach!(MuxError::InvalidBoxLayout, "no open box to end");
        };
        let data = if children.is_empty() {
            BoxData::Bytes(fields)
        } else {
            BoxData::Children { fields, children: Boxes { boxes: children } }
        };
        self.put_box(Mp4Box { box_type, data });
        Ok(self)
    }

    /// Add a complete box as a child of the innermost open box, or as a top-level box.
    pub fn put_box(&mut self, mp4box: Mp4Box) -> &mut Self {
        match self.open.last_mut() {
            Some(parent) => parent.children.push(mp4box),
            None => self.finished.boxes.push(mp4box),
        }
        self
    }

    /// Return the completed top-level boxes.
    ///
    /// Fails with [`MuxError::InvalidBoxLayout`] if any box is still open.
    pub fn finish(mut self) -> Result<Boxes, MuxError> {
        self.take_error()?;
        if let Some(open) = self.open.last() {
            bail_attach!(MuxError::InvalidBoxLayout, "box left open", WhileWritingBox(open.box_type));
        }
        Ok(self.finished)
    }

    /// Write a `u8` field to the innermost open box.
    pub fn put_u8(&mut self, value: u8) -> &mut Self {
        self.with_fields(|fields| fields.put_u8(value))
    }

    /// Write a big-endian `u16` field to the innermost open box.
    pub fn put_u16(&mut self, value: u16) -> &mut Self {
        self.with_fields(|fields| fields.put_u16(value))
    }

    /// Write a big-endian 24-bit field to the innermost open box. The high byte of `value` is ignored.
    pub fn put_u24(&mut self, value: u32) -> &mut Self {
        self.with_fields(|fields| fields.put_uint(u64::from(value & 0x00ff_ffff), 3))
    }

    /// Write a big-endian `u32` field to the innermost open box.
    pub fn put_u32(&mut self, value: u32) -> &mut Self {
        self.with_fields(|fields| fields.put_u32(value))
    }

    /// Write a big-endian `i32` field to the innermost open box.
    pub fn put_i32(&mut self, value: i32) -> &mut Self {
        self.with_fields(|fields| fields.put_i32(value))
    }

    /// Write a big-endian `u64` field to the innermost open box.
    pub fn put_u64(&mut self, value: u64) -> &mut Self {
        self.with_fields(|fields| fields.put_u64(value))
    }

    /// Write raw bytes to the innermost open box.
    pub fn put_slice(&mut self, value: &[u8]) -> &mut Self {
        self.with_fields(|fields| fields.put_slice(value))
    }

    /// Write a [`FourCC`] to the innermost open box.
    pub fn put_fourcc(&mut self, value: FourCC) -> &mut Self {
        self.with_fields(|fields| value.put_buf(fields))
    }

    /// Write `count` zero bytes to the innermost open box.
    pub fn put_zeros(&mut self, count: usize) -> &mut Self {
        self.with_fields(|fields| fields.put_bytes(0, count))
    }

    fn with_fields(&mut self, write: impl FnOnce(&mut BytesMut)) -> &mut Self {
        if self.error.is_some() {
            return self;
        }
        match self.open.last_mut() {
            Some(open) if open.children.is_empty() => write(&mut open.fields),
            Some(open) => {
                let box_type = open.box_type;
                self.error = Some(report_attach!(
                    MuxError::InvalidBoxLayout,
                    "field written after child box",
                    WhileWritingBox(box_type),
                ));
            }
            None => self.error = Some(report_attach!(MuxError::InvalidBoxLayout, "field written outside of a box")),
        }
        self
    }

    fn take_error(&mut self) -> Result<(), MuxError> {
        match self.error.take() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod test {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn writes_nested_boxes() {
        let mut writer = BoxWriter::new();
        writer.begin_box(BoxType::MOOF);
        writer.begin_full_box(BoxType::MFHD, FullBoxHeader::new(0, 0)).put_u32(7);
        writer.end_box().unwrap();
        writer.begin_box(BoxType::TRAF).end_box().unwrap();
        writer.end_box().unwrap();
        writer.begin_box(BoxType::MDAT).put_slice(&[1, 2, 3]).end_box().unwrap();
        let boxes = writer.finish().unwrap();

        assert_eq!(boxes.box_types().collect::<Vec<_>>(), [BoxType::MOOF, BoxType::MDAT]);
        let mut out = Vec::new();
        boxes.put_buf(&mut out);
        assert_eq!(
            out,
            [
                0, 0, 0, 32, b'm', b'o', b'o', b'f', //
                0, 0, 0, 16, b'm', b'f', b'h', b'd', 0, 0, 0, 0, 0, 0, 0, 7, //
                0, 0, 0, 8, b't', b'r', b'a', b'f', //
                0, 0, 0, 11, b'm', b'd', b'a', b't', 1, 2, 3,
            ]
        );
    }

    #[test]
    fn field_widths() {
        let mut writer = BoxWriter::new();
        writer
            .begin_box(BoxType::TRUN)
            .put_u8(1)
            .put_u16(0x0203)
            .put_u24(0xff04_0506)
            .put_i32(-1)
            .put_u64(8)
            .put_fourcc(FourCC::from_str("vide"))
            .put_zeros(2);
        writer.end_box().unwrap();
        let boxes = writer.finish().unwrap();
        assert_eq!(
            boxes.boxes[0].fields(),
            [1, 2, 3, 4, 5, 6, 0xff, 0xff, 0xff, 0xff, 0, 0, 0, 0, 0, 0, 0, 8, b'v', b'i', b'd', b'e', 0, 0]
        );
    }

    #[test]
    fn end_without_begin() {
        let mut writer = BoxWriter::new();
        assert_matches!(writer.end_box().unwrap_err().into_inner(), MuxError::InvalidBoxLayout);
    }

    #[test]
    fn finish_with_open_box() {
        let mut writer = BoxWriter::new();
        writer.begin_box(BoxType::MOOV);
        assert_matches!(writer.finish().unwrap_err().into_inner(), MuxError::InvalidBoxLayout);
    }

    #[test]
    fn field_after_child() {
        let mut writer = BoxWriter::new();
        writer.begin_box(BoxType::MOOV);
        writer.begin_box(BoxType::MVHD).end_box().unwrap();
        writer.put_u32(0);
        assert_matches!(writer.end_box().unwrap_err().into_inner(), MuxError::InvalidBoxLayout);
    }

    #[test]
    fn field_outside_box() {
        let mut writer = BoxWriter::new();
        writer.put_u8(0);
        assert_matches!(writer.finish().unwrap_err().into_inner(), MuxError::InvalidBoxLayout);
    }
}
