//! A minimal ISO BMFF box tree reader for verifying muxer output.

use avcmux_common::parse::FourCC;

//
// public types
//

#[derive(Debug, thiserror::Error)]
pub enum VerifyError {
    #[error("box at offset {offset} truncated: {size} bytes, {remaining} remaining")]
    BoxTruncated { offset: u64, size: u64, remaining: u64 },

    #[error("box at offset {offset} has invalid size {size}")]
    InvalidBoxSize { offset: u64, size: u64 },

    #[error("expected `{expected}` box at offset {offset}, found `{actual}`")]
    UnexpectedBoxType { offset: u64, expected: &'static str, actual: String },

    #[error("`{box_type}` box at offset {offset} truncated while reading {field}")]
    FieldTruncated { box_type: String, offset: u64, field: &'static str },
}

/// A box parsed from a file, with its children if it is a known container.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BoxNode {
    pub box_type: FourCC,
    /// The offset of the box header within the file.
    pub offset: u64,
    /// The total size of the box, header included.
    pub size: u64,
    pub header_len: u64,
    pub children: Vec<BoxNode>,
}

/// A decoded `tfhd` box.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Tfhd {
    pub flags: u32,
    pub track_id: u32,
    pub default_sample_duration: Option<u32>,
    pub default_sample_size: Option<u32>,
    pub default_sample_flags: Option<u32>,
}

/// A decoded `trun` box.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Trun {
    pub flags: u32,
    pub data_offset: Option<i32>,
    pub first_sample_flags: Option<u32>,
    pub entries: Vec<TrunEntry>,
}

/// One sample of a [`Trun`]; fields absent from the box are zero.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TrunEntry {
    pub duration: u32,
    pub size: u32,
    pub flags: u32,
    pub composition_time_offset: u32,
}

//
// private types
//

const PLAIN_CONTAINERS: &[&[u8; 4]] = &[
    b"moov", b"trak", b"mdia", b"minf", b"dinf", b"stbl", b"mvex", b"moof", b"traf",
];

/// Containers with fixed fields preceding their children, and the length of those fields.
const PREFIXED_CONTAINERS: &[(&[u8; 4], u64)] = &[(b"dref", 8), (b"stsd", 8), (b"avc1", 78)];

struct FieldReader<'a> {
    node: &'a BoxNode,
    data: &'a [u8],
}

//
// public functions
//

/// Parse `file` into a tree of boxes, verifying that every box fits within its parent and that the children of each
/// container exactly fill it.
pub fn parse_box_tree(file: &[u8]) -> Result<Vec<BoxNode>, VerifyError> {
    parse_boxes(file, 0, file.len() as u64)
}

fn parse_boxes(file: &[u8], start: u64, end: u64) -> Result<Vec<BoxNode>, VerifyError> {
    let mut nodes = Vec::new();
    let mut offset = start;
    while offset < end {
        let node = parse_box(file, offset, end)?;
        offset += node.size;
        nodes.push(node);
    }
    Ok(nodes)
}

fn parse_box(file: &[u8], offset: u64, end: u64) -> Result<BoxNode, VerifyError> {
    let remaining = end - offset;
    let truncated = |size| VerifyError::BoxTruncated { offset, size, remaining };
    if remaining < 8 {
        return Err(truncated(8));
    }
    let header = &file[offset as usize..];
    let compact_size = u32::from_be_bytes([header[0], header[1], header[2], header[3]]);
    let box_type = FourCC { value: [header[4], header[5], header[6], header[7]] };

    let (size, header_len) = match compact_size {
        0 => (remaining, 8),
        1 => {
            if remaining < 16 {
                return Err(truncated(16));
            }
            let mut largesize = [0; 8];
            largesize.copy_from_slice(&header[8..16]);
            (u64::from_be_bytes(largesize), 16)
        }
        size => (u64::from(size), 8),
    };
    if size < header_len {
        return Err(VerifyError::InvalidBoxSize { offset, size });
    }
    if size > remaining {
        return Err(truncated(size));
    }

    let mut node = BoxNode { box_type, offset, size, header_len, children: Vec::new() };
    let prefix_len = if PLAIN_CONTAINERS.contains(&&box_type.value) {
        Some(0)
    } else {
        PREFIXED_CONTAINERS
            .iter()
            .find(|(prefixed_type, _)| **prefixed_type == box_type.value)
            .map(|(_, prefix_len)| *prefix_len)
    };
    if let Some(prefix_len) = prefix_len {
        let children_start = offset + header_len + prefix_len;
        if children_start > offset + size {
            return Err(VerifyError::InvalidBoxSize { offset, size });
        }
        node.children = parse_boxes(file, children_start, offset + size)?;
    }
    Ok(node)
}

//
// BoxNode impls
//

impl BoxNode {
    /// The box type as a four character string, including any trailing spaces.
    pub fn box_type_str(&self) -> String {
        String::from_utf8_lossy(&self.box_type.value).into_owned()
    }

    pub fn child_types(&self) -> Vec<String> {
        self.children.iter().map(BoxNode::box_type_str).collect()
    }

    /// Find the descendant reached by following `path` of box types, each a direct child of the previous.
    pub fn find(&self, path: &[&str]) -> Option<&BoxNode> {
        let Some((first, rest)) = path.split_first() else {
            return Some(self);
        };
        let child = self.children.iter().find(|child| child.box_type_str() == *first)?;
        child.find(rest)
    }

    /// The bytes of the box following its header.
    pub fn payload<'a>(&self, file: &'a [u8]) -> &'a [u8] {
        &file[(self.offset + self.header_len) as usize..(self.offset + self.size) as usize]
    }

    /// Decode the sequence number of an `mfhd` box.
    pub fn mfhd(&self, file: &[u8]) -> Result<u32, VerifyError> {
        let mut reader = self.field_reader(file, "mfhd")?;
        reader.read_u32("version and flags")?;
        reader.read_u32("sequence_number")
    }

    /// Decode the base media decode time of a `tfdt` box.
    pub fn tfdt(&self, file: &[u8]) -> Result<u64, VerifyError> {
        let mut reader = self.field_reader(file, "tfdt")?;
        let version = reader.read_u32("version and flags")? >> 24;
        match version {
            1 => reader.read_u64("baseMediaDecodeTime"),
            _ => reader.read_u32("baseMediaDecodeTime").map(u64::from),
        }
    }

    pub fn tfhd(&self, file: &[u8]) -> Result<Tfhd, VerifyError> {
        let mut reader = self.field_reader(file, "tfhd")?;
        let flags = reader.read_u32("version and flags")? & 0xff_ffff;
        let track_id = reader.read_u32("track_ID")?;
        if flags & 0x1 != 0 {
            reader.read_u64("base_data_offset")?;
        }
        if flags & 0x2 != 0 {
            reader.read_u32("sample_description_index")?;
        }
        let default_sample_duration = reader.read_u32_if(flags & 0x8 != 0, "default_sample_duration")?;
        let default_sample_size = reader.read_u32_if(flags & 0x10 != 0, "default_sample_size")?;
        let default_sample_flags = reader.read_u32_if(flags & 0x20 != 0, "default_sample_flags")?;
        Ok(Tfhd { flags, track_id, default_sample_duration, default_sample_size, default_sample_flags })
    }

    pub fn trun(&self, file: &[u8]) -> Result<Trun, VerifyError> {
        let mut reader = self.field_reader(file, "trun")?;
        let flags = reader.read_u32("version and flags")? & 0xff_ffff;
        let sample_count = reader.read_u32("sample_count")?;
        let data_offset = reader.read_u32_if(flags & 0x1 != 0, "data_offset")?.map(|offset| offset as i32);
        let first_sample_flags = reader.read_u32_if(flags & 0x4 != 0, "first_sample_flags")?;

        let mut entries = Vec::new();
        for _ in 0..sample_count {
            entries.push(TrunEntry {
                duration: reader.read_u32_if(flags & 0x100 != 0, "sample_duration")?.unwrap_or_default(),
                size: reader.read_u32_if(flags & 0x200 != 0, "sample_size")?.unwrap_or_default(),
                flags: reader.read_u32_if(flags & 0x400 != 0, "sample_flags")?.unwrap_or_default(),
                composition_time_offset: reader
                    .read_u32_if(flags & 0x800 != 0, "sample_composition_time_offset")?
                    .unwrap_or_default(),
            });
        }
        Ok(Trun { flags, data_offset, first_sample_flags, entries })
    }

    fn field_reader<'a>(&'a self, file: &'a [u8], expected: &'static str) -> Result<FieldReader<'a>, VerifyError> {
        if self.box_type.value != expected.as_bytes() {
            return Err(VerifyError::UnexpectedBoxType {
                offset: self.offset,
                expected,
                actual: self.box_type_str(),
            });
        }
        Ok(FieldReader { node: self, data: self.payload(file) })
    }
}

//
// FieldReader impls
//

impl FieldReader<'_> {
    fn read_array<const N: usize>(&mut self, field: &'static str) -> Result<[u8; N], VerifyError> {
        if self.data.len() < N {
            return Err(VerifyError::FieldTruncated {
                box_type: self.node.box_type_str(),
                offset: self.node.offset,
                field,
            });
        }
        let (bytes, rest) = self.data.split_at(N);
        self.data = rest;
        let mut array = [0; N];
        array.copy_from_slice(bytes);
        Ok(array)
    }

    fn read_u32(&mut self, field: &'static str) -> Result<u32, VerifyError> {
        self.read_array(field).map(u32::from_be_bytes)
    }

    fn read_u64(&mut self, field: &'static str) -> Result<u64, VerifyError> {
        self.read_array(field).map(u64::from_be_bytes)
    }

    fn read_u32_if(&mut self, present: bool, field: &'static str) -> Result<Option<u32>, VerifyError> {
        present.then(|| self.read_u32(field)).transpose()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn nested_containers() {
        let file = [
            &[0, 0, 0, 24][..],
            b"moof",
            &[0, 0, 0, 16],
            b"mfhd",
            &[0, 0, 0, 0, 0, 0, 0, 7],
        ]
        .concat();
        let tree = parse_box_tree(&file).unwrap();
        assert_eq!(tree.len(), 1);
        assert_eq!(tree[0].child_types(), ["mfhd"]);
        assert_eq!(tree[0].find(&["mfhd"]).unwrap().mfhd(&file).unwrap(), 7);
    }

    #[test]
    fn child_overruns_parent() {
        let file = [&[0, 0, 0, 16][..], b"moov", &[0, 0, 0, 9], b"free"].concat();
        assert!(matches!(parse_box_tree(&file), Err(VerifyError::BoxTruncated { offset: 8, .. })));
    }

    #[test]
    fn largesize() {
        let file = [&[0, 0, 0, 1][..], b"mdat", &[0, 0, 0, 0, 0, 0, 0, 18], &[0xaa, 0xbb]].concat();
        let tree = parse_box_tree(&file).unwrap();
        assert_eq!((tree[0].size, tree[0].header_len), (18, 16));
        assert_eq!(tree[0].payload(&file), [0xaa, 0xbb]);
    }
}
