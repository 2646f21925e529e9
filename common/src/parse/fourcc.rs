use std::fmt;

use bytes::BufMut;

/// A four-byte character code.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct FourCC {
    /// The character code, as an array of four bytes.
    pub value: [u8; 4],
}

impl FourCC {
    /// The encoded length of a [`FourCC`], in bytes.
    pub const ENCODED_LEN: u32 = 4;

    /// Construct a [`FourCC`] from a string, padding with spaces if it is shorter than four bytes.
    pub const fn from_str(name: &str) -> Self {
        let name = name.as_bytes();
        let mut fourcc = [b' '; 4];
        let mut name_idx = 0;
        while name_idx < name.len() && name_idx < 4 {
            fourcc[name_idx] = name[name_idx];
            name_idx += 1;
        }
        FourCC { value: fourcc }
    }

    /// Return the size of a [`FourCC`].
    pub const fn size() -> u64 {
        Self::ENCODED_LEN as u64
    }

    /// Writes `self` to the [`BufMut`] `out`.
    pub fn put_buf<B: BufMut>(&self, mut out: B) {
        out.put(&self.value[..])
    }
}

impl fmt::Display for FourCC {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Ok(string) = std::str::from_utf8(&self.value) {
            let string = string.trim();
            write!(f, "{string}")
        } else {
            write!(f, "0x{:08x}", u32::from_be_bytes(self.value))
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn from_str_pads() {
        assert_eq!(FourCC::from_str("url").value, *b"url ");
        assert_eq!(FourCC::from_str("avcC").value, *b"avcC");
    }

    #[test]
    fn display() {
        assert_eq!(FourCC::from_str("url").to_string(), "url");
        assert_eq!(FourCC { value: [0xff, 0, 0, 1] }.to_string(), "0xff000001");
    }
}
