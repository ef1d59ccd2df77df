//! [`Data`]: a format-tagged byte buffer transferred to or from the server, and [`DataView`],
//! its borrowed counterpart used when binding parameters by reference.

mod bytea;

pub use bytea::{to_bytea, to_hex};

use core::cmp::Ordering;
use core::fmt;

/// Wire format of a [`Data`] value.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Format {
    Text,
    Binary,
}

impl Format {
    pub(crate) fn code(self) -> i16 {
        match self {
            Format::Text => 0,
            Format::Binary => 1,
        }
    }
}

enum Inner {
    Invalid,
    Owned { bytes: Vec<u8>, format: Format },
}

/// An owned, format-tagged byte buffer.
///
/// Text-format data is stored with a trailing NUL byte not counted in [`Data::len`], so that
/// borrowing it as a C string is free. A default-constructed `Data` is in the *invalid* state,
/// used to represent SQL NULL; it is the only state produced by [`Data::default`] and consumed
/// by move (there is no way to "revalidate" an invalid `Data` in place).
pub struct Data(Inner);

impl Default for Data {
    fn default() -> Self {
        Data(Inner::Invalid)
    }
}

impl Data {
    /// Builds an owned binary-format `Data` from a byte vector.
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Data(Inner::Owned {
            bytes,
            format: Format::Binary,
        })
    }

    /// Builds an owned text-format `Data` from a string; the buffer is NUL-terminated but
    /// `len()` does not count the terminator.
    pub fn from_text(s: impl AsRef<str>) -> Self {
        let s = s.as_ref();
        let mut bytes = Vec::with_capacity(s.len() + 1);
        bytes.extend_from_slice(s.as_bytes());
        bytes.push(0);
        Data(Inner::Owned {
            bytes,
            format: Format::Text,
        })
    }

    /// Builds an owned `Data` with an explicit format from raw bytes. Binary data is stored
    /// as-is; text data gets a NUL terminator appended if not already present.
    pub fn from_raw(mut bytes: Vec<u8>, format: Format) -> Self {
        if format == Format::Text && bytes.last() != Some(&0) {
            bytes.push(0);
        }
        Data(Inner::Owned { bytes, format })
    }

    /// A borrowed view over this value's bytes (excluding any text NUL terminator).
    pub fn as_view(&self) -> DataView<'_> {
        match &self.0 {
            Inner::Invalid => DataView(ViewInner::Invalid),
            Inner::Owned { bytes, format } => DataView(ViewInner::Borrowed {
                bytes: &bytes[..self.len()],
                format: *format,
            }),
        }
    }

    pub fn is_valid(&self) -> bool {
        !matches!(self.0, Inner::Invalid)
    }

    pub fn format(&self) -> Option<Format> {
        match &self.0 {
            Inner::Invalid => None,
            Inner::Owned { format, .. } => Some(*format),
        }
    }

    /// Byte length, excluding the text-format NUL terminator.
    pub fn len(&self) -> usize {
        match &self.0 {
            Inner::Invalid => 0,
            Inner::Owned { bytes, format: Format::Text } => bytes.len().saturating_sub(1),
            Inner::Owned { bytes, .. } => bytes.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The value's bytes, excluding the text-format NUL terminator. Empty for an invalid value.
    pub fn as_bytes(&self) -> &[u8] {
        match &self.0 {
            Inner::Invalid => &[],
            Inner::Owned { .. } => {
                let len = self.len();
                match &self.0 {
                    Inner::Owned { bytes, .. } => &bytes[..len],
                    Inner::Invalid => unreachable!(),
                }
            }
        }
    }

    /// Interprets the value as UTF-8 text, regardless of its declared format.
    pub fn as_str(&self) -> Result<&str, core::str::Utf8Error> {
        core::str::from_utf8(self.as_bytes())
    }
}

impl fmt::Debug for Data {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.0 {
            Inner::Invalid => f.write_str("Data(invalid)"),
            Inner::Owned { format, .. } => f.debug_struct("Data").field("format", format).field("len", &self.len()).finish(),
        }
    }
}

impl Clone for Data {
    fn clone(&self) -> Self {
        match &self.0 {
            Inner::Invalid => Data(Inner::Invalid),
            Inner::Owned { bytes, format } => Data(Inner::Owned {
                bytes: bytes.clone(),
                format: *format,
            }),
        }
    }
}

impl PartialEq for Data {
    fn eq(&self, other: &Self) -> bool {
        self.is_valid() == other.is_valid() && self.as_bytes() == other.as_bytes()
    }
}

impl Eq for Data {}

impl PartialOrd for Data {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Data {
    /// Lexicographic byte comparison; an equal-length prefix sorts before the longer value
    /// it is a prefix of, matching plain slice comparison. NULL-ness (the *invalid* state)
    /// is not represented by zero length and is ordered before any valid value.
    fn cmp(&self, other: &Self) -> Ordering {
        match (self.is_valid(), other.is_valid()) {
            (false, false) => Ordering::Equal,
            (false, true) => Ordering::Less,
            (true, false) => Ordering::Greater,
            (true, true) => self.as_bytes().cmp(other.as_bytes()),
        }
    }
}

enum ViewInner<'a> {
    Invalid,
    Borrowed { bytes: &'a [u8], format: Format },
}

/// A borrowed, format-tagged view over externally-owned bytes — the non-owning counterpart
/// of [`Data`], used for zero-copy row access and for binding parameters by reference.
pub struct DataView<'a>(ViewInner<'a>);

impl<'a> DataView<'a> {
    pub fn invalid() -> Self {
        DataView(ViewInner::Invalid)
    }

    pub fn new(bytes: &'a [u8], format: Format) -> Self {
        DataView(ViewInner::Borrowed { bytes, format })
    }

    pub fn is_valid(&self) -> bool {
        matches!(self.0, ViewInner::Borrowed { .. })
    }

    pub fn format(&self) -> Option<Format> {
        match self.0 {
            ViewInner::Invalid => None,
            ViewInner::Borrowed { format, .. } => Some(format),
        }
    }

    pub fn as_bytes(&self) -> &'a [u8] {
        match self.0 {
            ViewInner::Invalid => &[],
            ViewInner::Borrowed { bytes, .. } => bytes,
        }
    }

    pub fn len(&self) -> usize {
        self.as_bytes().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copies the view into a freshly-owned `Data`.
    pub fn to_owned_data(&self) -> Data {
        match self.0 {
            ViewInner::Invalid => Data::default(),
            ViewInner::Borrowed { bytes, format } => Data::from_raw(bytes.to_vec(), format),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_data_is_nul_terminated_but_len_excludes_it() {
        let d = Data::from_text("hello");
        assert_eq!(d.len(), 5);
        assert_eq!(d.as_bytes(), b"hello");
    }

    #[test]
    fn invalid_is_default_and_has_no_format() {
        let d = Data::default();
        assert!(!d.is_valid());
        assert_eq!(d.format(), None);
        assert_eq!(d.len(), 0);
    }

    #[test]
    fn ordering_is_lexicographic_by_bytes() {
        assert!(Data::from_bytes(vec![1, 2]) < Data::from_bytes(vec![1, 2, 3]));
        assert!(Data::from_bytes(vec![1, 2, 0]) > Data::from_bytes(vec![1, 2]));
        assert!(Data::default() < Data::from_bytes(vec![]));
    }

    #[test]
    fn view_round_trips_into_owned() {
        let owned = Data::from_bytes(vec![9, 9, 9]);
        let view = owned.as_view();
        assert_eq!(view.as_bytes(), &[9, 9, 9]);
        assert_eq!(view.to_owned_data(), owned);
    }
}
