//! Generic and specialized `Data` ↔ native-value conversions for scalars, strings, and
//! (via [`array`]) arbitrarily nested arrays.

pub mod array;

use byteorder::{BigEndian, ByteOrder};

use crate::data::{Data, Format};
use crate::error::{ClientError, ClientErrorKind, Error};

/// Converts a native value into a new owned [`Data`].
pub trait ToData {
    fn to_data(&self) -> Data;
}

/// Converts a [`Data`] value back into a native value.
///
/// Binary-format input is parsed as big-endian wire bytes and must not exceed the native
/// width. Text-format input is parsed via the type's textual grammar; any trailing characters
/// after a successful parse are an error.
pub trait FromData: Sized {
    fn from_data(data: &Data) -> Result<Self, Error>;
}

fn malformed(detail: &'static str) -> Error {
    Error::from(ClientError::with_detail(ClientErrorKind::MalformedInput, detail))
}

macro_rules! int_impl {
    ($ty:ty, $read_be:path, $detail:literal) => {
        impl ToData for $ty {
            fn to_data(&self) -> Data {
                Data::from_text(self.to_string())
            }
        }

        impl FromData for $ty {
            fn from_data(data: &Data) -> Result<Self, Error> {
                match data.format() {
                    Some(Format::Binary) => {
                        let bytes = data.as_bytes();
                        if bytes.len() != core::mem::size_of::<$ty>() {
                            return Err(malformed(concat!("binary ", $detail, " has wrong width")));
                        }
                        Ok($read_be(bytes))
                    }
                    Some(Format::Text) => data
                        .as_str()
                        .map_err(|_| malformed(concat!("invalid utf8 in ", $detail, " literal")))?
                        .trim()
                        .parse()
                        .map_err(|_| malformed(concat!("trailing or invalid characters in ", $detail, " literal"))),
                    None => Err(malformed(concat!($detail, " value is NULL"))),
                }
            }
        }
    };
}

int_impl!(i16, BigEndian::read_i16, "smallint");
int_impl!(i32, BigEndian::read_i32, "integer");
int_impl!(i64, BigEndian::read_i64, "bigint");

impl ToData for f32 {
    fn to_data(&self) -> Data {
        Data::from_text(format!("{self}"))
    }
}

impl FromData for f32 {
    fn from_data(data: &Data) -> Result<Self, Error> {
        match data.format() {
            Some(Format::Binary) => {
                let bytes = data.as_bytes();
                if bytes.len() != 4 {
                    return Err(malformed("binary real has wrong width"));
                }
                Ok(BigEndian::read_f32(bytes))
            }
            Some(Format::Text) => data
                .as_str()
                .map_err(|_| malformed("invalid utf8 in real literal"))?
                .trim()
                .parse()
                .map_err(|_| malformed("trailing or invalid characters in real literal")),
            None => Err(malformed("real value is NULL")),
        }
    }
}

impl ToData for f64 {
    fn to_data(&self) -> Data {
        Data::from_text(format!("{self}"))
    }
}

impl FromData for f64 {
    fn from_data(data: &Data) -> Result<Self, Error> {
        match data.format() {
            Some(Format::Binary) => {
                let bytes = data.as_bytes();
                if bytes.len() != 8 {
                    return Err(malformed("binary double precision has wrong width"));
                }
                Ok(BigEndian::read_f64(bytes))
            }
            Some(Format::Text) => data
                .as_str()
                .map_err(|_| malformed("invalid utf8 in double precision literal"))?
                .trim()
                .parse()
                .map_err(|_| malformed("trailing or invalid characters in double precision literal")),
            None => Err(malformed("double precision value is NULL")),
        }
    }
}

impl ToData for bool {
    fn to_data(&self) -> Data {
        Data::from_text(if *self { "t" } else { "f" })
    }
}

impl FromData for bool {
    fn from_data(data: &Data) -> Result<Self, Error> {
        match data.format() {
            Some(Format::Binary) => {
                let bytes = data.as_bytes();
                if bytes.len() != 1 {
                    return Err(malformed("binary boolean has wrong width"));
                }
                Ok(bytes[0] != 0)
            }
            Some(Format::Text) => {
                let s = data.as_str().map_err(|_| malformed("invalid utf8 in boolean literal"))?;
                match s {
                    "t" => Ok(true),
                    "f" => Ok(false),
                    _ => {
                        let lower = s.to_ascii_lowercase();
                        match lower.as_str() {
                            "true" | "yes" | "y" | "on" | "1" => Ok(true),
                            "false" | "no" | "n" | "off" | "0" => Ok(false),
                            _ => Err(malformed("unrecognized boolean literal")),
                        }
                    }
                }
            }
            None => Err(malformed("boolean value is NULL")),
        }
    }
}

impl ToData for char {
    fn to_data(&self) -> Data {
        Data::from_text(self.to_string())
    }
}

impl FromData for char {
    fn from_data(data: &Data) -> Result<Self, Error> {
        let s = data.as_str().map_err(|_| malformed("invalid utf8 in character literal"))?;
        let mut chars = s.chars();
        let c = chars.next().ok_or_else(|| malformed("empty character literal"))?;
        if chars.next().is_some() {
            return Err(malformed("trailing characters in character literal"));
        }
        Ok(c)
    }
}

impl ToData for str {
    fn to_data(&self) -> Data {
        Data::from_text(self)
    }
}

impl ToData for String {
    fn to_data(&self) -> Data {
        Data::from_text(self.as_str())
    }
}

impl FromData for String {
    fn from_data(data: &Data) -> Result<Self, Error> {
        data.as_str()
            .map(str::to_owned)
            .map_err(|_| malformed("invalid utf8 in text literal"))
    }
}

impl ToData for [u8] {
    fn to_data(&self) -> Data {
        Data::from_bytes(self.to_vec())
    }
}

impl ToData for Vec<u8> {
    fn to_data(&self) -> Data {
        Data::from_bytes(self.clone())
    }
}

impl FromData for Vec<u8> {
    fn from_data(data: &Data) -> Result<Self, Error> {
        match data.format() {
            Some(Format::Binary) => Ok(data.as_bytes().to_vec()),
            Some(Format::Text) => {
                let s = data.as_str().map_err(|_| malformed("invalid utf8 in bytea literal"))?;
                crate::data::to_bytea(&format!("{s}\0")).map(|d| d.as_bytes().to_vec())
            }
            None => Err(malformed("bytea value is NULL")),
        }
    }
}

impl<T: ToData + ?Sized> ToData for &T {
    fn to_data(&self) -> Data {
        (**self).to_data()
    }
}

impl<T: ToData> ToData for Option<T> {
    fn to_data(&self) -> Data {
        match self {
            Some(v) => v.to_data(),
            None => Data::default(),
        }
    }
}

impl<T: FromData> FromData for Option<T> {
    fn from_data(data: &Data) -> Result<Self, Error> {
        if data.is_valid() {
            T::from_data(data).map(Some)
        } else {
            Ok(None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip<T>(value: T)
    where
        T: ToData + FromData + PartialEq + core::fmt::Debug,
    {
        let data = value.to_data();
        assert_eq!(T::from_data(&data).unwrap(), value);
    }

    #[test]
    fn scalar_round_trips() {
        round_trip(42i16);
        round_trip(-17i32);
        round_trip(9_000_000_000i64);
        round_trip(3.5f32);
        round_trip(2.25f64);
        round_trip(true);
        round_trip(false);
        round_trip('x');
        round_trip("hello".to_string());
    }

    #[test]
    fn bool_text_accepts_aliases() {
        assert!(bool::from_data(&Data::from_text("yes")).unwrap());
        assert!(!bool::from_data(&Data::from_text("off")).unwrap());
        assert!(bool::from_data(&Data::from_text("1")).unwrap());
        assert!(bool::from_data(&Data::from_text("garbage")).is_err());
    }
}
