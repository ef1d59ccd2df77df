//! PostgreSQL array literal grammar: `array := '{' elems? '}'; elems := elem (delim elems)?;
//! elem := array | scalar | NULL`.
//!
//! Nesting depth is encoded in the static type of the target container (`Vec<Vec<Option<T>>>`
//! decodes a two-dimensional array of nullable `T`). [`FromArray`]/[`ToArray`] are implemented
//! for `Vec<C>` recursively and for a fixed set of leaf scalar types via [`scalar_array_leaf`].

use super::{FromData, ToData};
use crate::data::Data;
use crate::error::{ClientError, ClientErrorKind, Error};

fn malformed(detail: &'static str) -> Error {
    Error::from(ClientError::with_detail(ClientErrorKind::MalformedArrayLiteral, detail))
}

fn excessive() -> Error {
    Error::from(ClientError::new(ClientErrorKind::ExcessiveArrayDimensionality))
}

fn insufficient() -> Error {
    Error::from(ClientError::new(ClientErrorKind::InsufficientArrayDimensionality))
}

fn improper_container() -> Error {
    Error::from(ClientError::new(ClientErrorKind::ImproperValueTypeOfContainer))
}

/// Given a literal and a delimiter, returns the number of leading `{`s that form valid
/// nesting (whitespace skipped). An empty literal yields `0`, not an error.
pub fn array_dimension(literal: &str, delim: char) -> Result<usize, Error> {
    let _ = delim;
    let trimmed = literal.trim();
    if trimmed.is_empty() {
        return Ok(0);
    }
    let mut depth = 0usize;
    for c in trimmed.chars() {
        if c == '{' {
            depth += 1;
            continue;
        }
        if c.is_whitespace() {
            continue;
        }
        if depth == 0 {
            return Err(malformed("delimiter or junk encountered before the array's opening brace"));
        }
        break;
    }
    if depth == 0 {
        return Err(malformed("array literal does not start with `{`"));
    }
    Ok(depth)
}

/// Recursively decodable array container. Implemented for `Vec<C>` (adds one dimension) and
/// for a fixed set of leaf scalar/`Option<scalar>` types (see [`scalar_array_leaf`]).
pub trait FromArray: Sized {
    /// static nesting depth of this container type.
    fn depth() -> usize;
    /// parses `token`, a single, already brace/quote-balanced element of the literal at this
    /// container's nesting level.
    fn from_array_literal(token: &str, delim: char) -> Result<Self, Error>;
}

/// Recursively encodable array container, the inverse of [`FromArray`].
pub trait ToArray {
    fn to_array_literal(&self, delim: char) -> String;
}

impl<T: FromArray> FromArray for Vec<T> {
    fn depth() -> usize {
        T::depth() + 1
    }

    fn from_array_literal(token: &str, delim: char) -> Result<Self, Error> {
        let trimmed = token.trim();
        let inner = unwrap_braces(trimmed)?;
        if inner.trim().is_empty() {
            return Ok(Vec::new());
        }
        split_top_level(inner, delim)?
            .into_iter()
            .map(|elem| T::from_array_literal(elem, delim))
            .collect()
    }
}

impl<T: ToArray> ToArray for Vec<T> {
    fn to_array_literal(&self, delim: char) -> String {
        let mut out = String::from("{");
        for (i, v) in self.iter().enumerate() {
            if i > 0 {
                out.push(delim);
            }
            out.push_str(&v.to_array_literal(delim));
        }
        out.push('}');
        out
    }
}

fn unwrap_braces(s: &str) -> Result<&str, Error> {
    let s = s.trim();
    let inner = s
        .strip_prefix('{')
        .ok_or_else(|| malformed("expected `{` opening an array literal"))?;
    let inner = inner
        .strip_suffix('}')
        .ok_or_else(|| malformed("unterminated array literal, missing closing `}`"))?;
    Ok(inner)
}

/// Splits the content between an array's outer braces into element substrings at top-level
/// occurrences of `delim`, tracking nested-brace depth and double-quoted segments so that a
/// delimiter or brace inside a quoted element or nested array is not mistaken for structure.
fn split_top_level(s: &str, delim: char) -> Result<Vec<&str>, Error> {
    let mut out = Vec::new();
    let bytes = s.as_bytes();
    let mut depth = 0i32;
    let mut in_quotes = false;
    let mut start = 0usize;
    let mut i = 0usize;
    while i < bytes.len() {
        let c = s[i..].chars().next().unwrap();
        if in_quotes {
            if c == '\\' {
                i += c.len_utf8();
                if i < bytes.len() {
                    i += s[i..].chars().next().unwrap().len_utf8();
                }
                continue;
            }
            if c == '"' {
                in_quotes = false;
            }
            i += c.len_utf8();
            continue;
        }
        match c {
            '"' => in_quotes = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth < 0 {
                    return Err(malformed("unbalanced `}` inside array literal"));
                }
            }
            d if d == delim && depth == 0 => {
                out.push(s[start..i].trim());
                i += c.len_utf8();
                start = i;
                continue;
            }
            _ => {}
        }
        i += c.len_utf8();
    }
    if in_quotes {
        return Err(malformed("unterminated quoted element in array literal"));
    }
    if depth != 0 {
        return Err(malformed("unbalanced `{` inside array literal"));
    }
    out.push(s[start..].trim());
    Ok(out)
}

/// Unquotes a single array element: if `token` is double-quoted, strips the quotes and
/// resolves `\"`/`\\` escapes; otherwise returns it unchanged. Distinguishes unquoted `NULL`
/// (case-insensitive, denotes SQL NULL) from the quoted four-character string `"NULL"`.
fn unquote_element(token: &str) -> Option<String> {
    if let Some(inner) = token.strip_prefix('"').and_then(|s| s.strip_suffix('"')) {
        let mut out = String::with_capacity(inner.len());
        let mut chars = inner.chars();
        while let Some(c) = chars.next() {
            if c == '\\' {
                if let Some(next) = chars.next() {
                    out.push(next);
                } else {
                    out.push('\\');
                }
            } else {
                out.push(c);
            }
        }
        Some(out)
    } else if token.eq_ignore_ascii_case("null") {
        None
    } else {
        Some(token.to_string())
    }
}

fn quote_if_needed(value: &str, delim: char) -> String {
    let needs_quoting = value.is_empty()
        || value.eq_ignore_ascii_case("null")
        || value
            .chars()
            .any(|c| c == delim || c.is_whitespace() || matches!(c, '{' | '}' | '"' | '\\'));
    if !needs_quoting {
        return value.to_string();
    }
    let mut out = String::with_capacity(value.len() + 2);
    out.push('"');
    for c in value.chars() {
        if c == '"' || c == '\\' {
            out.push('\\');
        }
        out.push(c);
    }
    out.push('"');
    out
}

/// Implements `FromArray`/`ToArray` for a concrete scalar type `$ty` and for `Option<$ty>`,
/// the only two leaf shapes the array grammar recognizes (non-optional leaves reject `NULL`
/// elements with `improper_value_type_of_container`).
macro_rules! scalar_array_leaf {
    ($ty:ty) => {
        impl FromArray for $ty {
            fn depth() -> usize {
                0
            }

            fn from_array_literal(token: &str, _delim: char) -> Result<Self, Error> {
                match unquote_element(token) {
                    Some(s) => <$ty as FromData>::from_data(&Data::from_text(s)),
                    None => Err(improper_container()),
                }
            }
        }

        impl FromArray for Option<$ty> {
            fn depth() -> usize {
                0
            }

            fn from_array_literal(token: &str, _delim: char) -> Result<Self, Error> {
                match unquote_element(token) {
                    Some(s) => <$ty as FromData>::from_data(&Data::from_text(s)).map(Some),
                    None => Ok(None),
                }
            }
        }

        impl ToArray for $ty {
            fn to_array_literal(&self, delim: char) -> String {
                let data = <$ty as ToData>::to_data(self);
                quote_if_needed(data.as_str().unwrap_or_default(), delim)
            }
        }

        impl ToArray for Option<$ty> {
            fn to_array_literal(&self, delim: char) -> String {
                match self {
                    Some(v) => <$ty as ToArray>::to_array_literal(v, delim),
                    None => "NULL".to_string(),
                }
            }
        }
    };
}

scalar_array_leaf!(i16);
scalar_array_leaf!(i32);
scalar_array_leaf!(i64);
scalar_array_leaf!(f32);
scalar_array_leaf!(f64);
scalar_array_leaf!(bool);
scalar_array_leaf!(char);
scalar_array_leaf!(String);

/// Decodes a PostgreSQL array literal into `C`, validating that the literal's dimensionality
/// (counted via [`array_dimension`]) matches `C`'s static nesting depth before descending.
pub fn to_container<C: FromArray>(literal: &str, delim: char) -> Result<C, Error> {
    if literal.trim().is_empty() {
        return Err(malformed("empty array literal"));
    }
    let target = C::depth();
    let found = array_dimension(literal, delim)?;
    match found.cmp(&target) {
        core::cmp::Ordering::Greater => Err(excessive()),
        core::cmp::Ordering::Less => Err(insufficient()),
        core::cmp::Ordering::Equal => C::from_array_literal(literal, delim),
    }
}

/// Encodes `container` as a PostgreSQL array literal using `delim` (typically `,`).
pub fn to_array_literal<C: ToArray>(container: &C, delim: char) -> String {
    container.to_array_literal(delim)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_simple_array() {
        let v: Vec<Option<i32>> = vec![Some(1), Some(2)];
        assert_eq!(to_array_literal(&v, ','), "{1,2}");
        let decoded: Vec<Option<i32>> = to_container("{1,NULL}", ',').unwrap();
        assert_eq!(decoded, vec![Some(1), None]);
    }

    #[test]
    fn dimensionality_mismatch_errors() {
        let err = to_container::<Vec<Vec<Option<i32>>>>("{1}", ',').unwrap_err();
        assert_eq!(
            err.downcast_ref::<ClientError>().unwrap().kind(),
            ClientErrorKind::InsufficientArrayDimensionality
        );

        let err = to_container::<Vec<Option<i32>>>("{{1},{2}}", ',').unwrap_err();
        assert_eq!(
            err.downcast_ref::<ClientError>().unwrap().kind(),
            ClientErrorKind::ExcessiveArrayDimensionality
        );
    }

    #[test]
    fn malformed_literal_is_rejected() {
        let err = to_container::<Vec<Option<i32>>>("{1,", ',').unwrap_err();
        assert_eq!(
            err.downcast_ref::<ClientError>().unwrap().kind(),
            ClientErrorKind::MalformedArrayLiteral
        );
    }

    #[test]
    fn array_dimension_handles_empty_and_whitespace() {
        assert_eq!(array_dimension("", ',').unwrap(), 0);
        assert_eq!(array_dimension("   ", ',').unwrap(), 0);
        assert_eq!(array_dimension("{{}}", ',').unwrap(), 2);
        assert!(array_dimension(",{1}", ',').is_err());
    }

    #[test]
    fn empty_literal_is_malformed_not_insufficient_dimensionality() {
        let err = to_container::<Vec<Option<i32>>>("", ',').unwrap_err();
        assert_eq!(
            err.downcast_ref::<ClientError>().unwrap().kind(),
            ClientErrorKind::MalformedArrayLiteral
        );
        let err = to_container::<Vec<Option<i32>>>("   ", ',').unwrap_err();
        assert_eq!(
            err.downcast_ref::<ClientError>().unwrap().kind(),
            ClientErrorKind::MalformedArrayLiteral
        );
    }

    #[test]
    fn nested_array_round_trip() {
        let v: Vec<Vec<Option<i32>>> = vec![vec![Some(1), None], vec![Some(3)]];
        let literal = to_array_literal(&v, ',');
        let decoded: Vec<Vec<Option<i32>>> = to_container(&literal, ',').unwrap();
        assert_eq!(decoded, v);
    }

    #[test]
    fn quoted_elements_with_escapes() {
        let decoded: Vec<Option<String>> = to_container(r#"{"a,b","c\"d"}"#, ',').unwrap();
        assert_eq!(decoded, vec![Some("a,b".to_string()), Some("c\"d".to_string())]);
    }

    #[test]
    fn non_optional_leaf_rejects_null() {
        let err = to_container::<Vec<i32>>("{1,NULL}", ',').unwrap_err();
        assert_eq!(
            err.downcast_ref::<ClientError>().unwrap().kind(),
            ClientErrorKind::ImproperValueTypeOfContainer
        );
    }
}
