//! SQL string preparser: tokenizes a user-supplied SQL fragment into text, comments, and
//! positional (`$N`)/named (`:name`) parameters, preserving string/identifier/dollar-quoted
//! literals and bracketed subscripts so that surrounding text is never misparsed as a
//! parameter or comment.

use crate::composite::Composite;
use crate::data::Data;
use crate::error::{ClientError, ClientErrorKind, Error};

const MAX_PARAMETER_COUNT: usize = 65535;

/// One piece of a parsed SQL string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fragment {
    Text(String),
    OneLineComment(String),
    MultiLineComment(String),
    NamedParameter(String),
    PositionalParameter(u16),
}

/// A SQL string decomposed into [`Fragment`]s, with derived parameter caches.
///
/// Indices in the *unified index space*: `[0, positional_count)` are reserved for positional
/// parameters `$1..=positional_count` in numeric order (some may be unreferenced gaps),
/// `[positional_count, parameter_count)` are named parameters in first-appearance order.
#[derive(Debug, Clone, Default)]
pub struct SqlString {
    fragments: Vec<Fragment>,
    positional_count: u16,
    positional_present: Vec<bool>,
    named_order: Vec<String>,
    extra_fields: Composite,
    /// raw text following a top-level `;`, if the input contained a statement terminator.
    remainder: Option<String>,
}

fn malformed(detail: &'static str) -> Error {
    Error::from(ClientError::with_detail(ClientErrorKind::MalformedInput, detail))
}

impl SqlString {
    /// Parses `sql`, stopping at the first top-level `;`.
    pub fn parse(sql: &str) -> Result<Self, Error> {
        let (fragments, remainder) = tokenize(sql)?;
        let mut s = SqlString {
            fragments,
            remainder,
            ..Default::default()
        };
        s.recompute_caches()?;
        s.extract_extra_fields();
        Ok(s)
    }

    pub fn is_empty(&self) -> bool {
        self.fragments.is_empty()
    }

    pub fn fragments(&self) -> &[Fragment] {
        &self.fragments
    }

    /// highest positional parameter number referenced, or `0` if none.
    pub fn positional_parameter_count(&self) -> u16 {
        self.positional_count
    }

    pub fn named_parameter_count(&self) -> usize {
        self.named_order.len()
    }

    pub fn parameter_count(&self) -> usize {
        self.positional_count as usize + self.named_order.len()
    }

    /// positional numbers in `1..=positional_parameter_count()` that never appeared in the
    /// fragment list.
    pub fn missing_positional_parameters(&self) -> Vec<u16> {
        self.positional_present
            .iter()
            .enumerate()
            .filter(|(_, present)| !**present)
            .map(|(i, _)| (i + 1) as u16)
            .collect()
    }

    /// name of the parameter at unified `index`, if any.
    pub fn parameter_name(&self, index: usize) -> Option<String> {
        if index < self.positional_count as usize {
            Some(format!("${}", index + 1))
        } else {
            self.named_order.get(index - self.positional_count as usize).cloned()
        }
    }

    /// unified index of the named parameter `name`, or `None` if it does not occur.
    pub fn parameter_index(&self, name: &str) -> Option<usize> {
        self.named_order
            .iter()
            .position(|n| n == name)
            .map(|i| i + self.positional_count as usize)
    }

    pub fn extra_fields(&self) -> &Composite {
        &self.extra_fields
    }

    /// raw text after a top-level `;`, if any.
    pub fn remainder(&self) -> Option<&str> {
        self.remainder.as_deref()
    }

    fn recompute_caches(&mut self) -> Result<(), Error> {
        let mut max_positional = 0u16;
        let mut named_order: Vec<String> = Vec::new();
        for frag in &self.fragments {
            match frag {
                Fragment::PositionalParameter(n) => max_positional = max_positional.max(*n),
                Fragment::NamedParameter(name) => {
                    if !named_order.contains(name) {
                        named_order.push(name.clone());
                    }
                }
                _ => {}
            }
        }
        if max_positional as usize + named_order.len() > MAX_PARAMETER_COUNT {
            return Err(malformed("parameter count exceeds 65535"));
        }
        let mut present = vec![false; max_positional as usize];
        for frag in &self.fragments {
            if let Fragment::PositionalParameter(n) = frag {
                present[*n as usize - 1] = true;
            }
        }
        self.positional_count = max_positional;
        self.positional_present = present;
        self.named_order = named_order;
        Ok(())
    }

    /// extracts `id` from a one-line comment of the form `-- Id: value` appearing anywhere
    /// in the fragment list (conventionally above the statement text), surfacing it on
    /// [`SqlString::extra_fields`].
    fn extract_extra_fields(&mut self) {
        for frag in &self.fragments {
            match frag {
                Fragment::OneLineComment(text) => {
                    if let Some(rest) = text.trim_start().strip_prefix("Id:") {
                        self.extra_fields.append("id", Some(Data::from_text(rest.trim())));
                        break;
                    }
                }
                Fragment::MultiLineComment(text) => {
                    if let Some((key, value)) = parse_dollar_id_marker(text) {
                        self.extra_fields.append(key, Some(Data::from_text(value)));
                    }
                }
                _ => {}
            }
        }
    }

    /// Renders every fragment in order; positional parameters as `$N`, named as `:name`.
    pub fn to_string(&self) -> String {
        let mut out = String::new();
        for frag in &self.fragments {
            match frag {
                Fragment::Text(t) => out.push_str(t),
                Fragment::OneLineComment(t) => {
                    out.push_str("--");
                    out.push_str(t);
                }
                Fragment::MultiLineComment(t) => {
                    out.push_str("/*");
                    out.push_str(t);
                    out.push_str("*/");
                }
                Fragment::NamedParameter(name) => {
                    out.push(':');
                    out.push_str(name);
                }
                Fragment::PositionalParameter(n) => {
                    out.push('$');
                    out.push_str(&n.to_string());
                }
            }
        }
        out
    }

    /// Renders only text and parameter fragments (comments omitted); named parameters are
    /// rewritten to `$K` with `K` the parameter's unified index + 1.
    pub fn to_query_string(&self) -> String {
        let mut out = String::new();
        for frag in &self.fragments {
            match frag {
                Fragment::Text(t) => out.push_str(t),
                Fragment::OneLineComment(_) | Fragment::MultiLineComment(_) => {}
                Fragment::NamedParameter(name) => {
                    let index = self.parameter_index(name).expect("named parameter must be in cache");
                    out.push('$');
                    out.push_str(&(index + 1).to_string());
                }
                Fragment::PositionalParameter(n) => {
                    out.push('$');
                    out.push_str(&n.to_string());
                }
            }
        }
        out
    }

    /// Appends `other`'s fragments and re-derives caches. On overflow of the 65535 parameter
    /// limit, `self` is left unchanged.
    pub fn append(&mut self, other: &SqlString) -> Result<(), Error> {
        let mut fragments = self.fragments.clone();
        fragments.extend(other.fragments.iter().cloned());
        self.splice_and_recompute(fragments)
    }

    /// Appends a raw SQL fragment (parsed with [`SqlString::parse`]) to `self`.
    pub fn append_str(&mut self, sql: &str) -> Result<(), Error> {
        let other = SqlString::parse(sql)?;
        self.append(&other)
    }

    /// Splices `other`'s fragments in place of every occurrence of the named parameter
    /// `name`. On failure (parameter-count overflow), `self` is left unchanged.
    pub fn replace(&mut self, name: &str, other: &SqlString) -> Result<(), Error> {
        let mut fragments = Vec::with_capacity(self.fragments.len());
        for frag in &self.fragments {
            match frag {
                Fragment::NamedParameter(n) if n == name => fragments.extend(other.fragments.iter().cloned()),
                other => fragments.push(other.clone()),
            }
        }
        self.splice_and_recompute(fragments)
    }

    fn splice_and_recompute(&mut self, fragments: Vec<Fragment>) -> Result<(), Error> {
        let backup = self.fragments.clone();
        self.fragments = fragments;
        match self.recompute_caches() {
            Ok(()) => {
                self.extract_extra_fields();
                Ok(())
            }
            Err(e) => {
                self.fragments = backup;
                Err(e)
            }
        }
    }
}

fn parse_dollar_id_marker(comment: &str) -> Option<(&str, &str)> {
    let first_line = comment.lines().next()?;
    let rest = first_line.strip_prefix("$id$")?;
    let end = rest.find("$id$")?;
    let key = &rest[..end];
    if key.is_empty() || !key.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return None;
    }
    let value_start = first_line.len();
    Some((key, comment[value_start..].trim()))
}

struct Tokenizer<'a> {
    src: &'a str,
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Tokenizer<'a> {
    fn new(src: &'a str) -> Self {
        Self {
            src,
            bytes: src.as_bytes(),
            pos: 0,
        }
    }

    fn peek(&self) -> Option<char> {
        self.src[self.pos..].chars().next()
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.src.get(self.pos + offset..)?.chars().next()
    }

    fn advance(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += c.len_utf8();
        Some(c)
    }

    fn eof(&self) -> bool {
        self.pos >= self.bytes.len()
    }

    fn starts_with(&self, s: &str) -> bool {
        self.src[self.pos..].starts_with(s)
    }
}

fn is_ident_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_'
}

fn is_ident_continue(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

fn tokenize(sql: &str) -> Result<(Vec<Fragment>, Option<String>), Error> {
    let mut t = Tokenizer::new(sql);
    let mut fragments = Vec::new();
    let mut text = String::new();

    macro_rules! flush_text {
        () => {
            if !text.is_empty() {
                fragments.push(Fragment::Text(core::mem::take(&mut text)));
            }
        };
    }

    while !t.eof() {
        let c = t.peek().unwrap();

        if c == ';' {
            t.advance();
            flush_text!();
            let remainder = sql[t.pos..].to_string();
            return Ok((fragments, (!remainder.is_empty()).then_some(remainder)));
        }

        if c == '\'' {
            text.push(t.advance().unwrap());
            loop {
                match t.advance() {
                    None => return Err(malformed("unterminated single-quoted string literal")),
                    Some('\'') => {
                        text.push('\'');
                        if t.peek() == Some('\'') {
                            text.push(t.advance().unwrap());
                            continue;
                        }
                        break;
                    }
                    Some(other) => text.push(other),
                }
            }
            continue;
        }

        if c == '"' {
            text.push(t.advance().unwrap());
            loop {
                match t.advance() {
                    None => return Err(malformed("unterminated double-quoted identifier")),
                    Some('"') => {
                        text.push('"');
                        if t.peek() == Some('"') {
                            text.push(t.advance().unwrap());
                            continue;
                        }
                        break;
                    }
                    Some(other) => text.push(other),
                }
            }
            continue;
        }

        if c == '[' {
            let mut depth = 0i32;
            loop {
                match t.advance() {
                    None => return Err(malformed("unterminated array subscript")),
                    Some('[') => {
                        depth += 1;
                        text.push('[');
                    }
                    Some(']') => {
                        depth -= 1;
                        text.push(']');
                        if depth == 0 {
                            break;
                        }
                    }
                    Some(other) => text.push(other),
                }
            }
            continue;
        }

        if c == '-' && t.peek_at(1) == Some('-') {
            t.advance();
            t.advance();
            flush_text!();
            let mut comment = String::new();
            loop {
                match t.peek() {
                    None => break,
                    Some('\n') => {
                        t.advance();
                        break;
                    }
                    Some('\r') if t.peek_at(1) == Some('\n') => {
                        t.advance();
                        t.advance();
                        break;
                    }
                    Some(other) => {
                        comment.push(other);
                        t.advance();
                    }
                }
            }
            fragments.push(Fragment::OneLineComment(comment));
            continue;
        }

        if c == '/' && t.peek_at(1) == Some('*') {
            t.advance();
            t.advance();
            flush_text!();
            let mut comment = String::new();
            let mut depth = 1u32;
            loop {
                if t.eof() {
                    return Err(malformed("unterminated multi-line comment"));
                }
                if t.starts_with("/*") {
                    depth += 1;
                    comment.push_str("/*");
                    t.advance();
                    t.advance();
                    continue;
                }
                if t.starts_with("*/") {
                    depth -= 1;
                    t.advance();
                    t.advance();
                    if depth == 0 {
                        break;
                    }
                    comment.push_str("*/");
                    continue;
                }
                comment.push(t.advance().unwrap());
            }
            fragments.push(Fragment::MultiLineComment(comment));
            continue;
        }

        if c == '$' {
            if let Some(d) = t.peek_at(1) {
                if d.is_ascii_digit() {
                    t.advance();
                    let mut digits = String::new();
                    while matches!(t.peek(), Some(c) if c.is_ascii_digit()) {
                        digits.push(t.advance().unwrap());
                    }
                    let n: u32 = digits.parse().map_err(|_| malformed("malformed positional parameter"))?;
                    if n == 0 || n > MAX_PARAMETER_COUNT as u32 {
                        return Err(malformed("positional parameter out of range [1, 65535]"));
                    }
                    flush_text!();
                    fragments.push(Fragment::PositionalParameter(n as u16));
                    continue;
                }
            }
            // dollar-quoted literal: $tag$...$tag$, tag may be empty.
            let tag_start = t.pos + 1;
            let mut probe = t.pos + 1;
            while let Some(c) = t.src.get(probe..).and_then(|s| s.chars().next()) {
                if c == '$' {
                    break;
                }
                if !is_ident_continue(c) {
                    return Err(malformed("malformed dollar-quote tag"));
                }
                probe += c.len_utf8();
            }
            if t.src.get(probe..).and_then(|s| s.chars().next()) != Some('$') {
                return Err(malformed("unterminated dollar-quote tag"));
            }
            let tag = &t.src[tag_start..probe];
            let opening = format!("${tag}$");
            // advance past opening delimiter
            for _ in 0..opening.chars().count() {
                text.push(t.advance().unwrap());
            }
            loop {
                if t.eof() {
                    return Err(malformed("unterminated dollar-quoted literal"));
                }
                if t.starts_with(&opening) {
                    for _ in 0..opening.chars().count() {
                        text.push(t.advance().unwrap());
                    }
                    break;
                }
                text.push(t.advance().unwrap());
            }
            continue;
        }

        if c == ':' {
            if t.peek_at(1) == Some(':') {
                text.push(t.advance().unwrap());
                text.push(t.advance().unwrap());
                continue;
            }
            if matches!(t.peek_at(1), Some(c) if is_ident_start(c)) {
                t.advance();
                let mut name = String::new();
                while matches!(t.peek(), Some(c) if is_ident_continue(c)) {
                    name.push(t.advance().unwrap());
                }
                flush_text!();
                fragments.push(Fragment::NamedParameter(name));
                continue;
            }
            text.push(t.advance().unwrap());
            continue;
        }

        text.push(t.advance().unwrap());
    }

    flush_text!();
    Ok((fragments, None))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preparser_basic() {
        let s = SqlString::parse("-- Id: simple\r\nSELECT /* comment */ 1::integer /*, $1::integer*/").unwrap();
        assert_eq!(s.positional_parameter_count(), 0);
        assert_eq!(s.named_parameter_count(), 0);
        assert!(!s.is_empty());
        let q = s.to_query_string();
        assert!(q.contains("SELECT  1::integer"));
        assert!(!q.contains('$'));
    }

    #[test]
    fn preparser_complex() {
        let mut s = SqlString::parse(
            "-- Id: complex\nSELECT :last_name::text, :age, $2, f(:age), 'simple string', $$dollar quoted$$, $tag$dollar quoted$tag$",
        )
        .unwrap();
        assert_eq!(s.positional_parameter_count(), 2);
        assert_eq!(s.named_parameter_count(), 2);
        assert_eq!(s.parameter_name(2).as_deref(), Some("last_name"));
        assert_eq!(s.parameter_name(3).as_deref(), Some("age"));
        assert_eq!(s.parameter_index("last_name"), Some(2));

        s.append_str(" WHERE $1").unwrap();
        assert!(s.missing_positional_parameters().is_empty());

        let replacement = SqlString::parse("g(:first_name, :age, :p2) + 1").unwrap();
        s.replace("age", &replacement).unwrap();
        assert_eq!(s.parameter_index("first_name"), Some(3));
        assert_eq!(s.parameter_index("age"), Some(4));
        assert_eq!(s.parameter_index("p2"), Some(5));
    }

    #[test]
    fn rejects_out_of_range_positional() {
        assert!(SqlString::parse("SELECT $0").is_err());
        assert!(SqlString::parse("SELECT $65536").is_err());
    }

    #[test]
    fn rejects_unterminated_literals() {
        assert!(SqlString::parse("SELECT 'abc").is_err());
        assert!(SqlString::parse("SELECT /* abc").is_err());
        assert!(SqlString::parse("SELECT $tag$abc").is_err());
    }

    #[test]
    fn nested_multiline_comments() {
        let s = SqlString::parse("SELECT /* outer /* inner */ still outer */ 1").unwrap();
        assert_eq!(s.to_query_string().trim(), "SELECT  1");
    }

    #[test]
    fn id_extra_field_is_populated() {
        let s = SqlString::parse("-- Id: my-query\nSELECT 1").unwrap();
        let idx = s.extra_fields().index_of("id", 0);
        assert_ne!(idx, s.extra_fields().len());
        assert_eq!(s.extra_fields().data_of(idx).unwrap().as_str().unwrap(), "my-query");
    }

    #[test]
    fn statement_terminator_stops_parsing() {
        let s = SqlString::parse("SELECT 1; SELECT 2").unwrap();
        assert_eq!(s.remainder().unwrap().trim(), "SELECT 2");
    }
}
