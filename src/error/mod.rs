//! Error taxonomy: client errors produced by this crate, server errors (problems) produced
//! by PostgreSQL, and the connection-options validation errors raised while building a [`Config`].
//!
//! [`Config`]: crate::config::Config

mod sql_state;

pub use sql_state::{sqlstate_int_to_string, sqlstate_string_to_int, SqlState};

use core::{
    fmt,
    ops::{Deref, DerefMut},
};
use std::{error, io};

use fallible_iterator::FallibleIterator;
use postgres_protocol::message::backend::ErrorFields;

/// Public facing error type. Wraps a concrete, downcastable error struct.
///
/// ```rust
/// use pgwire_client::error::{ClientError, Error};
///
/// fn is_timeout(e: &Error) -> bool {
///     matches!(e.downcast_ref::<ClientError>(), Some(c) if c.kind() == pgwire_client::error::ClientErrorKind::TimedOut)
/// }
/// ```
pub struct Error(Box<dyn error::Error + Send + Sync>);

impl Error {
    pub(crate) fn new<E>(e: E) -> Self
    where
        E: error::Error + Send + Sync + 'static,
    {
        Self(Box::new(e))
    }

    pub(crate) fn client(kind: ClientErrorKind) -> Self {
        Self::new(ClientError::new(kind))
    }

    pub(crate) fn db(fields: &mut ErrorFields<'_>) -> Self {
        match DbError::parse(fields) {
            Ok(e) => Self::new(e),
            Err(e) => Self::new(e),
        }
    }

    pub(crate) fn unexpected() -> Self {
        Self::new(UnexpectedMessage)
    }

    pub fn is_driver_down(&self) -> bool {
        self.0.is::<NotConnected>()
    }

    /// The server-produced [`DbError`], if this error wraps one.
    pub fn as_db_error(&self) -> Option<&DbError> {
        self.0.downcast_ref()
    }
}

impl Deref for Error {
    type Target = dyn error::Error + Send + Sync;

    fn deref(&self) -> &Self::Target {
        &*self.0
    }
}

impl DerefMut for Error {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut *self.0
    }
}

impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&self.0, f)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl error::Error for Error {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        self.0.source()
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Self::new(e)
    }
}

impl From<ClientError> for Error {
    fn from(e: ClientError) -> Self {
        Self::new(e)
    }
}

impl From<ConfigError> for Error {
    fn from(e: ConfigError) -> Self {
        Self::new(e)
    }
}

impl From<DbError> for Error {
    fn from(e: DbError) -> Self {
        Self::new(e)
    }
}

/// Client-side error categories. Mirrors the distilled spec's `Client_errc` enumeration.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ClientErrorKind {
    /// placeholder for a non-error, never constructed by this crate but kept for parity
    /// with the source enumeration.
    Success,
    InsufficientArrayDimensionality,
    ExcessiveArrayDimensionality,
    MalformedArrayLiteral,
    ImproperValueTypeOfContainer,
    TimedOut,
    /// the connection is not ready for the attempted operation (wrong status, response pending).
    NotReady,
    /// a prepared statement or SQL string argument failed to parse.
    MalformedInput,
    /// an out-of-memory condition was reported by an underlying allocation.
    OutOfMemory,
    /// generic I/O failure surfaced by the transport.
    Io,
}

impl ClientErrorKind {
    fn message(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::InsufficientArrayDimensionality => "insufficient array dimensionality",
            Self::ExcessiveArrayDimensionality => "excessive array dimensionality",
            Self::MalformedArrayLiteral => "malformed array literal",
            Self::ImproperValueTypeOfContainer => "improper value type of container",
            Self::TimedOut => "timed out",
            Self::NotReady => "connection is not ready for the requested operation",
            Self::MalformedInput => "malformed input",
            Self::OutOfMemory => "out of memory",
            Self::Io => "I/O error",
        }
    }
}

/// A client-side (programming or environmental) error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientError {
    kind: ClientErrorKind,
    detail: Option<Box<str>>,
}

impl ClientError {
    pub(crate) fn new(kind: ClientErrorKind) -> Self {
        Self { kind, detail: None }
    }

    pub(crate) fn with_detail(kind: ClientErrorKind, detail: impl Into<Box<str>>) -> Self {
        Self {
            kind,
            detail: Some(detail.into()),
        }
    }

    pub fn kind(&self) -> ClientErrorKind {
        self.kind
    }
}

impl fmt::Display for ClientError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.kind.message())?;
        if let Some(detail) = &self.detail {
            write!(f, ": {detail}")?;
        }
        Ok(())
    }
}

impl error::Error for ClientError {}

/// error raised while constructing or validating a [`Config`](crate::config::Config).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    UnknownOption(String),
    InvalidValue { option: &'static str, reason: &'static str },
    MissingUserName,
    MissingPassWord,
    WrongPassWord,
    Unparsable(&'static str),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownOption(key) => write!(f, "unknown connection option `{key}`"),
            Self::InvalidValue { option, reason } => write!(f, "invalid value for option `{option}`: {reason}"),
            Self::MissingUserName => f.write_str("username is missing"),
            Self::MissingPassWord => f.write_str("password is missing"),
            Self::WrongPassWord => f.write_str("password is wrong"),
            Self::Unparsable(reason) => write!(f, "could not parse connection string: {reason}"),
        }
    }
}

impl error::Error for ConfigError {}

/// raised when an operation is attempted on a connection that has no working transport.
#[derive(Debug, Default)]
pub struct NotConnected;

impl fmt::Display for NotConnected {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("connection is not established")
    }
}

impl error::Error for NotConnected {}

#[derive(Debug)]
pub struct UnexpectedMessage;

impl fmt::Display for UnexpectedMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("unexpected message from database")
    }
}

impl error::Error for UnexpectedMessage {}

pub struct InvalidColumnIndex(pub String);

impl fmt::Debug for InvalidColumnIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InvalidColumnIndex").finish()
    }
}

impl fmt::Display for InvalidColumnIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid column index: {}", self.0)
    }
}

impl error::Error for InvalidColumnIndex {}

impl From<InvalidColumnIndex> for Error {
    fn from(e: InvalidColumnIndex) -> Self {
        Self::new(e)
    }
}

/// The severity of a Postgres problem (error or notice).
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Severity {
    Panic,
    Fatal,
    Error,
    Warning,
    Notice,
    Debug,
    Info,
    Log,
    /// the server reported a severity string this crate does not recognize.
    Unrecognized,
}

impl Severity {
    fn from_str(s: &str) -> Severity {
        match s {
            "PANIC" => Self::Panic,
            "FATAL" => Self::Fatal,
            "ERROR" => Self::Error,
            "WARNING" => Self::Warning,
            "NOTICE" => Self::Notice,
            "DEBUG" => Self::Debug,
            "INFO" => Self::Info,
            "LOG" => Self::Log,
            _ => Self::Unrecognized,
        }
    }

    /// the sentinel integer carried by an unrecognized severity string.
    pub const UNRECOGNIZED: i32 = -1;

    pub fn as_i32(self) -> i32 {
        match self {
            Self::Unrecognized => Self::UNRECOGNIZED,
            other => other as i32,
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Panic => "PANIC",
            Self::Fatal => "FATAL",
            Self::Error => "ERROR",
            Self::Warning => "WARNING",
            Self::Notice => "NOTICE",
            Self::Debug => "DEBUG",
            Self::Info => "INFO",
            Self::Log => "LOG",
            Self::Unrecognized => "UNRECOGNIZED",
        };
        f.write_str(s)
    }
}

/// Position of a problem within a query, as reported by the server.
#[derive(Clone, PartialEq, Eq, Debug)]
pub enum ErrorPosition {
    /// a 1-based, character-counted position in the original query.
    Original(u32),
    /// a position in a query the server generated internally.
    Internal { position: u32, query: String },
}

/// A Postgres error or notice ("Problem" in the data model).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DbError {
    severity: String,
    parsed_severity: Severity,
    code: SqlState,
    message: String,
    detail: Option<String>,
    hint: Option<String>,
    position: Option<ErrorPosition>,
    where_: Option<String>,
    schema: Option<String>,
    table: Option<String>,
    column: Option<String>,
    datatype: Option<String>,
    constraint: Option<String>,
    file: Option<String>,
    line: Option<u32>,
    routine: Option<String>,
}

impl DbError {
    #[cold]
    pub(crate) fn parse(fields: &mut ErrorFields<'_>) -> io::Result<DbError> {
        let mut severity = None;
        let mut parsed_severity = None;
        let mut code = None;
        let mut message = None;
        let mut detail = None;
        let mut hint = None;
        let mut normal_position = None;
        let mut internal_position = None;
        let mut internal_query = None;
        let mut where_ = None;
        let mut schema = None;
        let mut table = None;
        let mut column = None;
        let mut datatype = None;
        let mut constraint = None;
        let mut file = None;
        let mut line = None;
        let mut routine = None;

        while let Some(field) = fields.next()? {
            let value = String::from_utf8_lossy(field.value_bytes());
            match field.type_() {
                b'S' => severity = Some(value.into_owned()),
                b'C' => code = Some(SqlState::from_code(&value)),
                b'M' => message = Some(value.into_owned()),
                b'D' => detail = Some(value.into_owned()),
                b'H' => hint = Some(value.into_owned()),
                b'P' => {
                    normal_position = Some(value.parse::<u32>().map_err(|_| {
                        io::Error::new(io::ErrorKind::InvalidInput, "`P` field did not contain an integer")
                    })?);
                }
                b'p' => {
                    internal_position = Some(value.parse::<u32>().map_err(|_| {
                        io::Error::new(io::ErrorKind::InvalidInput, "`p` field did not contain an integer")
                    })?);
                }
                b'q' => internal_query = Some(value.into_owned()),
                b'W' => where_ = Some(value.into_owned()),
                b's' => schema = Some(value.into_owned()),
                b't' => table = Some(value.into_owned()),
                b'c' => column = Some(value.into_owned()),
                b'd' => datatype = Some(value.into_owned()),
                b'n' => constraint = Some(value.into_owned()),
                b'F' => file = Some(value.into_owned()),
                b'L' => {
                    line = Some(value.parse::<u32>().map_err(|_| {
                        io::Error::new(io::ErrorKind::InvalidInput, "`L` field did not contain an integer")
                    })?);
                }
                b'R' => routine = Some(value.into_owned()),
                b'V' => parsed_severity = Some(Severity::from_str(&value)),
                _ => {}
            }
        }

        let severity = severity.ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "`S` field missing"))?;
        let parsed_severity = parsed_severity.unwrap_or_else(|| Severity::from_str(&severity));

        Ok(DbError {
            parsed_severity,
            severity,
            code: code.ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "`C` field missing"))?,
            message: message.ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "`M` field missing"))?,
            detail,
            hint,
            position: match normal_position {
                Some(position) => Some(ErrorPosition::Original(position)),
                None => match internal_position {
                    Some(position) => Some(ErrorPosition::Internal {
                        position,
                        query: internal_query.ok_or_else(|| {
                            io::Error::new(io::ErrorKind::InvalidInput, "`q` field missing but `p` field present")
                        })?,
                    }),
                    None => None,
                },
            },
            where_,
            schema,
            table,
            column,
            datatype,
            constraint,
            file,
            line,
            routine,
        })
    }

    /// the raw, possibly-localized severity string reported by the server.
    pub fn severity(&self) -> &str {
        &self.severity
    }

    /// the non-localized severity, parsed with exact string matching; unrecognized text
    /// yields [`Severity::Unrecognized`] (sentinel `-1`).
    pub fn parsed_severity(&self) -> Severity {
        self.parsed_severity
    }

    pub fn code(&self) -> &SqlState {
        &self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn detail(&self) -> Option<&str> {
        self.detail.as_deref()
    }

    pub fn hint(&self) -> Option<&str> {
        self.hint.as_deref()
    }

    pub fn position(&self) -> Option<&ErrorPosition> {
        self.position.as_ref()
    }

    pub fn where_(&self) -> Option<&str> {
        self.where_.as_deref()
    }

    pub fn schema(&self) -> Option<&str> {
        self.schema.as_deref()
    }

    pub fn table(&self) -> Option<&str> {
        self.table.as_deref()
    }

    pub fn column(&self) -> Option<&str> {
        self.column.as_deref()
    }

    pub fn datatype(&self) -> Option<&str> {
        self.datatype.as_deref()
    }

    pub fn constraint(&self) -> Option<&str> {
        self.constraint.as_deref()
    }

    pub fn file(&self) -> Option<&str> {
        self.file.as_deref()
    }

    pub fn line(&self) -> Option<u32> {
        self.line
    }

    pub fn routine(&self) -> Option<&str> {
        self.routine.as_deref()
    }

    /// true when this problem's parsed severity is one of `{error, fatal, panic}`, i.e. it is
    /// an Error rather than a Notice per the data model in §3.
    pub fn is_error(&self) -> bool {
        matches!(self.parsed_severity, Severity::Error | Severity::Fatal | Severity::Panic)
    }
}

impl fmt::Display for DbError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.severity, self.message)?;
        if let Some(detail) = &self.detail {
            write!(f, "\nDETAIL: {detail}")?;
        }
        if let Some(hint) = &self.hint {
            write!(f, "\nHINT: {hint}")?;
        }
        Ok(())
    }
}

impl error::Error for DbError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_error_display_includes_detail() {
        let e = ClientError::with_detail(ClientErrorKind::MalformedArrayLiteral, "unterminated literal");
        assert_eq!(e.to_string(), "malformed array literal: unterminated literal");
    }
}
