//! Prepared statements: parameter binding, execution, and `describe` handling.
//!
//! A [`PreparedStatement`] is constructed by a [`Connection`](crate::connection::Connection)
//! either from a parsed [`SqlString`] (names and positional parameters preserved) or as an
//! *opaque* statement built from raw SQL text, whose parameter vector grows on demand.

use std::ops::ControlFlow;
use std::rc::Rc;

use crate::connection::{ConnectionHandle, RowOrDone};
use crate::conversion::ToData;
use crate::data::{Data, DataView, Format};
use crate::error::{ClientError, ClientErrorKind, Error};
use crate::row::{Row, RowInfo};
use crate::sql::SqlString;

fn malformed(detail: &'static str) -> Error {
    Error::from(ClientError::with_detail(ClientErrorKind::MalformedInput, detail))
}

fn stale_session() -> Error {
    Error::from(ClientError::with_detail(
        ClientErrorKind::NotReady,
        "prepared statement outlived its connection's session",
    ))
}

enum Param<'a> {
    Owned(Data),
    Borrowed(DataView<'a>),
}

impl Param<'_> {
    fn format(&self) -> Format {
        match self {
            Param::Owned(d) => d.format().unwrap_or(Format::Text),
            Param::Borrowed(v) => v.format().unwrap_or(Format::Text),
        }
    }

    fn bytes(&self) -> Option<&[u8]> {
        match self {
            Param::Owned(d) if d.is_valid() => Some(d.as_bytes()),
            Param::Borrowed(v) if v.is_valid() => Some(v.as_bytes()),
            _ => None,
        }
    }
}

/// What this statement was built from, and the name-to-index mapping it exposes.
enum Origin {
    Preparsed(SqlString),
    Opaque,
}

/// The result of describing a prepared statement: parameter type OIDs and output row shape.
#[derive(Debug, Clone, Default)]
pub struct DescribeInfo {
    pub(crate) param_types: Vec<u32>,
    pub(crate) row_info: Option<RowInfo>,
}

impl DescribeInfo {
    pub fn param_types(&self) -> &[u32] {
        &self.param_types
    }

    pub fn row_info(&self) -> Option<&RowInfo> {
        self.row_info.as_ref()
    }
}

/// A named statement prepared on the server. Binds parameters by index or by name (if built
/// from a [`SqlString`]) and executes in single-row streaming mode.
pub struct PreparedStatement<'c> {
    connection: &'c ConnectionHandle,
    name: Rc<str>,
    origin: Origin,
    params: Vec<Param<'c>>,
    result_format: Format,
    describe: DescribeInfo,
    session_start_time: u64,
}

impl<'c> PreparedStatement<'c> {
    pub(crate) fn new_preparsed(connection: &'c ConnectionHandle, name: Rc<str>, sql: SqlString) -> Self {
        let param_count = sql.parameter_count();
        Self {
            connection,
            name,
            origin: Origin::Preparsed(sql),
            params: (0..param_count).map(|_| Param::Owned(Data::default())).collect(),
            result_format: Format::Text,
            describe: DescribeInfo::default(),
            session_start_time: connection.session_start_time(),
        }
    }

    pub(crate) fn new_opaque(connection: &'c ConnectionHandle, name: Rc<str>) -> Self {
        Self {
            connection,
            name,
            origin: Origin::Opaque,
            params: Vec::new(),
            result_format: Format::Text,
            describe: DescribeInfo::default(),
            session_start_time: connection.session_start_time(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn describe_info(&self) -> &DescribeInfo {
        &self.describe
    }

    /// Requests binary-format result cells; default is text.
    pub fn set_result_format(&mut self, format: Format) {
        self.result_format = format;
    }

    fn check_session(&self) -> Result<(), Error> {
        if self.connection.session_start_time() != self.session_start_time {
            return Err(stale_session());
        }
        Ok(())
    }

    fn resolve_name_index(&self, name: &str) -> Result<usize, Error> {
        match &self.origin {
            Origin::Preparsed(sql) => sql.parameter_index(name).ok_or_else(|| malformed("unknown named parameter")),
            Origin::Opaque => Err(malformed("opaque statements do not have named parameters")),
        }
    }

    fn ensure_capacity(&mut self, index: usize) {
        if index >= self.params.len() {
            self.params.resize_with(index + 1, || Param::Owned(Data::default()));
        }
    }

    /// Binds the parameter at unified `index`, converting `value` via the conversion layer.
    pub fn bind<T: ToData>(&mut self, index: usize, value: &T) -> Result<(), Error> {
        self.check_session()?;
        self.ensure_capacity(index);
        self.params[index] = Param::Owned(value.to_data());
        Ok(())
    }

    /// Binds the named parameter `name`. Fails for opaque statements or an unknown name.
    pub fn bind_named<T: ToData>(&mut self, name: &str, value: &T) -> Result<(), Error> {
        self.check_session()?;
        let index = self.resolve_name_index(name)?;
        self.ensure_capacity(index);
        self.params[index] = Param::Owned(value.to_data());
        Ok(())
    }

    /// Binds a borrowed [`DataView`] at `index`; the referenced bytes must outlive the next
    /// `execute`/`execute_async` call.
    pub fn bind_view(&mut self, index: usize, value: DataView<'c>) -> Result<(), Error> {
        self.check_session()?;
        self.ensure_capacity(index);
        self.params[index] = Param::Borrowed(value);
        Ok(())
    }

    pub fn bind_view_named(&mut self, name: &str, value: DataView<'c>) -> Result<(), Error> {
        self.check_session()?;
        let index = self.resolve_name_index(name)?;
        self.ensure_capacity(index);
        self.params[index] = Param::Borrowed(value);
        Ok(())
    }

    fn param_wire_values(&self) -> (Vec<Option<&[u8]>>, Vec<Format>) {
        let values = self.params.iter().map(Param::bytes).collect();
        let formats = self.params.iter().map(Param::format).collect();
        (values, formats)
    }

    /// Enqueues a non-blocking execute request in single-row mode. Fails if the connection is
    /// not ready for a new request or a response is already pending.
    pub fn execute_async(&self) -> Result<(), Error> {
        self.check_session()?;
        let (values, formats) = self.param_wire_values();
        self.connection.send_execute(&self.name, &values, &formats, self.result_format)
    }

    /// Blocking execute: invokes `callback(row)` for every streamed row. If `callback` returns
    /// [`ControlFlow::Break`], remaining rows of this response are still drained (and
    /// discarded) before returning, and the terminal completion is still consumed.
    pub fn execute<F>(&self, mut callback: F) -> Result<(), Error>
    where
        F: FnMut(&Row) -> ControlFlow<()>,
    {
        self.execute_async()?;
        let mut stopped = false;
        loop {
            match self.connection.wait_for_row_or_completion()? {
                RowOrDone::Row(row) => {
                    if !stopped && callback(&row).is_break() {
                        stopped = true;
                    }
                }
                RowOrDone::Done => break,
            }
        }
        Ok(())
    }

    /// Issues a describe-prepared request; the connection fills in [`DescribeInfo`] when the
    /// response arrives.
    pub fn describe(&mut self) -> Result<(), Error> {
        self.check_session()?;
        self.describe = self.connection.describe_prepared(&self.name)?;
        Ok(())
    }
}

impl Drop for PreparedStatement<'_> {
    fn drop(&mut self) {
        if self.check_session().is_ok() {
            let _ = self.connection.unprepare(&self.name);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn name_resolution_against_a_parsed_sql_string() {
        let sql = SqlString::parse("SELECT :a, :b").unwrap();
        assert_eq!(sql.parameter_index("a"), Some(0));
        assert_eq!(sql.parameter_index("b"), Some(1));
        assert_eq!(sql.parameter_index("missing"), None);
    }
}
