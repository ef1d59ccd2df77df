//! The connection core (§4.G): a caller-driven, non-blocking state machine wrapping one
//! socket. [`Connection`] owns the socket and drives the handshake to completion up front;
//! [`ConnectionHandle`] is the shared-by-reference surface [`PreparedStatement`](crate::statement::PreparedStatement)
//! borrows to bind, execute, and describe itself against.
//!
//! Everything past the initial connect is a single request in flight at a time: `send_execute`/
//! `prepare`/`describe_prepared`/`unprepare` each push one [`pump::RequestKind`] onto a FIFO
//! queue and the caller drains it by repeatedly calling [`ConnectionHandle::handle_input`]
//! (directly, for the non-blocking surface) or implicitly via the blocking `wait_*` helpers.

pub mod escape;
pub(crate) mod io;
pub mod large_object;
pub mod notice;
mod pump;
mod startup;
#[cfg(feature = "tls")]
mod tls;

use std::cell::RefCell;
use std::collections::VecDeque;
use std::io::{Read, Write};
use std::ops::Deref;
use std::os::fd::AsRawFd;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use bytes::{Buf, BytesMut};
use fallible_iterator::FallibleIterator;
use postgres_protocol::message::{backend, frontend};
use postgres_protocol::IsNull;

use crate::config::Config;
use crate::conversion::{array, FromData};
use crate::data::{Data, Format};
use crate::error::{ClientError, ClientErrorKind, DbError, Error};
type ErrorHandler = Box<dyn FnMut(&DbError) -> bool>;
use crate::row::{ColumnInfo, Row, RowInfo};
use crate::sql::SqlString;
use crate::statement::{DescribeInfo, PreparedStatement};

pub use self::io::{Readiness, ReadinessMask};
use self::io::Transport;
use self::notice::{default_notice_handler, dispatch, Notice, NoticeHandler, Notification, NotificationHandler};
use self::pump::RequestKind;
use self::startup::ScramState;

fn not_connected() -> Error {
    Error::new(crate::error::NotConnected)
}

fn bind_err(e: frontend::BindError) -> Error {
    match e {
        frontend::BindError::Conversion(_) => Error::from(ClientError::with_detail(ClientErrorKind::MalformedInput, "parameter value could not be serialized")),
        frontend::BindError::Serialization(e) => Error::from(e),
    }
}

fn raw_value_serializer(value: Option<&[u8]>, buf: &mut BytesMut) -> Result<IsNull, Box<dyn std::error::Error + Sync + Send>> {
    match value {
        Some(bytes) => {
            buf.extend_from_slice(bytes);
            Ok(IsNull::No)
        }
        None => Ok(IsNull::Yes),
    }
}

static SESSION_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Lifecycle state of one [`Connection`] (§4.G.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// No socket; [`Connection::connect_nio`] has not yet been called (or failed before
    /// opening one).
    Disconnected,
    /// Socket open; the `StartupMessage` is queued or partially written.
    EstablishmentWriting,
    /// Socket open; waiting on the authentication exchange and subsequent `ParameterStatus`/
    /// `BackendKeyData` chatter up to the first `ReadyForQuery`.
    EstablishmentReading,
    /// Handshake complete; ready to accept one request at a time.
    Connected,
    /// The socket was lost (I/O error, EOF, or a fatal protocol violation). The connection is
    /// not automatically retried; build a new one.
    Failure,
}

/// The outcome of draining one result set row by row (§4.G.5).
pub enum RowOrDone {
    Row(Row),
    Done,
}

struct Inner {
    config: Config,
    transport: Option<Transport>,
    status: Status,
    write_buf: BytesMut,
    read_buf: BytesMut,
    queue: VecDeque<RequestKind>,
    next_statement_id: u64,
    session_start_time: u64,
    server_pid: i32,
    server_secret_key: i32,
    transaction_status: u8,
    is_ssl_secured: bool,
    channel_binding_cert: Option<Vec<u8>>,
    scram: ScramState,
    current_row_info: Option<RowInfo>,
    ranges_scratch: Vec<Option<std::ops::Range<usize>>>,
    pending_rows: VecDeque<Row>,
    pending_completed: bool,
    pending_affected: u64,
    pending_error: Option<Error>,
    pending_describe_params: Option<Vec<u32>>,
    notice_handler: NoticeHandler,
    notification_handler: Option<NotificationHandler>,
    error_handler: Option<ErrorHandler>,
    last_handled_error: Option<DbError>,
}

impl Inner {
    fn new(config: Config, transport: Transport, is_ssl_secured: bool, channel_binding_cert: Option<Vec<u8>>) -> Self {
        Self {
            config,
            transport: Some(transport),
            status: Status::EstablishmentWriting,
            write_buf: BytesMut::new(),
            read_buf: BytesMut::new(),
            queue: VecDeque::new(),
            next_statement_id: 0,
            session_start_time: SESSION_COUNTER.fetch_add(1, Ordering::Relaxed),
            server_pid: 0,
            server_secret_key: 0,
            transaction_status: b'I',
            is_ssl_secured,
            channel_binding_cert,
            scram: ScramState::default(),
            current_row_info: None,
            ranges_scratch: Vec::new(),
            pending_rows: VecDeque::new(),
            pending_completed: false,
            pending_affected: 0,
            pending_error: None,
            pending_describe_params: None,
            notice_handler: Box::new(default_notice_handler),
            notification_handler: None,
            error_handler: None,
            last_handled_error: None,
        }
    }

    /// Consumes a staged error (if any), routing it through the registered error handler
    /// first (§4.G.5, §7). If the handler is set and reports the error as handled, the wait
    /// completes normally and the problem is retrievable via `last_handled_error`; otherwise
    /// the error is returned to the caller.
    fn take_pending_error(&mut self) -> Result<(), Error> {
        let Some(e) = self.pending_error.take() else {
            return Ok(());
        };
        if let Some(handler) = &mut self.error_handler {
            if let Some(db_error) = e.as_db_error() {
                if handler(db_error) {
                    self.last_handled_error = Some(db_error.clone());
                    return Ok(());
                }
            }
        }
        Err(e)
    }

    fn fd(&self) -> Result<std::os::fd::RawFd, Error> {
        Ok(self.transport.as_ref().ok_or_else(not_connected)?.as_raw_fd())
    }

    fn wait_readable(&self) -> Result<(), Error> {
        io::wait_socket_readiness(self.fd()?, ReadinessMask::read(), self.config.wait_response_timeout.as_duration())
    }

    fn flush_write_buf(&mut self, wait: bool) -> Result<(), Error> {
        loop {
            if self.write_buf.is_empty() {
                return Ok(());
            }
            let transport = self.transport.as_mut().ok_or_else(not_connected)?;
            match transport.write(&self.write_buf) {
                Ok(0) => {
                    self.status = Status::Failure;
                    return Err(not_connected());
                }
                Ok(n) => self.write_buf.advance(n),
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                    if !wait {
                        return Ok(());
                    }
                    let fd = transport.as_raw_fd();
                    io::wait_socket_readiness(fd, ReadinessMask::write(), self.config.wait_response_timeout.as_duration())?;
                }
                Err(e) => {
                    self.status = Status::Failure;
                    return Err(Error::from(e));
                }
            }
        }
    }

    fn fill_read_buf(&mut self) -> Result<(), Error> {
        let mut chunk = [0u8; 8192];
        loop {
            let transport = self.transport.as_mut().ok_or_else(not_connected)?;
            match transport.read(&mut chunk) {
                Ok(0) => {
                    self.status = Status::Failure;
                    return Err(not_connected());
                }
                Ok(n) => {
                    self.read_buf.extend_from_slice(&chunk[..n]);
                    if n < chunk.len() {
                        return Ok(());
                    }
                }
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => return Ok(()),
                Err(e) => {
                    self.status = Status::Failure;
                    return Err(Error::from(e));
                }
            }
        }
    }

    /// Pumps at most one round of I/O (§4.G.4): flush pending writes, optionally block for
    /// readability, read whatever is available, and process every complete message now
    /// buffered. `wait` selects between the blocking and non-blocking surfaces; it never
    /// blocks for longer than `wait_response_timeout`.
    fn handle_input(&mut self, wait: bool) -> Result<(), Error> {
        self.flush_write_buf(wait)?;
        if wait {
            self.wait_readable()?;
        }
        self.fill_read_buf()?;
        while let Some(msg) = backend::Message::parse(&mut self.read_buf).map_err(Error::from)? {
            if self.status == Status::Connected {
                self.process_message(msg)?;
            } else {
                self.process_establishment_message(msg)?;
            }
        }
        Ok(())
    }

    fn process_establishment_message(&mut self, msg: backend::Message) -> Result<(), Error> {
        match msg {
            backend::Message::ReadyForQuery(body) => {
                self.transaction_status = body.status();
                self.status = Status::Connected;
                Ok(())
            }
            backend::Message::BackendKeyData(body) => {
                self.server_pid = body.process_id();
                self.server_secret_key = body.secret_key();
                Ok(())
            }
            backend::Message::ParameterStatus(_) => Ok(()),
            backend::Message::NoticeResponse(mut body) => {
                if let Ok(problem) = DbError::parse(&mut body.fields()) {
                    dispatch(&mut self.notice_handler, Notice::new(problem));
                }
                Ok(())
            }
            backend::Message::ErrorResponse(mut body) => {
                self.status = Status::Failure;
                Err(Error::db(&mut body.fields()))
            }
            other => {
                self.status = Status::EstablishmentReading;
                let cert = self.channel_binding_cert.clone();
                if let Some(reply) = startup::handle_auth_message(&other, &self.config, &mut self.scram, cert.as_deref())? {
                    self.write_buf.extend_from_slice(&reply);
                }
                Ok(())
            }
        }
    }

    fn process_message(&mut self, msg: backend::Message) -> Result<(), Error> {
        match msg {
            backend::Message::NoticeResponse(mut body) => {
                if let Ok(problem) = DbError::parse(&mut body.fields()) {
                    dispatch(&mut self.notice_handler, Notice::new(problem));
                }
                Ok(())
            }
            backend::Message::NotificationResponse(body) => {
                if let Some(handler) = &mut self.notification_handler {
                    let channel = body.channel().map_err(Error::from)?.to_string();
                    let payload = body.message().map_err(Error::from)?.to_string();
                    dispatch(handler, Notification::new(body.process_id(), channel, payload));
                }
                Ok(())
            }
            backend::Message::ParameterStatus(_) => Ok(()),
            backend::Message::BackendKeyData(body) => {
                self.server_pid = body.process_id();
                self.server_secret_key = body.secret_key();
                Ok(())
            }
            backend::Message::ErrorResponse(mut body) => {
                self.pending_error = Some(Error::db(&mut body.fields()));
                self.pending_completed = true;
                Ok(())
            }
            backend::Message::ReadyForQuery(body) => {
                self.transaction_status = body.status();
                self.queue.pop_front();
                self.pending_completed = false;
                self.current_row_info = None;
                Ok(())
            }
            backend::Message::ParseComplete | backend::Message::BindComplete | backend::Message::CloseComplete => Ok(()),
            backend::Message::RowDescription(body) => {
                let mut columns = Vec::new();
                let mut fields = body.fields();
                while let Some(field) = fields.next().map_err(Error::from)? {
                    columns.push(ColumnInfo {
                        name: field.name().map_err(Error::from)?.to_string(),
                        table_oid: field.table_oid(),
                        table_column: field.column_id(),
                        format: if field.format() == 1 { Format::Binary } else { Format::Text },
                        type_oid: field.type_oid(),
                        type_size: field.type_size(),
                        type_modifier: field.type_modifier(),
                    });
                }
                self.current_row_info = Some(RowInfo::new(columns));
                Ok(())
            }
            backend::Message::NoData => {
                self.current_row_info = None;
                Ok(())
            }
            backend::Message::DataRow(body) => {
                let info = self.current_row_info.clone().ok_or_else(Error::unexpected)?;
                self.ranges_scratch.clear();
                let mut ranges = body.ranges();
                while let Some(range) = ranges.next().map_err(Error::from)? {
                    self.ranges_scratch.push(range);
                }
                let buffer = body.buffer();
                let mut cells = Vec::with_capacity(self.ranges_scratch.len());
                for (index, range) in self.ranges_scratch.iter().enumerate() {
                    let format = info.column(index).format();
                    let cell = match range {
                        Some(range) => Data::from_raw(buffer[range.clone()].to_vec(), format),
                        None => Data::default(),
                    };
                    cells.push(cell);
                }
                self.pending_rows.push_back(Row::new(info, cells));
                Ok(())
            }
            backend::Message::CommandComplete(body) => {
                self.pending_affected = body
                    .tag()
                    .ok()
                    .and_then(|tag| tag.rsplit(' ').next())
                    .and_then(|n| n.parse().ok())
                    .unwrap_or(0);
                self.pending_completed = true;
                Ok(())
            }
            backend::Message::EmptyQueryResponse | backend::Message::PortalSuspended => {
                self.pending_completed = true;
                Ok(())
            }
            backend::Message::ParameterDescription(body) => {
                let mut params = Vec::new();
                let mut it = body.parameters();
                while let Some(oid) = it.next().map_err(Error::from)? {
                    params.push(oid);
                }
                self.pending_describe_params = Some(params);
                Ok(())
            }
            _ => Err(Error::unexpected()),
        }
    }

    fn ensure_idle(&self) -> Result<(), Error> {
        match self.status {
            Status::Connected => {}
            _ => return Err(not_connected()),
        }
        if !self.queue.is_empty() {
            return Err(Error::from(ClientError::with_detail(
                ClientErrorKind::NotReady,
                "a request is already pending on this connection",
            )));
        }
        Ok(())
    }
}

/// The shared-by-reference half of a [`Connection`]: everything a borrowed
/// [`PreparedStatement`] needs to bind, execute, and describe itself. Interior mutability
/// (`RefCell`) lets many `PreparedStatement<'c>`s, and the owning `Connection`, share one `&'c
/// ConnectionHandle` even though the connection core is only ever driven by one logical caller
/// at a time (§4.G: single request in flight).
pub struct ConnectionHandle {
    inner: RefCell<Inner>,
}

impl ConnectionHandle {
    pub(crate) fn session_start_time(&self) -> u64 {
        self.inner.borrow().session_start_time
    }

    pub fn status(&self) -> Status {
        self.inner.borrow().status
    }

    pub fn is_connected(&self) -> bool {
        self.status() == Status::Connected
    }

    pub fn is_ssl_secured(&self) -> bool {
        self.inner.borrow().is_ssl_secured
    }

    pub fn server_pid(&self) -> i32 {
        self.inner.borrow().server_pid
    }

    pub fn transaction_status(&self) -> u8 {
        self.inner.borrow().transaction_status
    }

    /// Whether a request is in flight or rows from one are already buffered locally.
    pub fn has_pending_response(&self) -> bool {
        let inner = self.inner.borrow();
        !inner.queue.is_empty() || !inner.pending_rows.is_empty()
    }

    /// Whether bytes are already sitting in the local read buffer, i.e. the next
    /// [`handle_input`](Self::handle_input) call can make progress without a `poll(2)` wait.
    pub fn has_pending_signal(&self) -> bool {
        !self.inner.borrow().read_buf.is_empty()
    }

    /// Readiness mask the caller should `poll(2)` the underlying socket for before calling
    /// [`handle_input`](Self::handle_input) again in non-blocking mode (§4.G.3/§5).
    pub fn socket_readiness(&self, mask: ReadinessMask, deadline: Option<Instant>) -> Result<Readiness, Error> {
        let fd = self.inner.borrow().fd()?;
        io::socket_readiness(fd, mask, deadline)
    }

    /// Pumps at most one round of non-blocking I/O when `wait` is `false`, or blocks (up to
    /// `wait_response_timeout`) until some progress is made when `wait` is `true`. The caller
    /// drives the connection establishment and every subsequent request through this single
    /// entry point (§4.G.2-§4.G.4, §5).
    pub fn handle_input(&self, wait: bool) -> Result<(), Error> {
        self.inner.borrow_mut().handle_input(wait)
    }

    fn wait_until_idle(&self) -> Result<(), Error> {
        loop {
            let done = {
                let inner = self.inner.borrow();
                inner.queue.is_empty()
            };
            if done {
                break;
            }
            self.inner.borrow_mut().handle_input(true)?;
        }
        let mut inner = self.inner.borrow_mut();
        inner.take_pending_error()
    }

    pub(crate) fn wait_for_row_or_completion(&self) -> Result<RowOrDone, Error> {
        loop {
            {
                let mut inner = self.inner.borrow_mut();
                if let Some(row) = inner.pending_rows.pop_front() {
                    return Ok(RowOrDone::Row(row));
                }
                if inner.queue.is_empty() {
                    inner.take_pending_error()?;
                    return Ok(RowOrDone::Done);
                }
            }
            self.inner.borrow_mut().handle_input(true)?;
        }
    }

    /// Registers the handler invoked for every `NoticeResponse` (§4.G.6). A panic inside
    /// `handler` is caught and logged rather than unwinding through the response pump.
    pub fn set_notice_handler(&self, handler: impl FnMut(Notice) + 'static) {
        self.inner.borrow_mut().notice_handler = Box::new(handler);
    }

    /// Registers the handler invoked for every `NotificationResponse`; by default
    /// notifications are silently discarded (§4.G.6, §6.3).
    pub fn set_notification_handler(&self, handler: impl FnMut(Notification) + 'static) {
        self.inner.borrow_mut().notification_handler = Some(Box::new(handler));
    }

    /// Registers the error handler consulted by `wait_response`/`execute` before a server
    /// [`Error`](crate::error::DbError) is thrown (§4.G.5, §7). If `handler` returns `true`
    /// the wait completes normally and the problem becomes retrievable via
    /// [`take_last_handled_error`](Self::take_last_handled_error); if it returns `false` (or
    /// no handler is registered) the error is raised as usual.
    pub fn set_error_handler(&self, handler: impl FnMut(&DbError) -> bool + 'static) {
        self.inner.borrow_mut().error_handler = Some(Box::new(handler));
    }

    /// The most recent server error the registered error handler marked as handled, if any.
    /// Consumes it: a second call returns `None` until another handled error arrives.
    pub fn take_last_handled_error(&self) -> Option<DbError> {
        self.inner.borrow_mut().last_handled_error.take()
    }

    pub fn to_quoted_literal(&self, s: &str) -> String {
        escape::to_quoted_literal(s)
    }

    pub fn to_quoted_identifier(&self, s: &str) -> String {
        escape::to_quoted_identifier(s)
    }

    /// Probes the dimensionality of an array literal without fully parsing it (§4.F.3).
    pub fn array_dimension(&self, literal: &str, delimiter: char) -> Result<usize, Error> {
        array::array_dimension(literal, delimiter)
    }

    /// Parses and names a server-side prepared statement from `sql` via the
    /// [preparser](crate::sql::SqlString), preserving its named-parameter bindings.
    pub fn prepare(&self, sql: &str) -> Result<PreparedStatement<'_>, Error> {
        let parsed = SqlString::parse(sql)?;
        let query = parsed.to_query_string();
        let name = self.do_prepare(&query)?;
        Ok(PreparedStatement::new_preparsed(self, name, parsed))
    }

    /// Names a server-side prepared statement from raw SQL text, without preparsing; its
    /// parameters are addressed by position only.
    pub fn prepare_opaque(&self, sql: &str) -> Result<PreparedStatement<'_>, Error> {
        let name = self.do_prepare(sql)?;
        Ok(PreparedStatement::new_opaque(self, name))
    }

    fn do_prepare(&self, query: &str) -> Result<Rc<str>, Error> {
        let name: Rc<str> = {
            let mut inner = self.inner.borrow_mut();
            inner.ensure_idle()?;
            let name: Rc<str> = Rc::from(format!("pw_{}", inner.next_statement_id));
            inner.next_statement_id += 1;
            frontend::parse(&name, query, std::iter::empty(), &mut inner.write_buf).map_err(Error::from)?;
            frontend::sync(&mut inner.write_buf);
            inner.queue.push_back(RequestKind::Prepare);
            name
        };
        self.wait_until_idle()?;
        Ok(name)
    }

    pub(crate) fn describe_prepared(&self, name: &str) -> Result<DescribeInfo, Error> {
        {
            let mut inner = self.inner.borrow_mut();
            inner.ensure_idle()?;
            frontend::describe(b'S', name, &mut inner.write_buf).map_err(Error::from)?;
            frontend::sync(&mut inner.write_buf);
            inner.pending_describe_params = None;
            inner.current_row_info = None;
            inner.queue.push_back(RequestKind::Describe);
        }
        self.wait_until_idle()?;
        let mut inner = self.inner.borrow_mut();
        Ok(DescribeInfo {
            param_types: inner.pending_describe_params.take().unwrap_or_default(),
            row_info: inner.current_row_info.take(),
        })
    }

    pub(crate) fn unprepare(&self, name: &str) -> Result<(), Error> {
        {
            let mut inner = self.inner.borrow_mut();
            if inner.status != Status::Connected {
                return Ok(());
            }
            inner.ensure_idle()?;
            frontend::close(b'S', name, &mut inner.write_buf).map_err(Error::from)?;
            frontend::sync(&mut inner.write_buf);
            inner.queue.push_back(RequestKind::Unprepare);
        }
        self.wait_until_idle()
    }

    pub(crate) fn send_execute(&self, name: &str, values: &[Option<&[u8]>], formats: &[Format], result_format: Format) -> Result<(), Error> {
        let mut inner = self.inner.borrow_mut();
        inner.ensure_idle()?;
        let format_codes: Vec<i16> = formats.iter().map(|f| f.code()).collect();
        frontend::bind(
            "",
            name,
            format_codes.iter().copied(),
            values.iter().copied(),
            raw_value_serializer,
            [result_format.code()],
            &mut inner.write_buf,
        )
        .map_err(bind_err)?;
        frontend::describe(b'P', "", &mut inner.write_buf).map_err(Error::from)?;
        frontend::execute("", 0, &mut inner.write_buf).map_err(Error::from)?;
        frontend::sync(&mut inner.write_buf);
        inner.queue.push_back(RequestKind::Execute);
        inner.pending_rows.clear();
        inner.pending_completed = false;
        inner.current_row_info = None;
        inner.handle_input(false)
    }

    /// Runs `sql` through the simple query protocol (multiple `;`-separated statements
    /// allowed; no parameters). Rows, if any, are discarded; use [`prepare`](Self::prepare)
    /// for anything that needs to inspect results.
    pub fn execute_simple(&self, sql: &str) -> Result<(), Error> {
        {
            let mut inner = self.inner.borrow_mut();
            inner.ensure_idle()?;
            frontend::query(sql, &mut inner.write_buf).map_err(Error::from)?;
            inner.queue.push_back(RequestKind::Execute);
            inner.pending_rows.clear();
            inner.pending_completed = false;
            inner.current_row_info = None;
        }
        loop {
            match self.wait_for_row_or_completion()? {
                RowOrDone::Row(_) => {}
                RowOrDone::Done => return Ok(()),
            }
        }
    }

    /// Executes `sql` (no preparsing, no named parameters) once and returns the single column
    /// of its first row, if any. Used internally by [`large_object`](crate::connection::large_object)
    /// and available for other one-shot scalar calls.
    pub(crate) fn query_scalar<T: FromData>(&self, sql: &str, params: &[Data]) -> Result<Option<T>, Error> {
        let values: Vec<Option<&[u8]>> = params.iter().map(|d| if d.is_valid() { Some(d.as_bytes()) } else { None }).collect();
        let formats: Vec<i16> = params.iter().map(|d| d.format().unwrap_or(Format::Text).code()).collect();
        {
            let mut inner = self.inner.borrow_mut();
            inner.ensure_idle()?;
            frontend::parse("", sql, std::iter::empty(), &mut inner.write_buf).map_err(Error::from)?;
            frontend::bind("", "", formats.iter().copied(), values.iter().copied(), raw_value_serializer, [Format::Binary.code()], &mut inner.write_buf)
                .map_err(bind_err)?;
            frontend::describe(b'P', "", &mut inner.write_buf).map_err(Error::from)?;
            frontend::execute("", 0, &mut inner.write_buf).map_err(Error::from)?;
            frontend::sync(&mut inner.write_buf);
            inner.queue.push_back(RequestKind::Execute);
            inner.pending_rows.clear();
            inner.pending_completed = false;
            inner.current_row_info = None;
        }
        let mut first = None;
        loop {
            match self.wait_for_row_or_completion()? {
                RowOrDone::Row(row) => {
                    if first.is_none() {
                        first = Some(row.get::<T>(0)?);
                    }
                }
                RowOrDone::Done => return Ok(first),
            }
        }
    }
}

/// An established connection to one PostgreSQL backend process.
///
/// `Connection` owns the socket; [`ConnectionHandle`] (reached via `Deref`) is what
/// [`PreparedStatement`](crate::statement::PreparedStatement) actually borrows, so that many
/// statements can be alive (and bound, and executed) against `&connection` at once without
/// needing `&mut`.
pub struct Connection(ConnectionHandle);

impl Deref for Connection {
    type Target = ConnectionHandle;

    fn deref(&self) -> &ConnectionHandle {
        &self.0
    }
}

impl Connection {
    /// Opens the transport, sends `StartupMessage`, and drives authentication to
    /// `ReadyForQuery`, blocking (bounded by `connect_timeout`/`wait_response_timeout`) until
    /// the connection is [`Status::Connected`] or the attempt fails.
    pub fn connect(config: Config) -> Result<Self, Error> {
        let conn = Self::connect_nio(config)?;
        loop {
            match conn.status() {
                Status::Connected => return Ok(conn),
                Status::Failure => return Err(not_connected()),
                _ => conn.handle_input(true)?,
            }
        }
    }

    /// Opens the transport and queues the startup handshake without blocking past the initial
    /// plain/TLS connect (§9's one-shot TLS bootstrap is still synchronous even here). The
    /// caller drives the rest by polling [`ConnectionHandle::socket_readiness`] and calling
    /// [`ConnectionHandle::handle_input`] until [`ConnectionHandle::status`] reports
    /// [`Status::Connected`] (or [`Status::Failure`]).
    pub fn connect_nio(config: Config) -> Result<Self, Error> {
        config.validate().map_err(Error::from)?;
        let deadline = config.connect_timeout.as_duration().map(|d| Instant::now() + d);
        let transport = io::connect(&config, deadline)?;
        let is_ssl_secured = matches!(transport, Transport::Tls(_));
        #[cfg(feature = "tls")]
        let channel_binding_cert = match &transport {
            Transport::Tls(stream) => tls::peer_cert_der(stream),
            Transport::Plain(_) => None,
        };
        #[cfg(not(feature = "tls"))]
        let channel_binding_cert: Option<Vec<u8>> = None;

        let mut inner = Inner::new(config, transport, is_ssl_secured, channel_binding_cert);
        let startup = startup::encode_startup(&inner.config)?;
        inner.write_buf.extend_from_slice(&startup);
        Ok(Connection(ConnectionHandle { inner: RefCell::new(inner) }))
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        let mut inner = self.0.inner.borrow_mut();
        if inner.status == Status::Connected {
            let mut buf = BytesMut::new();
            frontend::terminate(&mut buf);
            inner.write_buf.extend_from_slice(&buf);
            let _ = inner.flush_write_buf(false);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_defaults_to_disconnected_before_any_socket_exists() {
        // Status::Disconnected is only ever the value before connect_nio opens a socket; once
        // Inner exists it always starts in EstablishmentWriting. This asserts the variant
        // still exists and orders the way the rest of the module assumes.
        assert_ne!(Status::Disconnected, Status::Connected);
        assert_ne!(Status::EstablishmentWriting, Status::EstablishmentReading);
    }

    #[test]
    fn row_or_done_distinguishes_its_variants() {
        let info = RowInfo::new(Vec::new());
        let row = RowOrDone::Row(Row::new(info, Vec::new()));
        assert!(matches!(row, RowOrDone::Row(_)));
        assert!(matches!(RowOrDone::Done, RowOrDone::Done));
    }
}
