//! Notices and notifications (§4.G.6, §6.3): server-initiated messages dispatched to
//! user-registered handlers, interleaved with the response stream but never displacing it.

use std::io::Write;
use std::panic::{catch_unwind, AssertUnwindSafe};

use crate::error::DbError;

/// A server notice: a [`DbError`] whose parsed severity is `≤ warning` (never an `Error`).
#[derive(Debug, Clone)]
pub struct Notice(DbError);

impl Notice {
    pub(crate) fn new(problem: DbError) -> Self {
        Self(problem)
    }

    pub fn problem(&self) -> &DbError {
        &self.0
    }

    pub fn brief(&self) -> &str {
        self.0.message()
    }
}

/// A server notification (`NOTIFY`/`LISTEN`), carrying the sending backend's PID, the channel
/// name, and an optional payload.
#[derive(Debug, Clone)]
pub struct Notification {
    server_pid: i32,
    channel_name: String,
    payload: String,
}

impl Notification {
    pub(crate) fn new(server_pid: i32, channel_name: String, payload: String) -> Self {
        Self {
            server_pid,
            channel_name,
            payload,
        }
    }

    pub fn server_pid(&self) -> i32 {
        self.server_pid
    }

    pub fn channel_name(&self) -> &str {
        &self.channel_name
    }

    pub fn payload(&self) -> &str {
        &self.payload
    }
}

pub(crate) type NoticeHandler = Box<dyn FnMut(Notice)>;
pub(crate) type NotificationHandler = Box<dyn FnMut(Notification)>;

/// Writes `"PostgreSQL Notice: {brief}\n"` to the process's diagnostic stream (§6.3 default).
pub(crate) fn default_notice_handler(notice: Notice) {
    let _ = writeln!(std::io::stderr(), "PostgreSQL Notice: {}", notice.brief());
}

/// Invokes a notice/notification handler, catching and logging a panic instead of letting it
/// unwind through the response pump (§6.3 Open Question: handler panics are not fatal to the
/// connection).
pub(crate) fn dispatch<T>(handler: &mut (dyn FnMut(T) + '_), value: T) {
    if catch_unwind(AssertUnwindSafe(|| handler(value))).is_err() {
        tracing::error!("notice/notification handler panicked");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn notification_exposes_its_fields() {
        let n = Notification::new(4321, "channel".to_string(), "payload".to_string());
        assert_eq!(n.server_pid(), 4321);
        assert_eq!(n.channel_name(), "channel");
        assert_eq!(n.payload(), "payload");
    }
}
