//! Pure (I/O-free) classification helpers for the response pump (§4.G.4).
//!
//! Kept separate from [`super::Connection`]'s stateful read loop so the "what does this
//! completion status mean" logic can be unit-tested without a socket.

/// One outstanding request, tracked FIFO in the connection's queue. Every kind of request
/// this crate sends (parse/bind/execute, describe, close) ends in exactly one `ReadyForQuery`,
/// so the queue only needs to track how many are outstanding, not how each was shaped (§4.G.4).
#[derive(Debug)]
pub(crate) enum RequestKind {
    Execute,
    Prepare,
    Describe,
    Unprepare,
}
