//! The `Connection` capability (spec §6): supplied by the transport layer,
//! consumed by the receive and send engines. The accept loop and the wire
//! socket itself are external collaborators (spec §1) — this trait is the
//! seam between them and the datapath core.

use std::io::IoSlice;

use crate::error::{CoreResult, Progress};
use crate::id::ConnId;
use crate::msg::{Dialect, Mode};
use crate::pool::MsgHandle;

/// The connection's role in the topology (spec §6:
/// "client|proxy|dnode_client|dnode_server role flags").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    Client,
    Proxy,
    DnodeClient,
    DnodeServer,
}

/// The connection capability the receive and send engines drive (spec §6).
///
/// All methods are synchronous and non-blocking: per spec §5, suspension
/// only happens at the `recv`/`sendv` boundary and is surfaced as
/// `IoProgress::Again`, never as an `await` point — the core has no
/// scheduler of its own.
pub trait Connection {
    fn id(&self) -> ConnId;
    fn mode(&self) -> Mode;
    fn role(&self) -> Role;
    fn dialect(&self) -> Dialect;

    fn recv_ready(&self) -> bool;
    fn send_ready(&self) -> bool;

    /// Per-request timeout in milliseconds; non-positive disables the
    /// timeout (spec §4.E `insert`).
    fn server_timeout_ms(&self) -> i64;

    /// The symmetric key for this connection's peer envelope, if any.
    fn aes_key(&self) -> Option<&[u8]>;

    /// Non-blocking read into `buf`. Returns `Moved(0)` only at true EOF;
    /// callers treat that the same as any other terminal condition for the
    /// connection (spec doesn't special-case EOF further).
    fn recv(&mut self, buf: &mut [u8]) -> CoreResult<Progress>;

    /// Non-blocking gather-write.
    fn sendv(&mut self, iov: &[IoSlice<'_>]) -> CoreResult<Progress>;

    /// Returns the current inbound message, allocating a fresh one when
    /// `allocate` is true and none exists yet (spec §4.G step 1:
    /// `recv_next(eof=true)` on the first call of a `recv` loop,
    /// `recv_next(eof=false)` on subsequent calls within `recv_chain`).
    fn recv_next(&mut self, allocate: bool) -> Option<MsgHandle>;

    /// Returns the next outbound message, or `None` when the outbound queue
    /// is empty.
    fn send_next(&mut self) -> Option<MsgHandle>;

    /// Completion hook: `msg` finished parsing; `next` is the successor
    /// message produced by a split/fragment/repair, if any (spec §4.G).
    fn recv_done(&mut self, msg: MsgHandle, next: Option<MsgHandle>);

    /// Completion hook: `msg` was fully drained by the send engine
    /// (spec §4.H step 4).
    fn send_done(&mut self, msg: MsgHandle);
}
