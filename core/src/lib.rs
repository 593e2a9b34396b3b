//! The message datapath core of a distributed replication proxy: the engine
//! that reads bytes off a connection, incrementally parses them into
//! request/response messages, fragments multi-key requests, carries
//! messages through a chain-of-responsibility pipeline, and gathers
//! outbound messages into vectored writes.
//!
//! # Organization
//!
//! - [`mbuf`] / [`chain`] — the fixed-capacity buffer segment and the chain
//!   that links them into a message body (spec §4.A/§4.B).
//! - [`msg`] / [`pool`] — the parse unit and its free-list-backed arena
//!   (spec §4.C/§4.D).
//! - [`parser`] / [`dialects`] — per-dialect incremental parsing
//!   (spec §4.F).
//! - [`recv`] — read → parse → split/fragment/repair → dispatch
//!   (spec §4.G).
//! - [`send`] — gather outbound messages into a bounded iovec, rewind
//!   partial writes (spec §4.H).
//! - [`fragment`] — multi-key request splitting and fan-out identity
//!   (spec §4.I).
//! - [`errmsg`] — wire-format error-response synthesis (spec §4.J).
//! - [`timeout`] — ordered-by-deadline index of outstanding requests
//!   (spec §4.E).
//! - [`conn`] / [`decrypt`] / [`clock`] — the capability traits supplied by
//!   the owning transport layer (spec §6).
//!
//! Out of scope (spec §1): the accept loop, configuration loading, stats
//! counters, logging sinks, cluster topology/routing, consistent hashing,
//! concrete wire grammars beyond a minimal Redis/Memcached grounding, TLS
//! handshakes, and encryption key management.

pub mod chain;
pub mod clock;
pub mod config;
pub mod conn;
pub mod decrypt;
pub mod dialects;
pub mod dmsg;
pub mod errmsg;
pub mod error;
pub mod fragment;
pub mod id;
pub mod mbuf;
pub mod msg;
pub mod parser;
pub mod pool;
pub mod recv;
pub mod send;
pub mod timeout;

pub use chain::MbufChain;
pub use conn::Connection;
pub use config::CoreConfig;
pub use error::{CoreError, CoreResult};
pub use mbuf::{Mbuf, MbufPool};
pub use msg::Msg;
pub use pool::{MsgHandle, MsgPool};
pub use timeout::TimeoutIndex;

use crate::clock::Clock;
use crate::decrypt::Decrypt;
use crate::id::ConnId;

/// Per-worker state the event loop owns (spec §9: "Global counters...
/// scope to a per-worker `Core` value owned by the event loop; initialize
/// at worker start, tear down at shutdown; never share across workers").
///
/// This is the one place the datapath core aggregates its sub-components;
/// callers drive [`Core::recv`]/[`Core::send`] per connection and poll
/// [`Core::timeouts`] from their own event loop (spec §5: "a standalone
/// data structure the owner polls").
pub struct Core<D: Decrypt, C: Clock> {
    pub msgs: MsgPool,
    pub timeouts: TimeoutIndex,
    pub decrypt: D,
    pub clock: C,
}

impl<D: Decrypt, C: Clock> Core<D, C> {
    pub fn new(config: CoreConfig, decrypt: D, clock: C) -> CoreResult<Self> {
        config.validate()?;
        let mbuf_pool = MbufPool::new(config.mbuf_cap, config.mbuf_extra, config.mbuf_pool_max);
        Ok(Self {
            msgs: MsgPool::new(mbuf_pool, config.max_alloc_msgs, config.allowed_alloc_msgs),
            timeouts: TimeoutIndex::new(),
            decrypt,
            clock,
        })
    }

    /// Spec §4.G `recv(conn)`.
    pub fn recv(&mut self, conn: &mut dyn Connection) -> CoreResult<()> {
        recv::recv(&mut self.msgs, conn, &self.decrypt)
    }

    /// Spec §4.H `send(conn)`.
    pub fn send(&mut self, conn: &mut dyn Connection) -> CoreResult<()> {
        send::send(&mut self.msgs, conn)
    }

    /// Enters `msg` into the timeout index at `now + conn.server_timeout_ms()`
    /// (spec §4.E `insert`). Only meaningful for requests (spec §3
    /// invariant 5); callers are expected to only call this for
    /// `Direction::Request` messages that are neither `quit` nor `noreply`.
    pub fn arm_timeout(&mut self, handle: MsgHandle, conn: &dyn Connection) {
        let now_ms = self.clock.now_ms();
        let server_timeout_ms = conn.server_timeout_ms();
        if let Some(msg) = self.msgs.get_msg_mut(handle) {
            self.timeouts.insert(msg, handle, conn.id(), now_ms, server_timeout_ms);
        }
    }

    /// Withdraws `msg` from the timeout index (spec §4.E `delete`):
    /// idempotent, a no-op if the message was never inserted.
    pub fn disarm_timeout(&mut self, handle: MsgHandle) {
        if let Some(msg) = self.msgs.get_msg_mut(handle) {
            self.timeouts.delete(msg, handle);
        }
    }

    /// Peeks the earliest-expiring outstanding request, for the event loop
    /// to poll (spec §4.E `min`).
    pub fn next_timeout(&self) -> Option<(u64, MsgHandle, ConnId)> {
        self.timeouts.min()
    }
}
