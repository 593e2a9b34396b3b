//! An in-memory `Connection` implementation used to drive `dynocore` end to
//! end in tests and local runs, the way the teacher's `elvis` bin crate
//! wires up a runnable consumer around `elvis-core` without itself
//! containing any protocol logic.
//!
//! This crate owns no accept loop, no hashing/routing, and no config
//! loading (spec §1's "Out of scope" list) — it only supplies byte-level
//! plumbing: a queue of inbound bytes fed by the test/demo, and an inbound/
//! outbound message queue satisfying the `Connection` capability's
//! `recv_next`/`send_next`/`recv_done`/`send_done` contract.

use std::collections::VecDeque;
use std::io::IoSlice;

use dynocore::conn::{Connection, Role};
use dynocore::error::{CoreResult, Progress};
use dynocore::id::ConnId;
use dynocore::msg::{Dialect, Mode};
use dynocore::pool::MsgHandle;

/// A byte-queue-backed connection double. Inbound bytes are pushed in by
/// the test/demo harness (standing in for a real socket's readiness
/// notifications); outbound messages are queued by whatever drives the
/// proxy logic downstream of the datapath core (also out of scope here —
/// this crate only exercises `dynocore::Core` directly).
pub struct InMemoryConn {
    id: ConnId,
    mode: Mode,
    role: Role,
    dialect: Dialect,
    server_timeout_ms: i64,
    aes_key: Option<Vec<u8>>,

    inbound: VecDeque<u8>,
    current: Option<MsgHandle>,
    pending_next: VecDeque<MsgHandle>,
    recv_completed: Vec<(MsgHandle, Option<MsgHandle>)>,

    outbound: VecDeque<MsgHandle>,
    send_completed: Vec<MsgHandle>,
}

impl InMemoryConn {
    pub fn new(id: ConnId, mode: Mode, role: Role, dialect: Dialect) -> Self {
        Self {
            id,
            mode,
            role,
            dialect,
            server_timeout_ms: 400,
            aes_key: None,
            inbound: VecDeque::new(),
            current: None,
            pending_next: VecDeque::new(),
            recv_completed: Vec::new(),
            outbound: VecDeque::new(),
            send_completed: Vec::new(),
        }
    }

    pub fn with_server_timeout_ms(mut self, ms: i64) -> Self {
        self.server_timeout_ms = ms;
        self
    }

    pub fn with_aes_key(mut self, key: Vec<u8>) -> Self {
        self.aes_key = Some(key);
        self
    }

    /// Queues bytes as if they had just arrived on the socket.
    pub fn feed(&mut self, bytes: &[u8]) {
        self.inbound.extend(bytes.iter().copied());
    }

    /// Sets the message the next `recv` cycle should target, e.g. right
    /// after allocating a fresh request message from the pool.
    pub fn set_current(&mut self, handle: MsgHandle) {
        self.current = Some(handle);
    }

    /// Queues a message for the send engine to pick up on its next pass.
    pub fn enqueue_outbound(&mut self, handle: MsgHandle) {
        self.outbound.push_back(handle);
    }

    /// Every `(msg, next)` pair `recv_done` has been called with, in order.
    pub fn recv_completed(&self) -> &[(MsgHandle, Option<MsgHandle>)] {
        &self.recv_completed
    }

    /// Every message `send_done` has been called with, in order.
    pub fn send_completed(&self) -> &[MsgHandle] {
        &self.send_completed
    }
}

impl Connection for InMemoryConn {
    fn id(&self) -> ConnId {
        self.id
    }

    fn mode(&self) -> Mode {
        self.mode
    }

    fn role(&self) -> Role {
        self.role
    }

    fn dialect(&self) -> Dialect {
        self.dialect
    }

    fn recv_ready(&self) -> bool {
        !self.inbound.is_empty()
    }

    fn send_ready(&self) -> bool {
        !self.outbound.is_empty()
    }

    fn server_timeout_ms(&self) -> i64 {
        self.server_timeout_ms
    }

    fn aes_key(&self) -> Option<&[u8]> {
        self.aes_key.as_deref()
    }

    fn recv(&mut self, buf: &mut [u8]) -> CoreResult<Progress> {
        if self.inbound.is_empty() {
            return Ok(Progress::Again);
        }
        let mut n = 0;
        while n < buf.len() {
            match self.inbound.pop_front() {
                Some(b) => {
                    buf[n] = b;
                    n += 1;
                }
                None => break,
            }
        }
        tracing::trace!(target: "recv", conn = %self.id, n, "read bytes");
        Ok(Progress::Moved(n))
    }

    fn sendv(&mut self, iov: &[IoSlice<'_>]) -> CoreResult<Progress> {
        let n: usize = iov.iter().map(|s| s.len()).sum();
        tracing::trace!(target: "send", conn = %self.id, n, "wrote bytes");
        Ok(Progress::Moved(n))
    }

    fn recv_next(&mut self, allocate: bool) -> Option<MsgHandle> {
        if let Some(h) = self.pending_next.pop_front() {
            self.current = Some(h);
            return self.current;
        }
        if allocate {
            self.current
        } else {
            None
        }
    }

    fn send_next(&mut self) -> Option<MsgHandle> {
        self.outbound.pop_front()
    }

    fn recv_done(&mut self, msg: MsgHandle, next: Option<MsgHandle>) {
        tracing::debug!(target: "recv", conn = %self.id, ?msg, has_next = next.is_some(), "recv_done");
        self.recv_completed.push((msg, next));
        if let Some(n) = next {
            self.pending_next.push_back(n);
        }
    }

    fn send_done(&mut self, msg: MsgHandle) {
        tracing::debug!(target: "send", conn = %self.id, ?msg, "send_done");
        self.send_completed.push(msg);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dynocore::clock::TestClock;
    use dynocore::decrypt::XorCipher;
    use dynocore::msg::Direction;
    use dynocore::{Core, CoreConfig};

    #[test]
    fn feeds_and_drains_a_single_get() {
        let mut core = Core::new(CoreConfig::default(), XorCipher, TestClock::new(0)).unwrap();
        let handle = core
            .msgs
            .get(ConnId(1), Mode::External, Direction::Request, Dialect::Memcache)
            .unwrap();

        let mut conn = InMemoryConn::new(ConnId(1), Mode::External, Role::Client, Dialect::Memcache);
        conn.set_current(handle);
        conn.feed(b"get foo\r\n");

        core.recv(&mut conn).unwrap();

        assert_eq!(conn.recv_completed(), &[(handle, None)]);
    }

    #[test]
    fn queued_outbound_message_drains_through_send() -> anyhow::Result<()> {
        let mut core = Core::new(CoreConfig::default(), XorCipher, TestClock::new(0))?;
        let handle = core
            .msgs
            .get(ConnId(2), Mode::External, Direction::Response, Dialect::Redis)?;
        {
            let mut mbuf = core.msgs.mbuf_pool_mut().get()?;
            mbuf.copy(b"+OK\r\n")?;
            core.msgs.get_msg_mut(handle).unwrap().chain_mut().push_back(mbuf);
            core.msgs.get_msg_mut(handle).unwrap().mlen = 5;
        }

        let mut conn = InMemoryConn::new(ConnId(2), Mode::External, Role::Client, Dialect::Redis);
        conn.enqueue_outbound(handle);

        core.send(&mut conn)?;
        assert_eq!(conn.send_completed(), &[handle]);
        Ok(())
    }
}
