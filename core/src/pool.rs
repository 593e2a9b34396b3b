//! Message pool: free-list of message objects with hard/soft ceilings
//! (spec §4.D), backed by a [`slab::Slab`] so a freed slot is the first one
//! reused — the LIFO, cache-friendly free-list behavior spec §3's Lifecycle
//! calls for, and the "arena + stable handle" shape Design Notes §9
//! recommends in place of `offsetof`-based back-references.

use slab::Slab;

use crate::chain::Cursor;
use crate::error::{CoreError, CoreResult};
use crate::id::{ConnId, IdGen, MsgId};
use crate::mbuf::MbufPool;
use crate::msg::{Dialect, Direction, Mode, Msg, MsgMeta};

/// A stable handle to a live [`Msg`]. Cheap to copy, carries no lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MsgHandle(usize);

impl MsgHandle {
    /// Exposed only for structures (e.g. the timeout index) that need a
    /// totally-ordered key derived from the handle; not meaningful as an
    /// index into anything outside this module.
    pub(crate) fn raw(self) -> usize {
        self.0
    }

    pub(crate) fn from_raw(raw: usize) -> Self {
        Self(raw)
    }
}

/// Diagnostic snapshot of pool occupancy. Not load-bearing for any
/// invariant; callers may log or export it however they like. Recovered
/// from `dyn_message.c`'s `nfree_msgq` counter (spec SPEC_FULL §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    pub live: usize,
    pub free: usize,
    pub allocated_total: u64,
}

pub struct MsgPool {
    slab: Slab<Msg>,
    mbuf_pool: MbufPool,
    ids: IdGen,
    frag_ids: IdGen,
    max_alloc_msgs: usize,
    allowed_alloc_msgs: usize,
    allocated_total: u64,
}

impl MsgPool {
    pub fn new(mbuf_pool: MbufPool, max_alloc_msgs: usize, allowed_alloc_msgs: usize) -> Self {
        Self {
            slab: Slab::new(),
            mbuf_pool,
            ids: IdGen::default(),
            frag_ids: IdGen::default(),
            max_alloc_msgs,
            allowed_alloc_msgs,
            allocated_total: 0,
        }
    }

    /// Spec §4.C `get`: allocates a message, refusing above the hard
    /// ceiling always, and above the soft ceiling for external-mode
    /// requests (spec §4.D: "internal peer traffic always wins under
    /// pressure").
    pub fn get(&mut self, conn: ConnId, mode: Mode, direction: Direction, dialect: Dialect) -> CoreResult<MsgHandle> {
        self.alloc(conn, mode, direction, dialect, false)
    }

    /// Spec §4.J: the error factory force-allocates past the soft ceiling
    /// (but never past the hard ceiling) so error replies survive under
    /// pressure.
    pub fn get_forced(&mut self, conn: ConnId, mode: Mode, direction: Direction, dialect: Dialect) -> CoreResult<MsgHandle> {
        self.alloc(conn, mode, direction, dialect, true)
    }

    fn alloc(
        &mut self,
        conn: ConnId,
        mode: Mode,
        direction: Direction,
        dialect: Dialect,
        forced: bool,
    ) -> CoreResult<MsgHandle> {
        if self.slab.len() >= self.max_alloc_msgs {
            tracing::error!(live = self.slab.len(), "message pool exhausted at hard ceiling");
            return Err(CoreError::PoolExhausted);
        }
        if !forced && mode == Mode::External && self.slab.len() >= self.allowed_alloc_msgs {
            tracing::warn!(live = self.slab.len(), "external allocation refused above soft ceiling");
            return Err(CoreError::AllocLimitReached);
        }
        let id = MsgId::new(self.ids.next());
        let msg = Msg::new(id, conn, mode, direction, dialect);
        let key = self.slab.insert(msg);
        self.allocated_total += 1;
        tracing::debug!(%id, live = self.slab.len(), "message allocated");
        Ok(MsgHandle(key))
    }

    /// Spec §4.C `put`: releases the dmsg envelope, returns all mbufs to
    /// the mbuf pool, and frees the slot for reuse. Not idempotent —
    /// calling it twice on the same handle is a caller bug (spec §4.C).
    pub fn put(&mut self, handle: MsgHandle) {
        if !self.slab.contains(handle.0) {
            tracing::error!("double put of message handle");
            return;
        }
        let mut msg = self.slab.remove(handle.0);
        msg.dmsg = None;
        msg.chain_mut().drain_to_pool(&mut self.mbuf_pool);
        tracing::debug!(live = self.slab.len(), "message released");
    }

    pub fn get_msg(&self, handle: MsgHandle) -> Option<&Msg> {
        self.slab.get(handle.0)
    }

    pub fn get_msg_mut(&mut self, handle: MsgHandle) -> Option<&mut Msg> {
        self.slab.get_mut(handle.0)
    }

    pub fn mbuf_pool_mut(&mut self) -> &mut MbufPool {
        &mut self.mbuf_pool
    }

    /// Splits the borrow so callers (the fragmentation and receive engines)
    /// can mutate a message's chain and draw fresh mbufs from the pool in
    /// the same operation, e.g. [`crate::chain::MbufChain::split`]'s
    /// `pre_copy` callback.
    pub(crate) fn msg_and_mbuf_pool_mut(&mut self, handle: MsgHandle) -> Option<(&mut Msg, &mut MbufPool)> {
        let msg = self.slab.get_mut(handle.0)?;
        Some((msg, &mut self.mbuf_pool))
    }

    /// Spec §4.C `clone(src, mbuf_start, dst)`: allocates a fresh message
    /// the same way [`MsgPool::get`] would (same owner/direction/dialect as
    /// `src`) and deep-copies `src`'s chain from `mbuf_start` into it — the
    /// `msg_get` + `msg_clone` pairing the original's `target`-supplied
    /// signature implies the caller performs. The freshly allocated slot is
    /// released if the deep copy fails, so a failed clone leaves the pool
    /// exactly as it was.
    pub fn clone_msg(&mut self, src: MsgHandle, mbuf_start: usize) -> CoreResult<MsgHandle> {
        let (conn, mode, direction, dialect) = {
            let msg = self
                .get_msg(src)
                .ok_or_else(|| CoreError::SplitCopy("clone source handle not found".into()))?;
            (
                msg.conn
                    .ok_or_else(|| CoreError::SplitCopy("clone source has no owning connection".into()))?,
                msg.mode,
                msg.direction,
                msg.dialect,
            )
        };
        let target = self.alloc(conn, mode, direction, dialect, false)?;

        let chain = {
            let (src_msg, mbuf_pool) = self
                .msg_ref_and_mbuf_pool_mut(src)
                .expect("src handle checked above");
            src_msg.chain().deep_copy_from(mbuf_start, mbuf_pool)
        };
        let chain = match chain {
            Ok(c) => c,
            Err(e) => {
                self.put(target);
                return Err(e);
            }
        };

        let meta = MsgMeta::snapshot(self.get_msg(src).expect("src handle checked above"));
        let target_msg = self.get_msg_mut(target).expect("target handle just allocated");
        meta.apply_to(target_msg);
        target_msg.mlen = chain.written_len();
        target_msg.cursor = Cursor { mbuf_index: 0, offset: 0 };
        *target_msg.chain_mut() = chain;
        Ok(target)
    }

    /// Splits the borrow like [`MsgPool::msg_and_mbuf_pool_mut`], but for a
    /// message the caller only needs to read — used by [`MsgPool::clone_msg`]
    /// to read `src`'s chain while drawing fresh mbufs for the copy from the
    /// same pool's `mbuf_pool`.
    fn msg_ref_and_mbuf_pool_mut(&mut self, handle: MsgHandle) -> Option<(&Msg, &mut MbufPool)> {
        let msg = self.slab.get(handle.0)?;
        Some((msg, &mut self.mbuf_pool))
    }

    pub fn next_frag_id(&mut self) -> crate::id::FragId {
        crate::id::FragId::new(self.frag_ids.next())
    }

    pub fn live(&self) -> usize {
        self.slab.len()
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            live: self.slab.len(),
            free: self.slab.capacity().saturating_sub(self.slab.len()),
            allocated_total: self.allocated_total,
        }
    }
}
