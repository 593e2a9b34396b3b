//! Timeout index: an ordered-by-deadline structure of outstanding requests
//! (spec §4.E), polled by the owning event loop — this module never sleeps
//! or spawns a timer itself.

use std::collections::BTreeMap;

use crate::id::ConnId;
use crate::msg::Msg;
use crate::pool::MsgHandle;

/// A stable handle to a timeout-index entry. Spec §9: replaces the
/// original's `offsetof`-based red-black-tree embedding with an ordered-map
/// entry keyed by deadline, referenced by this nullable handle stored on
/// the message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeoutHandle {
    deadline_ms: u64,
}

#[derive(Debug, Default)]
pub struct TimeoutIndex {
    by_deadline: BTreeMap<(u64, MsgHandleKey), ConnId>,
}

/// `MsgHandle` doesn't implement `Ord`, but the timeout index needs a
/// total order to break deadline ties in the `BTreeMap` key. This wraps the
/// handle's internal representation for that purpose only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct MsgHandleKey(usize);

impl From<MsgHandle> for MsgHandleKey {
    fn from(h: MsgHandle) -> Self {
        MsgHandleKey(h.raw())
    }
}

impl TimeoutIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spec §4.E `insert`: computes `now() + conn.server_timeout` and
    /// silently skips if the timeout is non-positive.
    pub fn insert(&mut self, msg: &mut Msg, handle: MsgHandle, conn: ConnId, now_ms: u64, server_timeout_ms: i64) {
        if server_timeout_ms <= 0 {
            return;
        }
        let deadline_ms = now_ms + server_timeout_ms as u64;
        self.by_deadline.insert((deadline_ms, handle.into()), conn);
        msg.tmo_handle = Some(TimeoutHandle { deadline_ms });
    }

    /// Spec §4.E `delete`: a no-op if the message was never inserted or was
    /// already removed (its back-reference is null).
    pub fn delete(&mut self, msg: &mut Msg, handle: MsgHandle) {
        if let Some(tmo) = msg.tmo_handle.take() {
            self.by_deadline.remove(&(tmo.deadline_ms, handle.into()));
        }
    }

    /// Peeks the earliest-expiring entry without removing it.
    pub fn min(&self) -> Option<(u64, MsgHandle, ConnId)> {
        self.by_deadline
            .iter()
            .next()
            .map(|(&(deadline, key), &conn)| (deadline, MsgHandle::from_raw(key.0), conn))
    }

    pub fn len(&self) -> usize {
        self.by_deadline.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_deadline.is_empty()
    }
}
