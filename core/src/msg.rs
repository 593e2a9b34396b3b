//! The message object: a parse unit combining metadata and a buffer chain
//! (spec §3 / §4.C).

use std::fmt::Write as _;

use crate::chain::{Cursor, MbufChain};
use crate::dmsg::DmsgEnvelope;
use crate::error::{CoreResult, ErrnoKind};
use crate::id::{ConnId, FragId, MsgId};
use crate::mbuf::MbufPool;
use crate::pool::MsgHandle;
use crate::timeout::TimeoutHandle;

/// External = client-facing or storage-facing; internal = peer-to-peer
/// using the replication envelope (spec glossary).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Mode {
    External,
    Internal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Request,
    Response,
}

/// Text-family (Memcached) vs array-family (Redis) wire dialect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Dialect {
    Redis,
    Memcache,
}

/// Tagged dispatch key selecting a concrete wire parser, chosen from
/// `(dialect, direction, mode)` at `get()` time (spec §4.D table). Design
/// Notes §9: "Use tagged dispatch — tables or sum types — not inheritance"
/// in place of the original's parser function pointer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParserKind {
    RedisReq,
    RedisRsp,
    MemcacheReq,
    MemcacheRsp,
    InternalReq,
    InternalRsp,
}

impl ParserKind {
    pub fn select(dialect: Dialect, direction: Direction, mode: Mode) -> Self {
        match (dialect, direction, mode) {
            (_, Direction::Request, Mode::Internal) => ParserKind::InternalReq,
            (_, Direction::Response, Mode::Internal) => ParserKind::InternalRsp,
            (Dialect::Redis, Direction::Request, Mode::External) => ParserKind::RedisReq,
            (Dialect::Redis, Direction::Response, Mode::External) => ParserKind::RedisRsp,
            (Dialect::Memcache, Direction::Request, Mode::External) => ParserKind::MemcacheReq,
            (Dialect::Memcache, Direction::Response, Mode::External) => ParserKind::MemcacheRsp,
        }
    }
}

/// Coarse command classification. Real wire grammars name many more command
/// kinds; the datapath core only needs enough to route fragmentation and
/// timeout decisions (spec §3: "command classification: `type`, ...").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum MsgType {
    #[default]
    Unknown,
    Get,
    MultiGet,
    Store,
    Delete,
    Quit,
    ServerError,
}

/// Parser state slots (spec §3), kept deliberately generic: concrete
/// dialect parsers in [`crate::dialects`] interpret `state` as their own
/// state-machine discriminant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ParseState {
    pub token: Option<usize>,
    pub state: u32,
    pub rnarg: i64,
    pub rlen: usize,
    pub integer: i64,
    pub narg_start: Option<usize>,
    pub narg_end: Option<usize>,
}

/// Command classification slots (spec §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Classification {
    pub msg_type: MsgType,
    pub is_read: bool,
    pub key_start: Option<usize>,
    pub key_end: Option<usize>,
    pub vlen: usize,
}

/// Fragment-group membership (spec §3 invariant 4). `nfrag` is only
/// authoritative on the message that is its own `frag_owner`; see spec §3
/// "nfrag (on owner)".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FragMeta {
    pub frag_id: FragId,
    pub frag_owner: MsgHandle,
    pub first_fragment: bool,
    pub last_fragment: bool,
}

/// A parse unit: metadata plus a buffer chain (spec §3).
#[derive(Debug)]
pub struct Msg {
    pub id: MsgId,
    pub direction: Direction,
    pub dialect: Dialect,
    pub mode: Mode,
    pub kind: ParserKind,

    chain: MbufChain,
    pub cursor: Cursor,
    pub mlen: usize,

    pub parse: ParseState,
    pub class: Classification,

    pub done: bool,
    pub error: bool,
    pub err: Option<ErrnoKind>,
    pub swallow: bool,
    pub noreply: bool,
    pub quit: bool,

    pub frag: Option<FragMeta>,
    /// Authoritative only when `self` is a fragment group's owner.
    pub nfrag: usize,

    pub peer: Option<MsgHandle>,
    /// The connection that produced this message. A weak back-reference
    /// (spec §9): used for lookup and callback dispatch, never lifetime
    /// management. Named `conn` rather than spec's `owner` to avoid
    /// colliding with `frag_owner`, which is also called "owner" in prose.
    pub conn: Option<ConnId>,

    pub stime_in_microsec: u64,
    pub tmo_handle: Option<TimeoutHandle>,

    pub dmsg: Option<DmsgEnvelope>,
}

/// The `Copy`-only subset of [`Msg`]'s fields that `clone`/`clone_from`
/// carry over verbatim: owner, parser binding, classification, and result
/// flags (spec §4.C). Lifted out of a `&Msg` by value so
/// [`crate::pool::MsgPool::clone_msg`] can read a source message and
/// allocate+fill a distinct target in the same pool without holding two
/// live borrows into the same arena slot.
#[derive(Debug, Clone, Copy)]
pub(crate) struct MsgMeta {
    conn: Option<ConnId>,
    kind: ParserKind,
    direction: Direction,
    dialect: Dialect,
    mode: Mode,
    class: Classification,
    done: bool,
    error: bool,
    err: Option<ErrnoKind>,
    swallow: bool,
    noreply: bool,
    quit: bool,
}

impl MsgMeta {
    pub(crate) fn snapshot(msg: &Msg) -> Self {
        Self {
            conn: msg.conn,
            kind: msg.kind,
            direction: msg.direction,
            dialect: msg.dialect,
            mode: msg.mode,
            class: msg.class,
            done: msg.done,
            error: msg.error,
            err: msg.err,
            swallow: msg.swallow,
            noreply: msg.noreply,
            quit: msg.quit,
        }
    }

    pub(crate) fn apply_to(self, msg: &mut Msg) {
        msg.conn = self.conn;
        msg.kind = self.kind;
        msg.direction = self.direction;
        msg.dialect = self.dialect;
        msg.mode = self.mode;
        msg.class = self.class;
        msg.done = self.done;
        msg.error = self.error;
        msg.err = self.err;
        msg.swallow = self.swallow;
        msg.noreply = self.noreply;
        msg.quit = self.quit;
    }
}

impl Msg {
    pub(crate) fn new(id: MsgId, conn: ConnId, mode: Mode, direction: Direction, dialect: Dialect) -> Self {
        Self {
            id,
            direction,
            dialect,
            mode,
            kind: ParserKind::select(dialect, direction, mode),
            chain: MbufChain::new(),
            cursor: Cursor { mbuf_index: 0, offset: 0 },
            mlen: 0,
            parse: ParseState::default(),
            class: Classification::default(),
            done: false,
            error: false,
            err: None,
            swallow: false,
            noreply: false,
            quit: false,
            frag: None,
            nfrag: 0,
            peer: None,
            conn: Some(conn),
            stime_in_microsec: 0,
            tmo_handle: None,
            dmsg: None,
        }
    }

    pub fn chain(&self) -> &MbufChain {
        &self.chain
    }

    pub fn chain_mut(&mut self) -> &mut MbufChain {
        &mut self.chain
    }

    /// The dialect that should select pre/post split-copy and coalesce
    /// hooks. Internal-mode messages inherit the outer dialect from their
    /// `dmsg` envelope when present (spec §4.D: "internal mode inherits
    /// from the outer dialect").
    pub fn effective_dialect(&self) -> Dialect {
        match &self.dmsg {
            Some(envelope) if self.mode == Mode::Internal => envelope.data_store,
            _ => self.dialect,
        }
    }

    /// Spec invariant 1: `mlen == Σ (mb.last - mb.start)` across the chain.
    /// Recomputes from the chain rather than trusting `self.mlen`, so tests
    /// can assert the two agree.
    pub fn computed_mlen(&self) -> usize {
        self.chain.written_len()
    }

    /// Spec §4.C `clone(src, mbuf_start, dst)`: copies `src`'s owner,
    /// parser binding, classification, and result flags into `self`, and
    /// deep-copies `src`'s chain starting at the mbuf index `mbuf_start`
    /// into independently-owned buffers (the original's "first mbuf equal
    /// to this pointer" becomes an index here, since mbufs aren't addressed
    /// by pointer in this crate).
    ///
    /// `self` is assumed to be a freshly allocated message (e.g. straight
    /// from [`crate::pool::MsgPool::get`]) with an empty chain; any buffers
    /// this call acquires are released before returning on failure (spec
    /// §7), leaving `self` untouched.
    pub fn clone_from(&mut self, src: &Msg, mbuf_start: usize, mbuf_pool: &mut MbufPool) -> CoreResult<()> {
        let chain = src.chain.deep_copy_from(mbuf_start, mbuf_pool)?;
        MsgMeta::snapshot(src).apply_to(self);
        self.mlen = chain.written_len();
        self.cursor = Cursor { mbuf_index: 0, offset: 0 };
        self.chain = chain;
        Ok(())
    }

    /// Spec §4.C `dump`: a hex+ASCII diagnostic rendering of this
    /// message's metadata and buffer chain (SPEC_FULL §3), returned as a
    /// string rather than printed directly so the owning process decides
    /// whether and where to log it — the equivalent of the original's
    /// `loga_hexdump`-based `msg_dump`.
    pub fn dump(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(
            out,
            "msg dump id {} direction {:?} len {} type {:?} done {} error {} (err {:?})",
            self.id, self.direction, self.mlen, self.class.msg_type, self.done, self.error, self.err
        );
        for (i, mbuf) in self.chain.iter().enumerate() {
            let bytes = mbuf.written();
            let _ = writeln!(out, "mbuf[{i}] with {} bytes of data", bytes.len());
            for row in bytes.chunks(16) {
                let mut hex = String::with_capacity(48);
                for b in row {
                    let _ = write!(hex, "{b:02x} ");
                }
                let ascii: String = row
                    .iter()
                    .map(|&b| if (0x20..0x7f).contains(&b) { b as char } else { '.' })
                    .collect();
                let _ = writeln!(out, "  {hex:<48}{ascii}");
            }
        }
        out
    }
}
