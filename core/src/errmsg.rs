//! The error-message factory (spec §4.C `get_error` / §4.J / §6 "Error wire
//! shapes"): synthesizes a single-mbuf response message reporting a failure,
//! force-allocated past the soft ceiling so error replies survive under
//! allocation pressure (spec §4.J).

use crate::error::{CoreResult, ErrnoKind};
use crate::id::ConnId;
use crate::msg::{Dialect, Direction, Mode, MsgType};
use crate::pool::{MsgHandle, MsgPool};

/// Which side of the proxy the failure originated on (spec §6: `<source>` ∈
/// `{"Peer:", "Storage:"}`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    Peer,
    Storage,
}

impl Source {
    fn label(self) -> &'static str {
        match self {
            Source::Peer => "Peer:",
            Source::Storage => "Storage:",
        }
    }
}

/// Builds a wire-format error response: `"-ERR <source> <reason>\r\n"` for
/// Redis, `"SERVER_ERROR <source> <reason>\r\n"` for Memcached. `errno` of
/// `None` renders as `"unknown"` (spec §6). Note this sidesteps the bug spec
/// Design Notes §9 calls out in the original `msg_get_error` (leaving
/// `source` uninitialized for some `errno` values) by always setting it.
pub fn get_error(
    pool: &mut MsgPool,
    conn: ConnId,
    mode: Mode,
    direction: Direction,
    dialect: Dialect,
    source: Source,
    errno: Option<ErrnoKind>,
) -> CoreResult<MsgHandle> {
    let handle = pool.get_forced(conn, mode, direction, dialect)?;
    let reason = errno.map(ErrnoKind::reason).unwrap_or("unknown");
    let body = match dialect {
        Dialect::Redis => format!("-ERR {} {}\r\n", source.label(), reason),
        Dialect::Memcache => format!("SERVER_ERROR {} {}\r\n", source.label(), reason),
    };

    let mut mbuf = match pool.mbuf_pool_mut().get() {
        Ok(m) => m,
        Err(e) => {
            pool.put(handle);
            return Err(e);
        }
    };
    if let Err(e) = mbuf.copy(body.as_bytes()) {
        pool.mbuf_pool_mut().put(mbuf);
        pool.put(handle);
        return Err(e);
    }

    let msg = pool.get_msg_mut(handle).expect("just allocated");
    msg.chain_mut().push_back(mbuf);
    msg.mlen = msg.chain().written_len();
    msg.class.msg_type = MsgType::ServerError;
    msg.error = true;
    msg.err = errno;
    Ok(handle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mbuf::MbufPool;

    #[test]
    fn redis_error_matches_wire_shape() {
        let mut pool = MsgPool::new(MbufPool::new(64, 0, 4), 8, 1);
        // exhaust the soft ceiling to prove get_forced still succeeds
        pool.get(ConnId(1), Mode::External, Direction::Request, Dialect::Redis)
            .unwrap();

        let handle = get_error(
            &mut pool,
            ConnId(1),
            Mode::External,
            Direction::Response,
            Dialect::Redis,
            Source::Storage,
            Some(ErrnoKind::TimedOut),
        )
        .unwrap();

        let msg = pool.get_msg(handle).unwrap();
        let bytes = msg.chain().tail().unwrap().written();
        assert_eq!(bytes, b"-ERR Storage: operation timed out\r\n");
        assert_eq!(msg.class.msg_type, MsgType::ServerError);
    }

    #[test]
    fn memcache_error_unknown_reason() {
        let mut pool = MsgPool::new(MbufPool::new(64, 0, 4), 8, 8);
        let handle = get_error(
            &mut pool,
            ConnId(1),
            Mode::External,
            Direction::Response,
            Dialect::Memcache,
            Source::Peer,
            None,
        )
        .unwrap();
        let msg = pool.get_msg(handle).unwrap();
        assert_eq!(msg.chain().tail().unwrap().written(), b"SERVER_ERROR Peer: unknown\r\n");
    }
}
