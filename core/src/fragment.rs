//! The fragmentation engine (spec §4.I): splits a multi-key request into
//! single-key messages that share a `frag_id`, called whenever
//! [`crate::parser::parse`] returns [`crate::parser::ParseStatus::Fragment`].
//!
//! Each call produces exactly one additional fragment; a request with `k`
//! keys is split `k - 1` times as `recv_chain` (spec §4.G) re-parses the
//! newly produced tail message and finds it still multi-key.

use crate::chain::Cursor;
use crate::conn::Connection;
use crate::error::{CoreError, CoreResult};
use crate::mbuf::Mbuf;
use crate::msg::{Dialect, FragMeta};
use crate::pool::{MsgHandle, MsgPool};

/// Splits `handle`'s message at its current parse cursor, per spec §4.I's
/// six steps, and notifies `conn` via `recv_done`. Returns the handle of the
/// newly created tail fragment.
pub fn fragment(pool: &mut MsgPool, conn: &mut dyn Connection, handle: MsgHandle) -> CoreResult<MsgHandle> {
    let (cursor, dialect, direction, mode, conn_id, existing_frag, rnarg) = {
        let msg = pool
            .get_msg(handle)
            .ok_or_else(|| CoreError::SplitCopy("fragment: message handle not found".into()))?;
        (
            msg.cursor,
            msg.dialect,
            msg.direction,
            msg.mode,
            msg.conn,
            msg.frag,
            msg.parse.rnarg,
        )
    };
    let conn_id = conn_id.ok_or_else(|| CoreError::SplitCopy("fragment: message has no owning connection".into()))?;

    // Allocated up front, before the chain is touched, so a first-split
    // message never ends up partially mutated if anything below fails.
    let new_frag_id = existing_frag.is_none().then(|| pool.next_frag_id());

    let tail_chain;
    {
        let mut pre_copy: Box<dyn FnMut(&mut Mbuf) -> CoreResult<()>> = match dialect {
            Dialect::Redis => Box::new(crate::dialects::redis::pre_splitcopy(rnarg)),
            Dialect::Memcache => Box::new(crate::dialects::memcache::pre_splitcopy()),
        };

        let (msg, mbuf_pool) = pool
            .msg_and_mbuf_pool_mut(handle)
            .ok_or_else(|| CoreError::SplitCopy("fragment: message handle not found".into()))?;

        let mut tc = msg.chain_mut().split(cursor, Some(&mut *pre_copy), mbuf_pool)?;

        let post_result = match dialect {
            Dialect::Redis => crate::dialects::redis::post_splitcopy(msg.chain_mut()),
            Dialect::Memcache => crate::dialects::memcache::post_splitcopy(msg.chain_mut()),
        };
        if let Err(e) = post_result {
            tc.drain_to_pool(mbuf_pool);
            return Err(e);
        }
        tail_chain = tc;
    }
    let tail_len = tail_chain.written_len();

    let new_handle = match pool.get(conn_id, mode, direction, dialect) {
        Ok(h) => h,
        Err(e) => {
            let mut tc = tail_chain;
            tc.drain_to_pool(pool.mbuf_pool_mut());
            return Err(e);
        }
    };

    let frag_id = existing_frag.map(|m| m.frag_id).unwrap_or_else(|| new_frag_id.unwrap());
    let frag_owner = existing_frag.map(|m| m.frag_owner).unwrap_or(handle);

    {
        let new_msg = pool.get_msg_mut(new_handle).expect("just allocated");
        *new_msg.chain_mut() = tail_chain;
        new_msg.cursor = Cursor { mbuf_index: 0, offset: 0 };
        new_msg.mlen = tail_len;
        new_msg.frag = Some(FragMeta {
            frag_id,
            frag_owner,
            first_fragment: false,
            last_fragment: true,
        });
    }

    {
        let msg = pool.get_msg_mut(handle).expect("handle checked above");
        match existing_frag {
            None => {
                msg.frag = Some(FragMeta {
                    frag_id,
                    frag_owner: handle,
                    first_fragment: true,
                    last_fragment: false,
                });
                msg.nfrag = 1;
            }
            Some(mut meta) => {
                meta.last_fragment = false;
                msg.frag = Some(meta);
            }
        }
    }

    if let Some(owner_msg) = pool.get_msg_mut(frag_owner) {
        owner_msg.nfrag += 1;
    }

    conn.recv_done(handle, Some(new_handle));
    Ok(new_handle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id::ConnId;
    use crate::mbuf::MbufPool;
    use crate::msg::{Direction, Mode};
    use crate::parser::{parse, ParseStatus};
    use std::io::IoSlice;

    struct NullConn {
        done: Vec<(MsgHandle, Option<MsgHandle>)>,
    }

    impl Connection for NullConn {
        fn id(&self) -> ConnId {
            ConnId(1)
        }
        fn mode(&self) -> Mode {
            Mode::External
        }
        fn role(&self) -> crate::conn::Role {
            crate::conn::Role::Client
        }
        fn dialect(&self) -> Dialect {
            Dialect::Redis
        }
        fn recv_ready(&self) -> bool {
            false
        }
        fn send_ready(&self) -> bool {
            false
        }
        fn server_timeout_ms(&self) -> i64 {
            0
        }
        fn aes_key(&self) -> Option<&[u8]> {
            None
        }
        fn recv(&mut self, _buf: &mut [u8]) -> CoreResult<crate::error::Progress> {
            Ok(crate::error::Progress::Again)
        }
        fn sendv(&mut self, _iov: &[IoSlice<'_>]) -> CoreResult<crate::error::Progress> {
            Ok(crate::error::Progress::Again)
        }
        fn recv_next(&mut self, _allocate: bool) -> Option<MsgHandle> {
            None
        }
        fn send_next(&mut self) -> Option<MsgHandle> {
            None
        }
        fn recv_done(&mut self, msg: MsgHandle, next: Option<MsgHandle>) {
            self.done.push((msg, next));
        }
        fn send_done(&mut self, _msg: MsgHandle) {}
    }

    fn pool() -> MsgPool {
        MsgPool::new(MbufPool::new(256, 0, 16), 32, 32)
    }

    #[test]
    fn three_key_mget_splits_into_a_group_of_three() {
        let mut pool = pool();
        let handle = pool
            .get(ConnId(1), Mode::External, Direction::Request, Dialect::Redis)
            .unwrap();
        {
            let mut mbuf = pool.mbuf_pool_mut().get().unwrap();
            mbuf.copy(b"*4\r\n$4\r\nmget\r\n$4\r\nkey1\r\n$4\r\nkey2\r\n$4\r\nkey3\r\n").unwrap();
            pool.get_msg_mut(handle).unwrap().chain_mut().push_back(mbuf);
        }
        let mut conn = NullConn { done: Vec::new() };

        let status = parse(pool.get_msg_mut(handle).unwrap());
        assert_eq!(status, ParseStatus::Fragment);
        let second = fragment(&mut pool, &mut conn, handle).unwrap();

        let status2 = parse(pool.get_msg_mut(second).unwrap());
        assert_eq!(status2, ParseStatus::Fragment);
        let third = fragment(&mut pool, &mut conn, second).unwrap();

        let status3 = parse(pool.get_msg_mut(third).unwrap());
        assert_eq!(status3, ParseStatus::Complete);

        let owner = pool.get_msg(handle).unwrap().frag.unwrap().frag_owner;
        assert_eq!(owner, handle);
        assert_eq!(pool.get_msg(handle).unwrap().nfrag, 3);

        let first_meta = pool.get_msg(handle).unwrap().frag.unwrap();
        let second_meta = pool.get_msg(second).unwrap().frag.unwrap();
        let third_meta = pool.get_msg(third).unwrap().frag.unwrap();
        assert!(first_meta.first_fragment && !first_meta.last_fragment);
        assert!(!second_meta.first_fragment && !second_meta.last_fragment);
        assert!(!third_meta.first_fragment && third_meta.last_fragment);
        assert_eq!(first_meta.frag_id, second_meta.frag_id);
        assert_eq!(second_meta.frag_id, third_meta.frag_id);

        assert_eq!(conn.done.len(), 2);
    }
}
