//! The receive engine (spec §4.G): pulls bytes off a [`Connection`],
//! maintains the buffer chain, drives the parser, and dispatches its result
//! to the split/fragment/repair handling the spec describes.

use crate::chain::Cursor;
use crate::conn::Connection;
use crate::decrypt::Decrypt;
use crate::error::{CoreError, CoreResult, Progress};
use crate::fragment::fragment;
use crate::msg::{Mode, Msg};
use crate::parser::{parse, ParseStatus};
use crate::pool::{MsgHandle, MsgPool};

/// `recv(conn)`: loops while `conn.recv_ready()`, handing each current
/// target message to [`recv_chain`].
pub fn recv(pool: &mut MsgPool, conn: &mut dyn Connection, decrypt: &dyn Decrypt) -> CoreResult<()> {
    while conn.recv_ready() {
        let handle = match conn.recv_next(true) {
            Some(h) => h,
            None => return Ok(()),
        };
        recv_chain(pool, conn, decrypt, handle)?;
    }
    Ok(())
}

/// `recv_chain(conn, msg)`: one non-blocking read followed by the parse
/// loop described in spec §4.G.
pub fn recv_chain(pool: &mut MsgPool, conn: &mut dyn Connection, decrypt: &dyn Decrypt, handle: MsgHandle) -> CoreResult<()> {
    ensure_tail_mbuf(pool, handle)?;

    let read_len = compute_read_len(pool, handle);
    if read_len == 0 {
        return Ok(());
    }

    let progress = {
        let encrypted = pool
            .get_msg(handle)
            .unwrap()
            .dmsg
            .as_ref()
            .map(|d| d.encrypted)
            .unwrap_or(false);
        let msg = pool.get_msg_mut(handle).unwrap();
        let tail = msg.chain_mut().tail_mut().expect("ensure_tail_mbuf ran above");
        let buf: &mut [u8] = if encrypted {
            &mut tail.free_extra_mut()[..read_len]
        } else {
            &mut tail.free_mut()[..read_len]
        };
        conn.recv(buf)?
    };

    let n = match progress {
        Progress::Again => return Ok(()),
        Progress::Moved(n) => n,
    };

    {
        let msg = pool.get_msg_mut(handle).unwrap();
        msg.chain_mut().tail_mut().unwrap().advance_last(n);
        msg.mlen += n;
        if let Some(dmsg) = msg.dmsg.as_mut() {
            if dmsg.encrypted {
                dmsg.plen = dmsg.plen.saturating_sub(n);
            }
        }
    }

    maybe_decrypt(pool, conn, handle, decrypt)?;

    let mut current = handle;
    loop {
        let status = parse_one(pool, conn, current)?;
        if matches!(status, ParseStatus::Again | ParseStatus::Repair | ParseStatus::Error(_)) {
            break;
        }
        match conn.recv_next(false) {
            None => break,
            Some(h) if h == current => break,
            Some(h) => current = h,
        }
    }
    Ok(())
}

/// `parse(conn, msg)` (spec §4.G): one parser invocation plus its
/// OK/FRAGMENT/REPAIR/AGAIN/error handling.
fn parse_one(pool: &mut MsgPool, conn: &mut dyn Connection, handle: MsgHandle) -> CoreResult<ParseStatus> {
    if pool.get_msg(handle).unwrap().computed_mlen() == 0 {
        conn.recv_done(handle, None);
        return Ok(ParseStatus::Complete);
    }

    let status = parse(pool.get_msg_mut(handle).unwrap());
    match status {
        ParseStatus::Complete => {
            if tail_fully_consumed(pool.get_msg(handle).unwrap()) {
                conn.recv_done(handle, None);
            } else {
                let next = split_off_next_message(pool, handle)?;
                conn.recv_done(handle, Some(next));
            }
            Ok(ParseStatus::Complete)
        }
        ParseStatus::Fragment => {
            fragment(pool, conn, handle)?;
            Ok(ParseStatus::Fragment)
        }
        ParseStatus::Repair => {
            repair(pool, handle)?;
            Ok(ParseStatus::Repair)
        }
        ParseStatus::Again => Ok(ParseStatus::Again),
        ParseStatus::Error(kind) => {
            let external = pool.get_msg(handle).unwrap().mode == Mode::External;
            let msg = pool.get_msg_mut(handle).unwrap();
            if external {
                msg.error = true;
                msg.err = Some(kind);
                Err(CoreError::Parse(kind))
            } else {
                msg.swallow = true;
                Ok(ParseStatus::Complete)
            }
        }
    }
}

fn tail_fully_consumed(msg: &Msg) -> bool {
    match (msg.chain().tail_index(), msg.chain().tail()) {
        (Some(idx), Some(tail)) => msg.cursor.mbuf_index == idx && msg.cursor.offset == tail.last(),
        _ => true,
    }
}

/// Splits the unparsed tail off into a fresh message inheriting
/// direction/dialect/mode from `handle` (spec §4.G "OK" branch).
fn split_off_next_message(pool: &mut MsgPool, handle: MsgHandle) -> CoreResult<MsgHandle> {
    let (cursor, dialect, direction, mode, conn_id) = {
        let msg = pool.get_msg(handle).unwrap();
        (msg.cursor, msg.dialect, msg.direction, msg.mode, msg.conn)
    };
    let conn_id = conn_id.ok_or_else(|| CoreError::SplitCopy("message has no owning connection".into()))?;

    let tail_chain = {
        let (msg, mbuf_pool) = pool.msg_and_mbuf_pool_mut(handle).expect("handle checked above");
        msg.chain_mut().split(cursor, None, mbuf_pool)?
    };
    let tail_len = tail_chain.written_len();

    let new_handle = match pool.get(conn_id, mode, direction, dialect) {
        Ok(h) => h,
        Err(e) => {
            let mut tc = tail_chain;
            tc.drain_to_pool(pool.mbuf_pool_mut());
            return Err(e);
        }
    };

    let new_msg = pool.get_msg_mut(new_handle).expect("just allocated");
    *new_msg.chain_mut() = tail_chain;
    new_msg.cursor = Cursor { mbuf_index: 0, offset: 0 };
    new_msg.mlen = tail_len;
    Ok(new_handle)
}

/// `REPAIR`: splits at the cursor and re-attaches the tail as a fresh,
/// separate buffer on the same message, so the boundary between parsed and
/// unparsed bytes always falls on an mbuf edge (spec §4.G).
fn repair(pool: &mut MsgPool, handle: MsgHandle) -> CoreResult<()> {
    let cursor = pool.get_msg(handle).unwrap().cursor;
    let (msg, mbuf_pool) = pool
        .msg_and_mbuf_pool_mut(handle)
        .ok_or_else(|| CoreError::SplitCopy("message handle not found".into()))?;
    let mut tail_chain = msg.chain_mut().split(cursor, None, mbuf_pool)?;
    let resume_index = msg.chain().len_mbufs();
    while let Some(mbuf) = tail_chain.pop_front() {
        msg.chain_mut().push_back(mbuf);
    }
    msg.cursor = Cursor {
        mbuf_index: resume_index,
        offset: 0,
    };
    Ok(())
}

fn ensure_tail_mbuf(pool: &mut MsgPool, handle: MsgHandle) -> CoreResult<()> {
    let needs_fresh = {
        let msg = pool.get_msg(handle).unwrap();
        let encrypted = msg.dmsg.as_ref().map(|d| d.encrypted).unwrap_or(false);
        match msg.chain().tail() {
            None => true,
            Some(tail) => tail.full() || (encrypted && tail.last() == tail.end_extra()),
        }
    };
    if needs_fresh {
        let (msg, mbuf_pool) = pool.msg_and_mbuf_pool_mut(handle).expect("handle checked above");
        let fresh = mbuf_pool.get()?;
        msg.chain_mut().push_back(fresh);
    }
    Ok(())
}

fn compute_read_len(pool: &MsgPool, handle: MsgHandle) -> usize {
    let msg = pool.get_msg(handle).unwrap();
    let tail = msg.chain().tail().expect("ensure_tail_mbuf ran above");
    match &msg.dmsg {
        Some(d) if d.encrypted => d.plen.min(tail.end_extra() - tail.last()),
        _ => tail.end() - tail.last(),
    }
}

/// Spec §4.G step 4. Our read-size cap ([`compute_read_len`] never requests
/// more than `dmsg.plen` bytes) means a single ciphertext buffer never holds
/// more than one frame's bytes, so unlike the original there is never a
/// trailing-remainder slice to carry into the new buffer.
fn maybe_decrypt(pool: &mut MsgPool, conn: &dyn Connection, handle: MsgHandle, decrypt: &dyn Decrypt) -> CoreResult<()> {
    let ready = {
        let msg = pool.get_msg(handle).unwrap();
        match &msg.dmsg {
            Some(d) if d.encrypted => {
                let tail = msg.chain().tail().expect("a read just completed");
                d.plen == 0 || tail.last() == tail.end_extra()
            }
            _ => false,
        }
    };
    if !ready {
        return Ok(());
    }

    let key = conn.aes_key().map(|k| k.to_vec()).unwrap_or_default();
    let (msg, mbuf_pool) = pool.msg_and_mbuf_pool_mut(handle).expect("handle checked above");
    let ciphertext = msg.chain_mut().pop_back().expect("a read just completed");
    let mut plaintext = mbuf_pool.get()?;
    if let Err(e) = decrypt.decrypt(ciphertext.written(), &mut plaintext, &key) {
        mbuf_pool.put(ciphertext);
        mbuf_pool.put(plaintext);
        return Err(e);
    }
    plaintext.set_read_flip(true);
    mbuf_pool.put(ciphertext);
    msg.chain_mut().push_back(plaintext);
    msg.mlen = msg.chain().written_len();
    if let Some(dmsg) = msg.dmsg.as_mut() {
        dmsg.plen = 0;
    }
    Ok(())
}
