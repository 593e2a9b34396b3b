//! RESP (array-family) request and response parsing (spec §4.D, §8 scenario
//! 1 and 3).
//!
//! Requests are `*<nelem>\r\n` followed by `nelem` bulk strings. `mget` with
//! more than one key is the one multi-key command this crate fragments: the
//! parser consumes only the command name and the first key, then returns
//! [`ParseStatus::Fragment`] and leaves the rest of the array for the
//! fragmentation engine to re-present (as a shorter `mget`, recursively)
//! through [`pre_splitcopy`]/[`post_splitcopy`].

use crate::chain::MbufChain;
use crate::error::{CoreError, CoreResult, ErrnoKind};
use crate::mbuf::Mbuf;
use crate::msg::{Msg, MsgType};
use crate::parser::{ChainScanner, ParseStatus};

fn read_bulk(scanner: &mut ChainScanner<'_>) -> Option<Result<Vec<u8>, ErrnoKind>> {
    let header = scanner.read_line()?;
    if header.first() != Some(&b'$') {
        return Some(Err(ErrnoKind::Inval));
    }
    let len: i64 = match std::str::from_utf8(&header[1..]).ok().and_then(|s| s.trim().parse().ok()) {
        Some(n) => n,
        None => return Some(Err(ErrnoKind::Inval)),
    };
    if len < 0 {
        return Some(Ok(Vec::new()));
    }
    let data = match scanner.read_n(len as usize) {
        Some(d) => d,
        None => return None,
    };
    match scanner.expect_crlf() {
        Some(()) => Some(Ok(data)),
        None => None,
    }
}

fn classify(cmd: &[u8]) -> MsgType {
    match cmd.to_ascii_uppercase().as_slice() {
        b"GET" => MsgType::Get,
        b"MGET" => MsgType::MultiGet,
        b"SET" | b"SETEX" | b"MSET" => MsgType::Store,
        b"DEL" => MsgType::Delete,
        b"QUIT" => MsgType::Quit,
        _ => MsgType::Unknown,
    }
}

fn is_read(cmd: &[u8]) -> bool {
    matches!(
        cmd.to_ascii_uppercase().as_slice(),
        b"GET" | b"MGET" | b"EXISTS" | b"STRLEN" | b"TTL"
    )
}

pub fn parse_req(msg: &mut Msg) -> ParseStatus {
    let start = msg.cursor;
    let mut scanner = ChainScanner::new(msg.chain(), start);

    let arity_line = match scanner.read_line() {
        Some(line) => line,
        None => return ParseStatus::Again,
    };
    if arity_line.first() != Some(&b'*') {
        return ParseStatus::Error(ErrnoKind::Inval);
    }
    let narg: i64 = match std::str::from_utf8(&arity_line[1..]).ok().and_then(|s| s.trim().parse().ok()) {
        Some(n) if n >= 1 => n,
        _ => return ParseStatus::Error(ErrnoKind::Inval),
    };

    let cmd = match read_bulk(&mut scanner) {
        Some(Ok(bytes)) => bytes,
        Some(Err(e)) => return ParseStatus::Error(e),
        None => return ParseStatus::Again,
    };
    let msg_type = classify(&cmd);
    let read_only = is_read(&cmd);

    if msg_type == MsgType::MultiGet && narg > 2 {
        let key1 = match read_bulk(&mut scanner) {
            Some(Ok(bytes)) => bytes,
            Some(Err(e)) => return ParseStatus::Error(e),
            None => return ParseStatus::Again,
        };
        msg.class.msg_type = MsgType::MultiGet;
        msg.class.is_read = true;
        msg.class.key_start = Some(0);
        msg.class.key_end = Some(key1.len());
        msg.parse.rnarg = narg - 2;
        msg.cursor = scanner.cursor();
        return ParseStatus::Fragment;
    }

    let remaining = (narg - 1) as usize;
    let mut key_len = None;
    let mut last_len = 0usize;
    for i in 0..remaining {
        let bulk = match read_bulk(&mut scanner) {
            Some(Ok(bytes)) => bytes,
            Some(Err(e)) => return ParseStatus::Error(e),
            None => return ParseStatus::Again,
        };
        if i == 0 {
            key_len = Some(bulk.len());
        }
        last_len = bulk.len();
    }

    msg.class.msg_type = msg_type;
    msg.class.is_read = read_only;
    if let Some(len) = key_len {
        msg.class.key_start = Some(0);
        msg.class.key_end = Some(len);
    }
    if msg_type == MsgType::Store {
        msg.class.vlen = last_len;
    }
    msg.quit = msg_type == MsgType::Quit;
    msg.cursor = scanner.cursor();
    ParseStatus::Complete
}

/// Response parsing covers the simple-string, error, integer, bulk, and
/// array reply shapes — enough to round-trip a backend's reply to any
/// request this crate's request parser can produce.
pub fn parse_rsp(msg: &mut Msg) -> ParseStatus {
    let start = msg.cursor;
    let mut scanner = ChainScanner::new(msg.chain(), start);
    match parse_rsp_value(&mut scanner) {
        Ok(true) => {
            msg.cursor = scanner.cursor();
            ParseStatus::Complete
        }
        Ok(false) => ParseStatus::Again,
        Err(e) => ParseStatus::Error(e),
    }
}

fn parse_rsp_value(scanner: &mut ChainScanner<'_>) -> Result<bool, ErrnoKind> {
    let line = match scanner.read_line() {
        Some(l) => l,
        None => return Ok(false),
    };
    match line.first() {
        Some(b'+') | Some(b'-') | Some(b':') => Ok(true),
        Some(b'$') => {
            let len: i64 = std::str::from_utf8(&line[1..])
                .ok()
                .and_then(|s| s.trim().parse().ok())
                .ok_or(ErrnoKind::Inval)?;
            if len < 0 {
                return Ok(true);
            }
            if scanner.read_n(len as usize).is_none() {
                return Ok(false);
            }
            match scanner.expect_crlf() {
                Some(()) => Ok(true),
                None => Ok(false),
            }
        }
        Some(b'*') => {
            let count: i64 = std::str::from_utf8(&line[1..])
                .ok()
                .and_then(|s| s.trim().parse().ok())
                .ok_or(ErrnoKind::Inval)?;
            for _ in 0..count.max(0) {
                if !parse_rsp_value(scanner)? {
                    return Ok(false);
                }
            }
            Ok(true)
        }
        _ => Err(ErrnoKind::Inval),
    }
}

/// Synthesizes the re-framed header for a tail fragment: a new `mget` (or
/// the plain singular command, when exactly one key remains) array covering
/// `remaining_keys + 1` elements (the command name plus the keys still
/// unparsed in the tail).
pub fn pre_splitcopy(remaining_keys: i64) -> impl FnMut(&mut Mbuf) -> CoreResult<()> {
    move |mbuf: &mut Mbuf| {
        let cmd: &[u8] = if remaining_keys > 1 { b"mget" } else { b"get" };
        let header = format!("*{}\r\n${}\r\n", remaining_keys + 1, cmd.len());
        mbuf.copy(header.as_bytes())?;
        mbuf.copy(cmd)?;
        mbuf.copy(b"\r\n")
    }
}

/// Patches the retained head's array arity down to 2 (`mget`/`get` plus its
/// one surviving key), in place, regardless of the original arity's digit
/// width.
pub fn post_splitcopy(chain: &mut MbufChain) -> CoreResult<()> {
    let mbuf = chain
        .get_mut(0)
        .ok_or_else(|| CoreError::SplitCopy("fragment head chain is empty".into()))?;
    let written = mbuf.written();
    let newline = written
        .iter()
        .position(|&b| b == b'\n')
        .ok_or_else(|| CoreError::SplitCopy("arity line has no terminator".into()))?;
    mbuf.splice_within(0..newline + 1, b"*2\r\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::Cursor;
    use crate::id::{ConnId, MsgId};
    use crate::mbuf::MbufPool;
    use crate::msg::{Dialect, Direction, Mode};

    fn msg_with(pool: &mut MbufPool, payload: &[u8]) -> Msg {
        let mut msg = Msg::new(MsgId::new(1), ConnId(1), Mode::External, Direction::Request, Dialect::Redis);
        let mut mbuf = pool.get().unwrap();
        mbuf.copy(payload).unwrap();
        msg.chain_mut().push_back(mbuf);
        msg
    }

    #[test]
    fn single_key_get_completes() {
        let mut pool = MbufPool::new(128, 0, 4);
        let mut msg = msg_with(&mut pool, b"*2\r\n$3\r\nget\r\n$3\r\nfoo\r\n");
        assert_eq!(parse_req(&mut msg), ParseStatus::Complete);
        assert_eq!(msg.class.msg_type, MsgType::Get);
        assert_eq!(msg.cursor, Cursor { mbuf_index: 0, offset: msg.chain().get(0).unwrap().last() });
    }

    #[test]
    fn multi_key_mget_fragments_after_first_key() {
        let mut pool = MbufPool::new(256, 0, 4);
        let mut msg = msg_with(
            &mut pool,
            b"*4\r\n$4\r\nmget\r\n$4\r\nkey1\r\n$4\r\nkey2\r\n$4\r\nkey3\r\n",
        );
        assert_eq!(parse_req(&mut msg), ParseStatus::Fragment);
        assert_eq!(msg.class.msg_type, MsgType::MultiGet);
        assert_eq!(msg.parse.rnarg, 2);
    }

    #[test]
    fn incomplete_bulk_yields_again() {
        let mut pool = MbufPool::new(128, 0, 4);
        let mut msg = msg_with(&mut pool, b"*2\r\n$3\r\nget\r\n$3\r\nfo");
        assert_eq!(parse_req(&mut msg), ParseStatus::Again);
        assert_eq!(msg.cursor, Cursor { mbuf_index: 0, offset: 0 });
    }

    #[test]
    fn post_splitcopy_rewrites_arity_regardless_of_width() -> anyhow::Result<()> {
        let mut pool = MbufPool::new(64, 0, 2);
        let mut chain = MbufChain::new();
        let mut mbuf = pool.get()?;
        mbuf.copy(b"*12\r\n$4\r\nmget\r\n$4\r\nkey1\r\n")?;
        chain.push_back(mbuf);
        post_splitcopy(&mut chain)?;
        let first = chain.get(0).ok_or_else(|| anyhow::anyhow!("chain unexpectedly empty"))?;
        assert!(first.written().starts_with(b"*2\r\n"));
        Ok(())
    }
}
