//! Memcached (text-family) request and response parsing (spec §4.D, §8
//! scenario 2: "Memcached partial parse").
//!
//! Only the read path (`get`/`gets`, including multi-key `get`) and `quit`
//! are modeled; storage commands (`set`/`add`/...) are out of scope for this
//! minimal grounding (SPEC_FULL.md §5) and parse as `Error(Inval)`.

use crate::chain::MbufChain;
use crate::error::{CoreError, CoreResult, ErrnoKind};
use crate::mbuf::Mbuf;
use crate::msg::{Msg, MsgType};
use crate::parser::{ChainScanner, ParseStatus};

pub fn parse_req(msg: &mut Msg) -> ParseStatus {
    let start = msg.cursor;
    let mut scanner = ChainScanner::new(msg.chain(), start);

    let line = match scanner.read_line() {
        Some(l) => l,
        None => return ParseStatus::Again,
    };
    let mut tokens = line.split(|&b| b == b' ').filter(|t| !t.is_empty());
    let cmd = match tokens.next() {
        Some(c) => c.to_ascii_lowercase(),
        None => return ParseStatus::Error(ErrnoKind::Inval),
    };

    match cmd.as_slice() {
        b"quit" => {
            msg.class.msg_type = MsgType::Quit;
            msg.quit = true;
            msg.cursor = scanner.cursor();
            ParseStatus::Complete
        }
        b"get" | b"gets" => {
            let keys: Vec<&[u8]> = tokens.collect();
            if keys.is_empty() {
                return ParseStatus::Error(ErrnoKind::Inval);
            }
            msg.class.is_read = true;
            if keys.len() > 1 {
                msg.class.msg_type = MsgType::MultiGet;
                msg.class.key_start = Some(0);
                msg.class.key_end = Some(keys[0].len());
                msg.parse.rnarg = (keys.len() - 1) as i64;
                msg.cursor = scanner.cursor();
                ParseStatus::Fragment
            } else {
                msg.class.msg_type = MsgType::Get;
                msg.class.key_start = Some(0);
                msg.class.key_end = Some(keys[0].len());
                msg.cursor = scanner.cursor();
                ParseStatus::Complete
            }
        }
        _ => ParseStatus::Error(ErrnoKind::Inval),
    }
}

/// Replies are newline-terminated text blocks ending in `END\r\n` for reads,
/// or a single status line for everything else; this parser only needs to
/// recognize where one reply ends.
pub fn parse_rsp(msg: &mut Msg) -> ParseStatus {
    let start = msg.cursor;
    let mut scanner = ChainScanner::new(msg.chain(), start);
    let first_line = match scanner.read_line() {
        Some(l) => l,
        None => return ParseStatus::Again,
    };

    if first_line.starts_with(b"VALUE") {
        loop {
            let data_len: usize = match std::str::from_utf8(&first_line)
                .ok()
                .and_then(|s| s.split_whitespace().last())
                .and_then(|s| s.parse().ok())
            {
                Some(n) => n,
                None => return ParseStatus::Error(ErrnoKind::Inval),
            };
            if scanner.read_n(data_len).is_none() {
                return ParseStatus::Again;
            }
            if scanner.expect_crlf().is_none() {
                return ParseStatus::Again;
            }
            match scanner.read_line() {
                Some(l) if l == b"END" => break,
                Some(_) => continue,
                None => return ParseStatus::Again,
            }
        }
    }

    msg.cursor = scanner.cursor();
    ParseStatus::Complete
}

/// Unlike RESP's self-delimited bulk strings, a memcache command line has a
/// single terminator at its very end. The cursor after the first key sits
/// mid-line (`"get foo"`, no `\r\n` yet), so the tail still starts with the
/// separating space before the next key (`" bar baz\r\n"`) — prepending the
/// bare command name is enough to re-form a valid line.
pub fn pre_splitcopy() -> impl FnMut(&mut Mbuf) -> CoreResult<()> {
    move |mbuf: &mut Mbuf| mbuf.copy(b"get")
}

/// The retained head (`"get foo"`) is missing the line terminator the
/// original command hadn't reached yet; append it so the head stands alone
/// as a complete single-key command.
pub fn post_splitcopy(chain: &mut MbufChain) -> CoreResult<()> {
    let mbuf = chain
        .tail_mut()
        .ok_or_else(|| CoreError::SplitCopy("fragment head chain is empty".into()))?;
    mbuf.copy(b"\r\n")
}
