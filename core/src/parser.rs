//! Parser dispatch (spec §4.F / §6) and the chain-scanning primitives the
//! concrete dialect parsers in [`crate::dialects`] share.
//!
//! The spec's external "Parser" capability is a single pointer the caller
//! swaps per dialect; Design Notes §9 asks for tagged dispatch instead, so
//! [`parse`] matches on [`crate::msg::ParserKind`] and calls straight into
//! the matching `dialects::*` function — a sum type standing in for the
//! original's function-pointer table.

use crate::chain::{Cursor, MbufChain};
use crate::error::ErrnoKind;
use crate::msg::{Msg, ParserKind};

/// Outcome of a single `parse` call (spec §6: "OK / AGAIN / FRAGMENT / ERROR
/// / REPAIR").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseStatus {
    /// A full message was parsed; `msg.cursor` now sits at the boundary byte
    /// following it.
    Complete,
    /// A full message was parsed but it must be split into single-key
    /// fragments before going further (spec §4.I).
    Fragment,
    /// The chain holds an internal-mode message whose continuation needs
    /// external repair (spec §4.G step "REPAIR").
    Repair,
    /// Not enough bytes are available yet; `msg.cursor` is left untouched so
    /// the next call re-scans from the same position.
    Again,
    Error(ErrnoKind),
}

/// Dispatches to the dialect parser selected at message-allocation time
/// (spec §4.D "parser selection table").
pub fn parse(msg: &mut Msg) -> ParseStatus {
    match msg.kind {
        ParserKind::RedisReq => crate::dialects::redis::parse_req(msg),
        ParserKind::RedisRsp => crate::dialects::redis::parse_rsp(msg),
        ParserKind::MemcacheReq => crate::dialects::memcache::parse_req(msg),
        ParserKind::MemcacheRsp => crate::dialects::memcache::parse_rsp(msg),
        ParserKind::InternalReq => crate::dialects::internal::parse_req(msg),
        ParserKind::InternalRsp => crate::dialects::internal::parse_rsp(msg),
    }
}

/// A read-only cursor that walks a chain's unread bytes, hopping mbufs as it
/// goes. Dialect parsers use this instead of indexing mbufs directly so they
/// work the same whether a command landed in one mbuf or was split across
/// several reads.
#[derive(Clone, Copy)]
pub(crate) struct ChainScanner<'a> {
    chain: &'a MbufChain,
    idx: usize,
    off: usize,
}

impl<'a> ChainScanner<'a> {
    pub(crate) fn new(chain: &'a MbufChain, cursor: Cursor) -> Self {
        Self {
            chain,
            idx: cursor.mbuf_index,
            off: cursor.offset,
        }
    }

    pub(crate) fn cursor(&self) -> Cursor {
        Cursor {
            mbuf_index: self.idx,
            offset: self.off,
        }
    }

    fn current_byte(&self) -> Option<u8> {
        let mbuf = self.chain.get(self.idx)?;
        if self.off < mbuf.last() {
            Some(mbuf.written()[self.off])
        } else {
            None
        }
    }

    /// Advances past any mbufs that are fully consumed at the current
    /// offset, so `current_byte` always reports real data (or true
    /// exhaustion) rather than a stale end-of-buffer.
    fn skip_exhausted(&mut self) {
        while let Some(mbuf) = self.chain.get(self.idx) {
            if self.off >= mbuf.last() && self.idx + 1 < self.chain.len_mbufs() {
                self.idx += 1;
                self.off = 0;
            } else {
                break;
            }
        }
    }

    pub(crate) fn peek(&mut self) -> Option<u8> {
        self.skip_exhausted();
        self.current_byte()
    }

    pub(crate) fn advance(&mut self) -> Option<u8> {
        let byte = self.peek()?;
        self.off += 1;
        self.skip_exhausted();
        Some(byte)
    }

    /// Scans for a `\r\n`-terminated line starting at the scanner's current
    /// position. Returns the line bytes (without the terminator) and leaves
    /// the scanner positioned just past it. Returns `None` (scanner
    /// untouched) if the terminator hasn't arrived yet.
    pub(crate) fn read_line(&mut self) -> Option<Vec<u8>> {
        let mut probe = *self;
        let mut line = Vec::new();
        loop {
            let byte = probe.advance()?;
            if byte == b'\r' {
                let mut lookahead = probe;
                if lookahead.advance() == Some(b'\n') {
                    *self = lookahead;
                    return Some(line);
                }
                // lone \r: keep scanning, it's part of the line's content
                line.push(byte);
                continue;
            }
            line.push(byte);
        }
    }

    /// Consumes exactly `n` bytes, returning them, or `None` if fewer than
    /// `n` are currently available.
    pub(crate) fn read_n(&mut self, n: usize) -> Option<Vec<u8>> {
        let mut probe = *self;
        let mut out = Vec::with_capacity(n);
        for _ in 0..n {
            out.push(probe.advance()?);
        }
        *self = probe;
        Some(out)
    }

    /// Consumes a trailing `\r\n`, e.g. after a bulk string's payload.
    pub(crate) fn expect_crlf(&mut self) -> Option<()> {
        let mut probe = *self;
        if probe.advance()? == b'\r' && probe.advance()? == b'\n' {
            *self = probe;
            Some(())
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mbuf::MbufPool;

    fn chain_of(pool: &mut MbufPool, parts: &[&[u8]]) -> MbufChain {
        let mut chain = MbufChain::new();
        for part in parts {
            let mut mbuf = pool.get().unwrap();
            mbuf.copy(part).unwrap();
            chain.push_back(mbuf);
        }
        chain
    }

    #[test]
    fn read_line_crosses_mbuf_boundary() {
        let mut pool = MbufPool::new(64, 0, 4);
        let chain = chain_of(&mut pool, &[b"get fo", b"o\r\n"]);
        let mut scanner = ChainScanner::new(&chain, Cursor { mbuf_index: 0, offset: 0 });
        let line = scanner.read_line().unwrap();
        assert_eq!(line, b"get foo");
    }

    #[test]
    fn read_line_returns_none_without_terminator() {
        let mut pool = MbufPool::new(64, 0, 4);
        let chain = chain_of(&mut pool, &[b"get foo"]);
        let mut scanner = ChainScanner::new(&chain, Cursor { mbuf_index: 0, offset: 0 });
        assert!(scanner.read_line().is_none());
    }

    #[test]
    fn read_n_respects_short_buffers() {
        let mut pool = MbufPool::new(64, 0, 4);
        let chain = chain_of(&mut pool, &[b"ab", b"cde"]);
        let mut scanner = ChainScanner::new(&chain, Cursor { mbuf_index: 0, offset: 0 });
        assert_eq!(scanner.read_n(4).unwrap(), b"abcd");
        assert!(ChainScanner::new(&chain, Cursor { mbuf_index: 0, offset: 0 })
            .read_n(10)
            .is_none());
    }
}
