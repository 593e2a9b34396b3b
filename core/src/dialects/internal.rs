//! The internal peer-to-peer dialect (`dyn_parse_req`/`dyn_parse_rsp` in
//! spec §4.D's dispatch table). A message in this dialect opens with a
//! [`DmsgEnvelope`] header, then carries a nested request/response in
//! whichever dialect the peer originally spoke — inherited via
//! [`Msg::effective_dialect`] (spec §4.D: "internal mode inherits from the
//! outer dialect").
//!
//! The envelope's wire layout isn't specified by the distilled spec (the
//! recovered `dyn_message.c` excerpt only shows the envelope being
//! *consulted*, never parsed off the wire) so this module defines one: one
//! byte `bit_field`, a big-endian `u32` `plen`, one byte `data_store` tag.
//! Decryption itself is the receive engine's job (spec §4.G step 4); by the
//! time this parser runs again on a `read_flip`-marked buffer the payload is
//! already plaintext.

use crate::dmsg::DmsgEnvelope;
use crate::msg::{Dialect, Msg};
use crate::parser::{ChainScanner, ParseStatus};

const HEADER_LEN: usize = 6;

fn read_header(scanner: &mut ChainScanner<'_>) -> Option<DmsgEnvelope> {
    let bytes = scanner.read_n(HEADER_LEN)?;
    let encrypted = bytes[0] == 1;
    let plen = u32::from_be_bytes([bytes[1], bytes[2], bytes[3], bytes[4]]) as usize;
    let data_store = if bytes[5] == 1 { Dialect::Memcache } else { Dialect::Redis };
    Some(if encrypted {
        DmsgEnvelope::with_ciphertext(data_store, plen)
    } else {
        DmsgEnvelope::new(data_store)
    })
}

fn dispatch_body(msg: &mut Msg) -> ParseStatus {
    match msg.effective_dialect() {
        Dialect::Redis if msg.direction == crate::msg::Direction::Request => super::redis::parse_req(msg),
        Dialect::Redis => super::redis::parse_rsp(msg),
        Dialect::Memcache if msg.direction == crate::msg::Direction::Request => super::memcache::parse_req(msg),
        Dialect::Memcache => super::memcache::parse_rsp(msg),
    }
}

/// Swallows a parse error by skipping one line of input, per spec §7
/// ("internal mode: swallowed; stream continues") and the Design Notes §9
/// open question about requiring forward progress. A line with no
/// terminator means the stream can't safely resynchronize, so that case is
/// surfaced as a fatal error instead of looping forever.
fn swallow_one_line(msg: &mut Msg) -> ParseStatus {
    let mut scanner = ChainScanner::new(msg.chain(), msg.cursor);
    match scanner.read_line() {
        Some(_) => {
            msg.cursor = scanner.cursor();
            msg.swallow = true;
            ParseStatus::Complete
        }
        None => ParseStatus::Error(crate::error::ErrnoKind::Inval),
    }
}

fn parse_envelope_then(msg: &mut Msg) -> ParseStatus {
    let envelope_just_parsed = msg.dmsg.is_none();
    if envelope_just_parsed {
        let mut scanner = ChainScanner::new(msg.chain(), msg.cursor);
        let envelope = match read_header(&mut scanner) {
            Some(e) => e,
            None => return ParseStatus::Again,
        };
        msg.cursor = scanner.cursor();
        msg.dmsg = Some(envelope);
    }

    match dispatch_body(msg) {
        ParseStatus::Error(_) => swallow_one_line(msg),
        // The envelope header prefix was just consumed but the nested
        // body isn't fully here yet: the header and the partial body
        // currently share whatever mbufs arrived together, so the trailing
        // bytes need to be resegmented onto a fresh buffer boundary before
        // the next read, rather than silently retrying against the same
        // cursor (spec glossary "Repair"; §4.G). Once the envelope has
        // already been parsed on an earlier call, a further `Again` from
        // the body is the ordinary "need more bytes" case.
        ParseStatus::Again if envelope_just_parsed => ParseStatus::Repair,
        other => other,
    }
}

pub fn parse_req(msg: &mut Msg) -> ParseStatus {
    parse_envelope_then(msg)
}

pub fn parse_rsp(msg: &mut Msg) -> ParseStatus {
    parse_envelope_then(msg)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id::{ConnId, MsgId};
    use crate::mbuf::MbufPool;
    use crate::msg::{Direction, Mode};

    fn msg_with(pool: &mut MbufPool, payload: &[u8]) -> Msg {
        let mut msg = Msg::new(MsgId::new(1), ConnId(1), Mode::Internal, Direction::Request, Dialect::Redis);
        let mut mbuf = pool.get().unwrap();
        mbuf.copy(payload).unwrap();
        msg.chain_mut().push_back(mbuf);
        msg
    }

    #[test]
    fn envelope_then_nested_redis_request_completes() {
        let mut pool = MbufPool::new(256, 0, 4);
        let mut payload = vec![0u8, 0, 0, 0, 0, 0];
        payload.extend_from_slice(b"*2\r\n$3\r\nget\r\n$3\r\nfoo\r\n");
        let mut msg = msg_with(&mut pool, &payload);
        assert_eq!(parse_req(&mut msg), ParseStatus::Complete);
        assert!(msg.dmsg.is_some());
        assert!(!msg.dmsg.as_ref().unwrap().encrypted);
    }

    #[test]
    fn short_header_yields_again() {
        let mut pool = MbufPool::new(256, 0, 4);
        let mut msg = msg_with(&mut pool, &[0u8, 0, 0]);
        assert_eq!(parse_req(&mut msg), ParseStatus::Again);
    }

    #[test]
    fn incomplete_body_right_after_envelope_yields_repair() {
        let mut pool = MbufPool::new(256, 0, 4);
        let mut payload = vec![0u8, 0, 0, 0, 0, 0];
        // A redis request whose final bulk string is cut short.
        payload.extend_from_slice(b"*2\r\n$3\r\nget\r\n$3\r\nfo");
        let mut msg = msg_with(&mut pool, &payload);
        assert_eq!(parse_req(&mut msg), ParseStatus::Repair);
        assert!(msg.dmsg.is_some());
    }

    #[test]
    fn body_again_after_envelope_already_parsed_stays_again() {
        let mut pool = MbufPool::new(256, 0, 4);
        let mut msg = msg_with(&mut pool, &[0u8, 0, 0, 0, 0, 0]);
        msg.dmsg = Some(DmsgEnvelope::new(Dialect::Redis));
        msg.cursor = crate::chain::Cursor { mbuf_index: 0, offset: HEADER_LEN };
        assert_eq!(parse_req(&mut msg), ParseStatus::Again);
    }

    #[test]
    fn malformed_body_is_swallowed_with_forward_progress() {
        let mut pool = MbufPool::new(256, 0, 4);
        let mut payload = vec![0u8, 0, 0, 0, 0, 0];
        payload.extend_from_slice(b"not a valid frame\r\n");
        let mut msg = msg_with(&mut pool, &payload);
        assert_eq!(parse_req(&mut msg), ParseStatus::Complete);
        assert!(msg.swallow);
    }
}
