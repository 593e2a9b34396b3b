//! The internal-protocol envelope (spec §3 / §6 `dmsg`).

use crate::msg::Dialect;

/// Minimal contract for the peer-envelope wrapped around internal-mode
/// messages: `bit_field == 1` signals an AES-encrypted payload, `plen` is
/// the remaining expected ciphertext byte count.
///
/// `data_store` is recovered from `examples/original_source/src/dyn_message.c`
/// (not named in the distilled spec): the envelope records which outer
/// dialect (Redis/Memcached) produced the wrapped message, so that
/// post-decrypt re-parsing can select the right dispatch row even though the
/// message's own `mode` is internal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DmsgEnvelope {
    pub encrypted: bool,
    pub plen: usize,
    pub data_store: Dialect,
}

impl DmsgEnvelope {
    pub fn new(data_store: Dialect) -> Self {
        Self {
            encrypted: false,
            plen: 0,
            data_store,
        }
    }

    pub fn with_ciphertext(data_store: Dialect, plen: usize) -> Self {
        Self {
            encrypted: true,
            plen,
            data_store,
        }
    }
}
