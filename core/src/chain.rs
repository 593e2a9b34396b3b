//! The mbuf chain: an ordered sequence of mbufs forming a message body
//! (spec §4.A / §4.B).

use std::collections::VecDeque;

use crate::error::CoreResult;
use crate::mbuf::{Mbuf, MbufPool};

/// A parse position within a chain: the index of the mbuf holding the
/// cursor, and the byte offset into that mbuf's written region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cursor {
    pub mbuf_index: usize,
    pub offset: usize,
}

/// Singly-linked (here: double-ended, for O(1) tail access) list of mbufs in
/// arrival order.
#[derive(Debug, Default)]
pub struct MbufChain {
    bufs: VecDeque<Mbuf>,
}

impl MbufChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_back(&mut self, mbuf: Mbuf) {
        self.bufs.push_back(mbuf);
    }

    pub fn is_empty(&self) -> bool {
        self.bufs.is_empty()
    }

    pub fn len_mbufs(&self) -> usize {
        self.bufs.len()
    }

    pub fn tail(&self) -> Option<&Mbuf> {
        self.bufs.back()
    }

    pub fn tail_mut(&mut self) -> Option<&mut Mbuf> {
        self.bufs.back_mut()
    }

    pub fn tail_index(&self) -> Option<usize> {
        if self.bufs.is_empty() {
            None
        } else {
            Some(self.bufs.len() - 1)
        }
    }

    pub fn get(&self, idx: usize) -> Option<&Mbuf> {
        self.bufs.get(idx)
    }

    pub fn get_mut(&mut self, idx: usize) -> Option<&mut Mbuf> {
        self.bufs.get_mut(idx)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Mbuf> {
        self.bufs.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Mbuf> {
        self.bufs.iter_mut()
    }

    pub fn pop_front(&mut self) -> Option<Mbuf> {
        self.bufs.pop_front()
    }

    /// Removes the tail mbuf, used by the receive engine to swap a
    /// ciphertext buffer for its decrypted replacement (spec §4.G step 4).
    pub fn pop_back(&mut self) -> Option<Mbuf> {
        self.bufs.pop_back()
    }

    /// Σ over mbufs of `written_len()`. Spec invariant 1: equals a message's
    /// `mlen`.
    pub fn written_len(&self) -> usize {
        self.bufs.iter().map(Mbuf::written_len).sum()
    }

    /// Drains every mbuf back to the pool. Used when a message is released.
    pub fn drain_to_pool(&mut self, pool: &mut MbufPool) {
        while let Some(mbuf) = self.bufs.pop_front() {
            pool.put(mbuf);
        }
    }

    /// Deep-copies this chain's content from `from_index` onward into a
    /// fresh chain, for [`crate::msg::Msg::clone_from`] (spec §4.C `clone`).
    ///
    /// Atomic per spec §7 ("`msg_clone` releases any buffers it acquired
    /// before returning"): if any mbuf fails to allocate or copy partway
    /// through, every buffer already placed into `out` is drained back to
    /// `pool` before the error is returned.
    pub fn deep_copy_from(&self, from_index: usize, pool: &mut MbufPool) -> CoreResult<MbufChain> {
        let mut out = MbufChain::new();
        for mbuf in self.bufs.iter().skip(from_index) {
            let mut fresh = match pool.get() {
                Ok(fresh) => fresh,
                Err(e) => {
                    out.drain_to_pool(pool);
                    return Err(e);
                }
            };
            if let Err(e) = fresh.copy(mbuf.written()) {
                pool.put(fresh);
                out.drain_to_pool(pool);
                return Err(e);
            }
            fresh.set_pos(mbuf.pos());
            out.push_back(fresh);
        }
        Ok(out)
    }

    /// Partitions the chain at `cursor`: bytes before the cursor remain in
    /// `self`; bytes at and after the cursor move into the returned chain.
    /// If `pre_copy` is supplied it writes a synthesized prefix (e.g. a
    /// re-built command header) into the fresh lead buffer of the tail
    /// chain before the moved data.
    ///
    /// Atomic: if `pre_copy` fails, or the fresh buffer cannot hold the
    /// copied remainder, `self` is left completely unmodified (spec §4.A /
    /// §7).
    pub fn split(
        &mut self,
        cursor: Cursor,
        mut pre_copy: Option<&mut dyn FnMut(&mut Mbuf) -> CoreResult<()>>,
        pool: &mut MbufPool,
    ) -> CoreResult<MbufChain> {
        let cursor_has_remainder = self
            .bufs
            .get(cursor.mbuf_index)
            .map(|m| cursor.offset < m.last())
            .unwrap_or(false);

        let mut tail_chain = MbufChain::new();

        if cursor_has_remainder || pre_copy.is_some() {
            let mut fresh = pool.get()?;
            if let Some(cb) = pre_copy.as_deref_mut() {
                if let Err(e) = cb(&mut fresh) {
                    pool.put(fresh);
                    return Err(e);
                }
            }
            if cursor_has_remainder {
                let remainder_end = self.bufs[cursor.mbuf_index].last();
                let copy_result = {
                    let src = &self.bufs[cursor.mbuf_index];
                    fresh.copy(&src.written()[cursor.offset..remainder_end])
                };
                if let Err(e) = copy_result {
                    pool.put(fresh);
                    return Err(e);
                }
            }
            tail_chain.push_back(fresh);
        }

        if cursor.mbuf_index < self.bufs.len() {
            let rest = self.bufs.split_off(cursor.mbuf_index + 1);
            tail_chain.bufs.extend(rest);
            if cursor_has_remainder {
                self.bufs[cursor.mbuf_index].truncate_last(cursor.offset);
            }
        }

        Ok(tail_chain)
    }

    /// Concatenates the bytes of `self` followed by `other` into a single
    /// owned buffer, used by round-trip tests (spec §8: "`split` followed by
    /// naive concatenation of head then tail reproduces the original byte
    /// stream").
    #[cfg(test)]
    pub fn to_vec(&self) -> Vec<u8> {
        self.bufs.iter().flat_map(|m| m.written().to_vec()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filled_chain(pool: &mut MbufPool, data: &[u8]) -> MbufChain {
        let mut chain = MbufChain::new();
        let mut mbuf = pool.get().unwrap();
        mbuf.copy(data).unwrap();
        chain.push_back(mbuf);
        chain
    }

    #[test]
    fn split_preserves_total_bytes() {
        let mut pool = MbufPool::new(64, 0, 8);
        let mut chain = filled_chain(&mut pool, b"get foo\r\nget bar\r\n");
        let original = chain.to_vec();

        let tail = chain
            .split(Cursor { mbuf_index: 0, offset: 9 }, None, &mut pool)
            .unwrap();

        let mut reassembled = chain.to_vec();
        reassembled.extend(tail.to_vec());
        assert_eq!(reassembled, original);
    }

    #[test]
    fn split_returns_nonempty_suffix() {
        let mut pool = MbufPool::new(64, 0, 8);
        let mut chain = filled_chain(&mut pool, b"get foo\r\nget bar\r\n");
        let tail = chain
            .split(Cursor { mbuf_index: 0, offset: 9 }, None, &mut pool)
            .unwrap();
        assert!(!tail.is_empty());
        assert_eq!(tail.written_len(), b"get bar\r\n".len());
    }

    #[test]
    fn failing_pre_copy_leaves_chain_untouched() {
        let mut pool = MbufPool::new(64, 0, 8);
        let mut chain = filled_chain(&mut pool, b"get foo\r\nget bar\r\n");
        let before = chain.to_vec();

        let mut failing = |_: &mut Mbuf| -> CoreResult<()> {
            Err(crate::error::CoreError::SplitCopy("boom".into()))
        };
        let result = chain.split(
            Cursor { mbuf_index: 0, offset: 9 },
            Some(&mut failing),
            &mut pool,
        );
        assert!(result.is_err());
        assert_eq!(chain.to_vec(), before);
    }

    #[test]
    fn deep_copy_from_releases_partial_buffers_on_failure() {
        let mut pool = MbufPool::new(64, 0, 4);
        let mut chain = MbufChain::new();
        for part in [&b"aaa"[..], &b"bbb"[..], &b"ccc"[..]] {
            let mut mbuf = pool.get().unwrap();
            mbuf.copy(part).unwrap();
            chain.push_back(mbuf);
        }
        assert_eq!(pool.live(), 3);

        // One slot of headroom lets the first mbuf's copy succeed; the
        // second has nowhere to allocate from, so the whole call fails and
        // must hand the first copy's buffer back rather than leaking it.
        let result = chain.deep_copy_from(0, &mut pool);
        assert!(result.is_err());
        assert_eq!(pool.live(), 3);
    }

    #[test]
    fn pre_copy_prefix_lands_before_moved_bytes() {
        let mut pool = MbufPool::new(64, 0, 8);
        let mut chain = filled_chain(&mut pool, b"bar\r\n");
        let mut prefix = |m: &mut Mbuf| m.copy(b"*2\r\n$3\r\nget\r\n$3\r\n");
        let tail = chain
            .split(Cursor { mbuf_index: 0, offset: 0 }, Some(&mut prefix), &mut pool)
            .unwrap();
        assert_eq!(tail.to_vec(), b"*2\r\n$3\r\nget\r\n$3\r\nbar\r\n".to_vec());
    }
}
