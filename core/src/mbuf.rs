//! The mbuf: a fixed-capacity byte region with pool reuse and split (spec §4.A).

use crate::error::{CoreError, CoreResult};

/// A fixed-capacity buffer segment.
///
/// `[0, pos)` has been consumed by the parser, `[pos, last)` is unread data,
/// `[last, end)` is free space for normal writes, and `[end, end_extra)` is
/// padding reserved for ciphertext staging (spec §3). Because each `Mbuf`
/// owns its storage outright (no shared views), the `start` pointer from the
/// spec's C-origin layout collapses to a constant zero here and is omitted;
/// `pos <= last <= end <= end_extra` is the invariant this type maintains.
#[derive(Debug)]
pub struct Mbuf {
    pos: usize,
    last: usize,
    end: usize,
    end_extra: usize,
    data: Box<[u8]>,
    read_flip: bool,
}

impl Mbuf {
    fn new(cap: usize, extra: usize) -> Self {
        Self {
            pos: 0,
            last: 0,
            end: cap,
            end_extra: cap + extra,
            data: vec![0u8; cap + extra].into_boxed_slice(),
            read_flip: false,
        }
    }

    /// Resets pointers and the `read_flip` flag, keeping the underlying
    /// allocation for reuse.
    pub fn reset(&mut self) {
        self.pos = 0;
        self.last = 0;
        self.read_flip = false;
    }

    pub fn pos(&self) -> usize {
        self.pos
    }

    pub fn last(&self) -> usize {
        self.last
    }

    pub fn end(&self) -> usize {
        self.end
    }

    pub fn end_extra(&self) -> usize {
        self.end_extra
    }

    pub fn read_flip(&self) -> bool {
        self.read_flip
    }

    pub fn set_read_flip(&mut self, flip: bool) {
        self.read_flip = flip;
    }

    pub fn set_pos(&mut self, pos: usize) {
        debug_assert!(pos <= self.last);
        self.pos = pos;
    }

    /// `[pos, last)`: the unread bytes.
    pub fn unread(&self) -> &[u8] {
        &self.data[self.pos..self.last]
    }

    /// `[0, last)`: all written bytes, used by [`Self::length`] and the
    /// checksum/dump helpers.
    pub fn written(&self) -> &[u8] {
        &self.data[..self.last]
    }

    /// `[last, end)`: free space available to a normal (non-ciphertext) read.
    pub fn free_mut(&mut self) -> &mut [u8] {
        &mut self.data[self.last..self.end]
    }

    /// `[last, end_extra)`: free space available to a ciphertext-staging
    /// read, which may write into the padding region.
    pub fn free_extra_mut(&mut self) -> &mut [u8] {
        &mut self.data[self.last..self.end_extra]
    }

    /// The number of unread bytes, i.e. `last - pos`.
    pub fn length(&self) -> usize {
        self.last - self.pos
    }

    /// The written length, i.e. `last - 0`. Spec invariant 1 sums this
    /// across a chain to get `mlen`.
    pub fn written_len(&self) -> usize {
        self.last
    }

    pub fn size(&self) -> usize {
        self.end
    }

    pub fn empty(&self) -> bool {
        self.pos == self.last
    }

    pub fn full(&self) -> bool {
        self.last == self.end
    }

    /// Appends `src` to `[last, last+src.len())`. Fails if it would not fit
    /// in the normal writable region.
    pub fn copy(&mut self, src: &[u8]) -> CoreResult<()> {
        if self.last + src.len() > self.end {
            return Err(CoreError::OutOfMemory);
        }
        let dst_end = self.last + src.len();
        self.data[self.last..dst_end].copy_from_slice(src);
        self.last = dst_end;
        Ok(())
    }

    /// Advances `last` by `n` bytes after an out-of-band write into
    /// [`Self::free_mut`] / [`Self::free_extra_mut`] (used by the receive
    /// engine after a successful `recv`).
    pub fn advance_last(&mut self, n: usize) {
        debug_assert!(self.last + n <= self.end_extra);
        self.last += n;
    }

    /// Truncates `last` to `new_last` and brings `pos` up to match, used
    /// when a chain is split exactly at this mbuf's parse boundary: the
    /// retained head has nothing left unread.
    pub fn truncate_last(&mut self, new_last: usize) {
        debug_assert!(new_last <= self.last);
        self.last = new_last;
        self.pos = new_last;
    }

    /// Replaces the written bytes in `range` with `new_bytes`, shifting any
    /// trailing written bytes to keep the buffer contiguous. Used by
    /// `post_splitcopy` hooks to patch a retained command header (e.g.
    /// rewriting a RESP array arity) whose replacement may have a different
    /// byte width than the original.
    pub fn splice_within(&mut self, range: std::ops::Range<usize>, new_bytes: &[u8]) -> CoreResult<()> {
        debug_assert!(range.end <= self.last);
        let tail: Vec<u8> = self.data[range.end..self.last].to_vec();
        let new_last = range.start + new_bytes.len() + tail.len();
        if new_last > self.end {
            return Err(CoreError::OutOfMemory);
        }
        self.data[range.start..range.start + new_bytes.len()].copy_from_slice(new_bytes);
        let tail_start = range.start + new_bytes.len();
        self.data[tail_start..tail_start + tail.len()].copy_from_slice(&tail);
        self.last = new_last;
        if self.pos > self.last {
            self.pos = self.last;
        }
        Ok(())
    }
}

/// Free-list of recycled mbufs plus a hard allocation ceiling (spec §4.D /
/// §5: "Buffers: delegated to an mbuf pool with its own cap").
#[derive(Debug)]
pub struct MbufPool {
    free: Vec<Mbuf>,
    cap: usize,
    extra: usize,
    max: usize,
    allocated: usize,
}

impl MbufPool {
    pub fn new(cap: usize, extra: usize, max: usize) -> Self {
        Self {
            free: Vec::new(),
            cap,
            extra,
            max,
            allocated: 0,
        }
    }

    /// Returns a recycled mbuf if one is free, else allocates a fresh one up
    /// to `max`.
    pub fn get(&mut self) -> CoreResult<Mbuf> {
        if let Some(mbuf) = self.free.pop() {
            return Ok(mbuf);
        }
        if self.allocated >= self.max {
            tracing::error!(allocated = self.allocated, max = self.max, "mbuf pool exhausted");
            return Err(CoreError::OutOfMemory);
        }
        self.allocated += 1;
        tracing::debug!(allocated = self.allocated, "mbuf pool grew");
        Ok(Mbuf::new(self.cap, self.extra))
    }

    /// Resets the mbuf and pushes it to the head of the free-list (LIFO, to
    /// maximize cache reuse, per spec §3 "Lifecycle").
    pub fn put(&mut self, mut mbuf: Mbuf) {
        mbuf.reset();
        self.free.push(mbuf);
    }

    pub fn live(&self) -> usize {
        self.allocated - self.free.len()
    }

    pub fn cap(&self) -> usize {
        self.cap
    }

    pub fn extra(&self) -> usize {
        self.extra
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_reuses_freed_buffers() {
        let mut pool = MbufPool::new(16, 4, 2);
        let a = pool.get().unwrap();
        pool.put(a);
        assert_eq!(pool.live(), 0);
        let _b = pool.get().unwrap();
        assert_eq!(pool.allocated, 1);
    }

    #[test]
    fn refuses_past_ceiling() {
        let mut pool = MbufPool::new(16, 0, 1);
        let _a = pool.get().unwrap();
        assert!(matches!(pool.get(), Err(CoreError::OutOfMemory)));
    }

    #[test]
    fn copy_appends_and_advances_last() {
        let mut pool = MbufPool::new(8, 0, 1);
        let mut mbuf = pool.get().unwrap();
        mbuf.copy(b"abcd").unwrap();
        assert_eq!(mbuf.written(), b"abcd");
        assert!(mbuf.copy(b"abcde").is_err());
    }

    #[test]
    fn full_and_empty_reflect_pointers() {
        let mut pool = MbufPool::new(4, 0, 1);
        let mut mbuf = pool.get().unwrap();
        assert!(mbuf.empty());
        assert!(!mbuf.full());
        mbuf.copy(b"abcd").unwrap();
        assert!(mbuf.full());
        mbuf.set_pos(4);
        assert!(mbuf.empty());
    }
}
