// Copyright 2019 Zhizhesihai (Beijing) Technology Limited.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// See the License for the specific language governing permissions and
// limitations under the License.

//! An append-only byte sequence, paged in power-of-two blocks, that
//! supports the one irregular operation the rest of the core leans on:
//! reversing a closed byte range in place. Everything downstream reads
//! it through one of two cursors — a forward reader for packed `Fst`s
//! and file headers, a reverse reader for the linear-chain unpacked
//! format — rather than through a single bidirectional reader, because
//! the two have genuinely different semantics (see `Fst`'s module docs
//! on why a node's bytes are written forward, then flipped).

use error::{ErrorKind, Result};

const DEFAULT_BLOCK_BITS: u32 = 15;

/// Page-backed, append-only byte buffer.
pub struct BytesStore {
    block_bits: u32,
    block_size: usize,
    block_mask: usize,
    blocks: Vec<Vec<u8>>,
}

impl BytesStore {
    pub fn new(block_bits: u32) -> Result<Self> {
        if block_bits == 0 || block_bits > 30 {
            bail!(ErrorKind::CapacityExceeded(format!(
                "block_bits must be in 1..=30, got {}",
                block_bits
            )));
        }
        let block_size = 1usize << block_bits;
        Ok(BytesStore {
            block_bits,
            block_size,
            block_mask: block_size - 1,
            blocks: Vec::new(),
        })
    }

    pub fn with_default_block_bits() -> Self {
        BytesStore::new(DEFAULT_BLOCK_BITS).unwrap()
    }

    pub fn get_position(&self) -> i64 {
        match self.blocks.last() {
            None => 0,
            Some(last) => ((self.blocks.len() - 1) * self.block_size + last.len()) as i64,
        }
    }

    fn ensure_open_block(&mut self) -> &mut Vec<u8> {
        if self.blocks.last().map_or(true, |b| b.len() == self.block_size) {
            self.blocks.push(Vec::with_capacity(self.block_size));
        }
        self.blocks.last_mut().unwrap()
    }

    pub fn write_byte(&mut self, b: u8) {
        self.ensure_open_block().push(b);
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) {
        let mut written = 0;
        while written < bytes.len() {
            let block = self.ensure_open_block();
            let room = self.block_size - block.len();
            let take = room.min(bytes.len() - written);
            block.extend_from_slice(&bytes[written..written + take]);
            written += take;
        }
    }

    pub fn write_vint(&mut self, mut v: i32) {
        loop {
            let b = (v & 0x7F) as u8;
            v = ((v as u32) >> 7) as i32;
            if v != 0 {
                self.write_byte(b | 0x80);
            } else {
                self.write_byte(b);
                break;
            }
        }
    }

    pub fn write_vlong(&mut self, mut v: i64) {
        debug_assert!(v >= 0);
        loop {
            let b = (v & 0x7F) as u8;
            v = ((v as u64) >> 7) as i64;
            if v != 0 {
                self.write_byte(b | 0x80);
            } else {
                self.write_byte(b);
                break;
            }
        }
    }

    pub fn write_int(&mut self, v: i32) {
        self.write_bytes(&v.to_be_bytes());
    }

    pub fn write_short(&mut self, v: i16) {
        self.write_bytes(&v.to_be_bytes());
    }

    /// Advances the write cursor by `n` bytes without recording their
    /// content, leaving a hole the caller will overwrite with
    /// `copy_bytes`/direct addressing (used to reserve a fixed-array
    /// node's header before its width is known).
    pub fn skip_bytes(&mut self, n: usize) {
        let zeros = vec![0u8; n];
        self.write_bytes(&zeros);
    }

    fn byte_at(&self, pos: i64) -> u8 {
        let pos = pos as usize;
        self.blocks[pos >> self.block_bits][pos & self.block_mask]
    }

    fn set_byte_at(&mut self, pos: i64, b: u8) {
        let pos = pos as usize;
        self.blocks[pos >> self.block_bits][pos & self.block_mask] = b;
    }

    /// Copies `len` bytes from `src_pos` to `dst_pos`. Overlap-safe only
    /// when `dst_pos > src_pos`: it copies back-to-front so that, for
    /// overlapping ranges, every source byte is read before it could be
    /// clobbered by an earlier write in the same call.
    pub fn copy_bytes(&mut self, src_pos: i64, dst_pos: i64, len: usize) {
        debug_assert!(dst_pos >= src_pos);
        for i in (0..len as i64).rev() {
            let b = self.byte_at(src_pos + i);
            self.set_byte_at(dst_pos + i, b);
        }
    }

    /// Overwrites `len(bytes)` bytes starting at `pos`, which must already
    /// lie within the written range. Used to backfill a fixed-array
    /// node's header once its real width is known.
    pub fn set_bytes(&mut self, pos: i64, bytes: &[u8]) {
        for (i, &b) in bytes.iter().enumerate() {
            self.set_byte_at(pos + i as i64, b);
        }
    }

    /// Drops every byte at or beyond `pos`.
    pub fn truncate(&mut self, pos: i64) {
        let pos = pos as usize;
        let full_blocks = pos / self.block_size;
        let rem = pos % self.block_size;
        if rem == 0 {
            self.blocks.truncate(full_blocks);
        } else {
            self.blocks.truncate(full_blocks + 1);
            if let Some(last) = self.blocks.last_mut() {
                last.truncate(rem);
            }
        }
    }

    /// Reverses the closed range `[from, to]` in place.
    pub fn reverse(&mut self, from: i64, to: i64) {
        let (mut lo, mut hi) = (from, to);
        while lo < hi {
            let a = self.byte_at(lo);
            let b = self.byte_at(hi);
            self.set_byte_at(lo, b);
            self.set_byte_at(hi, a);
            lo += 1;
            hi -= 1;
        }
    }

    pub fn finish(&mut self) {
        // No trailing bookkeeping needed: get_position() already
        // reflects the exact length written.
    }

    pub fn get_forward_reader(&self) -> ForwardBytesReader {
        ForwardBytesReader {
            store: self,
            pos: 0,
        }
    }

    pub fn get_reverse_reader(&self) -> ReverseBytesReader {
        ReverseBytesReader {
            store: self,
            pos: 0,
        }
    }

    pub fn get_reverse_reader_at(&self, pos: i64) -> ReverseBytesReader {
        ReverseBytesReader { store: self, pos }
    }
}

/// The subset of read operations both cursor directions expose. A
/// forward reader's position increases with each read; a reverse
/// reader's decreases. Both fail with `FormatError` on a short read
/// (positions is unsigned; reading off either end of the buffer is
/// always a bug in the caller's addressing, reported the same way a
/// truncated on-disk stream would be).
pub trait BytesReader {
    fn read_byte(&mut self) -> Result<u8>;
    fn read_bytes(&mut self, buf: &mut [u8]) -> Result<()>;
    fn get_position(&self) -> i64;
    fn set_position(&mut self, pos: i64);
    fn skip_bytes(&mut self, n: i64);

    fn read_vint(&mut self) -> Result<i32> {
        let mut result = 0i32;
        let mut shift = 0;
        loop {
            let b = self.read_byte()?;
            result |= i32::from(b & 0x7F) << shift;
            if b & 0x80 == 0 {
                return Ok(result);
            }
            shift += 7;
        }
    }

    fn read_vlong(&mut self) -> Result<i64> {
        let mut result = 0i64;
        let mut shift = 0;
        loop {
            let b = self.read_byte()?;
            result |= i64::from(b & 0x7F) << shift;
            if b & 0x80 == 0 {
                return Ok(result);
            }
            shift += 7;
        }
    }

    fn read_int(&mut self) -> Result<i32> {
        let mut buf = [0u8; 4];
        self.read_bytes(&mut buf)?;
        Ok(i32::from_be_bytes(buf))
    }

    fn read_short(&mut self) -> Result<i16> {
        let mut buf = [0u8; 2];
        self.read_bytes(&mut buf)?;
        Ok(i16::from_be_bytes(buf))
    }
}

pub struct ForwardBytesReader<'a> {
    store: &'a BytesStore,
    pos: i64,
}

impl<'a> BytesReader for ForwardBytesReader<'a> {
    fn read_byte(&mut self) -> Result<u8> {
        if self.pos >= self.store.get_position() {
            bail!(ErrorKind::FormatError(
                "read past end of bytes store (forward)".to_owned()
            ));
        }
        let b = self.store.byte_at(self.pos);
        self.pos += 1;
        Ok(b)
    }

    fn read_bytes(&mut self, buf: &mut [u8]) -> Result<()> {
        for slot in buf.iter_mut() {
            *slot = self.read_byte()?;
        }
        Ok(())
    }

    fn get_position(&self) -> i64 {
        self.pos
    }

    fn set_position(&mut self, pos: i64) {
        self.pos = pos;
    }

    fn skip_bytes(&mut self, n: i64) {
        self.pos += n;
    }
}

/// Reads a node's bytes back-to-front relative to how the encoder wrote
/// them. Because the encoder reverses each node's byte range once it
/// finishes writing it, walking this reader's position downward
/// reconstructs the original forward write order.
pub struct ReverseBytesReader<'a> {
    store: &'a BytesStore,
    pos: i64,
}

impl<'a> BytesReader for ReverseBytesReader<'a> {
    fn read_byte(&mut self) -> Result<u8> {
        if self.pos < 0 {
            bail!(ErrorKind::FormatError(
                "read past start of bytes store (reverse)".to_owned()
            ));
        }
        let b = self.store.byte_at(self.pos);
        self.pos -= 1;
        Ok(b)
    }

    fn read_bytes(&mut self, buf: &mut [u8]) -> Result<()> {
        for slot in buf.iter_mut() {
            *slot = self.read_byte()?;
        }
        Ok(())
    }

    fn get_position(&self) -> i64 {
        self.pos
    }

    fn set_position(&mut self, pos: i64) {
        self.pos = pos;
    }

    fn skip_bytes(&mut self, n: i64) {
        self.pos -= n;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_then_forward_read_round_trips() {
        let mut store = BytesStore::with_default_block_bits();
        store.write_byte(7);
        store.write_vint(300);
        store.write_vlong(70_000);
        store.write_int(-5);
        store.write_short(1234);
        let mut reader = store.get_forward_reader();
        assert_eq!(reader.read_byte().unwrap(), 7);
        assert_eq!(reader.read_vint().unwrap(), 300);
        assert_eq!(reader.read_vlong().unwrap(), 70_000);
        assert_eq!(reader.read_int().unwrap(), -5);
        assert_eq!(reader.read_short().unwrap(), 1234);
    }

    #[test]
    fn reverse_then_reverse_read_restores_write_order() {
        let mut store = BytesStore::with_default_block_bits();
        let start = store.get_position();
        store.write_byte(1);
        store.write_byte(2);
        store.write_byte(3);
        let end = store.get_position();
        store.reverse(start, end - 1);
        let mut reader = store.get_reverse_reader_at(end - 1);
        assert_eq!(reader.read_byte().unwrap(), 1);
        assert_eq!(reader.read_byte().unwrap(), 2);
        assert_eq!(reader.read_byte().unwrap(), 3);
    }

    #[test]
    fn copy_bytes_forward_overlap_is_safe() {
        let mut store = BytesStore::with_default_block_bits();
        store.write_bytes(&[1, 2, 3]);
        store.skip_bytes(2);
        store.copy_bytes(0, 2, 3);
        let mut reader = store.get_forward_reader();
        let mut buf = [0u8; 5];
        reader.read_bytes(&mut buf).unwrap();
        assert_eq!(buf, [1, 2, 1, 2, 3]);
    }

    #[test]
    fn truncate_drops_trailing_bytes() {
        let mut store = BytesStore::with_default_block_bits();
        store.write_bytes(&[1, 2, 3, 4, 5]);
        store.truncate(2);
        assert_eq!(store.get_position(), 2);
        let mut reader = store.get_forward_reader();
        assert_eq!(reader.read_byte().unwrap(), 1);
        assert_eq!(reader.read_byte().unwrap(), 2);
        assert!(reader.read_byte().is_err());
    }

    #[test]
    fn spans_multiple_blocks() {
        let mut store = BytesStore::new(3).unwrap(); // 8-byte blocks
        let data: Vec<u8> = (0..40u8).collect();
        store.write_bytes(&data);
        assert_eq!(store.get_position(), 40);
        let mut reader = store.get_forward_reader();
        let mut buf = vec![0u8; 40];
        reader.read_bytes(&mut buf).unwrap();
        assert_eq!(buf, data);
    }
}
