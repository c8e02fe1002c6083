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

//! A sequence of non-negative `i32` input labels, used as the unit of
//! comparison/sharing while a `Fst` is being compiled. Keeping this
//! separate from raw bytes lets the same compiler front a 1-byte,
//! 2-byte, or vint32 label width without the caller juggling widths
//! itself.

use std::cmp::Ordering;

/// A borrowed, offset-addressed slice of labels. Two `IntsRef`s compare
/// lexicographically over their logical `[offset, offset+length)` range,
/// which is what lets the compiler assert inputs arrive in sorted order.
#[derive(Clone, Copy)]
pub struct IntsRef<'a> {
    ints: &'a [i32],
    pub offset: usize,
    pub length: usize,
}

impl<'a> IntsRef<'a> {
    pub fn new(ints: &'a [i32], offset: usize, length: usize) -> Self {
        IntsRef {
            ints,
            offset,
            length,
        }
    }

    /// Builds an `IntsRef` over the label sequence of a byte string (one
    /// label per byte, suitable for `InputType::Byte1` FSTs).
    pub fn from_bytes(bytes: &'a [u8], scratch: &'a mut Vec<i32>) -> Self {
        scratch.clear();
        scratch.extend(bytes.iter().map(|&b| i32::from(b)));
        IntsRef::new(scratch, 0, scratch.len())
    }

    pub fn ints(&self) -> &[i32] {
        self.ints
    }

    pub fn int_at(&self, pos: usize) -> i32 {
        self.ints[self.offset + pos]
    }

    pub fn is_empty(&self) -> bool {
        self.length == 0
    }
}

impl<'a> PartialEq for IntsRef<'a> {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl<'a> Eq for IntsRef<'a> {}

impl<'a> PartialOrd for IntsRef<'a> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<'a> Ord for IntsRef<'a> {
    fn cmp(&self, other: &Self) -> Ordering {
        let min_len = self.length.min(other.length);
        for i in 0..min_len {
            let ord = self.int_at(i).cmp(&other.int_at(i));
            if ord != Ordering::Equal {
                return ord;
            }
        }
        self.length.cmp(&other.length)
    }
}

/// Growable, owned counterpart of `IntsRef`; used by the compiler to
/// retain the previously-added input so the next `add` call can compute
/// the shared-prefix length against it.
#[derive(Default)]
pub struct IntsRefBuilder {
    ints: Vec<i32>,
    pub length: usize,
}

impl IntsRefBuilder {
    pub fn new() -> Self {
        IntsRefBuilder {
            ints: Vec::new(),
            length: 0,
        }
    }

    pub fn int_at(&self, pos: usize) -> i32 {
        self.ints[pos]
    }

    pub fn clear(&mut self) {
        self.length = 0;
    }

    pub fn copy_ints_ref(&mut self, other: &IntsRef) {
        self.clear();
        for i in 0..other.length {
            self.append(other.int_at(i));
        }
    }

    pub fn append(&mut self, label: i32) {
        if self.length == self.ints.len() {
            self.ints.push(label);
        } else {
            self.ints[self.length] = label;
        }
        self.length += 1;
    }

    pub fn get(&self) -> IntsRef {
        IntsRef::new(&self.ints, 0, self.length)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn orders_lexicographically() {
        let a = [1, 2, 3];
        let b = [1, 2, 4];
        assert!(IntsRef::new(&a, 0, 3) < IntsRef::new(&b, 0, 3));
        let c = [1, 2];
        assert!(IntsRef::new(&c, 0, 2) < IntsRef::new(&a, 0, 3));
    }

    #[test]
    fn builder_tracks_last_input() {
        let mut builder = IntsRefBuilder::new();
        let bytes = [b'c', b'a', b't'];
        let mut scratch = Vec::new();
        builder.copy_ints_ref(&IntsRef::from_bytes(&bytes, &mut scratch));
        assert_eq!(builder.length, 3);
        assert_eq!(builder.int_at(0), i32::from(b'c'));
    }
}
