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

//! Bit-packed non-negative integer tables, at the minimum bit-width the
//! stored values need. Two callers in `fst` use these: the build-only
//! `node_address` table (growable, since the final addresses aren't
//! known until a pack pass converges) and the packed-only
//! `node_ref_to_address` dense-id table (fixed once emitted).
//!
//! A single policy stands in for the acceptable-overhead-ratio knob the
//! source exposes: always pack to the minimum width that fits every
//! value currently stored, rather than trading a wider width for fewer
//! future resizes.

/// Stand-in for the source's `acceptable_overhead_ratio` policy choice;
/// kept as a named constant so call sites read the same as upstream.
pub const COMPACT: f32 = 0.0;

/// Bit widths a packed table may use. Matches the source's restriction
/// to a small, byte-aligned set rather than every width from 1 to 64.
const SUPPORTED_BITS_PER_VALUE: [u32; 8] = [8, 16, 24, 32, 40, 48, 56, 64];

pub fn unsigned_bits_required(max_value: i64) -> i32 {
    debug_assert!(max_value >= 0);
    if max_value == 0 {
        1
    } else {
        64 - (max_value as u64).leading_zeros() as i32
    }
}

fn round_up_bits(bits: i32) -> u32 {
    for &b in &SUPPORTED_BITS_PER_VALUE {
        if b as i32 >= bits {
            return b;
        }
    }
    64
}

/// A dense, growable array of non-negative integers, bit-packed at the
/// narrowest supported width that fits every value written so far.
/// Widening re-packs every existing value; values never shrink the
/// width back down.
pub struct GrowableWriter {
    bits_per_value: u32,
    values: Vec<u64>,
    size: usize,
}

impl GrowableWriter {
    pub fn new(size: usize, start_bits_per_value: u32) -> Self {
        let bits_per_value = round_up_bits(start_bits_per_value as i32).max(8);
        GrowableWriter {
            bits_per_value,
            values: vec![0; size],
            size,
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn bits_per_value(&self) -> u32 {
        self.bits_per_value
    }

    pub fn get(&self, index: usize) -> i64 {
        self.values[index] as i64
    }

    /// Like `get`, but returns `0` instead of panicking for an index
    /// never grown into (e.g. the root ordinal, which is never any
    /// arc's target and so never appears in an in-degree table).
    pub fn get_checked(&self, index: usize) -> i64 {
        if index < self.values.len() {
            self.values[index] as i64
        } else {
            0
        }
    }

    pub fn set(&mut self, index: usize, value: i64) {
        debug_assert!(value >= 0);
        let needed = round_up_bits(unsigned_bits_required(value));
        if needed > self.bits_per_value {
            self.bits_per_value = needed;
        }
        if index >= self.values.len() {
            self.values.resize(index + 1, 0);
        }
        self.size = self.size.max(index + 1);
        self.values[index] = value as u64;
    }

    pub fn ensure_size(&mut self, size: usize) {
        if size > self.values.len() {
            self.values.resize(size, 0);
        }
        self.size = self.size.max(size);
    }
}

/// The frozen, serializable counterpart of `GrowableWriter`: a fixed
/// bit-width packed array of non-negative integers, used for the
/// dense-id -> address table a packed `Fst` carries (§6, item 5 of the
/// on-disk format).
#[derive(Clone)]
pub struct PackedIntArray {
    bits_per_value: u32,
    values: Vec<i64>,
}

impl PackedIntArray {
    pub fn from_values(values: Vec<i64>) -> Self {
        let max = values.iter().cloned().fold(0i64, i64::max);
        let bits_per_value = round_up_bits(unsigned_bits_required(max));
        PackedIntArray {
            bits_per_value,
            values,
        }
    }

    pub fn from_raw(bits_per_value: u32, values: Vec<i64>) -> Self {
        PackedIntArray {
            bits_per_value,
            values,
        }
    }

    pub fn get(&self, index: usize) -> i64 {
        self.values[index]
    }

    pub fn size(&self) -> usize {
        self.values.len()
    }

    pub fn bits_per_value(&self) -> u32 {
        self.bits_per_value
    }

    pub fn values(&self) -> &[i64] {
        &self.values
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn growable_writer_widens_as_needed() {
        let mut w = GrowableWriter::new(4, 8);
        assert_eq!(w.bits_per_value(), 8);
        w.set(0, 10);
        w.set(1, 300);
        assert_eq!(w.bits_per_value(), 16);
        assert_eq!(w.get(0), 10);
        assert_eq!(w.get(1), 300);
        w.set(2, 1 << 20);
        assert_eq!(w.bits_per_value(), 24);
        assert_eq!(w.get(2), 1 << 20);
    }

    #[test]
    fn unsigned_bits_required_matches_pow2_boundaries() {
        assert_eq!(unsigned_bits_required(0), 1);
        assert_eq!(unsigned_bits_required(255), 8);
        assert_eq!(unsigned_bits_required(256), 9);
    }

    #[test]
    fn packed_int_array_round_trips_values() {
        let arr = PackedIntArray::from_values(vec![1, 2, 300, 70000]);
        assert_eq!(arr.bits_per_value(), 24);
        assert_eq!(arr.get(2), 300);
        assert_eq!(arr.get(3), 70000);
    }
}
