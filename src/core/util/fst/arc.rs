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

//! The per-arc flag bits and the `Arc` traversal cursor they decorate.

use core::util::fst::fst::CompiledAddress;
use core::util::fst::END_LABEL;

pub const BIT_FINAL_ARC: u8 = 1 << 0;
pub const BIT_LAST_ARC: u8 = 1 << 1;
pub const BIT_TARGET_NEXT: u8 = 1 << 2;
pub const BIT_STOP_NODE: u8 = 1 << 3;
pub const BIT_ARC_HAS_OUTPUT: u8 = 1 << 4;
pub const BIT_ARC_HAS_FINAL_OUTPUT: u8 = 1 << 5;
pub const BIT_TARGET_DELTA: u8 = 1 << 6;

/// Not a legal standalone arc-flags byte (only `BIT_ARC_HAS_FINAL_OUTPUT`
/// set, without `BIT_FINAL_ARC`). Reserved to mean "what follows is a
/// fixed-array node header, not an arc".
pub const ARCS_AS_FIXED_ARRAY: u8 = BIT_ARC_HAS_FINAL_OUTPUT;

/// A mutable traversal cursor. Callers own one per in-flight traversal;
/// `ArcReader` operations read from a `BytesReader` and mutate the
/// fields in place rather than allocating a new `Arc` per step.
#[derive(Clone)]
pub struct Arc<T> {
    pub label: i32,
    pub output: T,
    pub next_final_output: T,
    pub target: CompiledAddress,
    pub flags: u8,
    /// Linear-node reader state: byte position of the next sibling arc.
    /// Meaningless (and unused) once the node is fixed-array.
    pub next_arc: i64,
    /// Fixed-array reader state, valid only when the enclosing node was
    /// written as a fixed-size array.
    pub pos_arcs_start: i64,
    pub bytes_per_arc: i64,
    pub arc_idx: i64,
    pub num_arcs: i64,
    /// Byte position of this arc's own flags byte. Unused except to
    /// resolve TARGET_NEXT in packed FSTs, where the target is this
    /// value minus one rather than derived from sibling scanning.
    pub node: i64,
}

impl<T: Clone> Arc<T> {
    pub fn new(no_output: T) -> Self {
        Arc {
            label: END_LABEL,
            output: no_output.clone(),
            next_final_output: no_output,
            target: 0,
            flags: 0,
            next_arc: 0,
            pos_arcs_start: 0,
            bytes_per_arc: 0,
            arc_idx: 0,
            num_arcs: 0,
            node: 0,
        }
    }
}

impl<T> Arc<T> {
    pub fn is_final(&self) -> bool {
        self.flags & BIT_FINAL_ARC != 0
    }

    pub fn is_last(&self) -> bool {
        self.flags & BIT_LAST_ARC != 0
    }

    pub fn flag(&self, bit: u8) -> bool {
        self.flags & bit != 0
    }

    pub fn is_in_fixed_array(&self) -> bool {
        self.bytes_per_arc != 0
    }
}
