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

//! The pending-node representation `Fst::add_node` (the `NodeEncoder`
//! contract) accepts: an already-sorted arc list whose targets are
//! already-compiled addresses. Nothing upstream of this point — the
//! frontier bookkeeping that decides *when* a node is ready to compile
//! — is this module's concern; that lives in `compiler`.

use core::util::fst::fst::CompiledAddress;
use core::util::fst::Outputs;

pub struct PendingArc<O: Outputs> {
    pub label: i32,
    pub target: CompiledAddress,
    pub is_final: bool,
    pub output: O::Value,
    pub next_final_output: O::Value,
}

impl<O: Outputs> PendingArc<O> {
    pub fn new(label: i32, no_output: O::Value) -> Self {
        PendingArc {
            label,
            target: 0,
            is_final: false,
            output: no_output.clone(),
            next_final_output: no_output,
        }
    }
}

impl<O: Outputs> Clone for PendingArc<O> {
    fn clone(&self) -> Self {
        PendingArc {
            label: self.label,
            target: self.target,
            is_final: self.is_final,
            output: self.output.clone(),
            next_final_output: self.next_final_output.clone(),
        }
    }
}

/// A node awaiting serialization: its arcs are sorted by label and
/// every arc's target has already been compiled.
pub struct PendingNode<O: Outputs> {
    pub arcs: Vec<PendingArc<O>>,
    /// Whether the *node itself* is an accepting state (equivalently:
    /// whether the incoming arc should be marked final when this node
    /// has no arcs of its own).
    pub is_final: bool,
    /// The output to surface on the incoming arc's `next_final_output`
    /// when this node is final.
    pub output: O::Value,
    /// Distance from the root along the frontier at the time this node
    /// was opened. Only consulted by the fixed-array-expansion heuristic.
    pub depth: usize,
}

impl<O: Outputs> PendingNode<O> {
    pub fn new(no_output: O::Value, depth: usize) -> Self {
        PendingNode {
            arcs: Vec::new(),
            is_final: false,
            output: no_output,
            depth,
        }
    }

    pub fn num_arcs(&self) -> usize {
        self.arcs.len()
    }
}
