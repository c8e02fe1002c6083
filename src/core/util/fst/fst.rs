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

//! `Fst<O>` ties the `NodeEncoder` (build side) and `ArcReader` (read
//! side) together on one struct, the way the source does, rather than
//! splitting them into a builder type and a reader type. A node's bytes
//! are always written forward then the node's own range is reversed in
//! place (see `bytes_store`'s docs); a reverse reader walking backward
//! from the node's returned address therefore reconstructs the original
//! write order. Packed FSTs are the one exception: the packer re-emits
//! every node in genuinely forward, unreversed form (§6 of the format
//! this mirrors requires outputs to read correctly from *either*
//! direction), so a packed `Fst` is read with a forward reader instead.
//! `Fst::packed` selects which cursor `get_bytes_reader` — and every
//! `fixed_slot_position` computation — uses.

use core::util::fst::arc::{
    Arc, ARCS_AS_FIXED_ARRAY, BIT_ARC_HAS_FINAL_OUTPUT, BIT_ARC_HAS_OUTPUT, BIT_FINAL_ARC,
    BIT_LAST_ARC, BIT_STOP_NODE, BIT_TARGET_DELTA, BIT_TARGET_NEXT,
};
use core::util::fst::bytes_store::{BytesReader, BytesStore};
use core::util::fst::node::PendingNode;
use core::util::packed::{GrowableWriter, PackedIntArray};
use core::util::fst::{read_label, write_label, InputType, Outputs, END_LABEL, FINAL_END_NODE,
                       NON_FINAL_END_NODE, VERSION_PACKED, VERSION_VINT_TARGET};
use error::{ErrorKind, Result};

/// A compiled node's address, or (during a packing build) its ordinal.
/// Real nodes are strictly positive; see the sentinels in the parent
/// module.
pub type CompiledAddress = i64;

/// Knobs the `NodeEncoder` write path is parameterized by.
#[derive(Clone, Copy, Debug)]
pub struct FstCompilerConfig {
    pub allow_array_arcs: bool,
    /// When set, the build maintains the node-ordinal/in-degree tables
    /// a later `pack` call needs, and `add_node` returns ordinals
    /// rather than byte addresses.
    pub will_pack_fst: bool,
}

impl Default for FstCompilerConfig {
    fn default() -> Self {
        FstCompilerConfig {
            allow_array_arcs: true,
            will_pack_fst: false,
        }
    }
}

/// One arc of a `will_pack_fst` intermediate node, as handed to the
/// `Packer` by `Fst::read_node_for_pack`.
pub(crate) struct PackArc<V> {
    pub label: i32,
    pub output: V,
    pub next_final_output: V,
    pub is_final: bool,
    pub is_last: bool,
    pub target: PackTarget,
}

pub(crate) enum PackTarget {
    FinalEnd,
    NonFinalEnd,
    Ordinal(u64),
}

/// Root-arc cache: one slot per label in `0..128`.
const CACHED_ROOT_ARCS: usize = 128;

/// Distance-from-root / arc-count thresholds past which `NodeEncoder`
/// switches a node to fixed-array form (§4.3).
const FIXED_ARRAY_SHALLOW_DEPTH: usize = 3;
const FIXED_ARRAY_SHALLOW_MIN_ARCS: usize = 5;
const FIXED_ARRAY_MIN_ARCS: usize = 10;

pub struct Fst<O: Outputs> {
    pub input_type: InputType,
    bytes_store: BytesStore,
    start_node: CompiledAddress,
    empty_output: Option<O::Value>,
    pub node_count: u64,
    pub arc_count: u64,
    pub arc_with_output_count: u64,
    outputs: O,
    cached_root_arcs: Vec<Option<Arc<O::Value>>>,
    node_ref_to_address: Option<PackedIntArray>,
    /// Packed FSTs are read forward, unreversed; unpacked FSTs are read
    /// with a reverse cursor over per-node reversed bytes.
    packed: bool,
    version: i32,
    config: FstCompilerConfig,

    // Build-only bookkeeping; `None` once `will_pack_fst` is false.
    last_frozen_node: CompiledAddress,
    node_address: Option<GrowableWriter>,
    in_counts: Option<GrowableWriter>,
    // Depth-from-root at the time each ordinal's node was compiled; the
    // `Packer` needs this to re-apply the fixed-array-layout thresholds
    // (§4.3) when it re-emits a node, since that decision depends on
    // depth and the serialized byte stream no longer carries it.
    depths: Option<GrowableWriter>,
    finished: bool,
}

impl<O: Outputs> Fst<O> {
    pub fn new(input_type: InputType, outputs: O, config: FstCompilerConfig) -> Self {
        let mut bytes_store = BytesStore::with_default_block_bits();
        // Byte offset 0 is reserved; real nodes never land there.
        bytes_store.write_byte(0);
        let (node_address, in_counts, depths) = if config.will_pack_fst {
            (
                Some(GrowableWriter::new(16, 8)),
                Some(GrowableWriter::new(16, 8)),
                Some(GrowableWriter::new(16, 8)),
            )
        } else {
            (None, None, None)
        };
        Fst {
            input_type,
            bytes_store,
            start_node: NON_FINAL_END_NODE,
            empty_output: None,
            node_count: 0,
            arc_count: 0,
            arc_with_output_count: 0,
            outputs,
            cached_root_arcs: vec![None; CACHED_ROOT_ARCS],
            node_ref_to_address: None,
            packed: false,
            version: VERSION_VINT_TARGET,
            config,
            last_frozen_node: NON_FINAL_END_NODE,
            node_address,
            in_counts,
            depths,
            finished: false,
        }
    }

    pub fn outputs(&self) -> &O {
        &self.outputs
    }

    pub fn no_output(&self) -> O::Value {
        self.outputs.no_output()
    }

    pub fn is_packed(&self) -> bool {
        self.packed
    }

    pub fn empty_output(&self) -> Option<&O::Value> {
        self.empty_output.as_ref()
    }

    pub fn start_node(&self) -> CompiledAddress {
        self.start_node
    }

    fn should_expand_node_with_fixed_array(&self, node: &PendingNode<O>) -> bool {
        if !self.config.allow_array_arcs {
            return false;
        }
        let n = node.num_arcs();
        (node.depth <= FIXED_ARRAY_SHALLOW_DEPTH && n >= FIXED_ARRAY_SHALLOW_MIN_ARCS)
            || n >= FIXED_ARRAY_MIN_ARCS
    }

    fn vint_byte_len(mut v: i32) -> usize {
        let mut len = 1;
        loop {
            v = ((v as u32) >> 7) as i32;
            if v == 0 {
                return len;
            }
            len += 1;
        }
    }

    /// Serializes one compiled node (`NodeEncoder::add_node`). Returns
    /// the sentinel end nodes directly for an arcless node, otherwise
    /// the node's freshly-written address (or, in a `will_pack_fst`
    /// build, its ordinal).
    pub fn add_node(&mut self, node: &PendingNode<O>) -> Result<CompiledAddress> {
        if node.arcs.is_empty() {
            return Ok(if node.is_final {
                FINAL_END_NODE
            } else {
                NON_FINAL_END_NODE
            });
        }

        let start_address = self.bytes_store.get_position();
        let do_fixed_array = self.should_expand_node_with_fixed_array(node);
        let last_idx = node.arcs.len() - 1;

        let mut arc_starts: Vec<i64> = Vec::with_capacity(node.arcs.len());
        for (i, arc) in node.arcs.iter().enumerate() {
            arc_starts.push(self.bytes_store.get_position());

            let mut flags = 0u8;
            if i == last_idx {
                flags |= BIT_LAST_ARC;
            }
            let target_is_next =
                !do_fixed_array && arc.target > 0 && arc.target == self.last_frozen_node;
            if target_is_next {
                flags |= BIT_TARGET_NEXT;
            }
            if arc.is_final {
                flags |= BIT_FINAL_ARC;
                if arc.next_final_output != self.outputs.no_output() {
                    flags |= BIT_ARC_HAS_FINAL_OUTPUT;
                }
            }
            let target_has_arcs = arc.target > 0;
            if !target_has_arcs {
                flags |= BIT_STOP_NODE;
            }
            if arc.output != self.outputs.no_output() {
                flags |= BIT_ARC_HAS_OUTPUT;
                self.arc_with_output_count += 1;
            }

            self.bytes_store.write_byte(flags);
            write_label(&mut self.bytes_store, self.input_type, arc.label)?;
            if flags & BIT_ARC_HAS_OUTPUT != 0 {
                self.outputs.write(&arc.output, &mut self.bytes_store)?;
            }
            if flags & BIT_ARC_HAS_FINAL_OUTPUT != 0 {
                self.outputs
                    .write_final_output(&arc.next_final_output, &mut self.bytes_store)?;
            }
            if target_has_arcs && !target_is_next {
                self.bytes_store.write_vlong(arc.target);
            }
            self.arc_count += 1;
        }

        if do_fixed_array {
            self.expand_to_fixed_array(start_address, &arc_starts)?;
        }

        let end = self.bytes_store.get_position();
        self.bytes_store.reverse(start_address, end - 1);
        let node_address = end - 1;

        self.node_count += 1;
        let returned = if self.config.will_pack_fst {
            let ordinal = self.node_count as usize;
            self.node_address
                .as_mut()
                .unwrap()
                .set(ordinal, node_address);
            self.depths
                .as_mut()
                .unwrap()
                .set(ordinal, node.depth as i64);
            if let Some(ref mut in_counts) = self.in_counts {
                for arc in &node.arcs {
                    if arc.target > 0 {
                        let idx = arc.target as usize;
                        in_counts.ensure_size(idx + 1);
                        let prev = in_counts.get(idx);
                        in_counts.set(idx, prev + 1);
                    }
                }
            }
            ordinal as CompiledAddress
        } else {
            node_address
        };

        self.last_frozen_node = returned;
        Ok(returned)
    }

    /// Re-expands a just-written run of natural-length arcs into equal
    /// `bytes_per_arc` slots behind an `ARCS_AS_FIXED_ARRAY` header,
    /// moving arcs highest-index-first so every overlapping copy moves
    /// bytes strictly forward (§4.3).
    fn expand_to_fixed_array(&mut self, start_address: i64, arc_starts: &[i64]) -> Result<()> {
        let n = arc_starts.len();
        let end_natural = self.bytes_store.get_position();
        let mut lens = Vec::with_capacity(n);
        for i in 0..n {
            let next = if i + 1 < n { arc_starts[i + 1] } else { end_natural };
            lens.push(next - arc_starts[i]);
        }
        let bytes_per_arc = lens.iter().cloned().max().unwrap_or(0);
        let header_len = 1
            + Self::vint_byte_len(n as i32) as i64
            + Self::vint_byte_len(bytes_per_arc as i32) as i64;

        let new_end = start_address + header_len + n as i64 * bytes_per_arc;
        let grow = new_end - end_natural;
        if grow > 0 {
            self.bytes_store.skip_bytes(grow as usize);
        }

        for i in (0..n).rev() {
            let old_start = arc_starts[i];
            let new_start = start_address + header_len + i as i64 * bytes_per_arc;
            self.bytes_store.copy_bytes(old_start, new_start, lens[i] as usize);
        }

        let mut header = Vec::with_capacity(header_len as usize);
        header.push(ARCS_AS_FIXED_ARRAY);
        Self::push_vint(&mut header, n as i32);
        Self::push_vint(&mut header, bytes_per_arc as i32);
        debug_assert_eq!(header.len() as i64, header_len);
        self.bytes_store.set_bytes(start_address, &header);
        Ok(())
    }

    fn push_vint(out: &mut Vec<u8>, mut v: i32) {
        loop {
            let b = (v & 0x7F) as u8;
            v = ((v as u32) >> 7) as i32;
            if v != 0 {
                out.push(b | 0x80);
            } else {
                out.push(b);
                break;
            }
        }
    }

    /// Records the output for the empty input sequence, merging with
    /// any value already set.
    pub fn set_empty_output(&mut self, output: O::Value) {
        self.empty_output = Some(match self.empty_output.take() {
            Some(existing) => self.outputs.merge(&existing, &output),
            None => output,
        });
    }

    /// Freezes the start pointer and populates the root-arc cache.
    pub fn finish(&mut self, start_node: CompiledAddress) -> Result<()> {
        if self.finished {
            bail!(ErrorKind::IllegalState("finish called twice".to_owned()));
        }
        self.start_node = start_node;
        self.bytes_store.finish();
        self.populate_root_cache()?;
        self.finished = true;
        Ok(())
    }

    fn populate_root_cache(&mut self) -> Result<()> {
        if self.start_node <= 0 {
            return Ok(());
        }
        let no_output = self.outputs.no_output();
        let mut arc = Arc::new(no_output);
        let mut reader = self.get_bytes_reader();
        self.read_first_real_target_arc(self.start_node, &mut arc, &mut *reader)?;
        loop {
            if arc.label >= 0 && (arc.label as usize) < CACHED_ROOT_ARCS {
                self.cached_root_arcs[arc.label as usize] = Some(arc.clone());
            }
            if arc.is_last() {
                break;
            }
            self.read_next_real_arc(&mut arc, &mut *reader)?;
        }
        Ok(())
    }

    pub fn get_bytes_reader(&self) -> Box<dyn BytesReader + '_> {
        if self.packed {
            Box::new(self.bytes_store.get_forward_reader())
        } else {
            Box::new(self.bytes_store.get_reverse_reader())
        }
    }

    fn fixed_slot_position(&self, pos_arcs_start: i64, bytes_per_arc: i64, arc_idx: i64) -> i64 {
        if self.packed {
            pos_arcs_start + arc_idx * bytes_per_arc
        } else {
            pos_arcs_start - arc_idx * bytes_per_arc
        }
    }

    /// Initializes `arc` as the virtual incoming arc to the start node.
    pub fn get_first_arc(&self, arc: &mut Arc<O::Value>) {
        let no_output = self.outputs.no_output();
        arc.output = no_output.clone();
        if let Some(empty) = &self.empty_output {
            arc.flags = BIT_FINAL_ARC | BIT_LAST_ARC;
            arc.next_final_output = empty.clone();
        } else {
            arc.flags = 0;
            arc.next_final_output = no_output;
        }
        arc.label = END_LABEL;
        arc.target = self.start_node;
    }

    pub fn read_first_target_arc(
        &self,
        follow: &Arc<O::Value>,
        arc: &mut Arc<O::Value>,
        reader: &mut dyn BytesReader,
    ) -> Result<()> {
        if follow.is_final() {
            arc.label = END_LABEL;
            arc.output = follow.next_final_output.clone();
            arc.next_final_output = self.outputs.no_output();
            arc.flags = BIT_FINAL_ARC | if follow.target <= 0 { BIT_LAST_ARC } else { 0 };
            arc.target = FINAL_END_NODE;
            if follow.target > 0 {
                // The node is also final, but has real arcs of its own;
                // leave the cursor positioned so a following
                // read_next_real_arc enumerates them.
                arc.next_arc = follow.target;
            }
            Ok(())
        } else {
            self.read_first_real_target_arc(follow.target, arc, reader)
        }
    }

    pub fn read_first_real_target_arc(
        &self,
        node: CompiledAddress,
        arc: &mut Arc<O::Value>,
        reader: &mut dyn BytesReader,
    ) -> Result<()> {
        reader.set_position(node);
        let marker = reader.read_byte()?;
        if marker == ARCS_AS_FIXED_ARRAY {
            let num_arcs = reader.read_vint()?;
            let bytes_per_arc = reader.read_vint()?;
            arc.num_arcs = i64::from(num_arcs);
            arc.bytes_per_arc = i64::from(bytes_per_arc);
            arc.pos_arcs_start = reader.get_position();
            arc.arc_idx = -1;
        } else {
            arc.bytes_per_arc = 0;
            arc.next_arc = node;
        }
        self.read_next_real_arc(arc, reader)
    }

    pub fn read_next_real_arc(
        &self,
        arc: &mut Arc<O::Value>,
        reader: &mut dyn BytesReader,
    ) -> Result<()> {
        let pos = if arc.is_in_fixed_array() {
            arc.arc_idx += 1;
            self.fixed_slot_position(arc.pos_arcs_start, arc.bytes_per_arc, arc.arc_idx)
        } else {
            arc.next_arc
        };
        reader.set_position(pos);
        arc.node = pos;

        let flags = reader.read_byte()?;
        arc.flags = flags;
        arc.label = read_label(reader, self.input_type)?;
        arc.output = if flags & BIT_ARC_HAS_OUTPUT != 0 {
            self.outputs.read(reader)?
        } else {
            self.outputs.no_output()
        };
        arc.next_final_output = if flags & BIT_ARC_HAS_FINAL_OUTPUT != 0 {
            self.outputs.read_final_output(reader)?
        } else {
            self.outputs.no_output()
        };

        // Position immediately after this arc's flags/label/output/
        // final-output fields, i.e. where a linear sibling scan (or the
        // eventual `next_arc` bookkeeping below) must resume once target
        // resolution is done mutating the reader's cursor.
        let after_fields = reader.get_position();

        arc.target = if flags & BIT_STOP_NODE != 0 {
            if flags & BIT_FINAL_ARC != 0 {
                FINAL_END_NODE
            } else {
                bail!(ErrorKind::FormatError(
                    "reached a non-final dead end".to_owned()
                ));
            }
        } else if flags & BIT_TARGET_NEXT != 0 {
            if self.packed {
                arc.node - 1
            } else {
                let mut scratch = arc.clone();
                scratch.next_arc = after_fields;
                let target = self.seek_to_next_node(scratch, reader)?;
                reader.set_position(after_fields);
                target
            }
        } else {
            // `code` is read as a vlong starting at `after_fields`; a
            // TARGET_DELTA offset is relative to the position *before*
            // that vlong, matching how the packer computed it
            // (`delta = target_addr - field_pos`), not the position
            // after it.
            let code = reader.read_vlong()?;
            if self.packed && flags & BIT_TARGET_DELTA != 0 {
                after_fields + code
            } else if self.packed {
                match &self.node_ref_to_address {
                    Some(table) if (code as usize) < table.size() => table.get(code as usize),
                    _ => code,
                }
            } else {
                code
            }
        };

        if !arc.is_in_fixed_array() {
            arc.next_arc = reader.get_position();
        }
        Ok(())
    }

    /// Scans forward through this node's remaining linear arcs (each
    /// fully parsed, but discarded) until the last one, returning the
    /// address immediately following it — which, thanks to the
    /// per-node reversal, is the node written immediately before this
    /// one.
    fn seek_to_next_node(
        &self,
        mut scratch: Arc<O::Value>,
        reader: &mut dyn BytesReader,
    ) -> Result<i64> {
        if scratch.is_last() {
            return Ok(reader.get_position());
        }
        loop {
            self.read_next_real_arc(&mut scratch, reader)?;
            if scratch.is_last() {
                return Ok(reader.get_position());
            }
        }
    }

    pub fn read_last_target_arc(
        &self,
        follow: &Arc<O::Value>,
        arc: &mut Arc<O::Value>,
        reader: &mut dyn BytesReader,
    ) -> Result<()> {
        if !follow.is_final() {
            self.read_first_real_target_arc(follow.target, arc, reader)?;
            if arc.is_in_fixed_array() {
                arc.arc_idx = arc.num_arcs - 2;
                return self.read_next_real_arc(arc, reader);
            }
            while !arc.is_last() {
                self.read_next_real_arc(arc, reader)?;
            }
            return Ok(());
        }
        if follow.target <= 0 {
            arc.label = END_LABEL;
            arc.output = follow.next_final_output.clone();
            arc.next_final_output = self.outputs.no_output();
            arc.flags = BIT_FINAL_ARC | BIT_LAST_ARC;
            arc.target = FINAL_END_NODE;
            return Ok(());
        }
        self.read_first_real_target_arc(follow.target, arc, reader)?;
        if arc.is_in_fixed_array() {
            arc.arc_idx = arc.num_arcs - 2;
            self.read_next_real_arc(arc, reader)?;
        } else {
            while !arc.is_last() {
                self.read_next_real_arc(arc, reader)?;
            }
        }
        Ok(())
    }

    pub fn read_next_arc_label(
        &self,
        arc: &Arc<O::Value>,
        reader: &mut dyn BytesReader,
    ) -> Result<i32> {
        if arc.is_in_fixed_array() {
            let pos = self.fixed_slot_position(arc.pos_arcs_start, arc.bytes_per_arc, arc.arc_idx + 1);
            reader.set_position(pos);
        } else {
            reader.set_position(arc.next_arc);
        }
        reader.read_byte()?;
        read_label(reader, self.input_type)
    }

    /// The primary lookup: positions `arc` on the arc leaving
    /// `follow.target` labeled `label`, or returns `Ok(false)`.
    pub fn find_target_arc(
        &self,
        label: i32,
        follow: &Arc<O::Value>,
        arc: &mut Arc<O::Value>,
        reader: &mut dyn BytesReader,
    ) -> Result<bool> {
        if label == END_LABEL {
            if follow.is_final() {
                arc.label = END_LABEL;
                arc.output = follow.next_final_output.clone();
                arc.next_final_output = self.outputs.no_output();
                arc.flags = BIT_FINAL_ARC | BIT_LAST_ARC;
                arc.target = FINAL_END_NODE;
                return Ok(true);
            }
            return Ok(false);
        }

        if follow.target == self.start_node && label >= 0 && (label as usize) < CACHED_ROOT_ARCS {
            return match &self.cached_root_arcs[label as usize] {
                Some(cached) => {
                    *arc = cached.clone();
                    Ok(true)
                }
                None => Ok(false),
            };
        }

        if follow.target <= 0 {
            return Ok(false);
        }

        self.read_first_real_target_arc(follow.target, arc, reader)?;
        if arc.is_in_fixed_array() {
            let mut low = 0i64;
            let mut high = arc.num_arcs - 1;
            while low <= high {
                let mid = (low + high) / 2;
                let pos = self.fixed_slot_position(arc.pos_arcs_start, arc.bytes_per_arc, mid);
                reader.set_position(pos);
                reader.read_byte()?;
                let mid_label = read_label(reader, self.input_type)?;
                if mid_label == label {
                    arc.arc_idx = mid - 1;
                    self.read_next_real_arc(arc, reader)?;
                    return Ok(true);
                } else if mid_label < label {
                    low = mid + 1;
                } else {
                    high = mid - 1;
                }
            }
            return Ok(false);
        }

        loop {
            if arc.label == label {
                return Ok(true);
            } else if arc.label > label || arc.is_last() {
                return Ok(false);
            }
            self.read_next_real_arc(arc, reader)?;
        }
    }

    // --- Packing ---------------------------------------------------

    pub fn do_pack_fst(&self) -> bool {
        self.config.will_pack_fst
    }

    pub(crate) fn allow_array_arcs(&self) -> bool {
        self.config.allow_array_arcs
    }

    pub(crate) fn node_address_table(&self) -> Option<&GrowableWriter> {
        self.node_address.as_ref()
    }

    pub(crate) fn in_counts_table(&self) -> Option<&GrowableWriter> {
        self.in_counts.as_ref()
    }

    pub(crate) fn drop_in_counts(&mut self) {
        self.in_counts = None;
    }

    pub(crate) fn depths_table(&self) -> Option<&GrowableWriter> {
        self.depths.as_ref()
    }

    pub(crate) fn empty_output_owned(&self) -> Option<O::Value> {
        self.empty_output.clone()
    }

    pub(crate) fn outputs_owned(&self) -> O {
        self.outputs.clone()
    }

    /// Reads one node of a `will_pack_fst` intermediate build (addressed
    /// by ordinal, not by byte position) for the `Packer`. Targets come
    /// back as a `PackTarget` rather than a raw `CompiledAddress`: in
    /// this intermediate form a `TARGET_NEXT` arc's target is the
    /// *current* node's ordinal minus one (mirroring how a packed `Fst`
    /// resolves the same flag via `arc.node - 1`), while every other
    /// real target is already the ordinal `add_node` returned for it.
    pub(crate) fn read_node_for_pack(&self, ordinal: u64) -> Result<Vec<PackArc<O::Value>>> {
        let address = self.node_address.as_ref().unwrap().get(ordinal as usize);
        let mut reader = self.bytes_store.get_reverse_reader_at(address);
        let marker = reader.read_byte()?;
        let fixed = marker == ARCS_AS_FIXED_ARRAY;
        let (mut pos_arcs_start, mut bytes_per_arc, mut arc_idx) = (0i64, 0i64, -1i64);
        if fixed {
            let num_arcs = reader.read_vint()?;
            let bpa = reader.read_vint()?;
            bytes_per_arc = i64::from(bpa);
            pos_arcs_start = reader.get_position();
            let _ = num_arcs;
        } else {
            reader.set_position(address);
        }

        let mut arcs = Vec::new();
        loop {
            if fixed {
                arc_idx += 1;
                reader.set_position(pos_arcs_start - arc_idx * bytes_per_arc);
            }
            let flags = reader.read_byte()?;
            let label = read_label(&mut reader, self.input_type)?;
            let output = if flags & BIT_ARC_HAS_OUTPUT != 0 {
                self.outputs.read(&mut reader)?
            } else {
                self.outputs.no_output()
            };
            let next_final_output = if flags & BIT_ARC_HAS_FINAL_OUTPUT != 0 {
                self.outputs.read_final_output(&mut reader)?
            } else {
                self.outputs.no_output()
            };
            let is_final = flags & BIT_FINAL_ARC != 0;
            let is_last = flags & BIT_LAST_ARC != 0;
            let target = if flags & BIT_STOP_NODE != 0 {
                if is_final {
                    PackTarget::FinalEnd
                } else {
                    bail!(ErrorKind::FormatError(
                        "reached a non-final dead end".to_owned()
                    ));
                }
            } else if flags & BIT_TARGET_NEXT != 0 {
                PackTarget::Ordinal(ordinal - 1)
            } else {
                let code = reader.read_vlong()?;
                PackTarget::Ordinal(code as u64)
            };
            arcs.push(PackArc {
                label,
                output,
                next_final_output,
                is_final,
                is_last,
                target,
            });
            if is_last {
                break;
            }
        }
        Ok(arcs)
    }

    /// Assembles a packed `Fst` from pieces the `Packer` has already
    /// written into a fresh forward-addressed `BytesStore`.
    pub(crate) fn from_packed_parts(
        input_type: InputType,
        outputs: O,
        bytes_store: BytesStore,
        start_node: CompiledAddress,
        empty_output: Option<O::Value>,
        node_count: u64,
        arc_count: u64,
        arc_with_output_count: u64,
        node_ref_to_address: PackedIntArray,
    ) -> Result<Self> {
        let mut fst = Fst {
            input_type,
            bytes_store,
            start_node,
            empty_output,
            node_count,
            arc_count,
            arc_with_output_count,
            outputs,
            cached_root_arcs: vec![None; CACHED_ROOT_ARCS],
            node_ref_to_address: Some(node_ref_to_address),
            packed: true,
            version: VERSION_VINT_TARGET,
            config: FstCompilerConfig {
                allow_array_arcs: true,
                will_pack_fst: false,
            },
            last_frozen_node: NON_FINAL_END_NODE,
            node_address: None,
            in_counts: None,
            depths: None,
            finished: false,
        };
        fst.bytes_store.finish();
        fst.populate_root_cache()?;
        fst.finished = true;
        Ok(fst)
    }

    // --- Save / load -------------------------------------------------

    pub fn save(&self, out: &mut Vec<u8>) -> Result<()> {
        if !self.finished {
            bail!(ErrorKind::IllegalState(
                "save called before finish".to_owned()
            ));
        }
        out.extend_from_slice(b"FST");
        out.extend_from_slice(&self.version.to_be_bytes());
        out.push(self.packed as u8);
        match &self.empty_output {
            Some(value) => {
                out.push(1);
                let mut scratch = BytesStore::with_default_block_bits();
                self.outputs.write_final_output(value, &mut scratch)?;
                let len = scratch.get_position();
                let mut bytes = vec![0u8; len as usize];
                let mut reader = scratch.get_forward_reader();
                reader.read_bytes(&mut bytes)?;
                if !self.packed {
                    bytes.reverse();
                }
                write_vint_to(out, len as i32);
                out.extend_from_slice(&bytes);
            }
            None => out.push(0),
        }
        out.push(self.input_type.to_tag());
        if self.packed {
            let table = self.node_ref_to_address.as_ref().unwrap();
            write_vint_to(out, table.size() as i32);
            write_vint_to(out, table.bits_per_value() as i32);
            for v in table.values() {
                write_vlong_to(out, *v);
            }
        }
        write_vlong_to(out, self.start_node);
        write_vlong_to(out, self.node_count as i64);
        write_vlong_to(out, self.arc_count as i64);
        write_vlong_to(out, self.arc_with_output_count as i64);

        let total = self.bytes_store.get_position();
        write_vlong_to(out, total);
        let mut buf = vec![0u8; total as usize];
        let mut reader = self.bytes_store.get_forward_reader();
        reader.read_bytes(&mut buf)?;
        out.extend_from_slice(&buf);
        Ok(())
    }

    pub fn load(data: &[u8], outputs: O) -> Result<Self> {
        let mut pos = 0usize;
        if data.len() < 3 || &data[0..3] != b"FST" {
            bail!(ErrorKind::FormatError("bad codec header".to_owned()));
        }
        pos += 3;
        let version = i32::from_be_bytes([data[pos], data[pos + 1], data[pos + 2], data[pos + 3]]);
        pos += 4;
        if version < VERSION_PACKED || version > VERSION_VINT_TARGET {
            bail!(ErrorKind::FormatError(format!(
                "unsupported version: {}",
                version
            )));
        }
        let packed = data[pos] != 0;
        pos += 1;

        let has_empty = data[pos] != 0;
        pos += 1;
        let empty_output = if has_empty {
            let (len, n) = read_vint_from(&data[pos..]);
            pos += n;
            let mut bytes = data[pos..pos + len as usize].to_vec();
            pos += len as usize;
            if !packed {
                bytes.reverse();
            }
            let mut scratch = BytesStore::with_default_block_bits();
            scratch.write_bytes(&bytes);
            let mut reader = scratch.get_forward_reader();
            Some(outputs.read_final_output(&mut reader)?)
        } else {
            None
        };

        let tag = data[pos];
        pos += 1;
        let input_type = InputType::from_tag(tag)?;

        let node_ref_to_address = if packed {
            let (size, n) = read_vint_from(&data[pos..]);
            pos += n;
            let (bits, n) = read_vint_from(&data[pos..]);
            pos += n;
            let mut values = Vec::with_capacity(size as usize);
            for _ in 0..size {
                let (v, n) = read_vlong_from(&data[pos..]);
                pos += n;
                values.push(v);
            }
            Some(PackedIntArray::from_raw(bits as u32, values))
        } else {
            None
        };

        let (start_node, n) = read_vlong_from(&data[pos..]);
        pos += n;
        let (node_count, n) = read_vlong_from(&data[pos..]);
        pos += n;
        let (arc_count, n) = read_vlong_from(&data[pos..]);
        pos += n;
        let (arc_with_output_count, n) = read_vlong_from(&data[pos..]);
        pos += n;
        let (total_arc_bytes, n) = read_vlong_from(&data[pos..]);
        pos += n;
        let arc_bytes = &data[pos..pos + total_arc_bytes as usize];

        let mut bytes_store = BytesStore::with_default_block_bits();
        bytes_store.write_bytes(arc_bytes);
        bytes_store.finish();

        let config = FstCompilerConfig {
            allow_array_arcs: true,
            will_pack_fst: false,
        };
        let mut fst = Fst {
            input_type,
            bytes_store,
            start_node,
            empty_output,
            node_count: node_count as u64,
            arc_count: arc_count as u64,
            arc_with_output_count: arc_with_output_count as u64,
            outputs,
            cached_root_arcs: vec![None; CACHED_ROOT_ARCS],
            node_ref_to_address,
            packed,
            version,
            config,
            last_frozen_node: NON_FINAL_END_NODE,
            node_address: None,
            in_counts: None,
            depths: None,
            finished: false,
        };
        fst.populate_root_cache()?;
        fst.finished = true;
        Ok(fst)
    }
}

fn write_vint_to(out: &mut Vec<u8>, mut v: i32) {
    loop {
        let b = (v & 0x7F) as u8;
        v = ((v as u32) >> 7) as i32;
        if v != 0 {
            out.push(b | 0x80);
        } else {
            out.push(b);
            break;
        }
    }
}

fn write_vlong_to(out: &mut Vec<u8>, mut v: i64) {
    loop {
        let b = (v & 0x7F) as u8;
        v = ((v as u64) >> 7) as i64;
        if v != 0 {
            out.push(b | 0x80);
        } else {
            out.push(b);
            break;
        }
    }
}

fn read_vint_from(data: &[u8]) -> (i32, usize) {
    let mut result = 0i32;
    let mut shift = 0;
    let mut n = 0;
    loop {
        let b = data[n];
        n += 1;
        result |= i32::from(b & 0x7F) << shift;
        if b & 0x80 == 0 {
            return (result, n);
        }
        shift += 7;
    }
}

fn read_vlong_from(data: &[u8]) -> (i64, usize) {
    let mut result = 0i64;
    let mut shift = 0;
    let mut n = 0;
    loop {
        let b = data[n];
        n += 1;
        result |= i64::from(b & 0x7F) << shift;
        if b & 0x80 == 0 {
            return (result, n);
        }
        shift += 7;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::util::fst::node::{PendingArc, PendingNode};
    use core::util::fst::outputs::Int64Outputs;

    fn build_cat_car_cart() -> Fst<Int64Outputs> {
        // Hand-compiled trie for "cat"->3, "car"->5, "cart"->7, built
        // bottom-up the way the compiler would, with no suffix sharing.
        let outputs = Int64Outputs;
        let mut fst = Fst::new(InputType::Byte1, outputs, FstCompilerConfig::default());

        // "cart" tail: depth3 node reached via "car", with its own 't'
        // arc (final, output 7) continuing past "car". The arc's target
        // stays the default 0: a terminal arc never needs a real node
        // of its own behind it, since `add_node` shortcuts an arcless
        // node straight to the `FINAL_END_NODE`/`NON_FINAL_END_NODE`
        // sentinel without ever looking at that node's own fields — an
        // output can only reach a lookup by riding an arc into the
        // node, never by sitting on the node that gets shortcut away.
        let mut depth3 = PendingNode::<Int64Outputs>::new(0, 3);
        let mut arc_t2 = PendingArc::<Int64Outputs>::new('t' as i32, 0);
        arc_t2.is_final = true;
        arc_t2.output = 7;
        depth3.arcs.push(arc_t2);
        let depth3_addr = fst.add_node(&depth3).unwrap();

        // depth2 node after "ca": arcs 't' (final, output 3) and 'r' -> depth3
        let mut depth2 = PendingNode::<Int64Outputs>::new(0, 2);
        let mut arc_t = PendingArc::<Int64Outputs>::new('t' as i32, 0);
        arc_t.is_final = true;
        arc_t.output = 3;
        let mut arc_r = PendingArc::<Int64Outputs>::new('r' as i32, 0);
        arc_r.is_final = true;
        arc_r.output = 5;
        arc_r.target = depth3_addr;
        depth2.arcs.push(arc_t);
        depth2.arcs.push(arc_r);
        let depth2_addr = fst.add_node(&depth2).unwrap();

        // depth1 node after "c": arc 'a' -> depth2
        let mut depth1 = PendingNode::<Int64Outputs>::new(0, 1);
        let mut arc_a = PendingArc::<Int64Outputs>::new('a' as i32, 0);
        arc_a.target = depth2_addr;
        depth1.arcs.push(arc_a);
        let depth1_addr = fst.add_node(&depth1).unwrap();

        // root: arc 'c' -> depth1
        let mut root = PendingNode::<Int64Outputs>::new(0, 0);
        let mut arc_c = PendingArc::<Int64Outputs>::new('c' as i32, 0);
        arc_c.target = depth1_addr;
        root.arcs.push(arc_c);
        let root_addr = fst.add_node(&root).unwrap();

        fst.finish(root_addr).unwrap();
        fst
    }

    fn lookup(fst: &Fst<Int64Outputs>, input: &[u8]) -> Option<u64> {
        let mut reader = fst.get_bytes_reader();
        let mut arc = Arc::new(fst.no_output());
        fst.get_first_arc(&mut arc);
        let mut total = fst.no_output();
        for &b in input {
            let mut next = Arc::new(fst.no_output());
            if !fst
                .find_target_arc(i32::from(b), &arc, &mut next, &mut *reader)
                .unwrap()
            {
                return None;
            }
            total = fst.outputs().merge(&total, &next.output);
            arc = next;
        }
        let mut end = Arc::new(fst.no_output());
        if !fst
            .find_target_arc(END_LABEL, &arc, &mut end, &mut *reader)
            .unwrap()
        {
            return None;
        }
        Some(fst.outputs().merge(&total, &end.next_final_output))
    }

    #[test]
    fn round_trips_cat_car_cart() {
        let fst = build_cat_car_cart();
        assert_eq!(lookup(&fst, b"cat"), Some(3));
        assert_eq!(lookup(&fst, b"car"), Some(5));
        assert_eq!(lookup(&fst, b"cart"), Some(7));
        assert_eq!(lookup(&fst, b"ca"), None);
        assert_eq!(lookup(&fst, b"carts"), None);
        assert_eq!(fst.node_count, 4);
    }

    #[test]
    fn single_entry_counts() {
        let outputs = Int64Outputs;
        let mut fst = Fst::new(InputType::Byte1, outputs, FstCompilerConfig::default());
        let mut leaf = PendingNode::<Int64Outputs>::new(0, 0);
        let mut arc_a = PendingArc::<Int64Outputs>::new('a' as i32, 0);
        arc_a.is_final = true;
        arc_a.output = 1;
        leaf.arcs.push(arc_a);
        let root_addr = fst.add_node(&leaf).unwrap();
        fst.finish(root_addr).unwrap();

        assert_eq!(fst.node_count, 1);
        assert_eq!(fst.arc_count, 1);
        assert_eq!(fst.arc_with_output_count, 1);
        assert_eq!(lookup(&fst, b"a"), Some(1));
    }

    #[test]
    fn empty_output_only() {
        let outputs = Int64Outputs;
        let mut fst = Fst::new(InputType::Byte1, outputs, FstCompilerConfig::default());
        fst.set_empty_output(42);
        fst.finish(NON_FINAL_END_NODE).unwrap();

        let mut arc = Arc::new(fst.no_output());
        fst.get_first_arc(&mut arc);
        let mut end = Arc::new(fst.no_output());
        let mut reader = fst.get_bytes_reader();
        assert!(fst
            .find_target_arc(END_LABEL, &arc, &mut end, &mut *reader)
            .unwrap());
        assert_eq!(end.next_final_output, 42);
        assert_eq!(lookup(&fst, b"z"), None);
    }

    #[test]
    fn eleven_arc_root_is_fixed_array_and_binary_searchable() {
        let outputs = Int64Outputs;
        let mut fst = Fst::new(InputType::Byte1, outputs, FstCompilerConfig::default());
        let mut root = PendingNode::<Int64Outputs>::new(0, 0);
        for i in 0..11 {
            let label = b'a' + i as u8;
            let mut arc = PendingArc::<Int64Outputs>::new(i32::from(label), 0);
            arc.is_final = true;
            arc.output = u64::from(i) + 1;
            root.arcs.push(arc);
        }
        let root_addr = fst.add_node(&root).unwrap();
        fst.finish(root_addr).unwrap();

        for i in 0..11u8 {
            let label = b'a' + i;
            assert_eq!(lookup(&fst, &[label]), Some(u64::from(i) + 1));
        }
    }

    #[test]
    fn non_root_fixed_array_binary_search_matches_linear_scan() {
        // Force the 11-arc node off the root cache's fast path so
        // `find_target_arc` actually exercises binary search.
        let outputs = Int64Outputs;
        let mut fst = Fst::new(InputType::Byte1, outputs, FstCompilerConfig::default());
        let mut child = PendingNode::<Int64Outputs>::new(0, 1);
        for i in 0..11 {
            let label = b'a' + i as u8;
            let mut arc = PendingArc::<Int64Outputs>::new(i32::from(label), 0);
            arc.is_final = true;
            arc.output = u64::from(i) + 1;
            child.arcs.push(arc);
        }
        let child_addr = fst.add_node(&child).unwrap();

        let mut root = PendingNode::<Int64Outputs>::new(0, 0);
        let mut arc_z = PendingArc::<Int64Outputs>::new('z' as i32, 0);
        arc_z.target = child_addr;
        root.arcs.push(arc_z);
        let root_addr = fst.add_node(&root).unwrap();
        fst.finish(root_addr).unwrap();

        for i in 0..11u8 {
            let label = b'a' + i;
            assert_eq!(lookup(&fst, &[b'z', label]), Some(u64::from(i) + 1));
        }
        assert_eq!(lookup(&fst, b"zl"), None);
        assert_eq!(lookup(&fst, b"y"), None);
    }

    #[test]
    fn save_then_load_round_trips() {
        let fst = build_cat_car_cart();
        let mut bytes = Vec::new();
        fst.save(&mut bytes).unwrap();
        let loaded = Fst::<Int64Outputs>::load(&bytes, Int64Outputs).unwrap();
        assert_eq!(loaded.node_count, fst.node_count);
        assert_eq!(lookup(&loaded, b"cat"), Some(3));
        assert_eq!(lookup(&loaded, b"car"), Some(5));
        assert_eq!(lookup(&loaded, b"cart"), Some(7));
        assert_eq!(lookup(&loaded, b"ca"), None);
    }
}
