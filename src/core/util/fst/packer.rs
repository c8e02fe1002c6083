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

//! Rewrites a `will_pack_fst` intermediate build into a smaller,
//! forward-addressed `Fst` with a dense-id table for its most-referenced
//! nodes.
//!
//! The intermediate build addresses nodes by ordinal, not by byte
//! position, and carries side tables (`node_address`, `in_counts`,
//! `depths`) the unpacked encoder never needs. `pack` re-emits every
//! node, highest ordinal (closest to the root) first, choosing among
//! four target encodings per arc: `TARGET_NEXT` when the target is the
//! immediately preceding ordinal, a dense-id reference for a node
//! selected into the deref table, a delta from the arc's own field
//! position, or (the rare fallback) the target's absolute address.
//! Because every encoding but the last depends on addresses that are
//! themselves still being decided, addresses are estimated, a full pass
//! is written against the estimate, and the pass repeats until two
//! consecutive passes agree or an iteration cap is hit.

use std::collections::HashMap;

use core::util::fst::arc::{
    BIT_ARC_HAS_FINAL_OUTPUT, BIT_ARC_HAS_OUTPUT, BIT_FINAL_ARC, BIT_LAST_ARC, BIT_STOP_NODE,
    BIT_TARGET_DELTA, BIT_TARGET_NEXT, ARCS_AS_FIXED_ARRAY,
};
use core::util::fst::bytes_store::BytesStore;
use core::util::fst::fst::{CompiledAddress, Fst, PackArc, PackTarget};
use core::util::fst::{write_label, InputType, Outputs};
use core::util::packed::{PackedIntArray, COMPACT};
use error::{ErrorKind, Result};

/// Distance-from-root / arc-count thresholds past which a re-emitted
/// node is written as a fixed-size array rather than a linear chain.
/// Mirrors the thresholds `Fst::add_node` applies on the unpacked path
/// (§4.3); duplicated here because the depth that decision needs isn't
/// recoverable from the serialized bytes alone, only from the `depths`
/// side table the intermediate build kept for this purpose.
const FIXED_ARRAY_SHALLOW_DEPTH: i64 = 3;
const FIXED_ARRAY_SHALLOW_MIN_ARCS: usize = 5;
const FIXED_ARRAY_MIN_ARCS: usize = 10;

/// A bounded number of re-emission passes; in practice two or three
/// passes are enough for estimated addresses to settle. If the cap is
/// hit the last pass's addresses are accepted as-is rather than
/// treating it as an error — the encoding is still correct, it just may
/// carry a few needlessly wide `TARGET_DELTA`/absolute fields.
const MAX_PASSES: usize = 64;

/// Knobs the packing rewrite is parameterized by.
#[derive(Clone, Copy, Debug)]
pub struct PackConfig {
    /// A node needs at least this many incoming arcs to be eligible for
    /// a dense-id slot at all.
    pub min_in_count_deref: u32,
    /// Upper bound on how many nodes get a dense-id slot, independent of
    /// how many clear `min_in_count_deref`.
    pub max_deref_nodes: usize,
    /// Accepted but not consumed: this implementation always packs the
    /// dense-id table to the minimum width its values need, the same
    /// simplification `core::util::packed` documents for `GrowableWriter`,
    /// rather than trading width for fewer future passes.
    pub acceptable_overhead_ratio: f32,
}

impl Default for PackConfig {
    fn default() -> Self {
        PackConfig {
            min_in_count_deref: 2,
            max_deref_nodes: 1 << 18,
            acceptable_overhead_ratio: COMPACT,
        }
    }
}

/// Rewrites `fst` (which must have been built with `will_pack_fst`) into
/// a packed `Fst`. `start_ordinal` is the ordinal `add_node` returned
/// for the automaton's root (or a sentinel end-node constant for an
/// automaton with no real nodes) — the caller passes it directly rather
/// than through `Fst::finish`, since `finish`'s root-arc cache assumes
/// `start_node` is already a byte address.
pub(crate) fn pack<O: Outputs>(
    fst: &mut Fst<O>,
    config: &PackConfig,
    start_ordinal: CompiledAddress,
) -> Result<Fst<O>> {
    if !fst.do_pack_fst() {
        bail!(ErrorKind::IllegalState(
            "pack called on an fst that was not built with will_pack_fst".to_owned()
        ));
    }

    let node_count = fst.node_count;
    let outputs = fst.outputs_owned();
    let empty_output = fst.empty_output_owned();

    if node_count == 0 {
        fst.drop_in_counts();
        return Fst::from_packed_parts(
            fst.input_type,
            outputs,
            BytesStore::with_default_block_bits(),
            start_ordinal,
            empty_output,
            0,
            0,
            0,
            PackedIntArray::from_values(Vec::new()),
        );
    }

    let min_in_count = config.min_in_count_deref.max(1) as i64;
    let mut candidates: Vec<(u64, i64)> = Vec::new();
    if let Some(in_counts) = fst.in_counts_table() {
        for ord in 1..=node_count {
            let count = in_counts.get_checked(ord as usize);
            if count >= min_in_count {
                candidates.push((ord, count));
            }
        }
    }
    candidates.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
    candidates.truncate(config.max_deref_nodes);
    let dense_id: HashMap<u64, u64> = candidates
        .iter()
        .enumerate()
        .map(|(id, &(ord, _))| (ord, id as u64))
        .collect();

    fst.drop_in_counts();

    // Every real node's address must land strictly past the dense-id
    // range, so a plain (non-delta) vlong target can never be
    // misinterpreted as a dense id on read (§6: "a code smaller than
    // the table's size is a dense id, otherwise an absolute address").
    let reserved = dense_id.len().max(1) as i64;
    let allow_array_arcs = fst.allow_array_arcs();
    let input_type = fst.input_type;

    let mut prev_addr = vec![0i64; (node_count + 1) as usize];
    for ord in 1..=node_count {
        prev_addr[ord as usize] = 1 + reserved + ((node_count - ord) as i64) * 4;
    }

    let mut store = BytesStore::with_default_block_bits();
    let mut cur_addr = vec![0i64; (node_count + 1) as usize];

    for _pass in 0..MAX_PASSES {
        store = BytesStore::with_default_block_bits();
        store.write_byte(0);
        store.skip_bytes(reserved as usize);
        cur_addr = vec![0i64; (node_count + 1) as usize];

        for ord in (1..=node_count).rev() {
            let arcs = fst.read_node_for_pack(ord)?;
            let depth = fst
                .depths_table()
                .map(|t| t.get_checked(ord as usize))
                .unwrap_or(0);
            let do_fixed_array = allow_array_arcs
                && ((depth <= FIXED_ARRAY_SHALLOW_DEPTH && arcs.len() >= FIXED_ARRAY_SHALLOW_MIN_ARCS)
                    || arcs.len() >= FIXED_ARRAY_MIN_ARCS);
            let address = write_node(
                &mut store,
                &outputs,
                input_type,
                &arcs,
                ord,
                do_fixed_array,
                &prev_addr,
                &dense_id,
            )?;
            cur_addr[ord as usize] = address;
        }

        if cur_addr == prev_addr {
            break;
        }
        prev_addr = cur_addr.clone();
    }

    let mut node_ref_values = vec![0i64; dense_id.len()];
    for (&ord, &id) in dense_id.iter() {
        node_ref_values[id as usize] = cur_addr[ord as usize];
    }

    let new_start = if start_ordinal <= 0 {
        start_ordinal
    } else {
        cur_addr[start_ordinal as usize]
    };

    Fst::from_packed_parts(
        fst.input_type,
        outputs,
        store,
        new_start,
        empty_output,
        fst.node_count,
        fst.arc_count,
        fst.arc_with_output_count,
        PackedIntArray::from_values(node_ref_values),
    )
}

/// Re-emits one node into `store`, choosing each arc's target encoding
/// against the previous pass's address estimates, and returns the
/// node's own (forward, un-reversed) start address.
fn write_node<O: Outputs>(
    store: &mut BytesStore,
    outputs: &O,
    input_type: InputType,
    arcs: &[PackArc<O::Value>],
    ordinal: u64,
    do_fixed_array: bool,
    prev_addr: &[i64],
    dense_id: &HashMap<u64, u64>,
) -> Result<i64> {
    let no_output = outputs.no_output();
    let start_address = store.get_position();
    let last_idx = arcs.len() - 1;
    let mut arc_starts = Vec::with_capacity(arcs.len());

    for (i, a) in arcs.iter().enumerate() {
        let arc_pos = store.get_position();
        arc_starts.push(arc_pos);

        let is_stop = match a.target {
            PackTarget::FinalEnd | PackTarget::NonFinalEnd => true,
            PackTarget::Ordinal(_) => false,
        };
        if is_stop && !a.is_final {
            bail!(ErrorKind::FormatError(
                "reached a non-final dead end".to_owned()
            ));
        }
        let is_next = !do_fixed_array
            && !is_stop
            && match a.target {
                PackTarget::Ordinal(t) => t + 1 == ordinal,
                _ => false,
            };

        let mut flags = 0u8;
        if i == last_idx {
            flags |= BIT_LAST_ARC;
        }
        if is_next {
            flags |= BIT_TARGET_NEXT;
        }
        if is_stop {
            flags |= BIT_STOP_NODE;
        }
        if a.is_final {
            flags |= BIT_FINAL_ARC;
            if a.next_final_output != no_output {
                flags |= BIT_ARC_HAS_FINAL_OUTPUT;
            }
        }
        if a.output != no_output {
            flags |= BIT_ARC_HAS_OUTPUT;
        }

        store.write_byte(flags);
        write_label(store, input_type, a.label)?;
        if flags & BIT_ARC_HAS_OUTPUT != 0 {
            outputs.write(&a.output, store)?;
        }
        if flags & BIT_ARC_HAS_FINAL_OUTPUT != 0 {
            outputs.write_final_output(&a.next_final_output, store)?;
        }

        if !is_stop && !is_next {
            if let PackTarget::Ordinal(t) = a.target {
                if let Some(&id) = dense_id.get(&t) {
                    store.write_vlong(id as i64);
                } else {
                    let field_pos = store.get_position();
                    let target_addr = prev_addr[t as usize];
                    let delta = target_addr - field_pos;
                    if delta >= 0 {
                        store.write_vlong(delta);
                        store.set_bytes(arc_pos, &[flags | BIT_TARGET_DELTA]);
                    } else {
                        store.write_vlong(target_addr);
                    }
                }
            }
        }
    }

    if do_fixed_array {
        expand_to_fixed_array(store, start_address, &arc_starts)?;
    }

    Ok(start_address)
}

/// Forward-store counterpart of `Fst::expand_to_fixed_array`: the same
/// highest-index-first re-padding, without the final reversal a packed
/// node never undergoes.
fn expand_to_fixed_array(store: &mut BytesStore, start_address: i64, arc_starts: &[i64]) -> Result<()> {
    let n = arc_starts.len();
    let end_natural = store.get_position();
    let mut lens = Vec::with_capacity(n);
    for i in 0..n {
        let next = if i + 1 < n { arc_starts[i + 1] } else { end_natural };
        lens.push(next - arc_starts[i]);
    }
    let bytes_per_arc = lens.iter().cloned().max().unwrap_or(0);
    let header_len = 1 + vint_byte_len(n as i32) + vint_byte_len(bytes_per_arc as i32);

    let new_end = start_address + header_len as i64 + n as i64 * bytes_per_arc;
    let grow = new_end - end_natural;
    if grow > 0 {
        store.skip_bytes(grow as usize);
    }

    for i in (0..n).rev() {
        let old_start = arc_starts[i];
        let new_start = start_address + header_len as i64 + i as i64 * bytes_per_arc;
        store.copy_bytes(old_start, new_start, lens[i] as usize);
    }

    let mut header = Vec::with_capacity(header_len);
    header.push(ARCS_AS_FIXED_ARRAY);
    push_vint(&mut header, n as i32);
    push_vint(&mut header, bytes_per_arc as i32);
    store.set_bytes(start_address, &header);
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

#[cfg(test)]
mod tests {
    use super::*;
    use core::util::fst::arc::Arc;
    use core::util::fst::fst::FstCompilerConfig;
    use core::util::fst::node::{PendingArc, PendingNode};
    use core::util::fst::outputs::Int64Outputs;
    use core::util::fst::END_LABEL;

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

    fn build_cat_car_cart_packable() -> (Fst<Int64Outputs>, CompiledAddress) {
        let config = FstCompilerConfig {
            allow_array_arcs: true,
            will_pack_fst: true,
        };
        let mut fst = Fst::new(InputType::Byte1, Int64Outputs, config);

        let mut depth3 = PendingNode::<Int64Outputs>::new(0, 3);
        let mut arc_t2 = PendingArc::<Int64Outputs>::new('t' as i32, 0);
        arc_t2.is_final = true;
        arc_t2.output = 7;
        depth3.arcs.push(arc_t2);
        let depth3_ord = fst.add_node(&depth3).unwrap();

        let mut depth2 = PendingNode::<Int64Outputs>::new(0, 2);
        let mut arc_t = PendingArc::<Int64Outputs>::new('t' as i32, 0);
        arc_t.is_final = true;
        arc_t.output = 3;
        let mut arc_r = PendingArc::<Int64Outputs>::new('r' as i32, 0);
        arc_r.is_final = true;
        arc_r.output = 5;
        arc_r.target = depth3_ord;
        depth2.arcs.push(arc_t);
        depth2.arcs.push(arc_r);
        let depth2_ord = fst.add_node(&depth2).unwrap();

        let mut depth1 = PendingNode::<Int64Outputs>::new(0, 1);
        let mut arc_a = PendingArc::<Int64Outputs>::new('a' as i32, 0);
        arc_a.target = depth2_ord;
        depth1.arcs.push(arc_a);
        let depth1_ord = fst.add_node(&depth1).unwrap();

        let mut root = PendingNode::<Int64Outputs>::new(0, 0);
        let mut arc_c = PendingArc::<Int64Outputs>::new('c' as i32, 0);
        arc_c.target = depth1_ord;
        root.arcs.push(arc_c);
        let root_ord = fst.add_node(&root).unwrap();

        (fst, root_ord)
    }

    #[test]
    fn pack_preserves_lookups_and_counts() {
        let (mut fst, root_ord) = build_cat_car_cart_packable();
        let unpacked_nodes = fst.node_count;
        let unpacked_arcs = fst.arc_count;

        let packed = pack(&mut fst, &PackConfig::default(), root_ord).unwrap();

        assert!(packed.is_packed());
        assert_eq!(packed.node_count, unpacked_nodes);
        assert_eq!(packed.arc_count, unpacked_arcs);
        assert_eq!(lookup(&packed, b"cat"), Some(3));
        assert_eq!(lookup(&packed, b"car"), Some(5));
        assert_eq!(lookup(&packed, b"cart"), Some(7));
        assert_eq!(lookup(&packed, b"ca"), None);
        assert_eq!(lookup(&packed, b"carts"), None);
    }

    #[test]
    fn pack_on_empty_automaton_round_trips_empty_output() {
        let config = FstCompilerConfig {
            allow_array_arcs: true,
            will_pack_fst: true,
        };
        let mut fst = Fst::new(InputType::Byte1, Int64Outputs, config);
        fst.set_empty_output(42);

        let packed = pack(&mut fst, &PackConfig::default(), NON_FINAL_END_NODE_FOR_TEST).unwrap();
        assert_eq!(packed.node_count, 0);

        let mut arc = Arc::new(packed.no_output());
        packed.get_first_arc(&mut arc);
        let mut end = Arc::new(packed.no_output());
        let mut reader = packed.get_bytes_reader();
        assert!(packed
            .find_target_arc(END_LABEL, &arc, &mut end, &mut *reader)
            .unwrap());
        assert_eq!(end.next_final_output, 42);
    }

    // Local alias so the empty-automaton test reads as a plain literal
    // rather than reaching into the parent module for the sentinel.
    const NON_FINAL_END_NODE_FOR_TEST: CompiledAddress = 0;

    #[test]
    fn pack_uses_dense_id_for_a_heavily_shared_node() {
        // Ten single-char root arcs all target the same final leaf, so
        // that leaf's in-degree clears the default `min_in_count_deref`
        // threshold and lands in the dense-id table.
        let config = FstCompilerConfig {
            allow_array_arcs: true,
            will_pack_fst: true,
        };
        let mut fst = Fst::new(InputType::Byte1, Int64Outputs, config);

        // A real compiled node (not a bare final sentinel) that every
        // root arc below shares as its target.
        let mut shared = PendingNode::<Int64Outputs>::new(0, 1);
        let mut arc_x = PendingArc::<Int64Outputs>::new('x' as i32, 0);
        arc_x.is_final = true;
        arc_x.output = 9;
        shared.arcs.push(arc_x);
        let shared_ord = fst.add_node(&shared).unwrap();

        let mut root = PendingNode::<Int64Outputs>::new(0, 0);
        for i in 0..10u8 {
            let mut arc = PendingArc::<Int64Outputs>::new(i32::from(b'a' + i), 0);
            arc.target = shared_ord;
            root.arcs.push(arc);
        }
        let root_ord = fst.add_node(&root).unwrap();

        let packed = pack(&mut fst, &PackConfig::default(), root_ord).unwrap();
        for i in 0..10u8 {
            assert_eq!(lookup(&packed, &[b'a' + i, b'x']), Some(9));
        }
    }
}
