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

//! The thin front end that turns a stream of sorted `(input, output)`
//! pairs into the `PendingNode`s `Fst::add_node` expects.
//!
//! This builder does not share suffixes: two inputs whose tails
//! compile to identical byte sequences get two separate nodes rather
//! than one, and no `NodeHash` dedup table is kept. It also does not
//! push output mass up the tree the way a minimizing builder would — an
//! input's full output always lands on the single arc marking where
//! that input terminates, never split or shared across arcs. Both
//! omissions keep the frontier a plain growable `Vec` with none of the
//! hashing/equality machinery a suffix-sharing builder needs, at the
//! cost of building strictly larger automata than the source does for
//! inputs with shared tails.
//!
//! What it does keep from the source: inputs must arrive already sorted
//! by `IntsRef`'s lexicographic order, and a "frontier" of one open
//! `PendingNode` per depth tracks the path currently being extended,
//! collapsing (freezing) the common-suffix-free tail behind it as each
//! new input's shared-prefix length is discovered.

use core::util::fst::fst::{Fst, FstCompilerConfig};
use core::util::fst::node::{PendingArc, PendingNode};
use core::util::fst::packer::{self, PackConfig};
use core::util::fst::{InputType, Outputs};
use core::util::ints_ref::{IntsRef, IntsRefBuilder};
use error::{ErrorKind, Result};

pub struct FstCompiler<O: Outputs> {
    fst: Fst<O>,
    outputs: O,
    config: FstCompilerConfig,
    pack_config: Option<PackConfig>,
    frontier: Vec<PendingNode<O>>,
    last_input: IntsRefBuilder,
}

impl<O: Outputs> FstCompiler<O> {
    /// `pack_config` controls the post-build `Packer` pass and is only
    /// consulted when `config.will_pack_fst` is set; pass `None` there
    /// to fall back to `PackConfig::default()`.
    pub fn new(
        input_type: InputType,
        outputs: O,
        config: FstCompilerConfig,
        pack_config: Option<PackConfig>,
    ) -> Self {
        let no_output = outputs.no_output();
        let fst = Fst::new(input_type, outputs.clone(), config);
        FstCompiler {
            fst,
            outputs,
            config,
            pack_config,
            frontier: vec![PendingNode::new(no_output, 0)],
            last_input: IntsRefBuilder::new(),
        }
    }

    /// Adds one `(input, output)` pair. `input` must sort strictly
    /// after every input added so far (`IntsRef`'s lexicographic
    /// order); the empty input is the one exception and may be added
    /// at any point, merging into any empty output already set.
    pub fn add(&mut self, input: &IntsRef, output: O::Value) -> Result<()> {
        if input.is_empty() {
            self.fst.set_empty_output(output);
            return Ok(());
        }

        if self.last_input.length > 0 {
            let last = self.last_input.get();
            if *input <= last {
                bail!(ErrorKind::IllegalState(
                    "inputs must be added in sorted, strictly increasing order".to_owned()
                ));
            }
        }

        let prefix_len = self.shared_prefix_len(input);
        self.freeze_tail(prefix_len)?;

        for depth in prefix_len + 1..=input.length {
            let label = input.int_at(depth - 1);
            let is_final = depth == input.length;
            let mut arc = PendingArc::<O>::new(label, self.outputs.no_output());
            arc.is_final = is_final;
            if is_final {
                arc.output = output.clone();
            }
            self.frontier[depth - 1].arcs.push(arc);
            self.frontier
                .push(PendingNode::new(self.outputs.no_output(), depth));
        }

        self.last_input.copy_ints_ref(input);
        Ok(())
    }

    fn shared_prefix_len(&self, input: &IntsRef) -> usize {
        let max = self.last_input.length.min(input.length);
        let mut i = 0;
        while i < max && self.last_input.int_at(i) == input.int_at(i) {
            i += 1;
        }
        i
    }

    /// Compiles every frontier node deeper than `prefix_len`, from the
    /// current tip back up to (but not including) `prefix_len`, wiring
    /// each freshly-compiled address into the arc its parent is still
    /// holding open.
    fn freeze_tail(&mut self, prefix_len: usize) -> Result<()> {
        while self.frontier.len() - 1 > prefix_len {
            let node = self.frontier.pop().unwrap();
            let address = self.fst.add_node(&node)?;
            let parent = self.frontier.last_mut().unwrap();
            parent.arcs.last_mut().unwrap().target = address;
        }
        Ok(())
    }

    /// Compiles the root and returns the finished `Fst`, packed if
    /// `config.will_pack_fst` was set at construction.
    pub fn finish(mut self) -> Result<Fst<O>> {
        self.freeze_tail(0)?;
        let root = self.frontier.pop().unwrap();
        debug_assert!(self.frontier.is_empty());
        let root_address = self.fst.add_node(&root)?;

        if self.config.will_pack_fst {
            let pack_config = self.pack_config.unwrap_or_default();
            trace!("packing fst with {} nodes", self.fst.node_count);
            packer::pack(&mut self.fst, &pack_config, root_address)
        } else {
            self.fst.finish(root_address)?;
            Ok(self.fst)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::util::fst::arc::Arc;
    use core::util::fst::outputs::{Int64Outputs, NoOutputs};
    use core::util::fst::END_LABEL;

    fn lookup<O: Outputs>(fst: &Fst<O>, input: &[u8]) -> Option<O::Value> {
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

    fn ints<'a>(bytes: &'a [u8], scratch: &'a mut Vec<i32>) -> IntsRef<'a> {
        IntsRef::from_bytes(bytes, scratch)
    }

    #[test]
    fn compiles_sorted_inputs_into_a_lookup_table() {
        let config = FstCompilerConfig::default();
        let mut compiler = FstCompiler::new(InputType::Byte1, Int64Outputs, config, None);

        let mut scratch = Vec::new();
        compiler.add(&ints(b"car", &mut scratch), 5).unwrap();
        compiler.add(&ints(b"cart", &mut scratch), 7).unwrap();
        compiler.add(&ints(b"cat", &mut scratch), 3).unwrap();
        compiler.add(&ints(b"dog", &mut scratch), 1).unwrap();

        let fst = compiler.finish().unwrap();
        assert_eq!(lookup(&fst, b"car"), Some(5));
        assert_eq!(lookup(&fst, b"cart"), Some(7));
        assert_eq!(lookup(&fst, b"cat"), Some(3));
        assert_eq!(lookup(&fst, b"dog"), Some(1));
        assert_eq!(lookup(&fst, b"ca"), None);
        assert_eq!(lookup(&fst, b"do"), None);
    }

    #[test]
    fn rejects_out_of_order_input() {
        let config = FstCompilerConfig::default();
        let mut compiler = FstCompiler::new(InputType::Byte1, Int64Outputs, config, None);
        let mut scratch = Vec::new();
        compiler.add(&ints(b"cat", &mut scratch), 3).unwrap();
        let err = compiler.add(&ints(b"car", &mut scratch), 5);
        assert!(err.is_err());
    }

    #[test]
    fn empty_input_sets_empty_output_without_touching_the_root_node() {
        let config = FstCompilerConfig::default();
        let mut compiler = FstCompiler::new(InputType::Byte1, NoOutputs, config, None);
        let mut scratch = Vec::new();
        compiler.add(&IntsRef::new(&[], 0, 0), ()).unwrap();
        compiler.add(&ints(b"a", &mut scratch), ()).unwrap();
        let fst = compiler.finish().unwrap();

        let mut arc = Arc::new(fst.no_output());
        fst.get_first_arc(&mut arc);
        let mut end = Arc::new(fst.no_output());
        let mut reader = fst.get_bytes_reader();
        assert!(fst
            .find_target_arc(END_LABEL, &arc, &mut end, &mut *reader)
            .unwrap());
        assert_eq!(lookup(&fst, b"a"), Some(()));
    }

    #[test]
    fn random_sorted_inputs_round_trip_unpacked_and_packed() {
        use rand::Rng;

        let mut rng = rand::thread_rng();
        let alphabet = b"abcdefghij";

        for _trial in 0..20 {
            let mut words: Vec<Vec<u8>> = Vec::new();
            let n: usize = rng.gen_range(1, 40);
            for _ in 0..n {
                let len: usize = rng.gen_range(1, 6);
                let word: Vec<u8> = (0..len)
                    .map(|_| alphabet[rng.gen_range(0, alphabet.len())])
                    .collect();
                words.push(word);
            }
            words.sort();
            words.dedup();

            let mut scratch = Vec::new();
            let mut unpacked_compiler =
                FstCompiler::new(InputType::Byte1, Int64Outputs, FstCompilerConfig::default(), None);
            let mut expected = Vec::new();
            for (i, word) in words.iter().enumerate() {
                let output = i as u64 + 1;
                unpacked_compiler
                    .add(&ints(word, &mut scratch), output)
                    .unwrap();
                expected.push(output);
            }
            let unpacked = unpacked_compiler.finish().unwrap();

            let pack_config = FstCompilerConfig {
                allow_array_arcs: true,
                will_pack_fst: true,
            };
            let mut packed_compiler =
                FstCompiler::new(InputType::Byte1, Int64Outputs, pack_config, None);
            for (i, word) in words.iter().enumerate() {
                packed_compiler
                    .add(&ints(word, &mut scratch), i as u64 + 1)
                    .unwrap();
            }
            let packed = packed_compiler.finish().unwrap();
            assert!(packed.is_packed());

            for (word, &output) in words.iter().zip(expected.iter()) {
                assert_eq!(lookup(&unpacked, word), Some(output));
                assert_eq!(lookup(&packed, word), Some(output));
            }
            assert_eq!(unpacked.node_count, packed.node_count);
            assert_eq!(unpacked.arc_count, packed.arc_count);
            assert_eq!(unpacked.arc_with_output_count, packed.arc_with_output_count);

            // A random probe outside the sorted set is either a real miss
            // or (rarely, if the RNG happened to regenerate a member)
            // correctly found — never a different/garbage output.
            let probe_len: usize = rng.gen_range(1, 6);
            let probe: Vec<u8> = (0..probe_len)
                .map(|_| alphabet[rng.gen_range(0, alphabet.len())])
                .collect();
            match words.iter().position(|w| w == &probe) {
                Some(idx) => assert_eq!(lookup(&unpacked, &probe), Some(idx as u64 + 1)),
                None => assert_eq!(lookup(&unpacked, &probe), None),
            }

            let mut saved = Vec::new();
            unpacked.save(&mut saved).unwrap();
            let loaded = Fst::<Int64Outputs>::load(&saved, Int64Outputs).unwrap();
            let mut re_saved = Vec::new();
            loaded.save(&mut re_saved).unwrap();
            assert_eq!(saved, re_saved);
        }
    }

    #[test]
    fn packed_fst_round_trips_through_compiler() {
        let config = FstCompilerConfig {
            allow_array_arcs: true,
            will_pack_fst: true,
        };
        let mut compiler = FstCompiler::new(
            InputType::Byte1,
            Int64Outputs,
            config,
            Some(PackConfig::default()),
        );
        let mut scratch = Vec::new();
        for (i, word) in ["ant", "bee", "cat", "dog", "elk"].iter().enumerate() {
            compiler
                .add(&ints(word.as_bytes(), &mut scratch), i as u64 + 1)
                .unwrap();
        }
        let fst = compiler.finish().unwrap();
        assert!(fst.is_packed());
        for (i, word) in ["ant", "bee", "cat", "dog", "elk"].iter().enumerate() {
            assert_eq!(lookup(&fst, word.as_bytes()), Some(i as u64 + 1));
        }
        assert_eq!(lookup(&fst, b"fox"), None);
    }
}
