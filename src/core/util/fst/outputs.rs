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

//! The output-monoid collaborator an `Fst` is generic over. This is
//! deliberately thin: a no-output sentinel, a codec that can write/read
//! itself from both write directions the core uses (forward append at
//! build time, forward *or* reverse reads at traversal time — see
//! `bytes_store`'s module docs), and a `merge` used only when the same
//! empty input is added twice. `Fst` never calls anything richer than
//! this on its `Outputs` parameter; any prefix-factoring an
//! implementation wants for compactness is the caller's concern, not
//! this core's.

use core::util::fst::bytes_store::{BytesReader, BytesStore};
use error::Result;
use std::fmt::Debug;

pub trait Outputs: Clone {
    type Value: Clone + PartialEq + Debug;

    /// The sentinel meaning "no output carried on this arc". Must
    /// compare equal to itself.
    fn no_output(&self) -> Self::Value;

    fn write(&self, output: &Self::Value, out: &mut BytesStore) -> Result<()>;

    fn write_final_output(&self, output: &Self::Value, out: &mut BytesStore) -> Result<()> {
        self.write(output, out)
    }

    fn read(&self, input: &mut dyn BytesReader) -> Result<Self::Value>;

    fn read_final_output(&self, input: &mut dyn BytesReader) -> Result<Self::Value> {
        self.read(input)
    }

    /// Combines two outputs. The core only calls this when the same
    /// empty-string input is added a second time with a different
    /// output.
    fn merge(&self, a: &Self::Value, b: &Self::Value) -> Self::Value;
}

/// The trivial unit monoid: every output is "no output". Produces a
/// plain acceptor (an FSA with no payload).
#[derive(Clone, Copy, Debug, Default)]
pub struct NoOutputs;

impl Outputs for NoOutputs {
    type Value = ();

    fn no_output(&self) -> () {}

    fn write(&self, _output: &(), _out: &mut BytesStore) -> Result<()> {
        Ok(())
    }

    fn read(&self, _input: &mut dyn BytesReader) -> Result<()> {
        Ok(())
    }

    fn merge(&self, _a: &(), _b: &()) -> () {}
}

/// Outputs are non-negative 64-bit weights, combined by addition; `0`
/// is the identity. This is the "PositiveIntOutputs" monoid spec
/// scenarios are written against.
#[derive(Clone, Copy, Debug, Default)]
pub struct Int64Outputs;

impl Outputs for Int64Outputs {
    type Value = u64;

    fn no_output(&self) -> u64 {
        0
    }

    fn write(&self, output: &u64, out: &mut BytesStore) -> Result<()> {
        out.write_vlong(*output as i64);
        Ok(())
    }

    fn read(&self, input: &mut dyn BytesReader) -> Result<u64> {
        Ok(input.read_vlong()? as u64)
    }

    fn merge(&self, a: &u64, b: &u64) -> u64 {
        a + b
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn int64_outputs_round_trip_through_bytes_store() {
        let outputs = Int64Outputs;
        let mut store = BytesStore::with_default_block_bits();
        outputs.write(&42, &mut store).unwrap();
        let mut reader = store.get_forward_reader();
        assert_eq!(outputs.read(&mut reader).unwrap(), 42);
    }

    #[test]
    fn int64_outputs_merge_adds() {
        let outputs = Int64Outputs;
        assert_eq!(outputs.merge(&3, &5), 8);
        assert_eq!(outputs.merge(&outputs.no_output(), &7), 7);
    }
}
