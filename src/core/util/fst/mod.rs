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

//! The FST core: a compact, byte-serialized, acyclic automaton mapping
//! label sequences to outputs of a caller-supplied monoid.
//!
//! `bytes_store` is the page-backed append/reverse byte buffer; `arc`
//! is the traversal cursor and its flag bits; `outputs` is the external
//! output-monoid collaborator (plus two concrete instances used to
//! exercise the core); `node` is the pending-node representation fed to
//! the encoder; `fst` ties node serialization and arc reading together
//! on one struct, the way the source does; `packer` rewrites a finished
//! `Fst` into its smaller, locality-optimized form; `compiler` is the
//! thin, non-minimizing front end that turns sorted `(input, output)`
//! pairs into the pending nodes `Fst::add_node` expects.

mod arc;
mod bytes_store;
mod compiler;
mod fst;
mod node;
mod outputs;
mod packer;

pub use self::arc::Arc;
pub use self::bytes_store::{BytesReader, BytesStore};
pub use self::compiler::FstCompiler;
pub use self::fst::{CompiledAddress, Fst, FstCompilerConfig};
pub use self::outputs::{Int64Outputs, NoOutputs, Outputs};
pub use self::packer::PackConfig;

/// Sentinel label on the synthetic arc signaling "the source state is
/// final"; never a real input label.
pub const END_LABEL: i32 = -1;

/// Virtual final sink: a node with no outgoing arcs that is final.
pub const FINAL_END_NODE: CompiledAddress = -1;

/// Virtual non-final sink: a node with no outgoing arcs that is not
/// final. Reaching this from a non-final arc is a format error (the
/// source treats non-final dead ends as unsupported by higher layers;
/// this core rejects them outright rather than silently accepting an
/// ambiguous automaton).
pub const NON_FINAL_END_NODE: CompiledAddress = 0;

/// The current on-disk format version: fixed-width targets/headers
/// replaced by vints.
pub const VERSION_VINT_TARGET: i32 = 4;
/// The oldest version readers still accept: 32-bit fixed-width targets
/// and `bytes_per_arc` headers.
pub const VERSION_PACKED: i32 = 3;

/// Selects one of the three label-width strategies an `Fst` encodes its
/// arcs' labels with. Fixed at build time and stored in the file header.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InputType {
    /// One byte per label, range `0..=255`.
    Byte1,
    /// Two bytes, big-endian, per label, range `0..=65535`.
    Byte2,
    /// Variable-length non-negative 32-bit label.
    Byte4,
}

impl InputType {
    pub(crate) fn to_tag(self) -> u8 {
        match self {
            InputType::Byte1 => 0,
            InputType::Byte2 => 1,
            InputType::Byte4 => 2,
        }
    }

    pub(crate) fn from_tag(tag: u8) -> ::error::Result<InputType> {
        match tag {
            0 => Ok(InputType::Byte1),
            1 => Ok(InputType::Byte2),
            2 => Ok(InputType::Byte4),
            _ => bail!(::error::ErrorKind::FormatError(format!(
                "unknown input type tag: {}",
                tag
            ))),
        }
    }
}

/// One input label, written/read by exactly one of the three
/// `InputType` strategies.
pub fn write_label(out: &mut BytesStore, input_type: InputType, label: i32) -> ::error::Result<()> {
    debug_assert!(label >= 0);
    match input_type {
        InputType::Byte1 => {
            debug_assert!(label <= 255, "label out of byte1 range: {}", label);
            out.write_byte(label as u8);
        }
        InputType::Byte2 => {
            debug_assert!(label <= 65535, "label out of byte2 range: {}", label);
            out.write_short(label as i16);
        }
        InputType::Byte4 => {
            out.write_vint(label);
        }
    }
    Ok(())
}

pub fn read_label(
    input: &mut dyn BytesReader,
    input_type: InputType,
) -> ::error::Result<i32> {
    let label = match input_type {
        InputType::Byte1 => i32::from(input.read_byte()?),
        InputType::Byte2 => i32::from(input.read_short()?) & 0xFFFF,
        InputType::Byte4 => input.read_vint()?,
    };
    Ok(label)
}
