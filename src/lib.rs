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

//! A compact, byte-serialized, acyclic finite state transducer.
//!
//! Maps sequences of input labels (bytes, 16-bit units, or 32-bit
//! codepoints) onto a caller-supplied output monoid. Used as the term
//! dictionary of an inverted index, but standalone here: building,
//! traversal, on-disk framing and the locality-optimizing "pack" rewrite
//! are the whole of it. Minimization/suffix-sharing during construction,
//! on-disk segment containers, and higher-level term enumerators are
//! someone else's problem.

#[macro_use]
extern crate error_chain;
#[macro_use]
extern crate log;
#[cfg(test)]
extern crate rand;

pub mod error;

pub mod core;

pub use core::util::fst::{
    Arc, CompiledAddress, Fst, FstCompiler, FstCompilerConfig, InputType, Int64Outputs,
    NoOutputs, Outputs, PackConfig, END_LABEL, FINAL_END_NODE, NON_FINAL_END_NODE,
};
pub use core::util::ints_ref::{IntsRef, IntsRefBuilder};
