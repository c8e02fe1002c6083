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

//! Crate-wide error type. The FST core never retries a failed operation;
//! every fallible call surfaces its error synchronously to the caller.

error_chain! {
    foreign_links {
        Io(::std::io::Error);
    }

    errors {
        /// Malformed input: unknown version, unknown input-type tag,
        /// truncated stream, illegal flag combination.
        FormatError(desc: String) {
            description("fst format error")
            display("fst format error: {}", desc)
        }

        /// Misuse of the API: `save` before `finish`, `finish` twice,
        /// `pack` on an FST that was not built with will-pack addressing,
        /// reading past the last arc of a node.
        IllegalState(desc: String) {
            description("illegal fst state")
            display("illegal fst state: {}", desc)
        }

        /// A hard limit of the encoding was exceeded: more than
        /// `i32::max_value()` nodes while node-ordinal addressing is in
        /// use, or a block size outside `1..=30` bits.
        CapacityExceeded(desc: String) {
            description("fst capacity exceeded")
            display("fst capacity exceeded: {}", desc)
        }
    }
}
