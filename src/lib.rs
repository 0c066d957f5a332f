// Copyright 2016 The Cartographer Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Converts flat point-cloud buffers into a single self-describing octree
//! file, and reads them back with as little work as the caller actually
//! needs: structure only, bounding boxes only, or full point data, one node
//! at a time or the whole tree at once.
//!
//! ```text
//! build(points) -> Node -> write(stream, &mut node) -> file
//! Reader::open(stream) -> Reader -> read_data() / read_own_data_at(path)
//! ```

#[macro_use]
extern crate error_chain;

pub mod build;
pub mod codec;
pub mod errors;
pub mod flags;
pub mod header;
pub mod merge;
pub mod node;
pub mod reader;
pub mod writer;

pub use crate::build::{build, BuildOptions};
pub use crate::flags::Flags;
pub use crate::node::{BoundingBox, Node};
pub use crate::reader::Reader;
pub use crate::writer::write;
