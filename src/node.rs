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

//! The in-memory node value store (component C): a node's bounding box,
//! file offset, subtree component count, own point buffer and children.
//!
//! Rather than the `Owned(Vec<f32>) | View{base, begin, end}` sum the
//! original suggests for the leaf fast path, every node here always owns
//! its own-data buffer. A self-referential view into a sibling-owned
//! shared buffer isn't expressible in safe Rust without extra lifetime
//! machinery; the copy this costs is bounded by `MAX_LEAF_SIZE * dim`
//! floats per node, which is cheap next to the partition itself.

use std::fmt::Write as _;

/// Sentinel for a node whose data chunk has not yet been written to a file.
pub const NOT_WRITTEN: i64 = -2;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub min: [f32; 3],
    pub max: [f32; 3],
}

impl BoundingBox {
    /// An "empty" box that any `grow` call will immediately widen from.
    pub fn empty() -> Self {
        BoundingBox {
            min: [f32::MAX, f32::MAX, f32::MAX],
            max: [f32::MIN, f32::MIN, f32::MIN],
        }
    }

    pub fn grow(&mut self, point: [f32; 3]) {
        for axis in 0..3 {
            if point[axis] < self.min[axis] {
                self.min[axis] = point[axis];
            }
            if point[axis] > self.max[axis] {
                self.max[axis] = point[axis];
            }
        }
    }

    pub fn extents(&self) -> [f32; 3] {
        [
            self.max[0] - self.min[0],
            self.max[1] - self.min[1],
            self.max[2] - self.min[2],
        ]
    }

    pub fn mid(&self) -> [f32; 3] {
        [
            (self.min[0] + self.max[0]) / 2.,
            (self.min[1] + self.max[1]) / 2.,
            (self.min[2] + self.max[2]) / 2.,
        ]
    }

    pub fn contains(&self, point: [f32; 3]) -> bool {
        (0..3).all(|axis| point[axis] >= self.min[axis] && point[axis] <= self.max[axis])
    }

    /// The larger of the three axis extents, used to scale normalized
    /// node-local coordinates back to world space. `1.0` if the box is a
    /// single point (all extents zero).
    pub fn local_scale(&self) -> f32 {
        let extents = self.extents();
        let scale = extents[0].max(extents[1]).max(extents[2]);
        if scale == 0. {
            1.
        } else {
            scale
        }
    }

    /// The six floats `(minX, maxX, minY, maxY, minZ, maxZ)` as three `u64`
    /// words, each the little-endian bit pattern of a pair of `f32`s. This
    /// is the layout the compact header encoder (component E) emits.
    pub fn to_bbox_words(&self) -> [u64; 3] {
        let pair_to_u64 = |a: f32, b: f32| -> u64 {
            let lo = a.to_bits() as u64;
            let hi = b.to_bits() as u64;
            lo | (hi << 32)
        };
        [
            pair_to_u64(self.min[0], self.max[0]),
            pair_to_u64(self.min[1], self.max[1]),
            pair_to_u64(self.min[2], self.max[2]),
        ]
    }

    pub fn from_bbox_words(words: [u64; 3]) -> Self {
        let split = |w: u64| -> (f32, f32) {
            (f32::from_bits(w as u32), f32::from_bits((w >> 32) as u32))
        };
        let (min_x, max_x) = split(words[0]);
        let (min_y, max_y) = split(words[1]);
        let (min_z, max_z) = split(words[2]);
        BoundingBox {
            min: [min_x, min_y, min_z],
            max: [max_x, max_y, max_z],
        }
    }
}

#[derive(Debug, Clone)]
pub struct Node {
    pub bbox: BoundingBox,
    pub file_addr: i64,
    /// Total number of float components (not vertices) in this node's
    /// entire subtree.
    pub total_data_size: u64,
    /// This node's own sampled (if internal) or complete (if a leaf)
    /// vertex data, interleaved `dim` floats per vertex. Normalized into
    /// `[0, 1]^3` on the first three components if `NORMALIZED_NODES` is
    /// set.
    pub own_data: Vec<f32>,
    pub children: [Option<Box<Node>>; 8],
}

impl Node {
    pub fn empty_leaf() -> Self {
        Node {
            bbox: BoundingBox::empty(),
            file_addr: NOT_WRITTEN,
            total_data_size: 0,
            own_data: Vec::new(),
            children: Default::default(),
        }
    }

    pub fn is_leaf(&self) -> bool {
        self.children.iter().all(|c| c.is_none())
    }

    /// Number of the 8 child slots that would need to be emitted before a
    /// trailing run of empty slots (component E's `nb`).
    pub fn num_child_slots_to_emit(&self) -> usize {
        let mut nb = 8;
        while nb > 0 && self.children[nb - 1].is_none() {
            nb -= 1;
        }
        nb
    }

    /// A deterministic structural dump used by tests to assert that a
    /// freshly built tree and one read back from disk are identical.
    pub fn describe(&self, dim: u32) -> String {
        let mut out = String::new();
        self.describe_into(dim, "", &mut out);
        out
    }

    fn describe_into(&self, dim: u32, indent: &str, out: &mut String) {
        let _ = writeln!(
            out,
            "{indent}addr={} total={} bbox={:?} n={}",
            self.file_addr,
            self.total_data_size,
            self.bbox,
            self.own_data.len() / dim as usize,
            indent = indent
        );
        for v in self.own_data.chunks(dim as usize) {
            let _ = writeln!(out, "{}  {:?}", indent, v);
        }
        for (i, child) in self.children.iter().enumerate() {
            let _ = writeln!(out, "{}{}:", indent, i);
            if let Some(child) = child {
                child.describe_into(dim, &format!("{}\t", indent), out);
            }
        }
    }
}
