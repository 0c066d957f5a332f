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

//! The bulk construction engine (component D): in-place 8-way partition of
//! a flat vertex buffer into an octree, with bounded-concurrency recursion.

use crate::flags::{Flags, NORMALIZED_NODES};
use crate::node::{BoundingBox, Node};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::{Arc, Mutex};

/// Default cap on the number of vertices an internal node keeps for itself.
pub const DEFAULT_MAX_LEAF_SIZE: usize = 16_000;

pub type ProgressCallback = dyn Fn(u64, u64) + Send + Sync;

pub struct BuildOptions {
    pub dim: usize,
    pub max_leaf_size: usize,
    pub flags: Flags,
    pub seed: u64,
    /// Allow recursing into children on separate threads. Disabled, a build
    /// is single-threaded and its reservoir sampling is reproducible byte
    /// for byte across runs with the same seed.
    pub parallel: bool,
    pub progress: Option<Box<ProgressCallback>>,
}

impl BuildOptions {
    pub fn new(dim: usize) -> Self {
        BuildOptions {
            dim,
            max_leaf_size: DEFAULT_MAX_LEAF_SIZE,
            flags: Flags::empty(),
            seed: 0,
            parallel: true,
            progress: None,
        }
    }
}

struct SharedState<'a> {
    dim: usize,
    max_leaf_size: usize,
    normalize: bool,
    parallel: bool,
    hardware_concurrency: usize,
    active_workers: Arc<Mutex<usize>>,
    vertices_loaded: Arc<Mutex<u64>>,
    total_vertices: u64,
    progress: Option<&'a ProgressCallback>,
}

/// Builds an octree over `flat`, a buffer of `n * dim` interleaved floats
/// (the first three components of each vertex are `x, y, z`). `flat` is
/// reordered in place; it holds no other meaning once this returns.
///
/// An empty buffer yields an empty leaf root with a zero-size bounding box
/// and no data, per the format's "empty tree" convention.
pub fn build(flat: &mut [f32], opts: &BuildOptions) -> Node {
    let dim = opts.dim;
    if flat.is_empty() {
        return Node::empty_leaf();
    }
    let n = flat.len() / dim;
    let total_vertices = n as u64;

    let state = SharedState {
        dim,
        max_leaf_size: opts.max_leaf_size,
        normalize: opts.flags.contains(NORMALIZED_NODES),
        parallel: opts.parallel,
        hardware_concurrency: num_cpus::get(),
        active_workers: Arc::new(Mutex::new(0)),
        vertices_loaded: Arc::new(Mutex::new(0)),
        total_vertices,
        progress: opts.progress.as_deref(),
    };

    let mut rng = StdRng::seed_from_u64(opts.seed);
    build_range(flat, 0, n - 1, &state, &mut rng)
}

fn vertex_xyz(flat: &[f32], dim: usize, i: usize) -> [f32; 3] {
    let base = i * dim;
    [flat[base], flat[base + 1], flat[base + 2]]
}

fn swap_vertices(flat: &mut [f32], dim: usize, a: usize, b: usize) {
    if a == b {
        return;
    }
    let (lo, hi) = if a < b { (a, b) } else { (b, a) };
    let (left, right) = flat.split_at_mut(hi * dim);
    left[lo * dim..lo * dim + dim].swap_with_slice(&mut right[0..dim]);
}

/// Partitions `flat[beg..=end]` (vertex indices) in one pass so that every
/// vertex with `axis` component `< pivot` precedes every vertex that isn't,
/// and returns the index of the first vertex in the upper part.
///
/// `end` is signed so a caller can pass the empty-range sentinel `beg - 1`
/// (as `beg as isize - 1`) without an unsigned underflow; any range with
/// `end < beg` is treated as empty and returns `beg` untouched. A range
/// more degenerate than that (`end < beg - 1` while `beg > 0`) can only
/// arise from a logic error upstream and is a fatal, non-recoverable
/// inconsistency.
fn order_pivot(flat: &mut [f32], dim: usize, beg: usize, end: isize, axis: usize, pivot: f32) -> usize {
    if beg > 0 {
        assert!(
            end >= beg as isize - 1,
            "inconsistent octree partition range: beg={}, end={}",
            beg,
            end
        );
    }
    if end < beg as isize {
        return beg;
    }
    let end = end as usize;
    let mut i = beg;
    for j in beg..=end {
        if flat[j * dim + axis] < pivot {
            swap_vertices(flat, dim, i, j);
            i += 1;
        }
    }
    i
}

/// Splits `flat[beg..=end]` around `mid` into the 8 octree octants and
/// returns the 9 segment boundaries: `boundaries[k]` and `boundaries[k + 1]`
/// bound segment `k`'s vertex range, which belongs in child slot `k`.
fn partition_octants(flat: &mut [f32], dim: usize, beg: usize, end: usize, mid: [f32; 3]) -> [usize; 9] {
    let e = end as isize;
    let split3 = order_pivot(flat, dim, beg, e, 0, mid[0]);
    let split1 = order_pivot(flat, dim, beg, split3 as isize - 1, 1, mid[1]);
    let split5 = order_pivot(flat, dim, split3, e, 1, mid[1]);
    let split0 = order_pivot(flat, dim, beg, split1 as isize - 1, 2, mid[2]);
    let split2 = order_pivot(flat, dim, split1, split3 as isize - 1, 2, mid[2]);
    let split4 = order_pivot(flat, dim, split3, split5 as isize - 1, 2, mid[2]);
    let split6 = order_pivot(flat, dim, split5, e, 2, mid[2]);
    [
        beg,
        split0,
        split1,
        split2,
        split3,
        split4,
        split5,
        split6,
        end + 1,
    ]
}

fn build_range(flat: &mut [f32], beg: usize, end: usize, state: &SharedState, rng: &mut StdRng) -> Node {
    let dim = state.dim;
    let n = end - beg + 1;

    let mut bbox = BoundingBox::empty();
    for i in beg..=end {
        bbox.grow(vertex_xyz(flat, dim, i));
    }

    let mut own_data = Vec::new();
    let is_leaf = n <= state.max_leaf_size;
    if is_leaf {
        own_data.extend_from_slice(&flat[beg * dim..(end + 1) * dim]);
    } else {
        let p = state.max_leaf_size as f64 / n as f64;
        for i in beg..=end {
            if own_data.len() / dim >= state.max_leaf_size {
                break;
            }
            if rng.gen::<f64>() < p {
                own_data.extend_from_slice(&flat[i * dim..i * dim + dim]);
            }
        }
    }

    if state.normalize {
        normalize_in_place(&mut own_data, dim, &bbox);
    }

    let mut node = Node {
        bbox,
        file_addr: crate::node::NOT_WRITTEN,
        total_data_size: (n * dim) as u64,
        own_data,
        children: Default::default(),
    };

    if is_leaf {
        report_progress(state, n as u64);
        return node;
    }

    let mid = bbox.mid();
    let boundaries = partition_octants(flat, dim, beg, end, mid);

    // Segment k's buffer range is [boundaries[k], boundaries[k+1]). The
    // split sequence above resolves X before Y before Z, so by the time all
    // seven splits are applied, segment k's vertices satisfy exactly the
    // (x ≷ midX, y ≷ midY, z ≷ midZ) triple that child slot k's bit
    // encoding names (bit 2 = x > midX, bit 1 = y > midY, bit 0 = z > midZ)
    // — buffer position and child slot coincide directly.
    let mut segments: Vec<(usize, usize, usize)> = Vec::new();
    for k in 0..8 {
        let seg_beg = boundaries[k];
        let seg_end_excl = boundaries[k + 1];
        if seg_beg < seg_end_excl {
            segments.push((k, seg_beg, seg_end_excl - 1));
        }
    }

    let children = build_children(flat, &segments, state, rng);
    for (slot, child) in children {
        node.children[slot] = Some(Box::new(child));
    }
    node
}

fn report_progress(state: &SharedState, n: u64) {
    if let Some(progress) = state.progress {
        let mut loaded = state.vertices_loaded.lock().unwrap();
        *loaded += n;
        progress(*loaded, state.total_vertices);
    }
}

/// Builds every segment's subtree. The spawn decision is made once per
/// node, for the whole batch of (up to 8) non-empty segments: if
/// `active_workers + 8 ≤ hardware_concurrency` still holds, every segment
/// is spawned on its own thread and joined; otherwise all segments recurse
/// sequentially on this thread. This keeps the oversubscription invariant
/// a per-node, all-or-nothing decision rather than one made independently
/// per child.
fn build_children(
    flat: &mut [f32],
    segments: &[(usize, usize, usize)],
    state: &SharedState,
    rng: &mut StdRng,
) -> Vec<(usize, Node)> {
    let spawn_all = state.parallel && {
        let mut active = state.active_workers.lock().unwrap();
        if *active + 8 <= state.hardware_concurrency {
            *active += segments.len();
            true
        } else {
            false
        }
    };

    let mut results = Vec::with_capacity(segments.len());
    let mut remaining = flat;
    let mut offset = 0usize;

    if !spawn_all {
        for &(slot, seg_beg, seg_end) in segments {
            let local_beg = seg_beg - offset;
            let local_end = seg_end - offset;
            let split_at = (seg_end - offset + 1) * state.dim;
            let (segment, rest) = remaining.split_at_mut(split_at);
            remaining = rest;
            offset = seg_end + 1;
            let node = build_range(segment, local_beg, local_end, state, rng);
            results.push((slot, node));
        }
        return results;
    }

    crossbeam::scope(|scope| {
        let mut handles = Vec::new();
        for &(slot, seg_beg, seg_end) in segments {
            let local_beg = seg_beg - offset;
            let local_end = seg_end - offset;
            let split_at = (seg_end - offset + 1) * state.dim;
            let (segment, rest) = remaining.split_at_mut(split_at);
            remaining = rest;
            offset = seg_end + 1;

            let mut child_rng = StdRng::seed_from_u64(rng.gen());
            let handle = scope.spawn(move |_| {
                build_range(segment, local_beg, local_end, state, &mut child_rng)
            });
            handles.push((slot, handle));
        }

        for (slot, handle) in handles {
            let node = handle.join().expect("child build panicked");
            results.push((slot, node));
        }
    })
    .expect("scoped octree build thread panicked");

    {
        let mut active = state.active_workers.lock().unwrap();
        *active -= segments.len();
    }

    results
}

fn normalize_in_place(own_data: &mut [f32], dim: usize, bbox: &BoundingBox) {
    let scale = bbox.local_scale();
    for vertex in own_data.chunks_mut(dim) {
        for axis in 0..3 {
            vertex[axis] = (vertex[axis] - bbox.min[axis]) / scale;
        }
    }
}
