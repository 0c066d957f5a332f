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

//! Flattening, subsampling and merging trees back down into point buffers
//! (component I).

use crate::build::{build, BuildOptions};
use crate::errors::*;
use crate::flags::{Flags, NORMALIZED_NODES, VERSIONED};
use crate::node::Node;
use crate::reader::get_own_data;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Post-order flattening of every leaf's own data (un-normalized) into a
/// single interleaved buffer. Only leaves partition the original point set
/// exactly; internal nodes hold an extra sampled copy of some descendant
/// points for LOD display, so only leaf data is collected here — summing
/// every node's own data would double-count those samples. `own_data` is
/// drained as each node is visited, so peak memory stays bounded by the
/// buffer being built rather than by the original tree plus a full copy.
pub fn flatten(node: &mut Node, flags: Flags) -> Vec<f32> {
    let mut out = Vec::with_capacity(node.total_data_size as usize);
    flatten_into(node, flags, &mut out);
    out
}

fn flatten_into(node: &mut Node, flags: Flags, out: &mut Vec<f32>) {
    if node.is_leaf() {
        out.extend(get_own_data(node, flags));
        node.own_data.clear();
        node.own_data.shrink_to_fit();
        return;
    }
    for child in node.children.iter_mut().flatten() {
        flatten_into(child, flags, out);
    }
    node.own_data.clear();
    node.own_data.shrink_to_fit();
}

/// Keeps each `dim`-wide vertex in `points` independently with probability
/// `rate`.
pub fn subsample(points: &[f32], dim: usize, rate: f64, seed: u64) -> Vec<f32> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut out = Vec::new();
    for vertex in points.chunks(dim) {
        if rng.gen::<f64>() < rate {
            out.extend_from_slice(vertex);
        }
    }
    out
}

/// Flattens two trees, concatenates their points, and rebuilds a single
/// tree from the result. The two trees' flag sets must agree on everything
/// except `VERSIONED` and `NORMALIZED_NODES`, which are construction
/// artifacts rather than properties of the data itself.
pub fn merge(
    mut a: Node,
    flags_a: Flags,
    mut b: Node,
    flags_b: Flags,
    opts: &BuildOptions,
) -> Result<Node> {
    let ignored = VERSIONED | NORMALIZED_NODES;
    if (flags_a & !ignored) != (flags_b & !ignored) {
        bail!(ErrorKind::CorruptFile(
            0,
            "cannot merge octrees with incompatible attribute flags".to_string()
        ));
    }
    let mut points = flatten(&mut a, flags_a);
    points.extend(flatten(&mut b, flags_b));
    Ok(build(&mut points, opts))
}
