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

//! The compact tree-word header encoder (component E): a pre-order
//! encoding of a node tree into a flat `i64` stream, readable again without
//! touching any of the per-node data chunks.

use crate::node::Node;

/// Open `(`: an internal node's header record follows.
pub const TOK_OPEN: i64 = 0;
/// Close `)`: ends the child list of the node most recently opened.
pub const TOK_CLOSE: i64 = 1;
/// Empty child slot.
pub const TOK_NULL: i64 = -1;

/// Number of `i64` words in one node's header record (`file_addr`,
/// `totalDataSize`, and the three bbox words).
pub const HEADER_RECORD_LEN: usize = 5;

/// Encodes `node`'s subtree, pre-order, per the grammar in [`TOK_OPEN`] /
/// [`TOK_CLOSE`] / [`TOK_NULL`]. A leaf emits its 5-word header record with
/// no surrounding parens; an internal node wraps its record and its
/// children's encodings in `( ... )`.
pub fn compact(node: &Node) -> Vec<i64> {
    let mut out = Vec::new();
    compact_into(node, &mut out);
    out
}

fn compact_into(node: &Node, out: &mut Vec<i64>) {
    if node.is_leaf() {
        push_header_record(node, out);
        return;
    }
    out.push(TOK_OPEN);
    push_header_record(node, out);
    let nb = node.num_child_slots_to_emit();
    for child in node.children.iter().take(nb) {
        match child {
            Some(child) => compact_into(child, out),
            None => out.push(TOK_NULL),
        }
    }
    out.push(TOK_CLOSE);
}

fn push_header_record(node: &Node, out: &mut Vec<i64>) {
    out.push(node.file_addr);
    out.push(node.total_data_size as i64);
    for word in node.bbox.to_bbox_words() {
        out.push(word as i64);
    }
}
