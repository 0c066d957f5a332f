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

//! The multi-version reader (component G): opens a file written by
//! [`crate::writer::write`] (format v2.0) or a legacy v1.0 file, parses its
//! header into a full in-memory tree without touching any data chunk, and
//! offers structure-only, bbox-only, full and per-node-on-demand data loads.

use crate::codec::{read_scalar, read_vector};
use crate::errors::*;
use crate::flags::{Flags, VERSIONED};
use crate::header::{TOK_CLOSE, TOK_NULL, TOK_OPEN};
use crate::node::{BoundingBox, Node};
use crate::writer::{Version, CURRENT_VERSION};
use std::io::{Read, Seek, SeekFrom};

fn is_v2(version: Version) -> bool {
    version.0 >= 2
}

pub struct Reader<R> {
    pub root: Node,
    pub flags: Flags,
    pub version: Version,
    stream: R,
}

impl<R: Read + Seek> Reader<R> {
    /// Opens `stream`, detects whether it's a versioned (v2.0) or legacy
    /// (v1.0) file, and parses the full header into [`Reader::root`].
    pub fn open(mut stream: R) -> Result<Self> {
        let first: i64 = read_scalar(&mut stream)?;
        if first == 0 {
            bail!(ErrorKind::CorruptFile(
                0,
                "bad magic: leading i64 is 0".to_string()
            ));
        }
        let (flags, version, root_file_addr) = if first < 0 {
            let flags = Flags::from_bits(read_scalar(&mut stream)?);
            let version = if flags.contains(VERSIONED) {
                (read_scalar(&mut stream)?, read_scalar(&mut stream)?)
            } else {
                (0, 0)
            };
            if version > CURRENT_VERSION {
                bail!(ErrorKind::UnsupportedVersion(version, CURRENT_VERSION));
            }
            let root_file_addr: i64 = read_scalar(&mut stream)?;
            (flags, version, root_file_addr)
        } else {
            (Flags::empty(), (0, 0), first)
        };

        let root = parse_wrapped_node(&mut stream, version, root_file_addr)?;
        Ok(Reader {
            root,
            flags,
            version,
            stream,
        })
    }

    /// Populates every node's bounding box by seeking to its data chunk.
    /// A no-op on v2.0 files, whose header already carries every box.
    pub fn read_bboxes(&mut self) -> Result<()> {
        if is_v2(self.version) {
            return Ok(());
        }
        read_bboxes_v1(&mut self.stream, &mut self.root)
    }

    /// Loads the own-data buffer (and, on v1, the bounding box) of the node
    /// at `path` — a sequence of child-slot indices from the root.
    pub fn read_own_data_at(&mut self, path: &[usize]) -> Result<()> {
        let version = self.version;
        let node = node_at_mut(&mut self.root, path);
        read_own_data(&mut self.stream, version, node)
    }

    /// Loads the own-data buffers of the node at `path` and every node in
    /// its subtree.
    pub fn read_data_at(&mut self, path: &[usize]) -> Result<()> {
        let version = self.version;
        let node = node_at_mut(&mut self.root, path);
        read_data(&mut self.stream, version, node)
    }

    /// Loads every own-data buffer in the tree.
    pub fn read_data(&mut self) -> Result<()> {
        let version = self.version;
        read_data(&mut self.stream, version, &mut self.root)
    }

    /// Returns the (already-loaded) own-data of the node at `path`,
    /// un-normalizing it back into world space if `NORMALIZED_NODES` is set.
    pub fn get_own_data(&self, path: &[usize]) -> Vec<f32> {
        let node = node_at(&self.root, path);
        get_own_data(node, self.flags)
    }
}

fn node_at_mut<'a>(root: &'a mut Node, path: &[usize]) -> &'a mut Node {
    let mut cur = root;
    for &slot in path {
        cur = cur.children[slot]
            .as_mut()
            .expect("read path names an empty child slot")
            .as_mut();
    }
    cur
}

fn node_at<'a>(root: &'a Node, path: &[usize]) -> &'a Node {
    let mut cur = root;
    for &slot in path {
        cur = cur.children[slot]
            .as_ref()
            .expect("read path names an empty child slot");
    }
    cur
}

/// Un-normalizes `node`'s own data (if `NORMALIZED_NODES` is set) by
/// scaling the first three components of every vertex back up by the
/// node's bounding box and re-adding its minimum corner.
pub fn get_own_data(node: &Node, flags: Flags) -> Vec<f32> {
    let mut out = node.own_data.clone();
    if !flags.contains(crate::flags::NORMALIZED_NODES) {
        return out;
    }
    let dim = flags.dim_per_vertex() as usize;
    let scale = node.bbox.local_scale();
    for vertex in out.chunks_mut(dim) {
        for axis in 0..3 {
            vertex[axis] = vertex[axis] * scale + node.bbox.min[axis];
        }
    }
    out
}

fn finish_record<R: Read>(r: &mut R, version: Version, file_addr: i64) -> Result<(i64, u64, BoundingBox)> {
    if is_v2(version) {
        let total: i64 = read_scalar(r)?;
        let w0: i64 = read_scalar(r)?;
        let w1: i64 = read_scalar(r)?;
        let w2: i64 = read_scalar(r)?;
        let bbox = BoundingBox::from_bbox_words([w0 as u64, w1 as u64, w2 as u64]);
        Ok((file_addr, total as u64, bbox))
    } else {
        Ok((file_addr, 0, BoundingBox::empty()))
    }
}

/// Reads a node's own-size field from its data chunk without disturbing
/// the caller's stream position — the v1 header carries no `totalDataSize`,
/// so this is the only way to learn a leaf's (or a node's own) size before
/// a full data load.
fn bootstrap_own_size_v1<R: Read + Seek>(r: &mut R, file_addr: i64) -> Result<u64> {
    let saved = r.seek(SeekFrom::Current(0))?;
    r.seek(SeekFrom::Start(file_addr as u64 + 6 * 4))?;
    let size: u64 = read_scalar(r)?;
    r.seek(SeekFrom::Start(saved))?;
    Ok(size)
}

/// Parses a node that was reached either as the root, or via an explicit
/// `(` token: its record, then its child-slot grammar up to the matching
/// `)`. `file_addr` has already been consumed from the stream.
fn parse_wrapped_node<R: Read + Seek>(r: &mut R, version: Version, file_addr: i64) -> Result<Node> {
    let (file_addr, mut total_data_size, bbox) = finish_record(r, version, file_addr)?;
    let (children, children_total) = parse_children(r, version)?;
    if !is_v2(version) {
        total_data_size = bootstrap_own_size_v1(r, file_addr)? + children_total;
    }
    Ok(Node {
        bbox,
        file_addr,
        total_data_size,
        own_data: Vec::new(),
        children,
    })
}

/// Parses a node reached as a bare leaf token (no surrounding parens): just
/// its fixed-arity record, nothing more.
fn parse_leaf_node<R: Read + Seek>(r: &mut R, version: Version, file_addr: i64) -> Result<Node> {
    let (file_addr, mut total_data_size, bbox) = finish_record(r, version, file_addr)?;
    if !is_v2(version) {
        total_data_size = bootstrap_own_size_v1(r, file_addr)?;
    }
    Ok(Node {
        bbox,
        file_addr,
        total_data_size,
        own_data: Vec::new(),
        children: Default::default(),
    })
}

fn parse_children<R: Read + Seek>(
    r: &mut R,
    version: Version,
) -> Result<([Option<Box<Node>>; 8], u64)> {
    let mut children: [Option<Box<Node>>; 8] = Default::default();
    let mut total = 0u64;
    for slot in children.iter_mut() {
        let tok: i64 = read_scalar(r)?;
        match tok {
            TOK_CLOSE => return Ok((children, total)),
            TOK_NULL => {}
            TOK_OPEN => {
                let file_addr: i64 = read_scalar(r)?;
                let child = parse_wrapped_node(r, version, file_addr)?;
                total += child.total_data_size;
                *slot = Some(Box::new(child));
            }
            file_addr => {
                let child = parse_leaf_node(r, version, file_addr)?;
                total += child.total_data_size;
                *slot = Some(Box::new(child));
            }
        }
    }
    let tok: i64 = read_scalar(r)?;
    if tok != TOK_CLOSE {
        bail!(ErrorKind::CorruptFile(
            r.seek(SeekFrom::Current(0))?,
            format!("expected closing ')' token, found {}", tok)
        ));
    }
    Ok((children, total))
}

fn read_bboxes_v1<R: Read + Seek>(r: &mut R, node: &mut Node) -> Result<()> {
    r.seek(SeekFrom::Start(node.file_addr as u64))?;
    node.bbox = read_v1_bbox(r)?;
    for child in node.children.iter_mut().flatten() {
        read_bboxes_v1(r, child)?;
    }
    Ok(())
}

fn read_v1_bbox<R: Read>(r: &mut R) -> Result<BoundingBox> {
    let min_x: f32 = read_scalar(r)?;
    let max_x: f32 = read_scalar(r)?;
    let min_y: f32 = read_scalar(r)?;
    let max_y: f32 = read_scalar(r)?;
    let min_z: f32 = read_scalar(r)?;
    let max_z: f32 = read_scalar(r)?;
    Ok(BoundingBox {
        min: [min_x, min_y, min_z],
        max: [max_x, max_y, max_z],
    })
}

/// Number of `f32`s left between the stream's current position and its
/// end, used as the "declared length can't exceed what's actually there"
/// bound for [`read_vector`].
fn remaining_f32s<R: Read + Seek>(r: &mut R) -> Result<usize> {
    let pos = r.seek(SeekFrom::Current(0))?;
    let end = r.seek(SeekFrom::End(0))?;
    r.seek(SeekFrom::Start(pos))?;
    Ok(((end - pos) / std::mem::size_of::<f32>() as u64) as usize)
}

fn read_own_data<R: Read + Seek>(r: &mut R, version: Version, node: &mut Node) -> Result<()> {
    r.seek(SeekFrom::Start(node.file_addr as u64))?;
    if is_v2(version) {
        let max_len = remaining_f32s(r)?;
        let data: Vec<f32> = read_vector(r, Some(max_len))?;
        node.own_data = data;
    } else {
        node.bbox = read_v1_bbox(r)?;
        let max_len = remaining_f32s(r)?;
        let data: Vec<f32> = read_vector(r, Some(max_len))?;
        node.own_data = data;
    }
    Ok(())
}

fn read_data<R: Read + Seek>(r: &mut R, version: Version, node: &mut Node) -> Result<()> {
    read_own_data(r, version, node)?;
    for child in node.children.iter_mut().flatten() {
        read_data(r, version, child)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::build::{build, BuildOptions};
    use crate::flags::{Flags, NORMALIZED_NODES, STORE_LUMINOSITY, STORE_RADIUS, VERSIONED};
    use crate::writer::write;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use std::io::Cursor;

    fn cube_points(n: usize, seed: u64) -> Vec<f32> {
        vertices_with_dim(n, 3, seed)
    }

    fn vertices_with_dim(n: usize, dim: usize, seed: u64) -> Vec<f32> {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut points = Vec::with_capacity(n * dim);
        for _ in 0..n {
            for _ in 0..dim {
                points.push(rng.gen_range(-1.0, 1.0));
            }
        }
        points
    }

    #[test]
    fn write_then_read_reports_identical_structure() {
        let mut points = cube_points(5_000, 11);
        let mut opts = BuildOptions::new(3);
        opts.max_leaf_size = 200;
        opts.parallel = false;
        let mut root = build(&mut points, &opts);

        let mut cursor = Cursor::new(Vec::new());
        write(&mut cursor, &mut root, opts.flags).unwrap();
        let before = root.describe(3);

        cursor.set_position(0);
        let mut reader = Reader::open(cursor).unwrap();
        reader.read_data().unwrap();
        let after = reader.root.describe(3);

        assert_eq!(before, after);
    }

    #[test]
    fn single_leaf_round_trip() {
        let mut points: Vec<f32> = vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0];
        let mut opts = BuildOptions::new(3);
        opts.parallel = false;
        let mut root = build(&mut points, &opts);

        let mut cursor = Cursor::new(Vec::new());
        write(&mut cursor, &mut root, opts.flags).unwrap();

        cursor.set_position(0);
        let mut reader = Reader::open(cursor).unwrap();
        assert_eq!((2, 0), reader.version);
        reader.read_data().unwrap();
        assert_eq!(2, reader.root.own_data.len() / 3);
        assert_eq!(6, reader.root.total_data_size);
    }

    #[test]
    fn read_bboxes_is_a_noop_on_v2_files() {
        let mut points = cube_points(400, 3);
        let mut opts = BuildOptions::new(3);
        opts.max_leaf_size = 32;
        opts.parallel = false;
        let mut root = build(&mut points, &opts);
        let expected_bbox = root.bbox;

        let mut cursor = Cursor::new(Vec::new());
        write(&mut cursor, &mut root, opts.flags).unwrap();

        cursor.set_position(0);
        let mut reader = Reader::open(cursor).unwrap();
        reader.read_bboxes().unwrap();
        assert_eq!(expected_bbox, reader.root.bbox);
    }

    #[test]
    fn normalized_round_trip_denormalizes_to_world_space() {
        let mut points = cube_points(3_000, 21);
        let original = points.clone();
        let mut opts = BuildOptions::new(3);
        opts.max_leaf_size = 64;
        opts.parallel = false;
        opts.flags = NORMALIZED_NODES;
        let mut root = build(&mut points, &opts);

        let mut cursor = Cursor::new(Vec::new());
        write(&mut cursor, &mut root, opts.flags).unwrap();

        cursor.set_position(0);
        let mut reader = Reader::open(cursor).unwrap();
        assert!(reader.flags.contains(NORMALIZED_NODES));
        reader.read_data().unwrap();

        let mut world_points = Vec::new();
        collect_world_points(&reader.root, reader.flags, &mut world_points);
        world_points.sort_by(|a: &[f32; 3], b| a.partial_cmp(b).unwrap());
        let mut expected: Vec<[f32; 3]> = original
            .chunks(3)
            .map(|v| [v[0], v[1], v[2]])
            .collect();
        expected.sort_by(|a, b| a.partial_cmp(b).unwrap());

        assert_eq!(expected.len(), world_points.len());
        for (a, b) in expected.iter().zip(world_points.iter()) {
            for axis in 0..3 {
                approx::assert_abs_diff_eq!(a[axis], b[axis], epsilon = 1e-4);
            }
        }
    }

    /// Only leaves partition the point set exactly; internal nodes hold an
    /// extra sampled copy of some of their descendants' points for LOD, so
    /// summing every node's own data would double-count those.
    fn collect_world_points(node: &Node, flags: Flags, out: &mut Vec<[f32; 3]>) {
        if node.is_leaf() {
            for v in get_own_data(node, flags).chunks(3) {
                out.push([v[0], v[1], v[2]]);
            }
            return;
        }
        for child in node.children.iter().flatten() {
            collect_world_points(child, flags, out);
        }
    }

    #[test]
    fn flag_round_trip_masks_out_versioned() {
        let flags = NORMALIZED_NODES | STORE_RADIUS | STORE_LUMINOSITY;
        let dim = flags.dim_per_vertex() as usize;
        let mut points = vertices_with_dim(2_000, dim, 5);
        let mut opts = BuildOptions::new(dim);
        opts.max_leaf_size = 200;
        opts.parallel = false;
        opts.flags = flags;
        let mut root = build(&mut points, &opts);

        let mut cursor = Cursor::new(Vec::new());
        write(&mut cursor, &mut root, flags).unwrap();

        cursor.set_position(0);
        let reader = Reader::open(cursor).unwrap();
        assert_eq!(flags, reader.flags & !VERSIONED);
    }

    #[test]
    fn high_dimension_vertex_total_data_size_round_trips() {
        let flags = STORE_RADIUS | STORE_LUMINOSITY;
        let dim = flags.dim_per_vertex() as usize;
        assert_eq!(5, dim);
        let n = 200_000;
        let mut points = vertices_with_dim(n, dim, 13);
        let mut opts = BuildOptions::new(dim);
        opts.max_leaf_size = 16_000;
        opts.parallel = false;
        opts.flags = flags;
        let mut root = build(&mut points, &opts);
        assert_eq!((n * dim) as u64, root.total_data_size);
        let before = root.describe(dim as u32);

        let mut cursor = Cursor::new(Vec::new());
        write(&mut cursor, &mut root, flags).unwrap();

        cursor.set_position(0);
        let mut reader = Reader::open(cursor).unwrap();
        reader.read_data().unwrap();
        assert_eq!((n * dim) as u64, reader.root.total_data_size);
        assert_eq!(before, reader.root.describe(dim as u32));
    }
}
