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

//! The two-pass file writer (component F): reserve header space, stream
//! data chunks while recording each node's file offset, then rewind and
//! fill in the now-complete header.

use crate::codec::{write_buffer, write_scalar};
use crate::errors::*;
use crate::flags::{Flags, VERSIONED};
use crate::header::{self, TOK_CLOSE};
use crate::node::Node;
use std::io::{Seek, SeekFrom, Write};

pub type Version = (u32, u32);

/// The only version this writer ever emits.
pub const CURRENT_VERSION: Version = (2, 0);

fn header_word_count(root: &Node) -> usize {
    let words = header::compact(root).len();
    if root.is_leaf() {
        // The root is always wrapped in a synthetic `( ... )` even when it
        // has no children of its own, so a lone leaf's 5-word record grows
        // by the two (elided-open, close) bracket tokens.
        words + 2
    } else {
        words
    }
}

/// The header words actually written to disk: `compact(root)` with its
/// leading `(` dropped (the root's open tag is never written — position in
/// the stream already tells a reader that word 0 starts a node record),
/// and, for a leaf root, an appended synthetic close.
fn disk_header(root: &Node) -> Vec<i64> {
    let mut words = header::compact(root);
    if root.is_leaf() {
        words.push(TOK_CLOSE);
    } else {
        words.remove(0);
    }
    words
}

fn write_data_chunks<W: Write + Seek>(stream: &mut W, node: &mut Node) -> Result<()> {
    let pos = stream.seek(SeekFrom::Current(0))?;
    node.file_addr = pos as i64;
    write_scalar(stream, node.own_data.len() as u64)?;
    write_buffer(stream, &node.own_data)?;
    for child in node.children.iter_mut().flatten() {
        write_data_chunks(stream, child)?;
    }
    Ok(())
}

/// Writes `root`'s subtree to `stream` as a complete, self-describing
/// octree file. `root`'s `file_addr` fields are populated as a side effect,
/// so a subsequent `root.describe(dim)` matches what a fresh [`Reader`] of
/// this same stream would report.
///
/// [`Reader`]: crate::reader::Reader
pub fn write<W: Write + Seek>(stream: &mut W, root: &mut Node, user_flags: Flags) -> Result<()> {
    let flags = user_flags | VERSIONED;

    write_scalar(stream, -1i64)?; // offset 0: placeholder, overwritten below
    write_scalar(stream, flags.bits())?; // offset 8
    write_scalar(stream, CURRENT_VERSION.0)?; // offset 16
    write_scalar(stream, CURRENT_VERSION.1)?; // offset 20

    let header_size = header_word_count(root);
    let header_start = stream.seek(SeekFrom::Current(0))?;
    for _ in 0..header_size - 1 {
        write_scalar(stream, 0i64)?;
    }

    let data_start = stream.seek(SeekFrom::Current(0))?;
    stream.seek(SeekFrom::Start(0))?;
    write_scalar(stream, -(data_start as i64))?;
    stream.seek(SeekFrom::Start(data_start))?;

    write_data_chunks(stream, root)?;

    let words = disk_header(root);
    stream.seek(SeekFrom::Start(header_start))?;
    for word in &words {
        write_scalar(stream, *word)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::build::{build, BuildOptions};
    use crate::codec::read_scalar;
    use byteorder::{LittleEndian, ReadBytesExt};
    use std::io::Cursor;

    #[test]
    fn prelude_data_start_becomes_negative() {
        let mut flat: Vec<f32> = vec![0.1, 0.2, 0.3, 0.4, 0.5, 0.6];
        let mut opts = BuildOptions::new(3);
        opts.parallel = false;
        let mut root = build(&mut flat, &opts);

        let mut cursor = Cursor::new(Vec::new());
        write(&mut cursor, &mut root, Flags::empty()).unwrap();

        cursor.set_position(0);
        let neg_data_start: i64 = read_scalar(&mut cursor).unwrap();
        assert!(neg_data_start < 0);
    }

    #[test]
    fn single_leaf_root_header_is_seven_words() {
        let mut flat: Vec<f32> = vec![0.1, 0.2, 0.3];
        let mut opts = BuildOptions::new(3);
        opts.parallel = false;
        let root = build(&mut flat, &opts);
        assert!(root.is_leaf());
        assert_eq!(7, header_word_count(&root));
    }

    #[test]
    fn flags_are_forced_versioned_on_disk() {
        let mut flat: Vec<f32> = vec![1.0, 2.0, 3.0];
        let mut opts = BuildOptions::new(3);
        opts.parallel = false;
        let mut root = build(&mut flat, &opts);

        let mut cursor = Cursor::new(Vec::new());
        write(&mut cursor, &mut root, Flags::empty()).unwrap();

        cursor.set_position(8);
        let flags_on_disk = cursor.read_u64::<LittleEndian>().unwrap();
        assert_eq!(VERSIONED.bits(), flags_on_disk);
    }

    #[test]
    fn file_round_trip_through_a_real_temp_file() {
        use crate::reader::Reader;
        use std::fs::File;
        use std::io::{BufReader, BufWriter};
        use tempdir::TempDir;

        let mut points = cube_points(20_000, 5);
        let mut opts = BuildOptions::new(3);
        opts.max_leaf_size = 500;
        opts.parallel = false;
        let mut root = build(&mut points, &opts);
        let before = root.describe(3);

        let tmp_dir = TempDir::new("point_octree_writer_test").unwrap();
        let path = tmp_dir.path().join("tree.oct");

        {
            let file = File::create(&path).unwrap();
            let mut writer = BufWriter::new(file);
            write(&mut writer, &mut root, opts.flags).unwrap();
        }

        let file = File::open(&path).unwrap();
        let mut reader = Reader::open(BufReader::new(file)).unwrap();
        reader.read_data().unwrap();
        assert_eq!(before, reader.root.describe(3));
    }

    fn cube_points(n: usize, seed: u64) -> Vec<f32> {
        use rand::rngs::StdRng;
        use rand::{Rng, SeedableRng};
        let mut rng = StdRng::seed_from_u64(seed);
        let mut points = Vec::with_capacity(n * 3);
        for _ in 0..n {
            points.push(rng.gen_range(-1.0, 1.0));
            points.push(rng.gen_range(-1.0, 1.0));
            points.push(rng.gen_range(-1.0, 1.0));
        }
        points
    }

    #[test]
    fn data_start_field_points_past_the_header() {
        let mut flat: Vec<f32> = vec![1.0, 2.0, 3.0];
        let mut opts = BuildOptions::new(3);
        opts.parallel = false;
        let mut root = build(&mut flat, &opts);

        let mut cursor = Cursor::new(Vec::new());
        write(&mut cursor, &mut root, Flags::empty()).unwrap();

        cursor.set_position(0);
        let neg_data_start: i64 = read_scalar(&mut cursor).unwrap();
        let data_start = (-neg_data_start) as u64;
        // prelude (24 bytes) + 6 reserved header words (7 - 1) * 8 bytes
        assert_eq!(24 + 6 * 8, data_start);
        assert_eq!(root.file_addr as u64, data_start);
    }
}
