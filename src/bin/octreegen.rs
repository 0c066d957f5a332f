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

use pbr::ProgressBar;
use point_octree::build::{build, BuildOptions, DEFAULT_MAX_LEAF_SIZE};
use point_octree::flags::NORMALIZED_NODES;
use point_octree::reader::Reader;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::PathBuf;
use std::sync::Mutex;
use structopt::StructOpt;

/// Where `generate` gets its point data from. Only `random` is implemented
/// here; `octree` (resampling an existing file) and `hdf5` (a scientific
/// simulation dump) are out of scope, but kept as named variants so
/// argument parsing already has a place for them to land.
#[derive(Debug)]
enum InputSource {
    Random { count: usize, seed: u64 },
    Octree(PathBuf),
    Hdf5(PathBuf),
}

fn parse_input_source(s: &str) -> Result<InputSource, String> {
    let mut parts = s.splitn(2, ':');
    match parts.next() {
        Some("random") => {
            let count = parts
                .next()
                .ok_or_else(|| "random input needs a point count, e.g. random:200000".to_string())?
                .parse()
                .map_err(|e| format!("invalid point count: {}", e))?;
            Ok(InputSource::Random { count, seed: 0 })
        }
        Some("octree") => Ok(InputSource::Octree(PathBuf::from(
            parts.next().unwrap_or_default(),
        ))),
        Some("hdf5") => Ok(InputSource::Hdf5(PathBuf::from(
            parts.next().unwrap_or_default(),
        ))),
        _ => Err(format!(
            "unknown input source '{}': expected random|octree|hdf5",
            s
        )),
    }
}

fn load_points(source: &InputSource) -> Result<Vec<f32>, String> {
    match source {
        InputSource::Random { count, seed } => {
            let mut rng = StdRng::seed_from_u64(*seed);
            let mut points = Vec::with_capacity(count * 3);
            for _ in 0..*count {
                points.push(rng.gen_range(-1.0, 1.0));
                points.push(rng.gen_range(-1.0, 1.0));
                points.push(rng.gen_range(-1.0, 1.0));
            }
            Ok(points)
        }
        InputSource::Octree(_) => Err("octree resampling input is not implemented".to_string()),
        InputSource::Hdf5(_) => Err("hdf5 input is not implemented".to_string()),
    }
}

#[derive(StructOpt, Debug)]
#[structopt(name = "octreegen")]
enum Command {
    /// Reports the structure and bounding box of an existing octree file.
    Info {
        #[structopt(parse(from_os_str))]
        input: PathBuf,
    },
    /// Builds an octree file from a point source.
    Generate {
        #[structopt(parse(from_os_str))]
        output: PathBuf,

        /// `random:<n>`, `octree:<path>`, or `hdf5:<path>`.
        #[structopt(long, parse(try_from_str = parse_input_source))]
        input: InputSource,

        #[structopt(long)]
        disable_node_normalization: bool,

        #[structopt(long, default_value = "16000")]
        max_particles_per_node: usize,

        /// Subsample the input before building, keeping each point with
        /// this independent probability.
        #[structopt(long)]
        sample_rate: Option<f64>,
    },
}

fn run_info(input: PathBuf) -> Result<(), String> {
    let file = File::open(&input).map_err(|e| format!("{}: {}", input.display(), e))?;
    let mut reader = Reader::open(BufReader::new(file)).map_err(|e| e.to_string())?;
    reader.read_bboxes().map_err(|e| e.to_string())?;
    println!("version: {}.{}", reader.version.0, reader.version.1);
    println!("flags: {:#x}", reader.flags.bits());
    println!(
        "root bbox: {:?} .. {:?}",
        reader.root.bbox.min, reader.root.bbox.max
    );
    println!("total components: {}", reader.root.total_data_size);
    Ok(())
}

fn run_generate(
    output: PathBuf,
    input: InputSource,
    disable_node_normalization: bool,
    max_particles_per_node: usize,
    sample_rate: Option<f64>,
) -> Result<(), String> {
    let mut points = load_points(&input)?;
    if let Some(rate) = sample_rate {
        points = point_octree::merge::subsample(&points, 3, rate, 0);
    }

    let total_vertices = (points.len() / 3) as u64;
    let progress = Mutex::new(ProgressBar::new(total_vertices));
    let mut opts = BuildOptions::new(3);
    opts.max_leaf_size = if max_particles_per_node > 0 {
        max_particles_per_node
    } else {
        DEFAULT_MAX_LEAF_SIZE
    };
    if !disable_node_normalization {
        opts.flags = opts.flags | NORMALIZED_NODES;
    }
    opts.progress = Some(Box::new(move |done, _total| {
        progress.lock().unwrap().set(done);
    }));

    let mut root = build(&mut points, &opts);

    let file = File::create(&output).map_err(|e| format!("{}: {}", output.display(), e))?;
    let mut writer = BufWriter::new(file);
    point_octree::write(&mut writer, &mut root, opts.flags).map_err(|e| e.to_string())?;
    println!("\nwrote {} vertices to {}", total_vertices, output.display());
    Ok(())
}

fn main() {
    let command = Command::from_args();
    let result = match command {
        Command::Info { input } => run_info(input),
        Command::Generate {
            output,
            input,
            disable_node_normalization,
            max_particles_per_node,
            sample_rate,
        } => run_generate(
            output,
            input,
            disable_node_normalization,
            max_particles_per_node,
            sample_rate,
        ),
    };
    if let Err(err) = result {
        eprintln!("error: {}", err);
        std::process::exit(1);
    }
}
