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

use std::io;

error_chain! {
    foreign_links {
        io::Error, Io;
    }

    errors {
        /// The byte stream does not describe a valid tree: truncated, an
        /// unbalanced tree-word grammar, or a length field that would run
        /// past the end of the file.
        CorruptFile(offset: u64, reason: String) {
            description("corrupt octree file")
            display("corrupt octree file at byte {}: {}", offset, reason)
        }

        /// The file declares a (major, minor) version newer than this
        /// reader understands.
        UnsupportedVersion(got: (u32, u32), max: (u32, u32)) {
            description("unsupported octree file version")
            display(
                "octree file has version {}.{}, this reader supports up to {}.{}",
                got.0, got.1, max.0, max.1
            )
        }

        /// The external point-data ingest reported a read failure.
        UnreadableBuffer(reason: String) {
            description("could not read input point buffer")
            display("could not read input point buffer: {}", reason)
        }
    }
}
