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

//! Endian-neutral binary codec: little-endian on disk, host-endian in
//! memory, regardless of which architecture reads or writes the file.

use crate::errors::*;
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Read, Write};

/// A fixed-size value this codec knows how to read/write in little-endian.
pub trait Primitive: Sized + Copy {
    fn write_le(&self, w: &mut impl Write) -> Result<()>;
    fn read_le(r: &mut impl Read) -> Result<Self>;
}

/// A short read (EOF before a full value was available) is the stream
/// truncation the format's error model names explicitly; anything else
/// from the underlying reader is a plain I/O error.
fn io_to_result<T>(result: std::io::Result<T>) -> Result<T> {
    result.map_err(|e| {
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            ErrorKind::CorruptFile(0, "truncated stream".to_string()).into()
        } else {
            e.into()
        }
    })
}

macro_rules! impl_primitive {
    ($ty:ty, $write_fn:ident, $read_fn:ident) => {
        impl Primitive for $ty {
            fn write_le(&self, w: &mut impl Write) -> Result<()> {
                w.$write_fn::<LittleEndian>(*self)?;
                Ok(())
            }
            fn read_le(r: &mut impl Read) -> Result<Self> {
                io_to_result(r.$read_fn::<LittleEndian>())
            }
        }
    };
}

impl_primitive!(f32, write_f32, read_f32);
impl_primitive!(f64, write_f64, read_f64);
impl_primitive!(u16, write_u16, read_u16);
impl_primitive!(u32, write_u32, read_u32);
impl_primitive!(u64, write_u64, read_u64);
impl_primitive!(i16, write_i16, read_i16);
impl_primitive!(i32, write_i32, read_i32);
impl_primitive!(i64, write_i64, read_i64);

impl Primitive for u8 {
    fn write_le(&self, w: &mut impl Write) -> Result<()> {
        w.write_u8(*self)?;
        Ok(())
    }
    fn read_le(r: &mut impl Read) -> Result<Self> {
        io_to_result(r.read_u8())
    }
}

/// Writes a single POD value in little-endian.
pub fn write_scalar<T: Primitive>(w: &mut impl Write, v: T) -> Result<()> {
    v.write_le(w)
}

/// Reads a single POD value in little-endian.
pub fn read_scalar<T: Primitive>(r: &mut impl Read) -> Result<T> {
    T::read_le(r)
}

/// Writes `buf` as `buf.len() * sizeof(T)` little-endian bytes, with no
/// length prefix.
pub fn write_buffer<T: Primitive>(w: &mut impl Write, buf: &[T]) -> Result<()> {
    for v in buf {
        v.write_le(w)?;
    }
    Ok(())
}

/// Reads `n` contiguous little-endian values of `T`, with no length prefix.
pub fn read_buffer<T: Primitive>(r: &mut impl Read, n: usize) -> Result<Vec<T>> {
    let mut out = Vec::with_capacity(n);
    for _ in 0..n {
        out.push(T::read_le(r)?);
    }
    Ok(out)
}

/// Writes a `u32` length prefix followed by that many little-endian values.
pub fn write_vector<T: Primitive>(w: &mut impl Write, v: &[T]) -> Result<()> {
    write_scalar(w, v.len() as u32)?;
    write_buffer(w, v)
}

/// Reads a `u32` length prefix, then that many little-endian values.
///
/// `max_len`, if given, is the number of `T`s known to still be available in
/// the stream (e.g. derived from remaining file size); a declared length
/// exceeding it is a malformed-stream error rather than an attempt to
/// allocate or read past the end of the data.
pub fn read_vector<T: Primitive>(r: &mut impl Read, max_len: Option<usize>) -> Result<Vec<T>> {
    let len = read_scalar::<u32>(r)? as usize;
    if let Some(max_len) = max_len {
        if len > max_len {
            bail!(ErrorKind::CorruptFile(
                0,
                format!(
                    "declared vector length {} exceeds {} values remaining in stream",
                    len, max_len
                )
            ));
        }
    }
    read_buffer(r, len)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn scalar_round_trip() {
        let mut buf = Vec::new();
        write_scalar(&mut buf, 42i64).unwrap();
        write_scalar(&mut buf, 3.5f32).unwrap();
        write_scalar(&mut buf, 7u64).unwrap();
        let mut cursor = Cursor::new(buf);
        assert_eq!(42i64, read_scalar(&mut cursor).unwrap());
        assert_eq!(3.5f32, read_scalar(&mut cursor).unwrap());
        assert_eq!(7u64, read_scalar(&mut cursor).unwrap());
    }

    #[test]
    fn buffer_round_trip_is_bit_identical() {
        let values: Vec<f32> = vec![1.0, -2.5, f32::MIN_POSITIVE, f32::MAX, 0.0];
        let mut buf = Vec::new();
        write_buffer(&mut buf, &values).unwrap();
        let mut cursor = Cursor::new(buf);
        let read_back: Vec<f32> = read_buffer(&mut cursor, values.len()).unwrap();
        assert_eq!(values, read_back);
    }

    #[test]
    fn vector_round_trip() {
        let values: Vec<u32> = vec![1, 2, 3, 4, 5];
        let mut buf = Vec::new();
        write_vector(&mut buf, &values).unwrap();
        let mut cursor = Cursor::new(buf);
        let read_back: Vec<u32> = read_vector(&mut cursor, None).unwrap();
        assert_eq!(values, read_back);
    }

    #[test]
    fn truncated_stream_is_an_error() {
        let mut cursor = Cursor::new(vec![0u8; 2]);
        let result: Result<u64> = read_scalar(&mut cursor);
        match result {
            Err(Error(ErrorKind::CorruptFile(_, _), _)) => {}
            other => panic!("expected CorruptFile, got {:?}", other),
        }
    }

    #[test]
    fn oversize_length_is_malformed_stream_error() {
        let mut buf = Vec::new();
        write_scalar(&mut buf, 1_000_000u32).unwrap();
        let mut cursor = Cursor::new(buf);
        let result: Result<Vec<f32>> = read_vector(&mut cursor, Some(4));
        match result {
            Err(Error(ErrorKind::CorruptFile(_, _), _)) => {}
            other => panic!("expected CorruptFile, got {:?}", other),
        }
    }

    #[test]
    fn endian_is_little_regardless_of_host() {
        let mut buf = Vec::new();
        write_scalar(&mut buf, 0x0102_0304u32).unwrap();
        assert_eq!(vec![0x04, 0x03, 0x02, 0x01], buf);
    }
}
