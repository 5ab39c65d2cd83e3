//! Utilities for decoding from and encoding into bytes.
//!
//! Defines the zero-copy (de)serialization traits [`ToBytes`] and
//! [`FromBytes`], plus the helper types [`ByteWriter`] and [`ByteReader`]
//! that wrap a `&mut [u8]` / `&[u8]` and offer small, explicit read/write
//! primitives. Every type that crosses the air (the packet header, every
//! typed payload, group/time-sync/ADR sub-headers) implements these two
//! traits; this is the one place allowed to reach for raw byte twiddling.
//!
//! All integers are encoded little-endian, matching the on-the-air wire
//! contract.

use crate::Error;
use core::{cmp, mem};

/// Wrapper around a byte slice used to encode data into bytes.
///
/// All `write_*` methods return `Error::Eof` when the underlying buffer is
/// full; the buffer is left unmodified in that case.
pub struct ByteWriter<'a>(&'a mut [u8]);

impl<'a> ByteWriter<'a> {
    pub fn new(buf: &'a mut [u8]) -> Self {
        ByteWriter(buf)
    }

    /// Consumes `self`, returning the part of the buffer not yet written to.
    pub fn into_rest(self) -> &'a mut [u8] {
        self.0
    }

    /// Number of bytes that can still be written before the buffer is full.
    pub fn space_left(&self) -> usize {
        self.0.len()
    }

    pub fn write_slice(&mut self, other: &[u8]) -> Result<(), Error> {
        if self.space_left() < other.len() {
            Err(Error::Eof)
        } else {
            self.0[..other.len()].copy_from_slice(other);
            let this = mem::take(&mut self.0);
            self.0 = &mut this[other.len()..];
            Ok(())
        }
    }

    /// Writes as many bytes from `other` as fit, returning the count written.
    pub fn write_slice_truncate(&mut self, other: &[u8]) -> usize {
        let num = cmp::min(self.space_left(), other.len());
        self.write_slice(&other[..num]).unwrap();
        num
    }

    pub fn write_u8(&mut self, byte: u8) -> Result<(), Error> {
        self.write_slice(&[byte])
    }

    pub fn write_u16_le(&mut self, value: u16) -> Result<(), Error> {
        self.write_slice(&value.to_le_bytes())
    }

    pub fn write_u32_le(&mut self, value: u32) -> Result<(), Error> {
        self.write_slice(&value.to_le_bytes())
    }

    pub fn write_u64_le(&mut self, value: u64) -> Result<(), Error> {
        self.write_slice(&value.to_le_bytes())
    }

    pub fn write_i32_le(&mut self, value: i32) -> Result<(), Error> {
        self.write_slice(&value.to_le_bytes())
    }
}

/// Allows reading values from a borrowed byte slice.
pub struct ByteReader<'a>(&'a [u8]);

impl<'a> ByteReader<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        ByteReader(bytes)
    }

    /// Raw bytes in `self`, without advancing or reading anything.
    pub fn as_raw_bytes(&self) -> &'a [u8] {
        self.0
    }

    /// Consumes `self`, returning the part of the buffer not yet read from.
    pub fn into_rest(self) -> &'a [u8] {
        self.0
    }

    pub fn bytes_left(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn read_slice(&mut self, len: usize) -> Result<&'a [u8], Error> {
        if self.bytes_left() < len {
            Err(Error::Eof)
        } else {
            let (slice, rest) = self.0.split_at(len);
            self.0 = rest;
            Ok(slice)
        }
    }

    /// Reads a byte-array-like type `S` (eg. `[u8; 4]`) from `self`.
    pub fn read_array<S>(&mut self) -> Result<S, Error>
    where
        S: Default + AsMut<[u8]>,
    {
        let mut buf = S::default();
        let slice = buf.as_mut();
        if self.bytes_left() < slice.len() {
            return Err(Error::Eof);
        }
        slice.copy_from_slice(&self.0[..slice.len()]);
        self.0 = &self.0[slice.len()..];
        Ok(buf)
    }

    /// Reads the remaining bytes from `self`.
    pub fn read_rest(&mut self) -> &'a [u8] {
        let rest = self.0;
        self.0 = &[];
        rest
    }

    pub fn read_u8(&mut self) -> Result<u8, Error> {
        Ok(self.read_array::<[u8; 1]>()?[0])
    }

    pub fn read_u16_le(&mut self) -> Result<u16, Error> {
        Ok(u16::from_le_bytes(self.read_array()?))
    }

    pub fn read_u32_le(&mut self) -> Result<u32, Error> {
        Ok(u32::from_le_bytes(self.read_array()?))
    }

    pub fn read_u64_le(&mut self) -> Result<u64, Error> {
        Ok(u64::from_le_bytes(self.read_array()?))
    }

    pub fn read_i32_le(&mut self) -> Result<i32, Error> {
        Ok(i32::from_le_bytes(self.read_array()?))
    }
}

/// Trait for encoding a value into a byte buffer.
pub trait ToBytes {
    /// Encodes `self` into `writer`, advancing it past the written data.
    ///
    /// If `writer` does not have enough space, returns an error and leaves
    /// the buffer's contents unspecified.
    fn to_bytes(&self, writer: &mut ByteWriter<'_>) -> Result<(), Error>;
}

/// Trait for decoding values from a byte slice.
pub trait FromBytes<'a>: Sized {
    /// Decodes a `Self` from `bytes`, advancing it past the data read.
    ///
    /// If `bytes` holds too little data, or data invalid for `Self`,
    /// returns an error and leaves `bytes` in an unspecified state.
    fn from_bytes(bytes: &mut ByteReader<'a>) -> Result<Self, Error>;
}

impl<'a> ToBytes for &'a [u8] {
    fn to_bytes(&self, writer: &mut ByteWriter<'_>) -> Result<(), Error> {
        writer.write_slice(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_u32() {
        let mut buf = [0u8; 4];
        ByteWriter::new(&mut buf).write_u32_le(0xdead_beef).unwrap();
        let mut r = ByteReader::new(&buf);
        assert_eq!(r.read_u32_le().unwrap(), 0xdead_beef);
    }

    #[test]
    fn write_eof() {
        let mut buf = [0u8; 2];
        let mut w = ByteWriter::new(&mut buf);
        assert_eq!(w.write_u32_le(1), Err(Error::Eof));
    }

    #[test]
    fn read_eof() {
        let buf = [0u8; 1];
        let mut r = ByteReader::new(&buf);
        assert_eq!(r.read_u16_le(), Err(Error::Eof));
    }
}
