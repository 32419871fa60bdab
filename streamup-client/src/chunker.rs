//! Cuts an input stream into fixed-size parts

use bytes::BytesMut;

use crate::part::Part;
use crate::UploadError;

/// Buffers fragments and cuts a part every time `part_size` bytes are held
#[derive(Debug)]
pub struct Chunker {
    buffer: BytesMut,
    part_size: usize,
    next_number: u32,
}

impl Chunker {
    /// A chunker cutting `part_size`-byte parts; zero is a configuration error
    pub fn new(part_size: usize) -> Result<Self, UploadError> {
        if part_size == 0 {
            return Err(UploadError::Config("part size must be at least one byte".to_string()));
        }
        Ok(Chunker {
            buffer: BytesMut::with_capacity(part_size),
            part_size,
            next_number: 1,
        })
    }

    /// Append a fragment and return every full part it completes
    pub fn push(&mut self, fragment: &[u8]) -> Vec<Part> {
        self.buffer.extend_from_slice(fragment);

        let mut parts = Vec::new();
        while self.buffer.len() >= self.part_size {
            let payload = self.buffer.split_to(self.part_size).freeze();
            parts.push(self.cut(payload, false));
        }
        parts
    }

    /// End of input: the remainder, if any, becomes the final part
    pub fn finish(&mut self) -> Option<Part> {
        if self.buffer.is_empty() {
            return None;
        }
        let payload = self.buffer.split().freeze();
        Some(self.cut(payload, true))
    }

    /// Parts cut so far
    pub fn parts_cut(&self) -> u32 {
        self.next_number - 1
    }

    /// Bytes waiting for the next cut
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    fn cut(&mut self, payload: bytes::Bytes, is_final: bool) -> Part {
        let part = Part::new(self.next_number, payload, is_final);
        self.next_number += 1;
        part
    }
}
