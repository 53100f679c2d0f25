use std::collections::VecDeque;

use crate::config::ContentMode;
use crate::{Error, Result};

/// Ordered queue of pending chunks, the unit of OS write granularity.
///
/// Appends pack greedily into the tail chunk up to the per-write size limit;
/// the dispatcher takes ownership of the head chunk for the duration of the
/// OS write and returns any undelivered remainder to the front on failure.
pub(crate) trait ChunkQueue: Send {
    fn push(&mut self, data: &[u8]) -> Result<()>;
    fn pop_head(&mut self) -> Option<Vec<u8>>;
    fn requeue_head(&mut self, rest: Vec<u8>);
    fn byte_len(&self) -> usize;
    fn is_empty(&self) -> bool;
    fn chunk_count(&self) -> usize;
    fn clear(&mut self);
}

pub(crate) fn chunk_queue(content: ContentMode, max_chunk: usize) -> Box<dyn ChunkQueue> {
    match content {
        ContentMode::Bytes => Box::new(RawChunks::new(max_chunk)),
        ContentMode::Text => Box::new(TextChunks::new(max_chunk)),
    }
}

/// Fixed-length binary chunk packing.
struct RawChunks {
    chunks: VecDeque<Vec<u8>>,
    max_chunk: usize,
    len: usize,
}

impl RawChunks {
    fn new(max_chunk: usize) -> Self {
        Self {
            chunks: VecDeque::new(),
            max_chunk,
            len: 0,
        }
    }
}

impl ChunkQueue for RawChunks {
    fn push(&mut self, data: &[u8]) -> Result<()> {
        let mut rest = data;
        while !rest.is_empty() {
            if self.chunks.back().map_or(true, |tail| tail.len() >= self.max_chunk) {
                self.chunks.push_back(Vec::with_capacity(self.max_chunk.min(rest.len())));
            }
            if let Some(tail) = self.chunks.back_mut() {
                let take = (self.max_chunk - tail.len()).min(rest.len());
                tail.extend_from_slice(&rest[..take]);
                self.len += take;
                rest = &rest[take..];
            }
        }
        Ok(())
    }

    fn pop_head(&mut self) -> Option<Vec<u8>> {
        let head = self.chunks.pop_front()?;
        self.len -= head.len();
        Some(head)
    }

    fn requeue_head(&mut self, rest: Vec<u8>) {
        if rest.is_empty() {
            return;
        }
        self.len += rest.len();
        self.chunks.push_front(rest);
    }

    fn byte_len(&self) -> usize {
        self.len
    }

    fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    fn clear(&mut self) {
        self.chunks.clear();
        self.len = 0;
    }
}

/// UTF-8 validated chunk packing. Split points fall on character
/// boundaries, so every pending chunk is itself valid UTF-8.
struct TextChunks {
    chunks: VecDeque<Vec<u8>>,
    max_chunk: usize,
    len: usize,
}

impl TextChunks {
    fn new(max_chunk: usize) -> Self {
        Self {
            chunks: VecDeque::new(),
            max_chunk,
            len: 0,
        }
    }
}

impl ChunkQueue for TextChunks {
    fn push(&mut self, data: &[u8]) -> Result<()> {
        let text = std::str::from_utf8(data).map_err(Error::Utf8)?;
        let mut rest = text;
        while !rest.is_empty() {
            if self.chunks.back().map_or(true, |tail| tail.len() >= self.max_chunk) {
                self.chunks.push_back(Vec::with_capacity(self.max_chunk.min(rest.len())));
            }
            let tail_len = self.chunks.back().map_or(0, Vec::len);
            let space = self.max_chunk - tail_len;
            let mut take = space.min(rest.len());
            while take < rest.len() && !rest.is_char_boundary(take) {
                take -= 1;
            }
            if take == 0 {
                if tail_len == 0 {
                    // A single code point wider than the limit: keep it whole
                    // rather than split it.
                    take = rest.chars().next().map(char::len_utf8).unwrap_or(rest.len());
                } else {
                    // Tail cannot fit the next code point without tearing it;
                    // start a new chunk.
                    self.chunks.push_back(Vec::new());
                    continue;
                }
            }
            let (head, remainder) = rest.split_at(take);
            if let Some(tail) = self.chunks.back_mut() {
                tail.extend_from_slice(head.as_bytes());
            }
            self.len += take;
            rest = remainder;
        }
        Ok(())
    }

    fn pop_head(&mut self) -> Option<Vec<u8>> {
        let head = self.chunks.pop_front()?;
        self.len -= head.len();
        Some(head)
    }

    fn requeue_head(&mut self, rest: Vec<u8>) {
        if rest.is_empty() {
            return;
        }
        self.len += rest.len();
        self.chunks.push_front(rest);
    }

    fn byte_len(&self) -> usize {
        self.len
    }

    fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    fn clear(&mut self) {
        self.chunks.clear();
        self.len = 0;
    }
}
