//! Sliding-window text chunker.
//!
//! Splits file text into overlapping fixed-size windows measured in
//! characters. Boundaries are purely offset-based; a window may end in the
//! middle of a word or token.
//!
//! # Algorithm
//!
//! 1. Start a window of `window_size` characters at offset 0.
//! 2. If the window reaches the end of the text, emit it and stop.
//! 3. Otherwise emit it, advance by `window_size - overlap`, and repeat.
//!
//! The final window is therefore the only one that may be shorter than
//! `window_size`. Empty text produces no chunks.
//!
//! Files are streamed: a [`ChunkStream`] keeps at most one window plus one
//! read block in memory, and reads nothing until the consumer asks for the
//! next chunk. Calling [`Chunker::chunk`] again restarts from the beginning.
//!
//! # Example
//!
//! ```rust
//! use repo_analyst::chunk::Chunker;
//!
//! let chunker = Chunker::new(200, 50).unwrap();
//! let text = "x".repeat(500);
//! let ranges: Vec<_> = chunker
//!     .chunk_text("a.txt", &text)
//!     .unwrap()
//!     .iter()
//!     .map(|c| (c.start, c.end))
//!     .collect();
//! assert_eq!(ranges, vec![(0, 200), (150, 350), (300, 500)]);
//! ```

use sha2::{Digest, Sha256};
use std::collections::VecDeque;
use std::fs::File;
use std::io::{self, Read};
use std::path::PathBuf;
use std::sync::Arc;

use crate::config::ChunkingConfig;
use crate::error::{Error, Result};
use crate::models::{Chunk, FileRecord};

/// Approximate characters-per-token ratio for the token estimate.
const CHARS_PER_TOKEN: usize = 4;

/// Bytes pulled from the reader per refill.
const READ_BLOCK: usize = 8 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Chunker {
    window_size: usize,
    overlap: usize,
}

impl Chunker {
    /// `overlap` must be smaller than `window_size`.
    pub fn new(window_size: usize, overlap: usize) -> Result<Self> {
        if window_size == 0 {
            return Err(Error::config("chunking.window_size", "must be > 0"));
        }
        if overlap >= window_size {
            return Err(Error::config(
                "chunking.overlap",
                format!(
                    "overlap ({}) must be smaller than window_size ({})",
                    overlap, window_size
                ),
            ));
        }
        Ok(Self {
            window_size,
            overlap,
        })
    }

    pub fn from_config(config: &ChunkingConfig) -> Result<Self> {
        Self::new(config.window_size, config.overlap)
    }

    pub fn window_size(&self) -> usize {
        self.window_size
    }

    pub fn overlap(&self) -> usize {
        self.overlap
    }

    /// Distance between the starts of consecutive windows.
    pub fn step(&self) -> usize {
        self.window_size - self.overlap
    }

    /// Open `file` and return a lazy stream of its chunks.
    pub fn chunk(&self, file: &FileRecord) -> Result<ChunkStream<File>> {
        let handle = File::open(&file.abs_path).map_err(|source| Error::Io {
            path: file.abs_path.clone(),
            source,
        })?;
        Ok(self.chunk_reader(Arc::from(file.path.as_str()), handle))
    }

    /// Chunk any UTF-8 byte source, tagging chunks with `path`.
    pub fn chunk_reader<R: Read>(&self, path: Arc<str>, reader: R) -> ChunkStream<R> {
        ChunkStream {
            chars: Utf8Chars::new(reader),
            path,
            window: self.window_size,
            step: self.step(),
            buf: VecDeque::new(),
            start: 0,
            index: 0,
            finished: false,
        }
    }

    /// Chunk an in-memory string.
    pub fn chunk_text(&self, path: &str, text: &str) -> Result<Vec<Chunk>> {
        self.chunk_reader(Arc::from(path), text.as_bytes()).collect()
    }

    /// Number of chunks a text of `len` characters produces.
    pub fn chunk_count(&self, len: usize) -> usize {
        if len == 0 {
            0
        } else if len <= self.window_size {
            1
        } else {
            1 + (len - self.window_size).div_ceil(self.step())
        }
    }
}

/// Chunk `file` with the given window and overlap.
pub fn chunk(file: &FileRecord, window_size: usize, overlap: usize) -> Result<ChunkStream<File>> {
    Chunker::new(window_size, overlap)?.chunk(file)
}

/// Lazy sequence of chunks over a reader.
///
/// Yields `Err` once if the source fails to read or is not valid UTF-8,
/// then ends. Callers discard everything already produced for that file.
pub struct ChunkStream<R> {
    chars: Utf8Chars<R>,
    path: Arc<str>,
    window: usize,
    step: usize,
    buf: VecDeque<char>,
    start: usize,
    index: usize,
    finished: bool,
}

impl<R: Read> Iterator for ChunkStream<R> {
    type Item = Result<Chunk>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }

        // One character past the window tells us whether more text follows.
        while self.buf.len() <= self.window && !self.chars.eof {
            if let Err(source) = self.chars.read_block(&mut self.buf) {
                self.finished = true;
                return Some(Err(Error::Io {
                    path: PathBuf::from(&*self.path),
                    source,
                }));
            }
        }

        if self.buf.is_empty() {
            self.finished = true;
            return None;
        }

        let take = self.buf.len().min(self.window);
        let text: String = self.buf.iter().take(take).collect();
        let chunk = make_chunk(&self.path, self.index, self.start, self.start + take, text);

        if self.buf.len() <= self.window {
            self.finished = true;
        } else {
            self.buf.drain(..self.step);
            self.start += self.step;
            self.index += 1;
        }

        Some(Ok(chunk))
    }
}

/// Incremental UTF-8 decoder over a byte reader.
struct Utf8Chars<R> {
    reader: R,
    carry: Vec<u8>,
    eof: bool,
}

impl<R: Read> Utf8Chars<R> {
    fn new(reader: R) -> Self {
        Self {
            reader,
            carry: Vec::new(),
            eof: false,
        }
    }

    /// Read one block and append the decoded characters to `out`.
    ///
    /// A multi-byte sequence split across blocks is carried over; one still
    /// incomplete at end of input is an error.
    fn read_block(&mut self, out: &mut VecDeque<char>) -> io::Result<()> {
        let mut block = [0u8; READ_BLOCK];
        let n = loop {
            match self.reader.read(&mut block) {
                Ok(n) => break n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        };

        if n == 0 {
            self.eof = true;
            if !self.carry.is_empty() {
                return Err(invalid_utf8());
            }
            return Ok(());
        }

        self.carry.extend_from_slice(&block[..n]);
        match std::str::from_utf8(&self.carry) {
            Ok(s) => {
                out.extend(s.chars());
                self.carry.clear();
            }
            Err(e) if e.error_len().is_none() => {
                let valid = e.valid_up_to();
                if let Ok(s) = std::str::from_utf8(&self.carry[..valid]) {
                    out.extend(s.chars());
                }
                self.carry.drain(..valid);
            }
            Err(_) => return Err(invalid_utf8()),
        }
        Ok(())
    }
}

fn invalid_utf8() -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, "stream did not contain valid UTF-8")
}

fn make_chunk(path: &Arc<str>, index: usize, start: usize, end: usize, text: String) -> Chunk {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    let hash = format!("{:x}", hasher.finalize());

    Chunk {
        path: Arc::clone(path),
        start,
        end,
        index,
        token_estimate: (end - start).div_ceil(CHARS_PER_TOKEN),
        text,
        hash,
    }
}
