//! Chunk/block sizing mini-language.
//!
//! Samples are read from storage in contiguous *chunks*; `chunks_per_block`
//! chunks are grouped into a *block* and shuffled together. A [`BlockSpec`]
//! fixes those three numbers. Accepted token forms:
//!
//! ```text
//! 16x1024            16 chunks of 1024 samples (block of 16384)
//! 1024               1 chunk of 1024 samples
//! 131072/16          block of 131072 split into 16 chunks of 8192
//! 131072/[1,2048]    chunks = 1, 2, 4, ..., 2048 over a block of 131072
//! 131072/[2048,1]    same specs, descending
//! ```

use std::fmt;
use std::str::FromStr;

use crate::error::BlockSpecError;

/// How samples are grouped into chunks, and chunks into shuffle blocks.
///
/// Invariant: `block_size == chunk_size * chunks_per_block`, all positive.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct BlockSpec {
    chunk_size: u64,
    chunks_per_block: u64,
    block_size: u64,
}

impl BlockSpec {
    /// Build a spec from any two (or all three, if consistent) of its fields.
    pub fn make(
        chunk_size: Option<u64>,
        chunks_per_block: Option<u64>,
        block_size: Option<u64>,
    ) -> Result<Self, BlockSpecError> {
        for (name, value) in [
            ("chunk_size", chunk_size),
            ("chunks_per_block", chunks_per_block),
            ("block_size", block_size),
        ] {
            if value == Some(0) {
                return Err(BlockSpecError::Zero(name));
            }
        }

        let (chunk_size, chunks_per_block, block_size) =
            match (chunk_size, chunks_per_block, block_size) {
                (Some(s), Some(c), Some(b)) => {
                    if s.checked_mul(c) != Some(b) {
                        return Err(BlockSpecError::Conflicting {
                            chunk_size: s,
                            chunks_per_block: c,
                            block_size: b,
                        });
                    }
                    (s, c, b)
                }
                (Some(s), Some(c), None) => (s, c, checked_block(s, c)?),
                (Some(s), None, Some(b)) => (s, exact_div(b, s)?, b),
                (None, Some(c), Some(b)) => (exact_div(b, c)?, c, b),
                _ => return Err(BlockSpecError::Underspecified),
            };

        Ok(Self {
            chunk_size,
            chunks_per_block,
            block_size,
        })
    }

    pub fn chunk_size(&self) -> u64 {
        self.chunk_size
    }

    pub fn chunks_per_block(&self) -> u64 {
        self.chunks_per_block
    }

    pub fn block_size(&self) -> u64 {
        self.block_size
    }

    /// Compact `<chunks>x<chunk_size>` form, suitable for file names.
    pub fn short(&self) -> String {
        format!("{}x{}", self.chunks_per_block, self.chunk_size)
    }
}

fn checked_block(chunk_size: u64, chunks_per_block: u64) -> Result<u64, BlockSpecError> {
    chunk_size
        .checked_mul(chunks_per_block)
        .ok_or(BlockSpecError::Overflow {
            chunk_size,
            chunks_per_block,
        })
}

fn exact_div(block_size: u64, divisor: u64) -> Result<u64, BlockSpecError> {
    if block_size % divisor != 0 {
        return Err(BlockSpecError::NonIntegral {
            block_size,
            divisor,
        });
    }
    Ok(block_size / divisor)
}

impl fmt::Display for BlockSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}x{} ({})",
            self.chunks_per_block, self.chunk_size, self.block_size
        )
    }
}

/// One token of the grammar, before expansion.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum SpecToken {
    /// `<chunks>x<chunk_size>` or bare `<chunk_size>`.
    Explicit { chunks: u64, chunk_size: u64 },
    /// `<block_size>/<chunks>`.
    Derived { block_size: u64, chunks: u64 },
    /// `<block_size>/[<start>,<stop>]`.
    Range {
        block_size: u64,
        start: u64,
        stop: u64,
    },
}

impl SpecToken {
    fn parse(token: &str) -> Result<Self, BlockSpecError> {
        let malformed = || BlockSpecError::Malformed(token.to_string());
        let s = token.trim();

        if let Some((block, rest)) = s.split_once('/') {
            let block_size = parse_int(block).ok_or_else(malformed)?;
            let rest = rest.trim();
            if let Some(inner) = rest.strip_prefix('[').and_then(|r| r.strip_suffix(']')) {
                let (start, stop) = inner.split_once(',').ok_or_else(malformed)?;
                return Ok(SpecToken::Range {
                    block_size,
                    start: parse_int(start).ok_or_else(malformed)?,
                    stop: parse_int(stop).ok_or_else(malformed)?,
                });
            }
            let chunks = parse_int(rest).ok_or_else(malformed)?;
            return Ok(SpecToken::Derived { block_size, chunks });
        }

        match s.split_once('x') {
            Some((chunks, size)) => Ok(SpecToken::Explicit {
                chunks: parse_int(chunks).ok_or_else(malformed)?,
                chunk_size: parse_int(size).ok_or_else(malformed)?,
            }),
            None => Ok(SpecToken::Explicit {
                chunks: 1,
                chunk_size: parse_int(s).ok_or_else(malformed)?,
            }),
        }
    }

    fn expand(self) -> Result<Vec<BlockSpec>, BlockSpecError> {
        match self {
            SpecToken::Explicit { chunks, chunk_size } => {
                Ok(vec![BlockSpec::make(Some(chunk_size), Some(chunks), None)?])
            }
            SpecToken::Derived { block_size, chunks } => {
                Ok(vec![BlockSpec::make(None, Some(chunks), Some(block_size))?])
            }
            SpecToken::Range {
                block_size,
                start,
                stop,
            } => {
                let chunk_counts = if start <= stop {
                    doublings(start, stop)?
                } else {
                    let mut counts = doublings(stop, start)?;
                    counts.reverse();
                    counts
                };
                chunk_counts
                    .into_iter()
                    .map(|c| BlockSpec::make(None, Some(c), Some(block_size)))
                    .collect()
            }
        }
    }
}

/// `lo, 2*lo, 4*lo, ...` up to and including `hi`.
fn doublings(lo: u64, hi: u64) -> Result<Vec<u64>, BlockSpecError> {
    if lo == 0 {
        return Err(BlockSpecError::Zero("chunks_per_block"));
    }
    let mut out = Vec::new();
    let mut c = lo;
    while c <= hi {
        out.push(c);
        match c.checked_mul(2) {
            Some(next) => c = next,
            None => break,
        }
    }
    Ok(out)
}

fn parse_int(s: &str) -> Option<u64> {
    let s = s.trim();
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    s.parse().ok()
}

/// Split on commas that are not inside `[...]`.
fn split_top_level(s: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut start = 0;
    for (i, ch) in s.char_indices() {
        match ch {
            '[' => depth += 1,
            ']' => depth = depth.saturating_sub(1),
            ',' if depth == 0 => {
                parts.push(&s[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    parts.push(&s[start..]);
    parts
}

/// Parse one token into the spec(s) it denotes.
pub fn parse_block_spec(token: &str) -> Result<Vec<BlockSpec>, BlockSpecError> {
    SpecToken::parse(token)?.expand()
}

/// Parse every token (each possibly comma-separated) into one flat, ordered list.
pub fn parse_block_specs<S: AsRef<str>>(tokens: &[S]) -> Result<Vec<BlockSpec>, BlockSpecError> {
    let mut specs = Vec::new();
    for token in tokens {
        for part in split_top_level(token.as_ref()) {
            specs.extend(parse_block_spec(part)?);
        }
    }
    Ok(specs)
}

impl FromStr for BlockSpec {
    type Err = BlockSpecError;

    /// Parses a token that denotes exactly one spec.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut specs = parse_block_spec(s)?;
        if specs.len() != 1 {
            return Err(BlockSpecError::Malformed(s.to_string()));
        }
        Ok(specs.remove(0))
    }
}
