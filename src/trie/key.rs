//! Canonical trie key strings.
//!
//! Format: `l<level>-r<YYYYMMDD|c>[-p<part>]-b<block>`, where `level` and
//! `block` use lexicographic hex and `part` is one hex digit per bucket.
//! Lexicographic hex prefixes the lowercase hex body with one digit holding
//! `body.len() - 1`, so string order equals numeric order.
//!
//! ```text
//! l00-rc-b00          level 0, current, block 0
//! l02-rc-p3-b03       level 2, partition [3], block 3
//! l03-r20240108-p01-b0f
//! ```

use crate::error::{Error, Result};
use chrono::{Datelike, NaiveDate};
use std::fmt;
use std::str::FromStr;

/// Recency years a key can name; the date is always written as eight digits.
pub const RECENCY_YEARS: std::ops::RangeInclusive<i32> = 0..=9999;

/// Partition digits are single hex characters.
pub const MAX_PART_DIGIT: u8 = 0xf;

/// Encodes `n` as lexicographic hex.
pub fn to_lex_hex(n: u64) -> String {
    let body = format!("{:x}", n);
    format!("{:x}{}", body.len() - 1, body)
}

/// Decodes a lexicographic hex string, rejecting non-canonical forms.
pub fn from_lex_hex(s: &str) -> Result<u64> {
    let mut chars = s.chars();
    let prefix = chars
        .next()
        .and_then(|c| c.to_digit(16))
        .ok_or_else(|| Error::invalid_key(format!("bad lex-hex '{}'", s)))?;
    let body = chars.as_str();

    let canonical = body.len() == prefix as usize + 1
        && body.chars().all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c))
        && (body.len() == 1 || !body.starts_with('0'));
    if !canonical {
        return Err(Error::invalid_key(format!("bad lex-hex '{}'", s)));
    }

    u64::from_str_radix(body, 16).map_err(|e| Error::invalid_key(format!("bad lex-hex '{}': {}", s, e)))
}

/// Returns true if `date` can be written into a key.
pub fn is_valid_recency(date: NaiveDate) -> bool {
    RECENCY_YEARS.contains(&date.year())
}

/// Identity of one persisted trie: compaction level, recency bucket,
/// partition path and block index.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TrieKey {
    /// Compaction generation, 0 for raw ingest.
    pub level: u64,
    /// Valid-time bucket; `None` means current. Years lie in [`RECENCY_YEARS`].
    pub recency: Option<NaiveDate>,
    /// Partition path; empty below level 2. Digits are at most [`MAX_PART_DIGIT`].
    pub part: Vec<u8>,
    /// Source block, or highest covered block for merged outputs.
    pub block_index: u64,
}

impl TrieKey {
    /// Creates a key.
    ///
    /// Panics in debug builds if the recency or a partition digit cannot be
    /// written into a key string.
    pub fn new(level: u64, recency: Option<NaiveDate>, part: Vec<u8>, block_index: u64) -> Self {
        debug_assert!(recency.map_or(true, is_valid_recency), "recency {:?} out of range", recency);
        debug_assert!(part.iter().all(|&d| d <= MAX_PART_DIGIT), "partition digit out of range in {:?}", part);
        Self { level, recency, part, block_index }
    }

    /// Like [`TrieKey::new`], returning an error for values a key string cannot hold.
    pub fn try_new(level: u64, recency: Option<NaiveDate>, part: Vec<u8>, block_index: u64) -> Result<Self> {
        if let Some(date) = recency.filter(|&d| !is_valid_recency(d)) {
            return Err(Error::invalid_key(format!("recency {} outside years 0000-9999", date)));
        }
        if let Some(digit) = part.iter().find(|&&d| d > MAX_PART_DIGIT) {
            return Err(Error::invalid_key(format!("partition digit {} is wider than one hex character", digit)));
        }
        Ok(Self { level, recency, part, block_index })
    }

    /// Key of the level-0 trie sealed from `block_index`.
    pub fn l0(block_index: u64) -> Self {
        Self::new(0, None, Vec::new(), block_index)
    }

    /// Returns true if this trie holds current (undated) rows.
    pub fn is_current(&self) -> bool {
        self.recency.is_none()
    }
}

impl fmt::Display for TrieKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "l{}-r", to_lex_hex(self.level))?;
        match self.recency {
            Some(date) => write!(f, "{:04}{:02}{:02}", date.year(), date.month(), date.day())?,
            None => f.write_str("c")?,
        }
        if !self.part.is_empty() {
            f.write_str("-p")?;
            for bucket in &self.part {
                write!(f, "{:x}", bucket)?;
            }
        }
        write!(f, "-b{}", to_lex_hex(self.block_index))
    }
}

impl FromStr for TrieKey {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        parse_key(s)
    }
}

fn parse_recency(arg: &str, s: &str) -> Result<NaiveDate> {
    let bad = || Error::invalid_key(format!("bad recency '{}' in '{}'", arg, s));
    if arg.len() != 8 || !arg.bytes().all(|b| b.is_ascii_digit()) {
        return Err(bad());
    }

    let field = |range: std::ops::Range<usize>| arg[range].parse::<u32>().map_err(|_| bad());
    let year = i32::try_from(field(0..4)?).map_err(|_| bad())?;
    NaiveDate::from_ymd_opt(year, field(4..6)?, field(6..8)?).ok_or_else(bad)
}

/// Parses a trie key string.
///
/// Segments appear in the order `l`, `r`, `p`, `b`, each at most once.
/// Level and block index are required; a missing recency means current.
pub fn parse_key(s: &str) -> Result<TrieKey> {
    let mut level = None;
    let mut recency = None;
    let mut part = Vec::new();
    let mut block_index = None;
    let mut last_rank = None;

    for segment in s.split('-') {
        let mut chars = segment.chars();
        let tag = chars.next().ok_or_else(|| Error::invalid_key(format!("empty segment in '{}'", s)))?;
        let arg = chars.as_str();

        let rank = match tag {
            'l' => 0,
            'r' => 1,
            'p' => 2,
            'b' => 3,
            _ => return Err(Error::invalid_key(format!("unexpected segment '{}' in '{}'", segment, s))),
        };
        if last_rank.map_or(false, |last| rank <= last) {
            return Err(Error::invalid_key(format!("segment '{}' repeated or out of order in '{}'", segment, s)));
        }
        last_rank = Some(rank);

        match tag {
            'l' => level = Some(from_lex_hex(arg)?),
            'b' => block_index = Some(from_lex_hex(arg)?),
            'r' => {
                if arg != "c" {
                    recency = Some(parse_recency(arg, s)?);
                }
            }
            _ => {
                if arg.is_empty() {
                    return Err(Error::invalid_key(format!("empty partition in '{}'", s)));
                }
                part = arg
                    .chars()
                    .map(|c| match c {
                        '0'..='9' | 'a'..='f' => c.to_digit(16).map(|d| d as u8),
                        _ => None,
                    })
                    .collect::<Option<Vec<u8>>>()
                    .ok_or_else(|| Error::invalid_key(format!("bad partition '{}' in '{}'", arg, s)))?;
            }
        }
    }

    match (level, block_index) {
        (Some(level), Some(block_index)) => Ok(TrieKey { level, recency, part, block_index }),
        _ => Err(Error::invalid_key(format!("'{}' is missing level or block index", s))),
    }
}
