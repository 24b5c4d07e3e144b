//! Expansion of the compressed host and range notations used by the scheduler.
//!
//! Host lists come as `node[01-03,07],login1` and core lists as `0-3,8`.
//! Expansion keeps the order in which names appear so that the position of a
//! host in the result is its node rank.
use std::collections::HashSet;

use crate::ModelError;

/// Expand a compressed node set into individual host names.
///
/// Several bracket groups in one pattern expand as a cartesian product
/// (`r[1-2]n[1-2]` gives `r1n1, r1n2, r2n1, r2n2`). Zero padding of the
/// lower bound is preserved. Duplicates keep their first position.
pub fn expand_node_set(raw: &str) -> Result<Vec<String>, ModelError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(ModelError::InvalidNodeSet("empty".into()));
    }

    let mut seen = HashSet::new();
    let mut hosts = Vec::new();
    for pattern in split_top_level(raw)? {
        let pattern = pattern.trim();
        if pattern.is_empty() {
            return Err(ModelError::InvalidNodeSet(raw.to_string()));
        }
        for host in expand_pattern(pattern)? {
            if seen.insert(host.clone()) {
                hosts.push(host);
            }
        }
    }
    Ok(hosts)
}

/// Expand a range set such as `0-3,8` into individual values, in order.
pub fn expand_range_set(raw: &str) -> Result<Vec<u32>, ModelError> {
    let invalid = || ModelError::InvalidRangeSet(raw.to_string());
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(Vec::new());
    }

    let mut out = Vec::new();
    for item in raw.split(',') {
        let item = item.trim();
        match item.split_once('-') {
            Some((lo, hi)) => {
                let lo: u32 = lo.trim().parse().map_err(|_| invalid())?;
                let hi: u32 = hi.trim().parse().map_err(|_| invalid())?;
                if lo > hi {
                    return Err(invalid());
                }
                out.extend(lo..=hi);
            }
            None => out.push(item.parse().map_err(|_| invalid())?),
        }
    }
    Ok(out)
}

fn split_top_level(raw: &str) -> Result<Vec<&str>, ModelError> {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut start = 0;

    for (i, c) in raw.char_indices() {
        match c {
            '[' => depth += 1,
            ']' => {
                depth = depth
                    .checked_sub(1)
                    .ok_or_else(|| ModelError::InvalidNodeSet(raw.to_string()))?;
            }
            ',' if depth == 0 => {
                parts.push(&raw[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    if depth != 0 {
        return Err(ModelError::InvalidNodeSet(raw.to_string()));
    }
    parts.push(&raw[start..]);
    Ok(parts)
}

fn expand_pattern(pattern: &str) -> Result<Vec<String>, ModelError> {
    let Some(open) = pattern.find('[') else {
        return Ok(vec![pattern.to_string()]);
    };
    let close = pattern[open..]
        .find(']')
        .map(|i| open + i)
        .ok_or_else(|| ModelError::InvalidNodeSet(pattern.to_string()))?;

    let prefix = &pattern[..open];
    let ranges = &pattern[open + 1..close];
    let suffixes = expand_pattern(&pattern[close + 1..])?;

    let mut out = Vec::new();
    for index in expand_padded(ranges)? {
        for suffix in &suffixes {
            out.push(format!("{prefix}{index}{suffix}"));
        }
    }
    Ok(out)
}

fn expand_padded(ranges: &str) -> Result<Vec<String>, ModelError> {
    let invalid = || ModelError::InvalidNodeSet(format!("[{ranges}]"));

    let mut out = Vec::new();
    for item in ranges.split(',') {
        let item = item.trim();
        let (lo, hi) = item.split_once('-').unwrap_or((item, item));
        let width = lo.len();
        let lo: u64 = lo.parse().map_err(|_| invalid())?;
        let hi: u64 = hi.parse().map_err(|_| invalid())?;
        if lo > hi {
            return Err(invalid());
        }
        out.extend((lo..=hi).map(|i| format!("{i:0width$}")));
    }
    Ok(out)
}
