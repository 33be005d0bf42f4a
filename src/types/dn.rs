// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Distinguished names.
//!
//! A `Dn` keeps only its normalized form: attribute types and values are
//! lower-cased, insignificant whitespace is dropped, the AVAs of a
//! multi-valued RDN are sorted, and special characters are re-escaped with a
//! backslash. Two spellings of the same name therefore compare, hash and
//! encode identically.

use crate::error::{CodecError, Result};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

const SPECIALS: &[char] = &[',', '+', '"', '\\', '<', '>', ';', '='];

#[derive(Clone, Debug)]
pub struct Dn {
    normalized: String,
    rdns: Vec<String>,
}

impl Dn {
    /// The empty (root) DN.
    pub fn root() -> Self {
        Self {
            normalized: String::new(),
            rdns: Vec::new(),
        }
    }

    pub fn parse(input: &str) -> Result<Self> {
        if input.trim().is_empty() {
            return Ok(Self::root());
        }

        let mut rdns = Vec::new();
        for raw_rdn in split_unescaped(input, &[',', ';'])? {
            rdns.push(normalize_rdn(input, raw_rdn)?);
        }

        Ok(Self {
            normalized: rdns.join(","),
            rdns,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.normalized
    }

    pub fn is_root(&self) -> bool {
        self.rdns.is_empty()
    }

    /// Normalized RDNs, leaf first.
    pub fn rdns(&self) -> impl Iterator<Item = &str> {
        self.rdns.iter().map(String::as_str)
    }

    pub fn parent(&self) -> Option<Dn> {
        if self.rdns.is_empty() {
            return None;
        }
        let rdns = self.rdns[1..].to_vec();
        Some(Self {
            normalized: rdns.join(","),
            rdns,
        })
    }

    /// True when `self` sits strictly below `ancestor` in the tree.
    pub fn is_descendant_of(&self, ancestor: &Dn) -> bool {
        self.rdns.len() > ancestor.rdns.len()
            && self.rdns[self.rdns.len() - ancestor.rdns.len()..] == ancestor.rdns[..]
    }
}

impl PartialEq for Dn {
    fn eq(&self, other: &Self) -> bool {
        self.normalized == other.normalized
    }
}

impl Eq for Dn {}

impl Hash for Dn {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.normalized.hash(state);
    }
}

impl PartialOrd for Dn {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Dn {
    fn cmp(&self, other: &Self) -> Ordering {
        self.normalized.cmp(&other.normalized)
    }
}

impl fmt::Display for Dn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.normalized)
    }
}

impl FromStr for Dn {
    type Err = CodecError;

    fn from_str(s: &str) -> Result<Self> {
        Dn::parse(s)
    }
}

impl Serialize for Dn {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.normalized)
    }
}

impl<'de> Deserialize<'de> for Dn {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Dn::parse(&raw).map_err(serde::de::Error::custom)
    }
}

fn invalid(input: &str, reason: &str) -> CodecError {
    CodecError::InvalidDn {
        dn: input.to_string(),
        reason: reason.to_string(),
    }
}

/// Splits on any of `seps` that is neither escaped nor quoted.
fn split_unescaped<'a>(input: &'a str, seps: &[char]) -> Result<Vec<&'a str>> {
    let mut parts = Vec::new();
    let mut start = 0;
    let mut in_quotes = false;
    let mut chars = input.char_indices();

    while let Some((i, c)) = chars.next() {
        match c {
            '\\' => {
                if chars.next().is_none() {
                    return Err(invalid(input, "dangling escape"));
                }
            }
            '"' => in_quotes = !in_quotes,
            c if !in_quotes && seps.contains(&c) => {
                parts.push(&input[start..i]);
                start = i + c.len_utf8();
            }
            _ => {}
        }
    }

    if in_quotes {
        return Err(invalid(input, "unterminated quoted value"));
    }
    parts.push(&input[start..]);
    Ok(parts)
}

fn normalize_rdn(input: &str, raw_rdn: &str) -> Result<String> {
    if raw_rdn.trim().is_empty() {
        return Err(invalid(input, "empty RDN"));
    }

    let mut avas = Vec::new();
    for raw_ava in split_unescaped(raw_rdn, &['+'])? {
        let halves = split_unescaped(raw_ava, &['='])?;
        if halves.len() < 2 {
            return Err(invalid(input, "attribute value assertion without '='"));
        }
        // Only the first '=' separates type from value.
        let attr = halves[0].trim().to_lowercase();
        if attr.is_empty() {
            return Err(invalid(input, "empty attribute type"));
        }
        let value = normalize_value(input, &raw_ava[halves[0].len() + 1..])?;
        avas.push(format!("{attr}={value}"));
    }

    avas.sort();
    Ok(avas.join("+"))
}

/// Decodes escapes and quotes, trims unescaped whitespace, lower-cases and
/// re-escapes into the canonical spelling.
fn normalize_value(input: &str, raw: &str) -> Result<String> {
    // (char, escaped) pairs; escaped chars survive trimming.
    let mut decoded: Vec<(char, bool)> = Vec::with_capacity(raw.len());
    let mut pending_hex: Vec<u8> = Vec::new();
    let mut in_quotes = false;
    let mut chars = raw.chars();

    while let Some(c) = chars.next() {
        if c == '\\' {
            let next = chars.next().ok_or_else(|| invalid(input, "dangling escape"))?;
            if next.is_ascii_hexdigit() {
                let low = chars
                    .next()
                    .filter(char::is_ascii_hexdigit)
                    .ok_or_else(|| invalid(input, "truncated hex escape"))?;
                let byte = u8::from_str_radix(&format!("{next}{low}"), 16)
                    .map_err(|_| invalid(input, "bad hex escape"))?;
                pending_hex.push(byte);
                continue;
            }
            flush_hex(input, &mut pending_hex, &mut decoded)?;
            decoded.push((next, true));
            continue;
        }

        flush_hex(input, &mut pending_hex, &mut decoded)?;
        if c == '"' {
            in_quotes = !in_quotes;
            continue;
        }
        decoded.push((c, in_quotes));
    }
    flush_hex(input, &mut pending_hex, &mut decoded)?;

    let first = decoded
        .iter()
        .position(|&(c, escaped)| escaped || !c.is_whitespace());
    let last = decoded
        .iter()
        .rposition(|&(c, escaped)| escaped || !c.is_whitespace());
    let kept = match (first, last) {
        (Some(first), Some(last)) => &decoded[first..=last],
        _ => &[][..],
    };

    let mut out = String::with_capacity(kept.len());
    for (i, &(c, _)) in kept.iter().enumerate() {
        let edge_space = c.is_whitespace() && (i == 0 || i + 1 == kept.len());
        let leading_hash = c == '#' && i == 0;
        if SPECIALS.contains(&c) || edge_space || leading_hash {
            out.push('\\');
        }
        out.extend(c.to_lowercase());
    }
    Ok(out)
}

fn flush_hex(input: &str, pending: &mut Vec<u8>, decoded: &mut Vec<(char, bool)>) -> Result<()> {
    if pending.is_empty() {
        return Ok(());
    }
    let text = std::str::from_utf8(pending).map_err(|_| invalid(input, "hex escape is not UTF-8"))?;
    decoded.extend(text.chars().map(|c| (c, true)));
    pending.clear();
    Ok(())
}
