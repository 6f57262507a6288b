//! PDF extraction from raw bytes.
//!
//! Reads the document information dictionary referenced by the trailer and
//! pulls text out of the first content streams for identifier scanning.
//! Objects hidden inside compressed object streams are not resolved.

use flate2::read::ZlibDecoder;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

use super::{ExtractError, Extraction, SAMPLE_LIMIT};
use crate::inspector::types::ExtractedMetadata;

/// Files up to this size are read whole; larger ones by head and tail.
const FULL_READ_LIMIT: u64 = 64 * 1024 * 1024;
const HEAD_BYTES: u64 = 16 * 1024 * 1024;
const TAIL_BYTES: u64 = 1024 * 1024;
/// Content streams inspected for the text sample.
const SAMPLE_STREAMS: usize = 30;
const MAX_INFLATED: u64 = 1024 * 1024;

pub fn extract(path: &Path) -> Result<Extraction, ExtractError> {
    let bytes = read_bounded(path)?;
    let mut metadata = ExtractedMetadata::default();

    if let Some(info) = info_dictionary(&bytes) {
        metadata.title = dict_string(info, b"/Title");
        if let Some(author) = dict_string(info, b"/Author") {
            metadata.authors = split_authors(&author);
        }
        if let Some(subject) = dict_string(info, b"/Subject") {
            metadata.subjects.push(subject);
        }
        if let Some(keywords) = dict_string(info, b"/Keywords") {
            metadata.subjects.extend(
                keywords
                    .split([',', ';'])
                    .map(str::trim)
                    .filter(|k| !k.is_empty())
                    .map(str::to_string),
            );
        }
    }

    let sample = content_sample(&bytes);
    Ok(Extraction {
        metadata,
        content_sample: (!sample.trim().is_empty()).then_some(sample),
    })
}

fn read_bounded(path: &Path) -> Result<Vec<u8>, ExtractError> {
    let mut file = File::open(path)?;
    let len = file.metadata()?.len();
    let mut bytes = Vec::new();
    if len <= FULL_READ_LIMIT {
        file.read_to_end(&mut bytes)?;
    } else {
        (&mut file).take(HEAD_BYTES).read_to_end(&mut bytes)?;
        file.seek(SeekFrom::End(-(TAIL_BYTES as i64)))?;
        file.read_to_end(&mut bytes)?;
    }
    Ok(bytes)
}

/// Multiple names in one Author field: "A; B", "A and B", "A & B".
fn split_authors(raw: &str) -> Vec<String> {
    raw.split([';', '&'])
        .flat_map(|part| part.split(" and "))
        .map(str::trim)
        .filter(|a| !a.is_empty())
        .map(str::to_string)
        .collect()
}

/// Returns the bytes of the Info object body (between `obj` and `endobj`).
fn info_dictionary(bytes: &[u8]) -> Option<&[u8]> {
    let at = rfind(bytes, b"/Info")?;
    let (num, gen) = parse_reference(&bytes[at + 5..])?;
    let header = format!("{} {} obj", num, gen);
    let mut search_end = bytes.len();
    while let Some(pos) = rfind(&bytes[..search_end], header.as_bytes()) {
        let preceded_ok = pos == 0 || bytes[pos - 1].is_ascii_whitespace();
        if preceded_ok {
            let body_start = pos + header.len();
            let body_end = find(&bytes[body_start..], b"endobj")
                .map(|e| body_start + e)
                .unwrap_or(bytes.len());
            return Some(&bytes[body_start..body_end]);
        }
        search_end = pos;
    }
    None
}

/// Parses "  12 0 R" into (12, 0).
fn parse_reference(bytes: &[u8]) -> Option<(u32, u32)> {
    let text = String::from_utf8_lossy(&bytes[..bytes.len().min(32)]).to_string();
    let mut parts = text.split_whitespace();
    let num = parts.next()?.parse().ok()?;
    let gen = parts.next()?.parse().ok()?;
    match parts.next() {
        Some(r) if r.starts_with('R') => Some((num, gen)),
        _ => None,
    }
}

fn dict_string(dict: &[u8], key: &[u8]) -> Option<String> {
    let mut start = 0;
    while let Some(pos) = find(&dict[start..], key) {
        let after = start + pos + key.len();
        // Avoid matching "/TitleSort" when looking for "/Title".
        if dict.get(after).is_some_and(|b| b.is_ascii_alphanumeric()) {
            start = after;
            continue;
        }
        let rest = &dict[after..];
        let offset = rest.iter().position(|b| !b.is_ascii_whitespace())?;
        let value = match rest[offset] {
            b'(' => parse_literal(&rest[offset..]).map(|(raw, _)| raw),
            b'<' => parse_hex(&rest[offset..]),
            _ => None,
        }?;
        let decoded = decode_text(&value);
        let trimmed = decoded.trim();
        return (!trimmed.is_empty()).then(|| trimmed.to_string());
    }
    None
}

/// Parses a literal string starting at `(`, returning its bytes and the
/// number of input bytes consumed.
fn parse_literal(bytes: &[u8]) -> Option<(Vec<u8>, usize)> {
    let mut out = Vec::new();
    let mut depth = 0usize;
    let mut i = 0;
    while i < bytes.len() {
        let b = bytes[i];
        match b {
            b'(' => {
                if depth > 0 {
                    out.push(b);
                }
                depth += 1;
            }
            b')' => {
                depth -= 1;
                if depth == 0 {
                    return Some((out, i + 1));
                }
                out.push(b);
            }
            b'\\' => {
                i += 1;
                let esc = *bytes.get(i)?;
                match esc {
                    b'n' => out.push(b'\n'),
                    b'r' => out.push(b'\r'),
                    b't' => out.push(b'\t'),
                    b'b' => out.push(0x08),
                    b'f' => out.push(0x0C),
                    b'0'..=b'7' => {
                        let mut value = (esc - b'0') as u32;
                        let mut digits = 1;
                        while digits < 3 {
                            match bytes.get(i + 1) {
                                Some(d @ b'0'..=b'7') => {
                                    value = value * 8 + (d - b'0') as u32;
                                    i += 1;
                                    digits += 1;
                                }
                                _ => break,
                            }
                        }
                        out.push((value & 0xFF) as u8);
                    }
                    b'\r' | b'\n' => {}
                    other => out.push(other),
                }
            }
            _ => out.push(b),
        }
        i += 1;
    }
    None
}

fn parse_hex(bytes: &[u8]) -> Option<Vec<u8>> {
    let end = bytes.iter().position(|&b| b == b'>')?;
    let digits: Vec<u8> = bytes[1..end]
        .iter()
        .copied()
        .filter(|b| b.is_ascii_hexdigit())
        .collect();
    let mut out = Vec::with_capacity(digits.len() / 2 + 1);
    for pair in digits.chunks(2) {
        let hi = (pair[0] as char).to_digit(16)?;
        let lo = pair.get(1).and_then(|b| (*b as char).to_digit(16)).unwrap_or(0);
        out.push((hi * 16 + lo) as u8);
    }
    Some(out)
}

/// UTF-16BE with BOM, UTF-8 with BOM, otherwise Latin-1.
fn decode_text(bytes: &[u8]) -> String {
    if let Some(rest) = bytes.strip_prefix(&[0xFE, 0xFF]) {
        let units: Vec<u16> = rest
            .chunks(2)
            .filter(|c| c.len() == 2)
            .map(|c| u16::from_be_bytes([c[0], c[1]]))
            .collect();
        return String::from_utf16_lossy(&units);
    }
    if let Some(rest) = bytes.strip_prefix(&[0xEF, 0xBB, 0xBF]) {
        return String::from_utf8_lossy(rest).into_owned();
    }
    bytes.iter().map(|&b| b as char).collect()
}

/// Text shown by the first content streams.
fn content_sample(bytes: &[u8]) -> String {
    let mut sample = String::new();
    let mut cursor = 0;
    let mut streams = 0;

    while streams < SAMPLE_STREAMS && sample.len() < SAMPLE_LIMIT {
        let Some(pos) = find(&bytes[cursor..], b"stream") else {
            break;
        };
        let keyword = cursor + pos;
        cursor = keyword + 6;
        // Skip the tail of "endstream".
        if keyword >= 3 && &bytes[keyword - 3..keyword] == b"end" {
            continue;
        }
        let mut data_start = cursor;
        if bytes.get(data_start) == Some(&b'\r') {
            data_start += 1;
        }
        if bytes.get(data_start) == Some(&b'\n') {
            data_start += 1;
        }
        let Some(len) = find(&bytes[data_start..], b"endstream") else {
            break;
        };
        let data = &bytes[data_start..data_start + len];
        cursor = data_start + len + 9;
        streams += 1;

        let dict_start = keyword.saturating_sub(512);
        let dict = &bytes[dict_start..keyword];
        if find(dict, b"/Image").is_some() || find(dict, b"/FontFile").is_some() {
            continue;
        }
        let content = if find(dict, b"/FlateDecode").is_some() {
            let mut inflated = Vec::new();
            if ZlibDecoder::new(data)
                .take(MAX_INFLATED)
                .read_to_end(&mut inflated)
                .is_err()
                && inflated.is_empty()
            {
                continue;
            }
            inflated
        } else {
            data.to_vec()
        };
        append_shown_text(&content, &mut sample);
    }

    sample
}

/// Collects literal strings from text operators. Pieces inside one TJ
/// array are joined without spaces.
fn append_shown_text(content: &[u8], out: &mut String) {
    let mut i = 0;
    let mut in_array = false;
    while i < content.len() {
        match content[i] {
            b'[' => in_array = true,
            b']' => {
                in_array = false;
                out.push(' ');
            }
            b'(' => {
                if let Some((raw, consumed)) = parse_literal(&content[i..]) {
                    out.push_str(&decode_text(&raw));
                    if !in_array {
                        out.push(' ');
                    }
                    i += consumed;
                    continue;
                }
            }
            _ => {}
        }
        i += 1;
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

fn rfind(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).rposition(|w| w == needle)
}
