//! MOBI / AZW3 extraction from the Palm database header and EXTH records.

use std::path::Path;

use super::{ExtractError, Extraction, SAMPLE_LIMIT};
use crate::inspector::types::ExtractedMetadata;

const EXTH_AUTHOR: u32 = 100;
const EXTH_PUBLISHER: u32 = 101;
const EXTH_DESCRIPTION: u32 = 103;
const EXTH_ISBN: u32 = 104;
const EXTH_SUBJECT: u32 = 105;
const EXTH_PUBLISH_DATE: u32 = 106;
const EXTH_ASIN: u32 = 113;
const EXTH_UPDATED_TITLE: u32 = 503;
const EXTH_LANGUAGE: u32 = 524;

/// Text records decompressed for the content sample.
const SAMPLE_RECORDS: usize = 10;

pub fn extract(path: &Path) -> Result<Extraction, ExtractError> {
    let bytes = std::fs::read(path)?;
    parse(&bytes)
}

fn parse(bytes: &[u8]) -> Result<Extraction, ExtractError> {
    let record_count = read_u16(bytes, 76)? as usize;
    let mut offsets = Vec::with_capacity(record_count);
    for i in 0..record_count {
        offsets.push(read_u32(bytes, 78 + i * 8)? as usize);
    }
    let rec0 = *offsets
        .first()
        .ok_or_else(|| ExtractError::Malformed("no records".to_string()))?;

    let mut metadata = ExtractedMetadata::default();

    let compression = read_u16(bytes, rec0)?;
    let text_records = read_u16(bytes, rec0 + 8)? as usize;
    let has_mobi_header = bytes.get(rec0 + 16..rec0 + 20) == Some(b"MOBI".as_slice());

    if has_mobi_header {
        let header_len = read_u32(bytes, rec0 + 20)? as usize;
        let name_offset = read_u32(bytes, rec0 + 84)? as usize;
        let name_len = read_u32(bytes, rec0 + 88)? as usize;
        if let Some(name) = bytes.get(rec0 + name_offset..rec0 + name_offset + name_len) {
            metadata.title = non_empty(String::from_utf8_lossy(name).into_owned());
        }

        let exth_flags = read_u32(bytes, rec0 + 128).unwrap_or(0);
        if exth_flags & 0x40 != 0 {
            apply_exth(bytes, rec0 + 16 + header_len, &mut metadata)?;
        }
    } else {
        let name = &bytes[..32.min(bytes.len())];
        let end = name.iter().position(|&b| b == 0).unwrap_or(name.len());
        metadata.title = non_empty(String::from_utf8_lossy(&name[..end]).replace('_', " "));
    }

    let mut sample = String::new();
    for i in 1..=text_records.min(SAMPLE_RECORDS) {
        let (Some(&start), end) = (offsets.get(i), offsets.get(i + 1).copied()) else {
            break;
        };
        let end = end.unwrap_or(bytes.len()).min(bytes.len());
        if start >= end {
            break;
        }
        let record = &bytes[start..end];
        let text = match compression {
            1 => record.to_vec(),
            2 => palmdoc_decompress(record),
            _ => break,
        };
        sample.push_str(&String::from_utf8_lossy(&text));
        if sample.len() >= SAMPLE_LIMIT {
            break;
        }
    }

    Ok(Extraction {
        metadata,
        content_sample: (!sample.trim().is_empty()).then_some(sample),
    })
}

fn apply_exth(
    bytes: &[u8],
    start: usize,
    metadata: &mut ExtractedMetadata,
) -> Result<(), ExtractError> {
    if bytes.get(start..start + 4) != Some(b"EXTH".as_slice()) {
        return Ok(());
    }
    let count = read_u32(bytes, start + 8)?;
    let mut pos = start + 12;
    for _ in 0..count {
        let kind = read_u32(bytes, pos)?;
        let len = read_u32(bytes, pos + 4)? as usize;
        if len < 8 {
            return Err(ExtractError::Malformed(format!("EXTH record length {}", len)));
        }
        let data = bytes
            .get(pos + 8..pos + len)
            .ok_or_else(|| ExtractError::Malformed("EXTH record overruns file".to_string()))?;
        let Some(value) = non_empty(String::from_utf8_lossy(data).into_owned()) else {
            pos += len;
            continue;
        };
        match kind {
            EXTH_AUTHOR => metadata.authors.push(value),
            EXTH_PUBLISHER => metadata.publisher = Some(value),
            EXTH_DESCRIPTION => metadata.description = Some(value),
            EXTH_ISBN | EXTH_ASIN => metadata.identifiers.push(value),
            EXTH_SUBJECT => metadata.subjects.push(value),
            EXTH_PUBLISH_DATE => metadata.publish_date = Some(value),
            EXTH_UPDATED_TITLE => metadata.title = Some(value),
            EXTH_LANGUAGE => metadata.language = Some(value),
            _ => {}
        }
        pos += len;
    }
    Ok(())
}

/// PalmDOC LZ77 decompression.
fn palmdoc_decompress(input: &[u8]) -> Vec<u8> {
    let mut out: Vec<u8> = Vec::with_capacity(input.len() * 2);
    let mut i = 0;
    while i < input.len() {
        let c = input[i];
        i += 1;
        match c {
            0x01..=0x08 => {
                let end = (i + c as usize).min(input.len());
                out.extend_from_slice(&input[i..end]);
                i = end;
            }
            0x00 | 0x09..=0x7F => out.push(c),
            0x80..=0xBF => {
                let Some(&next) = input.get(i) else {
                    break;
                };
                i += 1;
                let pair = ((c as usize) << 8 | next as usize) & 0x3FFF;
                let distance = pair >> 3;
                let length = (pair & 0x07) + 3;
                if distance == 0 || distance > out.len() {
                    break;
                }
                for _ in 0..length {
                    out.push(out[out.len() - distance]);
                }
            }
            0xC0..=0xFF => {
                out.push(b' ');
                out.push(c ^ 0x80);
            }
        }
    }
    out
}

fn read_u16(bytes: &[u8], at: usize) -> Result<u16, ExtractError> {
    bytes
        .get(at..at + 2)
        .map(|b| u16::from_be_bytes([b[0], b[1]]))
        .ok_or_else(|| ExtractError::Malformed(format!("truncated at offset {}", at)))
}

fn read_u32(bytes: &[u8], at: usize) -> Result<u32, ExtractError> {
    bytes
        .get(at..at + 4)
        .map(|b| u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
        .ok_or_else(|| ExtractError::Malformed(format!("truncated at offset {}", at)))
}

fn non_empty(value: String) -> Option<String> {
    let trimmed = value.trim_matches(char::from(0)).trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}
