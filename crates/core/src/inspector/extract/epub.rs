//! EPUB extraction: OPF metadata plus a text sample of the front matter.

use std::fs::File;
use std::io::Read;
use std::path::Path;

use super::opf::{parse_opf, rootfile_path};
use super::{strip_markup, ExtractError, Extraction, SAMPLE_LIMIT};

/// Front-matter documents read for the content sample.
const SAMPLE_DOCUMENTS: usize = 6;

pub fn extract(path: &Path) -> Result<Extraction, ExtractError> {
    let file = File::open(path)?;
    let mut archive =
        zip::ZipArchive::new(file).map_err(|e| ExtractError::Archive(e.to_string()))?;

    let container = read_entry(&mut archive, "META-INF/container.xml")?;
    let opf_path = rootfile_path(&container)?
        .ok_or_else(|| ExtractError::Malformed("container.xml has no rootfile".to_string()))?;
    let opf = read_entry(&mut archive, &opf_path)?;
    let metadata = parse_opf(&opf)?;

    let mut documents: Vec<String> = archive
        .file_names()
        .filter(|n| {
            let lower = n.to_lowercase();
            lower.ends_with(".xhtml") || lower.ends_with(".html") || lower.ends_with(".htm")
        })
        .map(str::to_string)
        .collect();
    documents.sort_by_key(|n| (!n.to_lowercase().contains("copyright"), n.clone()));

    let mut sample = String::new();
    for name in documents.iter().take(SAMPLE_DOCUMENTS) {
        if let Ok(doc) = read_entry(&mut archive, name) {
            sample.push_str(&strip_markup(&doc));
            sample.push('\n');
        }
        if sample.len() >= SAMPLE_LIMIT {
            break;
        }
    }

    Ok(Extraction {
        metadata,
        content_sample: (!sample.trim().is_empty()).then_some(sample),
    })
}

fn read_entry(archive: &mut zip::ZipArchive<File>, name: &str) -> Result<String, ExtractError> {
    let mut entry = archive
        .by_name(name)
        .map_err(|e| ExtractError::Archive(format!("{}: {}", name, e)))?;
    let mut bytes = Vec::new();
    entry.read_to_end(&mut bytes)?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}
