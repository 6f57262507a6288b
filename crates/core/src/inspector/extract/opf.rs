//! OPF package document parsing, shared by EPUB and sidecar files.

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

use super::ExtractError;
use crate::inspector::types::{ExtractedMetadata, SeriesInfo};

/// Parses the `<metadata>` block of an OPF document.
pub fn parse_opf(xml: &str) -> Result<ExtractedMetadata, ExtractError> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut meta = ExtractedMetadata::default();
    let mut series_name: Option<String> = None;
    let mut series_index: Option<f32> = None;
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => {
                let local = e.local_name().as_ref().to_vec();
                match local.as_slice() {
                    b"title" | b"creator" | b"identifier" | b"publisher" | b"date"
                    | b"language" | b"description" | b"subject" => {
                        let text = read_element_text(&mut reader)?;
                        apply_dc(&mut meta, &local, text);
                    }
                    b"meta" => {
                        let property = attribute(&e, b"property");
                        let text = read_element_text(&mut reader)?;
                        match property.as_deref() {
                            Some("belongs-to-collection") if series_name.is_none() => {
                                series_name = non_empty(text);
                            }
                            Some("group-position") if series_index.is_none() => {
                                series_index = text.trim().parse().ok();
                            }
                            _ => {}
                        }
                    }
                    _ => {}
                }
            }
            Ok(Event::Empty(e)) if e.local_name().as_ref() == b"meta" => {
                let name = attribute(&e, b"name");
                let content = attribute(&e, b"content");
                match (name.as_deref(), content) {
                    (Some("calibre:series"), Some(value)) => series_name = non_empty(value),
                    (Some("calibre:series_index"), Some(value)) => {
                        series_index = value.trim().parse().ok()
                    }
                    _ => {}
                }
            }
            Ok(Event::End(e)) if e.local_name().as_ref() == b"metadata" => break,
            Ok(Event::Eof) => break,
            Err(e) => return Err(ExtractError::Xml(e.to_string())),
            _ => {}
        }
        buf.clear();
    }

    if let Some(name) = series_name {
        meta.series = Some(SeriesInfo::new(name, series_index));
    }

    Ok(meta)
}

/// Finds the OPF path inside `META-INF/container.xml`.
pub fn rootfile_path(container_xml: &str) -> Result<Option<String>, ExtractError> {
    let mut reader = Reader::from_str(container_xml);
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) | Ok(Event::Empty(e)) if e.local_name().as_ref() == b"rootfile" => {
                return Ok(attribute(&e, b"full-path"));
            }
            Ok(Event::Eof) => return Ok(None),
            Err(e) => return Err(ExtractError::Xml(e.to_string())),
            _ => {}
        }
        buf.clear();
    }
}

fn apply_dc(meta: &mut ExtractedMetadata, local: &[u8], text: String) {
    let Some(text) = non_empty(text) else {
        return;
    };
    match local {
        b"title" if meta.title.is_none() => meta.title = Some(text),
        b"creator" => meta.authors.push(text),
        b"identifier" => meta.identifiers.push(text),
        b"publisher" if meta.publisher.is_none() => meta.publisher = Some(text),
        b"date" if meta.publish_date.is_none() => meta.publish_date = Some(text),
        b"language" if meta.language.is_none() => meta.language = Some(text),
        b"description" if meta.description.is_none() => meta.description = Some(text),
        b"subject" => meta.subjects.push(text),
        _ => {}
    }
}

fn read_element_text(reader: &mut Reader<&[u8]>) -> Result<String, ExtractError> {
    let mut buf = Vec::new();
    let mut text = String::new();
    let mut depth = 1;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Text(e)) => {
                let chunk = e.unescape().map_err(|e| ExtractError::Xml(e.to_string()))?;
                text.push_str(&chunk);
            }
            Ok(Event::CData(e)) => text.push_str(&String::from_utf8_lossy(&e)),
            Ok(Event::Start(_)) => depth += 1,
            Ok(Event::End(_)) => {
                depth -= 1;
                if depth == 0 {
                    break;
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(ExtractError::Xml(e.to_string())),
            _ => {}
        }
        buf.clear();
    }

    Ok(text)
}

fn attribute(e: &BytesStart<'_>, key: &[u8]) -> Option<String> {
    e.attributes()
        .flatten()
        .find(|a| a.key.local_name().as_ref() == key)
        .and_then(|a| a.unescape_value().ok().map(|v| v.to_string()))
}

fn non_empty(value: String) -> Option<String> {
    let trimmed = value.split_whitespace().collect::<Vec<_>>().join(" ");
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const OPF: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<package xmlns="http://www.idpf.org/2007/opf" version="2.0">
  <metadata xmlns:dc="http://purl.org/dc/elements/1.1/" xmlns:opf="http://www.idpf.org/2007/opf">
    <dc:title>The Way of Kings</dc:title>
    <dc:creator opf:role="aut">Brandon Sanderson</dc:creator>
    <dc:identifier opf:scheme="ISBN">urn:isbn:9780765326355</dc:identifier>
    <dc:identifier opf:scheme="uuid">b6f3c2a8-0000-4000-8000-000000000000</dc:identifier>
    <dc:publisher>Tor Books</dc:publisher>
    <dc:date>2010-08-31</dc:date>
    <dc:language>en</dc:language>
    <dc:subject>Fantasy fiction</dc:subject>
    <dc:subject>Epic</dc:subject>
    <dc:description>Roshar is a world of stone &amp; storms.</dc:description>
    <meta name="calibre:series" content="The Stormlight Archive"/>
    <meta name="calibre:series_index" content="1.0"/>
  </metadata>
</package>"#;

    #[test]
    fn test_parse_opf_fields() {
        let meta = parse_opf(OPF).unwrap();
        assert_eq!(meta.title.as_deref(), Some("The Way of Kings"));
        assert_eq!(meta.authors, vec!["Brandon Sanderson"]);
        assert_eq!(meta.identifiers.len(), 2);
        assert_eq!(meta.identifiers[0], "urn:isbn:9780765326355");
        assert_eq!(meta.publisher.as_deref(), Some("Tor Books"));
        assert_eq!(meta.subjects, vec!["Fantasy fiction", "Epic"]);
        assert_eq!(
            meta.description.as_deref(),
            Some("Roshar is a world of stone & storms.")
        );
        let series = meta.series.unwrap();
        assert_eq!(series.name, "The Stormlight Archive");
        assert_eq!(series.index, Some(1.0));
    }

    #[test]
    fn test_parse_epub3_collection() {
        let xml = r##"<package><metadata>
            <dc:title xmlns:dc="http://purl.org/dc/elements/1.1/">Leviathan Wakes</dc:title>
            <meta property="belongs-to-collection" id="c01">The Expanse</meta>
            <meta refines="#c01" property="group-position">1</meta>
        </metadata></package>"##;
        let meta = parse_opf(xml).unwrap();
        let series = meta.series.unwrap();
        assert_eq!(series.name, "The Expanse");
        assert_eq!(series.index, Some(1.0));
    }

    #[test]
    fn test_rootfile_path() {
        let xml = r#"<?xml version="1.0"?>
<container version="1.0" xmlns="urn:oasis:names:tc:opendocument:xmlns:container">
  <rootfiles>
    <rootfile full-path="OEBPS/content.opf" media-type="application/oebps-package+xml"/>
  </rootfiles>
</container>"#;
        assert_eq!(
            rootfile_path(xml).unwrap().as_deref(),
            Some("OEBPS/content.opf")
        );
    }

    #[test]
    fn test_empty_elements_ignored() {
        let xml = "<package><metadata><dc:title>  </dc:title></metadata></package>";
        let meta = parse_opf(xml).unwrap();
        assert!(meta.title.is_none());
    }
}
