//! Test support: mock metadata sources and builders for sample book files.
//!
//! # Example
//!
//! ```rust,ignore
//! use librarian_core::enricher::{EnrichmentCandidate, SourceTag};
//! use librarian_core::testing::MockMetadataSource;
//!
//! let oclc = MockMetadataSource::new(SourceTag::Oclc);
//! oclc.add_isbn(
//!     "9780132350884",
//!     EnrichmentCandidate::new(SourceTag::Oclc).with_classification("005.1"),
//! )
//! .await;
//! ```

mod mock_metadata_source;

pub use mock_metadata_source::MockMetadataSource;

/// Builders for minimal but well-formed EPUB, MOBI and PDF files.
///
/// These panic on I/O errors; they are only meant for tests.
pub mod fixtures {
    use flate2::write::ZlibEncoder;
    use flate2::Compression;
    use std::fs::File;
    use std::io::Write;
    use std::path::Path;
    use zip::write::SimpleFileOptions;
    use zip::{CompressionMethod, ZipWriter};

    /// Contents of a generated EPUB.
    #[derive(Debug, Clone, Default)]
    pub struct EpubSpec {
        pub title: Option<String>,
        pub authors: Vec<String>,
        /// Raw `dc:identifier` values, e.g. `urn:isbn:9780132350884`.
        pub identifiers: Vec<String>,
        pub subjects: Vec<String>,
        pub publisher: Option<String>,
        pub language: Option<String>,
        /// Calibre series name and index.
        pub series: Option<(String, f32)>,
        /// Body of a `copyright.xhtml` page.
        pub copyright_text: Option<String>,
    }

    impl EpubSpec {
        pub fn new(title: &str, authors: &[&str]) -> Self {
            Self {
                title: Some(title.to_string()),
                authors: authors.iter().map(|a| a.to_string()).collect(),
                ..Default::default()
            }
        }

        pub fn with_isbn(mut self, isbn: &str) -> Self {
            self.identifiers.push(format!("urn:isbn:{}", isbn));
            self
        }

        pub fn with_subjects(mut self, subjects: &[&str]) -> Self {
            self.subjects = subjects.iter().map(|s| s.to_string()).collect();
            self
        }

        pub fn with_series(mut self, name: &str, index: f32) -> Self {
            self.series = Some((name.to_string(), index));
            self
        }
    }

    /// Writes a zip archive with the given entries, in order.
    pub fn write_zip(path: &Path, entries: &[(&str, &[u8])]) {
        let file = File::create(path).expect("create zip");
        let mut zip = ZipWriter::new(file);
        for (name, data) in entries {
            let options = if *name == "mimetype" {
                SimpleFileOptions::default().compression_method(CompressionMethod::Stored)
            } else {
                SimpleFileOptions::default()
            };
            zip.start_file(*name, options).expect("start zip entry");
            zip.write_all(data).expect("write zip entry");
        }
        zip.finish().expect("finish zip");
    }

    /// Writes an EPUB with an OPF package describing `spec`.
    pub fn write_epub(path: &Path, spec: &EpubSpec) {
        let container = r#"<?xml version="1.0"?>
<container version="1.0" xmlns="urn:oasis:names:tc:opendocument:xmlns:container">
  <rootfiles>
    <rootfile full-path="OEBPS/content.opf" media-type="application/oebps-package+xml"/>
  </rootfiles>
</container>"#;

        let mut metadata = String::new();
        if let Some(title) = &spec.title {
            metadata.push_str(&format!("    <dc:title>{}</dc:title>\n", escape(title)));
        }
        for author in &spec.authors {
            metadata.push_str(&format!("    <dc:creator>{}</dc:creator>\n", escape(author)));
        }
        for identifier in &spec.identifiers {
            metadata.push_str(&format!(
                "    <dc:identifier>{}</dc:identifier>\n",
                escape(identifier)
            ));
        }
        for subject in &spec.subjects {
            metadata.push_str(&format!("    <dc:subject>{}</dc:subject>\n", escape(subject)));
        }
        if let Some(publisher) = &spec.publisher {
            metadata.push_str(&format!(
                "    <dc:publisher>{}</dc:publisher>\n",
                escape(publisher)
            ));
        }
        if let Some(language) = &spec.language {
            metadata.push_str(&format!("    <dc:language>{}</dc:language>\n", escape(language)));
        }
        if let Some((name, index)) = &spec.series {
            metadata.push_str(&format!(
                "    <meta name=\"calibre:series\" content=\"{}\"/>\n    <meta name=\"calibre:series_index\" content=\"{}\"/>\n",
                escape(name),
                index
            ));
        }

        let opf = format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<package xmlns="http://www.idpf.org/2007/opf" version="2.0">
  <metadata xmlns:dc="http://purl.org/dc/elements/1.1/">
{}  </metadata>
  <manifest/>
</package>"#,
            metadata
        );

        let chapter = format!(
            "<html><body><h1>{}</h1><p>Chapter one.</p></body></html>",
            escape(spec.title.as_deref().unwrap_or("Untitled"))
        );

        let mut entries: Vec<(&str, Vec<u8>)> = vec![
            ("mimetype", b"application/epub+zip".to_vec()),
            ("META-INF/container.xml", container.as_bytes().to_vec()),
            ("OEBPS/content.opf", opf.into_bytes()),
            ("OEBPS/chapter1.xhtml", chapter.into_bytes()),
        ];
        if let Some(text) = &spec.copyright_text {
            let page = format!(
                "<html><body><p>Copyright</p><p>{}</p></body></html>",
                escape(text)
            );
            entries.push(("OEBPS/copyright.xhtml", page.into_bytes()));
        }

        let borrowed: Vec<(&str, &[u8])> =
            entries.iter().map(|(n, d)| (*n, d.as_slice())).collect();
        write_zip(path, &borrowed);
    }

    /// A MOBI file: Palm database header, one uncompressed text record and
    /// an EXTH block with `(record type, value)` pairs.
    pub fn mobi_bytes(full_name: &str, exth: &[(u32, &str)]) -> Vec<u8> {
        const RECORD_COUNT: usize = 2;
        const MOBI_HEADER_LEN: usize = 232;
        let rec0 = 78 + RECORD_COUNT * 8 + 2;

        let mut exth_block = Vec::new();
        if !exth.is_empty() {
            let mut records = Vec::new();
            for (kind, value) in exth {
                records.extend_from_slice(&kind.to_be_bytes());
                records.extend_from_slice(&((value.len() + 8) as u32).to_be_bytes());
                records.extend_from_slice(value.as_bytes());
            }
            exth_block.extend_from_slice(b"EXTH");
            exth_block.extend_from_slice(&((records.len() + 12) as u32).to_be_bytes());
            exth_block.extend_from_slice(&(exth.len() as u32).to_be_bytes());
            exth_block.extend_from_slice(&records);
        }

        let name_offset = 16 + MOBI_HEADER_LEN + exth_block.len();
        let mut record0 = vec![0u8; 16 + MOBI_HEADER_LEN];
        // PalmDOC header: no compression, one text record.
        record0[0..2].copy_from_slice(&1u16.to_be_bytes());
        record0[8..10].copy_from_slice(&1u16.to_be_bytes());
        record0[16..20].copy_from_slice(b"MOBI");
        record0[20..24].copy_from_slice(&(MOBI_HEADER_LEN as u32).to_be_bytes());
        record0[84..88].copy_from_slice(&(name_offset as u32).to_be_bytes());
        record0[88..92].copy_from_slice(&(full_name.len() as u32).to_be_bytes());
        let flags: u32 = if exth.is_empty() { 0 } else { 0x40 };
        record0[128..132].copy_from_slice(&flags.to_be_bytes());
        record0.extend_from_slice(&exth_block);
        record0.extend_from_slice(full_name.as_bytes());
        record0.extend_from_slice(&[0, 0]);

        let text = format!("{} begins here.", full_name);
        let rec1 = rec0 + record0.len();

        let mut bytes = vec![0u8; 78];
        let db_name: Vec<u8> = full_name.bytes().take(31).collect();
        bytes[..db_name.len()].copy_from_slice(&db_name);
        bytes[60..68].copy_from_slice(b"BOOKMOBI");
        bytes[76..78].copy_from_slice(&(RECORD_COUNT as u16).to_be_bytes());
        for (i, offset) in [rec0, rec1].iter().enumerate() {
            bytes.extend_from_slice(&(*offset as u32).to_be_bytes());
            bytes.extend_from_slice(&[0, 0, 0, (i * 2) as u8]);
        }
        bytes.extend_from_slice(&[0, 0]);
        bytes.extend_from_slice(&record0);
        bytes.extend_from_slice(text.as_bytes());
        bytes
    }

    /// A PDF with an Info dictionary and one Flate-compressed page stream
    /// showing `body`.
    pub fn pdf_bytes(title: &str, author: &str, body: &str) -> Vec<u8> {
        let content = format!("BT /F1 12 Tf 72 712 Td ({}) Tj ET", pdf_escape(body));
        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(content.as_bytes()).expect("deflate");
        let compressed = encoder.finish().expect("deflate");

        let mut pdf = Vec::new();
        pdf.extend_from_slice(b"%PDF-1.4\n");
        pdf.extend_from_slice(b"1 0 obj\n<< /Type /Catalog /Pages 2 0 R >>\nendobj\n");
        pdf.extend_from_slice(b"2 0 obj\n<< /Type /Pages /Kids [] /Count 0 >>\nendobj\n");
        pdf.extend_from_slice(
            format!(
                "3 0 obj\n<< /Title ({}) /Author ({}) >>\nendobj\n",
                pdf_escape(title),
                pdf_escape(author)
            )
            .as_bytes(),
        );
        pdf.extend_from_slice(
            format!(
                "4 0 obj\n<< /Length {} /Filter /FlateDecode >>\nstream\n",
                compressed.len()
            )
            .as_bytes(),
        );
        pdf.extend_from_slice(&compressed);
        pdf.extend_from_slice(b"\nendstream\nendobj\n");
        pdf.extend_from_slice(b"trailer\n<< /Root 1 0 R /Info 3 0 R >>\n%%EOF\n");
        pdf
    }

    fn escape(text: &str) -> String {
        text.replace('&', "&amp;")
            .replace('<', "&lt;")
            .replace('>', "&gt;")
            .replace('"', "&quot;")
    }

    fn pdf_escape(text: &str) -> String {
        text.replace('\\', "\\\\")
            .replace('(', "\\(")
            .replace(')', "\\)")
    }
}

#[cfg(test)]
mod tests {
    use super::fixtures::{self, EpubSpec};
    use crate::inspector::{detect_format, BookFormat};
    use tempfile::TempDir;

    #[test]
    fn test_fixtures_detect_as_their_formats() {
        let temp = TempDir::new().unwrap();

        let epub = temp.path().join("a.epub");
        fixtures::write_epub(&epub, &EpubSpec::new("Title", &["Author"]).with_isbn("9780132350884"));
        assert_eq!(detect_format(&epub).unwrap(), Some(BookFormat::Epub));

        let mobi = temp.path().join("a.mobi");
        std::fs::write(&mobi, fixtures::mobi_bytes("Title", &[(100, "Author")])).unwrap();
        assert_eq!(detect_format(&mobi).unwrap(), Some(BookFormat::Mobi));

        let pdf = temp.path().join("a.pdf");
        std::fs::write(&pdf, fixtures::pdf_bytes("Title", "Author", "Body")).unwrap();
        assert_eq!(detect_format(&pdf).unwrap(), Some(BookFormat::Pdf));
    }
}
