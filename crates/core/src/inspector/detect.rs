//! Container-level format detection.
//!
//! The header bytes decide the format. The extension only breaks the tie
//! between MOBI and AZW3, which share a Palm database header.

use std::fs::File;
use std::io::Read;
use std::path::Path;

use super::types::BookFormat;

const HEADER_LEN: usize = 68;

/// Detects the container format of `path`.
///
/// Returns `Ok(None)` for files no extractor understands.
pub fn detect_format(path: &Path) -> std::io::Result<Option<BookFormat>> {
    let mut file = File::open(path)?;
    let mut header = [0u8; HEADER_LEN];
    let bytes_read = read_up_to(&mut file, &mut header)?;
    let header = &header[..bytes_read];

    if bytes_read < 4 {
        return Ok(None);
    }

    let format = match header {
        [b'%', b'P', b'D', b'F', ..] => Some(BookFormat::Pdf),
        [b'P', b'K', 0x03, 0x04, ..] => detect_zip(path),
        [b'A', b'T', b'&', b'T', b'F', b'O', b'R', b'M', ..] => Some(BookFormat::Djvu),
        [b'R', b'a', b'r', b'!', 0x1A, 0x07, ..] => Some(BookFormat::Cbr),
        _ if bytes_read == HEADER_LEN && is_palm_ebook(&header[60..68]) => {
            Some(palm_format(path))
        }
        _ => None,
    };

    Ok(format)
}

fn read_up_to(file: &mut File, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match file.read(&mut buf[filled..])? {
            0 => break,
            n => filled += n,
        }
    }
    Ok(filled)
}

fn is_palm_ebook(type_creator: &[u8]) -> bool {
    type_creator == b"BOOKMOBI" || type_creator == b"TEXtREAd"
}

fn palm_format(path: &Path) -> BookFormat {
    match path
        .extension()
        .and_then(|e| e.to_str())
        .and_then(BookFormat::parse)
    {
        Some(BookFormat::Azw3) => BookFormat::Azw3,
        _ => BookFormat::Mobi,
    }
}

/// Tells EPUB from comic archives by looking inside the zip.
fn detect_zip(path: &Path) -> Option<BookFormat> {
    let file = File::open(path).ok()?;
    let mut archive = zip::ZipArchive::new(file).ok()?;

    if let Ok(mut entry) = archive.by_name("mimetype") {
        let mut mimetype = String::new();
        if entry.read_to_string(&mut mimetype).is_ok()
            && mimetype.trim() == "application/epub+zip"
        {
            return Some(BookFormat::Epub);
        }
    }

    let names: Vec<String> = archive.file_names().map(|n| n.to_lowercase()).collect();
    if names.iter().any(|n| n == "meta-inf/container.xml") {
        return Some(BookFormat::Epub);
    }

    let images = names
        .iter()
        .filter(|n| {
            n.ends_with(".jpg")
                || n.ends_with(".jpeg")
                || n.ends_with(".png")
                || n.ends_with(".webp")
                || n.ends_with(".gif")
        })
        .count();
    if images > 0 && images * 2 >= names.len() {
        return Some(BookFormat::Cbz);
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::fixtures;
    use tempfile::TempDir;

    #[test]
    fn test_detects_pdf_regardless_of_extension() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("book.epub");
        std::fs::write(&path, b"%PDF-1.7\n%\xe2\xe3\xcf\xd3\n").unwrap();
        assert_eq!(detect_format(&path).unwrap(), Some(BookFormat::Pdf));
    }

    #[test]
    fn test_detects_epub_container() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("mystery.zip");
        fixtures::write_epub(&path, &fixtures::EpubSpec::default());
        assert_eq!(detect_format(&path).unwrap(), Some(BookFormat::Epub));
    }

    #[test]
    fn test_detects_cbz() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("comic.cbz");
        fixtures::write_zip(
            &path,
            &[("001.jpg", b"\xff\xd8\xff".as_slice()), ("002.jpg", b"\xff\xd8\xff".as_slice())],
        );
        assert_eq!(detect_format(&path).unwrap(), Some(BookFormat::Cbz));
    }

    #[test]
    fn test_plain_zip_is_unsupported() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("code.zip");
        fixtures::write_zip(&path, &[("main.rs", b"fn main() {}".as_slice())]);
        assert_eq!(detect_format(&path).unwrap(), None);
    }

    #[test]
    fn test_detects_mobi_and_azw3() {
        let temp = TempDir::new().unwrap();
        let mobi = temp.path().join("book.mobi");
        let azw3 = temp.path().join("book.azw3");
        let bytes = fixtures::mobi_bytes("Title", &[]);
        std::fs::write(&mobi, &bytes).unwrap();
        std::fs::write(&azw3, &bytes).unwrap();
        assert_eq!(detect_format(&mobi).unwrap(), Some(BookFormat::Mobi));
        assert_eq!(detect_format(&azw3).unwrap(), Some(BookFormat::Azw3));
    }

    #[test]
    fn test_text_file_unsupported() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("notes.pdf");
        std::fs::write(&path, b"just some notes about a book").unwrap();
        assert_eq!(detect_format(&path).unwrap(), None);
    }

    #[test]
    fn test_missing_file_is_io_error() {
        assert!(detect_format(Path::new("/nonexistent/book.pdf")).is_err());
    }
}
