//! Text extraction for uploaded documents (PDF, DOCX, TXT).
//!
//! Dispatch is by filename extension. Extraction is treated as a pure
//! function of the bytes; failures surface as [`EngineError::Extraction`]
//! and mark the owning ingestion task failed.

use std::io::Read;

use crate::error::EngineError;

/// Maximum decompressed bytes read from a single ZIP entry (zip-bomb protection).
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

/// File extensions accepted by the ingestion path.
pub const SUPPORTED_EXTENSIONS: &[&str] = &["pdf", "docx", "txt", "md"];

/// Lowercased extension of a filename, if any.
pub fn file_extension(filename: &str) -> Option<String> {
    filename.rsplit_once('.').map(|(_, ext)| ext.to_lowercase())
}

/// Whether the filename carries a supported extension.
pub fn is_supported(filename: &str) -> bool {
    file_extension(filename)
        .map(|ext| SUPPORTED_EXTENSIONS.contains(&ext.as_str()))
        .unwrap_or(false)
}

/// Extract plain UTF-8 text from uploaded bytes based on the filename extension.
pub fn extract_text(bytes: &[u8], filename: &str) -> Result<String, EngineError> {
    let ext = file_extension(filename)
        .ok_or_else(|| EngineError::Validation(format!("no file extension: {}", filename)))?;

    match ext.as_str() {
        "pdf" => extract_pdf(bytes),
        "docx" => extract_docx(bytes),
        "txt" | "md" => extract_txt(bytes),
        other => Err(EngineError::Validation(format!(
            "unsupported file type: {}",
            other
        ))),
    }
}

fn extract_pdf(bytes: &[u8]) -> Result<String, EngineError> {
    pdf_extract::extract_text_from_mem(bytes).map_err(|e| EngineError::Extraction(e.to_string()))
}

fn extract_txt(bytes: &[u8]) -> Result<String, EngineError> {
    String::from_utf8(bytes.to_vec())
        .map_err(|_| EngineError::Extraction("file is not valid UTF-8 text".to_string()))
}

fn extract_docx(bytes: &[u8]) -> Result<String, EngineError> {
    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes))
        .map_err(|e| EngineError::Extraction(e.to_string()))?;

    let mut doc_xml = Vec::new();
    let mut found = false;
    for i in 0..archive.len() {
        let entry = archive
            .by_index(i)
            .map_err(|e| EngineError::Extraction(e.to_string()))?;
        if entry.name() == "word/document.xml" {
            entry
                .take(MAX_XML_ENTRY_BYTES)
                .read_to_end(&mut doc_xml)
                .map_err(|e| EngineError::Extraction(e.to_string()))?;
            if doc_xml.len() as u64 >= MAX_XML_ENTRY_BYTES {
                return Err(EngineError::Extraction(
                    "word/document.xml exceeds size limit".to_string(),
                ));
            }
            found = true;
            break;
        }
    }
    if !found {
        return Err(EngineError::Extraction(
            "word/document.xml not found".to_string(),
        ));
    }
    extract_w_t_elements(&doc_xml)
}

/// Collect the text of every `<w:t>` run, separating paragraphs with newlines.
fn extract_w_t_elements(xml: &[u8]) -> Result<String, EngineError> {
    use quick_xml::events::Event;

    let mut out = String::new();
    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut in_text_run = false;
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) if e.local_name().as_ref() == b"t" => in_text_run = true,
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"t" => in_text_run = false,
                b"p" if !out.is_empty() && !out.ends_with('\n') => out.push('\n'),
                _ => {}
            },
            Ok(Event::Text(t)) if in_text_run => {
                out.push_str(t.unescape().unwrap_or_default().as_ref());
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(EngineError::Extraction(e.to_string())),
            _ => {}
        }
        buf.clear();
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn supported_extensions() {
        assert!(is_supported("report.pdf"));
        assert!(is_supported("notes.TXT"));
        assert!(is_supported("handbook.docx"));
        assert!(is_supported("readme.md"));
        assert!(!is_supported("image.png"));
        assert!(!is_supported("no_extension"));
    }

    #[test]
    fn txt_passthrough() {
        let text = extract_text("hello world".as_bytes(), "a.txt").unwrap();
        assert_eq!(text, "hello world");
    }

    #[test]
    fn invalid_utf8_txt_fails() {
        let err = extract_text(&[0xff, 0xfe, 0x00], "a.txt").unwrap_err();
        assert!(matches!(err, EngineError::Extraction(_)));
    }

    #[test]
    fn unsupported_type_is_validation_error() {
        let err = extract_text(b"data", "a.png").unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));
    }

    #[test]
    fn invalid_pdf_fails() {
        let err = extract_text(b"not a pdf", "a.pdf").unwrap_err();
        assert!(matches!(err, EngineError::Extraction(_)));
    }

    #[test]
    fn invalid_zip_fails_for_docx() {
        let err = extract_text(b"not a zip", "a.docx").unwrap_err();
        assert!(matches!(err, EngineError::Extraction(_)));
    }
}
