//! File format support tests using hand-assembled minimal PDF and DOCX
//! fixtures, ingested through a real engine.

use std::io::Write;

use tempfile::TempDir;

use recall::config::Config;
use recall::engine::Engine;
use recall::extract::extract_text;
use recall::models::IngestStatus;

/// A minimal one-page PDF with `text` drawn in Helvetica. Offsets in the
/// xref table are computed while assembling, so the file is well-formed.
fn minimal_pdf(text: &str) -> Vec<u8> {
    assert!(!text.contains(['(', ')', '\\']));
    let content = format!("BT /F1 12 Tf 72 720 Td ({}) Tj ET", text);
    let objects = vec![
        "<< /Type /Catalog /Pages 2 0 R >>".to_string(),
        "<< /Type /Pages /Kids [3 0 R] /Count 1 >>".to_string(),
        "<< /Type /Page /Parent 2 0 R /MediaBox [0 0 612 792] \
         /Contents 4 0 R /Resources << /Font << /F1 5 0 R >> >> >>"
            .to_string(),
        format!(
            "<< /Length {} >>\nstream\n{}\nendstream",
            content.len(),
            content
        ),
        "<< /Type /Font /Subtype /Type1 /BaseFont /Helvetica >>".to_string(),
    ];

    let mut out: Vec<u8> = b"%PDF-1.4\n".to_vec();
    let mut offsets = Vec::new();
    for (i, body) in objects.iter().enumerate() {
        offsets.push(out.len());
        out.extend_from_slice(format!("{} 0 obj\n{}\nendobj\n", i + 1, body).as_bytes());
    }
    let xref_pos = out.len();
    out.extend_from_slice(format!("xref\n0 {}\n0000000000 65535 f \n", objects.len() + 1).as_bytes());
    for offset in &offsets {
        out.extend_from_slice(format!("{:010} 00000 n \n", offset).as_bytes());
    }
    out.extend_from_slice(
        format!(
            "trailer\n<< /Size {} /Root 1 0 R >>\nstartxref\n{}\n%%EOF\n",
            objects.len() + 1,
            xref_pos
        )
        .as_bytes(),
    );
    out
}

/// A minimal DOCX: a ZIP holding only `word/document.xml` with one
/// paragraph per input string.
fn minimal_docx(paragraphs: &[&str]) -> Vec<u8> {
    let mut body = String::from(
        r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<w:document xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main"><w:body>"#,
    );
    for p in paragraphs {
        body.push_str(&format!("<w:p><w:r><w:t>{}</w:t></w:r></w:p>", p));
    }
    body.push_str("</w:body></w:document>");

    let mut zip = zip::ZipWriter::new(std::io::Cursor::new(Vec::new()));
    zip.start_file("word/document.xml", zip::write::SimpleFileOptions::default())
        .unwrap();
    zip.write_all(body.as_bytes()).unwrap();
    zip.finish().unwrap().into_inner()
}

async fn open_engine(dir: &TempDir) -> Engine {
    let config = Config::minimal(dir.path().join("recall.sqlite"));
    Engine::open(config).await.unwrap()
}

#[tokio::test]
async fn pdf_upload_is_extracted_and_searchable() {
    let dir = TempDir::new().unwrap();
    let engine = open_engine(&dir).await;

    let pdf = minimal_pdf("The conference room booking code is 4417");
    let outcome = engine.ingest("rooms.pdf", pdf).await.unwrap();
    assert_eq!(outcome.status, IngestStatus::Processing);

    let results = engine
        .search("conference room booking code", None)
        .await
        .unwrap();
    assert!(!results.is_empty());
    assert_eq!(results[0].filename, "rooms.pdf");
    assert!(results[0].text.contains("4417"));
}

#[tokio::test]
async fn docx_upload_is_extracted_and_searchable() {
    let dir = TempDir::new().unwrap();
    let engine = open_engine(&dir).await;

    let docx = minimal_docx(&["Expense reports are due by the fifth business day."]);
    let outcome = engine.ingest("expenses.docx", docx).await.unwrap();
    assert_eq!(outcome.status, IngestStatus::Processing);

    let results = engine
        .search("expense reports due business day", None)
        .await
        .unwrap();
    assert!(!results.is_empty());
    assert_eq!(results[0].filename, "expenses.docx");
}

#[test]
fn docx_paragraphs_become_newlines() {
    let docx = minimal_docx(&["First paragraph.", "Second paragraph."]);
    let text = extract_text(&docx, "two.docx").unwrap();
    assert_eq!(text.trim(), "First paragraph.\nSecond paragraph.");
}

#[test]
fn pdf_fixture_extracts_its_text() {
    let pdf = minimal_pdf("hello fixture");
    let text = extract_text(&pdf, "fixture.pdf").unwrap();
    assert!(text.contains("hello fixture"));
}

#[tokio::test]
async fn markdown_is_ingested_as_text() {
    let dir = TempDir::new().unwrap();
    let engine = open_engine(&dir).await;

    let outcome = engine
        .ingest(
            "notes.md",
            b"# Release process\n\nTag the commit and push to the release branch.".to_vec(),
        )
        .await
        .unwrap();
    assert_eq!(outcome.status, IngestStatus::Processing);

    let results = engine
        .search("tag the commit release branch", None)
        .await
        .unwrap();
    assert!(!results.is_empty());
    assert_eq!(results[0].filename, "notes.md");
}
