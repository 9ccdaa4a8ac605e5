//! Multi-format text extraction for uploaded documents.
//!
//! The upload handler supplies raw bytes plus the original filename; this
//! module detects the file type from the extension, enforces the size
//! ceiling, and returns plain UTF-8 text with a title guess. Parsing never
//! panics — a broken byte stream comes back as `ExtractionFailed` and the
//! upload is rejected with a readable hint.

use std::io::Read;

use crate::error::KnowledgeError;
use crate::models::FileType;
use crate::sanitize::sanitize_collapse;

/// Hard upload ceiling in bytes. Checked before any parsing work; an
/// oversized file never reaches a parser.
pub const MAX_FILE_SIZE: u64 = 15 * 1024 * 1024;

/// Maximum decompressed bytes read from a single ZIP entry (zip-bomb guard).
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

/// Longest title we will derive from document content.
const MAX_TITLE_CHARS: usize = 120;
/// Preview length, in characters of collapsed text.
const PREVIEW_CHARS: usize = 500;

/// Result of a successful extraction: plain text plus lightweight metadata.
#[derive(Debug, Clone)]
pub struct ExtractedDocument {
    pub title: String,
    pub content: String,
    pub file_type: FileType,
    pub file_size: u64,
}

/// Extract plain text from an uploaded file.
///
/// Fails with `UnsupportedFileType` for unknown extensions (before any
/// parsing), `FileTooLarge` for oversized input (before any parsing),
/// `ExtractionFailed` when the parser cannot decode the bytes, and
/// `EmptyContent` when decoding succeeds but yields no usable text.
pub fn extract(bytes: &[u8], filename: &str) -> Result<ExtractedDocument, KnowledgeError> {
    extract_with_limit(bytes, filename, MAX_FILE_SIZE)
}

/// [`extract`] with an explicit size ceiling (the configured limit).
pub fn extract_with_limit(
    bytes: &[u8],
    filename: &str,
    max_size: u64,
) -> Result<ExtractedDocument, KnowledgeError> {
    let file_type = FileType::from_filename(filename)?;

    let file_size = bytes.len() as u64;
    if file_size > max_size {
        return Err(KnowledgeError::FileTooLarge {
            size: file_size,
            limit: max_size,
        });
    }

    let content = match file_type {
        FileType::Pdf => extract_pdf(bytes)?,
        FileType::Docx => extract_docx(bytes)?,
        FileType::Epub => extract_epub(bytes)?,
        FileType::Txt | FileType::Md => String::from_utf8_lossy(bytes).into_owned(),
    };

    if content.trim().is_empty() {
        return Err(KnowledgeError::EmptyContent);
    }

    let title = guess_title(&content, filename);

    Ok(ExtractedDocument {
        title,
        content,
        file_type,
        file_size,
    })
}

/// First markdown heading or first non-empty line, truncated; filename stem
/// as the fallback.
pub fn guess_title(content: &str, filename: &str) -> String {
    let from_content = content
        .lines()
        .map(|line| line.trim().trim_start_matches('#').trim())
        .find(|line| !line.is_empty())
        .map(sanitize_collapse)
        .filter(|line| !line.is_empty())
        .map(|line| truncate_chars(&line, MAX_TITLE_CHARS));

    from_content.unwrap_or_else(|| {
        let stem = filename.rsplit('/').next().unwrap_or(filename);
        let stem = stem.rsplit_once('.').map(|(s, _)| s).unwrap_or(stem);
        if stem.is_empty() {
            "Untitled document".to_string()
        } else {
            stem.to_string()
        }
    })
}

/// Short collapsed excerpt from the start of the document, used as the
/// upload response's first-page preview.
pub fn preview(content: &str) -> String {
    truncate_chars(&sanitize_collapse(content), PREVIEW_CHARS)
}

/// First couple of sentences, for the upload summary line.
pub fn summarize(content: &str) -> String {
    let collapsed = sanitize_collapse(content);
    let mut end = collapsed.len();
    let mut sentences = 0;
    for (i, c) in collapsed.char_indices() {
        if matches!(c, '.' | '!' | '?') {
            sentences += 1;
            if sentences == 2 {
                end = i + c.len_utf8();
                break;
            }
        }
    }
    truncate_chars(&collapsed[..end], 300)
}

fn truncate_chars(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((i, _)) => format!("{}…", &text[..i].trim_end()),
        None => text.to_string(),
    }
}

fn extract_pdf(bytes: &[u8]) -> Result<String, KnowledgeError> {
    pdf_extract::extract_text_from_mem(bytes).map_err(|e| KnowledgeError::extraction(e.to_string()))
}

fn open_archive(bytes: &[u8]) -> Result<zip::ZipArchive<std::io::Cursor<&[u8]>>, KnowledgeError> {
    zip::ZipArchive::new(std::io::Cursor::new(bytes))
        .map_err(|e| KnowledgeError::extraction(e.to_string()))
}

fn read_zip_entry_bounded(
    archive: &mut zip::ZipArchive<std::io::Cursor<&[u8]>>,
    name: &str,
) -> Result<Vec<u8>, KnowledgeError> {
    let entry = archive
        .by_name(name)
        .map_err(|e| KnowledgeError::extraction(e.to_string()))?;
    let mut out = Vec::new();
    entry
        .take(MAX_XML_ENTRY_BYTES)
        .read_to_end(&mut out)
        .map_err(|e| KnowledgeError::extraction(e.to_string()))?;
    if out.len() as u64 >= MAX_XML_ENTRY_BYTES {
        return Err(KnowledgeError::extraction(format!(
            "ZIP entry {} exceeds size limit",
            name
        )));
    }
    Ok(out)
}

fn extract_docx(bytes: &[u8]) -> Result<String, KnowledgeError> {
    let mut archive = open_archive(bytes)?;
    if archive.by_name("word/document.xml").is_err() {
        return Err(KnowledgeError::extraction(
            "word/document.xml not found".to_string(),
        ));
    }
    let doc_xml = read_zip_entry_bounded(&mut archive, "word/document.xml")?;
    extract_docx_runs(&doc_xml)
}

/// Pull `<w:t>` text runs out of a WordprocessingML body, inserting a
/// newline at each paragraph close so the chunker sees real paragraph
/// boundaries.
fn extract_docx_runs(xml: &[u8]) -> Result<String, KnowledgeError> {
    let mut out = String::new();
    let mut reader = quick_xml::Reader::from_reader(xml);
    reader.config_mut().trim_text(false);
    let mut buf = Vec::new();
    let mut in_text_run = false;
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(quick_xml::events::Event::Start(e)) => {
                if e.local_name().as_ref() == b"t" {
                    in_text_run = true;
                }
            }
            Ok(quick_xml::events::Event::Text(te)) if in_text_run => {
                out.push_str(te.unescape().unwrap_or_default().as_ref());
            }
            Ok(quick_xml::events::Event::End(e)) => match e.local_name().as_ref() {
                b"t" => in_text_run = false,
                b"p" => out.push('\n'),
                _ => {}
            },
            Ok(quick_xml::events::Event::Eof) => break,
            Err(e) => return Err(KnowledgeError::extraction(e.to_string())),
            _ => {}
        }
        buf.clear();
    }
    Ok(out)
}

fn extract_epub(bytes: &[u8]) -> Result<String, KnowledgeError> {
    let mut archive = open_archive(bytes)?;

    // Content documents in archive order approximate the spine well enough
    // for retrieval; we do not chase the OPF manifest.
    let mut doc_names: Vec<String> = archive
        .file_names()
        .filter(|n| {
            let lower = n.to_ascii_lowercase();
            lower.ends_with(".xhtml") || lower.ends_with(".html") || lower.ends_with(".htm")
        })
        .map(|s| s.to_string())
        .collect();
    doc_names.sort();

    if doc_names.is_empty() {
        return Err(KnowledgeError::extraction(
            "no content documents in EPUB archive".to_string(),
        ));
    }

    let mut out = String::new();
    for name in doc_names {
        let xml = read_zip_entry_bounded(&mut archive, &name)?;
        let text = extract_markup_text(&xml)?;
        if !text.trim().is_empty() {
            if !out.is_empty() {
                out.push_str("\n\n");
            }
            out.push_str(text.trim());
        }
    }
    Ok(out)
}

/// Collect character data from an XHTML document, skipping `<script>` and
/// `<style>` payloads and breaking lines at paragraph-level closes.
fn extract_markup_text(xml: &[u8]) -> Result<String, KnowledgeError> {
    let mut out = String::new();
    let mut reader = quick_xml::Reader::from_reader(xml);
    reader.config_mut().trim_text(false);
    reader.config_mut().check_end_names = false;
    let mut buf = Vec::new();
    let mut skip_depth = 0usize;
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(quick_xml::events::Event::Start(e)) => {
                if matches!(e.local_name().as_ref(), b"script" | b"style") {
                    skip_depth += 1;
                }
            }
            Ok(quick_xml::events::Event::Text(te)) if skip_depth == 0 => {
                out.push_str(te.unescape().unwrap_or_default().as_ref());
            }
            Ok(quick_xml::events::Event::End(e)) => match e.local_name().as_ref() {
                b"script" | b"style" => skip_depth = skip_depth.saturating_sub(1),
                b"p" | b"div" | b"h1" | b"h2" | b"h3" | b"h4" | b"h5" | b"h6" | b"li"
                | b"tr" => out.push('\n'),
                _ => {}
            },
            Ok(quick_xml::events::Event::Empty(e)) => {
                if matches!(e.local_name().as_ref(), b"br" | b"hr") {
                    out.push('\n');
                }
            }
            Ok(quick_xml::events::Event::Eof) => break,
            Err(e) => return Err(KnowledgeError::extraction(e.to_string())),
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
    fn unsupported_extension_fails_before_parsing() {
        let err = extract(b"anything", "deck.pptx").unwrap_err();
        assert!(matches!(err, KnowledgeError::UnsupportedFileType { .. }));
    }

    #[test]
    fn oversized_file_rejected_before_parsing() {
        // Junk bytes — if the parser ran it would fail differently.
        let big = vec![0u8; 64];
        let err = extract_with_limit(&big, "notes.pdf", 16).unwrap_err();
        assert!(matches!(
            err,
            KnowledgeError::FileTooLarge { size: 64, limit: 16 }
        ));
    }

    #[test]
    fn invalid_pdf_returns_extraction_failed() {
        let err = extract(b"not a pdf", "broken.pdf").unwrap_err();
        assert!(matches!(err, KnowledgeError::ExtractionFailed { .. }));
    }

    #[test]
    fn invalid_zip_returns_extraction_failed_for_docx() {
        let err = extract(b"not a zip", "broken.docx").unwrap_err();
        assert!(matches!(err, KnowledgeError::ExtractionFailed { .. }));
    }

    #[test]
    fn invalid_zip_returns_extraction_failed_for_epub() {
        let err = extract(b"not a zip", "broken.epub").unwrap_err();
        assert!(matches!(err, KnowledgeError::ExtractionFailed { .. }));
    }

    #[test]
    fn whitespace_only_text_is_empty_content() {
        let err = extract(b"  \n\t  \n", "blank.txt").unwrap_err();
        assert!(matches!(err, KnowledgeError::EmptyContent));
    }

    #[test]
    fn plain_text_roundtrips() {
        let doc = extract(b"Meeting notes from Tuesday.\nAction items follow.", "notes.txt")
            .unwrap();
        assert_eq!(doc.file_type, FileType::Txt);
        assert_eq!(doc.file_size, 48);
        assert!(doc.content.contains("Action items"));
        assert_eq!(doc.title, "Meeting notes from Tuesday.");
    }

    #[test]
    fn markdown_title_comes_from_heading() {
        let doc = extract(b"# Quarterly Plan\n\nDetails below.", "plan.md").unwrap();
        assert_eq!(doc.title, "Quarterly Plan");
    }

    #[test]
    fn title_falls_back_to_filename_stem() {
        assert_eq!(guess_title("   \n  ", "dir/2024-goals.txt"), "2024-goals");
    }

    #[test]
    fn docx_runs_join_with_paragraph_breaks() {
        let xml = br#"<?xml version="1.0"?>
            <w:document xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main">
              <w:body>
                <w:p><w:r><w:t>First paragraph.</w:t></w:r></w:p>
                <w:p><w:r><w:t>Second </w:t></w:r><w:r><w:t>paragraph.</w:t></w:r></w:p>
              </w:body>
            </w:document>"#;
        let text = extract_docx_runs(xml).unwrap();
        assert_eq!(text.trim(), "First paragraph.\nSecond paragraph.");
    }

    #[test]
    fn markup_text_skips_scripts_and_breaks_paragraphs() {
        let xml = br#"<html><head><style>p { color: red }</style></head>
            <body><p>One.</p><script>var x = 1;</script><p>Two.</p></body></html>"#;
        let text = extract_markup_text(xml).unwrap();
        assert!(text.contains("One."));
        assert!(text.contains("Two."));
        assert!(!text.contains("color"));
        assert!(!text.contains("var x"));
    }

    #[test]
    fn preview_is_collapsed_and_bounded() {
        let long = "word ".repeat(400);
        let p = preview(&long);
        assert!(p.chars().count() <= PREVIEW_CHARS + 1);
        assert!(!p.contains('\n'));
    }

    #[test]
    fn summary_stops_after_two_sentences() {
        let s = summarize("First. Second! Third?");
        assert_eq!(s, "First. Second!");
    }
}
