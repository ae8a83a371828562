//! Text extraction for uploaded documents (PDF, OOXML, plain text).
//!
//! [`extract_document`] works from the refined [`DetectedType`] and also
//! reports which engine produced the text. Failures are returned, never
//! panicked on: the pipeline records them as warnings and moves on to the
//! next file.

use std::io::Read;
use thiserror::Error;

use crate::models::DetectedType;

const XLSX_MAX_SHEETS: usize = 100;
const XLSX_MAX_CELLS_PER_SHEET: usize = 100_000;
/// Zip-bomb guard for a single decompressed OOXML entry.
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("unsupported content-type: {0}")]
    UnsupportedContentType(String),
    #[error("PDF extraction failed: {0}")]
    Pdf(String),
    #[error("OOXML extraction failed: {0}")]
    Ooxml(String),
    #[error("no OCR engine available for {0}")]
    OcrUnavailable(DetectedType),
    #[error("no text extracted")]
    NoText,
}

/// Engine names recorded in `document_analysis.extraction_engine`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractionEngine {
    Docx,
    Pptx,
    Xlsx,
    PlainText,
    PdfText,
    /// Text layer pulled from a PDF that looked scanned.
    PdfTextFallback,
}

impl ExtractionEngine {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Docx => "docx",
            Self::Pptx => "pptx",
            Self::Xlsx => "xlsx",
            Self::PlainText => "plain_text",
            Self::PdfText => "pdf_text",
            Self::PdfTextFallback => "pdf_text_fallback",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Extraction {
    pub text: String,
    pub engine: ExtractionEngine,
    /// Pages for PDFs, sheets for workbooks, slides for decks, 1 otherwise.
    pub pages_processed: usize,
}

/// Extracts text according to the refined file type.
pub fn extract_document(bytes: &[u8], detected: DetectedType) -> Result<Extraction, ExtractError> {
    let extraction = match detected {
        DetectedType::Word => extract_word_or_slides(bytes)?,
        DetectedType::Excel => {
            let (text, sheets) = extract_xlsx(bytes)?;
            Extraction {
                text,
                engine: ExtractionEngine::Xlsx,
                pages_processed: sheets,
            }
        }
        DetectedType::Text => Extraction {
            text: String::from_utf8_lossy(bytes).into_owned(),
            engine: ExtractionEngine::PlainText,
            pages_processed: 1,
        },
        DetectedType::PdfText => Extraction {
            text: extract_pdf(bytes)?,
            engine: ExtractionEngine::PdfText,
            pages_processed: pdf_page_count(bytes),
        },
        DetectedType::PdfScanned => Extraction {
            text: extract_pdf(bytes)?,
            engine: ExtractionEngine::PdfTextFallback,
            pages_processed: pdf_page_count(bytes),
        },
        DetectedType::Image => return Err(ExtractError::OcrUnavailable(detected)),
        DetectedType::Unknown | DetectedType::Encrypted | DetectedType::Corrupted => {
            return Err(ExtractError::UnsupportedContentType(
                detected.as_str().to_string(),
            ))
        }
    };

    if extraction.text.trim().is_empty() {
        return Err(ExtractError::NoText);
    }
    Ok(extraction)
}

fn extract_pdf(bytes: &[u8]) -> Result<String, ExtractError> {
    pdf_extract::extract_text_from_mem(bytes).map_err(|e| ExtractError::Pdf(e.to_string()))
}

fn pdf_page_count(bytes: &[u8]) -> usize {
    lopdf::Document::load_mem(bytes)
        .map(|doc| doc.get_pages().len())
        .unwrap_or(1)
        .max(1)
}

type Archive<'a> = zip::ZipArchive<std::io::Cursor<&'a [u8]>>;

fn open_archive(bytes: &[u8]) -> Result<Archive<'_>, ExtractError> {
    zip::ZipArchive::new(std::io::Cursor::new(bytes)).map_err(|e| ExtractError::Ooxml(e.to_string()))
}

fn read_zip_entry_bounded(
    archive: &mut Archive<'_>,
    name: &str,
    max_bytes: u64,
) -> Result<Vec<u8>, ExtractError> {
    let entry = archive
        .by_name(name)
        .map_err(|e| ExtractError::Ooxml(format!("{}: {}", name, e)))?;
    let mut out = Vec::new();
    entry
        .take(max_bytes)
        .read_to_end(&mut out)
        .map_err(|e| ExtractError::Ooxml(e.to_string()))?;
    if out.len() as u64 >= max_bytes {
        return Err(ExtractError::Ooxml(format!(
            "ZIP entry {} exceeds size limit ({} bytes)",
            name, max_bytes
        )));
    }
    Ok(out)
}

/// `.docx` and `.pptx` share the Word type; the archive layout tells them apart.
fn extract_word_or_slides(bytes: &[u8]) -> Result<Extraction, ExtractError> {
    let is_deck = open_archive(bytes)?
        .file_names()
        .any(|name| name == "ppt/presentation.xml");
    if is_deck {
        let (text, slides) = extract_pptx(bytes)?;
        return Ok(Extraction {
            text,
            engine: ExtractionEngine::Pptx,
            pages_processed: slides,
        });
    }
    Ok(Extraction {
        text: extract_docx(bytes)?,
        engine: ExtractionEngine::Docx,
        pages_processed: 1,
    })
}

fn extract_docx(bytes: &[u8]) -> Result<String, ExtractError> {
    let mut archive = open_archive(bytes)?;
    let xml = read_zip_entry_bounded(&mut archive, "word/document.xml", MAX_XML_ENTRY_BYTES)?;
    collect_text_runs(&xml, b"p")
}

/// Concatenates `<*:t>` runs, ending a line at each closing `paragraph` element.
fn collect_text_runs(xml: &[u8], paragraph: &[u8]) -> Result<String, ExtractError> {
    use quick_xml::events::Event;

    let mut out = String::new();
    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut in_text = false;
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) if e.local_name().as_ref() == b"t" => in_text = true,
            Ok(Event::Text(te)) if in_text => {
                out.push_str(te.unescape().unwrap_or_default().as_ref());
            }
            Ok(Event::End(e)) => {
                let name = e.local_name();
                if name.as_ref() == b"t" {
                    in_text = false;
                } else if name.as_ref() == paragraph && !out.ends_with('\n') {
                    out.push('\n');
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(ExtractError::Ooxml(e.to_string())),
            _ => {}
        }
        buf.clear();
    }
    Ok(out.trim_end().to_string())
}

/// Returns the deck text (slides separated by a blank line) and the slide count.
fn extract_pptx(bytes: &[u8]) -> Result<(String, usize), ExtractError> {
    let mut archive = open_archive(bytes)?;
    let slide_names = numbered_entries(&archive, "ppt/slides/slide");
    let slides = slide_names.len();
    let mut out = String::new();
    for name in slide_names {
        let xml = read_zip_entry_bounded(&mut archive, &name, MAX_XML_ENTRY_BYTES)?;
        let text = collect_text_runs(&xml, b"p")?;
        if !out.is_empty() && !text.is_empty() {
            out.push_str("\n\n");
        }
        out.push_str(&text);
    }
    Ok((out, slides))
}

/// Entries named `{prefix}{n}.xml`, ordered by `n`.
fn numbered_entries(archive: &Archive<'_>, prefix: &str) -> Vec<String> {
    let mut names: Vec<String> = archive
        .file_names()
        .filter(|n| n.starts_with(prefix) && n.ends_with(".xml"))
        .map(|s| s.to_string())
        .collect();
    names.sort_by_key(|name| {
        name.trim_start_matches(prefix)
            .trim_end_matches(".xml")
            .parse::<u32>()
            .unwrap_or(u32::MAX)
    });
    names
}

/// Returns the workbook text (one line per sheet) and the number of sheets read.
fn extract_xlsx(bytes: &[u8]) -> Result<(String, usize), ExtractError> {
    let mut archive = open_archive(bytes)?;
    let shared_strings = read_shared_strings(&mut archive)?;
    let sheet_names = numbered_entries(&archive, "xl/worksheets/sheet");
    let mut lines = Vec::new();
    for name in sheet_names.into_iter().take(XLSX_MAX_SHEETS) {
        let sheet_xml = read_zip_entry_bounded(&mut archive, &name, MAX_XML_ENTRY_BYTES)?;
        lines.push(extract_xlsx_sheet_cells(&sheet_xml, &shared_strings)?);
    }
    let sheets = lines.len();
    Ok((lines.join("\n\n"), sheets))
}

fn read_shared_strings(archive: &mut Archive<'_>) -> Result<Vec<String>, ExtractError> {
    use quick_xml::events::Event;

    if archive.by_name("xl/sharedStrings.xml").is_err() {
        return Ok(Vec::new());
    }
    let xml = read_zip_entry_bounded(archive, "xl/sharedStrings.xml", MAX_XML_ENTRY_BYTES)?;
    let mut strings = Vec::new();
    let mut reader = quick_xml::Reader::from_reader(xml.as_slice());
    let mut buf = Vec::new();
    let mut current: Option<String> = None;
    let mut in_t = false;
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"si" => current = Some(String::new()),
                b"t" => in_t = true,
                _ => {}
            },
            Ok(Event::Text(te)) if in_t => {
                if let Some(ref mut s) = current {
                    s.push_str(te.unescape().unwrap_or_default().as_ref());
                }
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"si" => strings.extend(current.take()),
                b"t" => in_t = false,
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(ExtractError::Ooxml(e.to_string())),
            _ => {}
        }
        buf.clear();
    }
    Ok(strings)
}

fn extract_xlsx_sheet_cells(xml: &[u8], shared_strings: &[String]) -> Result<String, ExtractError> {
    use quick_xml::events::Event;

    let mut cells: Vec<String> = Vec::new();
    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut in_v = false;
    let mut cell_is_shared_str = false;
    loop {
        if cells.len() >= XLSX_MAX_CELLS_PER_SHEET {
            break;
        }
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => {
                if e.local_name().as_ref() == b"c" {
                    cell_is_shared_str = e.attributes().any(|a| {
                        a.as_ref()
                            .map(|a| a.key.as_ref() == b"t" && a.value.as_ref() == b"s")
                            .unwrap_or(false)
                    });
                } else if e.local_name().as_ref() == b"v" {
                    in_v = true;
                }
            }
            Ok(Event::Text(te)) if in_v => {
                let v = te.unescape().unwrap_or_default();
                let s = v.trim();
                if s.is_empty() {
                    // nothing
                } else if cell_is_shared_str {
                    if let Some(text) = s.parse::<usize>().ok().and_then(|i| shared_strings.get(i)) {
                        cells.push(text.clone());
                    }
                } else {
                    cells.push(s.to_string());
                }
                in_v = false;
            }
            Ok(Event::End(e)) => {
                if e.local_name().as_ref() == b"v" {
                    in_v = false;
                } else if e.local_name().as_ref() == b"c" {
                    cell_is_shared_str = false;
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(ExtractError::Ooxml(e.to_string())),
            _ => {}
        }
        buf.clear();
    }
    Ok(cells.join(" "))
}
