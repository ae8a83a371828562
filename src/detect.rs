//! File type detection.
//!
//! Detection runs in two passes. [`guess_mime`] and [`coarse_type`] look
//! only at the filename; [`refine`] then inspects the bytes where the
//! extension is not enough (PDFs may be text, scanned, encrypted, or
//! broken). The refined [`DetectedType`] decides what the extractor does
//! with the file via [`Disposition`].

use crate::models::DetectedType;

/// Number of leading PDF pages probed for a text layer.
const PDF_PROBE_PAGES: u32 = 3;

pub const MIME_OCTET_STREAM: &str = "application/octet-stream";

/// Outcome of byte-level detection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Detection {
    pub detected_type: DetectedType,
    pub needs_ocr: bool,
}

/// What the pipeline does with a file of a given type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Extract,
    Ocr,
    Excel,
    Skip,
}

impl From<DetectedType> for Disposition {
    fn from(t: DetectedType) -> Self {
        match t {
            DetectedType::PdfText | DetectedType::Word | DetectedType::Text => Self::Extract,
            DetectedType::PdfScanned | DetectedType::Image => Self::Ocr,
            DetectedType::Excel => Self::Excel,
            DetectedType::Encrypted | DetectedType::Corrupted | DetectedType::Unknown => {
                Self::Skip
            }
        }
    }
}

fn extension(filename: &str) -> String {
    std::path::Path::new(filename)
        .extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default()
}

/// Guesses a MIME type from the file extension.
pub fn guess_mime(filename: &str) -> &'static str {
    match extension(filename).as_str() {
        "pdf" => "application/pdf",
        "docx" => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        "doc" => "application/msword",
        "xlsx" => "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
        "xls" => "application/vnd.ms-excel",
        "pptx" => "application/vnd.openxmlformats-officedocument.presentationml.presentation",
        "txt" => "text/plain",
        "md" => "text/markdown",
        "csv" => "text/csv",
        "html" | "htm" => "text/html",
        "json" => "application/json",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "tif" | "tiff" => "image/tiff",
        "gif" => "image/gif",
        _ => MIME_OCTET_STREAM,
    }
}

/// Filename-level classification used before the bytes are inspected.
pub fn coarse_type(mime: &str) -> DetectedType {
    match mime {
        "application/pdf" => DetectedType::PdfText,
        "application/vnd.openxmlformats-officedocument.wordprocessingml.document"
        | "application/vnd.openxmlformats-officedocument.presentationml.presentation"
        | "application/msword" => DetectedType::Word,
        "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet"
        | "application/vnd.ms-excel" => DetectedType::Excel,
        m if m.starts_with("text/") => DetectedType::Text,
        m if m.starts_with("image/") => DetectedType::Image,
        _ => DetectedType::Unknown,
    }
}

/// Refines the type of a downloaded file from its bytes, name, and MIME type.
pub fn refine(bytes: &[u8], filename: &str, mime: &str) -> Detection {
    let ext = extension(filename);
    let coarse = coarse_type(mime);

    let plain = |t: DetectedType| Detection {
        detected_type: t,
        needs_ocr: false,
    };

    if coarse == DetectedType::Excel || matches!(ext.as_str(), "xlsx" | "xls") {
        plain(DetectedType::Excel)
    } else if coarse == DetectedType::Word || matches!(ext.as_str(), "docx" | "doc" | "pptx") {
        plain(DetectedType::Word)
    } else if coarse == DetectedType::Text || matches!(ext.as_str(), "txt" | "md") {
        plain(DetectedType::Text)
    } else if coarse == DetectedType::Image
        || matches!(ext.as_str(), "png" | "jpg" | "jpeg" | "tiff")
    {
        Detection {
            detected_type: DetectedType::Image,
            needs_ocr: true,
        }
    } else if mime == "application/pdf" || ext == "pdf" {
        probe_pdf(bytes)
    } else {
        plain(DetectedType::Unknown)
    }
}

fn probe_pdf(bytes: &[u8]) -> Detection {
    let doc = match lopdf::Document::load_mem(bytes) {
        Ok(doc) => doc,
        Err(e) => {
            tracing::debug!(error = %e, "PDF failed to parse");
            return Detection {
                detected_type: DetectedType::Corrupted,
                needs_ocr: false,
            };
        }
    };

    if doc.is_encrypted() {
        return Detection {
            detected_type: DetectedType::Encrypted,
            needs_ocr: false,
        };
    }

    let pages: Vec<u32> = doc
        .get_pages()
        .keys()
        .copied()
        .take(PDF_PROBE_PAGES as usize)
        .collect();
    let has_text = pages.iter().any(|page| {
        doc.extract_text(&[*page])
            .map(|t| !t.trim().is_empty())
            .unwrap_or(false)
    });

    if has_text {
        Detection {
            detected_type: DetectedType::PdfText,
            needs_ocr: false,
        }
    } else {
        Detection {
            detected_type: DetectedType::PdfScanned,
            needs_ocr: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mime_guess_by_extension() {
        assert_eq!(guess_mime("NDA.PDF"), "application/pdf");
        assert_eq!(guess_mime("notes.md"), "text/markdown");
        assert_eq!(guess_mime("archive.tar.gz"), MIME_OCTET_STREAM);
        assert_eq!(guess_mime("no_extension"), MIME_OCTET_STREAM);
    }

    #[test]
    fn refine_by_extension() {
        let r = refine(b"", "terms.docx", guess_mime("terms.docx"));
        assert_eq!(r.detected_type, DetectedType::Word);
        let r = refine(b"", "deck.pptx", guess_mime("deck.pptx"));
        assert_eq!(r.detected_type, DetectedType::Word);
        let r = refine(b"", "ledger.xls", guess_mime("ledger.xls"));
        assert_eq!(r.detected_type, DetectedType::Excel);
        let r = refine(b"hello", "readme.md", guess_mime("readme.md"));
        assert_eq!(r.detected_type, DetectedType::Text);
    }

    #[test]
    fn images_need_ocr() {
        let r = refine(b"\x89PNG", "scan.png", guess_mime("scan.png"));
        assert_eq!(r.detected_type, DetectedType::Image);
        assert!(r.needs_ocr);
        assert_eq!(Disposition::from(r.detected_type), Disposition::Ocr);
    }

    #[test]
    fn broken_pdf_is_corrupted_and_skipped() {
        let r = refine(b"not a pdf", "msa.pdf", "application/pdf");
        assert_eq!(r.detected_type, DetectedType::Corrupted);
        assert!(!r.needs_ocr);
        assert_eq!(Disposition::from(r.detected_type), Disposition::Skip);
    }

    #[test]
    fn unknown_binary_is_skipped() {
        let r = refine(b"\x00\x01", "blob.bin", guess_mime("blob.bin"));
        assert_eq!(r.detected_type, DetectedType::Unknown);
        assert_eq!(Disposition::from(r.detected_type), Disposition::Skip);
    }
}
