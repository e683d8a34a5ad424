//! Document loading: per-page PDF text and file-level metadata

use lopdf::{Dictionary, Object};
use regex::Regex;
use std::path::Path;
use std::sync::OnceLock;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::types::{DocumentMetadata, LoadedDocument, PageText};

/// Loads a source file into per-page text plus metadata
pub trait DocumentLoader: Send + Sync {
    /// Read and parse `path`.
    ///
    /// Fails with [`Error::Load`] when the file is unreadable or not a valid
    /// document. Metadata problems never fail the load.
    fn load(&self, path: &Path) -> Result<LoadedDocument>;

    /// Loader name for logging
    fn name(&self) -> &str;
}

/// PDF loader backed by lopdf, with pdf-extract as a whole-document fallback
pub struct PdfLoader {
    /// Upper bound for the pdf-extract fallback, which can hang on odd fonts
    fallback_timeout: Duration,
}

impl Default for PdfLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl PdfLoader {
    pub fn new() -> Self {
        Self {
            fallback_timeout: Duration::from_secs(60),
        }
    }

    /// Parse PDF bytes; `label` is only used in errors and logs
    pub fn load_bytes(&self, label: &str, data: &[u8]) -> Result<LoadedDocument> {
        let doc = lopdf::Document::load_mem(data)
            .map_err(|e| Error::load(label, format!("not a valid PDF: {}", e)))?;

        let page_ids = doc.get_pages();
        let total_pages = page_ids.len() as u32;

        let mut metadata = match read_metadata(label, &doc) {
            Ok(metadata) => metadata,
            Err(e) => {
                tracing::warn!("{}; producer/creator default to empty", e);
                DocumentMetadata::default()
            }
        };
        metadata.total_pages = total_pages;

        let mut pages = Vec::with_capacity(page_ids.len());
        for page_number in page_ids.keys().copied() {
            match doc.extract_text(&[page_number]) {
                Ok(text) => {
                    let text = cleanup_pdf_text(&text);
                    if !text.is_empty() {
                        pages.push(PageText { page_number, text });
                    }
                }
                Err(e) => {
                    tracing::debug!("Could not extract page {} of {}: {}", page_number, label, e);
                }
            }
        }

        if pages.is_empty() {
            tracing::debug!("lopdf produced no text for {}, trying pdf-extract", label);
            let text = cleanup_pdf_text(&self.extract_with_timeout(label, data)?);
            if !text.is_empty() {
                pages.push(PageText { page_number: 1, text });
            }
        }

        if pages.is_empty() {
            return Err(Error::load(
                label,
                "PDF has no extractable text (image-based or encrypted?)",
            ));
        }

        tracing::debug!(
            "Loaded {}: {} page(s) with text of {}, producer={:?}, creator={:?}",
            label,
            pages.len(),
            total_pages,
            metadata.producer,
            metadata.creator
        );

        Ok(LoadedDocument { pages, metadata })
    }

    /// Run pdf-extract on a helper thread so a pathological font cannot hang a pass
    fn extract_with_timeout(&self, label: &str, data: &[u8]) -> Result<String> {
        use std::sync::mpsc;
        use std::thread;

        let data_vec = data.to_vec();
        let (tx, rx) = mpsc::channel();

        thread::spawn(move || {
            let result = pdf_extract::extract_text_from_mem(&data_vec);
            let _ = tx.send(result.map_err(|e| e.to_string()));
        });

        match rx.recv_timeout(self.fallback_timeout) {
            Ok(Ok(text)) => Ok(text),
            Ok(Err(e)) => Err(Error::load(label, format!("pdf-extract failed: {}", e))),
            Err(mpsc::RecvTimeoutError::Timeout) => Err(Error::load(
                label,
                format!("text extraction timed out after {:?}", self.fallback_timeout),
            )),
            Err(mpsc::RecvTimeoutError::Disconnected) => {
                Err(Error::load(label, "text extraction thread crashed"))
            }
        }
    }
}

impl DocumentLoader for PdfLoader {
    fn load(&self, path: &Path) -> Result<LoadedDocument> {
        let label = path.display().to_string();
        let data = std::fs::read(path).map_err(|e| Error::load(&label, e.to_string()))?;
        self.load_bytes(&label, &data)
    }

    fn name(&self) -> &str {
        "pdf"
    }
}

/// Read `/Producer` and `/Creator` from the trailer's Info dictionary.
///
/// A missing Info dictionary is normal and yields defaults; a dangling or
/// malformed one is a [`Error::Metadata`].
fn read_metadata(label: &str, doc: &lopdf::Document) -> Result<DocumentMetadata> {
    let info_obj = match doc.trailer.get(b"Info") {
        Ok(obj) => obj,
        Err(_) => return Ok(DocumentMetadata::default()),
    };

    let info: &Dictionary = match info_obj {
        Object::Reference(id) => doc
            .get_object(*id)
            .and_then(Object::as_dict)
            .map_err(|e| Error::metadata(label, format!("bad Info reference: {}", e)))?,
        Object::Dictionary(dict) => dict,
        _ => return Err(Error::metadata(label, "Info entry is not a dictionary")),
    };

    Ok(DocumentMetadata {
        producer: info_string(doc, info, b"Producer"),
        creator: info_string(doc, info, b"Creator"),
        total_pages: 0,
    })
}

fn info_string(doc: &lopdf::Document, info: &Dictionary, key: &[u8]) -> String {
    let obj = match info.get(key) {
        Ok(Object::Reference(id)) => match doc.get_object(*id) {
            Ok(obj) => obj,
            Err(_) => return String::new(),
        },
        Ok(obj) => obj,
        Err(_) => return String::new(),
    };

    match obj {
        Object::String(bytes, _) => decode_pdf_text(bytes),
        Object::Name(name) => String::from_utf8_lossy(name).into_owned(),
        _ => String::new(),
    }
}

/// Decode a PDF text string (UTF-16BE with BOM, UTF-8 with BOM, else PDFDocEncoding)
fn decode_pdf_text(bytes: &[u8]) -> String {
    if let Some(utf16) = bytes.strip_prefix(&[0xFE, 0xFF]) {
        let units: Vec<u16> = utf16
            .chunks_exact(2)
            .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
            .collect();
        return String::from_utf16_lossy(&units).trim().to_string();
    }
    if let Some(utf8) = bytes.strip_prefix(&[0xEF, 0xBB, 0xBF]) {
        return String::from_utf8_lossy(utf8).trim().to_string();
    }
    // PDFDocEncoding matches Latin-1 for printable text
    bytes.iter().map(|&b| b as char).collect::<String>().trim().to_string()
}

/// Ligatures and typographic glyphs that break splitting and search
const GLYPH_REPLACEMENTS: &[(char, &str)] = &[
    ('\u{FB00}', "ff"),
    ('\u{FB01}', "fi"),
    ('\u{FB02}', "fl"),
    ('\u{FB03}', "ffi"),
    ('\u{FB04}', "ffl"),
    ('\u{00A0}', " "),
    ('\u{2010}', "-"),
    ('\u{2011}', "-"),
    ('\u{2013}', "-"),
    ('\u{2014}', "--"),
    ('\u{2018}', "'"),
    ('\u{2019}', "'"),
    ('\u{201C}', "\""),
    ('\u{201D}', "\""),
    ('\u{2022}', "* "),
    ('\u{2026}', "..."),
];

fn trailing_space_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[ \t]+\n").expect("static regex"))
}

fn blank_run_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\n{3,}").expect("static regex"))
}

/// Normalize extracted PDF text while keeping paragraph breaks for the splitter
pub fn cleanup_pdf_text(text: &str) -> String {
    let mut result: String = text.replace('\0', "").replace("\r\n", "\n").replace('\r', "\n");

    for (glyph, replacement) in GLYPH_REPLACEMENTS {
        if result.contains(*glyph) {
            result = result.replace(*glyph, replacement);
        }
    }

    let result = trailing_space_re().replace_all(&result, "\n");
    let result = blank_run_re().replace_all(&result, "\n\n");
    result.trim().to_string()
}
