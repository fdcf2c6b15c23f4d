use crate::error::ExtractError;
use crate::source::ByteSource;
use lopdf::Document;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageText {
    pub number: u32,
    pub text: String,
}

/// One way of pulling page text out of PDF bytes.
pub trait PageExtractor: Send + Sync {
    fn name(&self) -> &'static str;

    fn extract_pages(&self, pdf: &[u8]) -> Result<Vec<PageText>, ExtractError>;
}

/// Turns a byte source into page texts. Never fails: unreadable input is no pages.
pub trait TextExtractor: Send + Sync {
    fn extract_pages(&self, source: &dyn ByteSource) -> Vec<PageText>;

    fn extract(&self, source: &dyn ByteSource) -> String {
        join_pages(&self.extract_pages(source))
    }
}

pub fn join_pages(pages: &[PageText]) -> String {
    pages
        .iter()
        .map(|page| page.text.as_str())
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string()
}

#[derive(Debug, Default, Clone, Copy)]
pub struct LopdfExtractor;

impl PageExtractor for LopdfExtractor {
    fn name(&self) -> &'static str {
        "lopdf"
    }

    fn extract_pages(&self, pdf: &[u8]) -> Result<Vec<PageText>, ExtractError> {
        let document =
            Document::load_mem(pdf).map_err(|error| ExtractError::PdfParse(error.to_string()))?;

        let mut pages = Vec::new();
        for (page_no, _page_id) in document.get_pages() {
            let text = document
                .extract_text(&[page_no])
                .map_err(|error| ExtractError::PdfParse(error.to_string()))?;

            if !text.trim().is_empty() {
                pages.push(PageText {
                    number: page_no,
                    text,
                });
            }
        }

        if pages.is_empty() {
            return Err(ExtractError::PdfParse(
                "pdf had no readable page text".to_string(),
            ));
        }

        Ok(pages)
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct PdfExtractCrateExtractor;

impl PageExtractor for PdfExtractCrateExtractor {
    fn name(&self) -> &'static str {
        "pdf-extract"
    }

    fn extract_pages(&self, pdf: &[u8]) -> Result<Vec<PageText>, ExtractError> {
        let text = pdf_extract::extract_text_from_mem(pdf)
            .map_err(|error| ExtractError::PdfParse(error.to_string()))?;
        Ok(split_form_feed_pages(&text))
    }
}

/// pdf-extract separates pages with form feeds.
fn split_form_feed_pages(raw_text: &str) -> Vec<PageText> {
    raw_text
        .split('\u{000c}')
        .enumerate()
        .filter_map(|(index, page)| {
            let normalized = page.trim();
            if normalized.is_empty() {
                None
            } else {
                Some(PageText {
                    number: (index + 1) as u32,
                    text: normalized.to_string(),
                })
            }
        })
        .collect()
}

/// Primary method first, secondary when the primary errors, panics, or finds no text.
pub struct FallbackExtractor {
    primary: Box<dyn PageExtractor>,
    secondary: Box<dyn PageExtractor>,
}

impl FallbackExtractor {
    pub fn new(primary: Box<dyn PageExtractor>, secondary: Box<dyn PageExtractor>) -> Self {
        Self { primary, secondary }
    }

    pub fn primary(&self) -> &dyn PageExtractor {
        self.primary.as_ref()
    }

    pub fn secondary(&self) -> &dyn PageExtractor {
        self.secondary.as_ref()
    }
}

impl Default for FallbackExtractor {
    fn default() -> Self {
        Self::new(Box::new(LopdfExtractor), Box::new(PdfExtractCrateExtractor))
    }
}

impl TextExtractor for FallbackExtractor {
    fn extract_pages(&self, source: &dyn ByteSource) -> Vec<PageText> {
        let bytes = match source.read_all() {
            Ok(bytes) => bytes,
            Err(error) => {
                warn!(%error, "could not read document bytes");
                return Vec::new();
            }
        };

        for method in [self.primary.as_ref(), self.secondary.as_ref()] {
            match run_guarded(method, &bytes) {
                Ok(pages) if !join_pages(&pages).is_empty() => {
                    debug!(method = method.name(), pages = pages.len(), "extracted text");
                    return pages;
                }
                Ok(_) => warn!(method = method.name(), "extraction produced no text"),
                Err(error) => warn!(method = method.name(), %error, "extraction failed"),
            }
        }

        Vec::new()
    }
}

/// Runs one method, converting a panic inside the PDF library into an error.
pub fn run_guarded(method: &dyn PageExtractor, pdf: &[u8]) -> Result<Vec<PageText>, ExtractError> {
    panic::catch_unwind(AssertUnwindSafe(|| method.extract_pages(pdf))).unwrap_or_else(|payload| {
        Err(ExtractError::Panicked {
            method: method.name(),
            message: panic_message(payload.as_ref()),
        })
    })
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|message| (*message).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}
