//! Page-by-page PDF extraction: selectable text plus OCR of embedded images.

use std::fmt::Write as _;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use flate2::read::ZlibDecoder;
use futures::{stream, StreamExt};
use lopdf::content::Content;
use lopdf::{Dictionary, Document, Object, ObjectId, Stream};
use tracing::{info, warn};

use super::ocr::{ImageEncoding, RasterImage, TextRecognizer};
use crate::error::ExtractError;

/// Text recovered from one page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageExtract {
    /// 1-based.
    pub page_number: u32,
    pub text: String,
    /// One entry per embedded image, in document order; empty when the
    /// image yielded nothing or could not be read.
    pub ocr_text: Vec<String>,
}

impl PageExtract {
    fn has_content(&self) -> bool {
        !self.text.trim().is_empty() || self.ocr_text.iter().any(|t| !t.trim().is_empty())
    }
}

/// Result of extracting a document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Extraction {
    Pages(Vec<PageExtract>),
    /// No pages, or no page yielded text or OCR output.
    NoContent,
}

pub const NO_CONTENT: &str = "[no content extracted]";

/// A decoded stream may grow to this multiple of the upload size limit.
pub const STREAM_EXPANSION_RATIO: u64 = 8;

const DEFAULT_STREAM_LIMIT: u64 = 256 * 1024 * 1024;
const MAX_FORM_DEPTH: usize = 8;

impl Extraction {
    /// Page header, text block, then OCR block, page by page.
    pub fn render(&self) -> String {
        let Extraction::Pages(pages) = self else {
            return NO_CONTENT.to_string();
        };

        let mut out = String::new();
        for page in pages {
            let _ = writeln!(out, "--- Page {} ---", page.page_number);
            let text = page.text.trim();
            if !text.is_empty() {
                let _ = writeln!(out, "{text}");
            }
            let recognized: Vec<_> = page
                .ocr_text
                .iter()
                .enumerate()
                .filter(|(_, t)| !t.trim().is_empty())
                .collect();
            if !recognized.is_empty() {
                out.push_str("[OCR]\n");
                for (index, text) in recognized {
                    let _ = writeln!(out, "Image {}: {}", index + 1, text.trim());
                }
            }
        }
        out.trim_end().to_string()
    }
}

/// A page as read from disk, before OCR.
struct RawPage {
    number: u32,
    text: String,
    images: Vec<RasterImage>,
}

pub struct PdfExtractor {
    recognizer: Arc<dyn TextRecognizer>,
    concurrency: usize,
    stream_limit: u64,
}

impl PdfExtractor {
    pub fn new(recognizer: Arc<dyn TextRecognizer>, concurrency: usize) -> Self {
        Self {
            recognizer,
            concurrency: concurrency.max(1),
            stream_limit: DEFAULT_STREAM_LIMIT,
        }
    }

    /// Caps the decoded size of any single content or image stream.
    pub fn with_stream_limit(mut self, bytes: u64) -> Self {
        self.stream_limit = bytes;
        self
    }

    /// Parsing runs on the blocking pool; OCR of a page's images runs with
    /// bounded concurrency, keeping image order.
    pub async fn extract(&self, path: &Path) -> Result<Extraction, ExtractError> {
        let owned: PathBuf = path.to_path_buf();
        let limit = self.stream_limit;
        let raw_pages = tokio::task::spawn_blocking(move || read_pages(&owned, limit))
            .await
            .map_err(|e| ExtractError::Task(e.to_string()))??;

        let mut pages = Vec::with_capacity(raw_pages.len());
        for page in raw_pages {
            let number = page.number;
            let ocr_text: Vec<String> = stream::iter(page.images.into_iter().enumerate())
                .map(|(index, image)| {
                    let recognizer = Arc::clone(&self.recognizer);
                    async move {
                        match recognizer.recognize(&image).await {
                            Ok(text) => text,
                            Err(e) => {
                                warn!("OCR failed for page {} image {}: {}", number, index + 1, e);
                                String::new()
                            }
                        }
                    }
                })
                .buffered(self.concurrency)
                .collect()
                .await;

            pages.push(PageExtract {
                page_number: number,
                text: page.text,
                ocr_text,
            });
        }

        if !pages.iter().any(PageExtract::has_content) {
            info!("No content extracted from {}", path.display());
            return Ok(Extraction::NoContent);
        }
        info!("Extracted {} page(s) from {}", pages.len(), path.display());
        Ok(Extraction::Pages(pages))
    }
}

fn read_pages(path: &Path, limit: u64) -> Result<Vec<RawPage>, ExtractError> {
    let doc = Document::load(path)?;

    // get_pages is keyed by 1-based page number, so iteration is ordered
    let mut pages = Vec::new();
    for (number, page_id) in doc.get_pages() {
        let text = doc.extract_text(&[number]).unwrap_or_else(|e| {
            warn!("Text extraction failed for page {}: {}", number, e);
            String::new()
        });
        let images = page_images(&doc, page_id, limit).unwrap_or_else(|e| {
            warn!("Could not enumerate images on page {}: {}", number, e);
            Vec::new()
        });
        pages.push(RawPage {
            number,
            text,
            images,
        });
    }
    Ok(pages)
}

fn resolve<'a>(doc: &'a Document, object: &'a Object) -> lopdf::Result<&'a Object> {
    match object {
        Object::Reference(id) => doc.get_object(*id),
        other => Ok(other),
    }
}

/// `Resources` may live on any ancestor of the page.
fn page_resources(doc: &Document, page_id: ObjectId) -> lopdf::Result<Option<&Dictionary>> {
    let mut node = doc.get_dictionary(page_id)?;
    for _ in 0..32 {
        if let Ok(resources) = node.get(b"Resources") {
            return resolve(doc, resources)?.as_dict().map(Some);
        }
        match node.get(b"Parent").and_then(Object::as_reference) {
            Ok(parent) => node = doc.get_dictionary(parent)?,
            Err(_) => break,
        }
    }
    Ok(None)
}

/// Image XObjects in the order the page draws them, descending into Form
/// XObjects. Images listed in the resources but never drawn are skipped.
fn page_images(doc: &Document, page_id: ObjectId, limit: u64) -> Result<Vec<RasterImage>, String> {
    let resources = page_resources(doc, page_id).map_err(|e| e.to_string())?;

    let mut content = Vec::new();
    for id in doc.get_page_contents(page_id) {
        let stream = doc
            .get_object(id)
            .and_then(Object::as_stream)
            .map_err(|e| e.to_string())?;
        content.extend(plain_content(stream, limit)?);
        content.push(b'\n');
        if content.len() as u64 > limit {
            return Err(format!("page content exceeds {limit} bytes"));
        }
    }

    let mut images = Vec::new();
    drawn_images(doc, &content, resources, limit, 0, &mut images)?;
    Ok(images)
}

fn drawn_images<'a>(
    doc: &'a Document,
    content: &[u8],
    resources: Option<&'a Dictionary>,
    limit: u64,
    depth: usize,
    out: &mut Vec<RasterImage>,
) -> Result<(), String> {
    let content = Content::decode(content).map_err(|e| e.to_string())?;

    for operation in content.operations.iter().filter(|op| op.operator == "Do") {
        let Some(name) = operation.operands.first().and_then(|o| o.as_name().ok()) else {
            continue;
        };
        let name_str = String::from_utf8_lossy(name);
        let Some(stream) = xobject(doc, resources, name) else {
            warn!("Drawn XObject /{} is missing from the resources", name_str);
            continue;
        };

        match stream.dict.get(b"Subtype").and_then(Object::as_name).ok() {
            Some(b"Image") => {
                let image = raster_image(stream, limit);
                if let ImageEncoding::Unsupported(what) = &image.encoding {
                    warn!("Image /{} not recognizable: {}", name_str, what);
                }
                out.push(image);
            }
            Some(b"Form") if depth < MAX_FORM_DEPTH => {
                // A form without its own resources inherits the caller's
                let form_resources = stream
                    .dict
                    .get(b"Resources")
                    .ok()
                    .and_then(|r| resolve(doc, r).ok())
                    .and_then(|r| r.as_dict().ok())
                    .or(resources);
                let nested = plain_content(stream, limit)
                    .and_then(|bytes| drawn_images(doc, &bytes, form_resources, limit, depth + 1, out));
                if let Err(e) = nested {
                    warn!("Skipping form /{}: {}", name_str, e);
                }
            }
            Some(b"Form") => warn!("Skipping form /{}: nested too deep", name_str),
            _ => {}
        }
    }
    Ok(())
}

fn xobject<'a>(doc: &'a Document, resources: Option<&'a Dictionary>, name: &[u8]) -> Option<&'a Stream> {
    let xobjects = resolve(doc, resources?.get(b"XObject").ok()?).ok()?.as_dict().ok()?;
    resolve(doc, xobjects.get(name).ok()?).ok()?.as_stream().ok()
}

fn filters(dict: &Dictionary) -> Vec<Vec<u8>> {
    match dict.get(b"Filter") {
        Ok(Object::Name(name)) => vec![name.clone()],
        Ok(Object::Array(items)) => items
            .iter()
            .filter_map(|item| item.as_name().ok().map(<[u8]>::to_vec))
            .collect(),
        _ => Vec::new(),
    }
}

fn predictor(dict: &Dictionary) -> i64 {
    dict.get(b"DecodeParms")
        .and_then(Object::as_dict)
        .and_then(|params| params.get(b"Predictor"))
        .and_then(Object::as_i64)
        .unwrap_or(1)
}

/// Decoded bytes of an unfiltered or Flate stream, never more than `limit`.
fn plain_content(stream: &Stream, limit: u64) -> Result<Vec<u8>, String> {
    let filters = filters(&stream.dict);
    match filters.as_slice() {
        [] if stream.content.len() as u64 <= limit => Ok(stream.content.clone()),
        [] => Err(format!("stream exceeds {limit} bytes")),
        [only] if only.as_slice() == b"FlateDecode" => {
            let inflated = inflate_bounded(&stream.content, limit)?;
            if predictor(&stream.dict) <= 1 {
                return Ok(inflated);
            }
            // Predictors only shrink the output, so the bound above holds.
            // lopdf refuses image streams here, hence the stripped Subtype.
            let mut plain = stream.clone();
            plain.dict.remove(b"Subtype");
            plain
                .decompressed_content()
                .map_err(|e| format!("undecodable FlateDecode stream: {e}"))
        }
        other => {
            let names: Vec<_> = other.iter().map(|n| String::from_utf8_lossy(n)).collect();
            Err(names.join("+"))
        }
    }
}

fn inflate_bounded(data: &[u8], limit: u64) -> Result<Vec<u8>, String> {
    let mut out = Vec::new();
    ZlibDecoder::new(data)
        .take(limit.saturating_add(1))
        .read_to_end(&mut out)
        .map_err(|e| format!("undecodable FlateDecode stream: {e}"))?;
    if out.len() as u64 > limit {
        return Err(format!("stream inflates past {limit} bytes"));
    }
    Ok(out)
}

fn raster_image(stream: &Stream, limit: u64) -> RasterImage {
    let dimension = |key: &[u8]| {
        stream
            .dict
            .get(key)
            .and_then(Object::as_i64)
            .ok()
            .and_then(|v| u32::try_from(v).ok())
            .unwrap_or(0)
    };
    let width = dimension(b"Width");
    let height = dimension(b"Height");
    let unsupported = |what: String| RasterImage {
        width,
        height,
        encoding: ImageEncoding::Unsupported(what),
        data: Vec::new(),
    };
    let encoded = |encoding: ImageEncoding| RasterImage {
        width,
        height,
        encoding,
        data: stream.content.clone(),
    };

    let filters = filters(&stream.dict);
    let names: Vec<&[u8]> = filters.iter().map(Vec::as_slice).collect();
    let data = match names.as_slice() {
        [b"DCTDecode"] => return encoded(ImageEncoding::Jpeg),
        [b"JPXDecode"] => return encoded(ImageEncoding::Jpeg2000),
        [] | [b"FlateDecode"] => match plain_content(stream, limit) {
            Ok(data) => data,
            Err(e) => return unsupported(e),
        },
        other => {
            let names: Vec<_> = other.iter().map(|n| String::from_utf8_lossy(n)).collect();
            return unsupported(names.join("+"));
        }
    };

    // Raw samples: infer the component count from the buffer size
    let bits = stream
        .dict
        .get(b"BitsPerComponent")
        .and_then(Object::as_i64)
        .unwrap_or(8);
    let pixels = (width as usize)
        .checked_mul(height as usize)
        .filter(|&pixels| pixels > 0);
    let encoding = match (bits, pixels) {
        (8, Some(pixels)) if data.len() == pixels => ImageEncoding::Gray8,
        (8, Some(pixels)) if pixels.checked_mul(3) == Some(data.len()) => ImageEncoding::Rgb8,
        (bits, _) => {
            return unsupported(format!(
                "{bits}-bit samples, {} bytes for {width}x{height}",
                data.len()
            ))
        }
    };
    RasterImage {
        width,
        height,
        encoding,
        data,
    }
}
