//! Upload ingestion: store under a generated name, sniff the content, then
//! branch on the detected type.

pub mod mime;
pub mod ocr;
pub mod pdf;
pub mod store;

use std::fmt::Display;
use std::sync::Arc;

use futures::Stream;
use tracing::{info, warn};

use crate::config::Settings;
use crate::error::IngestError;
use self::mime::{classify, FileKind};
use self::ocr::TextRecognizer;
use self::pdf::{Extraction, PdfExtractor, STREAM_EXPANSION_RATIO};
use self::store::UploadStore;

/// URL path under which the upload directory is served.
pub const UPLOADS_URL_PATH: &str = "/static/uploads";

/// What the pipeline did with the file, per branch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    /// PDF whose text was extracted (or found to be empty).
    Extracted(Extraction),
    /// PDF that is stored but could not be parsed; carries the cause.
    ExtractionFailed(String),
    /// Image, retrievable at this URL.
    Url(String),
    /// Anything else: acknowledged only.
    Received,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestResult {
    pub original_filename: String,
    pub stored_name: String,
    pub content_type: String,
    pub size: u64,
    pub delivery: Delivery,
}

impl IngestResult {
    /// Human-readable description for the PDF and generic branches.
    pub fn info(&self) -> Option<String> {
        match &self.delivery {
            Delivery::Extracted(extraction) => Some(extraction.render()),
            Delivery::ExtractionFailed(cause) => Some(format!(
                "File '{}' is a PDF, but text extraction failed: {}",
                self.original_filename, cause
            )),
            Delivery::Url(_) => None,
            Delivery::Received => Some(format!(
                "File '{}' received and identified as {}.",
                self.original_filename, self.content_type
            )),
        }
    }

    pub fn file_url(&self) -> Option<&str> {
        match &self.delivery {
            Delivery::Url(url) => Some(url),
            _ => None,
        }
    }
}

pub struct Ingestor {
    store: UploadStore,
    extractor: PdfExtractor,
    public_base_url: String,
}

impl Ingestor {
    pub fn new(store: UploadStore, extractor: PdfExtractor, public_base_url: &str) -> Self {
        Self {
            store,
            extractor,
            public_base_url: public_base_url.trim_end_matches('/').to_string(),
        }
    }

    /// Opens the upload directory from settings and wires the recognizer.
    pub async fn from_settings(
        settings: &Settings,
        recognizer: Arc<dyn TextRecognizer>,
    ) -> std::io::Result<Self> {
        let store = UploadStore::open(settings.upload_dir(), settings.max_upload_bytes).await?;
        let extractor = PdfExtractor::new(recognizer, settings.ocr_concurrency)
            .with_stream_limit(settings.max_upload_bytes.saturating_mul(STREAM_EXPANSION_RATIO));
        Ok(Self::new(store, extractor, &settings.public_base_url))
    }

    pub fn store(&self) -> &UploadStore {
        &self.store
    }

    pub async fn ingest<S, B, E>(&self, filename: &str, body: S) -> Result<IngestResult, IngestError>
    where
        S: Stream<Item = Result<B, E>> + Unpin,
        B: AsRef<[u8]>,
        E: Display,
    {
        let stored = self.store.save(filename, body).await?;
        let content_type = stored.content_type;
        info!(
            "File '{}' uploaded as {}. Detected MIME type: {}",
            filename, stored.stored_name, content_type
        );

        let delivery = match classify(&content_type) {
            FileKind::Pdf => match self.extractor.extract(&stored.path).await {
                Ok(extraction) => Delivery::Extracted(extraction),
                Err(e) => {
                    warn!("PDF extraction failed for {}: {}", stored.stored_name, e);
                    Delivery::ExtractionFailed(e.to_string())
                }
            },
            FileKind::Image => Delivery::Url(format!(
                "{}{}/{}",
                self.public_base_url, UPLOADS_URL_PATH, stored.stored_name
            )),
            FileKind::Other => Delivery::Received,
        };

        Ok(IngestResult {
            original_filename: filename.to_string(),
            stored_name: stored.stored_name,
            content_type,
            size: stored.size,
            delivery,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{pdf_fixture, MockRecognizer};
    use futures::stream;

    const PNG: &[u8] = &[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 0, 0, 0, 0x0D];

    fn body(bytes: Vec<u8>) -> impl Stream<Item = Result<Vec<u8>, std::io::Error>> + Unpin {
        stream::iter(vec![Ok(bytes)])
    }

    async fn ingestor(dir: &std::path::Path) -> Ingestor {
        let store = UploadStore::open(dir.join("uploads"), 1 << 20).await.unwrap();
        let extractor = PdfExtractor::new(Arc::new(MockRecognizer::constant("World")), 2);
        Ingestor::new(store, extractor, "http://localhost:8001/")
    }

    #[tokio::test]
    async fn image_gets_a_url() {
        let dir = tempfile::tempdir().unwrap();
        let result = ingestor(dir.path())
            .await
            .ingest("photo.JPG", body(PNG.to_vec()))
            .await
            .unwrap();

        assert_eq!(result.content_type, "image/png");
        let url = result.file_url().unwrap();
        assert!(url.starts_with("http://localhost:8001/static/uploads/"));
        assert!(url.ends_with(&result.stored_name));
        assert!(result.info().is_none());
    }

    #[tokio::test]
    async fn text_named_jpg_is_not_an_image() {
        let dir = tempfile::tempdir().unwrap();
        let result = ingestor(dir.path())
            .await
            .ingest("photo.jpg", body(b"definitely not a picture".to_vec()))
            .await
            .unwrap();

        assert_eq!(result.content_type, "text/plain");
        assert_eq!(result.delivery, Delivery::Received);
        assert_eq!(
            result.info().unwrap(),
            "File 'photo.jpg' received and identified as text/plain."
        );
    }

    #[tokio::test]
    async fn pdf_is_extracted() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("source.pdf");
        pdf_fixture::text_then_image(&source, "Hello").unwrap();

        let result = ingestor(dir.path())
            .await
            .ingest("report.pdf", body(std::fs::read(&source).unwrap()))
            .await
            .unwrap();

        assert_eq!(result.content_type, "application/pdf");
        let Delivery::Extracted(Extraction::Pages(pages)) = &result.delivery else {
            panic!("expected extracted pages, got {:?}", result.delivery);
        };
        assert_eq!(pages.len(), 2);
        let info = result.info().unwrap();
        assert!(info.contains("Hello"));
        assert!(info.contains("Image 1: World"));
    }

    #[tokio::test]
    async fn corrupt_pdf_is_stored_and_reported() {
        let dir = tempfile::tempdir().unwrap();
        let ingestor = ingestor(dir.path()).await;
        let result = ingestor
            .ingest("broken.pdf", body(b"%PDF-1.4\ngarbage".to_vec()))
            .await
            .unwrap();

        assert!(matches!(result.delivery, Delivery::ExtractionFailed(_)));
        assert!(result.info().unwrap().contains("text extraction failed"));
        assert!(ingestor.store().dir().join(&result.stored_name).exists());
    }
}
