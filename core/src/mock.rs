//! Test doubles: a scripted generator, a canned recognizer and PDF
//! fixtures.
//!
//! [`MockGenerator`] implements [`Generate`] without touching the network.
//! Replies are queued per model; when a model's queue is empty the mock
//! echoes `"<model>: <prompt>"` so concurrent tests never run dry.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::{GenerationError, OcrError};
use crate::ingest::ocr::{RasterImage, TextRecognizer};
use crate::llm::{Generate, GenerateOptions};

/// One call observed by the mock.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedCall {
    pub model: String,
    pub prompt: String,
    pub options: GenerateOptions,
}

#[derive(Default)]
pub struct MockGenerator {
    replies: Mutex<HashMap<String, VecDeque<Result<String, GenerationError>>>>,
    delays: Mutex<HashMap<String, Duration>>,
    calls: Mutex<Vec<RecordedCall>>,
}

impl MockGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a successful reply for `model`.
    pub fn reply(&self, model: &str, text: impl Into<String>) -> &Self {
        self.push(model, Ok(text.into()))
    }

    /// Queues a failure for `model`.
    pub fn fail(&self, model: &str, error: GenerationError) -> &Self {
        self.push(model, Err(error))
    }

    /// Makes every call to `model` sleep first.
    pub fn delay(&self, model: &str, delay: Duration) -> &Self {
        self.delays
            .lock()
            .unwrap()
            .insert(model.to_string(), delay);
        self
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().unwrap().clone()
    }

    fn push(&self, model: &str, reply: Result<String, GenerationError>) -> &Self {
        self.replies
            .lock()
            .unwrap()
            .entry(model.to_string())
            .or_default()
            .push_back(reply);
        self
    }
}

#[async_trait]
impl Generate for MockGenerator {
    async fn generate(
        &self,
        model: &str,
        prompt: &str,
        options: &GenerateOptions,
    ) -> Result<String, GenerationError> {
        self.calls.lock().unwrap().push(RecordedCall {
            model: model.to_string(),
            prompt: prompt.to_string(),
            options: options.clone(),
        });

        let delay = self.delays.lock().unwrap().get(model).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let queued = self
            .replies
            .lock()
            .unwrap()
            .get_mut(model)
            .and_then(VecDeque::pop_front);
        queued.unwrap_or_else(|| Ok(format!("{model}: {prompt}")))
    }
}

enum Canned {
    Text(String),
    Width,
    Failure,
}

/// Recognizer that returns canned text for every image.
pub struct MockRecognizer {
    reply: Canned,
}

impl MockRecognizer {
    pub fn constant(text: impl Into<String>) -> Self {
        Self {
            reply: Canned::Text(text.into()),
        }
    }

    /// Answers `w<width>`, so tests can tell images apart by size.
    pub fn by_width() -> Self {
        Self { reply: Canned::Width }
    }

    /// Fails on every image.
    pub fn failing() -> Self {
        Self {
            reply: Canned::Failure,
        }
    }
}

#[async_trait]
impl TextRecognizer for MockRecognizer {
    async fn recognize(&self, image: &RasterImage) -> Result<String, OcrError> {
        match &self.reply {
            Canned::Text(text) => Ok(text.clone()),
            Canned::Width => Ok(format!("w{}", image.width)),
            Canned::Failure => Err(OcrError::Recognizer {
                status: "exit status: 1".into(),
                stderr: format!("cannot read {}x{} image", image.width, image.height),
            }),
        }
    }
}

/// Small PDFs built with lopdf, for extraction tests.
pub mod pdf_fixture {
    use std::path::Path;

    use lopdf::content::{Content, Operation};
    use lopdf::{dictionary, Document, Object, ObjectId, Stream};

    /// Start of a JFIF stream; recognizers under test never decode it.
    const JPEG_STUB: &[u8] = &[0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0x10, b'J', b'F', b'I', b'F', 0xFF, 0xD9];

    /// Two pages: the first shows `text`, the second draws one JPEG image.
    pub fn text_then_image(path: &Path, text: &str) -> lopdf::Result<()> {
        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();

        let font_id = doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => "Helvetica",
        });
        let text_resources = doc.add_object(dictionary! {
            "Font" => dictionary! { "F1" => font_id },
        });
        let text_content = Content {
            operations: vec![
                Operation::new("BT", vec![]),
                Operation::new("Tf", vec!["F1".into(), 24.into()]),
                Operation::new("Td", vec![100.into(), 600.into()]),
                Operation::new("Tj", vec![Object::string_literal(text)]),
                Operation::new("ET", vec![]),
            ],
        };
        let text_page = add_page(&mut doc, pages_id, text_resources, text_content.encode()?);

        let image_id = doc.add_object(Stream::new(
            dictionary! {
                "Type" => "XObject",
                "Subtype" => "Image",
                "Width" => 1,
                "Height" => 1,
                "ColorSpace" => "DeviceGray",
                "BitsPerComponent" => 8,
                "Filter" => "DCTDecode",
            },
            JPEG_STUB.to_vec(),
        ));
        let image_resources = doc.add_object(dictionary! {
            "XObject" => dictionary! { "Im1" => image_id },
        });
        let image_content = Content {
            operations: vec![
                Operation::new("q", vec![]),
                Operation::new(
                    "cm",
                    vec![200.into(), 0.into(), 0.into(), 200.into(), 100.into(), 400.into()],
                ),
                Operation::new("Do", vec!["Im1".into()]),
                Operation::new("Q", vec![]),
            ],
        };
        let image_page = add_page(&mut doc, pages_id, image_resources, image_content.encode()?);

        finish(&mut doc, pages_id, vec![text_page, image_page]);
        doc.save(path)?;
        Ok(())
    }

    /// One page whose resources list images in a different order than
    /// the content draws them. `Unused` (width 3) is never drawn; `Fm1` is
    /// a form drawing `Inner` (width 4). Drawing order yields widths 1, 2, 4.
    pub fn drawn_out_of_order(path: &Path) -> lopdf::Result<()> {
        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();

        let mut image = |width: i64| {
            doc.add_object(Stream::new(
                dictionary! {
                    "Type" => "XObject",
                    "Subtype" => "Image",
                    "Width" => width,
                    "Height" => 1,
                    "ColorSpace" => "DeviceGray",
                    "BitsPerComponent" => 8,
                    "Filter" => "DCTDecode",
                },
                JPEG_STUB.to_vec(),
            ))
        };
        let unused = image(3);
        let second = image(2);
        let first = image(1);
        let inner = image(4);

        let form_content = Content {
            operations: vec![Operation::new("Do", vec!["Inner".into()])],
        };
        let form_id = doc.add_object(Stream::new(
            dictionary! {
                "Type" => "XObject",
                "Subtype" => "Form",
                "BBox" => vec![0.into(), 0.into(), 100.into(), 100.into()],
                "Resources" => dictionary! {
                    "XObject" => dictionary! { "Inner" => inner },
                },
            },
            form_content.encode()?,
        ));

        let resources = doc.add_object(dictionary! {
            "XObject" => dictionary! {
                "Unused" => unused,
                "Second" => second,
                "First" => first,
                "Fm1" => form_id,
            },
        });
        let content = Content {
            operations: vec![
                Operation::new("Do", vec!["First".into()]),
                Operation::new("Do", vec!["Second".into()]),
                Operation::new("Do", vec!["Fm1".into()]),
            ],
        };
        let page = add_page(&mut doc, pages_id, resources, content.encode()?);

        finish(&mut doc, pages_id, vec![page]);
        doc.save(path)?;
        Ok(())
    }

    /// A well-formed document without any page.
    pub fn empty(path: &Path) -> lopdf::Result<()> {
        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();
        finish(&mut doc, pages_id, Vec::new());
        doc.save(path)?;
        Ok(())
    }

    fn add_page(doc: &mut Document, pages_id: ObjectId, resources: ObjectId, content: Vec<u8>) -> ObjectId {
        let content_id = doc.add_object(Stream::new(dictionary! {}, content));
        doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "MediaBox" => vec![0.into(), 0.into(), 595.into(), 842.into()],
            "Contents" => content_id,
            "Resources" => resources,
        })
    }

    fn finish(doc: &mut Document, pages_id: ObjectId, kids: Vec<ObjectId>) {
        let count = kids.len() as i64;
        let pages = dictionary! {
            "Type" => "Pages",
            "Kids" => kids.into_iter().map(Object::from).collect::<Vec<_>>(),
            "Count" => count,
        };
        doc.objects.insert(pages_id, Object::Dictionary(pages));

        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        doc.trailer.set("Root", catalog_id);
    }
}
