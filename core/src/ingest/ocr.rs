use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use crate::config::Settings;
use crate::error::OcrError;

/// How the samples of an embedded image are encoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageEncoding {
    /// A complete JPEG file (`DCTDecode`).
    Jpeg,
    /// A complete JPEG 2000 codestream (`JPXDecode`).
    Jpeg2000,
    /// Raw 8-bit grayscale samples, row-major.
    Gray8,
    /// Raw 8-bit RGB samples, row-major.
    Rgb8,
    /// Anything the recognizer cannot be handed; carries a description.
    Unsupported(String),
}

/// One raster image pulled out of a document page.
#[derive(Debug, Clone)]
pub struct RasterImage {
    pub width: u32,
    pub height: u32,
    pub encoding: ImageEncoding,
    pub data: Vec<u8>,
}

impl RasterImage {
    /// Serializes the image into something an OCR engine can open, with a
    /// matching file extension.
    pub fn to_file_bytes(&self) -> Result<(&'static str, Vec<u8>), OcrError> {
        let netpbm = |magic: &str| {
            let mut out = format!("{magic}\n{} {}\n255\n", self.width, self.height).into_bytes();
            out.extend_from_slice(&self.data);
            out
        };
        match &self.encoding {
            ImageEncoding::Jpeg => Ok(("jpg", self.data.clone())),
            ImageEncoding::Jpeg2000 => Ok(("jp2", self.data.clone())),
            ImageEncoding::Gray8 => Ok(("pgm", netpbm("P5"))),
            ImageEncoding::Rgb8 => Ok(("ppm", netpbm("P6"))),
            ImageEncoding::Unsupported(what) => Err(OcrError::UnsupportedImage(what.clone())),
        }
    }
}

/// Extracts text from a single image.
#[async_trait]
pub trait TextRecognizer: Send + Sync {
    async fn recognize(&self, image: &RasterImage) -> Result<String, OcrError>;
}

/// Runs the `tesseract` CLI on a temporary copy of the image.
#[derive(Debug, Clone)]
pub struct Tesseract {
    binary: String,
    languages: String,
    timeout: Duration,
}

impl Tesseract {
    pub fn new(settings: &Settings) -> Self {
        Self {
            binary: settings.tesseract_bin.clone(),
            languages: settings.ocr_languages.clone(),
            timeout: settings.ocr_timeout,
        }
    }

    pub fn languages(&self) -> &str {
        &self.languages
    }
}

#[async_trait]
impl TextRecognizer for Tesseract {
    async fn recognize(&self, image: &RasterImage) -> Result<String, OcrError> {
        let (ext, bytes) = image.to_file_bytes()?;
        let input = tempfile::Builder::new()
            .prefix("ocr-")
            .suffix(&format!(".{ext}"))
            .tempfile()?;
        tokio::fs::write(input.path(), &bytes).await?;

        debug!("Running {} on {}x{} {}", self.binary, image.width, image.height, ext);
        let child = Command::new(&self.binary)
            .arg(input.path())
            .arg("stdout")
            .arg("-l")
            .arg(&self.languages)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| OcrError::Timeout(self.timeout.as_secs()))??;

        if !output.status.success() {
            return Err(OcrError::Recognizer {
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn image(encoding: ImageEncoding, data: Vec<u8>) -> RasterImage {
        RasterImage {
            width: 2,
            height: 1,
            encoding,
            data,
        }
    }

    #[test]
    fn raw_samples_become_netpbm() {
        let (ext, bytes) = image(ImageEncoding::Gray8, vec![0, 255]).to_file_bytes().unwrap();
        assert_eq!(ext, "pgm");
        assert_eq!(bytes, b"P5\n2 1\n255\n\x00\xff");

        let (ext, bytes) = image(ImageEncoding::Rgb8, vec![1, 2, 3, 4, 5, 6])
            .to_file_bytes()
            .unwrap();
        assert_eq!(ext, "ppm");
        assert!(bytes.starts_with(b"P6\n2 1\n255\n"));
        assert!(bytes.ends_with(&[1, 2, 3, 4, 5, 6]));
    }

    #[test]
    fn encoded_images_pass_through() {
        let (ext, bytes) = image(ImageEncoding::Jpeg, vec![0xFF, 0xD8]).to_file_bytes().unwrap();
        assert_eq!(ext, "jpg");
        assert_eq!(bytes, vec![0xFF, 0xD8]);
    }

    #[test]
    fn unsupported_encoding_is_an_error() {
        let err = image(ImageEncoding::Unsupported("CCITTFaxDecode".into()), vec![])
            .to_file_bytes()
            .unwrap_err();
        assert!(err.to_string().contains("CCITTFaxDecode"));
    }

    #[tokio::test]
    async fn missing_binary_is_reported_not_panicked() {
        let settings = Settings {
            tesseract_bin: "/nonexistent/tesseract".into(),
            ..Settings::default()
        };
        let err = Tesseract::new(&settings)
            .recognize(&image(ImageEncoding::Gray8, vec![0, 0]))
            .await
            .unwrap_err();
        assert!(matches!(err, OcrError::Io(_)));
    }

    #[test]
    fn targets_english_and_korean_by_default() {
        assert_eq!(Tesseract::new(&Settings::default()).languages(), "eng+kor");
    }
}
