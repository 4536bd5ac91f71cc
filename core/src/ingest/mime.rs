//! Content-based MIME detection. Filenames and client-declared types are
//! never consulted.

/// How many leading bytes are kept for sniffing.
pub const SNIFF_LEN: usize = 8192;

pub const EMPTY: &str = "application/x-empty";
pub const TEXT: &str = "text/plain";
pub const BINARY: &str = "application/octet-stream";

/// The three branches of the upload pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    Pdf,
    Image,
    Other,
}

/// What the leading bytes of a file say it is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sniffed {
    pub mime: String,
    /// Extension the file is stored under. Markup and scripts get `txt` so
    /// the static route never serves them as something a browser runs.
    pub extension: &'static str,
}

impl Sniffed {
    fn new(mime: &str, extension: &'static str) -> Self {
        Self {
            mime: mime.to_string(),
            extension,
        }
    }
}

/// Detects the type of `head`, the first bytes of a file.
pub fn sniff(head: &[u8]) -> Sniffed {
    if head.is_empty() {
        return Sniffed::new(EMPTY, "bin");
    }
    match infer::get(head) {
        Some(kind) if kind.matcher_type() == infer::MatcherType::Text => {
            Sniffed::new(kind.mime_type(), "txt")
        }
        Some(kind) => Sniffed::new(kind.mime_type(), kind.extension()),
        None if looks_like_text(head) => Sniffed::new(TEXT, "txt"),
        None => Sniffed::new(BINARY, "bin"),
    }
}

/// Maps a detected MIME type onto a pipeline branch.
pub fn classify(mime: &str) -> FileKind {
    if mime == "application/pdf" {
        FileKind::Pdf
    } else if mime.starts_with("image/") {
        FileKind::Image
    } else {
        FileKind::Other
    }
}

fn looks_like_text(head: &[u8]) -> bool {
    if head.contains(&0) {
        return false;
    }
    match std::str::from_utf8(head) {
        Ok(_) => true,
        // A multi-byte character cut off by the sniff window is still text
        Err(e) => e.error_len().is_none(),
    }
}
