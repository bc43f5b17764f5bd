//! Reference classification and naming
//!
//! Pure functions deciding what kind of document a reference points at,
//! what it is called on screen, and what it is called on disk.

use std::sync::LazyLock;

use regex::Regex;
use url::Url;

/// Suffixes treated as single raster images
pub const IMAGE_EXTENSIONS: &[&str] = &["jpeg", "jpg", "png", "gif", "bmp", "tiff", "tif", "webp"];
/// Suffixes treated as paged documents
pub const PAGED_EXTENSIONS: &[&str] = &["pdf"];

/// Longest basename produced for downloads
pub const MAX_BASENAME_LEN: usize = 50;
const DEFAULT_BASENAME: &str = "document";
const DEFAULT_DATA_IMAGE_EXT: &str = "jpg";

static DATA_IMAGE_SUBTYPE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"data:image/([^;]+)").unwrap());
static TRAILING_EXTENSION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\.[^/.]+$").unwrap());
static UNSAFE_BASENAME_CHARS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^a-zA-Z0-9\-_]").unwrap());

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DocumentKind {
    Paged,
    Image,
}

/// Kind plus file extension derived from a reference
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FileClassification {
    pub kind: DocumentKind,
    pub extension: String,
}

impl FileClassification {
    pub fn paged() -> Self {
        Self {
            kind: DocumentKind::Paged,
            extension: "pdf".to_string(),
        }
    }

    pub fn image(extension: impl Into<String>) -> Self {
        Self {
            kind: DocumentKind::Image,
            extension: extension.into(),
        }
    }

    pub fn is_image(&self) -> bool {
        self.kind == DocumentKind::Image
    }

    /// MIME type matching the extension
    pub fn media_type(&self) -> String {
        match self.kind {
            DocumentKind::Paged => "application/pdf".to_string(),
            DocumentKind::Image => match self.extension.as_str() {
                "jpg" | "jpeg" => "image/jpeg".to_string(),
                "tif" | "tiff" => "image/tiff".to_string(),
                other => format!("image/{other}"),
            },
        }
    }

    /// `Accept` header used when retrieving the raw bytes for a download
    pub fn accept_header(&self) -> &'static str {
        match self.kind {
            DocumentKind::Paged => "application/pdf",
            DocumentKind::Image => "image/*",
        }
    }
}

/// Classify a reference as a paged document or an image.
///
/// Total: unrecognized references are assumed to be PDFs.
pub fn detect_type(reference: &str) -> FileClassification {
    if reference.is_empty() {
        return FileClassification::paged();
    }

    if reference.starts_with("data:") {
        if reference.contains("data:application/pdf") {
            return FileClassification::paged();
        }
        if reference.contains("data:image/") {
            let subtype = DATA_IMAGE_SUBTYPE
                .captures(reference)
                .and_then(|caps| caps.get(1))
                .map_or(DEFAULT_DATA_IMAGE_EXT, |m| m.as_str());
            return FileClassification::image(subtype);
        }
    }

    let path = reference
        .split_once('?')
        .map_or(reference, |(path, _query)| path);
    let suffix = path.rsplit('.').next().unwrap_or(path).to_lowercase();

    if IMAGE_EXTENSIONS.contains(&suffix.as_str()) {
        FileClassification::image(suffix)
    } else {
        if !PAGED_EXTENSIONS.contains(&suffix.as_str()) {
            log::trace!("Unrecognized suffix for {reference}, assuming PDF");
        }
        FileClassification::paged()
    }
}

/// Human readable title from the last path segment of a reference
pub fn extract_title(reference: &str) -> Option<String> {
    match Url::parse(reference) {
        Ok(url) => {
            let segment = url.path().rsplit('/').next().unwrap_or_default();
            if !segment.contains('.') {
                return None;
            }
            let stem = TRAILING_EXTENSION.replace(segment, "");
            match urlencoding::decode(&stem) {
                Ok(decoded) => non_empty(title_case(&separators_to_spaces(&decoded))),
                Err(_) => fallback_title(reference),
            }
        }
        Err(_) => fallback_title(reference),
    }
}

fn fallback_title(reference: &str) -> Option<String> {
    let segment = reference.rsplit('/').next().unwrap_or(reference);
    if !segment.contains('.') {
        return None;
    }
    let stem = TRAILING_EXTENSION.replace(segment, "");
    non_empty(separators_to_spaces(&stem))
}

fn separators_to_spaces(text: &str) -> String {
    text.replace(['_', '-'], " ")
}

fn title_case(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut in_word = false;
    for ch in text.chars() {
        let word_char = ch.is_alphanumeric() || ch == '_';
        if word_char && !in_word {
            out.extend(ch.to_uppercase());
        } else {
            out.push(ch);
        }
        in_word = word_char;
    }
    out
}

fn non_empty(text: String) -> Option<String> {
    let trimmed = text.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

/// Restrict a name to `[A-Za-z0-9_-]` and at most [`MAX_BASENAME_LEN`] characters
pub fn sanitize_basename(name: &str) -> String {
    let replaced = UNSAFE_BASENAME_CHARS.replace_all(name, "_");
    // Output is ASCII so byte truncation never splits a character
    replaced.chars().take(MAX_BASENAME_LEN).collect()
}

/// Basename (without extension) used when saving a reference to disk
pub fn download_basename(reference: &str) -> String {
    let Ok(url) = Url::parse(reference) else {
        return DEFAULT_BASENAME.to_string();
    };

    let segment = url.path().rsplit('/').next().unwrap_or_default();
    let segment = if segment.is_empty() {
        DEFAULT_BASENAME
    } else {
        segment
    };
    let stem = TRAILING_EXTENSION.replace(segment, "");
    let stem = if stem.is_empty() {
        DEFAULT_BASENAME
    } else {
        stem.as_ref()
    };

    sanitize_basename(stem)
}

/// Full download filename: sanitized basename plus the classified extension
pub fn download_filename(reference: &str, classification: &FileClassification) -> String {
    format!(
        "{}.{}",
        download_basename(reference),
        classification.extension
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_reference_is_pdf() {
        assert_eq!(detect_type(""), FileClassification::paged());
    }

    #[test]
    fn suffix_is_lowercased_and_query_ignored() {
        assert_eq!(detect_type("a/b/report.PDF?x=1"), FileClassification::paged());
        assert_eq!(
            detect_type("http://h/img.PNG"),
            FileClassification::image("png")
        );
        assert_eq!(
            detect_type("https://cdn.example.com/scan.tif?token=abc.pdf"),
            FileClassification::image("tif")
        );
    }

    #[test]
    fn unknown_suffix_defaults_to_pdf() {
        assert_eq!(detect_type("http://h/archive.zip"), FileClassification::paged());
        assert_eq!(detect_type("http://h/noext"), FileClassification::paged());
    }

    #[test]
    fn data_references() {
        assert_eq!(
            detect_type("data:application/pdf;base64,JVBERi0="),
            FileClassification::paged()
        );
        assert_eq!(
            detect_type("data:image/webp;base64,UklGRg=="),
            FileClassification::image("webp")
        );
        assert_eq!(
            detect_type("data:image/"),
            FileClassification::image("jpg")
        );
    }

    #[test]
    fn data_markers_inside_remote_references_are_ignored() {
        assert_eq!(
            detect_type("https://relay.example/?u=data:image/png;base64,xx/report.pdf"),
            FileClassification::paged()
        );
        assert_eq!(
            detect_type("https://cdn.example/data:image/gif/photo.jpg"),
            FileClassification::image("jpg")
        );
    }

    #[test]
    fn every_image_suffix_is_recognized() {
        for ext in IMAGE_EXTENSIONS {
            let classification = detect_type(&format!("https://example.com/file.{ext}"));
            assert!(classification.is_image(), "{ext}");
            assert_eq!(classification.extension, *ext);
        }
    }

    #[test]
    fn media_types() {
        assert_eq!(FileClassification::image("jpg").media_type(), "image/jpeg");
        assert_eq!(FileClassification::image("png").media_type(), "image/png");
        assert_eq!(FileClassification::image("tif").media_type(), "image/tiff");
        assert_eq!(FileClassification::paged().media_type(), "application/pdf");
        assert_eq!(FileClassification::paged().accept_header(), "application/pdf");
        assert_eq!(FileClassification::image("gif").accept_header(), "image/*");
    }

    #[test]
    fn title_from_url() {
        assert_eq!(
            extract_title("http://h/path/My_Doc-Final.pdf"),
            Some("My Doc Final".to_string())
        );
        assert_eq!(
            extract_title("https://example.com/files/annual%20report.pdf?v=2"),
            Some("Annual Report".to_string())
        );
        assert_eq!(extract_title("http://h/path/noext"), None);
        assert_eq!(extract_title("http://h/"), None);
    }

    #[test]
    fn title_case_capitalises_non_ascii_words() {
        assert_eq!(
            extract_title("http://h/%C3%A9lan_vital.pdf"),
            Some("Élan Vital".to_string())
        );
        assert_eq!(
            extract_title("http://h/caf%C3%A9_%C3%BCber.png"),
            Some("Café Über".to_string())
        );
    }

    #[test]
    fn title_fallback_for_relative_references() {
        assert_eq!(
            extract_title("docs/quarterly_summary.pdf"),
            Some("quarterly summary".to_string())
        );
        assert_eq!(extract_title(""), None);
        assert_eq!(extract_title("docs/_.pdf"), None);
        assert_eq!(extract_title("docs/noext"), None);
        assert_eq!(extract_title("noext"), None);
    }

    #[test]
    fn basename_from_url() {
        assert_eq!(
            download_basename("https://example.com/a/Q3 report (final).pdf"),
            "Q3_20report_20_final_"
        );
        assert_eq!(download_basename("https://example.com/"), "document");
        assert_eq!(download_basename("not a url"), "document");
        assert_eq!(download_basename("https://example.com/.pdf"), "document");
    }

    #[test]
    fn basename_is_bounded_and_safe() {
        let long = format!("https://example.com/{}.pdf", "ä".repeat(80));
        let name = download_basename(&long);
        assert!(name.len() <= MAX_BASENAME_LEN);
        assert!(
            name.chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        );
    }

    #[test]
    fn sanitize_is_idempotent() {
        for input in ["plain", "with space", "ünïcödé", "a-b_c", &"x".repeat(70)] {
            let once = sanitize_basename(input);
            assert_eq!(sanitize_basename(&once), once);
            assert!(once.chars().count() <= MAX_BASENAME_LEN);
        }
    }

    #[test]
    fn filename_uses_classified_extension() {
        let reference = "https://example.com/photos/cat.JPG";
        assert_eq!(
            download_filename(reference, &detect_type(reference)),
            "cat.jpg"
        );
    }
}
