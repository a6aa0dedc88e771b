//! Extension-based file classification for the browser API.

use serde::Serialize;

/// How the browser should present a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Image,
    Audio,
    Text,
    Document,
    Other,
}

impl Category {
    /// Classify by extension, case-insensitively, without the leading dot.
    pub fn from_extension(ext: &str) -> Self {
        match ext.to_ascii_lowercase().as_str() {
            "png" | "jpeg" | "jpg" | "gif" | "webp" | "bmp" => Category::Image,
            "m3a" | "m4a" | "mp3" | "wav" | "ogg" | "oga" | "flac" => Category::Audio,
            "txt" => Category::Text,
            "pdf" | "csv" | "tsv" | "xls" | "xlsx" | "doc" | "docx" => Category::Document,
            _ => Category::Other,
        }
    }
}

/// Whether the UI offers an inline preview for this extension.
pub fn is_previewable(ext: &str) -> bool {
    matches!(
        ext.to_ascii_lowercase().as_str(),
        "txt" | "jpg" | "jpeg" | "png" | "webp" | "mp3" | "m4a" | "wav" | "mp4" | "mov"
    )
}

/// Extension of a file name without the dot, or "" when there is none.
pub fn extension_of(name: &str) -> &str {
    match name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => ext,
        _ => "",
    }
}
