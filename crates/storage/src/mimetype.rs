//! Extension based mimetype detection.
//!
//! Backends that don't report a content type fall back to this table. It is
//! deliberately small; anything unknown is `application/octet-stream`.

use std::path::Path;

/// Mimetype recorded for every directory.
pub const DIRECTORY: &str = "httpd/unix-directory";
/// Mimetype for files whose extension isn't recognised.
pub const UNKNOWN: &str = "application/octet-stream";

const TABLE: &[(&str, &str)] = &[
    ("7z", "application/x-7z-compressed"),
    ("avi", "video/x-msvideo"),
    ("bz2", "application/x-bzip2"),
    ("css", "text/css"),
    ("csv", "text/csv"),
    ("doc", "application/msword"),
    ("docx", "application/vnd.openxmlformats-officedocument.wordprocessingml.document"),
    ("flac", "audio/flac"),
    ("gif", "image/gif"),
    ("gz", "application/gzip"),
    ("htm", "text/html"),
    ("html", "text/html"),
    ("jpeg", "image/jpeg"),
    ("jpg", "image/jpeg"),
    ("js", "application/javascript"),
    ("json", "application/json"),
    ("md", "text/markdown"),
    ("mkv", "video/x-matroska"),
    ("mp3", "audio/mpeg"),
    ("mp4", "video/mp4"),
    ("odp", "application/vnd.oasis.opendocument.presentation"),
    ("ods", "application/vnd.oasis.opendocument.spreadsheet"),
    ("odt", "application/vnd.oasis.opendocument.text"),
    ("ogg", "audio/ogg"),
    ("pdf", "application/pdf"),
    ("png", "image/png"),
    ("svg", "image/svg+xml"),
    ("tar", "application/x-tar"),
    ("txt", "text/plain"),
    ("wav", "audio/wav"),
    ("webm", "video/webm"),
    ("webp", "image/webp"),
    ("xls", "application/vnd.ms-excel"),
    ("xlsx", "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet"),
    ("xml", "application/xml"),
    ("zip", "application/zip"),
];

/// Guess a file's mimetype from its extension (case-insensitive).
pub fn detect(path: impl AsRef<Path>) -> &'static str {
    let Some(ext) = path.as_ref().extension().and_then(|ext| ext.to_str()) else {
        return UNKNOWN;
    };
    TABLE
        .iter()
        .find(|(known, _)| known.eq_ignore_ascii_case(ext))
        .map(|(_, mime)| *mime)
        .unwrap_or(UNKNOWN)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("notes.txt", "text/plain")]
    #[case("Photos/IMG_0001.JPG", "image/jpeg")]
    #[case("archive.tar.gz", "application/gzip")]
    #[case("Makefile", UNKNOWN)]
    #[case("weird.unknownext", UNKNOWN)]
    fn test_detect(#[case] path: &str, #[case] expected: &str) {
        assert_eq!(detect(path), expected);
    }

    #[test]
    fn test_table_is_sorted() {
        // Keeps the table easy to scan when adding entries.
        assert!(TABLE.windows(2).all(|w| w[0].0 < w[1].0));
    }
}
