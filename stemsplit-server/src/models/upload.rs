//! Upload validation and filename sanitization
//!
//! Everything here runs before the filesystem is touched: a request that
//! fails validation never reaches the workspace manager.

use std::path::Path;
use thiserror::Error;

/// Audio extensions accepted by `POST /split` (compared case-insensitively)
pub const ALLOWED_EXTENSIONS: [&str; 3] = ["mp3", "wav", "ogg"];

/// Reserved device names on Windows; a sanitized name starting with one of
/// these gets an underscore prefix
const WINDOWS_DEVICE_NAMES: [&str; 22] = [
    "CON", "PRN", "AUX", "NUL", "COM1", "COM2", "COM3", "COM4", "COM5", "COM6", "COM7", "COM8",
    "COM9", "LPT1", "LPT2", "LPT3", "LPT4", "LPT5", "LPT6", "LPT7", "LPT8", "LPT9",
];

/// Inbound request could not be accepted
///
/// The display strings of the first three variants are the exact messages
/// returned to the caller.
#[derive(Debug, Error)]
pub enum ValidationError {
    /// No multipart field named `file` carrying a filename
    #[error("No file part")]
    NoFilePart,

    /// The `file` part has an empty filename
    #[error("No selected file")]
    NoSelectedFile,

    /// Extension outside the accepted set, or nothing usable left after
    /// sanitization
    #[error("File type not allowed")]
    FileTypeNotAllowed,

    /// Staging the upload failed at the filesystem level
    #[error("Workspace error: {0}")]
    Workspace(#[from] std::io::Error),
}

impl ValidationError {
    /// True for rejections caused by the caller's input (HTTP 400)
    pub fn is_client_error(&self) -> bool {
        !matches!(self, ValidationError::Workspace(_))
    }
}

/// A validated upload filename
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadName {
    original: String,
    sanitized: String,
}

impl UploadName {
    /// Validate a declared filename and derive its safe filesystem name
    pub fn parse(declared: &str) -> Result<Self, ValidationError> {
        if declared.is_empty() {
            return Err(ValidationError::NoSelectedFile);
        }
        if !has_allowed_extension(declared) {
            return Err(ValidationError::FileTypeNotAllowed);
        }

        let sanitized = sanitize_filename(declared);
        if sanitized.is_empty() || !has_allowed_extension(&sanitized) {
            return Err(ValidationError::FileTypeNotAllowed);
        }
        if Path::new(&sanitized).file_stem().is_none() {
            return Err(ValidationError::FileTypeNotAllowed);
        }

        Ok(Self {
            original: declared.to_string(),
            sanitized,
        })
    }

    /// Filename as declared by the caller
    pub fn original(&self) -> &str {
        &self.original
    }

    /// Filename used on disk
    pub fn sanitized(&self) -> &str {
        &self.sanitized
    }

    /// Sanitized filename without its extension
    pub fn stem(&self) -> &str {
        match self.sanitized.rfind('.') {
            Some(idx) if idx > 0 => &self.sanitized[..idx],
            _ => &self.sanitized,
        }
    }
}

/// True when the text after the last `.` is an accepted audio extension
pub fn has_allowed_extension(filename: &str) -> bool {
    filename
        .rsplit_once('.')
        .map(|(_, ext)| {
            let ext = ext.to_ascii_lowercase();
            ALLOWED_EXTENSIONS.contains(&ext.as_str())
        })
        .unwrap_or(false)
}

/// Reduce a caller-supplied filename to a safe single path component
///
/// Path separators become word breaks, whitespace runs become `_`, anything
/// outside `[A-Za-z0-9_.-]` is dropped, and leading/trailing `.`/`_` are
/// stripped. The result may be empty.
pub fn sanitize_filename(filename: &str) -> String {
    let spaced: String = filename
        .chars()
        .map(|c| if c == '/' || c == '\\' { ' ' } else { c })
        .collect();

    let joined = spaced.split_whitespace().collect::<Vec<_>>().join("_");

    let filtered: String = joined
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
        .collect();

    let mut sanitized = filtered.trim_matches(|c| c == '.' || c == '_').to_string();

    if cfg!(windows) && !sanitized.is_empty() {
        let head = sanitized.split('.').next().unwrap_or_default().to_ascii_uppercase();
        if WINDOWS_DEVICE_NAMES.contains(&head.as_str()) {
            sanitized.insert(0, '_');
        }
    }

    sanitized
}
