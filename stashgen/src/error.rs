#![allow(non_shorthand_field_patterns)]
#![doc = "Error handling primitives shared across the generator crate."]
// SPDX-FileCopyrightText: 2025 RAprogramm <andrey.rozanov.vl@gmail.com>
//
// SPDX-License-Identifier: MIT

//! The derive emitted by [`masterror::Error`] expands pattern matches that
//! trigger the `non_shorthand_field_patterns` lint. The lint is disabled for
//! the module to keep the generated implementations warning-free.

use std::path::{Path, PathBuf};

/// Unified error type returned by the loader, renderer, publisher and CLI.
///
/// Variants map onto the failure classes of a generation run: input problems
/// ([`Error::Validation`], [`Error::Coercion`]) abort before anything is
/// written, [`Error::Encoding`] only fails a single device, and
/// [`Error::Publish`] is reported as a warning by the pipeline.
/// [`Error::Incomplete`] is the CLI's exit error for a partially published
/// run.
#[derive(Debug, masterror::Error)]
pub enum Error {
    /// Wraps filesystem errors together with the path that triggered them.
    #[error("filesystem operation failed for {path:?}: {source}")]
    Io {
        /// Location of the file or directory.
        path:   PathBuf,
        /// Underlying I/O error.
        source: std::io::Error
    },
    /// Wraps YAML decoding errors raised while reading settings.
    #[error("failed to parse settings: {source}")]
    Parse {
        /// Source decoding error from serde_yaml.
        source: serde_yaml::Error
    },
    /// Returned when input or settings violate invariants.
    #[error("invalid input: {message}")]
    Validation {
        /// Human readable message describing the validation problem.
        message: String
    },
    /// Returned when a spreadsheet cell cannot be coerced into its field type.
    #[error("row {row}, column '{column}': cannot read {value:?} as {expected}")]
    Coercion {
        /// One-based data row number (the header row is not counted).
        row:      usize,
        /// Header of the offending column.
        column:   String,
        /// Raw cell contents.
        value:    String,
        /// Description of the expected type.
        expected: &'static str
    },
    /// Wraps workbook and CSV decoding failures.
    #[error("failed to read spreadsheet {path:?}: {message}")]
    Spreadsheet {
        /// Location of the spreadsheet.
        path:    PathBuf,
        /// Decoder error text.
        message: String
    },
    /// Wraps YAML serialization errors raised while rendering documents.
    #[error("failed to render document: {source}")]
    Render {
        /// Underlying serialization error.
        source: serde_yaml::Error
    },
    /// Returned when a scannable code cannot be produced for a payload.
    #[error("failed to encode QR code: {message}")]
    Encoding {
        /// Human readable message describing the encoder failure.
        message: String
    },
    /// Wraps failures reported by the version-control client.
    #[error("publish failed: {message}")]
    Publish {
        /// Captured error text.
        message: String
    },
    /// Wraps zip archive failures raised while writing backups.
    #[error("failed to write backup archive {path:?}: {source}")]
    Archive {
        /// Location of the archive.
        path:   PathBuf,
        /// Underlying zip error.
        source: zip::result::ZipError
    },
    /// Wraps JSON errors raised while reading or writing the run state file.
    #[error("failed to read or write run state: {source}")]
    State {
        /// Underlying serialization error.
        source: serde_json::Error
    },
    /// Wraps JSON errors raised while writing a machine-readable report.
    #[error("failed to write JSON report: {source}")]
    Report {
        /// Underlying serialization error.
        source: serde_json::Error
    },
    /// Returned when a run finished but some devices were not published.
    #[error("{failed} of {total} devices could not be published")]
    Incomplete {
        /// Number of devices whose artifacts are missing.
        failed: usize,
        /// Number of devices in the run.
        total:  usize
    }
}

impl Error {
    /// Constructs a validation error from the provided displayable value.
    ///
    /// # Parameters
    ///
    /// * `message` - Human-readable description of the validation failure.
    pub fn validation<M>(message: M) -> Self
    where
        M: Into<String>
    {
        Self::Validation {
            message: message.into()
        }
    }

    /// Constructs an encoding error from the provided displayable value.
    pub fn encoding<M>(message: M) -> Self
    where
        M: Into<String>
    {
        Self::Encoding {
            message: message.into()
        }
    }

    /// Constructs a publish error from the provided displayable value.
    pub fn publish<M>(message: M) -> Self
    where
        M: Into<String>
    {
        Self::Publish {
            message: message.into()
        }
    }

    /// Formats the error for diagnostics without the variant name.
    ///
    /// This method is primarily intended for CLI contexts where the variant
    /// name does not add value to end users. The returned string matches the
    /// [`std::fmt::Display`] implementation.
    pub fn to_display_string(&self) -> String {
        format!("{self}")
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(source: serde_yaml::Error) -> Self {
        Self::Parse {
            source
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(source: serde_json::Error) -> Self {
        Self::State {
            source
        }
    }
}

impl From<masterror::AppError> for Error {
    fn from(error: masterror::AppError) -> Self {
        Self::Publish {
            message: app_error_message(&error)
        }
    }
}

/// Extracts the human-readable message carried by an [`masterror::AppError`],
/// falling back to its kind when no message was attached.
pub fn app_error_message(error: &masterror::AppError) -> String {
    error
        .message
        .as_deref()
        .map(str::to_owned)
        .unwrap_or_else(|| error.to_string())
}

/// Creates an [`Error::Io`] variant capturing the failing path and source.
///
/// # Parameters
///
/// * `path` - Location of the file or directory that triggered the error.
/// * `source` - I/O error reported by the operating system.
pub fn io_error(path: &Path, source: std::io::Error) -> Error {
    Error::Io {
        path: path.to_path_buf(),
        source
    }
}

/// Creates an [`Error::Spreadsheet`] variant for the given input file.
pub fn spreadsheet_error<M>(path: &Path, message: M) -> Error
where
    M: std::fmt::Display
{
    Error::Spreadsheet {
        path:    path.to_path_buf(),
        message: message.to_string()
    }
}

/// Creates an [`Error::Archive`] variant capturing the archive path.
pub fn archive_error(path: &Path, source: zip::result::ZipError) -> Error {
    Error::Archive {
        path: path.to_path_buf(),
        source
    }
}
