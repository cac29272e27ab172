//! Error types shared by the capture, input and output layers.
//!
//! KEXINIT decoding failures have their own type, [`crate::analyser::kexinit::KexDecodeError`],
//! because they never leave the analyser.

use thiserror::Error;

/// Main error type for keihash operations.
#[derive(Error, Debug)]
pub enum Error {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The capture could not be read any further
    #[error("Capture read error: {reason}")]
    Capture { reason: String },

    /// tshark could not be spawned or its output could not be read
    #[error("tshark error: {reason}")]
    Tshark { reason: String },

    /// Processed-files database could not be (de)serialised
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A filename wildcard did not compile
    #[error("Invalid wildcard pattern: {0}")]
    Pattern(#[from] regex::Error),

    /// An `@file` argument could not be read
    #[error("Error reading file list {path}")]
    FileList { path: String },
}

pub type Result<T> = std::result::Result<T, Error>;
