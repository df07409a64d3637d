// Copyright 2025 The Rackwise Authors
// SPDX-License-Identifier: Apache-2.0

//! Error types for core configuration and validation.

use thiserror::Error;

/// A specialized `Result` type for core operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors produced by the core crate.
#[derive(Debug, Error)]
pub enum Error {
    /// An I/O error while reading configuration.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// The configuration could not be parsed or is invalid.
    #[error("config error: {0}")]
    Config(String),

    /// An erasure-coding scheme failed validation.
    #[error("invalid erasure scheme: {0}")]
    InvalidScheme(String),
}
