// Copyright (c) 2025 Joshua Seaton
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Streaming WebAssembly binary format parsing and validation.
//!
//! A module binary is fed to a [`Parser`] in arbitrary-sized chunks;
//! parsing resumes across chunk boundaries without re-reading, and
//! function bodies are type-checked on a worker pool concurrently with
//! parsing. [`Parser::finish`] yields the fully parsed, validated
//! [`Module`] or the first error encountered.

pub mod cursor;
pub mod error;
pub mod module;
pub mod parser;
pub mod types;

mod decode;
mod leb128;
mod pool;
mod validate;

pub use cursor::Cursor;
pub use error::{Error, ParseError, ReadError, ValidationError};
pub use module::Module;
pub use parser::Parser;

/// Parses and validates a complete module held in memory.
pub fn parse(bytes: &[u8]) -> Result<Module, Error> {
    let mut parser = Parser::new();
    parser.push(bytes)?;
    parser.finish()
}
