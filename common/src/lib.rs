#![warn(missing_docs)]

//! `avcmux-common` is a common library shared by the `avcmux` crates.
//!
//! It holds the error [`Report`] machinery used to pinpoint where in the muxer an error occurred, the
//! `bail_attach!`/`ensure_attach!`/`report_attach!` macros built on it, and the [`FourCC`](parse::FourCC) type used
//! to name ISO base media boxes and brands.

#[macro_use]
pub mod macros;

pub mod error;
pub mod parse;

//
// public types
//

pub use error::{Error, Report, ReportableError, Result, ResultExt};
