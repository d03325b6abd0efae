//! Media-type vocabulary and container parsing.
//!
//! [`detect`] identifies formats from extensions, magic bytes, and media
//! types. [`tiff`] and [`jp2`] parse the two structured containers deeply
//! enough to expose their resolution pyramids without decoding pixels;
//! [`jpeg`] provides the marker-level utilities (table merging, metadata
//! segment capture) shared by the TIFF tile decoder and the JPEG reader and
//! writer.

pub mod detect;
pub mod jp2;
pub mod jpeg;
pub mod tiff;

pub use detect::{detect_format, is_tiff_signature, sniff_format, Format, MAGIC_LEN};
