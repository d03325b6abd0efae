//! deriva - the core image-delivery pipeline of an image server.
//!
//! This library takes a resolved source-image identifier and an ordered
//! operation list and produces the requested derivative (cropped, scaled,
//! rotated, re-encoded) with bounded memory and time, exploiting the source
//! format's internal structure - TIFF tile/strip pyramids, JPEG2000 wavelet
//! levels - to avoid decoding pixels it will discard.

pub mod cache;
pub mod config;
pub mod delegate;
pub mod error;
pub mod format;
pub mod image;
pub mod io;
pub mod ops;
pub mod pipeline;
pub mod reader;
pub mod service;
pub mod source;
pub mod writer;

// Re-export commonly used types
pub use cache::{CachedDerivative, DerivativeCache, InfoCache, StagedDerivative};
pub use config::Config;
pub use delegate::{Delegate, SerializedDelegate};
pub use error::{Error, FormatError, IoError, TiffError};
pub use format::{detect_format, sniff_format, Format};
pub use image::{ImageInfo, LevelInfo, PixelMatrix, Region};
pub use io::{
    BlockCachedReader, FileRangeReader, HttpCredentials, HttpRangeReader, MemoryRangeReader,
    ObjectRangeReader, RangeReader,
};
pub use ops::{
    pick_level, subsample_for, ColorTransform, Crop, Encode, Fingerprint, LevelChoice, Operation,
    OperationList, Overlay, OverlayPosition, ReductionFactor, Rotate, Scale, Sharpen,
    TiffCompression, Transpose,
};
pub use pipeline::PipelineExecutor;
pub use reader::{
    open_reader, BaselineReader, ImageReader, Jp2Reader, JpegReader, ReadHints, ReaderOptions,
    TiffReader,
};
pub use service::{ImageService, ImageServiceBuilder};
pub use source::{
    BlobQueries, BlobQueryExecutor, DatabaseSource, FilesystemSource, HttpSource, LookupStrategy,
    ObjectStoreSource, Source, SourceHandle,
};
pub use writer::encode as encode_derivative;
