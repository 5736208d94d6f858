//! Features Module - Feature Extraction Engine
//!
//! Turns a raw `KernelEvent` into a fixed-width `FeatureRecord`.
//! Layout is versioned so scoring models can detect schema drift.

pub mod layout;
pub mod path;
pub mod extractor;

#[cfg(test)]
mod tests;

pub use layout::{
    FEATURE_COUNT, FEATURE_LAYOUT, FEATURE_VERSION, LayoutInfo, LayoutMismatchError, layout_hash,
    validate_layout,
};
pub use extractor::{ExtractionError, ExtractorConfig, FeatureExtractor, FeatureRecord};
