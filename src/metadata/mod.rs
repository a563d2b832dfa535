pub mod metadata_extractor;
pub mod metadata_tags;

pub use metadata_extractor::{sanitize_text, MetadataExtractor, LOAD_FAILURE_MESSAGE};
