// Pipeline processing: cleaning, merging, tagging, sampling, extraction and aggregation

pub mod dedup;
pub mod extraction;
pub mod normalize;
pub mod pivot;
pub mod queue;
pub mod stats;
pub mod tagging;
