// Review mining pipeline: the pure per-stage processing

pub mod processing;
