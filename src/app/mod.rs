pub mod ports;
pub mod normalize_use_case;
pub mod dedup_use_case;
pub mod tag_use_case;
pub mod queue_use_case;
pub mod extract_use_case;
pub mod analyze_use_case;
pub mod run_use_case;
