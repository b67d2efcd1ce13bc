mod normalize;
mod prompt;
mod record;
pub mod repair;

pub use normalize::{normalize, record_from_object};
pub use prompt::INSTRUCTION_PROMPT;
pub use record::{AnalysisRecord, Wellbeing};
