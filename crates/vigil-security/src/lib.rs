//! vigil security — taint-tracked three-tier content screening

pub mod block;
pub mod pipeline;
pub mod static_tier;
pub mod supervisor;
pub mod triage;

pub use block::{BlockArena, BlockType, ContentBlock, Trust};
pub use pipeline::{ScreenOutcome, ScreenRequest, SecurityPipeline};
pub use static_tier::{run_static, StaticReport};
pub use supervisor::{Action, SupervisorOutcome};
pub use triage::TriageOutcome;
