pub mod album;
pub mod antispam;
pub mod compose;
pub mod dedup;
pub mod deferral;
pub mod dispatch;
pub mod filter;
pub mod hotreload;
pub mod ingest;
pub mod model;
pub mod platform;
pub mod resolve;
pub mod router;
pub mod rules;
pub mod settings;
pub mod timer;

pub use model::*;
pub use router::{RouterEvent, RouterHandle, RouterParts};
pub use rules::{Rule, RuleSet};
pub use settings::PipelineSettings;
