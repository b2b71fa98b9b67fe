pub mod log;
pub mod rules;

pub use log::*;
pub use rules::*;
