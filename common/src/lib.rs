pub mod text;
pub mod time;
pub mod utf16;

pub use text::*;
pub use time::*;
pub use utf16::*;
