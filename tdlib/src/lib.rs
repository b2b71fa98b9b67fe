pub mod cache;
pub mod client;
pub mod convert;
pub mod peers;
pub mod send;

pub use cache::MessageStore;
pub use client::TdlibClient;
pub use peers::PeerCache;
pub use send::TdlibOutbound;
