//! Wire adapters, one per destination transfer protocol.

mod chunked;
mod http;
mod resumable;
mod single_shot;

pub use chunked::ChunkedProtocol;
pub use resumable::ResumableProtocol;
pub use single_shot::SingleShotProtocol;
