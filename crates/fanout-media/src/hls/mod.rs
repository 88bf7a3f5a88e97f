//! HLS media playlists: generation, parsing, and the playlist model.

mod generator;
mod parser;
mod types;

pub use generator::generate_media_playlist;
pub use parser::parse_media_playlist;
pub use types::{ByteRange, MediaPlaylist, Segment};
