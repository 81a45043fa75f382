//! Typed model, parser and serializer for M3U8 playlists (RFC 8216 plus the
//! LL-HLS additions from the bis draft).
//!
//! Everything here is plain owned data: playlists clone freely, compare
//! structurally and carry no interior mutability. The live actors in
//! [`crate::live`] are the only holders of mutable playlist state.

pub(crate) mod attrs;
pub mod master;
pub mod media;
pub mod parse;
pub mod types;
pub mod write;

pub use master::{
    ClosedCaptions, IFrameVariant, MasterPlaylist, MediaType, Rendition, Variant,
};
pub use media::{MediaPlaylist, MediaPlaylistBuilder, Segment};
pub use parse::{parse, ParseError};
pub use types::*;

use std::fmt::{Display, Formatter};
use std::str::FromStr;

/// A parsed playlist document: either a master (multivariant) playlist or a
/// media playlist.
#[derive(Debug, Clone, PartialEq)]
pub enum Manifest {
    Master(MasterPlaylist),
    Media(MediaPlaylist),
}

impl Manifest {
    pub fn parse(input: &str) -> Result<Self, ParseError> {
        parse::parse(input)
    }

    /// Serialize to M3U8 text with a trailing newline.
    pub fn render(&self) -> String {
        match self {
            Manifest::Master(m) => write::write_master(m),
            Manifest::Media(m) => write::write_media(m),
        }
    }

    pub fn required_version(&self) -> u8 {
        match self {
            Manifest::Master(m) => m.required_version(),
            Manifest::Media(m) => m.required_version(),
        }
    }

    pub fn as_media(&self) -> Option<&MediaPlaylist> {
        match self {
            Manifest::Media(m) => Some(m),
            Manifest::Master(_) => None,
        }
    }

    pub fn as_master(&self) -> Option<&MasterPlaylist> {
        match self {
            Manifest::Master(m) => Some(m),
            Manifest::Media(_) => None,
        }
    }
}

impl Display for Manifest {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.render())
    }
}

impl FromStr for Manifest {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}
