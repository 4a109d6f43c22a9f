//! Description of a region of media data to be loaded.

use url::Url;

use crate::mpd::RangedUri;

/// Sentinel length meaning "until the end of the resource".
pub const LENGTH_UNBOUNDED: i64 = -1;

/// Permits an underlying network stack to request that the server use gzip compression.
///
/// Should not typically be set if the data being requested is already compressed (e.g. most audio
/// and video requests). When set and honored, the length resolved by [`super::DataSource::open`]
/// will typically be [`LENGTH_UNBOUNDED`] and reads return the decompressed data.
pub const FLAG_ALLOW_GZIP: u32 = 1;

/// Defines a region of media data. Immutable; chunks keep a copy of the spec they were created
/// with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataSpec {
    /// Identifies the source from which data should be read.
    pub uri: Url,
    /// Body for a POST request, `None` for GET.
    pub post_body: Option<Vec<u8>>,
    /// The absolute position of the data in the full stream.
    pub absolute_stream_position: i64,
    /// The position of the data when read from `uri`. Equal to `absolute_stream_position`
    /// unless `uri` itself addresses a subset of the underlying resource.
    pub position: i64,
    /// The length of the data, or [`LENGTH_UNBOUNDED`].
    pub length: i64,
    /// A key that uniquely identifies the original stream, for cache indexing.
    pub key: Option<String>,
    /// Request flags ([`FLAG_ALLOW_GZIP`] is currently the only one defined).
    pub flags: u32,
}

impl DataSpec {
    /// A spec covering the whole resource at `uri`.
    pub fn new(uri: Url) -> DataSpec {
        DataSpec {
            uri,
            post_body: None,
            absolute_stream_position: 0,
            position: 0,
            length: LENGTH_UNBOUNDED,
            key: None,
            flags: 0,
        }
    }

    pub fn with_range(uri: Url, position: i64, length: i64, key: Option<String>) -> DataSpec {
        DataSpec {
            uri,
            post_body: None,
            absolute_stream_position: position,
            position,
            length,
            key,
            flags: 0,
        }
    }

    pub fn from_ranged_uri(ranged: &RangedUri, key: Option<String>) -> DataSpec {
        DataSpec::with_range(ranged.url.clone(), ranged.start, ranged.length, key)
    }

    /// The spec describing the data that remains after `bytes_loaded` bytes of this spec have
    /// already been loaded, used to resume an interrupted load without re-fetching.
    pub fn remainder(&self, bytes_loaded: i64) -> DataSpec {
        if bytes_loaded == 0 {
            return self.clone();
        }
        DataSpec {
            uri: self.uri.clone(),
            post_body: self.post_body.clone(),
            absolute_stream_position: self.absolute_stream_position + bytes_loaded,
            position: self.position + bytes_loaded,
            length: if self.length == LENGTH_UNBOUNDED {
                LENGTH_UNBOUNDED
            } else {
                self.length - bytes_loaded
            },
            key: self.key.clone(),
            flags: self.flags,
        }
    }
}
