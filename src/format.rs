//! High-level descriptions of the encoded streams a presentation offers.

/// Defines the high level format of one representation of a media stream, as advertised by the
/// manifest. Two formats compare equal when their ids are equal; the remaining attributes are
/// descriptive only.
#[derive(Debug, Clone)]
pub struct Format {
    /// An identifier for the format, unique within its adaptation set.
    pub id: String,
    /// The mime type of the format.
    pub mime_type: String,
    /// An RFC6381 codecs string, or empty if unknown.
    pub codecs: String,
    /// The width of the video in pixels, or -1 if unknown or not applicable.
    pub width: i32,
    /// The height of the video in pixels, or -1 if unknown or not applicable.
    pub height: i32,
    /// The video frame rate in frames per second, or -1 if unknown or not applicable.
    pub frame_rate: f64,
    /// The maximum playout rate as a multiple of the regular playout rate.
    pub max_playout_rate: i32,
    /// The number of audio channels, or -1 if unknown or not applicable.
    pub audio_channels: i32,
    /// The audio sampling rate in Hz, or -1 if unknown or not applicable.
    pub audio_sampling_rate: i32,
    /// The declared average bandwidth in bits per second.
    pub bitrate: i64,
    /// An ISO 639-1 language code, or empty if unknown.
    pub language: String,
}

impl Default for Format {
    fn default() -> Format {
        Format {
            id: String::new(),
            mime_type: String::new(),
            codecs: String::new(),
            width: -1,
            height: -1,
            frame_rate: -1.0,
            max_playout_rate: 1,
            audio_channels: -1,
            audio_sampling_rate: -1,
            bitrate: -1,
            language: String::new(),
        }
    }
}

impl PartialEq for Format {
    // Equality is based on id only. Formats are selected out of a single adaptation set, where
    // ids are unique; comparing the full attribute list would make every evaluation tick pay for
    // string comparisons that can never change the answer.
    fn eq(&self, other: &Format) -> bool {
        self.id == other.id
    }
}

impl Eq for Format {}

/// The format of elementary media handed to a decoder: the selected [`Format`] plus whatever
/// initialization data was extracted from the representation's init segment.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MediaFormat {
    /// Identifier of the track this format belongs to.
    pub track_id: String,
    pub mime_type: String,
    pub width: i32,
    pub height: i32,
    pub channel_count: i32,
    pub sample_rate: i32,
    pub bitrate: i64,
    /// The duration of the stream in microseconds, or [`crate::UNKNOWN_TIME_US`].
    pub duration_us: i64,
    /// Codec initialization blobs, in the order the decoder expects them.
    pub initialization_data: Vec<Vec<u8>>,
}

impl MediaFormat {
    /// Derives a media format from a manifest-level format description.
    pub fn from_format(format: &Format, duration_us: i64) -> MediaFormat {
        MediaFormat {
            track_id: format.id.clone(),
            mime_type: format.mime_type.clone(),
            width: format.width,
            height: format.height,
            channel_count: format.audio_channels,
            sample_rate: format.audio_sampling_rate,
            bitrate: format.bitrate,
            duration_us,
            initialization_data: Vec::new(),
        }
    }
}
