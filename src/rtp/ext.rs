use serde::Serialize;

use super::Rid;

/// Values in an RTP header extension.
///
/// These are the values the producer cares about. The mapping from extension
/// id to type is done by the wire parser.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtensionValues {
    /// Tell a receiver what rotation a video need to replay correctly.
    pub video_orientation: Option<VideoOrientation>,

    /// <urn:ietf:params:rtp-hdrext:sdes:rtp-stream-id>
    ///
    /// Simulcast layer label of a primary stream.
    pub rid: Option<Rid>,

    /// <urn:ietf:params:rtp-hdrext:sdes:repaired-rtp-stream-id>
    ///
    /// Simulcast layer label of the stream an RTX stream repairs.
    pub rid_repair: Option<Rid>,
}

/// Coordination of video orientation, `urn:3gpp:video-orientation`.
///
/// ```text
///   0 1 2 3 4 5 6 7
///  +-+-+-+-+-+-+-+-+
///  |0 0 0 0 C F R R|
///  +-+-+-+-+-+-+-+-+
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoOrientation {
    /// Whether the video comes from the back-facing camera.
    pub camera: bool,
    /// Whether the video is horizontally flipped.
    pub flip: bool,
    /// Clockwise rotation in degrees. One of 0, 90, 180, 270.
    pub rotation: u16,
}

/// Parse from the one-byte CVO extension value.
impl From<u8> for VideoOrientation {
    fn from(byte: u8) -> Self {
        let rotation = match byte & 0b11 {
            0 => 0,
            1 => 90,
            2 => 180,
            _ => 270,
        };

        VideoOrientation {
            camera: byte & 0b1000 > 0,
            flip: byte & 0b0100 > 0,
            rotation,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn cvo_parse() {
        let v = VideoOrientation::from(0b0000_1101);
        assert!(v.camera);
        assert!(v.flip);
        assert_eq!(v.rotation, 90);

        let v = VideoOrientation::from(0b0000_0011);
        assert!(!v.camera);
        assert!(!v.flip);
        assert_eq!(v.rotation, 270);
    }
}
