use super::Ssrc;

/// Picture loss indicator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pli {
    /// The SSRC this picture loss indication is for.
    pub ssrc: Ssrc,
}
