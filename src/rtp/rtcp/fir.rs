use super::Ssrc;

/// Full Intra Request (FIR).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fir {
    /// The entry needing a full codec restart.
    pub entry: FirEntry,
}

/// Entry reported needing a codec restart.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FirEntry {
    /// The SSRC needing a full codec restart.
    pub ssrc: Ssrc,
    /// Counter keeping track of which restart request this is.
    pub seq_no: u8,
}
