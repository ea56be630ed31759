use std::time::Instant;

mod time_tricks;
pub(crate) use time_tricks::{already_happened, not_happening, InstantExt};

pub(crate) trait Soonest {
    fn soonest(self, other: Self) -> Self;
}

impl Soonest for Option<Instant> {
    fn soonest(self, other: Self) -> Self {
        match (self, other) {
            (Some(v1), Some(v2)) => Some(v1.min(v2)),
            (None, v) => v,
            (v, None) => v,
        }
    }
}
