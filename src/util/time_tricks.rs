use std::time::SystemTime;
use std::time::{Duration, Instant};

use once_cell::sync::Lazy;

pub(crate) fn not_happening() -> Instant {
    const YEARS_100: Duration = Duration::from_secs(60 * 60 * 24 * 365 * 100);
    static FUTURE: Lazy<Instant> = Lazy::new(|| Instant::now() + YEARS_100);
    *FUTURE
}

// A frozen pair of Instant and SystemTime for the same moment. Instant can't
// represent the unix epoch, so wallclock values are derived relative to this.
static BEGINNING_OF_TIME: Lazy<(Instant, SystemTime)> = Lazy::new(|| {
    let now = Instant::now();
    let now_sys = SystemTime::now();

    // Up to an hour back, less if the machine uptime is shorter.
    let mut secs = 3600;
    let beginning_of_time = loop {
        if let Some(v) = now.checked_sub(Duration::from_secs(secs)) {
            break v;
        }
        if secs == 0 {
            break now;
        }
        secs -= 1;
    };

    let since_beginning_of_time = now - beginning_of_time;

    (beginning_of_time, now_sys - since_beginning_of_time)
});

pub(crate) fn already_happened() -> Instant {
    BEGINNING_OF_TIME.0
}

pub trait InstantExt {
    /// Convert an Instant to a Duration for unix time.
    fn to_unix_duration(&self) -> Duration;
}

impl InstantExt for Instant {
    fn to_unix_duration(&self) -> Duration {
        if *self < BEGINNING_OF_TIME.0 {
            warn!("Time went backwards from beginning_of_time Instant");
        }

        let duration_since_time_0 = self.saturating_duration_since(BEGINNING_OF_TIME.0);
        let system_time = BEGINNING_OF_TIME.1 + duration_since_time_0;

        system_time
            .duration_since(SystemTime::UNIX_EPOCH)
            .unwrap_or(Duration::ZERO)
    }
}
