//! Send pacing — clock abstraction, randomized inter-send delay, hourly rate limit.

pub mod clock;
pub mod delay;
pub mod rate_limit;

pub use clock::{Clock, SystemClock};
pub use delay::InterSendDelay;
pub use rate_limit::HourlyRateLimiter;
