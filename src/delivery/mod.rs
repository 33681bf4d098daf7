//! Delivery — the per-contact send loop and its results.

pub mod orchestrator;
pub mod outcome;

use chrono::{DateTime, Utc};

use crate::contacts::PhoneIdentity;

pub use orchestrator::{DeliverySettings, Orchestrator, RunSummary};
pub use outcome::{Outcome, SendAttemptResult};

/// `<identity>_<yyyymmddHHMMSS>` in UTC.
pub fn attempt_id(identity: &PhoneIdentity, at: DateTime<Utc>) -> String {
    format!("{identity}_{}", at.format("%Y%m%d%H%M%S"))
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;
    use crate::contacts::identity;

    #[test]
    fn attempt_id_is_identity_and_second_stamp() {
        let at = Utc.with_ymd_and_hms(2025, 3, 1, 9, 5, 7).unwrap();
        assert_eq!(attempt_id(&identity("51987654321"), at), "51987654321_20250301090507");
    }
}
