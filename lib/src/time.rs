use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Milliseconds since the Unix epoch. Tokens that never expire carry the
/// [`NEVER_EXPIRES`] sentinel instead of a real timestamp.
#[derive(
    Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, ToSchema,
)]
#[serde(transparent)]
pub struct AbsoluteTime(pub i64);

pub const NEVER_EXPIRES: AbsoluteTime = AbsoluteTime(-1);

impl AbsoluteTime {
    pub fn now() -> Self {
        Self::from_datetime(Utc::now())
    }

    pub fn from_datetime(when: DateTime<Utc>) -> Self {
        Self(when.timestamp_millis())
    }

    pub fn to_datetime(self) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(self.0).unwrap_or(DateTime::<Utc>::MIN_UTC)
    }

    pub fn millis(self) -> i64 {
        self.0
    }
}

impl std::fmt::Display for AbsoluteTime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if *self == NEVER_EXPIRES {
            write!(f, "never")
        } else {
            write!(f, "{}", self.to_datetime().to_rfc3339())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn datetime_round_trip() {
        let now = Utc::now();
        let at = AbsoluteTime::from_datetime(now);
        assert_eq!(at.to_datetime().timestamp_millis(), now.timestamp_millis());
    }

    #[test]
    fn never_expires_displays_as_never() {
        assert_eq!(NEVER_EXPIRES.to_string(), "never");
        assert!(NEVER_EXPIRES < AbsoluteTime(0));
    }
}
