use chrono::{DateTime, SubsecRound, Utc};

/// Timestamps shared by groups and entries. Stored with one second
/// precision, which is all the file formats keep.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Times {
    pub creation: DateTime<Utc>,
    pub last_modification: DateTime<Utc>,
    pub last_access: DateTime<Utc>,
    pub expiry: DateTime<Utc>,
    pub expires: bool,
    pub usage_count: u64,
    pub location_changed: DateTime<Utc>,
}

impl Times {
    pub fn now() -> Self {
        let now = now();
        Self {
            creation: now,
            last_modification: now,
            last_access: now,
            expiry: now,
            expires: false,
            usage_count: 0,
            location_changed: now,
        }
    }

    /// Record a modification (which is also an access).
    pub fn touch(&mut self) {
        let now = now();
        self.last_modification = now;
        self.last_access = now;
    }

    pub fn is_expired(&self) -> bool {
        self.expires && self.expiry <= Utc::now()
    }
}

impl Default for Times {
    fn default() -> Self {
        Self::now()
    }
}

/// Current time truncated to whole seconds.
pub fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn new_times_have_no_fractional_seconds() {
        let t = Times::now();
        assert_eq!(t.creation.timestamp_subsec_nanos(), 0);
        assert!(!t.expires);
    }

    #[test]
    fn expiry_requires_flag() {
        let mut t = Times::now();
        t.expiry = Utc::now() - Duration::days(1);
        assert!(!t.is_expired());
        t.expires = true;
        assert!(t.is_expired());
    }
}
