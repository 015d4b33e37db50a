use serde::{Serialize, Serializer};
use time::format_description::well_known::Rfc3339;
use time::{OffsetDateTime, PrimitiveDateTime};

/// Release timestamp meaning "unknown".
pub const UNKNOWN_RELEASE: OffsetDateTime = PrimitiveDateTime::MIN.assume_utc();

/// Publisher and release data for one version.
///
/// Never absent: unavailable data is represented by [`AccountData::empty`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AccountData {
    pub maintainer_count: u64,
    pub maintainers: Vec<String>,
    /// Commit hash declared by the registry (`gitHead`), empty when unknown
    pub registry_commit: String,
    /// Commit hash of the matching tag in source history, empty when unknown
    pub history_commit: String,
    #[serde(serialize_with = "serialize_release")]
    pub release_timestamp: OffsetDateTime,
}

impl AccountData {
    pub fn empty() -> Self {
        Self {
            maintainer_count: 0,
            maintainers: Vec::new(),
            registry_commit: String::new(),
            history_commit: String::new(),
            release_timestamp: UNKNOWN_RELEASE,
        }
    }

    pub fn has_release_timestamp(&self) -> bool {
        self.release_timestamp != UNKNOWN_RELEASE
    }

    /// RFC 3339 release timestamp, `None` when unknown.
    pub fn release_rfc3339(&self) -> Option<String> {
        if !self.has_release_timestamp() {
            return None;
        }
        self.release_timestamp.format(&Rfc3339).ok()
    }
}

impl Default for AccountData {
    fn default() -> Self {
        Self::empty()
    }
}

fn serialize_release<S: Serializer>(ts: &OffsetDateTime, s: S) -> Result<S::Ok, S::Error> {
    let formatted = if *ts == UNKNOWN_RELEASE {
        None
    } else {
        ts.format(&Rfc3339).ok()
    };
    formatted.serialize(s)
}
