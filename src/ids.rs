use std::fmt;
use std::str::FromStr;
use std::time::SystemTime;

/// Identity of one call handle.
///
/// Assigned when a handle is constructed, including handles produced by
/// `clone_call`, and carried on every log event the call emits so a request can be
/// followed from invocation to callback delivery. Ordered by creation time.
#[derive(Clone, Copy, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub struct CallId(ulid::Ulid);

impl CallId {
    #[must_use]
    pub fn new() -> Self {
        Self(ulid::Ulid::new())
    }

    /// When the handle was created, at millisecond precision.
    #[must_use]
    pub fn created_at(&self) -> SystemTime {
        self.0.datetime()
    }
}

impl Default for CallId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CallId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// Parses the Crockford base32 form printed in log events.
impl FromStr for CallId {
    type Err = ulid::DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ulid::Ulid::from_string(s).map(Self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_logged_id_parses_back() {
        let id = CallId::new();
        let parsed: CallId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
        assert!("not-a-call".parse::<CallId>().is_err());
    }

    #[test]
    fn test_created_at_is_recent() {
        let id = CallId::new();
        let age = SystemTime::now()
            .duration_since(id.created_at())
            .unwrap_or_default();
        assert!(age < Duration::from_secs(5));
    }
}
