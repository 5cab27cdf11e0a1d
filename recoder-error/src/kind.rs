//! What went wrong

use std::fmt;
use std::str::FromStr;

macro_rules! error_kinds {
    ($($(#[$doc:meta])* $name:ident),* $(,)?) => {
        /// The kind of a fatal error. Match on it to decide what to tell the
        /// user; the name (`as_str`) is what `error` events carry.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        #[non_exhaustive]
        pub enum ErrorKind {
            $($(#[$doc])* $name,)*
        }

        impl ErrorKind {
            /// Every kind, in declaration order
            pub const ALL: &'static [ErrorKind] = &[$(ErrorKind::$name,)*];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $(ErrorKind::$name => stringify!($name),)*
                }
            }
        }
    };
}

error_kinds! {
    /// Catch-all for bugs and unhandled cases
    Unexpected,
    ConfigInvalid,
    InvalidArgument,

    /// The backend answered, but not usefully
    InferenceFailed,
    /// 5xx from the backend
    ProviderUnavailable,
    RateLimited,
    AuthenticationFailed,
    /// Model output did not fit the code solution schema
    MalformedSolution,

    /// Interpreter missing, or not speaking the harness protocol
    SandboxUnavailable,
    /// Generated code ran past the wall-clock limit
    ExecutionTimeout,

    /// The run's consumer gave up
    Cancelled,
    /// The generate/verify/route state machine reached an impossible state
    InvariantViolated,

    FileNotFound,
    PermissionDenied,
    IoFailed,
    NetworkFailed,

    ParseFailed,
    SerializationFailed,
}

impl ErrorKind {
    /// Transport-level trouble that may clear up on its own
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ErrorKind::InferenceFailed
                | ErrorKind::NetworkFailed
                | ErrorKind::RateLimited
                | ErrorKind::ProviderUnavailable
        )
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ErrorKind {
    type Err = UnknownErrorKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ErrorKind::ALL
            .iter()
            .copied()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| UnknownErrorKind(s.to_string()))
    }
}

/// Returned when parsing a name that is not an [`ErrorKind`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownErrorKind(pub String);

impl fmt::Display for UnknownErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown error kind '{}'", self.0)
    }
}

impl std::error::Error for UnknownErrorKind {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_names_parse_back() {
        for kind in ErrorKind::ALL {
            assert_eq!(kind.as_str().parse::<ErrorKind>(), Ok(*kind));
        }
        assert_eq!(ErrorKind::MalformedSolution.to_string(), "MalformedSolution");
        assert!("Timeout".parse::<ErrorKind>().is_err());
    }

    #[test]
    fn test_is_retryable() {
        assert!(ErrorKind::NetworkFailed.is_retryable());
        assert!(ErrorKind::RateLimited.is_retryable());
        assert!(!ErrorKind::MalformedSolution.is_retryable());
        assert!(!ErrorKind::ExecutionTimeout.is_retryable());
        assert!(!ErrorKind::InvariantViolated.is_retryable());
    }
}
