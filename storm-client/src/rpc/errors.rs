use super::connection::TransportError;
use super::pool::PoolError;

/// A coarse classification of a Storm-side failure, used by callers to
/// decide retry-vs-surface (spec.md §4.1: "advisory; callers use them to
/// decide"). Matching is against known Storm exception class names and a
/// handful of HTTP-ish status codes from the REST fallback client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    NotFound,
    ConnectionError,
    AuthError,
    AlreadyExists,
    Invalid,
    Unknown,
}

const NOT_FOUND_EXCEPTIONS: &[&str] = &["NotAliveException", "KeyNotFoundException"];
const AUTH_EXCEPTIONS: &[&str] = &["AuthorizationException", "AuthenticationException"];
const ALREADY_EXISTS_EXCEPTIONS: &[&str] = &["AlreadyAliveException"];
const INVALID_EXCEPTIONS: &[&str] = &["InvalidTopologyException", "IllegalStateException"];

pub fn classify(error: &PoolError) -> Classification {
    match error {
        PoolError::Exhausted(_) | PoolError::Connect(_) => Classification::ConnectionError,
        PoolError::RetriesExhausted(_, last) => classify_transport(last),
    }
}

fn classify_transport(error: &TransportError) -> Classification {
    match error {
        TransportError::ConnectionRefused(_) | TransportError::Closed | TransportError::Io(_) => {
            Classification::ConnectionError
        }
        TransportError::Malformed(_) => Classification::Unknown,
        TransportError::Remote { exception, .. } => {
            if NOT_FOUND_EXCEPTIONS.contains(&exception.as_str()) {
                Classification::NotFound
            } else if AUTH_EXCEPTIONS.contains(&exception.as_str()) {
                Classification::AuthError
            } else if ALREADY_EXISTS_EXCEPTIONS.contains(&exception.as_str()) {
                Classification::AlreadyExists
            } else if INVALID_EXCEPTIONS.contains(&exception.as_str()) {
                Classification::Invalid
            } else {
                Classification::Unknown
            }
        }
    }
}

pub fn is_not_found(error: &PoolError) -> bool {
    classify(error) == Classification::NotFound
}

pub fn is_connection_error(error: &PoolError) -> bool {
    classify(error) == Classification::ConnectionError
}

pub fn is_auth_error(error: &PoolError) -> bool {
    classify(error) == Classification::AuthError
}

pub fn is_already_exists(error: &PoolError) -> bool {
    classify(error) == Classification::AlreadyExists
}

pub fn is_invalid(error: &PoolError) -> bool {
    classify(error) == Classification::Invalid
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_already_alive_as_already_exists() {
        let err = PoolError::RetriesExhausted(
            3,
            TransportError::Remote {
                exception: "AlreadyAliveException".into(),
                message: "nope".into(),
            },
        );
        assert!(is_already_exists(&err));
        assert!(!is_not_found(&err));
    }

    #[test]
    fn classifies_connection_refused_as_connection_error() {
        let err = PoolError::Connect(TransportError::ConnectionRefused("refused".into()));
        assert!(is_connection_error(&err));
    }
}
