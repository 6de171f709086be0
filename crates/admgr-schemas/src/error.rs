//! The closed error taxonomy shared by every admgr crate.
//!
//! The kind is deliberately a small closed enum: the HTTP layer owns the one
//! kind→status mapping table, and everything below it only ever decides the
//! kind and the message.

use thiserror::Error as ThisError;

/// Failure classification carried on every [`Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Client-side validation or body decode failure.
    DecodeFailure,
    /// Programmer or database errors not attributable to the caller.
    Internal,
    /// Primary-key collision on create.
    DuplicateResource,
    /// Lookup miss.
    ResourceNotFound,
    /// State-machine rule violation or conditional-update miss.
    ActionForbidden,
    /// A delete matched nothing.
    DetailedResourceInfoNotFound,
    /// Accounting service unreachable or non-200.
    DependentServiceRequestFailed,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::DecodeFailure => "DecodeFailure",
            ErrorKind::Internal => "Internal",
            ErrorKind::DuplicateResource => "DuplicateResource",
            ErrorKind::ResourceNotFound => "ResourceNotFound",
            ErrorKind::ActionForbidden => "ActionForbidden",
            ErrorKind::DetailedResourceInfoNotFound => "DetailedResourceInfoNotFound",
            ErrorKind::DependentServiceRequestFailed => "DependentServiceRequestFailed",
        }
    }
}

/// Typed error: a kind plus a user-visible message.
///
/// The message is what ends up in the HTTP `{"error": "<message>"}` body, so
/// layers constructing one should write it for the caller, not for the log.
#[derive(Debug, Clone, ThisError)]
#[error("{message}")]
pub struct Error {
    pub kind: ErrorKind,
    pub message: String,
}

impl Error {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn decode_failure(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::DecodeFailure, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, message)
    }

    pub fn duplicate_resource(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::DuplicateResource, message)
    }

    pub fn resource_not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ResourceNotFound, message)
    }

    pub fn action_forbidden(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ActionForbidden, message)
    }

    pub fn detailed_resource_info_not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::DetailedResourceInfoNotFound, message)
    }

    pub fn dependent_service_request_failed(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::DependentServiceRequestFailed, message)
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_is_the_bare_message() {
        let e = Error::action_forbidden("slot is not open");
        assert_eq!(e.to_string(), "slot is not open");
        assert_eq!(e.kind(), ErrorKind::ActionForbidden);
    }
}
