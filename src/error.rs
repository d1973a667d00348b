//! Crate-wide error type and fatal-assertion helpers.

use std::fmt;

/// Flat, wire-stable error taxonomy shared with the RPC response
/// `error_code` field. `Ok` is never actually constructed as an error; it
/// exists only so [`ClusterErrorKind::to_wire_code`] can express the
/// `0 == success` convention in one place.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClusterErrorKind {
    Ok,
    ErrorInit,
    InvalidNodeRole,
    DuplicateNode,
    NotExistNode,
    NodeInfoUpdated,
    InvalidNodeStatus,
    NotSupport,
    UnexpectedError,
}

impl ClusterErrorKind {
    /// Maps to the stable non-zero integer space used on the wire.
    pub fn to_wire_code(self) -> i64 {
        match self {
            Self::Ok => 0,
            Self::ErrorInit => 1,
            Self::InvalidNodeRole => 2,
            Self::DuplicateNode => 3,
            Self::NotExistNode => 4,
            Self::NodeInfoUpdated => 5,
            Self::InvalidNodeStatus => 6,
            Self::NotSupport => 7,
            Self::UnexpectedError => 8,
        }
    }
}

/// The error type returned by all fallible `walmesh` operations.
#[derive(Debug, Clone)]
pub struct ClusterError {
    pub kind: ClusterErrorKind,
    pub message: String,
}

impl ClusterError {
    pub fn new(kind: ClusterErrorKind, message: impl Into<String>) -> Self {
        ClusterError {
            kind,
            message: message.into(),
        }
    }

    pub fn init(message: impl Into<String>) -> Self {
        Self::new(ClusterErrorKind::ErrorInit, message)
    }

    pub fn invalid_role(message: impl Into<String>) -> Self {
        Self::new(ClusterErrorKind::InvalidNodeRole, message)
    }

    pub fn duplicate_node(name: impl Into<String>) -> Self {
        let name = name.into();
        Self::new(
            ClusterErrorKind::DuplicateNode,
            format!("duplicate node: {name}"),
        )
    }

    pub fn not_exist_node(name: impl Into<String>) -> Self {
        let name = name.into();
        Self::new(
            ClusterErrorKind::NotExistNode,
            format!("node does not exist: {name}"),
        )
    }

    pub fn node_info_updated(name: impl Into<String>) -> Self {
        let name = name.into();
        Self::new(
            ClusterErrorKind::NodeInfoUpdated,
            format!("node info changed: {name}"),
        )
    }

    pub fn invalid_status(message: impl Into<String>) -> Self {
        Self::new(ClusterErrorKind::InvalidNodeStatus, message)
    }

    pub fn not_support(message: impl Into<String>) -> Self {
        Self::new(ClusterErrorKind::NotSupport, message)
    }

    pub fn unexpected(message: impl Into<String>) -> Self {
        Self::new(ClusterErrorKind::UnexpectedError, message)
    }

    /// Generic constructor used by the `logged_err!` macro and by
    /// transport/collaborator adapters that don't map cleanly onto one of
    /// the named kinds above.
    pub fn msg(message: impl Into<String>) -> Self {
        Self::new(ClusterErrorKind::UnexpectedError, message)
    }
}

impl fmt::Display for ClusterError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}

impl std::error::Error for ClusterError {}

/// Logs at error level and returns a boxed `Err(ClusterError)` expression;
/// meant to be used as `return logged_err!("...", args);`.
#[macro_export]
macro_rules! logged_err {
    ($($arg:tt)*) => {{
        let msg = format!($($arg)*);
        $crate::pf_error!("{}", msg);
        Err($crate::error::ClusterError::msg(msg))
    }};
}

/// Logs at error level and panics; the async equivalent of the original
/// system's process-terminating `UnrecoverableError`. Reserved for
/// programming-error invariant violations, never for expected failure
/// conditions.
#[macro_export]
macro_rules! fail_fast {
    ($($arg:tt)*) => {{
        let msg = format!($($arg)*);
        $crate::pf_error!("fatal: {}", msg);
        panic!("{}", msg);
    }};
}
