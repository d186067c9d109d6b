//! Command abstractions.

use uuid::Uuid;

/// Trait that all commands implement.
pub trait Command: Send + Sync + std::fmt::Debug {
    /// The type name for this command (for logging/routing).
    fn command_type(&self) -> &'static str;

    /// The stream the command targets.
    fn target_stream_id(&self) -> String;

    /// Version the caller last observed, if it wants the command rejected
    /// when the stream has moved on.
    fn expected_version(&self) -> Option<i64> {
        None
    }

    /// Correlation ID to trace this command through the system.
    fn correlation_id(&self) -> Uuid;
}
