/// Job identifiers are short opaque strings (8 hex characters).
pub type JobId = String;

/// All timestamps are UTC.
pub type Timestamp = chrono::DateTime<chrono::Utc>;
