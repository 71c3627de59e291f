/// Opaque correlation token issued by the server at upload time.
pub type TrackingId = String;

/// All timestamps are UTC.
pub type Timestamp = chrono::DateTime<chrono::Utc>;
