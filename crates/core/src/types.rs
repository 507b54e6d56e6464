/// All timestamps are UTC.
pub type Timestamp = chrono::DateTime<chrono::Utc>;

/// Queue-assigned job identifier. Equal to the derived job key.
pub type JobId = String;
