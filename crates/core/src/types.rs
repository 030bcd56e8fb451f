/// Upload rows and sessions are keyed by the server's integer primary keys.
pub type DbId = i64;

/// All timestamps received from the server are UTC.
pub type Timestamp = chrono::DateTime<chrono::Utc>;
