#![forbid(unsafe_code)]

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CacheEntryRow {
    pub id: i64,
    pub user_id: i64,
    pub key: String,
    pub value: String,
    pub version: i64,
    pub created_at_ms: i64,
    pub last_used_at_ms: Option<i64>,
}

#[derive(Clone, Debug)]
pub struct CachePutRequest {
    pub user_id: i64,
    pub key: String,
    pub value: String,
    /// Defaults to the configured cache schema version.
    pub version: Option<i64>,
}
