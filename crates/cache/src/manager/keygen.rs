//! Cache keys for the catalog's own operations

use crate::keys::{derive_key, KeyParams};
use serde_json::Value;

/// Operation name for query result keys
pub const QUERY_OPERATION: &str = "query";

/// Operation name for column profile keys
pub const PROFILE_OPERATION: &str = "profiling";

/// Key for a query and its bind parameters
///
/// Leading and trailing whitespace in the query text is ignored, and a
/// missing parameter list is the same as an empty one.
pub fn query_key(query: &str, params: Option<&[Value]>) -> String {
    let params = KeyParams::new()
        .arg("query", query.trim())
        .arg("params", params.unwrap_or_default());
    derive_key(QUERY_OPERATION, &params)
}

/// Key for the profile of one column
pub fn profile_key(table: &str, column: &str) -> String {
    let params = KeyParams::new().arg("table", table).arg("column", column);
    derive_key(PROFILE_OPERATION, &params)
}
