//! Types for HTTP requests and responses

use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct CastVoteBody {
    pub voter_id: i64,
    pub option_id: i64,
    /// Registry-supplied uniqueness seed salting the content hash.
    pub voter_seed: String,
    /// Wait for the ledger outcome instead of returning the pending vote.
    #[serde(default)]
    pub synchronous: bool,
}
