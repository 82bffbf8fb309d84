use std::collections::BTreeMap;

use rocket::serde::json::Value;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::model::{ballot::Selections, session::SessionToken};

/// Vote fields are named after their position, e.g. `headBoyVote`.
pub const VOTE_FIELD_SUFFIX: &str = "Vote";

/// Result of a successful verification.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckVoterResponse {
    pub success: bool,
    pub has_voted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_token: Option<String>,
    pub message: String,
}

impl CheckVoterResponse {
    pub fn verified(token: SessionToken) -> Self {
        Self {
            success: true,
            has_voted: false,
            session_token: Some(token.to_string()),
            message: "Verification successful, you may now vote".to_string(),
        }
    }
}

/// A ballot submission: the session token plus one `<position>Vote` field per
/// position. Absent, null, empty and `"none"` values all mean no choice.
#[derive(Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VoteRequest {
    pub session_token: String,
    #[serde(flatten)]
    pub fields: BTreeMap<String, Value>,
}

impl VoteRequest {
    /// Extract the per-position choices. Fields not ending in `Vote` are ignored.
    pub fn selections(&self) -> Result<Selections> {
        let mut selections = Selections::new();
        for (field, value) in &self.fields {
            let Some(position) = field.strip_suffix(VOTE_FIELD_SUFFIX) else {
                continue;
            };
            if position.is_empty() {
                continue;
            }
            match value {
                Value::String(candidate) => {
                    selections.insert(position, Some(candidate.as_str()))
                }
                Value::Null => selections.insert(position, None),
                _ => {
                    return Err(Error::bad_request(format!(
                        "`{field}` must be a candidate name"
                    )))
                }
            }
        }
        Ok(selections)
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct VoteResponse {
    pub success: bool,
    pub message: String,
}

impl VoteResponse {
    pub fn recorded() -> Self {
        Self {
            success: true,
            message: "Your vote has been recorded. Thank you for voting!".to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelRequest {
    pub session_token: String,
}

#[cfg(test)]
mod tests {
    use rocket::serde::json::{json, serde_json};

    use super::*;

    #[test]
    fn vote_fields_become_selections() {
        let request: VoteRequest = serde_json::from_value(json!({
            "sessionToken": "abc",
            "headBoyVote": "Alice",
            "headGirlVote": "",
            "sportsCaptainVote": null,
            "culturalSecretaryVote": "none",
            "comment": "ignored",
        }))
        .unwrap();
        assert_eq!(request.session_token, "abc");

        let selections = request.selections().unwrap();
        assert_eq!(
            selections.chosen().collect::<Vec<_>>(),
            vec![("headBoy", "Alice")]
        );
        assert_eq!(selections.recorded().len(), 4);
    }

    #[test]
    fn non_string_votes_are_rejected() {
        let request: VoteRequest = serde_json::from_value(json!({
            "sessionToken": "abc",
            "headBoyVote": 3,
        }))
        .unwrap();
        assert!(matches!(request.selections(), Err(Error::Status(_, _))));
    }
}
