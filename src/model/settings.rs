use serde::{Deserialize, Serialize};

/// Administrator-controlled switches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    pub voting_enabled: bool,
}
