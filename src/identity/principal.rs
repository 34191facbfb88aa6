use serde::{Deserialize, Serialize};

/// Who is signed in. Derived from the access token claims or a validation round
/// trip, never stored on its own.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Identity {
    pub subject_name: String,
    #[serde(default)]
    pub roles: Vec<String>,
}

impl Identity {
    pub fn new<S: Into<String>>(subject_name: S, roles: Vec<String>) -> Self {
        Self { subject_name: subject_name.into(), roles }
    }

    /// `ADMIN` and `ROLE_ADMIN` name the same role.
    pub fn has_role(&self, role: &str) -> bool {
        let want = strip_role_prefix(role);
        self.roles.iter().any(|r| strip_role_prefix(r).eq_ignore_ascii_case(want))
    }
}

fn strip_role_prefix(role: &str) -> &str {
    role.strip_prefix("ROLE_").unwrap_or(role)
}
