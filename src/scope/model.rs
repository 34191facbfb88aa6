use std::fmt;
use std::str::FromStr;

use chrono::NaiveDateTime;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::{AppError, AppResult};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TenantStatus {
    #[default]
    Active,
    Inactive,
    Suspended,
    /// Onboarding not finished yet.
    Pending,
}

impl TenantStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            TenantStatus::Active => "ACTIVE",
            TenantStatus::Inactive => "INACTIVE",
            TenantStatus::Suspended => "SUSPENDED",
            TenantStatus::Pending => "PENDING",
        }
    }
}

impl fmt::Display for TenantStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

impl FromStr for TenantStatus {
    type Err = AppError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "ACTIVE" => Ok(TenantStatus::Active),
            "INACTIVE" => Ok(TenantStatus::Inactive),
            "SUSPENDED" => Ok(TenantStatus::Suspended),
            "PENDING" => Ok(TenantStatus::Pending),
            other => Err(AppError::validation("invalid_status", format!("unknown tenant status '{}'", other))),
        }
    }
}

/// A customer organisation ("client" on the wire).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tenant {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(rename = "status", default)]
    pub lifecycle_status: TenantStatus,
    #[serde(default, deserialize_with = "lenient_timestamp")]
    pub created_at: Option<NaiveDateTime>,
    #[serde(default, deserialize_with = "lenient_timestamp")]
    pub updated_at: Option<NaiveDateTime>,
}

/// A data interface definition ("interface" on the wire); always owned by one tenant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataContract {
    pub id: i64,
    /// Zero when the server omitted it; the loader fills in the requested tenant.
    #[serde(rename = "clientId", default)]
    pub tenant_id: i64,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(rename = "type", default)]
    pub contract_type: String,
    #[serde(default)]
    pub root_element: String,
    #[serde(default)]
    pub namespace: Option<String>,
    #[serde(rename = "schemaPath", default)]
    pub schema_location: Option<String>,
    #[serde(default)]
    pub is_active: bool,
    #[serde(default)]
    pub priority: i32,
}

/// Timestamps arrive either as local date-times or RFC 3339 instants; anything
/// else is dropped instead of failing the whole listing.
fn lenient_timestamp<'de, D>(de: D) -> Result<Option<NaiveDateTime>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(de)?;
    Ok(raw.and_then(|s| {
        let s = s.trim();
        NaiveDateTime::from_str(s)
            .ok()
            .or_else(|| chrono::DateTime::parse_from_rfc3339(s).ok().map(|d| d.naive_utc()))
    }))
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TenantPage {
    #[serde(default)]
    pub content: Vec<Tenant>,
    #[serde(default)]
    pub total_elements: u64,
    #[serde(default)]
    pub total_pages: u32,
    #[serde(default, alias = "number")]
    pub page: u32,
    #[serde(default)]
    pub size: u32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

impl SortDirection {
    pub fn as_str(self) -> &'static str {
        match self {
            SortDirection::Asc => "asc",
            SortDirection::Desc => "desc",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TenantQuery {
    pub page: u32,
    pub size: u32,
    pub sort_field: String,
    pub sort_direction: SortDirection,
    pub name_filter: Option<String>,
    pub status_filter: Option<TenantStatus>,
}

impl Default for TenantQuery {
    fn default() -> Self {
        Self {
            page: 0,
            size: 10,
            sort_field: "name".to_string(),
            sort_direction: SortDirection::Asc,
            name_filter: None,
            status_filter: None,
        }
    }
}

impl TenantQuery {
    pub fn page(page: u32, size: u32) -> Self {
        Self { page, size, ..Self::default() }
    }

    pub fn sorted_by<S: Into<String>>(mut self, field: S, direction: SortDirection) -> Self {
        self.sort_field = field.into();
        self.sort_direction = direction;
        self
    }

    pub fn with_name_filter<S: Into<String>>(mut self, filter: S) -> Self {
        let f = filter.into();
        self.name_filter = if f.trim().is_empty() { None } else { Some(f) };
        self
    }

    pub fn with_status_filter(mut self, status: Option<TenantStatus>) -> Self {
        self.status_filter = status;
        self
    }

    pub fn is_filtered(&self) -> bool { self.name_filter.is_some() || self.status_filter.is_some() }

    /// Query-string pairs in the order the listing endpoint documents them.
    pub fn to_params(&self) -> Vec<(String, String)> {
        let mut out = vec![
            ("page".to_string(), self.page.to_string()),
            ("size".to_string(), self.size.to_string()),
            ("sort".to_string(), format!("{},{}", self.sort_field, self.sort_direction.as_str())),
            ("direction".to_string(), self.sort_direction.as_str().to_string()),
        ];
        if let Some(n) = &self.name_filter {
            out.push(("nameFilter".to_string(), n.clone()));
        }
        if let Some(s) = self.status_filter {
            out.push(("statusFilter".to_string(), s.as_str().to_string()));
        }
        out
    }
}

static TENANT_CODE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Z0-9_-]+$").expect("static regex"));

/// Payload for creating or updating a tenant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TenantInput {
    pub name: String,
    pub code: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<TenantStatus>,
}

impl TenantInput {
    pub fn new<N: Into<String>, C: Into<String>>(name: N, code: C) -> Self {
        Self { name: name.into(), code: code.into(), description: None, status: None }
    }

    pub fn validate(&self) -> AppResult<()> {
        let mut details = Vec::new();
        if self.name.trim().is_empty() {
            details.push("name: must not be blank".to_string());
        }
        if !TENANT_CODE.is_match(&self.code) {
            details.push("code: uppercase letters, digits, '-' and '_' only".to_string());
        }
        if details.is_empty() {
            return Ok(());
        }
        Err(AppError::Validation {
            code: "invalid_tenant".into(),
            message: "Tenant input is invalid.".into(),
            details,
        })
    }
}

/// Currently selected tenant and data contract.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Scope {
    pub tenant: Option<Tenant>,
    pub data_contract: Option<DataContract>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ScopePhase {
    #[default]
    Uninitialized,
    LoadingTenants,
    Ready,
}

/// Contract loading state of the selected tenant; back to `None` on every tenant change.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ContractPhase {
    #[default]
    None,
    Loading,
    Ready,
}

/// Snapshot of the cached tenant page for display.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TenantListView {
    pub tenants: Vec<Tenant>,
    pub total_elements: u64,
    pub total_pages: u32,
    pub page: u32,
    pub size: u32,
    pub loading: bool,
    /// Last retryable failure, shown alongside the last good listing.
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadOutcome {
    Applied,
    /// A newer load was issued before this one finished; nothing was changed.
    Superseded,
}
