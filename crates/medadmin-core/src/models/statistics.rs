use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Aggregate numbers shown on the admin dashboard.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StatisticsSnapshot {
    pub total_users: u64,
    pub active_users: u64,
    pub inactive_users: u64,
    pub total_roles: u64,
    pub total_departments: u64,
    /// role name -> user count
    pub users_by_role: BTreeMap<String, u64>,
    /// department name -> user count
    pub users_by_department: BTreeMap<String, u64>,
}
