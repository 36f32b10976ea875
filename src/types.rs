//! Wire types exchanged with the portal backend

use serde::{Deserialize, Serialize};

pub const LOGIN_PATH: &str = "/employees/login";
pub const REFRESH_PATH: &str = "/employees/refresh";
pub const RESET_PASSWORD_PATH: &str = "/employees/reset-password";
pub const CHANGE_PASSWORD_PATH: &str = "/employees/change-password";

/// Error body convention of the backend: `{ "detail": ... }`
///
/// `detail` is usually a string, but validation failures carry a list.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct ErrorBody {
    #[serde(default)]
    pub detail: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize)]
pub(crate) struct LoginRequest<'a> {
    pub email: &'a str,
    pub password: &'a str,
}

#[derive(Debug, Clone, Serialize)]
pub(crate) struct RefreshRequest<'a> {
    pub refresh_token: &'a str,
}

/// The backend does not rotate refresh tokens, so only the access token comes back.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct RefreshResponse {
    #[serde(default)]
    pub access_token: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub(crate) struct ResetPasswordRequest<'a> {
    pub email: &'a str,
    pub otp: &'a str,
    pub new_password: &'a str,
}

#[derive(Debug, Clone, Serialize)]
pub(crate) struct ChangePasswordRequest<'a> {
    pub old_password: &'a str,
    pub new_password: &'a str,
}

/// Successful login: both tokens plus the employee profile
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoginResponse {
    pub access_token: String,
    pub refresh_token: String,
    pub user: Employee,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageResponse {
    pub message: String,
}

/// Body-less acknowledgement; accepts `{}` or any object and ignores its fields.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Empty {}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Employee {
    pub employee_id: i64,
    pub employee_name: String,
    pub email: String,
    pub dob: String,
    pub address: String,
    pub phone_no: String,
    pub id_type: String,
    pub id_number: String,
    #[serde(default)]
    pub designation_id: Option<i64>,
    #[serde(default)]
    pub year_joined: Option<String>,
    pub salary: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub task_id: i64,
    pub project_id: i64,
    pub task_name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub assigned_to: Option<String>,
    #[serde(default)]
    pub start_date: Option<String>,
    #[serde(default)]
    pub deadline: Option<String>,
    #[serde(default)]
    pub iscompleted: Option<bool>,
    pub status: String,
    pub priority: String,
    #[serde(default)]
    pub created: Option<String>,
}

impl Task {
    pub fn is_completed(&self) -> bool {
        self.iscompleted.unwrap_or(false)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Project {
    pub project_id: i64,
    pub name: String,
    pub client_name: String,
    pub address: String,
    pub start_date: String,
    #[serde(default)]
    pub completion_date: Option<String>,
}

/// Project fields for creation; the backend assigns the id
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewProject {
    pub name: String,
    pub client_name: String,
    pub address: String,
    pub start_date: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completion_date: Option<String>,
}

/// Partial project update; unset fields are left out of the request body
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_date: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completion_date: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttendanceStatus {
    Present,
    Absent,
    Late,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attendance {
    pub id: i64,
    pub employee_id: i64,
    pub date: String,
    pub attendance: AttendanceStatus,
    #[serde(default)]
    pub checkin: Option<String>,
    pub created_at: String,
}
