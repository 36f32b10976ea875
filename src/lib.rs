//! Employee Portal Rust Client
//!
//! A Rust client library for the employee portal REST backend, with bearer
//! authentication, persistent session storage and transparent access-token
//! refresh on 401.

pub mod api_client;
pub mod auth_client;
pub mod config;
pub mod error;
pub mod resources;
pub mod session;
pub mod token_store;
pub mod types;

pub use api_client::{ApiClient, ApiRequest};
pub use auth_client::AuthApi;
pub use config::ClientConfig;
pub use error::{ClientError, ErrorKind, Result};
pub use resources::{AttendanceApi, ProjectsApi, TasksApi};
pub use session::Session;
pub use token_store::{FileStore, KeyValueStore, MemoryStore};
pub use types::{
    Attendance, AttendanceStatus, Empty, Employee, LoginResponse, MessageResponse, NewProject, Project,
    ProjectUpdate, Task,
};
