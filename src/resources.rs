//! Typed wrappers for the task, project and attendance endpoints

use crate::api_client::{ApiClient, ApiRequest};
use crate::error::Result;
use crate::types::{Attendance, NewProject, Project, ProjectUpdate, Task};
use urlencoding::encode;

#[derive(Debug, Clone, Copy)]
pub struct TasksApi<'a> {
    client: &'a ApiClient,
}

#[derive(Debug, Clone, Copy)]
pub struct ProjectsApi<'a> {
    client: &'a ApiClient,
}

#[derive(Debug, Clone, Copy)]
pub struct AttendanceApi<'a> {
    client: &'a ApiClient,
}

impl ApiClient {
    /// Task endpoints
    pub fn tasks(&self) -> TasksApi<'_> {
        TasksApi { client: self }
    }

    /// Project endpoints
    pub fn projects(&self) -> ProjectsApi<'_> {
        ProjectsApi { client: self }
    }

    /// Attendance endpoints
    pub fn attendance(&self) -> AttendanceApi<'_> {
        AttendanceApi { client: self }
    }
}

impl TasksApi<'_> {
    /// Tasks assigned to an employee, looked up by display name
    pub async fn for_employee(&self, employee_name: &str) -> Result<Vec<Task>> {
        self.client
            .get(&format!("/tasks/employee/{}", encode(employee_name)))
            .await
    }

    /// Set a task's completion flag on behalf of an employee
    pub async fn mark_complete(&self, task_id: i64, employee_name: &str, is_completed: bool) -> Result<Task> {
        let path = format!(
            "/tasks/{task_id}/complete?employee_name={}&is_completed={is_completed}",
            encode(employee_name)
        );
        self.client.request(ApiRequest::put(path)).await
    }
}

impl ProjectsApi<'_> {
    /// All projects visible to employees
    pub async fn list(&self) -> Result<Vec<Project>> {
        self.client.get("/projects/employee").await
    }

    /// Create a project
    pub async fn create(&self, project: &NewProject) -> Result<Project> {
        self.client.post("/projects/employee/create", project).await
    }

    /// Update the given fields of a project
    pub async fn update(&self, project_id: i64, changes: &ProjectUpdate) -> Result<Project> {
        self.client
            .put(&format!("/projects/employee/{project_id}"), changes)
            .await
    }
}

impl AttendanceApi<'_> {
    /// Record today's check-in for the employee
    pub async fn check_in(&self, employee_id: i64) -> Result<Attendance> {
        self.client
            .request(ApiRequest::post(format!("/attendance/checkin?employee_id={employee_id}")))
            .await
    }

    /// Attendance history of an employee
    pub async fn for_employee(&self, employee_id: i64) -> Result<Vec<Attendance>> {
        self.client
            .get(&format!("/attendance/employee/{employee_id}"))
            .await
    }
}
