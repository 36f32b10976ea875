//! Portal session example
//!
//! Usage:
//!   PORTAL_EMAIL=jane@example.com PORTAL_PASSWORD=... cargo run --example portal_session

use clap::Parser;
use portal_client::{ApiClient, ClientConfig, ErrorKind, FileStore, Session};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(about = "Log in to the employee portal and show today's work")]
struct Args {
    /// Backend origin every API path is appended to
    #[arg(long, env = "PORTAL_BACKEND_URL", default_value = portal_client::config::DEFAULT_BACKEND_URL)]
    backend_url: String,

    /// File the session tokens are persisted in
    #[arg(long, env = "PORTAL_SESSION_FILE", default_value = "portal-session.json")]
    session_file: PathBuf,

    #[arg(long, env = "PORTAL_EMAIL")]
    email: Option<String>,

    #[arg(long, env = "PORTAL_PASSWORD")]
    password: Option<String>,

    /// Clear the stored session and exit
    #[arg(long)]
    logout: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let args = Args::parse();

    let store = FileStore::open(&args.session_file)?;
    let client = ApiClient::new(ClientConfig::new(args.backend_url), Session::new(Arc::new(store)))?;

    if args.logout {
        client.auth().logout()?;
        client.session().forget_profile()?;
        println!("Logged out");
        return Ok(());
    }

    let employee = match client.session().cached_profile() {
        Some(employee) if client.session().is_authenticated() => employee,
        _ => {
            let (Some(email), Some(password)) = (args.email.as_deref(), args.password.as_deref()) else {
                anyhow::bail!("No stored session; pass --email and --password to log in");
            };
            let login = client.auth().login(email, password).await?;
            client.session().cache_profile(&login.user)?;
            login.user
        }
    };

    println!("=== {} <{}> ===", employee.employee_name, employee.email);

    match client.tasks().for_employee(&employee.employee_name).await {
        Ok(tasks) => {
            println!("Tasks:");
            for task in tasks {
                let mark = if task.is_completed() { "x" } else { " " };
                println!("  [{mark}] #{} {} ({})", task.task_id, task.task_name, task.priority);
            }
        }
        Err(e) if e.kind() == ErrorKind::AuthExpired => {
            client.session().forget_profile()?;
            anyhow::bail!("Session expired, log in again: {e}");
        }
        Err(e) => return Err(e.into()),
    }

    let attendance = client.attendance().for_employee(employee.employee_id).await?;
    println!("Attendance records: {}", attendance.len());
    if let Some(latest) = attendance.last() {
        println!("  latest: {} {:?}", latest.date, latest.attendance);
    }

    Ok(())
}
