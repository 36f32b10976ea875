//! Session lifecycle: login, logout and password management

use crate::api_client::{ApiClient, ApiRequest};
use crate::error::Result;
use crate::types::{
    ChangePasswordRequest, Empty, LoginRequest, LoginResponse, MessageResponse, ResetPasswordRequest,
    CHANGE_PASSWORD_PATH, LOGIN_PATH, RESET_PASSWORD_PATH,
};
use tracing::{debug, info};

/// Authentication endpoints, borrowed from an [`ApiClient`]
#[derive(Debug, Clone, Copy)]
pub struct AuthApi<'a> {
    client: &'a ApiClient,
}

impl ApiClient {
    pub fn auth(&self) -> AuthApi<'_> {
        AuthApi { client: self }
    }
}

impl AuthApi<'_> {
    /// Log in and persist the returned token pair
    ///
    /// No refresh is attempted: a 401 here means bad credentials, not an
    /// expired session.
    pub async fn login(&self, email: &str, password: &str) -> Result<LoginResponse> {
        let request = ApiRequest::post(LOGIN_PATH)
            .json(&LoginRequest { email, password })?
            .without_refresh();

        let response: LoginResponse = self.client.request(request).await?;
        self.client
            .session()
            .store_tokens(&response.access_token, &response.refresh_token)?;

        info!(employee_id = response.user.employee_id, "Logged in");
        Ok(response)
    }

    /// Forget both tokens; purely local
    pub fn logout(&self) -> Result<()> {
        debug!("Logging out");
        self.client.session().clear()
    }

    /// Change the logged-in employee's password
    pub async fn change_password(&self, old_password: &str, new_password: &str) -> Result<MessageResponse> {
        self.client
            .post(
                CHANGE_PASSWORD_PATH,
                &ChangePasswordRequest {
                    old_password,
                    new_password,
                },
            )
            .await
    }

    /// Set a new password using the one-time code mailed to the employee
    pub async fn reset_password(&self, email: &str, otp: &str, new_password: &str) -> Result<Empty> {
        let request = ApiRequest::post(RESET_PASSWORD_PATH)
            .json(&ResetPasswordRequest {
                email,
                otp,
                new_password,
            })?
            .without_refresh();

        self.client.request(request).await
    }
}
