use super::SessionManager;
use crate::{
    backend::{ApiRequest, ApiResponse, Transport},
    error::SessionError,
};
use tracing::{debug, instrument};

/// Decorates a `Transport` with credential injection and a single replay
/// after renewal when the backend reports the credential expired.
#[derive(Clone)]
pub struct AuthenticatedClient<T> {
    session: SessionManager,
    transport: T,
}

impl<T: Transport> AuthenticatedClient<T> {
    #[must_use]
    pub fn new(session: SessionManager, transport: T) -> Self {
        Self { session, transport }
    }

    #[must_use]
    pub fn session(&self) -> &SessionManager {
        &self.session
    }

    /// Send a protected request.
    ///
    /// A request without an `Authorization` header gets the current access
    /// credential. On a 401 the session is renewed once and the request is
    /// replayed with the new credential; whatever the replay returns, a second
    /// 401 included, is handed back unchanged.
    ///
    /// # Errors
    /// `NetworkFailure` when no response could be obtained, or the renewal
    /// failure (the session is then destroyed).
    #[instrument(skip_all, fields(method = %request.method, path = %request.path))]
    pub async fn send(&self, mut request: ApiRequest) -> Result<ApiResponse, SessionError> {
        if !request.has_authorization() {
            if let Some(token) = self.session.current_access_token() {
                request.set_bearer(&token);
            }
        }

        let response = self.dispatch(&request).await?;

        if !response.is_auth_expired() || request.is_retry() {
            return Ok(response);
        }

        if !self.session.has_renewal_credential() {
            debug!("credential refused and nothing to renew with");
            return Ok(response);
        }

        debug!("credential refused, renewing and replaying once");
        let access = self.session.renew().await?;

        request.retried = true;
        request.set_bearer(&access.token);

        self.dispatch(&request).await
    }

    async fn dispatch(&self, request: &ApiRequest) -> Result<ApiResponse, SessionError> {
        self.transport
            .send(request)
            .await
            .map_err(|err| SessionError::NetworkFailure(err.to_string()))
    }
}
