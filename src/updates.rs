//! Consumes TDLib updates in delivery order and keeps the `Session` current.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};

use crate::session::{AuthRequirement, AuthState, Session};
use crate::td::types::{AuthorizationState, ConnectionState, TdlibParameters, Update};
use crate::td::{Gateway, GatewayError};

pub struct UpdateDispatcher {
    session: Arc<Session>,
    gateway: Arc<dyn Gateway>,
    parameters: TdlibParameters,
}

impl UpdateDispatcher {
    pub fn new(session: Arc<Session>, gateway: Arc<dyn Gateway>, parameters: TdlibParameters) -> Self {
        Self {
            session,
            gateway,
            parameters,
        }
    }

    /// Runs until the update channel closes, then closes the session.
    pub async fn run(self, mut updates: mpsc::UnboundedReceiver<Update>) {
        while let Some(update) = updates.recv().await {
            if let Err(err) = self.handle(update).await {
                warn!(error = %err, "failed to handle update");
            }
        }
        debug!("update stream ended");
        self.session.close();
    }

    pub async fn handle(&self, update: Update) -> Result<(), GatewayError> {
        match update {
            Update::UpdateAuthorizationState { authorization_state } => {
                self.on_authorization_state(authorization_state).await
            }
            Update::UpdateUser { user } => {
                trace!(user_id = user.id, "user info available");
                if self.session.release(AuthRequirement::default()) {
                    info!("resumed saved session");
                }
                Ok(())
            }
            Update::UpdateConnectionState { state } => {
                if state == ConnectionState::ConnectionStateReady {
                    info!("connection ready");
                } else {
                    debug!(?state, "connection state changed");
                }
                Ok(())
            }
            Update::UpdateFile { file } => {
                let delivered = self.session.files().notify(&file);
                trace!(
                    file_id = file.id,
                    downloaded = file.local.downloaded_size,
                    completed = file.local.is_downloading_completed,
                    delivered,
                    "file update"
                );
                Ok(())
            }
            Update::Unknown => Ok(()),
        }
    }

    async fn on_authorization_state(&self, state: AuthorizationState) -> Result<(), GatewayError> {
        debug!(?state, "authorization state");
        match state {
            AuthorizationState::AuthorizationStateWaitTdlibParameters => {
                self.session.set_auth_state(AuthState::AwaitingParameters);
                if let Err(err) = self.gateway.set_tdlib_parameters(&self.parameters).await {
                    // Nothing can proceed without parameters.
                    self.session.close();
                    return Err(err);
                }
            }
            AuthorizationState::AuthorizationStateWaitPhoneNumber => {
                self.session.set_auth_state(AuthState::AwaitingPhoneNumber);
                self.session.release(AuthRequirement {
                    interactive: true,
                    password: false,
                });
            }
            AuthorizationState::AuthorizationStateWaitCode => {
                self.session.set_auth_state(AuthState::AwaitingCode);
                self.session.release(AuthRequirement {
                    interactive: true,
                    password: false,
                });
            }
            AuthorizationState::AuthorizationStateWaitPassword { password_hint } => {
                if !password_hint.is_empty() {
                    debug!(%password_hint, "password hint");
                }
                self.session.mark_password_required();
                self.session.set_auth_state(AuthState::AwaitingPassword);
                self.session.release(AuthRequirement {
                    interactive: true,
                    password: true,
                });
            }
            AuthorizationState::AuthorizationStateReady => {
                self.session.set_auth_state(AuthState::Ready);
                self.session.release(AuthRequirement::default());
                info!("authorized");
            }
            AuthorizationState::AuthorizationStateLoggingOut | AuthorizationState::AuthorizationStateClosing => {}
            AuthorizationState::AuthorizationStateClosed => {
                self.session.close();
                info!("client closed");
            }
            AuthorizationState::Unsupported => {
                warn!("unsupported authorization step; only phone login is handled");
            }
        }
        Ok(())
    }
}
