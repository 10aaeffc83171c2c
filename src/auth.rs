use std::fmt;
use std::io;
use std::time::Duration;

use dialoguer::{Input, Password};
use thiserror::Error;
use tracing::{info, warn};

use crate::session::{AuthRequirement, AuthState, Session};
use crate::td::{Gateway, GatewayError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthStep {
    PhoneNumber,
    Code,
    Password,
}

impl fmt::Display for AuthStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            AuthStep::PhoneNumber => "phone number",
            AuthStep::Code => "login code",
            AuthStep::Password => "password",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("{step} rejected: {source}")]
    Rejected {
        step: AuthStep,
        #[source]
        source: GatewayError,
    },
    #[error("could not read {step}: {source}")]
    Prompt {
        step: AuthStep,
        #[source]
        source: io::Error,
    },
    #[error("client closed before authorization finished")]
    Closed,
}

/// Asks the operator for one credential.
pub trait Prompter {
    fn ask(&mut self, step: AuthStep) -> io::Result<String>;
}

/// Terminal prompts; the password is read without echo.
pub struct TerminalPrompter;

impl Prompter for TerminalPrompter {
    fn ask(&mut self, step: AuthStep) -> io::Result<String> {
        let value = match step {
            AuthStep::PhoneNumber => Input::<String>::new()
                .with_prompt("Insert phone number")
                .interact_text(),
            AuthStep::Code => Input::<String>::new()
                .with_prompt("Insert the login code")
                .interact_text(),
            AuthStep::Password => Password::new().with_prompt("Insert the password").interact(),
        };
        value.map(|value| value.trim().to_string()).map_err(io::Error::other)
    }
}

/// Waits for the readiness gate, runs the interactive login if TDLib asked for one, and
/// returns once the client is authorized.
pub async fn bootstrap(
    session: &Session,
    gateway: &dyn Gateway,
    prompter: &mut dyn Prompter,
) -> Result<AuthRequirement, AuthError> {
    let mut requirement = session.wait_ready().await.ok_or(AuthError::Closed)?;

    if !requirement.interactive {
        // User info can arrive before TDLib decides the saved session is no longer valid.
        let state = session
            .wait_for_state(|state| *state != AuthState::AwaitingParameters)
            .await;
        if is_login_step(state) {
            info!(?state, "saved session rejected, logging in");
            requirement = AuthRequirement {
                interactive: true,
                password: session.password_required(),
            };
        }
    }

    if requirement.interactive {
        authenticate(session, gateway, prompter).await?;
    } else {
        info!("no login needed, using the saved session");
    }

    let state = session
        .wait_for_state(|state| matches!(state, AuthState::Ready | AuthState::Closed))
        .await;
    if state == AuthState::Closed {
        return Err(AuthError::Closed);
    }
    Ok(requirement)
}

/// Sends `close` (unless TDLib is already shutting down, e.g. after `logOut`) and waits up to
/// `timeout` for the client to report it has closed. Returns whether it did.
pub async fn shutdown(session: &Session, gateway: &dyn Gateway, send_close: bool, timeout: Duration) -> bool {
    if send_close && session.auth_state() != AuthState::Closed {
        if let Err(err) = gateway.close().await {
            warn!(error = %err, "close request failed");
        }
    }
    let closed = tokio::time::timeout(
        timeout,
        session.wait_for_state(|state| *state == AuthState::Closed),
    )
    .await;
    if closed.is_err() {
        warn!("TDLib did not report closing in time");
        return false;
    }
    info!("client closed");
    true
}

fn is_login_step(state: AuthState) -> bool {
    matches!(
        state,
        AuthState::AwaitingPhoneNumber | AuthState::AwaitingCode | AuthState::AwaitingPassword
    )
}

/// Phone number, then login code, then the 2FA password if TDLib asks for it. A step is
/// only prompted while TDLib is waiting for it; any rejection ends the login.
async fn authenticate(
    session: &Session,
    gateway: &dyn Gateway,
    prompter: &mut dyn Prompter,
) -> Result<(), AuthError> {
    if session.auth_state() == AuthState::AwaitingPhoneNumber {
        let phone_number = ask(prompter, AuthStep::PhoneNumber)?;
        gateway
            .set_authentication_phone_number(&phone_number)
            .await
            .map_err(|source| rejected(AuthStep::PhoneNumber, source))?;
        advance_from(session, AuthState::AwaitingPhoneNumber).await?;
    }

    if session.auth_state() == AuthState::AwaitingCode {
        let code = ask(prompter, AuthStep::Code)?;
        gateway
            .check_authentication_code(&code)
            .await
            .map_err(|source| rejected(AuthStep::Code, source))?;
        advance_from(session, AuthState::AwaitingCode).await?;
    }

    if session.password_required() && session.auth_state() == AuthState::AwaitingPassword {
        let password = ask(prompter, AuthStep::Password)?;
        gateway
            .check_authentication_password(&password)
            .await
            .map_err(|source| rejected(AuthStep::Password, source))?;
        advance_from(session, AuthState::AwaitingPassword).await?;
    }

    Ok(())
}

fn ask(prompter: &mut dyn Prompter, step: AuthStep) -> Result<String, AuthError> {
    prompter
        .ask(step)
        .map_err(|source| AuthError::Prompt { step, source })
}

fn rejected(step: AuthStep, source: GatewayError) -> AuthError {
    AuthError::Rejected { step, source }
}

/// TDLib answers a step before (or after) announcing the next state; wait for it.
async fn advance_from(session: &Session, current: AuthState) -> Result<AuthState, AuthError> {
    let next = session.wait_for_state(|state| *state != current).await;
    if next == AuthState::Closed {
        return Err(AuthError::Closed);
    }
    Ok(next)
}
