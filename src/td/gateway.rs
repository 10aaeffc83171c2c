use async_trait::async_trait;
use thiserror::Error;

use crate::td::types::{Chat, Chats, File, Messages, TdError, TdlibParameters, User};

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("{friendly}")]
    Td {
        code: i32,
        message: String,
        friendly: String,
    },
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("client closed")]
    Closed,
    #[error("unexpected response: {0}")]
    Unexpected(String),
}

impl From<TdError> for GatewayError {
    fn from(error: TdError) -> Self {
        let friendly = format_td_error(error.code, &error.message);
        GatewayError::Td {
            code: error.code,
            message: error.message,
            friendly,
        }
    }
}

/// The slice of the TDLib API this tool drives.
///
/// Calls resolve when TDLib answers the request. Updates (authorization progress, file
/// progress) arrive separately on the channel handed out when the client is created.
#[async_trait]
pub trait Gateway: Send + Sync {
    async fn set_tdlib_parameters(&self, parameters: &TdlibParameters) -> Result<(), GatewayError>;
    async fn set_authentication_phone_number(&self, phone_number: &str) -> Result<(), GatewayError>;
    async fn check_authentication_code(&self, code: &str) -> Result<(), GatewayError>;
    async fn check_authentication_password(&self, password: &str) -> Result<(), GatewayError>;

    async fn get_me(&self) -> Result<User, GatewayError>;
    async fn get_user(&self, user_id: i64) -> Result<User, GatewayError>;
    async fn get_chats(&self, limit: i32) -> Result<Chats, GatewayError>;
    async fn get_chat(&self, chat_id: i64) -> Result<Chat, GatewayError>;
    async fn get_chat_history(
        &self,
        chat_id: i64,
        from_message_id: i64,
        limit: i32,
    ) -> Result<Messages, GatewayError>;

    /// Starts (or joins) an asynchronous download; the returned file is a snapshot.
    async fn download_file(&self, file_id: i32, priority: i32) -> Result<File, GatewayError>;
    async fn cancel_download_file(&self, file_id: i32) -> Result<(), GatewayError>;

    async fn log_out(&self) -> Result<(), GatewayError>;
    async fn close(&self) -> Result<(), GatewayError>;
}

pub fn format_td_error(code: i32, message: &str) -> String {
    let label = match code {
        400 => "Bad request",
        401 => "Not authorized",
        403 => "Forbidden",
        404 => "Not found",
        406 => "Not acceptable",
        420 | 429 => "Too many requests",
        500 => "Internal TDLib error",
        _ => "TDLib error",
    };

    let mut formatted = String::from(label);
    if !message.is_empty() && !message.eq_ignore_ascii_case(label) {
        formatted.push_str(": ");
        formatted.push_str(message);
    }
    if code != 0 {
        formatted.push_str(&format!(" (code {code})"));
    }
    formatted
}
