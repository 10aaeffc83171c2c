//! In-memory gateway for unit tests.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::session::Session;
use crate::td::gateway::{Gateway, GatewayError};
use crate::td::types::{
    Audio, AuthorizationState, Chat, ChatType, Chats, File, FormattedText, LocalFile, Message,
    MessageContent, MessageSender, Messages, TdError, TdlibParameters, Update, User,
};

pub fn td_error(code: i32, message: &str) -> GatewayError {
    GatewayError::from(TdError {
        code,
        message: message.to_string(),
    })
}

#[derive(Clone)]
pub enum DownloadScript {
    /// `downloadFile` answers with an already complete file at this path.
    Ready(String),
    /// `downloadFile` answers "in progress"; completion arrives later as a file update.
    Deferred(String),
    /// Progress arrives, then the download stops without completing.
    Stops,
    /// `downloadFile` itself fails.
    Fails(String),
}

#[derive(Default)]
pub struct FakeGateway {
    pub me: User,
    pub users: HashMap<i64, User>,
    pub chats: HashMap<i64, Chat>,
    pub chat_list: Vec<i64>,
    /// Newest first, like TDLib returns them.
    pub histories: HashMap<i64, Vec<Message>>,
    /// When set, history calls return these pages in order and then empty pages.
    pub scripted_pages: Option<Mutex<VecDeque<Vec<Message>>>>,
    pub downloads: HashMap<i32, DownloadScript>,
    pub file_session: Option<Arc<Session>>,
    pub parameters_error: Option<GatewayError>,
    pub accepted_code: Option<String>,
    pub requires_password: bool,
    pub auth_updates: Option<mpsc::UnboundedSender<Update>>,
    pub calls: Mutex<Vec<String>>,
}

impl FakeGateway {
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().expect("calls").clone()
    }

    pub fn with_pages(pages: Vec<Vec<Message>>) -> Self {
        Self {
            scripted_pages: Some(Mutex::new(pages.into())),
            ..Self::default()
        }
    }

    pub fn add_chat(&mut self, chat: Chat) {
        self.chat_list.push(chat.id);
        self.chats.insert(chat.id, chat);
    }

    fn record(&self, call: String) {
        self.calls.lock().expect("calls").push(call);
    }

    fn emit(&self, state: AuthorizationState) {
        if let Some(updates) = &self.auth_updates {
            let _ = updates.send(Update::UpdateAuthorizationState {
                authorization_state: state,
            });
        }
    }

    fn notify_later(&self, file: File) {
        if let Some(session) = &self.file_session {
            let session = session.clone();
            tokio::spawn(async move {
                tokio::task::yield_now().await;
                session.files().notify(&file);
            });
        }
    }
}

#[async_trait]
impl Gateway for FakeGateway {
    async fn set_tdlib_parameters(&self, _parameters: &TdlibParameters) -> Result<(), GatewayError> {
        self.record("setTdlibParameters".to_string());
        match &self.parameters_error {
            Some(GatewayError::Td { code, message, .. }) => Err(td_error(*code, message)),
            Some(_) => Err(GatewayError::Closed),
            None => Ok(()),
        }
    }

    async fn set_authentication_phone_number(&self, phone_number: &str) -> Result<(), GatewayError> {
        self.record(format!("setAuthenticationPhoneNumber {phone_number}"));
        if phone_number.is_empty() {
            return Err(td_error(400, "PHONE_NUMBER_INVALID"));
        }
        self.emit(AuthorizationState::AuthorizationStateWaitCode);
        Ok(())
    }

    async fn check_authentication_code(&self, code: &str) -> Result<(), GatewayError> {
        self.record("checkAuthenticationCode".to_string());
        if self.accepted_code.as_deref() != Some(code) {
            return Err(td_error(400, "PHONE_CODE_INVALID"));
        }
        if self.requires_password {
            self.emit(AuthorizationState::AuthorizationStateWaitPassword {
                password_hint: String::new(),
            });
        } else {
            self.emit(AuthorizationState::AuthorizationStateReady);
        }
        Ok(())
    }

    async fn check_authentication_password(&self, _password: &str) -> Result<(), GatewayError> {
        self.record("checkAuthenticationPassword".to_string());
        self.emit(AuthorizationState::AuthorizationStateReady);
        Ok(())
    }

    async fn get_me(&self) -> Result<User, GatewayError> {
        self.record("getMe".to_string());
        Ok(self.me.clone())
    }

    async fn get_user(&self, user_id: i64) -> Result<User, GatewayError> {
        self.record(format!("getUser {user_id}"));
        self.users
            .get(&user_id)
            .cloned()
            .ok_or_else(|| td_error(404, "User not found"))
    }

    async fn get_chats(&self, limit: i32) -> Result<Chats, GatewayError> {
        self.record(format!("getChats {limit}"));
        let chat_ids: Vec<i64> = self
            .chat_list
            .iter()
            .copied()
            .take(usize::try_from(limit).unwrap_or(0))
            .collect();
        Ok(Chats {
            total_count: self.chat_list.len() as i32,
            chat_ids,
        })
    }

    async fn get_chat(&self, chat_id: i64) -> Result<Chat, GatewayError> {
        self.record(format!("getChat {chat_id}"));
        self.chats
            .get(&chat_id)
            .cloned()
            .ok_or_else(|| td_error(400, "Chat not found"))
    }

    async fn get_chat_history(
        &self,
        chat_id: i64,
        from_message_id: i64,
        limit: i32,
    ) -> Result<Messages, GatewayError> {
        self.record(format!("getChatHistory {chat_id} {from_message_id} {limit}"));
        let limit = usize::try_from(limit).unwrap_or(0);

        let page: Vec<Message> = if let Some(pages) = &self.scripted_pages {
            pages.lock().expect("pages").pop_front().unwrap_or_default()
        } else {
            let history = self
                .histories
                .get(&chat_id)
                .ok_or_else(|| td_error(400, "Chat not found"))?;
            history
                .iter()
                .filter(|message| from_message_id == 0 || message.id <= from_message_id)
                .take(limit)
                .cloned()
                .collect()
        };

        Ok(Messages {
            total_count: page.len() as i32,
            messages: page.into_iter().map(Some).collect(),
        })
    }

    async fn download_file(&self, file_id: i32, priority: i32) -> Result<File, GatewayError> {
        self.record(format!("downloadFile {file_id} {priority}"));
        match self.downloads.get(&file_id).cloned() {
            Some(DownloadScript::Ready(path)) => Ok(local_file(file_id, &path, false, true)),
            Some(DownloadScript::Deferred(path)) => {
                self.notify_later(local_file(file_id, "", true, false));
                self.notify_later(local_file(file_id, &path, false, true));
                Ok(local_file(file_id, "", true, false))
            }
            Some(DownloadScript::Stops) => {
                self.notify_later(local_file(file_id, "", false, false));
                Ok(local_file(file_id, "", true, false))
            }
            Some(DownloadScript::Fails(message)) => Err(td_error(400, &message)),
            None => Err(td_error(404, "File not found")),
        }
    }

    async fn cancel_download_file(&self, file_id: i32) -> Result<(), GatewayError> {
        self.record(format!("cancelDownloadFile {file_id}"));
        Ok(())
    }

    async fn log_out(&self) -> Result<(), GatewayError> {
        self.record("logOut".to_string());
        Ok(())
    }

    async fn close(&self) -> Result<(), GatewayError> {
        self.record("close".to_string());
        self.emit(AuthorizationState::AuthorizationStateClosed);
        Ok(())
    }
}

pub fn local_file(id: i32, path: &str, active: bool, completed: bool) -> File {
    File {
        id,
        size: 3,
        expected_size: 3,
        local: LocalFile {
            path: path.to_string(),
            can_be_downloaded: true,
            is_downloading_active: active,
            is_downloading_completed: completed,
            downloaded_size: if completed { 3 } else { 0 },
        },
    }
}

pub fn audio_message(id: i64, file_id: i32, file_name: &str) -> Message {
    Message {
        id,
        sender_id: MessageSender::MessageSenderUser { user_id: 1 },
        chat_id: 0,
        date: 0,
        content: MessageContent::MessageAudio {
            audio: Audio {
                duration: 180,
                title: format!("Title {file_name}"),
                performer: String::new(),
                file_name: file_name.to_string(),
                mime_type: "audio/mpeg".to_string(),
                audio: local_file(file_id, "", false, false),
            },
        },
    }
}

pub fn text_message(id: i64, sender: MessageSender, text: &str) -> Message {
    Message {
        id,
        sender_id: sender,
        chat_id: 0,
        date: 0,
        content: MessageContent::MessageText {
            text: FormattedText {
                text: text.to_string(),
            },
        },
    }
}

pub fn chat(id: i64, kind: ChatType, title: &str, last_message: Option<Message>) -> Chat {
    Chat {
        id,
        kind,
        title: title.to_string(),
        last_message,
    }
}

pub fn private(user_id: i64) -> ChatType {
    ChatType::ChatTypePrivate { user_id }
}
