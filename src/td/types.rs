//! TDLib objects this crate reads or sends.
//!
//! Only the fields the tool needs are modelled; TDLib sends many more and serde ignores them.
//! Every object carries its type name in `@type`, which maps onto internally tagged enums.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "@type", rename_all = "camelCase")]
pub enum Update {
    UpdateAuthorizationState { authorization_state: AuthorizationState },
    UpdateConnectionState { state: ConnectionState },
    UpdateUser { user: User },
    UpdateFile { file: File },
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(tag = "@type", rename_all = "camelCase")]
pub enum AuthorizationState {
    AuthorizationStateWaitTdlibParameters,
    AuthorizationStateWaitPhoneNumber,
    AuthorizationStateWaitCode,
    AuthorizationStateWaitPassword {
        #[serde(default)]
        password_hint: String,
    },
    AuthorizationStateReady,
    AuthorizationStateLoggingOut,
    AuthorizationStateClosing,
    AuthorizationStateClosed,
    #[serde(other)]
    Unsupported,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(tag = "@type", rename_all = "camelCase")]
pub enum ConnectionState {
    ConnectionStateWaitingForNetwork,
    ConnectionStateConnectingToProxy,
    ConnectionStateConnecting,
    ConnectionStateUpdating,
    ConnectionStateReady,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct User {
    pub id: i64,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    #[serde(default)]
    pub usernames: Option<Usernames>,
    #[serde(default)]
    pub phone_number: String,
}

impl User {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name).trim().to_string()
    }

    pub fn active_username(&self) -> Option<&str> {
        self.usernames
            .as_ref()
            .and_then(|usernames| usernames.active_usernames.first())
            .map(String::as_str)
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Usernames {
    #[serde(default)]
    pub active_usernames: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Chats {
    #[serde(default)]
    pub total_count: i32,
    #[serde(default)]
    pub chat_ids: Vec<i64>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Chat {
    pub id: i64,
    #[serde(rename = "type")]
    pub kind: ChatType,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub last_message: Option<Message>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(tag = "@type", rename_all = "camelCase")]
pub enum ChatType {
    ChatTypePrivate {
        user_id: i64,
    },
    ChatTypeBasicGroup {
        basic_group_id: i64,
    },
    ChatTypeSupergroup {
        supergroup_id: i64,
        #[serde(default)]
        is_channel: bool,
    },
    #[serde(other)]
    Other,
}

impl ChatType {
    /// Private chats, basic groups and supergroups; secret chats and anything newer are not.
    pub fn is_supported(&self) -> bool {
        !matches!(self, ChatType::Other)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Messages {
    #[serde(default)]
    pub total_count: i32,
    // TDLib may put nulls in place of messages it could not load.
    #[serde(default)]
    pub messages: Vec<Option<Message>>,
}

impl Messages {
    pub fn into_messages(self) -> impl Iterator<Item = Message> {
        self.messages.into_iter().flatten()
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Message {
    pub id: i64,
    pub sender_id: MessageSender,
    #[serde(default)]
    pub chat_id: i64,
    #[serde(default)]
    pub date: i64,
    pub content: MessageContent,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(tag = "@type", rename_all = "camelCase")]
pub enum MessageSender {
    MessageSenderUser { user_id: i64 },
    MessageSenderChat { chat_id: i64 },
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "@type", rename_all = "camelCase")]
pub enum MessageContent {
    MessageText { text: FormattedText },
    MessageAudio { audio: Audio },
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct FormattedText {
    #[serde(default)]
    pub text: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Audio {
    #[serde(default)]
    pub duration: i32,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub performer: String,
    #[serde(default)]
    pub file_name: String,
    #[serde(default)]
    pub mime_type: String,
    /// The audio file itself.
    pub audio: File,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct File {
    pub id: i32,
    #[serde(default)]
    pub size: i64,
    #[serde(default)]
    pub expected_size: i64,
    #[serde(default)]
    pub local: LocalFile,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct LocalFile {
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub can_be_downloaded: bool,
    #[serde(default)]
    pub is_downloading_active: bool,
    #[serde(default)]
    pub is_downloading_completed: bool,
    #[serde(default)]
    pub downloaded_size: i64,
}

/// Body of `setTdlibParameters`; flattened into the request next to its `@type`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TdlibParameters {
    pub use_test_dc: bool,
    pub database_directory: PathBuf,
    pub files_directory: PathBuf,
    pub database_encryption_key: String,
    pub use_file_database: bool,
    pub use_chat_info_database: bool,
    pub use_message_database: bool,
    pub use_secret_chats: bool,
    pub api_id: i32,
    pub api_hash: String,
    pub system_language_code: String,
    pub device_model: String,
    pub system_version: String,
    pub application_version: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TdError {
    #[serde(default)]
    pub code: i32,
    #[serde(default)]
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decodes_authorization_updates() {
        let update: Update = serde_json::from_value(json!({
            "@type": "updateAuthorizationState",
            "authorization_state": {
                "@type": "authorizationStateWaitPassword",
                "password_hint": "cat",
                "has_recovery_email_address": false
            }
        }))
        .expect("update");

        match update {
            Update::UpdateAuthorizationState { authorization_state } => assert_eq!(
                authorization_state,
                AuthorizationState::AuthorizationStateWaitPassword {
                    password_hint: "cat".to_string()
                }
            ),
            other => panic!("unexpected update {other:?}"),
        }
    }

    #[test]
    fn unknown_updates_and_states_fall_through() {
        let update: Update = serde_json::from_value(json!({
            "@type": "updateNewMessage",
            "message": {}
        }))
        .expect("update");
        assert!(matches!(update, Update::Unknown));

        let state: AuthorizationState = serde_json::from_value(json!({
            "@type": "authorizationStateWaitOtherDeviceConfirmation",
            "link": "tg://login?token=abc"
        }))
        .expect("state");
        assert_eq!(state, AuthorizationState::Unsupported);
    }

    #[test]
    fn decodes_chat_with_audio_last_message() {
        let chat: Chat = serde_json::from_value(json!({
            "@type": "chat",
            "id": -1001234,
            "type": { "@type": "chatTypeSupergroup", "supergroup_id": 1234, "is_channel": true },
            "title": "Tapes",
            "last_message": {
                "@type": "message",
                "id": 2048,
                "chat_id": -1001234,
                "date": 1700000000,
                "sender_id": { "@type": "messageSenderChat", "chat_id": -1001234 },
                "content": {
                    "@type": "messageAudio",
                    "audio": {
                        "@type": "audio",
                        "duration": 215,
                        "title": "Song",
                        "performer": "Band",
                        "file_name": "song.mp3",
                        "mime_type": "audio/mpeg",
                        "audio": {
                            "@type": "file",
                            "id": 77,
                            "size": 4096,
                            "expected_size": 4096,
                            "local": {
                                "@type": "localFile",
                                "path": "",
                                "can_be_downloaded": true,
                                "is_downloading_active": false,
                                "is_downloading_completed": false,
                                "downloaded_size": 0
                            }
                        }
                    }
                }
            }
        }))
        .expect("chat");

        assert!(chat.kind.is_supported());
        let message = chat.last_message.expect("last message");
        let MessageContent::MessageAudio { audio } = message.content else {
            panic!("expected audio content");
        };
        assert_eq!(audio.file_name, "song.mp3");
        assert_eq!(audio.audio.id, 77);
    }

    #[test]
    fn secret_chats_are_not_supported() {
        let kind: ChatType = serde_json::from_value(json!({
            "@type": "chatTypeSecret",
            "secret_chat_id": 5,
            "user_id": 9
        }))
        .expect("chat type");
        assert!(!kind.is_supported());
    }

    #[test]
    fn null_history_entries_are_skipped() {
        let messages: Messages = serde_json::from_value(json!({
            "@type": "messages",
            "total_count": 2,
            "messages": [
                null,
                {
                    "@type": "message",
                    "id": 10,
                    "sender_id": { "@type": "messageSenderUser", "user_id": 1 },
                    "content": { "@type": "messageText", "text": { "@type": "formattedText", "text": "hi", "entities": [] } }
                }
            ]
        }))
        .expect("messages");
        let ids: Vec<i64> = messages.into_messages().map(|message| message.id).collect();
        assert_eq!(ids, vec![10]);
    }

    #[test]
    fn user_names_trim_missing_parts() {
        let user = User {
            id: 1,
            first_name: "Ada".to_string(),
            usernames: Some(Usernames {
                active_usernames: vec!["ada".to_string()],
            }),
            ..User::default()
        };
        assert_eq!(user.full_name(), "Ada");
        assert_eq!(user.active_username(), Some("ada"));
    }
}
