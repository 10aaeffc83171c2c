//! Chat listing and backward history walks.

use futures_util::stream::{self, Stream};
use tracing::debug;

use crate::td::types::{Audio, Chat, Message, MessageContent};
use crate::td::{Gateway, GatewayError};

/// TDLib's upper bound for one `getChatHistory` page.
pub const HISTORY_PAGE_SIZE: i32 = 100;

/// An audio attachment found in a chat, with the message that carries it.
#[derive(Debug, Clone)]
pub struct AudioItem {
    pub message_id: i64,
    pub audio: Audio,
}

impl AudioItem {
    pub fn file_id(&self) -> i32 {
        self.audio.audio.id
    }

    /// The declared file name, or the title when the sender left it empty.
    pub fn display_name(&self) -> &str {
        if !self.audio.file_name.trim().is_empty() {
            &self.audio.file_name
        } else if !self.audio.title.trim().is_empty() {
            &self.audio.title
        } else {
            "<unnamed audio>"
        }
    }
}

enum ChatWalk {
    Start,
    Ids(std::vec::IntoIter<i64>),
    Done,
}

/// Up to `limit` supported chats in the order TDLib ranks them.
///
/// Lazy: each chat is fetched when the stream is polled for it.
pub fn list_chats(gateway: &dyn Gateway, limit: i32) -> impl Stream<Item = Result<Chat, GatewayError>> + '_ {
    stream::unfold(ChatWalk::Start, move |walk| async move {
        let mut walk = walk;
        loop {
            match walk {
                ChatWalk::Start => match gateway.get_chats(limit).await {
                    Ok(chats) => walk = ChatWalk::Ids(chats.chat_ids.into_iter()),
                    Err(err) => return Some((Err(err), ChatWalk::Done)),
                },
                ChatWalk::Ids(mut ids) => {
                    let id = ids.next()?;
                    let result = gateway.get_chat(id).await;
                    walk = ChatWalk::Ids(ids);
                    match result {
                        Ok(chat) if chat.kind.is_supported() => return Some((Ok(chat), walk)),
                        Ok(chat) => debug!(chat_id = chat.id, "skipping unsupported chat"),
                        Err(err) => return Some((Err(err), walk)),
                    }
                }
                ChatWalk::Done => return None,
            }
        }
    })
}

/// The chat, if it is a kind this tool works with; `None` for anything else.
pub async fn get_chat(gateway: &dyn Gateway, chat_id: i64) -> Result<Option<Chat>, GatewayError> {
    let chat = gateway.get_chat(chat_id).await?;
    Ok(chat.kind.is_supported().then_some(chat))
}

/// The newest `limit` messages of the chat, newest first.
pub async fn recent_history(gateway: &dyn Gateway, chat: &Chat, limit: i32) -> Result<Vec<Message>, GatewayError> {
    let Some(last_message) = &chat.last_message else {
        return Ok(Vec::new());
    };
    let page = gateway.get_chat_history(chat.id, last_message.id, limit).await?;
    Ok(page.into_messages().collect())
}

/// Every audio attachment in the chat, newest first.
///
/// Pages backward from the last message. After each page the cursor moves to the oldest
/// message seen; the walk ends when a page no longer moves it.
pub async fn list_history(gateway: &dyn Gateway, chat: &Chat) -> Result<Vec<AudioItem>, GatewayError> {
    let Some(last_message) = &chat.last_message else {
        return Ok(Vec::new());
    };

    let mut items = Vec::new();
    let mut cursor = last_message.id;
    let mut first_page = true;

    loop {
        let page = gateway
            .get_chat_history(chat.id, cursor, HISTORY_PAGE_SIZE)
            .await?;

        let mut oldest = cursor;
        for message in page.into_messages() {
            // Every page starts at the cursor message, which the previous page covered.
            if !first_page && message.id >= cursor {
                continue;
            }
            oldest = oldest.min(message.id);
            if let MessageContent::MessageAudio { audio } = message.content {
                items.push(AudioItem {
                    message_id: message.id,
                    audio,
                });
            }
        }

        debug!(chat_id = chat.id, cursor, oldest, found = items.len(), "history page");
        // The first page may hold only the last message, so always look below it once.
        if !first_page && oldest == cursor {
            break;
        }
        first_page = false;
        cursor = oldest;
    }

    Ok(items)
}
