//! Download the audio posted in Telegram chats through TDLib.

pub mod auth;
pub mod commands;
pub mod config;
pub mod download;
pub mod history;
pub mod logging;
pub mod output;
pub mod session;
pub mod td;
pub mod updates;
