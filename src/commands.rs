//! The interactive `$ ` prompt and its commands.

use std::collections::HashMap;
use std::io::{self, Write};
use std::path::PathBuf;
use std::pin::pin;
use std::sync::{Arc, Mutex, PoisonError};

use clap::{Parser, Subcommand};
use futures_util::StreamExt;
use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use crate::config::Config;
use crate::download::{DownloadError, DownloadEvent, DownloadOutcome, Downloader};
use crate::history::{self, AudioItem};
use crate::output::{self, OutputError};
use crate::session::Session;
use crate::td::types::{Chat, Message, MessageContent, MessageSender};
use crate::td::{Gateway, GatewayError};

#[derive(Debug, Parser)]
#[command(
    name = "tdmusic",
    no_binary_name = true,
    disable_help_flag = true,
    disable_help_subcommand = true,
    disable_version_flag = true
)]
struct CommandLine {
    #[command(subcommand)]
    command: ShellCommand,
}

#[derive(Debug, Clone, PartialEq, Eq, Subcommand)]
pub enum ShellCommand {
    /// Print the logged-in user as JSON.
    #[command(name = "getme")]
    GetMe,
    /// List the top chats.
    #[command(name = "getchats")]
    GetChats {
        #[arg(value_parser = clap::value_parser!(i32).range(1..))]
        limit: i32,
    },
    /// Show a chat and its recent messages.
    #[command(name = "getchat", allow_negative_numbers = true)]
    GetChat { chat_id: i64 },
    /// Download every audio file posted in a chat.
    #[command(name = "downloadmusicfromchat", allow_negative_numbers = true)]
    DownloadMusicFromChat { chat_id: i64, path: Option<PathBuf> },
    #[command(name = "logout")]
    Logout,
    #[command(name = "exit")]
    Exit,
}

#[derive(Debug, Error)]
pub enum CommandError {
    #[error("{0}")]
    Usage(String),
    #[error(transparent)]
    Gateway(#[from] GatewayError),
    #[error(transparent)]
    Output(#[from] OutputError),
    #[error(transparent)]
    Download(#[from] DownloadError),
    #[error("write error: {0}")]
    Io(#[from] io::Error),
}

/// What the loop does after a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Exit,
    LoggedOut,
}

/// Parses one prompt line. Blank lines and unknown command names yield `None`.
pub fn parse_line(line: &str) -> Result<Option<ShellCommand>, CommandError> {
    let tokens: Vec<&str> = line.split_whitespace().collect();
    let Some(name) = tokens.first() else {
        return Ok(None);
    };
    if !ShellCommand::has_subcommand(name) {
        debug!(command = %name, "ignoring unknown command");
        return Ok(None);
    }
    CommandLine::try_parse_from(tokens)
        .map(|parsed| Some(parsed.command))
        .map_err(|err| CommandError::Usage(err.to_string().trim_end().to_string()))
}

/// Lets Ctrl-C cancel a running download batch.
#[derive(Clone, Default)]
pub struct InterruptHandle {
    active: Arc<Mutex<Option<CancellationToken>>>,
}

impl InterruptHandle {
    pub fn begin(&self) -> CancellationToken {
        let token = CancellationToken::new();
        *self.lock() = Some(token.clone());
        token
    }

    pub fn end(&self) {
        self.lock().take();
    }

    /// Cancels the running batch. Returns false when nothing was running.
    pub fn interrupt(&self) -> bool {
        match self.lock().as_ref() {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<CancellationToken>> {
        self.active.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

pub struct Shell {
    gateway: Arc<dyn Gateway>,
    session: Arc<Session>,
    preview_limit: i32,
    download_priority: i32,
    download_dir: PathBuf,
    interrupts: InterruptHandle,
}

impl Shell {
    pub fn new(gateway: Arc<dyn Gateway>, session: Arc<Session>, config: &Config) -> Self {
        Self {
            gateway,
            session,
            preview_limit: config.preview_limit,
            download_priority: config.download_priority,
            download_dir: config.download_dir.clone(),
            interrupts: InterruptHandle::default(),
        }
    }

    pub fn interrupts(&self) -> InterruptHandle {
        self.interrupts.clone()
    }

    /// Reads commands until `exit`, `logout` or end of input. Command failures are reported
    /// and the loop keeps going.
    pub async fn run<R>(&self, input: R, out: &mut dyn Write) -> io::Result<Flow>
    where
        R: AsyncBufRead + Unpin,
    {
        let mut lines = input.lines();
        loop {
            write!(out, "$ ")?;
            out.flush()?;
            let Some(line) = lines.next_line().await? else {
                debug!("end of input");
                return Ok(Flow::Exit);
            };
            match self.execute(&line, out).await {
                Ok(Flow::Continue) => {}
                Ok(flow) => return Ok(flow),
                Err(err) => {
                    error!(error = %err, command = %line.trim(), "command failed");
                    writeln!(out, "Oops! An error!")?;
                    writeln!(out, "{err}")?;
                }
            }
        }
    }

    pub async fn execute(&self, line: &str, out: &mut dyn Write) -> Result<Flow, CommandError> {
        let Some(command) = parse_line(line)? else {
            return Ok(Flow::Continue);
        };
        debug!(?command, "running command");

        match command {
            ShellCommand::GetMe => {
                let me = self.gateway.get_me().await?;
                output::write_json(out, &me)?;
            }
            ShellCommand::GetChats { limit } => self.get_chats(limit, out).await?,
            ShellCommand::GetChat { chat_id } => self.get_chat(chat_id, out).await?,
            ShellCommand::DownloadMusicFromChat { chat_id, path } => {
                let destination = path.unwrap_or_else(|| self.download_dir.clone());
                self.download_music(chat_id, destination, out).await?;
            }
            ShellCommand::Logout => {
                self.gateway.log_out().await?;
                return Ok(Flow::LoggedOut);
            }
            ShellCommand::Exit => return Ok(Flow::Exit),
        }
        Ok(Flow::Continue)
    }

    async fn get_chats(&self, limit: i32, out: &mut dyn Write) -> Result<(), CommandError> {
        writeln!(out, "Top {limit} chats:")?;
        let mut chats = pin!(history::list_chats(self.gateway.as_ref(), limit));
        while let Some(chat) = chats.next().await {
            writeln!(out, "{}", output::chat_line(&chat?))?;
        }
        Ok(())
    }

    async fn get_chat(&self, chat_id: i64, out: &mut dyn Write) -> Result<(), CommandError> {
        let Some(chat) = self.supported_chat(chat_id, out).await? else {
            return Ok(());
        };
        writeln!(out, "{}:", output::chat_line(&chat))?;
        writeln!(out)?;

        let messages = history::recent_history(self.gateway.as_ref(), &chat, self.preview_limit).await?;
        let mut senders = SenderNames::new(self.gateway.as_ref(), &chat);
        for message in &messages {
            if let Some(line) = preview_line(message, &mut senders).await? {
                writeln!(out, "{line}")?;
            }
        }
        Ok(())
    }

    async fn download_music(&self, chat_id: i64, destination: PathBuf, out: &mut dyn Write) -> Result<(), CommandError> {
        let Some(chat) = self.supported_chat(chat_id, out).await? else {
            return Ok(());
        };

        let items = history::list_history(self.gateway.as_ref(), &chat).await?;
        for item in &items {
            writeln!(out, "Add to list: {}", item.display_name())?;
        }
        writeln!(out, "Total count: {}", items.len())?;
        writeln!(out, "Downloading files...")?;

        let downloader = Downloader::new(self.gateway.as_ref(), self.session.files(), self.download_priority);
        let cancel = self.interrupts.begin();
        let mut write_result = Ok(());
        let result = downloader
            .download_all(items, &destination, &cancel, |event| {
                if write_result.is_ok() {
                    write_result = write_download_event(out, event);
                }
            })
            .await;
        self.interrupts.end();

        let tasks = result?;
        write_result?;
        output::write_download_summary(out, &tasks)?;
        Ok(())
    }

    /// The chat when it is one this tool works with; otherwise says so and returns `None`.
    async fn supported_chat(&self, chat_id: i64, out: &mut dyn Write) -> Result<Option<Chat>, CommandError> {
        let chat = match history::get_chat(self.gateway.as_ref(), chat_id).await {
            Ok(chat) => chat,
            Err(GatewayError::Td { code: 400 | 404, message, .. }) => {
                debug!(chat_id, %message, "chat lookup failed");
                None
            }
            Err(err) => return Err(err.into()),
        };
        if chat.is_none() {
            writeln!(out, "Chat {chat_id} is not a supported conversation.")?;
        }
        Ok(chat)
    }
}

/// `Audio: ...` or `Message from ...: ...`; other content is skipped.
async fn preview_line(message: &Message, senders: &mut SenderNames<'_>) -> Result<Option<String>, GatewayError> {
    let line = match &message.content {
        MessageContent::MessageAudio { audio } => Some(format!("Audio: {}", audio.file_name)),
        MessageContent::MessageText { text } => {
            let sender = senders.name(&message.sender_id).await?;
            Some(format!("Message from {sender}: {}", text.text))
        }
        MessageContent::Other => None,
    };
    Ok(line)
}

fn write_download_event(out: &mut dyn Write, event: DownloadEvent<'_>) -> io::Result<()> {
    match event {
        DownloadEvent::Started(item) => writeln!(out, "Downloading: {}", item.display_name()),
        DownloadEvent::Finished(task) => match &task.outcome {
            DownloadOutcome::Saved(path) => writeln!(
                out,
                "Successfully downloaded \"{}\" at \"{}\"",
                title(&task.item),
                path.display()
            ),
            DownloadOutcome::Failed(reason) => {
                writeln!(out, "Can't download file: {}", task.item.display_name())?;
                writeln!(out, "{reason}")
            }
            DownloadOutcome::Cancelled => writeln!(out, "Cancelled: {}", task.item.display_name()),
        },
    }
}

fn title(item: &AudioItem) -> &str {
    if item.audio.title.trim().is_empty() {
        item.display_name()
    } else {
        &item.audio.title
    }
}

/// Sender display names, looked up once per command.
struct SenderNames<'a> {
    gateway: &'a dyn Gateway,
    chat: &'a Chat,
    cache: HashMap<MessageSender, String>,
}

impl<'a> SenderNames<'a> {
    fn new(gateway: &'a dyn Gateway, chat: &'a Chat) -> Self {
        Self {
            gateway,
            chat,
            cache: HashMap::new(),
        }
    }

    async fn name(&mut self, sender: &MessageSender) -> Result<String, GatewayError> {
        if let Some(name) = self.cache.get(sender) {
            return Ok(name.clone());
        }
        let name = match sender {
            MessageSender::MessageSenderUser { user_id } => {
                let user = self.gateway.get_user(*user_id).await?;
                if user.first_name.is_empty() {
                    user.full_name()
                } else {
                    user.first_name
                }
            }
            MessageSender::MessageSenderChat { chat_id } if *chat_id == self.chat.id => self.chat.title.clone(),
            MessageSender::MessageSenderChat { chat_id } => self.gateway.get_chat(*chat_id).await?.title,
        };
        self.cache.insert(sender.clone(), name.clone());
        Ok(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::td::fake::{DownloadScript, FakeGateway, audio_message, chat, private, text_message};
    use crate::td::types::{ChatType, User};

    fn config() -> Config {
        Config::from_lookup(|_| None).expect("config")
    }

    fn shell(gateway: FakeGateway) -> (Shell, Arc<FakeGateway>) {
        let gateway = Arc::new(gateway);
        let shell = Shell::new(gateway.clone(), Arc::new(Session::new()), &config());
        (shell, gateway)
    }

    async fn run_script(shell: &Shell, script: &str) -> (Flow, String) {
        let mut out = Vec::new();
        let flow = shell.run(script.as_bytes(), &mut out).await.expect("run");
        (flow, String::from_utf8(out).expect("utf8"))
    }

    fn user(id: i64, first_name: &str) -> User {
        User {
            id,
            first_name: first_name.to_string(),
            ..User::default()
        }
    }

    #[test]
    fn parses_commands_and_ignores_unknown_ones() {
        assert_eq!(parse_line("").expect("blank"), None);
        assert_eq!(parse_line("   ").expect("blank"), None);
        assert_eq!(parse_line("help").expect("unknown"), None);
        assert_eq!(parse_line("GETME").expect("unknown"), None);
        assert_eq!(parse_line("getme").expect("getme"), Some(ShellCommand::GetMe));
        assert_eq!(
            parse_line("  getchats   5 ").expect("getchats"),
            Some(ShellCommand::GetChats { limit: 5 })
        );
        assert_eq!(
            parse_line("getchat -100123").expect("getchat"),
            Some(ShellCommand::GetChat { chat_id: -100123 })
        );
        assert_eq!(
            parse_line("downloadmusicfromchat -5 /tmp/music").expect("download"),
            Some(ShellCommand::DownloadMusicFromChat {
                chat_id: -5,
                path: Some(PathBuf::from("/tmp/music")),
            })
        );
    }

    #[test]
    fn bad_arguments_are_usage_errors() {
        assert!(matches!(parse_line("getchats"), Err(CommandError::Usage(_))));
        assert!(matches!(parse_line("getchats many"), Err(CommandError::Usage(_))));
        assert!(matches!(parse_line("getchats 0"), Err(CommandError::Usage(_))));
        assert!(matches!(parse_line("getchat 1 2"), Err(CommandError::Usage(_))));
    }

    #[tokio::test]
    async fn unknown_input_prints_nothing_but_the_prompt() {
        let (shell, gateway) = shell(FakeGateway::default());
        let (flow, output) = run_script(&shell, "hello\n\nlist chats\n").await;

        assert_eq!(flow, Flow::Exit);
        assert_eq!(output, "$ $ $ $ ");
        assert!(gateway.calls().is_empty());
    }

    #[tokio::test]
    async fn errors_are_reported_and_the_loop_continues() {
        let mut gateway = FakeGateway::default();
        gateway.add_chat(chat(1, private(1), "Ada", None));
        let (shell, _gateway) = shell(gateway);

        let (flow, output) = run_script(&shell, "getchats nope\ngetchats 1\nexit\nexit\n").await;

        assert_eq!(flow, Flow::Exit);
        assert!(output.contains("Oops! An error!"));
        assert!(output.contains("Top 1 chats:\n[1] -> [Ada]\n"));
        // Stops at the first exit.
        assert!(output.ends_with("$ "));
        assert_eq!(output.matches("$ ").count(), 3);
    }

    #[tokio::test]
    async fn gateway_failure_aborts_only_that_command() {
        let mut gateway = FakeGateway::default();
        // Known chat whose history TDLib refuses to load.
        gateway.add_chat(chat(5, private(7), "Grace", Some(audio_message(9, 90, "x.mp3"))));
        let (shell, gateway) = shell(gateway);

        let (flow, output) = run_script(&shell, "downloadmusicfromchat 5\ngetchats 1\nexit\n").await;

        assert_eq!(flow, Flow::Exit);
        assert!(output.starts_with("$ Oops! An error!\nBad request: Chat not found (code 400)\n$ "));
        assert!(output.contains("Top 1 chats:\n[5] -> [Grace]\n"));
        assert!(!output.contains("Total count"));
        let calls = gateway.calls();
        assert!(calls.contains(&"getChats 1".to_string()));
        assert!(!calls.iter().any(|call| call.starts_with("downloadFile")));
    }

    #[tokio::test]
    async fn getme_prints_json() {
        let (shell, _gateway) = shell(FakeGateway {
            me: user(42, "Ada"),
            ..FakeGateway::default()
        });
        let mut out = Vec::new();
        shell.execute("getme", &mut out).await.expect("getme");

        let text = String::from_utf8(out).expect("utf8");
        let value: serde_json::Value = serde_json::from_str(&text).expect("json");
        assert_eq!(value["id"], 42);
        assert_eq!(value["first_name"], "Ada");
    }

    #[tokio::test]
    async fn getchat_previews_audio_and_text() {
        let messages = vec![
            text_message(3, MessageSender::MessageSenderUser { user_id: 7 }, "hello"),
            audio_message(2, 20, "tune.mp3"),
            text_message(1, MessageSender::MessageSenderUser { user_id: 7 }, "again"),
        ];
        let mut gateway = FakeGateway::default();
        gateway.add_chat(chat(5, private(7), "Grace", messages.first().cloned()));
        gateway.histories.insert(5, messages);
        gateway.users = HashMap::from([(7, user(7, "Grace"))]);
        let (shell, gateway) = shell(gateway);

        let mut out = Vec::new();
        shell.execute("getchat 5", &mut out).await.expect("getchat");

        assert_eq!(
            String::from_utf8(out).expect("utf8"),
            "[5] -> [Grace]:\n\nMessage from Grace: hello\nAudio: tune.mp3\nMessage from Grace: again\n"
        );
        let lookups = gateway.calls().iter().filter(|call| call.starts_with("getUser")).count();
        assert_eq!(lookups, 1);
    }

    #[tokio::test]
    async fn getchat_rejects_unsupported_and_unknown_chats() {
        let mut gateway = FakeGateway::default();
        gateway.add_chat(chat(9, ChatType::Other, "Secret", None));
        let (shell, _gateway) = shell(gateway);

        let mut out = Vec::new();
        shell.execute("getchat 9", &mut out).await.expect("unsupported");
        shell.execute("getchat 404", &mut out).await.expect("unknown");

        assert_eq!(
            String::from_utf8(out).expect("utf8"),
            "Chat 9 is not a supported conversation.\nChat 404 is not a supported conversation.\n"
        );
    }

    #[tokio::test]
    async fn download_reports_each_item_and_a_summary() {
        let dir = std::env::temp_dir().join(format!("tdmusic-shell-{}", std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).expect("dir");
        let source = dir.join("source");
        std::fs::write(&source, "abc").expect("source");

        let messages = vec![audio_message(2, 20, "good.mp3"), audio_message(1, 21, "bad.mp3")];
        let mut gateway = FakeGateway::default();
        gateway.add_chat(chat(5, private(7), "Grace", messages.first().cloned()));
        gateway.histories.insert(5, messages);
        gateway
            .downloads
            .insert(20, DownloadScript::Ready(source.to_string_lossy().into_owned()));
        gateway
            .downloads
            .insert(21, DownloadScript::Fails("FILE_ID_INVALID".to_string()));
        let (shell, _gateway) = shell(gateway);

        let destination = dir.join("music");
        let mut out = Vec::new();
        shell
            .execute(&format!("downloadmusicfromchat 5 {}", destination.display()), &mut out)
            .await
            .expect("download");
        let text = String::from_utf8(out).expect("utf8");

        let saved = destination.join("good.mp3");
        assert!(text.starts_with(
            "Add to list: good.mp3\nAdd to list: bad.mp3\nTotal count: 2\nDownloading files...\nDownloading: good.mp3\n"
        ));
        assert!(text.contains(&format!(
            "Successfully downloaded \"Title good.mp3\" at \"{}\"\n",
            saved.display()
        )));
        assert!(text.contains("Downloading: bad.mp3\nCan't download file: bad.mp3\nBad request: FILE_ID_INVALID (code 400)\n"));
        assert!(text.ends_with("1 of 2 saved\n"));
        assert_eq!(std::fs::read_to_string(saved).expect("saved"), "abc");
    }

    #[tokio::test]
    async fn logout_ends_the_loop() {
        let (shell, gateway) = shell(FakeGateway::default());
        let (flow, _output) = run_script(&shell, "logout\ngetme\n").await;

        assert_eq!(flow, Flow::LoggedOut);
        assert_eq!(gateway.calls(), vec!["logOut".to_string()]);
    }

    #[test]
    fn interrupt_only_cancels_a_running_batch() {
        let interrupts = InterruptHandle::default();
        assert!(!interrupts.interrupt());

        let token = interrupts.begin();
        assert!(interrupts.interrupt());
        assert!(token.is_cancelled());

        interrupts.end();
        assert!(!interrupts.interrupt());
    }
}
