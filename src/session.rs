//! State shared between the update dispatcher and the command flow.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::sync::{mpsc, watch};

use crate::td::types::File;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthState {
    AwaitingParameters,
    AwaitingPhoneNumber,
    AwaitingCode,
    AwaitingPassword,
    Ready,
    Closed,
}

/// What the operator has to do before the client is usable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AuthRequirement {
    pub interactive: bool,
    pub password: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Gate {
    Pending,
    Open(AuthRequirement),
    Closed,
}

pub struct Session {
    state: watch::Sender<AuthState>,
    gate: watch::Sender<Gate>,
    password_required: AtomicBool,
    files: FileWatchers,
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl Session {
    pub fn new() -> Self {
        let (state, _) = watch::channel(AuthState::AwaitingParameters);
        let (gate, _) = watch::channel(Gate::Pending);
        Self {
            state,
            gate,
            password_required: AtomicBool::new(false),
            files: FileWatchers::default(),
        }
    }

    pub fn auth_state(&self) -> AuthState {
        *self.state.borrow()
    }

    pub fn set_auth_state(&self, state: AuthState) {
        self.state.send_replace(state);
    }

    pub fn mark_password_required(&self) {
        self.password_required.store(true, Ordering::Release);
    }

    pub fn password_required(&self) -> bool {
        self.password_required.load(Ordering::Acquire)
    }

    /// Opens the readiness gate. Only the first call has any effect; returns whether this
    /// call was the one that opened it.
    pub fn release(&self, requirement: AuthRequirement) -> bool {
        self.gate.send_if_modified(|gate| {
            if *gate == Gate::Pending {
                *gate = Gate::Open(requirement);
                true
            } else {
                false
            }
        })
    }

    pub fn is_released(&self) -> bool {
        matches!(*self.gate.borrow(), Gate::Open(_))
    }

    /// The client is gone: fail anyone still waiting on the gate or on a file.
    pub fn close(&self) {
        self.set_auth_state(AuthState::Closed);
        self.gate.send_if_modified(|gate| {
            if *gate == Gate::Pending {
                *gate = Gate::Closed;
                true
            } else {
                false
            }
        });
        self.files.close_all();
    }

    /// Blocks until the gate opens. `None` means the client closed first.
    pub async fn wait_ready(&self) -> Option<AuthRequirement> {
        let mut gate = self.gate.subscribe();
        let current = match gate.wait_for(|gate| *gate != Gate::Pending).await {
            Ok(current) => *current,
            Err(_) => return None,
        };
        match current {
            Gate::Open(requirement) => Some(requirement),
            Gate::Pending | Gate::Closed => None,
        }
    }

    /// Waits until the authorization state satisfies `predicate` and returns it.
    pub async fn wait_for_state(&self, predicate: impl FnMut(&AuthState) -> bool) -> AuthState {
        let mut state = self.state.subscribe();
        match state.wait_for(predicate).await {
            Ok(current) => *current,
            Err(_) => AuthState::Closed,
        }
    }

    pub fn files(&self) -> &FileWatchers {
        &self.files
    }
}

type Subscribers = HashMap<i32, Vec<(u64, mpsc::UnboundedSender<File>)>>;

/// File update subscribers keyed by TDLib file id.
#[derive(Default)]
pub struct FileWatchers {
    next_key: AtomicU64,
    closed: AtomicBool,
    subscribers: Mutex<Subscribers>,
}

impl FileWatchers {
    /// Registers interest in updates for `file_id`. Subscribe before triggering the
    /// download so no update can slip past.
    pub fn subscribe(&self, file_id: i32) -> FileSubscription<'_> {
        let key = self.next_key.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();
        if !self.closed.load(Ordering::Acquire) {
            self.lock().entry(file_id).or_default().push((key, tx));
        }
        FileSubscription {
            watchers: self,
            file_id,
            key,
            updates: rx,
        }
    }

    /// Hands `file` to everyone watching its id; returns how many received it.
    pub fn notify(&self, file: &File) -> usize {
        let mut subscribers = self.lock();
        let Some(entries) = subscribers.get_mut(&file.id) else {
            return 0;
        };
        entries.retain(|(_, tx)| tx.send(file.clone()).is_ok());
        let delivered = entries.len();
        if entries.is_empty() {
            subscribers.remove(&file.id);
        }
        delivered
    }

    pub fn close_all(&self) {
        self.closed.store(true, Ordering::Release);
        self.lock().clear();
    }

    fn unsubscribe(&self, file_id: i32, key: u64) {
        let mut subscribers = self.lock();
        if let Some(entries) = subscribers.get_mut(&file_id) {
            entries.retain(|(entry_key, _)| *entry_key != key);
            if entries.is_empty() {
                subscribers.remove(&file_id);
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, Subscribers> {
        self.subscribers.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

pub struct FileSubscription<'a> {
    watchers: &'a FileWatchers,
    file_id: i32,
    key: u64,
    updates: mpsc::UnboundedReceiver<File>,
}

impl FileSubscription<'_> {
    pub fn file_id(&self) -> i32 {
        self.file_id
    }

    /// Next update for this file; `None` once the client has closed.
    pub async fn next(&mut self) -> Option<File> {
        self.updates.recv().await
    }
}

impl Drop for FileSubscription<'_> {
    fn drop(&mut self) {
        self.watchers.unsubscribe(self.file_id, self.key);
    }
}
