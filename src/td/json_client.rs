//! Gateway over TDLib's JSON interface (`libtdjson`).
//!
//! One receiver thread drains `td_receive`. Answers carry the `@extra` id of the request
//! and are handed to the waiting caller; everything else is an update and goes to the
//! update channel in delivery order.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tracing::{trace, warn};

use crate::td::gateway::GatewayError;
use crate::td::types::{AuthorizationState, TdError, Update};

/// What the receiver should do after routing one incoming object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Routed {
    Response,
    Update,
    Closed,
    Ignored,
}

/// Matches TDLib answers to outstanding requests and forwards updates.
#[derive(Clone)]
pub struct ResponseRouter {
    client_id: i32,
    pending: Arc<Mutex<HashMap<u64, oneshot::Sender<Value>>>>,
    updates: mpsc::UnboundedSender<Update>,
}

impl ResponseRouter {
    pub fn new(client_id: i32, updates: mpsc::UnboundedSender<Update>) -> Self {
        Self {
            client_id,
            pending: Arc::default(),
            updates,
        }
    }

    pub fn register(&self, extra: u64) -> oneshot::Receiver<Value> {
        let (tx, rx) = oneshot::channel();
        self.lock().insert(extra, tx);
        rx
    }

    pub fn forget(&self, extra: u64) {
        self.lock().remove(&extra);
    }

    /// Drops every outstanding request so its caller sees `GatewayError::Closed`.
    pub fn fail_pending(&self) {
        self.lock().clear();
    }

    pub fn route(&self, raw: &str) -> Result<Routed, GatewayError> {
        let value: Value = serde_json::from_str(raw)?;

        if let Some(client_id) = value.get("@client_id").and_then(Value::as_i64) {
            if client_id != i64::from(self.client_id) {
                return Ok(Routed::Ignored);
            }
        }

        if let Some(extra) = value.get("@extra").and_then(Value::as_u64) {
            let waiter = self.lock().remove(&extra);
            return match waiter {
                Some(waiter) => {
                    // The caller may have given up; nothing to do then.
                    let _ = waiter.send(value);
                    Ok(Routed::Response)
                }
                None => {
                    trace!(extra, "response without a waiting request");
                    Ok(Routed::Ignored)
                }
            };
        }

        let update: Update = serde_json::from_value(value)?;
        let closed = matches!(
            &update,
            Update::UpdateAuthorizationState {
                authorization_state: AuthorizationState::AuthorizationStateClosed
            }
        );
        if self.updates.send(update).is_err() {
            warn!("update channel closed; dropping update");
        }
        Ok(if closed { Routed::Closed } else { Routed::Update })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<u64, oneshot::Sender<Value>>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Turns a TDLib answer into `T`, or the TDLib `error` object into a `GatewayError`.
pub fn decode_response<T: DeserializeOwned>(value: Value) -> Result<T, GatewayError> {
    match value.get("@type").and_then(Value::as_str) {
        Some("error") => {
            let error: TdError = serde_json::from_value(value)?;
            Err(error.into())
        }
        Some(_) => Ok(serde_json::from_value(value)?),
        None => Err(GatewayError::Unexpected(value.to_string())),
    }
}

/// Accepts TDLib's `ok` (or any object) for calls whose answer carries no data.
pub fn decode_ok(value: Value) -> Result<(), GatewayError> {
    decode_response::<Value>(value).map(|_| ())
}

#[cfg(feature = "tdjson")]
pub use self::native::TdJsonClient;

#[cfg(feature = "tdjson")]
mod native {
    use std::ffi::{CStr, CString, c_char, c_double, c_int};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
    use std::thread;

    use async_trait::async_trait;
    use serde::de::DeserializeOwned;
    use serde_json::{Value, json};
    use tokio::sync::mpsc;
    use tracing::{debug, warn};

    use super::{ResponseRouter, Routed, decode_ok, decode_response};
    use crate::td::gateway::{Gateway, GatewayError};
    use crate::td::types::{Chat, Chats, File, Messages, TdlibParameters, Update, User};

    #[link(name = "tdjson")]
    unsafe extern "C" {
        fn td_create_client_id() -> c_int;
        fn td_send(client_id: c_int, request: *const c_char);
        fn td_receive(timeout: c_double) -> *const c_char;
        fn td_execute(request: *const c_char) -> *const c_char;
    }

    const RECEIVE_TIMEOUT_SECS: f64 = 1.0;

    pub struct TdJsonClient {
        client_id: c_int,
        router: ResponseRouter,
        next_extra: AtomicU64,
        running: Arc<AtomicBool>,
    }

    impl TdJsonClient {
        /// Creates the TDLib client and starts the receiver thread.
        pub fn start(log_verbosity: i32) -> Result<(Self, mpsc::UnboundedReceiver<Update>), GatewayError> {
            execute_sync(&json!({
                "@type": "setLogVerbosityLevel",
                "new_verbosity_level": log_verbosity,
            }))?;

            // SAFETY: plain constructor call with no arguments.
            let client_id = unsafe { td_create_client_id() };
            let (updates_tx, updates_rx) = mpsc::unbounded_channel();
            let router = ResponseRouter::new(client_id, updates_tx);
            let running = Arc::new(AtomicBool::new(true));

            {
                let router = router.clone();
                let running = running.clone();
                thread::Builder::new()
                    .name("tdjson-receive".to_string())
                    .spawn(move || receive_loop(router, running))
                    .map_err(|err| GatewayError::Unexpected(format!("spawn receiver: {err}")))?;
            }

            let client = Self {
                client_id,
                router,
                next_extra: AtomicU64::new(1),
                running,
            };
            // TDLib stays idle until the first request for a new client id.
            client.send(&json!({ "@type": "getOption", "name": "version" }))?;
            Ok((client, updates_rx))
        }

        async fn execute<T: DeserializeOwned>(&self, request: Value) -> Result<T, GatewayError> {
            let response = self.call(request).await?;
            decode_response(response)
        }

        async fn execute_ok(&self, request: Value) -> Result<(), GatewayError> {
            let response = self.call(request).await?;
            decode_ok(response)
        }

        async fn call(&self, mut request: Value) -> Result<Value, GatewayError> {
            if !self.running.load(Ordering::Acquire) {
                return Err(GatewayError::Closed);
            }
            let extra = self.next_extra.fetch_add(1, Ordering::Relaxed);
            let Some(object) = request.as_object_mut() else {
                return Err(GatewayError::Unexpected("request must be an object".to_string()));
            };
            object.insert("@extra".to_string(), json!(extra));

            let answer = self.router.register(extra);
            if let Err(err) = self.send(&request) {
                self.router.forget(extra);
                return Err(err);
            }
            answer.await.map_err(|_| GatewayError::Closed)
        }

        fn send(&self, request: &Value) -> Result<(), GatewayError> {
            let payload = CString::new(serde_json::to_string(request)?)
                .map_err(|err| GatewayError::Unexpected(err.to_string()))?;
            // SAFETY: `payload` is a valid NUL-terminated string that outlives the call;
            // TDLib copies it before returning.
            unsafe { td_send(self.client_id, payload.as_ptr()) };
            Ok(())
        }
    }

    impl Drop for TdJsonClient {
        fn drop(&mut self) {
            self.running.store(false, Ordering::Release);
        }
    }

    fn execute_sync(request: &Value) -> Result<(), GatewayError> {
        let payload = CString::new(serde_json::to_string(request)?)
            .map_err(|err| GatewayError::Unexpected(err.to_string()))?;
        // SAFETY: synchronous TDLib call; the result buffer is only read before the next
        // `td_execute` on this thread, and we read nothing from it here.
        unsafe { td_execute(payload.as_ptr()) };
        Ok(())
    }

    fn receive_loop(router: ResponseRouter, running: Arc<AtomicBool>) {
        while running.load(Ordering::Acquire) {
            // SAFETY: this thread is the only caller of `td_receive`; the returned buffer
            // stays valid until the next call, and it is copied out immediately.
            let raw = unsafe { td_receive(RECEIVE_TIMEOUT_SECS) };
            if raw.is_null() {
                continue;
            }
            // SAFETY: non-null pointers from `td_receive` point at NUL-terminated JSON.
            let text = unsafe { CStr::from_ptr(raw) }.to_string_lossy().into_owned();
            match router.route(&text) {
                Ok(Routed::Closed) => {
                    debug!("tdlib client closed");
                    break;
                }
                Ok(_) => {}
                Err(err) => warn!(error = %err, "failed to route tdlib object"),
            }
        }
        running.store(false, Ordering::Release);
        router.fail_pending();
    }

    #[async_trait]
    impl Gateway for TdJsonClient {
        async fn set_tdlib_parameters(&self, parameters: &TdlibParameters) -> Result<(), GatewayError> {
            let mut request = serde_json::to_value(parameters)?;
            if let Some(object) = request.as_object_mut() {
                object.insert("@type".to_string(), json!("setTdlibParameters"));
            }
            self.execute_ok(request).await
        }

        async fn set_authentication_phone_number(&self, phone_number: &str) -> Result<(), GatewayError> {
            self.execute_ok(json!({
                "@type": "setAuthenticationPhoneNumber",
                "phone_number": phone_number,
            }))
            .await
        }

        async fn check_authentication_code(&self, code: &str) -> Result<(), GatewayError> {
            self.execute_ok(json!({ "@type": "checkAuthenticationCode", "code": code }))
                .await
        }

        async fn check_authentication_password(&self, password: &str) -> Result<(), GatewayError> {
            self.execute_ok(json!({ "@type": "checkAuthenticationPassword", "password": password }))
                .await
        }

        async fn get_me(&self) -> Result<User, GatewayError> {
            self.execute(json!({ "@type": "getMe" })).await
        }

        async fn get_user(&self, user_id: i64) -> Result<User, GatewayError> {
            self.execute(json!({ "@type": "getUser", "user_id": user_id })).await
        }

        async fn get_chats(&self, limit: i32) -> Result<Chats, GatewayError> {
            self.execute(json!({ "@type": "getChats", "limit": limit })).await
        }

        async fn get_chat(&self, chat_id: i64) -> Result<Chat, GatewayError> {
            self.execute(json!({ "@type": "getChat", "chat_id": chat_id })).await
        }

        async fn get_chat_history(
            &self,
            chat_id: i64,
            from_message_id: i64,
            limit: i32,
        ) -> Result<Messages, GatewayError> {
            self.execute(json!({
                "@type": "getChatHistory",
                "chat_id": chat_id,
                "from_message_id": from_message_id,
                "offset": 0,
                "limit": limit,
                "only_local": false,
            }))
            .await
        }

        async fn download_file(&self, file_id: i32, priority: i32) -> Result<File, GatewayError> {
            self.execute(json!({
                "@type": "downloadFile",
                "file_id": file_id,
                "priority": priority,
                "offset": 0,
                "limit": 0,
                "synchronous": false,
            }))
            .await
        }

        async fn cancel_download_file(&self, file_id: i32) -> Result<(), GatewayError> {
            self.execute_ok(json!({
                "@type": "cancelDownloadFile",
                "file_id": file_id,
                "only_if_pending": false,
            }))
            .await
        }

        async fn log_out(&self) -> Result<(), GatewayError> {
            self.execute_ok(json!({ "@type": "logOut" })).await
        }

        async fn close(&self) -> Result<(), GatewayError> {
            self.execute_ok(json!({ "@type": "close" })).await
        }
    }
}
