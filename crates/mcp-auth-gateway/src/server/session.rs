//! Session registry for the stateful MCP transport.
//!
//! Implements the "Mailbox" pattern:
//! - Each session owns a channel plus a ring buffer of outgoing events
//! - Last-Event-ID support for reconnection recovery
//! - Broadcast channels for live event delivery
//! - Background cleanup of idle sessions
//!
//! The map lock is a `std::sync::RwLock` held only for short, non-async
//! sections, so closing a session can deregister it synchronously.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock, Weak};
use std::time::{Duration, Instant};

use axum::response::sse::Event;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use super::channel::McpChannel;
use super::jsonrpc::{JsonRpcRequest, JsonRpcResponse};
use crate::client::BearerAuthResult;
use crate::error::SessionError;
use crate::tools::ToolRegistry;

/// A buffered SSE event with ID for replay support.
#[derive(Clone, Debug)]
pub struct BufferedEvent {
    /// Event ID, strictly increasing per session and starting at 1.
    pub id: u64,
    /// Event type (e.g., "message").
    pub event_type: String,
    /// JSON payload.
    pub data: String,
    /// Timestamp when event was created.
    pub created_at: Instant,
}

impl BufferedEvent {
    /// Convert to an Axum SSE Event.
    #[must_use]
    pub fn to_sse_event(&self) -> Event {
        Event::default().id(self.id.to_string()).event(self.event_type.clone()).data(self.data.clone())
    }
}

/// Bounded in-memory event log with live fan-out.
pub struct EventStore {
    tx: broadcast::Sender<BufferedEvent>,
    history: Mutex<VecDeque<BufferedEvent>>,
    next_event_id: AtomicU64,
    capacity: usize,
}

impl EventStore {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (tx, _) = broadcast::channel(64);
        Self {
            tx,
            history: Mutex::new(VecDeque::with_capacity(capacity)),
            next_event_id: AtomicU64::new(1),
            capacity,
        }
    }

    /// Append an event (stores in history and broadcasts). Returns its id.
    pub fn push(&self, event_type: impl Into<String>, data: impl Into<String>) -> u64 {
        let mut history = self.history.lock().unwrap_or_else(PoisonError::into_inner);

        // Id assignment and insertion share the lock so history stays ordered.
        let id = self.next_event_id.fetch_add(1, Ordering::SeqCst);
        let event = BufferedEvent { id, event_type: event_type.into(), data: data.into(), created_at: Instant::now() };

        if history.len() >= self.capacity {
            history.pop_front();
        }
        history.push_back(event.clone());
        drop(history);

        // No subscribers is fine; the event is still replayable.
        let _ = self.tx.send(event);
        id
    }

    /// Events with an id greater than `last_event_id`, oldest first.
    #[must_use]
    pub fn events_after(&self, last_event_id: u64) -> Vec<BufferedEvent> {
        let history = self.history.lock().unwrap_or_else(PoisonError::into_inner);
        history.iter().filter(|e| e.id > last_event_id).cloned().collect()
    }

    /// Subscribe to live events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<BufferedEvent> {
        self.tx.subscribe()
    }

    /// Id the next event will get.
    #[must_use]
    pub fn next_event_id(&self) -> u64 {
        self.next_event_id.load(Ordering::SeqCst)
    }
}

type CloseHook = Box<dyn FnOnce(&str) + Send>;

/// A single MCP session.
pub struct Session {
    /// Unique session identifier.
    pub id: String,
    /// Authenticated principal that created the session.
    pub owner: Option<String>,
    /// Protocol handler.
    pub channel: McpChannel,
    /// Outgoing events for SSE delivery and replay.
    pub events: EventStore,
    /// When the session was created.
    pub created_at: Instant,
    last_active: Mutex<Instant>,
    closed: AtomicBool,
    on_close: Mutex<Option<CloseHook>>,
}

impl Session {
    fn new(id: String, owner: Option<String>, tools: Arc<ToolRegistry>, event_history: usize) -> Self {
        Self {
            channel: McpChannel::new(Some(id.clone()), tools),
            id,
            owner,
            events: EventStore::new(event_history),
            created_at: Instant::now(),
            last_active: Mutex::new(Instant::now()),
            closed: AtomicBool::new(false),
            on_close: Mutex::new(None),
        }
    }

    /// Handle a message and record the response as an event.
    pub async fn handle(&self, request: JsonRpcRequest, auth: Option<&BearerAuthResult>) -> Option<JsonRpcResponse> {
        self.touch();
        let response = self.channel.handle(request, auth).await;
        if let Some(response) = &response {
            match serde_json::to_string(response) {
                Ok(data) => {
                    self.events.push("message", data);
                }
                Err(e) => tracing::error!(session_id = %self.id, error = %e, "Failed to record response event"),
            }
        }
        response
    }

    /// Update last activity timestamp.
    pub fn touch(&self) {
        *self.last_active.lock().unwrap_or_else(PoisonError::into_inner) = Instant::now();
    }

    /// Check if session has been idle longer than `timeout`.
    #[must_use]
    pub fn is_stale(&self, timeout: Duration) -> bool {
        self.last_active.lock().unwrap_or_else(PoisonError::into_inner).elapsed() > timeout
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Close the session. The close hook runs once, before this returns.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let hook = self.on_close.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(hook) = hook {
            hook(&self.id);
        }
        tracing::info!(session_id = %self.id, "Session closed");
    }

    fn set_close_hook(&self, hook: CloseHook) {
        *self.on_close.lock().unwrap_or_else(PoisonError::into_inner) = Some(hook);
    }

    fn owned_by(&self, owner: Option<&str>) -> bool {
        self.owner.as_deref() == owner
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("owner", &self.owner)
            .field("next_event_id", &self.events.next_event_id())
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Result of a dispatched message.
#[derive(Debug)]
pub struct Dispatched {
    /// Session the message ran on; `None` if initialization failed.
    pub session_id: Option<String>,
    /// Response, `None` for notifications.
    pub response: Option<JsonRpcResponse>,
}

type SessionMap = RwLock<HashMap<String, Arc<Session>>>;

/// Maps session ids to live sessions.
pub struct SessionRegistry {
    sessions: Arc<SessionMap>,
    tools: Arc<ToolRegistry>,
    event_history: usize,
    idle_timeout: Duration,
}

impl SessionRegistry {
    /// Create a new session registry.
    #[must_use]
    pub fn new(tools: Arc<ToolRegistry>, event_history: usize, idle_timeout: Duration) -> Self {
        Self { sessions: Arc::new(RwLock::new(HashMap::new())), tools, event_history, idle_timeout }
    }

    /// Route a message to its session, creating one for `initialize`.
    ///
    /// `owner` is the authenticated principal; sessions owned by someone else
    /// are reported as unknown.
    ///
    /// # Errors
    ///
    /// `UnknownSession` for an unknown, closed or foreign id;
    /// `InvalidSessionRequest` when no id is given and the message is not
    /// `initialize`.
    pub async fn dispatch(
        &self,
        session_id: Option<&str>,
        auth: Option<&BearerAuthResult>,
        request: JsonRpcRequest,
    ) -> Result<Dispatched, SessionError> {
        let owner = auth.and_then(BearerAuthResult::owner);

        if let Some(id) = session_id {
            let session = self.get(id, owner)?;
            let response = session.handle(request, auth).await;
            return Ok(Dispatched { session_id: Some(session.id.clone()), response });
        }

        if !request.is_initialize() {
            return Err(SessionError::InvalidSessionRequest);
        }

        let session = self.create(owner);
        let response = session.handle(request, auth).await;

        if response.as_ref().is_none_or(JsonRpcResponse::is_error) {
            tracing::warn!(session_id = %session.id, "Initialization failed, discarding session");
            session.close();
            return Ok(Dispatched { session_id: None, response });
        }

        Ok(Dispatched { session_id: Some(session.id.clone()), response })
    }

    /// Register a fresh session. It is visible to lookups before its first
    /// message is handled.
    fn create(&self, owner: Option<&str>) -> Arc<Session> {
        let id = uuid::Uuid::new_v4().to_string();
        let session =
            Arc::new(Session::new(id.clone(), owner.map(str::to_owned), Arc::clone(&self.tools), self.event_history));

        let map: Weak<SessionMap> = Arc::downgrade(&self.sessions);
        session.set_close_hook(Box::new(move |id| {
            if let Some(map) = map.upgrade() {
                map.write().unwrap_or_else(PoisonError::into_inner).remove(id);
            }
        }));

        self.sessions.write().unwrap_or_else(PoisonError::into_inner).insert(id, Arc::clone(&session));

        tracing::info!(session_id = %session.id, "Created new session");
        session
    }

    /// Look up a session visible to `owner`.
    ///
    /// # Errors
    ///
    /// `UnknownSession` if it does not exist or belongs to someone else.
    pub fn get(&self, id: &str, owner: Option<&str>) -> Result<Arc<Session>, SessionError> {
        let session = self
            .sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
            .ok_or(SessionError::UnknownSession)?;

        if session.is_closed() || !session.owned_by(owner) {
            return Err(SessionError::UnknownSession);
        }
        Ok(session)
    }

    /// Close a session. Unknown ids are a no-op.
    pub fn close(&self, id: &str) -> bool {
        let session = self.sessions.read().unwrap_or_else(PoisonError::into_inner).get(id).cloned();
        match session {
            Some(session) => {
                session.close();
                true
            }
            None => false,
        }
    }

    /// Number of live sessions.
    #[must_use]
    pub fn session_count(&self) -> usize {
        self.sessions.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Close sessions idle longer than the configured timeout.
    pub fn sweep_stale(&self) -> usize {
        let stale: Vec<Arc<Session>> = self
            .sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .filter(|s| s.is_stale(self.idle_timeout))
            .cloned()
            .collect();

        for session in &stale {
            session.close();
        }
        if !stale.is_empty() {
            tracing::info!(count = stale.len(), "Cleaned up stale sessions");
        }
        stale.len()
    }

    /// Start background cleanup task for stale sessions.
    pub fn start_cleanup_task(self: Arc<Self>, interval: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(interval);
            loop {
                interval.tick().await;
                self.sweep_stale();
            }
        })
    }
}

impl std::fmt::Debug for SessionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionRegistry").field("sessions", &self.session_count()).finish()
    }
}
