//! Server state: the connection registry, endpoint routing and per-player
//! state, plus every dispatch and propagation rule.
//!
//! [`ServerState`] is plain synchronous data. It is owned by exactly one
//! dispatch task, which feeds it [`ServerEvent`]s one at a time, so no
//! lock guards any of it. Work that has to wait (e.g. a session query)
//! runs elsewhere and comes back as a [`ServerEvent::Deferred`] closure.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::Duration;

use ghostnet_config::Config;
use ghostnet_net::{Connection, ConnectionError, ConnectionEvent, EventSink};
use ghostnet_proto::{Chat, Color, Frame, Head, PlayerStatus, ServerInfo, Update};
use tokio::sync::mpsc;

use crate::commands::{CommandEnv, CommandRegistry};
use crate::query::SessionQueries;

/// Tag of chat lines written by the server itself.
pub const SERVER_CHAT_TAG: &str = "server";

/// Work scheduled to run on the dispatch task.
pub type Deferred = Box<dyn FnOnce(&mut ServerState) + Send>;

/// Everything the dispatch task reacts to.
pub enum ServerEvent {
    /// A new connection to register.
    Accepted(Arc<dyn Connection>),
    /// Traffic or a disconnect on an existing connection.
    Connection(ConnectionEvent),
    /// A continuation to run against the state.
    Deferred(Deferred),
    /// Close every connection and stop dispatching.
    Shutdown,
}

impl From<ConnectionEvent> for ServerEvent {
    fn from(event: ConnectionEvent) -> Self {
        ServerEvent::Connection(event)
    }
}

impl fmt::Debug for ServerEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServerEvent::Accepted(conn) => f.debug_tuple("Accepted").field(conn).finish(),
            ServerEvent::Connection(event) => f.debug_tuple("Connection").field(event).finish(),
            ServerEvent::Deferred(_) => f.write_str("Deferred"),
            ServerEvent::Shutdown => f.write_str("Shutdown"),
        }
    }
}

/// Sending side of the dispatch task's queue.
#[derive(Debug, Clone)]
pub struct Mailbox {
    tx: mpsc::UnboundedSender<ServerEvent>,
}

impl Mailbox {
    pub fn channel() -> (Mailbox, mpsc::UnboundedReceiver<ServerEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Mailbox { tx }, rx)
    }

    /// Queues an event. Returns `false` once the dispatcher is gone.
    pub fn post(&self, event: ServerEvent) -> bool {
        self.tx.send(event).is_ok()
    }

    /// Queues a closure to run on the dispatch task.
    pub fn defer(&self, work: impl FnOnce(&mut ServerState) + Send + 'static) -> bool {
        self.post(ServerEvent::Deferred(Box::new(work)))
    }

    /// An [`EventSink`] feeding this mailbox, for connections.
    pub fn sink(&self) -> EventSink {
        EventSink::channel(self.tx.clone())
    }
}

/// The part of [`Config`] the dispatch logic needs.
#[derive(Debug, Clone, PartialEq)]
pub struct ServerSettings {
    /// Also send players their own status and updates.
    pub allow_loopback_ghost: bool,
    pub command_prefix: String,
    pub help_page_size: usize,
    /// Chat and emote text is cut to this many characters.
    pub max_text_length: usize,
    pub session_query_timeout: Duration,
    /// Icons listed by `help emote`.
    pub icons: Vec<String>,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

impl ServerSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            allow_loopback_ghost: config.server.allow_loopback_ghost,
            command_prefix: config.commands.prefix.clone(),
            help_page_size: config.commands.help_page_size.max(1),
            max_text_length: config.commands.max_text_length,
            session_query_timeout: config.server.session_query_timeout(),
            icons: config.emotes.icons(),
        }
    }
}

/// What the server knows about one player.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PlayerState {
    /// Last status the player sent.
    pub status: PlayerStatus,
    /// Sequence number of the last accepted update.
    pub update_index: u32,
    /// Last accepted update, if any since the last status.
    pub last_update: Option<Update>,
}

impl PlayerState {
    fn new(status: PlayerStatus) -> Self {
        Self {
            status,
            update_index: 0,
            last_update: None,
        }
    }
}

/// Registry, routing tables and player state of a running server.
pub struct ServerState {
    settings: ServerSettings,
    commands: Arc<CommandRegistry>,
    queries: SessionQueries,
    mailbox: Mailbox,
    /// Indexed by player id. Emptied on disconnect, never compacted.
    slots: Vec<Option<Arc<dyn Connection>>>,
    /// Management and bound update endpoints to player id.
    endpoints: HashMap<SocketAddr, u32>,
    /// Connections still waiting for their first update datagram, oldest first.
    pending: HashMap<IpAddr, VecDeque<u32>>,
    players: BTreeMap<u32, PlayerState>,
    next_chat_id: u32,
    /// Connections whose send failed, disconnected after the current event.
    failed: Vec<u32>,
}

impl fmt::Debug for ServerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerState")
            .field("connections", &self.live_ids().len())
            .field("players", &self.players.len())
            .field("pending", &self.pending)
            .finish()
    }
}

impl ServerState {
    pub fn new(settings: ServerSettings, commands: CommandRegistry, mailbox: Mailbox) -> Self {
        Self {
            settings,
            commands: Arc::new(commands),
            queries: SessionQueries::new(),
            mailbox,
            slots: Vec::new(),
            endpoints: HashMap::new(),
            pending: HashMap::new(),
            players: BTreeMap::new(),
            next_chat_id: 0,
            failed: Vec::new(),
        }
    }

    pub fn settings(&self) -> &ServerSettings {
        &self.settings
    }

    pub fn commands(&self) -> Arc<CommandRegistry> {
        Arc::clone(&self.commands)
    }

    pub fn queries(&self) -> &SessionQueries {
        &self.queries
    }

    pub fn mailbox(&self) -> &Mailbox {
        &self.mailbox
    }

    /// Number of ids handed out so far, live or not.
    pub fn assigned_ids(&self) -> usize {
        self.slots.len()
    }

    pub fn connection(&self, id: u32) -> Option<&Arc<dyn Connection>> {
        self.slots.get(id as usize).and_then(Option::as_ref)
    }

    /// Ids of every live connection, ascending.
    pub fn live_ids(&self) -> Vec<u32> {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.is_some())
            .map(|(id, _)| id as u32)
            .collect()
    }

    pub fn player(&self, id: u32) -> Option<&PlayerState> {
        self.players.get(&id)
    }

    /// Player id an endpoint routes to.
    pub fn id_of(&self, endpoint: SocketAddr) -> Option<u32> {
        self.endpoints.get(&endpoint).copied()
    }

    /// Whether `id` still waits for its update endpoint.
    pub fn is_pending(&self, id: u32) -> bool {
        self.pending.values().any(|queue| queue.contains(&id))
    }

    // -----------------------------------------------------------------------
    // Events
    // -----------------------------------------------------------------------

    /// Processes one event. Breaks after [`ServerEvent::Shutdown`].
    pub fn handle(&mut self, event: ServerEvent) -> ControlFlow<()> {
        match event {
            ServerEvent::Accepted(conn) => {
                self.accept(conn);
            }
            ServerEvent::Connection(ConnectionEvent::Management { endpoint, frame }) => {
                self.receive_management(endpoint, frame)
            }
            ServerEvent::Connection(ConnectionEvent::Update { source, frame }) => {
                self.receive_update(source, frame)
            }
            ServerEvent::Connection(ConnectionEvent::Disconnected { endpoint }) => {
                self.disconnect(endpoint)
            }
            ServerEvent::Deferred(work) => work(self),
            ServerEvent::Shutdown => {
                self.shutdown();
                return ControlFlow::Break(());
            }
        }
        self.reap();
        ControlFlow::Continue(())
    }

    /// Registers a new connection and sends it its handshake.
    ///
    /// Ids are assigned sequentially and never reused.
    pub fn accept(&mut self, conn: Arc<dyn Connection>) -> u32 {
        let id = self.slots.len() as u32;
        let endpoint = conn.management_endpoint();

        self.endpoints.insert(endpoint, id);
        match conn.update_endpoint() {
            Some(update) => {
                self.endpoints.insert(update, id);
            }
            None => self.queue_pending(id, endpoint.ip()),
        }
        self.slots.push(Some(conn));
        tracing::info!("Client #{id} ({endpoint}) accepted");

        let handshake = Frame::about(id).with_server_info(ServerInfo);
        self.send_management(id, &handshake);
        self.reap();
        id
    }

    /// Handles a frame from a management path.
    pub fn receive_management(&mut self, endpoint: SocketAddr, frame: Frame) {
        let Some((id, conn)) = self.resolve(endpoint) else {
            tracing::debug!("Frame from unknown endpoint {endpoint}, dropping");
            return;
        };

        self.rebind_on_management(id, &conn, frame.update.is_some());
        self.parse(id, frame);
        self.reap();
    }

    /// Handles a datagram from the update channel.
    pub fn receive_update(&mut self, source: SocketAddr, frame: Frame) {
        let id = match self.endpoints.get(&source).copied() {
            Some(id) => id,
            None => match self.take_pending(source) {
                Some(id) => id,
                None => {
                    tracing::debug!("Update from unknown source {source}, dropping");
                    return;
                }
            },
        };
        let Some(conn) = self.connection(id).cloned() else {
            return;
        };

        if conn.update_endpoint() != Some(source) {
            self.release_update_endpoint(id, conn.as_ref());
            conn.bind_update(source);
            self.endpoints.insert(source, id);
            self.dequeue_pending(id);
            tracing::debug!(
                "Mapped update endpoint of #{id} ({}, {source})",
                conn.management_endpoint()
            );
        }

        self.parse(id, frame);
        self.reap();
    }

    /// Handles the disconnect notification of a management endpoint.
    pub fn disconnect(&mut self, endpoint: SocketAddr) {
        match self.resolve(endpoint) {
            Some((id, conn)) if conn.management_endpoint() == endpoint => {
                self.disconnect_id(id);
                self.reap();
            }
            _ => tracing::trace!("{endpoint} already disconnected"),
        }
    }

    /// Removes connection `id` and tells everyone else it left.
    ///
    /// Returns `false` if there was no such connection.
    pub fn disconnect_id(&mut self, id: u32) -> bool {
        let Some(conn) = self.slots.get_mut(id as usize).and_then(Option::take) else {
            return false;
        };

        self.endpoints.retain(|_, owner| *owner != id);
        self.dequeue_pending(id);
        conn.unbind_update();
        self.players.remove(&id);
        self.queries.forget_target(id);
        self.failed.retain(|failed| *failed != id);
        conn.close();
        tracing::info!("Client #{id} ({}) disconnected", conn.management_endpoint());

        let departure = Frame::about(id).with_player(PlayerStatus::departure());
        for other in self.live_ids() {
            self.send_management(other, &departure);
        }
        true
    }

    /// Closes every connection and forgets all state.
    pub fn shutdown(&mut self) {
        self.queries.clear();
        let mut closed = 0;
        for slot in &mut self.slots {
            if let Some(conn) = slot.take() {
                conn.close();
                closed += 1;
            }
        }
        self.endpoints.clear();
        self.pending.clear();
        self.players.clear();
        self.failed.clear();
        tracing::info!("Closed {closed} connections");
    }

    // -----------------------------------------------------------------------
    // Parsing
    // -----------------------------------------------------------------------

    /// Dispatches a frame received from player `id`.
    ///
    /// The head is always replaced with `id` and a client-sent server info
    /// chunk is dropped. Chunks are cleaned up first, then propagated.
    pub fn parse(&mut self, id: u32, mut frame: Frame) {
        if self.connection(id).is_none() {
            return;
        }
        frame.head = Some(Head::new(id));
        frame.server_info = None;

        self.queries.resolve(id, &frame);

        let max = self.settings.max_text_length;
        if let Some(status) = frame.player.as_mut() {
            status.name = sanitize_name(&status.name, id);
        }
        if let Some(emote) = frame.emote.as_mut() {
            truncate_chars(&mut emote.value, max);
        }
        let command = self.take_command(id, &mut frame);

        if frame.player.is_some() {
            self.parse_status(id, &mut frame);
        }
        if frame.chat.is_some() || frame.emote.is_some() {
            self.propagate_management(&mut frame);
        }
        if frame.update.is_some() {
            self.parse_update(id, &mut frame);
        }

        if let Some(line) = command {
            self.run_command(id, &frame, &line);
        }
    }

    /// Splits a command line off the chat chunk, or stamps the chat for
    /// broadcast.
    fn take_command(&mut self, id: u32, frame: &mut Frame) -> Option<String> {
        let chat = frame.chat.take()?;
        let text = chat.text.trim();

        let prefix = self.settings.command_prefix.as_str();
        if !prefix.is_empty()
            && let Some(line) = text.strip_prefix(prefix)
        {
            return Some(line.to_string());
        }
        if text.is_empty() {
            return None;
        }

        let mut text = text.to_string();
        truncate_chars(&mut text, self.settings.max_text_length);
        let tag = self
            .players
            .get(&id)
            .map(|player| player.status.name.clone())
            .unwrap_or_else(|| format!("#{id}"));
        tracing::info!("#{id} {tag}: {text}");

        frame.chat = Some(Chat {
            id: self.next_chat_id(),
            tag,
            text,
            color: chat.color,
        });
        None
    }

    fn parse_status(&mut self, id: u32, frame: &mut Frame) {
        let Some(status) = frame.player.clone() else {
            return;
        };
        tracing::info!("#{id} {} in {} {}", status.name, status.sid, status.level);

        self.propagate_management(frame);

        let loopback = self.settings.allow_loopback_ghost;
        let known: Vec<Frame> = self
            .players
            .iter()
            .filter(|(other, _)| loopback || **other != id)
            .map(|(other, state)| Frame::about(*other).with_player(state.status.clone()))
            .collect();
        for known in &known {
            self.send_management(id, known);
        }

        self.players.insert(id, PlayerState::new(status));
    }

    fn parse_update(&mut self, id: u32, frame: &mut Frame) {
        let Some(update) = frame.update.as_ref() else {
            return;
        };
        let Some(player) = self.players.get_mut(&id) else {
            tracing::debug!("Update from #{id} before any status, dropping");
            return;
        };
        if update.update_index < player.update_index {
            tracing::trace!(
                "Stale update from #{id}: got {}, newest is {}",
                update.update_index,
                player.update_index
            );
            return;
        }

        player.update_index = update.update_index;
        player.last_update = Some(update.clone());
        let room = player.status.clone();
        self.propagate_update(id, frame, &room);
    }

    fn run_command(&mut self, id: u32, frame: &Frame, line: &str) {
        tracing::debug!("#{id} runs {line}");
        let commands = Arc::clone(&self.commands);
        let result = {
            let mut env = CommandEnv::new(self, id, frame);
            commands.execute(&mut env, line)
        };
        if let Err(e) = result {
            tracing::debug!("Command from #{id} failed: {e}");
            self.send_chat(id, e.to_string());
        }
    }

    // -----------------------------------------------------------------------
    // Propagation
    // -----------------------------------------------------------------------

    /// Sends `frame` to every connection, the sender included. Does nothing
    /// if the frame was already propagated.
    pub fn propagate_management(&mut self, frame: &mut Frame) {
        if !frame.mark_propagated() {
            return;
        }
        for id in self.live_ids() {
            self.send_management(id, frame);
        }
    }

    /// Sends `frame` to every other player in the same room as `room`.
    /// Does nothing if the frame was already propagated.
    ///
    /// Uses the update path where one is bound and falls back to the
    /// management path otherwise.
    pub fn propagate_update(&mut self, from: u32, frame: &mut Frame, room: &PlayerStatus) {
        if !frame.mark_propagated() {
            return;
        }

        let loopback = self.settings.allow_loopback_ghost;
        let targets: Vec<(u32, Arc<dyn Connection>)> = self
            .players
            .iter()
            .filter(|(id, player)| (loopback || **id != from) && player.status.same_room(room))
            .filter_map(|(id, _)| self.connection(*id).map(|conn| (*id, Arc::clone(conn))))
            .collect();

        for (id, conn) in targets {
            if conn.update_endpoint().is_none() {
                self.send_management(id, frame);
                continue;
            }
            match conn.send_update(frame) {
                Ok(()) => {}
                Err(ConnectionError::NoUpdatePath) => {
                    self.send_management(id, frame);
                }
                Err(e) => tracing::debug!("Update to #{id} dropped: {e}"),
            }
        }
    }

    // -----------------------------------------------------------------------
    // Sending
    // -----------------------------------------------------------------------

    /// Sends a frame on the management path of `id`.
    ///
    /// A failed send marks the connection for disconnection; returns
    /// whether the frame was handed off.
    pub fn send_management(&mut self, id: u32, frame: &Frame) -> bool {
        let Some(conn) = self.connection(id) else {
            return false;
        };
        match conn.send_management(frame) {
            Ok(()) => true,
            Err(e @ ConnectionError::TooLarge { .. }) => {
                tracing::warn!("Not sending to #{id}: {e}");
                false
            }
            Err(e) => {
                tracing::warn!("Send to #{id} failed: {e}");
                self.failed.push(id);
                false
            }
        }
    }

    /// Sends a server chat line to `id` alone. Returns the chunk so it can
    /// be edited and re-sent.
    pub fn send_chat(&mut self, id: u32, text: impl Into<String>) -> Chat {
        let chat = self.server_chat(text);
        self.resend_chat(id, &chat);
        chat
    }

    /// Sends `chat` to `id` again, replacing the line with the same id.
    pub fn resend_chat(&mut self, id: u32, chat: &Chat) {
        let frame = Frame::about(id).with_chat(chat.clone());
        self.send_management(id, &frame);
    }

    /// Sends a server chat line to everyone, on behalf of player `from`.
    pub fn broadcast_chat(&mut self, from: u32, text: impl Into<String>) -> Chat {
        let chat = self.server_chat(text);
        let mut frame = Frame::about(from).with_chat(chat.clone());
        self.propagate_management(&mut frame);
        chat
    }

    fn server_chat(&mut self, text: impl Into<String>) -> Chat {
        Chat {
            id: self.next_chat_id(),
            tag: SERVER_CHAT_TAG.to_string(),
            text: text.into(),
            color: Color::WHITE,
        }
    }

    fn next_chat_id(&mut self) -> u32 {
        let id = self.next_chat_id;
        self.next_chat_id = self.next_chat_id.wrapping_add(1);
        id
    }

    fn reap(&mut self) {
        while let Some(id) = self.failed.pop() {
            self.disconnect_id(id);
        }
    }

    // -----------------------------------------------------------------------
    // Update endpoint binding
    // -----------------------------------------------------------------------

    fn resolve(&self, endpoint: SocketAddr) -> Option<(u32, Arc<dyn Connection>)> {
        let id = self.id_of(endpoint)?;
        self.connection(id).map(|conn| (id, Arc::clone(conn)))
    }

    /// A management frame carrying an update means the client moved its
    /// updates onto the management path; one without means its update path
    /// may have restarted. Either way a separate binding is dropped, and in
    /// the second case the client waits for a fresh one.
    fn rebind_on_management(&mut self, id: u32, conn: &Arc<dyn Connection>, carries_update: bool) {
        let management = conn.management_endpoint();
        match conn.update_endpoint() {
            // Shares the management address; nothing to rebind.
            Some(update) if update == management => {}
            Some(_) => {
                self.release_update_endpoint(id, conn.as_ref());
                if !carries_update {
                    self.queue_pending(id, management.ip());
                }
            }
            None if carries_update => self.dequeue_pending(id),
            None => self.queue_pending(id, management.ip()),
        }
    }

    fn release_update_endpoint(&mut self, id: u32, conn: &dyn Connection) {
        let Some(old) = conn.unbind_update() else {
            return;
        };
        if old != conn.management_endpoint() && self.endpoints.get(&old) == Some(&id) {
            self.endpoints.remove(&old);
            tracing::debug!("Released update endpoint {old} of #{id}");
        }
    }

    fn queue_pending(&mut self, id: u32, ip: IpAddr) {
        let queue = self.pending.entry(ip).or_default();
        if !queue.contains(&id) {
            queue.push_back(id);
        }
    }

    fn dequeue_pending(&mut self, id: u32) {
        self.pending.retain(|_, queue| {
            queue.retain(|pending| *pending != id);
            !queue.is_empty()
        });
    }

    /// Takes the oldest pending connection from the address of `source`.
    fn take_pending(&mut self, source: SocketAddr) -> Option<u32> {
        let queue = self.pending.get_mut(&source.ip())?;
        let id = queue.pop_front();
        if queue.is_empty() {
            self.pending.remove(&source.ip());
        }
        id
    }
}

/// Strips characters that would break chat or name rendering and falls back
/// to `#id` for blank names.
pub fn sanitize_name(name: &str, id: u32) -> String {
    let cleaned: String = name
        .chars()
        .filter(|c| *c != '*' && !c.is_control() && !is_format_char(*c))
        .collect();
    let trimmed = cleaned.trim();
    if trimmed.is_empty() {
        format!("#{id}")
    } else {
        trimmed.to_string()
    }
}

/// Invisible formatting characters: zero-width marks, bidi controls and
/// the byte order mark.
fn is_format_char(c: char) -> bool {
    matches!(
        c,
        '\u{00AD}'
            | '\u{061C}'
            | '\u{180E}'
            | '\u{200B}'..='\u{200F}'
            | '\u{202A}'..='\u{202E}'
            | '\u{2060}'..='\u{2064}'
            | '\u{2066}'..='\u{206F}'
            | '\u{FEFF}'
    )
}

/// Cuts `text` to at most `max` characters.
pub fn truncate_chars(text: &mut String, max: usize) {
    if let Some((index, _)) = text.char_indices().nth(max) {
        text.truncate(index);
    }
}
