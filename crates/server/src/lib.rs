//! Spotdiff Match Server
//!
//! The engine mediates between transport connections and running game
//! sessions. It owns:
//! - The browse group and room announcements
//! - Versus matchmaking and the co-op survival queue
//! - Session launch: catalog fetches, seating, task spawning
//! - The connection registry and username probes
//!
//! # Architecture
//!
//! All lobby and matchmaking state lives behind one mailbox-driven
//! actor, so its mutations are serialized without locks. Each launched
//! session runs as its own task (see [`dispatcher`]) and reports
//! membership changes back through the same mailbox. The transport
//! layer is out of scope: a frontend registers every connection with an
//! [`EventSender`] and forwards decoded [`ClientCommand`]s.

#![deny(unsafe_code)]

pub mod catalog;
mod classic;
pub mod dispatcher;
pub mod matchmaker;
pub mod session;
mod timed;

use std::collections::{HashMap, HashSet};
use std::ops::RangeInclusive;
use std::sync::Arc;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use spotdiff_archive::ArchiveSink;
use spotdiff_game::{GameMode, Pixel, Seconds, TitleDeck};
use spotdiff_wire::{self as wire, ClientCommand, ConnectionId, ServerEvent};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use catalog::CatalogSource;
use dispatcher::{EventSender, Outbox, SessionDeps, SessionMsg, SessionTask, spawn_session};
use matchmaker::{Matchmaker, Notice, Player, Recipient, VersusLaunch};
use session::{RoomId, SessionState};

// ============================================================================
// Default Parameters
// ============================================================================

/// Session clock cadence.
pub const TICK_INTERVAL: Duration = Duration::from_secs(1);

/// Classic-mode clue cost, in seconds added to the count-up clock.
pub const CLUE_PENALTY_SECS: Seconds = 5.0;

/// Survival-mode starting time budget.
pub const TIMED_INITIAL_SECS: Seconds = 60.0;

/// Survival-mode clue cost, in seconds deducted from the budget.
pub const TIMED_PENALTY_SECS: Seconds = 5.0;

/// Survival-mode bonus granted per solved sheet.
pub const TIMED_BONUS_SECS: Seconds = 10.0;

/// Accepted range for the survival starting budget, whole seconds.
const TIMED_INITIAL_RANGE: RangeInclusive<u32> = 30..=120;

/// Accepted range for survival penalty and bonus, whole seconds.
const TIMED_ADJUST_RANGE: RangeInclusive<u32> = 0..=30;

// ============================================================================
// Configuration
// ============================================================================

/// Survival-mode timing, in seconds. One copy lives in the engine and
/// is stamped into each session at launch; a runtime change never
/// touches sessions already running.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimedSettings {
    pub initial: Seconds,
    pub penalty: Seconds,
    pub bonus: Seconds,
}

impl Default for TimedSettings {
    fn default() -> Self {
        Self {
            initial: TIMED_INITIAL_SECS,
            penalty: TIMED_PENALTY_SECS,
            bonus: TIMED_BONUS_SECS,
        }
    }
}

impl TimedSettings {
    /// Validate a requested change. `None` means out of range.
    fn from_wire(change: &wire::ChangeSettings) -> Option<Self> {
        if !TIMED_INITIAL_RANGE.contains(&change.initial_seconds) {
            return None;
        }
        if !TIMED_ADJUST_RANGE.contains(&change.penalty_seconds) {
            return None;
        }
        if !TIMED_ADJUST_RANGE.contains(&change.bonus_seconds) {
            return None;
        }
        Some(Self {
            initial: Seconds::from(change.initial_seconds),
            penalty: Seconds::from(change.penalty_seconds),
            bonus: Seconds::from(change.bonus_seconds),
        })
    }

    fn to_wire(self) -> wire::SettingsChanged {
        wire::SettingsChanged {
            initial_seconds: self.initial as u32,
            penalty_seconds: self.penalty as u32,
            bonus_seconds: self.bonus as u32,
        }
    }
}

/// Engine construction parameters.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Seed for per-session randomness (clue picks, deck draws).
    pub seed: u64,
    /// Session clock cadence.
    pub tick_interval: Duration,
    /// Classic-mode clue cost in seconds.
    pub clue_penalty: Seconds,
    /// Initial survival-mode timing.
    pub timed: TimedSettings,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            seed: 0,
            tick_interval: TICK_INTERVAL,
            clue_penalty: CLUE_PENALTY_SECS,
            timed: TimedSettings::default(),
        }
    }
}

// ============================================================================
// Engine Mailbox
// ============================================================================

/// Inbound mail for the engine actor. Transport frontends feed the
/// first three; session tasks feed the rest.
#[derive(Debug)]
pub enum EngineMsg {
    /// A connection opened; `sender` carries its outbound events.
    Connected {
        conn: ConnectionId,
        sender: EventSender,
    },
    /// A decoded command from a connection.
    Command {
        conn: ConnectionId,
        command: ClientCommand,
    },
    /// The connection dropped. Equivalent to cancelling any wait and
    /// abandoning any session.
    Disconnected { conn: ConnectionId },
    /// A session task finished its teardown.
    SessionClosed { room: RoomId },
    /// One member left a session that keeps running.
    MemberLeft { room: RoomId, conn: ConnectionId },
}

/// Cloneable sender half for feeding the engine.
#[derive(Debug, Clone)]
pub struct EngineHandle {
    tx: mpsc::UnboundedSender<EngineMsg>,
}

impl EngineHandle {
    pub fn connected(&self, conn: ConnectionId, sender: EventSender) {
        let _ = self.tx.send(EngineMsg::Connected { conn, sender });
    }

    pub fn command(&self, conn: ConnectionId, command: ClientCommand) {
        let _ = self.tx.send(EngineMsg::Command { conn, command });
    }

    pub fn disconnected(&self, conn: ConnectionId) {
        let _ = self.tx.send(EngineMsg::Disconnected { conn });
    }
}

// ============================================================================
// Engine
// ============================================================================

/// The match server's central actor.
pub struct Engine {
    config: EngineConfig,
    /// Live survival timing; replaced by `ChangeSettings`.
    timed_settings: TimedSettings,
    catalog: Arc<dyn CatalogSource>,
    archive: Arc<dyn ArchiveSink>,
    /// Kept for minting session back-channels.
    tx: mpsc::UnboundedSender<EngineMsg>,
    rx: mpsc::UnboundedReceiver<EngineMsg>,
    /// Outbound channels for every open connection.
    senders: HashMap<ConnectionId, EventSender>,
    /// Connections subscribed to room announcements.
    browse: HashSet<ConnectionId>,
    /// Last name each connection played under, for availability probes.
    names: HashMap<ConnectionId, String>,
    matchmaker: Matchmaker,
    /// Mailbox of the session each connection is seated in.
    attachments: HashMap<ConnectionId, SessionTask>,
    rng: StdRng,
}

impl Engine {
    pub fn new(
        config: EngineConfig,
        catalog: Arc<dyn CatalogSource>,
        archive: Arc<dyn ArchiveSink>,
    ) -> (Self, EngineHandle) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = EngineHandle { tx: tx.clone() };
        let engine = Self {
            rng: StdRng::seed_from_u64(config.seed),
            timed_settings: config.timed,
            config,
            catalog,
            archive,
            tx,
            rx,
            senders: HashMap::new(),
            browse: HashSet::new(),
            names: HashMap::new(),
            matchmaker: Matchmaker::new(),
            attachments: HashMap::new(),
        };
        (engine, handle)
    }

    /// Drive the mailbox loop for the life of the server process.
    pub async fn run(mut self) {
        info!("engine started");
        while let Some(msg) = self.rx.recv().await {
            self.handle(msg).await;
        }
        info!("engine stopped");
    }

    async fn handle(&mut self, msg: EngineMsg) {
        match msg {
            EngineMsg::Connected { conn, sender } => {
                debug!(conn, "connected");
                self.senders.insert(conn, sender);
            }
            EngineMsg::Command { conn, command } => self.on_command(conn, command).await,
            EngineMsg::Disconnected { conn } => self.on_disconnected(conn),
            EngineMsg::SessionClosed { room } => {
                self.attachments.retain(|_, task| task.room != room);
                debug!(%room, "session unregistered");
            }
            EngineMsg::MemberLeft { room, conn } => {
                if self.attachments.remove(&conn).is_some() {
                    debug!(%room, conn, "member detached");
                }
            }
        }
    }

    async fn on_command(&mut self, conn: ConnectionId, command: ClientCommand) {
        match command {
            ClientCommand::JoinBrowse => self.join_browse(conn),
            ClientCommand::RequestVersus(req) => self.request_versus(conn, req).await,
            ClientCommand::AcceptGuest => self.accept_guest(conn).await,
            ClientCommand::RefuseGuest => self.refuse_guest(conn),
            ClientCommand::CancelWaiting => self.cancel_waiting(conn),
            ClientCommand::StartSolo(req) => self.start_solo(conn, req).await,
            ClientCommand::RequestCooperativeTimed(req) => self.request_timed(conn, req).await,
            ClientCommand::StartSoloTimed(req) => self.start_solo_timed(conn, req).await,
            ClientCommand::Click(click) => self.forward(
                conn,
                SessionMsg::Click {
                    conn,
                    pixel: Pixel::new(click.x, click.y),
                },
            ),
            ClientCommand::UseClue => self.forward(conn, SessionMsg::Clue { conn }),
            ClientCommand::Chat(chat) => self.forward(
                conn,
                SessionMsg::Chat {
                    conn,
                    text: chat.text,
                },
            ),
            ClientCommand::Abandon => self.forward(conn, SessionMsg::Abandon { conn }),
            ClientCommand::CheckUsername(check) => self.check_username(conn, &check.name),
            ClientCommand::ChangeSettings(change) => self.change_settings(conn, &change),
        }
    }

    // ------------------------------------------------------------------
    // Lobby
    // ------------------------------------------------------------------

    /// Subscribe to room announcements, replaying rooms already open.
    fn join_browse(&mut self, conn: ConnectionId) {
        self.browse.insert(conn);
        for title in self.matchmaker.open_titles() {
            self.send_to(conn, ServerEvent::RoomOpened(wire::RoomOpened { title }));
        }
    }

    /// A connection holds at most one engagement: waiting, queued, or
    /// seated. Browsing is orthogonal.
    fn is_engaged(&self, conn: ConnectionId) -> bool {
        self.attachments.contains_key(&conn) || self.matchmaker.is_waiting(conn)
    }

    async fn request_versus(&mut self, conn: ConnectionId, req: wire::RequestVersus) {
        if self.is_engaged(conn) {
            debug!(conn, "versus request while engaged");
            return;
        }
        if !self.title_exists(&req.title).await {
            self.kick(conn);
            return;
        }
        self.names.insert(conn, req.name.clone());
        let notices = self
            .matchmaker
            .request_versus(&req.title, Player::new(conn, req.name));
        self.deliver(notices);
    }

    async fn accept_guest(&mut self, conn: ConnectionId) {
        let senders = &self.senders;
        let outcome = self
            .matchmaker
            .accept_guest(conn, &|guest| senders.contains_key(&guest));
        self.deliver(outcome.notices);
        if let Some(VersusLaunch { title, host, guest }) = outcome.launch {
            self.launch_classic(&title, vec![host, guest]).await;
        }
    }

    fn refuse_guest(&mut self, conn: ConnectionId) {
        let notices = self.matchmaker.refuse_guest(conn);
        self.deliver(notices);
    }

    fn cancel_waiting(&mut self, conn: ConnectionId) {
        let notices = self.matchmaker.cancel(conn);
        self.deliver(notices);
    }

    async fn start_solo(&mut self, conn: ConnectionId, req: wire::StartSolo) {
        if self.is_engaged(conn) {
            debug!(conn, "solo start while engaged");
            return;
        }
        if !self.title_exists(&req.title).await {
            self.kick(conn);
            return;
        }
        self.names.insert(conn, req.name.clone());
        self.launch_classic(&req.title, vec![Player::new(conn, req.name)])
            .await;
    }

    async fn request_timed(&mut self, conn: ConnectionId, req: wire::RequestCooperativeTimed) {
        if self.is_engaged(conn) {
            debug!(conn, "queue request while engaged");
            return;
        }
        self.names.insert(conn, req.name.clone());
        let paired = self.matchmaker.request_timed(Player::new(conn, req.name));
        if let Some((first, second)) = paired {
            self.launch_timed(vec![first, second]).await;
        }
    }

    async fn start_solo_timed(&mut self, conn: ConnectionId, req: wire::StartSoloTimed) {
        if self.is_engaged(conn) {
            debug!(conn, "solo start while engaged");
            return;
        }
        self.names.insert(conn, req.name.clone());
        self.launch_timed(vec![Player::new(conn, req.name)]).await;
    }

    fn check_username(&self, conn: ConnectionId, name: &str) {
        let available = !self.names.values().any(|n| n == name);
        self.send_to(
            conn,
            ServerEvent::UsernameAvailability(wire::UsernameAvailability { available }),
        );
    }

    fn change_settings(&mut self, conn: ConnectionId, change: &wire::ChangeSettings) {
        let Some(settings) = TimedSettings::from_wire(change) else {
            warn!(
                conn,
                initial = change.initial_seconds,
                penalty = change.penalty_seconds,
                bonus = change.bonus_seconds,
                "settings change out of range"
            );
            self.kick(conn);
            return;
        };
        self.timed_settings = settings;
        info!(
            initial = change.initial_seconds,
            penalty = change.penalty_seconds,
            bonus = change.bonus_seconds,
            "survival settings changed"
        );
        self.broadcast_browsers(ServerEvent::SettingsChanged(settings.to_wire()));
    }

    fn on_disconnected(&mut self, conn: ConnectionId) {
        debug!(conn, "disconnected");
        self.senders.remove(&conn);
        self.browse.remove(&conn);
        self.names.remove(&conn);
        let notices = self.matchmaker.cancel(conn);
        self.deliver(notices);
        if let Some(task) = self.attachments.remove(&conn) {
            let _ = task.tx.send(SessionMsg::Abandon { conn });
        }
    }

    // ------------------------------------------------------------------
    // Session launch
    // ------------------------------------------------------------------

    /// Whether the catalog currently lists `title`. An unreachable
    /// catalog reads as unknown.
    async fn title_exists(&self, title: &str) -> bool {
        match self.catalog.titles().await {
            Ok(titles) => titles.iter().any(|t| t == title),
            Err(err) => {
                warn!(error = %err, "catalog unavailable");
                false
            }
        }
    }

    /// Seat `players` (initiator first) in a classic session.
    async fn launch_classic(&mut self, title: &str, players: Vec<Player>) {
        let sheet = match self.catalog.sheet(title).await {
            Ok(sheet) => sheet,
            Err(err) => {
                warn!(%title, error = %err, "sheet fetch failed at launch");
                for player in &players {
                    self.kick(player.conn);
                }
                return;
            }
        };
        let room = RoomId::new(GameMode::Classic, players[0].conn);
        let members = players.into_iter().map(|p| (p.conn, p.name)).collect();
        let session = SessionState::classic(
            room,
            sheet,
            members,
            self.config.clue_penalty,
            self.rng.random(),
        );
        self.spawn(session);
    }

    /// Seat `players` (initiator first) in a survival session. The
    /// opening sheet is drawn from the catalog's full title list; a
    /// catalog with nothing playable kicks everyone instead.
    async fn launch_timed(&mut self, players: Vec<Player>) {
        let titles = match self.catalog.titles().await {
            Ok(titles) => titles,
            Err(err) => {
                warn!(error = %err, "catalog unavailable");
                Vec::new()
            }
        };
        let mut deck = TitleDeck::new(titles);
        let sheet = loop {
            let Some(title) = deck.draw(&mut self.rng) else {
                for player in &players {
                    self.kick(player.conn);
                }
                return;
            };
            match self.catalog.sheet(&title).await {
                Ok(sheet) => break sheet,
                Err(err) => {
                    warn!(%title, error = %err, "sheet fetch failed, drawing another");
                }
            }
        };
        let room = RoomId::new(GameMode::Timed, players[0].conn);
        let members = players.into_iter().map(|p| (p.conn, p.name)).collect();
        let session = SessionState::timed(
            room,
            sheet,
            deck,
            members,
            self.timed_settings,
            self.rng.random(),
        );
        self.spawn(session);
    }

    fn spawn(&mut self, session: SessionState) {
        let conns = session.member_conns();
        let mut outbound = HashMap::new();
        for conn in &conns {
            // Players leave the browse group once a session seats them.
            self.browse.remove(conn);
            if let Some(tx) = self.senders.get(conn) {
                outbound.insert(*conn, tx.clone());
            }
        }
        let deps = SessionDeps {
            catalog: Arc::clone(&self.catalog),
            archive: Arc::clone(&self.archive),
            engine: self.tx.clone(),
            tick_interval: self.config.tick_interval,
        };
        let task = spawn_session(session, Outbox::new(outbound), deps);
        info!(room = %task.room, "session launched");
        for conn in conns {
            self.attachments.insert(conn, task.clone());
        }
    }

    /// Relay a command into the sender's session, if it is in one.
    fn forward(&self, conn: ConnectionId, msg: SessionMsg) {
        let Some(task) = self.attachments.get(&conn) else {
            debug!(conn, "session command outside a session");
            return;
        };
        if task.tx.send(msg).is_err() {
            // The task is between teardown and `SessionClosed`.
            debug!(conn, room = %task.room, "session mailbox closed");
        }
    }

    // ------------------------------------------------------------------
    // Delivery
    // ------------------------------------------------------------------

    fn deliver(&self, notices: Vec<Notice>) {
        for Notice { recipient, event } in notices {
            match recipient {
                Recipient::Conn(conn) => self.send_to(conn, event),
                Recipient::Browsers => self.broadcast_browsers(event),
            }
        }
    }

    fn send_to(&self, conn: ConnectionId, event: ServerEvent) {
        let Some(tx) = self.senders.get(&conn) else {
            return;
        };
        if tx.send(event).is_err() {
            debug!(conn, "dropped event for closed connection");
        }
    }

    fn broadcast_browsers(&self, event: ServerEvent) {
        for conn in &self.browse {
            self.send_to(*conn, event.clone());
        }
    }

    fn kick(&self, conn: ConnectionId) {
        self.send_to(conn, ServerEvent::Kicked(wire::Kicked {}));
    }
}

// ============================================================================
// Tests
// ============================================================================
