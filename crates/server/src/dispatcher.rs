//! The per-session actor.
//!
//! Each running match is one spawned task owning its [`SessionState`].
//! Inbound commands and the timer tick land in the same mailbox-driven
//! loop, so a click and a tick are never evaluated concurrently and
//! ordering is a property of the queue. The task also owns all session
//! I/O: event delivery through the [`Outbox`], catalog fetches between
//! survival rounds, and the archive flush at teardown. The engine only
//! pushes [`SessionMsg`]s in and hears back through [`EngineMsg`].

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use spotdiff_archive::{ArchiveSink, RankScope};
use spotdiff_game::Pixel;
use spotdiff_wire::{ConnectionId, ServerEvent};
use tokio::sync::mpsc;
use tokio::time::{self, Instant};
use tracing::{debug, warn};

use crate::EngineMsg;
use crate::catalog::CatalogSource;
use crate::session::{Outgoing, RoomId, SessionControl, SessionState, Target};

/// Outbound channel handle for one connection.
pub type EventSender = mpsc::UnboundedSender<ServerEvent>;

// ============================================================================
// Outbox
// ============================================================================

/// Routes one session's outbound events to its members' channels. The
/// session task is the only writer to these channels while it runs.
#[derive(Debug)]
pub struct Outbox {
    senders: HashMap<ConnectionId, EventSender>,
}

impl Outbox {
    pub fn new(senders: HashMap<ConnectionId, EventSender>) -> Self {
        Self { senders }
    }

    /// Forget a connection; later events routed to it are dropped.
    pub fn remove(&mut self, conn: ConnectionId) {
        self.senders.remove(&conn);
    }

    fn send_to(&self, conn: ConnectionId, event: ServerEvent) {
        let Some(tx) = self.senders.get(&conn) else {
            return;
        };
        if tx.send(event).is_err() {
            // The connection is mid-disconnect; its abandon follows.
            debug!(conn, "dropped event for closed connection");
        }
    }

    fn deliver(&self, session: &SessionState, events: Vec<Outgoing>) {
        for Outgoing { target, event } in events {
            match target {
                Target::Conn(conn) => self.send_to(conn, event),
                Target::Room => {
                    for conn in session.member_conns() {
                        self.send_to(conn, event.clone());
                    }
                }
                Target::OthersOf(sender) => {
                    for conn in session.member_conns() {
                        if conn != sender {
                            self.send_to(conn, event.clone());
                        }
                    }
                }
            }
        }
    }
}

// ============================================================================
// Session Task
// ============================================================================

/// Commands a session's mailbox accepts.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionMsg {
    Click { conn: ConnectionId, pixel: Pixel },
    Clue { conn: ConnectionId },
    Chat { conn: ConnectionId, text: String },
    Abandon { conn: ConnectionId },
}

/// Shared collaborators handed to every session task.
#[derive(Clone)]
pub struct SessionDeps {
    pub catalog: Arc<dyn CatalogSource>,
    pub archive: Arc<dyn ArchiveSink>,
    /// Back-channel to the engine for membership and lifecycle changes.
    pub engine: mpsc::UnboundedSender<EngineMsg>,
    pub tick_interval: Duration,
}

/// The engine's handle on one spawned session.
#[derive(Debug, Clone)]
pub struct SessionTask {
    pub room: RoomId,
    pub tx: mpsc::UnboundedSender<SessionMsg>,
}

/// Spawn the actor task for a freshly built session.
pub fn spawn_session(session: SessionState, outbox: Outbox, deps: SessionDeps) -> SessionTask {
    let (tx, rx) = mpsc::unbounded_channel();
    let room = session.room();
    tokio::spawn(run_session(session, outbox, deps, rx));
    SessionTask { room, tx }
}

async fn run_session(
    mut session: SessionState,
    mut outbox: Outbox,
    deps: SessionDeps,
    mut rx: mpsc::UnboundedReceiver<SessionMsg>,
) {
    let room = session.room();
    debug!(%room, title = session.title(), "session started");
    let events = session.opening_events();
    outbox.deliver(&session, events);

    let tick_secs = deps.tick_interval.as_secs_f64();
    let mut ticker = time::interval_at(Instant::now() + deps.tick_interval, deps.tick_interval);

    loop {
        let (events, control) = tokio::select! {
            _ = ticker.tick() => session.tick(tick_secs),
            msg = rx.recv() => match msg {
                None => break,
                Some(SessionMsg::Click { conn, pixel }) => session.click(conn, pixel),
                Some(SessionMsg::Clue { conn }) => session.clue(conn),
                Some(SessionMsg::Chat { conn, text }) => {
                    (session.chat(conn, text), SessionControl::Continue)
                }
                Some(SessionMsg::Abandon { conn }) => session.abandon(conn),
            },
        };
        outbox.deliver(&session, events);
        match control {
            SessionControl::Continue => {}
            SessionControl::Removed(conn) => {
                outbox.remove(conn);
                let _ = deps.engine.send(EngineMsg::MemberLeft { room, conn });
            }
            SessionControl::ClassicWin { finder } => {
                finish_classic_win(&mut session, &outbox, &deps, finder).await;
                break;
            }
            SessionControl::AdvanceRound => {
                if !next_round(&mut session, &outbox, &deps).await {
                    break;
                }
            }
            SessionControl::Closed => break,
        }
    }

    close(session, &deps).await;
}

/// Look up the finisher's best-time rank, then broadcast the win. A
/// failed lookup costs only the rank phrase.
async fn finish_classic_win(
    session: &mut SessionState,
    outbox: &Outbox,
    deps: &SessionDeps,
    finder: ConnectionId,
) {
    let scope = if session.is_multiplayer() {
        RankScope::Versus
    } else {
        RankScope::Solo
    };
    let seconds = session.core.clock.seconds() as u64;
    let rank = match deps
        .archive
        .best_time_rank(session.title(), scope, seconds)
        .await
    {
        Ok(rank) => rank,
        Err(err) => {
            warn!(room = %session.room(), error = %err, "best-time rank lookup failed");
            None
        }
    };
    let events = session.finish_win(finder, rank);
    outbox.deliver(session, events);
}

/// Draw the next survival round. Titles whose sheet the catalog can no
/// longer produce are skipped. Returns false when the session ended
/// (deck exhausted).
async fn next_round(session: &mut SessionState, outbox: &Outbox, deps: &SessionDeps) -> bool {
    loop {
        let Some(title) = session.draw_next_title() else {
            let events = session.win_exhausted();
            outbox.deliver(session, events);
            return false;
        };
        match deps.catalog.sheet(&title).await {
            Ok(sheet) => {
                let events = session.advance_round(sheet);
                outbox.deliver(session, events);
                return true;
            }
            Err(err) => {
                warn!(room = %session.room(), %title, error = %err, "sheet fetch failed, drawing another");
            }
        }
    }
}

/// The single teardown path: stamp and flush the archive record, then
/// tell the engine the room is gone. [`SessionState::teardown_record`]
/// guards the flush, so a second pass through here is a no-op.
async fn close(mut session: SessionState, deps: &SessionDeps) {
    let room = session.room();
    if let Some(record) = session.teardown_record() {
        if let Err(err) = deps.archive.record_match(record).await {
            // The outcome is final regardless of persistence.
            warn!(%room, error = %err, "archive flush failed");
        }
    }
    let _ = deps.engine.send(EngineMsg::SessionClosed { room });
    debug!(%room, "session closed");
}

// ============================================================================
// Tests
// ============================================================================
