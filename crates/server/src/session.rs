//! The shared session base: everything common to a running match.
//!
//! A session is a pure state machine here. Operations mutate state and
//! return the events to route plus a [`SessionControl`] telling the
//! actor loop what to do next; all channel I/O and all awaiting happens
//! in the dispatcher. The mode-specific halves live in [`crate::classic`]
//! and [`crate::timed`], dispatched through the [`Variant`] tag.

use std::fmt;

use rand::SeedableRng;
use rand::rngs::StdRng;
use spotdiff_archive::{MatchDraft, MatchRecord};
use spotdiff_game::{DiffPool, GameClock, GameMode, Pixel, Seconds, TitleDeck};
use spotdiff_wire::{self as wire, ConnectionId, ServerEvent};

use crate::TimedSettings;
use crate::catalog::GameSheet;
use crate::classic;
use crate::timed::{self, TimedState};

// ============================================================================
// Identity & Targeting
// ============================================================================

/// Session identity: the mode plus the initiating connection. Room
/// membership and session identity coincide by construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RoomId {
    pub mode: GameMode,
    pub owner: ConnectionId,
}

impl RoomId {
    pub fn new(mode: GameMode, owner: ConnectionId) -> Self {
        Self { mode, owner }
    }
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.mode.as_str(), self.owner)
    }
}

/// One seated player.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Member {
    pub conn: ConnectionId,
    pub name: String,
    /// Differences found by this player on the current sheet run.
    pub found: usize,
}

/// Where an outbound event goes. Resolved against the room's member
/// list by the dispatcher; sessions never hold channel handles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    /// One specific connection.
    Conn(ConnectionId),
    /// Every member of the room.
    Room,
    /// Every member except the named one.
    OthersOf(ConnectionId),
}

/// One routed outbound event.
#[derive(Debug, Clone, PartialEq)]
pub struct Outgoing {
    pub target: Target,
    pub event: ServerEvent,
}

impl Outgoing {
    pub fn to(conn: ConnectionId, event: ServerEvent) -> Self {
        Self {
            target: Target::Conn(conn),
            event,
        }
    }

    pub fn room(event: ServerEvent) -> Self {
        Self {
            target: Target::Room,
            event,
        }
    }

    pub fn others(conn: ConnectionId, event: ServerEvent) -> Self {
        Self {
            target: Target::OthersOf(conn),
            event,
        }
    }
}

/// What the actor loop must do after applying an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionControl {
    /// Keep serving events.
    Continue,
    /// A member left but the session lives on; detach them upstream.
    Removed(ConnectionId),
    /// Classic win reached: query the best-time rank, then finish via
    /// [`SessionState::finish_win`].
    ClassicWin { finder: ConnectionId },
    /// Survival hit: draw the next sheet, then
    /// [`SessionState::advance_round`] or [`SessionState::win_exhausted`].
    AdvanceRound,
    /// Terminal state reached; tear down and flush the archive.
    Closed,
}

// ============================================================================
// Session State
// ============================================================================

/// Mode tag plus mode-specific data.
#[derive(Debug)]
pub enum Variant {
    Classic,
    Timed(TimedState),
}

/// State shared by both modes.
#[derive(Debug)]
pub struct SessionCore {
    pub room: RoomId,
    /// Title of the sheet currently being played.
    pub title: String,
    /// Seat order matters: index 0 is player one.
    pub members: Vec<Member>,
    pub pool: DiffPool,
    pub clock: GameClock,
    pub draft: MatchDraft,
    /// Seconds charged per clue: the engine's fixed penalty for classic,
    /// the session settings' penalty for timed.
    pub clue_penalty: Seconds,
    pub rng: StdRng,
    /// False once a terminal event has been broadcast; every operation
    /// on a closed session is a no-op.
    pub open: bool,
}

/// One running match.
#[derive(Debug)]
pub struct SessionState {
    pub core: SessionCore,
    pub variant: Variant,
}

impl SessionState {
    /// Build a classic (count-up) session over one sheet.
    pub fn classic(
        room: RoomId,
        sheet: GameSheet,
        members: Vec<(ConnectionId, String)>,
        clue_penalty: Seconds,
        seed: u64,
    ) -> Self {
        let core = SessionCore {
            room,
            draft: new_draft(&sheet.title, GameMode::Classic, &members),
            title: sheet.title,
            members: seat(room.owner, members),
            pool: DiffPool::new(sheet.groups),
            clock: GameClock::count_up(),
            clue_penalty,
            rng: StdRng::seed_from_u64(seed),
            open: true,
        };
        Self {
            core,
            variant: Variant::Classic,
        }
    }

    /// Build a survival (count-down) session. `first_sheet` has already
    /// been drawn out of `deck` by the caller.
    pub fn timed(
        room: RoomId,
        first_sheet: GameSheet,
        deck: TitleDeck,
        members: Vec<(ConnectionId, String)>,
        settings: TimedSettings,
        seed: u64,
    ) -> Self {
        let core = SessionCore {
            room,
            draft: new_draft(&first_sheet.title, GameMode::Timed, &members),
            title: first_sheet.title,
            members: seat(room.owner, members),
            pool: DiffPool::new(first_sheet.groups),
            clock: GameClock::count_down(settings.initial),
            clue_penalty: settings.penalty,
            rng: StdRng::seed_from_u64(seed),
            open: true,
        };
        Self {
            core,
            variant: Variant::Timed(TimedState::new(deck, settings)),
        }
    }

    pub fn room(&self) -> RoomId {
        self.core.room
    }

    pub fn title(&self) -> &str {
        &self.core.title
    }

    pub fn mode(&self) -> GameMode {
        self.core.room.mode
    }

    pub fn is_member(&self, conn: ConnectionId) -> bool {
        self.core.members.iter().any(|m| m.conn == conn)
    }

    pub fn is_multiplayer(&self) -> bool {
        self.core.members.len() >= 2
    }

    /// Stable across removals: seat one is the room's initiating
    /// connection, asserted at construction.
    pub(crate) fn is_player_one(&self, conn: ConnectionId) -> bool {
        conn == self.core.room.owner
    }

    pub fn member_names(&self) -> Vec<String> {
        self.core.members.iter().map(|m| m.name.clone()).collect()
    }

    pub fn member_conns(&self) -> Vec<ConnectionId> {
        self.core.members.iter().map(|m| m.conn).collect()
    }

    /// Events broadcast once, when the session's actor starts.
    pub fn opening_events(&self) -> Vec<Outgoing> {
        let mut out = vec![Outgoing::room(ServerEvent::SessionCreated(
            wire::SessionCreated {
                title: self.core.title.clone(),
                mode: wire::mode_name(self.mode()),
                players: self.member_names(),
                diff_count: self.core.pool.total() as u32,
                clue_penalty_seconds: self.core.clue_penalty as u32,
            },
        ))];
        // Survival sessions announce their starting budget up front.
        if matches!(self.variant, Variant::Timed(_)) {
            out.push(Outgoing::room(ServerEvent::TimeUpdated(wire::TimeUpdated {
                millis: self.core.clock.millis(),
            })));
        }
        out
    }

    // ------------------------------------------------------------------
    // Shared operations
    // ------------------------------------------------------------------

    /// One timer tick. The tick is an event in the same serialized queue
    /// as clicks, so a tick and a click are never evaluated concurrently.
    pub fn tick(&mut self, delta: Seconds) -> (Vec<Outgoing>, SessionControl) {
        if !self.core.open {
            return (Vec::new(), SessionControl::Continue);
        }
        self.apply_time(delta)
    }

    /// Move the clock in the mode's direction, broadcast the new value,
    /// and check count-down termination.
    pub(crate) fn apply_time(&mut self, delta: Seconds) -> (Vec<Outgoing>, SessionControl) {
        self.core.clock.apply(delta);
        let mut out = vec![Outgoing::room(ServerEvent::TimeUpdated(wire::TimeUpdated {
            millis: self.core.clock.millis(),
        }))];
        if self.core.clock.is_depleted() {
            out.push(Outgoing::room(ServerEvent::GameFinished(
                wire::GameFinished {
                    headline: "Time's up!".to_string(),
                    detail: "You lost.".to_string(),
                },
            )));
            self.core.open = false;
            return (out, SessionControl::Closed);
        }
        (out, SessionControl::Continue)
    }

    /// Resolve a click against the remaining differences.
    pub fn click(&mut self, conn: ConnectionId, pixel: Pixel) -> (Vec<Outgoing>, SessionControl) {
        if !self.core.open {
            return (Vec::new(), SessionControl::Continue);
        }
        let Some(idx) = self.core.members.iter().position(|m| m.conn == conn) else {
            return (Vec::new(), SessionControl::Continue);
        };
        match self.core.pool.resolve(pixel) {
            None => {
                // Local, non-fatal: freeze feedback for the clicker, a
                // room-wide notice only when someone else is watching.
                let mut out = vec![Outgoing::to(
                    conn,
                    ServerEvent::ErrorClick(wire::ErrorClick {
                        x: pixel.x,
                        y: pixel.y,
                    }),
                )];
                if self.is_multiplayer() {
                    out.push(Outgoing::room(ServerEvent::WrongClickNotice(
                        wire::WrongClickNotice {
                            name: self.core.members[idx].name.clone(),
                        },
                    )));
                }
                (out, SessionControl::Continue)
            }
            Some(group) => {
                self.core.members[idx].found += 1;
                let found = self.core.members[idx].found;
                let finder = self.core.members[idx].name.clone();
                let out = vec![Outgoing::room(ServerEvent::DifferenceFound(
                    wire::DifferenceFound {
                        finder,
                        pixels: wire::group_pixels(&group),
                    },
                ))];
                let control = match self.variant {
                    Variant::Classic => {
                        if spotdiff_game::meets_target(
                            found,
                            self.core.pool.total(),
                            self.core.members.len(),
                        ) {
                            SessionControl::ClassicWin { finder: conn }
                        } else {
                            SessionControl::Continue
                        }
                    }
                    Variant::Timed(_) => SessionControl::AdvanceRound,
                };
                (out, control)
            }
        }
    }

    /// Charge the clue penalty and reveal one remaining group to the
    /// requester. The charge can terminate a count-down session; no
    /// reveal is sent in that case.
    pub fn clue(&mut self, conn: ConnectionId) -> (Vec<Outgoing>, SessionControl) {
        if !self.core.open || !self.is_member(conn) {
            return (Vec::new(), SessionControl::Continue);
        }
        let penalty = self.core.clue_penalty;
        let (mut out, control) = self.apply_time(penalty);
        if control == SessionControl::Continue {
            let core = &mut self.core;
            if let Some(group) = core.pool.reveal(&mut core.rng) {
                out.push(Outgoing::to(
                    conn,
                    ServerEvent::ClueRevealed(wire::ClueRevealed {
                        pixels: wire::group_pixels(group),
                    }),
                ));
            }
        }
        (out, control)
    }

    /// Relay a chat line to the other member. No-op for non-members and
    /// for single-player sessions.
    pub fn chat(&self, from: ConnectionId, text: String) -> Vec<Outgoing> {
        if !self.core.open || !self.is_multiplayer() {
            return Vec::new();
        }
        let Some(member) = self.core.members.iter().find(|m| m.conn == from) else {
            return Vec::new();
        };
        vec![Outgoing::others(
            from,
            ServerEvent::ChatRelayed(wire::ChatRelayed {
                from: member.name.clone(),
                text,
            }),
        )]
    }

    /// A member leaves, voluntarily or by disconnect. Idempotent: calling
    /// it for an already-removed connection is a safe no-op.
    pub fn abandon(&mut self, conn: ConnectionId) -> (Vec<Outgoing>, SessionControl) {
        if !self.core.open || !self.is_member(conn) {
            return (Vec::new(), SessionControl::Continue);
        }
        match self.variant {
            Variant::Classic => classic::abandon(self, conn),
            Variant::Timed(_) => timed::abandon(self, conn),
        }
    }

    /// Classic win, after the best-time rank came back.
    pub fn finish_win(&mut self, finder: ConnectionId, rank: Option<u32>) -> Vec<Outgoing> {
        classic::finish_win(self, finder, rank)
    }

    /// Survival round advance, after the next sheet was fetched.
    pub fn advance_round(&mut self, sheet: GameSheet) -> Vec<Outgoing> {
        timed::advance_round(self, sheet)
    }

    /// Survival win: the deck ran out of sheets.
    pub fn win_exhausted(&mut self) -> Vec<Outgoing> {
        timed::win_exhausted(self)
    }

    /// Pop the next title from the survival deck, or `None` when the
    /// deck is exhausted (or the session is not survival mode).
    pub fn draw_next_title(&mut self) -> Option<String> {
        let SessionState { core, variant } = self;
        match variant {
            Variant::Timed(state) => state.deck.draw(&mut core.rng),
            Variant::Classic => None,
        }
    }

    /// Stamp and take the archive record. Guarded: `None` on every call
    /// after the first, so racing teardown paths cannot double-flush.
    pub fn teardown_record(&mut self) -> Option<MatchRecord> {
        self.core.open = false;
        let end_clock = self.core.clock.seconds();
        self.core.draft.finalize(end_clock)
    }
}

fn seat(owner: ConnectionId, members: Vec<(ConnectionId, String)>) -> Vec<Member> {
    assert_eq!(
        members.first().map(|(conn, _)| *conn),
        Some(owner),
        "player one must hold the room's connection id"
    );
    members
        .into_iter()
        .map(|(conn, name)| Member {
            conn,
            name,
            found: 0,
        })
        .collect()
}

fn new_draft(title: &str, mode: GameMode, members: &[(ConnectionId, String)]) -> MatchDraft {
    let player_one = members
        .first()
        .map(|(_, name)| name.clone())
        .unwrap_or_default();
    let player_two = members.get(1).map(|(_, name)| name.clone());
    MatchDraft::new(title, mode, player_one, player_two)
}

// ============================================================================
// Tests
// ============================================================================
