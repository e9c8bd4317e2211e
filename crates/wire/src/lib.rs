//! Spotdiff Wire Protocol Types
//!
//! This crate defines the shared Protobuf message types used for
//! communication between Game Client and the session engine. Both client
//! and server binaries MUST depend on this crate.
//!
//! # Message Categories
//!
//! - **Commands** (client → server): matchmaking intents and in-session
//!   actions, routed through the dispatcher.
//! - **Events** (server → client): waiting-room lifecycle, session
//!   lifecycle, and per-action feedback.
//!
//! Payload shapes are logical; framing and delivery belong to the
//! transport, which is expected to provide in-order, at-least-once
//! delivery per connection.

#![deny(unsafe_code)]

use prost::Message;
use spotdiff_game::{DifferenceGroup, GameMode, Pixel};

// ============================================================================
// Type Aliases
// ============================================================================

/// Connection identifier assigned by the transport. Opaque to game logic;
/// display names are carried separately and are only unique within one
/// waiting room or session.
pub type ConnectionId = u64;

// ============================================================================
// Shared Payload Types
// ============================================================================

/// One pixel coordinate in the shared image pair.
#[derive(Clone, PartialEq, Message)]
pub struct PixelProto {
    #[prost(uint32, tag = "1")]
    pub x: u32,

    #[prost(uint32, tag = "2")]
    pub y: u32,
}

// ============================================================================
// Command Messages (client → server)
// ============================================================================

/// Register for waiting-room open/close and settings broadcasts.
#[derive(Clone, PartialEq, Message)]
pub struct JoinBrowse {
    // Empty: registration is keyed by the sending connection.
}

/// Ask to play a versus match on `title`. Creates the waiting room when
/// none exists; otherwise queues behind the current host.
#[derive(Clone, PartialEq, Message)]
pub struct RequestVersus {
    #[prost(string, tag = "1")]
    pub title: String,

    #[prost(string, tag = "2")]
    pub name: String,
}

/// Host accepts the currently offered guest.
#[derive(Clone, PartialEq, Message)]
pub struct AcceptGuest {}

/// Host turns the currently offered guest away.
#[derive(Clone, PartialEq, Message)]
pub struct RefuseGuest {}

/// Leave whichever waiting structure the connection is queued in.
#[derive(Clone, PartialEq, Message)]
pub struct CancelWaiting {}

/// Start a single-player classic session immediately.
#[derive(Clone, PartialEq, Message)]
pub struct StartSolo {
    #[prost(string, tag = "1")]
    pub title: String,

    #[prost(string, tag = "2")]
    pub name: String,
}

/// Enter the cooperative survival queue; a session starts when two
/// players are waiting.
#[derive(Clone, PartialEq, Message)]
pub struct RequestCooperativeTimed {
    #[prost(string, tag = "1")]
    pub name: String,
}

/// Start a single-player survival session immediately.
#[derive(Clone, PartialEq, Message)]
pub struct StartSoloTimed {
    #[prost(string, tag = "1")]
    pub name: String,
}

/// A click on the image pair.
#[derive(Clone, PartialEq, Message)]
pub struct Click {
    #[prost(uint32, tag = "1")]
    pub x: u32,

    #[prost(uint32, tag = "2")]
    pub y: u32,
}

/// Pay the time penalty for a hint at one remaining difference.
#[derive(Clone, PartialEq, Message)]
pub struct UseClue {}

/// In-session chat line, relayed to the other member.
#[derive(Clone, PartialEq, Message)]
pub struct Chat {
    #[prost(string, tag = "1")]
    pub text: String,
}

/// Leave the running session.
#[derive(Clone, PartialEq, Message)]
pub struct Abandon {}

/// Advisory probe: is `name` currently unused?
#[derive(Clone, PartialEq, Message)]
pub struct CheckUsername {
    #[prost(string, tag = "1")]
    pub name: String,
}

/// Admin: replace the survival-mode settings for future sessions.
/// Values are whole seconds.
#[derive(Clone, PartialEq, Message)]
pub struct ChangeSettings {
    #[prost(uint32, tag = "1")]
    pub initial_seconds: u32,

    #[prost(uint32, tag = "2")]
    pub penalty_seconds: u32,

    #[prost(uint32, tag = "3")]
    pub bonus_seconds: u32,
}

// ============================================================================
// Event Messages (server → client)
// ============================================================================

/// The request failed and the connection was detached from whatever it
/// was trying to join. Sent on unknown titles, dead-guest accepts, and
/// rejected settings.
#[derive(Clone, PartialEq, Message)]
pub struct Kicked {}

/// A versus waiting room opened for `title`. Browse-group broadcast.
#[derive(Clone, PartialEq, Message)]
pub struct RoomOpened {
    #[prost(string, tag = "1")]
    pub title: String,
}

/// The versus waiting room for `title` emptied and was discarded.
#[derive(Clone, PartialEq, Message)]
pub struct RoomClosed {
    #[prost(string, tag = "1")]
    pub title: String,
}

/// A guest is asking to join the host's room. The host must accept or
/// refuse before the pair can play.
#[derive(Clone, PartialEq, Message)]
pub struct JoinRequested {
    #[prost(string, tag = "1")]
    pub name: String,

    #[prost(string, tag = "2")]
    pub title: String,
}

/// The host turned this guest away.
#[derive(Clone, PartialEq, Message)]
pub struct Refused {}

/// Queue promotion: the receiving connection is now the room's host.
#[derive(Clone, PartialEq, Message)]
pub struct BecameHost {}

/// A session started with the receiving connection as a member.
#[derive(Clone, PartialEq, Message)]
pub struct SessionCreated {
    /// Sheet title (survival mode: the first round's sheet).
    #[prost(string, tag = "1")]
    pub title: String,

    /// Gameplay mode name, `classic` or `timed`.
    #[prost(string, tag = "2")]
    pub mode: String,

    /// Display names in seat order (player one first).
    #[prost(string, repeated, tag = "3")]
    pub players: Vec<String>,

    /// Authored difference count for the current sheet.
    #[prost(uint32, tag = "4")]
    pub diff_count: u32,

    /// Whole-second time penalty charged per clue.
    #[prost(uint32, tag = "5")]
    pub clue_penalty_seconds: u32,
}

/// A difference group was found.
#[derive(Clone, PartialEq, Message)]
pub struct DifferenceFound {
    /// Display name of the finding player.
    #[prost(string, tag = "1")]
    pub finder: String,

    /// The resolved group's pixels, for client-side highlighting.
    #[prost(message, repeated, tag = "2")]
    pub pixels: Vec<PixelProto>,
}

/// Clue response: the pixels of one still-remaining difference group.
/// Sent to the requesting connection only.
#[derive(Clone, PartialEq, Message)]
pub struct ClueRevealed {
    #[prost(message, repeated, tag = "1")]
    pub pixels: Vec<PixelProto>,
}

/// Survival mode advanced to a new sheet.
#[derive(Clone, PartialEq, Message)]
pub struct RoundAdvanced {
    #[prost(string, tag = "1")]
    pub title: String,

    /// Asset references for the image pair.
    #[prost(string, tag = "2")]
    pub image_a: String,

    #[prost(string, tag = "3")]
    pub image_b: String,

    #[prost(uint32, tag = "4")]
    pub difficulty: u32,

    /// Authored difference count for the new sheet.
    #[prost(uint32, tag = "5")]
    pub diff_count: u32,

    /// Clock value after the round bonus, in milliseconds.
    #[prost(uint64, tag = "6")]
    pub time_millis: u64,
}

/// The click did not land on any remaining difference. Sent to the
/// clicker only; the presentation layer owns the freeze.
#[derive(Clone, PartialEq, Message)]
pub struct ErrorClick {
    #[prost(uint32, tag = "1")]
    pub x: u32,

    #[prost(uint32, tag = "2")]
    pub y: u32,
}

/// Room-wide notice that `name` clicked wrong. Multiplayer sessions only.
#[derive(Clone, PartialEq, Message)]
pub struct WrongClickNotice {
    #[prost(string, tag = "1")]
    pub name: String,
}

/// Server-owned clock sync, broadcast once per tick and after penalties.
#[derive(Clone, PartialEq, Message)]
pub struct TimeUpdated {
    #[prost(uint64, tag = "1")]
    pub millis: u64,
}

/// Terminal announcement: the session is over.
#[derive(Clone, PartialEq, Message)]
pub struct GameFinished {
    #[prost(string, tag = "1")]
    pub headline: String,

    #[prost(string, tag = "2")]
    pub detail: String,
}

/// Chat line relayed to the other session member.
#[derive(Clone, PartialEq, Message)]
pub struct ChatRelayed {
    #[prost(string, tag = "1")]
    pub from: String,

    #[prost(string, tag = "2")]
    pub text: String,
}

/// Survival mode roster change after an abandon that left the session
/// alive.
#[derive(Clone, PartialEq, Message)]
pub struct PlayerLeft {
    #[prost(string, repeated, tag = "1")]
    pub remaining: Vec<String>,
}

/// Answer to [`CheckUsername`].
#[derive(Clone, PartialEq, Message)]
pub struct UsernameAvailability {
    #[prost(bool, tag = "1")]
    pub available: bool,
}

/// The survival-mode settings changed for sessions created from now on.
#[derive(Clone, PartialEq, Message)]
pub struct SettingsChanged {
    #[prost(uint32, tag = "1")]
    pub initial_seconds: u32,

    #[prost(uint32, tag = "2")]
    pub penalty_seconds: u32,

    #[prost(uint32, tag = "3")]
    pub bonus_seconds: u32,
}

// ============================================================================
// Routing Envelopes
// ============================================================================

/// Every inbound command the dispatcher routes. The transport decodes
/// frames into this enum; gameplay code never sees raw bytes.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientCommand {
    JoinBrowse,
    RequestVersus(RequestVersus),
    AcceptGuest,
    RefuseGuest,
    CancelWaiting,
    StartSolo(StartSolo),
    RequestCooperativeTimed(RequestCooperativeTimed),
    StartSoloTimed(StartSoloTimed),
    Click(Click),
    UseClue,
    Chat(Chat),
    Abandon,
    CheckUsername(CheckUsername),
    ChangeSettings(ChangeSettings),
}

/// Every outbound event a session or the matchmaker can produce. The
/// dispatcher resolves targets; the transport encodes the payloads.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerEvent {
    Kicked(Kicked),
    RoomOpened(RoomOpened),
    RoomClosed(RoomClosed),
    JoinRequested(JoinRequested),
    Refused(Refused),
    BecameHost(BecameHost),
    SessionCreated(SessionCreated),
    DifferenceFound(DifferenceFound),
    ClueRevealed(ClueRevealed),
    RoundAdvanced(RoundAdvanced),
    ErrorClick(ErrorClick),
    WrongClickNotice(WrongClickNotice),
    TimeUpdated(TimeUpdated),
    GameFinished(GameFinished),
    ChatRelayed(ChatRelayed),
    PlayerLeft(PlayerLeft),
    UsernameAvailability(UsernameAvailability),
    SettingsChanged(SettingsChanged),
}

// ============================================================================
// Conversion Traits
// ============================================================================

impl From<Pixel> for PixelProto {
    fn from(p: Pixel) -> Self {
        Self { x: p.x, y: p.y }
    }
}

impl From<PixelProto> for Pixel {
    fn from(p: PixelProto) -> Self {
        Self { x: p.x, y: p.y }
    }
}

impl From<Click> for Pixel {
    fn from(c: Click) -> Self {
        Self { x: c.x, y: c.y }
    }
}

/// Wire rendering of a difference group for found/clue payloads.
pub fn group_pixels(group: &DifferenceGroup) -> Vec<PixelProto> {
    group.pixels().iter().copied().map(Into::into).collect()
}

/// Wire rendering of a gameplay mode.
pub fn mode_name(mode: GameMode) -> String {
    mode.as_str().to_string()
}

// ============================================================================
// Tests
// ============================================================================
