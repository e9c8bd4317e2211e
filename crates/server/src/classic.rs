//! Classic mode: count-up clock over a single sheet.
//!
//! A player wins by finding their share of the differences, `total`
//! divided by the number of seated players. With two players over an
//! odd total the quotient is fractional, so the winner needs the
//! majority. Abandoning always ends the session; in a versus match the
//! remaining player wins by forfeit.

use spotdiff_wire::{self as wire, ConnectionId, ServerEvent};

use crate::session::{Outgoing, SessionControl, SessionState};

/// A member leaves a classic session. Terminal in every arity.
pub(crate) fn abandon(
    session: &mut SessionState,
    conn: ConnectionId,
) -> (Vec<Outgoing>, SessionControl) {
    session
        .core
        .draft
        .mark_abandoned(session.is_player_one(conn));
    let mut out = Vec::new();
    if session.is_multiplayer() {
        let name = session
            .core
            .members
            .iter()
            .find(|m| m.conn == conn)
            .map(|m| m.name.clone())
            .unwrap_or_default();
        out.push(Outgoing::others(
            conn,
            ServerEvent::GameFinished(wire::GameFinished {
                headline: "Game over".to_string(),
                detail: format!("{name} has abandoned. You win by forfeit."),
            }),
        ));
    }
    session.core.open = false;
    (out, SessionControl::Closed)
}

/// Broadcast the classic win, after the dispatcher fetched the
/// finisher's best-time rank. `rank` is 1-based and absent when the
/// time does not place on the leaderboard.
pub(crate) fn finish_win(
    session: &mut SessionState,
    finder: ConnectionId,
    rank: Option<u32>,
) -> Vec<Outgoing> {
    session.core.draft.attribute(session.is_player_one(finder));
    let headline = if session.is_multiplayer() {
        let name = session
            .core
            .members
            .iter()
            .find(|m| m.conn == finder)
            .map(|m| m.name.as_str())
            .unwrap_or("?");
        format!("{name} wins!")
    } else {
        "You win!".to_string()
    };
    let detail = match rank {
        Some(rank) => format!("Best time rank #{rank} for {}", session.core.title),
        None => "All differences found.".to_string(),
    };
    session.core.open = false;
    vec![Outgoing::room(ServerEvent::GameFinished(
        wire::GameFinished { headline, detail },
    ))]
}

// ============================================================================
// Tests
// ============================================================================
