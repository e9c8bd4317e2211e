//! Survival mode: count-down clock over a deck of sheets.
//!
//! Every found difference ends the round. The session reloads the pool
//! from a freshly drawn sheet and grants the round bonus, capped at the
//! starting budget so banked time cannot grow without bound. The match
//! is won by emptying the deck and lost when the clock reaches zero.
//! Leaving is not terminal while a teammate remains seated.

use spotdiff_game::TitleDeck;
use spotdiff_wire::{self as wire, ConnectionId, ServerEvent};

use crate::TimedSettings;
use crate::catalog::GameSheet;
use crate::session::{Outgoing, SessionControl, SessionState, Variant};

/// Survival-only session data.
#[derive(Debug)]
pub struct TimedState {
    /// Titles not yet played this session.
    pub deck: TitleDeck,
    /// Settings frozen at session creation.
    pub settings: TimedSettings,
}

impl TimedState {
    pub fn new(deck: TitleDeck, settings: TimedSettings) -> Self {
        Self { deck, settings }
    }
}

/// A member leaves a survival session. Terminal only when the last
/// seat empties; a remaining teammate plays on with the shared clock.
pub(crate) fn abandon(
    session: &mut SessionState,
    conn: ConnectionId,
) -> (Vec<Outgoing>, SessionControl) {
    session
        .core
        .draft
        .mark_abandoned(session.is_player_one(conn));
    session.core.members.retain(|m| m.conn != conn);
    if session.core.members.is_empty() {
        session.core.open = false;
        return (Vec::new(), SessionControl::Closed);
    }
    let remaining = session.member_names();
    (
        vec![Outgoing::room(ServerEvent::PlayerLeft(wire::PlayerLeft {
            remaining,
        }))],
        SessionControl::Removed(conn),
    )
}

/// Load the next sheet and grant the round bonus. Called by the
/// dispatcher after it fetched the sheet for the freshly drawn title.
pub(crate) fn advance_round(session: &mut SessionState, sheet: GameSheet) -> Vec<Outgoing> {
    let SessionState { core, variant } = session;
    let Variant::Timed(state) = variant else {
        return Vec::new();
    };
    if !core.open {
        return Vec::new();
    }
    let GameSheet {
        title,
        image_a,
        image_b,
        difficulty,
        groups,
    } = sheet;
    core.title = title;
    core.pool.reload(groups);
    for member in &mut core.members {
        member.found = 0;
    }
    core.clock.grant(state.settings.bonus, state.settings.initial);
    let millis = core.clock.millis();
    vec![
        Outgoing::room(ServerEvent::TimeUpdated(wire::TimeUpdated { millis })),
        Outgoing::room(ServerEvent::RoundAdvanced(wire::RoundAdvanced {
            title: core.title.clone(),
            image_a,
            image_b,
            difficulty,
            diff_count: core.pool.total() as u32,
            time_millis: millis,
        })),
    ]
}

/// The deck ran out: the session is beaten.
pub(crate) fn win_exhausted(session: &mut SessionState) -> Vec<Outgoing> {
    if !session.core.open {
        return Vec::new();
    }
    session.core.open = false;
    vec![Outgoing::room(ServerEvent::GameFinished(
        wire::GameFinished {
            headline: "You win!".to_string(),
            detail: "All sheets solved.".to_string(),
        },
    ))]
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use spotdiff_game::{DifferenceGroup, GameMode, Pixel, TitleDeck};
    use spotdiff_wire::ServerEvent;

    use crate::TimedSettings;
    use crate::catalog::GameSheet;
    use crate::session::{RoomId, SessionControl, SessionState, Target};

    fn sheet(title: &str, diff_count: usize) -> GameSheet {
        GameSheet {
            title: title.to_string(),
            image_a: format!("{title}_a.png"),
            image_b: format!("{title}_b.png"),
            difficulty: 2,
            groups: (0..diff_count)
                .map(|i| DifferenceGroup::new(vec![Pixel::new(i as u32, 0)]))
                .collect(),
        }
    }

    fn settings() -> TimedSettings {
        TimedSettings {
            initial: 60.0,
            penalty: 5.0,
            bonus: 10.0,
        }
    }

    fn coop(deck_titles: &[&str]) -> SessionState {
        SessionState::timed(
            RoomId::new(GameMode::Timed, 1),
            sheet("orchard", 3),
            TitleDeck::new(deck_titles.iter().map(|t| t.to_string()).collect()),
            vec![(1, "ada".to_string()), (2, "grace".to_string())],
            settings(),
            23,
        )
    }

    fn solo(deck_titles: &[&str]) -> SessionState {
        SessionState::timed(
            RoomId::new(GameMode::Timed, 1),
            sheet("orchard", 3),
            TitleDeck::new(deck_titles.iter().map(|t| t.to_string()).collect()),
            vec![(1, "ada".to_string())],
            settings(),
            23,
        )
    }

    fn last_millis(events: &[crate::session::Outgoing]) -> u64 {
        events
            .iter()
            .rev()
            .find_map(|o| match &o.event {
                ServerEvent::TimeUpdated(t) => Some(t.millis),
                _ => None,
            })
            .expect("no time update in events")
    }

    #[test]
    fn test_countdown_and_clue_penalty() {
        let mut session = coop(&[]);
        let mut events = Vec::new();
        for _ in 0..5 {
            events = session.tick(1.0).0;
        }
        assert_eq!(last_millis(&events), 55_000);
        let (events, control) = session.clue(1);
        assert_eq!(control, SessionControl::Continue);
        assert_eq!(last_millis(&events), 50_000);
        assert!(matches!(
            events.last().map(|o| &o.event),
            Some(ServerEvent::ClueRevealed(_))
        ));
    }

    #[test]
    fn test_clock_floors_at_zero_with_loss() {
        let mut session = solo(&["pier"]);
        for _ in 0..59 {
            session.tick(1.0);
        }
        let (events, control) = session.tick(1.0);
        assert_eq!(control, SessionControl::Closed);
        assert_eq!(last_millis(&events), 0);
        let ServerEvent::GameFinished(finished) = &events.last().unwrap().event else {
            panic!("expected game finished");
        };
        assert_eq!(finished.headline, "Time's up!");
        assert_eq!(finished.detail, "You lost.");
    }

    #[test]
    fn test_back_to_back_clues_step_the_clock_down() {
        let mut session = solo(&[]);
        let (events, control) = session.clue(1);
        assert_eq!(control, SessionControl::Continue);
        assert_eq!(last_millis(&events), 55_000);
        let (events, control) = session.clue(1);
        assert_eq!(control, SessionControl::Continue);
        assert_eq!(last_millis(&events), 50_000);
    }

    #[test]
    fn test_clue_penalty_can_end_the_session() {
        let mut session = solo(&[]);
        for _ in 0..57 {
            session.tick(1.0);
        }
        // 3 seconds left, 5 second charge: floored to zero, no reveal.
        let (events, control) = session.clue(1);
        assert_eq!(control, SessionControl::Closed);
        assert_eq!(last_millis(&events), 0);
        assert!(
            !events
                .iter()
                .any(|o| matches!(o.event, ServerEvent::ClueRevealed(_)))
        );
    }

    #[test]
    fn test_hit_requests_round_advance() {
        let mut session = coop(&["pier"]);
        let (events, control) = session.click(2, Pixel::new(0, 0));
        assert_eq!(control, SessionControl::AdvanceRound);
        assert!(matches!(
            events[0].event,
            ServerEvent::DifferenceFound(_)
        ));
    }

    #[test]
    fn test_advance_round_reloads_and_grants_bonus() {
        let mut session = coop(&["pier"]);
        for _ in 0..20 {
            session.tick(1.0);
        }
        session.click(1, Pixel::new(0, 0));
        let events = session.advance_round(sheet("pier", 5));
        // 40s remaining plus the 10s bonus.
        assert_eq!(last_millis(&events), 50_000);
        let ServerEvent::RoundAdvanced(round) = &events[1].event else {
            panic!("expected round advance");
        };
        assert_eq!(round.title, "pier");
        assert_eq!(round.image_a, "pier_a.png");
        assert_eq!(round.diff_count, 5);
        assert_eq!(round.time_millis, 50_000);
        assert_eq!(session.title(), "pier");
        assert_eq!(session.core.pool.remaining(), 5);
    }

    #[test]
    fn test_round_bonus_is_capped_at_the_starting_budget() {
        let mut session = coop(&["pier"]);
        for _ in 0..5 {
            session.tick(1.0);
        }
        session.click(1, Pixel::new(0, 0));
        let events = session.advance_round(sheet("pier", 5));
        // 55s remaining; the 10s bonus tops out at the 60s budget.
        assert_eq!(last_millis(&events), 60_000);
    }

    #[test]
    fn test_deck_draw_yields_each_title_once() {
        let mut session = solo(&["pier", "meadow", "canal"]);
        let mut drawn = Vec::new();
        while let Some(title) = session.draw_next_title() {
            drawn.push(title);
        }
        drawn.sort();
        assert_eq!(drawn, vec!["canal", "meadow", "pier"]);
        assert!(session.draw_next_title().is_none());
    }

    #[test]
    fn test_win_when_deck_is_exhausted() {
        let mut session = solo(&[]);
        session.click(1, Pixel::new(0, 0));
        assert!(session.draw_next_title().is_none());
        let events = session.win_exhausted();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].target, Target::Room);
        let ServerEvent::GameFinished(finished) = &events[0].event else {
            panic!("expected game finished");
        };
        assert_eq!(finished.headline, "You win!");
        assert_eq!(finished.detail, "All sheets solved.");
        assert!(session.win_exhausted().is_empty());
    }

    #[test]
    fn test_abandon_with_teammate_keeps_the_session_alive() {
        let mut session = coop(&["pier"]);
        let (events, control) = session.abandon(1);
        assert_eq!(control, SessionControl::Removed(1));
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].target, Target::Room);
        let ServerEvent::PlayerLeft(left) = &events[0].event else {
            panic!("expected player left");
        };
        assert_eq!(left.remaining, vec!["grace"]);
        assert!(!session.is_member(1));
        // The survivor plays on.
        let (_, control) = session.click(2, Pixel::new(0, 0));
        assert_eq!(control, SessionControl::AdvanceRound);
    }

    #[test]
    fn test_abandon_of_last_member_closes() {
        let mut session = coop(&["pier"]);
        session.abandon(1);
        let (events, control) = session.abandon(2);
        assert!(events.is_empty());
        assert_eq!(control, SessionControl::Closed);
        let record = session.teardown_record().unwrap();
        assert!(record.has_abandoned);
    }

    #[test]
    fn test_solo_abandon_closes_immediately() {
        let mut session = solo(&["pier"]);
        let (events, control) = session.abandon(1);
        assert!(events.is_empty());
        assert_eq!(control, SessionControl::Closed);
    }
}
