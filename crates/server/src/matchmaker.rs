//! Waiting-room lifecycle: versus rooms keyed by sheet title plus the
//! flat co-op survival queue.
//!
//! The matchmaker is a pure state machine owned by the engine actor, so
//! every mutation here is already serialized. It never performs I/O and
//! never holds channel handles; operations return [`Notice`]s for the
//! engine to deliver and, where a match forms, the popped players for
//! the engine to seat. Catalog checks happen in the engine before the
//! call, liveness checks are injected through a closure.
//!
//! A versus room is a host (index 0) plus a FIFO of requesters. Only
//! the first two seats negotiate; everyone behind them waits silently
//! until `promote_next` shifts them up.

use std::collections::{HashMap, VecDeque};

use spotdiff_wire::{self as wire, ConnectionId, ServerEvent};

// ============================================================================
// Notices
// ============================================================================

/// A player waiting to be matched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Player {
    pub conn: ConnectionId,
    pub name: String,
}

impl Player {
    pub fn new(conn: ConnectionId, name: impl Into<String>) -> Self {
        Self {
            conn,
            name: name.into(),
        }
    }
}

/// Where a matchmaking notice goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recipient {
    /// One specific connection.
    Conn(ConnectionId),
    /// Every connection in the browse group.
    Browsers,
}

/// One outbound matchmaking event, resolved by the engine.
#[derive(Debug, Clone, PartialEq)]
pub struct Notice {
    pub recipient: Recipient,
    pub event: ServerEvent,
}

impl Notice {
    fn conn(conn: ConnectionId, event: ServerEvent) -> Self {
        Self {
            recipient: Recipient::Conn(conn),
            event,
        }
    }

    fn browsers(event: ServerEvent) -> Self {
        Self {
            recipient: Recipient::Browsers,
            event,
        }
    }

    fn kicked(conn: ConnectionId) -> Self {
        Self::conn(conn, ServerEvent::Kicked(wire::Kicked {}))
    }
}

fn join_requested(host: ConnectionId, guest_name: &str, title: &str) -> Notice {
    Notice::conn(
        host,
        ServerEvent::JoinRequested(wire::JoinRequested {
            name: guest_name.to_string(),
            title: title.to_string(),
        }),
    )
}

/// A formed versus pair, ready for the engine to seat.
#[derive(Debug, Clone, PartialEq)]
pub struct VersusLaunch {
    pub title: String,
    pub host: Player,
    pub guest: Player,
}

/// Result of an accept: notices to deliver plus, on success, the pair
/// to seat in a new versus session.
#[derive(Debug, Default)]
pub struct AcceptOutcome {
    pub notices: Vec<Notice>,
    pub launch: Option<VersusLaunch>,
}

// ============================================================================
// Matchmaker
// ============================================================================

#[derive(Debug, Default)]
pub struct Matchmaker {
    /// Versus waiting rooms: host at index 0, requesters behind in
    /// arrival order.
    rooms: HashMap<String, Vec<Player>>,
    /// Side table resolving a waiting connection to its room's title.
    waiting_title: HashMap<ConnectionId, String>,
    /// Co-op survival queue, paired first-come first-served.
    timed_queue: VecDeque<Player>,
}

impl Matchmaker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Titles with an open versus room, for replaying `RoomOpened` to a
    /// connection that joins the browse group late.
    pub fn open_titles(&self) -> Vec<String> {
        let mut titles: Vec<String> = self.rooms.keys().cloned().collect();
        titles.sort();
        titles
    }

    pub fn is_waiting(&self, conn: ConnectionId) -> bool {
        self.waiting_title.contains_key(&conn)
            || self.timed_queue.iter().any(|p| p.conn == conn)
    }

    /// Open a room for `title` or join the existing one. The engine has
    /// already verified the title against the catalog.
    pub fn request_versus(&mut self, title: &str, player: Player) -> Vec<Notice> {
        self.waiting_title.insert(player.conn, title.to_string());
        match self.rooms.get_mut(title) {
            None => {
                self.rooms.insert(title.to_string(), vec![player]);
                vec![Notice::browsers(ServerEvent::RoomOpened(wire::RoomOpened {
                    title: title.to_string(),
                }))]
            }
            Some(room) => {
                let host = room[0].conn;
                let guest_name = player.name.clone();
                room.push(player);
                if room.len() == 2 {
                    vec![join_requested(host, &guest_name, title)]
                } else {
                    // Behind the negotiating pair; addressed on promotion.
                    Vec::new()
                }
            }
        }
    }

    /// The host accepts the guest at the head of the queue. A stale
    /// accept (no guest present, or the guest's connection already
    /// dropped) kicks everyone still seated and discards the room.
    pub fn accept_guest(
        &mut self,
        host: ConnectionId,
        guest_live: &dyn Fn(ConnectionId) -> bool,
    ) -> AcceptOutcome {
        let Some(title) = self.waiting_title.get(&host).cloned() else {
            return AcceptOutcome {
                notices: vec![Notice::kicked(host)],
                launch: None,
            };
        };
        let Some(room) = self.rooms.get_mut(&title) else {
            return AcceptOutcome::default();
        };
        if room.first().map(|p| p.conn) != Some(host) {
            // A queued guest has no accept to make.
            return AcceptOutcome {
                notices: vec![Notice::kicked(host)],
                launch: None,
            };
        }
        let guest_ok = room.get(1).is_some_and(|guest| guest_live(guest.conn));
        if !guest_ok {
            return AcceptOutcome {
                notices: self.discard_room(&title),
                launch: None,
            };
        }
        let seated_host = room.remove(0);
        let guest = room.remove(0);
        self.waiting_title.remove(&seated_host.conn);
        self.waiting_title.remove(&guest.conn);
        let mut notices = self.promote_next(&title, true, true);
        notices.extend(self.close_if_empty(&title));
        AcceptOutcome {
            notices,
            launch: Some(VersusLaunch {
                title,
                host: seated_host,
                guest,
            }),
        }
    }

    /// The host turns away the guest at the head of the queue. The next
    /// requester, if any, is offered immediately.
    pub fn refuse_guest(&mut self, host: ConnectionId) -> Vec<Notice> {
        let Some(title) = self.waiting_title.get(&host).cloned() else {
            return vec![Notice::kicked(host)];
        };
        let Some(room) = self.rooms.get_mut(&title) else {
            return Vec::new();
        };
        if room.first().map(|p| p.conn) != Some(host) {
            return vec![Notice::kicked(host)];
        }
        if room.len() < 2 {
            // Nothing pending; the refusal raced a cancellation.
            return Vec::new();
        }
        let refused = room.remove(1);
        let next_name = room.get(1).map(|p| p.name.clone());
        self.waiting_title.remove(&refused.conn);
        let mut notices = vec![Notice::conn(
            refused.conn,
            ServerEvent::Refused(wire::Refused {}),
        )];
        if let Some(name) = next_name {
            notices.push(join_requested(host, &name, &title));
        }
        notices
    }

    /// Remove `conn` from whichever waiting structure holds it, then
    /// promote the room it left. Idempotent: unknown connections are a
    /// no-op, so a late disconnect after a cancel is harmless.
    pub fn cancel(&mut self, conn: ConnectionId) -> Vec<Notice> {
        if let Some(idx) = self.timed_queue.iter().position(|p| p.conn == conn) {
            self.timed_queue.remove(idx);
            return Vec::new();
        }
        let Some(title) = self.waiting_title.remove(&conn) else {
            return Vec::new();
        };
        let Some(room) = self.rooms.get_mut(&title) else {
            return Vec::new();
        };
        let Some(idx) = room.iter().position(|p| p.conn == conn) else {
            return Vec::new();
        };
        room.remove(idx);
        // Seats only shift for players behind the leaver, so promotion
        // notices fire only when the negotiating pair actually changed.
        let mut notices = self.promote_next(&title, idx == 0, idx <= 1);
        notices.extend(self.close_if_empty(&title));
        notices
    }

    /// Enqueue for co-op survival. Returns the popped pair (first-come
    /// first, as player one) once two players are waiting; the engine
    /// still has to check the catalog before seating them.
    pub fn request_timed(&mut self, player: Player) -> Option<(Player, Player)> {
        self.timed_queue.push_back(player);
        if self.timed_queue.len() < 2 {
            return None;
        }
        let first = self.timed_queue.pop_front()?;
        let second = self.timed_queue.pop_front()?;
        Some((first, second))
    }

    /// Kick everyone still seated in `title`'s room and drop the room.
    fn discard_room(&mut self, title: &str) -> Vec<Notice> {
        let Some(room) = self.rooms.remove(title) else {
            return Vec::new();
        };
        let mut notices = Vec::new();
        for player in room {
            self.waiting_title.remove(&player.conn);
            notices.push(Notice::kicked(player.conn));
        }
        notices.push(Notice::browsers(ServerEvent::RoomClosed(wire::RoomClosed {
            title: title.to_string(),
        })));
        notices
    }

    /// Re-raise negotiation for the seats that changed. `head_changed`
    /// crowns the new index 0; `second_changed` re-offers the new head
    /// guest to the host.
    fn promote_next(&mut self, title: &str, head_changed: bool, second_changed: bool) -> Vec<Notice> {
        let Some(room) = self.rooms.get(title) else {
            return Vec::new();
        };
        let Some(head) = room.first() else {
            return Vec::new();
        };
        let mut notices = Vec::new();
        if head_changed {
            notices.push(Notice::conn(
                head.conn,
                ServerEvent::BecameHost(wire::BecameHost {}),
            ));
        }
        if head_changed || second_changed {
            if let Some(second) = room.get(1) {
                notices.push(join_requested(head.conn, &second.name, title));
            }
        }
        notices
    }

    fn close_if_empty(&mut self, title: &str) -> Vec<Notice> {
        if self.rooms.get(title).is_some_and(|room| room.is_empty()) {
            self.rooms.remove(title);
            return vec![Notice::browsers(ServerEvent::RoomClosed(
                wire::RoomClosed {
                    title: title.to_string(),
                },
            ))];
        }
        Vec::new()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn always_live(_: ConnectionId) -> bool {
        true
    }

    fn kicked(conn: ConnectionId) -> Notice {
        Notice::kicked(conn)
    }

    #[test]
    fn test_first_request_opens_room_for_browsers() {
        let mut mm = Matchmaker::new();
        let notices = mm.request_versus("harbor", Player::new(1, "ada"));
        assert_eq!(notices.len(), 1);
        assert_eq!(notices[0].recipient, Recipient::Browsers);
        let ServerEvent::RoomOpened(opened) = &notices[0].event else {
            panic!("expected room opened");
        };
        assert_eq!(opened.title, "harbor");
        assert_eq!(mm.open_titles(), vec!["harbor"]);
        assert!(mm.is_waiting(1));
    }

    #[test]
    fn test_second_request_raises_join_request_to_host() {
        let mut mm = Matchmaker::new();
        mm.request_versus("harbor", Player::new(1, "ada"));
        let notices = mm.request_versus("harbor", Player::new(2, "grace"));
        assert_eq!(notices.len(), 1);
        assert_eq!(notices[0].recipient, Recipient::Conn(1));
        let ServerEvent::JoinRequested(req) = &notices[0].event else {
            panic!("expected join request");
        };
        assert_eq!(req.name, "grace");
        assert_eq!(req.title, "harbor");
    }

    #[test]
    fn test_overflow_requesters_wait_silently() {
        let mut mm = Matchmaker::new();
        mm.request_versus("harbor", Player::new(1, "ada"));
        mm.request_versus("harbor", Player::new(2, "grace"));
        let notices = mm.request_versus("harbor", Player::new(3, "lin"));
        assert!(notices.is_empty());
        assert!(mm.is_waiting(3));
    }

    #[test]
    fn test_accept_launches_pair_and_promotes_the_rest() {
        let mut mm = Matchmaker::new();
        mm.request_versus("harbor", Player::new(1, "ada"));
        mm.request_versus("harbor", Player::new(2, "grace"));
        mm.request_versus("harbor", Player::new(3, "lin"));
        mm.request_versus("harbor", Player::new(4, "mei"));
        let outcome = mm.accept_guest(1, &always_live);
        let launch = outcome.launch.expect("pair should launch");
        assert_eq!(launch.title, "harbor");
        assert_eq!(launch.host.conn, 1);
        assert_eq!(launch.guest.conn, 2);
        // The leftover queue renegotiates: 3 is crowned, 4 is offered.
        assert_eq!(
            outcome.notices,
            vec![
                Notice::conn(3, ServerEvent::BecameHost(wire::BecameHost {})),
                join_requested(3, "mei", "harbor"),
            ]
        );
        assert!(!mm.is_waiting(1));
        assert!(!mm.is_waiting(2));
        assert!(mm.is_waiting(3));
    }

    #[test]
    fn test_accept_of_last_pair_closes_the_room() {
        let mut mm = Matchmaker::new();
        mm.request_versus("harbor", Player::new(1, "ada"));
        mm.request_versus("harbor", Player::new(2, "grace"));
        let outcome = mm.accept_guest(1, &always_live);
        assert!(outcome.launch.is_some());
        assert_eq!(outcome.notices.len(), 1);
        assert_eq!(outcome.notices[0].recipient, Recipient::Browsers);
        assert!(matches!(
            outcome.notices[0].event,
            ServerEvent::RoomClosed(_)
        ));
        assert!(mm.open_titles().is_empty());
    }

    #[test]
    fn test_accept_without_guest_discards_the_room() {
        let mut mm = Matchmaker::new();
        mm.request_versus("harbor", Player::new(1, "ada"));
        let outcome = mm.accept_guest(1, &always_live);
        assert!(outcome.launch.is_none());
        assert_eq!(
            outcome.notices,
            vec![
                kicked(1),
                Notice::browsers(ServerEvent::RoomClosed(wire::RoomClosed {
                    title: "harbor".to_string(),
                })),
            ]
        );
        assert!(!mm.is_waiting(1));
    }

    #[test]
    fn test_accept_of_dead_guest_kicks_everyone_seated() {
        let mut mm = Matchmaker::new();
        mm.request_versus("harbor", Player::new(1, "ada"));
        mm.request_versus("harbor", Player::new(2, "grace"));
        mm.request_versus("harbor", Player::new(3, "lin"));
        let outcome = mm.accept_guest(1, &|conn| conn != 2);
        assert!(outcome.launch.is_none());
        assert_eq!(
            outcome.notices,
            vec![
                kicked(1),
                kicked(2),
                kicked(3),
                Notice::browsers(ServerEvent::RoomClosed(wire::RoomClosed {
                    title: "harbor".to_string(),
                })),
            ]
        );
        assert!(mm.open_titles().is_empty());
    }

    #[test]
    fn test_accept_from_non_waiting_connection_kicks() {
        let mut mm = Matchmaker::new();
        let outcome = mm.accept_guest(9, &always_live);
        assert!(outcome.launch.is_none());
        assert_eq!(outcome.notices, vec![kicked(9)]);
    }

    #[test]
    fn test_accept_from_queued_guest_kicks() {
        let mut mm = Matchmaker::new();
        mm.request_versus("harbor", Player::new(1, "ada"));
        mm.request_versus("harbor", Player::new(2, "grace"));
        let outcome = mm.accept_guest(2, &always_live);
        assert!(outcome.launch.is_none());
        assert_eq!(outcome.notices, vec![kicked(2)]);
        // The room is untouched.
        assert!(mm.is_waiting(1));
        assert!(mm.is_waiting(2));
    }

    #[test]
    fn test_refuse_notifies_guest_and_keeps_host() {
        let mut mm = Matchmaker::new();
        mm.request_versus("harbor", Player::new(1, "ada"));
        mm.request_versus("harbor", Player::new(2, "grace"));
        let notices = mm.refuse_guest(1);
        assert_eq!(
            notices,
            vec![Notice::conn(2, ServerEvent::Refused(wire::Refused {}))]
        );
        assert!(mm.is_waiting(1));
        assert!(!mm.is_waiting(2));
        assert_eq!(mm.open_titles(), vec!["harbor"]);
    }

    #[test]
    fn test_refuse_offers_the_next_requester() {
        let mut mm = Matchmaker::new();
        mm.request_versus("harbor", Player::new(1, "ada"));
        mm.request_versus("harbor", Player::new(2, "grace"));
        mm.request_versus("harbor", Player::new(3, "lin"));
        let notices = mm.refuse_guest(1);
        assert_eq!(
            notices,
            vec![
                Notice::conn(2, ServerEvent::Refused(wire::Refused {})),
                join_requested(1, "lin", "harbor"),
            ]
        );
    }

    #[test]
    fn test_refuse_with_no_guest_is_a_no_op() {
        let mut mm = Matchmaker::new();
        mm.request_versus("harbor", Player::new(1, "ada"));
        assert!(mm.refuse_guest(1).is_empty());
        assert!(mm.is_waiting(1));
    }

    #[test]
    fn test_cancel_of_host_crowns_the_next_requester() {
        let mut mm = Matchmaker::new();
        mm.request_versus("harbor", Player::new(1, "ada"));
        mm.request_versus("harbor", Player::new(2, "grace"));
        mm.request_versus("harbor", Player::new(3, "lin"));
        let notices = mm.cancel(1);
        assert_eq!(
            notices,
            vec![
                Notice::conn(2, ServerEvent::BecameHost(wire::BecameHost {})),
                join_requested(2, "lin", "harbor"),
            ]
        );
        assert!(!mm.is_waiting(1));
    }

    #[test]
    fn test_cancel_of_last_member_closes_the_room() {
        let mut mm = Matchmaker::new();
        mm.request_versus("harbor", Player::new(1, "ada"));
        let notices = mm.cancel(1);
        assert_eq!(
            notices,
            vec![Notice::browsers(ServerEvent::RoomClosed(wire::RoomClosed {
                title: "harbor".to_string(),
            }))]
        );
        assert!(mm.open_titles().is_empty());
    }

    #[test]
    fn test_cancel_of_head_guest_is_silent_for_the_host() {
        // The host is not told the pending request was withdrawn; a
        // later accept resolves as stale and discards the room.
        let mut mm = Matchmaker::new();
        mm.request_versus("harbor", Player::new(1, "ada"));
        mm.request_versus("harbor", Player::new(2, "grace"));
        assert!(mm.cancel(2).is_empty());
        let outcome = mm.accept_guest(1, &always_live);
        assert!(outcome.launch.is_none());
        assert_eq!(outcome.notices[0], kicked(1));
    }

    #[test]
    fn test_cancel_of_backrow_guest_notifies_nobody() {
        let mut mm = Matchmaker::new();
        mm.request_versus("harbor", Player::new(1, "ada"));
        mm.request_versus("harbor", Player::new(2, "grace"));
        mm.request_versus("harbor", Player::new(3, "lin"));
        assert!(mm.cancel(3).is_empty());
        assert!(!mm.is_waiting(3));
    }

    #[test]
    fn test_cancel_is_idempotent() {
        let mut mm = Matchmaker::new();
        mm.request_versus("harbor", Player::new(1, "ada"));
        mm.cancel(1);
        assert!(mm.cancel(1).is_empty());
    }

    #[test]
    fn test_timed_queue_pairs_in_arrival_order() {
        let mut mm = Matchmaker::new();
        assert!(mm.request_timed(Player::new(1, "ada")).is_none());
        assert!(mm.is_waiting(1));
        let (first, second) = mm.request_timed(Player::new(2, "grace")).unwrap();
        assert_eq!(first.conn, 1);
        assert_eq!(second.conn, 2);
        assert!(!mm.is_waiting(1));
        assert!(!mm.is_waiting(2));
    }

    #[test]
    fn test_timed_queue_cancel_removes_the_waiter() {
        let mut mm = Matchmaker::new();
        mm.request_timed(Player::new(1, "ada"));
        mm.cancel(1);
        // The next arrival waits instead of pairing with a ghost.
        assert!(mm.request_timed(Player::new(2, "grace")).is_none());
    }
}
