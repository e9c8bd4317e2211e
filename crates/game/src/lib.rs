//! Spotdiff Gameplay Core
//!
//! This crate contains the deterministic rules of the spot-the-differences
//! game: the difference pool a session consumes, the per-mode clock, the
//! win-threshold arithmetic, and the title deck the survival mode draws
//! rounds from.
//!
//! # Architecture Constraints
//!
//! The Gameplay Core MUST NOT:
//! - Perform I/O operations (file, network, etc.)
//! - Read wall-clock time
//! - Use ambient/unseeded randomness (callers supply the `Rng`)
//!
//! Session orchestration, timers, and connection identity live in the
//! server crate; this crate only answers "what does this click/second/draw
//! do to the game state".

#![deny(unsafe_code)]

use rand::Rng;
use serde::{Deserialize, Serialize};

// ============================================================================
// Type Aliases
// ============================================================================

/// Game time in seconds. Fractional values are legal; outbound protocol
/// events quantize to milliseconds.
pub type Seconds = f64;

// ============================================================================
// Modes
// ============================================================================

/// The two gameplay variants a session can run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GameMode {
    /// Count-up race: find your share of the differences first.
    Classic,
    /// Count-down survival: one find per sheet, sheets until the deck or
    /// the clock runs out.
    Timed,
}

impl GameMode {
    /// Stable lowercase name, used in room identifiers and archive records.
    pub fn as_str(&self) -> &'static str {
        match self {
            GameMode::Classic => "classic",
            GameMode::Timed => "timed",
        }
    }
}

// ============================================================================
// Pixels & Difference Groups
// ============================================================================

/// One pixel coordinate in the shared image pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Pixel {
    pub x: u32,
    pub y: u32,
}

impl Pixel {
    pub fn new(x: u32, y: u32) -> Self {
        Self { x, y }
    }
}

/// An atomic, all-or-nothing set of pixels that counts as one spottable
/// difference. A click on any member pixel resolves the whole group.
///
/// Groups are immutable once authored; the constructor rejects empty
/// groups because an unclickable difference could never be found.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DifferenceGroup {
    pixels: Vec<Pixel>,
}

impl DifferenceGroup {
    /// Create a group from its member pixels.
    ///
    /// # Panics
    ///
    /// Panics if `pixels` is empty.
    pub fn new(pixels: Vec<Pixel>) -> Self {
        assert!(!pixels.is_empty(), "difference group must have pixels");
        Self { pixels }
    }

    /// Whether `pixel` is a member of this group.
    pub fn contains(&self, pixel: Pixel) -> bool {
        self.pixels.contains(&pixel)
    }

    /// The member pixels.
    pub fn pixels(&self) -> &[Pixel] {
        &self.pixels
    }

    pub fn len(&self) -> usize {
        self.pixels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pixels.is_empty()
    }
}

// ============================================================================
// Difference Pool
// ============================================================================

/// The shrinking set of not-yet-found differences for the current sheet.
///
/// `total` is the size of the sheet's authored set and is what the win
/// threshold is computed against; it only changes when a new sheet is
/// loaded with [`DiffPool::reload`].
#[derive(Debug, Clone)]
pub struct DiffPool {
    remaining: Vec<DifferenceGroup>,
    total: usize,
}

impl DiffPool {
    pub fn new(groups: Vec<DifferenceGroup>) -> Self {
        let total = groups.len();
        Self {
            remaining: groups,
            total,
        }
    }

    /// Size of the authored set for the current sheet.
    pub fn total(&self) -> usize {
        self.total
    }

    /// How many differences are still unfound.
    pub fn remaining(&self) -> usize {
        self.remaining.len()
    }

    /// How many differences have been found on the current sheet.
    pub fn found(&self) -> usize {
        self.total - self.remaining.len()
    }

    pub fn is_exhausted(&self) -> bool {
        self.remaining.is_empty()
    }

    /// Resolve a click: if `pixel` belongs to a remaining group, remove
    /// that group from the pool and return it. Order of the remaining
    /// groups is not meaningful.
    pub fn resolve(&mut self, pixel: Pixel) -> Option<DifferenceGroup> {
        let idx = self.remaining.iter().position(|g| g.contains(pixel))?;
        Some(self.remaining.swap_remove(idx))
    }

    /// Pick one still-remaining group pseudo-randomly without removing it.
    /// Used for clues. Returns `None` when the pool is exhausted.
    pub fn reveal<R: Rng + ?Sized>(&self, rng: &mut R) -> Option<&DifferenceGroup> {
        if self.remaining.is_empty() {
            return None;
        }
        let idx = rng.random_range(0..self.remaining.len());
        Some(&self.remaining[idx])
    }

    /// Replace the pool with a new sheet's authored set. Resets `total`.
    pub fn reload(&mut self, groups: Vec<DifferenceGroup>) {
        self.total = groups.len();
        self.remaining = groups;
    }
}

// ============================================================================
// Game Clock
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Up,
    Down,
}

/// The per-session clock.
///
/// Classic sessions count up from zero (elapsed time, lower is better).
/// Timed sessions count down from an initial budget, floored at zero.
/// Penalties and the periodic tick both go through [`GameClock::apply`],
/// which moves the clock in its mode's direction.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GameClock {
    seconds: Seconds,
    direction: Direction,
}

impl GameClock {
    /// A count-up clock starting at zero.
    pub fn count_up() -> Self {
        Self {
            seconds: 0.0,
            direction: Direction::Up,
        }
    }

    /// A count-down clock starting at `initial` seconds.
    ///
    /// # Panics
    ///
    /// Panics if `initial` is negative or non-finite.
    pub fn count_down(initial: Seconds) -> Self {
        assert!(initial.is_finite() && initial >= 0.0, "initial time must be >= 0");
        Self {
            seconds: initial,
            direction: Direction::Down,
        }
    }

    /// Move the clock by `delta` seconds in its direction. Count-down
    /// clocks floor at zero. Returns the new value.
    pub fn apply(&mut self, delta: Seconds) -> Seconds {
        match self.direction {
            Direction::Up => self.seconds += delta,
            Direction::Down => self.seconds = (self.seconds - delta).max(0.0),
        }
        self.seconds
    }

    /// Add `bonus` seconds, capping the result at `cap`. Used by the
    /// survival mode's round reward. Returns the new value.
    pub fn grant(&mut self, bonus: Seconds, cap: Seconds) -> Seconds {
        self.seconds = (self.seconds + bonus).min(cap);
        self.seconds
    }

    pub fn seconds(&self) -> Seconds {
        self.seconds
    }

    /// Current value in whole milliseconds, as broadcast to clients.
    pub fn millis(&self) -> u64 {
        (self.seconds * 1000.0) as u64
    }

    /// True when a count-down clock has hit its zero floor. Always false
    /// for count-up clocks.
    pub fn is_depleted(&self) -> bool {
        self.direction == Direction::Down && self.seconds <= 0.0
    }
}

// ============================================================================
// Win Threshold
// ============================================================================

/// Per-player find target for a classic session: the plain real division
/// `total / players`, compared with `>=`.
///
/// The division is deliberately not rounded: 3 differences split between
/// 2 players give a target of 1.5, so the second find wins. Changing this
/// to a ceiling would change win timing.
pub fn win_target(total: usize, players: usize) -> f64 {
    assert!(players >= 1, "session must have players");
    total as f64 / players as f64
}

/// Whether a player's find count reaches the classic win threshold.
pub fn meets_target(found: usize, total: usize, players: usize) -> bool {
    found as f64 >= win_target(total, players)
}

// ============================================================================
// Title Deck
// ============================================================================

/// A session-local snapshot of candidate sheet titles, consumed
/// destructively one random draw at a time by the survival mode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TitleDeck {
    titles: Vec<String>,
}

impl TitleDeck {
    pub fn new(titles: Vec<String>) -> Self {
        Self { titles }
    }

    /// Pop one title pseudo-randomly, or `None` when the deck is empty.
    pub fn draw<R: Rng + ?Sized>(&mut self, rng: &mut R) -> Option<String> {
        if self.titles.is_empty() {
            return None;
        }
        let idx = rng.random_range(0..self.titles.len());
        Some(self.titles.swap_remove(idx))
    }

    pub fn len(&self) -> usize {
        self.titles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.titles.is_empty()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn group(pixels: &[(u32, u32)]) -> DifferenceGroup {
        DifferenceGroup::new(pixels.iter().map(|&(x, y)| Pixel::new(x, y)).collect())
    }

    #[test]
    fn test_group_contains_member_pixel() {
        let g = group(&[(1, 1), (1, 2), (2, 1)]);
        assert!(g.contains(Pixel::new(1, 2)));
        assert!(!g.contains(Pixel::new(3, 3)));
    }

    #[test]
    #[should_panic(expected = "difference group must have pixels")]
    fn test_empty_group_rejected() {
        DifferenceGroup::new(vec![]);
    }

    #[test]
    fn test_pool_resolve_hit_removes_group() {
        let mut pool = DiffPool::new(vec![group(&[(0, 0)]), group(&[(5, 5), (5, 6)])]);
        let hit = pool.resolve(Pixel::new(5, 6)).unwrap();
        assert!(hit.contains(Pixel::new(5, 5)));
        assert_eq!(pool.remaining(), 1);
        assert_eq!(pool.found(), 1);
        assert_eq!(pool.total(), 2);
        // The same pixel cannot be found twice.
        assert!(pool.resolve(Pixel::new(5, 6)).is_none());
    }

    #[test]
    fn test_pool_resolve_miss_changes_nothing() {
        let mut pool = DiffPool::new(vec![group(&[(0, 0)])]);
        assert!(pool.resolve(Pixel::new(9, 9)).is_none());
        assert_eq!(pool.remaining(), 1);
        assert_eq!(pool.found(), 0);
    }

    #[test]
    fn test_pool_exhaustion() {
        let mut pool = DiffPool::new(vec![group(&[(0, 0)])]);
        assert!(!pool.is_exhausted());
        pool.resolve(Pixel::new(0, 0)).unwrap();
        assert!(pool.is_exhausted());
        assert_eq!(pool.found(), 1);
    }

    #[test]
    fn test_pool_reveal_returns_remaining_group() {
        let mut rng = StdRng::seed_from_u64(7);
        let mut pool = DiffPool::new(vec![group(&[(0, 0)]), group(&[(1, 1)])]);
        let revealed = pool.reveal(&mut rng).unwrap().clone();
        // Reveal does not consume the group; it can still be resolved.
        assert_eq!(pool.remaining(), 2);
        let px = revealed.pixels()[0];
        assert!(pool.resolve(px).is_some());
    }

    #[test]
    fn test_pool_reveal_empty_is_none() {
        let mut rng = StdRng::seed_from_u64(7);
        let mut pool = DiffPool::new(vec![group(&[(0, 0)])]);
        pool.resolve(Pixel::new(0, 0));
        assert!(pool.reveal(&mut rng).is_none());
    }

    #[test]
    fn test_pool_reload_resets_total() {
        let mut pool = DiffPool::new(vec![group(&[(0, 0)]), group(&[(1, 1)])]);
        pool.resolve(Pixel::new(0, 0));
        pool.reload(vec![group(&[(2, 2)]), group(&[(3, 3)]), group(&[(4, 4)])]);
        assert_eq!(pool.total(), 3);
        assert_eq!(pool.remaining(), 3);
        assert_eq!(pool.found(), 0);
    }

    #[test]
    fn test_clock_count_up_accumulates() {
        let mut clock = GameClock::count_up();
        assert_eq!(clock.apply(1.0), 1.0);
        assert_eq!(clock.apply(2.5), 3.5);
        assert_eq!(clock.millis(), 3500);
        assert!(!clock.is_depleted());
    }

    #[test]
    fn test_clock_count_down_floors_at_zero() {
        let mut clock = GameClock::count_down(3.0);
        assert_eq!(clock.apply(1.0), 2.0);
        assert!(!clock.is_depleted());
        assert_eq!(clock.apply(5.0), 0.0);
        assert!(clock.is_depleted());
        // Further ticks stay at the floor.
        assert_eq!(clock.apply(1.0), 0.0);
    }

    #[test]
    fn test_clock_grant_caps_at_maximum() {
        let mut clock = GameClock::count_down(60.0);
        clock.apply(8.0);
        assert_eq!(clock.grant(10.0, 60.0), 60.0);
        clock.apply(30.0);
        assert_eq!(clock.grant(10.0, 60.0), 40.0);
    }

    #[test]
    fn test_clock_millis_truncates() {
        let mut clock = GameClock::count_up();
        clock.apply(1.2345);
        assert_eq!(clock.millis(), 1234);
    }

    #[test]
    fn test_win_target_is_literal_division() {
        // 3 differences split two ways: target 1.5, second find wins.
        assert_eq!(win_target(3, 2), 1.5);
        assert!(!meets_target(1, 3, 2));
        assert!(meets_target(2, 3, 2));

        assert_eq!(win_target(4, 2), 2.0);
        assert!(meets_target(2, 4, 2));

        // Solo: the full set.
        assert!(!meets_target(2, 3, 1));
        assert!(meets_target(3, 3, 1));
    }

    #[test]
    fn test_deck_draw_consumes_titles() {
        let mut rng = StdRng::seed_from_u64(42);
        let mut deck = TitleDeck::new(vec!["a".into(), "b".into(), "c".into()]);
        let mut drawn = Vec::new();
        while let Some(title) = deck.draw(&mut rng) {
            drawn.push(title);
        }
        assert_eq!(deck.len(), 0);
        drawn.sort();
        assert_eq!(drawn, vec!["a", "b", "c"]);
        assert!(deck.draw(&mut rng).is_none());
    }

    #[test]
    fn test_deck_draw_is_seed_deterministic() {
        let titles = vec!["a".to_string(), "b".into(), "c".into(), "d".into()];
        let mut deck1 = TitleDeck::new(titles.clone());
        let mut deck2 = TitleDeck::new(titles);
        let mut rng1 = StdRng::seed_from_u64(9);
        let mut rng2 = StdRng::seed_from_u64(9);
        assert_eq!(deck1.draw(&mut rng1), deck2.draw(&mut rng2));
        assert_eq!(deck1.draw(&mut rng1), deck2.draw(&mut rng2));
    }
}
