//! Movement animation.
//!
//! Replays a confirmed figure move cell by cell at a fixed cadence of
//! `total / path_length`. Starting a new animation cancels the running one
//! and snaps its figure to the final cell first.

use std::collections::VecDeque;
use std::time::Duration;

use tokio::time::Instant;

use crate::game::player::{PlayerId, Position};

/// Default duration of a whole move.
pub const DEFAULT_MOVE_ANIMATION: Duration = Duration::from_millis(400);

#[derive(Debug, Clone)]
struct Running {
    player: PlayerId,
    shown: Position,
    remaining: VecDeque<Position>,
    step: Duration,
    next_step_at: Instant,
}

/// Displayed figure position during a move.
#[derive(Debug, Clone)]
pub struct MovementAnimator {
    total: Duration,
    running: Option<Running>,
}

impl Default for MovementAnimator {
    fn default() -> Self {
        Self::new(DEFAULT_MOVE_ANIMATION)
    }
}

impl MovementAnimator {
    /// Create an idle animator.
    pub fn new(total: Duration) -> Self {
        Self { total, running: None }
    }

    /// Animate `player` from `from` along `path`.
    ///
    /// Returns the figure of a cancelled animation, which is now shown at
    /// its final position.
    pub fn start(
        &mut self,
        player: PlayerId,
        from: Position,
        path: Vec<Position>,
        now: Instant,
    ) -> Option<PlayerId> {
        let cancelled = self.cancel();
        if path.is_empty() {
            return cancelled;
        }
        let step = self.total / path.len() as u32;
        self.running = Some(Running {
            player,
            shown: from,
            remaining: path.into(),
            step,
            next_step_at: now + step,
        });
        cancelled
    }

    /// Stop the running animation, if any.
    pub fn cancel(&mut self) -> Option<PlayerId> {
        self.running.take().map(|r| r.player)
    }

    /// Advance to `now`. Returns `true` if the shown cell changed.
    pub fn tick(&mut self, now: Instant) -> bool {
        let Some(running) = self.running.as_mut() else {
            return false;
        };
        let mut changed = false;
        while now >= running.next_step_at {
            match running.remaining.pop_front() {
                Some(next) => {
                    running.shown = next;
                    running.next_step_at += running.step;
                    changed = true;
                }
                None => break,
            }
        }
        if running.remaining.is_empty() {
            self.running = None;
        }
        changed
    }

    /// Cell to draw for `player`, if they are mid-animation.
    pub fn displayed(&self, player: PlayerId) -> Option<Position> {
        self.running
            .as_ref()
            .filter(|r| r.player == player)
            .map(|r| r.shown)
    }

    /// Animated player and the cell the animation ends on.
    pub fn target(&self) -> Option<(PlayerId, Position)> {
        self.running
            .as_ref()
            .map(|r| (r.player, r.remaining.back().copied().unwrap_or(r.shown)))
    }

    /// Whether an animation is running.
    pub fn is_animating(&self) -> bool {
        self.running.is_some()
    }

    /// When the next cell is due.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.running.as_ref().map(|r| r.next_step_at)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MS: Duration = Duration::from_millis(1);

    fn path() -> Vec<Position> {
        vec![Position::new(0, 1), Position::new(0, 2), Position::new(1, 2), Position::new(2, 2)]
    }

    #[test]
    fn test_steps_at_fixed_cadence() {
        let start = Instant::now();
        let mut anim = MovementAnimator::new(400 * MS);
        anim.start(0, Position::new(0, 0), path(), start);

        assert_eq!(anim.displayed(0), Some(Position::new(0, 0)));
        assert!(!anim.tick(start + 99 * MS));
        assert!(anim.tick(start + 100 * MS));
        assert_eq!(anim.displayed(0), Some(Position::new(0, 1)));

        assert!(anim.tick(start + 250 * MS));
        assert_eq!(anim.displayed(0), Some(Position::new(0, 2)));

        assert!(anim.tick(start + 400 * MS));
        assert!(!anim.is_animating());
        assert_eq!(anim.displayed(0), None);
    }

    #[test]
    fn test_new_move_cancels_running() {
        let start = Instant::now();
        let mut anim = MovementAnimator::new(400 * MS);
        anim.start(0, Position::new(0, 0), path(), start);
        anim.tick(start + 100 * MS);

        let cancelled = anim.start(1, Position::new(6, 0), vec![Position::new(6, 1)], start + 150 * MS);
        assert_eq!(cancelled, Some(0));
        assert_eq!(anim.displayed(0), None);
        assert_eq!(anim.displayed(1), Some(Position::new(6, 0)));
        assert_eq!(anim.next_deadline(), Some(start + 550 * MS));
    }

    #[test]
    fn test_empty_path_does_not_animate() {
        let mut anim = MovementAnimator::default();
        assert_eq!(anim.start(0, Position::new(0, 0), Vec::new(), Instant::now()), None);
        assert!(!anim.is_animating());
        assert_eq!(anim.next_deadline(), None);
    }
}
