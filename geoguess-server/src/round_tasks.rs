//! Ownership of the timer and agent tasks spawned for each round.
//!
//! Every task spawned for a round waits on a token registered here. Ending a
//! round, starting the next one, or evicting a game cancels the tokens so no
//! superseded task wakes up later. Tasks still re-check the round id when they
//! fire, since cancellation can race with a timer that has already elapsed.

use dashmap::DashMap;
use geoguess_types::{GameId, RoundId};
use tokio_util::sync::CancellationToken;

#[derive(Debug)]
struct RoundTaskEntry {
    game_id: GameId,
    token: CancellationToken,
    agents_scheduled: bool,
}

#[derive(Debug, Default)]
pub struct RoundTasks {
    rounds: DashMap<RoundId, RoundTaskEntry>,
}

impl RoundTasks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a newly opened round and return the token its timer waits on.
    pub fn register(&self, game_id: GameId, round_id: RoundId) -> CancellationToken {
        let token = CancellationToken::new();
        let previous = self.rounds.insert(
            round_id,
            RoundTaskEntry {
                game_id,
                token: token.clone(),
                agents_scheduled: false,
            },
        );
        if let Some(previous) = previous {
            previous.token.cancel();
        }
        token
    }

    /// Token for the round's computer-player tasks. Returns `None` when the
    /// round is no longer tracked or its agents were already scheduled.
    pub fn schedule_agents(&self, round_id: RoundId) -> Option<CancellationToken> {
        let mut entry = self.rounds.get_mut(&round_id)?;
        if entry.agents_scheduled {
            return None;
        }
        entry.agents_scheduled = true;
        Some(entry.token.child_token())
    }

    pub fn cancel(&self, round_id: RoundId) -> bool {
        match self.rounds.remove(&round_id) {
            Some((_, entry)) => {
                entry.token.cancel();
                true
            }
            None => false,
        }
    }

    /// Cancel everything still pending for a game. Returns how many rounds
    /// were torn down.
    pub fn cancel_game(&self, game_id: GameId) -> usize {
        let round_ids: Vec<RoundId> = self
            .rounds
            .iter()
            .filter(|entry| entry.game_id == game_id)
            .map(|entry| *entry.key())
            .collect();

        round_ids
            .into_iter()
            .filter(|round_id| self.cancel(*round_id))
            .count()
    }

    pub fn is_pending(&self, round_id: RoundId) -> bool {
        self.rounds.contains_key(&round_id)
    }

    pub fn pending_count(&self) -> usize {
        self.rounds.len()
    }
}
