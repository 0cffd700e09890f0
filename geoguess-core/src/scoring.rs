use geoguess_types::{GameRound, PlayerId, PlayerScore};

pub const EARTH_RADIUS_KM: f64 = 6371.0;

/// A guess reduced to what placement needs.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GuessDistance {
    pub player_id: PlayerId,
    pub distance: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RankedGuess {
    pub player_id: PlayerId,
    pub placement: u32,
    pub placement_points: i32,
}

pub struct ScoringEngine;

impl ScoringEngine {
    /// Great-circle distance in kilometres between two coordinates (haversine).
    pub fn distance(a_lat: f64, a_lng: f64, b_lat: f64, b_lng: f64) -> f64 {
        let d_lat = (b_lat - a_lat).to_radians();
        let d_lng = (b_lng - a_lng).to_radians();
        let a = (d_lat / 2.0).sin().powi(2)
            + a_lat.to_radians().cos() * b_lat.to_radians().cos() * (d_lng / 2.0).sin().powi(2);
        let a = a.min(1.0);
        let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());
        EARTH_RADIUS_KM * c
    }

    /// Proximity bonus tier. Each boundary belongs to the closer tier.
    pub fn bonus_points(distance_km: f64) -> i32 {
        if distance_km <= 100.0 {
            5
        } else if distance_km <= 500.0 {
            2
        } else if distance_km <= 1000.0 {
            1
        } else {
            0
        }
    }

    /// Rank guesses by ascending distance. Equal distances share a placement and
    /// the following distinct distance takes its 1-based position, so ties skip
    /// ranks (1, 1, 3). Placement `p` in an `n`-player round is worth
    /// `max(0, n - p + 1)`.
    pub fn placement_points(guesses: &[GuessDistance], total_players: usize) -> Vec<RankedGuess> {
        let mut sorted = guesses.to_vec();
        sorted.sort_by(|a, b| a.distance.total_cmp(&b.distance));

        let mut ranked: Vec<RankedGuess> = Vec::with_capacity(sorted.len());
        for (index, guess) in sorted.iter().enumerate() {
            let placement = if index > 0 && sorted[index - 1].distance == guess.distance {
                ranked[index - 1].placement
            } else {
                index as u32 + 1
            };
            let points = (total_players as i64 - placement as i64 + 1).max(0) as i32;
            ranked.push(RankedGuess {
                player_id: guess.player_id,
                placement,
                placement_points: points,
            });
        }
        ranked
    }

    /// Order players by total score descending and assign final placements with
    /// the same tie rule as rounds. Several players may share placement 1.
    pub fn final_placement(scores: &[PlayerScore]) -> Vec<PlayerScore> {
        let mut sorted = scores.to_vec();
        sorted.sort_by(|a, b| b.total_score.cmp(&a.total_score));

        for index in 0..sorted.len() {
            sorted[index].final_placement =
                if index > 0 && sorted[index - 1].total_score == sorted[index].total_score {
                    sorted[index - 1].final_placement
                } else {
                    index as u32 + 1
                };
        }
        sorted
    }

    /// Fill placement, bonus and total points for every guess in the round.
    pub fn score_round(round: &mut GameRound, total_players: usize) {
        let distances: Vec<GuessDistance> = round
            .guesses
            .iter()
            .map(|g| GuessDistance {
                player_id: g.player_id,
                distance: g.distance,
            })
            .collect();

        let ranked = Self::placement_points(&distances, total_players);
        for guess in &mut round.guesses {
            if let Some(rank) = ranked.iter().find(|r| r.player_id == guess.player_id) {
                guess.placement = rank.placement;
                guess.placement_points = rank.placement_points;
                guess.bonus_points = Self::bonus_points(guess.distance);
                guess.total_points = guess.placement_points + guess.bonus_points;
            }
        }
    }
}
