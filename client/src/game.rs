use log::debug;
use shared::{FoodState, PlayerState, ServerMessage, WorldSnapshot};

/// Distance from the border at which the bot turns back towards the centre.
const WALL_MARGIN: f32 = 150.0;

/// The bot's picture of the arena, rebuilt from every `state` frame.
#[derive(Debug, Clone, Default)]
pub struct ArenaView {
    pub player_id: Option<u32>,
    pub world_size: f32,
    pub players: Vec<PlayerState>,
    pub food: Vec<FoodState>,
    pub alive: bool,
    pub deaths: u32,
}

impl ArenaView {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn apply(&mut self, message: &ServerMessage) {
        match message {
            ServerMessage::Joined {
                player_id,
                world_size,
            } => {
                self.player_id = Some(*player_id);
                self.world_size = *world_size;
                self.alive = true;
            }
            ServerMessage::WorldSnapshot(WorldSnapshot::Arena(snapshot)) => {
                self.players = snapshot.players.values().cloned().collect();
                self.food = snapshot.food.values().cloned().collect();
            }
            ServerMessage::State { players, food, .. } => {
                self.players = players.clone();
                self.food = food.clone();
            }
            ServerMessage::Died { length } => {
                debug!("Died at length {}", length);
                self.alive = false;
                self.deaths += 1;
            }
            _ => {}
        }
    }

    pub fn me(&self) -> Option<&PlayerState> {
        let id = self.player_id?;
        self.players.iter().find(|p| p.id == id)
    }

    /// Heading towards the closest food, or back to the centre near a wall.
    pub fn choose_heading(&self) -> Option<f32> {
        let me = self.me()?;
        let head = me.head()?;
        let size = self.world_size;

        if head.x < WALL_MARGIN
            || head.y < WALL_MARGIN
            || head.x > size - WALL_MARGIN
            || head.y > size - WALL_MARGIN
        {
            let centre = size / 2.0;
            return Some((centre - head.y).atan2(centre - head.x));
        }

        self.food
            .iter()
            .min_by(|a, b| {
                let da = (a.x - head.x).powi(2) + (a.y - head.y).powi(2);
                let db = (b.x - head.x).powi(2) + (b.y - head.y).powi(2);
                da.total_cmp(&db)
            })
            .map(|food| (food.y - head.y).atan2(food.x - head.x))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;
    use shared::SegmentState;
    use std::f32::consts::PI;

    fn player(id: u32, x: f32, y: f32) -> PlayerState {
        PlayerState {
            id,
            nickname: format!("bot{}", id),
            segments: vec![SegmentState { x, y, radius: 8.0 }],
            color: "#FF6B6B".into(),
            angle: 0.0,
            boosting: false,
            alive: true,
        }
    }

    fn food(id: u64, x: f32, y: f32) -> FoodState {
        FoodState {
            id,
            x,
            y,
            color: "#FFEAA7".into(),
            radius: 4.0,
        }
    }

    fn joined_view() -> ArenaView {
        let mut view = ArenaView::new();
        view.apply(&ServerMessage::Joined {
            player_id: 7,
            world_size: 1000.0,
        });
        view
    }

    #[test]
    fn test_heads_for_nearest_food() {
        let mut view = joined_view();
        view.apply(&ServerMessage::State {
            players: vec![player(7, 500.0, 500.0)],
            food: vec![food(1, 900.0, 500.0), food(2, 500.0, 400.0)],
            leaderboard: Vec::new(),
        });

        assert_approx_eq!(view.choose_heading().unwrap(), -PI / 2.0);
    }

    #[test]
    fn test_turns_back_near_wall() {
        let mut view = joined_view();
        view.apply(&ServerMessage::State {
            players: vec![player(7, 20.0, 500.0)],
            food: vec![food(1, 0.0, 500.0)],
            leaderboard: Vec::new(),
        });

        assert_approx_eq!(view.choose_heading().unwrap(), 0.0);
    }

    #[test]
    fn test_no_heading_without_own_snake() {
        let mut view = joined_view();
        view.apply(&ServerMessage::State {
            players: vec![player(3, 500.0, 500.0)],
            food: vec![food(1, 0.0, 0.0)],
            leaderboard: Vec::new(),
        });
        assert!(view.choose_heading().is_none());
    }

    #[test]
    fn test_died_clears_alive() {
        let mut view = joined_view();
        assert!(view.alive);
        view.apply(&ServerMessage::Died { length: 14 });
        assert!(!view.alive);
        assert_eq!(view.deaths, 1);
    }
}
