//! Validation and staging of client input.
//!
//! Nothing here touches the world. Steering intents wait in an [`IntentBuffer`]
//! and block edits in [`PendingEdits`] until the next tick applies them.

use crate::client_manager::ConnectionId;
use shared::{BlockAction, MAX_BLOCK_ID_LEN};
use std::collections::{HashMap, VecDeque};
use std::f32::consts::TAU;
use thiserror::Error;

/// Why a decoded message was dropped before staging.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum Rejection {
    #[error("angle is not a finite number")]
    NonFiniteAngle,
    #[error("input carries neither angle nor boosting")]
    EmptyInput,
    #[error("coordinates ({x}, {y}) are outside the grid")]
    OutOfBounds { x: i64, y: i64 },
    #[error("place requires a blockId")]
    MissingBlockId,
    #[error("blockId is longer than 32 characters")]
    BlockIdTooLong,
    #[error("message does not apply to this room")]
    WrongRoom,
}

/// Latest steering request of one connection.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Intent {
    pub angle: Option<f32>,
    pub boosting: Option<bool>,
}

impl Intent {
    /// Fields present in `newer` replace ours; absent ones keep our value.
    pub fn merge(self, newer: Intent) -> Intent {
        Intent {
            angle: newer.angle.or(self.angle),
            boosting: newer.boosting.or(self.boosting),
        }
    }
}

pub fn validate_steer(angle: Option<f64>, boosting: Option<bool>) -> Result<Intent, Rejection> {
    if angle.is_none() && boosting.is_none() {
        return Err(Rejection::EmptyInput);
    }

    let angle = match angle {
        Some(raw) => {
            let narrowed = raw as f32;
            if !raw.is_finite() || !narrowed.is_finite() {
                return Err(Rejection::NonFiniteAngle);
            }
            Some(normalize_angle(narrowed))
        }
        None => None,
    };

    Ok(Intent { angle, boosting })
}

/// Wraps an angle into `[0, 2π)`.
pub fn normalize_angle(angle: f32) -> f32 {
    let wrapped = angle.rem_euclid(TAU);
    // rem_euclid can round up to exactly TAU for tiny negative inputs
    if wrapped >= TAU {
        0.0
    } else {
        wrapped
    }
}

#[derive(Debug, Default)]
pub struct IntentBuffer {
    staged: HashMap<ConnectionId, Intent>,
}

impl IntentBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stage(&mut self, id: ConnectionId, intent: Intent) {
        let merged = self.staged.get(&id).copied().unwrap_or_default().merge(intent);
        self.staged.insert(id, merged);
    }

    /// Takes every staged intent, in connection order.
    pub fn drain(&mut self) -> Vec<(ConnectionId, Intent)> {
        let mut intents: Vec<_> = self.staged.drain().collect();
        intents.sort_by_key(|(id, _)| *id);
        intents
    }

    pub fn discard(&mut self, id: ConnectionId) {
        self.staged.remove(&id);
    }

    pub fn len(&self) -> usize {
        self.staged.len()
    }

    pub fn is_empty(&self) -> bool {
        self.staged.is_empty()
    }
}

/// A validated block edit waiting for the next tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockEdit {
    pub author: ConnectionId,
    pub x: i64,
    pub y: i64,
    pub action: BlockAction,
    /// Always present for `Place`, always absent for `Remove`.
    pub block_id: Option<String>,
}

pub fn validate_block_update(
    author: ConnectionId,
    x: i64,
    y: i64,
    block_id: Option<String>,
    action: BlockAction,
    grid_size: i64,
) -> Result<BlockEdit, Rejection> {
    if !(0..grid_size).contains(&x) || !(0..grid_size).contains(&y) {
        return Err(Rejection::OutOfBounds { x, y });
    }

    let block_id = match action {
        BlockAction::Place => {
            let id = block_id
                .map(|id| id.trim().to_string())
                .filter(|id| !id.is_empty() && !id.chars().any(char::is_control))
                .ok_or(Rejection::MissingBlockId)?;
            if id.chars().count() > MAX_BLOCK_ID_LEN {
                return Err(Rejection::BlockIdTooLong);
            }
            Some(id)
        }
        BlockAction::Remove => None,
    };

    Ok(BlockEdit {
        author,
        x,
        y,
        action,
        block_id,
    })
}

/// Block edits in arrival order.
#[derive(Debug, Default)]
pub struct PendingEdits {
    queue: VecDeque<BlockEdit>,
}

impl PendingEdits {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, edit: BlockEdit) {
        self.queue.push_back(edit);
    }

    pub fn drain(&mut self) -> impl Iterator<Item = BlockEdit> + '_ {
        self.queue.drain(..)
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;
    use std::f32::consts::PI;

    #[test]
    fn test_steer_rejects_non_finite() {
        assert_eq!(
            validate_steer(Some(f64::NAN), None),
            Err(Rejection::NonFiniteAngle)
        );
        assert_eq!(
            validate_steer(Some(f64::INFINITY), Some(true)),
            Err(Rejection::NonFiniteAngle)
        );
        // finite as f64 but overflows f32
        assert_eq!(
            validate_steer(Some(1e300), None),
            Err(Rejection::NonFiniteAngle)
        );
    }

    #[test]
    fn test_steer_requires_a_field() {
        assert_eq!(validate_steer(None, None), Err(Rejection::EmptyInput));
        assert_eq!(
            validate_steer(None, Some(true)),
            Ok(Intent {
                angle: None,
                boosting: Some(true)
            })
        );
    }

    #[test]
    fn test_steer_normalizes_angle() {
        let intent = validate_steer(Some(-(PI as f64) / 2.0), None).unwrap();
        assert_approx_eq!(intent.angle.unwrap(), 1.5 * PI, 1e-5);

        let intent = validate_steer(Some(5.0 * PI as f64), None).unwrap();
        assert_approx_eq!(intent.angle.unwrap(), PI, 1e-4);

        assert_eq!(normalize_angle(0.0), 0.0);
        assert!(normalize_angle(-1e-9) < TAU);
    }

    #[test]
    fn test_intent_buffer_merges_latest_fields() {
        let mut buffer = IntentBuffer::new();
        let id = ConnectionId(1);

        buffer.stage(
            id,
            Intent {
                angle: Some(1.0),
                boosting: Some(true),
            },
        );
        buffer.stage(
            id,
            Intent {
                angle: Some(2.0),
                boosting: None,
            },
        );

        let drained = buffer.drain();
        assert_eq!(
            drained,
            vec![(
                id,
                Intent {
                    angle: Some(2.0),
                    boosting: Some(true)
                }
            )]
        );
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_intent_buffer_drains_in_id_order() {
        let mut buffer = IntentBuffer::new();
        for raw in [5, 1, 3] {
            buffer.stage(
                ConnectionId(raw),
                Intent {
                    angle: Some(0.0),
                    boosting: None,
                },
            );
        }
        buffer.discard(ConnectionId(3));

        let ids: Vec<u32> = buffer.drain().into_iter().map(|(id, _)| id.0).collect();
        assert_eq!(ids, vec![1, 5]);
    }

    #[test]
    fn test_block_update_bounds() {
        let author = ConnectionId(1);
        assert!(validate_block_update(author, 0, 0, None, BlockAction::Remove, 1024).is_ok());
        assert!(validate_block_update(author, 1023, 1023, None, BlockAction::Remove, 1024).is_ok());
        assert_eq!(
            validate_block_update(author, 1024, 0, None, BlockAction::Remove, 1024),
            Err(Rejection::OutOfBounds { x: 1024, y: 0 })
        );
        assert_eq!(
            validate_block_update(author, 3, -1, None, BlockAction::Remove, 1024),
            Err(Rejection::OutOfBounds { x: 3, y: -1 })
        );
    }

    #[test]
    fn test_place_requires_block_id() {
        let author = ConnectionId(2);
        assert_eq!(
            validate_block_update(author, 1, 1, None, BlockAction::Place, 16),
            Err(Rejection::MissingBlockId)
        );
        assert_eq!(
            validate_block_update(author, 1, 1, Some("   ".to_string()), BlockAction::Place, 16),
            Err(Rejection::MissingBlockId)
        );
        assert_eq!(
            validate_block_update(author, 1, 1, Some("x".repeat(33)), BlockAction::Place, 16),
            Err(Rejection::BlockIdTooLong)
        );

        let edit =
            validate_block_update(author, 1, 2, Some(" stone ".to_string()), BlockAction::Place, 16)
                .unwrap();
        assert_eq!(edit.block_id.as_deref(), Some("stone"));
        assert_eq!((edit.x, edit.y), (1, 2));
    }

    #[test]
    fn test_remove_drops_block_id() {
        let edit = validate_block_update(
            ConnectionId(2),
            4,
            4,
            Some("stone".to_string()),
            BlockAction::Remove,
            16,
        )
        .unwrap();
        assert_eq!(edit.block_id, None);
    }

    #[test]
    fn test_pending_edits_keep_arrival_order() {
        let mut pending = PendingEdits::new();
        for x in [3, 1, 2] {
            pending.push(
                validate_block_update(ConnectionId(1), x, 0, None, BlockAction::Remove, 16)
                    .unwrap(),
            );
        }
        assert_eq!(pending.len(), 3);

        let xs: Vec<i64> = pending.drain().map(|edit| edit.x).collect();
        assert_eq!(xs, vec![3, 1, 2]);
        assert!(pending.is_empty());
    }
}
