//! Block-world state store keyed by `"x,y"`.

use crate::error::ServerError;
use crate::ingest::BlockEdit;
use crate::persistence::PersistJob;
use log::info;
use shared::{BlockAction, BlockPatch, BlockRecord};
use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::Path;

#[derive(Debug, Default, Clone, PartialEq)]
pub struct BlockWorld {
    blocks: BTreeMap<String, BlockRecord>,
}

impl BlockWorld {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads a persisted world. A missing file is an empty world; anything
    /// else that cannot be read or parsed is fatal.
    pub fn load(path: &Path) -> Result<Self, ServerError> {
        let contents = match fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                info!("No world file at {}, starting empty", path.display());
                return Ok(Self::new());
            }
            Err(e) => {
                return Err(ServerError::WorldLoad {
                    path: path.to_path_buf(),
                    reason: e.to_string(),
                })
            }
        };

        let blocks: BTreeMap<String, BlockRecord> =
            serde_json::from_str(&contents).map_err(|e| ServerError::WorldLoad {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?;

        // Re-key from the records themselves so a hand-edited key cannot drift
        let blocks = blocks
            .into_values()
            .map(|record| (BlockRecord::key(record.x, record.y), record))
            .collect::<BTreeMap<_, _>>();

        info!("Loaded {} blocks from {}", blocks.len(), path.display());
        Ok(Self { blocks })
    }

    /// Applies a validated edit and returns the patch describing it.
    ///
    /// Removing an empty cell is not an error; the patch is still produced.
    pub fn apply(&mut self, edit: &BlockEdit) -> BlockPatch {
        let key = BlockRecord::key(edit.x, edit.y);
        match (edit.action, &edit.block_id) {
            (BlockAction::Place, Some(block_id)) => {
                self.blocks.insert(
                    key,
                    BlockRecord {
                        x: edit.x,
                        y: edit.y,
                        block_id: block_id.clone(),
                    },
                );
                BlockPatch {
                    x: edit.x,
                    y: edit.y,
                    block_id: Some(block_id.clone()),
                    action: BlockAction::Place,
                }
            }
            _ => {
                self.blocks.remove(&key);
                BlockPatch {
                    x: edit.x,
                    y: edit.y,
                    block_id: None,
                    action: BlockAction::Remove,
                }
            }
        }
    }

    pub fn get(&self, x: i64, y: i64) -> Option<&BlockRecord> {
        self.blocks.get(&BlockRecord::key(x, y))
    }

    pub fn snapshot(&self) -> BTreeMap<String, BlockRecord> {
        self.blocks.clone()
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Serializes the current map for a background write.
    pub fn save_job(&self, path: &Path) -> Result<PersistJob, ServerError> {
        let contents = serde_json::to_string(&self.blocks).map_err(|e| ServerError::Persist {
            path: path.to_path_buf(),
            source: io::Error::new(io::ErrorKind::InvalidData, e),
        })?;
        Ok(PersistJob {
            path: path.to_path_buf(),
            contents,
            records: self.blocks.len(),
        })
    }
}
