//! Context store - layered session state with atomic snapshot swap
//!
//! Single-writer, multi-reader: the session's context adapter is the
//! only writer, readers receive `Arc` snapshots and never block the
//! mutation pipeline. Snapshot replacement is a pointer swap, so no
//! reader ever observes a partially-updated snapshot.

use crate::optimize::Optimizer;
use crate::propagate::derived_updates;
use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};
use tiller_core::{
    ContentHash, ContextLayer, ContextPiece, ContextSnapshot, ContextUpdate, EngineConfig,
    StoreError, TillerError, TillerResult, Timestamp,
};
use tracing::{debug, info};

/// Session-scoped context store. Created empty at session start,
/// discarded at session end; never wholesale cleared mid-session.
#[derive(Debug)]
pub struct ContextStore {
    optimizer: Optimizer,
    current: RwLock<Arc<ContextSnapshot>>,
}

impl ContextStore {
    /// Create an empty store with a validated configuration.
    pub fn new(config: EngineConfig) -> TillerResult<Self> {
        let optimizer = Optimizer::new(config)?;
        Ok(Self {
            optimizer,
            current: RwLock::new(Arc::new(ContextSnapshot::empty())),
        })
    }

    /// Current snapshot. Cheap: clones the `Arc`, not the data.
    pub fn snapshot(&self) -> TillerResult<Arc<ContextSnapshot>> {
        let guard = self
            .current
            .read()
            .map_err(|_| TillerError::Store(StoreError::LockPoisoned))?;
        Ok(Arc::clone(&guard))
    }

    /// Current snapshot version.
    pub fn version(&self) -> TillerResult<u64> {
        Ok(self.snapshot()?.version)
    }

    /// Read-only export of one layer.
    pub fn export(&self, layer: ContextLayer) -> TillerResult<Vec<ContextPiece>> {
        Ok(self.snapshot()?.pieces(layer).to_vec())
    }

    /// Apply updates to one layer: supersede by key, propagate derived
    /// updates, reconcile cross-layer conflicts (timestamp wins),
    /// compact under size pressure, then swap the snapshot atomically.
    pub fn update(
        &self,
        layer: ContextLayer,
        updates: Vec<ContextUpdate>,
    ) -> TillerResult<Arc<ContextSnapshot>> {
        if updates.is_empty() {
            return self.snapshot();
        }

        let mut next = (*self.snapshot()?).clone();

        let mut derived = Vec::new();
        for update in &updates {
            derived.extend(derived_updates(layer, update));
        }
        for update in updates {
            apply_update(&mut next, layer, update, layer);
        }
        for d in derived {
            apply_update(&mut next, d.layer, d.update, d.source_layer);
        }

        reconcile_cross_layer(&mut next);

        next.version += 1;
        next.recompute_total_size();

        // Overflow triggers compression, never an error to the caller.
        if self.optimizer.over_pressure(&next) {
            info!(
                size = next.total_size,
                version = next.version,
                "context snapshot over pressure watermark; compacting"
            );
            next = self.optimizer.optimize(&next)?;
        }

        self.swap(next)
    }

    /// Run an explicit optimization pass and swap in the result.
    pub fn compact(&self) -> TillerResult<Arc<ContextSnapshot>> {
        let mut next = self.optimizer.optimize(&*self.snapshot()?)?;
        next.version += 1;
        self.swap(next)
    }

    fn swap(&self, next: ContextSnapshot) -> TillerResult<Arc<ContextSnapshot>> {
        let next = Arc::new(next);
        let mut guard = self
            .current
            .write()
            .map_err(|_| TillerError::Store(StoreError::LockPoisoned))?;
        debug!(
            version = next.version,
            pieces = next.piece_count(),
            size = next.total_size,
            "context snapshot swapped"
        );
        *guard = Arc::clone(&next);
        Ok(next)
    }
}

/// Supersede-by-key write of one update into one layer.
fn apply_update(
    snapshot: &mut ContextSnapshot,
    layer: ContextLayer,
    update: ContextUpdate,
    source_layer: ContextLayer,
) {
    let piece = ContextPiece::new(layer, update.key, update.value, update.kind)
        .with_recorded_at(update.recorded_at)
        .with_source_layer(source_layer);
    let pieces = snapshot.layers.entry(layer).or_default();
    pieces.retain(|p| p.key != piece.key);
    pieces.push(piece);
}

/// Cross-layer consistency: when two layers hold the same key with
/// different values, the newest write wins everywhere.
fn reconcile_cross_layer(snapshot: &mut ContextSnapshot) {
    let mut newest: BTreeMap<String, (Timestamp, serde_json::Value, ContentHash, i64)> =
        BTreeMap::new();
    for piece in snapshot.all_pieces() {
        let entry = newest.entry(piece.key.clone());
        match entry {
            std::collections::btree_map::Entry::Vacant(v) => {
                v.insert((
                    piece.recorded_at,
                    piece.value.clone(),
                    piece.content_hash,
                    piece.size,
                ));
            }
            std::collections::btree_map::Entry::Occupied(mut o) => {
                if piece.recorded_at > o.get().0 {
                    o.insert((
                        piece.recorded_at,
                        piece.value.clone(),
                        piece.content_hash,
                        piece.size,
                    ));
                }
            }
        }
    }

    for pieces in snapshot.layers.values_mut() {
        for piece in pieces.iter_mut() {
            if let Some((at, value, hash, size)) = newest.get(&piece.key) {
                if piece.content_hash != *hash {
                    piece.value = value.clone();
                    piece.content_hash = *hash;
                    piece.size = *size;
                    piece.recorded_at = *at;
                }
            }
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
