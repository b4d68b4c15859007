use tracing::{debug, warn};

use crate::reminder::Entity;

#[derive(Debug, Clone, PartialEq)]
pub enum ReorderOutcome<E> {
    /// The full backing sequence after the move.
    Applied(Vec<E>),
    /// Nothing moved; carries the reason.
    Unchanged(&'static str),
}

impl<E> ReorderOutcome<E> {
    pub fn is_applied(&self) -> bool {
        matches!(self, ReorderOutcome::Applied(_))
    }
}

/// Applies a move expressed in projected indices to the backing sequence.
///
/// Both indices are mapped to backing positions through the entity ids; the
/// moved entity is removed at its backing position and re-inserted at the
/// target's backing position. Entities outside the projection never move
/// relative to each other.
#[tracing::instrument(skip(backing, projected), fields(backing = backing.len(), projected = projected.len()))]
pub fn resolve_reorder<E: Entity>(
    backing: &[E],
    projected: &[E],
    from: usize,
    to: usize,
) -> ReorderOutcome<E> {
    if from == to {
        return ReorderOutcome::Unchanged("source and target are the same position");
    }

    let (Some(from_item), Some(to_item)) = (projected.get(from), projected.get(to)) else {
        warn!(from, to, "reorder index outside the visible list");
        return ReorderOutcome::Unchanged("position outside the visible list");
    };

    let backing_index = |id: &str| backing.iter().position(|item| item.id() == id);
    let (Some(from_backing), Some(to_backing)) =
        (backing_index(from_item.id()), backing_index(to_item.id()))
    else {
        warn!(from, to, "visible item missing from backing collection");
        return ReorderOutcome::Unchanged("visible item is not in the collection");
    };

    let mut next = backing.to_vec();
    let moved = next.remove(from_backing);
    next.insert(to_backing, moved);

    debug!(from_backing, to_backing, "reorder applied");
    ReorderOutcome::Applied(next)
}
