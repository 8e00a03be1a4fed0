// level.rs — Topological level assignment for compiled chips
//
// Static analysis that assigns each primitive component a dependency level
// (topological rank) so the execution engine can evaluate a chip in one
// linear pass. Failure is a normal outcome, not an error: feedback or an
// undeterminable circuit returns `None` and the caller falls back to the
// event-driven engine.
//
// Preconditions: `circuit` is an elaborated component graph.
// Postconditions: on success, every component with at least one connected
//                 input holds a level strictly greater than all its sources.
// Failure modes: nested chips, feedback, or unreachable components → `None`.
// Side effects: none.

use std::collections::HashMap;

use crate::circuit::{Circuit, CompId, CompKind};

/// A successful level assignment.
#[derive(Debug, Clone)]
pub struct LevelAssignment {
    /// One component list per level, level 0 first. Seed components
    /// (level −1: boundary inputs and zero-input sources) are not included.
    pub levels: Vec<Vec<CompId>>,
    /// Level per component; seeds carry −1.
    pub level_of: HashMap<CompId, i32>,
}

/// Attempt to assign dependency levels to every component.
///
/// Circuits containing nested chips are rejected outright — only fully
/// primitive graphs are leveled. Components within the same level have no
/// defined relative order; their mutual independence is exactly what "same
/// level" certifies.
pub fn assign_levels(circuit: &Circuit) -> Option<LevelAssignment> {
    if circuit
        .components
        .iter()
        .any(|c| matches!(c.kind, CompKind::Chip { .. }))
    {
        return None;
    }

    let successors = circuit.successors();
    let mut level_of: HashMap<CompId, i32> = HashMap::new();

    // Seed: boundary inputs and components with zero connected inputs are
    // available immediately (level −1). Output markers are pure sinks and
    // excluded from leveling entirely.
    let mut frontier: Vec<CompId> = Vec::new();
    let mut expected = 0usize;
    for (i, comp) in circuit.components.iter().enumerate() {
        let id = CompId(i as u32);
        if matches!(comp.kind, CompKind::Output { .. }) {
            continue;
        }
        let connected = comp.inputs.iter().flatten().count();
        if connected == 0 || matches!(comp.kind, CompKind::Input { .. }) {
            level_of.insert(id, -1);
            frontier.extend(leveling_successors(&successors, circuit, id));
        } else {
            expected += 1;
        }
    }
    frontier.sort();
    frontier.dedup();

    // Breadth-first relaxation: a component levels once all its sources are
    // leveled; unresolved components are retried on a later pass. This is
    // not a single-pass Kahn sort — multiple predecessors may resolve on
    // different passes.
    while !frontier.is_empty() {
        let mut next_frontier: Vec<CompId> = Vec::new();
        let mut progressed = false;

        for &id in &frontier {
            if level_of.contains_key(&id) {
                // Selected for leveling a second time: a source resolved
                // after this component did, i.e. feedback.
                return None;
            }
            let comp = &circuit.components[id.index()];
            let mut max_source = i32::MIN;
            let mut ready = true;
            for pin in comp.inputs.iter().flatten() {
                match level_of.get(&pin.comp) {
                    Some(&lvl) => max_source = max_source.max(lvl),
                    None => {
                        ready = false;
                        break;
                    }
                }
            }
            if ready {
                level_of.insert(id, max_source + 1);
                progressed = true;
                next_frontier.extend(leveling_successors(&successors, circuit, id));
            } else {
                next_frontier.push(id);
            }
        }

        if !progressed {
            // A full pass leveled nothing: the remaining components are not
            // determinable (a cycle with no external feed).
            return None;
        }
        next_frontier.sort();
        next_frontier.dedup();
        // A component that leveled late in this pass may have been pushed
        // by a source that leveled earlier in the same pass; that is normal
        // forward progress, not feedback, so it leaves the frontier here.
        next_frontier.retain(|id| !level_of.contains_key(id));
        frontier = next_frontier;
    }

    // Completeness: every component with at least one connected input must
    // have been leveled.
    let leveled = level_of.values().filter(|&&l| l >= 0).count();
    if leveled != expected {
        return None;
    }

    // Materialize as an ordered sequence of component lists.
    let max_level = level_of.values().copied().max().unwrap_or(-1);
    let mut levels: Vec<Vec<CompId>> = vec![Vec::new(); (max_level + 1).max(0) as usize];
    let mut leveled_ids: Vec<(CompId, i32)> = level_of
        .iter()
        .filter(|(_, &l)| l >= 0)
        .map(|(&id, &l)| (id, l))
        .collect();
    leveled_ids.sort();
    for (id, lvl) in leveled_ids {
        levels[lvl as usize].push(id);
    }

    Some(LevelAssignment { levels, level_of })
}

/// Successors eligible for leveling (output markers filtered out).
fn leveling_successors(
    successors: &[Vec<CompId>],
    circuit: &Circuit,
    id: CompId,
) -> Vec<CompId> {
    successors[id.index()]
        .iter()
        .copied()
        .filter(|s| !matches!(circuit.components[s.index()].kind, CompKind::Output { .. }))
        .collect()
}

// ── Tests ───────────────────────────────────────────────────────────────────
