//! Critical-path analysis over the event DAG formed by `parent_id`
//! (spec §4.6 `critical_path`).

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use trace_core::{Event, Severity};
use uuid::Uuid;

const BOTTLENECK_THRESHOLD_MS: i64 = 1_000;
const HIGH_SEVERITY_THRESHOLD_MS: i64 = 5_000;
const PARALLEL_WINDOW_MS: i64 = 1_000;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bottleneck {
    pub event_id: Uuid,
    pub duration_ms: i64,
    pub severity: Severity,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParallelizationOpportunity {
    /// Event on the critical path that had an unrelated sibling running
    /// (or able to run) in the same time window.
    pub critical_path_event_id: Uuid,
    pub sibling_event_ids: Vec<Uuid>,
    pub window_start: i64,
    pub window_end: i64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CriticalPathResult {
    /// Event ids on the longest duration-weighted path, root to leaf.
    pub events: Vec<Uuid>,
    pub total_duration: i64,
    pub bottlenecks: Vec<Bottleneck>,
    pub parallelization_opportunities: Vec<ParallelizationOpportunity>,
}

fn duration_of(event: &Event) -> i64 {
    event
        .performance
        .as_ref()
        .and_then(|p| p.duration_ms)
        .unwrap_or(0)
}

/// Builds the event DAG from `parent_id`, finds the longest duration-weighted
/// path via memoized DFS with a cycle guard, then derives bottlenecks and
/// parallelization opportunities around that path.
pub fn compute_critical_path(events: &[Event]) -> CriticalPathResult {
    if events.is_empty() {
        return CriticalPathResult::default();
    }

    let by_id: HashMap<Uuid, &Event> = events.iter().map(|e| (e.id, e)).collect();
    let mut children: HashMap<Uuid, Vec<Uuid>> = HashMap::new();
    let mut roots: Vec<Uuid> = Vec::new();

    for event in events {
        match event.parent_id {
            Some(parent_id) if by_id.contains_key(&parent_id) => {
                children.entry(parent_id).or_default().push(event.id);
            }
            _ => roots.push(event.id),
        }
    }

    let mut memo: HashMap<Uuid, (i64, Vec<Uuid>)> = HashMap::new();
    let mut best: (i64, Vec<Uuid>) = (0, Vec::new());

    for root in &roots {
        let mut visiting = HashSet::new();
        let candidate = longest_path(*root, &by_id, &children, &mut memo, &mut visiting);
        if candidate.0 > best.0 {
            best = candidate;
        }
    }

    let bottlenecks = events
        .iter()
        .filter_map(|e| {
            let duration_ms = duration_of(e);
            if duration_ms <= BOTTLENECK_THRESHOLD_MS {
                return None;
            }
            let severity = if duration_ms > HIGH_SEVERITY_THRESHOLD_MS {
                Severity::High
            } else {
                Severity::Medium
            };
            Some(Bottleneck {
                event_id: e.id,
                duration_ms,
                severity,
            })
        })
        .collect();

    let parallelization_opportunities =
        find_parallelization_opportunities(&best.1, events, &by_id, &children);

    CriticalPathResult {
        events: best.1,
        total_duration: best.0,
        bottlenecks,
        parallelization_opportunities,
    }
}

fn longest_path(
    id: Uuid,
    by_id: &HashMap<Uuid, &Event>,
    children: &HashMap<Uuid, Vec<Uuid>>,
    memo: &mut HashMap<Uuid, (i64, Vec<Uuid>)>,
    visiting: &mut HashSet<Uuid>,
) -> (i64, Vec<Uuid>) {
    if let Some(cached) = memo.get(&id) {
        return cached.clone();
    }
    if !visiting.insert(id) {
        // Cycle guard: parent_id should never form a loop, but a malformed
        // DAG stops here instead of recursing forever.
        return (0, Vec::new());
    }

    let own_duration = by_id.get(&id).map(|e| duration_of(e)).unwrap_or(0);
    let mut best = (own_duration, vec![id]);

    if let Some(kids) = children.get(&id) {
        for child in kids {
            let (child_duration, child_path) =
                longest_path(*child, by_id, children, memo, visiting);
            let total = own_duration + child_duration;
            if total > best.0 {
                let mut path = vec![id];
                path.extend(child_path);
                best = (total, path);
            }
        }
    }

    visiting.remove(&id);
    memo.insert(id, best.clone());
    best
}

fn ancestors_and_descendants(
    id: Uuid,
    by_id: &HashMap<Uuid, &Event>,
    children: &HashMap<Uuid, Vec<Uuid>>,
) -> HashSet<Uuid> {
    let mut related = HashSet::new();
    related.insert(id);

    let mut cursor = by_id.get(&id).and_then(|e| e.parent_id);
    while let Some(parent_id) = cursor {
        if !related.insert(parent_id) {
            break;
        }
        cursor = by_id.get(&parent_id).and_then(|e| e.parent_id);
    }

    let mut stack = vec![id];
    while let Some(current) = stack.pop() {
        if let Some(kids) = children.get(&current) {
            for kid in kids {
                if related.insert(*kid) {
                    stack.push(*kid);
                }
            }
        }
    }
    related
}

/// For each event on the critical path, finds other events within
/// `PARALLEL_WINDOW_MS` that share no ancestor/descendant relationship with
/// it — work that plausibly could have run alongside it instead of after.
fn find_parallelization_opportunities(
    path: &[Uuid],
    events: &[Event],
    by_id: &HashMap<Uuid, &Event>,
    children: &HashMap<Uuid, Vec<Uuid>>,
) -> Vec<ParallelizationOpportunity> {
    let mut opportunities = Vec::new();

    for &cp_id in path {
        let Some(cp_event) = by_id.get(&cp_id) else {
            continue;
        };
        let related = ancestors_and_descendants(cp_id, by_id, children);
        let window_start = cp_event.timestamp - PARALLEL_WINDOW_MS;
        let window_end = cp_event.timestamp + PARALLEL_WINDOW_MS;

        let siblings: Vec<Uuid> = events
            .iter()
            .filter(|e| {
                e.id != cp_id
                    && !related.contains(&e.id)
                    && e.timestamp >= window_start
                    && e.timestamp <= window_end
            })
            .map(|e| e.id)
            .collect();

        if !siblings.is_empty() {
            opportunities.push(ParallelizationOpportunity {
                critical_path_event_id: cp_id,
                sibling_event_ids: siblings,
                window_start,
                window_end,
            });
        }
    }

    opportunities
}

#[cfg(test)]
mod tests {
    use super::*;
    use trace_core::{EventMetadata, EventType, Phase, PerformanceRecord};

    fn event(id: Uuid, parent: Option<Uuid>, ts: i64, duration_ms: i64) -> Event {
        Event {
            id,
            timestamp: ts,
            session_id: Uuid::new_v4(),
            agent_id: Some("a1".to_string()),
            parent_id: parent,
            correlation_id: None,
            event_type: EventType::TaskComplete,
            phase: Phase::Complete,
            payload: serde_json::Map::new(),
            metadata: EventMetadata::default(),
            performance: Some(PerformanceRecord {
                duration_ms: Some(duration_ms),
                ..Default::default()
            }),
        }
    }

    #[test]
    fn longest_path_follows_the_heavier_branch() {
        let root = Uuid::new_v4();
        let light_child = Uuid::new_v4();
        let heavy_child = Uuid::new_v4();
        let heavy_grandchild = Uuid::new_v4();

        let events = vec![
            event(root, None, 0, 100),
            event(light_child, Some(root), 100, 50),
            event(heavy_child, Some(root), 100, 2_000),
            event(heavy_grandchild, Some(heavy_child), 2_100, 6_000),
        ];

        let result = compute_critical_path(&events);
        assert_eq!(result.total_duration, 100 + 2_000 + 6_000);
        assert_eq!(
            result.events,
            vec![root, heavy_child, heavy_grandchild]
        );
    }

    #[test]
    fn bottlenecks_are_classified_by_duration() {
        let root = Uuid::new_v4();
        let slow = Uuid::new_v4();
        let very_slow = Uuid::new_v4();

        let events = vec![
            event(root, None, 0, 500),
            event(slow, Some(root), 500, 2_000),
            event(very_slow, Some(slow), 2_500, 6_000),
        ];

        let result = compute_critical_path(&events);
        let by_id: HashMap<Uuid, &Bottleneck> =
            result.bottlenecks.iter().map(|b| (b.event_id, b)).collect();
        assert_eq!(by_id[&slow].severity, Severity::Medium);
        assert_eq!(by_id[&very_slow].severity, Severity::High);
        assert!(!by_id.contains_key(&root));
    }

    #[test]
    fn cycle_guard_terminates_on_a_malformed_dag() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        // `b`'s parent is `a`, and `a`'s parent is (invalidly) `b`.
        let events = vec![event(a, Some(b), 0, 10), event(b, Some(a), 10, 10)];

        let result = compute_critical_path(&events);
        assert!(result.total_duration >= 0);
    }
}
