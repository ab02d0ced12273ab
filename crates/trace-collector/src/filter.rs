//! Filter composition (spec §4.3 "Filter & Sampler"): global include/exclude
//! sets plus user-supplied predicates, composed as a logical AND with global
//! filters running first.

use std::collections::HashSet;
use std::sync::Arc;

use trace_core::{Event, EventType, Severity};

pub type UserPredicate = Arc<dyn Fn(&Event) -> bool + Send + Sync>;

/// Global sub-filters, all of which must pass for `should_accept` to return
/// true (spec: "`should_accept` returns true iff all configured sub-filters
/// pass").
#[derive(Clone, Default)]
pub struct FilterConfig {
    pub event_type_include: Option<HashSet<EventType>>,
    pub event_type_exclude: HashSet<EventType>,
    pub agent_allow: Option<HashSet<String>>,
    pub agent_deny: HashSet<String>,
    pub severity_floor: Option<Severity>,
    pub tag_include: HashSet<String>,
}

impl FilterConfig {
    fn passes(&self, event: &Event) -> bool {
        if let Some(include) = &self.event_type_include {
            if !include.contains(&event.event_type) {
                return false;
            }
        }
        if self.event_type_exclude.contains(&event.event_type) {
            return false;
        }

        if let Some(agent_id) = &event.agent_id {
            if let Some(allow) = &self.agent_allow {
                if !allow.contains(agent_id) {
                    return false;
                }
            }
            if self.agent_deny.contains(agent_id) {
                return false;
            }
        }

        if let Some(floor) = self.severity_floor {
            if event.metadata.severity < floor {
                return false;
            }
        }

        if !self.tag_include.is_empty() {
            let tags = event.metadata.tag_set();
            if !self.tag_include.iter().any(|t| tags.contains(t.as_str())) {
                return false;
            }
        }

        true
    }
}

/// The full filter chain applied during pipeline stage 4: globals, then any
/// user predicates registered via `add_filter`.
#[derive(Clone, Default)]
pub struct FilterChain {
    global: FilterConfig,
    user_predicates: Vec<UserPredicate>,
}

impl FilterChain {
    pub fn new(global: FilterConfig) -> Self {
        Self {
            global,
            user_predicates: Vec::new(),
        }
    }

    pub fn add_filter(&mut self, predicate: UserPredicate) {
        self.user_predicates.push(predicate);
    }

    pub fn clear_filters(&mut self) {
        self.user_predicates.clear();
    }

    pub fn global_config(&self) -> &FilterConfig {
        &self.global
    }

    pub fn set_global_config(&mut self, global: FilterConfig) {
        self.global = global;
    }

    /// Critical-severity events bypass sampling (handled by the caller) but
    /// not filtering, unless the caller has explicitly excluded them (spec
    /// invariant 8: "unless explicitly excluded").
    pub fn should_accept(&self, event: &Event) -> bool {
        self.global.passes(event) && self.user_predicates.iter().all(|p| p(event))
    }
}
