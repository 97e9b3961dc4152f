//! Best-match selection over a set of compiled routes.

use fabric_core::Event;
use tracing::{debug, trace};

use crate::error::MatcherError;
use crate::predicate::Predicate;
use crate::route::Route;

#[derive(Debug, Clone)]
struct CompiledRoute {
    route: Route,
    predicate: Predicate,
}

/// Evaluates routes in descending priority; the first true rule wins.
#[derive(Debug, Clone, Default)]
pub struct EventMatcher {
    rules: Vec<CompiledRoute>,
}

impl EventMatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Compile and add `routes`. Every route must already be resolved.
    ///
    /// Rules are kept stably sorted by priority, so among equal priorities
    /// the first added is tested first.
    pub fn add_routes(&mut self, routes: impl IntoIterator<Item = Route>) -> Result<(), MatcherError> {
        for route in routes {
            let rule = route
                .resolved_rule()
                .ok_or(MatcherError::UnresolvedRule(route.id()))?;
            let predicate = Predicate::compile(rule).map_err(|source| MatcherError::Rule {
                id: route.id(),
                source,
            })?;
            debug!(id = route.id(), priority = route.priority(), rule, "compiled route");
            self.rules.push(CompiledRoute { route, predicate });
        }

        self.rules
            .sort_by(|a, b| b.route.priority().cmp(&a.route.priority()));
        Ok(())
    }

    /// Find the best route for `event`. On a match the route's captured
    /// parameters are written to the event; otherwise the event is untouched.
    pub fn match_event(&self, event: &mut Event) -> Option<&Route> {
        let mut captures = Vec::new();
        for rule in &self.rules {
            captures.clear();
            if rule.predicate.eval(event, &mut captures) {
                for (name, value) in captures.drain(..) {
                    event.set_param(name, value);
                }
                trace!(id = rule.route.id(), event_id = %event.id, "route matched");
                return Some(&rule.route);
            }
        }
        None
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}
