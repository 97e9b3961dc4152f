//! Component registry: tracks registered components and their compiled
//! routes.
//!
//! Components are keyed by [`Component::key`]; registering the same key
//! again replaces the previous routes.

use std::collections::BTreeMap;

use anyhow::{Context, Result, bail};
use fabric_core::{Component, Event, RouteId};
use fabric_matcher::{EventMatcher, Route};
use fabric_net::Registration;

/// A registered component and its routing table.
#[derive(Debug)]
pub struct ComponentInfo {
    pub component: Component,
    matcher: EventMatcher,
    pub default_handler: bool,
}

/// Registry of all components known to the broker.
#[derive(Debug, Default)]
pub struct ComponentRegistry {
    components: BTreeMap<String, ComponentInfo>,
}

impl ComponentRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Compile and store a component's routes.
    ///
    /// # Errors
    ///
    /// Returns an error if the registration is not a route table or any
    /// route fails to compile. A failed registration leaves any previous one
    /// in place.
    pub fn register(&mut self, component: Component, registration: &Registration) -> Result<()> {
        let Registration::Routes {
            routes,
            default_handler,
        } = registration
        else {
            bail!("component specifications are not supported");
        };
        if component.name().is_empty() || component.id().is_empty() {
            bail!("component name and id are required");
        }

        let mut compiled = Vec::with_capacity(routes.len());
        for spec in routes {
            let route = Route::from_spec(spec)
                .with_context(|| format!("resolving route {} `{}`", spec.id, spec.rule))?;
            compiled.push(route);
        }
        let mut matcher = EventMatcher::new();
        matcher.add_routes(compiled)?;

        self.components.insert(
            component.key(),
            ComponentInfo {
                component,
                matcher,
                default_handler: *default_handler,
            },
        );
        Ok(())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.components.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }

    /// Pick the component and route that should receive `event`, writing
    /// captured parameters onto it.
    ///
    /// An explicit target is matched against its own routes only, falling
    /// back to its default route. Otherwise the highest priority match
    /// across all components wins, then any component with a default
    /// handler.
    pub fn route(&self, event: &mut Event) -> Option<(Component, RouteId)> {
        if let Some(target) = event.target.clone().filter(|t| !t.name().is_empty()) {
            let info = self.find_target(&target)?;
            let route = match info.matcher.match_event(event) {
                Some(route) => RouteId::Declared(route.id()),
                None => RouteId::Default,
            };
            return Some((info.component.clone(), route));
        }

        let mut best: Option<(usize, &ComponentInfo, RouteId, Event)> = None;
        for info in self.components.values() {
            let mut candidate = event.clone();
            let Some(route) = info.matcher.match_event(&mut candidate) else {
                continue;
            };
            if best.as_ref().is_none_or(|(priority, ..)| route.priority() > *priority) {
                best = Some((
                    route.priority(),
                    info,
                    RouteId::Declared(route.id()),
                    candidate,
                ));
            }
        }
        if let Some((_, info, route, matched)) = best {
            *event = matched;
            return Some((info.component.clone(), route));
        }

        self.components
            .values()
            .find(|info| info.default_handler)
            .map(|info| (info.component.clone(), RouteId::Default))
    }

    /// Registered component matching `target`. Empty commit or id fields act
    /// as wildcards.
    fn find_target(&self, target: &Component) -> Option<&ComponentInfo> {
        self.components.values().find(|info| {
            let c = &info.component;
            c.name() == target.name()
                && (target.commit().is_empty() || c.commit() == target.commit())
                && (target.id().is_empty() || c.id() == target.id())
        })
    }
}
