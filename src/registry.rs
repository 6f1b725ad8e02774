//! Registry of export format plugins.
//!
//! Plugins register *factories*, not instances. Every export session asks the
//! registry to [`instantiate`](Registry::instantiate) a fresh plugin so that no
//! per-session state (translated strings, last-used parameters) leaks between
//! runs.
//!
//! Registration may happen from any number of independent initialization sites
//! in any order. The iteration order is computed once, on the first
//! [`resolve`](Registry::resolve), by a topological sort over each plugin's
//! [`Placement`] hint with ties broken by identifier, so it does not depend on
//! registration order. After that the registry is closed and read-only.
//!
//! ```rust
//! use audio_export::registry::{Placement, PluginDescriptor, Registry};
//! use audio_export::formats::{RawPlugin, WavPlugin};
//!
//! let registry = Registry::new();
//! registry
//!     .register(PluginDescriptor::new("raw", || Box::new(RawPlugin::new())))
//!     .unwrap();
//! registry
//!     .register(
//!         PluginDescriptor::new("wav", || Box::new(WavPlugin::new()))
//!             .with_placement(Placement::before("raw")),
//!     )
//!     .unwrap();
//!
//! let resolved = registry.resolve();
//! let ids: Vec<&str> = resolved.descriptors.iter().map(|d| d.id()).collect();
//! assert_eq!(ids, ["wav", "raw"]);
//! ```

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::{Arc, OnceLock};

use parking_lot::RwLock;

use crate::error::{ExportError, ExportResult, Notice};
use crate::plugin::ExportPlugin;

/// Factory producing a fresh plugin instance.
pub type PluginFactory = Arc<dyn Fn() -> Box<dyn ExportPlugin> + Send + Sync>;

/// Which side of the anchor a plugin is placed on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PlacementOrder {
    /// Sort before the anchor.
    Before,
    /// Sort after the anchor.
    After,
}

/// Ordering hint relative to another plugin.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Placement {
    /// Identifier of the plugin this hint refers to.
    pub anchor: String,
    /// Side of the anchor.
    pub order: PlacementOrder,
}

impl Placement {
    /// Place before `anchor`.
    pub fn before(anchor: impl Into<String>) -> Self {
        Self {
            anchor: anchor.into(),
            order: PlacementOrder::Before,
        }
    }

    /// Place after `anchor`.
    pub fn after(anchor: impl Into<String>) -> Self {
        Self {
            anchor: anchor.into(),
            order: PlacementOrder::After,
        }
    }
}

/// A registered export format: identifier, factory and placement hint.
#[derive(Clone)]
pub struct PluginDescriptor {
    id: String,
    factory: PluginFactory,
    placement: Option<Placement>,
}

impl PluginDescriptor {
    /// Create a descriptor without a placement hint.
    pub fn new<F>(id: impl Into<String>, factory: F) -> Self
    where
        F: Fn() -> Box<dyn ExportPlugin> + Send + Sync + 'static,
    {
        Self {
            id: id.into(),
            factory: Arc::new(factory),
            placement: None,
        }
    }

    /// Attach a placement hint.
    pub fn with_placement(mut self, placement: Placement) -> Self {
        self.placement = Some(placement);
        self
    }

    /// Stable identifier.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Placement hint, if any.
    pub const fn placement(&self) -> Option<&Placement> {
        self.placement.as_ref()
    }

    /// Create a fresh plugin instance.
    pub fn instantiate(&self) -> Box<dyn ExportPlugin> {
        (self.factory)()
    }
}

impl fmt::Debug for PluginDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginDescriptor")
            .field("id", &self.id)
            .field("placement", &self.placement)
            .finish_non_exhaustive()
    }
}

/// Resolved registry order.
#[derive(Debug, Clone)]
pub struct ResolvedOrder {
    /// Descriptors in their final order.
    pub descriptors: Arc<[PluginDescriptor]>,
    /// Conditions recovered while resolving.
    pub notices: Vec<Notice>,
}

impl ResolvedOrder {
    /// Position of the plugin with identifier `id`.
    pub fn position(&self, id: &str) -> Option<usize> {
        self.descriptors.iter().position(|d| d.id() == id)
    }
}

#[derive(Default)]
struct RegistryInner {
    descriptors: Vec<PluginDescriptor>,
    resolved: Option<ResolvedOrder>,
}

/// Ordered collection of export plugin factories.
#[derive(Default)]
pub struct Registry {
    inner: RwLock<RegistryInner>,
}

impl Registry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a plugin factory.
    ///
    /// Fails with `DuplicateIdentifier` if the identifier is taken, and with
    /// `RegistryClosed` once the order has been resolved. A failed call leaves
    /// the registry unchanged.
    pub fn register(&self, descriptor: PluginDescriptor) -> ExportResult<()> {
        let mut inner = self.inner.write();
        if inner.resolved.is_some() {
            return Err(ExportError::RegistryClosed(descriptor.id));
        }
        if inner.descriptors.iter().any(|d| d.id == descriptor.id) {
            return Err(ExportError::DuplicateIdentifier(descriptor.id));
        }
        tracing::debug!(id = %descriptor.id, placement = ?descriptor.placement, "Registered export plugin");
        inner.descriptors.push(descriptor);
        Ok(())
    }

    /// Check if a plugin with identifier `id` is registered.
    pub fn contains(&self, id: &str) -> bool {
        self.inner.read().descriptors.iter().any(|d| d.id == id)
    }

    /// Number of registered plugins.
    pub fn len(&self) -> usize {
        self.inner.read().descriptors.len()
    }

    /// Check if no plugin is registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Check if the order has been resolved and registration is closed.
    pub fn is_closed(&self) -> bool {
        self.inner.read().resolved.is_some()
    }

    /// Compute the final plugin order and close the registry.
    ///
    /// The order is computed once and cached, so repeated calls return the same
    /// sequence. If placement hints form a cycle the registry falls back to
    /// registration order and reports a `CyclicPlacement` notice.
    pub fn resolve(&self) -> ResolvedOrder {
        if let Some(resolved) = &self.inner.read().resolved {
            return resolved.clone();
        }

        let mut inner = self.inner.write();
        if let Some(resolved) = &inner.resolved {
            return resolved.clone();
        }

        let resolved = match sort_by_placement(&inner.descriptors) {
            Ok(order) => ResolvedOrder {
                descriptors: order.into(),
                notices: Vec::new(),
            },
            Err(ExportError::CyclicPlacement(members)) => {
                tracing::warn!(
                    ?members,
                    "Export plugin placement hints form a cycle, using registration order"
                );
                ResolvedOrder {
                    descriptors: inner.descriptors.clone().into(),
                    notices: vec![Notice::CyclicPlacement { members }],
                }
            }
            Err(other) => {
                tracing::warn!("Failed to sort export plugins: {other}");
                ResolvedOrder {
                    descriptors: inner.descriptors.clone().into(),
                    notices: Vec::new(),
                }
            }
        };

        tracing::debug!(
            order = ?resolved.descriptors.iter().map(|d| d.id()).collect::<Vec<_>>(),
            "Resolved export plugin order"
        );
        inner.resolved = Some(resolved.clone());
        resolved
    }

    /// Create a fresh instance from `descriptor`.
    pub fn instantiate(&self, descriptor: &PluginDescriptor) -> Box<dyn ExportPlugin> {
        tracing::debug!(id = %descriptor.id, "Instantiating export plugin");
        descriptor.instantiate()
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.read();
        f.debug_struct("Registry")
            .field("descriptors", &inner.descriptors)
            .field("closed", &inner.resolved.is_some())
            .finish()
    }
}

/// The process-wide registry.
pub fn global_registry() -> &'static Registry {
    static GLOBAL: OnceLock<Registry> = OnceLock::new();
    GLOBAL.get_or_init(Registry::new)
}

/// Register `descriptor` with the process-wide registry.
pub fn register_plugin(descriptor: PluginDescriptor) -> ExportResult<()> {
    global_registry().register(descriptor)
}

/// Kahn's algorithm over placement edges, picking the smallest ready identifier
/// at each step. Hints naming an unknown anchor are ignored.
fn sort_by_placement(descriptors: &[PluginDescriptor]) -> ExportResult<Vec<PluginDescriptor>> {
    let index: BTreeMap<&str, usize> = descriptors
        .iter()
        .enumerate()
        .map(|(i, d)| (d.id.as_str(), i))
        .collect();

    let mut successors: Vec<BTreeSet<usize>> = vec![BTreeSet::new(); descriptors.len()];
    for (i, descriptor) in descriptors.iter().enumerate() {
        let Some(placement) = &descriptor.placement else {
            continue;
        };
        let Some(&anchor) = index.get(placement.anchor.as_str()) else {
            tracing::debug!(
                id = %descriptor.id,
                anchor = %placement.anchor,
                "Placement anchor is not registered, ignoring hint"
            );
            continue;
        };
        match placement.order {
            PlacementOrder::Before => successors[i].insert(anchor),
            PlacementOrder::After => successors[anchor].insert(i),
        };
    }

    let mut in_degree = vec![0usize; descriptors.len()];
    for targets in &successors {
        for &t in targets {
            in_degree[t] += 1;
        }
    }

    let mut ready: BTreeSet<(&str, usize)> = descriptors
        .iter()
        .enumerate()
        .filter(|(i, _)| in_degree[*i] == 0)
        .map(|(i, d)| (d.id.as_str(), i))
        .collect();

    let mut order = Vec::with_capacity(descriptors.len());
    while let Some(next) = ready.pop_first() {
        let (_, i) = next;
        order.push(descriptors[i].clone());
        for &t in &successors[i] {
            in_degree[t] -= 1;
            if in_degree[t] == 0 {
                ready.insert((descriptors[t].id.as_str(), t));
            }
        }
    }

    if order.len() < descriptors.len() {
        let members = descriptors
            .iter()
            .enumerate()
            .filter(|(i, _)| in_degree[*i] > 0)
            .map(|(_, d)| d.id.clone())
            .collect();
        return Err(ExportError::CyclicPlacement(members));
    }
    Ok(order)
}
