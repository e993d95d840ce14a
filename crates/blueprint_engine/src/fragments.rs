//! Fragment registry: named reusable subgraphs, looked up by id or tag.

use std::sync::Arc;

use dashmap::DashMap;
use tracing::debug;

use blueprint_graph::Fragment;

use crate::error::FragmentError;

/// Concurrent store of registered fragments
///
/// Unlike node templates, fragments may be registered at any point in the
/// process lifetime (content updates ship new fragments), so the store is a
/// concurrent map rather than a frozen table. Registered fragments are still
/// immutable; an update is a new fragment under a new id.
#[derive(Default)]
pub struct FragmentRegistry {
    fragments: DashMap<String, Arc<Fragment>>,
}

impl FragmentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, fragment: Fragment) -> Result<(), FragmentError> {
        validate(&fragment)?;
        if self.fragments.contains_key(&fragment.id) {
            return Err(FragmentError::AlreadyRegistered {
                fragment_id: fragment.id.clone(),
            });
        }
        debug!(fragment_id = %fragment.id, nodes = fragment.nodes.len(), "registered fragment");
        self.fragments
            .insert(fragment.id.clone(), Arc::new(fragment));
        Ok(())
    }

    pub fn get(&self, fragment_id: &str) -> Result<Arc<Fragment>, FragmentError> {
        self.fragments
            .get(fragment_id)
            .map(|f| f.value().clone())
            .ok_or_else(|| FragmentError::UnknownFragment {
                fragment_id: fragment_id.to_string(),
            })
    }

    /// All fragments carrying a tag, in id order
    pub fn list_by_tag(&self, tag: &str) -> Vec<Arc<Fragment>> {
        let mut found: Vec<Arc<Fragment>> = self
            .fragments
            .iter()
            .filter(|e| e.value().has_tag(tag))
            .map(|e| e.value().clone())
            .collect();
        found.sort_by(|a, b| a.id.cmp(&b.id));
        found
    }

    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.fragments.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.fragments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fragments.is_empty()
    }
}

fn validate(fragment: &Fragment) -> Result<(), FragmentError> {
    let mut seen = std::collections::HashSet::new();
    for boundary in &fragment.boundary_pins {
        if !seen.insert(boundary.exposed_name.as_str()) {
            return Err(FragmentError::DuplicateBoundary {
                fragment_id: fragment.id.clone(),
                exposed_name: boundary.exposed_name.clone(),
            });
        }
        if fragment.node(&boundary.node_id).is_none() {
            return Err(FragmentError::BoundaryTargetMissing {
                fragment_id: fragment.id.clone(),
                exposed_name: boundary.exposed_name.clone(),
                node_id: boundary.node_id.clone(),
            });
        }
    }
    Ok(())
}
