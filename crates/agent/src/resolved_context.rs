//! `ResolvedContext` (spec §4.7): the per-session authoritative map of
//! infrastructure resources the model has discovered, with TTL/LRU
//! eviction, pinning, alias lookup, and action authorization.
//!
//! Mirrors the HashMap-plus-`last_access: Instant` eviction shape of an
//! in-process workspace cache, but swaps the async mutex for a synchronous
//! one: reads and writes here are never held across I/O (spec §5).

use crate::config::ResolvedContextConfig;
use crate::error::AgentError;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Default)]
pub struct ResourceScope {
    pub host_uid: Option<String>,
    pub host_name: Option<String>,
    pub parent_uid: Option<String>,
    pub parent_kind: Option<String>,
    pub cluster_uid: Option<String>,
    pub namespace: Option<String>,
}

/// One way the dispatcher can reach a resource to act on it (e.g. "via the
/// node's agent", "via the cluster API"), and what it permits there.
#[derive(Debug, Clone)]
pub struct ExecutorPath {
    pub via: String,
    pub actions: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct ResolvedResource {
    pub kind: String,
    pub provider_uid: String,
    pub scope: ResourceScope,
    pub aliases: Vec<String>,
    pub resource_id: String,
    pub name: String,
    pub display_path: String,
    pub location_chain: Vec<String>,
    pub reachable_via: Vec<ExecutorPath>,
    pub allowed_actions: Vec<String>,
    pub vmid: Option<String>,
    pub node: Option<String>,
    pub resolved_at: i64,
}

impl ResolvedResource {
    /// `{kind}:{host_scope}:{provider_uid}` when scope has a host, else
    /// `{kind}:{provider_uid}`; falls back to a name-based id when
    /// `provider_uid` is empty (spec §3).
    pub fn derive_resource_id(kind: &str, provider_uid: &str, scope: &ResourceScope, name: &str) -> String {
        if !provider_uid.is_empty() {
            match scope.host_uid.as_deref().or(scope.host_name.as_deref()) {
                Some(host) => format!("{kind}:{host}:{provider_uid}"),
                None => format!("{kind}:{provider_uid}"),
            }
        } else {
            format!("{kind}:name:{name}")
        }
    }

    /// Union of actions across every reachable path (spec §3 invariant).
    pub fn union_allowed_actions(reachable_via: &[ExecutorPath]) -> Vec<String> {
        let mut set: Vec<String> = Vec::new();
        for path in reachable_via {
            for action in &path.actions {
                if !set.contains(action) {
                    set.push(action.clone());
                }
            }
        }
        set
    }

    pub fn new(
        kind: impl Into<String>,
        provider_uid: impl Into<String>,
        scope: ResourceScope,
        name: impl Into<String>,
        reachable_via: Vec<ExecutorPath>,
        resolved_at: i64,
    ) -> Self {
        let kind = kind.into();
        let provider_uid = provider_uid.into();
        let name = name.into();
        let resource_id = Self::derive_resource_id(&kind, &provider_uid, &scope, &name);
        let allowed_actions = Self::union_allowed_actions(&reachable_via);
        let mut aliases = vec![name.clone()];
        aliases.dedup();

        Self {
            kind,
            provider_uid,
            scope,
            aliases,
            resource_id,
            display_path: name.clone(),
            location_chain: Vec::new(),
            reachable_via,
            allowed_actions,
            vmid: None,
            node: None,
            name,
            resolved_at,
        }
    }
}

struct Entry {
    resource: ResolvedResource,
    last_accessed: Instant,
    explicitly_accessed_at: Option<Instant>,
    pinned: bool,
}

struct Inner {
    by_resource_id: HashMap<String, Entry>,
    /// name / alias → resource_id, for the other two lookup indexes.
    by_name: HashMap<String, String>,
    by_alias: HashMap<String, String>,
}

pub struct ResolvedContext {
    config: ResolvedContextConfig,
    inner: Mutex<Inner>,
}

impl ResolvedContext {
    pub fn new(config: ResolvedContextConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(Inner {
                by_resource_id: HashMap::new(),
                by_name: HashMap::new(),
                by_alias: HashMap::new(),
            }),
        }
    }

    pub fn add_resource(&self, resource: ResolvedResource) {
        self.add_resource_inner(resource, false, false);
    }

    pub fn add_resource_with_explicit_access(&self, resource: ResolvedResource) {
        self.add_resource_inner(resource, true, false);
    }

    /// Insert a resource already pinned, so it cannot race with TTL/LRU
    /// eviction between being added and a caller getting the chance to
    /// `pin` it.
    pub fn add_resource_pinned(&self, resource: ResolvedResource) {
        self.add_resource_inner(resource, false, true);
    }

    fn add_resource_inner(&self, resource: ResolvedResource, explicit: bool, pinned: bool) {
        let mut inner = self.inner.lock();
        let now = Instant::now();

        inner.by_name.insert(resource.name.to_lowercase(), resource.resource_id.clone());
        for alias in &resource.aliases {
            inner.by_alias.insert(alias.to_lowercase(), resource.resource_id.clone());
        }

        let resource_id = resource.resource_id.clone();
        let already_pinned = inner
            .by_resource_id
            .get(&resource_id)
            .map(|e| e.pinned)
            .unwrap_or(false);

        inner.by_resource_id.insert(
            resource_id,
            Entry {
                resource,
                last_accessed: now,
                explicitly_accessed_at: if explicit { Some(now) } else { None },
                pinned: pinned || already_pinned,
            },
        );

        self.evict_expired_and_over_cap(&mut inner);
    }

    /// Pin a resource so TTL/LRU eviction never removes it.
    pub fn pin(&self, resource_id: &str) {
        if let Some(entry) = self.inner.lock().by_resource_id.get_mut(resource_id) {
            entry.pinned = true;
        }
    }

    pub fn mark_explicit_access(&self, resource_id: &str) {
        let mut inner = self.inner.lock();
        let now = Instant::now();
        if let Some(entry) = inner.by_resource_id.get_mut(resource_id) {
            entry.explicitly_accessed_at = Some(now);
            entry.last_accessed = now;
        }
    }

    pub fn get_by_resource_id(&self, resource_id: &str) -> Option<ResolvedResource> {
        let mut inner = self.inner.lock();
        self.touch(&mut inner, resource_id);
        inner.by_resource_id.get(resource_id).map(|e| e.resource.clone())
    }

    pub fn get_by_name(&self, name: &str) -> Option<ResolvedResource> {
        let id = self.inner.lock().by_name.get(&name.to_lowercase()).cloned()?;
        self.get_by_resource_id(&id)
    }

    pub fn get_by_alias(&self, alias: &str) -> Option<ResolvedResource> {
        let id = self.inner.lock().by_alias.get(&alias.to_lowercase()).cloned()?;
        self.get_by_resource_id(&id)
    }

    fn touch(&self, inner: &mut Inner, resource_id: &str) {
        if let Some(entry) = inner.by_resource_id.get_mut(resource_id) {
            entry.last_accessed = Instant::now();
        }
        self.evict_expired_and_over_cap(inner);
    }

    /// `ValidateResourceForAction(resource_id, action)` (spec §4.7).
    pub fn validate_for_action(&self, resource_id: &str, action: &str) -> Result<ResolvedResource, AgentError> {
        let resource = self
            .get_by_resource_id(resource_id)
            .ok_or_else(|| AgentError::ResourceNotResolved {
                resource_id: resource_id.to_string(),
            })?;

        let allowed = resource
            .allowed_actions
            .iter()
            .any(|a| a == "*" || a == action);

        if allowed {
            Ok(resource)
        } else {
            Err(AgentError::ActionNotAllowed {
                resource_id: resource_id.to_string(),
                action: action.to_string(),
            })
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().by_resource_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn evict_expired_and_over_cap(&self, inner: &mut Inner) {
        let now = Instant::now();
        let ttl = Duration::from_secs(self.config.ttl_secs);
        let recent_window = Duration::from_secs(self.config.recent_access_window_secs);

        let expired: Vec<String> = inner
            .by_resource_id
            .iter()
            .filter(|(_, e)| !e.pinned && now.duration_since(e.last_accessed) >= ttl)
            .map(|(id, _)| id.clone())
            .collect();
        for id in expired {
            self.remove(inner, &id);
        }

        for entry in inner.by_resource_id.values_mut() {
            if let Some(at) = entry.explicitly_accessed_at {
                if now.duration_since(at) > recent_window {
                    entry.explicitly_accessed_at = None;
                }
            }
        }

        while inner.by_resource_id.len() > self.config.max_entries {
            let victim = inner
                .by_resource_id
                .iter()
                .filter(|(_, e)| !e.pinned)
                .min_by_key(|(_, e)| e.last_accessed)
                .map(|(id, _)| id.clone());
            match victim {
                Some(id) => self.remove(inner, &id),
                None => break,
            }
        }
    }

    fn remove(&self, inner: &mut Inner, resource_id: &str) {
        if let Some(entry) = inner.by_resource_id.remove(resource_id) {
            inner.by_name.retain(|_, v| v != resource_id);
            inner.by_alias.retain(|_, v| v != resource_id);
            drop(entry);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(max_entries: usize, ttl_secs: u64) -> ResolvedContextConfig {
        ResolvedContextConfig {
            ttl_secs,
            max_entries,
            recent_access_window_secs: 30,
        }
    }

    fn resource(name: &str, provider_uid: &str, actions: &[&str]) -> ResolvedResource {
        ResolvedResource::new(
            "vm",
            provider_uid,
            ResourceScope {
                host_uid: Some("pve1".into()),
                ..Default::default()
            },
            name,
            vec![ExecutorPath {
                via: "node-agent".into(),
                actions: actions.iter().map(|s| s.to_string()).collect(),
            }],
            0,
        )
    }

    #[test]
    fn resource_id_uses_host_scope_when_present() {
        let r = resource("web-01", "100", &["start", "stop"]);
        assert_eq!(r.resource_id, "vm:pve1:100");
    }

    #[test]
    fn resource_id_falls_back_to_name_when_provider_uid_empty() {
        let r = resource("web-01", "", &["start"]);
        assert_eq!(r.resource_id, "vm:name:web-01");
    }

    #[test]
    fn allowed_actions_is_union_across_reachable_paths() {
        let r = ResolvedResource::new(
            "vm",
            "100",
            ResourceScope::default(),
            "web-01",
            vec![
                ExecutorPath { via: "a".into(), actions: vec!["start".into()] },
                ExecutorPath { via: "b".into(), actions: vec!["stop".into(), "start".into()] },
            ],
            0,
        );
        assert_eq!(r.allowed_actions.len(), 2);
        assert!(r.allowed_actions.contains(&"start".to_string()));
        assert!(r.allowed_actions.contains(&"stop".to_string()));
    }

    #[test]
    fn lookup_by_name_and_alias_is_case_insensitive() {
        let ctx = ResolvedContext::new(config(500, 45 * 60));
        ctx.add_resource(resource("Web-01", "100", &["start"]));

        assert!(ctx.get_by_name("web-01").is_some());
        assert!(ctx.get_by_alias("WEB-01").is_some());
    }

    #[test]
    fn validate_for_action_success_and_not_resolved() {
        let ctx = ResolvedContext::new(config(500, 45 * 60));
        let r = resource("web-01", "100", &["start", "stop"]);
        let id = r.resource_id.clone();
        ctx.add_resource(r);

        assert!(ctx.validate_for_action(&id, "start").is_ok());
        assert!(matches!(
            ctx.validate_for_action("vm:pve1:999", "start"),
            Err(AgentError::ResourceNotResolved { .. })
        ));
    }

    #[test]
    fn validate_for_action_rejects_disallowed_action() {
        let ctx = ResolvedContext::new(config(500, 45 * 60));
        let r = resource("web-01", "100", &["start"]);
        let id = r.resource_id.clone();
        ctx.add_resource(r);

        assert!(matches!(
            ctx.validate_for_action(&id, "delete"),
            Err(AgentError::ActionNotAllowed { .. })
        ));
    }

    #[test]
    fn wildcard_action_matches_any() {
        let ctx = ResolvedContext::new(config(500, 45 * 60));
        let r = resource("web-01", "100", &["*"]);
        let id = r.resource_id.clone();
        ctx.add_resource(r);

        assert!(ctx.validate_for_action(&id, "anything").is_ok());
    }

    #[test]
    fn size_cap_evicts_least_recently_accessed_non_pinned() {
        let ctx = ResolvedContext::new(config(2, 45 * 60));
        ctx.add_resource(resource("a", "1", &["start"]));
        ctx.add_resource(resource("b", "2", &["start"]));
        // touch "a" so "b" becomes the least-recently-accessed entry
        let _ = ctx.get_by_name("a");
        ctx.add_resource(resource("c", "3", &["start"]));

        assert_eq!(ctx.len(), 2);
        assert!(ctx.get_by_name("a").is_some());
        assert!(ctx.get_by_name("c").is_some());
        assert!(ctx.get_by_name("b").is_none());
    }

    #[test]
    fn pinned_resource_survives_ttl_eviction() {
        let ctx = ResolvedContext::new(config(500, 0));
        let r = resource("web-01", "100", &["start"]);
        let id = r.resource_id.clone();
        ctx.add_resource_pinned(r);

        // TTL is zero, so an unpinned entry would be evicted immediately;
        // this one is pinned at insertion time and must survive.
        assert!(ctx.get_by_resource_id(&id).is_some());
    }

    #[test]
    fn unpinned_resource_is_evicted_once_ttl_elapses() {
        let ctx = ResolvedContext::new(config(500, 0));
        let r = resource("web-01", "100", &["start"]);
        ctx.add_resource(r);

        // TTL of zero means any age at all is expired; the next mutation
        // (adding a second, unrelated resource) sweeps it.
        ctx.add_resource(resource("other", "200", &["start"]));
        assert!(ctx.get_by_name("web-01").is_none());
    }
}
