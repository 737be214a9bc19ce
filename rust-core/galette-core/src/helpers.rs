//! # Scoped Helpers
//!
//! Named functions callable from handlers, filters, conditions and rescue
//! handlers through [`Endpoint::helper`].
//!
//! Helpers are recorded per scope in a [`HelperScopes`] arena while the API
//! is declared and resolved into one [`HelperTable`] per route at build
//! time. A route therefore sees helpers its scope declares after the route
//! itself, and inner scopes shadow outer ones.

use crate::endpoint::Endpoint;
use crate::fault::HandlerResult;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// Helper callable with positional arguments
pub type HelperFn = Arc<dyn Fn(&mut Endpoint, &[Value]) -> HandlerResult + Send + Sync>;

/// Helpers visible to one route, by name
pub type HelperTable = HashMap<String, HelperFn>;

/// Wrap a closure as a [`HelperFn`]
pub fn helper_fn<F>(f: F) -> HelperFn
where
    F: Fn(&mut Endpoint, &[Value]) -> HandlerResult + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Memoize a helper per request
///
/// The first call with a given argument list runs `helper`; later calls on
/// the same endpoint return the stored value. Halts and faults are not
/// stored.
#[must_use]
pub fn memoize(name: &str, helper: HelperFn) -> HelperFn {
    let name = name.to_string();
    helper_fn(move |ep, args| {
        let key = format!("{name}{}", Value::Array(args.to_vec()));
        if let Some(value) = ep.memo(&key) {
            return Ok(value.clone());
        }
        let value = helper(ep, args)?;
        ep.set_memo(key, value.clone());
        Ok(value)
    })
}

#[derive(Clone, Default)]
struct ScopeNode {
    parent: Option<usize>,
    helpers: HelperTable,
}

/// Arena of helper scopes, one node per DSL block
#[derive(Clone)]
pub struct HelperScopes {
    nodes: Vec<ScopeNode>,
}

impl Default for HelperScopes {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for HelperScopes {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.nodes.iter().map(|node| {
                let mut names: Vec<&str> = node.helpers.keys().map(String::as_str).collect();
                names.sort_unstable();
                (node.parent, names)
            }))
            .finish()
    }
}

impl HelperScopes {
    /// Id of the root scope
    pub const ROOT: usize = 0;

    /// Arena holding only the root scope
    #[must_use]
    pub fn new() -> Self {
        Self {
            nodes: vec![ScopeNode::default()],
        }
    }

    /// Open a child scope of `parent`
    pub fn open(&mut self, parent: usize) -> usize {
        self.nodes.push(ScopeNode {
            parent: Some(parent),
            helpers: HashMap::new(),
        });
        self.nodes.len() - 1
    }

    /// Declare a helper in `scope`; redeclaring a name replaces it
    pub fn define(&mut self, scope: usize, name: impl Into<String>, helper: HelperFn) {
        if let Some(node) = self.nodes.get_mut(scope) {
            node.helpers.insert(name.into(), helper);
        }
    }

    /// Every helper visible from `scope`, inner declarations winning
    #[must_use]
    pub fn table(&self, scope: usize) -> HelperTable {
        let mut chain = Vec::new();
        let mut current = Some(scope);
        while let Some(id) = current {
            let Some(node) = self.nodes.get(id) else { break };
            chain.push(node);
            current = node.parent;
        }
        chain
            .into_iter()
            .rev()
            .flat_map(|node| node.helpers.iter())
            .map(|(name, helper)| (name.clone(), helper.clone()))
            .collect()
    }

    /// Copy another arena in below `parent`, returning the offset to add
    /// to the other arena's scope ids
    pub fn graft(&mut self, other: &Self, parent: usize) -> usize {
        let offset = self.nodes.len();
        self.nodes.extend(other.nodes.iter().map(|node| ScopeNode {
            parent: Some(node.parent.map_or(parent, |p| p + offset)),
            helpers: node.helpers.clone(),
        }));
        offset
    }

    /// Number of scopes, root included
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Always false; the root scope exists
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn constant(value: Value) -> HelperFn {
        helper_fn(move |_, _| Ok(value.clone()))
    }

    fn call(table: &HelperTable, name: &str) -> Value {
        let mut ep = Endpoint::detached();
        table[name](&mut ep, &[]).unwrap()
    }

    #[test]
    fn test_inner_shadows_outer() {
        let mut scopes = HelperScopes::new();
        scopes.define(HelperScopes::ROOT, "who", constant(json!("root")));
        scopes.define(HelperScopes::ROOT, "shared", constant(json!(1)));
        let child = scopes.open(HelperScopes::ROOT);
        scopes.define(child, "who", constant(json!("child")));

        let table = scopes.table(child);
        assert_eq!(call(&table, "who"), json!("child"));
        assert_eq!(call(&table, "shared"), json!(1));
        assert_eq!(call(&scopes.table(HelperScopes::ROOT), "who"), json!("root"));
    }

    #[test]
    fn test_siblings_do_not_see_each_other() {
        let mut scopes = HelperScopes::new();
        let a = scopes.open(HelperScopes::ROOT);
        let b = scopes.open(HelperScopes::ROOT);
        scopes.define(a, "only_a", constant(Value::Null));
        assert!(scopes.table(a).contains_key("only_a"));
        assert!(!scopes.table(b).contains_key("only_a"));
    }

    #[test]
    fn test_graft_reparents_root() {
        let mut outer = HelperScopes::new();
        let mount = outer.open(HelperScopes::ROOT);
        outer.define(mount, "current_user", constant(json!("ada")));

        let mut inner = HelperScopes::new();
        let nested = inner.open(HelperScopes::ROOT);
        inner.define(nested, "local", constant(json!(true)));

        let offset = outer.graft(&inner, mount);
        let table = outer.table(nested + offset);
        assert_eq!(call(&table, "current_user"), json!("ada"));
        assert_eq!(call(&table, "local"), json!(true));
        assert_eq!(outer.len(), 4);
    }

    #[test]
    fn test_memoize_runs_once_per_arguments() {
        let counter = helper_fn(|ep, args| {
            let calls = ep.local("calls").and_then(Value::as_i64).unwrap_or(0) + 1;
            ep.set_local("calls", json!(calls));
            Ok(json!({"args": args, "calls": calls}))
        });
        let memo = memoize("counter", counter);
        let mut ep = Endpoint::detached();

        let first = memo(&mut ep, &[json!(1)]).unwrap();
        let again = memo(&mut ep, &[json!(1)]).unwrap();
        let other = memo(&mut ep, &[json!(2)]).unwrap();

        assert_eq!(first, again);
        assert_eq!(other["calls"], json!(2));
        assert_eq!(ep.local("calls"), Some(&json!(2)));
    }
}
