//! Catalog Aggregator: one collision-resolved namespace over every Ready server.
//!
//! Servers are merged in configured order. The first server to advertise a
//! name keeps it; every later server's tool of the same name is re-published
//! as `<server><separator><tool>`, so nothing is dropped.

use crate::handle::ServerHandle;
use crate::schema::ArgumentSchema;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use toolgate_core::ToolSchema;
use tracing::warn;

/// One public tool name and where it leads.
#[derive(Debug, Clone)]
pub struct ToolRegistryEntry {
    /// The name the model sees and calls.
    pub public_name: String,
    /// Owning server identity.
    pub server: String,
    handle: Weak<ServerHandle>,
    /// The schema as advertised by the server (server-local name).
    pub schema: ToolSchema,
    /// `schema.input_schema`, compiled.
    pub arguments: Arc<ArgumentSchema>,
}

impl ToolRegistryEntry {
    /// The owning handle, if it is still alive.
    pub fn handle(&self) -> Option<Arc<ServerHandle>> {
        self.handle.upgrade()
    }

    /// The schema published under its public name.
    pub fn public_schema(&self) -> ToolSchema {
        self.schema.renamed(&self.public_name)
    }
}

/// A recorded collision decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Collision {
    /// Server-local tool name both servers advertise.
    pub tool: String,
    /// Server that kept the bare name.
    pub winner: String,
    /// Server whose tool was aliased.
    pub loser: String,
    /// Public name given to the loser's tool.
    pub alias: String,
}

/// Immutable snapshot of the aggregated catalog.
#[derive(Debug, Default)]
pub struct ToolRegistry {
    entries: Vec<ToolRegistryEntry>,
    index: HashMap<String, usize>,
    collisions: Vec<Collision>,
}

impl ToolRegistry {
    /// Merge the catalogs of `handles`, which must already be in configured order.
    pub fn build(handles: &[Arc<ServerHandle>], separator: &str) -> Self {
        let mut registry = Self::default();

        for handle in handles {
            for schema in handle.tools() {
                let public_name = match registry.index.get(&schema.name) {
                    None => schema.name.clone(),
                    Some(&existing) => {
                        let winner = registry.entries[existing].server.clone();
                        let alias = registry.free_alias(handle.name(), &schema.name, separator);
                        warn!(
                            tool = %schema.name,
                            winner = %winner,
                            loser = %handle.name(),
                            alias = %alias,
                            "Tool name collision, aliasing later server's tool"
                        );
                        registry.collisions.push(Collision {
                            tool: schema.name.clone(),
                            winner,
                            loser: handle.name().to_string(),
                            alias: alias.clone(),
                        });
                        alias
                    }
                };

                registry
                    .index
                    .insert(public_name.clone(), registry.entries.len());
                registry.entries.push(ToolRegistryEntry {
                    public_name,
                    server: handle.name().to_string(),
                    handle: Arc::downgrade(handle),
                    arguments: Arc::new(ArgumentSchema::compile(&schema.name, &schema.input_schema)),
                    schema: schema.clone(),
                });
            }
        }

        registry
    }

    fn free_alias(&self, server: &str, tool: &str, separator: &str) -> String {
        let base = format!("{server}{separator}{tool}");
        if !self.index.contains_key(&base) {
            return base;
        }
        let mut n = 2;
        loop {
            let candidate = format!("{base}_{n}");
            if !self.index.contains_key(&candidate) {
                return candidate;
            }
            n += 1;
        }
    }

    /// Look up a tool by its public name.
    pub fn get(&self, public_name: &str) -> Option<&ToolRegistryEntry> {
        self.index.get(public_name).map(|&i| &self.entries[i])
    }

    /// Entries in registration order.
    pub fn entries(&self) -> &[ToolRegistryEntry] {
        &self.entries
    }

    /// Every tool under its public name, ready to present to the model.
    pub fn schemas(&self) -> Vec<ToolSchema> {
        self.entries.iter().map(ToolRegistryEntry::public_schema).collect()
    }

    /// Collision decisions made while building this snapshot.
    pub fn collisions(&self) -> &[Collision] {
        &self.collisions
    }

    /// Number of public tools.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when no tool is registered.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn tool(name: &str) -> ToolSchema {
        ToolSchema::new(name, format!("{name} tool"), serde_json::json!({"type": "object"}))
    }

    fn server(name: &str, order: usize, tools: &[&str]) -> Arc<ServerHandle> {
        Arc::new(ServerHandle::offline(
            name,
            order,
            tools.iter().map(|t| tool(t)).collect(),
        ))
    }

    #[test]
    fn test_earlier_server_wins_bare_name() {
        let a = server("A", 0, &["x"]);
        let b = server("B", 1, &["x", "y"]);
        let registry = ToolRegistry::build(&[a, b], ".");

        let names: Vec<_> = registry
            .entries()
            .iter()
            .map(|e| e.public_name.as_str())
            .collect();
        assert_eq!(names, vec!["x", "B.x", "y"]);

        assert_eq!(registry.get("x").unwrap().server, "A");
        let aliased = registry.get("B.x").unwrap();
        assert_eq!(aliased.server, "B");
        assert_eq!(aliased.schema.name, "x");
        assert_eq!(aliased.public_schema().name, "B.x");
        assert_eq!(registry.get("y").unwrap().server, "B");

        assert_eq!(
            registry.collisions(),
            &[Collision {
                tool: "x".into(),
                winner: "A".into(),
                loser: "B".into(),
                alias: "B.x".into(),
            }]
        );
    }

    #[test]
    fn test_alias_clash_gets_suffix() {
        let a = server("A", 0, &["x", "B.x"]);
        let b = server("B", 1, &["x"]);
        let registry = ToolRegistry::build(&[a, b], ".");
        assert_eq!(registry.len(), 3);
        assert_eq!(registry.get("B.x").unwrap().server, "A");
        assert_eq!(registry.get("B.x_2").unwrap().server, "B");
    }

    #[test]
    fn test_custom_separator_and_schemas() {
        let a = server("fs", 0, &["read"]);
        let b = server("web", 1, &["read"]);
        let registry = ToolRegistry::build(&[a, b], "__");
        let names: Vec<_> = registry.schemas().into_iter().map(|s| s.name).collect();
        assert_eq!(names, vec!["read", "web__read"]);
    }

    #[test]
    fn test_dead_handle_is_not_upgradable() {
        let a = server("A", 0, &["x"]);
        let registry = ToolRegistry::build(&[a.clone()], ".");
        assert!(registry.get("x").unwrap().handle().is_some());
        drop(a);
        assert!(registry.get("x").unwrap().handle().is_none());
    }

    #[test]
    fn test_empty_registry() {
        let registry = ToolRegistry::build(&[], ".");
        assert!(registry.is_empty());
        assert!(registry.get("x").is_none());
        assert!(registry.collisions().is_empty());
    }
}
