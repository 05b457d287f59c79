//! Role-based capability filtering.
//!
//! Every tool is registered with an explicit [`ToolAccess`] classification;
//! that declared tag, not the tool's name, is what filtering runs on at
//! request time. The read-oriented naming convention survives only as a
//! registration-time lint: a name that disagrees with its declared access
//! logs a warning so drift gets noticed without ever widening a viewer's
//! capability set.

use tracing::warn;

use crate::auth::Role;
use crate::registry::{ToolDescriptor, ToolRegistry};

/// Declared access classification of a registered tool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolAccess {
    /// Does not modify project state; available to every role.
    Read,
    /// Creates, updates or deletes project state; admin only.
    Write,
}

/// Name suffixes conventionally marking read-only tools.
const READ_SUFFIXES: [&str; 4] = ["_list", "_get", "_search", "_view"];

/// Name prefix conventionally marking read-only tools.
const READ_PREFIX: &str = "list_";

/// Whether a tool name follows the read-oriented naming convention.
#[must_use]
pub fn name_looks_readonly(name: &str) -> bool {
    READ_SUFFIXES.iter().any(|s| name.ends_with(s)) || name.starts_with(READ_PREFIX)
}

/// Registration-time cross-check between a tool's name and its declared
/// access. Purely advisory: the declared access always wins.
pub fn lint_tool_name(name: &str, access: ToolAccess) {
    let looks_readonly = name_looks_readonly(name);
    match access {
        ToolAccess::Read if !looks_readonly => {
            warn!(tool = %name, "Read tool name does not follow the read naming convention");
        }
        ToolAccess::Write if looks_readonly => {
            warn!(tool = %name, "Write tool carries a read-looking name");
        }
        _ => {}
    }
}

/// Reduce a tool registry to the subset `role` may invoke.
///
/// `None` (auth disabled) and `Some(Admin)` pass the full registry through
/// unchanged; `Some(Viewer)` keeps declared-read tools only. The result is
/// recomputed on every call; the role can differ per request, so nothing
/// here is cacheable.
///
/// Resource and prompt registries are deliberately not role-filtered: both
/// surfaces are read-shaped by construction in this system, and only named
/// tools carry write semantics.
#[must_use]
pub fn scoped_tools(registry: &ToolRegistry, role: Option<Role>) -> Vec<ToolDescriptor> {
    match role {
        None | Some(Role::Admin) => registry.all(),
        Some(Role::Viewer) => registry
            .all()
            .into_iter()
            .filter(|tool| tool.access == ToolAccess::Read)
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::tests::sample_tool_registry;

    #[test]
    fn read_naming_convention_matches_suffixes_and_prefix() {
        assert!(name_looks_readonly("tasks_list"));
        assert!(name_looks_readonly("task_get"));
        assert!(name_looks_readonly("docs_search"));
        assert!(name_looks_readonly("milestone_view"));
        assert!(name_looks_readonly("list_decisions"));

        assert!(!name_looks_readonly("task_create"));
        assert!(!name_looks_readonly("task_update"));
        assert!(!name_looks_readonly("getter"));
    }

    #[test]
    fn admin_filter_is_the_identity_function() {
        let registry = sample_tool_registry();
        let scoped = scoped_tools(&registry, Some(Role::Admin));
        let names: Vec<_> = scoped.iter().map(|t| t.definition.name.clone()).collect();
        let all_names: Vec<_> = registry
            .all()
            .iter()
            .map(|t| t.definition.name.clone())
            .collect();
        assert_eq!(names, all_names);
    }

    #[test]
    fn no_role_passes_everything() {
        let registry = sample_tool_registry();
        assert_eq!(scoped_tools(&registry, None).len(), registry.all().len());
    }

    #[test]
    fn viewer_filter_keeps_declared_read_tools_only() {
        let registry = sample_tool_registry();
        let scoped = scoped_tools(&registry, Some(Role::Viewer));

        assert!(!scoped.is_empty());
        for tool in &scoped {
            assert_eq!(tool.access, ToolAccess::Read);
            // In a well-named registry the surviving set also satisfies the
            // naming convention.
            assert!(name_looks_readonly(&tool.definition.name));
        }
        assert!(scoped.len() < registry.all().len());
    }
}
