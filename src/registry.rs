//! Tool, resource and prompt registries.
//!
//! Each registry maps an operation name to its handler plus the metadata
//! served over the protocol surface. Registration order is preserved so
//! listings are deterministic.

use std::collections::HashMap;
use std::sync::Arc;

use futures::future::BoxFuture;
use serde_json::Value;

use crate::Result;
use crate::capability::{ToolAccess, lint_tool_name};
use crate::mcp::{Prompt, Resource, Tool};

/// Boxed async handler shared by all registry kinds.
pub type Handler = Arc<dyn Fn(Value) -> BoxFuture<'static, Result<Value>> + Send + Sync>;

/// A registered tool: protocol definition, declared access, handler.
#[derive(Clone)]
pub struct ToolDescriptor {
    /// Definition served by `tools/list`
    pub definition: Tool,
    /// Declared access classification; the runtime source of truth for
    /// role filtering
    pub access: ToolAccess,
    /// Invocation handler
    pub handler: Handler,
}

/// A registered resource: protocol definition plus read handler.
#[derive(Clone)]
pub struct ResourceDescriptor {
    /// Definition served by `resources/list`
    pub definition: Resource,
    /// Read handler; receives `{"uri": ...}`
    pub handler: Handler,
}

/// A registered prompt: protocol definition plus expansion handler.
#[derive(Clone)]
pub struct PromptDescriptor {
    /// Definition served by `prompts/list`
    pub definition: Prompt,
    /// Expansion handler; receives the prompt arguments
    pub handler: Handler,
}

/// Ordered, name-indexed collection of registered tools.
#[derive(Default, Clone)]
pub struct ToolRegistry {
    tools: Vec<ToolDescriptor>,
    index: HashMap<String, usize>,
}

impl ToolRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool under its definition name. A repeated name replaces
    /// the earlier registration in place.
    pub fn register(&mut self, definition: Tool, access: ToolAccess, handler: Handler) {
        lint_tool_name(&definition.name, access);
        let descriptor = ToolDescriptor {
            definition,
            access,
            handler,
        };
        let name = descriptor.definition.name.clone();
        if let Some(&slot) = self.index.get(&name) {
            self.tools[slot] = descriptor;
        } else {
            self.index.insert(name, self.tools.len());
            self.tools.push(descriptor);
        }
    }

    /// Look up a tool by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&ToolDescriptor> {
        self.index.get(name).map(|&slot| &self.tools[slot])
    }

    /// All registered tools in registration order.
    #[must_use]
    pub fn all(&self) -> Vec<ToolDescriptor> {
        self.tools.clone()
    }

    /// Number of registered tools.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// True when nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

/// Ordered, name-indexed collection of registered resources, keyed by URI.
#[derive(Default, Clone)]
pub struct ResourceRegistry {
    resources: Vec<ResourceDescriptor>,
    index: HashMap<String, usize>,
}

impl ResourceRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a resource under its URI.
    pub fn register(&mut self, definition: Resource, handler: Handler) {
        let descriptor = ResourceDescriptor {
            definition,
            handler,
        };
        let uri = descriptor.definition.uri.clone();
        if let Some(&slot) = self.index.get(&uri) {
            self.resources[slot] = descriptor;
        } else {
            self.index.insert(uri, self.resources.len());
            self.resources.push(descriptor);
        }
    }

    /// Look up a resource by URI.
    #[must_use]
    pub fn get(&self, uri: &str) -> Option<&ResourceDescriptor> {
        self.index.get(uri).map(|&slot| &self.resources[slot])
    }

    /// All registered resources in registration order.
    #[must_use]
    pub fn all(&self) -> Vec<ResourceDescriptor> {
        self.resources.clone()
    }
}

/// Ordered, name-indexed collection of registered prompts.
#[derive(Default, Clone)]
pub struct PromptRegistry {
    prompts: Vec<PromptDescriptor>,
    index: HashMap<String, usize>,
}

impl PromptRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a prompt under its definition name.
    pub fn register(&mut self, definition: Prompt, handler: Handler) {
        let descriptor = PromptDescriptor {
            definition,
            handler,
        };
        let name = descriptor.definition.name.clone();
        if let Some(&slot) = self.index.get(&name) {
            self.prompts[slot] = descriptor;
        } else {
            self.index.insert(name, self.prompts.len());
            self.prompts.push(descriptor);
        }
    }

    /// Look up a prompt by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&PromptDescriptor> {
        self.index.get(name).map(|&slot| &self.prompts[slot])
    }

    /// All registered prompts in registration order.
    #[must_use]
    pub fn all(&self) -> Vec<PromptDescriptor> {
        self.prompts.clone()
    }
}

/// Wrap a plain async closure into a [`Handler`].
pub fn handler<F, Fut>(f: F) -> Handler
where
    F: Fn(Value) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = Result<Value>> + Send + 'static,
{
    Arc::new(move |args| Box::pin(f(args)))
}
