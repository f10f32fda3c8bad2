//! Agent tools.
//!
//! A [`Tool`] is a named, schema-described operation that agents can call.
//! The same [`ToolRegistry`] backs `GET /tools/list` / `POST /tools/{name}`
//! on the HTTP server and `tools/list` / `tools/call` on the MCP server, so
//! both surfaces always expose the same tool set.
//!
//! # Built-in Tools
//!
//! | Tool | Description |
//! |------|-------------|
//! | `search_documents` | Semantic search over ingested documents |
//!
//! # Example
//!
//! ```rust
//! use async_trait::async_trait;
//! use serde_json::{json, Value};
//! use vero::error::Result;
//! use vero::tools::{Tool, ToolContext};
//!
//! pub struct PingTool;
//!
//! #[async_trait]
//! impl Tool for PingTool {
//!     fn name(&self) -> &str { "ping" }
//!     fn description(&self) -> &str { "Check the server is alive" }
//!
//!     fn parameters_schema(&self) -> Value {
//!         json!({ "type": "object", "properties": {}, "required": [] })
//!     }
//!
//!     async fn execute(&self, _params: Value, _ctx: &ToolContext) -> Result<Value> {
//!         Ok(json!("pong"))
//!     }
//! }
//! ```

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;

use crate::error::{IngestError, Result};
use crate::models::ChunkResult;
use crate::retrieval::Retriever;

#[async_trait]
pub trait Tool: Send + Sync {
    /// Lowercase identifier with underscores; also the route segment in
    /// `POST /tools/{name}`.
    fn name(&self) -> &str;

    /// One-line description for agent discovery.
    fn description(&self) -> &str;

    /// JSON Schema (`type: "object"`) for the parameters.
    fn parameters_schema(&self) -> Value;

    /// Run the tool. `params` is always a JSON object.
    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<Value>;
}

/// What a tool can reach while executing.
#[derive(Clone)]
pub struct ToolContext {
    retriever: Arc<Retriever>,
}

impl ToolContext {
    pub fn new(retriever: Arc<Retriever>) -> Self {
        Self { retriever }
    }

    pub fn retriever(&self) -> &Retriever {
        &self.retriever
    }
}

/// Tool metadata as listed by `GET /tools/list`.
#[derive(Debug, Serialize)]
pub struct ToolInfo {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

impl ToolInfo {
    pub fn of(tool: &dyn Tool) -> Self {
        Self {
            name: tool.name().to_string(),
            description: tool.description().to_string(),
            parameters: tool.parameters_schema(),
        }
    }
}

// ============ search_documents ============

/// Semantic search over ingested documents.
pub struct SearchDocumentsTool;

const DEFAULT_N_RESULTS: i64 = 3;

#[async_trait]
impl Tool for SearchDocumentsTool {
    fn name(&self) -> &str {
        "search_documents"
    }

    fn description(&self) -> &str {
        "Search for related information from internal documents"
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "query": { "type": "string", "description": "The search query to find relevant documents" },
                "n_results": { "type": "integer", "description": "Number of results to return", "default": DEFAULT_N_RESULTS, "minimum": 1 }
            },
            "required": ["query"]
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<Value> {
        let query = params
            .get("query")
            .and_then(Value::as_str)
            .ok_or_else(|| IngestError::InvalidArgument("query must be a string".to_string()))?;

        let n_results = match params.get("n_results") {
            None | Some(Value::Null) => DEFAULT_N_RESULTS,
            Some(v) => v.as_i64().ok_or_else(|| {
                IngestError::InvalidArgument("n_results must be an integer".to_string())
            })?,
        };

        let hits = ctx.retriever().search(query, n_results).await?;
        let results: Vec<ChunkResult> = hits.into_iter().map(ChunkResult::from).collect();
        serde_json::to_value(results).map_err(|e| IngestError::Storage(e.to_string()))
    }
}

// ============ Registry ============

/// Ordered collection of tools, looked up by name.
#[derive(Default)]
pub struct ToolRegistry {
    tools: Vec<Box<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding every built-in tool.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(Box::new(SearchDocumentsTool));
        registry
    }

    /// Register a tool. [`find`](Self::find) returns the first tool
    /// registered under a name.
    pub fn register(&mut self, tool: Box<dyn Tool>) {
        self.tools.push(tool);
    }

    pub fn tools(&self) -> &[Box<dyn Tool>] {
        &self.tools
    }

    pub fn find(&self, name: &str) -> Option<&dyn Tool> {
        self.tools
            .iter()
            .find(|t| t.name() == name)
            .map(|t| t.as_ref())
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}
