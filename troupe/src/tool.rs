//! Tool traits and the per-agent tool set.
//!
//! Tools are the primary way agents act on the world. The typed [`Tool`]
//! trait is what users implement; the object-safe [`DynTool`] is what the
//! engine stores and dispatches. [`FunctionTool`] builds a `DynTool` from
//! closures for ad-hoc tools.
//!
//! Each descriptor carries a human-readable description, an
//! [`InputSchema`] (semantic contract plus model-ready JSON-Schema), an
//! enablement predicate evaluated per run, an optional approval policy,
//! and optional metadata.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::callback::RunContext;
use crate::error::{Error, Result, ToolError};
use crate::schema::InputSchema;

/// A tool descriptor in model-ready form: `{name, description, schema}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// Name of the tool (snake_case).
    pub name: String,
    /// Description of what the tool does.
    pub description: String,
    /// JSON-Schema for the tool's parameters.
    pub parameters: Value,
}

impl ToolDefinition {
    /// Create a new tool definition.
    #[must_use]
    pub fn new(name: impl Into<String>, description: impl Into<String>, parameters: Value) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
        }
    }

    /// Returns the tool name.
    #[inline]
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Optional descriptive metadata on a tool.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolMetadata {
    /// Severity class of the tool's effects (e.g. "destructive").
    #[serde(skip_serializing_if = "Option::is_none")]
    pub severity: Option<String>,
    /// Free-form category.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    /// Role the calling context must hold.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub required_role: Option<String>,
}

/// The core trait for typed tools.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Static name of the tool.
    const NAME: &'static str;

    /// Arguments type for the tool.
    type Args: DeserializeOwned + schemars::JsonSchema + Send + 'static;

    /// Output type of the tool.
    type Output: Serialize + Send;

    /// Get the name of the tool.
    fn name(&self) -> &'static str {
        Self::NAME
    }

    /// Get the description of the tool.
    fn description(&self) -> String;

    /// Get the input schema. Defaults to the schema derived from
    /// [`Args`](Self::Args).
    fn input_schema(&self) -> InputSchema {
        InputSchema::typed::<Self::Args>()
    }

    /// Get the tool's metadata.
    fn metadata(&self) -> ToolMetadata {
        ToolMetadata::default()
    }

    /// Whether the tool is enabled for this run. Evaluated once per step
    /// when the tool set is built.
    async fn is_enabled(&self, _context: &RunContext) -> bool {
        true
    }

    /// Whether this specific call requires a recorded approval before it
    /// may execute.
    async fn needs_approval(&self, _context: &RunContext, _args: &Value, _call_id: &str) -> bool {
        false
    }

    /// Execute the tool with validated, typed arguments.
    async fn call(&self, args: Self::Args, context: &RunContext) -> Result<Self::Output, ToolError>;
}

/// Object-safe version of the [`Tool`] trait for dynamic dispatch.
#[async_trait]
pub trait DynTool: Send + Sync {
    /// Get the name of the tool.
    fn name(&self) -> &str;

    /// Get the description of the tool.
    fn description(&self) -> String;

    /// Get the input schema.
    fn input_schema(&self) -> InputSchema;

    /// Get the tool's metadata.
    fn metadata(&self) -> ToolMetadata {
        ToolMetadata::default()
    }

    /// Get the model-ready tool definition.
    fn definition(&self) -> ToolDefinition {
        ToolDefinition::new(
            self.name(),
            self.description(),
            self.input_schema().as_json_schema().clone(),
        )
    }

    /// Whether the tool is enabled for this run.
    async fn is_enabled(&self, context: &RunContext) -> bool;

    /// Whether this call requires a recorded approval.
    async fn needs_approval(&self, context: &RunContext, args: &Value, call_id: &str) -> bool;

    /// Call the tool with JSON arguments.
    async fn call_json(&self, args: Value, context: &RunContext) -> Result<Value, ToolError>;
}

#[async_trait]
impl<T: Tool + 'static> DynTool for T
where
    T::Output: 'static,
{
    fn name(&self) -> &str {
        Tool::name(self)
    }

    fn description(&self) -> String {
        Tool::description(self)
    }

    fn input_schema(&self) -> InputSchema {
        Tool::input_schema(self)
    }

    fn metadata(&self) -> ToolMetadata {
        Tool::metadata(self)
    }

    async fn is_enabled(&self, context: &RunContext) -> bool {
        Tool::is_enabled(self, context).await
    }

    async fn needs_approval(&self, context: &RunContext, args: &Value, call_id: &str) -> bool {
        Tool::needs_approval(self, context, args, call_id).await
    }

    async fn call_json(&self, args: Value, context: &RunContext) -> Result<Value, ToolError> {
        // Some providers hand arguments back as a JSON-encoded string.
        let typed: T::Args = match &args {
            Value::String(s) => {
                serde_json::from_str(s).map_err(|e| ToolError::InvalidArguments(e.to_string()))?
            }
            _ => serde_json::from_value(args)
                .map_err(|e| ToolError::InvalidArguments(e.to_string()))?,
        };
        let output = self.call(typed, context).await?;
        serde_json::to_value(output).map_err(|e| ToolError::Execution(e.to_string()))
    }
}

/// A shared dynamic tool.
pub type SharedTool = Arc<dyn DynTool>;

type ExecuteFuture = Pin<Box<dyn Future<Output = Result<Value, ToolError>> + Send>>;
type ExecuteFn = dyn Fn(Value, RunContext) -> ExecuteFuture + Send + Sync;
type EnabledFn = dyn Fn(&RunContext) -> bool + Send + Sync;
type ApprovalFn = dyn Fn(&RunContext, &Value, &str) -> bool + Send + Sync;

/// Enablement of a tool: a literal flag or a predicate of the run context.
#[derive(Clone)]
pub enum Enabled {
    /// The tool is always in (or out of) the tool set.
    Static(bool),
    /// Evaluated against the run context when the tool set is built.
    Dynamic(Arc<EnabledFn>),
}

impl Enabled {
    fn evaluate(&self, context: &RunContext) -> bool {
        match self {
            Self::Static(enabled) => *enabled,
            Self::Dynamic(predicate) => predicate(context),
        }
    }
}

impl fmt::Debug for Enabled {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Static(enabled) => f.debug_tuple("Static").field(enabled).finish(),
            Self::Dynamic(_) => f.write_str("Dynamic(..)"),
        }
    }
}

/// A tool assembled from closures.
///
/// ```rust,ignore
/// let add = FunctionTool::builder("add")
///     .description("Add two numbers.")
///     .schema(InputSchema::typed::<AddArgs>())
///     .execute(|args, _ctx| async move {
///         let args: AddArgs = serde_json::from_value(args)
///             .map_err(|e| ToolError::InvalidArguments(e.to_string()))?;
///         Ok(serde_json::json!({"result": args.a + args.b}))
///     })
///     .build();
/// ```
pub struct FunctionTool {
    name: String,
    description: String,
    schema: InputSchema,
    metadata: ToolMetadata,
    enabled: Enabled,
    approval: Option<Arc<ApprovalFn>>,
    execute: Arc<ExecuteFn>,
}

impl FunctionTool {
    /// Create a new builder for a function tool.
    #[must_use]
    pub fn builder(name: impl Into<String>) -> FunctionToolBuilder {
        FunctionToolBuilder::new(name)
    }
}

impl fmt::Debug for FunctionTool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FunctionTool")
            .field("name", &self.name)
            .field("enabled", &self.enabled)
            .field("has_approval_policy", &self.approval.is_some())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl DynTool for FunctionTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> String {
        self.description.clone()
    }

    fn input_schema(&self) -> InputSchema {
        self.schema.clone()
    }

    fn metadata(&self) -> ToolMetadata {
        self.metadata.clone()
    }

    async fn is_enabled(&self, context: &RunContext) -> bool {
        self.enabled.evaluate(context)
    }

    async fn needs_approval(&self, context: &RunContext, args: &Value, call_id: &str) -> bool {
        self.approval
            .as_ref()
            .is_some_and(|policy| policy(context, args, call_id))
    }

    async fn call_json(&self, args: Value, context: &RunContext) -> Result<Value, ToolError> {
        (self.execute)(args, context.clone()).await
    }
}

/// Builder for [`FunctionTool`].
pub struct FunctionToolBuilder {
    name: String,
    description: String,
    schema: InputSchema,
    metadata: ToolMetadata,
    enabled: Enabled,
    approval: Option<Arc<ApprovalFn>>,
    execute: Option<Arc<ExecuteFn>>,
}

impl FunctionToolBuilder {
    fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            schema: InputSchema::json(serde_json::json!({"type": "object"})),
            metadata: ToolMetadata::default(),
            enabled: Enabled::Static(true),
            approval: None,
            execute: None,
        }
    }

    /// Set the description shown to the model.
    #[must_use]
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Set the input schema.
    #[must_use]
    pub fn schema(mut self, schema: InputSchema) -> Self {
        self.schema = schema;
        self
    }

    /// Set the tool metadata.
    #[must_use]
    pub fn metadata(mut self, metadata: ToolMetadata) -> Self {
        self.metadata = metadata;
        self
    }

    /// Statically enable or disable the tool.
    #[must_use]
    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = Enabled::Static(enabled);
        self
    }

    /// Enable the tool via a predicate of the run context.
    #[must_use]
    pub fn enabled_when(
        mut self,
        predicate: impl Fn(&RunContext) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.enabled = Enabled::Dynamic(Arc::new(predicate));
        self
    }

    /// Gate calls behind a recorded approval when the policy returns true.
    #[must_use]
    pub fn needs_approval_when(
        mut self,
        policy: impl Fn(&RunContext, &Value, &str) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.approval = Some(Arc::new(policy));
        self
    }

    /// Set the execute function.
    #[must_use]
    pub fn execute<F, Fut>(mut self, execute: F) -> Self
    where
        F: Fn(Value, RunContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, ToolError>> + Send + 'static,
    {
        self.execute = Some(Arc::new(move |args, ctx| Box::pin(execute(args, ctx))));
        self
    }

    /// Build the tool.
    ///
    /// # Panics
    ///
    /// Panics if no execute function was provided. Use
    /// [`try_build`](Self::try_build) for a fallible alternative.
    #[must_use]
    pub fn build(self) -> FunctionTool {
        self.try_build().expect("execute function is required")
    }

    /// Try to build the tool.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] when no execute function was set.
    pub fn try_build(self) -> Result<FunctionTool> {
        let execute = self.execute.ok_or_else(|| {
            Error::configuration(format!(
                "tool '{}' has no execute function",
                self.name
            ))
        })?;
        Ok(FunctionTool {
            name: self.name,
            description: self.description,
            schema: self.schema,
            metadata: self.metadata,
            enabled: self.enabled,
            approval: self.approval,
            execute,
        })
    }
}

impl fmt::Debug for FunctionToolBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FunctionToolBuilder")
            .field("name", &self.name)
            .field("has_execute", &self.execute.is_some())
            .finish_non_exhaustive()
    }
}

/// The resolved tool set for one step: name-unique, in insertion order.
#[derive(Default, Clone)]
pub struct ToolSet {
    tools: Vec<SharedTool>,
}

impl ToolSet {
    /// Create an empty tool set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a tool, replacing any existing tool with the same name.
    pub fn insert(&mut self, tool: SharedTool) {
        if let Some(existing) = self.tools.iter_mut().find(|t| t.name() == tool.name()) {
            *existing = tool;
        } else {
            self.tools.push(tool);
        }
    }

    /// Get a tool by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&SharedTool> {
        self.tools.iter().find(|t| t.name() == name)
    }

    /// Check if the set contains a tool with the given name.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Model-ready definitions for all tools, in order.
    #[must_use]
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools.iter().map(|t| t.definition()).collect()
    }

    /// Names of all tools, in order.
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        self.tools.iter().map(|t| t.name()).collect()
    }

    /// Number of tools in the set.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Check if the set is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Iterate over the tools in order.
    pub fn iter(&self) -> impl Iterator<Item = &SharedTool> {
        self.tools.iter()
    }
}

impl fmt::Debug for ToolSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolSet")
            .field("tools", &self.names())
            .finish()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Debug, Deserialize, serde::Serialize, schemars::JsonSchema)]
    struct EchoArgs {
        message: String,
    }

    /// A simple echo tool for testing.
    #[derive(Debug, Clone, Copy, Default)]
    struct EchoTool;

    #[async_trait]
    impl Tool for EchoTool {
        const NAME: &'static str = "echo";
        type Args = EchoArgs;
        type Output = String;

        fn description(&self) -> String {
            "Echoes back the input message.".to_owned()
        }

        async fn call(
            &self,
            args: Self::Args,
            _context: &RunContext,
        ) -> Result<Self::Output, ToolError> {
            Ok(args.message)
        }
    }

    mod typed_tool {
        use super::*;

        #[tokio::test]
        async fn call_json_round_trips() {
            let tool: SharedTool = Arc::new(EchoTool);
            let ctx = RunContext::default();
            let result = tool
                .call_json(json!({"message": "hello"}), &ctx)
                .await
                .unwrap();
            assert_eq!(result, json!("hello"));
        }

        #[tokio::test]
        async fn call_json_accepts_stringified_args() {
            let tool: SharedTool = Arc::new(EchoTool);
            let ctx = RunContext::default();
            let result = tool
                .call_json(json!(r#"{"message": "hi"}"#), &ctx)
                .await
                .unwrap();
            assert_eq!(result, json!("hi"));
        }

        #[tokio::test]
        async fn call_json_rejects_bad_args() {
            let tool: SharedTool = Arc::new(EchoTool);
            let ctx = RunContext::default();
            let err = tool.call_json(json!({"nope": 1}), &ctx).await.unwrap_err();
            assert!(matches!(err, ToolError::InvalidArguments(_)));
        }

        #[test]
        fn definition_carries_schema() {
            let def = DynTool::definition(&EchoTool);
            assert_eq!(def.name, "echo");
            assert!(def.parameters.get("properties").is_some());
        }

        #[tokio::test]
        async fn default_predicates() {
            let ctx = RunContext::default();
            assert!(DynTool::is_enabled(&EchoTool, &ctx).await);
            assert!(!DynTool::needs_approval(&EchoTool, &ctx, &json!({}), "c1").await);
        }
    }

    mod function_tool {
        use super::*;

        fn add_tool() -> FunctionTool {
            FunctionTool::builder("add")
                .description("Add two numbers.")
                .schema(InputSchema::json(json!({
                    "type": "object",
                    "properties": {"a": {"type": "number"}, "b": {"type": "number"}},
                    "required": ["a", "b"]
                })))
                .execute(|args, _ctx| async move {
                    let a = args["a"].as_f64().unwrap_or_default();
                    let b = args["b"].as_f64().unwrap_or_default();
                    Ok(json!({"result": a + b}))
                })
                .build()
        }

        #[tokio::test]
        async fn executes_closure() {
            let tool = add_tool();
            let ctx = RunContext::default();
            let result = tool.call_json(json!({"a": 2, "b": 3}), &ctx).await.unwrap();
            assert_eq!(result, json!({"result": 5.0}));
        }

        #[tokio::test]
        async fn dynamic_enablement() {
            let tool = FunctionTool::builder("admin_only")
                .enabled_when(|ctx| ctx.context()["role"] == "admin")
                .execute(|_, _| async { Ok(Value::Null) })
                .build();

            let admin = RunContext::new(json!({"role": "admin"}));
            let guest = RunContext::new(json!({"role": "guest"}));
            assert!(tool.is_enabled(&admin).await);
            assert!(!tool.is_enabled(&guest).await);
        }

        #[tokio::test]
        async fn approval_policy_sees_arguments() {
            let tool = FunctionTool::builder("delete")
                .needs_approval_when(|_ctx, args, _id| {
                    args["path"]
                        .as_str()
                        .is_some_and(|p| p.starts_with("/system/"))
                })
                .execute(|_, _| async { Ok(json!({"deleted": true})) })
                .build();

            let ctx = RunContext::default();
            assert!(
                tool.needs_approval(&ctx, &json!({"path": "/system/x"}), "c1")
                    .await
            );
            assert!(
                !tool
                    .needs_approval(&ctx, &json!({"path": "/tmp/x"}), "c2")
                    .await
            );
        }

        #[test]
        fn try_build_requires_execute() {
            let err = FunctionTool::builder("noop").try_build();
            assert!(err.is_err());
        }
    }

    mod tool_set {
        use super::*;

        #[test]
        fn insert_is_name_unique_and_ordered() {
            let mut set = ToolSet::new();
            set.insert(Arc::new(EchoTool));
            set.insert(Arc::new(
                FunctionTool::builder("add")
                    .execute(|_, _| async { Ok(Value::Null) })
                    .build(),
            ));
            assert_eq!(set.names(), vec!["echo", "add"]);

            // Re-inserting a name replaces in place, preserving order.
            set.insert(Arc::new(
                FunctionTool::builder("echo")
                    .description("replacement")
                    .execute(|_, _| async { Ok(Value::Null) })
                    .build(),
            ));
            assert_eq!(set.len(), 2);
            assert_eq!(set.names(), vec!["echo", "add"]);
            assert_eq!(set.get("echo").unwrap().description(), "replacement");
        }

        #[test]
        fn definitions_follow_order() {
            let mut set = ToolSet::new();
            set.insert(Arc::new(EchoTool));
            let defs = set.definitions();
            assert_eq!(defs.len(), 1);
            assert_eq!(defs[0].name(), "echo");
        }
    }
}
