use std::error::Error as StdError;
use std::fmt::{self, Display};
use std::sync::Arc;

use agent_neo_model::{ModelTool, ToolCallRequest};
use tokio::task::JoinHandle;
use tracing::Instrument;

use super::object::{AnyTool, ToolObject};
use super::{Tool, ToolResult};

/// A registered tool.
#[derive(Clone)]
pub struct ToolEntry {
    tool: Arc<dyn ToolObject>,
}

impl ToolEntry {
    /// Returns the name of the tool.
    #[inline]
    pub fn name(&self) -> &str {
        self.tool.name()
    }

    /// Returns the descriptor that is advertised to the model.
    #[inline]
    pub fn definition(&self) -> ModelTool {
        self.tool.definition()
    }
}

impl fmt::Debug for ToolEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolEntry")
            .field("name", &self.name())
            .finish_non_exhaustive()
    }
}

/// The requested tool is not registered.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NotFound {
    name: String,
}

impl NotFound {
    /// Returns the requested name.
    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Display for NotFound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Tool `{}` is not available.", self.name)
    }
}

impl StdError for NotFound {}

/// [`ToolRegistry`] builder.
#[derive(Default)]
pub struct ToolRegistryBuilder {
    tools: Vec<ToolEntry>,
}

impl ToolRegistryBuilder {
    /// Registers a tool. A tool with the same name as an already
    /// registered one replaces it, keeping its position.
    pub fn with_tool<T: Tool>(mut self, tool: T) -> Self {
        let entry = ToolEntry {
            tool: Arc::new(AnyTool(tool)),
        };
        match self.tools.iter_mut().find(|t| t.name() == entry.name()) {
            Some(existing) => {
                warn!("tool `{}` is registered twice", entry.name());
                *existing = entry;
            }
            None => self.tools.push(entry),
        }
        self
    }

    /// Builds the registry. No tools can be added afterwards.
    #[inline]
    pub fn build(self) -> ToolRegistry {
        ToolRegistry { tools: self.tools }
    }
}

/// An immutable set of tools, which handles tool call requests from the
/// model.
///
/// The registry can be shared by multiple agents with an [`Arc`].
#[derive(Clone, Debug, Default)]
pub struct ToolRegistry {
    tools: Vec<ToolEntry>,
}

impl ToolRegistry {
    /// Creates a builder.
    #[inline]
    pub fn builder() -> ToolRegistryBuilder {
        ToolRegistryBuilder::default()
    }

    /// Returns the number of registered tools.
    #[inline]
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Returns `true` if no tools are registered.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Looks up a tool by its name.
    pub fn resolve(&self, name: &str) -> Result<&ToolEntry, NotFound> {
        self.tools
            .iter()
            .find(|tool| tool.name() == name)
            .ok_or_else(|| NotFound {
                name: name.to_owned(),
            })
    }

    /// Returns the descriptors of all tools, in registration order.
    #[inline]
    pub fn describe(&self) -> Vec<ModelTool> {
        self.tools.iter().map(ToolEntry::definition).collect()
    }

    /// Runs a tool call request and returns the text for the model.
    ///
    /// This never fails. Unknown tools, invalid arguments, tool errors, and
    /// even panics are all turned into an explanation of what happened.
    ///
    /// # Cancel safety
    ///
    /// This method is cancel safe. The tool task is aborted when the
    /// returned future is dropped.
    pub fn invoke(
        &self,
        req: ToolCallRequest,
    ) -> impl Future<Output = String> + Send + 'static {
        let ToolCallRequest {
            id,
            name,
            arguments,
        } = req;
        let span = debug_span!("tool execute", %id, %name);
        let tool = self.resolve(&name).map(|entry| Arc::clone(&entry.tool));

        async move {
            let tool = match tool {
                Ok(tool) => tool,
                Err(err) => {
                    warn!("tool not found: {name}");
                    return err.to_string();
                }
            };
            trace!("spawning a tool ({id}) with args: {arguments:?}");
            let mut task = AbortOnDrop(tokio::spawn(tool.execute(arguments)));
            match (&mut task.0).await {
                Ok(result) => degrade(result),
                Err(err) if err.is_panic() => {
                    error!("tool `{name}` panicked");
                    format!("Tool `{name}` failed unexpectedly.")
                }
                Err(err) => {
                    warn!("tool `{name}` was cancelled: {err}");
                    format!("Tool `{name}` was cancelled.")
                }
            }
        }
        .instrument(span)
    }
}

fn degrade(result: ToolResult) -> String {
    match result {
        Ok(content) => content,
        Err(err) => {
            debug!("tool failed: {err:?}");
            err.reason().into_owned()
        }
    }
}

struct AbortOnDrop(JoinHandle<ToolResult>);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

#[cfg(test)]
mod tests {
    use std::future::ready;
    use std::time::Duration;

    use serde::Deserialize;
    use serde_json::{Value, json};

    use super::*;
    use crate::tool::Error;

    #[derive(Deserialize)]
    struct EchoInput {
        text: String,
    }

    struct EchoTool {
        name: &'static str,
        schema: Value,
    }

    impl EchoTool {
        fn new(name: &'static str) -> Self {
            Self {
                name,
                schema: json!({
                    "type": "object",
                    "properties": { "text": { "type": "string" } },
                    "required": ["text"]
                }),
            }
        }
    }

    impl Tool for EchoTool {
        type Input = EchoInput;

        fn name(&self) -> &str {
            self.name
        }

        fn description(&self) -> &str {
            "Echoes the text back."
        }

        fn parameter_schema(&self) -> &Value {
            &self.schema
        }

        fn execute(
            &self,
            input: Self::Input,
        ) -> impl Future<Output = ToolResult> + Send + 'static {
            ready(Ok(input.text))
        }
    }

    struct BrokenTool {
        panics: bool,
        schema: Value,
    }

    impl Tool for BrokenTool {
        type Input = Value;

        fn name(&self) -> &str {
            "broken"
        }

        fn description(&self) -> &str {
            "Always fails."
        }

        fn parameter_schema(&self) -> &Value {
            &self.schema
        }

        fn execute(
            &self,
            _input: Self::Input,
        ) -> impl Future<Output = ToolResult> + Send + 'static {
            let panics = self.panics;
            async move {
                tokio::time::sleep(Duration::from_millis(1)).await;
                if panics {
                    panic!("boom");
                }
                Err(Error::execution_error()
                    .with_reason("Upstream service is down."))
            }
        }
    }

    fn call(name: &str, arguments: Value) -> ToolCallRequest {
        ToolCallRequest {
            id: "call_0".to_owned(),
            name: name.to_owned(),
            arguments,
        }
    }

    #[test]
    fn test_registration_order() {
        let registry = ToolRegistry::builder()
            .with_tool(EchoTool::new("b"))
            .with_tool(EchoTool::new("a"))
            .with_tool(EchoTool::new("b"))
            .build();
        assert_eq!(registry.len(), 2);
        let names = registry
            .describe()
            .into_iter()
            .map(|tool| tool.name)
            .collect::<Vec<_>>();
        assert_eq!(names, ["b", "a"]);
        let definition = registry.resolve("a").unwrap().definition();
        assert_eq!(definition.description, "Echoes the text back.");
        assert_eq!(definition.parameters["required"], json!(["text"]));
        assert_eq!(registry.resolve("a").unwrap().name(), "a");
        assert_eq!(registry.resolve("c").unwrap_err().name(), "c");
    }

    #[tokio::test]
    async fn test_invoke() {
        let registry = ToolRegistry::builder()
            .with_tool(EchoTool::new("echo"))
            .build();
        assert_eq!(
            registry.invoke(call("echo", json!({ "text": "hi" }))).await,
            "hi"
        );
        assert_eq!(
            registry.invoke(call("shell", json!({}))).await,
            "Tool `shell` is not available."
        );
        let invalid = registry.invoke(call("echo", json!({ "txt": 1 }))).await;
        assert!(invalid.starts_with("Invalid input: "), "{invalid}");
    }

    #[tokio::test]
    async fn test_failures_are_contained() {
        let registry = ToolRegistry::builder()
            .with_tool(BrokenTool {
                panics: false,
                schema: json!({}),
            })
            .build();
        assert_eq!(
            registry.invoke(call("broken", json!({}))).await,
            "Upstream service is down."
        );

        let registry = ToolRegistry::builder()
            .with_tool(BrokenTool {
                panics: true,
                schema: json!({}),
            })
            .build();
        assert_eq!(
            registry.invoke(call("broken", json!({}))).await,
            "Tool `broken` failed unexpectedly."
        );
    }
}
