use agent_neo_model::{ModelMessage, ModelRequest, ModelTool, ToolCallRequest};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::OllamaConfig;

// --------------------
// Shared message types
// --------------------

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionCall {
    pub name: String,
    #[serde(default)]
    pub arguments: Value,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCall {
    pub function: FunctionCall,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: String,
    #[serde(default)]
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
}

// ------------------------
// Types sent to the server
// ------------------------

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
struct FunctionTool {
    name: String,
    description: String,
    parameters: Value,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
struct Tool {
    r#type: &'static str,
    function: FunctionTool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ChatRequest {
    model: String,
    messages: Vec<Message>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<Tool>,
    stream: bool,
}

// ------------------------------
// Types received from the server
// ------------------------------

/// One object of a `/api/chat` response. A streamed response is a
/// sequence of these, the last one having `done` set.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct ChatResponse {
    pub message: Option<Message>,
    #[serde(default)]
    pub done: bool,
    pub done_reason: Option<String>,
    pub error: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct TagsResponse {
    #[serde(default)]
    pub models: Vec<ModelTag>,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct ModelTag {
    pub name: String,
}

// -----------
// Conversions
// -----------

pub fn create_request(req: &ModelRequest, config: &OllamaConfig) -> ChatRequest {
    ChatRequest {
        model: config.model.clone(),
        messages: req.messages.iter().map(create_message).collect(),
        tools: req.tools.iter().map(create_tool).collect(),
        stream: req.stream,
    }
}

fn create_message(msg: &ModelMessage) -> Message {
    let (role, content, tool_calls) = match msg {
        ModelMessage::System(content) => ("system", content.clone(), vec![]),
        ModelMessage::User(content) => ("user", content.clone(), vec![]),
        ModelMessage::Assistant(content) => {
            ("assistant", content.clone(), vec![])
        }
        ModelMessage::ToolCalls(calls) => (
            "assistant",
            calls.content.clone(),
            calls
                .calls
                .iter()
                .map(|call| ToolCall {
                    function: FunctionCall {
                        name: call.name.clone(),
                        arguments: call.arguments.clone(),
                    },
                })
                .collect(),
        ),
        ModelMessage::Tool(result) => ("tool", result.content.clone(), vec![]),
    };
    Message {
        role: role.to_owned(),
        content,
        tool_calls,
    }
}

fn create_tool(tool: &ModelTool) -> Tool {
    Tool {
        r#type: "function",
        function: FunctionTool {
            name: tool.name.clone(),
            description: tool.description.clone(),
            parameters: tool.parameters.clone(),
        },
    }
}

/// Converts a tool call into a request. The gateway doesn't identify tool
/// calls, so ids are derived from the position within the response.
pub fn convert_tool_call(
    tool_call: ToolCall,
    idx: usize,
) -> Result<ToolCallRequest, String> {
    let FunctionCall { name, arguments } = tool_call.function;
    if name.is_empty() {
        return Err(format!("tool call {idx} has no name"));
    }
    let arguments = match arguments {
        Value::Null => Value::Object(Default::default()),
        value @ Value::Object(_) => value,
        // Some gateways still encode the arguments as a string.
        Value::String(s) if s.trim().is_empty() => {
            Value::Object(Default::default())
        }
        Value::String(s) => match serde_json::from_str::<Value>(&s) {
            Ok(value @ Value::Object(_)) => value,
            _ => return Err(format!("malformed tool arguments: {s}")),
        },
        other => return Err(format!("tool arguments are not an object: {other}")),
    };
    Ok(ToolCallRequest {
        id: format!("call_{idx}"),
        name,
        arguments,
    })
}

#[cfg(test)]
mod tests {
    use agent_neo_model::{AssistantToolCalls, ToolCallResult};
    use serde_json::json;

    use super::*;
    use crate::OllamaConfigBuilder;

    #[test]
    fn test_request_body() {
        let req = ModelRequest {
            messages: vec![
                ModelMessage::System("Be concise.".to_owned()),
                ModelMessage::User("Weather in Paris?".to_owned()),
                ModelMessage::ToolCalls(AssistantToolCalls {
                    content: String::new(),
                    calls: vec![ToolCallRequest {
                        id: "call_0".to_owned(),
                        name: "get_weather".to_owned(),
                        arguments: json!({ "location": "Paris" }),
                    }],
                }),
                ModelMessage::Tool(ToolCallResult {
                    id: "call_0".to_owned(),
                    content: "Paris: Clear, 18°C (feels like 17°C)".to_owned(),
                }),
            ],
            tools: vec![],
            stream: false,
        };
        let config = OllamaConfigBuilder::new().build();
        let body = serde_json::to_value(create_request(&req, &config)).unwrap();
        assert_eq!(
            body,
            json!({
                "model": "hailo-llm",
                "messages": [
                    { "role": "system", "content": "Be concise." },
                    { "role": "user", "content": "Weather in Paris?" },
                    {
                        "role": "assistant",
                        "content": "",
                        "tool_calls": [{
                            "function": {
                                "name": "get_weather",
                                "arguments": { "location": "Paris" }
                            }
                        }]
                    },
                    {
                        "role": "tool",
                        "content": "Paris: Clear, 18°C (feels like 17°C)"
                    }
                ],
                "stream": false
            })
        );
    }

    #[test]
    fn test_tools_are_sent_verbatim() {
        let mut req = ModelRequest::with_messages(Vec::<ModelMessage>::new());
        req.tools.push(ModelTool {
            name: "get_current_time".to_owned(),
            description: "Get the current local time.".to_owned(),
            parameters: json!({ "type": "object", "properties": {} }),
        });
        let config = OllamaConfigBuilder::new().build();
        let body = serde_json::to_value(create_request(&req, &config)).unwrap();
        assert_eq!(
            body["tools"],
            json!([{
                "type": "function",
                "function": {
                    "name": "get_current_time",
                    "description": "Get the current local time.",
                    "parameters": { "type": "object", "properties": {} }
                }
            }])
        );
        assert_eq!(body["stream"], json!(true));
    }

    #[test]
    fn test_convert_tool_call() {
        let call = |arguments| ToolCall {
            function: FunctionCall {
                name: "get_weather".to_owned(),
                arguments,
            },
        };
        assert_eq!(
            convert_tool_call(call(json!({ "location": "Oslo" })), 2).unwrap(),
            ToolCallRequest {
                id: "call_2".to_owned(),
                name: "get_weather".to_owned(),
                arguments: json!({ "location": "Oslo" }),
            }
        );
        assert_eq!(
            convert_tool_call(call(json!("{\"location\":\"Oslo\"}")), 0)
                .unwrap()
                .arguments,
            json!({ "location": "Oslo" })
        );
        assert_eq!(
            convert_tool_call(call(Value::Null), 0).unwrap().arguments,
            json!({})
        );
        assert!(convert_tool_call(call(json!([1])), 0).is_err());
        assert!(convert_tool_call(call(json!("{oops")), 0).is_err());
    }
}
