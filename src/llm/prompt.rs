//! System prompt composition shared by the model variants

use crate::core::ToolDefinition;
use crate::output::OutputSchema;

/// Instructions used when the agent is configured without a system prompt
pub const DEFAULT_INSTRUCTIONS: &str = "You are a helpful assistant. Answer the user's query \
accurately and use the available tools whenever they help.";

/// Join caller instructions, the tool section and output format guidance
pub fn compose(
    instructions: Option<&str>,
    tool_section: Option<String>,
    output: Option<&OutputSchema>,
) -> String {
    let mut sections = vec![instructions
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .unwrap_or(DEFAULT_INSTRUCTIONS)
        .to_string()];

    if let Some(tools) = tool_section {
        sections.push(tools);
    }
    if let Some(schema) = output {
        sections.push(schema.describe());
    }

    sections.join("\n\n")
}

/// Short tool listing for models that receive the schemas out of band
pub fn native_tool_section(tools: &[ToolDefinition]) -> Option<String> {
    if tools.is_empty() {
        return None;
    }
    let mut section = String::from("## Tools\n\nCall these tools through function calling:\n");
    for tool in tools {
        section.push_str(&format!("- `{}`: {}\n", tool.name, tool.description));
    }
    Some(section)
}

/// Full tool descriptions plus the call envelope for prompted tool use
pub fn manual_tool_section(tools: &[ToolDefinition]) -> Option<String> {
    if tools.is_empty() {
        return None;
    }
    let mut section = String::from(
        "## Tools\n\nYou can call the following tools. Each takes a JSON object of \
         arguments matching its schema.\n",
    );
    for tool in tools {
        section.push_str(&format!(
            "\n### {}\n{}\nArguments schema: {}\n",
            tool.name, tool.description, tool.parameters
        ));
    }
    section.push_str(
        "\nTo call tools, reply with only this JSON object and nothing else:\n\
         {\"tool_calls\": [{\"name\": \"<tool name>\", \"arguments\": {<arguments>}}]}\n\
         You may list several calls in one reply. Their results arrive in the next \
         message. When you have the final answer, reply with it directly and do not \
         include a tool_calls object.\n",
    );
    Some(section)
}
