//! System prompt assembly

use chrono::{DateTime, Local};

use engage_provider::{Message, ToolCallDef};

use crate::loop_agent::AgentSettings;

/// Builds the system prompt and message list for a run
#[derive(Debug, Clone)]
pub struct ContextBuilder {
    description: String,
    instructions: Vec<String>,
    markdown: bool,
    add_datetime: bool,
    additional_context: String,
}

impl ContextBuilder {
    pub fn new(settings: &AgentSettings) -> Self {
        Self {
            description: settings.description.clone(),
            instructions: settings.instructions.clone(),
            markdown: settings.markdown,
            add_datetime: settings.add_datetime_to_instructions,
            additional_context: settings.additional_context.clone(),
        }
    }

    pub fn build_system_prompt(&self) -> String {
        self.build_system_prompt_at(Local::now())
    }

    /// Prompt as of `now`; empty sections are left out
    pub fn build_system_prompt_at(&self, now: DateTime<Local>) -> String {
        let mut sections = Vec::new();

        if !self.description.trim().is_empty() {
            sections.push(self.description.trim().to_string());
        }

        let instructions: Vec<&str> = self
            .instructions
            .iter()
            .map(|i| i.trim())
            .filter(|i| !i.is_empty())
            .collect();
        if !instructions.is_empty() {
            let lines: Vec<String> = instructions.iter().map(|i| format!("- {}", i)).collect();
            sections.push(format!("<instructions>\n{}\n</instructions>", lines.join("\n")));
        }

        let mut notes = Vec::new();
        if self.markdown {
            notes.push("- Use markdown to format your answers.".to_string());
        }
        if self.add_datetime {
            notes.push(format!(
                "- The current time is {}.",
                now.format("%Y-%m-%d %H:%M:%S %Z (%A)")
            ));
        }
        if !notes.is_empty() {
            sections.push(format!(
                "<additional_information>\n{}\n</additional_information>",
                notes.join("\n")
            ));
        }

        if !self.additional_context.trim().is_empty() {
            sections.push(self.additional_context.trim().to_string());
        }

        sections.join("\n\n")
    }

    /// System prompt followed by the user prompt
    pub fn build_messages(&self, prompt: &str) -> Vec<Message> {
        let system = self.build_system_prompt();
        let mut messages = Vec::with_capacity(2);
        if !system.is_empty() {
            messages.push(Message::system(system));
        }
        messages.push(Message::user(prompt));
        messages
    }

    pub fn add_tool_result(
        messages: &mut Vec<Message>,
        tool_call_id: &str,
        name: &str,
        result: &str,
    ) {
        messages.push(Message::tool(tool_call_id, name, result));
    }

    pub fn add_assistant_message(
        messages: &mut Vec<Message>,
        content: Option<&str>,
        tool_calls: Vec<ToolCallDef>,
    ) {
        messages.push(Message::assistant_tool_calls(content, tool_calls));
    }
}
