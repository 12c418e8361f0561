//! Slack notifications and incident channels (Web API)

use async_trait::async_trait;
use chrono::Utc;
use regex::Regex;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::{Arc, OnceLock};
use tracing::{info, warn};

use engage_config::SlackConfig;

use super::integration::{
    str_at, Integration, IntegrationAuth, IntegrationClient, IntegrationError,
};
use super::{parse_args, to_output, ToolError, ToolRegistry, ToolTrait};

pub struct SlackIntegration {
    client: IntegrationClient,
    security_channel: String,
    incident_channel_prefix: String,
    escalation_users: Vec<String>,
}

impl SlackIntegration {
    pub fn new(config: &SlackConfig) -> Self {
        Self {
            client: IntegrationClient::new(
                "slack",
                &config.api_base,
                IntegrationAuth::Bearer(config.bot_token.clone()),
            ),
            security_channel: config.security_channel().to_string(),
            incident_channel_prefix: config.incident_channel_prefix.clone(),
            escalation_users: config.escalation_users.clone(),
        }
    }

    pub fn escalation_users(&self) -> &[String] {
        &self.escalation_users
    }

    /// Slack answers 200 with `ok: false` on failure
    async fn call(&self, method: &str, body: Value) -> Result<Value, IntegrationError> {
        let response = self.client.post(method, &body).await?;
        if response["ok"].as_bool() != Some(true) {
            let error = str_at(&response, "/error");
            return Err(IntegrationError::Api(format!(
                "slack {} failed: {}",
                method,
                if error.is_empty() { "unknown error" } else { error }
            )));
        }
        Ok(response)
    }

    pub async fn post_message(
        &self,
        channel: Option<&str>,
        text: &str,
    ) -> Result<Value, IntegrationError> {
        let channel = channel.unwrap_or(&self.security_channel);
        let sent = self
            .call("chat.postMessage", json!({ "channel": channel, "text": text }))
            .await?;
        Ok(json!({
            "ok": true,
            "channel": str_at(&sent, "/channel"),
            "ts": str_at(&sent, "/ts"),
        }))
    }

    pub async fn create_incident_channel(
        &self,
        incident_id: &str,
        initial_message: &str,
        team_members: &[String],
        is_private: bool,
    ) -> Result<Value, IntegrationError> {
        let name = incident_channel_name(&self.incident_channel_prefix, incident_id);
        let created = self
            .call(
                "conversations.create",
                json!({ "name": name, "is_private": is_private }),
            )
            .await?;
        let channel_id = str_at(&created, "/channel/id").to_string();
        info!("Created Slack channel #{} ({})", name, channel_id);

        self.post_message(Some(&channel_id), initial_message).await?;

        let mut result = json!({
            "ok": true,
            "channel_id": channel_id,
            "channel_name": name,
            "incident_id": incident_id,
            "team_members": team_members,
            "created": Utc::now().to_rfc3339(),
        });

        if !team_members.is_empty() {
            let invite = self
                .call(
                    "conversations.invite",
                    json!({ "channel": channel_id, "users": team_members.join(",") }),
                )
                .await;
            if let Err(e) = invite {
                warn!("Could not invite members to #{}: {}", name, e);
                result["invite_warning"] = json!(format!("Could not invite some users: {}", e));
            }
        }

        Ok(result)
    }
}

#[async_trait]
impl Integration for SlackIntegration {
    fn name(&self) -> &str {
        "slack"
    }

    async fn test_connection(&self) -> Result<(), IntegrationError> {
        self.call("auth.test", json!({})).await.map(|_| ())
    }
}

fn channel_name_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[^a-z0-9_-]+").expect("static regex"))
}

/// `<prefix><id>`, lowercased, limited to Slack's channel-name charset
pub fn incident_channel_name(prefix: &str, incident_id: &str) -> String {
    let name = format!("{}{}", prefix.trim(), incident_id.trim()).to_lowercase();
    let name = channel_name_re().replace_all(&name, "-");
    name.trim_matches('-').chars().take(80).collect()
}

fn is_urgent(level: &str) -> bool {
    matches!(level, "high" | "critical")
}

/// Who to mention on a human-input request: the caller's list, or the
/// configured escalation users when the request is urgent
pub fn escalation_targets(
    urgency: &str,
    requested: &[String],
    configured: &[String],
) -> Vec<String> {
    if requested.is_empty() && is_urgent(urgency) {
        configured.to_vec()
    } else {
        requested.to_vec()
    }
}

/// Escalation users are paged on high and critical alerts only
pub fn alert_mentions<'a>(severity: &str, configured: &'a [String]) -> &'a [String] {
    if is_urgent(severity) {
        configured
    } else {
        &[]
    }
}

fn mentions(users: &[String]) -> String {
    users
        .iter()
        .map(|u| format!("<@{}>", u))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Prefix mentions, then an urgency banner for anything not `normal`
pub fn format_notification(message: &str, urgency: &str, mention_users: &[String]) -> String {
    let mut text = message.to_string();
    if !mention_users.is_empty() {
        text = format!("{}\n{}", mentions(mention_users), text);
    }
    match urgency {
        "high" | "critical" => format!(
            ":rotating_light: *{}* :rotating_light:\n{}",
            urgency.to_uppercase(),
            text
        ),
        "low" => format!(":information_source: *LOW* :information_source:\n{}", text),
        _ => text,
    }
}

pub fn format_human_input(
    request_id: &str,
    question: &str,
    context: &str,
    urgency: &str,
    timeout_hours: u32,
    escalate_to: &[String],
) -> String {
    let body = format!(
        ":robot_face: *Human Input Required* (ID: {})\n\n\
         *Question:* {}\n\n\
         *Context:* {}\n\n\
         *Urgency:* {}\n\
         *Response needed within:* {} hours\n\n\
         Please respond with your decision and reference ID: {}",
        request_id, question, context, urgency, timeout_hours, request_id
    );
    if escalate_to.is_empty() {
        body
    } else {
        format!("{}\n{}", mentions(escalate_to), body)
    }
}

fn severity_emoji(severity: &str) -> &'static str {
    match severity {
        "low" => ":large_yellow_circle:",
        "medium" => ":large_orange_circle:",
        "high" => ":red_circle:",
        "critical" => ":rotating_light:",
        _ => ":white_circle:",
    }
}

pub fn format_security_alert(
    title: &str,
    details: &str,
    severity: &str,
    alert_id: Option<&str>,
    source_system: Option<&str>,
    time: &str,
    mention_users: &[String],
) -> String {
    let emoji = severity_emoji(severity);
    let mut lines = vec![
        format!("{} *SECURITY ALERT* {}", emoji, emoji),
        String::new(),
        format!("*Title:* {}", title),
        format!("*Severity:* {}", severity.to_uppercase()),
    ];
    if let Some(id) = alert_id {
        lines.push(format!("*Alert ID:* {}", id));
    }
    if let Some(source) = source_system {
        lines.push(format!("*Source:* {}", source));
    }
    lines.push(String::new());
    lines.push("*Details:*".to_string());
    lines.push(details.to_string());
    lines.push(String::new());
    lines.push(format!("*Time:* {}", time));
    let body = lines.join("\n");
    if mention_users.is_empty() {
        body
    } else {
        format!("{}\n{}", mentions(mention_users), body)
    }
}

fn default_urgency() -> String {
    "normal".to_string()
}

fn default_severity() -> String {
    "medium".to_string()
}

fn default_timeout_hours() -> u32 {
    4
}

#[derive(Deserialize)]
struct NotifyArgs {
    message: String,
    #[serde(default)]
    channel: Option<String>,
    #[serde(default = "default_urgency")]
    urgency: String,
    #[serde(default)]
    mention_users: Vec<String>,
}

struct NotifyTeamTool(Arc<SlackIntegration>);

#[async_trait]
impl ToolTrait for NotifyTeamTool {
    fn name(&self) -> &str {
        "notify_team"
    }

    fn description(&self) -> &str {
        "Send a notification to the security team via Slack."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "message": { "type": "string", "description": "Message content" },
                "channel": {
                    "type": "string",
                    "description": "Slack channel (defaults to the security channel)"
                },
                "urgency": {
                    "type": "string",
                    "enum": ["low", "normal", "high", "critical"],
                    "description": "Urgency level"
                },
                "mention_users": {
                    "type": "array",
                    "items": { "type": "string" },
                    "description": "User IDs to mention"
                }
            },
            "required": ["message"]
        })
    }

    async fn execute(&self, args: Value) -> Result<String, ToolError> {
        let args: NotifyArgs = parse_args(args)?;
        let text = format_notification(&args.message, &args.urgency, &args.mention_users);
        let mut sent = self.0.post_message(args.channel.as_deref(), &text).await?;
        sent["urgency"] = json!(args.urgency);
        sent["mentioned_users"] = json!(args.mention_users);
        to_output(&sent)
    }
}

#[derive(Deserialize)]
struct IncidentChannelArgs {
    incident_id: String,
    initial_message: String,
    #[serde(default)]
    team_members: Vec<String>,
    #[serde(default)]
    is_private: bool,
}

struct CreateIncidentChannelTool(Arc<SlackIntegration>);

#[async_trait]
impl ToolTrait for CreateIncidentChannelTool {
    fn name(&self) -> &str {
        "create_incident_channel"
    }

    fn description(&self) -> &str {
        "Create a dedicated Slack channel for incident response."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "incident_id": { "type": "string", "description": "Unique incident identifier" },
                "initial_message": {
                    "type": "string",
                    "description": "First message posted in the channel"
                },
                "team_members": {
                    "type": "array",
                    "items": { "type": "string" },
                    "description": "User IDs to invite"
                },
                "is_private": { "type": "boolean", "description": "Create a private channel" }
            },
            "required": ["incident_id", "initial_message"]
        })
    }

    async fn execute(&self, args: Value) -> Result<String, ToolError> {
        let args: IncidentChannelArgs = parse_args(args)?;
        let channel = self
            .0
            .create_incident_channel(
                &args.incident_id,
                &args.initial_message,
                &args.team_members,
                args.is_private,
            )
            .await?;
        to_output(&channel)
    }
}

#[derive(Deserialize)]
struct HumanInputArgs {
    question: String,
    context: String,
    #[serde(default = "default_urgency")]
    urgency: String,
    #[serde(default = "default_timeout_hours")]
    timeout_hours: u32,
    #[serde(default)]
    channel: Option<String>,
    #[serde(default)]
    escalate_to: Vec<String>,
}

struct RequestHumanInputTool(Arc<SlackIntegration>);

#[async_trait]
impl ToolTrait for RequestHumanInputTool {
    fn name(&self) -> &str {
        "request_human_input"
    }

    fn description(&self) -> &str {
        "Ask the security team for a decision via Slack. \
         Answers arrive out of band, referencing the returned request_id."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "question": { "type": "string", "description": "Question to ask" },
                "context": { "type": "string", "description": "Context for the decision" },
                "urgency": {
                    "type": "string",
                    "enum": ["low", "normal", "high", "critical"],
                    "description": "Urgency level"
                },
                "timeout_hours": {
                    "type": "integer",
                    "minimum": 1,
                    "description": "Hours to wait for a response"
                },
                "channel": { "type": "string", "description": "Channel to ask in" },
                "escalate_to": {
                    "type": "array",
                    "items": { "type": "string" },
                    "description": "User IDs to mention (urgent requests page the escalation list)"
                }
            },
            "required": ["question", "context"]
        })
    }

    async fn execute(&self, args: Value) -> Result<String, ToolError> {
        let args: HumanInputArgs = parse_args(args)?;
        let request_id = format!("req_{}", Utc::now().format("%Y%m%d%H%M%S"));
        let escalate_to =
            escalation_targets(&args.urgency, &args.escalate_to, self.0.escalation_users());
        let text = format_human_input(
            &request_id,
            &args.question,
            &args.context,
            &args.urgency,
            args.timeout_hours,
            &escalate_to,
        );
        let mut sent = self.0.post_message(args.channel.as_deref(), &text).await?;
        sent["request_id"] = json!(request_id);
        sent["timeout_hours"] = json!(args.timeout_hours);
        sent["escalated_to"] = json!(escalate_to);
        to_output(&sent)
    }
}

#[derive(Deserialize)]
struct AlertArgs {
    alert_title: String,
    alert_details: String,
    #[serde(default = "default_severity")]
    severity: String,
    #[serde(default)]
    source_system: Option<String>,
    #[serde(default)]
    channel: Option<String>,
    #[serde(default)]
    alert_id: Option<String>,
}

struct SendSecurityAlertTool(Arc<SlackIntegration>);

#[async_trait]
impl ToolTrait for SendSecurityAlertTool {
    fn name(&self) -> &str {
        "send_security_alert"
    }

    fn description(&self) -> &str {
        "Send a formatted security alert via Slack."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "alert_title": { "type": "string", "description": "Alert title" },
                "alert_details": {
                    "type": "string",
                    "description": "Detailed information about the alert"
                },
                "severity": {
                    "type": "string",
                    "enum": ["low", "medium", "high", "critical"],
                    "description": "Alert severity"
                },
                "source_system": {
                    "type": "string",
                    "description": "System that raised the alert"
                },
                "channel": { "type": "string", "description": "Channel to post in" },
                "alert_id": { "type": "string", "description": "Unique alert identifier" }
            },
            "required": ["alert_title", "alert_details"]
        })
    }

    async fn execute(&self, args: Value) -> Result<String, ToolError> {
        let args: AlertArgs = parse_args(args)?;
        let mentioned = alert_mentions(&args.severity, self.0.escalation_users());
        let text = format_security_alert(
            &args.alert_title,
            &args.alert_details,
            &args.severity,
            args.alert_id.as_deref(),
            args.source_system.as_deref(),
            &Utc::now().format("%Y-%m-%d %H:%M:%S UTC").to_string(),
            mentioned,
        );
        let mut sent = self.0.post_message(args.channel.as_deref(), &text).await?;
        sent["severity"] = json!(args.severity);
        sent["alert_id"] = json!(args.alert_id);
        sent["mentioned_users"] = json!(mentioned);
        to_output(&sent)
    }
}

pub fn register(registry: &mut ToolRegistry, slack: Arc<SlackIntegration>) {
    registry.register(NotifyTeamTool(slack.clone()));
    registry.register(CreateIncidentChannelTool(slack.clone()));
    registry.register(RequestHumanInputTool(slack.clone()));
    registry.register(SendSecurityAlertTool(slack));
}
