//! JIRA ticketing (REST API v2)

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, Utc};
use regex::Regex;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::{Arc, OnceLock};
use tracing::info;

use engage_config::JiraConfig;

use super::integration::{
    str_at, Integration, IntegrationAuth, IntegrationClient, IntegrationError,
};
use super::{parse_args, to_output, ToolError, ToolRegistry, ToolTrait};

pub struct JiraIntegration {
    client: IntegrationClient,
    project_key: String,
}

impl JiraIntegration {
    pub fn new(config: &JiraConfig) -> Self {
        let auth = IntegrationAuth::Basic {
            username: config.username.clone(),
            token: config.api_token.clone(),
        };
        Self {
            client: IntegrationClient::new("jira", &config.url, auth),
            project_key: config.project_key.clone(),
        }
    }

    fn browse_url(&self, key: &str) -> String {
        format!("{}/browse/{}", self.client.base_url(), key)
    }

    pub async fn create_ticket(&self, ticket: &NewTicket) -> Result<Value, IntegrationError> {
        let mut description = ticket.description.clone();
        let mut labels = vec!["security".to_string(), "engage".to_string()];
        if let Some(alert_id) = &ticket.alert_id {
            description.push_str(&format!("\n\nAlert ID: {}", alert_id));
            labels.push(format!("alert-{}", alert_id));
        }

        let mut fields = json!({
            "project": { "key": self.project_key },
            "summary": ticket.summary,
            "description": description,
            "issuetype": { "name": "Task" },
            "priority": { "name": ticket.priority },
            "labels": labels,
        });
        if let Some(assignee) = &ticket.assignee {
            fields["assignee"] = json!({ "name": assignee });
        }

        let created = self
            .client
            .post("rest/api/2/issue", &json!({ "fields": fields }))
            .await?;
        let key = str_at(&created, "/key");
        if key.is_empty() {
            return Err(IntegrationError::Api("jira did not return an issue key".to_string()));
        }
        info!("Created JIRA ticket {}", key);

        Ok(json!({
            "ticket_id": key,
            "summary": ticket.summary,
            "priority": ticket.priority,
            "status": "Open",
            "assignee": ticket.assignee,
            "alert_id": ticket.alert_id,
            "url": self.browse_url(key),
            "created": Utc::now().to_rfc3339(),
        }))
    }

    pub async fn update_ticket(
        &self,
        ticket_id: &str,
        findings: &str,
        status: Option<&str>,
        add_labels: &[String],
    ) -> Result<Value, IntegrationError> {
        let ticket_id = issue_key(ticket_id)?;
        let ticket_id = ticket_id.as_str();
        self.client
            .post(
                &format!("rest/api/2/issue/{}/comment", ticket_id),
                &json!({ "body": findings }),
            )
            .await?;

        if !add_labels.is_empty() {
            let ops: Vec<Value> = add_labels.iter().map(|l| json!({ "add": l })).collect();
            self.client
                .put(
                    &format!("rest/api/2/issue/{}", ticket_id),
                    &json!({ "update": { "labels": ops } }),
                )
                .await?;
        }

        if let Some(status) = status {
            self.transition(ticket_id, status).await?;
        }

        Ok(json!({
            "ticket_id": ticket_id,
            "findings_added": true,
            "status_updated": status.is_some(),
            "new_status": status,
            "labels_added": add_labels,
            "updated": Utc::now().to_rfc3339(),
        }))
    }

    async fn transition(&self, ticket_id: &str, status: &str) -> Result<(), IntegrationError> {
        let path = format!("rest/api/2/issue/{}/transitions", ticket_id);
        let available = self.client.get(&path, &[]).await?;
        let transitions = available["transitions"].as_array().cloned().unwrap_or_default();

        let wanted = status.to_lowercase();
        let found = transitions.iter().find(|t| {
            str_at(t, "/name").to_lowercase() == wanted
                || str_at(t, "/to/name").to_lowercase() == wanted
        });
        let Some(transition) = found else {
            let names: Vec<&str> = transitions.iter().map(|t| str_at(t, "/name")).collect();
            return Err(IntegrationError::Api(format!(
                "no transition to '{}' on {} (available: {})",
                status,
                ticket_id,
                names.join(", ")
            )));
        };

        self.client
            .post(&path, &json!({ "transition": { "id": transition["id"] } }))
            .await?;
        Ok(())
    }

    pub async fn stale_tickets(
        &self,
        hours_old: u32,
        status_filter: Option<&str>,
    ) -> Result<Value, IntegrationError> {
        let jql = stale_jql(&self.project_key, hours_old, status_filter);
        let found = self
            .client
            .get(
                "rest/api/2/search",
                &[
                    ("jql", jql),
                    ("fields", "summary,status,assignee,updated,priority".to_string()),
                    ("maxResults", "50".to_string()),
                ],
            )
            .await?;

        let now = Utc::now();
        let tickets: Vec<Value> = found["issues"]
            .as_array()
            .map(|issues| issues.iter().map(|issue| self.summarize(issue, now)).collect())
            .unwrap_or_default();
        Ok(Value::Array(tickets))
    }

    fn summarize(&self, issue: &Value, now: DateTime<Utc>) -> Value {
        let key = str_at(issue, "/key");
        let updated = str_at(issue, "/fields/updated");
        let age_hours =
            parse_jira_time(updated).map(|t| (now - t.with_timezone(&Utc)).num_hours());
        json!({
            "ticket_id": key,
            "summary": str_at(issue, "/fields/summary"),
            "status": str_at(issue, "/fields/status/name"),
            "assignee": issue.pointer("/fields/assignee/name").and_then(Value::as_str),
            "priority": str_at(issue, "/fields/priority/name"),
            "last_updated": updated,
            "age_hours": age_hours,
            "url": self.browse_url(key),
        })
    }
}

#[async_trait]
impl Integration for JiraIntegration {
    fn name(&self) -> &str {
        "jira"
    }

    async fn test_connection(&self) -> Result<(), IntegrationError> {
        self.client.get("rest/api/2/myself", &[]).await.map(|_| ())
    }
}

/// JQL for project tickets untouched for `hours_old` hours
pub fn stale_jql(project_key: &str, hours_old: u32, status_filter: Option<&str>) -> String {
    let mut jql = format!("project = \"{}\" AND updated <= -{}h", project_key, hours_old);
    match status_filter {
        Some(status) => jql.push_str(&format!(" AND status = \"{}\"", status.replace('"', ""))),
        None => jql.push_str(" AND statusCategory != Done"),
    }
    jql.push_str(" ORDER BY updated ASC");
    jql
}

fn issue_key_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(?:[A-Z][A-Z0-9_]*-[0-9]+|[0-9]+)$").expect("static regex"))
}

/// `SEC-42` style key or numeric issue id, uppercased. Anything else would
/// change the request path.
pub fn issue_key(raw: &str) -> Result<String, IntegrationError> {
    let key = raw.trim().to_uppercase();
    if issue_key_re().is_match(&key) {
        Ok(key)
    } else {
        Err(IntegrationError::InvalidArguments(format!(
            "'{}' is not a JIRA issue key",
            raw
        )))
    }
}

/// JIRA timestamps look like `2024-12-06T09:30:00.000+0000`
pub fn parse_jira_time(value: &str) -> Option<DateTime<FixedOffset>> {
    DateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f%z").ok()
}

fn default_priority() -> String {
    "Medium".to_string()
}

fn default_hours_old() -> u32 {
    24
}

#[derive(Debug, Deserialize)]
pub struct NewTicket {
    pub summary: String,
    pub description: String,
    #[serde(default = "default_priority")]
    pub priority: String,
    #[serde(default)]
    pub alert_id: Option<String>,
    #[serde(default)]
    pub assignee: Option<String>,
}

struct CreateSecurityTicketTool(Arc<JiraIntegration>);

#[async_trait]
impl ToolTrait for CreateSecurityTicketTool {
    fn name(&self) -> &str {
        "create_security_ticket"
    }

    fn description(&self) -> &str {
        "Create a security incident ticket in JIRA."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "summary": { "type": "string", "description": "Brief summary of the incident" },
                "description": {
                    "type": "string",
                    "description": "Detailed description with findings"
                },
                "priority": {
                    "type": "string",
                    "enum": ["Low", "Medium", "High", "Critical"],
                    "description": "Priority level"
                },
                "alert_id": { "type": "string", "description": "Associated alert ID for tracking" },
                "assignee": { "type": "string", "description": "Optional assignee" }
            },
            "required": ["summary", "description"]
        })
    }

    async fn execute(&self, args: Value) -> Result<String, ToolError> {
        let ticket: NewTicket = parse_args(args)?;
        to_output(&self.0.create_ticket(&ticket).await?)
    }
}

#[derive(Deserialize)]
struct UpdateArgs {
    ticket_id: String,
    findings: String,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    add_labels: Vec<String>,
}

struct UpdateTicketTool(Arc<JiraIntegration>);

#[async_trait]
impl ToolTrait for UpdateTicketTool {
    fn name(&self) -> &str {
        "update_ticket_with_findings"
    }

    fn description(&self) -> &str {
        "Update a JIRA ticket with investigation findings."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "ticket_id": { "type": "string", "description": "JIRA ticket key, e.g. SEC-42" },
                "findings": { "type": "string", "description": "Investigation findings to add" },
                "status": { "type": "string", "description": "New status for the ticket" },
                "add_labels": {
                    "type": "array",
                    "items": { "type": "string" },
                    "description": "Labels to add"
                }
            },
            "required": ["ticket_id", "findings"]
        })
    }

    async fn execute(&self, args: Value) -> Result<String, ToolError> {
        let args: UpdateArgs = parse_args(args)?;
        let result = self
            .0
            .update_ticket(
                &args.ticket_id,
                &args.findings,
                args.status.as_deref(),
                &args.add_labels,
            )
            .await?;
        to_output(&result)
    }
}

#[derive(Deserialize)]
struct StaleArgs {
    #[serde(default = "default_hours_old")]
    hours_old: u32,
    #[serde(default)]
    status_filter: Option<String>,
}

struct StaleTicketsTool(Arc<JiraIntegration>);

#[async_trait]
impl ToolTrait for StaleTicketsTool {
    fn name(&self) -> &str {
        "get_stale_tickets"
    }

    fn description(&self) -> &str {
        "Get security tickets that haven't been updated recently."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "hours_old": {
                    "type": "integer",
                    "minimum": 1,
                    "description": "Consider tickets stale after this many hours (default 24)"
                },
                "status_filter": { "type": "string", "description": "Only tickets in this status" }
            },
            "required": []
        })
    }

    async fn execute(&self, args: Value) -> Result<String, ToolError> {
        let args: StaleArgs = parse_args(args)?;
        let tickets = self
            .0
            .stale_tickets(args.hours_old, args.status_filter.as_deref())
            .await?;
        to_output(&tickets)
    }
}

pub fn register(registry: &mut ToolRegistry, jira: Arc<JiraIntegration>) {
    registry.register(CreateSecurityTicketTool(jira.clone()));
    registry.register(UpdateTicketTool(jira.clone()));
    registry.register(StaleTicketsTool(jira));
}
