//! Confluence knowledge base and incident pages

use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{info, warn};

use engage_config::ConfluenceConfig;

use super::integration::{
    str_at, Integration, IntegrationAuth, IntegrationClient, IntegrationError,
};
use super::{parse_args, to_output, ToolError, ToolRegistry, ToolTrait};

const EXPAND: &str = "space,version,metadata.labels";

pub struct ConfluenceIntegration {
    client: IntegrationClient,
    security_space_key: String,
    playbook_space_key: String,
    knowledge_base_labels: Vec<String>,
}

impl ConfluenceIntegration {
    pub fn new(config: &ConfluenceConfig) -> Self {
        let auth = IntegrationAuth::Basic {
            username: config.username.clone(),
            token: config.api_token.clone(),
        };
        Self {
            client: IntegrationClient::new("confluence", &config.url, auth),
            security_space_key: config.security_space_key.clone(),
            playbook_space_key: config.playbook_space_key.clone(),
            knowledge_base_labels: config.knowledge_base_labels.clone(),
        }
    }

    fn page_url(&self, page: &Value) -> String {
        format!("{}{}", self.client.base_url(), str_at(page, "/_links/webui"))
    }

    async fn search(
        &self,
        cql: String,
        limit: u32,
        expand: &str,
    ) -> Result<Vec<Value>, IntegrationError> {
        let found = self
            .client
            .get(
                "rest/api/content/search",
                &[
                    ("cql", cql),
                    ("limit", limit.to_string()),
                    ("expand", expand.to_string()),
                ],
            )
            .await?;
        Ok(found["results"].as_array().cloned().unwrap_or_default())
    }

    /// Pages in the space matching `query` that carry a knowledge-base label
    pub async fn search_knowledge_base(
        &self,
        query: &str,
        space_key: Option<&str>,
        limit: u32,
    ) -> Result<Value, IntegrationError> {
        let space = space_key.unwrap_or(&self.security_space_key);
        let cql = format!(
            "space = \"{}\" AND type = page AND text ~ \"{}\"",
            cql_escape(space),
            cql_escape(query)
        );

        let articles: Vec<Value> = self
            .search(cql, limit, EXPAND)
            .await?
            .iter()
            .filter_map(|page| {
                let labels = page_labels(page);
                if !labels.iter().any(|l| self.knowledge_base_labels.contains(l)) {
                    return None;
                }
                Some(json!({
                    "title": str_at(page, "/title"),
                    "url": self.page_url(page),
                    "space": str_at(page, "/space/key"),
                    "labels": labels,
                    "last_updated": str_at(page, "/version/when"),
                    "page_id": str_at(page, "/id"),
                }))
            })
            .collect();
        Ok(Value::Array(articles))
    }

    pub async fn create_incident_documentation(
        &self,
        incident_id: &str,
        title: &str,
        content: &str,
        space_key: Option<&str>,
        parent_page_id: Option<&str>,
    ) -> Result<Value, IntegrationError> {
        let space = space_key.unwrap_or(&self.security_space_key);
        let parent_page_id = parent_page_id
            .map(|raw| {
                content_id(raw).ok_or_else(|| {
                    IntegrationError::InvalidArguments(format!(
                        "'{}' is not a Confluence page id",
                        raw
                    ))
                })
            })
            .transpose()?;
        let title = incident_title(incident_id, title);
        let created_at = Utc::now().format("%Y-%m-%d %H:%M:%S UTC").to_string();
        let body = incident_page_body(incident_id, content, &created_at);

        let mut page = json!({
            "type": "page",
            "title": title,
            "space": { "key": space },
            "body": { "storage": { "value": body, "representation": "storage" } },
        });
        if let Some(parent) = parent_page_id {
            page["ancestors"] = json!([{ "id": parent }]);
        }

        let created = self.client.post("rest/api/content", &page).await?;
        let page_id = content_id(str_at(&created, "/id"))
            .ok_or_else(|| {
                IntegrationError::Api("confluence did not return a page id".to_string())
            })?
            .to_string();
        info!("Created Confluence page {} for incident {}", page_id, incident_id);

        let mut result = json!({
            "id": page_id,
            "title": title,
            "url": self.page_url(&created),
            "space": space,
            "incident_id": incident_id,
            "created": Utc::now().to_rfc3339(),
        });

        let labels: Vec<Value> = [
            "security".to_string(),
            "incident".to_string(),
            format!("incident-{}", incident_id.to_lowercase()),
        ]
        .iter()
        .map(|name| json!({ "prefix": "global", "name": name }))
        .collect();
        if let Err(e) = self
            .client
            .post(&format!("rest/api/content/{}/label", page_id), &Value::Array(labels))
            .await
        {
            warn!("Could not label page {}: {}", page_id, e);
            result["label_warning"] = json!(format!("Could not add labels: {}", e));
        }

        Ok(result)
    }

    /// First page in the playbook space whose title contains `playbook_name`
    pub async fn get_playbook_content(
        &self,
        playbook_name: &str,
        space_key: Option<&str>,
    ) -> Result<Value, IntegrationError> {
        let space = space_key.unwrap_or(&self.playbook_space_key);
        let cql = format!(
            "space = \"{}\" AND type = page AND title ~ \"{}\"",
            cql_escape(space),
            cql_escape(playbook_name)
        );
        let results = self
            .search(cql, 5, "body.storage,version,history,metadata.labels")
            .await?;

        let wanted = playbook_name.to_lowercase();
        let Some(page) = results
            .iter()
            .find(|p| str_at(p, "/title").to_lowercase().contains(&wanted))
        else {
            let titles: Vec<&str> = results.iter().map(|p| str_at(p, "/title")).collect();
            return Err(IntegrationError::Api(format!(
                "playbook '{}' not found in space {} (closest: {})",
                playbook_name,
                space,
                if titles.is_empty() { "none".to_string() } else { titles.join(", ") }
            )));
        };

        Ok(json!({
            "name": playbook_name,
            "title": str_at(page, "/title"),
            "content": str_at(page, "/body/storage/value"),
            "url": self.page_url(page),
            "space": space,
            "page_id": str_at(page, "/id"),
            "last_updated": str_at(page, "/version/when"),
            "labels": page_labels(page),
            "metadata": {
                "version": page.pointer("/version/number").and_then(Value::as_u64).unwrap_or(1),
                "created": str_at(page, "/history/createdDate"),
                "creator": str_at(page, "/history/createdBy/displayName"),
            }
        }))
    }
}

#[async_trait]
impl Integration for ConfluenceIntegration {
    fn name(&self) -> &str {
        "confluence"
    }

    async fn test_connection(&self) -> Result<(), IntegrationError> {
        self.client
            .get("rest/api/space", &[("limit", "1".to_string())])
            .await
            .map(|_| ())
    }
}

fn page_labels(page: &Value) -> Vec<String> {
    page.pointer("/metadata/labels/results")
        .and_then(Value::as_array)
        .map(|labels| {
            labels
                .iter()
                .map(|l| str_at(l, "/name").to_string())
                .filter(|l| !l.is_empty())
                .collect()
        })
        .unwrap_or_default()
}

/// Content ids are numeric; anything else is rejected before it reaches a path
pub fn content_id(raw: &str) -> Option<&str> {
    let id = raw.trim();
    (!id.is_empty() && id.bytes().all(|b| b.is_ascii_digit())).then_some(id)
}

pub fn cql_escape(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}

/// Prefix the title with `[incident_id]` unless it already mentions it
pub fn incident_title(incident_id: &str, title: &str) -> String {
    if title.contains(incident_id) {
        title.to_string()
    } else {
        format!("[{}] {}", incident_id, title)
    }
}

/// Storage-format body: metadata table, then the caller's content
pub fn incident_page_body(incident_id: &str, content: &str, created: &str) -> String {
    format!(
        "<h2>Incident Information</h2>\n\
         <table>\n\
         <tr><td><strong>Incident ID:</strong></td><td>{}</td></tr>\n\
         <tr><td><strong>Created:</strong></td><td>{}</td></tr>\n\
         <tr><td><strong>Status:</strong></td><td>Under Investigation</td></tr>\n\
         </table>\n\
         <h2>Investigation Details</h2>\n{}",
        incident_id, created, content
    )
}

fn default_limit() -> u32 {
    10
}

#[derive(Deserialize)]
struct SearchArgs {
    query: String,
    #[serde(default)]
    space_key: Option<String>,
    #[serde(default = "default_limit")]
    limit: u32,
}

struct SearchKnowledgeBaseTool(Arc<ConfluenceIntegration>);

#[async_trait]
impl ToolTrait for SearchKnowledgeBaseTool {
    fn name(&self) -> &str {
        "search_knowledge_base"
    }

    fn description(&self) -> &str {
        "Search the security knowledge base in Confluence."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": { "type": "string", "description": "Search query" },
                "space_key": {
                    "type": "string",
                    "description": "Space to search (defaults to the security space)"
                },
                "limit": {
                    "type": "integer",
                    "minimum": 1,
                    "maximum": 50,
                    "description": "Maximum results"
                }
            },
            "required": ["query"]
        })
    }

    async fn execute(&self, args: Value) -> Result<String, ToolError> {
        let args: SearchArgs = parse_args(args)?;
        let articles = self
            .0
            .search_knowledge_base(
                &args.query,
                args.space_key.as_deref(),
                args.limit.clamp(1, 50),
            )
            .await?;
        to_output(&articles)
    }
}

#[derive(Deserialize)]
struct DocumentationArgs {
    incident_id: String,
    title: String,
    content: String,
    #[serde(default)]
    space_key: Option<String>,
    #[serde(default)]
    parent_page_id: Option<String>,
}

struct CreateIncidentDocumentationTool(Arc<ConfluenceIntegration>);

#[async_trait]
impl ToolTrait for CreateIncidentDocumentationTool {
    fn name(&self) -> &str {
        "create_incident_documentation"
    }

    fn description(&self) -> &str {
        "Create incident documentation in Confluence."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "incident_id": { "type": "string", "description": "Unique incident identifier" },
                "title": { "type": "string", "description": "Document title" },
                "content": {
                    "type": "string",
                    "description": "Document content in Confluence storage format (HTML)"
                },
                "space_key": { "type": "string", "description": "Target space" },
                "parent_page_id": { "type": "string", "description": "Numeric parent page ID" }
            },
            "required": ["incident_id", "title", "content"]
        })
    }

    async fn execute(&self, args: Value) -> Result<String, ToolError> {
        let args: DocumentationArgs = parse_args(args)?;
        let page = self
            .0
            .create_incident_documentation(
                &args.incident_id,
                &args.title,
                &args.content,
                args.space_key.as_deref(),
                args.parent_page_id.as_deref(),
            )
            .await?;
        to_output(&page)
    }
}

#[derive(Deserialize)]
struct PlaybookArgs {
    playbook_name: String,
    #[serde(default)]
    space_key: Option<String>,
}

struct GetPlaybookContentTool(Arc<ConfluenceIntegration>);

#[async_trait]
impl ToolTrait for GetPlaybookContentTool {
    fn name(&self) -> &str {
        "get_playbook_content"
    }

    fn description(&self) -> &str {
        "Retrieve playbook content from Confluence."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "playbook_name": { "type": "string", "description": "Name of the playbook" },
                "space_key": {
                    "type": "string",
                    "description": "Space to search (defaults to the playbook space)"
                }
            },
            "required": ["playbook_name"]
        })
    }

    async fn execute(&self, args: Value) -> Result<String, ToolError> {
        let args: PlaybookArgs = parse_args(args)?;
        let playbook = self
            .0
            .get_playbook_content(&args.playbook_name, args.space_key.as_deref())
            .await?;
        to_output(&playbook)
    }
}

pub fn register(registry: &mut ToolRegistry, confluence: Arc<ConfluenceIntegration>) {
    registry.register(SearchKnowledgeBaseTool(confluence.clone()));
    registry.register(CreateIncidentDocumentationTool(confluence.clone()));
    registry.register(GetPlaybookContentTool(confluence));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_incident_title() {
        assert_eq!(incident_title("INC-7", "Phishing wave"), "[INC-7] Phishing wave");
        assert_eq!(incident_title("INC-7", "INC-7 postmortem"), "INC-7 postmortem");
    }

    #[test]
    fn test_incident_page_body() {
        let body = incident_page_body("INC-7", "<p>notes</p>", "2024-12-06 09:30:00 UTC");
        assert!(body.starts_with("<h2>Incident Information</h2>"));
        assert!(body.contains("<td>INC-7</td>"));
        assert!(body.contains("<td>2024-12-06 09:30:00 UTC</td>"));
        assert!(body.ends_with("<h2>Investigation Details</h2>\n<p>notes</p>"));
    }

    #[test]
    fn test_content_id() {
        assert_eq!(content_id(" 98765 "), Some("98765"));
        assert_eq!(content_id(""), None);
        assert_eq!(content_id("123/../456"), None);
        assert_eq!(content_id("12?x=1"), None);
    }

    #[test]
    fn test_cql_escape() {
        assert_eq!(cql_escape(r#"say "hi""#), r#"say \"hi\""#);
    }

    #[test]
    fn test_page_labels() {
        let page = json!({"metadata": {"labels": {"results": [{"name": "kb"}, {"name": ""}]}}});
        assert_eq!(page_labels(&page), vec!["kb".to_string()]);
        assert!(page_labels(&json!({})).is_empty());
    }
}
