//! Chronicle SIEM detections, asset timelines and IOC lookups

use async_trait::async_trait;
use chrono::{Duration, Utc};
use regex::Regex;
use serde::Deserialize;
use serde_json::{json, Value};
use std::net::IpAddr;
use std::sync::{Arc, OnceLock};

use engage_config::ChronicleConfig;

use super::integration::{
    str_at, Integration, IntegrationAuth, IntegrationClient, IntegrationError,
};
use super::{parse_args, to_output, ToolError, ToolRegistry, ToolTrait};

const PAGE_SIZE: &str = "100";
const MAX_EVENTS: usize = 50;
/// One year of history
pub const MAX_HOURS_BACK: u32 = 24 * 365;

pub struct ChronicleIntegration {
    client: IntegrationClient,
}

/// Indicator kinds Chronicle can look up
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IocType {
    Ip,
    Domain,
    Md5,
    Sha1,
    Sha256,
}

impl IocType {
    pub fn as_str(&self) -> &'static str {
        match self {
            IocType::Ip => "ip",
            IocType::Domain => "domain",
            IocType::Md5 => "md5",
            IocType::Sha1 => "sha1",
            IocType::Sha256 => "sha256",
        }
    }

    fn artifact_param(&self) -> &'static str {
        match self {
            IocType::Ip => "artifact.destination_ip_address",
            IocType::Domain => "artifact.domain_name",
            IocType::Md5 => "artifact.hash_md5",
            IocType::Sha1 => "artifact.hash_sha1",
            IocType::Sha256 => "artifact.hash_sha256",
        }
    }

    /// `auto` infers from the value; `hash` picks by length
    pub fn parse(kind: &str, value: &str) -> Option<Self> {
        match kind.to_lowercase().as_str() {
            "auto" | "" => detect_ioc_type(value),
            "ip" => Some(IocType::Ip),
            "domain" => Some(IocType::Domain),
            "md5" => Some(IocType::Md5),
            "sha1" => Some(IocType::Sha1),
            "sha256" => Some(IocType::Sha256),
            "hash" => detect_ioc_type(value)
                .filter(|t| matches!(t, IocType::Md5 | IocType::Sha1 | IocType::Sha256)),
            _ => None,
        }
    }
}

fn hex_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[0-9a-fA-F]+$").expect("static regex"))
}

fn domain_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(?i)([a-z0-9]([a-z0-9-]{0,61}[a-z0-9])?\.)+[a-z]{2,63}$")
            .expect("static regex")
    })
}

pub fn detect_ioc_type(value: &str) -> Option<IocType> {
    let value = value.trim();
    if value.parse::<IpAddr>().is_ok() {
        return Some(IocType::Ip);
    }
    if hex_re().is_match(value) {
        return match value.len() {
            32 => Some(IocType::Md5),
            40 => Some(IocType::Sha1),
            64 => Some(IocType::Sha256),
            _ => None,
        };
    }
    if domain_re().is_match(value) {
        return Some(IocType::Domain);
    }
    None
}

/// Rough spread of an indicator across the fleet
pub fn prevalence(asset_count: usize) -> &'static str {
    match asset_count {
        0 => "none",
        1..=5 => "rare",
        _ => "common",
    }
}

/// `[now - hours_back, now]` as RFC 3339 timestamps
fn window(hours_back: u32) -> Result<(String, String), IntegrationError> {
    if hours_back > MAX_HOURS_BACK {
        return Err(IntegrationError::InvalidArguments(format!(
            "hours_back must be at most {}, got {}",
            MAX_HOURS_BACK, hours_back
        )));
    }
    let end = Utc::now();
    let start = end
        .checked_sub_signed(Duration::hours(i64::from(hours_back)))
        .ok_or_else(|| {
            IntegrationError::InvalidArguments(format!("hours_back {} is out of range", hours_back))
        })?;
    Ok((
        start.format("%Y-%m-%dT%H:%M:%SZ").to_string(),
        end.format("%Y-%m-%dT%H:%M:%SZ").to_string(),
    ))
}

impl ChronicleIntegration {
    pub fn new(config: &ChronicleConfig) -> Self {
        Self {
            client: IntegrationClient::new(
                "chronicle",
                &config.base_url,
                IntegrationAuth::Bearer(config.api_key.clone()),
            ),
        }
    }

    pub async fn new_detections(
        &self,
        hours_back: u32,
        severity_filter: Option<&str>,
        rule_filter: Option<&str>,
    ) -> Result<Value, IntegrationError> {
        let (start, end) = window(hours_back)?;
        let found = self
            .client
            .get(
                "v2/detect/rules/-/detections",
                &[
                    ("start_time", start),
                    ("end_time", end),
                    ("page_size", PAGE_SIZE.to_string()),
                ],
            )
            .await?;

        let detections: Vec<Value> = found["detections"]
            .as_array()
            .map(|all| all.iter().map(summarize_detection).collect())
            .unwrap_or_default();
        Ok(Value::Array(filter_detections(detections, severity_filter, rule_filter)))
    }

    pub async fn asset_context(
        &self,
        asset_name: &str,
        hours_back: u32,
    ) -> Result<Value, IntegrationError> {
        let (start, end) = window(hours_back)?;
        let found = self
            .client
            .get(
                "v1/asset/listevents",
                &[
                    ("asset.hostname", asset_name.to_string()),
                    ("start_time", start),
                    ("end_time", end),
                    ("page_size", PAGE_SIZE.to_string()),
                ],
            )
            .await?;

        let events = found["events"].as_array().cloned().unwrap_or_default();
        let timeline: Vec<Value> = events
            .iter()
            .take(MAX_EVENTS)
            .map(|e| {
                json!({
                    "timestamp": str_at(e, "/metadata/eventTimestamp"),
                    "event_type": str_at(e, "/metadata/eventType"),
                    "user": str_at(e, "/principal/user/userid"),
                    "process": str_at(e, "/target/process/file/fullPath"),
                    "command_line": str_at(e, "/target/process/commandLine"),
                    "destination_ip": e.pointer("/target/ip/0").and_then(Value::as_str),
                    "destination_port": e.pointer("/target/port").and_then(Value::as_u64),
                })
            })
            .collect();

        Ok(json!({
            "asset_name": asset_name,
            "hours_back": hours_back,
            "event_count": events.len(),
            "last_seen": events.last().map(|e| str_at(e, "/metadata/eventTimestamp")),
            "timeline": timeline,
            "more_data_available": found["moreDataAvailable"].as_bool().unwrap_or(false),
        }))
    }

    pub async fn search_ioc(
        &self,
        value: &str,
        kind: IocType,
        hours_back: u32,
    ) -> Result<Value, IntegrationError> {
        let (start, end) = window(hours_back)?;
        let found = self
            .client
            .get(
                "v1/artifact/listassets",
                &[
                    (kind.artifact_param(), value.to_string()),
                    ("start_time", start),
                    ("end_time", end),
                    ("page_size", PAGE_SIZE.to_string()),
                ],
            )
            .await?;

        let assets: Vec<Value> = found["assets"].as_array().cloned().unwrap_or_default();
        let names: Vec<String> = assets
            .iter()
            .map(|a| {
                let host = str_at(a, "/asset/hostname");
                if host.is_empty() {
                    str_at(a, "/asset/assetIpAddress").to_string()
                } else {
                    host.to_string()
                }
            })
            .filter(|n| !n.is_empty())
            .collect();
        let first_seen = assets
            .iter()
            .map(|a| str_at(a, "/firstSeenArtifactInfo/seenTime"))
            .filter(|t| !t.is_empty())
            .min();
        let last_seen = assets
            .iter()
            .map(|a| str_at(a, "/lastSeenArtifactInfo/seenTime"))
            .filter(|t| !t.is_empty())
            .max();

        Ok(json!({
            "ioc": value,
            "type": kind.as_str(),
            "first_seen": first_seen,
            "last_seen": last_seen,
            "prevalence": prevalence(names.len()),
            "associated_assets": names,
        }))
    }
}

fn summarize_detection(detection: &Value) -> Value {
    let rule = detection.pointer("/detection/0").cloned().unwrap_or(Value::Null);
    let severity = rule
        .get("severity")
        .and_then(Value::as_str)
        .or_else(|| {
            rule.get("ruleLabels")
                .and_then(Value::as_array)
                .and_then(|labels| labels.iter().find(|l| str_at(l, "/key") == "severity"))
                .and_then(|l| l.get("value"))
                .and_then(Value::as_str)
        })
        .unwrap_or("UNKNOWN")
        .to_uppercase();

    json!({
        "id": str_at(detection, "/id"),
        "rule_name": str_at(&rule, "/ruleName"),
        "rule_id": str_at(&rule, "/ruleId"),
        "severity": severity,
        "alert_state": str_at(&rule, "/alertState"),
        "created": str_at(detection, "/createdTime"),
        "window_start": str_at(detection, "/timeWindow/startTime"),
        "window_end": str_at(detection, "/timeWindow/endTime"),
        "url": str_at(&rule, "/urlBackToProduct"),
    })
}

/// Exact severity match, case-insensitive rule-name substring
pub fn filter_detections(
    detections: Vec<Value>,
    severity_filter: Option<&str>,
    rule_filter: Option<&str>,
) -> Vec<Value> {
    let severity = severity_filter.map(str::to_uppercase);
    let rule = rule_filter.map(str::to_lowercase);
    detections
        .into_iter()
        .filter(|d| severity.as_deref().map_or(true, |s| str_at(d, "/severity") == s))
        .filter(|d| {
            rule.as_deref()
                .map_or(true, |r| str_at(d, "/rule_name").to_lowercase().contains(r))
        })
        .collect()
}

#[async_trait]
impl Integration for ChronicleIntegration {
    fn name(&self) -> &str {
        "chronicle"
    }

    async fn test_connection(&self) -> Result<(), IntegrationError> {
        self.client
            .get("v2/detect/rules", &[("page_size", "1".to_string())])
            .await
            .map(|_| ())
    }
}

fn one_hour() -> u32 {
    1
}

fn one_day() -> u32 {
    24
}

fn auto() -> String {
    "auto".to_string()
}

#[derive(Deserialize)]
struct DetectionArgs {
    #[serde(default = "one_hour")]
    hours_back: u32,
    #[serde(default)]
    severity_filter: Option<String>,
    #[serde(default)]
    rule_filter: Option<String>,
}

struct NewDetectionsTool(Arc<ChronicleIntegration>);

#[async_trait]
impl ToolTrait for NewDetectionsTool {
    fn name(&self) -> &str {
        "get_new_detections"
    }

    fn description(&self) -> &str {
        "Retrieve new detections from Chronicle SIEM."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "hours_back": {
                    "type": "integer",
                    "minimum": 1,
                    "maximum": MAX_HOURS_BACK,
                    "description": "How many hours back to look (default 1)"
                },
                "severity_filter": {
                    "type": "string",
                    "enum": ["LOW", "MEDIUM", "HIGH", "CRITICAL"],
                    "description": "Only this severity"
                },
                "rule_filter": {
                    "type": "string",
                    "description": "Only rules whose name contains this"
                }
            },
            "required": []
        })
    }

    async fn execute(&self, args: Value) -> Result<String, ToolError> {
        let args: DetectionArgs = parse_args(args)?;
        let detections = self
            .0
            .new_detections(
                args.hours_back.max(1),
                args.severity_filter.as_deref(),
                args.rule_filter.as_deref(),
            )
            .await?;
        to_output(&detections)
    }
}

#[derive(Deserialize)]
struct AssetArgs {
    asset_name: String,
    #[serde(default = "one_day")]
    hours_back: u32,
}

struct AssetContextTool(Arc<ChronicleIntegration>);

#[async_trait]
impl ToolTrait for AssetContextTool {
    fn name(&self) -> &str {
        "get_asset_context"
    }

    fn description(&self) -> &str {
        "Get recent activity for an asset from Chronicle."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "asset_name": { "type": "string", "description": "Hostname of the asset" },
                "hours_back": {
                    "type": "integer",
                    "minimum": 1,
                    "maximum": MAX_HOURS_BACK,
                    "description": "Hours of history (default 24)"
                }
            },
            "required": ["asset_name"]
        })
    }

    async fn execute(&self, args: Value) -> Result<String, ToolError> {
        let args: AssetArgs = parse_args(args)?;
        let context = self
            .0
            .asset_context(&args.asset_name, args.hours_back.max(1))
            .await?;
        to_output(&context)
    }
}

#[derive(Deserialize)]
struct IocArgs {
    ioc_value: String,
    #[serde(default = "auto")]
    ioc_type: String,
    #[serde(default = "one_day")]
    hours_back: u32,
}

struct SearchIocsTool(Arc<ChronicleIntegration>);

#[async_trait]
impl ToolTrait for SearchIocsTool {
    fn name(&self) -> &str {
        "search_iocs"
    }

    fn description(&self) -> &str {
        "Search Chronicle for assets that touched an indicator of compromise."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "ioc_value": { "type": "string", "description": "The indicator to search for" },
                "ioc_type": {
                    "type": "string",
                    "enum": ["auto", "ip", "domain", "hash", "md5", "sha1", "sha256"],
                    "description": "Indicator type (default auto)"
                },
                "hours_back": {
                    "type": "integer",
                    "minimum": 1,
                    "maximum": MAX_HOURS_BACK,
                    "description": "Hours of history (default 24)"
                }
            },
            "required": ["ioc_value"]
        })
    }

    async fn execute(&self, args: Value) -> Result<String, ToolError> {
        let args: IocArgs = parse_args(args)?;
        let value = args.ioc_value.trim();
        let kind = IocType::parse(&args.ioc_type, value).ok_or_else(|| {
            IntegrationError::InvalidArguments(format!(
                "cannot search '{}' as ioc type '{}'",
                value, args.ioc_type
            ))
        })?;
        let result = self.0.search_ioc(value, kind, args.hours_back.max(1)).await?;
        to_output(&result)
    }
}

pub fn register(registry: &mut ToolRegistry, chronicle: Arc<ChronicleIntegration>) {
    registry.register(NewDetectionsTool(chronicle.clone()));
    registry.register(AssetContextTool(chronicle.clone()));
    registry.register(SearchIocsTool(chronicle));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detect_ioc_type() {
        assert_eq!(detect_ioc_type("10.1.2.3"), Some(IocType::Ip));
        assert_eq!(detect_ioc_type("2001:db8::1"), Some(IocType::Ip));
        assert_eq!(detect_ioc_type("evil.example.com"), Some(IocType::Domain));
        assert_eq!(detect_ioc_type(&"a".repeat(32)), Some(IocType::Md5));
        assert_eq!(detect_ioc_type(&"B".repeat(40)), Some(IocType::Sha1));
        assert_eq!(detect_ioc_type(&"0".repeat(64)), Some(IocType::Sha256));
        assert_eq!(detect_ioc_type("deadbeef"), None);
        assert_eq!(detect_ioc_type("not an ioc"), None);
    }

    #[test]
    fn test_explicit_type_wins() {
        assert_eq!(IocType::parse("domain", "10.0.0.1"), Some(IocType::Domain));
        assert_eq!(IocType::parse("hash", "10.0.0.1"), None);
        assert_eq!(IocType::parse("url", "x"), None);
    }

    #[test]
    fn test_window_bounds() {
        let (start, end) = window(24).unwrap();
        assert!(start < end);
        assert!(window(MAX_HOURS_BACK).is_ok());

        let err = window(u32::MAX).unwrap_err();
        assert!(matches!(err, IntegrationError::InvalidArguments(_)));
    }

    #[test]
    fn test_prevalence_buckets() {
        assert_eq!(prevalence(0), "none");
        assert_eq!(prevalence(3), "rare");
        assert_eq!(prevalence(40), "common");
    }

    #[test]
    fn test_summarize_detection_reads_rule_labels() {
        let raw = json!({
            "id": "de_1",
            "createdTime": "2024-12-06T09:30:00Z",
            "detection": [{
                "ruleName": "Suspicious PowerShell Execution",
                "ruleLabels": [{"key": "severity", "value": "High"}]
            }]
        });
        let summary = summarize_detection(&raw);
        assert_eq!(summary["id"], "de_1");
        assert_eq!(summary["severity"], "HIGH");
        assert_eq!(summary["rule_name"], "Suspicious PowerShell Execution");
    }

    #[test]
    fn test_filter_detections() {
        let detections = vec![
            json!({"severity": "HIGH", "rule_name": "Encoded PowerShell"}),
            json!({"severity": "LOW", "rule_name": "New admin user"}),
        ];
        assert_eq!(filter_detections(detections.clone(), Some("high"), None).len(), 1);
        assert_eq!(filter_detections(detections.clone(), None, Some("powershell")).len(), 1);
        assert_eq!(filter_detections(detections, None, None).len(), 2);
    }
}
