//! day_of_week

use async_trait::async_trait;
use chrono::{DateTime, Local, TimeZone};
use serde_json::json;

use super::{ToolError, ToolTrait};

/// Current local weekday, e.g. `Friday`
pub struct DayOfWeekTool;

pub fn day_of_week<Tz: TimeZone>(now: &DateTime<Tz>) -> String
where
    Tz::Offset: std::fmt::Display,
{
    now.format("%A").to_string()
}

#[async_trait]
impl ToolTrait for DayOfWeekTool {
    fn name(&self) -> &str {
        "day_of_week"
    }

    fn description(&self) -> &str {
        "Get the current day of the week."
    }

    fn parameters(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {},
            "required": []
        })
    }

    async fn execute(&self, _args: serde_json::Value) -> Result<String, ToolError> {
        Ok(day_of_week(&Local::now()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn test_day_of_week_name() {
        let friday = Utc.with_ymd_and_hms(2024, 12, 6, 12, 0, 0).unwrap();
        assert_eq!(day_of_week(&friday), "Friday");
    }

    #[tokio::test]
    async fn test_execute_ignores_arguments() {
        let day = DayOfWeekTool.execute(json!({"unused": true})).await.unwrap();
        let days = ["Monday", "Tuesday", "Wednesday", "Thursday", "Friday", "Saturday", "Sunday"];
        assert!(days.contains(&day.as_str()));
    }
}
