//! Free-text alert payload and timestamp parsing

use chrono::{DateTime, FixedOffset, NaiveDateTime, TimeZone};
use regex::Regex;
use serde::Serialize;

use crate::alerts::model::AlertKind;

const TIME_FORMATS: [&str; 2] = ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S"];

/// Parse a wall-clock timestamp in the reference timezone.
///
/// Returns `None` for anything that is not `YYYY-MM-DD HH:MM:SS` or
/// `YYYY-MM-DDTHH:MM:SS`.
pub fn parse_timestamp(text: &str, tz: &FixedOffset) -> Option<DateTime<FixedOffset>> {
    let text = text.trim();
    TIME_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(text, fmt).ok())
        .and_then(|naive| tz.from_local_datetime(&naive).single())
}

/// Structured fields pulled out of a monitoring message
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ParsedPayload {
    pub kind: Option<AlertKind>,
    pub region: Option<String>,
    pub metric: Option<String>,
    pub rule_name: Option<String>,
    pub generator_url: Option<String>,
    pub summary: Option<String>,
    pub details: Option<String>,
    pub script_name: Option<String>,
}

/// Extracts [`ParsedPayload`] fields from the markdown-ish alert text
/// produced by the monitoring templates:
///
/// ```text
/// 🔴 **【告警触发】监控告警**
/// 🌐 **区域 (Region):** IDN
/// 📊 **指标 (Metric):** ConnectionRate
/// 🔍 **规则名称 (Rule Name):** IDN-Enterprise-ConnectionRate
/// 🔗 **告警链接 (GeneratorURL):** https://grafana.example/alerting
///
/// **告警摘要:**
/// 企业 KrediOne CG 的接通率
///
/// **告警详情:**
/// 在过去十五分钟内的接通率为 14.03%
/// ```
pub struct PayloadParser {
    region: Regex,
    metric: Regex,
    rule_name: Regex,
    generator_url: Regex,
    summary: Regex,
    details_header: Regex,
    script_name: Regex,
}

impl PayloadParser {
    pub fn new() -> Result<Self, regex::Error> {
        Ok(Self {
            region: Regex::new(r"\*\*区域\s*\(Region\):\*\*\s*(\w+)")?,
            metric: Regex::new(r"\*\*指标\s*\(Metric\):\*\*\s*(\w+)")?,
            rule_name: Regex::new(r"\*\*规则名称\s*\(Rule Name\):\*\*[ \t]*([^\n]+)")?,
            generator_url: Regex::new(
                r"\*\*告警链接\s*\(GeneratorURL\):\*\*\s*(https?://[^\s\)]+)",
            )?,
            summary: Regex::new(r"\*\*告警摘要:\*\*\s*\n([^\n]+)")?,
            details_header: Regex::new(r"\*\*告警详情:\*\*\s*\n")?,
            script_name: Regex::new(r"企业\s+([^的\n]+?)(?:\s+CG)?\s+的")?,
        })
    }

    pub fn parse(&self, text: &str) -> ParsedPayload {
        let kind = if text.contains("【告警触发】") {
            Some(AlertKind::Trigger)
        } else if text.contains("【告警恢复】") {
            Some(AlertKind::Recovery)
        } else {
            None
        };

        ParsedPayload {
            kind,
            region: capture(&self.region, text),
            metric: capture(&self.metric, text),
            rule_name: capture(&self.rule_name, text),
            generator_url: capture(&self.generator_url, text),
            summary: capture(&self.summary, text),
            details: self.details(text),
            script_name: capture(&self.script_name, text),
        }
    }

    /// Text after the details header up to the next blank line or bold marker
    fn details(&self, text: &str) -> Option<String> {
        let header = self.details_header.find(text)?;
        let rest = &text[header.end()..];
        let end = [rest.find("\n\n"), rest.find("**")]
            .into_iter()
            .flatten()
            .min()
            .unwrap_or(rest.len());
        let details = rest[..end].trim();
        (!details.is_empty()).then(|| details.to_string())
    }
}

fn capture(re: &Regex, text: &str) -> Option<String> {
    re.captures(text)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim().to_string())
        .filter(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "🔴 **【告警触发】监控告警**
🌐 **区域 (Region):** IDN
📊 **指标 (Metric):** ConnectionRate
🔍 **规则名称 (Rule Name):** IDN-Enterprise-ConnectionRate
🔗 **告警链接 (GeneratorURL):** https://grafana.example/alerting/list?view=state

**告警摘要:**
企业 KrediOne CG 的接通率

**告警详情:**
在过去十五分钟内的接通率为 14.03%
呼叫量为 2776
参考阈值: 0.5%~20%
";

    fn tz() -> FixedOffset {
        FixedOffset::east_opt(8 * 3600).unwrap()
    }

    #[test]
    fn test_parse_timestamp_formats() {
        let expected = tz().with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap();
        assert_eq!(parse_timestamp("2024-05-01 10:00:00", &tz()), Some(expected));
        assert_eq!(parse_timestamp("2024-05-01T10:00:00", &tz()), Some(expected));
        assert_eq!(parse_timestamp(" 2024-05-01 10:00:00 ", &tz()), Some(expected));
        assert_eq!(parse_timestamp("yesterday", &tz()), None);
        assert_eq!(parse_timestamp("2024-05-01", &tz()), None);
    }

    #[test]
    fn test_parse_full_payload() {
        let parser = PayloadParser::new().unwrap();
        let parsed = parser.parse(SAMPLE);

        assert_eq!(parsed.kind, Some(AlertKind::Trigger));
        assert_eq!(parsed.region.as_deref(), Some("IDN"));
        assert_eq!(parsed.metric.as_deref(), Some("ConnectionRate"));
        assert_eq!(
            parsed.rule_name.as_deref(),
            Some("IDN-Enterprise-ConnectionRate")
        );
        assert_eq!(
            parsed.generator_url.as_deref(),
            Some("https://grafana.example/alerting/list?view=state")
        );
        assert_eq!(parsed.summary.as_deref(), Some("企业 KrediOne CG 的接通率"));
        assert_eq!(
            parsed.details.as_deref(),
            Some("在过去十五分钟内的接通率为 14.03%\n呼叫量为 2776\n参考阈值: 0.5%~20%")
        );
        assert_eq!(parsed.script_name.as_deref(), Some("KrediOne"));
    }

    #[test]
    fn test_parse_recovery_marker() {
        let parser = PayloadParser::new().unwrap();
        let parsed = parser.parse("✅ **【告警恢复】监控告警**");
        assert_eq!(parsed.kind, Some(AlertKind::Recovery));
        assert_eq!(parsed.region, None);
    }

    #[test]
    fn test_parse_plain_text() {
        let parser = PayloadParser::new().unwrap();
        assert_eq!(parser.parse("disk full on host-3"), ParsedPayload::default());
    }
}
