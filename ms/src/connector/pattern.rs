//! Source/metric pattern matching

use regex::Regex;

use crate::error::ConnectorError;

/// A regex with `source` and `metric` named groups
#[derive(Debug, Clone)]
pub struct SourcePattern {
    regex: Regex,
}

impl SourcePattern {
    pub fn new(pattern: &str) -> Result<Self, ConnectorError> {
        let regex = Regex::new(pattern)?;
        let names: Vec<&str> = regex.capture_names().flatten().collect();
        for group in ["source", "metric"] {
            if !names.contains(&group) {
                return Err(ConnectorError::Config(format!(
                    "pattern '{}' is missing the '{}' named group",
                    pattern, group
                )));
            }
        }
        Ok(Self { regex })
    }

    /// Split a backend path into `(source, metric)`, if it matches
    pub fn split(&self, path: &str) -> Option<(String, String)> {
        let captures = self.regex.captures(path)?;
        let source = captures.name("source")?.as_str();
        let metric = captures.name("metric")?.as_str();
        if source.is_empty() || metric.is_empty() {
            return None;
        }
        Some((source.to_string(), metric.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DEFAULT_PATTERN;

    #[test]
    fn test_default_pattern_splits_on_first_separator() {
        let pattern = SourcePattern::new(DEFAULT_PATTERN).unwrap();
        assert_eq!(
            pattern.split("web1.cpu.user"),
            Some(("web1".to_string(), "cpu.user".to_string()))
        );
        assert_eq!(
            pattern.split("web1/disk/sda.rrd"),
            Some(("web1".to_string(), "disk/sda.rrd".to_string()))
        );
        assert_eq!(pattern.split("lonely"), None);
    }

    #[test]
    fn test_custom_pattern() {
        let pattern = SourcePattern::new(r"^collectd\.(?P<source>[^.]+)\.(?P<metric>.+)$").unwrap();
        assert_eq!(
            pattern.split("collectd.web1.load.shortterm"),
            Some(("web1".to_string(), "load.shortterm".to_string()))
        );
        assert_eq!(pattern.split("statsd.web1.load"), None);
    }

    #[test]
    fn test_invalid_regex() {
        assert!(matches!(SourcePattern::new("(unclosed"), Err(ConnectorError::Pattern(_))));
    }

    #[test]
    fn test_missing_metric_group() {
        let err = SourcePattern::new(r"^(?P<source>.+)$").unwrap_err();
        assert!(err.to_string().contains("metric"));
    }
}
