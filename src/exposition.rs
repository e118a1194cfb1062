//! Line-oriented metrics exposition parsing.
//!
//! Producers expose a text document where every non-comment line is a
//! series key followed by whitespace and a numeric value. Lookups match the
//! key by prefix and the first matching line wins.

use std::collections::BTreeMap;

/// One `key value` line of an exposition document
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample<'a> {
    /// Everything before the value (series name plus any label set)
    pub key: &'a str,
    pub value: f64,
}

/// Iterate the numeric samples of a document, skipping comments and lines
/// whose last token is not a number.
pub fn samples(text: &str) -> impl Iterator<Item = Sample<'_>> + '_ {
    text.lines().filter_map(parse_line)
}

fn parse_line(line: &str) -> Option<Sample<'_>> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return None;
    }

    let (key, value) = line.rsplit_once(char::is_whitespace)?;
    let value = value.parse::<f64>().ok()?;
    Some(Sample {
        key: key.trim_end(),
        value,
    })
}

/// Value of the first line starting with `key`, as a count.
///
/// Fractional values are truncated; negative or non-finite values are
/// rejected.
pub fn find_counter(text: &str, key: &str) -> Option<u64> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.starts_with('#') && line.starts_with(key))
        .find_map(parse_line)
        .and_then(|sample| to_count(sample.value))
}

/// All samples keyed by series, first occurrence wins.
pub fn sample_map(text: &str) -> BTreeMap<String, f64> {
    let mut map = BTreeMap::new();
    for sample in samples(text) {
        map.entry(sample.key.to_string()).or_insert(sample.value);
    }
    map
}

fn to_count(value: f64) -> Option<u64> {
    (value.is_finite() && value >= 0.0).then(|| value as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const DOCUMENT: &str = "\
# HELP logs_generated_total Total number of logs generated
# TYPE logs_generated_total counter
logs_generated_total 1234.0
logs_generated_created 1.7e9
logs_generated_total 99
log_processing_time_ms_sum 12.5
log_processing_time_ms_count 4
request_processing_time{route=\"/api\"} 3.25
garbage line here
";

    #[test]
    fn test_first_occurrence_wins() {
        assert_eq!(find_counter(DOCUMENT, "logs_generated_total"), Some(1234));
    }

    #[test]
    fn test_comment_lines_never_match() {
        let text = "# logs_generated_total 5\nlogs_generated_total 7\n";
        assert_eq!(find_counter(text, "logs_generated_total"), Some(7));
    }

    #[test]
    fn test_missing_counter() {
        assert_eq!(find_counter("other_total 3\n", "logs_generated_total"), None);
        assert_eq!(find_counter("", "logs_generated_total"), None);
    }

    #[test]
    fn test_scientific_notation_truncates() {
        assert_eq!(find_counter("logs_generated_total 1.5e3\n", "logs_generated_total"), Some(1500));
    }

    #[test]
    fn test_sample_map_keeps_labels_and_skips_garbage() {
        let map = sample_map(DOCUMENT);
        assert_eq!(map.get("logs_generated_total"), Some(&1234.0));
        assert_eq!(map.get("request_processing_time{route=\"/api\"}"), Some(&3.25));
        assert!(!map.contains_key("garbage line"));
        assert_eq!(map.len(), 5);
    }
}
