use std::collections::VecDeque;

/// Severity guessed from a log line's content.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    /// Classify a line by its markers. Lines without a marker count as info.
    pub fn detect(line: &str) -> LogLevel {
        let upper = line.to_uppercase();
        if upper.contains("ERROR") || upper.contains("FATAL") || upper.contains("CRIT") {
            LogLevel::Error
        } else if upper.contains("WARN") {
            LogLevel::Warn
        } else if upper.contains("DEBUG") || upper.contains("TRACE") {
            LogLevel::Debug
        } else {
            LogLevel::Info
        }
    }

    pub fn parse(s: &str) -> Option<LogLevel> {
        match s.to_lowercase().as_str() {
            "debug" | "trace" => Some(LogLevel::Debug),
            "info" => Some(LogLevel::Info),
            "warn" | "warning" => Some(LogLevel::Warn),
            "error" => Some(LogLevel::Error),
            _ => None,
        }
    }
}

/// Read-only view filter: case-insensitive search plus a minimum level.
#[derive(Clone, Debug, Default)]
pub struct LogFilter {
    pub query: String,
    pub min_level: Option<LogLevel>,
}

impl LogFilter {
    pub fn matches(&self, line: &str) -> bool {
        if let Some(min) = self.min_level {
            if LogLevel::detect(line) < min {
                return false;
            }
        }
        if self.query.is_empty() {
            return true;
        }
        line.to_lowercase().contains(&self.query.to_lowercase())
    }
}

/// Ordered log lines for one container, bounded by `max_lines`.
#[derive(Clone, Debug)]
pub struct LogBuffer {
    pub container_id: String,
    lines: VecDeque<String>,
    max_lines: usize,
}

impl LogBuffer {
    pub fn new(container_id: String, max_lines: usize) -> Self {
        let max_lines = max_lines.max(1);
        Self {
            container_id,
            lines: VecDeque::with_capacity(max_lines.min(5000)),
            max_lines,
        }
    }

    pub fn push_line(&mut self, line: String) {
        if self.lines.len() >= self.max_lines {
            self.lines.pop_front();
        }
        self.lines.push_back(line);
    }

    /// Append in received order. Duplicates are kept.
    pub fn extend<I: IntoIterator<Item = String>>(&mut self, lines: I) {
        for line in lines {
            self.push_line(line);
        }
    }

    pub fn lines(&self) -> impl Iterator<Item = &String> {
        self.lines.iter()
    }

    pub fn filtered<'a>(&'a self, filter: &'a LogFilter) -> impl Iterator<Item = &'a String> + 'a {
        self.lines.iter().filter(move |l| filter.matches(l))
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn max_lines(&self) -> usize {
        self.max_lines
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_buffer_caps_at_max_lines() {
        let mut buf = LogBuffer::new("abc123".into(), 100);
        for i in 0..110 {
            buf.push_line(format!("line {}", i));
        }
        assert_eq!(buf.len(), 100);
        assert_eq!(buf.lines().next(), Some(&"line 10".to_string()));
        assert_eq!(buf.lines().last(), Some(&"line 109".to_string()));
    }

    #[test]
    fn filtering_does_not_mutate_buffer() {
        let mut buf = LogBuffer::new("c".into(), 10);
        buf.extend(vec![
            "INFO starting".to_string(),
            "WARN disk almost full".to_string(),
            "ERROR connection refused".to_string(),
        ]);
        let filter = LogFilter {
            query: String::new(),
            min_level: Some(LogLevel::Warn),
        };
        assert_eq!(buf.filtered(&filter).count(), 2);

        let search = LogFilter {
            query: "CONNECTION".into(),
            min_level: None,
        };
        let hits: Vec<&String> = buf.filtered(&search).collect();
        assert_eq!(hits, vec!["ERROR connection refused"]);
        assert_eq!(buf.len(), 3);
    }

    #[test]
    fn duplicates_are_kept_in_order() {
        let mut buf = LogBuffer::new("c".into(), 10);
        buf.extend(vec!["a".to_string(), "a".to_string(), "b".to_string()]);
        let all: Vec<&String> = buf.lines().collect();
        assert_eq!(all, vec!["a", "a", "b"]);
    }

    #[test]
    fn level_detection_and_parse() {
        assert_eq!(LogLevel::detect("[warning] slow"), LogLevel::Warn);
        assert_eq!(LogLevel::detect("plain line"), LogLevel::Info);
        assert_eq!(LogLevel::parse("WARNING"), Some(LogLevel::Warn));
        assert_eq!(LogLevel::parse("loud"), None);
    }
}
