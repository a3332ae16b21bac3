pub struct LogEntry {
    pub tag: String,
    pub color: u8,
    pub message: String,
}

/// Parse a line in the loader's tagged format:
/// `\x1b[{color}m{tag:8}\x1b[0m: {message}`
///
/// Lines that don't match this pattern are treated as untagged.
pub fn parse_log_line(line: &str) -> LogEntry {
    if let Some(entry) = try_parse_tagged(line) {
        return entry;
    }

    LogEntry {
        tag: String::new(),
        color: 0,
        message: line.to_string(),
    }
}

fn try_parse_tagged(line: &str) -> Option<LogEntry> {
    let rest = line.strip_prefix("\x1b[")?;

    let m_pos = rest.find('m')?;
    let color: u8 = rest[..m_pos].parse().ok()?;
    let rest = &rest[m_pos + 1..];

    // tags are always padded to eight bytes
    let tag = rest.get(..8)?;
    let rest = rest[8..].strip_prefix("\x1b[0m")?;
    let message = rest.strip_prefix(": ")?;

    Some(LogEntry {
        tag: tag.trim_end().to_string(),
        color,
        message: message.to_string(),
    })
}
