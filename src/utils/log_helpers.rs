use tracing::{error, info, warn};

/// Shortens long payloads for log lines, on a char boundary.
pub fn truncate_log(value: &str, max_len: usize) -> String {
    if value.len() <= max_len {
        return value.to_string();
    }
    let cut = value
        .char_indices()
        .map(|(idx, _)| idx)
        .take_while(|idx| *idx <= max_len)
        .last()
        .unwrap_or(0);
    format!("{}...[truncated]", &value[..cut])
}

pub fn log_turn_begin(session_id: &str, structured: bool, history_len: usize) {
    info!(
        "[AGENT] turn begin: session={}, structured={}, history={}",
        session_id, structured, history_len
    );
}

pub fn log_tool_result(tool: &str, success: bool, detail: &str) {
    if success {
        info!("[TOOL] {} succeeded", tool);
    } else {
        warn!("[TOOL] {} failed: {}", tool, truncate_log(detail, 500));
    }
}

pub fn log_turn_error(session_id: &str, err: &str) {
    error!("[AGENT] turn error: session={}, error={}", session_id, err);
}

#[cfg(test)]
mod tests {
    use super::truncate_log;

    #[test]
    fn keeps_short_values_and_cuts_long_ones() {
        assert_eq!(truncate_log("abc", 10), "abc");
        assert_eq!(truncate_log("abcdef", 3), "abc...[truncated]");
        let korean = "스타일러".repeat(10);
        assert!(truncate_log(&korean, 10).ends_with("[truncated]"));
    }
}
