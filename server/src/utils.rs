use std::time::{Duration, SystemTime, UNIX_EPOCH};

// Get current timestamp in milliseconds
pub fn get_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::from_secs(0))
        .as_millis() as u64
}

// Trim and cap user text at `max_chars` characters
pub fn clean_text(raw: &str, max_chars: usize) -> String {
    raw.trim().chars().take(max_chars).collect()
}
