use std::time::SystemTime;

pub struct Timestamp;

impl Timestamp {
    /// Milliseconds since UNIX epoch, used to stamp received inputs for
    /// the connection-quality watcher.
    pub fn now_ms() -> u64 {
        SystemTime::now()
            .duration_since(SystemTime::UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0)
    }
}
