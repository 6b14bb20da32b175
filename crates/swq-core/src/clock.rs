pub fn now_ms() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    let dur = SystemTime::now().duration_since(UNIX_EPOCH).unwrap();
    dur.as_millis() as i64
}

pub const MS_PER_DAY: i64 = 86_400_000;
