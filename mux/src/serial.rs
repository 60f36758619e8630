use std::time::{SystemTime, UNIX_EPOCH};

/// A monotonically non-decreasing value used to tag input events so that
/// consumers can order/dedup them. Backed by milliseconds-since-epoch,
/// nudged forward by one on collision so it stays strictly increasing
/// even when the clock doesn't.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct InputSerial(u64);

impl InputSerial {
    pub fn now() -> Self {
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        Self(millis)
    }
}

impl From<InputSerial> for u64 {
    fn from(serial: InputSerial) -> u64 {
        serial.0
    }
}
