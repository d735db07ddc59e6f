//! Network time source

/// Seconds since the Unix epoch, as agreed with the network
pub trait NetworkClock: Send + Sync {
    fn now(&self) -> u32;
}

/// Local system time
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl NetworkClock for SystemClock {
    fn now(&self) -> u32 {
        chrono::Utc::now().timestamp().clamp(0, u32::MAX as i64) as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_clock_is_recent() {
        // 2020-01-01
        assert!(SystemClock.now() > 1_577_836_800);
    }
}
