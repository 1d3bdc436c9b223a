use serde::{Deserialize, Serialize};

/// How the snapshot orders its connections
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortMode {
    /// Largest cumulative byte count first
    Total,
    /// Largest current throughput first
    #[default]
    Speed,
}

/// One observed process for a single sampling tick.
///
/// Samples are rebuilt from scratch every tick and never mutated afterwards.
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionSample {
    /// Identity key (the process name reported by the accounting utility)
    pub id: String,
    pub pid: Option<i32>,
    pub process_name: String,
    pub bytes_in: u64,  // cumulative
    pub bytes_out: u64, // cumulative
    pub speed_in: f64,  // bytes per second
    pub speed_out: f64, // bytes per second
    pub is_paused: bool,
}

impl ConnectionSample {
    pub fn total_bytes(&self) -> u64 {
        self.bytes_in.saturating_add(self.bytes_out)
    }

    pub fn current_speed(&self) -> f64 {
        self.speed_in + self.speed_out
    }

    pub fn format_rate(bytes_per_sec: f64) -> String {
        let bytes_per_sec = bytes_per_sec.max(0.0);
        if bytes_per_sec < 1024.0 {
            format!("{:.0} B/s", bytes_per_sec)
        } else if bytes_per_sec < 1024.0 * 1024.0 {
            format!("{:.1} KB/s", bytes_per_sec / 1024.0)
        } else if bytes_per_sec < 1024.0 * 1024.0 * 1024.0 {
            format!("{:.1} MB/s", bytes_per_sec / (1024.0 * 1024.0))
        } else {
            format!("{:.1} GB/s", bytes_per_sec / (1024.0 * 1024.0 * 1024.0))
        }
    }

    pub fn format_bytes(bytes: u64) -> String {
        if bytes < 1024 {
            format!("{} B", bytes)
        } else if bytes < 1024 * 1024 {
            format!("{:.1} KB", bytes as f64 / 1024.0)
        } else if bytes < 1024 * 1024 * 1024 {
            format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
        } else {
            format!("{:.1} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
        }
    }
}

/// The result of one successful tick
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrafficSnapshot {
    pub connections: Vec<ConnectionSample>,
    pub total_in: u64,
    pub total_out: u64,
}

impl TrafficSnapshot {
    /// Returns the connections ordered for display
    pub fn sorted(&self, mode: SortMode) -> Vec<ConnectionSample> {
        let mut connections = self.connections.clone();
        match mode {
            SortMode::Total => connections.sort_by(|a, b| b.total_bytes().cmp(&a.total_bytes())),
            SortMode::Speed => connections.sort_by(|a, b| {
                b.current_speed()
                    .partial_cmp(&a.current_speed())
                    .unwrap_or(std::cmp::Ordering::Equal)
            }),
        }
        connections
    }

    /// Marks every connection whose pid is in `paused` as paused
    pub fn with_paused(mut self, paused: impl Fn(i32) -> bool) -> Self {
        for conn in &mut self.connections {
            conn.is_paused = conn.pid.is_some_and(&paused);
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(id: &str, bytes_in: u64, speed_in: f64) -> ConnectionSample {
        ConnectionSample {
            id: id.to_string(),
            pid: Some(100),
            process_name: id.to_string(),
            bytes_in,
            bytes_out: 0,
            speed_in,
            speed_out: 0.0,
            is_paused: false,
        }
    }

    #[test]
    fn test_sort_modes() {
        let snapshot = TrafficSnapshot {
            connections: vec![sample("big", 9000, 1.0), sample("fast", 10, 5000.0)],
            total_in: 9010,
            total_out: 0,
        };

        assert_eq!(snapshot.sorted(SortMode::Total)[0].id, "big");
        assert_eq!(snapshot.sorted(SortMode::Speed)[0].id, "fast");
    }

    #[test]
    fn test_format_rate() {
        assert_eq!(ConnectionSample::format_rate(512.0), "512 B/s");
        assert_eq!(ConnectionSample::format_rate(10240.0), "10.0 KB/s");
        assert_eq!(ConnectionSample::format_bytes(3 * 1024 * 1024), "3.0 MB");
    }
}
