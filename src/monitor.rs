use crate::process::{ConnectionSample, TrafficSnapshot};
use std::collections::{BTreeMap, HashMap};
use std::time::{Duration, Instant};

/// Nominal tick period, also used as the elapsed time of the very first tick
pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_secs(2);

/// Process-name artifact emitted by nettop for its timestamp column
const TIME_SENTINEL: &str = "time";

/// Minimum number of comma-separated fields in a usable row
const MIN_FIELDS: usize = 6;

/// Per-process counters parsed from one listing, already aggregated by name
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedProcess {
    pub name: String,
    pub pid: Option<i32>,
    pub bytes_in: u64,
    pub bytes_out: u64,
}

/// One parsed listing
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedOutput {
    pub processes: Vec<ParsedProcess>,
    pub total_in: u64,
    pub total_out: u64,
}

/// Split a `<name>.<pid>` identity field.
///
/// The pid is the numeric suffix after the last `.`; when that suffix is not
/// numeric the whole field is the name and the pid is absent.
pub fn split_identity(field: &str) -> (&str, Option<i32>) {
    match field.rsplit_once('.') {
        Some((name, suffix)) => match suffix.parse::<i32>() {
            Ok(pid) => (name, Some(pid)),
            Err(_) => (field, None),
        },
        None => (field, None),
    }
}

/// Parse the CSV output of `nettop -L 1 -P`.
///
/// Format (first line is a header and is discarded):
/// ```text
/// time,,interface,state,bytes_in,bytes_out,...
/// 10:04:11.712345,Google Chrome H.5521,,,183220,41002,...
/// ```
/// Rows with fewer than six fields, an empty name, or the `time` artifact are
/// skipped. Rows sharing a name are summed.
pub fn parse_accounting_output(output: &str) -> ParsedOutput {
    let mut by_name: BTreeMap<String, ParsedProcess> = BTreeMap::new();
    let mut total_in = 0u64;
    let mut total_out = 0u64;

    for line in output.lines().skip(1) {
        let cols: Vec<&str> = line.split(',').collect();
        if cols.len() < MIN_FIELDS {
            log::trace!("Skipping short accounting row: {:?}", line);
            continue;
        }

        let (name, pid) = split_identity(cols[1].trim());
        if name.is_empty() || name == TIME_SENTINEL {
            continue;
        }

        let bytes_in = cols[4].trim().parse::<u64>().unwrap_or(0);
        let bytes_out = cols[5].trim().parse::<u64>().unwrap_or(0);

        let entry = by_name
            .entry(name.to_string())
            .or_insert_with(|| ParsedProcess {
                name: name.to_string(),
                pid,
                bytes_in: 0,
                bytes_out: 0,
            });
        entry.pid = pid.or(entry.pid);
        entry.bytes_in = entry.bytes_in.saturating_add(bytes_in);
        entry.bytes_out = entry.bytes_out.saturating_add(bytes_out);

        total_in = total_in.saturating_add(bytes_in);
        total_out = total_out.saturating_add(bytes_out);
    }

    ParsedOutput {
        processes: by_name.into_values().collect(),
        total_in,
        total_out,
    }
}

/// Turns successive accounting listings into throughput samples
pub struct TrafficSampler {
    /// Identity -> (bytes_in, bytes_out) from the previous successful tick
    previous: HashMap<String, (u64, u64)>,
    last_tick: Option<Instant>,
    nominal_interval: Duration,
}

impl TrafficSampler {
    pub fn new(nominal_interval: Duration) -> Self {
        Self {
            previous: HashMap::new(),
            last_tick: None,
            nominal_interval,
        }
    }

    /// Ingest one listing captured at `now` and produce the tick's snapshot.
    ///
    /// Only successful listings should be ingested; a failed tick leaves the
    /// previous counters and timestamp untouched.
    pub fn ingest(&mut self, output: &str, now: Instant) -> TrafficSnapshot {
        let parsed = parse_accounting_output(output);

        let elapsed = self
            .last_tick
            .map(|last| now.saturating_duration_since(last))
            .filter(|elapsed| !elapsed.is_zero())
            .unwrap_or(self.nominal_interval)
            .as_secs_f64();

        let connections = parsed
            .processes
            .iter()
            .map(|proc| {
                let (speed_in, speed_out) = match self.previous.get(&proc.name) {
                    Some(&(prev_in, prev_out)) => (
                        proc.bytes_in.saturating_sub(prev_in) as f64 / elapsed,
                        proc.bytes_out.saturating_sub(prev_out) as f64 / elapsed,
                    ),
                    None => (0.0, 0.0),
                };

                ConnectionSample {
                    id: proc.name.clone(),
                    pid: proc.pid,
                    process_name: proc.name.clone(),
                    bytes_in: proc.bytes_in,
                    bytes_out: proc.bytes_out,
                    speed_in,
                    speed_out,
                    is_paused: false,
                }
            })
            .collect();

        self.previous = parsed
            .processes
            .iter()
            .map(|proc| (proc.name.clone(), (proc.bytes_in, proc.bytes_out)))
            .collect();
        self.last_tick = Some(now);

        TrafficSnapshot {
            connections,
            total_in: parsed.total_in,
            total_out: parsed.total_out,
        }
    }
}

impl Default for TrafficSampler {
    fn default() -> Self {
        Self::new(DEFAULT_TICK_INTERVAL)
    }
}
