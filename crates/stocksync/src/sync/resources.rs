//! Host resource sampling for dispatch admission control.

use std::sync::Mutex;

use serde::Serialize;

/// CPU and memory usage, both in percent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct ResourceUsage {
    pub cpu_percent: f64,
    pub memory_percent: f64,
}

impl ResourceUsage {
    pub fn exceeds(&self, cpu_ceiling: f64, memory_ceiling: f64) -> bool {
        self.cpu_percent > cpu_ceiling || self.memory_percent > memory_ceiling
    }
}

/// Source of resource samples.
pub trait ResourceProbe: Send + Sync {
    fn sample(&self) -> ResourceUsage;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct CpuTimes {
    idle: u64,
    total: u64,
}

/// Samples `/proc/stat` and `/proc/meminfo`.
///
/// CPU usage is the busy share since the previous sample, so the first sample
/// reports 0%. Hosts without procfs always report zero usage.
#[derive(Debug, Default)]
pub struct SystemProbe {
    last_cpu: Mutex<Option<CpuTimes>>,
}

impl SystemProbe {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ResourceProbe for SystemProbe {
    fn sample(&self) -> ResourceUsage {
        let cpu_percent = std::fs::read_to_string("/proc/stat")
            .ok()
            .and_then(|s| parse_cpu_times(&s))
            .map_or(0.0, |now| {
                let mut last = self.last_cpu.lock().unwrap_or_else(|e| e.into_inner());
                let usage = last.map_or(0.0, |prev| cpu_busy_percent(prev, now));
                *last = Some(now);
                usage
            });

        let memory_percent = std::fs::read_to_string("/proc/meminfo")
            .ok()
            .and_then(|s| parse_memory_percent(&s))
            .unwrap_or(0.0);

        ResourceUsage {
            cpu_percent,
            memory_percent,
        }
    }
}

fn parse_cpu_times(stat: &str) -> Option<CpuTimes> {
    let line = stat.lines().find(|l| l.starts_with("cpu "))?;
    let fields: Vec<u64> = line
        .split_whitespace()
        .skip(1)
        .filter_map(|f| f.parse().ok())
        .collect();
    if fields.len() < 4 {
        return None;
    }
    // idle + iowait
    let idle = fields[3] + fields.get(4).copied().unwrap_or(0);
    Some(CpuTimes {
        idle,
        total: fields.iter().sum(),
    })
}

fn cpu_busy_percent(prev: CpuTimes, now: CpuTimes) -> f64 {
    let total = now.total.saturating_sub(prev.total);
    if total == 0 {
        return 0.0;
    }
    let idle = now.idle.saturating_sub(prev.idle).min(total);
    (total - idle) as f64 / total as f64 * 100.0
}

fn parse_memory_percent(meminfo: &str) -> Option<f64> {
    let field = |name: &str| -> Option<u64> {
        meminfo
            .lines()
            .find(|l| l.starts_with(name))?
            .split_whitespace()
            .nth(1)?
            .parse()
            .ok()
    };
    let total = field("MemTotal:")?;
    let available = field("MemAvailable:")?;
    if total == 0 {
        return None;
    }
    Some(total.saturating_sub(available) as f64 / total as f64 * 100.0)
}

/// Probe returning a settable value.
#[derive(Debug, Default)]
pub struct FixedProbe {
    usage: Mutex<ResourceUsage>,
}

impl FixedProbe {
    pub fn new(usage: ResourceUsage) -> Self {
        Self {
            usage: Mutex::new(usage),
        }
    }

    pub fn set(&self, usage: ResourceUsage) {
        *self.usage.lock().unwrap_or_else(|e| e.into_inner()) = usage;
    }
}

impl ResourceProbe for FixedProbe {
    fn sample(&self) -> ResourceUsage {
        *self.usage.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_proc_stat_cpu_line() {
        let stat = "cpu  100 0 100 700 100 0 0 0 0 0\ncpu0 50 0 50 350 50 0 0 0 0 0\n";
        assert_eq!(
            parse_cpu_times(stat),
            Some(CpuTimes {
                idle: 800,
                total: 1000
            })
        );
    }

    #[test]
    fn cpu_percent_is_busy_share_of_delta() {
        let prev = CpuTimes {
            idle: 800,
            total: 1000,
        };
        let now = CpuTimes {
            idle: 850,
            total: 1200,
        };
        assert!((cpu_busy_percent(prev, now) - 75.0).abs() < 1e-9);
        assert_eq!(cpu_busy_percent(now, now), 0.0);
    }

    #[test]
    fn parses_meminfo() {
        let meminfo = "MemTotal:       16000000 kB\nMemFree:         1000000 kB\nMemAvailable:    4000000 kB\n";
        let percent = parse_memory_percent(meminfo).expect("percent");
        assert!((percent - 75.0).abs() < 1e-9);
        assert_eq!(parse_memory_percent("garbage"), None);
    }

    #[test]
    fn fixed_probe_reports_what_was_set() {
        let probe = FixedProbe::default();
        assert_eq!(probe.sample(), ResourceUsage::default());

        let busy = ResourceUsage {
            cpu_percent: 95.0,
            memory_percent: 10.0,
        };
        probe.set(busy);
        assert_eq!(probe.sample(), busy);
        assert!(busy.exceeds(90.0, 90.0));
    }

    #[test]
    fn system_probe_samples_are_in_range() {
        let probe = SystemProbe::new();
        for _ in 0..2 {
            let usage = probe.sample();
            assert!((0.0..=100.0).contains(&usage.cpu_percent));
            assert!((0.0..=100.0).contains(&usage.memory_percent));
        }
    }
}
