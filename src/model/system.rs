use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

// --- Host payloads ---

/// System info as the host sends it: nested sections, byte totals for network.
#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
pub struct SystemInfoPayload {
    #[serde(default)]
    pub hostname: String,
    #[serde(default)]
    pub platform: String,
    #[serde(default)]
    pub uptime: u64, // seconds
    #[serde(default)]
    pub cpu: CpuPayload,
    #[serde(default)]
    pub memory: MemoryPayload,
    #[serde(default)]
    pub summary: SummaryPayload,
    #[serde(default)]
    pub networks: Vec<NetworkPayload>,
    /// Some hosts precompute rates; when present they win over byte-total deltas.
    #[serde(default)]
    pub network_rates: Option<NetworkRates>,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
pub struct CpuPayload {
    #[serde(default)]
    pub percent: f64,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
pub struct MemoryPayload {
    #[serde(default)]
    pub percent: f64,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
pub struct SummaryPayload {
    #[serde(default)]
    pub disk_usage_percent: f64,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
pub struct NetworkPayload {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub bytes_sent: u64,
    #[serde(default)]
    pub bytes_recv: u64,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct NetworkRates {
    pub rx_rate: f64,
    pub tx_rate: f64,
}

impl SystemInfoPayload {
    pub fn network_totals(&self) -> (u64, u64) {
        self.networks.iter().fold((0, 0), |(rx, tx), n| {
            (rx.saturating_add(n.bytes_recv), tx.saturating_add(n.bytes_sent))
        })
    }
}

/// Point-in-time system metrics, flattened for the store.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SystemMetricsSnapshot {
    pub timestamp: DateTime<Utc>,
    pub hostname: String,
    pub platform: String,
    pub uptime_secs: u64,
    pub cpu_percent: f64,
    pub memory_percent: f64,
    pub disk_percent: f64,
    pub network_rx_rate: f64, // bytes/sec
    pub network_tx_rate: f64,
}

/// Turns cumulative interface byte counters into per-second rates.
#[derive(Debug, Default)]
pub struct NetworkRateTracker {
    prev: Option<(Instant, u64, u64)>,
}

impl NetworkRateTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rates since the previous sample. The first sample, or a counter reset,
    /// yields zero.
    pub fn rates(&mut self, now: Instant, rx_total: u64, tx_total: u64) -> NetworkRates {
        let rates = match self.prev {
            Some((prev_time, prev_rx, prev_tx)) => {
                let secs = now.duration_since(prev_time).as_secs_f64();
                if secs > 0.0 {
                    NetworkRates {
                        rx_rate: rx_total.saturating_sub(prev_rx) as f64 / secs,
                        tx_rate: tx_total.saturating_sub(prev_tx) as f64 / secs,
                    }
                } else {
                    NetworkRates::default()
                }
            }
            None => NetworkRates::default(),
        };
        self.prev = Some((now, rx_total, tx_total));
        rates
    }

    pub fn snapshot(&mut self, payload: SystemInfoPayload, now: Instant) -> SystemMetricsSnapshot {
        let (rx_total, tx_total) = payload.network_totals();
        let derived = self.rates(now, rx_total, tx_total);
        let rates = payload.network_rates.unwrap_or(derived);
        SystemMetricsSnapshot {
            timestamp: Utc::now(),
            hostname: payload.hostname,
            platform: payload.platform,
            uptime_secs: payload.uptime,
            cpu_percent: payload.cpu.percent,
            memory_percent: payload.memory.percent,
            disk_percent: payload.summary.disk_usage_percent,
            network_rx_rate: rates.rx_rate,
            network_tx_rate: rates.tx_rate,
        }
    }
}

/// Row of `GET /system/processes`.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ProcessInfo {
    pub pid: u32,
    pub name: String,
    #[serde(default)]
    pub cpu_percent: f64,
    #[serde(default)]
    pub memory_percent: f64,
    #[serde(default)]
    pub memory_rss: u64,
    #[serde(default)]
    pub status: String,
}

// --- Time series ---

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
pub enum MetricDomain {
    Cpu,
    Memory,
    Disk,
    Network,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub enum MetricValue {
    Percent(f64),
    Throughput { rx: f64, tx: f64 },
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct MetricSample {
    pub at: DateTime<Utc>,
    pub value: MetricValue,
}

/// Fixed-capacity buffer; pushing into a full buffer evicts the oldest entry.
#[derive(Clone, Debug)]
pub struct RingBuffer<T> {
    items: VecDeque<T>,
    capacity: usize,
}

impl<T> RingBuffer<T> {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            items: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, item: T) {
        while self.items.len() >= self.capacity {
            self.items.pop_front();
        }
        self.items.push_back(item);
    }

    /// Oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.items.iter()
    }

    pub fn latest(&self) -> Option<&T> {
        self.items.back()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

/// Per-domain chart history.
#[derive(Clone, Debug)]
pub struct MetricsHistory {
    cpu: RingBuffer<MetricSample>,
    memory: RingBuffer<MetricSample>,
    disk: RingBuffer<MetricSample>,
    network: RingBuffer<MetricSample>,
}

impl MetricsHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            cpu: RingBuffer::new(capacity),
            memory: RingBuffer::new(capacity),
            disk: RingBuffer::new(capacity),
            network: RingBuffer::new(capacity),
        }
    }

    pub fn push(&mut self, domain: MetricDomain, sample: MetricSample) {
        self.series_mut(domain).push(sample);
    }

    /// Append one sample per domain from a system snapshot.
    pub fn record(&mut self, snapshot: &SystemMetricsSnapshot) {
        let at = snapshot.timestamp;
        self.cpu.push(MetricSample { at, value: MetricValue::Percent(snapshot.cpu_percent) });
        self.memory.push(MetricSample { at, value: MetricValue::Percent(snapshot.memory_percent) });
        self.disk.push(MetricSample { at, value: MetricValue::Percent(snapshot.disk_percent) });
        self.network.push(MetricSample {
            at,
            value: MetricValue::Throughput {
                rx: snapshot.network_rx_rate,
                tx: snapshot.network_tx_rate,
            },
        });
    }

    pub fn series(&self, domain: MetricDomain) -> &RingBuffer<MetricSample> {
        match domain {
            MetricDomain::Cpu => &self.cpu,
            MetricDomain::Memory => &self.memory,
            MetricDomain::Disk => &self.disk,
            MetricDomain::Network => &self.network,
        }
    }

    fn series_mut(&mut self, domain: MetricDomain) -> &mut RingBuffer<MetricSample> {
        match domain {
            MetricDomain::Cpu => &mut self.cpu,
            MetricDomain::Memory => &mut self.memory,
            MetricDomain::Disk => &mut self.disk,
            MetricDomain::Network => &mut self.network,
        }
    }
}
