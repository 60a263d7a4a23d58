use std::time::Instant;

use serde::Serialize;
use sysinfo::{Components, Disks, Networks, System};

/// Host gauges attached to each heartbeat row and the UI snapshot.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct ResourceGauges {
    pub cpu_pct: Option<f64>,
    pub ram_pct: Option<f64>,
    pub disk_pct: Option<f64>,
    pub net_rx_bps: Option<f64>,
    pub net_tx_bps: Option<f64>,
    pub temp_c: Option<f64>,
    pub uptime_seconds: f64,
}

pub struct ResourceMonitor {
    system: System,
    disks: Disks,
    networks: Networks,
    components: Components,
    started: Instant,
    last_totals: Option<(u64, u64, Instant)>,
}

impl ResourceMonitor {
    pub fn new() -> Self {
        Self {
            system: System::new(),
            disks: Disks::new_with_refreshed_list(),
            networks: Networks::new_with_refreshed_list(),
            components: Components::new_with_refreshed_list(),
            started: Instant::now(),
            last_totals: None,
        }
    }

    pub fn snapshot(&mut self) -> ResourceGauges {
        self.system.refresh_cpu();
        self.system.refresh_memory();
        self.disks.refresh();
        self.networks.refresh();
        self.components.refresh();

        let cpu_pct = Some(self.system.global_cpu_info().cpu_usage() as f64);

        let total_mem = self.system.total_memory();
        let ram_pct = if total_mem > 0 {
            Some(self.system.used_memory() as f64 / total_mem as f64 * 100.0)
        } else {
            None
        };

        let (total_disk, avail_disk) = self
            .disks
            .iter()
            .fold((0u64, 0u64), |(t, a), d| (t + d.total_space(), a + d.available_space()));
        let disk_pct = if total_disk > 0 {
            Some((total_disk - avail_disk) as f64 / total_disk as f64 * 100.0)
        } else {
            None
        };

        let now = Instant::now();
        let (rx_total, tx_total) = self.networks.iter().fold((0u64, 0u64), |(rx, tx), (_, data)| {
            (rx + data.total_received(), tx + data.total_transmitted())
        });
        let (net_rx_bps, net_tx_bps) = match self.last_totals {
            Some((last_rx, last_tx, last_t)) => {
                let dt = now.duration_since(last_t).as_secs_f64().max(1e-6);
                (
                    Some(rx_total.saturating_sub(last_rx) as f64 / dt),
                    Some(tx_total.saturating_sub(last_tx) as f64 / dt),
                )
            }
            None => (None, None),
        };
        self.last_totals = Some((rx_total, tx_total, now));

        // Best available temperature sensor, if the host exposes any.
        let temp_c = self
            .components
            .iter()
            .map(|c| c.temperature() as f64)
            .filter(|t| t.is_finite() && *t > 0.0)
            .fold(None, |best: Option<f64>, t| Some(best.map_or(t, |b| b.max(t))));

        ResourceGauges {
            cpu_pct,
            ram_pct,
            disk_pct,
            net_rx_bps,
            net_tx_bps,
            temp_c,
            uptime_seconds: self.started.elapsed().as_secs_f64(),
        }
    }
}

impl Default for ResourceMonitor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_produces_sane_gauges() {
        let mut monitor = ResourceMonitor::new();
        let first = monitor.snapshot();
        assert!(first.net_rx_bps.is_none(), "no rate on first sample");

        let second = monitor.snapshot();
        if let Some(ram) = second.ram_pct {
            assert!((0.0..=100.0).contains(&ram));
        }
        if let Some(disk) = second.disk_pct {
            assert!((0.0..=100.0).contains(&disk));
        }
        assert!(second.uptime_seconds >= first.uptime_seconds);
    }
}
