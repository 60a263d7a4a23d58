use std::time::Duration;

use crate::engine::SharedSnapshot;

/// Headless-friendly status renderer: prints one compact snapshot line per
/// refresh tick. Reads only the published snapshot, never engine internals.
pub async fn run_status_loop(snapshot: SharedSnapshot, refresh_hz: f64) {
    let period = Duration::from_secs_f64(1.0 / refresh_hz.clamp(0.1, 30.0));
    let mut ticker = tokio::time::interval(period);
    loop {
        ticker.tick().await;
        let snap = snapshot.read().await.clone();

        let state = if !snap.connected {
            "CONNECTING"
        } else if snap.paused {
            "PAUSED"
        } else {
            "RUNNING"
        };
        let top: Vec<String> = snap
            .top_ranked
            .iter()
            .take(5)
            .map(|r| format!("{}:{:.2}", r.symbol, r.score))
            .collect();
        let pnl = snap
            .today_pnl
            .map(|p| format!("{:+.2}", p))
            .unwrap_or_else(|| "-".to_string());
        let latency = snap
            .last_cycle_latency_ms
            .map(|ms| format!("{:.0}ms", ms))
            .unwrap_or_else(|| "-".to_string());

        println!(
            "[{}] cycle={} latency={} top=[{}] positions={} pnl={} w/l={}/{}",
            state,
            snap.last_cycle_id.as_deref().unwrap_or("-"),
            latency,
            top.join(" "),
            snap.open_positions.len(),
            pnl,
            snap.wins,
            snap.losses,
        );
        if let Some(err) = snap.last_errors.first() {
            println!("  last error: {}", err);
        }
    }
}
