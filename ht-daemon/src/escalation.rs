//! Default escalation consumer
//!
//! Shutdown policy belongs to the platform lifecycle manager. Without one,
//! the daemon only records critical alerts in the log.

use ht_core::CriticalAlert;
use tokio::sync::mpsc;
use tracing::{debug, error};

/// Log every alert until all zones have dropped their senders
///
/// Returns the number of alerts seen.
pub async fn log_alerts(mut alerts: mpsc::Receiver<CriticalAlert>) -> u64 {
    let mut seen = 0;
    while let Some(alert) = alerts.recv().await {
        seen += 1;
        error!(
            zone = %alert.zone,
            temperature = alert.temperature,
            threshold = alert.threshold,
            "CRITICAL: zone above critical temperature, cooling forced to maximum"
        );
    }
    debug!(alerts = seen, "Escalation channel closed");
    seen
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::SystemTime;

    fn alert(zone: &str) -> CriticalAlert {
        CriticalAlert {
            zone: zone.to_string(),
            temperature: 101.0,
            threshold: 95.0,
            at: SystemTime::now(),
        }
    }

    #[tokio::test]
    async fn test_consumer_drains_until_closed() {
        let (tx, rx) = mpsc::channel(4);
        tx.send(alert("cpu")).await.unwrap();
        tx.send(alert("vrm")).await.unwrap();
        drop(tx);
        assert_eq!(log_alerts(rx).await, 2);
    }
}
