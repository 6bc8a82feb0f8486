//! Prometheus metrics for monitoring
//!
//! Exposes metrics for:
//! - Transactions broadcast, mined and confirmed
//! - Failures by stage
//! - RPC endpoint failovers

use crate::error::{SubmitError, SubmitResult};

use lazy_static::lazy_static;
use prometheus::{
    register_counter_vec, register_histogram_vec, CounterVec, Encoder, HistogramVec, TextEncoder,
};

lazy_static! {
    // Transaction metrics
    pub static ref TX_SUBMITTED: CounterVec = register_counter_vec!(
        "contract_exec_transactions_submitted_total",
        "Transactions accepted by the node",
        &["chain_id", "tx_type"]
    ).unwrap();

    pub static ref TX_RECEIPTS: CounterVec = register_counter_vec!(
        "contract_exec_transaction_receipts_total",
        "Receipts received, by execution status",
        &["chain_id", "status"]
    ).unwrap();

    pub static ref TX_CONFIRMED: CounterVec = register_counter_vec!(
        "contract_exec_transactions_confirmed_total",
        "Transactions that reached their first confirmation",
        &["chain_id"]
    ).unwrap();

    pub static ref TX_FAILED: CounterVec = register_counter_vec!(
        "contract_exec_transactions_failed_total",
        "Submissions that failed, by stage",
        &["chain_id", "stage"]
    ).unwrap();

    pub static ref TX_LATENCY: HistogramVec = register_histogram_vec!(
        "contract_exec_transaction_latency_seconds",
        "Time from broadcast to receipt",
        &["chain_id"],
        vec![0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0, 750.0]
    ).unwrap();

    // RPC metrics
    pub static ref RPC_FAILOVERS: CounterVec = register_counter_vec!(
        "contract_exec_rpc_failovers_total",
        "Switches to the next RPC endpoint",
        &["chain_id"]
    ).unwrap();
}

/// Render every registered metric in the Prometheus text format
pub fn render() -> SubmitResult<String> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| SubmitError::Internal(format!("Failed to encode metrics: {}", e)))?;
    String::from_utf8(buffer)
        .map_err(|e| SubmitError::Internal(format!("Metrics output is not UTF-8: {}", e)))
}

// Helper functions to record metrics

pub fn record_tx_submitted(chain_id: u64, tx_type: &str) {
    TX_SUBMITTED
        .with_label_values(&[&chain_id.to_string(), tx_type])
        .inc();
}

pub fn record_receipt(chain_id: u64, succeeded: bool) {
    let status = if succeeded { "success" } else { "reverted" };
    TX_RECEIPTS
        .with_label_values(&[&chain_id.to_string(), status])
        .inc();
}

pub fn record_tx_confirmed(chain_id: u64) {
    TX_CONFIRMED
        .with_label_values(&[&chain_id.to_string()])
        .inc();
}

pub fn record_tx_failed(chain_id: u64, stage: &str) {
    TX_FAILED
        .with_label_values(&[&chain_id.to_string(), stage])
        .inc();
}

pub fn record_tx_latency(chain_id: u64, latency_secs: f64) {
    TX_LATENCY
        .with_label_values(&[&chain_id.to_string()])
        .observe(latency_secs);
}

pub fn record_rpc_failover(chain_id: u64) {
    RPC_FAILOVERS
        .with_label_values(&[&chain_id.to_string()])
        .inc();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recorded_metrics_show_up_in_render() {
        record_tx_submitted(424_242, "legacy");
        record_tx_failed(424_242, "broadcast");
        record_receipt(424_242, false);

        let output = render().unwrap();
        assert!(output.contains("contract_exec_transactions_submitted_total"));
        assert!(output.contains("chain_id=\"424242\""));
        assert!(output.contains("stage=\"broadcast\""));
        assert!(output.contains("status=\"reverted\""));
    }

    #[test]
    fn failed_counter_is_per_stage() {
        let before = TX_FAILED.with_label_values(&["515151", "nonce"]).get();
        record_tx_failed(515_151, "nonce");
        record_tx_failed(515_151, "nonce");
        record_tx_failed(515_151, "signing");

        assert_eq!(TX_FAILED.with_label_values(&["515151", "nonce"]).get(), before + 2.0);
        assert_eq!(TX_FAILED.with_label_values(&["515151", "signing"]).get(), 1.0);
    }
}
