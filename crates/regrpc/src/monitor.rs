//! # Call Monitor
//!
//! Every outbound call produces exactly one `MonitorRecord`: where it went,
//! how long it took and how it ended. Failed calls are logged at error level.
//! Successful calls are logged at debug level and, when they exceed the slow
//! threshold, appended to the slow-call log.

use std::sync::Arc;
use std::time::Duration;
use std::time::Instant;

use serde::Serialize;
use tracing::debug;
use tracing::error;
use wirerpc::Payload;

use crate::resolver::RpcAddress;
use crate::slowlog::SlowLog;

/// Outcome of one outbound call.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct MonitorRecord {
    pub registry_host: String,
    pub rpc_host: String,
    pub rpc_port: u16,
    pub protocol: String,
    pub agent_id: String,
    pub service_name: String,
    pub method_name: String,
    /// Unix milliseconds at which the call started.
    pub begin_time: i64,
    /// Milliseconds from start to completion.
    pub cost_time: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Set only when closing failed after the call itself had already failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub close_error: Option<String>,
}

impl MonitorRecord {
    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

/// A call that has started but not finished.
#[derive(Debug)]
pub struct InFlight {
    record: MonitorRecord,
    started: Instant,
}

impl InFlight {
    /// Records the endpoint the call was resolved to.
    pub fn set_address(&mut self, addr: &RpcAddress) {
        self.record.rpc_host = addr.host.clone();
        self.record.rpc_port = addr.port;
        self.record.protocol = addr.protocol.clone();
        self.record.agent_id = addr.agent_id.clone();
    }
}

#[derive(Clone, Debug)]
pub struct Monitor {
    registry_host: String,
    slow: Option<(Duration, Arc<SlowLog>)>,
}

impl Monitor {
    /// A monitor that logs calls but keeps no slow-call log.
    pub fn new(registry_host: impl Into<String>) -> Self {
        Self {
            registry_host: registry_host.into(),
            slow: None,
        }
    }

    /// Appends successful calls slower than `threshold` to `log`.
    pub fn with_slow_log(mut self, threshold: Duration, log: Arc<SlowLog>) -> Self {
        self.slow = Some((threshold, log));
        self
    }

    pub fn slow_threshold(&self) -> Option<Duration> {
        self.slow.as_ref().map(|(threshold, _)| *threshold)
    }

    pub fn start(&self, service: &str, method: &str) -> InFlight {
        InFlight {
            record: MonitorRecord {
                registry_host: self.registry_host.clone(),
                service_name: service.to_string(),
                method_name: method.to_string(),
                begin_time: chrono::Utc::now().timestamp_millis(),
                ..MonitorRecord::default()
            },
            started: Instant::now(),
        }
    }

    /// Closes out a call and emits its record.
    pub fn finish(
        &self,
        call: InFlight,
        error: Option<String>,
        close_error: Option<String>,
        request: &Payload,
        response: Option<&Payload>,
    ) -> MonitorRecord {
        let elapsed = call.started.elapsed();
        let mut record = call.record;
        record.cost_time = elapsed.as_millis() as u64;
        record.error = error;
        record.close_error = close_error;

        let encoded = serde_json::to_string(&record).unwrap_or_default();
        if record.is_error() {
            error!(target: "regrpc::monitor", record = %encoded, "rpc call failed");
            return record;
        }
        debug!(target: "regrpc::monitor", record = %encoded, "rpc call completed");

        if let Some((threshold, log)) = &self.slow {
            if elapsed > *threshold {
                log.write(&record, request, response);
            }
        }
        record
    }
}
