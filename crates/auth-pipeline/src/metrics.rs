//! Pipeline metrics
//!
//! Counters emitted through the `metrics` facade. Without an installed
//! recorder every call is a no-op, so library users pay nothing unless the
//! host wires up an exporter.
//!
//! - `auth_requests_total` (counter): label `outcome`
//! - `auth_refresh_total` (counter): label `outcome`
//! - `auth_replays_total` (counter): label `result`
//! - `auth_session_terminations_total` (counter): label `reason`

/// Record a finished pipeline request.
pub fn record_request(outcome: &'static str) {
    metrics::counter!("auth_requests_total", "outcome" => outcome).increment(1);
}

/// Record the end of a refresh call.
pub fn record_refresh(outcome: &'static str) {
    metrics::counter!("auth_refresh_total", "outcome" => outcome).increment(1);
}

/// Record a replay after a successful refresh.
pub fn record_replay(result: &'static str) {
    metrics::counter!("auth_replays_total", "result" => result).increment(1);
}

/// Record a session termination.
pub fn record_termination(reason: &'static str) {
    metrics::counter!("auth_session_terminations_total", "reason" => reason).increment(1);
}
