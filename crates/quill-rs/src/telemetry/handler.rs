//! Bridges driver events into the [`DebugSink`].

use std::sync::Arc;

use super::DebugSink;
use crate::agent::events::{DriverEvent, EventHandler};

/// Writes every raw request and response of a driver run to the debug sink,
/// tagged with the call number the session set via [`DebugSink::begin_call`].
pub struct DebugEventHandler {
    sink: Arc<DebugSink>,
}

impl DebugEventHandler {
    pub fn new(sink: Arc<DebugSink>) -> Self {
        Self { sink }
    }
}

impl EventHandler for DebugEventHandler {
    fn on_event(&self, event: &DriverEvent<'_>) {
        match event {
            DriverEvent::RequestSent {
                round,
                attempt,
                request,
            } => {
                self.sink
                    .log_raw_request(request, self.sink.current_call(), *round, *attempt);
            }
            DriverEvent::ResponseReceived {
                round,
                attempt,
                completion,
            } => {
                self.sink
                    .log_raw_response(completion, self.sink.current_call(), *round, *attempt);
            }
            _ => {}
        }
    }
}
