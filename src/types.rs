// src/types.rs
use std::net::SocketAddr;
use crate::commands::DeviceCommand;
use crate::drivers::{ChannelFrame, FilterKind};
use crate::listeners::ListenerKind;
// front end -> engine
#[derive(Clone, Debug, PartialEq)]
pub enum ControlCommand {
    /// Listen on the data socket and send `start`.
    StartStream,
    /// Stop listening and send `stop`.
    StopStream,
    // listening only, nothing goes to the device
    PauseDisplay,
    ResumeDisplay,
    SetSampleRate(f64),
    SetTimeRange(f64),
    SetFilters(Vec<FilterKind>),
    ClearData,
    Device(DeviceCommand),
    Shutdown,
}
// engine -> front end
#[derive(Clone, Debug)]
pub enum AcqMessage {
    Ready {
        data_addr: Option<SocketAddr>,
        msg_addr: SocketAddr,
    },
    Frame(ChannelFrame),
    /// Text printed by the acquisition server.
    Console(String),
    /// The data listener acknowledged a start (`true`) or stop (`false`).
    Status(bool),
    Reconfigured {
        sample_rate_hz: f64,
        time_range_s: f64,
        threshold_bytes: usize,
    },
    ListenerFailed {
        kind: ListenerKind,
        error: String,
    },
    Log(String),
    Stopped,
}
