// src/commands.rs
use std::fmt;
use std::str::FromStr;
/// Plain-text commands understood by the acquisition server.
///
/// Channel indices are zero-based here and sent one-based on the wire.
#[derive(Clone, Debug, PartialEq)]
pub enum DeviceCommand {
    Start,
    Stop,
    Stream,
    Record(String),
    Save(String),
    Pause,
    Resume,
    Tag(String),
    Reset,
    Kill,
    DrainCurrent { channel: usize, value: f64 },
    GateVoltage { channel: usize, value: f64 },
    SourceVoltage { channel: usize, value: f64 },
    /// Hardware sample period in microseconds.
    SamplePeriod(f64),
    Raw(String),
}
impl DeviceCommand {
    pub fn sample_period_for(sample_rate_hz: f64) -> Self {
        DeviceCommand::SamplePeriod(1e6 / sample_rate_hz)
    }
}
/// Shortest round-trip form, with `.0` kept on integral values.
fn number(value: f64) -> String {
    if value.is_finite() && value.fract() == 0.0 && value.abs() < 1e16 {
        format!("{value:.1}")
    } else {
        format!("{value}")
    }
}
impl fmt::Display for DeviceCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceCommand::Start => f.write_str("start"),
            DeviceCommand::Stop => f.write_str("stop"),
            DeviceCommand::Stream => f.write_str("stream"),
            DeviceCommand::Record(name) => write!(f, "rec {name}"),
            DeviceCommand::Save(name) => write!(f, "save {name}"),
            DeviceCommand::Pause => f.write_str("pause"),
            DeviceCommand::Resume => f.write_str("resume"),
            DeviceCommand::Tag(tag) => write!(f, "tag {tag}"),
            DeviceCommand::Reset => f.write_str("reset"),
            DeviceCommand::Kill => f.write_str("kill"),
            DeviceCommand::DrainCurrent { channel, value } => {
                write!(f, "id{} {}", channel + 1, number(*value))
            }
            DeviceCommand::GateVoltage { channel, value } => {
                write!(f, "vg{} {}", channel + 1, number(*value))
            }
            DeviceCommand::SourceVoltage { channel, value } => {
                write!(f, "vs{} {}", channel + 1, number(*value))
            }
            DeviceCommand::SamplePeriod(micros) => write!(f, "sT2 {}", number(*micros)),
            DeviceCommand::Raw(text) => f.write_str(text),
        }
    }
}
fn channel_setting(head: &str, prefix: &str, arg: Option<&str>) -> Option<(usize, f64)> {
    let channel: usize = head.strip_prefix(prefix)?.parse().ok()?;
    let value: f64 = arg?.trim().parse().ok()?;
    Some((channel.checked_sub(1)?, value))
}
impl FromStr for DeviceCommand {
    type Err = std::convert::Infallible;
    /// Unknown or malformed text is kept verbatim as [`DeviceCommand::Raw`].
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let text = s.trim();
        let (head, arg) = match text.split_once(' ') {
            Some((head, arg)) => (head, Some(arg)),
            None => (text, None),
        };
        let named = |ctor: fn(String) -> DeviceCommand| {
            arg.map(|a| ctor(a.trim().to_owned()))
                .unwrap_or_else(|| DeviceCommand::Raw(text.to_owned()))
        };
        let parsed = match head {
            "start" if arg.is_none() => DeviceCommand::Start,
            "stop" if arg.is_none() => DeviceCommand::Stop,
            "stream" if arg.is_none() => DeviceCommand::Stream,
            "pause" if arg.is_none() => DeviceCommand::Pause,
            "resume" if arg.is_none() => DeviceCommand::Resume,
            "reset" if arg.is_none() => DeviceCommand::Reset,
            "kill" if arg.is_none() => DeviceCommand::Kill,
            "rec" => named(DeviceCommand::Record),
            "save" => named(DeviceCommand::Save),
            "tag" => named(DeviceCommand::Tag),
            "sT2" => match arg.and_then(|a| a.trim().parse().ok()) {
                Some(micros) => DeviceCommand::SamplePeriod(micros),
                None => DeviceCommand::Raw(text.to_owned()),
            },
            _ => {
                if let Some((channel, value)) = channel_setting(head, "id", arg) {
                    DeviceCommand::DrainCurrent { channel, value }
                } else if let Some((channel, value)) = channel_setting(head, "vg", arg) {
                    DeviceCommand::GateVoltage { channel, value }
                } else if let Some((channel, value)) = channel_setting(head, "vs", arg) {
                    DeviceCommand::SourceVoltage { channel, value }
                } else {
                    DeviceCommand::Raw(text.to_owned())
                }
            }
        };
        Ok(parsed)
    }
}
