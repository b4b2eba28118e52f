// src/engine.rs
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use log::{debug, info, warn};
use crate::client::{CommandSink, DeviceClient};
use crate::commands::DeviceCommand;
use crate::config::AcquisitionConfig;
use crate::drivers::{
    AcqError, AcquisitionCore, ChannelBufferSet, ChannelFrame, FilterChain, FilterKind,
    PowerSpectrum, SampleDecoder, SpectrumBuilder,
};
use crate::listeners::{DataControl, ListenerEvent, ListenerKind};
use crate::types::{AcqMessage, ControlCommand};
const EVENT_WAIT: Duration = Duration::from_millis(10);
/// Owns the configuration and the decoded windows, and keeps the data
/// listener, the buffers and the device in step when settings change.
pub struct Controller<L> {
    config: AcquisitionConfig,
    link: L,
    core: AcquisitionCore,
    listening: bool,
}
impl<L: DataControl + CommandSink> Controller<L> {
    pub fn new(config: AcquisitionConfig, mut link: L) -> Result<Self, AcqError> {
        config.validate()?;
        let decoder = SampleDecoder::new(config.encoding_mode, config.scale_ua_per_unit);
        let mut buffers = ChannelBufferSet::new(
            config.channel_count,
            config.sample_rate_hz,
            config.time_range_s,
        )?;
        buffers.change_filters(FilterChain::from_kinds(config.sample_rate_hz, &config.filters)?);
        let core = AcquisitionCore::new(decoder, buffers)?;
        link.set_emit_threshold(config.emit_threshold_bytes(), config.reset_policy)?;
        Ok(Self {
            config,
            link,
            core,
            listening: false,
        })
    }
    pub fn config(&self) -> &AcquisitionConfig {
        &self.config
    }
    pub fn core(&self) -> &AcquisitionCore {
        &self.core
    }
    pub fn link(&self) -> &L {
        &self.link
    }
    pub fn link_mut(&mut self) -> &mut L {
        &mut self.link
    }
    pub fn is_listening(&self) -> bool {
        self.listening
    }
    pub fn start_stream(&mut self) -> Result<(), AcqError> {
        self.resume_display()?;
        self.link.send_command(&DeviceCommand::Start)
    }
    pub fn stop_stream(&mut self) -> Result<(), AcqError> {
        self.pause_display()?;
        self.link.send_command(&DeviceCommand::Stop)
    }
    pub fn pause_display(&mut self) -> Result<(), AcqError> {
        self.link.stop_listening()?;
        self.listening = false;
        Ok(())
    }
    pub fn resume_display(&mut self) -> Result<(), AcqError> {
        self.link.start_listening()?;
        self.listening = true;
        Ok(())
    }
    pub fn send(&mut self, command: &DeviceCommand) -> Result<(), AcqError> {
        self.link.send_command(command)
    }
    /// Threshold first, then the window, then the device's sample period.
    pub fn set_sample_rate(&mut self, sample_rate_hz: f64) -> Result<(), AcqError> {
        self.config.check_sample_rate(sample_rate_hz)?;
        let mut next = self.config.clone();
        next.sample_rate_hz = sample_rate_hz;
        self.reconfigure(next)?;
        self.refilter();
        self.link
            .send_command(&DeviceCommand::sample_period_for(sample_rate_hz))
    }
    pub fn set_time_range(&mut self, time_range_s: f64) -> Result<(), AcqError> {
        self.config.check_time_range(time_range_s)?;
        let mut next = self.config.clone();
        next.time_range_s = time_range_s;
        self.reconfigure(next)
    }
    fn reconfigure(&mut self, next: AcquisitionConfig) -> Result<(), AcqError> {
        let threshold = next.emit_threshold_bytes();
        self.link.set_emit_threshold(threshold, next.reset_policy)?;
        self.core
            .buffers_mut()
            .resize(next.sample_rate_hz, next.time_range_s)?;
        info!(
            "window {} Hz x {} s, {threshold}-byte batches",
            next.sample_rate_hz, next.time_range_s
        );
        self.config = next;
        Ok(())
    }
    /// Redesign the configured filters for the current rate. Filters that
    /// no longer fit below Nyquist leave the display unfiltered.
    fn refilter(&mut self) {
        let rate = self.config.sample_rate_hz;
        let chain = match FilterChain::from_kinds(rate, &self.config.filters) {
            Ok(chain) => chain,
            Err(err) => {
                warn!("filters disabled at {rate} Hz: {err}");
                FilterChain::empty()
            }
        };
        self.core.buffers_mut().change_filters(chain);
    }
    /// Validated against the current rate before anything is installed.
    pub fn set_filters(&mut self, filters: Vec<FilterKind>) -> Result<(), AcqError> {
        let chain = FilterChain::from_kinds(self.config.sample_rate_hz, &filters)?;
        self.core.buffers_mut().change_filters(chain);
        self.config.filters = filters;
        Ok(())
    }
    pub fn clear(&mut self) {
        self.core.buffers_mut().clear();
    }
    /// Decode one batch into the windows; `None` when it was dropped.
    pub fn handle_batch(&mut self, batch: &[u8]) -> Option<ChannelFrame> {
        self.core.ingest(batch).then(|| self.core.frame())
    }
    pub fn frame(&self) -> ChannelFrame {
        self.core.frame()
    }
    pub fn spectrum(&self) -> Result<PowerSpectrum, AcqError> {
        SpectrumBuilder::quarter_window().compute(&self.core.frame())
    }
    /// Bring back a failed data listener in the state it was left in.
    pub fn restart_data_listener(&mut self) -> Result<(), AcqError> {
        self.link.restart_listener()?;
        if self.listening {
            self.link.start_listening()?;
        }
        Ok(())
    }
}
/// Bind the sockets, then run the acquisition loop on its own thread.
/// Bind and validation errors are returned here rather than from the thread.
pub fn spawn_thread(
    config: AcquisitionConfig,
    tx: Sender<AcqMessage>,
    rx_cmd: Receiver<ControlCommand>,
) -> Result<JoinHandle<()>, AcqError> {
    let (ev_tx, ev_rx) = mpsc::channel();
    let restart_on_failure = config.restart_on_failure;
    let client = DeviceClient::connect(&config, ev_tx)?;
    let controller = Controller::new(config, client)?;
    info!("acquisition engine ready, server {}", controller.link().server());
    let handle = thread::Builder::new()
        .name("acq-engine".into())
        .spawn(move || {
            tx.send(AcqMessage::Ready {
                data_addr: controller.link().data_addr(),
                msg_addr: controller.link().msg_addr(),
            })
            .ok();
            Engine {
                controller,
                tx,
                rx_cmd,
                events: ev_rx,
                restart_on_failure,
            }
            .run();
        })?;
    Ok(handle)
}
struct Engine<L: DataControl + CommandSink> {
    controller: Controller<L>,
    tx: Sender<AcqMessage>,
    rx_cmd: Receiver<ControlCommand>,
    events: Receiver<ListenerEvent>,
    restart_on_failure: bool,
}
impl<L: DataControl + CommandSink> Engine<L> {
    fn run(mut self) {
        loop {
            // commands first, a bounded burst per turn
            for _ in 0..10 {
                match self.rx_cmd.try_recv() {
                    Ok(ControlCommand::Shutdown) | Err(TryRecvError::Disconnected) => {
                        self.shutdown();
                        return;
                    }
                    Ok(cmd) => self.handle_command(cmd),
                    Err(TryRecvError::Empty) => break,
                }
            }
            match self.events.recv_timeout(EVENT_WAIT) {
                Ok(event) => self.handle_event(event),
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => {
                    self.shutdown();
                    return;
                }
            }
        }
    }
    fn handle_command(&mut self, cmd: ControlCommand) {
        let controller = &mut self.controller;
        let result = match cmd {
            ControlCommand::StartStream => controller.start_stream(),
            ControlCommand::StopStream => controller.stop_stream(),
            ControlCommand::PauseDisplay => controller.pause_display(),
            ControlCommand::ResumeDisplay => controller.resume_display(),
            ControlCommand::SetSampleRate(rate) => controller.set_sample_rate(rate),
            ControlCommand::SetTimeRange(range) => controller.set_time_range(range),
            ControlCommand::SetFilters(filters) => controller.set_filters(filters),
            ControlCommand::ClearData => {
                controller.clear();
                Ok(())
            }
            ControlCommand::Device(command) => controller.send(&command),
            ControlCommand::Shutdown => Ok(()),
        };
        match result {
            Ok(()) => self.report_state(),
            Err(err) => {
                warn!("command failed: {err}");
                self.tx.send(AcqMessage::Log(err.to_string())).ok();
            }
        }
    }
    /// `Status` is sent when the data listener acknowledges, not here.
    fn report_state(&self) {
        let config = self.controller.config();
        self.tx
            .send(AcqMessage::Reconfigured {
                sample_rate_hz: config.sample_rate_hz,
                time_range_s: config.time_range_s,
                threshold_bytes: config.emit_threshold_bytes(),
            })
            .ok();
    }
    fn handle_event(&mut self, event: ListenerEvent) {
        match event {
            ListenerEvent::Batch(batch) => {
                if let Some(frame) = self.controller.handle_batch(&batch) {
                    self.tx.send(AcqMessage::Frame(frame)).ok();
                }
            }
            ListenerEvent::Message(text) => {
                self.tx.send(AcqMessage::Console(text)).ok();
            }
            ListenerEvent::Listening {
                kind: ListenerKind::Data,
                listening,
            } => {
                self.tx.send(AcqMessage::Status(listening)).ok();
            }
            ListenerEvent::Listening { kind, listening } => {
                debug!("{kind} listener listening: {listening}")
            }
            ListenerEvent::Failed { kind, error } => {
                self.tx
                    .send(AcqMessage::ListenerFailed {
                        kind,
                        error: error.to_string(),
                    })
                    .ok();
                if kind == ListenerKind::Data && self.restart_on_failure {
                    if let Err(err) = self.controller.restart_data_listener() {
                        warn!("data listener restart failed: {err}");
                        self.tx.send(AcqMessage::Log(err.to_string())).ok();
                    }
                }
            }
            ListenerEvent::Stopped(kind) => debug!("{kind} listener stopped"),
        }
    }
    fn shutdown(self) {
        let Engine { controller, tx, .. } = self;
        drop(controller);
        info!("acquisition engine stopped");
        tx.send(AcqMessage::Stopped).ok();
    }
}
#[cfg(test)]
mod tests {
    use super::*;
    use crate::listeners::ResetPolicy;
    use std::net::{IpAddr, Ipv4Addr, SocketAddr, UdpSocket};
    #[derive(Default)]
    struct Recorder {
        log: Vec<String>,
    }
    impl DataControl for Recorder {
        fn start_listening(&mut self) -> Result<(), AcqError> {
            self.log.push("listen".into());
            Ok(())
        }
        fn stop_listening(&mut self) -> Result<(), AcqError> {
            self.log.push("stop-listen".into());
            Ok(())
        }
        fn set_emit_threshold(&mut self, bytes: usize, _: ResetPolicy) -> Result<(), AcqError> {
            self.log.push(format!("threshold {bytes}"));
            Ok(())
        }
        fn restart_listener(&mut self) -> Result<(), AcqError> {
            self.log.push("restart".into());
            Ok(())
        }
    }
    impl CommandSink for Recorder {
        fn send_command(&mut self, command: &DeviceCommand) -> Result<(), AcqError> {
            self.log.push(format!("cmd {command}"));
            Ok(())
        }
    }
    fn controller() -> Controller<Recorder> {
        let mut controller =
            Controller::new(AcquisitionConfig::default(), Recorder::default()).unwrap();
        controller.link_mut().log.clear();
        controller
    }
    #[test]
    fn new_pushes_initial_threshold() {
        let controller =
            Controller::new(AcquisitionConfig::default(), Recorder::default()).unwrap();
        assert_eq!(controller.link().log, vec!["threshold 8000"]);
        assert_eq!(controller.core().buffers().capacity(), 20_000);
    }
    #[test]
    fn sample_rate_change_runs_in_order() {
        let mut controller = controller();
        controller.set_sample_rate(5_000.0).unwrap();
        assert_eq!(controller.link().log, vec!["threshold 2000", "cmd sT2 200.0"]);
        assert_eq!(controller.core().buffers().capacity(), 5_000);
        assert_eq!(controller.config().sample_rate_hz, 5_000.0);
    }
    #[test]
    fn rejected_rate_changes_nothing() {
        let mut controller = controller();
        assert!(matches!(
            controller.set_sample_rate(7_000.0),
            Err(AcqError::NotOffered { .. })
        ));
        assert!(controller.link().log.is_empty());
        assert_eq!(controller.core().buffers().capacity(), 20_000);
    }
    #[test]
    fn time_range_resizes_and_keeps_samples() {
        let mut controller = controller();
        assert!(controller.handle_batch(&[0x80, 0x00, 0x80, 0x00]).is_some());
        controller.set_time_range(10.0).unwrap();
        assert_eq!(controller.link().log, vec!["threshold 80000"]);
        let buffers = controller.core().buffers();
        assert_eq!(buffers.capacity(), 200_000);
        assert_eq!(buffers.len(), 1);
    }
    #[test]
    fn stream_control_reaches_listener_and_device() {
        let mut controller = controller();
        controller.start_stream().unwrap();
        assert!(controller.is_listening());
        controller.pause_display().unwrap();
        controller.stop_stream().unwrap();
        assert!(!controller.is_listening());
        assert_eq!(
            controller.link().log,
            vec!["listen", "cmd start", "stop-listen", "stop-listen", "cmd stop"]
        );
    }
    #[test]
    fn bad_batch_is_dropped() {
        let mut controller = controller();
        assert!(controller.handle_batch(&[1, 2, 3]).is_none());
        let frame = controller.handle_batch(&[0u8; 8]).unwrap();
        assert_eq!(frame.samples_per_channel(), 2);
        assert_eq!(controller.core().dropped_batches(), 1);
        controller.clear();
        assert_eq!(controller.frame().ptr, 0);
    }
    #[test]
    fn filters_are_validated_and_redesigned() {
        let mut controller = controller();
        assert!(controller
            .set_filters(vec![FilterKind::Notch { freq_hz: 15_000.0, q: 20.0 }])
            .is_err());
        assert!(controller.core().buffers().filters().is_empty());
        let bandpass = FilterKind::Bandpass {
            low_hz: 10.0,
            high_hz: 5_000.0,
            order: 2,
        };
        controller.set_filters(vec![bandpass]).unwrap();
        assert_eq!(controller.core().buffers().filters().len(), 1);
        // 5 kHz is above Nyquist at a 5 kHz rate
        controller.set_sample_rate(5_000.0).unwrap();
        assert!(controller.core().buffers().filters().is_empty());
        assert_eq!(controller.config().filters, vec![bandpass]);
        controller.set_sample_rate(20_000.0).unwrap();
        assert_eq!(controller.core().buffers().filters().len(), 1);
    }
    fn engine(restart_on_failure: bool) -> (Engine<Recorder>, Receiver<AcqMessage>) {
        let (tx, rx) = mpsc::channel();
        let (_, rx_cmd) = mpsc::channel();
        let (_, events) = mpsc::channel();
        let engine = Engine {
            controller: controller(),
            tx,
            rx_cmd,
            events,
            restart_on_failure,
        };
        (engine, rx)
    }
    fn receive_failure() -> ListenerEvent {
        ListenerEvent::Failed {
            kind: ListenerKind::Data,
            error: AcqError::Receive {
                port: 0,
                source: std::io::ErrorKind::Other.into(),
            },
        }
    }
    #[test]
    fn failed_data_listener_comes_back_listening() {
        let (mut engine, rx) = engine(true);
        engine.handle_command(ControlCommand::StartStream);
        engine.handle_event(receive_failure());
        assert_eq!(
            engine.controller.link().log,
            vec!["listen", "cmd start", "restart", "listen"]
        );
        assert!(rx.try_iter().any(|m| matches!(
            m,
            AcqMessage::ListenerFailed {
                kind: ListenerKind::Data,
                ..
            }
        )));
        // the restarted thread's acknowledgement is what reports streaming
        engine.handle_event(ListenerEvent::Listening {
            kind: ListenerKind::Data,
            listening: true,
        });
        assert!(matches!(rx.try_recv(), Ok(AcqMessage::Status(true))));
    }
    #[test]
    fn failure_without_restart_is_only_reported() {
        let (mut engine, rx) = engine(false);
        engine.handle_command(ControlCommand::StartStream);
        engine.handle_event(receive_failure());
        assert!(!engine.controller.link().log.iter().any(|entry| entry == "restart"));
        assert!(rx
            .try_iter()
            .any(|m| matches!(m, AcqMessage::ListenerFailed { .. })));
    }
    #[test]
    fn restart_of_a_paused_listener_stays_paused() {
        let (mut engine, _rx) = engine(true);
        engine.handle_command(ControlCommand::StartStream);
        engine.handle_command(ControlCommand::PauseDisplay);
        engine.handle_event(receive_failure());
        assert_eq!(
            engine.controller.link().log,
            vec!["listen", "cmd start", "stop-listen", "restart"]
        );
    }
    fn wait_for<T>(rx: &Receiver<AcqMessage>, mut pick: impl FnMut(AcqMessage) -> Option<T>) -> T {
        loop {
            let message = rx
                .recv_timeout(Duration::from_secs(2))
                .expect("engine went quiet");
            if let Some(found) = pick(message) {
                return found;
            }
        }
    }
    #[test]
    fn engine_round_trip_over_loopback() {
        let server = UdpSocket::bind("127.0.0.1:0").unwrap();
        server
            .set_read_timeout(Some(Duration::from_secs(2)))
            .unwrap();
        let server_addr = server.local_addr().unwrap();
        let config = AcquisitionConfig {
            server_address: server_addr.ip(),
            bind_address: IpAddr::V4(Ipv4Addr::LOCALHOST),
            msg_port: 0,
            server_msg_port: Some(server_addr.port()),
            data_port: 0,
            sample_rate_hz: 5_000.0,
            emit_divisor: 1_000,
            poll_interval_ms: 20,
            recv_buffer_bytes: 1 << 16,
            ..AcquisitionConfig::default()
        };
        let (tx, rx) = mpsc::channel();
        let (tx_cmd, rx_cmd) = mpsc::channel();
        let engine = spawn_thread(config, tx, rx_cmd).unwrap();
        let (data_addr, msg_addr): (SocketAddr, SocketAddr) = wait_for(&rx, |m| match m {
            AcqMessage::Ready { data_addr, msg_addr } => Some((data_addr?, msg_addr)),
            _ => None,
        });
        let mut buf = [0u8; 64];
        tx_cmd.send(ControlCommand::StartStream).unwrap();
        let (len, _) = server.recv_from(&mut buf).unwrap();
        assert_eq!(&buf[..len], b"start");
        wait_for(&rx, |m| matches!(m, AcqMessage::Status(true)).then_some(()));
        // five frames of two channels at 0x8000, i.e. -5 before scaling
        server.send_to(&[0x80, 0x00].repeat(10), data_addr).unwrap();
        let frame = wait_for(&rx, |m| match m {
            AcqMessage::Frame(frame) => Some(frame),
            _ => None,
        });
        assert_eq!(frame.ptr, 5);
        for channel in &frame.samples {
            assert_eq!(channel.len(), 5);
            assert!(channel.iter().all(|v| (v + 1e-5).abs() < 1e-12));
        }
        server.send_to(b"acquisition running", msg_addr).unwrap();
        let text = wait_for(&rx, |m| match m {
            AcqMessage::Console(text) => Some(text),
            _ => None,
        });
        assert_eq!(text, "acquisition running");
        tx_cmd.send(ControlCommand::SetSampleRate(10_000.0)).unwrap();
        let (len, _) = server.recv_from(&mut buf).unwrap();
        assert_eq!(&buf[..len], b"sT2 100.0");
        let threshold = wait_for(&rx, |m| match m {
            AcqMessage::Reconfigured {
                sample_rate_hz,
                threshold_bytes,
                ..
            } if sample_rate_hz == 10_000.0 => Some(threshold_bytes),
            _ => None,
        });
        assert_eq!(threshold, 40);
        tx_cmd.send(ControlCommand::SetTimeRange(2.0)).unwrap();
        let log = wait_for(&rx, |m| match m {
            AcqMessage::Log(text) => Some(text),
            _ => None,
        });
        assert!(log.contains("not one of"));
        tx_cmd.send(ControlCommand::Shutdown).unwrap();
        wait_for(&rx, |m| matches!(m, AcqMessage::Stopped).then_some(()));
        engine.join().unwrap();
    }
}
