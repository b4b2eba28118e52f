// src/listeners.rs
// UDP receive threads. Each listener owns its socket and its state; the
// outside world only talks to it through a ListenerCommand channel.
use std::fmt;
use std::io;
use std::net::{SocketAddr, UdpSocket};
use std::sync::mpsc::{self, Receiver, Sender, TryRecvError};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use socket2::{Domain, Protocol, Socket, Type};
use crate::drivers::AcqError;
/// Largest console datagram the server sends.
pub const MESSAGE_DATAGRAM_SIZE: usize = 512;
/// What happens to in-flight bytes when the emit threshold changes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResetPolicy {
    #[default]
    Discard,
    /// Emit the frame-aligned part of the pending bytes as one short batch.
    Flush,
}
pub fn check_threshold(threshold: usize, frame_bytes: usize) -> Result<(), AcqError> {
    if threshold == 0 || frame_bytes == 0 || threshold % frame_bytes != 0 {
        return Err(AcqError::MisalignedThreshold {
            threshold,
            frame: frame_bytes,
        });
    }
    Ok(())
}
/// Collects datagram payloads and cuts them into batches of exactly
/// `threshold` bytes. Overshoot is carried into the next batch.
#[derive(Debug)]
pub struct Accumulator {
    pending: Vec<u8>,
    threshold: usize,
    frame_bytes: usize,
}
impl Accumulator {
    pub fn new(threshold: usize, frame_bytes: usize) -> Result<Self, AcqError> {
        check_threshold(threshold, frame_bytes)?;
        Ok(Self {
            pending: Vec::with_capacity(threshold),
            threshold,
            frame_bytes,
        })
    }
    pub fn threshold(&self) -> usize {
        self.threshold
    }
    pub fn frame_bytes(&self) -> usize {
        self.frame_bytes
    }
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
    pub fn push(&mut self, bytes: &[u8]) -> Vec<Vec<u8>> {
        self.pending.extend_from_slice(bytes);
        let mut batches = Vec::new();
        while self.pending.len() >= self.threshold {
            let rest = self.pending.split_off(self.threshold);
            batches.push(std::mem::replace(&mut self.pending, rest));
        }
        batches
    }
    /// Install a new threshold. Pending bytes never survive the change; with
    /// [`ResetPolicy::Flush`] their aligned prefix is handed back.
    pub fn set_threshold(
        &mut self,
        threshold: usize,
        policy: ResetPolicy,
    ) -> Result<Option<Vec<u8>>, AcqError> {
        check_threshold(threshold, self.frame_bytes)?;
        self.threshold = threshold;
        let mut pending = std::mem::take(&mut self.pending);
        match policy {
            ResetPolicy::Discard => Ok(None),
            ResetPolicy::Flush => {
                pending.truncate(pending.len() - pending.len() % self.frame_bytes);
                Ok((!pending.is_empty()).then_some(pending))
            }
        }
    }
    /// Drop pending bytes, returning how many were dropped.
    pub fn discard(&mut self) -> usize {
        let dropped = self.pending.len();
        self.pending.clear();
        dropped
    }
}
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ListenerKind {
    Data,
    Message,
}
impl fmt::Display for ListenerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ListenerKind::Data => f.write_str("data"),
            ListenerKind::Message => f.write_str("message"),
        }
    }
}
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ListenerCommand {
    StartListening,
    StopListening,
    /// Ignored by the message listener.
    SetEmitThreshold { bytes: usize, policy: ResetPolicy },
    Shutdown,
}
#[derive(Debug)]
pub enum ListenerEvent {
    Batch(Vec<u8>),
    Message(String),
    /// A start or stop took effect on the listener thread.
    Listening { kind: ListenerKind, listening: bool },
    Failed { kind: ListenerKind, error: AcqError },
    Stopped(ListenerKind),
}
/// Receive-side control surface of the data path.
pub trait DataControl {
    fn start_listening(&mut self) -> Result<(), AcqError>;
    fn stop_listening(&mut self) -> Result<(), AcqError>;
    fn set_emit_threshold(&mut self, bytes: usize, policy: ResetPolicy) -> Result<(), AcqError>;
    /// Replace a failed listener. Links that cannot rebind refuse.
    fn restart_listener(&mut self) -> Result<(), AcqError> {
        Err(AcqError::ListenerClosed)
    }
}
/// Where a listener thread pulls datagrams from.
pub trait DatagramSource: Send + 'static {
    /// Blocks for at most one poll interval.
    fn recv_datagram(&mut self, buf: &mut [u8]) -> io::Result<usize>;
    /// Drop whatever is already queued without waiting for more.
    fn discard_queued(&mut self) -> io::Result<usize>;
    fn local_addr(&self) -> io::Result<SocketAddr>;
}
impl DatagramSource for UdpSocket {
    fn recv_datagram(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.recv_from(buf).map(|(len, _)| len)
    }
    fn discard_queued(&mut self) -> io::Result<usize> {
        self.set_nonblocking(true)?;
        let mut scratch = vec![0u8; 1 << 16];
        let mut dropped = 0;
        let result = loop {
            match self.recv_from(&mut scratch) {
                Ok(_) => dropped += 1,
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => break Ok(dropped),
                Err(err) if err.kind() == io::ErrorKind::ConnectionReset => {}
                Err(err) => break Err(err),
            }
        };
        self.set_nonblocking(false)?;
        result
    }
    fn local_addr(&self) -> io::Result<SocketAddr> {
        UdpSocket::local_addr(self)
    }
}
#[derive(Clone, Copy, Debug)]
pub struct SocketOptions {
    pub recv_buffer_bytes: usize,
    pub poll_interval: Duration,
}
/// Bind a UDP socket with address reuse and a read timeout.
pub fn bind_udp(addr: SocketAddr, options: SocketOptions) -> Result<UdpSocket, AcqError> {
    let socket = Socket::new(Domain::for_address(addr), Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_reuse_address(true)?;
    if options.recv_buffer_bytes > 0 {
        if let Err(err) = socket.set_recv_buffer_size(options.recv_buffer_bytes) {
            warn!(
                "could not raise receive buffer to {} bytes on {addr}: {err}",
                options.recv_buffer_bytes
            );
        }
    }
    socket.bind(&addr.into())?;
    let socket: UdpSocket = socket.into();
    socket.set_read_timeout(Some(options.poll_interval))?;
    Ok(socket)
}
/// Timeouts are poll ticks. A connection reset is what some platforms report
/// on UDP after an ICMP port-unreachable for a datagram we sent earlier.
fn is_idle(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut | io::ErrorKind::ConnectionReset
    )
}
/// Owning handle of a listener thread. Dropping it shuts the thread down.
pub struct ListenerHandle {
    kind: ListenerKind,
    local_addr: SocketAddr,
    frame_bytes: Option<usize>,
    commands: Sender<ListenerCommand>,
    thread: Option<JoinHandle<()>>,
}
impl ListenerHandle {
    pub fn kind(&self) -> ListenerKind {
        self.kind
    }
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }
    pub fn send(&self, command: ListenerCommand) -> Result<(), AcqError> {
        if let ListenerCommand::SetEmitThreshold { bytes, .. } = command {
            if let Some(frame) = self.frame_bytes {
                check_threshold(bytes, frame)?;
            }
        }
        self.commands
            .send(command)
            .map_err(|_| AcqError::ListenerClosed)
    }
    pub fn shutdown(mut self) {
        self.stop_thread();
    }
    fn stop_thread(&mut self) {
        let Some(thread) = self.thread.take() else {
            return;
        };
        self.commands.send(ListenerCommand::Shutdown).ok();
        if thread.join().is_err() {
            warn!("{} listener thread panicked", self.kind);
        }
    }
}
impl Drop for ListenerHandle {
    fn drop(&mut self) {
        self.stop_thread();
    }
}
impl DataControl for ListenerHandle {
    fn start_listening(&mut self) -> Result<(), AcqError> {
        self.send(ListenerCommand::StartListening)
    }
    fn stop_listening(&mut self) -> Result<(), AcqError> {
        self.send(ListenerCommand::StopListening)
    }
    fn set_emit_threshold(&mut self, bytes: usize, policy: ResetPolicy) -> Result<(), AcqError> {
        self.send(ListenerCommand::SetEmitThreshold { bytes, policy })
    }
}
/// Starts stopped; nothing is emitted until `StartListening` is acknowledged.
pub fn spawn_data_listener<R: DatagramSource>(
    source: R,
    accumulator: Accumulator,
    datagram_size: usize,
    events: Sender<ListenerEvent>,
) -> Result<ListenerHandle, AcqError> {
    let local_addr = source.local_addr()?;
    let frame_bytes = accumulator.frame_bytes();
    let (tx_cmd, rx_cmd) = mpsc::channel();
    let thread = thread::Builder::new()
        .name("data-listener".into())
        .spawn(move || {
            DataLoop {
                source,
                commands: rx_cmd,
                events,
                accumulator,
                listening: false,
                port: local_addr.port(),
            }
            .run(datagram_size.max(1))
        })?;
    info!("data listener bound to {local_addr}");
    Ok(ListenerHandle {
        kind: ListenerKind::Data,
        local_addr,
        frame_bytes: Some(frame_bytes),
        commands: tx_cmd,
        thread: Some(thread),
    })
}
/// Starts listening so console text is never missed.
pub fn spawn_message_listener<R: DatagramSource>(
    source: R,
    events: Sender<ListenerEvent>,
) -> Result<ListenerHandle, AcqError> {
    let local_addr = source.local_addr()?;
    let (tx_cmd, rx_cmd) = mpsc::channel();
    let thread = thread::Builder::new()
        .name("message-listener".into())
        .spawn(move || run_message_loop(source, rx_cmd, events, local_addr.port()))?;
    info!("message listener bound to {local_addr}");
    Ok(ListenerHandle {
        kind: ListenerKind::Message,
        local_addr,
        frame_bytes: None,
        commands: tx_cmd,
        thread: Some(thread),
    })
}
enum Drained {
    Applied { stopped: bool },
    Exit,
}
struct DataLoop<R> {
    source: R,
    commands: Receiver<ListenerCommand>,
    events: Sender<ListenerEvent>,
    accumulator: Accumulator,
    listening: bool,
    port: u16,
}
impl<R: DatagramSource> DataLoop<R> {
    /// A datagram is kept only when the listener was listening for the whole
    /// wait that produced it: listening on entry and no stop drained since.
    fn run(mut self, datagram_size: usize) {
        let mut buf = vec![0u8; datagram_size];
        loop {
            let listening = self.listening;
            let received = self.source.recv_datagram(&mut buf);
            let stopped = match self.apply_commands() {
                Drained::Applied { stopped } => stopped,
                Drained::Exit => {
                    self.events
                        .send(ListenerEvent::Stopped(ListenerKind::Data))
                        .ok();
                    return;
                }
            };
            match received {
                Ok(len) if listening && !stopped => {
                    for batch in self.accumulator.push(&buf[..len]) {
                        if self.events.send(ListenerEvent::Batch(batch)).is_err() {
                            return;
                        }
                    }
                }
                Ok(_) => {}
                Err(err) if is_idle(&err) => {}
                Err(source) => {
                    let error = AcqError::Receive {
                        port: self.port,
                        source,
                    };
                    warn!("data listener stopping: {error}");
                    self.events
                        .send(ListenerEvent::Failed {
                            kind: ListenerKind::Data,
                            error,
                        })
                        .ok();
                    return;
                }
            }
        }
    }
    fn apply_commands(&mut self) -> Drained {
        let mut stopped = false;
        loop {
            let command = match self.commands.try_recv() {
                Ok(command) => command,
                Err(TryRecvError::Empty) => return Drained::Applied { stopped },
                Err(TryRecvError::Disconnected) => return Drained::Exit,
            };
            match command {
                ListenerCommand::StartListening => {
                    if !self.listening {
                        // queued before the start took effect
                        match self.source.discard_queued() {
                            Ok(0) => {}
                            Ok(dropped) => {
                                debug!("discarded {dropped} datagrams queued while stopped")
                            }
                            Err(err) => warn!("could not flush data socket: {err}"),
                        }
                    }
                    self.listening = true;
                    if !self.acknowledge() {
                        return Drained::Exit;
                    }
                }
                ListenerCommand::StopListening => {
                    self.listening = false;
                    stopped = true;
                    let dropped = self.accumulator.discard();
                    if dropped > 0 {
                        debug!("discarded {dropped} pending bytes on stop");
                    }
                    if !self.acknowledge() {
                        return Drained::Exit;
                    }
                }
                ListenerCommand::SetEmitThreshold { bytes, policy } => {
                    match self.accumulator.set_threshold(bytes, policy) {
                        Ok(Some(flushed)) => {
                            if self.events.send(ListenerEvent::Batch(flushed)).is_err() {
                                return Drained::Exit;
                            }
                        }
                        Ok(None) => {}
                        Err(err) => warn!("ignoring threshold change: {err}"),
                    }
                }
                ListenerCommand::Shutdown => return Drained::Exit,
            }
        }
    }
    fn acknowledge(&self) -> bool {
        self.events
            .send(ListenerEvent::Listening {
                kind: ListenerKind::Data,
                listening: self.listening,
            })
            .is_ok()
    }
}
fn run_message_loop<R: DatagramSource>(
    mut source: R,
    commands: Receiver<ListenerCommand>,
    events: Sender<ListenerEvent>,
    port: u16,
) {
    let mut buf = [0u8; MESSAGE_DATAGRAM_SIZE];
    let mut listening = true;
    loop {
        let received = source.recv_datagram(&mut buf);
        loop {
            let toggled = match commands.try_recv() {
                Ok(ListenerCommand::StartListening) => true,
                Ok(ListenerCommand::StopListening) => false,
                Ok(ListenerCommand::SetEmitThreshold { .. }) => continue,
                Ok(ListenerCommand::Shutdown) | Err(TryRecvError::Disconnected) => {
                    events
                        .send(ListenerEvent::Stopped(ListenerKind::Message))
                        .ok();
                    return;
                }
                Err(TryRecvError::Empty) => break,
            };
            listening = toggled;
            let ack = ListenerEvent::Listening {
                kind: ListenerKind::Message,
                listening,
            };
            if events.send(ack).is_err() {
                return;
            }
        }
        match received {
            Ok(len) if listening => {
                let text = String::from_utf8_lossy(&buf[..len]).into_owned();
                debug!("console: {text}");
                if events.send(ListenerEvent::Message(text)).is_err() {
                    return;
                }
            }
            Ok(_) => {}
            Err(err) if is_idle(&err) => {}
            Err(source) => {
                let error = AcqError::Receive { port, source };
                warn!("message listener stopping: {error}");
                events
                    .send(ListenerEvent::Failed {
                        kind: ListenerKind::Message,
                        error,
                    })
                    .ok();
                return;
            }
        }
    }
}
#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::net::{Ipv4Addr, SocketAddrV4};
    use std::sync::mpsc::RecvTimeoutError;
    const WAIT: Duration = Duration::from_secs(2);
    fn options() -> SocketOptions {
        SocketOptions {
            recv_buffer_bytes: 1 << 16,
            poll_interval: Duration::from_millis(20),
        }
    }
    fn loopback() -> SocketAddr {
        SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::LOCALHOST, 0))
    }
    /// Replays a fixed list of receive results, then idles.
    struct ScriptedSource {
        script: VecDeque<Result<Vec<u8>, io::ErrorKind>>,
    }
    impl ScriptedSource {
        fn new(script: impl IntoIterator<Item = Result<Vec<u8>, io::ErrorKind>>) -> Self {
            Self {
                script: script.into_iter().collect(),
            }
        }
    }
    impl DatagramSource for ScriptedSource {
        fn recv_datagram(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            match self.script.pop_front() {
                Some(Ok(bytes)) => {
                    buf[..bytes.len()].copy_from_slice(&bytes);
                    Ok(bytes.len())
                }
                Some(Err(kind)) => Err(kind.into()),
                None => {
                    thread::sleep(Duration::from_millis(5));
                    Err(io::ErrorKind::TimedOut.into())
                }
            }
        }
        fn discard_queued(&mut self) -> io::Result<usize> {
            Ok(0)
        }
        fn local_addr(&self) -> io::Result<SocketAddr> {
            Ok(loopback())
        }
    }
    fn data_listener(threshold: usize) -> (ListenerHandle, Receiver<ListenerEvent>, UdpSocket) {
        let (tx, rx) = mpsc::channel();
        let socket = bind_udp(loopback(), options()).unwrap();
        let handle =
            spawn_data_listener(socket, Accumulator::new(threshold, 4).unwrap(), 64, tx).unwrap();
        let sender = UdpSocket::bind(loopback()).unwrap();
        sender.connect(handle.local_addr()).unwrap();
        (handle, rx, sender)
    }
    /// Wait until the listener reports `on`, skipping earlier acknowledgements.
    fn wait_listening(rx: &Receiver<ListenerEvent>, on: bool) {
        loop {
            match rx.recv_timeout(WAIT).unwrap() {
                ListenerEvent::Listening { listening, .. } if listening == on => return,
                ListenerEvent::Listening { .. } => {}
                other => panic!("expected an acknowledgement, got {other:?}"),
            }
        }
    }
    fn set_listening(handle: &mut ListenerHandle, rx: &Receiver<ListenerEvent>, on: bool) {
        if on {
            handle.start_listening().unwrap();
        } else {
            handle.stop_listening().unwrap();
        }
        wait_listening(rx, on);
    }
    fn next_batch(rx: &Receiver<ListenerEvent>) -> Vec<u8> {
        match rx.recv_timeout(WAIT).unwrap() {
            ListenerEvent::Batch(batch) => batch,
            other => panic!("expected a batch, got {other:?}"),
        }
    }
    #[test]
    fn accumulator_carries_overshoot() {
        let mut acc = Accumulator::new(8, 4).unwrap();
        assert!(acc.push(&[1, 2, 3, 4, 5, 6]).is_empty());
        let batches = acc.push(&[7, 8, 9, 10, 11, 12, 13, 14, 15, 16, 17, 18]);
        assert_eq!(
            batches,
            vec![vec![1, 2, 3, 4, 5, 6, 7, 8], vec![9, 10, 11, 12, 13, 14, 15, 16]]
        );
        assert_eq!(acc.pending_len(), 2);
    }
    #[test]
    fn threshold_must_be_frame_aligned() {
        assert!(matches!(
            Accumulator::new(10, 4),
            Err(AcqError::MisalignedThreshold { threshold: 10, frame: 4 })
        ));
        assert!(Accumulator::new(0, 6).is_err());
        let mut acc = Accumulator::new(12, 6).unwrap();
        assert!(acc.set_threshold(9, ResetPolicy::Discard).is_err());
        assert_eq!(acc.threshold(), 12);
    }
    #[test]
    fn reset_policies() {
        let mut acc = Accumulator::new(16, 4).unwrap();
        acc.push(&[0; 10]);
        assert_eq!(acc.set_threshold(8, ResetPolicy::Discard).unwrap(), None);
        assert_eq!(acc.pending_len(), 0);
        acc.push(&[1, 2, 3, 4, 5, 6]);
        assert_eq!(
            acc.set_threshold(12, ResetPolicy::Flush).unwrap(),
            Some(vec![1, 2, 3, 4])
        );
        assert_eq!(acc.pending_len(), 0);
        acc.push(&[9, 9]);
        assert_eq!(acc.set_threshold(12, ResetPolicy::Flush).unwrap(), None);
    }
    #[test]
    fn listener_emits_fixed_batches() {
        let (mut handle, rx, sender) = data_listener(8);
        set_listening(&mut handle, &rx, true);
        sender.send(&[1, 2, 3, 4, 5, 6]).unwrap();
        sender.send(&[7, 8, 9, 10, 11, 12]).unwrap();
        assert_eq!(next_batch(&rx), vec![1, 2, 3, 4, 5, 6, 7, 8]);
        sender.send(&[13, 14, 15, 16]).unwrap();
        assert_eq!(next_batch(&rx), vec![9, 10, 11, 12, 13, 14, 15, 16]);
        handle.shutdown();
        assert!(matches!(
            rx.recv_timeout(WAIT).unwrap(),
            ListenerEvent::Stopped(ListenerKind::Data)
        ));
    }
    #[test]
    fn pause_discards_and_resume_starts_fresh() {
        let (mut handle, rx, sender) = data_listener(8);
        set_listening(&mut handle, &rx, true);
        sender.send(&[0xAA; 4]).unwrap();
        set_listening(&mut handle, &rx, false);
        sender.send(&[0xBB; 8]).unwrap();
        set_listening(&mut handle, &rx, true);
        sender.send(&[1, 2, 3, 4, 5, 6, 7, 8]).unwrap();
        assert_eq!(next_batch(&rx), vec![1, 2, 3, 4, 5, 6, 7, 8]);
        assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
    }
    #[test]
    fn bytes_sent_between_stop_and_start_are_never_emitted() {
        let (mut handle, rx, sender) = data_listener(8);
        set_listening(&mut handle, &rx, true);
        // no wait between stop and start: both may land in one wake-up
        handle.stop_listening().unwrap();
        sender.send(&[0xBB; 8]).unwrap();
        handle.start_listening().unwrap();
        wait_listening(&rx, true);
        sender.send(&[1, 2, 3, 4, 5, 6, 7, 8]).unwrap();
        assert_eq!(next_batch(&rx), vec![1, 2, 3, 4, 5, 6, 7, 8]);
        assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
    }
    #[test]
    fn stopped_listener_emits_nothing() {
        let (_handle, rx, sender) = data_listener(4);
        sender.send(&[1, 2, 3, 4]).unwrap();
        assert!(rx.recv_timeout(Duration::from_millis(150)).is_err());
    }
    #[test]
    fn misaligned_threshold_never_reaches_thread() {
        let (mut handle, _rx, _sender) = data_listener(8);
        assert!(matches!(
            handle.set_emit_threshold(6, ResetPolicy::Discard),
            Err(AcqError::MisalignedThreshold { .. })
        ));
        handle.set_emit_threshold(12, ResetPolicy::Discard).unwrap();
    }
    #[test]
    fn receive_error_ends_data_loop() {
        let (tx, rx) = mpsc::channel();
        let source = ScriptedSource::new([
            Err(io::ErrorKind::TimedOut),
            Ok(vec![1, 2, 3, 4]),
            Err(io::ErrorKind::PermissionDenied),
        ]);
        let handle = spawn_data_listener(source, Accumulator::new(4, 4).unwrap(), 64, tx).unwrap();
        match rx.recv_timeout(WAIT).unwrap() {
            ListenerEvent::Failed {
                kind: ListenerKind::Data,
                error: AcqError::Receive { source, .. },
            } => assert_eq!(source.kind(), io::ErrorKind::PermissionDenied),
            other => panic!("expected a failure, got {other:?}"),
        }
        // the loop is gone and took its sender with it
        assert!(matches!(
            rx.recv_timeout(WAIT),
            Err(RecvTimeoutError::Disconnected)
        ));
        assert!(matches!(
            handle.send(ListenerCommand::StartListening),
            Err(AcqError::ListenerClosed)
        ));
    }
    #[test]
    fn receive_error_ends_message_loop() {
        let (tx, rx) = mpsc::channel();
        let source = ScriptedSource::new([Ok(b"ready".to_vec()), Err(io::ErrorKind::Other)]);
        let _handle = spawn_message_listener(source, tx).unwrap();
        assert!(matches!(
            rx.recv_timeout(WAIT).unwrap(),
            ListenerEvent::Message(text) if text == "ready"
        ));
        assert!(matches!(
            rx.recv_timeout(WAIT).unwrap(),
            ListenerEvent::Failed {
                kind: ListenerKind::Message,
                ..
            }
        ));
        assert!(matches!(
            rx.recv_timeout(WAIT),
            Err(RecvTimeoutError::Disconnected)
        ));
    }
    #[test]
    fn message_listener_decodes_lossy_text() {
        let (tx, rx) = mpsc::channel();
        let socket = bind_udp(loopback(), options()).unwrap();
        let handle = spawn_message_listener(socket, tx).unwrap();
        let sender = UdpSocket::bind(loopback()).unwrap();
        sender.send_to(b"recording started", handle.local_addr()).unwrap();
        sender.send_to(&[b'o', b'k', 0xFF], handle.local_addr()).unwrap();
        let mut texts = Vec::new();
        for _ in 0..2 {
            match rx.recv_timeout(WAIT).unwrap() {
                ListenerEvent::Message(text) => texts.push(text),
                other => panic!("unexpected {other:?}"),
            }
        }
        assert_eq!(texts, vec!["recording started".to_owned(), "ok\u{FFFD}".to_owned()]);
        drop(handle);
        assert!(matches!(
            rx.recv_timeout(WAIT).unwrap(),
            ListenerEvent::Stopped(ListenerKind::Message)
        ));
    }
}
