// src/client.rs
use std::net::{SocketAddr, UdpSocket};
use std::sync::mpsc::Sender;
use log::{info, warn};
use crate::commands::DeviceCommand;
use crate::config::AcquisitionConfig;
use crate::drivers::AcqError;
use crate::listeners::{
    bind_udp, spawn_data_listener, spawn_message_listener, Accumulator, DataControl,
    ListenerEvent, ListenerHandle, ResetPolicy, SocketOptions,
};
/// Anything that can deliver a command to the acquisition server.
pub trait CommandSink {
    fn send_command(&mut self, command: &DeviceCommand) -> Result<(), AcqError>;
}
/// Sends ASCII commands from the message socket, so replies come back to it.
pub struct CommandSender {
    socket: UdpSocket,
    server: SocketAddr,
}
impl CommandSender {
    pub fn new(socket: UdpSocket, server: SocketAddr) -> Self {
        Self { socket, server }
    }
    pub fn server(&self) -> SocketAddr {
        self.server
    }
}
impl CommandSink for CommandSender {
    fn send_command(&mut self, command: &DeviceCommand) -> Result<(), AcqError> {
        let text = command.to_string();
        self.socket.send_to(text.as_bytes(), self.server)?;
        info!("-> {}: {text}", self.server);
        Ok(())
    }
}
/// Both listeners plus the command path to one acquisition server.
pub struct DeviceClient {
    config: AcquisitionConfig,
    events: Sender<ListenerEvent>,
    sender: CommandSender,
    messages: ListenerHandle,
    data: Option<ListenerHandle>,
    threshold: usize,
}
impl DeviceClient {
    /// Bind both sockets and start the listener threads. The data listener
    /// starts stopped with the threshold derived from `config`.
    pub fn connect(
        config: &AcquisitionConfig,
        events: Sender<ListenerEvent>,
    ) -> Result<Self, AcqError> {
        let options = socket_options(config);
        let msg_socket = bind_udp(config.local_msg_addr(), options)?;
        let sender = CommandSender::new(msg_socket.try_clone()?, config.server_msg_addr());
        let messages = spawn_message_listener(msg_socket, events.clone())?;
        let threshold = config.emit_threshold_bytes();
        let data = spawn_data(config, threshold, events.clone())?;
        Ok(Self {
            config: config.clone(),
            events,
            sender,
            messages,
            data: Some(data),
            threshold,
        })
    }
    pub fn msg_addr(&self) -> SocketAddr {
        self.messages.local_addr()
    }
    pub fn data_addr(&self) -> Option<SocketAddr> {
        self.data.as_ref().map(ListenerHandle::local_addr)
    }
    pub fn server(&self) -> SocketAddr {
        self.sender.server()
    }
    /// Replace a failed data listener with a fresh one on the configured port.
    /// The new listener is stopped; callers re-issue `start_listening`.
    pub fn restart_data_listener(&mut self) -> Result<(), AcqError> {
        if let Some(old) = self.data.take() {
            old.shutdown();
        }
        let data = spawn_data(&self.config, self.threshold, self.events.clone())?;
        warn!("data listener restarted on {}", data.local_addr());
        self.data = Some(data);
        Ok(())
    }
    fn data_mut(&mut self) -> Result<&mut ListenerHandle, AcqError> {
        self.data.as_mut().ok_or(AcqError::ListenerClosed)
    }
}
impl Drop for DeviceClient {
    fn drop(&mut self) {
        if let Some(data) = self.data.take() {
            data.shutdown();
        }
        info!("device client for {} closed", self.sender.server());
    }
}
fn socket_options(config: &AcquisitionConfig) -> SocketOptions {
    SocketOptions {
        recv_buffer_bytes: config.recv_buffer_bytes,
        poll_interval: config.poll_interval(),
    }
}
fn spawn_data(
    config: &AcquisitionConfig,
    threshold: usize,
    events: Sender<ListenerEvent>,
) -> Result<ListenerHandle, AcqError> {
    let socket = bind_udp(config.local_data_addr(), socket_options(config))?;
    let accumulator = Accumulator::new(threshold, config.frame_bytes())?;
    spawn_data_listener(socket, accumulator, config.datagram_size, events)
}
impl DataControl for DeviceClient {
    fn start_listening(&mut self) -> Result<(), AcqError> {
        self.data_mut()?.start_listening()
    }
    fn stop_listening(&mut self) -> Result<(), AcqError> {
        self.data_mut()?.stop_listening()
    }
    fn set_emit_threshold(&mut self, bytes: usize, policy: ResetPolicy) -> Result<(), AcqError> {
        self.data_mut()?.set_emit_threshold(bytes, policy)?;
        self.threshold = bytes;
        Ok(())
    }
    fn restart_listener(&mut self) -> Result<(), AcqError> {
        self.restart_data_listener()
    }
}
impl CommandSink for DeviceClient {
    fn send_command(&mut self, command: &DeviceCommand) -> Result<(), AcqError> {
        self.sender.send_command(command)
    }
}
