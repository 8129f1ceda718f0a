use std::net::UdpSocket;

use super::config::SignalConfig;
use super::error::SignalError;

/// Commands understood by the DAQ readout process
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    Start,
    Stop,
}

/// Delivers start/stop commands to the readout
pub trait SignalRelay: Send + Sync {
    fn send(&self, signal: Signal) -> Result<(), SignalError>;
}

/// One UDP datagram per signal
#[derive(Debug, Clone)]
pub struct UdpSignalRelay {
    address: String,
    start_message: String,
    stop_message: String,
}

impl UdpSignalRelay {
    pub fn new(config: &SignalConfig) -> Self {
        Self {
            address: config.address(),
            start_message: config.start_message.clone(),
            stop_message: config.stop_message.clone(),
        }
    }

    pub fn message(&self, signal: Signal) -> &str {
        match signal {
            Signal::Start => &self.start_message,
            Signal::Stop => &self.stop_message,
        }
    }
}

impl SignalRelay for UdpSignalRelay {
    fn send(&self, signal: Signal) -> Result<(), SignalError> {
        let message = self.message(signal);
        let socket = UdpSocket::bind("0.0.0.0:0")?;
        let sent = socket.send_to(message.as_bytes(), &self.address)?;
        if sent != message.len() {
            return Err(SignalError::ShortSend {
                sent,
                expected: message.len(),
            });
        }
        log::info!("Sent {message} to {}", self.address);
        Ok(())
    }
}
