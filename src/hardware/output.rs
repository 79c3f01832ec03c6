//! Line-oriented output channels
//!
//! Every combiner output is a line of ASCII text. Sinks add the transport's
//! line terminator (CRLF) unless the text already ends with one, as NMEA
//! sentence bundles do.

use crate::hardware::{CommError, CommResult};
use serialport::{DataBits, FlowControl, Parity, SerialPort, StopBits};
use std::io::Write;
use std::net::{SocketAddr, UdpSocket};
use std::time::Duration;
use tracing::debug;

const LINE_TERMINATOR: &str = "\r\n";

/// Destination for output lines
pub trait LineSink: Send {
    fn open(&mut self) -> CommResult<()>;

    fn close(&mut self) -> CommResult<()>;

    fn is_open(&self) -> bool;

    /// Send one line (or a pre-terminated bundle of lines)
    fn send_line(&mut self, line: &str) -> CommResult<()>;

    /// Human-readable destination, used in logs
    fn describe(&self) -> String;
}

/// Append the line terminator unless already present
pub fn terminated(line: &str) -> String {
    if line.ends_with(LINE_TERMINATOR) {
        line.to_string()
    } else {
        format!("{}{}", line, LINE_TERMINATOR)
    }
}

/// Sends each line as one UDP datagram. Broadcast targets are allowed.
pub struct UdpLineSink {
    target: SocketAddr,
    socket: Option<UdpSocket>,
}

impl UdpLineSink {
    pub fn new(target: SocketAddr) -> Self {
        Self { target, socket: None }
    }

    /// Create and open in one step
    pub fn connect(target: SocketAddr) -> CommResult<Self> {
        let mut sink = Self::new(target);
        sink.open()?;
        Ok(sink)
    }

    pub fn target(&self) -> SocketAddr {
        self.target
    }
}

impl LineSink for UdpLineSink {
    fn open(&mut self) -> CommResult<()> {
        if self.socket.is_some() {
            return Ok(());
        }

        let socket = UdpSocket::bind("0.0.0.0:0").map_err(|e| CommError::io("bind", &e))?;
        socket
            .set_broadcast(true)
            .map_err(|e| CommError::io("set_broadcast", &e))?;
        self.socket = Some(socket);
        Ok(())
    }

    fn close(&mut self) -> CommResult<()> {
        self.socket = None;
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.socket.is_some()
    }

    fn send_line(&mut self, line: &str) -> CommResult<()> {
        let socket = self.socket.as_ref().ok_or_else(|| CommError::NotConnected {
            link: self.describe(),
        })?;

        let data = terminated(line);
        socket
            .send_to(data.as_bytes(), self.target)
            .map_err(|e| CommError::io("send_to", &e))?;
        debug!("{} << {}", self.target, line.trim_end());
        Ok(())
    }

    fn describe(&self) -> String {
        format!("UDP {}", self.target)
    }
}

const SERIAL_WRITE_TIMEOUT: Duration = Duration::from_millis(100);

/// Writes lines to a serial port, 8N1 without flow control
pub struct SerialLineSink {
    port_name: String,
    baud_rate: u32,
    port: Option<Box<dyn SerialPort>>,
}

impl SerialLineSink {
    pub fn new(port_name: impl Into<String>, baud_rate: u32) -> Self {
        Self {
            port_name: port_name.into(),
            baud_rate,
            port: None,
        }
    }

    pub fn port_name(&self) -> &str {
        &self.port_name
    }
}

impl LineSink for SerialLineSink {
    fn open(&mut self) -> CommResult<()> {
        if self.port.is_some() {
            return Ok(());
        }

        let port = serialport::new(&self.port_name, self.baud_rate)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(FlowControl::None)
            .timeout(SERIAL_WRITE_TIMEOUT)
            .open()
            .map_err(|e| CommError::Io {
                operation: format!("open {}", self.port_name),
                details: e.to_string(),
            })?;

        self.port = Some(port);
        Ok(())
    }

    fn close(&mut self) -> CommResult<()> {
        self.port = None;
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.port.is_some()
    }

    fn send_line(&mut self, line: &str) -> CommResult<()> {
        let link = self.describe();
        let port = self
            .port
            .as_mut()
            .ok_or(CommError::NotConnected { link })?;

        port.write_all(terminated(line).as_bytes())
            .map_err(|e| CommError::io_with_timeout("write", &e, SERIAL_WRITE_TIMEOUT.as_millis() as u32))?;
        debug!("{} << {}", self.port_name, line.trim_end());
        Ok(())
    }

    fn describe(&self) -> String {
        format!("serial {} @ {}", self.port_name, self.baud_rate)
    }
}
