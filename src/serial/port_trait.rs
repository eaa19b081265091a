//! Trait abstraction for opening the dongle's serial link, so the supervisor can be tested without hardware

use async_trait::async_trait;
use tokio::io::AsyncRead;
use tokio_serial::{SerialPort, SerialPortBuilderExt};

use crate::error::{Result, TelemetryError};

/// Readable half of an open link
///
/// Dropping the boxed link closes the port.
pub trait SerialLink: AsyncRead + Send + Unpin {}

impl<T: AsyncRead + Send + Unpin> SerialLink for T {}

/// Opens the physical connection; called once per connection attempt
#[async_trait]
pub trait SerialConnector: Send + Sync {
    /// Open the link with any stale input already discarded
    async fn connect(&self) -> Result<Box<dyn SerialLink>>;

    /// Port identifier reported in status queries
    fn port_name(&self) -> &str;
}

/// Connector for a real serial device via `tokio_serial`
#[derive(Debug, Clone)]
pub struct TokioSerialConnector {
    path: String,
    baud_rate: u32,
}

impl TokioSerialConnector {
    pub fn new(path: impl Into<String>, baud_rate: u32) -> Self {
        Self { path: path.into(), baud_rate }
    }

    pub fn baud_rate(&self) -> u32 {
        self.baud_rate
    }

    /// Open the port with 8N1, no flow control
    fn open_port(&self) -> Result<tokio_serial::SerialStream> {
        let port = tokio_serial::new(&self.path, self.baud_rate)
            .data_bits(tokio_serial::DataBits::Eight)
            .parity(tokio_serial::Parity::None)
            .stop_bits(tokio_serial::StopBits::One)
            .flow_control(tokio_serial::FlowControl::None)
            .open_native_async()
            .map_err(|e| TelemetryError::Serial(format!("Failed to open {}: {}", self.path, e)))?;

        port.clear(tokio_serial::ClearBuffer::Input)
            .map_err(|e| TelemetryError::Serial(format!("Failed to clear {}: {}", self.path, e)))?;

        Ok(port)
    }
}

#[async_trait]
impl SerialConnector for TokioSerialConnector {
    async fn connect(&self) -> Result<Box<dyn SerialLink>> {
        let port = self.open_port()?;
        Ok(Box::new(port))
    }

    fn port_name(&self) -> &str {
        &self.path
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connector_reports_port_and_baud() {
        let connector = TokioSerialConnector::new("/dev/ttyACM0", 115_200);
        assert_eq!(connector.port_name(), "/dev/ttyACM0");
        assert_eq!(connector.baud_rate(), 115_200);
    }

    #[tokio::test]
    async fn test_connect_to_missing_device_fails() {
        let connector = TokioSerialConnector::new("/dev/nonexistent_serial_device_12345", 115_200);

        match connector.connect().await {
            Err(TelemetryError::Serial(msg)) => {
                assert!(msg.contains("/dev/nonexistent_serial_device_12345"));
                assert!(msg.contains("Failed to open"));
            }
            Err(other) => panic!("Expected Serial error, got: {:?}", other),
            Ok(_) => panic!("Opening a missing device should fail"),
        }
    }

    #[tokio::test]
    async fn test_mock_connector_follows_script() {
        use mocks::{MockConnector, ScriptedLink};

        let connector = MockConnector::new("mock0")
            .then_fail()
            .then_link(ScriptedLink::new());

        assert!(connector.connect().await.is_err());
        assert!(connector.connect().await.is_ok());
        assert!(connector.connect().await.is_err());
        assert_eq!(connector.calls(), 3);
    }
}
