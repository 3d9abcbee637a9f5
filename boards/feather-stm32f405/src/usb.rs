//! USB CDC-ACM channel for host mode
//!
//! The host sends one command per bulk transfer. [`UsbReceiver`] frames a
//! message at a packet shorter than the endpoint size or at a trailing line
//! terminator. Responses go out through [`UsbSender`], an
//! `embedded_io_async::Write` whose every packet is bounded by a timeout so
//! a host that stops reading aborts the transfer instead of hanging it.

use defmt::{debug, warn};
use embassy_stm32::usb::Driver;
use embassy_stm32::{bind_interrupts, peripherals, usb, Peri};
use embassy_time::{with_timeout, Duration};
use embassy_usb::class::cdc_acm::{CdcAcmClass, Receiver, Sender, State};
use embassy_usb::driver::EndpointError;
use embassy_usb::{Builder, UsbDevice};
use energymeter_core::config::{MAX_MESSAGE_LEN, TRANSFER_CHUNK};
use heapless::Vec;
use static_cell::StaticCell;

/// Vendor and product id the desktop loader looks for
const USB_VID: u16 = 0x1999;
const USB_PID: u16 = 0x0512;

/// Per-packet deadline while the host is draining a response
const PACKET_TIMEOUT: Duration = Duration::from_millis(500);

/// Room for one oversized message, so the parser can reject it as too long
const MESSAGE_CAPACITY: usize = MAX_MESSAGE_LEN + TRANSFER_CHUNK;

bind_interrupts!(struct Irqs {
    OTG_FS => usb::InterruptHandler<peripherals::USB_OTG_FS>;
});

pub type UsbDriver = Driver<'static, peripherals::USB_OTG_FS>;

/// One received command message
pub type Message = Vec<u8, MESSAGE_CAPACITY>;

/// Transport failure; the host protocol cannot answer over a broken channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, defmt::Format)]
pub enum UsbError {
    /// Host closed the port or the cable was pulled
    Disconnected,
    /// A packet was not taken within the timeout
    Timeout,
}

impl core::fmt::Display for UsbError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Disconnected => write!(f, "USB host disconnected"),
            Self::Timeout => write!(f, "USB write timed out"),
        }
    }
}

impl core::error::Error for UsbError {}

impl embedded_io_async::Error for UsbError {
    fn kind(&self) -> embedded_io_async::ErrorKind {
        match self {
            Self::Disconnected => embedded_io_async::ErrorKind::NotConnected,
            Self::Timeout => embedded_io_async::ErrorKind::TimedOut,
        }
    }
}

impl From<EndpointError> for UsbError {
    fn from(_: EndpointError) -> Self {
        // Bulk packets are never larger than the endpoint, so only disconnects remain
        Self::Disconnected
    }
}

pub struct UsbPeripherals {
    pub otg: Peri<'static, peripherals::USB_OTG_FS>,
    pub dp: Peri<'static, peripherals::PA12>,
    pub dm: Peri<'static, peripherals::PA11>,
}

/// Build the USB device and its CDC-ACM class halves
///
/// Call once; the descriptor buffers are taken from static cells.
pub fn init(
    periph: UsbPeripherals,
) -> (UsbDevice<'static, UsbDriver>, UsbSender, UsbReceiver) {
    static EP_OUT_BUFFER: StaticCell<[u8; 256]> = StaticCell::new();
    static CONFIG_DESCRIPTOR: StaticCell<[u8; 256]> = StaticCell::new();
    static BOS_DESCRIPTOR: StaticCell<[u8; 256]> = StaticCell::new();
    static CONTROL_BUF: StaticCell<[u8; 64]> = StaticCell::new();
    static SERIAL_STATE: StaticCell<State<'static>> = StaticCell::new();

    let mut driver_config = usb::Config::default();
    // PA9 is sampled as a plain input to pick the operating mode
    driver_config.vbus_detection = false;

    let driver = Driver::new_fs(
        periph.otg,
        Irqs,
        periph.dp,
        periph.dm,
        EP_OUT_BUFFER.init([0; 256]),
        driver_config,
    );

    let mut config = embassy_usb::Config::new(USB_VID, USB_PID);
    config.manufacturer = Some("Energy Meter");
    config.product = Some("Energy Meter Data Logger");
    config.serial_number = Some(embassy_stm32::uid::uid_hex());
    config.max_power = 100;
    config.max_packet_size_0 = 64;

    let mut builder = Builder::new(
        driver,
        config,
        CONFIG_DESCRIPTOR.init([0; 256]),
        BOS_DESCRIPTOR.init([0; 256]),
        &mut [], // msos_descriptor
        CONTROL_BUF.init([0; 64]),
    );

    let class = CdcAcmClass::new(
        &mut builder,
        SERIAL_STATE.init(State::new()),
        TRANSFER_CHUNK as u16,
    );
    let usb = builder.build();
    let (sender, receiver) = class.split();

    (
        usb,
        UsbSender {
            sender,
            last_full: false,
        },
        UsbReceiver { receiver },
    )
}

pub struct UsbReceiver {
    receiver: Receiver<'static, UsbDriver>,
}

impl UsbReceiver {
    /// Wait until the host opens the port
    pub async fn wait_connection(&mut self) {
        self.receiver.wait_connection().await;
    }

    /// Receive one complete message
    ///
    /// Bytes beyond the message buffer are drained and dropped; the kept
    /// prefix is still longer than any valid command.
    pub async fn read_message(&mut self) -> Result<Message, UsbError> {
        let mut message = Message::new();
        let mut packet = [0u8; TRANSFER_CHUNK];
        loop {
            let n = self.receiver.read_packet(&mut packet).await?;
            let room = message.capacity() - message.len();
            if n > room {
                warn!("message truncated to {} bytes", message.capacity());
            }
            let _ = message.extend_from_slice(&packet[..n.min(room)]);
            let terminated = matches!(message.last(), Some(b'\r' | b'\n'));
            if n < packet.len() || terminated {
                debug!("received {} byte message", message.len());
                return Ok(message);
            }
        }
    }
}

pub struct UsbSender {
    sender: Sender<'static, UsbDriver>,
    /// Last packet filled the endpoint; the transfer needs a zero-length packet
    last_full: bool,
}

impl UsbSender {
    async fn send_packet(&mut self, packet: &[u8]) -> Result<(), UsbError> {
        with_timeout(PACKET_TIMEOUT, self.sender.write_packet(packet))
            .await
            .map_err(|_| UsbError::Timeout)??;
        self.last_full = packet.len() == self.sender.max_packet_size() as usize;
        Ok(())
    }
}

impl embedded_io_async::ErrorType for UsbSender {
    type Error = UsbError;
}

impl embedded_io_async::Write for UsbSender {
    async fn write(&mut self, buf: &[u8]) -> Result<usize, UsbError> {
        if buf.is_empty() {
            return Ok(0);
        }
        let n = buf.len().min(self.sender.max_packet_size() as usize);
        self.send_packet(&buf[..n]).await?;
        Ok(n)
    }

    /// Terminate the transfer so the host sees the end of the response
    async fn flush(&mut self) -> Result<(), UsbError> {
        if self.last_full {
            self.send_packet(&[]).await?;
        }
        Ok(())
    }
}
