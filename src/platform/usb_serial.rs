//! USB CDC-ACM console.
//!
//! Outbound, it is the gateway's telemetry [`Sink`]: each publish is queued
//! as one line (see [`crate::serial`]) and written by [`writer_task`].
//! Inbound, [`reader_task`] turns every typed line into a text message for
//! the mesh.

use super::{OutboundText, SinkLine};
use crate::config::{self, MAX_DATA_PAYLOAD_LEN, SINK_QUEUE_DEPTH};
use crate::serial::{sink_line, LineAssembler};
use crate::sink::Sink;
use core::sync::atomic::{AtomicBool, Ordering};
use embassy_nrf::usb::vbus_detect::HardwareVbusDetect;
use embassy_nrf::usb::Driver;
use embassy_nrf::{self, bind_interrupts, peripherals};
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::{Receiver, Sender};
use embassy_usb::class::cdc_acm::{self, CdcAcmClass, State};
use embassy_usb::driver::EndpointError;
use embassy_usb::{Builder, Config, UsbDevice};
use static_cell::StaticCell;

bind_interrupts!(struct Irqs {
    USBD => embassy_nrf::usb::InterruptHandler<peripherals::USBD>;
    CLOCK_POWER => embassy_nrf::usb::vbus_detect::InterruptHandler;
});

pub type UsbDriver = Driver<'static, peripherals::USBD, HardwareVbusDetect>;

const MAX_PACKET_SIZE: u16 = 64;

static CDC_STATE: StaticCell<State> = StaticCell::new();
static USB_CONFIG_DESC: StaticCell<[u8; 256]> = StaticCell::new();
static USB_BOS_DESC: StaticCell<[u8; 256]> = StaticCell::new();
static USB_MSOS_DESC: StaticCell<[u8; 256]> = StaticCell::new();
static USB_CTRL_BUF: StaticCell<[u8; 128]> = StaticCell::new();

/// Set while a host has the port configured.
static HOST_ATTACHED: AtomicBool = AtomicBool::new(false);

/// Build result: the device runner plus both halves of the CDC class.
pub struct UsbSerial {
    pub device: UsbDevice<'static, UsbDriver>,
    pub sender: cdc_acm::Sender<'static, UsbDriver>,
    pub receiver: cdc_acm::Receiver<'static, UsbDriver>,
}

/// Initialise the USB stack with a single CDC-ACM function.
///
/// Must be called exactly once.  All static buffers are consumed here.
pub fn init(usbd: peripherals::USBD) -> UsbSerial {
    let driver = Driver::new(usbd, Irqs, HardwareVbusDetect::new(Irqs));

    let mut usb_config = Config::new(config::USB_VID, config::USB_PID);
    usb_config.manufacturer = Some(config::USB_MANUFACTURER);
    usb_config.product = Some(config::USB_PRODUCT);
    usb_config.serial_number = Some(config::USB_SERIAL_NUMBER);
    usb_config.max_power = 100; // mA
    usb_config.max_packet_size_0 = 64;
    // Interface association descriptors, required by Windows for CDC.
    usb_config.device_class = 0xEF;
    usb_config.device_sub_class = 0x02;
    usb_config.device_protocol = 0x01;
    usb_config.composite_with_iads = true;

    let mut builder = Builder::new(
        driver,
        usb_config,
        USB_CONFIG_DESC.init([0u8; 256]),
        USB_BOS_DESC.init([0u8; 256]),
        USB_MSOS_DESC.init([0u8; 256]),
        USB_CTRL_BUF.init([0u8; 128]),
    );

    let class = CdcAcmClass::new(&mut builder, CDC_STATE.init(State::new()), MAX_PACKET_SIZE);
    let (sender, receiver) = class.split();
    let device = builder.build();

    info!("USB CDC-ACM console initialised");

    UsbSerial {
        device,
        sender,
        receiver,
    }
}

/// Run the USB device stack - must be spawned as a dedicated Embassy task.
pub async fn run_usb_device(mut device: UsbDevice<'static, UsbDriver>) -> ! {
    info!("USB device task started");
    device.run().await
}

/// Telemetry sink feeding [`writer_task`].
///
/// Publishing never waits: a full queue or an oversized line is dropped with
/// a warning.
pub struct UsbSink {
    lines: Sender<'static, CriticalSectionRawMutex, SinkLine, SINK_QUEUE_DEPTH>,
}

impl UsbSink {
    pub fn new(lines: Sender<'static, CriticalSectionRawMutex, SinkLine, SINK_QUEUE_DEPTH>) -> Self {
        Self { lines }
    }
}

impl Sink for UsbSink {
    fn is_connected(&self) -> bool {
        HOST_ATTACHED.load(Ordering::Relaxed)
    }

    fn publish(&mut self, topic: &str, payload: &str, retain: bool) {
        let Some(line) = sink_line(topic, payload, retain) else {
            warn!("sink line too long, dropping {}", topic);
            return;
        };
        if self.lines.try_send(line).is_err() {
            warn!("sink queue full, dropping {}", topic);
        }
    }
}

/// Write queued sink lines to the host, one line per publish.
pub async fn writer_task(
    mut sender: cdc_acm::Sender<'static, UsbDriver>,
    lines: Receiver<'static, CriticalSectionRawMutex, SinkLine, SINK_QUEUE_DEPTH>,
) -> ! {
    info!("USB writer task started");
    loop {
        sender.wait_connection().await;
        HOST_ATTACHED.store(true, Ordering::Relaxed);
        info!("USB host attached");

        loop {
            let line = lines.receive().await;
            if write_line(&mut sender, line.as_bytes()).await.is_err() {
                break;
            }
        }

        HOST_ATTACHED.store(false, Ordering::Relaxed);
        warn!("USB host detached");
    }
}

async fn write_line(
    sender: &mut cdc_acm::Sender<'static, UsbDriver>,
    bytes: &[u8],
) -> Result<(), EndpointError> {
    for chunk in bytes.chunks(usize::from(MAX_PACKET_SIZE)) {
        sender.write_packet(chunk).await?;
    }
    sender.write_packet(b"\r\n").await
}

/// Forward every line typed on the console to `outbox`.
pub async fn reader_task(
    mut receiver: cdc_acm::Receiver<'static, UsbDriver>,
    outbox: Sender<'static, CriticalSectionRawMutex, OutboundText, 2>,
) -> ! {
    info!("USB reader task started");
    let mut assembler = LineAssembler::<MAX_DATA_PAYLOAD_LEN>::new();
    let mut buf = [0u8; MAX_PACKET_SIZE as usize];

    loop {
        receiver.wait_connection().await;
        while let Ok(n) = receiver.read_packet(&mut buf).await {
            for &byte in &buf[..n] {
                if let Some(line) = assembler.push(byte) {
                    debug!("console text ({} bytes)", line.len());
                    outbox.send(line).await;
                }
            }
        }
    }
}
