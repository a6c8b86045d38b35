//! meshgate firmware for the nRF52840 dongle.
//!
//! Task layout:
//!
//! - `softdevice_task` - SoftDevice event pump
//! - `ble_task` - executes driver commands, reports link events
//! - `usb_task`, `usb_writer_task`, `usb_reader_task` - CDC-ACM console
//! - `display_task` - status screen
//! - `main` - owns the gateway; multiplexes link events, the tick timer and
//!   console text

#![no_std]
#![no_main]

use defmt::{info, unwrap, warn};
use defmt_rtt as _;
use embassy_executor::Spawner;
use embassy_futures::select::{select3, Either3};
use embassy_nrf::interrupt::{self, InterruptExt, Priority};
use embassy_nrf::{bind_interrupts, peripherals, twim};
use embassy_time::{Duration, Instant, Ticker, Timer};
use embassy_usb::UsbDevice;
use embassy_usb::class::cdc_acm;
use meshgate::codec::MeshtasticCodec;
use meshgate::config::{GatewayConfig, DISPLAY_REFRESH_MS, TICK_PERIOD_MS};
use meshgate::platform::softdevice::{self, ChannelDriver};
use meshgate::platform::usb_serial::{self, UsbDriver, UsbSink};
use meshgate::platform::{
    display, CommandChannel, EventChannel, LineChannel, OutboxChannel, StatusSignal,
    StatusSnapshot,
};
use meshgate::Gateway;
use nrf_softdevice::Softdevice;
use panic_probe as _;

type Firmware = Gateway<ChannelDriver, UsbSink, MeshtasticCodec>;

static EVENTS: EventChannel = EventChannel::new();
static COMMANDS: CommandChannel = CommandChannel::new();
static SINK_LINES: LineChannel = LineChannel::new();
static OUTBOX: OutboxChannel = OutboxChannel::new();
static STATUS: StatusSignal = StatusSignal::new();

bind_interrupts!(struct Irqs {
    SPIM0_SPIS0_TWIM0_TWIS0_SPI0_TWI0 => twim::InterruptHandler<peripherals::TWISPI0>;
});

#[embassy_executor::task]
async fn softdevice_task(sd: &'static Softdevice) -> ! {
    sd.run().await
}

#[embassy_executor::task]
async fn ble_task(sd: &'static Softdevice) -> ! {
    softdevice::ble_task(sd, COMMANDS.receiver(), EVENTS.sender()).await
}

#[embassy_executor::task]
async fn usb_task(device: UsbDevice<'static, UsbDriver>) -> ! {
    usb_serial::run_usb_device(device).await
}

#[embassy_executor::task]
async fn usb_writer_task(sender: cdc_acm::Sender<'static, UsbDriver>) -> ! {
    usb_serial::writer_task(sender, SINK_LINES.receiver()).await
}

#[embassy_executor::task]
async fn usb_reader_task(receiver: cdc_acm::Receiver<'static, UsbDriver>) -> ! {
    usb_serial::reader_task(receiver, OUTBOX.sender()).await
}

#[embassy_executor::task]
async fn display_task(
    twi: peripherals::TWISPI0,
    sda: peripherals::P0_26,
    scl: peripherals::P0_27,
) -> ! {
    let i2c = twim::Twim::new(twi, Irqs, sda, scl, twim::Config::default());
    let mut screen = display::init(i2c);
    let mut status = StatusSnapshot::idle();
    loop {
        display::draw_status(&mut screen, &status);
        Timer::after(Duration::from_millis(DISPLAY_REFRESH_MS)).await;
        status = STATUS.wait().await;
    }
}

fn snapshot(gateway: &Firmware) -> StatusSnapshot {
    StatusSnapshot {
        state: gateway.state(),
        local_node_id: gateway.local_node_id(),
        peer: gateway.peer_address(),
        nodes: gateway.nodes().len(),
    }
}

#[embassy_executor::main]
async fn main(spawner: Spawner) {
    info!("meshgate starting");

    // The SoftDevice reserves interrupt priorities 0, 1 and 4.
    let mut nrf_config = embassy_nrf::config::Config::default();
    nrf_config.gpiote_interrupt_priority = Priority::P2;
    nrf_config.time_interrupt_priority = Priority::P2;
    let p = embassy_nrf::init(nrf_config);
    interrupt::USBD.set_priority(Priority::P2);
    interrupt::SPIM0_SPIS0_TWIM0_TWIS0_SPI0_TWI0.set_priority(Priority::P3);

    let config = match GatewayConfig::from_build_env() {
        Ok(config) => config,
        Err(e) => defmt::panic!("invalid build configuration: {}", e),
    };

    let sd: &'static Softdevice = softdevice::enable();
    unwrap!(spawner.spawn(softdevice_task(sd)));

    let usb = usb_serial::init(p.USBD);
    unwrap!(spawner.spawn(usb_task(usb.device)));
    unwrap!(spawner.spawn(usb_writer_task(usb.sender)));
    unwrap!(spawner.spawn(usb_reader_task(usb.receiver)));
    unwrap!(spawner.spawn(display_task(p.TWISPI0, p.P0_26, p.P0_27)));

    let driver = ChannelDriver::new(COMMANDS.sender());
    let sink = UsbSink::new(SINK_LINES.sender());
    let mut gateway: Firmware = Gateway::new(driver, sink, MeshtasticCodec::new(), config);
    gateway.start();

    unwrap!(spawner.spawn(ble_task(sd)));

    let mut ticker = Ticker::every(Duration::from_millis(TICK_PERIOD_MS));
    loop {
        match select3(EVENTS.receive(), ticker.next(), OUTBOX.receive()).await {
            Either3::First(event) => gateway.handle_event(event),
            Either3::Second(()) => gateway.tick(Instant::now().as_millis()),
            Either3::Third(text) => {
                if let Err(e) = gateway.send_text(&text, Instant::now().as_millis()) {
                    warn!("console text not sent: {}", e);
                }
            }
        }
        STATUS.signal(snapshot(&gateway));
    }
}
