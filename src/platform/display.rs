//! SSD1306 OLED status screen.

use super::StatusSnapshot;
use core::fmt::Write;
use embedded_graphics::mono_font::ascii::FONT_6X10;
use embedded_graphics::mono_font::{MonoTextStyle, MonoTextStyleBuilder};
use embedded_graphics::pixelcolor::BinaryColor;
use embedded_graphics::prelude::*;
use embedded_graphics::text::Text;
use heapless::String;
use ssd1306::mode::BufferedGraphicsMode;
use ssd1306::prelude::*;
use ssd1306::I2CDisplayInterface;
use ssd1306::Ssd1306;

/// Concrete display driver, generic over the HAL's I²C peripheral.
pub type Display<I2C> =
    Ssd1306<I2CInterface<I2C>, DisplaySize128x64, BufferedGraphicsMode<DisplaySize128x64>>;

/// 128 px / 6 px per glyph.
type Line = String<21>;

/// Initialise the SSD1306 display and clear the screen.
pub fn init<I2C>(i2c: I2C) -> Display<I2C>
where
    I2C: embedded_hal::i2c::I2c,
{
    let interface = I2CDisplayInterface::new(i2c);
    let mut display = Ssd1306::new(interface, DisplaySize128x64, DisplayRotation::Rotate0)
        .into_buffered_graphics_mode();
    let _ = display.init();
    display.clear_buffer();
    let _ = display.flush();
    display
}

fn text_style() -> MonoTextStyle<'static, BinaryColor> {
    MonoTextStyleBuilder::new()
        .font(&FONT_6X10)
        .text_color(BinaryColor::On)
        .build()
}

/// Baselines of the four status rows.
const ROWS: [i32; 4] = [10, 24, 38, 52];

/// Render gateway state, local node, bound radio and node count.
pub fn draw_status<I2C>(display: &mut Display<I2C>, status: &StatusSnapshot)
where
    I2C: embedded_hal::i2c::I2c,
{
    let mut lines: [Line; 4] = Default::default();
    let _ = lines[0].push_str("meshgate");
    let _ = write!(lines[1], "{} {}n", status.state.as_str(), status.nodes);
    let _ = match status.local_node_id {
        Some(id) => write!(lines[2], "node !{:08x}", id),
        None => write!(lines[2], "node -"),
    };
    let _ = match status.peer {
        // Stored least-significant first, shown most-significant first.
        Some(addr) => {
            let b = addr.bytes;
            write!(
                lines[3],
                "{:02X}:{:02X}:{:02X}:{:02X}:{:02X}:{:02X}",
                b[5], b[4], b[3], b[2], b[1], b[0]
            )
        }
        None => write!(lines[3], "no radio"),
    };

    display.clear_buffer();
    let style = text_style();
    for (line, y) in lines.iter().zip(ROWS) {
        let _ = Text::new(line, Point::new(0, y), style).draw(display);
    }
    let _ = display.flush();
}
