//! Spectrum-style video control unit: beam timing, the frame interrupt and an
//! indexed-colour frame buffer built by snooping screen-memory writes.

use std::any::Any;

use super::clock::DeviceClock;
use super::device::{Device, DeviceState, DeviceType};
use super::name::Name;
use super::signal::{SignalBus, SignalId};

pub const VRAM_BASE: u16 = 0x4000;
pub const VRAM_SIZE: usize = 0x1B00;
const ATTR_OFFSET: usize = 0x1800;

/// Pixel-clock counts for each part of a line and lines for each part of a frame.
///
/// A line starts at the first display pixel, a frame at the first flyback line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VideoTiming {
    pub h_display: u16,
    pub h_right_border: u16,
    pub h_flyback: u16,
    pub h_left_border: u16,
    pub v_flyback: u16,
    pub v_top_border: u16,
    pub v_display: u16,
    pub v_bottom_border: u16,
    /// Pixel clocks INT stays asserted at the start of a frame.
    pub int_length: u16,
    /// Frames per FLASH phase.
    pub flash_frames: u64,
}

impl VideoTiming {
    pub const SPECTRUM_48K: Self = Self {
        h_display: 256,
        h_right_border: 48,
        h_flyback: 96,
        h_left_border: 48,
        v_flyback: 8,
        v_top_border: 56,
        v_display: 192,
        v_bottom_border: 56,
        int_length: 64,
        flash_frames: 16,
    };

    pub fn line_length(&self) -> u16 {
        self.h_display + self.h_right_border + self.h_flyback + self.h_left_border
    }

    pub fn frame_lines(&self) -> u16 {
        self.v_flyback + self.v_top_border + self.v_display + self.v_bottom_border
    }

    pub fn screen_width(&self) -> usize {
        usize::from(self.h_left_border + self.h_display + self.h_right_border)
    }

    pub fn screen_height(&self) -> usize {
        usize::from(self.v_top_border + self.v_display + self.v_bottom_border)
    }

    /// Maps a beam position to a buffer coordinate, or `None` during flyback.
    fn screen_xy(&self, h: u16, v: u16) -> Option<(usize, usize)> {
        let y = v.checked_sub(self.v_flyback)?;
        let border_end = self.h_display + self.h_right_border;
        let x = if h < border_end {
            h + self.h_left_border
        } else if h >= border_end + self.h_flyback {
            h - border_end - self.h_flyback
        } else {
            return None;
        };
        Some((usize::from(x), usize::from(y)))
    }

    /// Maps a buffer coordinate to a display pixel, or `None` in the border.
    fn display_xy(&self, x: usize, y: usize) -> Option<(usize, usize)> {
        let dx = x.checked_sub(usize::from(self.h_left_border))?;
        let dy = y.checked_sub(usize::from(self.v_top_border))?;
        (dx < usize::from(self.h_display) && dy < usize::from(self.v_display)).then_some((dx, dy))
    }
}

impl Default for VideoTiming {
    fn default() -> Self {
        Self::SPECTRUM_48K
    }
}

/// The display snapshot: timing, beam position and the raw indexed buffer.
///
/// Each byte is a colour index 0-15, bright in bit 3. RGBA conversion is left to the viewer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VideoFrame {
    pub timing: VideoTiming,
    pub beam_x: u16,
    pub beam_y: u16,
    pub frame: u64,
    pub border: u8,
    pub width: usize,
    pub height: usize,
    pub pixels: Vec<u8>,
}

impl VideoFrame {
    pub fn pixel(&self, x: usize, y: usize) -> Option<u8> {
        (x < self.width).then(|| self.pixels.get(y * self.width + x).copied()).flatten()
    }
}

pub struct Vcu {
    name: Name,
    hz: Option<u64>,
    timing: VideoTiming,
    h: u16,
    v: u16,
    frame: u64,
    border: u8,
    int_driven: bool,
    vram: Box<[u8]>,
    pixels: Vec<u8>,
}

impl Vcu {
    /// A 48K video unit on the 7 MHz pixel clock.
    pub fn new(name: impl Into<Name>) -> Self {
        let timing = VideoTiming::SPECTRUM_48K;
        Self {
            name: name.into(),
            hz: Some(7_000_000),
            timing,
            h: 0,
            v: 0,
            frame: 0,
            border: 0,
            int_driven: false,
            vram: vec![0u8; VRAM_SIZE].into_boxed_slice(),
            pixels: vec![0u8; timing.screen_width() * timing.screen_height()],
        }
    }

    pub fn with_frequency(mut self, hz: Option<u64>) -> Self {
        self.hz = hz;
        self
    }

    pub fn beam(&self) -> (u16, u16) {
        (self.h, self.v)
    }

    pub fn border(&self) -> u8 {
        self.border
    }

    fn snoop(&mut self, bus: &SignalBus) {
        if !bus.active(SignalId::Wr) {
            return;
        }
        if bus.active(SignalId::Mreq) && !bus.active(SignalId::Rfsh) {
            let offset = usize::from(bus.address().wrapping_sub(VRAM_BASE));
            if offset < VRAM_SIZE {
                self.vram[offset] = bus.data();
            }
        } else if bus.active(SignalId::Iorq) && !bus.active(SignalId::M1) && bus.address() & 1 == 0 {
            let border = bus.data() & 0x07;
            if border != self.border {
                log::trace!("{}: border {}", self.name, border);
            }
            self.border = border;
        }
    }

    fn flash_on(&self) -> bool {
        (self.frame / self.timing.flash_frames) % 2 == 1
    }

    fn colour_at(&self, x: usize, y: usize) -> u8 {
        let Some((dx, dy)) = self.timing.display_xy(x, y) else {
            return self.border;
        };
        let bitmap = ((dy & 0xC0) << 5) | ((dy & 0x07) << 8) | ((dy & 0x38) << 2) | (dx >> 3);
        let attr = self.vram[ATTR_OFFSET + (dy / 8) * 32 + dx / 8];
        let mut set = self.vram[bitmap] & (0x80 >> (dx & 7)) != 0;
        if attr & 0x80 != 0 && self.flash_on() {
            set = !set;
        }
        let bright = (attr & 0x40) >> 3;
        let colour = if set { attr & 0x07 } else { (attr >> 3) & 0x07 };
        bright | colour
    }

    fn advance_beam(&mut self) {
        self.h += 1;
        if self.h == self.timing.line_length() {
            self.h = 0;
            self.v += 1;
            if self.v == self.timing.frame_lines() {
                self.v = 0;
                self.frame += 1;
                log::trace!("{}: frame {}", self.name, self.frame);
            }
        }
    }
}

impl Device for Vcu {
    fn name(&self) -> Name {
        self.name
    }

    fn device_type(&self) -> DeviceType {
        DeviceType::VideoControlUnit
    }

    fn frequency(&self) -> Option<u64> {
        self.hz
    }

    fn tick(&mut self, _clock: &mut DeviceClock<'_>, bus: &mut SignalBus) {
        self.snoop(bus);

        let int = self.v == 0 && self.h < self.timing.int_length;
        if int != self.int_driven {
            bus.assert_line(SignalId::Int, int);
            self.int_driven = int;
        }

        if let Some((x, y)) = self.timing.screen_xy(self.h, self.v) {
            let colour = self.colour_at(x, y);
            self.pixels[y * self.timing.screen_width() + x] = colour;
        }
        self.advance_beam();
    }

    fn reset(&mut self) {
        // Screen memory is a mirror of RAM, which survives a reset.
        self.h = 0;
        self.v = 0;
        self.frame = 0;
        self.border = 0;
        self.int_driven = false;
        self.pixels.fill(0);
    }

    fn state(&self) -> DeviceState {
        DeviceState::Video(Box::new(VideoFrame {
            timing: self.timing,
            beam_x: self.h,
            beam_y: self.v,
            frame: self.frame,
            border: self.border,
            width: self.timing.screen_width(),
            height: self.timing.screen_height(),
            pixels: self.pixels.clone(),
        }))
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
