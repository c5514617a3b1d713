//! VGA text-mode console
//!
//! 80x25 character cells at physical 0xB8000, written through volatile
//! stores. Handles `\n`, `\r`, `\t` (8-column stops) and `\b`, scrolls on
//! overflow, and keeps the hardware cursor in sync through ports
//! 0x3D4/0x3D5.

#[cfg(target_os = "none")]
use core::fmt;

/// VGA text-mode color palette; the full 16 colors per the VGA
/// specification.
#[allow(dead_code)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Color {
    Black = 0,
    Blue = 1,
    Green = 2,
    Cyan = 3,
    Red = 4,
    Magenta = 5,
    Brown = 6,
    LightGray = 7,
    DarkGray = 8,
    LightBlue = 9,
    LightGreen = 10,
    LightCyan = 11,
    LightRed = 12,
    Pink = 13,
    Yellow = 14,
    White = 15,
}

#[cfg_attr(not(target_os = "none"), allow(dead_code))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(transparent)]
struct ColorCode(u8);

impl ColorCode {
    const fn new(foreground: Color, background: Color) -> ColorCode {
        ColorCode(((background as u8) << 4) | (foreground as u8))
    }
}

pub const BUFFER_HEIGHT: usize = 25;
pub const BUFFER_WIDTH: usize = 80;

#[cfg_attr(not(target_os = "none"), allow(dead_code))]
const TAB_STOP: usize = 8;

#[cfg(target_os = "none")]
mod writer {
    use core::ptr::write_volatile;

    use lazy_static::lazy_static;
    use spin::Mutex;

    use super::*;
    use crate::arch::x86::port::Port;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    #[repr(C)]
    struct ScreenChar {
        ascii_character: u8,
        color_code: ColorCode,
    }

    #[repr(transparent)]
    struct Buffer {
        chars: [[ScreenChar; BUFFER_WIDTH]; BUFFER_HEIGHT],
    }

    pub struct Writer {
        row: usize,
        column: usize,
        color_code: ColorCode,
        buffer: &'static mut Buffer,
    }

    impl Writer {
        pub fn set_color(&mut self, foreground: Color, background: Color) {
            self.color_code = ColorCode::new(foreground, background);
        }

        pub fn clear(&mut self) {
            let blank = ScreenChar {
                ascii_character: b' ',
                color_code: self.color_code,
            };
            for row in 0..BUFFER_HEIGHT {
                for col in 0..BUFFER_WIDTH {
                    // SAFETY: volatile store into the memory-mapped VGA
                    // buffer; row/col are bounded by the array shape.
                    unsafe {
                        write_volatile(&mut self.buffer.chars[row][col], blank);
                    }
                }
            }
            self.row = 0;
            self.column = 0;
            self.update_cursor();
        }

        pub fn write_byte(&mut self, byte: u8) {
            match byte {
                b'\n' => {
                    self.column = 0;
                    self.advance_row();
                }
                b'\r' => self.column = 0,
                b'\t' => {
                    self.column = (self.column + TAB_STOP) & !(TAB_STOP - 1);
                    if self.column >= BUFFER_WIDTH {
                        self.column = 0;
                        self.advance_row();
                    }
                }
                0x08 => {
                    if self.column > 0 {
                        self.column -= 1;
                        self.put_at(b' ', self.row, self.column);
                    }
                }
                byte => {
                    self.put_at(byte, self.row, self.column);
                    self.column += 1;
                    if self.column == BUFFER_WIDTH {
                        self.column = 0;
                        self.advance_row();
                    }
                }
            }
            self.update_cursor();
        }

        pub fn write_bytes(&mut self, bytes: &[u8]) {
            for &byte in bytes {
                self.write_byte(byte);
            }
        }

        pub fn write_string(&mut self, s: &str) {
            for byte in s.bytes() {
                match byte {
                    0x20..=0x7E | b'\n' | b'\r' | b'\t' | 0x08 => self.write_byte(byte),
                    _ => self.write_byte(0xFE),
                }
            }
        }

        fn put_at(&mut self, byte: u8, row: usize, col: usize) {
            let color_code = self.color_code;
            // SAFETY: volatile store into the VGA buffer; callers keep
            // row/col inside the 25x80 grid.
            unsafe {
                write_volatile(
                    &mut self.buffer.chars[row][col],
                    ScreenChar {
                        ascii_character: byte,
                        color_code,
                    },
                );
            }
        }

        fn advance_row(&mut self) {
            self.row += 1;
            if self.row == BUFFER_HEIGHT {
                self.scroll();
            }
        }

        fn scroll(&mut self) {
            for row in 1..BUFFER_HEIGHT {
                for col in 0..BUFFER_WIDTH {
                    // SAFETY: volatile copy within the VGA buffer; `row`
                    // starts at 1 so `row - 1` stays in bounds.
                    unsafe {
                        let character = core::ptr::read_volatile(&self.buffer.chars[row][col]);
                        write_volatile(&mut self.buffer.chars[row - 1][col], character);
                    }
                }
            }
            let blank = ScreenChar {
                ascii_character: b' ',
                color_code: self.color_code,
            };
            for col in 0..BUFFER_WIDTH {
                // SAFETY: volatile store to the last row of the VGA buffer.
                unsafe {
                    write_volatile(&mut self.buffer.chars[BUFFER_HEIGHT - 1][col], blank);
                }
            }
            self.row = BUFFER_HEIGHT - 1;
        }

        fn update_cursor(&self) {
            let pos = (self.row * BUFFER_WIDTH + self.column) as u16;
            // SAFETY: the documented CRTC cursor-location register sequence.
            unsafe {
                let mut index = Port::<u8>::new(0x3D4);
                let mut data = Port::<u8>::new(0x3D5);
                index.write(0x0F);
                data.write((pos & 0xFF) as u8);
                index.write(0x0E);
                data.write((pos >> 8) as u8);
            }
        }
    }

    impl fmt::Write for Writer {
        fn write_str(&mut self, s: &str) -> fmt::Result {
            self.write_string(s);
            Ok(())
        }
    }

    lazy_static! {
        pub static ref WRITER: Mutex<Writer> = Mutex::new(Writer {
            row: 0,
            column: 0,
            color_code: ColorCode::new(Color::LightGray, Color::Black),
            // SAFETY: 0xB8000 is the VGA text buffer, identity-mapped at
            // boot and mapped into every address space this kernel builds.
            // The Mutex serializes all access.
            buffer: unsafe { &mut *(0xB8000 as *mut Buffer) },
        });
    }

    /// Enable the hardware cursor with the given scanline shape.
    pub fn enable_cursor(start: u8, end: u8) {
        // SAFETY: documented CRTC cursor-start/cursor-end register writes.
        unsafe {
            let mut index = Port::<u8>::new(0x3D4);
            let mut data = Port::<u8>::new(0x3D5);
            index.write(0x0A);
            let current = data.read();
            data.write((current & 0xC0) | start);
            index.write(0x0B);
            let current = data.read();
            data.write((current & 0xE0) | end);
        }
    }

    /// Hide the hardware cursor.
    pub fn disable_cursor() {
        // SAFETY: setting bit 5 of the cursor-start register disables the
        // cursor; a documented CRTC operation.
        unsafe {
            let mut index = Port::<u8>::new(0x3D4);
            let mut data = Port::<u8>::new(0x3D5);
            index.write(0x0A);
            data.write(0x20);
        }
    }
}

#[cfg(target_os = "none")]
pub use writer::{disable_cursor, enable_cursor, WRITER};

/// Set the active foreground/background colors.
pub fn set_color(_foreground: Color, _background: Color) {
    #[cfg(target_os = "none")]
    writer::WRITER.lock().set_color(_foreground, _background);
}

/// Clear the screen and home the cursor.
pub fn clear() {
    #[cfg(target_os = "none")]
    writer::WRITER.lock().clear();
}

/// Write raw bytes, interpreting control characters.
pub fn write_bytes(_bytes: &[u8]) {
    #[cfg(target_os = "none")]
    writer::WRITER.lock().write_bytes(_bytes);
}

/// Write a string, substituting 0xFE for bytes VGA cannot render.
pub fn write_string(_s: &str) {
    #[cfg(target_os = "none")]
    writer::WRITER.lock().write_string(_s);
}

/// Initialize the console: clear and show the cursor.
pub fn init() {
    #[cfg(target_os = "none")]
    {
        writer::WRITER.lock().clear();
        writer::enable_cursor(0, 15);
    }
}

#[doc(hidden)]
#[cfg(target_os = "none")]
pub fn _print(args: fmt::Arguments) {
    use core::fmt::Write;

    // Interrupt handlers print too; masking interrupts around the lock
    // prevents a handler from deadlocking against a half-finished line.
    super::without_interrupts(|| {
        writer::WRITER
            .lock()
            .write_fmt(args)
            .expect("VGA write_fmt failed");
    });
}
