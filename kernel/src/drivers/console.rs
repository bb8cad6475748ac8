//! Scrollable text console.
//!
//! An 80x24 visible window over a 1000-line scrollback ring, plus a
//! reserved status line showing the scroll mode. On bare metal the visible
//! window is rendered into VGA text memory through the kernel window; on
//! the host the ring alone backs the unit tests and `println!` output is
//! echoed to stdout.

use spin::Mutex;

/// Visible text geometry.
pub const CONSOLE_COLS: usize = 80;
pub const CONSOLE_ROWS: usize = 24;

/// Scrollback depth.
pub const SCROLLBACK_LINES: usize = 1000;

/// VGA attribute bytes (foreground | background << 4).
pub mod color {
    pub const WHITE_ON_BLUE: u8 = 0x1F;
    pub const YELLOW_ON_BLUE: u8 = 0x1E;
    pub const GREEN_ON_BLUE: u8 = 0x1A;
    pub const RED_ON_BLUE: u8 = 0x1C;
    pub const CYAN_ON_BLUE: u8 = 0x1B;
    pub const MAGENTA_ON_BLUE: u8 = 0x1D;
    pub const GREY_ON_BLACK: u8 = 0x07;
}

/// Console hotkeys handled in scroll mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScrollKey {
    Up,
    Down,
    PageUp,
    PageDown,
    Home,
    End,
    /// F1 toggles scroll mode on and off.
    ToggleMode,
}

#[derive(Clone, Copy)]
struct Line {
    text: [u8; CONSOLE_COLS],
    color: u8,
    len: usize,
}

impl Line {
    const fn blank() -> Self {
        Self {
            text: [b' '; CONSOLE_COLS],
            color: color::WHITE_ON_BLUE,
            len: 0,
        }
    }
}

struct Console {
    lines: [Line; SCROLLBACK_LINES],
    /// Ring head: index of the oldest stored line.
    head: usize,
    count: usize,
    /// Column cursor within the newest line (printf-style output).
    cursor_col: usize,
    /// Lines scrolled up from the bottom while in scroll mode.
    scroll_offset: usize,
    scroll_mode: bool,
}

impl Console {
    const fn new() -> Self {
        Self {
            lines: [Line::blank(); SCROLLBACK_LINES],
            head: 0,
            count: 0,
            cursor_col: 0,
            scroll_offset: 0,
            scroll_mode: false,
        }
    }

    fn newest_index(&self) -> usize {
        (self.head + self.count - 1) % SCROLLBACK_LINES
    }

    fn push_line(&mut self, color: u8) {
        if self.count < SCROLLBACK_LINES {
            self.count += 1;
        } else {
            self.head = (self.head + 1) % SCROLLBACK_LINES;
        }
        let idx = self.newest_index();
        self.lines[idx] = Line::blank();
        self.lines[idx].color = color;
        self.cursor_col = 0;
    }

    /// Append a full line (auto-newline semantics).
    fn add_message(&mut self, text: &str, color: u8) {
        self.push_line(color);
        for byte in text.bytes() {
            if byte == b'\n' {
                self.push_line(color);
                continue;
            }
            self.put_byte(byte, color);
        }
        // Close the line: the next byte from any source wraps to a new one.
        self.cursor_col = CONSOLE_COLS;
        if !self.scroll_mode {
            self.scroll_offset = 0;
        }
    }

    /// Append without implicit newlines; `\n` advances explicitly.
    fn add_printf(&mut self, text: &str, color: u8) {
        if self.count == 0 {
            self.push_line(color);
        }
        for byte in text.bytes() {
            if byte == b'\n' {
                self.push_line(color);
                continue;
            }
            self.put_byte(byte, color);
        }
        if !self.scroll_mode {
            self.scroll_offset = 0;
        }
    }

    fn put_byte(&mut self, byte: u8, color: u8) {
        if self.count == 0 {
            self.push_line(color);
        }
        if self.cursor_col >= CONSOLE_COLS {
            self.push_line(color);
        }
        let idx = self.newest_index();
        self.lines[idx].text[self.cursor_col] = byte;
        self.lines[idx].color = color;
        self.cursor_col += 1;
        if self.cursor_col > self.lines[idx].len {
            self.lines[idx].len = self.cursor_col;
        }
    }

    fn max_scroll(&self) -> usize {
        self.count.saturating_sub(CONSOLE_ROWS)
    }

    /// Handle a scroll hotkey; returns whether the key was consumed.
    /// Hotkeys never reach the input queue (non-delivering).
    fn handle_key(&mut self, key: ScrollKey) -> bool {
        match key {
            ScrollKey::ToggleMode => {
                self.scroll_mode = !self.scroll_mode;
                if !self.scroll_mode {
                    self.scroll_offset = 0;
                }
                true
            }
            _ if !self.scroll_mode => false,
            ScrollKey::Up => {
                self.scroll_offset = (self.scroll_offset + 1).min(self.max_scroll());
                true
            }
            ScrollKey::Down => {
                self.scroll_offset = self.scroll_offset.saturating_sub(1);
                true
            }
            ScrollKey::PageUp => {
                self.scroll_offset = (self.scroll_offset + CONSOLE_ROWS).min(self.max_scroll());
                true
            }
            ScrollKey::PageDown => {
                self.scroll_offset = self.scroll_offset.saturating_sub(CONSOLE_ROWS);
                true
            }
            ScrollKey::Home => {
                self.scroll_offset = self.max_scroll();
                true
            }
            ScrollKey::End => {
                self.scroll_offset = 0;
                true
            }
        }
    }

    /// The window of lines currently visible, oldest first.
    fn visible(&self) -> impl Iterator<Item = &Line> {
        let visible = self.count.min(CONSOLE_ROWS);
        let newest_visible = self.count - self.scroll_offset.min(self.max_scroll());
        let start = newest_visible.saturating_sub(visible);
        (start..newest_visible).map(move |i| &self.lines[(self.head + i) % SCROLLBACK_LINES])
    }
}

static CONSOLE: Mutex<Console> = Mutex::new(Console::new());

/// Append a colored line (auto-newline) and refresh the display.
pub fn add_message(text: &str, color: u8) {
    CONSOLE.lock().add_message(text, color);
    refresh();
}

/// Append printf-style output (explicit newlines only) and refresh.
pub fn add_printf_output(text: &str, color: u8) {
    CONSOLE.lock().add_printf(text, color);
    refresh();
}

/// Route a scroll hotkey to the console. Returns true when consumed.
pub fn handle_scroll_key(key: ScrollKey) -> bool {
    let consumed = CONSOLE.lock().handle_key(key);
    if consumed {
        refresh();
    }
    consumed
}

pub fn in_scroll_mode() -> bool {
    CONSOLE.lock().scroll_mode
}

/// The visible window as owned strings, oldest first (tests and status
/// reporting).
#[cfg(feature = "alloc")]
pub fn visible_lines() -> alloc::vec::Vec<alloc::string::String> {
    use alloc::string::String;

    let console = CONSOLE.lock();
    console
        .visible()
        .map(|line| {
            let mut s = String::new();
            for &b in &line.text[..line.len] {
                s.push(b as char);
            }
            s
        })
        .collect()
}

#[doc(hidden)]
pub fn _console_print(args: core::fmt::Arguments) {
    // On bare metal `println!` feeds the scrollback; the host build routes
    // it to stdout so the test harness captures kernel chatter without
    // touching the console state under test.
    #[cfg(target_os = "none")]
    {
        use core::fmt::Write;

        struct PrintfSink;
        impl core::fmt::Write for PrintfSink {
            fn write_str(&mut self, s: &str) -> core::fmt::Result {
                CONSOLE.lock().add_printf(s, color::WHITE_ON_BLUE);
                Ok(())
            }
        }
        let _ = PrintfSink.write_fmt(args);
        refresh();
    }

    #[cfg(not(target_os = "none"))]
    {
        use std::io::Write as _;
        let _ = std::io::stdout().write_fmt(args);
    }
}

/// Render the visible window plus the status line into VGA text memory.
#[cfg(all(target_arch = "x86", target_os = "none"))]
fn refresh() {
    const VGA_TEXT_BASE: u32 = 0xB8000;
    let console = CONSOLE.lock();
    let vga = crate::mm::phys_to_virt(VGA_TEXT_BASE) as *mut u16;

    let mut row = 0usize;
    for line in console.visible() {
        for col in 0..CONSOLE_COLS {
            let ch = line.text[col];
            let cell = ((line.color as u16) << 8) | ch as u16;
            // SAFETY: row/col stay inside the 80x25 text buffer.
            unsafe { vga.add(row * CONSOLE_COLS + col).write_volatile(cell) };
        }
        row += 1;
    }
    for blank_row in row..CONSOLE_ROWS {
        for col in 0..CONSOLE_COLS {
            let cell = ((color::WHITE_ON_BLUE as u16) << 8) | b' ' as u16;
            // SAFETY: as above.
            unsafe { vga.add(blank_row * CONSOLE_COLS + col).write_volatile(cell) };
        }
    }

    // Status line on row 24.
    let status: &[u8] = if console.scroll_mode {
        b"-- SCROLL (F1 to exit, arrows/PgUp/PgDn/Home/End) --"
    } else {
        b"EmberOS"
    };
    for col in 0..CONSOLE_COLS {
        let ch = *status.get(col).unwrap_or(&b' ');
        let cell = ((color::GREY_ON_BLACK as u16) << 8) | ch as u16;
        // SAFETY: row 24 is the last row of the text buffer.
        unsafe { vga.add(CONSOLE_ROWS * CONSOLE_COLS + col).write_volatile(cell) };
    }
}

#[cfg(not(all(target_arch = "x86", target_os = "none")))]
fn refresh() {}
