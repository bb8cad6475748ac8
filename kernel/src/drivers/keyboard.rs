//! PS/2 keyboard driver.
//!
//! The IRQ 1 handler reads a scancode from port 0x60, feeds it through the
//! `pc_keyboard` decoder (ScancodeSet1, US 104-key), and delivers the
//! resulting ASCII byte: console scroll hotkeys are consumed first, then
//! exactly one GETCH-blocked process is woken (FIFO), and only if nobody is
//! waiting does the byte land in the bounded ring for TRYGETCH.

use spin::Mutex;

/// Capacity of the pending-character ring.
pub const BUFFER_SIZE: usize = 256;

/// Modifier bitmask: Shift held.
pub const MOD_SHIFT: u8 = 0x01;
/// Modifier bitmask: Ctrl held.
pub const MOD_CTRL: u8 = 0x02;
/// Modifier bitmask: Alt held.
pub const MOD_ALT: u8 = 0x04;

static MODIFIER_STATE: core::sync::atomic::AtomicU8 = core::sync::atomic::AtomicU8::new(0);

struct CharRing {
    buf: [u8; BUFFER_SIZE],
    head: usize,
    tail: usize,
    count: usize,
}

impl CharRing {
    const fn new() -> Self {
        Self {
            buf: [0; BUFFER_SIZE],
            head: 0,
            tail: 0,
            count: 0,
        }
    }

    fn push(&mut self, byte: u8) -> bool {
        if self.count == BUFFER_SIZE {
            return false; // drop on overflow
        }
        self.buf[self.tail] = byte;
        self.tail = (self.tail + 1) % BUFFER_SIZE;
        self.count += 1;
        true
    }

    fn pop(&mut self) -> Option<u8> {
        if self.count == 0 {
            return None;
        }
        let byte = self.buf[self.head];
        self.head = (self.head + 1) % BUFFER_SIZE;
        self.count -= 1;
        Some(byte)
    }
}

static CHAR_RING: Mutex<CharRing> = Mutex::new(CharRing::new());

/// Current modifier bitmask.
pub fn modifiers() -> u8 {
    MODIFIER_STATE.load(core::sync::atomic::Ordering::Relaxed)
}

fn set_modifier(mask: u8, held: bool) {
    use core::sync::atomic::Ordering;
    if held {
        MODIFIER_STATE.fetch_or(mask, Ordering::Relaxed);
    } else {
        MODIFIER_STATE.fetch_and(!mask, Ordering::Relaxed);
    }
}

/// Deliver a decoded ASCII byte into the input path: wake one blocked
/// reader, or buffer the byte when nobody is waiting.
pub fn deliver_char(byte: u8) {
    if crate::sched::deliver_input(byte) {
        return;
    }
    CHAR_RING.lock().push(byte);
}

/// Non-blocking read of one buffered character.
pub fn try_getch() -> Option<u8> {
    CHAR_RING.lock().pop()
}

/// Drop all buffered input. Test helper.
#[cfg(not(target_os = "none"))]
pub fn clear_buffer() {
    let mut ring = CHAR_RING.lock();
    *ring = CharRing::new();
}

/// Decoder state lives only on the x86 build where `pc_keyboard` exists.
#[cfg(target_arch = "x86")]
mod decode {
    use pc_keyboard::{layouts, DecodedKey, HandleControl, KeyCode, Keyboard, ScancodeSet1};
    use spin::Mutex;

    use super::super::console::{self, ScrollKey};

    static KEYBOARD: Mutex<Keyboard<layouts::Us104Key, ScancodeSet1>> = Mutex::new(Keyboard::new(
        ScancodeSet1::new(),
        layouts::Us104Key,
        HandleControl::Ignore,
    ));

    /// Feed one raw scancode; returns a printable byte, if any.
    pub fn advance(scancode: u8) -> Option<u8> {
        let mut keyboard = KEYBOARD.lock();
        let event = keyboard.add_byte(scancode).ok().flatten()?;

        // Track modifiers from raw key events.
        match event.code {
            KeyCode::LShift | KeyCode::RShift => {
                super::set_modifier(
                    super::MOD_SHIFT,
                    event.state == pc_keyboard::KeyState::Down,
                );
            }
            KeyCode::LControl | KeyCode::RControl => {
                super::set_modifier(super::MOD_CTRL, event.state == pc_keyboard::KeyState::Down);
            }
            KeyCode::LAlt | KeyCode::RAlt => {
                super::set_modifier(super::MOD_ALT, event.state == pc_keyboard::KeyState::Down);
            }
            _ => {}
        }

        match keyboard.process_keyevent(event)? {
            DecodedKey::Unicode(ch) if ch.is_ascii() => Some(ch as u8),
            DecodedKey::RawKey(code) => {
                // Scroll hotkeys are routed to the console and never
                // delivered downstream.
                let key = match code {
                    KeyCode::ArrowUp => Some(ScrollKey::Up),
                    KeyCode::ArrowDown => Some(ScrollKey::Down),
                    KeyCode::PageUp => Some(ScrollKey::PageUp),
                    KeyCode::PageDown => Some(ScrollKey::PageDown),
                    KeyCode::Home => Some(ScrollKey::Home),
                    KeyCode::End => Some(ScrollKey::End),
                    KeyCode::F1 => Some(ScrollKey::ToggleMode),
                    _ => None,
                };
                if let Some(key) = key {
                    console::handle_scroll_key(key);
                }
                None
            }
            _ => None,
        }
    }
}

/// IRQ 1 body: read the scancode, decode, deliver.
#[cfg(all(target_arch = "x86", target_os = "none"))]
pub fn handle_irq() {
    // SAFETY: reading port 0x60 acknowledges the keyboard controller.
    let scancode = unsafe { x86::io::inb(0x60) };
    if let Some(byte) = decode::advance(scancode) {
        deliver_char(byte);
    }
}

/// Host builds deliver synthetic input directly; the decoder is bypassed.
#[cfg(not(all(target_arch = "x86", target_os = "none")))]
pub fn handle_irq() {}

/// Unmask IRQ 1.
#[cfg(all(target_arch = "x86", target_os = "none"))]
pub fn init() {
    crate::arch::x86::pic::enable_irq(1);
    crate::println!("[KBD] PS/2 keyboard on IRQ 1");
}

#[cfg(not(all(target_arch = "x86", target_os = "none")))]
pub fn init() {}
