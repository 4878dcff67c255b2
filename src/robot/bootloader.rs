//! Over-the-air program loader.
//!
//! Program pages arrive three words at a time in `BootpgmPage` frames.
//! Once a page buffer holds a full flash page it is written out, and when
//! every announced page is in place the new program is started.

use tracing::{debug, info, warn};

use crate::phy::frame::{BootPayload, Message, MessageType};
use crate::utils::consts::{DEFAULT_PAGE_TOTAL, PAGE_SIZE, PAGE_TABLE_LEN};

const PAGE_WORDS: usize = PAGE_SIZE / 2;

/// Program memory that can be written one page at a time.
pub trait Flash {
    fn write_page(&mut self, page_address: u8, words: &[u16]);
}

/// Flash held in memory, for tests and simulation.
#[derive(Debug, Clone)]
pub struct MemoryFlash {
    pages: Vec<Option<Vec<u16>>>,
}

impl Default for MemoryFlash {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryFlash {
    pub fn new() -> Self {
        Self {
            pages: vec![None; PAGE_TABLE_LEN],
        }
    }

    pub fn page(&self, page_address: u8) -> Option<&[u16]> {
        self.pages.get(page_address as usize)?.as_deref()
    }

    pub fn written(&self) -> usize {
        self.pages.iter().filter(|p| p.is_some()).count()
    }
}

impl Flash for MemoryFlash {
    fn write_page(&mut self, page_address: u8, words: &[u16]) {
        if let Some(slot) = self.pages.get_mut(page_address as usize) {
            *slot = Some(words.to_vec());
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootAction {
    /// Page data stored, page not complete yet.
    Buffered,
    /// A full page was written to flash.
    PageWritten(u8),
    /// Nothing to do for this frame.
    Ignored,
    /// Jump to the freshly loaded program.
    StartProgram,
    /// Re-enter the loader from the top.
    Restart,
}

#[derive(Debug, Clone)]
pub struct Bootloader {
    page_total: u8,
    page_count: u8,
    page_address: u8,
    page_byte_count: u16,
    page_buffer: [u16; PAGE_WORDS + 2],
    page_table: [bool; PAGE_TABLE_LEN],
}

impl Default for Bootloader {
    fn default() -> Self {
        Self::new()
    }
}

impl Bootloader {
    pub fn new() -> Self {
        Self {
            page_total: DEFAULT_PAGE_TOTAL,
            page_count: 0,
            page_address: 0,
            page_byte_count: 0,
            page_buffer: [0; PAGE_WORDS + 2],
            page_table: [false; PAGE_TABLE_LEN],
        }
    }

    pub fn page_total(&self) -> u8 {
        self.page_total
    }

    pub fn page_count(&self) -> u8 {
        self.page_count
    }

    pub fn is_written(&self, page_address: u8) -> bool {
        self.page_table
            .get(page_address as usize)
            .copied()
            .unwrap_or(false)
    }

    pub fn handle<F: Flash + ?Sized>(&mut self, msg: &Message, flash: &mut F) -> BootAction {
        match msg.control_type() {
            Some(MessageType::BootpgmPage) => self.load_page(&BootPayload::from_data(&msg.data), flash),
            Some(MessageType::BootpgmSize) => {
                self.page_total = msg.data[0];
                debug!("Program size announced: {} pages", self.page_total);
                if self.page_count == self.page_total {
                    BootAction::StartProgram
                } else {
                    BootAction::Ignored
                }
            }
            Some(MessageType::Boot) => BootAction::Restart,
            _ if self.page_count == 0 => BootAction::StartProgram,
            _ => BootAction::Ignored,
        }
    }

    fn load_page<F: Flash + ?Sized>(&mut self, payload: &BootPayload, flash: &mut F) -> BootAction {
        let offset = payload.page_offset as usize;
        if offset + payload.words.len() > self.page_buffer.len()
            || payload.page_address as usize >= PAGE_TABLE_LEN
        {
            warn!(
                "Dropping page data outside the buffer: page={} offset={}",
                payload.page_address, payload.page_offset
            );
            return BootAction::Ignored;
        }

        if self.page_address != payload.page_address {
            self.page_address = payload.page_address;
            self.page_byte_count = 0;
        }
        self.page_buffer[offset..offset + payload.words.len()].copy_from_slice(&payload.words);
        self.page_byte_count = self.page_byte_count.wrapping_add(6);

        if self.page_byte_count as usize >= PAGE_SIZE && !self.is_written(self.page_address) {
            flash.write_page(self.page_address, &self.page_buffer[..PAGE_WORDS]);
            self.page_table[self.page_address as usize] = true;
            self.page_count += 1;
            info!(
                "Wrote program page {} ({}/{})",
                self.page_address, self.page_count, self.page_total
            );
            if self.page_count == self.page_total {
                return BootAction::StartProgram;
            }
            BootAction::PageWritten(self.page_address)
        } else {
            BootAction::Buffered
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page_frame(page_address: u8, page_offset: u8, base: u16) -> Message {
        let payload = BootPayload {
            page_address,
            page_offset,
            words: [base, base + 1, base + 2],
        };
        Message::new_control(MessageType::BootpgmPage, payload.to_data())
    }

    /// Send one page as 22 frames of three words; returns the last action.
    fn send_page(boot: &mut Bootloader, flash: &mut MemoryFlash, page: u8) -> BootAction {
        let mut action = BootAction::Ignored;
        for chunk in 0..22u8 {
            let offset = chunk * 3;
            action = boot.handle(&page_frame(page, offset, page as u16 * 100 + offset as u16), flash);
        }
        action
    }

    fn size_frame(total: u8) -> Message {
        let mut data = [0u8; 9];
        data[0] = total;
        Message::new_control(MessageType::BootpgmSize, data)
    }

    #[test]
    fn test_page_written_after_full_buffer() {
        let mut boot = Bootloader::new();
        let mut flash = MemoryFlash::new();

        for chunk in 0..21u8 {
            let action = boot.handle(&page_frame(3, chunk * 3, chunk as u16 * 3), &mut flash);
            assert_eq!(action, BootAction::Buffered);
        }
        // 22 * 6 = 132 bytes >= 128
        let action = boot.handle(&page_frame(3, 63, 63), &mut flash);
        assert_eq!(action, BootAction::PageWritten(3));
        assert!(boot.is_written(3));
        let page = flash.page(3).unwrap();
        assert_eq!(page.len(), PAGE_WORDS);
        assert_eq!(page[0], 0);
        assert_eq!(page[63], 63);
    }

    #[test]
    fn test_rewritten_page_is_not_flashed_twice() {
        let mut boot = Bootloader::new();
        let mut flash = MemoryFlash::new();
        assert_eq!(send_page(&mut boot, &mut flash, 0), BootAction::PageWritten(0));
        assert_eq!(send_page(&mut boot, &mut flash, 1), BootAction::PageWritten(1));
        assert_eq!(send_page(&mut boot, &mut flash, 0), BootAction::Buffered);
        assert_eq!(boot.page_count(), 2);
        assert_eq!(flash.written(), 2);
    }

    #[test]
    fn test_program_starts_when_all_pages_loaded() {
        let mut boot = Bootloader::new();
        let mut flash = MemoryFlash::new();
        assert_eq!(boot.handle(&size_frame(2), &mut flash), BootAction::Ignored);
        assert_eq!(send_page(&mut boot, &mut flash, 0), BootAction::PageWritten(0));
        assert_eq!(send_page(&mut boot, &mut flash, 1), BootAction::StartProgram);
    }

    #[test]
    fn test_size_after_pages_starts_program() {
        let mut boot = Bootloader::new();
        let mut flash = MemoryFlash::new();
        send_page(&mut boot, &mut flash, 5);
        assert_eq!(boot.handle(&size_frame(1), &mut flash), BootAction::StartProgram);
    }

    #[test]
    fn test_other_frames() {
        let mut boot = Bootloader::new();
        let mut flash = MemoryFlash::new();
        let app = Message::new(0x01, [0; 9]);
        assert_eq!(boot.handle(&app, &mut flash), BootAction::StartProgram);
        assert_eq!(
            boot.handle(&Message::new_control(MessageType::Boot, [0; 9]), &mut flash),
            BootAction::Restart
        );

        send_page(&mut boot, &mut flash, 0);
        assert_eq!(boot.handle(&app, &mut flash), BootAction::Ignored);
    }

    #[test]
    fn test_repeated_page_frames_keep_counting() {
        let mut boot = Bootloader::new();
        let mut flash = MemoryFlash::new();
        assert_eq!(send_page(&mut boot, &mut flash, 0), BootAction::PageWritten(0));
        // well past the point where the 16-bit byte counter wraps
        for _ in 0..11_000 {
            assert_eq!(boot.handle(&page_frame(0, 0, 0), &mut flash), BootAction::Buffered);
        }
        assert_eq!(flash.written(), 1);
        assert_eq!(boot.page_count(), 1);
    }

    #[test]
    fn test_offset_past_buffer_is_dropped() {
        let mut boot = Bootloader::new();
        let mut flash = MemoryFlash::new();
        assert_eq!(boot.handle(&page_frame(0, 65, 0), &mut flash), BootAction::Ignored);
        assert_eq!(boot.handle(&page_frame(230, 0, 0), &mut flash), BootAction::Ignored);
    }
}
