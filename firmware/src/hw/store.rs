//! Configuration store backed by one flash page.
//!
//! Flash cannot be rewritten byte by byte, so [`ShadowStore`] keeps the whole
//! store image in RAM, serves the core's byte accesses from that copy and
//! writes the page back in one erase/program cycle on [`ShadowStore::flush`].

#![cfg_attr(not(target_os = "none"), allow(dead_code))]

use signal_core::store::layout::STORE_SIZE;
use signal_core::store::{NvStore, RamStore};

/// Persistent medium holding exactly one store image.
pub trait PageDevice {
    type Error;

    /// Fills `buffer` with the persisted image.
    ///
    /// # Errors
    ///
    /// Returns the device error when the page cannot be read.
    fn read_page(&mut self, buffer: &mut [u8; STORE_SIZE]) -> Result<(), Self::Error>;

    /// Replaces the persisted image with `bytes`.
    ///
    /// # Errors
    ///
    /// Returns the device error when the page cannot be erased or programmed.
    fn write_page(&mut self, bytes: &[u8; STORE_SIZE]) -> Result<(), Self::Error>;
}

/// RAM mirror of the store with deferred write-back.
pub struct ShadowStore<D> {
    device: D,
    shadow: RamStore,
    dirty: bool,
}

impl<D: PageDevice> ShadowStore<D> {
    /// Starts from an erased image marked dirty, so the first flush
    /// overwrites the page unless [`ShadowStore::reload`] succeeds first.
    pub fn blank(device: D) -> Self {
        Self {
            device,
            shadow: RamStore::new(),
            dirty: true,
        }
    }

    /// Replaces the shadow with the persisted image.
    ///
    /// # Errors
    ///
    /// Returns the device error and leaves the shadow untouched.
    pub fn reload(&mut self) -> Result<(), D::Error> {
        let mut bytes = [0xFF; STORE_SIZE];
        self.device.read_page(&mut bytes)?;
        self.shadow = RamStore::from_bytes(bytes);
        self.dirty = false;
        Ok(())
    }

    #[must_use]
    pub const fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Writes the image back when it changed since the last flush.
    ///
    /// Returns `true` when the page was programmed.
    ///
    /// # Errors
    ///
    /// Returns the device error; the image stays dirty so a later flush
    /// retries.
    pub fn flush(&mut self) -> Result<bool, D::Error> {
        if !self.dirty {
            return Ok(false);
        }
        self.device.write_page(self.shadow.as_bytes())?;
        self.dirty = false;
        Ok(true)
    }
}

impl<D> NvStore for ShadowStore<D> {
    fn read(&mut self, address: u16) -> u8 {
        self.shadow.read(address)
    }

    fn write(&mut self, address: u16, value: u8) {
        if self.shadow.read(address) != value {
            self.shadow.write(address, value);
            self.dirty = true;
        }
    }
}

#[cfg(target_os = "none")]
pub use flash::FlashPage;

#[cfg(target_os = "none")]
mod flash {
    use embassy_stm32::flash::{Error, FLASH_SIZE, Flash};
    use embassy_stm32::mode::Blocking;
    use signal_core::store::layout::STORE_SIZE;

    use super::PageDevice;

    const PAGE_SIZE: u32 = 2 * 1024;
    #[allow(clippy::cast_possible_truncation)]
    const LAST_PAGE: u32 = FLASH_SIZE as u32 - PAGE_SIZE;

    /// The last page of the internal flash, reserved for the store.
    pub struct FlashPage<'d> {
        flash: Flash<'d, Blocking>,
    }

    impl<'d> FlashPage<'d> {
        pub fn new(flash: Flash<'d, Blocking>) -> Self {
            Self { flash }
        }
    }

    impl PageDevice for FlashPage<'_> {
        type Error = Error;

        fn read_page(&mut self, buffer: &mut [u8; STORE_SIZE]) -> Result<(), Error> {
            self.flash.blocking_read(LAST_PAGE, buffer)
        }

        fn write_page(&mut self, bytes: &[u8; STORE_SIZE]) -> Result<(), Error> {
            self.flash.blocking_erase(LAST_PAGE, LAST_PAGE + PAGE_SIZE)?;
            self.flash.blocking_write(LAST_PAGE, bytes)
        }
    }
}
