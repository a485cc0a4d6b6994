// Licensed under the Apache-2.0 license

//! # Hardware access seams
//!
//! The bus engines never touch I/O ports directly. Every register access goes
//! through [`RegisterIo`], supplied by whatever owns the parent device (a
//! port-I/O window, an LPC bridge, a host-side simulator). One implementation
//! is shared by all channels of the controller.
//!
//! ## Serialization
//!
//! Channels run concurrently and each one only touches its own register
//! window. If the underlying transport needs cross-channel serialization
//! (e.g. an index/data port pair), the implementation provides it; the
//! engines only serialize operations on the same channel.

/// Byte-wide register access at absolute port addresses.
///
/// # Examples
///
/// ```rust,no_run
/// use eio_i2c_ddk::i2c::RegisterIo;
///
/// struct PortIo;
///
/// impl RegisterIo for PortIo {
///     type Error = ();
///
///     fn read(&self, _port: u16) -> Result<u8, ()> {
///         // inb(port)
///         Ok(0)
///     }
///
///     fn write(&self, _port: u16, _value: u8) -> Result<(), ()> {
///         // outb(value, port)
///         Ok(())
///     }
/// }
/// ```
pub trait RegisterIo {
    /// Transport error; reported to callers as [`crate::i2c::Error::Io`].
    type Error: core::fmt::Debug;

    /// Read one register.
    ///
    /// # Errors
    ///
    /// Returns an error if the transport cannot complete the access.
    fn read(&self, port: u16) -> Result<u8, Self::Error>;

    /// Write one register.
    ///
    /// # Errors
    ///
    /// Returns an error if the transport cannot complete the access.
    fn write(&self, port: u16, value: u8) -> Result<(), Self::Error>;
}

impl<T: RegisterIo + ?Sized> RegisterIo for &T {
    type Error = T::Error;

    fn read(&self, port: u16) -> Result<u8, Self::Error> {
        (**self).read(port)
    }

    fn write(&self, port: u16, value: u8) -> Result<(), Self::Error> {
        (**self).write(port, value)
    }
}
