//! Linux device backends: spidev for the clocked bus, sysfs GPIO for the
//! bit-banged lines.

use std::{
    fmt,
    fs::{self, File, OpenOptions},
    io::{self, Read, Seek, SeekFrom, Write},
    os::fd::AsRawFd,
    path::{Path, PathBuf},
};

use embedded_hal::{digital, spi};

use crate::{Result, StripError};

/// `_IOW('k', 4, u32)` from `linux/spi/spidev.h`.
const SPI_IOC_WR_MAX_SPEED_HZ: u32 = 0x4004_6b04;

const GPIO_ROOT: &str = "/sys/class/gpio";

/// IO error wrapper so the device errors fit the `embedded-hal` traits.
#[derive(Debug)]
pub struct DeviceError(pub io::Error);

impl fmt::Display for DeviceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl std::error::Error for DeviceError {}

impl spi::Error for DeviceError {
    fn kind(&self) -> spi::ErrorKind {
        spi::ErrorKind::Other
    }
}

impl digital::Error for DeviceError {
    fn kind(&self) -> digital::ErrorKind {
        digital::ErrorKind::Other
    }
}

/// A spidev character device opened for exclusive use.
pub struct SpidevBus {
    file: File,
    path: PathBuf,
}

impl SpidevBus {
    /// Opens the device, takes an exclusive lock on it and sets the clock
    /// rate.
    pub fn open(path: &Path, baud_hz: u32) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(|err| {
                StripError::transport(format!("failed to open {}: {err}", path.display()))
            })?;
        let fd = file.as_raw_fd();

        // SAFETY: `fd` stays valid for the lifetime of `file`.
        if unsafe { libc::flock(fd, libc::LOCK_EX | libc::LOCK_NB) } != 0 {
            return Err(StripError::transport(format!(
                "{} is in use by another process",
                path.display()
            )));
        }

        let speed: u32 = baud_hz;
        // SAFETY: the request expects a pointer to a u32 that outlives the call.
        let rc = unsafe { libc::ioctl(fd, SPI_IOC_WR_MAX_SPEED_HZ as _, &speed as *const u32) };
        if rc < 0 {
            return Err(StripError::transport(format!(
                "failed to set {} to {baud_hz} Hz: {}",
                path.display(),
                io::Error::last_os_error()
            )));
        }

        tracing::info!(device = %path.display(), baud_hz, "opened serial bus");
        Ok(Self {
            file,
            path: path.to_path_buf(),
        })
    }
}

impl fmt::Debug for SpidevBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SpidevBus").field("path", &self.path).finish()
    }
}

impl spi::ErrorType for SpidevBus {
    type Error = DeviceError;
}

impl spi::SpiBus<u8> for SpidevBus {
    fn read(&mut self, words: &mut [u8]) -> std::result::Result<(), Self::Error> {
        self.file.read_exact(words).map_err(DeviceError)
    }

    fn write(&mut self, words: &[u8]) -> std::result::Result<(), Self::Error> {
        self.file.write_all(words).map_err(DeviceError)
    }

    fn transfer(&mut self, read: &mut [u8], write: &[u8]) -> std::result::Result<(), Self::Error> {
        // Half duplex: the strip never answers.
        self.write(write)?;
        read.fill(0);
        Ok(())
    }

    fn transfer_in_place(&mut self, words: &mut [u8]) -> std::result::Result<(), Self::Error> {
        self.write(words)?;
        words.fill(0);
        Ok(())
    }

    fn flush(&mut self) -> std::result::Result<(), Self::Error> {
        self.file.flush().map_err(DeviceError)
    }
}

/// One GPIO line exported through sysfs and configured as an output.
pub struct SysfsPin {
    number: u32,
    value: File,
}

impl SysfsPin {
    pub fn export(number: u32) -> Result<Self> {
        let dir = Path::new(GPIO_ROOT).join(format!("gpio{number}"));
        if !dir.exists() {
            fs::write(Path::new(GPIO_ROOT).join("export"), number.to_string()).map_err(|err| {
                StripError::transport(format!("failed to export gpio {number}: {err}"))
            })?;
        }
        fs::write(dir.join("direction"), "low").map_err(|err| {
            StripError::transport(format!("failed to configure gpio {number}: {err}"))
        })?;
        let value = OpenOptions::new()
            .write(true)
            .open(dir.join("value"))
            .map_err(|err| StripError::transport(format!("failed to open gpio {number}: {err}")))?;

        Ok(Self { number, value })
    }

    fn write_level(&mut self, high: bool) -> io::Result<()> {
        self.value.seek(SeekFrom::Start(0))?;
        self.value.write_all(if high { b"1" } else { b"0" })
    }
}

impl fmt::Debug for SysfsPin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SysfsPin").field("number", &self.number).finish()
    }
}

impl digital::ErrorType for SysfsPin {
    type Error = DeviceError;
}

impl digital::OutputPin for SysfsPin {
    fn set_low(&mut self) -> std::result::Result<(), Self::Error> {
        self.write_level(false).map_err(DeviceError)
    }

    fn set_high(&mut self) -> std::result::Result<(), Self::Error> {
        self.write_level(true).map_err(DeviceError)
    }
}
