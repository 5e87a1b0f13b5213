use std::ffi::CString;
use std::io;
use std::ptr;
use libc::{c_int, c_void};
use crate::{Error, Result};
use super::Wakeup;

#[derive(Debug)]
struct Fd(c_int);

impl Fd {
    fn open(path: &str, flags: c_int) -> io::Result<Fd> {
        let path = CString::new(path).map_err(|error| io::Error::new(io::ErrorKind::InvalidInput, error))?;
        unsafe {
            let fd = libc::open(path.as_ptr(), flags | libc::O_CLOEXEC);
            if fd == -1 {
                Err(io::Error::last_os_error())
            } else {
                Ok(Fd(fd))
            }
        }
    }

    fn eventfd() -> io::Result<Fd> {
        unsafe {
            let fd = libc::eventfd(0, libc::EFD_NONBLOCK | libc::EFD_CLOEXEC);
            if fd == -1 {
                Err(io::Error::last_os_error())
            } else {
                Ok(Fd(fd))
            }
        }
    }

    fn read(&self, data: &mut [u8]) -> io::Result<()> {
        unsafe {
            let bytes_read = libc::read(self.0, data.as_mut_ptr() as *mut c_void, data.len());
            if bytes_read as usize != data.len() {
                Err(io::Error::last_os_error())
            } else {
                Ok(())
            }
        }
    }

    fn write(&self, data: &[u8]) -> io::Result<()> {
        unsafe {
            let bytes_written = libc::write(self.0, data.as_ptr() as *const c_void, data.len());
            if bytes_written as usize != data.len() {
                Err(io::Error::last_os_error())
            } else {
                Ok(())
            }
        }
    }
}

impl Drop for Fd {
    fn drop(&mut self) {
        unsafe {
            if libc::close(self.0) == -1 {
                log::error!("error closing fd: {}", io::Error::last_os_error())
            }
        }
    }
}

#[derive(Debug)]
struct Mapping {
    ptr: *mut u8,
    len: usize,
}

impl Mapping {
    fn new(fd: &Fd, len: usize) -> io::Result<Mapping> {
        unsafe {
            let ptr = libc::mmap(ptr::null_mut(), len, libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED, fd.0, 0);
            if ptr == libc::MAP_FAILED {
                Err(io::Error::last_os_error())
            } else {
                log::trace!("mapped register space at {:?}+{:#x}", ptr, len);
                Ok(Mapping { ptr: ptr as *mut u8, len })
            }
        }
    }

    fn check(&self, addr: usize, len: usize) -> Result<()> {
        let align = if len == 2 || len == 4 { len } else { 1 };
        if addr.checked_add(len).map_or(true, |end| end > self.len) || addr % align != 0 {
            return Err(io::Error::new(io::ErrorKind::InvalidInput,
                format!("register access at {addr:#x}+{len} outside of mapping")).into())
        }
        Ok(())
    }
}

impl Drop for Mapping {
    fn drop(&mut self) {
        unsafe {
            if libc::munmap(self.ptr as *mut c_void, self.len) == -1 {
                log::error!("error unmapping registers: {}", io::Error::last_os_error())
            }
        }
    }
}

/// Register access and interrupt delivery through the Linux userspace I/O framework.
///
/// The board's register space is exposed as map 0 of `/dev/uioN`; reading that device blocks
/// until the next interrupt and writing `1` to it unmasks the interrupt line.
#[derive(Debug)]
pub struct Ap235DriverImpl {
    regs: Mapping,
    uio_fd: Fd,
    cancel_fd: Fd,
}

// SAFETY: The mapping is only accessed through volatile reads and writes of device registers.
unsafe impl Send for Ap235DriverImpl {}
unsafe impl Sync for Ap235DriverImpl {}

impl Ap235DriverImpl {
    pub fn new(index: usize) -> Result<Ap235DriverImpl> {
        let size_path = format!("/sys/class/uio/uio{index}/maps/map0/size");
        let size = match std::fs::read_to_string(&size_path) {
            Ok(size) => size,
            Err(error) if error.kind() == io::ErrorKind::NotFound => return Err(Error::NotFound),
            Err(error) => return Err(error.into()),
        };
        let size = usize::from_str_radix(size.trim().trim_start_matches("0x"), 16)
            .map_err(|error| io::Error::new(io::ErrorKind::InvalidData, error))?;
        let uio_fd = Fd::open(&format!("/dev/uio{index}"), libc::O_RDWR | libc::O_SYNC)?;
        let regs = Mapping::new(&uio_fd, size)?;
        let cancel_fd = Fd::eventfd()?;
        log::debug!("opened uio{} with {:#x} bytes of registers", index, size);
        Ok(Ap235DriverImpl { regs, uio_fd, cancel_fd })
    }

    fn drain_cancel(&self) -> Result<bool> {
        let mut count = 0u64;
        match self.cancel_fd.read(bytemuck::bytes_of_mut(&mut count)) {
            Ok(()) => Ok(count > 0),
            Err(error) if error.kind() == io::ErrorKind::WouldBlock => Ok(false),
            Err(error) => Err(error.into()),
        }
    }
}

impl super::Driver for Ap235DriverImpl {
    fn read_user(&self, addr: usize, data: &mut [u8]) -> Result<()> {
        self.regs.check(addr, data.len())?;
        unsafe {
            let ptr = self.regs.ptr.add(addr);
            match data.len() {
                4 => data.copy_from_slice(&ptr::read_volatile(ptr as *const u32).to_ne_bytes()),
                2 => data.copy_from_slice(&ptr::read_volatile(ptr as *const u16).to_ne_bytes()),
                _ => for (offset, byte) in data.iter_mut().enumerate() {
                    *byte = ptr::read_volatile(ptr.add(offset))
                }
            }
        }
        Ok(())
    }

    fn write_user(&self, addr: usize, data: &[u8]) -> Result<()> {
        self.regs.check(addr, data.len())?;
        unsafe {
            let ptr = self.regs.ptr.add(addr);
            match *data {
                [a, b, c, d] => ptr::write_volatile(ptr as *mut u32, u32::from_ne_bytes([a, b, c, d])),
                [a, b] => ptr::write_volatile(ptr as *mut u16, u16::from_ne_bytes([a, b])),
                _ => for (offset, &byte) in data.iter().enumerate() {
                    ptr::write_volatile(ptr.add(offset), byte)
                }
            }
        }
        Ok(())
    }

    fn wait_for_interrupt(&self, addr: usize, value: u32) -> Result<Wakeup> {
        // unmask the interrupt line before enabling the controller so that no edge is lost
        self.uio_fd.write(bytemuck::bytes_of(&1u32))?;
        self.write_user(addr, &value.to_le_bytes())?;
        let mut fds = [
            libc::pollfd { fd: self.uio_fd.0, events: libc::POLLIN, revents: 0 },
            libc::pollfd { fd: self.cancel_fd.0, events: libc::POLLIN, revents: 0 },
        ];
        loop {
            let result = unsafe { libc::poll(fds.as_mut_ptr(), fds.len() as libc::nfds_t, -1) };
            if result == -1 {
                let error = io::Error::last_os_error();
                if error.kind() == io::ErrorKind::Interrupted { continue }
                return Err(error.into())
            }
            if fds[1].revents & libc::POLLIN != 0 && self.drain_cancel()? {
                return Ok(Wakeup::Cancelled)
            }
            if fds[0].revents & libc::POLLIN != 0 {
                let mut count = 0u32;
                self.uio_fd.read(bytemuck::bytes_of_mut(&mut count))?;
                log::trace!("uio interrupt, total count {}", count);
                return Ok(Wakeup::Interrupt)
            }
            fds[0].revents = 0;
            fds[1].revents = 0;
        }
    }

    fn unblock_wait(&self) -> Result<()> {
        Ok(self.cancel_fd.write(bytemuck::bytes_of(&1u64))?)
    }

    fn rearm_wait(&self) -> Result<()> {
        self.drain_cancel()?;
        Ok(())
    }
}
