use crate::{Error, Result};
use super::Wakeup;

#[derive(Debug)]
pub struct Ap235DriverImpl;

impl Ap235DriverImpl {
    pub fn new(_index: usize) -> Result<Ap235DriverImpl> {
        Err(Error::NotFound)
    }
}

impl super::Driver for Ap235DriverImpl {
    fn read_user(&self, _addr: usize, _data: &mut [u8]) -> Result<()> {
        Err(Error::NotFound)
    }

    fn write_user(&self, _addr: usize, _data: &[u8]) -> Result<()> {
        Err(Error::NotFound)
    }

    fn wait_for_interrupt(&self, _addr: usize, _value: u32) -> Result<Wakeup> {
        Err(Error::NotFound)
    }

    fn unblock_wait(&self) -> Result<()> {
        Err(Error::NotFound)
    }

    fn rearm_wait(&self) -> Result<()> {
        Err(Error::NotFound)
    }
}
