use crate::error::SampleError;
use crate::system::raw::{RawProcessSample, RawSystemSample};

use super::SampleSource;

pub struct UnsupportedSource;

impl SampleSource for UnsupportedSource {
    fn read_system_raw(&mut self) -> Result<RawSystemSample, SampleError> {
        Err(SampleError::Unsupported)
    }

    fn list_live_pids(&self) -> Result<Vec<u32>, SampleError> {
        Err(SampleError::Unsupported)
    }

    fn read_process_raw(&self, _pid: u32) -> Result<RawProcessSample, SampleError> {
        Err(SampleError::Unsupported)
    }
}

#[cfg(not(unix))]
pub struct UnsupportedBackend;

#[cfg(not(unix))]
impl super::ControlBackend for UnsupportedBackend {
    fn signal(&self, _pid: u32, _kind: crate::system::control::SignalKind) -> std::io::Result<()> {
        Err(std::io::ErrorKind::Unsupported.into())
    }

    fn probe(&self, _pid: u32) -> std::io::Result<()> {
        Err(std::io::ErrorKind::Unsupported.into())
    }

    fn nice(&self, _pid: u32) -> std::io::Result<i32> {
        Err(std::io::ErrorKind::Unsupported.into())
    }

    fn set_nice(&self, _pid: u32, _value: i32) -> std::io::Result<()> {
        Err(std::io::ErrorKind::Unsupported.into())
    }
}
