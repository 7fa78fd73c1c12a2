mod binding;
mod mmap;

use std::os::fd::{AsRawFd, OwnedFd, RawFd};

use perf_event_open_sys as sys;
use smallvec::SmallVec;

use crate::decode::DecodedSamples;
use crate::state::Step;
use crate::{DescriptorState, Error, EventKind, EventSpec, Operation};

pub use binding::pmu_type_by_name;
pub use mmap::SamplingBuffer;

/// One open counter. `close` unmaps the sampling buffer and closes the file
/// descriptor; dropping an open descriptor does the same.
pub struct EventDescriptor {
    spec: EventSpec,
    state: DescriptorState,
    // declared before `fd` so the mapping goes away first
    buffer: Option<SamplingBuffer>,
    // `None` once closed
    fd: Option<OwnedFd>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CounterValue {
    pub name: String,
    pub kind: EventKind,
    pub value: u64,
}

impl EventDescriptor {
    pub fn open(spec: EventSpec) -> Result<Self, Error> {
        let fd = binding::open_event(&spec)?;

        let buffer = match &spec.kind {
            EventKind::Precise(sampling) => Some(
                SamplingBuffer::map(&fd, sampling.data_pages).map_err(|source| Error::Map {
                    event: spec.name.clone(),
                    source,
                })?,
            ),
            EventKind::PageFaults | EventKind::Raw { .. } => None,
        };

        log::debug!(
            "opened {} (pid {}, cpu {})",
            spec.name,
            spec.target.pid,
            spec.target.cpu
        );

        Ok(EventDescriptor {
            spec,
            state: DescriptorState::Created,
            buffer,
            fd: Some(fd),
        })
    }

    pub fn name(&self) -> &str {
        &self.spec.name
    }

    pub fn spec(&self) -> &EventSpec {
        &self.spec
    }

    pub fn state(&self) -> DescriptorState {
        self.state
    }

    pub fn sampling_buffer(&self) -> Option<&SamplingBuffer> {
        self.buffer.as_ref()
    }

    pub fn reset(&mut self) -> Result<(), Error> {
        self.control(Operation::Reset, |fd| unsafe { sys::ioctls::RESET(fd, 0) })
    }

    pub fn enable(&mut self) -> Result<(), Error> {
        self.control(Operation::Enable, |fd| unsafe { sys::ioctls::ENABLE(fd, 0) })
    }

    pub fn disable(&mut self) -> Result<(), Error> {
        self.control(Operation::Disable, |fd| unsafe { sys::ioctls::DISABLE(fd, 0) })
    }

    /// Reads the 64-bit count. Only valid once the counter is disabled.
    pub fn read(&mut self) -> Result<u64, Error> {
        let next = match self.transition(Operation::Read)? {
            Step::Issue(next) => next,
            Step::Noop => self.state,
        };

        let fd = self.raw_fd(Operation::Read)?;
        let mut value: u64 = 0;
        let result = unsafe {
            libc::read(
                fd,
                &mut value as *mut u64 as *mut libc::c_void,
                std::mem::size_of::<u64>(),
            )
        };

        if result != std::mem::size_of::<u64>() as isize {
            let source = if result < 0 {
                std::io::Error::last_os_error()
            } else {
                std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "short counter read")
            };
            return Err(self.control_error(Operation::Read, source));
        }

        self.state = next;
        Ok(value)
    }

    /// Decodes the sampling buffer, if this descriptor has one. Only valid
    /// once the counter is disabled.
    pub fn decode(&self) -> Result<Option<DecodedSamples>, Error> {
        self.transition(Operation::Decode)?;
        self.buffer.as_ref().map(SamplingBuffer::decode).transpose()
    }

    /// Releases the mapping and the file descriptor. Every later operation
    /// fails with [`Error::InvalidState`]; closing twice is harmless.
    pub fn close(&mut self) {
        let Some(Step::Issue(next)) = self.state.step(Operation::Close) else {
            return;
        };

        self.buffer = None;
        self.fd = None;
        log::debug!("{}: {} -> {next}", self.spec.name, self.state);
        self.state = next;
    }

    fn raw_fd(&self, op: Operation) -> Result<RawFd, Error> {
        self.fd
            .as_ref()
            .map(AsRawFd::as_raw_fd)
            .ok_or_else(|| Error::InvalidState {
                event: self.spec.name.clone(),
                op,
                state: self.state,
            })
    }

    fn transition(&self, op: Operation) -> Result<Step, Error> {
        self.state.step(op).ok_or_else(|| Error::InvalidState {
            event: self.spec.name.clone(),
            op,
            state: self.state,
        })
    }

    fn control(
        &mut self,
        op: Operation,
        ioctl: impl FnOnce(RawFd) -> libc::c_int,
    ) -> Result<(), Error> {
        if let Step::Issue(next) = self.transition(op)? {
            if ioctl(self.raw_fd(op)?) < 0 {
                return Err(self.control_error(op, std::io::Error::last_os_error()));
            }
            self.state = next;
        }

        Ok(())
    }

    fn control_error(&self, op: Operation, source: std::io::Error) -> Error {
        Error::Control {
            event: self.spec.name.clone(),
            op,
            source,
        }
    }
}

/// A set of counters driven together around one measured window.
///
/// `start` resets every counter and then enables them in list order; `stop`
/// disables them in reverse list order. Put the sampling counter last so it
/// brackets the measured code most tightly.
pub struct Session {
    descriptors: SmallVec<[EventDescriptor; 8]>,
}

impl Session {
    pub fn open(specs: &[EventSpec]) -> Result<Self, Error> {
        if let Some(extra) = specs.iter().filter(|spec| spec.is_sampling()).nth(1) {
            return Err(Error::InvalidSpec {
                event: extra.name.clone(),
                reason: "only one sampling counter per session",
            });
        }

        let descriptors = specs
            .iter()
            .cloned()
            .map(EventDescriptor::open)
            .collect::<Result<SmallVec<_>, _>>()?;

        Ok(Session { descriptors })
    }

    pub fn descriptors(&self) -> &[EventDescriptor] {
        &self.descriptors
    }

    pub fn start(&mut self) -> Result<(), Error> {
        for descriptor in self.descriptors.iter_mut() {
            descriptor.reset()?;
        }

        for descriptor in self.descriptors.iter_mut() {
            descriptor.enable()?;
        }

        Ok(())
    }

    pub fn stop(&mut self) -> Result<(), Error> {
        for descriptor in self.descriptors.iter_mut().rev() {
            descriptor.disable()?;
        }

        Ok(())
    }

    /// Reads every counter, sampling counter included, in list order.
    pub fn counters(&mut self) -> Result<Vec<CounterValue>, Error> {
        self.descriptors
            .iter_mut()
            .map(|descriptor| {
                Ok(CounterValue {
                    value: descriptor.read()?,
                    name: descriptor.spec.name.clone(),
                    kind: descriptor.spec.kind.clone(),
                })
            })
            .collect()
    }

    /// Decodes the sampling counter's ring buffer, `None` when the session
    /// has no sampling counter.
    pub fn samples(&self) -> Result<Option<DecodedSamples>, Error> {
        match self.descriptors.iter().find(|d| d.spec.is_sampling()) {
            Some(descriptor) => descriptor.decode(),
            None => Ok(None),
        }
    }

    pub fn close(mut self) {
        for descriptor in self.descriptors.iter_mut().rev() {
            descriptor.close();
        }
    }
}
