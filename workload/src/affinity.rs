use crate::Error;

/// Restricts the calling thread to a single logical CPU.
pub fn pin_core(cpu: usize) -> Result<(), Error> {
    unsafe {
        let mut set: libc::cpu_set_t = std::mem::zeroed();
        libc::CPU_ZERO(&mut set);
        libc::CPU_SET(cpu, &mut set);

        if libc::sched_setaffinity(0, std::mem::size_of::<libc::cpu_set_t>(), &set) != 0 {
            return Err(Error::PinCore {
                cpu,
                source: std::io::Error::last_os_error(),
            });
        }
    }

    log::debug!("pinned to core {cpu}");
    Ok(())
}

/// Keeps every current and future page of the process resident until
/// dropped.
#[derive(Debug)]
pub struct PageLock {
    _private: (),
}

impl PageLock {
    pub fn acquire() -> Result<Self, Error> {
        if unsafe { libc::mlockall(libc::MCL_CURRENT | libc::MCL_FUTURE) } != 0 {
            return Err(Error::LockPages(std::io::Error::last_os_error()));
        }

        Ok(PageLock { _private: () })
    }
}

impl Drop for PageLock {
    fn drop(&mut self) {
        unsafe {
            libc::munlockall();
        }
    }
}
