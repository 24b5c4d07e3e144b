//! CPU affinity of the calling process.
//!
//! The scheduler binds every task to its cores before exec, so the affinity
//! mask of the current process is the set of cores allocated to the task.
use std::io;

/// Logical CPU ids the current process may run on, in ascending order.
///
/// On Linux this reads the mask with `sched_getaffinity`. Other platforms have
/// no binding concept and report every online CPU.
pub fn cpu_affinity() -> io::Result<Vec<u32>> {
    imp::cpu_affinity()
}

#[cfg(target_os = "linux")]
mod imp {
    use std::{io, mem};

    pub fn cpu_affinity() -> io::Result<Vec<u32>> {
        let mut set: libc::cpu_set_t = unsafe { mem::zeroed() };
        let rc = unsafe { libc::sched_getaffinity(0, mem::size_of::<libc::cpu_set_t>(), &mut set) };
        if rc != 0 {
            return Err(io::Error::last_os_error());
        }

        let cpus = (0..libc::CPU_SETSIZE as usize)
            .filter(|&cpu| unsafe { libc::CPU_ISSET(cpu, &set) })
            .map(|cpu| cpu as u32)
            .collect();
        Ok(cpus)
    }
}

#[cfg(not(target_os = "linux"))]
mod imp {
    use std::io;

    pub fn cpu_affinity() -> io::Result<Vec<u32>> {
        let n = std::thread::available_parallelism()?.get() as u32;
        Ok((0..n).collect())
    }
}
