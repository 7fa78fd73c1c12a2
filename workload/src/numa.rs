use std::ffi::c_void;

use libc::{c_int, c_long, c_ulong};

use crate::Error;

const MPOL_BIND: c_ulong = 2;

/// Restricts the pages backing `[addr, addr + len)` to `node`. Must be called
/// before the pages are first touched.
pub(crate) fn bind_to_node(addr: *mut c_void, len: usize, node: u32) -> std::io::Result<()> {
    let bits = c_ulong::BITS as usize;
    let node = node as usize;

    let mut mask = vec![0 as c_ulong; node / bits + 1];
    mask[node / bits] |= 1 << (node % bits);
    // the kernel only looks at maxnode - 1 bits
    let maxnode = mask.len() * bits + 1;

    let ret = unsafe {
        libc::syscall(
            libc::SYS_mbind,
            addr,
            len as c_ulong,
            MPOL_BIND,
            mask.as_ptr(),
            maxnode as c_ulong,
            0 as c_ulong,
        )
    };

    if ret != 0 {
        return Err(std::io::Error::last_os_error());
    }

    Ok(())
}

/// Asks the kernel which node hosts the (already touched) page at `addr`.
pub fn node_of_address(addr: *const c_void) -> Result<u32, Error> {
    let mut pages = [addr as *mut c_void];
    let mut status: [c_int; 1] = [-1];

    let ret = unsafe {
        libc::syscall(
            libc::SYS_move_pages,
            0 as c_long,
            1 as c_ulong,
            pages.as_mut_ptr(),
            std::ptr::null::<c_int>(),
            status.as_mut_ptr(),
            0 as c_long,
        )
    };

    if ret < 0 {
        return Err(Error::PlacementQuery(std::io::Error::last_os_error()));
    }

    if status[0] < 0 {
        return Err(Error::PlacementQuery(std::io::Error::from_raw_os_error(
            -status[0],
        )));
    }

    Ok(status[0] as u32)
}

pub fn check_placement(expected: u32, actual: u32) -> Result<(), Error> {
    if expected != actual {
        return Err(Error::PlacementMismatch { expected, actual });
    }

    Ok(())
}

/// Node a logical CPU belongs to, from the `nodeN` link in its sysfs
/// directory.
pub fn node_of_cpu(cpu: usize) -> std::io::Result<u32> {
    let dir = format!("/sys/devices/system/cpu/cpu{cpu}");

    for entry in std::fs::read_dir(&dir)? {
        let name = entry?.file_name();
        if let Some(node) = name
            .to_str()
            .and_then(|name| name.strip_prefix("node"))
            .and_then(|id| id.parse().ok())
        {
            return Ok(node);
        }
    }

    Err(std::io::Error::new(
        std::io::ErrorKind::NotFound,
        format!("no node entry in {dir}"),
    ))
}

pub fn cpus_of_node(node: u32) -> std::io::Result<Vec<usize>> {
    let path = format!("/sys/devices/system/node/node{node}/cpulist");
    let contents = std::fs::read_to_string(&path)?;

    parse_cpu_list(&contents).ok_or_else(|| {
        std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("unexpected contents of {path}: {contents:?}"),
        )
    })
}

/// Parses the kernel's CPU list format, e.g. `0-3,8,10-11`.
pub fn parse_cpu_list(list: &str) -> Option<Vec<usize>> {
    let mut cpus = vec![];

    for range in list.trim().split(',').filter(|range| !range.is_empty()) {
        match range.split_once('-') {
            Some((first, last)) => {
                let first: usize = first.parse().ok()?;
                let last: usize = last.parse().ok()?;
                if last < first {
                    return None;
                }
                cpus.extend(first..=last);
            }
            None => cpus.push(range.parse().ok()?),
        }
    }

    Some(cpus)
}
