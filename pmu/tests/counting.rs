#![cfg(target_os = "linux")]

use pmu::{DescriptorState, Error, EventDescriptor, EventSpec, PreciseSampling, Session, Target};

fn open_or_skip(specs: &[EventSpec]) -> Option<Session> {
    match Session::open(specs) {
        Ok(session) => Some(session),
        // containers and locked-down kernels refuse perf_event_open
        Err(err @ Error::Open { .. }) => {
            eprintln!("skipping: {err}");
            None
        }
        Err(err) => panic!("unexpected error: {err}"),
    }
}

/// Faults in `count` pages of a fresh anonymous mapping, one write each.
fn touch_fresh_pages(count: usize) {
    let page = unsafe { libc::sysconf(libc::_SC_PAGESIZE) as usize };
    let len = count * page;
    unsafe {
        let base = libc::mmap(
            std::ptr::null_mut(),
            len,
            libc::PROT_READ | libc::PROT_WRITE,
            libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
            -1,
            0,
        );
        assert_ne!(base, libc::MAP_FAILED);
        // one fault per page, not per huge page
        libc::madvise(base, len, libc::MADV_NOHUGEPAGE);

        let bytes = base as *mut u8;
        for index in 0..count {
            std::ptr::write_volatile(bytes.add(index * page), 1);
        }
        libc::munmap(base, len);
    }
}

#[test]
fn page_faults_are_counted() {
    let Some(mut session) = open_or_skip(&[EventSpec::page_faults(Target::this_thread())]) else {
        return;
    };

    session.start().expect("start");
    let mut pages = vec![0_u8; 64 * 4096];
    for page in pages.chunks_mut(4096) {
        page[0] = 1;
    }
    std::hint::black_box(&pages);
    session.stop().expect("stop");

    let counters = session.counters().expect("counters");
    assert_eq!(counters.len(), 1);
    assert_eq!(counters[0].name, "page_faults");
    assert_ne!(counters[0].value, 0);
    assert_eq!(session.descriptors()[0].state(), DescriptorState::Read);

    assert!(session.samples().expect("samples").is_none());
    session.close();
}

#[test]
fn counts_are_not_readable_while_running() {
    let Some(mut session) = open_or_skip(&[EventSpec::page_faults(Target::this_thread())]) else {
        return;
    };

    session.start().expect("start");
    let err = session.counters().unwrap_err();
    assert!(matches!(
        err,
        Error::InvalidState {
            state: DescriptorState::Running,
            ..
        }
    ));

    session.stop().expect("stop");
    // disabling twice is harmless
    session.stop().expect("stop");
    assert!(session.counters().is_ok());
}

#[test]
fn a_session_takes_one_sampling_counter() {
    let sampling = pmu::PreciseSampling::new(1000);
    let err = Session::open(&[
        EventSpec::precise("first", sampling),
        EventSpec::precise("second", sampling),
    ])
    .err()
    .expect("two sampling counters must be rejected");

    assert!(matches!(err, Error::InvalidSpec { event, .. } if event == "second"));
}

#[test]
fn a_full_ring_is_a_capture_overflow() {
    let mut sampling = PreciseSampling::page_faults(1);
    sampling.data_pages = 1;
    let Some(mut session) = open_or_skip(&[EventSpec::precise("faults", sampling)]) else {
        return;
    };

    session.start().expect("start");
    // 40 byte records, far more than one page holds
    touch_fresh_pages(4000);
    session.stop().expect("stop");

    let counted = session.counters().expect("counters")[0].value;
    assert!(counted >= 4000, "only {counted} faults");

    let err = session.samples().unwrap_err();
    assert!(
        matches!(err, Error::CaptureOverflow { head, capacity } if head <= capacity),
        "unexpected {err}"
    );
}

#[test]
fn a_ring_with_room_to_spare_decodes() {
    let sampling = PreciseSampling::page_faults(1);
    let Some(mut session) = open_or_skip(&[EventSpec::precise("faults", sampling)]) else {
        return;
    };

    session.start().expect("start");
    touch_fresh_pages(16);
    session.stop().expect("stop");

    let decoded = session.samples().expect("samples").expect("sampling counter");
    assert!(!decoded.samples.is_empty());
    assert_eq!(decoded.lost, 0);
}

#[test]
fn closed_descriptors_reject_further_use() {
    let mut descriptor = match EventDescriptor::open(EventSpec::page_faults(Target::this_thread())) {
        Ok(descriptor) => descriptor,
        Err(err @ Error::Open { .. }) => {
            eprintln!("skipping: {err}");
            return;
        }
        Err(err) => panic!("unexpected error: {err}"),
    };

    descriptor.reset().expect("reset");
    descriptor.enable().expect("enable");
    descriptor.close();
    assert_eq!(descriptor.state(), DescriptorState::Closed);

    assert!(matches!(
        descriptor.read(),
        Err(Error::InvalidState {
            state: DescriptorState::Closed,
            ..
        })
    ));
    assert!(descriptor.enable().is_err());
    // closing twice is harmless
    descriptor.close();
    assert_eq!(descriptor.state(), DescriptorState::Closed);
}
