use std::thread;
use std::time::Duration;

use rtpcm_core::{
    AllocationError, Device, Direction, HardwareProfile, SampleFormat, SessionConfig,
    SessionError, SessionState, SimClock, SimulatedHardware, DESCRIPTOR_WIRE_SIZE,
};

fn manual_device(profile: HardwareProfile) -> (Device, rtpcm_core::SimHandle) {
    let hardware = SimulatedHardware::new(SimClock::Manual);
    let handle = hardware.handle();
    (Device::new(profile, Box::new(hardware)), handle)
}

#[test]
fn second_open_is_rejected_until_close() {
    let (device, _) = manual_device(HardwareProfile::ELK_PI);
    let config = SessionConfig::default();

    let first = device.open_session(&config).unwrap();
    match device.open_session(&config) {
        Err(SessionError::ExclusivityViolation { device }) => assert_eq!(device, "elk-pi"),
        other => panic!("expected exclusivity violation, got {other:?}"),
    }

    first.close();
    let second = device.open_session(&config).unwrap();
    assert_eq!(second.state(), SessionState::Open);
}

#[test]
fn dropping_a_session_frees_the_device() {
    let (device, _) = manual_device(HardwareProfile::HIFI_BERRY_PRO);
    {
        let session = device
            .open_session(&HardwareProfile::HIFI_BERRY_PRO.session_config())
            .unwrap();
        session.start().unwrap();
    }
    assert!(!device.is_session_active());
    assert!(device.open_session(&SessionConfig::default()).is_ok());
}

#[test]
fn failed_allocation_releases_the_claim() {
    let hardware = SimulatedHardware::new(SimClock::Manual).with_region_limit(8 * 1024);
    let device = Device::new(HardwareProfile::ELK_PI, Box::new(hardware));

    let too_big = SessionConfig::default().with_period(128);
    let err = device.open_session(&too_big).unwrap_err();
    assert!(matches!(
        err,
        SessionError::AllocationFailure(AllocationError::OutOfMemory { .. })
    ));
    assert!(!device.is_session_active());

    let small = SessionConfig::new(2, 2, 16, SampleFormat::Int32);
    assert!(device.open_session(&small).is_ok());
}

#[test]
fn close_releases_a_blocked_consumer_exactly_once() {
    let (device, _) = manual_device(HardwareProfile::ELK_PI);
    let session = device.open_session(&SessionConfig::default()).unwrap();
    let mut consumer = session.consumer().unwrap();
    session.start().unwrap();

    let waiter = thread::spawn(move || {
        let first = consumer.wait_for_completion();
        let second = consumer.wait_timeout(Duration::from_millis(10));
        (first, second)
    });
    thread::sleep(Duration::from_millis(30));

    let diagnostics = session.close();
    assert_eq!(diagnostics.completions, 0);

    let (first, second) = waiter.join().unwrap();
    assert_eq!(first, Err(SessionError::SignalDestroyed));
    assert_eq!(second, Err(SessionError::SignalDestroyed));
    assert!(!device.is_session_active());
}

#[test]
fn mapping_outlives_the_session() {
    let (device, sim) = manual_device(HardwareProfile::ELK_PI);
    let config = SessionConfig::new(2, 2, 16, SampleFormat::Int24I2s);
    let session = device.open_session(&config).unwrap();
    let mapping = session.map_buffer();
    session.start().unwrap();
    assert!(sim.complete_period());
    session.close();

    assert!(!sim.complete_period());
    let mut input = vec![0u32; 32];
    assert_eq!(
        mapping
            .copy_from_half(mapping.active_half(), Direction::Input, &mut input)
            .unwrap(),
        32
    );
    assert_eq!(input[..4], [0, 1, 2, 3]);
    assert!(mapping.mapped_len() >= mapping.len());
}

#[test]
fn channel_info_copies_out_wire_descriptors() {
    let (device, _) = manual_device(HardwareProfile::ELK_PI);
    let session = device.open_session(&SessionConfig::default()).unwrap();

    let outputs = session.channel_info(Direction::Output);
    assert_eq!(outputs.len(), 8);
    assert_eq!(outputs.get(3).map(|d| d.label()), Some("OUT-3"));

    let mut small = vec![0u8; DESCRIPTOR_WIRE_SIZE * 7];
    assert_eq!(
        session.copy_channel_info(Direction::Output, &mut small),
        Err(SessionError::CopyFault {
            needed: DESCRIPTOR_WIRE_SIZE * 8,
            available: DESCRIPTOR_WIRE_SIZE * 7,
        })
    );
    assert!(small.iter().all(|b| *b == 0));

    let mut dst = vec![0u8; DESCRIPTOR_WIRE_SIZE * 8];
    let written = session
        .copy_channel_info(Direction::Input, &mut dst)
        .unwrap();
    assert_eq!(written, dst.len());
    let third = rtpcm_core::ChannelDescriptor::from_wire(&dst[2 * DESCRIPTOR_WIRE_SIZE..]).unwrap();
    assert_eq!(third.label(), "IN-2");
    assert_eq!(third.offset_words(), 2);
    assert_eq!(third.stride_words(), 8);
    assert_eq!(third.sample_format(), SampleFormat::Int24LeftJustified);
}

#[test]
fn clocked_simulator_drives_the_consumer() {
    let profile = HardwareProfile::HIFI_BERRY_PRO;
    let config = profile.session_config().with_period(16);
    let hardware = SimulatedHardware::new(SimClock::Clocked {
        sample_rate: profile.sample_rate,
        period_frames: config.frames_per_period,
    });
    let device = Device::new(profile, Box::new(hardware));
    let session = device.open_session(&config).unwrap();
    let mut consumer = session.consumer().unwrap();
    session.start().unwrap();

    let mut cycles = 0;
    while cycles < 20 {
        let half = consumer
            .wait_timeout(Duration::from_secs(1))
            .unwrap()
            .expect("simulated clock stalled");
        let period = consumer.ready_period().unwrap();
        assert_eq!(period.half(), half);
        let (input, output) = period.split();
        output.copy_from(input);
        consumer.user_finished();
        cycles += 1;
    }

    session.stop().unwrap();
    let diagnostics = session.close();
    assert!(diagnostics.completions >= 20);
}
