use std::hint::black_box;
use std::time::Duration;

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use rtpcm_core::{
    ChannelTable, Device, Direction, HardwareProfile, SampleFormat, SessionConfig, SimClock,
    SimulatedHardware,
};

fn period_handoff(c: &mut Criterion) {
    let mut group = c.benchmark_group("handoff");
    group.measurement_time(Duration::from_secs(5));

    for frames in [16usize, 64, 128] {
        let hardware = SimulatedHardware::new(SimClock::Manual);
        let sim = hardware.handle();
        let device = Device::new(HardwareProfile::ELK_PI, Box::new(hardware));
        let config = SessionConfig::default().with_period(frames);
        let session = device.open_session(&config).expect("open session");
        let mut consumer = session.consumer().expect("consumer");
        session.start().expect("start");

        group.bench_with_input(
            BenchmarkId::new("complete_period", frames),
            &frames,
            |b, _| {
                b.iter(|| black_box(sim.complete_period()));
            },
        );

        group.bench_with_input(BenchmarkId::new("cycle", frames), &frames, |b, _| {
            b.iter(|| {
                sim.complete_period();
                let half = consumer
                    .run_cycle(|period| {
                        let (input, output) = period.split();
                        output.copy_from(input);
                    })
                    .expect("cycle");
                black_box(half)
            });
        });

        session.close();
    }

    group.finish();
}

fn channel_tables(c: &mut Criterion) {
    c.bench_function("channel_table_254", |b| {
        b.iter(|| {
            ChannelTable::build(Direction::Output, 254, SampleFormat::Int32, 254)
                .expect("table")
        });
    });
}

criterion_group!(benches, period_handoff, channel_tables);
criterion_main!(benches);
