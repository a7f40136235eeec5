use proptest::prelude::*;

use rtpcm_core::{
    BufferLayout, ChannelDescriptor, ChannelTable, Direction, PeriodBuffer, SampleFormat,
    UnderrunTracker,
};

#[derive(Clone, Debug)]
enum Step {
    Complete,
    Wait,
    Finish,
}

fn step_strategy() -> impl Strategy<Value = Step> {
    prop_oneof![
        3 => Just(Step::Complete),
        1 => Just(Step::Wait),
        1 => Just(Step::Finish),
    ]
}

fn format_strategy() -> impl Strategy<Value = SampleFormat> {
    prop::sample::select(SampleFormat::ALL.to_vec())
}

proptest! {
    #[test]
    fn under_runs_match_unacknowledged_completions(steps in prop::collection::vec(step_strategy(), 0..256)) {
        let layout = BufferLayout::new(16, 1, 1, SampleFormat::Int32).unwrap();
        let buffer = PeriodBuffer::allocate(layout).unwrap();
        let tracker = UnderrunTracker::new();
        let (mut completions, mut acknowledged, mut under_runs) = (0u64, 0u64, 0u64);

        for step in steps {
            match step {
                Step::Complete => {
                    tracker.on_period_complete();
                    buffer.flip();
                    completions += 1;
                }
                Step::Wait => {
                    let half = tracker.on_wait_ready(&buffer);
                    prop_assert_eq!(half, buffer.active_half());
                    acknowledged = completions;
                }
                Step::Finish => {
                    let missed = tracker.on_user_finished();
                    prop_assert_eq!(missed, completions - acknowledged);
                    under_runs += missed;
                    acknowledged = completions;
                }
            }
            prop_assert!(tracker.acknowledged() <= tracker.completions());
            prop_assert_eq!(tracker.completions(), completions);
            prop_assert_eq!(tracker.acknowledged(), acknowledged);
            prop_assert_eq!(tracker.under_runs(), under_runs);
        }
    }

    #[test]
    fn descriptor_tables_are_identity_permutations(
        channels in 1usize..255,
        format in format_strategy(),
        output in any::<bool>(),
    ) {
        let direction = if output { Direction::Output } else { Direction::Input };
        let table = ChannelTable::build(direction, channels, format, channels).unwrap();
        prop_assert_eq!(table.len(), channels);

        let mut seen = vec![false; channels];
        for (index, descriptor) in table.iter().enumerate() {
            prop_assert_eq!(descriptor.logical_index() as usize, index);
            prop_assert_eq!(descriptor.stride_words() as usize, channels);
            prop_assert_eq!(descriptor.direction(), direction);
            prop_assert_eq!(descriptor.sample_format(), format);
            prop_assert!(descriptor.label().len() < rtpcm_core::CHANNEL_NAME_SIZE);
            let offset = descriptor.offset_words() as usize;
            prop_assert!(offset < channels && !seen[offset]);
            seen[offset] = true;
        }

        let mut wire = vec![0u8; table.wire_len()];
        table.encode_into(&mut wire).unwrap();
        let last = ChannelDescriptor::from_wire(&wire[wire.len() - rtpcm_core::DESCRIPTOR_WIRE_SIZE..]).unwrap();
        prop_assert_eq!(Some(&last), table.get(channels - 1));
    }
}
