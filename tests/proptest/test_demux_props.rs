//! Property-based tests for serial demuxing

use proptest::prelude::*;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use v86lab::serial::SerialDemuxer;

fn latin1_without_cr(bytes: &[u8]) -> String {
    bytes.iter().filter(|&&b| b != b'\r').map(|&b| char::from(b)).collect()
}

proptest! {
    #[test]
    fn test_buffer_is_decoded_input(bytes in prop::collection::vec(any::<u8>(), 0..512)) {
        let mut demux = SerialDemuxer::new();
        let out = demux.push_bytes(&bytes);

        let expected = latin1_without_cr(&bytes);
        prop_assert_eq!(demux.buffer(), expected.as_str());
        prop_assert_eq!(out.text, expected);
        prop_assert_eq!(demux.bytes_seen(), bytes.len() as u64);
        prop_assert_eq!(
            demux.bytes_dropped(),
            bytes.iter().filter(|&&b| b == b'\r').count() as u64
        );
    }

    #[test]
    fn test_chunking_does_not_matter(
        bytes in prop::collection::vec(any::<u8>(), 0..256),
        split in any::<prop::sample::Index>(),
    ) {
        let at = split.index(bytes.len() + 1);
        let mut whole = SerialDemuxer::new();
        whole.push_bytes(&bytes);

        let mut chunked = SerialDemuxer::new();
        chunked.push_bytes(&bytes[..at]);
        for &b in &bytes[at..] {
            chunked.push_byte(b);
        }

        prop_assert_eq!(whole.buffer(), chunked.buffer());
    }

    #[test]
    fn test_repeatable_trigger_counts_occurrences(
        pieces in prop::collection::vec(prop_oneof!["[a-z ]{0,6}", Just("$ ".to_string())], 0..40),
    ) {
        let mut demux = SerialDemuxer::new();
        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        demux.triggers_mut().register("$ ", true, move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });

        let input = pieces.concat();
        for fired in demux.push_bytes(input.as_bytes()).fired {
            fired.fire();
        }

        // "$ " cannot overlap itself, so matches are the non-overlapping count
        prop_assert_eq!(count.load(Ordering::SeqCst), input.matches("$ ").count());
    }

    #[test]
    fn test_one_shot_trigger_fires_at_most_once(text in "[a-z$# ]{0,100}") {
        let mut demux = SerialDemuxer::new();
        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        demux.triggers_mut().register("# ", false, move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });

        for fired in demux.push_bytes(text.as_bytes()).fired {
            fired.fire();
        }

        let expected = usize::from(text.contains("# "));
        prop_assert_eq!(count.load(Ordering::SeqCst), expected);
    }
}
