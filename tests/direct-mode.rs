use producer_ingress::error::PacketError;
use producer_ingress::rtp::Ssrc;
use producer_ingress::{EncodingParams, Event, MediaKind, ProducerConfig, ReceiveResult};

mod common;
use common::{init_log, rtp, rtx, TestProducer};

fn single_layer() -> ProducerConfig {
    ProducerConfig::new(MediaKind::Video)
        .add_codec(96, 90_000, "video/VP8", Some(97))
        .add_encoding(EncodingParams::new(1000).ssrc(1000))
}

#[test]
fn single_layer_forward_and_repair() {
    init_log();

    let mut p = TestProducer::new(single_layer());

    for seq in [1, 2, 4, 5] {
        assert_eq!(p.receive(rtp(1000, 96, seq, &[seq as u8])), ReceiveResult::Media);
    }

    let added: Vec<_> = p
        .events
        .iter()
        .filter_map(|(_, e)| match e {
            Event::StreamAdded(s) => Some(s.clone()),
            _ => None,
        })
        .collect();
    assert_eq!(added.len(), 1);
    assert_eq!(added[0].ssrc, Ssrc::from(1000));
    assert_eq!(added[0].encoding_idx, 0);

    // forwarded unchanged
    for (fwd, seq) in p.forwarded().iter().zip([1_u16, 2, 4, 5]) {
        assert_eq!(fwd.packet, rtp(1000, 96, seq, &[seq as u8]));
        assert!(!fwd.repaired);
    }

    // RTX on an unadvertised SSRC, learnt by elimination
    assert_eq!(
        p.receive(rtx(2000, 97, 77, 3, &[3])),
        ReceiveResult::Retransmission
    );

    let fwd = p.forwarded();
    let repaired = fwd.last().unwrap();
    assert!(repaired.repaired);
    assert_eq!(repaired.packet.header.sequence_number, 3);
    assert_eq!(repaired.packet.header.ssrc, Ssrc::from(1000));
    assert_eq!(repaired.packet.header.payload_type, 96.into());
    assert_eq!(repaired.packet.payload, vec![3]);

    let snapshot = p.snapshot();
    assert_eq!(snapshot.streams.len(), 1);
    assert_eq!(snapshot.streams[0].rtx_ssrc, Some(2000.into()));
    assert_eq!(snapshot.streams[0].packets, 5);
    assert_eq!(snapshot.streams[0].repaired, 1);
}

#[test]
fn single_layer_all_received_then_rtx() {
    init_log();

    let mut p = TestProducer::new(single_layer());

    for seq in 1..=5 {
        assert_eq!(p.receive(rtp(1000, 96, seq, &[seq as u8])), ReceiveResult::Media);
    }

    // RTX seq 6 carrying seq 3. Unrepaired, seq 6 on SSRC 2000 would be a new
    // packet. Repaired it is seq 3 on SSRC 1000 with PT 96, which the stream
    // already has, so it goes no further.
    assert_eq!(
        p.receive(rtx(2000, 97, 6, 3, &[3])),
        ReceiveResult::Discarded(PacketError::Duplicate)
    );

    assert_eq!(p.forwarded().len(), 5);

    let snapshot = p.snapshot();
    assert_eq!(snapshot.streams.len(), 1);
    let stream = &snapshot.streams[0];
    assert_eq!(stream.ssrc, Ssrc::from(1000));
    assert_eq!(stream.rtx_ssrc, Some(2000.into()));
    assert_eq!(stream.packets, 5);
    assert_eq!(stream.max_seq, Some(5));
    assert_eq!(stream.repaired, 0);
    assert_eq!(stream.duplicates, 1);
    assert_eq!(snapshot.discarded.duplicate, 1);
}

#[test]
fn resend_of_received_packet_is_duplicate() {
    init_log();

    let mut p = TestProducer::new(single_layer());

    for seq in 1..=5 {
        p.receive(rtp(1000, 96, seq, &[1]));
    }

    assert_eq!(
        p.receive(rtx(2000, 97, 1, 3, &[1])),
        ReceiveResult::Discarded(PacketError::Duplicate)
    );
    assert_eq!(p.forwarded().len(), 5);
    assert_eq!(p.snapshot().discarded.duplicate, 1);
}

#[test]
fn internal_ssrc_and_remapped_pt() {
    init_log();

    let config = ProducerConfig::new(MediaKind::Video)
        .add_codec(96, 90_000, "video/VP8", Some(97))
        .add_codec_remap(96, 120)
        .add_encoding(EncodingParams::new(55_555));
    let mut p = TestProducer::new(config);

    // Single layer without SSRC binds by elimination.
    p.receive(rtp(1234, 96, 10, &[1]));
    p.receive(rtx(4321, 97, 3, 11, &[2]));

    let fwd = p.forwarded();
    assert_eq!(fwd.len(), 2);
    for f in fwd {
        assert_eq!(f.packet.header.ssrc, Ssrc::from(55_555));
        assert_eq!(f.packet.header.payload_type, 120.into());
    }
}

#[test]
fn unknown_stream_is_dropped() {
    init_log();

    let mut p = TestProducer::new(single_layer());

    assert_eq!(
        p.receive(rtp(3000, 96, 1, &[1])),
        ReceiveResult::Discarded(PacketError::UnknownStream(3000.into()))
    );

    // RTX before any primary can't be attributed.
    assert_eq!(
        p.receive(rtx(2000, 97, 1, 1, &[1])),
        ReceiveResult::Discarded(PacketError::UnknownStream(2000.into()))
    );

    assert!(p.events.is_empty());
    assert_eq!(p.snapshot().discarded.unknown_stream, 2);
}
