//! End-to-end behaviour of the media stream

mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;

use serial_test::serial;
use tokio_test::{assert_err, assert_ok};

use common::*;
use streamcore_media::codec::g711::{linear_to_ulaw, ulaw_to_linear};
use streamcore_media::dtmf::MAX_DTMF_DIGITS;
use streamcore_media::prelude::*;
use streamcore_media::{CodecParam, JitterBufferSettings, NullPort, PayloadTypePolicy, StreamState};
use streamcore_rtp::packet::rtcp::RtcpPacket;
use streamcore_rtp::{LoopbackTransport, RtcpConfig};

const PEER_SSRC: u32 = 0x5eed_0001;

fn decoded(level: i16) -> i16 {
    ulaw_to_linear(linear_to_ulaw(level))
}

fn pull(stream: &MediaStream) -> AudioFrame {
    let mut frame = AudioFrame::default();
    assert_ok!(stream.get_frame(&mut frame));
    frame
}

fn tone(level: i16) -> AudioFrame {
    AudioFrame::audio(vec![level; 160], 0)
}

#[test]
fn reordered_arrival_plays_in_sequence() {
    init_test_logging();
    let transport = RecordingTransport::new();
    let info = pcmu_info().with_jitter_buffer(JitterBufferSettings {
        max_prefetch_ms: Some(60),
        ..Default::default()
    });
    let stream = create_stream(info, transport.clone());
    stream.start().unwrap();

    for seq in [100u16, 102, 101, 103] {
        transport.inject_rtp(&pcmu_packet(seq, PEER_SSRC, seq as i16 * 50));
    }

    for seq in 100u16..=103 {
        let frame = pull(&stream);
        assert_eq!(frame.frame_type, FrameType::Audio);
        assert_eq!(frame.timestamp, seq as u32 * 160);
        assert_eq!(frame.samples, vec![decoded(seq as i16 * 50); 160]);
    }

    let jb = stream.jitter_buffer_stat().unwrap();
    assert_eq!((jb.played, jb.lost, jb.duplicates), (4, 0, 0));
    assert_eq!(stream.stat().unwrap().packets_lost, 0);
    assert_eq!(stream.decode_stat().unwrap().frames_concealed, 0);
}

#[test]
fn round_trip_between_two_streams() {
    init_test_logging();
    let (near, far) = LoopbackTransport::pair();
    let alice = create_stream(pcmu_info(), near.clone());
    let bob = create_stream(pcmu_info(), far.clone());
    alice.start().unwrap();
    bob.start().unwrap();

    const FRAMES: i16 = 50;
    for i in 0..FRAMES {
        assert_ok!(alice.put_frame(&tone(i * 200)));
        let frame = pull(&bob);
        assert!(frame.is_audio());
        assert_eq!(frame.samples, vec![decoded(i * 200); 160], "frame {}", i);
    }

    let sent = alice.stat().unwrap();
    let received = bob.stat().unwrap();
    assert_eq!(sent.packets_sent, FRAMES as u64);
    assert_eq!(sent.octets_sent, FRAMES as u64 * 160);
    assert_eq!(received.packets_received, FRAMES as u64);
    assert_eq!(received.packets_lost, 0);
    assert_eq!(received.peer_ssrc, Some(alice.info().ssrc));
    assert_eq!(bob.jitter_buffer_stat().unwrap().lost, 0);
    assert_eq!(alice.encode_stat().unwrap().packets_sent, FRAMES as u64);
}

#[test]
fn sequence_numbers_and_timestamps_advance() {
    let transport = RecordingTransport::new();
    let stream = create_stream(pcmu_info(), transport.clone());
    stream.start().unwrap();

    for _ in 0..3 {
        stream.put_frame(&tone(100)).unwrap();
    }
    let packets = transport.sent_rtp();
    assert_eq!(packets.len(), 3);
    assert!(packets[0].header.marker);
    for pair in packets.windows(2) {
        assert_eq!(pair[1].header.sequence_number, pair[0].header.sequence_number.wrapping_add(1));
        assert_eq!(pair[1].header.timestamp, pair[0].header.timestamp.wrapping_add(160));
        assert!(!pair[1].header.marker);
    }
    assert!(packets.iter().all(|p| p.header.payload_type == 0 && p.payload.len() == 160));
    assert!(packets.iter().all(|p| p.header.ssrc == stream.info().ssrc));
}

#[test]
fn paused_decode_returns_silence_without_touching_buffer() {
    let transport = RecordingTransport::new();
    let stream = create_stream(pcmu_info(), transport.clone());
    stream.start().unwrap();

    for seq in 1..=3 {
        transport.inject_rtp(&pcmu_packet(seq, PEER_SSRC, 1000));
    }
    stream.pause(MediaDirection::ReceiveOnly).unwrap();

    let frame = pull(&stream);
    assert_eq!(frame.frame_type, FrameType::None);
    assert_eq!(frame.samples, vec![0; 160]);
    let jb = stream.jitter_buffer_stat().unwrap();
    assert_eq!((jb.level, jb.played), (3, 0));

    // Media arriving while paused is not buffered
    transport.inject_rtp(&pcmu_packet(4, PEER_SSRC, 1000));
    assert_eq!(stream.decode_stat().unwrap().dropped_paused, 1);
    assert_eq!(stream.jitter_buffer_stat().unwrap().level, 3);

    // The send direction is unaffected
    stream.put_frame(&tone(5)).unwrap();
    assert_eq!(transport.rtp.lock().len(), 1);

    stream.resume(MediaDirection::ReceiveOnly).unwrap();
    let frame = pull(&stream);
    assert!(frame.is_audio());
    assert_eq!(frame.timestamp, 160);
}

#[test]
fn paused_encode_discards_frames() {
    let transport = RecordingTransport::new();
    let stream = create_stream(pcmu_info(), transport.clone());
    stream.start().unwrap();

    stream.pause(MediaDirection::SendOnly).unwrap();
    assert_ok!(stream.put_frame(&tone(300)));
    assert!(transport.rtp.lock().is_empty());
    assert_eq!(stream.encode_stat().unwrap().dropped_paused, 1);

    stream.resume(MediaDirection::SendReceive).unwrap();
    assert_ok!(stream.put_frame(&tone(300)));
    assert_eq!(transport.rtp.lock().len(), 1);
}

#[test]
fn wrong_frame_size_is_rejected() {
    let transport = RecordingTransport::new();
    let stream = create_stream(pcmu_info(), transport.clone());
    stream.start().unwrap();

    let err = stream.put_frame(&AudioFrame::audio(vec![0; 80], 0)).unwrap_err();
    assert!(matches!(err, Error::FrameSize { expected: 160, actual: 80 }));
    assert!(transport.rtp.lock().is_empty());
}

#[test]
fn dtmf_queue_limit() {
    let transport = RecordingTransport::new();
    let stream = create_stream(pcmu_info(), transport);

    assert_ok!(stream.dial_dtmf(&"1".repeat(MAX_DTMF_DIGITS)));
    assert!(matches!(
        stream.dial_dtmf("2"),
        Err(Error::TooManyDigits { requested: 1, queued: 32, limit: 32 })
    ));

    let other = create_stream(pcmu_info(), RecordingTransport::new());
    assert!(matches!(other.dial_dtmf(&"9".repeat(33)), Err(Error::TooManyDigits { .. })));
    assert!(matches!(other.dial_dtmf("12E"), Err(Error::InvalidDigit('E'))));
    assert_ok!(other.dial_dtmf("0123456789*#ABCD"));

    let no_events = create_stream(
        StreamInfo::new(MediaDirection::SendReceive, remote(), CodecInfo::pcmu()),
        RecordingTransport::new(),
    );
    assert!(matches!(no_events.dial_dtmf("1"), Err(Error::NoTelephoneEvent)));
}

#[test]
fn dtmf_packets_take_the_send_slot() {
    let transport = RecordingTransport::new();
    let stream = create_stream(pcmu_info(), transport.clone());
    stream.start().unwrap();

    stream.dial_dtmf("7").unwrap();
    for _ in 0..13 {
        stream.put_frame(&tone(100)).unwrap();
    }

    let packets = transport.sent_rtp();
    let (events, audio): (Vec<_>, Vec<_>) = packets.iter().partition(|p| p.header.payload_type == EVENT_PT);
    assert_eq!(events.len(), 12);
    assert_eq!(audio.len(), 1);
    assert!(events[0].header.marker);
    assert!(events.iter().all(|p| p.header.timestamp == events[0].header.timestamp));
    assert_eq!(events[0].payload[0], 7);
    assert_eq!(events[11].payload[1] & 0x80, 0x80);

    // Audio resumes with the media clock that kept running under the digit
    assert_eq!(audio[0].header.timestamp, events[0].header.timestamp.wrapping_add(12 * 160));
    assert_eq!(stream.encode_stat().unwrap().dtmf_packets, 12);
}

#[test]
fn full_digit_queue_is_transmitted() {
    let transport = RecordingTransport::new();
    let stream = create_stream(pcmu_info(), transport.clone());
    stream.start().unwrap();

    let digits = "0123456789*#ABCD0123456789*#ABCD";
    assert_eq!(digits.len(), MAX_DTMF_DIGITS);
    stream.dial_dtmf(digits).unwrap();
    for _ in 0..MAX_DTMF_DIGITS * 12 + 5 {
        stream.put_frame(&tone(0)).unwrap();
    }

    // Group the event packets by their shared start timestamp
    let mut events: Vec<(u32, u8, bool)> = Vec::new();
    for packet in transport.sent_rtp().iter().filter(|p| p.header.payload_type == EVENT_PT) {
        let end = packet.payload[1] & 0x80 != 0;
        match events.last_mut() {
            Some((ts, _, ended)) if *ts == packet.header.timestamp => *ended |= end,
            _ => events.push((packet.header.timestamp, packet.payload[0], end)),
        }
    }
    assert_eq!(events.len(), MAX_DTMF_DIGITS);
    assert!(events.iter().all(|(_, _, ended)| *ended));
    let sent: String = events
        .iter()
        .map(|(_, code, _)| streamcore_media::dtmf::event_to_digit(*code).unwrap() as char)
        .collect();
    assert_eq!(sent, digits);
    assert_eq!(stream.encode_stat().unwrap().packets_sent, 5);
}

#[test]
fn rejected_dial_sends_nothing() {
    let transport = RecordingTransport::new();
    let stream = create_stream(pcmu_info(), transport.clone());
    stream.start().unwrap();

    assert!(matches!(stream.dial_dtmf(&"5".repeat(33)), Err(Error::TooManyDigits { .. })));
    for _ in 0..20 {
        stream.put_frame(&tone(0)).unwrap();
    }
    let packets = transport.sent_rtp();
    assert_eq!(packets.len(), 20);
    assert!(packets.iter().all(|p| p.header.payload_type == 0));
    assert_eq!(stream.encode_stat().unwrap().dtmf_packets, 0);
}

#[test]
fn dtmf_end_to_end() {
    init_test_logging();
    let (near, far) = LoopbackTransport::pair();
    let alice = create_stream(pcmu_info(), near);
    let bob = create_stream(pcmu_info(), far);
    alice.start().unwrap();
    bob.start().unwrap();

    alice.dial_dtmf("1#").unwrap();
    assert!(!bob.check_dtmf().unwrap());
    for _ in 0..24 {
        alice.put_frame(&tone(0)).unwrap();
    }

    assert!(bob.check_dtmf().unwrap());
    let mut one = [0u8; 1];
    assert_eq!(bob.get_dtmf(&mut one).unwrap(), 1);
    assert_eq!(&one, b"1");
    let mut rest = [0u8; 8];
    assert_eq!(bob.get_dtmf(&mut rest).unwrap(), 1);
    assert_eq!(rest[0], b'#');
    assert!(!bob.check_dtmf().unwrap());
    assert_eq!(bob.decode_stat().unwrap().dtmf_events, 2);
}

#[test]
fn incoming_dtmf_bypasses_pause() {
    let transport = RecordingTransport::new();
    let stream = create_stream(pcmu_info(), transport.clone());
    stream.start().unwrap();
    stream.pause(MediaDirection::SendReceive).unwrap();

    transport.inject_rtp(&raw_packet(EVENT_PT, 1, 800, PEER_SSRC, &[5, 10, 0, 160]));
    assert!(stream.check_dtmf().unwrap());
    assert_eq!(stream.jitter_buffer_stat().unwrap().received, 0);
}

#[test]
fn destroyed_stream_rejects_operations() {
    let transport = RecordingTransport::new();
    let stream = create_stream(pcmu_info(), transport.clone());
    stream.start().unwrap();
    assert!(transport.is_attached());

    stream.destroy().unwrap();
    assert_eq!(stream.state(), StreamState::Destroyed);
    assert!(!transport.is_attached());

    let rtcp = transport.rtcp.lock();
    let last = RtcpPacket::parse_compound(rtcp.last().unwrap()).unwrap();
    assert!(last.iter().any(|p| matches!(p, RtcpPacket::Goodbye(bye) if bye.sources == vec![stream.info().ssrc])));
    drop(rtcp);

    assert!(matches!(stream.destroy(), Err(Error::StreamDestroyed)));
    assert!(matches!(stream.start(), Err(Error::StreamDestroyed)));
    assert!(matches!(stream.dial_dtmf("1"), Err(Error::StreamDestroyed)));
    assert!(matches!(stream.stat(), Err(Error::StreamDestroyed)));
    assert!(matches!(stream.pause(MediaDirection::SendOnly), Err(Error::StreamDestroyed)));
    assert!(matches!(stream.get_dtmf(&mut [0u8; 4]), Err(Error::StreamDestroyed)));
    let mut frame = AudioFrame::default();
    assert!(matches!(stream.get_frame(&mut frame), Err(Error::StreamDestroyed)));
    assert!(matches!(stream.put_frame(&tone(1)), Err(Error::StreamDestroyed)));
}

#[test]
fn destroy_without_start_sends_nothing() {
    let transport = RecordingTransport::new();
    let stream = create_stream(pcmu_info(), transport.clone());
    assert_eq!(stream.state(), StreamState::Created);
    assert_ok!(stream.destroy());
    assert!(transport.rtcp.lock().is_empty());
    assert!(!transport.is_attached());

    // The transport is free for a new stream
    let again = create_stream(pcmu_info(), transport.clone());
    assert_eq!(again.state(), StreamState::Created);
}

#[test]
fn dropping_last_handle_detaches() {
    let transport = RecordingTransport::new();
    let stream = create_stream(pcmu_info(), transport.clone());
    let clone = stream.clone();
    drop(stream);
    assert!(transport.is_attached());
    drop(clone);
    assert!(!transport.is_attached());
}

#[test]
fn failed_creation_leaves_transport_free() {
    let transport = RecordingTransport::new();
    let registry = CodecRegistry::with_defaults();

    let bad = pcmu_info().with_payload_types(None, Some(0));
    assert!(matches!(
        MediaStream::create(&registry, bad, transport.clone()),
        Err(Error::InvalidConfig(_))
    ));

    let opus = StreamInfo::new(MediaDirection::SendReceive, remote(), CodecInfo::new("opus", 111, 48000));
    assert!(matches!(
        MediaStream::create(&registry, opus, transport.clone()),
        Err(Error::UnsupportedCodec(_))
    ));

    let video = pcmu_info().with_media_type(MediaType::Video);
    assert_err!(MediaStream::create(&registry, video, transport.clone()));
    assert!(!transport.is_attached());

    let first = create_stream(pcmu_info(), transport.clone());
    assert!(matches!(
        MediaStream::create(&registry, pcmu_info(), transport.clone()),
        Err(Error::Transport(streamcore_rtp::Error::AlreadyAttached))
    ));
    // The failed attempt did not disturb the existing attachment
    assert!(transport.is_attached());
    assert_eq!(first.state(), StreamState::Created);
}

#[test]
fn send_failure_does_not_tear_down_stream() {
    let transport = RecordingTransport::new();
    let stream = create_stream(pcmu_info(), transport.clone());
    stream.start().unwrap();

    transport.fail_sends.store(true, Ordering::SeqCst);
    assert!(matches!(stream.put_frame(&tone(10)), Err(Error::Transport(_))));

    transport.fail_sends.store(false, Ordering::SeqCst);
    assert_ok!(stream.put_frame(&tone(10)));
    assert_eq!(stream.state(), StreamState::Started);

    let stat = stream.encode_stat().unwrap();
    assert_eq!((stat.send_errors, stat.packets_sent), (1, 1));
    assert_eq!(stream.stat().unwrap().packets_sent, 1);
}

#[test]
fn protocol_anomalies_are_counted() {
    let transport = RecordingTransport::new();
    let stream = create_stream(pcmu_info(), transport.clone());
    stream.start().unwrap();

    transport.inject_rtp(&[0x80, 0x00, 0x01]);
    transport.inject_rtp(&raw_packet(8, 1, 160, PEER_SSRC, &[0xd5; 160]));
    transport.inject_rtcp(&[0xde, 0xad]);

    let stat = stream.decode_stat().unwrap();
    assert_eq!((stat.malformed, stat.pt_mismatch), (1, 1));
    assert_eq!(stream.jitter_buffer_stat().unwrap().received, 0);
    assert_eq!(stream.state(), StreamState::Started);
}

#[test]
fn pass_through_accepts_foreign_payload_types() {
    let transport = RecordingTransport::new();
    let stream = create_stream(
        pcmu_info().with_payload_type_policy(PayloadTypePolicy::PassThrough),
        transport.clone(),
    );
    stream.start().unwrap();

    transport.inject_rtp(&raw_packet(8, 1, 160, PEER_SSRC, &[0xff; 160]));
    assert_eq!(stream.decode_stat().unwrap().pt_mismatch, 1);
    assert_eq!(stream.jitter_buffer_stat().unwrap().received, 1);
    assert!(pull(&stream).is_audio());
}

#[test]
fn packets_before_start_are_ignored() {
    let transport = RecordingTransport::new();
    let stream = create_stream(pcmu_info(), transport.clone());

    transport.inject_rtp(&pcmu_packet(1, PEER_SSRC, 100));
    assert_eq!(pull(&stream).frame_type, FrameType::None);
    assert_ok!(stream.put_frame(&tone(1)));
    assert!(transport.rtp.lock().is_empty());

    stream.start().unwrap();
    assert_eq!(stream.decode_stat().unwrap().packets_received, 0);
    assert_eq!(pull(&stream).frame_type, FrameType::None);
}

#[test]
fn loss_is_concealed_and_counted() {
    let transport = RecordingTransport::new();
    let stream = create_stream(pcmu_info(), transport.clone());
    stream.start().unwrap();

    for seq in [1u16, 2, 4, 5] {
        transport.inject_rtp(&pcmu_packet(seq, PEER_SSRC, 4000));
    }
    let frames: Vec<_> = (0..5).map(|_| pull(&stream)).collect();
    assert!(frames.iter().all(AudioFrame::is_audio));
    assert_eq!(frames[2].timestamp, 3 * 160);

    let decode = stream.decode_stat().unwrap();
    assert_eq!((decode.frames_decoded, decode.frames_concealed), (4, 1));
    assert_eq!(stream.jitter_buffer_stat().unwrap().lost, 1);
    assert_eq!(stream.stat().unwrap().packets_lost, 1);
}

#[test]
fn long_outage_is_counted_as_loss() {
    let transport = RecordingTransport::new();
    let stream = create_stream(pcmu_info(), transport.clone());
    stream.start().unwrap();

    transport.inject_rtp(&pcmu_packet(1, PEER_SSRC, 500));
    assert!(pull(&stream).is_audio());

    // Sixty frames after the last one, with fifty-nine never arriving
    transport.inject_rtp(&pcmu_packet(61, PEER_SSRC, 500));
    let frames: Vec<_> = (0..30).map(|_| pull(&stream)).collect();
    assert_eq!(frames.iter().filter(|f| f.timestamp == 61 * 160).count(), 1);

    let jb = stream.jitter_buffer_stat().unwrap();
    assert_eq!((jb.lost, jb.played, jb.resyncs), (59, 2, 0));
    assert_eq!(stream.stat().unwrap().packets_lost, 59);
}

#[test]
fn source_change_restarts_receive_path() {
    let transport = RecordingTransport::new();
    let stream = create_stream(pcmu_info(), transport.clone());
    stream.start().unwrap();

    transport.inject_rtp(&pcmu_packet(10, PEER_SSRC, 100));
    transport.inject_rtp(&pcmu_packet(11, PEER_SSRC, 100));
    assert!(pull(&stream).is_audio());

    transport.inject_rtp(&pcmu_packet(30000, PEER_SSRC + 1, 2000));
    let frame = pull(&stream);
    assert_eq!(frame.samples[0], decoded(2000));
    assert_eq!(stream.decode_stat().unwrap().ssrc_changes, 1);
    assert_eq!(stream.stat().unwrap().peer_ssrc, Some(PEER_SSRC + 1));
}

#[test]
fn rtcp_reports_flow_both_ways() {
    init_test_logging();
    let (near, far) = LoopbackTransport::pair();
    let rtcp = |cname: &str| RtcpConfig::default().with_packet_interval(5).with_cname(cname);
    let alice = create_stream(pcmu_info().with_rtcp(rtcp("alice@test")), near.clone());
    let bob = create_stream(pcmu_info().with_rtcp(rtcp("bob@test")), far.clone());
    alice.start().unwrap();
    bob.start().unwrap();

    for i in 0..12 {
        alice.put_frame(&tone(i * 10)).unwrap();
        pull(&bob);
    }

    let bob_view = bob.stat().unwrap();
    assert!(bob_view.sr_received >= 1);
    assert_eq!(bob_view.peer_cname.as_deref(), Some("alice@test"));
    assert!(bob_view.rr_sent >= 1);

    let alice_view = alice.stat().unwrap();
    assert!(alice_view.sr_sent >= 1);
    assert!(alice_view.rr_received >= 1);
    assert_eq!(alice_view.remote_packets_lost, Some(0));
    assert!(near.rtcp_sent() >= 1 && far.rtcp_sent() >= 1);
}

#[test]
fn jitter_buffer_settings_apply() {
    let transport = RecordingTransport::new();
    let info = pcmu_info().with_jitter_buffer(JitterBufferSettings {
        init_ms: Some(60),
        max_delay_ms: Some(200),
        ..Default::default()
    });
    let stream = create_stream(info, transport.clone());
    stream.start().unwrap();

    transport.inject_rtp(&pcmu_packet(1, PEER_SSRC, 100));
    transport.inject_rtp(&pcmu_packet(2, PEER_SSRC, 100));
    // Three frames of prefetch before the first playout
    assert_eq!(pull(&stream).frame_type, FrameType::None);
    transport.inject_rtp(&pcmu_packet(3, PEER_SSRC, 100));
    assert!(pull(&stream).is_audio());
    assert_eq!(stream.jitter_buffer_stat().unwrap().prefetch_frames, 3);
}

#[test]
fn ptime_shapes_the_port() {
    let transport = RecordingTransport::new();
    let info = pcmu_info().with_codec_param(CodecParam {
        ptime_ms: 30,
        ..Default::default()
    });
    let stream = create_stream(info, transport.clone());
    assert_eq!(MediaPort::info(&stream).samples_per_frame, 240);

    stream.start().unwrap();
    stream.put_frame(&AudioFrame::audio(vec![0; 240], 0)).unwrap();
    assert_eq!(transport.sent_rtp()[0].payload.len(), 240);
}

#[tokio::test(start_paused = true)]
#[serial]
async fn master_port_drives_a_stream_pair() {
    init_test_logging();
    let (near, far) = LoopbackTransport::pair();
    let alice = create_stream(pcmu_info(), near);
    let bob = create_stream(pcmu_info(), far);
    alice.start().unwrap();
    bob.start().unwrap();

    let source: Arc<dyn MediaPort> = Arc::new(NullPort::new(8000, 1, 20));
    let clock = MasterPort::new(source, Arc::new(alice.clone())).unwrap();
    clock.start().unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    clock.stop();

    // The null source produces silence frames which are still sent
    let sent = alice.stat().unwrap().packets_sent;
    assert!(sent >= 5, "sent {}", sent);
    assert_eq!(bob.stat().unwrap().packets_received, sent);
}
