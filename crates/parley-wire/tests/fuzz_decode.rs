use bytes::Bytes;
use parley_wire::{Envelope, FrameHeader, FRAME_HEADER_SIZE, FRAME_MAGIC, FRAME_VERSION};
use rand::{thread_rng, Rng};

#[test]
fn fuzz_decode_envelope_never_panics() {
    let mut rng = thread_rng();
    for _ in 0..10_000 {
        let len: usize = rng.gen_range(0..2048);
        let mut data = vec![0u8; len];
        rng.fill(&mut data[..]);
        let _ = Envelope::decode(Bytes::from(data));
    }
}

#[test]
fn fuzz_decode_header_never_panics() {
    let mut rng = thread_rng();
    for _ in 0..10_000 {
        let len: usize = rng.gen_range(0..32);
        let mut data = vec![0u8; len];
        rng.fill(&mut data[..]);
        let _ = FrameHeader::decode(&data);
    }
}

#[test]
fn random_mutation_of_valid_frame_is_handled() {
    let mut rng = thread_rng();
    let mut frame = vec![0u8; FRAME_HEADER_SIZE + 32];
    frame[0] = FRAME_MAGIC;
    frame[1] = FRAME_VERSION;
    frame[2] = 0x10;
    frame[4..8].copy_from_slice(&32u32.to_be_bytes());

    for _ in 0..1_000 {
        let mut mutated = frame.clone();
        let flip_count = rng.gen_range(1..6);
        for _ in 0..flip_count {
            let idx = rng.gen_range(0..mutated.len());
            mutated[idx] ^= rng.gen::<u8>();
        }
        if rng.gen_bool(0.2) {
            mutated.truncate(rng.gen_range(0..mutated.len()));
        }
        let _ = Envelope::decode(Bytes::from(mutated));
    }
}

#[test]
fn decoded_payload_length_matches_header() {
    let mut rng = thread_rng();
    for _ in 0..1_000 {
        let len: usize = rng.gen_range(0..512);
        let mut payload = vec![0u8; len];
        rng.fill(&mut payload[..]);

        let frame = Envelope::data(payload.clone()).encode().unwrap();
        let header = FrameHeader::decode(&frame).unwrap();
        assert_eq!(header.payload_len as usize, len);

        match Envelope::decode(frame).unwrap() {
            Envelope::Data { payload: decoded } => assert_eq!(decoded, payload),
            other => panic!("unexpected envelope: {other:?}"),
        }
    }
}
