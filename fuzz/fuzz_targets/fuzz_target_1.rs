#![no_main]

use bytes::BytesMut;
use libfuzzer_sys::fuzz_target;
use privilege_broker::core::codec::FrameCodec;
use privilege_broker::core::serialization::decode;
use privilege_broker::Request;
use tokio_util::codec::Decoder;

fuzz_target!(|data: &[u8]| {
    // Fuzz frame + request decoding - test for panics, crashes, infinite loops
    let mut codec = FrameCodec::new(64 * 1024);
    let mut buf = BytesMut::from(data);
    while let Ok(Some(frame)) = codec.decode(&mut buf) {
        let _ = decode::<Request>(&frame);
    }
});
