#![no_main]

use bytes::BytesMut;
use libfuzzer_sys::fuzz_target;

use mailgate_server::fuzzing::fuzz_parse;

fuzz_target!(|data: &[u8]| {
    let mut buffer = BytesMut::from(data);
    while let Ok(Some(_command)) = fuzz_parse(&mut buffer) {}
});
