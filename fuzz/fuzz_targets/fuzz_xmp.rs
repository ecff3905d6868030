#![no_main]

use libfuzzer_sys::fuzz_target;
use meta_io::xmp::{self, ExtendedXmpAssembler, Xmp};

fuzz_target!(|data: &[u8]| {
    // Raw bytes as an APP1 ExtendedXMP payload
    let mut assembler = ExtendedXmpAssembler::new(xmp::guid_of(data));
    let _ = assembler.push(data);
    let _ = assembler.finish();

    let packet = Xmp::from_packet(data.to_vec());
    let _ = packet.referenced_guid();
    let _ = packet.app1_payloads();

    if let Ok(text) = std::str::from_utf8(data) {
        let _ = xmp::description_attribute(text, "xmpNote:HasExtendedXMP");
        let _ = xmp::set_description_attribute(text, "dc:format", "image/jpeg");
        let _ = xmp::remove_description_attribute(text, "dc:format");
        let _ = xmp::extended_guid(data);
    }
});
