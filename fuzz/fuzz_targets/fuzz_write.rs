#![no_main]

use libfuzzer_sys::fuzz_target;
use meta_io::{Container, JpegIO, MetadataKind, TiffIO, Xmp};
use std::io::Cursor;

fuzz_target!(|data: &[u8]| {
    let kinds = [MetadataKind::Exif, MetadataKind::Xmp, MetadataKind::Iptc];
    let comments = vec!["fuzz".to_string()];
    let xmp = Xmp::new(b"<x:xmpmeta xmlns:x='adobe:ns:meta/'/>".to_vec());

    match Container::detect(data) {
        Some(Container::Jpeg) => {
            let io = JpegIO::new();
            let _ = io.remove_metadata(&mut Cursor::new(data), &mut Vec::new(), &kinds);
            let _ = io.insert_comments(&mut Cursor::new(data), &mut Vec::new(), &comments);
            let _ = io.insert_xmp(&mut Cursor::new(data), &mut Vec::new(), &xmp);
        }
        Some(Container::Tiff) => {
            let io = TiffIO::new();
            let _ = io.remove_metadata(&mut Cursor::new(data), &mut Cursor::new(Vec::new()), &kinds);
            let _ = io.insert_comments(&mut Cursor::new(data), &mut Cursor::new(Vec::new()), 0, &comments);
            let _ = io.retain_pages(&mut Cursor::new(data), &mut Cursor::new(Vec::new()), &[0]);
        }
        None => {}
    }
});
