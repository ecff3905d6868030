#![no_main]

use libfuzzer_sys::fuzz_target;
use meta_io::{Container, JpegIO, MetadataRegistry, TiffIO};
use std::io::Cursor;

fn walk(mut registry: MetadataRegistry) {
    let _ = registry.thumbnails();
    for mut metadata in registry {
        let _ = metadata.entries();
    }
}

fuzz_target!(|data: &[u8]| {
    // Any input must produce a value or an error, never a panic
    let mut cursor = Cursor::new(data);
    match Container::detect(data) {
        Some(Container::Jpeg) => {
            if let Ok(registry) = JpegIO::new().read_metadata(&mut cursor) {
                walk(registry);
            }
            let _ = JpegIO::new().extract_icc_profile(&mut Cursor::new(data));
        }
        Some(Container::Tiff) => {
            let io = TiffIO::new();
            if let Ok((_, pages)) = io.read_pages(&mut cursor) {
                for page in 0..pages.len() {
                    if let Ok(registry) = io.read_metadata(&mut cursor, page) {
                        walk(registry);
                    }
                }
            }
        }
        None => {}
    }
});
