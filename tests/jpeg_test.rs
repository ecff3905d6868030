// JPEG segment engine scenarios, run against synthetic fixtures

use meta_io::{
    formats::jpeg_io::{self, JpegIO},
    irb::{resource_id, ImageResource, Irb},
    segment::{id, marker, Segment},
    test_utils::*,
    xmp::{self, Xmp},
    Error, Exif, IptcDataSet, IptcTag, MetadataKind, StructuredValue, Thumbnail,
};
use std::io::Cursor;

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn segments(data: &[u8]) -> Vec<Segment> {
    jpeg_io::scan(&mut Cursor::new(data)).expect("scan")
}

fn markers(data: &[u8]) -> Vec<u16> {
    segments(data).iter().map(|s| s.marker).collect()
}

/// Everything from the first DQT to the end of the stream
fn image_tail(data: &[u8]) -> &[u8] {
    let at = data
        .windows(2)
        .position(|w| w == [0xFF, 0xDB])
        .expect("DQT present");
    &data[at..]
}

fn irb_segment(irb: &Irb) -> Segment {
    app_segment(marker::APP13, id::PHOTOSHOP, &irb.to_bytes().unwrap())
}

const SAMPLE_XMP: &str = r#"<x:xmpmeta xmlns:x="adobe:ns:meta/"><rdf:RDF xmlns:rdf="http://www.w3.org/1999/02/22-rdf-syntax-ns#"><rdf:Description rdf:about=""/></rdf:RDF></x:xmpmeta>"#;

#[test]
fn test_round_trip_identity() {
    init_logger();
    let data = build_jpeg(&[
        jfif_segment(),
        app_segment(marker::APP1, id::XMP, SAMPLE_XMP.as_bytes()),
        Segment::new(marker::COM, b"note".to_vec()),
    ]);

    let mut out = Vec::new();
    jpeg_io::write_segments(&mut out, &segments(&data)).unwrap();
    assert_eq!(out, data);
}

#[test]
fn test_insert_large_icc_profile() {
    init_logger();
    let data = minimal_jpeg();
    let mut profile = vec![0u8; 200_000];
    profile[36..40].copy_from_slice(b"acsp");

    let mut out = Vec::new();
    JpegIO::new()
        .insert_icc_profile(&mut Cursor::new(&data), &mut out, &profile)
        .unwrap();

    let written = segments(&out);
    assert_eq!(
        written.iter().map(|s| s.marker).collect::<Vec<_>>(),
        [
            marker::SOI,
            marker::APP0,
            marker::APP2,
            marker::APP2,
            marker::APP2,
            marker::APP2,
            marker::DQT,
            marker::SOF0,
            marker::DHT,
            marker::SOS,
            marker::EOI,
        ]
    );
    assert_eq!(written[1], jfif_segment());

    let mut total = 0;
    for (n, chunk) in written[2..6].iter().enumerate() {
        assert!(chunk.has_identifier(id::ICC_PROFILE));
        // [index, total]
        assert_eq!(chunk.payload[12], n as u8 + 1);
        assert_eq!(chunk.payload[13], 4);
        total += chunk.payload.len() - 14;
    }
    assert_eq!(total, 200_000);
    assert_eq!(image_tail(&out), image_tail(&data));

    let extracted = JpegIO::new().extract_icc_profile(&mut Cursor::new(&out)).unwrap();
    assert_eq!(extracted, Some(profile));
}

#[test]
fn test_icc_chunks_out_of_order() {
    let profile: Vec<u8> = (0..70_000u32).map(|i| (i % 251) as u8).collect();
    let mut chunks = meta_io::icc::chunk_profile(&profile).unwrap();
    chunks.reverse();
    let app2: Vec<Segment> = chunks.into_iter().map(|c| Segment::new(marker::APP2, c)).collect();
    let data = build_jpeg(&app2);

    let extracted = JpegIO::new().extract_icc_profile(&mut Cursor::new(&data)).unwrap();
    assert_eq!(extracted, Some(profile));
}

#[test]
fn test_iptc_merge_with_update() {
    init_logger();
    let mut irb = Irb::new();
    let copyright = IptcDataSet::text(IptcTag::CopyrightNotice, "A");
    irb.insert(ImageResource::new(
        resource_id::IPTC_NAA,
        "",
        meta_io::iptc::to_bytes(&[copyright.clone()]).unwrap(),
    ));
    irb.insert(ImageResource::new(resource_id::COPYRIGHT_FLAG, "", vec![1]));
    let data = build_jpeg(&[jfif_segment(), irb_segment(&irb)]);

    let caption = IptcDataSet::text(IptcTag::CaptionAbstract, "B");
    let mut out = Vec::new();
    JpegIO::new()
        .insert_iptc(&mut Cursor::new(&data), &mut out, &[caption.clone()], true)
        .unwrap();

    let mut metadata = JpegIO::new().read_metadata(&mut Cursor::new(&out)).unwrap();
    match metadata.parsed(MetadataKind::Iptc).unwrap() {
        Some(StructuredValue::Iptc(sets)) => {
            assert!(sets.contains(&copyright));
            assert!(sets.contains(&caption));
        }
        other => panic!("unexpected IPTC value {:?}", other),
    }
    match metadata.parsed(MetadataKind::PhotoshopIrb).unwrap() {
        Some(StructuredValue::PhotoshopIrb(irb)) => {
            assert_eq!(irb.get(resource_id::COPYRIGHT_FLAG).map(|r| r.data()), Some(&[1u8][..]));
        }
        other => panic!("unexpected IRB value {:?}", other),
    }
    assert_eq!(markers(&out).iter().filter(|&&m| m == marker::APP13).count(), 1);
}

#[test]
fn test_iptc_without_update_replaces() {
    let mut irb = Irb::new();
    irb.insert(ImageResource::new(
        resource_id::IPTC_NAA,
        "",
        meta_io::iptc::to_bytes(&[IptcDataSet::text(IptcTag::CopyrightNotice, "A")]).unwrap(),
    ));
    let data = build_jpeg(&[irb_segment(&irb)]);

    let caption = IptcDataSet::text(IptcTag::CaptionAbstract, "B");
    let mut out = Vec::new();
    JpegIO::new()
        .insert_iptc(&mut Cursor::new(&data), &mut out, &[caption.clone()], false)
        .unwrap();

    let mut metadata = JpegIO::new().read_metadata(&mut Cursor::new(&out)).unwrap();
    assert_eq!(
        metadata.parsed(MetadataKind::Iptc).unwrap(),
        Some(&StructuredValue::Iptc(vec![caption]))
    );
}

#[test]
fn test_removal_is_idempotent() {
    init_logger();
    let data = build_jpeg(&[
        jfif_segment(),
        app_segment(marker::APP1, id::XMP, SAMPLE_XMP.as_bytes()),
        app_segment(marker::APP1, id::NON_STANDARD_XMP, SAMPLE_XMP.as_bytes()),
    ]);
    let io = JpegIO::new();

    let mut once = Vec::new();
    let removed = io
        .remove_metadata(&mut Cursor::new(&data), &mut once, &[MetadataKind::Xmp])
        .unwrap();
    assert!(removed.contains(MetadataKind::Xmp));
    assert!(!markers(&once).contains(&marker::APP1));

    let mut twice = Vec::new();
    let removed = io
        .remove_metadata(&mut Cursor::new(&once), &mut twice, &[MetadataKind::Xmp])
        .unwrap();
    assert!(removed.is_empty());
    assert_eq!(once, twice);
}

#[test]
fn test_remove_drops_mirrored_irb_resources() {
    let mut irb = Irb::new();
    irb.insert(ImageResource::new(resource_id::XMP_METADATA, "", SAMPLE_XMP.as_bytes().to_vec()));
    irb.insert(ImageResource::new(resource_id::COPYRIGHT_FLAG, "", vec![0]));
    let data = build_jpeg(&[
        app_segment(marker::APP1, id::XMP, SAMPLE_XMP.as_bytes()),
        irb_segment(&irb),
    ]);

    let mut out = Vec::new();
    JpegIO::new()
        .remove_metadata(&mut Cursor::new(&data), &mut out, &[MetadataKind::Xmp])
        .unwrap();

    let mut metadata = JpegIO::new().read_metadata(&mut Cursor::new(&out)).unwrap();
    assert!(!metadata.contains(MetadataKind::Xmp));
    match metadata.parsed(MetadataKind::PhotoshopIrb).unwrap() {
        Some(StructuredValue::PhotoshopIrb(irb)) => {
            assert!(!irb.contains(resource_id::XMP_METADATA));
            assert!(irb.contains(resource_id::COPYRIGHT_FLAG));
        }
        other => panic!("unexpected IRB value {:?}", other),
    }
}

#[test]
fn test_remove_appn() {
    let data = build_jpeg(&[
        jfif_segment(),
        app_segment(marker::APP14, id::ADOBE, &[0, 100, 0, 0, 0, 0, 1]),
    ]);
    let mut out = Vec::new();
    let count = JpegIO::new()
        .remove_appn(&mut Cursor::new(&data), &mut out, marker::APP14)
        .unwrap();
    assert_eq!(count, 1);
    assert!(!markers(&out).contains(&marker::APP14));

    let result = JpegIO::new().remove_appn(&mut Cursor::new(&data), &mut Vec::new(), marker::DQT);
    assert!(matches!(result, Err(Error::InvalidFormat(_))));
}

#[test]
fn test_extended_xmp_round_trip() {
    init_logger();
    let extended: Vec<u8> = std::iter::repeat(b"<rdf:li>extended</rdf:li>".iter().copied())
        .flatten()
        .take(150_000)
        .collect();
    let xmp = Xmp::with_extended(SAMPLE_XMP.as_bytes().to_vec(), extended.clone());

    let mut out = Vec::new();
    JpegIO::new()
        .insert_xmp(&mut Cursor::new(minimal_jpeg()), &mut out, &xmp)
        .unwrap();

    let written = segments(&out);
    let app1: Vec<&Segment> = written.iter().filter(|s| s.marker == marker::APP1).collect();
    assert_eq!(app1.len(), 4);
    assert!(app1[0].has_identifier(id::XMP));
    assert!(app1[1..].iter().all(|s| s.has_identifier(id::XMP_EXTENSION)));

    let metadata = JpegIO::new().read_metadata(&mut Cursor::new(&out)).unwrap();
    match metadata.get(MetadataKind::Xmp).and_then(|m| m.value()) {
        Some(StructuredValue::Xmp(read)) => {
            assert_eq!(read.extended(), Some(&extended[..]));
            assert_eq!(read.referenced_guid(), Some(xmp::guid_of(&extended)));
        }
        other => panic!("unexpected XMP value {:?}", other),
    }
}

#[test]
fn test_extended_xmp_guid_binding() {
    let ours = vec![b'a'; 100_000];
    let theirs = vec![b'z'; 100_000];
    let standard = Xmp::with_extended(SAMPLE_XMP.as_bytes().to_vec(), ours.clone())
        .standard_packet()
        .unwrap();

    let our_chunks = xmp::chunk_extended(&ours, &xmp::guid_of(&ours)).unwrap();
    let their_chunks = xmp::chunk_extended(&theirs, &xmp::guid_of(&theirs)).unwrap();
    let mut app1 = vec![app_segment(marker::APP1, id::XMP, &standard)];
    for (a, b) in our_chunks.into_iter().zip(their_chunks) {
        app1.push(Segment::new(marker::APP1, b));
        app1.push(Segment::new(marker::APP1, a));
    }
    let data = build_jpeg(&app1);

    let metadata = JpegIO::new().read_metadata(&mut Cursor::new(&data)).unwrap();
    match metadata.get(MetadataKind::Xmp).and_then(|m| m.value()) {
        Some(StructuredValue::Xmp(read)) => assert_eq!(read.extended(), Some(&ours[..])),
        other => panic!("unexpected XMP value {:?}", other),
    }
}

#[test]
fn test_insert_comments_before_scan() {
    let data = build_jpeg(&[jfif_segment(), Segment::new(marker::COM, b"first".to_vec())]);
    let mut out = Vec::new();
    JpegIO::new()
        .insert_comments(&mut Cursor::new(&data), &mut out, &["second".to_string()])
        .unwrap();

    let written = markers(&out);
    let sos = written.iter().position(|&m| m == marker::SOS).unwrap();
    assert_eq!(written[sos - 1], marker::COM);

    let mut metadata = JpegIO::new().read_metadata(&mut Cursor::new(&out)).unwrap();
    assert_eq!(
        metadata.parsed(MetadataKind::Comment).unwrap(),
        Some(&StructuredValue::Comments(vec!["first".into(), "second".into()]))
    );
}

#[test]
fn test_insert_exif_update_merges() {
    use meta_io::tiff::{FieldValue, TagSet, TiffTag};

    let mut old = Exif::new();
    old.set_image_field(TiffTag::Make, FieldValue::ascii("Acme"));
    let data = build_jpeg(&[
        jfif_segment(),
        app_segment(marker::APP1, id::EXIF, &old.to_bytes(None).unwrap()),
    ]);

    let mut new = Exif::new();
    new.set_image_field(TiffTag::Model, FieldValue::ascii("X1"));
    let mut out = Vec::new();
    JpegIO::new()
        .insert_exif(&mut Cursor::new(&data), &mut out, &new, true)
        .unwrap();

    let written = segments(&out);
    assert_eq!(written.iter().filter(|s| s.has_identifier(id::EXIF)).count(), 1);
    let mut metadata = JpegIO::new().read_metadata(&mut Cursor::new(&out)).unwrap();
    match metadata.parsed(MetadataKind::Exif).unwrap() {
        Some(StructuredValue::Exif(exif)) => {
            let ifd0 = exif.image_ifd();
            assert!(ifd0.has_field(TiffTag::Make.code()));
            assert!(ifd0.has_field(TiffTag::Model.code()));
        }
        other => panic!("unexpected EXIF value {:?}", other),
    }
}

#[test]
fn test_insert_exif_generates_thumbnail() {
    let mut exif = Exif::new();
    exif.require_thumbnail(true);

    let codec = MockCodec;
    let mut out = Vec::new();
    JpegIO::new()
        .with_codec(&codec)
        .insert_exif(&mut Cursor::new(minimal_jpeg()), &mut out, &exif, false)
        .unwrap();

    // New APP1 goes right after SOI
    assert_eq!(markers(&out)[1], marker::APP1);
    let thumbnails = JpegIO::new().extract_thumbnails(&mut Cursor::new(&out)).unwrap();
    assert_eq!(thumbnails.len(), 1);
    assert_eq!(thumbnails[0].0, MetadataKind::Exif);
    assert_eq!((thumbnails[0].1.width(), thumbnails[0].1.height()), (8, 8));
}

#[test]
fn test_oversized_exif_writes_nothing() {
    use meta_io::tiff::{FieldValue, TagSet, TiffTag};

    let mut exif = Exif::new();
    exif.set_image_field(TiffTag::ImageDescription, FieldValue::ascii(&"x".repeat(70_000)));
    let mut out = Vec::new();
    let result = JpegIO::new().insert_exif(&mut Cursor::new(minimal_jpeg()), &mut out, &exif, false);
    assert!(matches!(result, Err(Error::DataTooLarge { .. })));
    assert!(out.is_empty());
}

#[test]
fn test_irb_thumbnail() {
    let thumbnail = Thumbnail::jpeg(8, 8, minimal_jpeg());
    let mut out = Vec::new();
    JpegIO::new()
        .insert_irb_thumbnail(&mut Cursor::new(minimal_jpeg()), &mut out, &thumbnail, true)
        .unwrap();

    // APP13 follows the JFIF APP0
    assert_eq!(&markers(&out)[..3], &[marker::SOI, marker::APP0, marker::APP13]);
    let thumbnails = JpegIO::new().extract_thumbnails(&mut Cursor::new(&out)).unwrap();
    assert_eq!(thumbnails.len(), 1);
    assert_eq!(thumbnails[0].0, MetadataKind::PhotoshopIrb);
    assert_eq!(thumbnails[0].1, thumbnail);
}

#[test]
fn test_truncated_scan_is_reported() {
    let mut data = minimal_jpeg();
    data.truncate(data.len() - 2);
    let result = JpegIO::new().read_metadata(&mut Cursor::new(&data));
    assert!(matches!(result, Err(Error::Truncated(_))));
}
