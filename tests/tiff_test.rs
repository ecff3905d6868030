// TIFF relocation and page-level metadata scenarios

use meta_io::{
    irb::{resource_id, ImageResource},
    xmp,
    test_utils::*,
    tiff::{ExifTag, FieldValue, Ifd, TagSet, TiffTag},
    ByteOrder, Error, Exif, IptcDataSet, IptcTag, JpegIO, MetadataKind, StructuredValue, Thumbnail, TiffIO, Xmp,
};
use std::io::Cursor;

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn pages(data: &[u8]) -> Vec<Ifd> {
    TiffIO::new().read_pages(&mut Cursor::new(data)).expect("read pages").1
}

fn first_u32(ifd: &Ifd, tag: TiffTag) -> u32 {
    ifd.value(tag.code()).and_then(FieldValue::first_u32).expect("field present")
}

/// Bytes of the single strip of `ifd`
fn strip<'a>(data: &'a [u8], ifd: &Ifd) -> &'a [u8] {
    let offset = first_u32(ifd, TiffTag::StripOffsets) as usize;
    let count = first_u32(ifd, TiffTag::StripByteCounts) as usize;
    &data[offset..offset + count]
}

fn rewrite<F>(data: &[u8], op: F) -> Vec<u8>
where
    F: FnOnce(&mut Cursor<&[u8]>, &mut Cursor<Vec<u8>>) -> meta_io::Result<()>,
{
    let mut out = Cursor::new(Vec::new());
    op(&mut Cursor::new(data), &mut out).expect("rewrite");
    out.into_inner()
}

#[test]
fn test_relocation_after_exif_insert() {
    init_logger();
    let source = build_tiff(ByteOrder::LittleEndian, &[TiffPage::gray(4, 2).with_exif(), TiffPage::gray(2, 2)]);

    // Give page 0 a reduced-resolution SubIFD sharing page 1's pixels
    let io = TiffIO::new();
    let (order, mut source_pages) = io.read_pages(&mut Cursor::new(&source)).unwrap();
    let thumbnail_ifd = source_pages[1].clone();
    source_pages[0].add_child(TiffTag::SubIfds.code(), thumbnail_ifd);
    let mut with_sub_ifd = Cursor::new(Vec::new());
    io.copy_pages(&mut Cursor::new(&source), &mut with_sub_ifd, order, &mut source_pages)
        .unwrap();
    let with_sub_ifd = with_sub_ifd.into_inner();

    let mut exif = Exif::new();
    exif.set_exif_field(ExifTag::FNumber, FieldValue::Rational(vec![(28, 10)]));
    let out = rewrite(&with_sub_ifd, |src, dst| io.insert_exif(src, dst, 0, &exif, true));

    let written = pages(&out);
    assert_eq!(written.len(), 2);

    let page0 = &written[0];
    assert!(strip(&out, page0).iter().all(|&b| b == TiffPage::fill_byte(0)));
    let exif_ifd = page0.child(TiffTag::ExifSubIfd.code()).expect("EXIF SubIFD");
    assert_eq!(
        exif_ifd.value(ExifTag::ExposureTime.code()),
        Some(&FieldValue::Rational(vec![(1, 125)]))
    );
    assert_eq!(
        exif_ifd.value(ExifTag::FNumber.code()),
        Some(&FieldValue::Rational(vec![(28, 10)]))
    );
    assert!(exif_ifd.has_field(ExifTag::ExifVersion.code()));

    let sub_ifds = page0.children(TiffTag::SubIfds.code());
    assert_eq!(sub_ifds.len(), 1);
    assert!(strip(&out, &sub_ifds[0]).iter().all(|&b| b == TiffPage::fill_byte(1)));

    assert!(strip(&out, &written[1]).iter().all(|&b| b == TiffPage::fill_byte(1)));
    assert_eq!(first_u32(&written[1], TiffTag::ImageWidth), 2);
}

#[test]
fn test_insert_exif_without_update_replaces_directory() {
    let source = build_tiff(ByteOrder::BigEndian, &[TiffPage::gray(2, 2).with_exif()]);
    let mut exif = Exif::new();
    exif.set_exif_field(ExifTag::FNumber, FieldValue::Rational(vec![(4, 1)]));
    let out = rewrite(&source, |src, dst| TiffIO::new().insert_exif(src, dst, 0, &exif, false));

    let written = pages(&out);
    let exif_ifd = written[0].child(TiffTag::ExifSubIfd.code()).unwrap();
    assert!(exif_ifd.has_field(ExifTag::FNumber.code()));
    assert!(!exif_ifd.has_field(ExifTag::ExposureTime.code()));
}

#[test]
fn test_critical_tags_guard_only_existing_values() {
    init_logger();
    let io = TiffIO::new();
    let source = build_tiff(ByteOrder::LittleEndian, &[TiffPage::gray(4, 2)]);

    // Same width stored as SHORT instead of LONG, and a FillOrder the page lacks
    let mut exif = Exif::new();
    exif.set_image_field(TiffTag::ImageWidth, FieldValue::short(4));
    exif.set_image_field(TiffTag::FillOrder, FieldValue::short(1));
    let out = rewrite(&source, |src, dst| io.insert_exif(src, dst, 0, &exif, true));
    let page = &pages(&out)[0];
    assert_eq!(first_u32(page, TiffTag::ImageWidth), 4);
    assert_eq!(first_u32(page, TiffTag::FillOrder), 1);

    let mut exif = Exif::new();
    exif.set_image_field(TiffTag::ImageWidth, FieldValue::long(5));
    let mut out = Cursor::new(Vec::new());
    let result = io.insert_exif(&mut Cursor::new(&source), &mut out, 0, &exif, true);
    assert!(matches!(result, Err(Error::CriticalTagConflict { code: 0x0100, .. })));
}

#[test]
fn test_split_xmp_from_jpeg_is_merged() {
    init_logger();
    let standard = r#"<x:xmpmeta xmlns:x="adobe:ns:meta/"><rdf:RDF xmlns:rdf="http://www.w3.org/1999/02/22-rdf-syntax-ns#"><rdf:Description rdf:about="" xmlns:dc="http://purl.org/dc/elements/1.1/" dc:format="image/jpeg"/></rdf:RDF></x:xmpmeta>"#;
    let history = "x".repeat(80_000);
    let extended = format!(
        r#"<x:xmpmeta xmlns:x="adobe:ns:meta/"><rdf:RDF xmlns:rdf="http://www.w3.org/1999/02/22-rdf-syntax-ns#"><rdf:Description rdf:about="" xmlns:photoshop="http://ns.adobe.com/photoshop/1.0/" photoshop:History="{}"/></rdf:RDF></x:xmpmeta>"#,
        history
    );

    let mut jpeg = Vec::new();
    JpegIO::new()
        .insert_xmp(
            &mut Cursor::new(minimal_jpeg()),
            &mut jpeg,
            &Xmp::with_extended(standard, extended.into_bytes()),
        )
        .unwrap();
    let mut from_jpeg = JpegIO::new().read_metadata(&mut Cursor::new(&jpeg)).unwrap();
    let read = match from_jpeg.remove(MetadataKind::Xmp).map(|m| m.into_value()) {
        Some(Ok(StructuredValue::Xmp(read))) => read,
        other => panic!("unexpected XMP value {:?}", other.map(|r| r.is_ok())),
    };
    assert!(read.extended().is_some());

    let io = TiffIO::new();
    let source = build_tiff(ByteOrder::LittleEndian, &[TiffPage::gray(2, 2)]);
    let out = rewrite(&source, |src, dst| io.insert_xmp(src, dst, 0, &read));

    let metadata = io.read_metadata(&mut Cursor::new(&out), 0).unwrap();
    let packet = String::from_utf8_lossy(metadata.get(MetadataKind::Xmp).unwrap().raw()).into_owned();
    assert_eq!(xmp::description_attribute(&packet, "dc:format").as_deref(), Some("image/jpeg"));
    assert_eq!(xmp::description_attribute(&packet, "photoshop:History"), Some(history));
    assert_eq!(xmp::description_attribute(&packet, xmp::HAS_EXTENDED_XMP), None);
}

/// Overwrite the inline LONG value of `tag` in the first IFD of a
/// little-endian file
fn patch_long(data: &mut [u8], tag: u16, value: u32) {
    let ifd = u32::from_le_bytes(data[4..8].try_into().unwrap()) as usize;
    let count = u16::from_le_bytes([data[ifd], data[ifd + 1]]) as usize;
    let entry = (0..count)
        .map(|i| ifd + 2 + 12 * i)
        .find(|&entry| u16::from_le_bytes([data[entry], data[entry + 1]]) == tag)
        .expect("tag present");
    data[entry + 8..entry + 12].copy_from_slice(&value.to_le_bytes());
}

#[test]
fn test_copy_fixes_strip_counts_and_moves_tables() {
    init_logger();
    let mut source = build_tiff(ByteOrder::LittleEndian, &[TiffPage::gray(4, 2)]);
    let table: Vec<u8> = (0..64).collect();
    let table_offset = source.len() as u32;
    source.extend_from_slice(&table);

    // Point the page at a quantization table stored after all other data
    let io = TiffIO::new();
    let (order, mut source_pages) = io.read_pages(&mut Cursor::new(&source)).unwrap();
    source_pages[0].add_tiff_field(TiffTag::JpegQTables, FieldValue::long(table_offset));
    let mut with_table = Cursor::new(Vec::new());
    io.copy_pages(&mut Cursor::new(&source), &mut with_table, order, &mut source_pages)
        .unwrap();
    let mut damaged = with_table.into_inner();
    patch_long(&mut damaged, TiffTag::StripByteCounts.code(), 1);
    assert_eq!(first_u32(&pages(&damaged)[0], TiffTag::StripByteCounts), 1);

    let out = rewrite(&damaged, |src, dst| io.insert_comments(src, dst, 0, &["moved".into()]));
    let page = &pages(&out)[0];
    assert_eq!(first_u32(page, TiffTag::StripByteCounts), 8);
    assert_eq!(strip(&out, page), &[0x10; 8][..]);
    let moved = first_u32(page, TiffTag::JpegQTables) as usize;
    assert_eq!(&out[moved..moved + 64], &table[..]);
}

#[test]
fn test_retain_pages_renumbers() {
    let source = build_tiff(
        ByteOrder::LittleEndian,
        &[TiffPage::gray(2, 2), TiffPage::gray(2, 2), TiffPage::gray(2, 2)],
    );
    let mut kept = 0;
    let out = rewrite(&source, |src, dst| {
        kept = TiffIO::new().retain_pages(src, dst, &[2, 0, 7])?;
        Ok(())
    });
    assert_eq!(kept, 2);

    let written = pages(&out);
    assert_eq!(written.len(), 2);
    for (index, (page, fill)) in written.iter().zip([0, 2]).enumerate() {
        assert!(strip(&out, page).iter().all(|&b| b == TiffPage::fill_byte(fill)));
        assert_eq!(
            page.value(TiffTag::PageNumber.code()),
            Some(&FieldValue::Short(vec![index as u16, 2]))
        );
    }
}

#[test]
fn test_retain_page_range() {
    let source = build_tiff(ByteOrder::BigEndian, &[TiffPage::gray(1, 1), TiffPage::gray(1, 1), TiffPage::gray(1, 1)]);
    let io = TiffIO::new();

    let mut kept = 0;
    let out = rewrite(&source, |src, dst| {
        kept = io.retain_page_range(src, dst, 1, 10)?;
        Ok(())
    });
    assert_eq!(kept, 2);
    assert_eq!(pages(&out).len(), 2);

    let result = io.retain_page_range(&mut Cursor::new(&source), &mut Cursor::new(Vec::new()), 2, 1);
    assert!(matches!(result, Err(Error::InvalidRange { start: 2, end: 1 })));
}

#[test]
fn test_metadata_insert_read_remove() {
    init_logger();
    let io = TiffIO::new();
    let source = build_tiff(ByteOrder::LittleEndian, &[TiffPage::gray(3, 3).with_exif()]);
    let xmp = Xmp::new(b"<x:xmpmeta xmlns:x='adobe:ns:meta/'/>".to_vec());
    let caption = IptcDataSet::text(IptcTag::CaptionAbstract, "harbour");

    let step = rewrite(&source, |src, dst| io.insert_icc_profile(src, dst, 0, b"profile"));
    let step = rewrite(&step, |src, dst| io.insert_xmp(src, dst, 0, &xmp));
    let step = rewrite(&step, |src, dst| io.insert_iptc(src, dst, 0, &[caption.clone()], true));
    let out = rewrite(&step, |src, dst| io.insert_comments(src, dst, 0, &["one".into(), "two".into()]));

    let mut metadata = io.read_metadata(&mut Cursor::new(&out), 0).unwrap();
    for kind in [
        MetadataKind::IccProfile,
        MetadataKind::Xmp,
        MetadataKind::Iptc,
        MetadataKind::Comment,
        MetadataKind::Exif,
    ] {
        assert!(metadata.contains(kind), "{} missing", kind);
    }
    assert_eq!(metadata.get(MetadataKind::IccProfile).unwrap().raw(), b"profile");
    assert_eq!(
        metadata.parsed(MetadataKind::Iptc).unwrap(),
        Some(&StructuredValue::Iptc(vec![caption]))
    );
    assert_eq!(
        metadata.parsed(MetadataKind::Comment).unwrap(),
        Some(&StructuredValue::Comments(vec!["one".into(), "two".into()]))
    );
    assert_eq!(io.extract_icc_profile(&mut Cursor::new(&out), 0).unwrap(), Some(b"profile".to_vec()));

    let kinds = [MetadataKind::Xmp, MetadataKind::Iptc, MetadataKind::Exif];
    let mut removed = None;
    let stripped = rewrite(&out, |src, dst| {
        removed = Some(io.remove_metadata(src, dst, &kinds)?);
        Ok(())
    });
    let removed = removed.unwrap();
    assert!(kinds.iter().all(|&kind| removed.contains(kind)));

    let remaining = io.read_metadata(&mut Cursor::new(&stripped), 0).unwrap();
    assert!(kinds.iter().all(|&kind| !remaining.contains(kind)));
    assert!(remaining.contains(MetadataKind::IccProfile));

    // Removing again finds nothing
    let mut again = None;
    rewrite(&stripped, |src, dst| {
        again = Some(io.remove_metadata(src, dst, &kinds)?);
        Ok(())
    });
    assert!(again.unwrap().is_empty());
}

#[test]
fn test_iptc_moves_out_of_irb() {
    let io = TiffIO::new();
    let source = build_tiff(ByteOrder::BigEndian, &[TiffPage::gray(2, 1)]);
    let copyright = IptcDataSet::text(IptcTag::CopyrightNotice, "A");
    let resources = [
        ImageResource::new(resource_id::IPTC_NAA, "", meta_io::iptc::to_bytes(&[copyright.clone()]).unwrap()),
        ImageResource::new(resource_id::COPYRIGHT_FLAG, "", vec![1]),
    ];
    let with_irb = rewrite(&source, |src, dst| io.insert_irb(src, dst, 0, &resources, false));

    let caption = IptcDataSet::text(IptcTag::CaptionAbstract, "B");
    let out = rewrite(&with_irb, |src, dst| io.insert_iptc(src, dst, 0, &[caption.clone()], true));

    let mut metadata = io.read_metadata(&mut Cursor::new(&out), 0).unwrap();
    match metadata.parsed(MetadataKind::PhotoshopIrb).unwrap() {
        Some(StructuredValue::PhotoshopIrb(irb)) => {
            assert!(!irb.contains(resource_id::IPTC_NAA));
            assert!(irb.contains(resource_id::COPYRIGHT_FLAG));
        }
        other => panic!("unexpected IRB value {:?}", other),
    }
    match metadata.parsed(MetadataKind::Iptc).unwrap() {
        Some(StructuredValue::Iptc(sets)) => {
            assert!(sets.contains(&copyright));
            assert!(sets.contains(&caption));
        }
        other => panic!("unexpected IPTC value {:?}", other),
    }
}

#[test]
fn test_thumbnail_in_irb() {
    let io = TiffIO::new();
    let source = build_tiff(ByteOrder::LittleEndian, &[TiffPage::gray(2, 2), TiffPage::gray(2, 2)]);
    let thumbnail = Thumbnail::jpeg(8, 8, minimal_jpeg());
    let out = rewrite(&source, |src, dst| io.insert_thumbnail(src, dst, 1, &thumbnail));

    assert_eq!(io.extract_thumbnail(&mut Cursor::new(&out), 1).unwrap(), Some(thumbnail));
    assert_eq!(io.extract_thumbnail(&mut Cursor::new(&out), 0).unwrap(), None);
    assert!(matches!(
        io.extract_thumbnail(&mut Cursor::new(&out), 2),
        Err(Error::PageOutOfRange { page: 2, pages: 2 })
    ));
}

#[test]
fn test_interchange_stream_without_length() {
    init_logger();
    let mut source = build_tiff(ByteOrder::LittleEndian, &[TiffPage::gray(2, 2)]);
    let jpeg = minimal_jpeg();
    let jpeg_offset = source.len() as u32;
    source.extend_from_slice(&jpeg);
    source.extend_from_slice(b"trailing garbage");

    let io = TiffIO::new();
    let (order, mut source_pages) = io.read_pages(&mut Cursor::new(&source)).unwrap();
    source_pages[0].add_tiff_field(TiffTag::JpegInterchangeFormat, FieldValue::long(jpeg_offset));
    let mut out = Cursor::new(Vec::new());
    io.copy_pages(&mut Cursor::new(&source), &mut out, order, &mut source_pages)
        .unwrap();
    let out = out.into_inner();

    let page = &pages(&out)[0];
    let offset = first_u32(page, TiffTag::JpegInterchangeFormat) as usize;
    let length = first_u32(page, TiffTag::JpegInterchangeFormatLength) as usize;
    assert_eq!(length, jpeg.len());
    assert_eq!(&out[offset..offset + length], &jpeg[..]);
}

#[test]
fn test_rejects_non_tiff() {
    let io = TiffIO::new();
    let result = io.read_pages(&mut Cursor::new(b"XX*\0\x08\0\0\0".to_vec()));
    assert!(matches!(result, Err(Error::InvalidFormat(_))));

    let result = io.read_pages(&mut Cursor::new(b"II*".to_vec()));
    assert!(matches!(result, Err(Error::Truncated(_))));
}
