//! Tag namespaces for TIFF-family directories
//!
//! Each directory kind (baseline TIFF, EXIF, GPS, Interoperability) has its own
//! tag numbering. A namespace is a `TagSet` implementation; readers take the
//! concrete type as a generic parameter to pick names and child directories.

use std::fmt;

/// Which tag numbering a directory uses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Namespace {
    #[default]
    Tiff,
    Exif,
    Gps,
    Interop,
}

impl Namespace {
    /// Look up a tag name in this namespace
    pub fn tag_name(&self, code: u16) -> Option<&'static str> {
        match self {
            Namespace::Tiff => TiffTag::from_code(code).map(|t| t.name()),
            Namespace::Exif => ExifTag::from_code(code).map(|t| t.name()),
            Namespace::Gps => GpsTag::from_code(code).map(|t| t.name()),
            Namespace::Interop => InteropTag::from_code(code).map(|t| t.name()),
        }
    }

    /// Whether `code` is a structure-critical tag in this namespace
    pub fn is_critical(&self, code: u16) -> bool {
        match self {
            Namespace::Tiff => TiffTag::from_code(code).is_some_and(|t| t.is_critical()),
            Namespace::Exif => ExifTag::from_code(code).is_some_and(|t| t.is_critical()),
            Namespace::Gps => GpsTag::from_code(code).is_some_and(|t| t.is_critical()),
            Namespace::Interop => InteropTag::from_code(code).is_some_and(|t| t.is_critical()),
        }
    }

    /// Namespace of the child directory a pointer tag in this namespace leads to
    pub fn child_namespace(&self, code: u16) -> Option<Namespace> {
        match (self, code) {
            (Namespace::Tiff, c) if c == TiffTag::ExifSubIfd.code() => Some(Namespace::Exif),
            (Namespace::Tiff, c) if c == TiffTag::GpsSubIfd.code() => Some(Namespace::Gps),
            (Namespace::Tiff, c) if c == TiffTag::SubIfds.code() => Some(Namespace::Tiff),
            (Namespace::Exif, c) if c == ExifTag::InteroperabilityOffset.code() => {
                Some(Namespace::Interop)
            }
            _ => None,
        }
    }
}

/// A compile-time tag namespace
pub trait TagSet: Sized + Copy + fmt::Debug {
    /// Namespace this set describes
    const NAMESPACE: Namespace;

    /// Look up a tag by its numeric code
    fn from_code(code: u16) -> Option<Self>;

    /// Numeric tag code
    fn code(&self) -> u16;

    /// Human-readable tag name
    fn name(&self) -> &'static str;

    /// Tags describing image structure; changing them desynchronizes the
    /// directory from the image data it points at
    fn is_critical(&self) -> bool;
}

/// Tag name for diagnostics, falling back to the hex code
pub fn describe_tag(namespace: Namespace, code: u16) -> String {
    match namespace.tag_name(code) {
        Some(name) => name.to_string(),
        None => format!("Unknown(0x{:04X})", code),
    }
}

macro_rules! tag_set {
    (@critical) => { false };
    (@critical critical) => { true };
    (
        $(#[$meta:meta])*
        $name:ident in $ns:ident {
            $( $variant:ident = $code:literal => $label:literal $(, $critical:ident)? ; )*
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum $name {
            $( $variant, )*
        }

        impl TagSet for $name {
            const NAMESPACE: Namespace = Namespace::$ns;

            fn from_code(code: u16) -> Option<Self> {
                match code {
                    $( $code => Some(Self::$variant), )*
                    _ => None,
                }
            }

            fn code(&self) -> u16 {
                match self {
                    $( Self::$variant => $code, )*
                }
            }

            fn name(&self) -> &'static str {
                match self {
                    $( Self::$variant => $label, )*
                }
            }

            fn is_critical(&self) -> bool {
                match self {
                    $( Self::$variant => tag_set!(@critical $($critical)?), )*
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.name())
            }
        }
    };
}

tag_set! {
    /// Baseline and extension TIFF tags (IFD0, IFD1 and SubIFDs)
    TiffTag in Tiff {
        NewSubfileType = 0x00FE => "NewSubfileType";
        SubfileType = 0x00FF => "SubfileType";
        ImageWidth = 0x0100 => "ImageWidth", critical;
        ImageLength = 0x0101 => "ImageLength", critical;
        BitsPerSample = 0x0102 => "BitsPerSample", critical;
        Compression = 0x0103 => "Compression", critical;
        PhotometricInterpretation = 0x0106 => "PhotometricInterpretation", critical;
        Threshholding = 0x0107 => "Threshholding";
        FillOrder = 0x010A => "FillOrder", critical;
        DocumentName = 0x010D => "DocumentName";
        ImageDescription = 0x010E => "ImageDescription";
        Make = 0x010F => "Make";
        Model = 0x0110 => "Model";
        StripOffsets = 0x0111 => "StripOffsets", critical;
        Orientation = 0x0112 => "Orientation";
        SamplesPerPixel = 0x0115 => "SamplesPerPixel", critical;
        RowsPerStrip = 0x0116 => "RowsPerStrip", critical;
        StripByteCounts = 0x0117 => "StripByteCounts", critical;
        MinSampleValue = 0x0118 => "MinSampleValue";
        MaxSampleValue = 0x0119 => "MaxSampleValue";
        XResolution = 0x011A => "XResolution";
        YResolution = 0x011B => "YResolution";
        PlanarConfiguration = 0x011C => "PlanarConfiguration", critical;
        PageName = 0x011D => "PageName";
        XPosition = 0x011E => "XPosition";
        YPosition = 0x011F => "YPosition";
        FreeOffsets = 0x0120 => "FreeOffsets";
        FreeByteCounts = 0x0121 => "FreeByteCounts";
        GrayResponseUnit = 0x0122 => "GrayResponseUnit";
        GrayResponseCurve = 0x0123 => "GrayResponseCurve";
        T4Options = 0x0124 => "T4Options", critical;
        T6Options = 0x0125 => "T6Options", critical;
        ResolutionUnit = 0x0128 => "ResolutionUnit";
        PageNumber = 0x0129 => "PageNumber";
        TransferFunction = 0x012D => "TransferFunction";
        Software = 0x0131 => "Software";
        DateTime = 0x0132 => "DateTime";
        Artist = 0x013B => "Artist";
        HostComputer = 0x013C => "HostComputer";
        Predictor = 0x013D => "Predictor", critical;
        WhitePoint = 0x013E => "WhitePoint";
        PrimaryChromaticities = 0x013F => "PrimaryChromaticities";
        ColorMap = 0x0140 => "ColorMap", critical;
        HalftoneHints = 0x0141 => "HalftoneHints";
        TileWidth = 0x0142 => "TileWidth", critical;
        TileLength = 0x0143 => "TileLength", critical;
        TileOffsets = 0x0144 => "TileOffsets", critical;
        TileByteCounts = 0x0145 => "TileByteCounts", critical;
        SubIfds = 0x014A => "SubIFDs";
        InkSet = 0x014C => "InkSet";
        InkNames = 0x014D => "InkNames";
        NumberOfInks = 0x014E => "NumberOfInks";
        DotRange = 0x0150 => "DotRange";
        TargetPrinter = 0x0151 => "TargetPrinter";
        ExtraSamples = 0x0152 => "ExtraSamples", critical;
        SampleFormat = 0x0153 => "SampleFormat", critical;
        SMinSampleValue = 0x0154 => "SMinSampleValue";
        SMaxSampleValue = 0x0155 => "SMaxSampleValue";
        TransferRange = 0x0156 => "TransferRange";
        JpegTables = 0x015B => "JPEGTables", critical;
        JpegProc = 0x0200 => "JPEGProc", critical;
        JpegInterchangeFormat = 0x0201 => "JPEGInterchangeFormat";
        JpegInterchangeFormatLength = 0x0202 => "JPEGInterchangeFormatLength";
        JpegRestartInterval = 0x0203 => "JPEGRestartInterval";
        JpegLosslessPredictors = 0x0205 => "JPEGLosslessPredictors";
        JpegPointTransforms = 0x0206 => "JPEGPointTransforms";
        JpegQTables = 0x0207 => "JPEGQTables", critical;
        JpegDcTables = 0x0208 => "JPEGDCTables", critical;
        JpegAcTables = 0x0209 => "JPEGACTables", critical;
        YCbCrCoefficients = 0x0211 => "YCbCrCoefficients";
        YCbCrSubSampling = 0x0212 => "YCbCrSubSampling", critical;
        YCbCrPositioning = 0x0213 => "YCbCrPositioning";
        ReferenceBlackWhite = 0x0214 => "ReferenceBlackWhite";
        Xmp = 0x02BC => "XMP";
        Rating = 0x4746 => "Rating";
        RatingPercent = 0x4749 => "RatingPercent";
        Copyright = 0x8298 => "Copyright";
        Iptc = 0x83BB => "IPTC";
        Photoshop = 0x8649 => "Photoshop";
        ExifSubIfd = 0x8769 => "ExifSubIFD";
        IccProfile = 0x8773 => "ICCProfile";
        GpsSubIfd = 0x8825 => "GPSSubIFD";
        ImageSourceData = 0x935C => "ImageSourceData";
        WindowsXpTitle = 0x9C9B => "WindowsXPTitle";
        WindowsXpComment = 0x9C9C => "WindowsXPComment";
        WindowsXpAuthor = 0x9C9D => "WindowsXPAuthor";
        WindowsXpKeywords = 0x9C9E => "WindowsXPKeywords";
        WindowsXpSubject = 0x9C9F => "WindowsXPSubject";
    }
}

tag_set! {
    /// Tags of the EXIF SubIFD
    ExifTag in Exif {
        ExposureTime = 0x829A => "ExposureTime";
        FNumber = 0x829D => "FNumber";
        ExposureProgram = 0x8822 => "ExposureProgram";
        SpectralSensitivity = 0x8824 => "SpectralSensitivity";
        IsoSpeedRatings = 0x8827 => "ISOSpeedRatings";
        Oecf = 0x8828 => "OECF";
        SensitivityType = 0x8830 => "SensitivityType";
        ExifVersion = 0x9000 => "ExifVersion";
        DateTimeOriginal = 0x9003 => "DateTimeOriginal";
        DateTimeDigitized = 0x9004 => "DateTimeDigitized";
        OffsetTime = 0x9010 => "OffsetTime";
        OffsetTimeOriginal = 0x9011 => "OffsetTimeOriginal";
        OffsetTimeDigitized = 0x9012 => "OffsetTimeDigitized";
        ComponentsConfiguration = 0x9101 => "ComponentsConfiguration";
        CompressedBitsPerPixel = 0x9102 => "CompressedBitsPerPixel";
        ShutterSpeedValue = 0x9201 => "ShutterSpeedValue";
        ApertureValue = 0x9202 => "ApertureValue";
        BrightnessValue = 0x9203 => "BrightnessValue";
        ExposureBiasValue = 0x9204 => "ExposureBiasValue";
        MaxApertureValue = 0x9205 => "MaxApertureValue";
        SubjectDistance = 0x9206 => "SubjectDistance";
        MeteringMode = 0x9207 => "MeteringMode";
        LightSource = 0x9208 => "LightSource";
        Flash = 0x9209 => "Flash";
        FocalLength = 0x920A => "FocalLength";
        SubjectArea = 0x9214 => "SubjectArea";
        MakerNote = 0x927C => "MakerNote";
        UserComment = 0x9286 => "UserComment";
        SubSecTime = 0x9290 => "SubSecTime";
        SubSecTimeOriginal = 0x9291 => "SubSecTimeOriginal";
        SubSecTimeDigitized = 0x9292 => "SubSecTimeDigitized";
        FlashpixVersion = 0xA000 => "FlashpixVersion";
        ColorSpace = 0xA001 => "ColorSpace";
        PixelXDimension = 0xA002 => "PixelXDimension";
        PixelYDimension = 0xA003 => "PixelYDimension";
        RelatedSoundFile = 0xA004 => "RelatedSoundFile";
        InteroperabilityOffset = 0xA005 => "InteroperabilityOffset";
        FlashEnergy = 0xA20B => "FlashEnergy";
        SpatialFrequencyResponse = 0xA20C => "SpatialFrequencyResponse";
        FocalPlaneXResolution = 0xA20E => "FocalPlaneXResolution";
        FocalPlaneYResolution = 0xA20F => "FocalPlaneYResolution";
        FocalPlaneResolutionUnit = 0xA210 => "FocalPlaneResolutionUnit";
        SubjectLocation = 0xA214 => "SubjectLocation";
        ExposureIndex = 0xA215 => "ExposureIndex";
        SensingMethod = 0xA217 => "SensingMethod";
        FileSource = 0xA300 => "FileSource";
        SceneType = 0xA301 => "SceneType";
        CfaPattern = 0xA302 => "CFAPattern";
        CustomRendered = 0xA401 => "CustomRendered";
        ExposureMode = 0xA402 => "ExposureMode";
        WhiteBalance = 0xA403 => "WhiteBalance";
        DigitalZoomRatio = 0xA404 => "DigitalZoomRatio";
        FocalLengthIn35mmFormat = 0xA405 => "FocalLengthIn35mmFormat";
        SceneCaptureType = 0xA406 => "SceneCaptureType";
        GainControl = 0xA407 => "GainControl";
        Contrast = 0xA408 => "Contrast";
        Saturation = 0xA409 => "Saturation";
        Sharpness = 0xA40A => "Sharpness";
        DeviceSettingDescription = 0xA40B => "DeviceSettingDescription";
        SubjectDistanceRange = 0xA40C => "SubjectDistanceRange";
        ImageUniqueId = 0xA420 => "ImageUniqueID";
        CameraOwnerName = 0xA430 => "CameraOwnerName";
        BodySerialNumber = 0xA431 => "BodySerialNumber";
        LensSpecification = 0xA432 => "LensSpecification";
        LensMake = 0xA433 => "LensMake";
        LensModel = 0xA434 => "LensModel";
        LensSerialNumber = 0xA435 => "LensSerialNumber";
        Gamma = 0xA500 => "Gamma";
        Padding = 0xEA1C => "Padding";
    }
}

tag_set! {
    /// Tags of the GPS SubIFD
    GpsTag in Gps {
        VersionId = 0x0000 => "GPSVersionID";
        LatitudeRef = 0x0001 => "GPSLatitudeRef";
        Latitude = 0x0002 => "GPSLatitude";
        LongitudeRef = 0x0003 => "GPSLongitudeRef";
        Longitude = 0x0004 => "GPSLongitude";
        AltitudeRef = 0x0005 => "GPSAltitudeRef";
        Altitude = 0x0006 => "GPSAltitude";
        TimeStamp = 0x0007 => "GPSTimeStamp";
        Satellites = 0x0008 => "GPSSatellites";
        Status = 0x0009 => "GPSStatus";
        MeasureMode = 0x000A => "GPSMeasureMode";
        Dop = 0x000B => "GPSDOP";
        SpeedRef = 0x000C => "GPSSpeedRef";
        Speed = 0x000D => "GPSSpeed";
        TrackRef = 0x000E => "GPSTrackRef";
        Track = 0x000F => "GPSTrack";
        ImgDirectionRef = 0x0010 => "GPSImgDirectionRef";
        ImgDirection = 0x0011 => "GPSImgDirection";
        MapDatum = 0x0012 => "GPSMapDatum";
        DestLatitudeRef = 0x0013 => "GPSDestLatitudeRef";
        DestLatitude = 0x0014 => "GPSDestLatitude";
        DestLongitudeRef = 0x0015 => "GPSDestLongitudeRef";
        DestLongitude = 0x0016 => "GPSDestLongitude";
        DestBearingRef = 0x0017 => "GPSDestBearingRef";
        DestBearing = 0x0018 => "GPSDestBearing";
        DestDistanceRef = 0x0019 => "GPSDestDistanceRef";
        DestDistance = 0x001A => "GPSDestDistance";
        ProcessingMethod = 0x001B => "GPSProcessingMethod";
        AreaInformation = 0x001C => "GPSAreaInformation";
        DateStamp = 0x001D => "GPSDateStamp";
        Differential = 0x001E => "GPSDifferential";
        HPositioningError = 0x001F => "GPSHPositioningError";
    }
}

tag_set! {
    /// Tags of the EXIF Interoperability IFD
    InteropTag in Interop {
        InteroperabilityIndex = 0x0001 => "InteroperabilityIndex";
        InteroperabilityVersion = 0x0002 => "InteroperabilityVersion";
        RelatedImageFileFormat = 0x1000 => "RelatedImageFileFormat";
        RelatedImageWidth = 0x1001 => "RelatedImageWidth";
        RelatedImageLength = 0x1002 => "RelatedImageLength";
    }
}
