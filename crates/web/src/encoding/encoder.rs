use std::io;
use std::io::Write;

use bytes::{Bytes, BytesMut};
use flate2::Compression;
use flate2::write::{GzEncoder, ZlibEncoder};
use http::HeaderValue;
use tracing::trace;
use zstd::stream::write::Encoder as ZstdEncoder;

/// A content coding the server can produce, in order of server preference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentCoding {
    Zstd,
    Br,
    Gzip,
    Deflate,
}

impl ContentCoding {
    pub const ALL: [Self; 4] = [Self::Zstd, Self::Br, Self::Gzip, Self::Deflate];

    pub fn name(self) -> &'static str {
        match self {
            Self::Zstd => "zstd",
            Self::Br => "br",
            Self::Gzip => "gzip",
            Self::Deflate => "deflate",
        }
    }

    pub fn header_value(self) -> HeaderValue {
        HeaderValue::from_static(self.name())
    }

    fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|coding| name.eq_ignore_ascii_case(coding.name()))
    }

    /// Picks the coding to use for an `Accept-Encoding` header value.
    ///
    /// The highest `q` wins, ties go to the server's preference. `*` stands for every
    /// coding not listed on its own and `q=0` excludes a coding.
    pub fn negotiate(accept_encoding: &str) -> Option<Self> {
        let mut weights: [Option<u16>; 4] = [None; 4];
        let mut wildcard = None;

        for item in accept_encoding.split(',') {
            let mut parts = item.split(';');
            let name = parts.next().unwrap_or_default().trim();
            let weight = parts.find_map(|param| param.trim().strip_prefix("q=").or_else(|| param.trim().strip_prefix("Q=")).map(parse_qvalue)).unwrap_or(Some(1000));
            let Some(weight) = weight else {
                trace!(item, "ignoring accept-encoding item with an invalid weight");
                continue;
            };

            if name == "*" {
                wildcard = Some(weight);
            } else if let Some(coding) = Self::from_name(name) {
                weights[coding as usize] = Some(weight);
            }
        }

        Self::ALL
            .into_iter()
            .filter_map(|coding| weights[coding as usize].or(wildcard).filter(|weight| *weight > 0).map(|weight| (coding, weight)))
            .fold(None, |best: Option<(Self, u16)>, (coding, weight)| match best {
                Some((_, best_weight)) if best_weight >= weight => best,
                _ => Some((coding, weight)),
            })
            .map(|(coding, _)| coding)
    }
}

/// A `q` value in thousandths, `None` when it is not a valid weight.
fn parse_qvalue(value: &str) -> Option<u16> {
    let value = value.trim();
    let (int, fraction) = value.split_once('.').unwrap_or((value, ""));
    if fraction.len() > 3 || !fraction.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let thousandths = format!("{fraction:0<3}").parse::<u16>().ok()?;
    match int {
        "0" => Some(thousandths),
        "1" if thousandths == 0 => Some(1000),
        _ => None,
    }
}

/// Collects compressed output until it is taken.
#[derive(Debug)]
pub(crate) struct Writer {
    buf: BytesMut,
}

impl Writer {
    fn new() -> Self {
        Self { buf: BytesMut::with_capacity(4096) }
    }

    fn take(&mut self) -> Bytes {
        self.buf.split().freeze()
    }
}

impl Write for Writer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buf.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// A streaming compressor for one response body.
pub(crate) enum Encoder {
    Gzip(GzEncoder<Writer>),
    Deflate(ZlibEncoder<Writer>),
    Zstd(ZstdEncoder<'static, Writer>),
    Br(Box<brotli::CompressorWriter<Writer>>),
}

impl Encoder {
    pub(crate) fn new(coding: ContentCoding) -> io::Result<Self> {
        Ok(match coding {
            ContentCoding::Gzip => Self::Gzip(GzEncoder::new(Writer::new(), Compression::default())),
            ContentCoding::Deflate => Self::Deflate(ZlibEncoder::new(Writer::new(), Compression::default())),
            ContentCoding::Zstd => Self::Zstd(ZstdEncoder::new(Writer::new(), 3)?),
            ContentCoding::Br => Self::Br(Box::new(brotli::CompressorWriter::new(
                Writer::new(),
                32 * 1024, // 32 KiB buffer
                5,         // BROTLI_PARAM_QUALITY
                22,        // BROTLI_PARAM_LGWIN
            ))),
        })
    }

    pub(crate) fn coding(&self) -> ContentCoding {
        match self {
            Self::Gzip(_) => ContentCoding::Gzip,
            Self::Deflate(_) => ContentCoding::Deflate,
            Self::Zstd(_) => ContentCoding::Zstd,
            Self::Br(_) => ContentCoding::Br,
        }
    }

    pub(crate) fn write(&mut self, data: &[u8]) -> io::Result<()> {
        let result = match self {
            Self::Gzip(encoder) => encoder.write_all(data),
            Self::Deflate(encoder) => encoder.write_all(data),
            Self::Zstd(encoder) => encoder.write_all(data),
            Self::Br(encoder) => encoder.write_all(data),
        };
        if let Err(e) = &result {
            trace!(coding = self.coding().name(), cause = %e, "error encoding response body");
        }
        result
    }

    /// Compressed bytes produced so far.
    pub(crate) fn take(&mut self) -> Bytes {
        match self {
            Self::Gzip(encoder) => encoder.get_mut().take(),
            Self::Deflate(encoder) => encoder.get_mut().take(),
            Self::Zstd(encoder) => encoder.get_mut().take(),
            Self::Br(encoder) => encoder.get_mut().take(),
        }
    }

    /// Ends the compressed stream, returning the bytes not yet taken.
    pub(crate) fn finish(self) -> io::Result<Bytes> {
        let mut writer = match self {
            Self::Gzip(encoder) => encoder.finish()?,
            Self::Deflate(encoder) => encoder.finish()?,
            Self::Zstd(encoder) => encoder.finish()?,
            Self::Br(encoder) => encoder.into_inner(),
        };
        Ok(writer.take())
    }
}

impl std::fmt::Debug for Encoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Encoder").field(&self.coding()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;

    #[test]
    fn negotiation() {
        assert_eq!(ContentCoding::negotiate("gzip, deflate, br, zstd"), Some(ContentCoding::Zstd));
        assert_eq!(ContentCoding::negotiate("gzip, deflate"), Some(ContentCoding::Gzip));
        assert_eq!(ContentCoding::negotiate("deflate;q=0.5, gzip;q=0.4"), Some(ContentCoding::Deflate));
        assert_eq!(ContentCoding::negotiate("GZIP"), Some(ContentCoding::Gzip));
        assert_eq!(ContentCoding::negotiate("*"), Some(ContentCoding::Zstd));
        assert_eq!(ContentCoding::negotiate("*;q=0.1, zstd;q=0, br;q=0"), Some(ContentCoding::Gzip));
        assert_eq!(ContentCoding::negotiate("identity"), None);
        assert_eq!(ContentCoding::negotiate("gzip;q=0"), None);
        assert_eq!(ContentCoding::negotiate("gzip;q=2, deflate"), Some(ContentCoding::Deflate));
        assert_eq!(ContentCoding::negotiate(""), None);
    }

    #[test]
    fn qvalues() {
        assert_eq!(parse_qvalue("1"), Some(1000));
        assert_eq!(parse_qvalue("1.000"), Some(1000));
        assert_eq!(parse_qvalue("0.5"), Some(500));
        assert_eq!(parse_qvalue("0.05"), Some(50));
        assert_eq!(parse_qvalue("0"), Some(0));
        assert_eq!(parse_qvalue("1.5"), None);
        assert_eq!(parse_qvalue("0.1234"), None);
        assert_eq!(parse_qvalue("x"), None);
    }

    #[test]
    fn gzip_output_decodes() {
        let text = "Hello World! ".repeat(200);
        let mut encoder = Encoder::new(ContentCoding::Gzip).unwrap();
        encoder.write(text.as_bytes()).unwrap();
        let mut compressed = encoder.take().to_vec();
        compressed.extend_from_slice(&encoder.finish().unwrap());

        let mut decoded = String::new();
        flate2::read::GzDecoder::new(&compressed[..]).read_to_string(&mut decoded).unwrap();
        assert_eq!(decoded, text);
        assert!(compressed.len() < text.len());
    }

    #[test]
    fn every_coding_finishes() {
        for coding in ContentCoding::ALL {
            let mut encoder = Encoder::new(coding).unwrap();
            encoder.write(b"some bytes").unwrap();
            let _ = encoder.take();
            assert!(!encoder.finish().unwrap().is_empty(), "{coding:?} wrote a stream trailer");
        }
    }
}
