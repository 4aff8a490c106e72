//! Radiance RGBE (.hdr) decoding into half-float RGBA

use crate::error::AssetError;
use half::f16;

/// The header must terminate within this many bytes
pub const MAX_HEADER_LEN: usize = 10240;

/// Scanline length field of new-style RLE is 15 bits
const MAX_RLE_WIDTH: usize = 0x7FFF;

/// Decoded image, RGBA half floats, rows top to bottom
#[derive(Debug, Clone)]
pub struct HdrImage {
    pub width: u32,
    pub height: u32,
    pub data: Vec<f16>,
}

impl HdrImage {
    pub fn pixel(&self, x: u32, y: u32) -> [f32; 4] {
        let base = ((y * self.width + x) * 4) as usize;
        [
            self.data[base].to_f32(),
            self.data[base + 1].to_f32(),
            self.data[base + 2].to_f32(),
            self.data[base + 3].to_f32(),
        ]
    }

    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.data)
    }
}

/// Locate the end of the header: a blank line followed by the resolution line.
/// Returns the header text and the offset of the first pixel byte.
fn split_header(bytes: &[u8]) -> Result<(&str, usize), AssetError> {
    let limit = bytes.len().min(MAX_HEADER_LEN);
    let scan = &bytes[..limit];

    let blank = scan
        .windows(2)
        .position(|w| w == b"\n\n")
        .ok_or(AssetError::HdrHeaderTooLong)?;
    let resolution_start = blank + 2;
    let resolution_len = scan[resolution_start..]
        .iter()
        .position(|&b| b == b'\n')
        .ok_or(AssetError::HdrHeaderTooLong)?;
    let end = resolution_start + resolution_len;

    let text = std::str::from_utf8(&scan[..end])
        .map_err(|_| AssetError::HdrBadFormat("header is not text".into()))?;
    Ok((text, end + 1))
}

fn parse_dimensions(line: &str) -> Result<(u32, u32), AssetError> {
    let fields: Vec<&str> = line.split_whitespace().collect();
    match fields.as_slice() {
        ["-Y", h, "+X", w] => {
            let height = h.parse().map_err(|_| AssetError::HdrMissingDimensions)?;
            let width = w.parse().map_err(|_| AssetError::HdrMissingDimensions)?;
            if width == 0 || height == 0 {
                return Err(AssetError::HdrMissingDimensions);
            }
            Ok((width, height))
        }
        _ => Err(AssetError::HdrMissingDimensions),
    }
}

fn rgbe_to_half(rgbe: [u8; 4], max_value: f32, out: &mut [f16]) {
    out[3] = f16::ONE;
    if rgbe[3] == 0 {
        return;
    }
    let scale = 2f32.powi(rgbe[3] as i32 - (128 + 8));
    for c in 0..3 {
        out[c] = f16::from_f32((rgbe[c] as f32 * scale).min(max_value));
    }
}

struct Cursor<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn next(&mut self) -> Result<u8, AssetError> {
        let byte = *self.bytes.get(self.pos).ok_or(AssetError::Truncated)?;
        self.pos += 1;
        Ok(byte)
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], AssetError> {
        let slice = self
            .bytes
            .get(self.pos..self.pos + n)
            .ok_or(AssetError::Truncated)?;
        self.pos += n;
        Ok(slice)
    }
}

/// Decode a `32-bit_rle_rgbe` image. Components are clamped to `max_value`
/// before conversion so bright pixels cannot overflow to infinity.
pub fn decode_hdr(bytes: &[u8], max_value: f32) -> Result<HdrImage, AssetError> {
    let (header, data_start) = split_header(bytes)?;

    let format = header
        .lines()
        .find_map(|line| line.strip_prefix("FORMAT="))
        .unwrap_or("");
    if format.trim() != "32-bit_rle_rgbe" {
        return Err(AssetError::HdrBadFormat(format.trim().to_string()));
    }

    let resolution = header.lines().last().unwrap_or("");
    let (width, height) = parse_dimensions(resolution)?;
    let (w, h) = (width as usize, height as usize);

    let lead = bytes.get(data_start..data_start + 3).ok_or(AssetError::Truncated)?;
    let flat = lead[0] != 2 || lead[1] != 2 || lead[2] & 0x80 != 0;

    let available = bytes.len() - data_start;
    let too_large = || AssetError::HdrTooLarge {
        width,
        height,
        available,
    };
    let components = w
        .checked_mul(h)
        .and_then(|n| n.checked_mul(4))
        .ok_or_else(too_large)?;
    // Smallest possible encoding: 4 bytes per flat pixel, or a scanline header
    // plus one two-byte run per 127 pixels per channel
    let min_bytes = if flat {
        Some(components)
    } else if w > MAX_RLE_WIDTH {
        None
    } else {
        h.checked_mul(4 + 8 * w.div_ceil(127))
    };
    if min_bytes.map_or(true, |min| min > available) {
        return Err(too_large());
    }

    let mut data = vec![f16::ZERO; components];
    let mut cursor = Cursor {
        bytes,
        pos: data_start,
    };

    if flat {
        for out in data.chunks_exact_mut(4) {
            let rgbe = cursor.take(4)?;
            rgbe_to_half([rgbe[0], rgbe[1], rgbe[2], rgbe[3]], max_value, out);
        }
    } else {
        let mut scanline = vec![0u8; w * 4];
        for row in 0..h {
            let head = cursor.take(4)?;
            if head[0] != 2 || head[1] != 2 || head[2] & 0x80 != 0 {
                return Err(AssetError::ScanlineMismatch {
                    row,
                    expected: w,
                    found: 0,
                });
            }
            let length = ((head[2] as usize) << 8) | head[3] as usize;
            if length != w {
                return Err(AssetError::ScanlineMismatch {
                    row,
                    expected: w,
                    found: length,
                });
            }

            for channel in 0..4 {
                let mut x = 0;
                while x < w {
                    let left = w - x;
                    let count = cursor.next()? as usize;
                    if count > 128 {
                        let run = count - 128;
                        if run > left {
                            return Err(AssetError::BadRle { row });
                        }
                        let value = cursor.next()?;
                        for _ in 0..run {
                            scanline[x * 4 + channel] = value;
                            x += 1;
                        }
                    } else {
                        if count == 0 || count > left {
                            return Err(AssetError::BadRle { row });
                        }
                        for &value in cursor.take(count)? {
                            scanline[x * 4 + channel] = value;
                            x += 1;
                        }
                    }
                }
            }

            let row_out = &mut data[row * w * 4..(row + 1) * w * 4];
            for (rgbe, out) in scanline.chunks_exact(4).zip(row_out.chunks_exact_mut(4)) {
                rgbe_to_half([rgbe[0], rgbe[1], rgbe[2], rgbe[3]], max_value, out);
            }
        }
    }

    Ok(HdrImage {
        width,
        height,
        data,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header(width: u32, height: u32) -> Vec<u8> {
        format!(
            "#?RADIANCE\nFORMAT=32-bit_rle_rgbe\nEXPOSURE=1.0\n\n-Y {} +X {}\n",
            height, width
        )
        .into_bytes()
    }

    /// One literal run per channel for every row
    fn rle_image(width: u32, pixels: &[[u8; 4]]) -> Vec<u8> {
        let height = pixels.len() as u32 / width;
        let mut bytes = header(width, height);
        for row in pixels.chunks(width as usize) {
            bytes.extend_from_slice(&[2, 2, (width >> 8) as u8, width as u8]);
            for channel in 0..4 {
                bytes.push(width as u8);
                bytes.extend(row.iter().map(|p| p[channel]));
            }
        }
        bytes
    }

    #[test]
    fn test_rle_two_by_two() {
        let pixels = [[128, 64, 0, 129], [255, 255, 255, 128], [0, 0, 0, 0], [1, 2, 3, 136]];
        let image = decode_hdr(&rle_image(2, &pixels), 65000.0).unwrap();
        assert_eq!((image.width, image.height), (2, 2));

        // 128 * 2^(129-136) = 1.0
        let p = image.pixel(0, 0);
        assert!((p[0] - 1.0).abs() < 1e-3 && (p[1] - 0.5).abs() < 1e-3 && p[2] == 0.0);
        assert_eq!(p[3], 1.0);

        let p = image.pixel(1, 0);
        assert!((p[0] - 255.0 / 256.0).abs() < 1e-3);

        // Exponent zero is black
        assert_eq!(image.pixel(0, 1), [0.0, 0.0, 0.0, 1.0]);

        let p = image.pixel(1, 1);
        assert_eq!([p[0], p[1], p[2]], [1.0, 2.0, 3.0]);
    }

    #[test]
    fn test_runs_expand() {
        let mut bytes = header(4, 1);
        bytes.extend_from_slice(&[2, 2, 0, 4]);
        for value in [128u8, 0, 0, 129] {
            bytes.extend_from_slice(&[128 + 4, value]);
        }
        let image = decode_hdr(&bytes, 65000.0).unwrap();
        for x in 0..4 {
            assert_eq!(image.pixel(x, 0), [1.0, 0.0, 0.0, 1.0]);
        }
    }

    #[test]
    fn test_flat_pixels() {
        let mut bytes = header(1, 2);
        bytes.extend_from_slice(&[128, 128, 128, 129, 64, 0, 0, 129]);
        let image = decode_hdr(&bytes, 65000.0).unwrap();
        assert_eq!(image.pixel(0, 0), [1.0, 1.0, 1.0, 1.0]);
        assert_eq!(image.pixel(0, 1), [0.5, 0.0, 0.0, 1.0]);
    }

    #[test]
    fn test_clamps_to_guard() {
        let mut bytes = header(1, 1);
        bytes.extend_from_slice(&[255, 0, 0, 255]);
        let image = decode_hdr(&bytes, 100.0).unwrap();
        assert_eq!(image.pixel(0, 0)[0], 100.0);
    }

    #[test]
    fn test_rejects_bad_format() {
        let bytes = b"#?RADIANCE\nFORMAT=32-bit_rle_xyze\n\n-Y 1 +X 1\n\x80\x80\x80\x80".to_vec();
        assert!(matches!(decode_hdr(&bytes, 1.0), Err(AssetError::HdrBadFormat(f)) if f == "32-bit_rle_xyze"));
    }

    #[test]
    fn test_rejects_missing_dimensions() {
        let bytes = b"FORMAT=32-bit_rle_rgbe\n\n+X 1 -Y 1\n\x80\x80\x80\x80".to_vec();
        assert!(matches!(decode_hdr(&bytes, 1.0), Err(AssetError::HdrMissingDimensions)));
    }

    #[test]
    fn test_rejects_unterminated_header() {
        let bytes = vec![b'#'; MAX_HEADER_LEN + 10];
        assert!(matches!(decode_hdr(&bytes, 1.0), Err(AssetError::HdrHeaderTooLong)));
    }

    #[test]
    fn test_scanline_width_mismatch() {
        let mut bytes = rle_image(2, &[[0, 0, 0, 0]; 4]);
        let first_row = header(2, 2).len();
        bytes[first_row + 3] = 3;
        assert!(matches!(
            decode_hdr(&bytes, 1.0),
            Err(AssetError::ScanlineMismatch { row: 0, expected: 2, found: 3 })
        ));
    }

    #[test]
    fn test_oversized_dimensions_rejected() {
        let bytes = b"#?RADIANCE\nFORMAT=32-bit_rle_rgbe\n\n-Y 4000000000 +X 4000000000\n\x01\x02\x03\x04";
        assert!(matches!(
            decode_hdr(bytes, 65000.0),
            Err(AssetError::HdrTooLarge { width: 4000000000, height: 4000000000, available: 4 })
        ));
    }

    #[test]
    fn test_dimensions_beyond_data_rejected() {
        // Flat: one pixel of data for a 1000x1000 image
        let mut flat = header(1000, 1000);
        flat.extend_from_slice(&[128, 128, 128, 129]);
        assert!(matches!(decode_hdr(&flat, 1.0), Err(AssetError::HdrTooLarge { .. })));

        // RLE: a single scanline header for a million rows
        let mut rle = header(8, 1_000_000);
        rle.extend_from_slice(&[2, 2, 0, 8]);
        assert!(matches!(decode_hdr(&rle, 1.0), Err(AssetError::HdrTooLarge { .. })));

        // RLE width the scanline length field cannot hold
        let mut wide = header(40000, 1);
        wide.extend_from_slice(&[2, 2, 0x1C, 0x40]);
        wide.extend(std::iter::repeat(0).take(4096));
        assert!(matches!(decode_hdr(&wide, 1.0), Err(AssetError::HdrTooLarge { .. })));
    }

    #[test]
    fn test_overlong_run_is_bad_rle() {
        let mut bytes = header(2, 1);
        bytes.extend_from_slice(&[2, 2, 0, 2, 128 + 3, 7, 0, 0, 0, 0, 0, 0]);
        assert!(matches!(decode_hdr(&bytes, 1.0), Err(AssetError::BadRle { row: 0 })));
    }
}
