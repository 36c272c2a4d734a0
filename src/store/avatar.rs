use base64::{engine::general_purpose, Engine as _};
use sha2::{Digest, Sha256};
use std::fmt::Write as _;

const GRID: usize = 5;

/// Remote identicon rendered by DiceBear
pub fn dicebear_url(uuid: &str, size: u32) -> String {
    format!("https://api.dicebear.com/7.x/identicon/svg?seed={uuid}&size={size}")
}

/// Offline identicon: a mirrored 5x5 grid seeded by SHA-256 of `uuid`,
/// returned as an `image/svg+xml` data URI.
pub fn identicon_data_uri(uuid: &str, size: u32) -> String {
    let digest = Sha256::digest(uuid.as_bytes());
    let color = format!("#{:02x}{:02x}{:02x}", digest[0], digest[1], digest[2]);
    let cell = size as f32 / GRID as f32;

    let mut svg = format!(
        r##"<svg xmlns="http://www.w3.org/2000/svg" width="{size}" height="{size}" viewBox="0 0 {size} {size}"><rect width="{size}" height="{size}" fill="#f0f0f0"/>"##
    );
    for row in 0..GRID {
        for col in 0..(GRID + 1) / 2 {
            // one bit per cell in the left half, mirrored to the right
            let bit = digest[3 + row * 3 + col] & 1 == 1;
            if !bit {
                continue;
            }
            for x in [col, GRID - 1 - col] {
                let _ = write!(
                    svg,
                    r##"<rect x="{:.1}" y="{:.1}" width="{cell:.1}" height="{cell:.1}" fill="{color}"/>"##,
                    x as f32 * cell,
                    row as f32 * cell,
                );
                if x == GRID - 1 - x {
                    break;
                }
            }
        }
    }
    svg.push_str("</svg>");

    format!("data:image/svg+xml;base64,{}", general_purpose::STANDARD.encode(svg))
}
