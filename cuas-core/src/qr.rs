//! Pilot-position QR code: a base64 PNG that opens a map pin on a phone.

use std::io::Cursor;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use image::{DynamicImage, ImageFormat, Luma};
use qrcode::{EcLevel, QrCode};

use crate::types::{CuasError, Result};

const QR_SIZE_PX: u32 = 256;

/// Map share link for a pilot position.
pub fn pilot_map_url(lon: f64, lat: f64) -> String {
    format!(
        "https://m.amap.com/share/index/lnglat={lon:.6},{lat:.6}&name={}&src=mypage&callnative=1&innersrc=uriapi",
        urlencoding::encode("Pilot position")
    )
}

/// Render the pilot map link as `data:image/png;base64,...`.
///
/// Fails for a (0, 0) position; callers treat failure as "no image".
pub fn pilot_qr_png(lon: f64, lat: f64) -> Result<String> {
    if lon == 0.0 && lat == 0.0 {
        return Err(CuasError::QrCode("pilot position is 0,0".into()));
    }

    let code = QrCode::with_error_correction_level(pilot_map_url(lon, lat), EcLevel::M)
        .map_err(|e| CuasError::QrCode(e.to_string()))?;
    let img = code
        .render::<Luma<u8>>()
        .min_dimensions(QR_SIZE_PX, QR_SIZE_PX)
        .build();

    let mut png = Vec::new();
    DynamicImage::ImageLuma8(img)
        .write_to(&mut Cursor::new(&mut png), ImageFormat::Png)
        .map_err(|e| CuasError::QrCode(e.to_string()))?;

    Ok(format!("data:image/png;base64,{}", BASE64.encode(&png)))
}

/// Like `pilot_qr_png`, but an empty string on failure.
pub fn pilot_qr_or_empty(lon: f64, lat: f64) -> String {
    pilot_qr_png(lon, lat).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_position_rejected() {
        assert!(pilot_qr_png(0.0, 0.0).is_err());
        assert_eq!(pilot_qr_or_empty(0.0, 0.0), "");
    }

    #[test]
    fn test_png_data_uri() {
        let uri = pilot_qr_png(116.397_128, 39.916_527).unwrap();
        let b64 = uri.strip_prefix("data:image/png;base64,").unwrap();
        let png = BASE64.decode(b64).unwrap();
        assert_eq!(&png[..8], b"\x89PNG\r\n\x1a\n");
    }

    #[test]
    fn test_map_url_six_places() {
        let url = pilot_map_url(116.4, 39.9);
        assert!(url.contains("lnglat=116.400000,39.900000"));
        assert!(url.contains("name=Pilot%20position"));
    }
}
