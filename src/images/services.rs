use anyhow::Context;
use base64::{
    alphabet,
    engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig},
    Engine,
};
use bytes::Bytes;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::ApiError;
use crate::state::AppState;

pub const UNREADABLE_IMAGE: &str = "Image too large or unreadable";

/// Standard alphabet, padding optional.
const LENIENT_B64: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// A photo that passed decoding, size and type checks.
#[derive(Debug)]
pub struct ImageUpload {
    pub body: Bytes,
    pub content_type: &'static str,
}

/// The limit is shown in MB, rounded to one decimal.
pub fn too_large(max_bytes: usize) -> ApiError {
    let tenths = (max_bytes as f64 / 100_000.0).round() as u64;
    let mb = match tenths % 10 {
        0 => (tenths / 10).to_string(),
        d => format!("{}.{}", tenths / 10, d),
    };
    ApiError::PayloadTooLarge(format!("Image is too large. Max {}MB allowed.", mb))
}

/// Checks size and sniffs the content type of raw image bytes.
pub fn accept_image(body: Bytes, max_bytes: usize) -> Result<ImageUpload, ApiError> {
    if body.len() > max_bytes {
        return Err(too_large(max_bytes));
    }
    let content_type = sniff_mime(&body).ok_or_else(|| ApiError::validation(UNREADABLE_IMAGE))?;
    Ok(ImageUpload { body, content_type })
}

/// Decodes an inline Base64 photo (an optional `data:...;base64,` prefix is ignored).
pub fn decode_base64_image(encoded: &str, max_bytes: usize) -> Result<ImageUpload, ApiError> {
    let payload = match encoded.split_once(";base64,") {
        Some((prefix, rest)) if prefix.starts_with("data:") => rest,
        _ => encoded,
    };
    let compact: String = payload.chars().filter(|c| !c.is_ascii_whitespace()).collect();

    // 4 chars carry 3 bytes; reject early before allocating the decoded buffer.
    if compact.len() / 4 * 3 > max_bytes + 3 {
        return Err(too_large(max_bytes));
    }

    let bytes = LENIENT_B64
        .decode(compact.as_bytes())
        .map_err(|_| ApiError::validation(UNREADABLE_IMAGE))?;
    accept_image(Bytes::from(bytes), max_bytes)
}

pub fn sniff_mime(b: &[u8]) -> Option<&'static str> {
    if b.starts_with(&[0xFF, 0xD8, 0xFF]) {
        return Some("image/jpeg");
    }
    if b.starts_with(&[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A]) {
        return Some("image/png");
    }
    if b.len() >= 12 && &b[0..4] == b"RIFF" && &b[8..12] == b"WEBP" {
        return Some("image/webp");
    }
    if b.len() >= 12 && &b[4..8] == b"ftyp" {
        match &b[8..12] {
            b"heic" | b"heix" | b"mif1" | b"msf1" => return Some("image/heic"),
            _ => {}
        }
    }
    None
}

fn ext_from_mime(ct: &str) -> Option<&'static str> {
    match ct {
        "image/jpeg" | "image/jpg" => Some("jpg"),
        "image/png" => Some("png"),
        "image/webp" => Some("webp"),
        "image/heic" => Some("heic"),
        _ => None,
    }
}

pub fn object_key(user_id: Uuid, meal_id: Uuid, image_id: Uuid, content_type: &str) -> String {
    let ext = ext_from_mime(content_type).unwrap_or("bin");
    format!("meals/{}/{}-{}.{}", user_id, meal_id, image_id, ext)
}

/// Stores the photo and returns its object key.
pub async fn store_meal_image(
    st: &AppState,
    user_id: Uuid,
    meal_id: Uuid,
    image: ImageUpload,
) -> anyhow::Result<String> {
    let key = object_key(user_id, meal_id, Uuid::new_v4(), image.content_type);
    let size = image.body.len();
    st.storage
        .put_object(&key, image.body, image.content_type)
        .await
        .with_context(|| format!("put_object {}", key))?;
    debug!(%key, size, "meal image stored");
    Ok(key)
}

/// Failure only leaves an orphaned object behind, so it is logged and swallowed.
pub async fn delete_best_effort(st: &AppState, key: &str) {
    if let Err(e) = st.storage.delete_object(key).await {
        warn!(error = %format!("{:#}", e), %key, "failed to delete meal image");
    }
}

pub async fn presign(st: &AppState, key: &str) -> anyhow::Result<String> {
    st.storage
        .presign_get(key, st.config.images.url_ttl_secs)
        .await
        .with_context(|| format!("presign url for {}", key))
}

pub async fn presign_opt(st: &AppState, key: Option<&str>) -> anyhow::Result<Option<String>> {
    match key {
        Some(k) => presign(st, k).await.map(Some),
        None => Ok(None),
    }
}


#[cfg(test)]
mod image_tests {
    use super::fixtures::{JPEG, PNG};
    use super::*;
    use base64::engine::general_purpose::{STANDARD, STANDARD_NO_PAD};

    #[test]
    fn test_ext_from_mime() {
        assert_eq!(ext_from_mime("image/jpeg"), Some("jpg"));
        assert_eq!(ext_from_mime("image/jpg"), Some("jpg"));
        assert_eq!(ext_from_mime("image/png"), Some("png"));
        assert_eq!(ext_from_mime("image/webp"), Some("webp"));
        assert_eq!(ext_from_mime("image/heic"), Some("heic"));
        assert_eq!(ext_from_mime("application/octet-stream"), None);
    }

    #[test]
    fn sniffs_known_formats() {
        assert_eq!(sniff_mime(JPEG), Some("image/jpeg"));
        assert_eq!(sniff_mime(PNG), Some("image/png"));
        assert_eq!(sniff_mime(b"RIFF\x00\x00\x00\x00WEBPVP8 "), Some("image/webp"));
        assert_eq!(sniff_mime(b"\x00\x00\x00\x18ftypheic\x00\x00"), Some("image/heic"));
        assert_eq!(sniff_mime(b"GIF89a"), None);
        assert_eq!(sniff_mime(b""), None);
    }

    #[test]
    fn decodes_padded_unpadded_and_data_urls() {
        let padded = STANDARD.encode(JPEG);
        let img = decode_base64_image(&padded, 1_000_000).unwrap();
        assert_eq!(img.content_type, "image/jpeg");
        assert_eq!(&img.body[..], JPEG);

        let unpadded = STANDARD_NO_PAD.encode(PNG);
        assert_eq!(decode_base64_image(&unpadded, 1_000_000).unwrap().content_type, "image/png");

        let data_url = format!("data:image/png;base64,{}", STANDARD.encode(PNG));
        assert_eq!(decode_base64_image(&data_url, 1_000_000).unwrap().content_type, "image/png");

        let wrapped = padded
            .as_bytes()
            .chunks(4)
            .map(|c| std::str::from_utf8(c).unwrap())
            .collect::<Vec<_>>()
            .join("\n");
        assert!(decode_base64_image(&wrapped, 1_000_000).is_ok());
    }

    #[test]
    fn rejects_garbage_and_non_images() {
        let err = decode_base64_image("@@not base64@@", 1_000_000).unwrap_err();
        assert_eq!(err.to_string(), UNREADABLE_IMAGE);

        let text = STANDARD.encode(b"just some text, no image here");
        let err = decode_base64_image(&text, 1_000_000).unwrap_err();
        assert_eq!(err.to_string(), UNREADABLE_IMAGE);
    }

    #[test]
    fn rejects_images_over_the_limit() {
        let mut big = JPEG.to_vec();
        big.resize(1_000_001, 0);
        let err = decode_base64_image(&STANDARD.encode(&big), 1_000_000).unwrap_err();
        assert!(matches!(err, ApiError::PayloadTooLarge(_)));
        assert_eq!(err.to_string(), "Image is too large. Max 1MB allowed.");

        big.truncate(1_000_000);
        assert!(decode_base64_image(&STANDARD.encode(&big), 1_000_000).is_ok());
    }

    #[test]
    fn limit_message_rounds_to_one_decimal() {
        let msg = |n| too_large(n).to_string();
        assert_eq!(msg(1_000_000), "Image is too large. Max 1MB allowed.");
        assert_eq!(msg(5_000_000), "Image is too large. Max 5MB allowed.");
        assert_eq!(msg(1_048_576), "Image is too large. Max 1MB allowed.");
        assert_eq!(msg(1_500_000), "Image is too large. Max 1.5MB allowed.");
        assert_eq!(msg(2_560_000), "Image is too large. Max 2.6MB allowed.");
    }

    #[test]
    fn object_keys_are_namespaced_per_user() {
        let (u, m, i) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        let key = object_key(u, m, i, "image/png");
        assert_eq!(key, format!("meals/{}/{}-{}.png", u, m, i));
        assert!(object_key(u, m, i, "x/y").ends_with(".bin"));
    }

    #[tokio::test]
    async fn store_presign_and_delete() {
        let (state, memory) = AppState::fake_with_storage();
        let image = accept_image(Bytes::from_static(JPEG), 1_000_000).unwrap();
        let key = store_meal_image(&state, Uuid::new_v4(), Uuid::new_v4(), image)
            .await
            .unwrap();
        assert!(memory.contains(&key));
        assert_eq!(memory.content_type(&key).as_deref(), Some("image/jpeg"));

        let url = presign(&state, &key).await.unwrap();
        assert!(url.contains(&key));
        assert!(url.contains("expires=1800"));
        assert_eq!(presign_opt(&state, None).await.unwrap(), None);

        delete_best_effort(&state, &key).await;
        assert_eq!(memory.len(), 0);
    }
}
