use crate::models::EmailAddress;
use base64::Engine;
use base64::alphabet;
use base64::engine::general_purpose::URL_SAFE;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};

/// Gmail emits URL-safe base64 both with and without padding.
const URL_SAFE_LENIENT: GeneralPurpose = GeneralPurpose::new(
    &alphabet::URL_SAFE,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

pub fn decode_base64url(data: &str) -> Result<Vec<u8>, base64::DecodeError> {
    URL_SAFE_LENIENT.decode(data.trim().as_bytes())
}

pub fn encode_base64url(data: &[u8]) -> String {
    URL_SAFE.encode(data)
}

/// Splits `Name <addr>` or a bare value into display name and address part.
pub fn parse_address(input: &str) -> EmailAddress {
    let s = input.trim();
    if let Some(start) = s.find('<')
        && let Some(end) = s[start..].find('>').map(|i| start + i)
    {
        let name = s[..start].trim().trim_matches('"').trim();
        let email = s[start + 1..end].trim();
        return EmailAddress {
            name: if name.is_empty() {
                None
            } else {
                Some(name.to_string())
            },
            email: email.to_string(),
        };
    }
    EmailAddress {
        name: None,
        email: s.to_string(),
    }
}
