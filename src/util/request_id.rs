use rand::RngCore;

/// Generates a random RFC 4122 version 4 identifier, e.g. `1b4e28ba-2fa1-41d2-883f-0016d3cca427`.
///
/// Used as the `X-Parse-Request-Id` idempotency key and as the default installation id.
pub fn generate_request_id() -> String {
    generate_with_rng(&mut rand::thread_rng())
}

fn generate_with_rng<R: RngCore + ?Sized>(rng: &mut R) -> String {
    let mut bytes = [0u8; 16];
    rng.fill_bytes(&mut bytes);
    bytes[6] = (bytes[6] & 0x0f) | 0x40;
    bytes[8] = (bytes[8] & 0x3f) | 0x80;

    let mut out = String::with_capacity(36);
    for (index, byte) in bytes.iter().enumerate() {
        if matches!(index, 4 | 6 | 8 | 10) {
            out.push('-');
        }
        out.push_str(&format!("{byte:02x}"));
    }
    out
}
