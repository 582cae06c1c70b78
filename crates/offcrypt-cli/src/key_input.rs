//! Turn command-line key material into engine inputs.

use anyhow::{bail, Context, Result};
use offcrypt::Password;
use zeroize::Zeroizing;

/// `--ph8`: the password's UTF-8 bytes, hex encoded (`68656C6C6F` is "hello").
pub fn password_from_utf8_hex(hex_text: &str) -> Result<Password> {
    let bytes = Zeroizing::new(
        hex::decode(hex_text.trim()).context("--ph8 expects hex-encoded UTF-8 bytes")?,
    );
    let text = std::str::from_utf8(&bytes).context("--ph8 bytes are not valid UTF-8")?;
    Ok(Password::new(text))
}

/// `--ph16`: UTF-16 code units written as `u` followed by four hex digits, repeated
/// (`u3042u3044`). Unpaired surrogates are passed through unchanged.
pub fn password_from_utf16_units(text: &str) -> Result<Password> {
    let text = text.trim();
    let Some(rest) = text.strip_prefix('u') else {
        bail!("--ph16 expects code units of the form uXXXX, got {text:?}");
    };

    let mut units = Zeroizing::new(Vec::new());
    for chunk in rest.split('u') {
        if chunk.len() != 4 || !chunk.bytes().all(|b| b.is_ascii_hexdigit()) {
            bail!("--ph16 code unit u{chunk} is not four hex digits");
        }
        units.push(u16::from_str_radix(chunk, 16)?);
    }
    Ok(Password::from_utf16_units(&units))
}

/// `-k`: the package secret key as printed by `--psk`.
pub fn secret_key_from_hex(hex_text: &str) -> Result<Zeroizing<Vec<u8>>> {
    let key = hex::decode(hex_text.trim()).context("-k expects a hex-encoded secret key")?;
    match key.len() {
        16 | 24 | 32 => Ok(Zeroizing::new(key)),
        n => bail!("-k secret key is {n} bytes; expected 16, 24 or 32"),
    }
}
