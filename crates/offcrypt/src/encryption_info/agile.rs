//! Agile (XML) descriptor.
//!
//! Only the password key encryptor is supported. Certificate key encryptors may be present
//! alongside it and are skipped.

use std::str::FromStr;

use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, Event as XmlEvent};
use quick_xml::{Reader as XmlReader, Writer as XmlWriter};

use super::EncryptionVersion;
use crate::crypto::{HashAlgorithm, AES_BLOCK_SIZE};
use crate::error::{OffcryptError, Result};
use crate::kdf::validate_spin_count;
use crate::util::{decode_b64_attr, encode_b64};

pub const ENCRYPTION_NS: &str = "http://schemas.microsoft.com/office/2006/encryption";
pub const PASSWORD_KEY_ENCRYPTOR_NS: &str =
    "http://schemas.microsoft.com/office/2006/keyEncryptor/password";
const CERTIFICATE_KEY_ENCRYPTOR_NS: &str =
    "http://schemas.microsoft.com/office/2006/keyEncryptor/certificate";

pub const AGILE_CIPHER_ALGORITHM: &str = "AES";
pub const AGILE_CIPHER_CHAINING: &str = "ChainingModeCBC";

/// `EncryptionVersionInfo.flags` for Agile: `fAgile`.
const AGILE_VERSION_FLAGS: u32 = 0x40;
const SALT_LEN: usize = 16;

/// `<keyData>`: parameters of the package (intermediate) key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgileKeyData {
    pub salt: Vec<u8>,
    pub block_size: usize,
    pub key_bits: usize,
    pub hash_size: usize,
    pub hash_algorithm: HashAlgorithm,
    pub cipher_algorithm: String,
    pub cipher_chaining: String,
}

impl AgileKeyData {
    pub fn new(salt: Vec<u8>, key_bits: usize, hash_algorithm: HashAlgorithm) -> Self {
        Self {
            salt,
            block_size: AES_BLOCK_SIZE,
            key_bits,
            hash_size: hash_algorithm.digest_len(),
            hash_algorithm,
            cipher_algorithm: AGILE_CIPHER_ALGORITHM.to_string(),
            cipher_chaining: AGILE_CIPHER_CHAINING.to_string(),
        }
    }
}

/// `<dataIntegrity>`: the encrypted HMAC key and the encrypted HMAC over `EncryptedPackage`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgileDataIntegrity {
    pub encrypted_hmac_key: Vec<u8>,
    pub encrypted_hmac_value: Vec<u8>,
}

/// `<p:encryptedKey>` from the password key encryptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PasswordKeyEncryptor {
    pub spin_count: u32,
    pub salt: Vec<u8>,
    pub block_size: usize,
    pub key_bits: usize,
    pub hash_size: usize,
    pub hash_algorithm: HashAlgorithm,
    pub cipher_algorithm: String,
    pub cipher_chaining: String,
    pub encrypted_verifier_hash_input: Vec<u8>,
    pub encrypted_verifier_hash_value: Vec<u8>,
    pub encrypted_key_value: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgileDescriptor {
    pub version: EncryptionVersion,
    pub key_data: AgileKeyData,
    /// Optional in the wild; when absent the package cannot be integrity checked.
    pub data_integrity: Option<AgileDataIntegrity>,
    pub password: PasswordKeyEncryptor,
}

impl AgileDescriptor {
    pub fn new(
        key_data: AgileKeyData,
        data_integrity: Option<AgileDataIntegrity>,
        password: PasswordKeyEncryptor,
    ) -> Self {
        Self {
            version: EncryptionVersion {
                major: 4,
                minor: 4,
                flags: AGILE_VERSION_FLAGS,
            },
            key_data,
            data_integrity,
            password,
        }
    }

    pub(crate) fn parse(version: EncryptionVersion, xml_bytes: &[u8]) -> Result<Self> {
        let xml = std::str::from_utf8(xml_bytes)
            .map_err(|_| OffcryptError::descriptor("agile EncryptionInfo XML is not valid UTF-8"))?;
        let xml = xml.trim_start_matches('\u{feff}');

        let mut reader = XmlReader::from_str(xml);
        reader.config_mut().trim_text(true);

        let mut buf = Vec::new();
        let mut ns_stack: Vec<NamespaceFrame> = Vec::new();
        let mut fields = AgileFields::default();

        loop {
            let event = reader
                .read_event_into(&mut buf)
                .map_err(|_| OffcryptError::descriptor("agile EncryptionInfo XML parse error"))?;
            match event {
                XmlEvent::Start(e) => {
                    push_namespace_frame(&mut ns_stack, &e)?;
                    fields.visit(&ns_stack, &e)?;
                }
                XmlEvent::Empty(e) => {
                    push_namespace_frame(&mut ns_stack, &e)?;
                    fields.visit(&ns_stack, &e)?;
                    ns_stack.pop();
                }
                XmlEvent::End(_) => {
                    ns_stack.pop();
                }
                XmlEvent::Eof => break,
                _ => {}
            }
            buf.clear();
        }

        let key_data = fields
            .key_data
            .ok_or(OffcryptError::descriptor("missing <keyData> element"))?;
        let password = match fields.password {
            Some(password) => password,
            None if fields.saw_certificate_encryptor => {
                return Err(OffcryptError::descriptor(
                    "only certificate key encryptors present; password encryptor required",
                ))
            }
            None => {
                return Err(OffcryptError::descriptor(
                    "missing password <encryptedKey> element",
                ))
            }
        };
        if fields.data_integrity.is_none() {
            log::warn!("agile EncryptionInfo has no <dataIntegrity>; package integrity cannot be verified");
        }

        let descriptor = Self {
            version,
            key_data,
            data_integrity: fields.data_integrity,
            password,
        };
        descriptor.validate()?;
        Ok(descriptor)
    }

    fn validate(&self) -> Result<()> {
        let kd = &self.key_data;
        validate_cipher_params(
            &kd.salt,
            kd.block_size,
            kd.key_bits,
            kd.hash_size,
            kd.hash_algorithm,
            &kd.cipher_algorithm,
            &kd.cipher_chaining,
        )?;

        let pw = &self.password;
        validate_cipher_params(
            &pw.salt,
            pw.block_size,
            pw.key_bits,
            pw.hash_size,
            pw.hash_algorithm,
            &pw.cipher_algorithm,
            &pw.cipher_chaining,
        )?;
        validate_spin_count(pw.spin_count)?;

        check_ciphertext(&pw.encrypted_verifier_hash_input, SALT_LEN, "encryptedVerifierHashInput")?;
        check_ciphertext(
            &pw.encrypted_verifier_hash_value,
            pw.hash_algorithm.digest_len(),
            "encryptedVerifierHashValue",
        )?;
        check_ciphertext(&pw.encrypted_key_value, kd.key_bits / 8, "encryptedKeyValue")?;

        if let Some(di) = &self.data_integrity {
            check_ciphertext(&di.encrypted_hmac_key, 1, "encryptedHmacKey")?;
            check_ciphertext(
                &di.encrypted_hmac_value,
                kd.hash_algorithm.digest_len(),
                "encryptedHmacValue",
            )?;
        }
        Ok(())
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let xml = self
            .to_xml()
            .map_err(|_| OffcryptError::descriptor("failed to serialize agile EncryptionInfo XML"))?;
        let mut out = Vec::with_capacity(EncryptionVersion::LEN + xml.len());
        self.version.write(&mut out);
        out.extend_from_slice(&xml);
        Ok(out)
    }

    fn to_xml(&self) -> std::result::Result<Vec<u8>, quick_xml::Error> {
        let mut writer = XmlWriter::new(Vec::new());
        writer.write_event(XmlEvent::Decl(BytesDecl::new("1.0", Some("UTF-8"), Some("yes"))))?;
        std::io::Write::write_all(writer.get_mut(), b"\r\n")?;

        let mut root = BytesStart::new("encryption");
        root.push_attribute(("xmlns", ENCRYPTION_NS));
        root.push_attribute(("xmlns:p", PASSWORD_KEY_ENCRYPTOR_NS));
        writer.write_event(XmlEvent::Start(root))?;

        let kd = &self.key_data;
        let mut key_data = BytesStart::new("keyData");
        push_attr(&mut key_data, "saltSize", kd.salt.len());
        push_attr(&mut key_data, "blockSize", kd.block_size);
        push_attr(&mut key_data, "keyBits", kd.key_bits);
        push_attr(&mut key_data, "hashSize", kd.hash_size);
        push_attr(&mut key_data, "cipherAlgorithm", &kd.cipher_algorithm);
        push_attr(&mut key_data, "cipherChaining", &kd.cipher_chaining);
        push_attr(&mut key_data, "hashAlgorithm", kd.hash_algorithm);
        push_attr(&mut key_data, "saltValue", encode_b64(&kd.salt));
        writer.write_event(XmlEvent::Empty(key_data))?;

        if let Some(di) = &self.data_integrity {
            let mut integrity = BytesStart::new("dataIntegrity");
            push_attr(&mut integrity, "encryptedHmacKey", encode_b64(&di.encrypted_hmac_key));
            push_attr(&mut integrity, "encryptedHmacValue", encode_b64(&di.encrypted_hmac_value));
            writer.write_event(XmlEvent::Empty(integrity))?;
        }

        writer.write_event(XmlEvent::Start(BytesStart::new("keyEncryptors")))?;
        let mut key_encryptor = BytesStart::new("keyEncryptor");
        key_encryptor.push_attribute(("uri", PASSWORD_KEY_ENCRYPTOR_NS));
        writer.write_event(XmlEvent::Start(key_encryptor))?;

        let pw = &self.password;
        let mut encrypted_key = BytesStart::new("p:encryptedKey");
        push_attr(&mut encrypted_key, "spinCount", pw.spin_count);
        push_attr(&mut encrypted_key, "saltSize", pw.salt.len());
        push_attr(&mut encrypted_key, "blockSize", pw.block_size);
        push_attr(&mut encrypted_key, "keyBits", pw.key_bits);
        push_attr(&mut encrypted_key, "hashSize", pw.hash_size);
        push_attr(&mut encrypted_key, "cipherAlgorithm", &pw.cipher_algorithm);
        push_attr(&mut encrypted_key, "cipherChaining", &pw.cipher_chaining);
        push_attr(&mut encrypted_key, "hashAlgorithm", pw.hash_algorithm);
        push_attr(&mut encrypted_key, "saltValue", encode_b64(&pw.salt));
        push_attr(
            &mut encrypted_key,
            "encryptedVerifierHashInput",
            encode_b64(&pw.encrypted_verifier_hash_input),
        );
        push_attr(
            &mut encrypted_key,
            "encryptedVerifierHashValue",
            encode_b64(&pw.encrypted_verifier_hash_value),
        );
        push_attr(&mut encrypted_key, "encryptedKeyValue", encode_b64(&pw.encrypted_key_value));
        writer.write_event(XmlEvent::Empty(encrypted_key))?;

        writer.write_event(XmlEvent::End(BytesEnd::new("keyEncryptor")))?;
        writer.write_event(XmlEvent::End(BytesEnd::new("keyEncryptors")))?;
        writer.write_event(XmlEvent::End(BytesEnd::new("encryption")))?;
        Ok(writer.into_inner())
    }
}

fn push_attr(el: &mut BytesStart<'_>, key: &str, value: impl ToString) {
    let value = value.to_string();
    el.push_attribute((key, value.as_str()));
}

#[allow(clippy::too_many_arguments)]
fn validate_cipher_params(
    salt: &[u8],
    block_size: usize,
    key_bits: usize,
    hash_size: usize,
    hash_algorithm: HashAlgorithm,
    cipher_algorithm: &str,
    cipher_chaining: &str,
) -> Result<()> {
    if salt.len() != SALT_LEN {
        return Err(OffcryptError::descriptor("saltValue must be 16 bytes"));
    }
    if block_size != AES_BLOCK_SIZE {
        return Err(OffcryptError::descriptor("blockSize must be 16"));
    }
    if !matches!(key_bits, 128 | 192 | 256) {
        return Err(OffcryptError::descriptor("keyBits must be 128, 192 or 256"));
    }
    if hash_size != hash_algorithm.digest_len() {
        return Err(OffcryptError::descriptor("hashSize does not match hashAlgorithm"));
    }
    if !cipher_algorithm.eq_ignore_ascii_case(AGILE_CIPHER_ALGORITHM) {
        return Err(OffcryptError::descriptor("cipherAlgorithm must be AES"));
    }
    if !cipher_chaining.eq_ignore_ascii_case(AGILE_CIPHER_CHAINING) {
        return Err(OffcryptError::descriptor("cipherChaining must be ChainingModeCBC"));
    }
    Ok(())
}

fn check_ciphertext(bytes: &[u8], min_len: usize, context: &'static str) -> Result<()> {
    if bytes.is_empty() || bytes.len() % AES_BLOCK_SIZE != 0 || bytes.len() < min_len {
        log::debug!("invalid {context}: {} bytes", bytes.len());
        return Err(OffcryptError::descriptor(
            "encrypted descriptor field has an invalid length",
        ));
    }
    Ok(())
}

#[derive(Default)]
struct AgileFields {
    key_data: Option<AgileKeyData>,
    data_integrity: Option<AgileDataIntegrity>,
    password: Option<PasswordKeyEncryptor>,
    saw_certificate_encryptor: bool,
}

impl AgileFields {
    fn visit(&mut self, ns_stack: &[NamespaceFrame], e: &BytesStart<'_>) -> Result<()> {
        match e.local_name().as_ref() {
            b"keyData" if self.key_data.is_none() => {
                self.key_data = Some(parse_key_data(&Attrs::collect(e)?)?);
            }
            b"dataIntegrity" if self.data_integrity.is_none() => {
                let attrs = Attrs::collect(e)?;
                self.data_integrity = Some(AgileDataIntegrity {
                    encrypted_hmac_key: attrs.base64("encryptedHmacKey")?,
                    encrypted_hmac_value: attrs.base64("encryptedHmacValue")?,
                });
            }
            b"encryptedKey" => {
                let name = e.name();
                let ns = resolve_namespace_uri(ns_stack, element_prefix(name.as_ref()));
                if ns == Some(PASSWORD_KEY_ENCRYPTOR_NS.as_bytes()) {
                    if self.password.is_none() {
                        self.password = Some(parse_password_encryptor(&Attrs::collect(e)?)?);
                    }
                } else if ns == Some(CERTIFICATE_KEY_ENCRYPTOR_NS.as_bytes()) {
                    self.saw_certificate_encryptor = true;
                }
            }
            _ => {}
        }
        Ok(())
    }
}

fn parse_key_data(attrs: &Attrs) -> Result<AgileKeyData> {
    let hash_algorithm = attrs.hash_algorithm()?;
    let salt = attrs.base64("saltValue")?;
    if let Some(salt_size) = attrs.optional_number::<usize>("saltSize")? {
        if salt_size != salt.len() {
            return Err(OffcryptError::descriptor("keyData.saltSize does not match saltValue"));
        }
    }
    Ok(AgileKeyData {
        salt,
        block_size: attrs.number("blockSize")?,
        key_bits: attrs.number("keyBits")?,
        hash_size: attrs
            .optional_number("hashSize")?
            .unwrap_or(hash_algorithm.digest_len()),
        hash_algorithm,
        cipher_algorithm: attrs.string("cipherAlgorithm")?,
        cipher_chaining: attrs.string("cipherChaining")?,
    })
}

fn parse_password_encryptor(attrs: &Attrs) -> Result<PasswordKeyEncryptor> {
    let hash_algorithm = attrs.hash_algorithm()?;
    Ok(PasswordKeyEncryptor {
        spin_count: attrs.number("spinCount")?,
        salt: attrs.base64("saltValue")?,
        block_size: attrs.number("blockSize")?,
        key_bits: attrs.number("keyBits")?,
        hash_size: attrs
            .optional_number("hashSize")?
            .unwrap_or(hash_algorithm.digest_len()),
        hash_algorithm,
        cipher_algorithm: attrs.string("cipherAlgorithm")?,
        cipher_chaining: attrs.string("cipherChaining")?,
        encrypted_verifier_hash_input: attrs.base64("encryptedVerifierHashInput")?,
        encrypted_verifier_hash_value: attrs.base64("encryptedVerifierHashValue")?,
        encrypted_key_value: attrs.base64("encryptedKeyValue")?,
    })
}

/// Attributes of one element keyed by local name.
struct Attrs(Vec<(Vec<u8>, String)>);

impl Attrs {
    fn collect(e: &BytesStart<'_>) -> Result<Self> {
        let mut out = Vec::new();
        for attr in e.attributes().with_checks(false) {
            let attr = attr.map_err(|_| OffcryptError::descriptor("invalid XML attribute"))?;
            let value = std::str::from_utf8(attr.value.as_ref())
                .map_err(|_| OffcryptError::descriptor("invalid UTF-8 attribute value"))?;
            out.push((local_name(attr.key.as_ref()).to_vec(), value.to_string()));
        }
        Ok(Self(out))
    }

    fn get(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(key, _)| key.as_slice() == name.as_bytes())
            .map(|(_, value)| value.as_str())
    }

    fn required(&self, name: &str) -> Result<&str> {
        self.get(name).ok_or_else(|| {
            log::debug!("agile descriptor element is missing attribute {name}");
            OffcryptError::descriptor("missing required attribute")
        })
    }

    fn string(&self, name: &str) -> Result<String> {
        self.required(name).map(|s| s.trim().to_string())
    }

    fn base64(&self, name: &str) -> Result<Vec<u8>> {
        decode_b64_attr(self.required(name)?)
    }

    fn number<T: FromStr>(&self, name: &str) -> Result<T> {
        self.required(name)?
            .trim()
            .parse()
            .map_err(|_| OffcryptError::descriptor("invalid numeric attribute"))
    }

    fn optional_number<T: FromStr>(&self, name: &str) -> Result<Option<T>> {
        if self.get(name).is_none() {
            return Ok(None);
        }
        self.number(name).map(Some)
    }

    fn hash_algorithm(&self) -> Result<HashAlgorithm> {
        HashAlgorithm::parse_offcrypto_name(self.required("hashAlgorithm")?)
    }
}

#[derive(Debug, Clone)]
struct NamespaceFrame {
    decls: Vec<(Vec<u8> /* prefix */, Vec<u8> /* uri */)>,
}

fn push_namespace_frame(stack: &mut Vec<NamespaceFrame>, elem: &BytesStart<'_>) -> Result<()> {
    let mut frame = NamespaceFrame { decls: Vec::new() };
    for attr in elem.attributes().with_checks(false) {
        let attr = attr.map_err(|_| OffcryptError::descriptor("invalid XML attribute"))?;
        let key = attr.key.as_ref();
        if key == b"xmlns" {
            frame.decls.push((Vec::new(), attr.value.to_vec()));
        } else if let Some(prefix) = key.strip_prefix(b"xmlns:") {
            frame.decls.push((prefix.to_vec(), attr.value.to_vec()));
        }
    }
    stack.push(frame);
    Ok(())
}

fn resolve_namespace_uri<'a>(stack: &'a [NamespaceFrame], prefix: &[u8]) -> Option<&'a [u8]> {
    stack
        .iter()
        .rev()
        .flat_map(|frame| frame.decls.iter())
        .find(|(p, _)| p.as_slice() == prefix)
        .map(|(_, uri)| uri.as_slice())
}

fn element_prefix(name: &[u8]) -> &[u8] {
    name.iter()
        .rposition(|b| *b == b':')
        .map(|idx| &name[..idx])
        .unwrap_or(&[])
}

fn local_name(name: &[u8]) -> &[u8] {
    name.iter()
        .rposition(|b| *b == b':')
        .map(|idx| &name[idx + 1..])
        .unwrap_or(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encryption_info::{EncryptionDescriptor, Scheme};

    fn with_version_header(xml: &str) -> Vec<u8> {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&4u16.to_le_bytes());
        bytes.extend_from_slice(&4u16.to_le_bytes());
        bytes.extend_from_slice(&0x40u32.to_le_bytes());
        bytes.extend_from_slice(xml.as_bytes());
        bytes
    }

    fn fixture() -> AgileDescriptor {
        AgileDescriptor::new(
            AgileKeyData::new(vec![1; 16], 256, HashAlgorithm::Sha512),
            Some(AgileDataIntegrity {
                encrypted_hmac_key: vec![2; 64],
                encrypted_hmac_value: vec![3; 64],
            }),
            PasswordKeyEncryptor {
                spin_count: 100_000,
                salt: vec![4; 16],
                block_size: 16,
                key_bits: 256,
                hash_size: 64,
                hash_algorithm: HashAlgorithm::Sha512,
                cipher_algorithm: "AES".to_string(),
                cipher_chaining: "ChainingModeCBC".to_string(),
                encrypted_verifier_hash_input: vec![5; 16],
                encrypted_verifier_hash_value: vec![6; 64],
                encrypted_key_value: vec![7; 32],
            },
        )
    }

    #[test]
    fn serialize_then_parse_preserves_fields() {
        let original = fixture();
        let bytes = original.to_bytes().unwrap();
        assert_eq!(&bytes[..8], &[4, 0, 4, 0, 0x40, 0, 0, 0]);
        assert!(bytes[8..].starts_with(b"<?xml version=\"1.0\" encoding=\"UTF-8\" standalone=\"yes\"?>\r\n"));

        let parsed = EncryptionDescriptor::parse(&bytes).unwrap();
        assert_eq!(parsed.scheme(), Scheme::Agile);
        assert_eq!(parsed, EncryptionDescriptor::Agile(original));
    }

    #[test]
    fn parses_pretty_printed_descriptor_with_certificate_encryptor() {
        // Unpadded base64 with embedded whitespace, as written by some producers.
        let xml = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<encryption xmlns="http://schemas.microsoft.com/office/2006/encryption"
    xmlns:p="http://schemas.microsoft.com/office/2006/keyEncryptor/password"
    xmlns:c="http://schemas.microsoft.com/office/2006/keyEncryptor/certificate">
  <keyData saltSize="16" blockSize="16" keyBits="128" hashSize="20" cipherAlgorithm="AES"
    cipherChaining="ChainingModeCBC" hashAlgorithm="SHA1" saltValue="AAECAwQF BgcICQoLDA0ODw"/>
  <dataIntegrity encryptedHmacKey="AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA"
    encryptedHmacValue="AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA"/>
  <keyEncryptors>
    <keyEncryptor uri="http://schemas.microsoft.com/office/2006/keyEncryptor/certificate">
      <c:encryptedKey encryptedKeyValue="AAAA" x509Certificate="AAAA" certVerifier="AAAA"/>
    </keyEncryptor>
    <keyEncryptor uri="http://schemas.microsoft.com/office/2006/keyEncryptor/password">
      <p:encryptedKey spinCount="100000" saltSize="16" blockSize="16" keyBits="128"
        hashSize="20" cipherAlgorithm="AES" cipherChaining="ChainingModeCBC"
        hashAlgorithm="SHA1" saltValue="AQIDBAUGBwgJCgsMDQ4PEA=="
        encryptedVerifierHashInput="AAAAAAAAAAAAAAAAAAAAAA=="
        encryptedVerifierHashValue="AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA="
        encryptedKeyValue="AAAAAAAAAAAAAAAAAAAAAA=="/>
    </keyEncryptor>
  </keyEncryptors>
</encryption>
"#;
        let parsed = EncryptionDescriptor::parse(&with_version_header(xml)).unwrap();
        let EncryptionDescriptor::Agile(info) = parsed else {
            panic!("expected Agile descriptor");
        };
        assert_eq!(info.key_data.salt, (0u8..16).collect::<Vec<_>>());
        assert_eq!(info.key_data.hash_algorithm, HashAlgorithm::Sha1);
        assert_eq!(info.key_data.key_bits, 128);
        assert_eq!(info.password.spin_count, 100_000);
        assert_eq!(info.password.salt, (1u8..=16).collect::<Vec<_>>());
        assert_eq!(info.password.encrypted_verifier_hash_value.len(), 32);
        assert!(info.data_integrity.is_some());
    }

    #[test]
    fn encrypted_key_outside_password_namespace_is_ignored() {
        let xml = r#"<encryption xmlns="http://schemas.microsoft.com/office/2006/encryption"
    xmlns:c="http://schemas.microsoft.com/office/2006/keyEncryptor/certificate">
  <keyData saltSize="16" blockSize="16" keyBits="128" hashSize="20" cipherAlgorithm="AES"
    cipherChaining="ChainingModeCBC" hashAlgorithm="SHA1" saltValue="AAECAwQFBgcICQoLDA0ODw=="/>
  <keyEncryptors><keyEncryptor uri="x"><c:encryptedKey encryptedKeyValue="AAAA"/></keyEncryptor></keyEncryptors>
</encryption>"#;
        let err = EncryptionDescriptor::parse(&with_version_header(xml)).unwrap_err();
        assert!(matches!(err, OffcryptError::InvalidDescriptor { .. }));
    }

    fn reparse(mutate: impl FnOnce(&mut AgileDescriptor)) -> Result<EncryptionDescriptor> {
        let mut info = fixture();
        mutate(&mut info);
        EncryptionDescriptor::parse(&info.to_bytes().unwrap())
    }

    #[test]
    fn rejects_out_of_range_fields() {
        assert!(reparse(|_| {}).is_ok());
        assert!(reparse(|i| i.password.spin_count = 0).is_err());
        assert!(reparse(|i| i.password.spin_count = 10_000_001).is_err());
        assert!(reparse(|i| i.password.salt = vec![0; 8]).is_err());
        assert!(reparse(|i| i.key_data.key_bits = 100).is_err());
        assert!(reparse(|i| i.key_data.cipher_algorithm = "RC2".to_string()).is_err());
        assert!(reparse(|i| i.password.cipher_chaining = "ChainingModeCFB".to_string()).is_err());
        assert!(reparse(|i| i.key_data.hash_size = 20).is_err());
        assert!(reparse(|i| i.password.encrypted_key_value = vec![0; 17]).is_err());
        assert!(reparse(|i| i.password.encrypted_verifier_hash_value = vec![0; 16]).is_err());
    }

    #[test]
    fn missing_data_integrity_is_tolerated() {
        let parsed = reparse(|i| i.data_integrity = None).unwrap();
        let EncryptionDescriptor::Agile(info) = parsed else {
            panic!("expected Agile descriptor");
        };
        assert!(info.data_integrity.is_none());
    }

    #[test]
    fn garbage_xml_is_invalid_descriptor() {
        for xml in ["", "<", "<encryption>", "\u{0}\u{1}", "<encryption><keyData/></encryption>"] {
            let err = EncryptionDescriptor::parse(&with_version_header(xml)).unwrap_err();
            assert!(
                matches!(err, OffcryptError::InvalidDescriptor { .. }),
                "{xml:?}: {err:?}"
            );
        }
    }
}
