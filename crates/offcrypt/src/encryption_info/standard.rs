use super::EncryptionVersion;
use crate::error::{OffcryptError, Result};
use crate::util::{utf16le_bytes, Reader};

// CryptoAPI algorithm identifiers used by Standard encryption.
pub const CALG_AES_128: u32 = 0x0000_660E;
pub const CALG_AES_192: u32 = 0x0000_660F;
pub const CALG_AES_256: u32 = 0x0000_6610;
pub const CALG_SHA1: u32 = 0x0000_8004;
/// `PROV_RSA_AES` provider type.
pub const PROV_RSA_AES: u32 = 0x0000_0018;
pub const STANDARD_CSP_NAME: &str = "Microsoft Enhanced RSA and AES Cryptographic Provider";

const F_CRYPTOAPI: u32 = 0x04;
const F_EXTERNAL: u32 = 0x10;
const F_AES: u32 = 0x20;

const SALT_LEN: usize = 16;
const SHA1_LEN: u32 = 20;
/// A SHA-1 verifier hash padded to the AES block size.
const ENCRYPTED_VERIFIER_HASH_LEN: usize = 32;
const HEADER_FIXED_LEN: usize = 8 * 4;

/// Standard `EncryptionHeader`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StandardHeader {
    pub flags: u32,
    pub size_extra: u32,
    pub alg_id: u32,
    pub alg_id_hash: u32,
    pub key_bits: u32,
    pub provider_type: u32,
    pub reserved1: u32,
    pub reserved2: u32,
    pub csp_name: String,
}

/// Standard `EncryptionVerifier`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StandardVerifier {
    pub salt: Vec<u8>,
    pub encrypted_verifier: [u8; 16],
    pub verifier_hash_size: u32,
    pub encrypted_verifier_hash: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StandardDescriptor {
    pub version: EncryptionVersion,
    pub header: StandardHeader,
    pub verifier: StandardVerifier,
}

impl StandardDescriptor {
    /// Build the descriptor Office 2007 SP2 writes: version 4.2, AES-128, SHA-1,
    /// `PROV_RSA_AES` and the enhanced AES provider name.
    pub fn new(
        salt: [u8; 16],
        encrypted_verifier: [u8; 16],
        encrypted_verifier_hash: [u8; ENCRYPTED_VERIFIER_HASH_LEN],
    ) -> Self {
        Self {
            version: EncryptionVersion {
                major: 4,
                minor: 2,
                flags: F_CRYPTOAPI | F_AES,
            },
            header: StandardHeader {
                flags: F_CRYPTOAPI | F_AES,
                size_extra: 0,
                alg_id: CALG_AES_128,
                alg_id_hash: CALG_SHA1,
                key_bits: 128,
                provider_type: PROV_RSA_AES,
                reserved1: 0,
                reserved2: 0,
                csp_name: STANDARD_CSP_NAME.to_string(),
            },
            verifier: StandardVerifier {
                salt: salt.to_vec(),
                encrypted_verifier,
                verifier_hash_size: SHA1_LEN,
                encrypted_verifier_hash: encrypted_verifier_hash.to_vec(),
            },
        }
    }

    pub(crate) fn parse(version: EncryptionVersion, r: &mut Reader<'_>) -> Result<Self> {
        if version.flags & F_EXTERNAL != 0 {
            return Err(OffcryptError::descriptor(
                "extensible (fExternal) encryption is not supported",
            ));
        }

        let header_size = r.read_u32_le("EncryptionInfo.headerSize")? as usize;
        if header_size < HEADER_FIXED_LEN {
            return Err(OffcryptError::descriptor("EncryptionHeader is too short"));
        }
        let header_bytes = r.take(header_size, "EncryptionHeader")?;
        let mut hr = Reader::new(header_bytes, OffcryptError::descriptor);
        let header = StandardHeader {
            flags: hr.read_u32_le("EncryptionHeader.flags")?,
            size_extra: hr.read_u32_le("EncryptionHeader.sizeExtra")?,
            alg_id: hr.read_u32_le("EncryptionHeader.algId")?,
            alg_id_hash: hr.read_u32_le("EncryptionHeader.algIdHash")?,
            key_bits: hr.read_u32_le("EncryptionHeader.keySize")?,
            provider_type: hr.read_u32_le("EncryptionHeader.providerType")?,
            reserved1: hr.read_u32_le("EncryptionHeader.reserved1")?,
            reserved2: hr.read_u32_le("EncryptionHeader.reserved2")?,
            csp_name: decode_csp_name(hr.remaining()),
        };

        // algId 0 means "implied by the flags"; with fAES that is AES-128.
        let expected_bits = match header.alg_id {
            CALG_AES_128 => 128,
            CALG_AES_192 => 192,
            CALG_AES_256 => 256,
            0 if header.flags & F_AES != 0 => 128,
            _ => {
                return Err(OffcryptError::descriptor(
                    "Standard encryption supports only AES algIds",
                ))
            }
        };
        if header.key_bits != expected_bits {
            return Err(OffcryptError::descriptor(
                "EncryptionHeader.keySize does not match algId",
            ));
        }
        if header.alg_id_hash != CALG_SHA1 && header.alg_id_hash != 0 {
            return Err(OffcryptError::descriptor(
                "Standard encryption requires SHA-1 (algIdHash)",
            ));
        }

        let salt_size = r.read_u32_le("EncryptionVerifier.saltSize")? as usize;
        if salt_size != SALT_LEN {
            return Err(OffcryptError::descriptor("EncryptionVerifier.saltSize must be 16"));
        }
        let salt = r.take(SALT_LEN, "EncryptionVerifier.salt")?.to_vec();
        let mut encrypted_verifier = [0u8; 16];
        encrypted_verifier.copy_from_slice(r.take(16, "EncryptionVerifier.encryptedVerifier")?);
        let verifier_hash_size = r.read_u32_le("EncryptionVerifier.verifierHashSize")?;
        if verifier_hash_size != SHA1_LEN {
            return Err(OffcryptError::descriptor(
                "EncryptionVerifier.verifierHashSize must be 20",
            ));
        }
        let encrypted_verifier_hash = r
            .take(
                ENCRYPTED_VERIFIER_HASH_LEN,
                "EncryptionVerifier.encryptedVerifierHash",
            )?
            .to_vec();

        if !r.remaining().is_empty() {
            log::trace!(
                "ignoring {} trailing bytes after EncryptionVerifier",
                r.remaining().len()
            );
        }

        Ok(Self {
            version,
            header,
            verifier: StandardVerifier {
                salt,
                encrypted_verifier,
                verifier_hash_size,
                encrypted_verifier_hash,
            },
        })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let h = &self.header;
        let mut header = Vec::with_capacity(HEADER_FIXED_LEN + 2 * (h.csp_name.len() + 1));
        for field in [
            h.flags,
            h.size_extra,
            h.alg_id,
            h.alg_id_hash,
            h.key_bits,
            h.provider_type,
            h.reserved1,
            h.reserved2,
        ] {
            header.extend_from_slice(&field.to_le_bytes());
        }
        header.extend_from_slice(&utf16le_bytes(&h.csp_name));
        header.extend_from_slice(&[0, 0]);

        let v = &self.verifier;
        let mut out = Vec::with_capacity(EncryptionVersion::LEN + 4 + header.len() + 92);
        self.version.write(&mut out);
        out.extend_from_slice(&(header.len() as u32).to_le_bytes());
        out.extend_from_slice(&header);
        out.extend_from_slice(&(v.salt.len() as u32).to_le_bytes());
        out.extend_from_slice(&v.salt);
        out.extend_from_slice(&v.encrypted_verifier);
        out.extend_from_slice(&v.verifier_hash_size.to_le_bytes());
        out.extend_from_slice(&v.encrypted_verifier_hash);
        out
    }
}

/// CSPName is informational; decode it leniently up to the first NUL.
fn decode_csp_name(bytes: &[u8]) -> String {
    let units: Vec<u16> = bytes
        .chunks_exact(2)
        .map(|c| u16::from_le_bytes([c[0], c[1]]))
        .take_while(|u| *u != 0)
        .collect();
    String::from_utf16_lossy(&units)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encryption_info::{EncryptionDescriptor, Scheme};

    fn fixture() -> StandardDescriptor {
        StandardDescriptor::new([0x11; 16], [0x22; 16], [0x33; 32])
    }

    #[test]
    fn serialized_layout_matches_office_defaults() {
        let bytes = fixture().to_bytes();
        assert_eq!(&bytes[..8], &[4, 0, 2, 0, 0x24, 0, 0, 0]);
        let header_size = u32::from_le_bytes(bytes[8..12].try_into().unwrap()) as usize;
        // 8 DWORDs + CSP name + NUL terminator.
        assert_eq!(header_size, 32 + (STANDARD_CSP_NAME.len() + 1) * 2);
        assert_eq!(&bytes[12..16], &0x24u32.to_le_bytes());
        assert_eq!(&bytes[20..24], &CALG_AES_128.to_le_bytes());
        assert_eq!(&bytes[24..28], &CALG_SHA1.to_le_bytes());
        assert_eq!(&bytes[28..32], &128u32.to_le_bytes());
        assert_eq!(&bytes[32..36], &PROV_RSA_AES.to_le_bytes());
        // saltSize + salt + verifier + hashSize + hash
        assert_eq!(bytes.len(), 12 + header_size + 4 + 16 + 16 + 4 + 32);
    }

    #[test]
    fn parse_roundtrips_fields() {
        let original = fixture();
        let parsed = EncryptionDescriptor::parse(&original.to_bytes()).unwrap();
        assert_eq!(parsed.scheme(), Scheme::Standard);
        assert_eq!(parsed, EncryptionDescriptor::Standard(original));
        assert_eq!(parsed.key_bits(), 128);
        assert_eq!(parsed.spin_count(), 50_000);
    }

    #[test]
    fn every_truncation_is_an_error() {
        let bytes = fixture().to_bytes();
        for len in 0..bytes.len() {
            let err = EncryptionDescriptor::parse(&bytes[..len]).unwrap_err();
            assert!(
                matches!(err, OffcryptError::InvalidDescriptor { .. }),
                "len={len}: {err:?}"
            );
        }
    }

    #[test]
    fn rejects_rc4_and_mismatched_parameters() {
        let mut rc4 = fixture();
        rc4.header.alg_id = 0x6801;
        assert!(EncryptionDescriptor::parse(&rc4.to_bytes()).is_err());

        let mut key_size = fixture();
        key_size.header.key_bits = 256;
        assert!(EncryptionDescriptor::parse(&key_size.to_bytes()).is_err());

        let mut salt = fixture();
        salt.verifier.salt = vec![0; 8];
        assert!(EncryptionDescriptor::parse(&salt.to_bytes()).is_err());

        let mut external = fixture();
        external.version.flags |= F_EXTERNAL;
        assert!(EncryptionDescriptor::parse(&external.to_bytes()).is_err());
    }

    #[test]
    fn accepts_empty_csp_name_and_version_3_2() {
        let mut info = fixture();
        info.version.major = 3;
        info.header.csp_name.clear();
        let parsed = EncryptionDescriptor::parse(&info.to_bytes()).unwrap();
        let EncryptionDescriptor::Standard(parsed) = parsed else {
            panic!("expected Standard descriptor");
        };
        assert_eq!(parsed.version.major, 3);
        assert_eq!(parsed.header.csp_name, "");
    }
}
