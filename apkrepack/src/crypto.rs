// SPDX-FileCopyrightText: 2026 Andrew Gunnerson
// SPDX-License-Identifier: GPL-3.0-only

use std::{
    env::{self, VarError},
    ffi::{OsStr, OsString},
    fs::{self, File, OpenOptions},
    io::{self, Read, Write},
    path::{Path, PathBuf},
    time::Duration,
};

use cms::{
    cert::{CertificateChoices, IssuerAndSerialNumber},
    content_info::{CmsVersion, ContentInfo},
    signed_data::{
        CertificateSet, DigestAlgorithmIdentifiers, EncapsulatedContentInfo, SignatureValue,
        SignedData, SignerIdentifier, SignerInfo, SignerInfos,
    },
};
use passterm::PromptError;
use pkcs8::{
    DecodePrivateKey, EncodePrivateKey, EncodePublicKey, EncryptedPrivateKeyInfo, LineEnding,
    PrivateKeyInfo,
    pkcs5::{pbes2, scrypt},
};
use rand::RngCore;
use rsa::{Pkcs1v15Sign, RsaPrivateKey, RsaPublicKey, pkcs1v15::SigningKey, traits::PublicKeyParts};
use sha2::{Digest, Sha256};
use thiserror::Error;
use x509_cert::{
    Certificate,
    builder::{Builder, CertificateBuilder, Profile},
    der::{Any, Decode, DecodePem, Encode, EncodePem, pem::PemLabel, referenced::OwnedToRef},
    serial_number::SerialNumber,
    spki::{AlgorithmIdentifierOwned, SubjectPublicKeyInfoOwned},
    time::Validity,
};

const PEM_LABEL_CERTIFICATE: &str = "CERTIFICATE";
const PEM_LABEL_PRIVATE_KEY: &str = "PRIVATE KEY";
const PEM_LABEL_ENCRYPTED_PRIVATE_KEY: &str = "ENCRYPTED PRIVATE KEY";

#[derive(Debug, Error)]
pub enum Error {
    #[error("RSA key size ({} bits) not supported", .0 * 8)]
    UnsupportedKeySize(usize),
    #[error("Invalid SHA-256 digest length: {0} bytes")]
    InvalidDigestLength(usize),
    #[error("Passphrase prompt requires an interactive terminal")]
    NotInteractive(#[source] io::Error),
    #[error("Failed to prompt for passphrase")]
    PassphrasePrompt(#[source] PromptError),
    #[error("Passphrases do not match")]
    ConfirmPassphrase,
    #[error("Failed to read environment variable: {0:?}")]
    InvalidEnvVar(OsString, #[source] VarError),
    #[error("PEM block {0:?} has start tag, but no end tag")]
    PemNoEndTag(String),
    #[error("Keystore {0:?} does not contain a certificate")]
    KeystoreNoCertificate(PathBuf),
    #[error("Keystore {0:?} does not contain a private key")]
    KeystoreNoPrivateKey(PathBuf),
    #[error("Keystore {0:?} contains more than one private key")]
    KeystoreMultipleKeys(PathBuf),
    #[error("Failed to load encrypted RSA private key")]
    LoadKeyEncrypted(#[source] pkcs8::Error),
    #[error("Failed to load unencrypted RSA private key")]
    LoadKeyUnencrypted(#[source] pkcs8::Error),
    #[error("Invalid scrypt parameters")]
    ScryptParams,
    #[error("Invalid PBES2 parameters: {0}")]
    Pbes2Params(pkcs8::pkcs5::Error),
    #[error("Failed to save encrypted RSA private key")]
    SaveKeyEncrypted(#[source] pkcs8::Error),
    #[error("Failed to save unencrypted RSA private key")]
    SaveKeyUnencrypted(#[source] pkcs8::Error),
    #[error("Failed to load RSA public key")]
    LoadPubKey(#[source] pkcs8::spki::Error),
    #[error("Failed to save RSA public key")]
    SavePubKey(#[source] pkcs8::spki::Error),
    #[error("Failed to load X509 certificate")]
    LoadCert(#[source] x509_cert::der::Error),
    #[error("Failed to save X509 certificate")]
    SaveCert(#[source] x509_cert::der::Error),
    #[error("Failed to generate RSA key")]
    RsaGenerate(#[source] Box<rsa::Error>),
    #[error("Failed to RSA sign digest")]
    RsaSign(#[source] Box<rsa::Error>),
    #[error("Failed to generate X509 certificate")]
    CertGenerate(#[source] x509_cert::builder::Error),
    #[error("Invalid parameters for X509 certificate generation")]
    CertParams(#[source] x509_cert::der::Error),
    #[error("Failed to CMS sign data")]
    CmsSign(#[source] x509_cert::der::Error),
    #[error("Failed to parse CMS signature")]
    CmsParse(#[source] x509_cert::der::Error),
    #[error("Failed to read file: {0:?}")]
    ReadFile(PathBuf, #[source] io::Error),
    #[error("Failed to write file: {0:?}")]
    WriteFile(PathBuf, #[source] io::Error),
}

type Result<T> = std::result::Result<T, Error>;

#[derive(Clone, Debug)]
pub enum PassphraseSource {
    Prompt(String),
    EnvVar(OsString),
    File(PathBuf),
}

impl PassphraseSource {
    pub fn new(key_file: &Path, pass_file: Option<&Path>, env_var: Option<&OsStr>) -> Self {
        #[allow(clippy::option_if_let_else)]
        if let Some(v) = env_var {
            Self::EnvVar(v.to_owned())
        } else if let Some(p) = pass_file {
            Self::File(p.to_owned())
        } else {
            Self::Prompt(format!("Enter passphrase for {key_file:?}: "))
        }
    }

    fn prompt(prompt: &str) -> Result<String> {
        match passterm::prompt_password_tty(Some(prompt)) {
            Ok(p) => Ok(p),
            Err(e) => {
                #[cfg(unix)]
                if let PromptError::IOError(io_e) = e {
                    if let Some(errno) = io_e.raw_os_error() {
                        if errno == libc::ENXIO || errno == libc::ENOTTY {
                            return Err(Error::NotInteractive(io_e));
                        }
                    }

                    return Err(Error::PassphrasePrompt(PromptError::IOError(io_e)));
                }

                Err(Error::PassphrasePrompt(e))
            }
        }
    }

    pub fn acquire(&self, confirm: bool) -> Result<String> {
        let passphrase = match self {
            Self::Prompt(p) => {
                let first = Self::prompt(p)?;

                if confirm {
                    let second = Self::prompt("Confirm: ")?;

                    if first != second {
                        return Err(Error::ConfirmPassphrase);
                    }
                }

                first
            }
            Self::EnvVar(v) => env::var(v).map_err(|e| Error::InvalidEnvVar(v.clone(), e))?,
            Self::File(p) => fs::read_to_string(p)
                .map_err(|e| Error::ReadFile(p.clone(), e))?
                .trim_end_matches(['\r', '\n'])
                .to_owned(),
        };

        Ok(passphrase)
    }
}

fn check_key_size(size: usize) -> Result<()> {
    // RustCrypto does not support 8192-bit keys and Android rejects anything
    // below 2048 bits.
    if !(2048 / 8..=4096 / 8).contains(&size) {
        return Err(Error::UnsupportedKeySize(size));
    }

    Ok(())
}

/// Sign a SHA-256 digest with RSASSA-PKCS1-v1_5.
pub fn sign_sha256(key: &RsaPrivateKey, digest: &[u8]) -> Result<Vec<u8>> {
    if digest.len() != Sha256::output_size() {
        return Err(Error::InvalidDigestLength(digest.len()));
    }

    check_key_size(key.size())?;

    key.sign(Pkcs1v15Sign::new::<Sha256>(), digest)
        .map_err(|e| Error::RsaSign(Box::new(e)))
}

/// Generate an RSA key pair of the given size.
pub fn generate_rsa_key_pair(bits: usize) -> Result<RsaPrivateKey> {
    check_key_size(bits / 8)?;

    let mut rng = rand::thread_rng();
    let key = RsaPrivateKey::new(&mut rng, bits).map_err(|e| Error::RsaGenerate(Box::new(e)))?;

    Ok(key)
}

/// Generate a self-signed certificate.
pub fn generate_cert(
    key: &RsaPrivateKey,
    serial: u64,
    validity: Duration,
    subject: &str,
) -> Result<Certificate> {
    let public_key_der = key
        .to_public_key()
        .to_public_key_der()
        .map_err(Error::SavePubKey)?;
    let signing_key = SigningKey::<Sha256>::new(key.clone());

    let builder = CertificateBuilder::new(
        Profile::Root,
        SerialNumber::from(serial),
        Validity::from_now(validity).map_err(Error::CertParams)?,
        subject.parse().map_err(Error::CertParams)?,
        SubjectPublicKeyInfoOwned::from_der(public_key_der.as_bytes())
            .map_err(Error::CertParams)?,
        &signing_key,
    )
    .map_err(Error::CertGenerate)?;

    let mut rng = rand::thread_rng();
    let cert = builder
        .build_with_rng(&mut rng)
        .map_err(Error::CertGenerate)?;

    Ok(cert)
}

/// A single PEM block with its base64 body rewrapped to 64 columns.
struct PemBlock {
    label: String,
    text: String,
}

/// x509_cert/pem follow rfc7468 strictly instead of implementing a lenient
/// parser. The PEM decoder rejects lines in the base64 section that are longer
/// than 64 characters, excluding whitespace. Split the data into blocks and
/// rewrap each one so that certificates from other tools still load. Text
/// outside of blocks is ignored.
fn split_pem(data: &str) -> Result<Vec<PemBlock>> {
    let mut blocks = vec![];
    let mut current: Option<(String, String)> = None;
    let mut base64 = String::new();

    for line in data.lines().map(str::trim_end) {
        if let Some(label) = line
            .strip_prefix("-----BEGIN ")
            .and_then(|l| l.strip_suffix("-----"))
        {
            if let Some((label, _)) = current {
                return Err(Error::PemNoEndTag(label));
            }

            current = Some((label.to_owned(), format!("{line}\n")));
        } else if line.starts_with("-----END ") {
            let Some((label, mut text)) = current.take() else {
                continue;
            };

            // Headers like Proc-Type are kept as-is.
            let (headers, body): (Vec<_>, Vec<_>) =
                base64.lines().partition(|l| l.contains(':'));
            for header in &headers {
                text.push_str(header);
                text.push('\n');
            }
            if !headers.is_empty() {
                text.push('\n');
            }

            let body = body.concat();
            for chunk in body.as_bytes().chunks(64) {
                text.push_str(&String::from_utf8_lossy(chunk));
                text.push('\n');
            }

            text.push_str(line);
            text.push('\n');

            base64.clear();
            blocks.push(PemBlock { label, text });
        } else if current.is_some() && !line.is_empty() {
            base64.push_str(line.trim_start());
            base64.push('\n');
        }
    }

    if let Some((label, _)) = current {
        return Err(Error::PemNoEndTag(label));
    }

    Ok(blocks)
}

fn parse_pem_key(text: &str, encrypted: bool, source: &PassphraseSource) -> Result<RsaPrivateKey> {
    if encrypted {
        let passphrase = source.acquire(false)?;

        RsaPrivateKey::from_pkcs8_encrypted_pem(text, passphrase).map_err(Error::LoadKeyEncrypted)
    } else {
        RsaPrivateKey::from_pkcs8_pem(text).map_err(Error::LoadKeyUnencrypted)
    }
}

fn encode_pem_key(key: &RsaPrivateKey, passphrase: &str) -> Result<String> {
    if passphrase.is_empty() {
        let data = key
            .to_pkcs8_pem(LineEnding::LF)
            .map_err(Error::SaveKeyUnencrypted)?;
        return Ok(data.to_string());
    }

    let mut rng = rand::thread_rng();

    // Normally, we'd just use key.to_pkcs8_encrypted_pem(). However, it uses
    // scrypt with n = 32768. This is high enough that openssl can no longer
    // read the file and craps out with `memory limit exceeded`. Match
    // openssl's defaults instead: N=16384, r=8, p=1 with AES-256-CBC.
    //
    // https://github.com/RustCrypto/formats/issues/1205

    let mut salt = [0u8; 16];
    rng.fill_bytes(&mut salt);

    let mut iv = [0u8; 16];
    rng.fill_bytes(&mut iv);

    // 14 = log_2(16384), 32 bytes = 256 bits
    let scrypt_params = scrypt::Params::new(14, 8, 1, 32).map_err(|_| Error::ScryptParams)?;
    let pbes2_params = pbes2::Parameters::scrypt_aes256cbc(scrypt_params, &salt, &iv)
        .map_err(Error::Pbes2Params)?;

    let plain_text_der = key.to_pkcs8_der().map_err(Error::SaveKeyEncrypted)?;
    let private_key_info =
        PrivateKeyInfo::try_from(plain_text_der.as_bytes()).map_err(Error::SaveKeyEncrypted)?;

    let secret_doc = private_key_info
        .encrypt_with_params(pbes2_params, passphrase)
        .map_err(Error::SaveKeyEncrypted)?;

    let data = secret_doc
        .to_pem(EncryptedPrivateKeyInfo::PEM_LABEL, LineEnding::LF)
        .map_err(pkcs8::Error::Asn1)
        .map_err(Error::SaveKeyEncrypted)?;

    Ok(data.to_string())
}

fn read_string(path: &Path, mut reader: impl Read) -> Result<String> {
    let mut data = String::new();
    reader
        .read_to_string(&mut data)
        .map_err(|e| Error::ReadFile(path.to_owned(), e))?;

    Ok(data)
}

/// Read the first PEM-encoded certificate from a reader.
pub fn read_pem_cert(path: &Path, reader: impl Read) -> Result<Certificate> {
    let data = read_string(path, reader)?;
    let block = split_pem(&data)?
        .into_iter()
        .find(|b| b.label == PEM_LABEL_CERTIFICATE)
        .ok_or_else(|| Error::KeystoreNoCertificate(path.to_owned()))?;

    Certificate::from_pem(block.text).map_err(Error::LoadCert)
}

/// Write PEM-encoded certificate to a writer.
pub fn write_pem_cert(path: &Path, mut writer: impl Write, cert: &Certificate) -> Result<()> {
    let data = cert.to_pem(LineEnding::LF).map_err(Error::SaveCert)?;

    writer
        .write_all(data.as_bytes())
        .map_err(|e| Error::WriteFile(path.to_owned(), e))?;

    Ok(())
}

/// Read PEM-encoded certificate from a file.
pub fn read_pem_cert_file(path: &Path) -> Result<Certificate> {
    let reader = File::open(path).map_err(|e| Error::ReadFile(path.to_owned(), e))?;

    read_pem_cert(path, reader)
}

/// Write PEM-encoded certificate to a file.
pub fn write_pem_cert_file(path: &Path, cert: &Certificate) -> Result<()> {
    let writer = File::create(path).map_err(|e| Error::WriteFile(path.to_owned(), e))?;

    write_pem_cert(path, writer, cert)
}

/// Read PEM-encoded PKCS8 private key from a reader.
pub fn read_pem_key(
    path: &Path,
    reader: impl Read,
    source: &PassphraseSource,
) -> Result<RsaPrivateKey> {
    let data = read_string(path, reader)?;

    parse_pem_key(&data, data.contains("ENCRYPTED"), source)
}

fn create_private_file(path: &Path) -> Result<File> {
    let mut options = OpenOptions::new();
    options.write(true);
    options.create(true);
    options.truncate(true);

    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }

    options
        .open(path)
        .map_err(|e| Error::WriteFile(path.to_owned(), e))
}

/// Write PEM-encoded PKCS8 private key to a writer. An empty passphrase
/// leaves the key unencrypted.
pub fn write_pem_key(
    path: &Path,
    mut writer: impl Write,
    key: &RsaPrivateKey,
    source: &PassphraseSource,
) -> Result<()> {
    let passphrase = source.acquire(true)?;
    let data = encode_pem_key(key, &passphrase)?;

    writer
        .write_all(data.as_bytes())
        .map_err(|e| Error::WriteFile(path.to_owned(), e))?;

    Ok(())
}

/// Read PEM-encoded PKCS8 private key from a file.
pub fn read_pem_key_file(path: &Path, source: &PassphraseSource) -> Result<RsaPrivateKey> {
    let reader = File::open(path).map_err(|e| Error::ReadFile(path.to_owned(), e))?;

    read_pem_key(path, reader, source)
}

/// Save PEM-encoded PKCS8 private key to a file.
pub fn write_pem_key_file(
    path: &Path,
    key: &RsaPrivateKey,
    source: &PassphraseSource,
) -> Result<()> {
    let writer = create_private_file(path)?;

    write_pem_key(path, writer, key, source)
}

/// Read a keystore: a PEM bundle containing the signing certificate and
/// exactly one PKCS8 private key. The key may be encrypted.
pub fn read_pem_keystore(
    path: &Path,
    reader: impl Read,
    source: &PassphraseSource,
) -> Result<(Certificate, RsaPrivateKey)> {
    let data = read_string(path, reader)?;
    let blocks = split_pem(&data)?;

    let cert_block = blocks
        .iter()
        .find(|b| b.label == PEM_LABEL_CERTIFICATE)
        .ok_or_else(|| Error::KeystoreNoCertificate(path.to_owned()))?;
    let cert = Certificate::from_pem(&cert_block.text).map_err(Error::LoadCert)?;

    let mut key_blocks = blocks.iter().filter(|b| {
        b.label == PEM_LABEL_PRIVATE_KEY || b.label == PEM_LABEL_ENCRYPTED_PRIVATE_KEY
    });
    let key_block = key_blocks
        .next()
        .ok_or_else(|| Error::KeystoreNoPrivateKey(path.to_owned()))?;
    if key_blocks.next().is_some() {
        return Err(Error::KeystoreMultipleKeys(path.to_owned()));
    }

    let key = parse_pem_key(
        &key_block.text,
        key_block.label == PEM_LABEL_ENCRYPTED_PRIVATE_KEY,
        source,
    )?;

    Ok((cert, key))
}

/// Read a keystore from a file.
pub fn read_pem_keystore_file(
    path: &Path,
    source: &PassphraseSource,
) -> Result<(Certificate, RsaPrivateKey)> {
    let reader = File::open(path).map_err(|e| Error::ReadFile(path.to_owned(), e))?;

    read_pem_keystore(path, reader, source)
}

/// Write a keystore file containing the certificate followed by the key.
pub fn write_pem_keystore_file(
    path: &Path,
    cert: &Certificate,
    key: &RsaPrivateKey,
    source: &PassphraseSource,
) -> Result<()> {
    let mut writer = create_private_file(path)?;

    write_pem_cert(path, &mut writer, cert)?;
    write_pem_key(path, &mut writer, key, source)
}

/// Get the RSA public key from a certificate.
pub fn get_public_key(cert: &Certificate) -> Result<RsaPublicKey> {
    let public_key =
        RsaPublicKey::try_from(cert.tbs_certificate.subject_public_key_info.owned_to_ref())
            .map_err(Error::LoadPubKey)?;

    Ok(public_key)
}

/// Check if a certificate matches a private key.
pub fn cert_matches_key(cert: &Certificate, key: &RsaPrivateKey) -> Result<bool> {
    let public_key = get_public_key(cert)?;

    Ok(key.to_public_key() == public_key)
}

/// DER-encode a certificate.
pub fn cert_to_der(cert: &Certificate) -> Result<Vec<u8>> {
    cert.to_der().map_err(Error::SaveCert)
}

/// DER-encode the certificate's `SubjectPublicKeyInfo`.
pub fn public_key_info_der(cert: &Certificate) -> Result<Vec<u8>> {
    cert.tbs_certificate
        .subject_public_key_info
        .to_der()
        .map_err(Error::SaveCert)
}

/// Parse a CMS [`SignedData`] structure from raw DER-encoded data.
pub fn parse_cms(data: &[u8]) -> Result<SignedData> {
    let ci = ContentInfo::from_der(data).map_err(Error::CmsParse)?;
    let sd = ci
        .content
        .decode_as::<SignedData>()
        .map_err(Error::CmsParse)?;

    Ok(sd)
}

/// Create a detached CMS signature over `data` in the form expected for JAR
/// signature block files. No signed attributes are included, so the signature
/// covers the raw data only. The signature algorithm is identified as plain
/// `rsaEncryption`, with the digest algorithm carried separately.
pub fn cms_sign_detached(key: &RsaPrivateKey, cert: &Certificate, data: &[u8]) -> Result<Vec<u8>> {
    let digest = Sha256::digest(data);
    let signature = sign_sha256(key, &digest)?;

    let digest_algorithm = AlgorithmIdentifierOwned {
        oid: const_oid::db::rfc5912::ID_SHA_256,
        parameters: None,
    };

    let signed_data = SignedData {
        version: CmsVersion::V1,
        digest_algorithms: DigestAlgorithmIdentifiers::try_from(vec![digest_algorithm.clone()])
            .map_err(Error::CmsSign)?,
        encap_content_info: EncapsulatedContentInfo {
            econtent_type: const_oid::db::rfc5911::ID_DATA,
            econtent: None,
        },
        certificates: Some(
            CertificateSet::try_from(vec![CertificateChoices::Certificate(cert.clone())])
                .map_err(Error::CmsSign)?,
        ),
        crls: None,
        signer_infos: SignerInfos::try_from(vec![SignerInfo {
            version: CmsVersion::V1,
            sid: SignerIdentifier::IssuerAndSerialNumber(IssuerAndSerialNumber {
                issuer: cert.tbs_certificate.issuer.clone(),
                serial_number: cert.tbs_certificate.serial_number.clone(),
            }),
            digest_alg: digest_algorithm,
            signed_attrs: None,
            signature_algorithm: AlgorithmIdentifierOwned {
                oid: const_oid::db::rfc5912::RSA_ENCRYPTION,
                parameters: None,
            },
            signature: SignatureValue::new(signature).map_err(Error::CmsSign)?,
            unsigned_attrs: None,
        }])
        .map_err(Error::CmsSign)?,
    };

    let content_info = ContentInfo {
        content_type: const_oid::db::rfc5911::ID_SIGNED_DATA,
        content: Any::encode_from(&signed_data).map_err(Error::CmsSign)?,
    };

    content_info.to_der().map_err(Error::CmsSign)
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use rsa::{Pkcs1v15Sign, traits::PublicKeyParts};
    use sha2::{Digest, Sha256};

    use super::*;

    const DEBUG_PEM: &str = include_str!("../assets/debug.pem");

    fn debug_keystore() -> (Certificate, RsaPrivateKey) {
        read_pem_keystore(
            Path::new("debug.pem"),
            DEBUG_PEM.as_bytes(),
            &PassphraseSource::EnvVar("APKREPACK_UNUSED".into()),
        )
        .unwrap()
    }

    #[test]
    fn load_debug_keystore() {
        let (cert, key) = debug_keystore();

        assert_eq!(key.size(), 256);
        assert!(cert_matches_key(&cert, &key).unwrap());
    }

    #[test]
    fn rewrap_long_pem_lines() {
        let (cert, _) = debug_keystore();
        let pem = cert.to_pem(LineEnding::LF).unwrap();

        // Join the base64 body into a single long line.
        let lines = pem.lines().collect::<Vec<_>>();
        let joined = format!(
            "junk before\n{}\n{}\n{}\n",
            lines[0],
            lines[1..lines.len() - 1].concat(),
            lines[lines.len() - 1],
        );

        let parsed = read_pem_cert(Path::new("cert.pem"), joined.as_bytes()).unwrap();
        assert_eq!(parsed, cert);
    }

    #[test]
    fn reject_unterminated_pem() {
        let data = "-----BEGIN CERTIFICATE-----\nAAAA\n";

        assert!(matches!(
            read_pem_cert(Path::new("cert.pem"), data.as_bytes()),
            Err(Error::PemNoEndTag(_)),
        ));
    }

    #[test]
    fn detached_cms_signature() {
        let (cert, key) = debug_keystore();
        let data = b"Signature-Version: 1.0\r\n\r\n";

        let der = cms_sign_detached(&key, &cert, data).unwrap();
        // Signing is deterministic for PKCS#1 v1.5.
        assert_eq!(der, cms_sign_detached(&key, &cert, data).unwrap());

        let sd = parse_cms(&der).unwrap();
        assert!(sd.encap_content_info.econtent.is_none());

        let signer = sd.signer_infos.0.iter().next().unwrap();
        assert_eq!(
            signer.signature_algorithm.oid,
            const_oid::db::rfc5912::RSA_ENCRYPTION,
        );

        let digest = Sha256::digest(data);
        get_public_key(&cert)
            .unwrap()
            .verify(
                Pkcs1v15Sign::new::<Sha256>(),
                &digest,
                signer.signature.as_bytes(),
            )
            .unwrap();
    }

    #[test]
    fn reject_small_keys() {
        assert!(matches!(
            generate_rsa_key_pair(1024),
            Err(Error::UnsupportedKeySize(128)),
        ));
    }
}
