//! Message bodies: X25519 + XSalsa20-Poly1305 box with a direction tag
//!
//! Wire format of `ciphertext`: `XSalsa20-Poly1305(tag ‖ utf8)` with a random
//! 24-byte nonce stored next to it in the record. The symmetric key is the
//! NaCl `crypto_box_beforenm` key, `HSalsa20(X25519(own, peer), 0)`, so
//! records written by any NaCl `box` client open here and the other way round.
//! The key is identical from both ends, so a sender can always open what they
//! sent.

use crypto_box::aead::Aead;
use crypto_box::{PublicKey, SalsaBox, SecretKey};
use rand::RngCore;
use shade_core::{DecryptionFailure, ShadeError, ShadeResult};
use xsalsa20poly1305::Nonce;
use zeroize::Zeroize;

use crate::keys::BoxKeypair;
use crate::{KEY_SIZE, MAX_CIPHERTEXT_LEN, NONCE_SIZE, TAG_SIZE};

/// Leading plaintext byte recording who the box was written for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum DirectionTag {
    ToRecipient = 0x01,
    SenderCopy = 0x02,
}

impl DirectionTag {
    fn from_byte(b: u8) -> Option<Self> {
        match b {
            0x01 => Some(Self::ToRecipient),
            0x02 => Some(Self::SenderCopy),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SealedContent {
    pub ciphertext: Vec<u8>,
    pub nonce: [u8; NONCE_SIZE],
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecryptedContent {
    pub text: String,
    /// `None` for untagged plaintexts written before tags existed
    pub tag: Option<DirectionTag>,
}

/// Box for one (own secret, peer public) pair.
///
/// Trial decryption builds one session per candidate and reuses it for
/// every record, so the X25519 and HSalsa20 steps run once per candidate.
pub struct ContentSession {
    cipher: SalsaBox,
}

impl ContentSession {
    pub fn new(own: &BoxKeypair, peer_public: &[u8; KEY_SIZE]) -> Self {
        let mut secret = own.secret_bytes();
        let own_secret = SecretKey::from(secret);
        secret.zeroize();
        Self {
            cipher: SalsaBox::new(&PublicKey::from(*peer_public), &own_secret),
        }
    }

    pub fn seal(&self, text: &str, tag: DirectionTag) -> ShadeResult<SealedContent> {
        let sealed_len = 1 + text.len() + TAG_SIZE;
        if sealed_len > MAX_CIPHERTEXT_LEN {
            return Err(ShadeError::ContentTooLong {
                len: sealed_len,
                max: MAX_CIPHERTEXT_LEN,
            });
        }

        let mut plaintext = Vec::with_capacity(1 + text.len());
        plaintext.push(tag as u8);
        plaintext.extend_from_slice(text.as_bytes());

        let mut nonce = [0u8; NONCE_SIZE];
        rand::thread_rng().fill_bytes(&mut nonce);

        let ciphertext = self
            .cipher
            .encrypt(Nonce::from_slice(&nonce), plaintext.as_slice())
            .map_err(|e| anyhow::anyhow!("content encryption failed: {e}"));
        plaintext.zeroize();

        Ok(SealedContent {
            ciphertext: ciphertext?,
            nonce,
        })
    }

    pub fn open(
        &self,
        ciphertext: &[u8],
        nonce: &[u8; NONCE_SIZE],
    ) -> Result<DecryptedContent, DecryptionFailure> {
        if ciphertext.len() < TAG_SIZE {
            return Err(DecryptionFailure);
        }
        let mut plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| DecryptionFailure)?;

        let (tag, body) = match plaintext.first().copied().and_then(DirectionTag::from_byte) {
            Some(tag) => (Some(tag), &plaintext[1..]),
            None => (None, &plaintext[..]),
        };
        let text = std::str::from_utf8(body).map(str::to_owned);
        plaintext.zeroize();

        Ok(DecryptedContent {
            text: text.map_err(|_| DecryptionFailure)?,
            tag,
        })
    }
}

/// Encrypt `text` for `recipient_public`, tagged as addressed to the recipient.
pub fn encrypt(
    text: &str,
    recipient_public: &[u8; KEY_SIZE],
    sender: &BoxKeypair,
) -> ShadeResult<SealedContent> {
    ContentSession::new(sender, recipient_public).seal(text, DirectionTag::ToRecipient)
}

pub fn decrypt(
    ciphertext: &[u8],
    nonce: &[u8; NONCE_SIZE],
    other_public: &[u8; KEY_SIZE],
    own: &BoxKeypair,
) -> Result<DecryptedContent, DecryptionFailure> {
    ContentSession::new(own, other_public).open(ciphertext, nonce)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn alice() -> BoxKeypair {
        BoxKeypair::from_seed([0xA1; KEY_SIZE])
    }

    fn bob() -> BoxKeypair {
        BoxKeypair::from_seed([0xB0; KEY_SIZE])
    }

    #[test]
    fn test_alice_to_bob_roundtrip() {
        let msg = "Hello Bob! This is a secret message.";
        let sealed = encrypt(msg, &bob().public_bytes(), &alice()).unwrap();
        let opened = decrypt(&sealed.ciphertext, &sealed.nonce, &alice().public_bytes(), &bob())
            .unwrap();
        assert_eq!(opened.text, msg);
        assert_eq!(opened.tag, Some(DirectionTag::ToRecipient));
    }

    #[test]
    fn test_sender_can_open_own_message() {
        let sealed = encrypt("note to self", &bob().public_bytes(), &alice()).unwrap();
        let opened =
            decrypt(&sealed.ciphertext, &sealed.nonce, &bob().public_bytes(), &alice()).unwrap();
        assert_eq!(opened.text, "note to self");
    }

    #[test]
    fn test_wrong_counterparty_fails() {
        let eve = BoxKeypair::from_seed([0xEE; KEY_SIZE]);
        let sealed = encrypt("secret", &bob().public_bytes(), &alice()).unwrap();
        let result = decrypt(&sealed.ciphertext, &sealed.nonce, &eve.public_bytes(), &bob());
        assert_eq!(result, Err(DecryptionFailure));
    }

    #[test]
    fn test_tampered_ciphertext_fails() {
        let mut sealed = encrypt("secret", &bob().public_bytes(), &alice()).unwrap();
        sealed.ciphertext[3] ^= 0xFF;
        let result = decrypt(&sealed.ciphertext, &sealed.nonce, &alice().public_bytes(), &bob());
        assert_eq!(result, Err(DecryptionFailure));
    }

    #[test]
    fn test_truncated_ciphertext_fails() {
        let result = decrypt(&[0u8; 4], &[0u8; NONCE_SIZE], &alice().public_bytes(), &bob());
        assert_eq!(result, Err(DecryptionFailure));
    }

    #[test]
    fn test_sender_copy_tag() {
        let session = ContentSession::new(&alice(), &bob().public_bytes());
        let sealed = session.seal("archived", DirectionTag::SenderCopy).unwrap();
        let opened = session.open(&sealed.ciphertext, &sealed.nonce).unwrap();
        assert_eq!(opened.tag, Some(DirectionTag::SenderCopy));
        assert_eq!(opened.text, "archived");
    }

    #[test]
    fn test_ciphertext_size() {
        let sealed = encrypt("abc", &bob().public_bytes(), &alice()).unwrap();
        // tag (1) + plaintext (3) + MAC (16)
        assert_eq!(sealed.ciphertext.len(), 1 + 3 + TAG_SIZE);
    }

    #[test]
    fn test_max_length_enforced() {
        let longest = "x".repeat(MAX_CIPHERTEXT_LEN - 1 - TAG_SIZE);
        assert!(encrypt(&longest, &bob().public_bytes(), &alice()).is_ok());

        let too_long = "x".repeat(MAX_CIPHERTEXT_LEN - TAG_SIZE);
        assert!(matches!(
            encrypt(&too_long, &bob().public_bytes(), &alice()),
            Err(ShadeError::ContentTooLong { .. })
        ));
    }

    #[test]
    fn test_untagged_plaintext_passes_through() {
        let session = ContentSession::new(&alice(), &bob().public_bytes());
        let nonce = [7u8; NONCE_SIZE];
        let ct = session
            .cipher
            .encrypt(Nonce::from_slice(&nonce), b"legacy body".as_slice())
            .unwrap();
        let opened = session.open(&ct, &nonce).unwrap();
        assert_eq!(opened.tag, None);
        assert_eq!(opened.text, "legacy body");
    }

    // NaCl box known answer: Alice and Bob keys from RFC 7748 section 6.1,
    // beforenm key from the NaCl core1 test.
    const ALICE_SK: &str = "77076d0a7318a57d3c16c17251b26645df4c2f87ebc0992ab177fba51db92c2a";
    const BOB_PK: &str = "de9edb7d7b7dc1b4d35b61c2ece435373f8343c85b78674dadfc7e146f882b4f";
    const BEFORENM: &str = "1b27556473e985d462cd51197a9a46c76009549eac6474f206c4ee0844f68389";

    fn hex32(s: &str) -> [u8; KEY_SIZE] {
        hex::decode(s).unwrap().try_into().unwrap()
    }

    #[test]
    fn test_opens_nacl_box() {
        use xsalsa20poly1305::aead::KeyInit;
        use xsalsa20poly1305::XSalsa20Poly1305;

        let nonce = [0x69u8; NONCE_SIZE];
        let secretbox = XSalsa20Poly1305::new((&hex32(BEFORENM)).into());
        let ct = secretbox
            .encrypt(Nonce::from_slice(&nonce), b"\x01gm from tweetnacl".as_slice())
            .unwrap();

        let alice = BoxKeypair::from_seed(hex32(ALICE_SK));
        let opened = ContentSession::new(&alice, &hex32(BOB_PK))
            .open(&ct, &nonce)
            .unwrap();
        assert_eq!(opened.tag, Some(DirectionTag::ToRecipient));
        assert_eq!(opened.text, "gm from tweetnacl");
    }

    #[test]
    fn test_seals_as_nacl_box() {
        use xsalsa20poly1305::aead::KeyInit;
        use xsalsa20poly1305::XSalsa20Poly1305;

        let alice = BoxKeypair::from_seed(hex32(ALICE_SK));
        let sealed = ContentSession::new(&alice, &hex32(BOB_PK))
            .seal("to a nacl client", DirectionTag::ToRecipient)
            .unwrap();
        let secretbox = XSalsa20Poly1305::new((&hex32(BEFORENM)).into());
        let plain = secretbox
            .decrypt(Nonce::from_slice(&sealed.nonce), sealed.ciphertext.as_slice())
            .unwrap();
        assert_eq!(plain[0], 0x01);
        assert_eq!(&plain[1..], b"to a nacl client");
    }

    proptest! {
        #[test]
        fn roundtrip_any_text(text in "\\PC{0,50}") {
            let sealed = encrypt(&text, &bob().public_bytes(), &alice()).unwrap();
            let opened = decrypt(&sealed.ciphertext, &sealed.nonce, &alice().public_bytes(), &bob()).unwrap();
            prop_assert_eq!(opened.text, text);
        }
    }
}
