use std::collections::BTreeSet;
use std::io::Write as _;
use std::ops;

use bincode::{Decode, Encode};
use ed25519_dalek::Signer as _;
use snafu::{OptionExt as _, Snafu};

use crate::Signature;
use crate::bincode::STD_BINCODE_CONFIG;
use crate::peer::{PeerIdx, PeerPubkey, PeerSeckey};

#[derive(Debug, Snafu)]
pub struct InvalidSignatureError;

pub type InvalidSignatureResult<T> = Result<T, InvalidSignatureError>;

pub trait Hashable: bincode::Encode {
    fn hash(&self) -> blake3::Hash {
        let mut hasher = blake3::Hasher::new();

        bincode::encode_into_std_write(self, &mut hasher, STD_BINCODE_CONFIG)
            .expect("Can't fail");

        hasher.finalize()
    }
}

/// A message that can be signed/verified by [`PeerPubkey`] identity
pub trait Signable: Hashable {
    /// Unique tag preventing two different type of messages with the same
    /// encoding from conflicting with each other
    const TAG: [u8; 4];

    fn sign_hash(&self) -> blake3::Hash {
        let mut hasher = blake3::Hasher::new();

        hasher.write_all(b"vbft").expect("Can't fail");
        hasher.write_all(&Self::TAG).expect("Can't fail");
        hasher
            .write_all(self.hash().as_bytes())
            .expect("Can't fail");

        hasher.finalize()
    }

    fn sign_with(&self, seckey: PeerSeckey) -> Signature {
        ed25519_dalek::SigningKey::from(seckey)
            .sign(self.sign_hash().as_bytes())
            .into()
    }

    fn verify_signature(&self, pubkey: PeerPubkey, sig: Signature) -> InvalidSignatureResult<()> {
        verify_hash_signature(self.sign_hash(), pubkey, sig)
    }
}

fn verify_hash_signature(
    hash: blake3::Hash,
    pubkey: PeerPubkey,
    sig: Signature,
) -> InvalidSignatureResult<()> {
    ed25519_dalek::VerifyingKey::try_from(pubkey)
        .ok()
        .context(InvalidSignatureSnafu)?
        .verify_strict(hash.as_bytes(), &sig.into())
        .ok()
        .context(InvalidSignatureSnafu)?;
    Ok(())
}

#[derive(Decode, Encode, Clone, Debug, PartialEq, Eq)]
pub struct Signed<T> {
    pub inner: T,
    pub sig: Signature,
}

impl<T> Signed<T>
where
    T: Signable,
{
    pub fn new(inner: T, sig: Signature) -> Self {
        Self { inner, sig }
    }

    pub fn new_sign(inner: T, seckey: PeerSeckey) -> Self {
        let sig = inner.sign_with(seckey);
        Self { inner, sig }
    }

    pub fn verify_sig_peer_pubkey(&self, peer_pubkey: PeerPubkey) -> InvalidSignatureResult<()> {
        self.verify_signature(peer_pubkey, self.sig)
    }
}

impl<T> ops::Deref for Signed<T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

/// A single peer's signature inside an aggregate
///
/// Encodes as `(varbytes signature, u16 index)`.
#[derive(Decode, Encode, Clone, Copy, Debug, PartialEq, Eq)]
pub struct SignatureEntry {
    pub sig: Signature,
    pub peer_idx: PeerIdx,
}

impl SignatureEntry {
    pub fn new(peer_idx: PeerIdx, sig: Signature) -> Self {
        Self { sig, peer_idx }
    }
}

#[derive(Debug, Snafu, PartialEq, Eq)]
pub enum InvalidNotarizationError {
    #[snafu(display("Not enough signatures: {has} < {threshold}"))]
    NotEnoughSignatures { has: usize, threshold: usize },
    DuplicateSigner { peer_idx: PeerIdx },
    UnexpectedSigner { peer_idx: PeerIdx },
    InvalidPeerSignature { peer_idx: PeerIdx },
}

pub type InvalidNotarizationResult<T> = Result<T, InvalidNotarizationError>;

/// Verify that `sigs` contain at least `threshold` valid signatures over
/// `inner` from distinct peers
///
/// `pubkey_of` returns the key of a peer allowed to sign, or `None` if the
/// peer is not eligible.
pub fn verify_notarization<T>(
    inner: &T,
    sigs: &[SignatureEntry],
    threshold: usize,
    pubkey_of: impl Fn(PeerIdx) -> Option<PeerPubkey>,
) -> InvalidNotarizationResult<()>
where
    T: Signable,
{
    let mut seen = BTreeSet::new();
    for entry in sigs {
        if !seen.insert(entry.peer_idx) {
            DuplicateSignerSnafu {
                peer_idx: entry.peer_idx,
            }
            .fail()?;
        }
    }

    if seen.len() < threshold {
        NotEnoughSignaturesSnafu {
            has: seen.len(),
            threshold,
        }
        .fail()?;
    }

    let hash = inner.sign_hash();

    for entry in sigs {
        let pubkey = pubkey_of(entry.peer_idx).context(UnexpectedSignerSnafu {
            peer_idx: entry.peer_idx,
        })?;
        verify_hash_signature(hash, pubkey, entry.sig)
            .ok()
            .context(InvalidPeerSignatureSnafu {
                peer_idx: entry.peer_idx,
            })?;
    }
    Ok(())
}

#[cfg(test)]
mod tests;
