// SPDX-License-Identifier: MIT

pub use bincode;
use bincode::config::Config;
use bincode::{de, enc, error};

/// Decode `src` as a single `D`, failing if any bytes are left over
pub fn decode_whole<D: de::Decode<()>, C: Config>(
    src: &[u8],
    config: C,
) -> Result<D, error::DecodeError> {
    let (t, consumed) = bincode::decode_from_slice(src, config)?;

    if consumed != src.len() {
        return Err(bincode::error::DecodeError::Other("leftover bytes"));
    }

    Ok(t)
}

/// Like [`decode_whole`], but also rejects any encoding that is not the one
/// `D` would itself produce (e.g. over-long varints)
///
/// Used for data coming from the network, where two byte strings decoding
/// to the same value could otherwise be used to confuse hash/signature
/// based deduplication.
pub fn decode_canonical<D, C>(src: &[u8], config: C) -> Result<D, error::DecodeError>
where
    D: de::Decode<()> + enc::Encode,
    C: Config,
{
    let t: D = decode_whole(src, config)?;

    let reencoded = bincode::encode_to_vec(&t, config)
        .map_err(|_| bincode::error::DecodeError::Other("re-encoding failed"))?;

    if reencoded != src {
        return Err(bincode::error::DecodeError::Other("irregular encoding"));
    }

    Ok(t)
}

#[cfg(test)]
mod tests;
