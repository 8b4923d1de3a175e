use aes::Aes128;
use cipher::{
    BlockDecryptMut, BlockEncrypt, BlockEncryptMut, KeyInit, KeyIvInit, block_padding::Iso7816,
    generic_array::GenericArray,
};
use cmac::{Cmac, Mac};

use super::ChannelError;
use crate::constants::{BLOCK_SIZE, MAC_LENGTH};

pub(crate) type Block = [u8; BLOCK_SIZE];

type Encryptor = cbc::Encryptor<Aes128>;
type Decryptor = cbc::Decryptor<Aes128>;

/// Encrypt a single block with AES-128 in ECB mode
pub(crate) fn encrypt_block(key: &Block, input: &Block) -> Block {
    let cipher = Aes128::new(GenericArray::from_slice(key));
    let mut block = GenericArray::clone_from_slice(input);
    cipher.encrypt_block(&mut block);

    let mut output = [0u8; BLOCK_SIZE];
    output.copy_from_slice(&block);
    output
}

/// Pad `data` in ISO 7816 format and encrypt it with AES-128-CBC
///
/// A full padding block is added when the data is already block aligned.
pub(crate) fn encrypt_padded(
    key: &Block,
    iv: &Block,
    data: &[u8],
) -> Result<Vec<u8>, ChannelError> {
    let msg_len = data.len();
    let mut buffer = vec![0u8; msg_len + BLOCK_SIZE - msg_len % BLOCK_SIZE];
    buffer[..msg_len].copy_from_slice(data);

    let ciphertext = Encryptor::new(GenericArray::from_slice(key), GenericArray::from_slice(iv))
        .encrypt_padded_mut::<Iso7816>(&mut buffer, msg_len)
        .map_err(|_| ChannelError::InvalidPadding)?;
    Ok(ciphertext.to_vec())
}

/// Decrypt AES-128-CBC data and strip its ISO 7816 padding
pub(crate) fn decrypt_padded(
    key: &Block,
    iv: &Block,
    data: &[u8],
) -> Result<Vec<u8>, ChannelError> {
    if data.is_empty() || data.len() % BLOCK_SIZE != 0 {
        return Err(ChannelError::InvalidLength(data.len()));
    }

    let mut buffer = data.to_vec();
    let plaintext = Decryptor::new(GenericArray::from_slice(key), GenericArray::from_slice(iv))
        .decrypt_padded_mut::<Iso7816>(&mut buffer)
        .map_err(|_| ChannelError::InvalidPadding)?;
    Ok(plaintext.to_vec())
}

/// Full AES-CMAC over the concatenation of `parts`
pub(crate) fn cmac(key: &Block, parts: &[&[u8]]) -> Result<Block, ChannelError> {
    let mut mac = <Cmac<Aes128> as Mac>::new_from_slice(key)
        .map_err(|_| ChannelError::InvalidKeyLength)?;
    for part in parts {
        mac.update(part);
    }

    let mut output = [0u8; BLOCK_SIZE];
    output.copy_from_slice(&mac.finalize().into_bytes());
    Ok(output)
}

/// Check a truncated AES-CMAC over `parts` in constant time
pub(crate) fn verify_cmac(key: &Block, parts: &[&[u8]], tag: &[u8]) -> Result<(), ChannelError> {
    if tag.len() != MAC_LENGTH {
        return Err(ChannelError::InvalidLength(tag.len()));
    }

    let mut mac = <Cmac<Aes128> as Mac>::new_from_slice(key)
        .map_err(|_| ChannelError::InvalidKeyLength)?;
    for part in parts {
        mac.update(part);
    }
    mac.verify_truncated_left(tag)
        .map_err(|_| ChannelError::MacMismatch)
}
