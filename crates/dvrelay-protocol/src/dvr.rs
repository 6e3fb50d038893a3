//! DVR login frame codec.
//!
//! The DVR starts streaming a channel after receiving a fixed 507-byte login
//! frame. Only three regions of it vary:
//!
//! ```text
//! [38]       low nibble   channel mask (1, 2, 4, 8); high nibble untouched
//! [47..57]   user         one ASCII byte per character, zero padded
//! [79..91]   pass         one ASCII byte per character, zero padded
//! ```
//!
//! Every other byte is copied from [`TEMPLATE`]. The DVR answers with an
//! 8-byte reply, see [`validate_handshake_reply`].

use dvrelay_core::{Channel, DvrCredentials};

use crate::error::{CodecError, ReplyError};

/// Length of the login frame.
pub const HANDSHAKE_LEN: usize = 507;

/// Length of the DVR's reply to the login frame.
pub const REPLY_LEN: usize = 8;

/// Byte whose low nibble selects the channel.
pub const CHANNEL_BYTE: usize = 38;

pub const USER_OFFSET: usize = 47;
pub const USER_LEN: usize = 10;

/// The last four bytes of this region overlay template bytes `87..91`; a
/// password longer than 8 characters replaces them, as the DVR's own client
/// does.
pub const PASS_OFFSET: usize = 79;
pub const PASS_LEN: usize = 12;

pub const REPLY_SUCCESS: [u8; REPLY_LEN] = [0x10, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00];
pub const REPLY_AUTH_FAILED: [u8; REPLY_LEN] = [0x08, 0x00, 0x00, 0x00, 0x04, 0x00, 0x00, 0x00];

/// Non-zero prefix of the login frame; the rest is zero.
const TEMPLATE_HEAD: [u8; 107] = [
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x03, 0x00,
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x68, 0x00, 0x00, 0x00, 0x01, 0x00,
    0x00, 0x00, 0x10, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x00, 0x00,
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x01, 0x01, 0x24, 0x00, 0x00, 0x00, 0x00,
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x9c, 0xc9, 0xc8, 0x05, 0x00, 0x00, 0x00, 0x00, 0x04,
    0x00, 0x01, 0x00, 0x04, 0x00, 0x00, 0x00, 0xa8, 0xc9, 0xc8, 0x05,
];

/// The login frame with zeroed channel, user and pass fields.
pub const TEMPLATE: [u8; HANDSHAKE_LEN] = build_template();

const fn build_template() -> [u8; HANDSHAKE_LEN] {
    let mut frame = [0u8; HANDSHAKE_LEN];
    let mut i = 0;
    while i < TEMPLATE_HEAD.len() {
        frame[i] = TEMPLATE_HEAD[i];
        i += 1;
    }
    frame
}

/// Builds the login frame for `channel` with the given credentials.
pub fn encode_handshake(
    channel: Channel,
    credentials: &DvrCredentials,
) -> Result<[u8; HANDSHAKE_LEN], CodecError> {
    let user = credentials.user.as_bytes();
    let pass = credentials.pass.as_bytes();

    if !credentials.user.is_ascii() || !credentials.pass.is_ascii() {
        return Err(CodecError::NonAscii);
    }
    if user.len() > USER_LEN {
        return Err(CodecError::UserTooLong { len: user.len(), max: USER_LEN });
    }
    if pass.len() > PASS_LEN {
        return Err(CodecError::PassTooLong { len: pass.len(), max: PASS_LEN });
    }

    let mut frame = TEMPLATE;
    frame[CHANNEL_BYTE] = (frame[CHANNEL_BYTE] & 0xF0) | (channel.mask() & 0x0F);
    frame[USER_OFFSET..USER_OFFSET + user.len()].copy_from_slice(user);
    frame[PASS_OFFSET..PASS_OFFSET + pass.len()].copy_from_slice(pass);
    Ok(frame)
}

/// Checks the DVR's answer to the login frame.
///
/// Anything but the exact success constant is an error; a short reply is
/// [`ReplyError::UnknownReply`].
pub fn validate_handshake_reply(reply: &[u8]) -> Result<(), ReplyError> {
    if reply == REPLY_SUCCESS {
        Ok(())
    } else if reply == REPLY_AUTH_FAILED {
        Err(ReplyError::AuthFailed)
    } else {
        Err(ReplyError::UnknownReply(reply.to_vec()))
    }
}

/// Channel mask stored in a login frame.
pub fn channel_nibble(frame: &[u8; HANDSHAKE_LEN]) -> u8 {
    frame[CHANNEL_BYTE] & 0x0F
}

/// User field of a login frame with the zero padding stripped.
pub fn user_field(frame: &[u8; HANDSHAKE_LEN]) -> &[u8] {
    trim_padding(&frame[USER_OFFSET..USER_OFFSET + USER_LEN])
}

/// Password field of a login frame, up to the first zero byte.
pub fn pass_field(frame: &[u8; HANDSHAKE_LEN]) -> &[u8] {
    trim_padding(&frame[PASS_OFFSET..PASS_OFFSET + PASS_LEN])
}

fn trim_padding(field: &[u8]) -> &[u8] {
    let end = field.iter().position(|&b| b == 0).unwrap_or(field.len());
    &field[..end]
}
