//! Control operand encoding.
//!
//! Every control call carries a single 32-bit operand. Calls that name a
//! layer also pass a pointer to the raw name bytes as the second argument.
//!
//! ```text
//!  31  30  29           16 15          8 7           0
//! +---+---+---------------+-------------+-------------+
//! | 0 | N |  name length  | parent len  |   command   |
//! +---+---+---------------+-------------+-------------+
//! ```
//!
//! `N` is set whenever a name is present. The name is `parent/id` when a
//! parent is given and `id` alone otherwise; the parent length lets the
//! engine split it back apart.

use serde::{Deserialize, Serialize};

use super::error::{ChannelError, ChannelResult};

/// Flag bit marking an operand that carries a name argument.
pub const NAME_PRESENT: u32 = 1 << 30;

/// Largest parent id the 8-bit parent length field can describe.
pub const MAX_PARENT_LEN: usize = 0xff;

/// Largest name the 14-bit name length field can describe.
pub const MAX_NAME_LEN: usize = 0x3fff;

/// Operations understood by the snapshot engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ControlOp {
    Create,
    CloneCreate,
    Remove,
    Mount,
    Unmount,
    Stat,
    UnmountAll,
}

impl ControlOp {
    pub const ALL: [ControlOp; 7] = [
        ControlOp::Create,
        ControlOp::CloneCreate,
        ControlOp::Remove,
        ControlOp::Mount,
        ControlOp::Unmount,
        ControlOp::Stat,
        ControlOp::UnmountAll,
    ];

    /// Position of the operation within a command table, starting at 1.
    fn ordinal(self) -> u8 {
        match self {
            ControlOp::Create => 1,
            ControlOp::CloneCreate => 2,
            ControlOp::Remove => 3,
            ControlOp::Mount => 4,
            ControlOp::Unmount => 5,
            ControlOp::Stat => 6,
            ControlOp::UnmountAll => 7,
        }
    }
}

/// Numbering scheme used for command codes.
///
/// Engines ship with one of two contiguous tables. A channel is bound to
/// exactly one of them for its whole lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommandTable {
    /// Codes 101..=107.
    #[default]
    Layer,
    /// Codes 1..=7, used by older engine builds.
    Legacy,
}

impl CommandTable {
    fn base(self) -> u8 {
        match self {
            CommandTable::Layer => 100,
            CommandTable::Legacy => 0,
        }
    }

    /// Command code for `op` in this table.
    pub fn code(self, op: ControlOp) -> u8 {
        self.base() + op.ordinal()
    }

    /// Reverse lookup of [`CommandTable::code`].
    #[cfg(test)]
    fn op_for(self, code: u8) -> Option<ControlOp> {
        ControlOp::ALL.into_iter().find(|op| self.code(*op) == code)
    }

    pub fn name(self) -> &'static str {
        match self {
            CommandTable::Layer => "layer",
            CommandTable::Legacy => "legacy",
        }
    }
}

/// An operand ready to be handed to the control call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedOperand {
    pub operand: u32,
    /// Raw name bytes, passed by pointer. `None` for global operations.
    pub name: Option<Vec<u8>>,
}

/// Fields recovered from an [`EncodedOperand`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedOperand {
    pub code: u8,
    pub parent: String,
    pub id: String,
}

/// Encode a control operation.
///
/// Fails instead of truncating when the parent or the combined name does not
/// fit its length field.
pub fn encode(code: u8, parent: &str, id: &str) -> ChannelResult<EncodedOperand> {
    if parent.is_empty() && id.is_empty() {
        return Ok(EncodedOperand { operand: u32::from(code), name: None });
    }

    let plen = parent.len();
    if plen > MAX_PARENT_LEN {
        return Err(ChannelError::ParentTooLong(plen));
    }

    let name = if parent.is_empty() { id.to_string() } else { format!("{parent}/{id}") };
    let nlen = name.len();
    if nlen > MAX_NAME_LEN {
        return Err(ChannelError::NameTooLong(nlen));
    }

    let operand = NAME_PRESENT | ((nlen as u32) << 16) | ((plen as u32) << 8) | u32::from(code);
    Ok(EncodedOperand { operand, name: Some(name.into_bytes()) })
}

impl EncodedOperand {
    pub fn code(&self) -> u8 {
        (self.operand & 0xff) as u8
    }

    pub fn has_name(&self) -> bool {
        self.operand & NAME_PRESENT != 0
    }

    pub fn name_len(&self) -> usize {
        ((self.operand >> 16) & MAX_NAME_LEN as u32) as usize
    }

    pub fn parent_len(&self) -> usize {
        ((self.operand >> 8) & MAX_PARENT_LEN as u32) as usize
    }

    /// Split the operand back into code, parent and id, the way the engine
    /// does. Returns `None` when the length fields disagree with the name.
    pub fn decode(&self) -> Option<DecodedOperand> {
        let code = self.code();
        if !self.has_name() {
            return Some(DecodedOperand { code, parent: String::new(), id: String::new() });
        }

        let name = self.name.as_deref()?;
        if name.len() != self.name_len() {
            return None;
        }

        let plen = self.parent_len();
        let (parent, id) = if plen == 0 {
            (&name[..0], name)
        } else {
            if name.len() <= plen || name[plen] != b'/' {
                return None;
            }
            (&name[..plen], &name[plen + 1..])
        };

        Some(DecodedOperand {
            code,
            parent: String::from_utf8(parent.to_vec()).ok()?,
            id: String::from_utf8(id.to_vec()).ok()?,
        })
    }
}
