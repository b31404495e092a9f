//! Interface to the kernel-resident snapshot engine.
//!
//! This module covers everything that crosses into the engine:
//! - Bit-packed control operands and the command tables
//! - The control channel (one descriptor per call)
//! - Metadata attribute queries on the layer root

mod channel;
mod error;
mod metadata;
pub mod operand;

pub use channel::{ControlChannel, IoctlChannel};
#[cfg(any(test, feature = "mockall"))]
pub use channel::MockControlChannel;
pub use error::{ChannelError, ChannelResult};
#[cfg(any(test, feature = "mockall"))]
pub use metadata::MockLayerMetadata;
pub use metadata::{LayerMetadata, ROOT_ATTRIBUTE, XattrMetadata, read_u64};
pub use operand::{CommandTable, ControlOp, EncodedOperand};

/// Version of the control protocol spoken by this driver.
pub const CONTROL_PROTOCOL_VERSION: &str = "1.0";
