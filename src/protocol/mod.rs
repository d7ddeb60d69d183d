//! Control-channel protocol: messages, payload protection, envelope framing

mod cipher;
mod envelope;
mod message;

pub use cipher::{compress, decompress, PayloadCipher};
pub use envelope::{Envelope, EnvelopeCodec};
pub use message::{Command, RawFrame, Reply};
pub use message::{TAG_CREATE_JOB, TAG_ERROR, TAG_JOB_DATA, TAG_OK, TAG_REGISTER, TAG_STOP_JOB};
