//! # Core Types & Contracts
//!
//! The message envelope, the serializer contract, and the encryptor contracts
//! the rest of the runtime is built against.
//!
//! The core never depends on a concrete transport or cryptographic algorithm
//! choice — only on the operation contracts defined here. The default
//! implementations (`WireFormat`, `ClientCrypto`, `ServerCrypto`) are the
//! ones the bundled client and server use.

pub mod crypto;
pub mod message;
pub mod serializer;

pub use crypto::{ClientCrypto, ClientEncryptor, ServerCrypto, ServerEncryptor, SessionKeys};
pub use message::{CallbackEvent, Message, MessageKind, Request, Response, ResponseStatus};
pub use serializer::{ParamList, WireFormat};
