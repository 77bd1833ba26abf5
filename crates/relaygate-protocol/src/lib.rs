pub mod dialect;
pub mod error;
pub mod model;
pub mod sse;

pub use error::{ErrorKind, GatewayError};
pub use model::{
    ContentPart, FinishReason, GatewayRequest, GatewayResponse, Message, Modality, Role, StreamChunk, ToolSpec, Usage,
    split_provider_model,
};
pub use dialect::{Dialect, DialectKind, decode_request, encode_error, encode_response, encode_stream_chunk};
