//! Wire types shared by the HTTP surface, the router, and the adapters

pub mod message;
pub mod model;
pub mod request;
pub mod response;
pub mod tools;

pub use message::{ChatMessage, ContentPart, ImageUrl, MessageContent, MessageRole};
pub use model::{ModelCard, ModelListResponse, ModelType};
pub use request::{CompletionRequest, EmbeddingInput, EmbeddingRequest};
pub use response::{
    Choice, CompletionResponse, DeltaMessage, EmbeddingData, EmbeddingResponse, FinishReason,
    HiddenParams, StreamChoice, StreamChunk, Usage,
};
pub use tools::{FunctionCall, FunctionDef, ResponseFormat, Tool, ToolCall, ToolChoice};
