//! Ports - the interfaces the core depends on
//!
//! Adapters live outside the pipeline and talk to the runtime only through
//! these traits plus the signal bus. Optional capabilities are advertised,
//! never discovered by downcast.

pub mod channel;
pub mod llm;
pub mod storage;

pub use channel::{
    inbound_user_message, Channel, ChannelCapabilities, ChannelHealth, ConsoleChannel, SendReceipt,
};
pub use llm::{
    ChatMessage, ChatRole, FinishReason, HttpLlmClient, Llm, LlmConfig, LlmRequest, LlmResponse,
    LlmRole, LlmToolCall, ResponseFormat, ScriptedLlm, TokenUsage, ToolChoice, ToolSpec,
};
pub use storage::{FileStorage, MemoryStorage, NamespacedStorage, OrderBy, Storage, StorageQuery};
