//! Tool servers: transports, error taxonomy, connection pool and the aggregated catalog.

mod catalog;
mod classify;
mod confirmation;
mod connection;
mod error;
mod interface;
mod pool;
pub mod transport;
mod types;

#[cfg(test)]
pub(crate) mod testing;

pub use catalog::{
    CatalogSnapshot, ToolCatalog, ToolDescriptor, has_file_editor_tools, normalize_tool_name,
};
pub use classify::ErrorClassifier;
pub use confirmation::{
    ChannelConfirmation, ConfirmationRefused, ConfirmationRequest, PendingConfirmation, RiskLevel,
    SummaryBuilder, ToolConfirmation,
};
pub use connection::{ConnectionStatus, ServerConnection};
pub use error::{BoxError, McpError, McpErrorCode, McpErrorKind};
pub use interface::ToolServerInterface;
pub use pool::ServerPool;
pub use transport::{McpTransport, create_transport};
pub use types::{
    CallToolOptions, PromptInfo, ResourceInfo, ToolCallRequest, ToolCallResult, ToolInfo,
};
