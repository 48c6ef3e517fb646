//! # agent-protocol
//!
//! HTTP tool protocol shared by the tool server and its clients.
//!
//! | Route                       | Purpose                                  |
//! |-----------------------------|------------------------------------------|
//! | `GET /health`               | liveness, tool and session counts        |
//! | `GET /tools`                | catalog                                  |
//! | `GET /tools/{name}`         | one definition                           |
//! | `POST /tools/{name}/call`   | run a tool, answer with its result       |
//! | `POST /tools/{name}/stream` | run a tool, answer with server-sent events |
//! | `POST /sessions`            | register a conversation                  |
//! | `DELETE /sessions/{id}`     | forget a conversation                    |

pub mod client;
pub mod error;
pub mod server;
pub mod session;
pub mod sse;
pub mod wire;

pub use client::{ClientConfig, ClientSession, ConnectionStatus, ToolClient, server_url_from_parts};
pub use error::{ProtocolError, Result};
pub use server::{ServerState, router, serve};
pub use session::{MemorySessionStore, Session, SessionStore};
pub use wire::{CallToolRequest, ErrorResponse, HealthResponse, StreamFrame};
