//! Telegram transport layer.
//!
//! Thin consumer of the media pipeline: feeds message text into the
//! parser registry and sends resolved media back to the chat.

/// Command and message handlers.
pub mod handlers;
