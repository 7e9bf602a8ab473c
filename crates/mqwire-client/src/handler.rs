//! Per-subscription message handlers.

use std::error::Error as StdError;

use crate::events::Message;

/// Error type handlers may return. Handler errors are logged and never
/// affect the connection or the acknowledgment flow.
pub type HandlerError = Box<dyn StdError + Send + Sync>;

/// Receives messages matching a subscription's filter.
///
/// Handlers run on the thread driving [`Client::poll`](crate::Client::poll),
/// so a slow handler stalls the read path. Hand heavy work off to
/// another thread.
pub trait MessageHandler: Send {
    fn on_message(&mut self, message: &Message) -> Result<(), HandlerError>;
}

impl<F> MessageHandler for F
where
    F: FnMut(&Message) -> Result<(), HandlerError> + Send,
{
    fn on_message(&mut self, message: &Message) -> Result<(), HandlerError> {
        self(message)
    }
}

/// Wrap an infallible closure as a handler.
pub fn handler_fn<F>(mut f: F) -> impl MessageHandler
where
    F: FnMut(&Message) + Send,
{
    move |message: &Message| -> Result<(), HandlerError> {
        f(message);
        Ok(())
    }
}
