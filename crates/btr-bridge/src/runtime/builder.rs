//! Builder for assembling a [`BridgeRuntime`].

use super::{BridgeRuntime, RuntimeInner, Side};
use crate::codec::Codec;
use crate::config::Context;
use crate::error::{BridgeError, Result};
use crate::ipc::{CallSender, ProcedureRouter};
use crate::network::ResilientFetch;
use crate::token::TokenCache;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::debug;

/// Builder for a [`BridgeRuntime`].
///
/// # Example
///
/// ```rust,ignore
/// use btr_bridge::{BridgeRuntime, Context};
///
/// let (sender, _handle) = LocalTransport::spawn(&background)?;
/// let foreground = BridgeRuntime::builder(Context::foreground())
///     .with_sender(Arc::new(sender))
///     .build()?;
/// ```
pub struct BridgeRuntimeBuilder {
    context: Context,
    sender: Option<Arc<dyn CallSender>>,
    http_client: Option<reqwest::Client>,
    strict_codec: bool,
}

impl BridgeRuntimeBuilder {
    pub fn new(context: Context) -> Self {
        Self {
            context,
            sender: None,
            http_client: None,
            strict_codec: false,
        }
    }

    /// Transport used by foreground proxies. Required in the foreground,
    /// rejected in the background.
    pub fn with_sender(mut self, sender: Arc<dyn CallSender>) -> Self {
        self.sender = Some(sender);
        self
    }

    /// Use a preconfigured HTTP client instead of the default one.
    pub fn with_http_client(mut self, client: reqwest::Client) -> Self {
        self.http_client = Some(client);
        self
    }

    /// Reject unknown type markers when decoding.
    ///
    /// Default: `false` (unknown markers decode as plain objects)
    pub fn strict_codec(mut self, strict: bool) -> Self {
        self.strict_codec = strict;
        self
    }

    pub fn build(self) -> Result<BridgeRuntime> {
        let side = match (self.context.is_background(), self.sender) {
            (true, None) => Side::Background(Arc::new(ProcedureRouter::new())),
            (true, Some(_)) => {
                return Err(BridgeError::Config {
                    message: "A background runtime serves procedures and takes no sender"
                        .to_string(),
                })
            }
            (false, None) => {
                return Err(BridgeError::Config {
                    message: "A foreground runtime needs a sender".to_string(),
                })
            }
            (false, Some(sender)) => {
                if self.context.transport_supports_binary && !sender.supports_binary() {
                    return Err(BridgeError::Config {
                        message: "Context expects binary payloads but the sender carries text only"
                            .to_string(),
                    });
                }
                Side::Foreground(sender)
            }
        };

        let tokens = Arc::new(TokenCache::new());
        let fetch = match self.http_client {
            Some(client) => ResilientFetch::with_client(client, tokens.clone()),
            None => ResilientFetch::new(tokens.clone())?,
        };
        let codec = Codec::for_context(&self.context).with_strict(self.strict_codec);

        debug!(
            "Bridge runtime ready: role={}, binary={}",
            self.context.role, self.context.transport_supports_binary
        );

        Ok(BridgeRuntime {
            inner: Arc::new(RuntimeInner {
                context: self.context,
                codec,
                tokens,
                fetch,
                side,
                counters: Mutex::new(HashMap::new()),
                memo_caches: Mutex::new(Vec::new()),
            }),
        })
    }
}
