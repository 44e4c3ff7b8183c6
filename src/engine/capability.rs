//! Capability detection chain.
//!
//! Engines expose their completion entry point under different shapes
//! depending on version. The chain is evaluated once, right after the
//! engine is constructed, and the result is stored on the engine session.

use std::fmt;
use std::sync::Arc;

use super::{CacheControl, ChatCompletions, ChatStream, EngineInstance, RawRequest};

/// Outcome of probing a single capability.
pub enum Capability<T> {
    Supported(T),
    Unsupported,
}

impl<T> Capability<T> {
    pub fn from_option(value: Option<T>) -> Self {
        match value {
            Some(v) => Self::Supported(v),
            None => Self::Unsupported,
        }
    }

    pub fn as_supported(&self) -> Option<&T> {
        match self {
            Self::Supported(v) => Some(v),
            Self::Unsupported => None,
        }
    }

    pub fn is_supported(&self) -> bool {
        matches!(self, Self::Supported(_))
    }
}

impl<T> fmt::Debug for Capability<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Supported(_) => f.write_str("Supported"),
            Self::Unsupported => f.write_str("Unsupported"),
        }
    }
}

/// The completion call shape selected for an engine.
#[derive(Clone)]
pub enum CompletionHandle {
    Streaming(Arc<dyn ChatStream>),
    ChatCompletion(Arc<dyn ChatCompletions>),
    Request(Arc<dyn RawRequest>),
}

impl CompletionHandle {
    /// Short name of the call shape, used in logs.
    #[must_use]
    pub fn shape(&self) -> &'static str {
        match self {
            Self::Streaming(_) => "chat_stream",
            Self::ChatCompletion(_) => "chat_completion",
            Self::Request(_) => "request",
        }
    }
}

impl fmt::Debug for CompletionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CompletionHandle({})", self.shape())
    }
}

/// Everything resolved about an engine instance.
#[derive(Debug)]
pub struct EngineCapabilities {
    pub completion: Capability<CompletionHandle>,
    pub cache: Capability<Arc<dyn CacheControl>>,
    /// Names the engine advertises, kept for the unknown-capability diagnostic.
    pub advertised: Vec<String>,
}

/// Resolve the completion shape and cache control of `engine`.
///
/// Chain order is streaming chat (only when `prefer_streaming`), chat
/// completion, raw request, then streaming chat as a last resort.
pub fn detect(engine: &dyn EngineInstance, prefer_streaming: bool) -> EngineCapabilities {
    let streaming = || engine.chat_stream().map(CompletionHandle::Streaming);
    let chat = || engine.chat_completions().map(CompletionHandle::ChatCompletion);
    let request = || engine.raw_request().map(CompletionHandle::Request);

    let completion = if prefer_streaming {
        streaming().or_else(chat).or_else(request)
    } else {
        chat().or_else(request).or_else(streaming)
    };

    EngineCapabilities {
        completion: Capability::from_option(completion),
        cache: Capability::from_option(engine.cache_control()),
        advertised: engine.capability_names(),
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use crate::engine::{ChatReply, ChatRequest, TextDeltaStream};
    use async_trait::async_trait;

    struct Shapes {
        stream: bool,
        chat: bool,
        request: bool,
    }

    struct Noop;

    #[async_trait]
    impl ChatStream for Noop {
        async fn stream(&self, _request: ChatRequest) -> anyhow::Result<TextDeltaStream> {
            Ok(Box::pin(futures_util::stream::empty()))
        }
    }

    #[async_trait]
    impl ChatCompletions for Noop {
        async fn create(&self, _request: ChatRequest) -> anyhow::Result<ChatReply> {
            Ok(ChatReply::default())
        }
    }

    #[async_trait]
    impl RawRequest for Noop {
        async fn request(&self, _request: ChatRequest) -> anyhow::Result<serde_json::Value> {
            Ok(serde_json::Value::Null)
        }
    }

    impl EngineInstance for Shapes {
        fn capability_names(&self) -> Vec<String> {
            vec!["reload".into(), "unload".into()]
        }

        fn chat_stream(&self) -> Option<Arc<dyn ChatStream>> {
            self.stream.then(|| Arc::new(Noop) as Arc<dyn ChatStream>)
        }

        fn chat_completions(&self) -> Option<Arc<dyn ChatCompletions>> {
            self.chat.then(|| Arc::new(Noop) as Arc<dyn ChatCompletions>)
        }

        fn raw_request(&self) -> Option<Arc<dyn RawRequest>> {
            self.request.then(|| Arc::new(Noop) as Arc<dyn RawRequest>)
        }
    }

    fn shape_of(engine: &Shapes, prefer_streaming: bool) -> Option<&'static str> {
        detect(engine, prefer_streaming)
            .completion
            .as_supported()
            .map(CompletionHandle::shape)
    }

    #[test]
    fn chat_completion_wins_over_request() {
        let engine = Shapes {
            stream: false,
            chat: true,
            request: true,
        };
        assert_eq!(shape_of(&engine, true), Some("chat_completion"));
    }

    #[test]
    fn request_is_second_choice() {
        let engine = Shapes {
            stream: false,
            chat: false,
            request: true,
        };
        assert_eq!(shape_of(&engine, false), Some("request"));
    }

    #[test]
    fn streaming_order_follows_preference() {
        let engine = Shapes {
            stream: true,
            chat: true,
            request: false,
        };
        assert_eq!(shape_of(&engine, true), Some("chat_stream"));
        assert_eq!(shape_of(&engine, false), Some("chat_completion"));

        let stream_only = Shapes {
            stream: true,
            chat: false,
            request: false,
        };
        assert_eq!(shape_of(&stream_only, false), Some("chat_stream"));
    }

    #[test]
    fn nothing_known_is_unsupported_with_names() {
        let engine = Shapes {
            stream: false,
            chat: false,
            request: false,
        };
        let caps = detect(&engine, true);
        assert!(!caps.completion.is_supported());
        assert!(!caps.cache.is_supported());
        assert_eq!(caps.advertised, vec!["reload", "unload"]);
    }
}
